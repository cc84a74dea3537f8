#![allow(clippy::missing_safety_doc)]
#![warn(missing_docs)]
/*!
Reference-counted Vulkan objects that know whether their owner is still alive.

- ✅ Intrusive reference counting: one heap block per object, no cycles
- ✅ Weak back-references from every object to the device or instance it was created from
- ✅ Native handles freed exactly once, only while their owner is valid
- ✅ Objects dropped after their owner are reported instead of double-freed
- ✅ Debug names and tags forwarded to `VK_EXT_debug_utils`

## Lifetimes

Every object is created from its owner and holds a [`WeakRef`] back to it.
Clone a handle to share the object; the native object is destroyed when the
last clone is dropped. If the owner was dropped first, the native handle is
left alone and the [`Validator`] the instance was created with decides what
to do about it: nothing, a warning (the default), or a failed
[`assertion!`].

## Example

```rust,ignore
let entry = unsafe { ash::Entry::load() }.unwrap();
let instance = unsafe {
    InstanceBuilder::new()
        .validation_layers(ValidationLayers::Request)
        .request_debug_messenger(DebugMessenger::Default)
        .validator(Validator::with_policy(DestructionPolicy::Fail))
        .build(&entry)
}
.unwrap();

let physical_device = instance.physical_devices().unwrap().remove(0);
let queue_info = [vk::DeviceQueueCreateInfo::builder()
    .queue_family_index(0)
    .queue_priorities(&[1.0])
    .build()];
let device = physical_device
    .create_device(&vk::DeviceCreateInfo::builder().queue_create_infos(&queue_info))
    .unwrap();

let (memory_type, _) = physical_device
    .memory_type_index(!0, vk::MemoryPropertyFlags::HOST_VISIBLE)
    .unwrap();
let staging = device
    .allocate_memory(&MemoryAllocationInfo::new(1 << 20, memory_type))
    .unwrap();
staging.set_object_name("staging").unwrap();

drop(device);
// Reported as "destroyed after its corresponding device", not freed.
drop(staging);
```

## Licensing

This project is licensed under the [zlib License].

[zlib License]: https://gitlab.com/Friz64/erupt-bootstrap/-/blob/main/LICENSE
*/

#[macro_use]
pub mod assert;
pub mod debug_marker;
pub mod device;
pub mod dispatch;
pub mod framebuffer;
pub mod handle;
pub mod instance;
pub mod memory;
pub mod physical_device;
pub mod pipeline_cache;
pub mod query_pool;
pub mod refcount;
pub mod sync;
pub mod validation;

#[cfg(test)]
mod mock;

pub use debug_marker::*;
pub use device::*;
pub use dispatch::*;
pub use framebuffer::*;
pub use handle::*;
pub use instance::*;
pub use memory::*;
pub use physical_device::*;
pub use pipeline_cache::*;
pub use query_pool::*;
pub use refcount::*;
pub use sync::*;
pub use validation::*;

type LifetimeSmallVec<T> = smallvec::SmallVec<[T; 8]>;
