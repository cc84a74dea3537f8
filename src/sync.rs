//! Events, fences and semaphores.
use crate::{
    debug_marker::{DebugMarker, DeviceChild},
    device::{create_child, live_device, DeviceObject, DeviceWeak},
    handle::{CreationError, DeviceObjectHandle},
    refcount::{EmbeddedResource, Ref},
};
use ash::prelude::VkResult;
use ash::vk;
use std::fmt;

macro_rules! device_child {
    ($object:ident, $handle:ty) => {
        impl DeviceChild for $object {
            type Handle = $handle;

            #[inline]
            fn object_handle(&self) -> &DeviceObjectHandle<$handle> {
                &self.handle
            }

            #[inline]
            fn debug_marker(&self) -> &DebugMarker {
                &self.marker
            }
        }

        impl fmt::Debug for $object {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(self.marker.type_name())
                    .field("handle", &self.handle)
                    .field("name", &self.marker.name())
                    .finish()
            }
        }
    };
}

/// An event, signaled and unsignaled from the host or a queue.
pub struct EventObject {
    handle: DeviceObjectHandle<vk::Event>,
    marker: DebugMarker,
}

/// Shared handle to an [`EventObject`].
pub type Event = Ref<EventObject>;

impl EventObject {
    /// Create an unsignaled event on `device`.
    pub fn create(device: &DeviceWeak) -> Result<Event, CreationError> {
        create_child(
            device,
            "Event",
            |device| {
                let event_info = vk::EventCreateInfo::default();
                Ok(unsafe { device.dispatch().create_event(device.handle(), &event_info) }?)
            },
            |handle, _| EventObject {
                handle,
                marker: DebugMarker::new(vk::ObjectType::EVENT, "Event"),
            },
        )
    }

    /// Signal the event.
    pub fn set(&self) -> VkResult<()> {
        let device = live_device(self.device())?;
        unsafe { device.dispatch().set_event(device.handle(), self.handle()) }
    }

    /// Unsignal the event.
    pub fn reset(&self) -> VkResult<()> {
        let device = live_device(self.device())?;
        unsafe { device.dispatch().reset_event(device.handle(), self.handle()) }
    }

    /// Returns true if the event is signaled.
    pub fn is_set(&self) -> VkResult<bool> {
        let device = live_device(self.device())?;
        unsafe { device.dispatch().get_event_status(device.handle(), self.handle()) }
    }
}

impl EmbeddedResource for EventObject {
    fn destroy_object(&mut self) {
        self.handle
            .release(&self.marker, |device: &DeviceObject, event| unsafe {
                device.dispatch().destroy_event(device.handle(), event)
            });
    }
}

device_child!(EventObject, vk::Event);

/// A fence, signaled by a queue and waited on by the host.
pub struct FenceObject {
    handle: DeviceObjectHandle<vk::Fence>,
    marker: DebugMarker,
}

/// Shared handle to a [`FenceObject`].
pub type Fence = Ref<FenceObject>;

impl FenceObject {
    /// Create a fence on `device`. Pass `vk::FenceCreateFlags::SIGNALED` to
    /// create it signaled.
    pub fn create(device: &DeviceWeak, flags: vk::FenceCreateFlags) -> Result<Fence, CreationError> {
        create_child(
            device,
            "Fence",
            |device| {
                let fence_info = vk::FenceCreateInfo::builder().flags(flags);
                Ok(unsafe { device.dispatch().create_fence(device.handle(), &fence_info) }?)
            },
            |handle, _| FenceObject {
                handle,
                marker: DebugMarker::new(vk::ObjectType::FENCE, "Fence"),
            },
        )
    }

    /// Wait for the fence for at most `timeout` nanoseconds. Returns
    /// `Ok(false)` if the timeout expired first.
    pub fn wait(&self, timeout: u64) -> VkResult<bool> {
        let device = live_device(self.device())?;
        match unsafe {
            device
                .dispatch()
                .wait_for_fences(device.handle(), &[self.handle()], true, timeout)
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Unsignal the fence.
    pub fn reset(&self) -> VkResult<()> {
        let device = live_device(self.device())?;
        unsafe {
            device
                .dispatch()
                .reset_fences(device.handle(), &[self.handle()])
        }
    }

    /// Returns true if the fence is signaled.
    pub fn is_signaled(&self) -> VkResult<bool> {
        let device = live_device(self.device())?;
        unsafe { device.dispatch().get_fence_status(device.handle(), self.handle()) }
    }
}

impl EmbeddedResource for FenceObject {
    fn destroy_object(&mut self) {
        self.handle
            .release(&self.marker, |device: &DeviceObject, fence| unsafe {
                device.dispatch().destroy_fence(device.handle(), fence)
            });
    }
}

device_child!(FenceObject, vk::Fence);

/// A semaphore, for queue to queue synchronization.
pub struct SemaphoreObject {
    handle: DeviceObjectHandle<vk::Semaphore>,
    marker: DebugMarker,
}

/// Shared handle to a [`SemaphoreObject`].
pub type Semaphore = Ref<SemaphoreObject>;

impl SemaphoreObject {
    /// Create a semaphore on `device`.
    pub fn create(device: &DeviceWeak) -> Result<Semaphore, CreationError> {
        create_child(
            device,
            "Semaphore",
            |device| {
                let semaphore_info = vk::SemaphoreCreateInfo::default();
                Ok(unsafe {
                    device
                        .dispatch()
                        .create_semaphore(device.handle(), &semaphore_info)
                }?)
            },
            |handle, _| SemaphoreObject {
                handle,
                marker: DebugMarker::new(vk::ObjectType::SEMAPHORE, "Semaphore"),
            },
        )
    }
}

impl EmbeddedResource for SemaphoreObject {
    fn destroy_object(&mut self) {
        self.handle
            .release(&self.marker, |device: &DeviceObject, semaphore| unsafe {
                device.dispatch().destroy_semaphore(device.handle(), semaphore)
            });
    }
}

device_child!(SemaphoreObject, vk::Semaphore);
