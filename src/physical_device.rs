//! Physical devices enumerated from an instance.
use crate::{
    debug_marker::DebugMarker,
    device::{Device, DeviceObject},
    handle::{upgrade_owner, CreationError, InstanceObjectHandle},
    instance::{Instance, InstanceWeak},
    refcount::{EmbeddedResource, Ref, WeakRef},
    validation::Validator,
};
use ash::vk;
use std::{fmt, os::raw::c_char};

/// A physical device. Physical devices are not created but enumerated, and
/// are kept alive by their [`Instance`] until it is destroyed.
pub struct PhysicalDeviceObject {
    handle: InstanceObjectHandle<vk::PhysicalDevice>,
    marker: DebugMarker,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_family_properties: Vec<vk::QueueFamilyProperties>,
}

/// Shared handle to a [`PhysicalDeviceObject`].
pub type PhysicalDevice = Ref<PhysicalDeviceObject>;

/// Weak reference to a [`PhysicalDeviceObject`].
pub type PhysicalDeviceWeak = WeakRef<PhysicalDeviceObject>;

impl PhysicalDeviceObject {
    /// Wrap an enumerated physical device and query its properties.
    pub(crate) fn adopt(instance: &Instance, handle: vk::PhysicalDevice) -> PhysicalDevice {
        let dispatch = instance.dispatch();
        let (properties, memory_properties, queue_family_properties) = unsafe {
            (
                dispatch.get_physical_device_properties(handle),
                dispatch.get_physical_device_memory_properties(handle),
                dispatch.get_physical_device_queue_family_properties(handle),
            )
        };

        Ref::new(PhysicalDeviceObject {
            handle: InstanceObjectHandle::new(
                handle,
                Ref::downgrade(instance),
                instance.validator().clone(),
            ),
            marker: DebugMarker::new(vk::ObjectType::PHYSICAL_DEVICE, "PhysicalDevice"),
            properties,
            memory_properties,
            queue_family_properties,
        })
    }

    /// The native handle.
    #[inline]
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle.handle()
    }

    /// Weak reference to the instance this device was enumerated from.
    #[inline]
    pub fn instance(&self) -> &InstanceWeak {
        self.handle.owner()
    }

    /// The validator inherited from the instance.
    #[inline]
    pub fn validator(&self) -> &Validator {
        self.handle.validator()
    }

    /// General properties.
    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// The device name reported by the driver.
    pub fn device_name(&self) -> String {
        fixed_str(&self.properties.device_name)
    }

    /// Memory heaps and types.
    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Properties of every queue family.
    #[inline]
    pub fn queue_family_properties(&self) -> &[vk::QueueFamilyProperties] {
        &self.queue_family_properties
    }

    /// Find the first memory type allowed by `type_bits` that has all of the
    /// `required` property flags. Returns its index and full property flags.
    pub fn memory_type_index(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> Option<(u32, vk::MemoryPropertyFlags)> {
        find_memory_type(&self.memory_properties, type_bits, required)
    }
}

/// Decode a nul-padded fixed-size string, stopping at the array end if no
/// nul is present.
fn fixed_str(chars: &[c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub(crate) fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<(u32, vk::MemoryPropertyFlags)> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|&(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(i, memory_type)| (i as u32, memory_type.property_flags))
}

impl Ref<PhysicalDeviceObject> {
    /// Create a logical device. The device keeps a weak reference to this
    /// physical device and to the instance.
    pub fn create_device(&self, create_info: &vk::DeviceCreateInfo) -> Result<Device, CreationError> {
        let instance = upgrade_owner(self.instance())?;
        let dispatch = unsafe { instance.dispatch().create_device(self.handle(), create_info) }
            .map_err(|err| {
                let err = CreationError::from(err);
                self.validator().report_creation_failure("Device", &err);
                err
            })?;

        log::debug!(
            "created device {:?} on {}",
            dispatch.handle(),
            self.device_name()
        );
        Ok(Ref::new(DeviceObject::new(
            dispatch,
            &instance,
            self,
            self.validator().clone(),
        )))
    }
}

impl EmbeddedResource for PhysicalDeviceObject {
    fn destroy_object(&mut self) {
        self.handle.release_adopted(&self.marker);
    }
}

impl fmt::Debug for PhysicalDeviceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalDevice")
            .field("handle", &self.handle)
            .field("name", &self.device_name())
            .field("device_type", &self.properties.device_type)
            .finish()
    }
}
