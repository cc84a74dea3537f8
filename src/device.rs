//! Logical devices and the objects created from them.
use crate::{
    debug_marker::DebugMarker,
    dispatch::DeviceDispatch,
    framebuffer::{Framebuffer, FramebufferCreateInfo, FramebufferObject},
    handle::{upgrade_owner, CreationError, DeviceObjectHandle, InstanceObjectHandle, Owner},
    instance::{Instance, InstanceObject, InstanceWeak},
    memory::{DeviceMemory, DeviceMemoryObject, MemoryAllocationInfo},
    physical_device::{PhysicalDevice, PhysicalDeviceWeak},
    pipeline_cache::{PipelineCache, PipelineCacheCreateInfo, PipelineCacheObject},
    query_pool::{QueryPool, QueryPoolCreateInfo, QueryPoolObject},
    refcount::{EmbeddedResource, Ref, WeakRef},
    sync::{Event, EventObject, Fence, FenceObject, Semaphore, SemaphoreObject},
    validation::{OwnerKind, Validator},
};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::{fmt, sync::Arc};

/// A logical device.
///
/// Objects created from a device keep a weak reference to it. Dropping the
/// last [`Device`] handle destroys the native device even if such objects are
/// still alive; they are reported to the [`Validator`] when they are dropped
/// later and their native handles are not freed.
pub struct DeviceObject {
    handle: InstanceObjectHandle<vk::Device>,
    marker: DebugMarker,
    dispatch: Arc<dyn DeviceDispatch>,
    physical_device: PhysicalDeviceWeak,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

/// Shared handle to a [`DeviceObject`].
pub type Device = Ref<DeviceObject>;

/// Weak reference to a [`DeviceObject`].
pub type DeviceWeak = WeakRef<DeviceObject>;

impl DeviceObject {
    pub(crate) fn new(
        dispatch: Arc<dyn DeviceDispatch>,
        instance: &Instance,
        physical_device: &PhysicalDevice,
        validator: Validator,
    ) -> DeviceObject {
        DeviceObject {
            handle: InstanceObjectHandle::new(
                dispatch.handle(),
                Ref::downgrade(instance),
                validator,
            ),
            marker: DebugMarker::new(vk::ObjectType::DEVICE, "Device"),
            dispatch,
            physical_device: Ref::downgrade(physical_device),
            memory_properties: *physical_device.memory_properties(),
        }
    }

    /// The native handle.
    #[inline]
    pub fn handle(&self) -> vk::Device {
        self.handle.handle()
    }

    /// Device level entry points.
    #[inline]
    pub fn dispatch(&self) -> &dyn DeviceDispatch {
        &*self.dispatch
    }

    /// Weak reference to the instance this device was created from.
    #[inline]
    pub fn instance(&self) -> &InstanceWeak {
        self.handle.owner()
    }

    /// Weak reference to the physical device this device was created on.
    #[inline]
    pub fn physical_device(&self) -> &PhysicalDeviceWeak {
        &self.physical_device
    }

    /// The validator inherited from the instance.
    #[inline]
    pub fn validator(&self) -> &Validator {
        self.handle.validator()
    }

    /// Memory heaps and types of the physical device.
    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    /// Wait until all queues of the device are idle.
    pub fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.dispatch.device_wait_idle(self.handle()) }
    }
}

impl Ref<DeviceObject> {
    /// Allocate device memory.
    pub fn allocate_memory(
        &self,
        allocation_info: &MemoryAllocationInfo,
    ) -> Result<DeviceMemory, CreationError> {
        DeviceMemoryObject::create(&Ref::downgrade(self), allocation_info)
    }

    /// Create a framebuffer.
    pub fn create_framebuffer(
        &self,
        create_info: &FramebufferCreateInfo,
    ) -> Result<Framebuffer, CreationError> {
        FramebufferObject::create(&Ref::downgrade(self), create_info)
    }

    /// Create a pipeline cache, optionally seeded with data retrieved through
    /// [`PipelineCacheObject::data`].
    pub fn create_pipeline_cache(
        &self,
        create_info: &PipelineCacheCreateInfo,
    ) -> Result<PipelineCache, CreationError> {
        PipelineCacheObject::create(&Ref::downgrade(self), create_info)
    }

    /// Create a query pool.
    pub fn create_query_pool(
        &self,
        create_info: &QueryPoolCreateInfo,
    ) -> Result<QueryPool, CreationError> {
        QueryPoolObject::create(&Ref::downgrade(self), create_info)
    }

    /// Create an event in the unsignaled state.
    pub fn create_event(&self) -> Result<Event, CreationError> {
        EventObject::create(&Ref::downgrade(self))
    }

    /// Create a fence.
    pub fn create_fence(&self, flags: vk::FenceCreateFlags) -> Result<Fence, CreationError> {
        FenceObject::create(&Ref::downgrade(self), flags)
    }

    /// Create a semaphore.
    pub fn create_semaphore(&self) -> Result<Semaphore, CreationError> {
        SemaphoreObject::create(&Ref::downgrade(self))
    }
}

/// Obtain a strong handle to the device of an existing object. Operations on
/// objects whose device is gone fail with `ERROR_DEVICE_LOST`.
pub(crate) fn live_device(device: &DeviceWeak) -> VkResult<Device> {
    device.upgrade().ok_or(vk::Result::ERROR_DEVICE_LOST)
}

/// Create an object owned by `device`.
///
/// Fails with [`CreationError::OwnerDestroyed`] before any native call if
/// the device is not valid. Other failures are reported to the device's
/// validator before they are returned.
pub(crate) fn create_child<H, T>(
    device: &DeviceWeak,
    type_name: &'static str,
    create: impl FnOnce(&DeviceObject) -> Result<H, CreationError>,
    wrap: impl FnOnce(DeviceObjectHandle<H>, &DeviceObject) -> T,
) -> Result<Ref<T>, CreationError>
where
    H: Handle + Copy,
    T: EmbeddedResource,
{
    let owner = upgrade_owner(device)?;
    let handle = create(&owner).map_err(|err| {
        owner.validator().report_creation_failure(type_name, &err);
        err
    })?;

    let handle = DeviceObjectHandle::new(handle, device.clone(), owner.validator().clone());
    Ok(Ref::new(wrap(handle, &owner)))
}

impl EmbeddedResource for DeviceObject {
    fn destroy_object(&mut self) {
        let dispatch = &self.dispatch;
        self.handle.release(&self.marker, |_instance: &InstanceObject, device| {
            log::debug!("destroying device {:?}", device);
            unsafe { dispatch.destroy_device(device) }
        });
        self.physical_device.reset();
    }
}

impl Owner for DeviceObject {
    const KIND: OwnerKind = OwnerKind::Device;
}

impl fmt::Debug for DeviceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
