//! Native entry points.
//!
//! Objects never call into `ash` directly. Every native call goes through an
//! [`InstanceDispatch`] or [`DeviceDispatch`] table, which always receives the
//! owner's native handle along with the handle of the object being created
//! or destroyed. [`AshInstance`] and [`AshDevice`] forward to the loaded
//! Vulkan implementation; other implementations can be substituted, e.g. to
//! record calls.
use ash::extensions::ext::DebugUtils;
use ash::prelude::VkResult;
use ash::{vk, Device, Entry, Instance};
use std::{
    ffi::{c_void, CStr},
    sync::Arc,
};

/// Instance level entry points.
pub trait InstanceDispatch: Send + Sync {
    /// The `VkInstance` these entry points were loaded for.
    fn handle(&self) -> vk::Instance;

    /// `vkEnumeratePhysicalDevices`
    unsafe fn enumerate_physical_devices(
        &self,
        instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>>;

    /// `vkGetPhysicalDeviceProperties`
    unsafe fn get_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties;

    /// `vkGetPhysicalDeviceMemoryProperties`
    unsafe fn get_physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties;

    /// `vkGetPhysicalDeviceQueueFamilyProperties`
    unsafe fn get_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties>;

    /// `vkCreateDevice`, returning the device level entry points of the new
    /// device.
    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo,
    ) -> VkResult<Arc<dyn DeviceDispatch>>;

    /// `vkDestroyInstance`
    unsafe fn destroy_instance(&self, instance: vk::Instance);
}

/// Device level entry points.
pub trait DeviceDispatch: Send + Sync {
    /// The `VkDevice` these entry points were loaded for.
    fn handle(&self) -> vk::Device;

    /// `vkDestroyDevice`
    unsafe fn destroy_device(&self, device: vk::Device);

    /// `vkDeviceWaitIdle`
    unsafe fn device_wait_idle(&self, device: vk::Device) -> VkResult<()>;

    /// `vkAllocateMemory`
    unsafe fn allocate_memory(
        &self,
        device: vk::Device,
        allocate_info: &vk::MemoryAllocateInfo,
    ) -> VkResult<vk::DeviceMemory>;

    /// `vkFreeMemory`
    unsafe fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory);

    /// `vkMapMemory`
    unsafe fn map_memory(
        &self,
        device: vk::Device,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void>;

    /// `vkUnmapMemory`
    unsafe fn unmap_memory(&self, device: vk::Device, memory: vk::DeviceMemory);

    /// `vkFlushMappedMemoryRanges`
    unsafe fn flush_mapped_memory_ranges(
        &self,
        device: vk::Device,
        ranges: &[vk::MappedMemoryRange],
    ) -> VkResult<()>;

    /// `vkInvalidateMappedMemoryRanges`
    unsafe fn invalidate_mapped_memory_ranges(
        &self,
        device: vk::Device,
        ranges: &[vk::MappedMemoryRange],
    ) -> VkResult<()>;

    /// `vkCreateFramebuffer`
    unsafe fn create_framebuffer(
        &self,
        device: vk::Device,
        create_info: &vk::FramebufferCreateInfo,
    ) -> VkResult<vk::Framebuffer>;

    /// `vkDestroyFramebuffer`
    unsafe fn destroy_framebuffer(&self, device: vk::Device, framebuffer: vk::Framebuffer);

    /// `vkCreatePipelineCache`
    unsafe fn create_pipeline_cache(
        &self,
        device: vk::Device,
        create_info: &vk::PipelineCacheCreateInfo,
    ) -> VkResult<vk::PipelineCache>;

    /// `vkDestroyPipelineCache`
    unsafe fn destroy_pipeline_cache(&self, device: vk::Device, cache: vk::PipelineCache);

    /// `vkGetPipelineCacheData`
    unsafe fn get_pipeline_cache_data(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
    ) -> VkResult<Vec<u8>>;

    /// `vkCreateQueryPool`
    unsafe fn create_query_pool(
        &self,
        device: vk::Device,
        create_info: &vk::QueryPoolCreateInfo,
    ) -> VkResult<vk::QueryPool>;

    /// `vkDestroyQueryPool`
    unsafe fn destroy_query_pool(&self, device: vk::Device, pool: vk::QueryPool);

    /// `vkGetQueryPoolResults`. `NOT_READY` is reported as an error.
    unsafe fn get_query_pool_results(
        &self,
        device: vk::Device,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        data: &mut [u8],
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    ) -> VkResult<()>;

    /// `vkCreateEvent`
    unsafe fn create_event(
        &self,
        device: vk::Device,
        create_info: &vk::EventCreateInfo,
    ) -> VkResult<vk::Event>;

    /// `vkDestroyEvent`
    unsafe fn destroy_event(&self, device: vk::Device, event: vk::Event);

    /// `vkGetEventStatus`, `true` for `EVENT_SET`.
    unsafe fn get_event_status(&self, device: vk::Device, event: vk::Event) -> VkResult<bool>;

    /// `vkSetEvent`
    unsafe fn set_event(&self, device: vk::Device, event: vk::Event) -> VkResult<()>;

    /// `vkResetEvent`
    unsafe fn reset_event(&self, device: vk::Device, event: vk::Event) -> VkResult<()>;

    /// `vkCreateFence`
    unsafe fn create_fence(
        &self,
        device: vk::Device,
        create_info: &vk::FenceCreateInfo,
    ) -> VkResult<vk::Fence>;

    /// `vkDestroyFence`
    unsafe fn destroy_fence(&self, device: vk::Device, fence: vk::Fence);

    /// `vkWaitForFences`. `TIMEOUT` is reported as an error.
    unsafe fn wait_for_fences(
        &self,
        device: vk::Device,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()>;

    /// `vkResetFences`
    unsafe fn reset_fences(&self, device: vk::Device, fences: &[vk::Fence]) -> VkResult<()>;

    /// `vkGetFenceStatus`, `true` when signaled.
    unsafe fn get_fence_status(&self, device: vk::Device, fence: vk::Fence) -> VkResult<bool>;

    /// `vkCreateSemaphore`
    unsafe fn create_semaphore(
        &self,
        device: vk::Device,
        create_info: &vk::SemaphoreCreateInfo,
    ) -> VkResult<vk::Semaphore>;

    /// `vkDestroySemaphore`
    unsafe fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore);

    /// `vkSetDebugUtilsObjectNameEXT`. Does nothing unless `VK_EXT_debug_utils`
    /// is available.
    unsafe fn set_object_name(
        &self,
        _device: vk::Device,
        _object_type: vk::ObjectType,
        _object_handle: u64,
        _name: &CStr,
    ) -> VkResult<()> {
        Ok(())
    }

    /// `vkSetDebugUtilsObjectTagEXT`. Does nothing unless `VK_EXT_debug_utils`
    /// is available.
    unsafe fn set_object_tag(
        &self,
        _device: vk::Device,
        _object_type: vk::ObjectType,
        _object_handle: u64,
        _tag_name: u64,
        _tag: &[u8],
    ) -> VkResult<()> {
        Ok(())
    }
}

/// [`InstanceDispatch`] backed by a loaded [`ash::Instance`].
pub struct AshInstance {
    entry: Entry,
    instance: Instance,
    debug_utils: Option<DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl AshInstance {
    /// Wrap an instance. If `debug_utils_enabled` is set, `VK_EXT_debug_utils`
    /// must have been enabled on `instance`; object naming is then forwarded to
    /// the driver.
    ///
    /// # Safety
    ///
    /// `instance` must have been created from `entry` and must not be destroyed
    /// by anything but the returned value.
    pub unsafe fn new(entry: Entry, instance: Instance, debug_utils_enabled: bool) -> AshInstance {
        let debug_utils = debug_utils_enabled.then(|| DebugUtils::new(&entry, &instance));
        AshInstance {
            entry,
            instance,
            debug_utils,
            debug_messenger: None,
        }
    }

    /// Hand ownership of a debug messenger to this instance; it is destroyed
    /// right before the instance.
    pub(crate) fn adopt_debug_messenger(&mut self, messenger: vk::DebugUtilsMessengerEXT) {
        self.debug_messenger = Some(messenger);
    }

    /// The loader entry the instance was created from.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// The loaded instance.
    #[inline]
    pub fn raw(&self) -> &Instance {
        &self.instance
    }
}

impl InstanceDispatch for AshInstance {
    #[inline]
    fn handle(&self) -> vk::Instance {
        self.instance.handle()
    }

    unsafe fn enumerate_physical_devices(
        &self,
        instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>> {
        crate::debug_assertion!(instance == self.instance.handle(), "foreign instance handle");
        self.instance.enumerate_physical_devices()
    }

    unsafe fn get_physical_device_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        self.instance.get_physical_device_properties(physical_device)
    }

    unsafe fn get_physical_device_memory_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        self.instance
            .get_physical_device_memory_properties(physical_device)
    }

    unsafe fn get_physical_device_queue_family_properties(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.instance
            .get_physical_device_queue_family_properties(physical_device)
    }

    unsafe fn create_device(
        &self,
        physical_device: vk::PhysicalDevice,
        create_info: &vk::DeviceCreateInfo,
    ) -> VkResult<Arc<dyn DeviceDispatch>> {
        let device = self
            .instance
            .create_device(physical_device, create_info, None)?;
        Ok(Arc::new(AshDevice {
            device,
            debug_utils: self.debug_utils.clone(),
        }))
    }

    unsafe fn destroy_instance(&self, instance: vk::Instance) {
        crate::debug_assertion!(instance == self.instance.handle(), "foreign instance handle");
        if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger) {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }

        self.instance.destroy_instance(None);
    }
}

/// [`DeviceDispatch`] backed by a loaded [`ash::Device`].
pub struct AshDevice {
    device: Device,
    debug_utils: Option<DebugUtils>,
}

impl AshDevice {
    /// The loaded device.
    #[inline]
    pub fn raw(&self) -> &Device {
        &self.device
    }

    #[inline]
    fn check(&self, device: vk::Device) {
        crate::debug_assertion!(device == self.device.handle(), "foreign device handle");
    }
}

impl DeviceDispatch for AshDevice {
    #[inline]
    fn handle(&self) -> vk::Device {
        self.device.handle()
    }

    unsafe fn destroy_device(&self, device: vk::Device) {
        self.check(device);
        self.device.destroy_device(None);
    }

    unsafe fn device_wait_idle(&self, device: vk::Device) -> VkResult<()> {
        self.check(device);
        self.device.device_wait_idle()
    }

    unsafe fn allocate_memory(
        &self,
        device: vk::Device,
        allocate_info: &vk::MemoryAllocateInfo,
    ) -> VkResult<vk::DeviceMemory> {
        self.check(device);
        self.device.allocate_memory(allocate_info, None)
    }

    unsafe fn free_memory(&self, device: vk::Device, memory: vk::DeviceMemory) {
        self.check(device);
        self.device.free_memory(memory, None);
    }

    unsafe fn map_memory(
        &self,
        device: vk::Device,
        memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        self.check(device);
        self.device
            .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
    }

    unsafe fn unmap_memory(&self, device: vk::Device, memory: vk::DeviceMemory) {
        self.check(device);
        self.device.unmap_memory(memory);
    }

    unsafe fn flush_mapped_memory_ranges(
        &self,
        device: vk::Device,
        ranges: &[vk::MappedMemoryRange],
    ) -> VkResult<()> {
        self.check(device);
        self.device.flush_mapped_memory_ranges(ranges)
    }

    unsafe fn invalidate_mapped_memory_ranges(
        &self,
        device: vk::Device,
        ranges: &[vk::MappedMemoryRange],
    ) -> VkResult<()> {
        self.check(device);
        self.device.invalidate_mapped_memory_ranges(ranges)
    }

    unsafe fn create_framebuffer(
        &self,
        device: vk::Device,
        create_info: &vk::FramebufferCreateInfo,
    ) -> VkResult<vk::Framebuffer> {
        self.check(device);
        self.device.create_framebuffer(create_info, None)
    }

    unsafe fn destroy_framebuffer(&self, device: vk::Device, framebuffer: vk::Framebuffer) {
        self.check(device);
        self.device.destroy_framebuffer(framebuffer, None);
    }

    unsafe fn create_pipeline_cache(
        &self,
        device: vk::Device,
        create_info: &vk::PipelineCacheCreateInfo,
    ) -> VkResult<vk::PipelineCache> {
        self.check(device);
        self.device.create_pipeline_cache(create_info, None)
    }

    unsafe fn destroy_pipeline_cache(&self, device: vk::Device, cache: vk::PipelineCache) {
        self.check(device);
        self.device.destroy_pipeline_cache(cache, None);
    }

    unsafe fn get_pipeline_cache_data(
        &self,
        device: vk::Device,
        cache: vk::PipelineCache,
    ) -> VkResult<Vec<u8>> {
        self.check(device);
        self.device.get_pipeline_cache_data(cache)
    }

    unsafe fn create_query_pool(
        &self,
        device: vk::Device,
        create_info: &vk::QueryPoolCreateInfo,
    ) -> VkResult<vk::QueryPool> {
        self.check(device);
        self.device.create_query_pool(create_info, None)
    }

    unsafe fn destroy_query_pool(&self, device: vk::Device, pool: vk::QueryPool) {
        self.check(device);
        self.device.destroy_query_pool(pool, None);
    }

    unsafe fn get_query_pool_results(
        &self,
        device: vk::Device,
        pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        data: &mut [u8],
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    ) -> VkResult<()> {
        self.check(device);
        (self.device.fp_v1_0().get_query_pool_results)(
            device,
            pool,
            first_query,
            query_count,
            data.len(),
            data.as_mut_ptr().cast(),
            stride,
            flags,
        )
        .result()
    }

    unsafe fn create_event(
        &self,
        device: vk::Device,
        create_info: &vk::EventCreateInfo,
    ) -> VkResult<vk::Event> {
        self.check(device);
        self.device.create_event(create_info, None)
    }

    unsafe fn destroy_event(&self, device: vk::Device, event: vk::Event) {
        self.check(device);
        self.device.destroy_event(event, None);
    }

    unsafe fn get_event_status(&self, device: vk::Device, event: vk::Event) -> VkResult<bool> {
        self.check(device);
        self.device.get_event_status(event)
    }

    unsafe fn set_event(&self, device: vk::Device, event: vk::Event) -> VkResult<()> {
        self.check(device);
        self.device.set_event(event)
    }

    unsafe fn reset_event(&self, device: vk::Device, event: vk::Event) -> VkResult<()> {
        self.check(device);
        self.device.reset_event(event)
    }

    unsafe fn create_fence(
        &self,
        device: vk::Device,
        create_info: &vk::FenceCreateInfo,
    ) -> VkResult<vk::Fence> {
        self.check(device);
        self.device.create_fence(create_info, None)
    }

    unsafe fn destroy_fence(&self, device: vk::Device, fence: vk::Fence) {
        self.check(device);
        self.device.destroy_fence(fence, None);
    }

    unsafe fn wait_for_fences(
        &self,
        device: vk::Device,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout: u64,
    ) -> VkResult<()> {
        self.check(device);
        self.device.wait_for_fences(fences, wait_all, timeout)
    }

    unsafe fn reset_fences(&self, device: vk::Device, fences: &[vk::Fence]) -> VkResult<()> {
        self.check(device);
        self.device.reset_fences(fences)
    }

    unsafe fn get_fence_status(&self, device: vk::Device, fence: vk::Fence) -> VkResult<bool> {
        self.check(device);
        self.device.get_fence_status(fence)
    }

    unsafe fn create_semaphore(
        &self,
        device: vk::Device,
        create_info: &vk::SemaphoreCreateInfo,
    ) -> VkResult<vk::Semaphore> {
        self.check(device);
        self.device.create_semaphore(create_info, None)
    }

    unsafe fn destroy_semaphore(&self, device: vk::Device, semaphore: vk::Semaphore) {
        self.check(device);
        self.device.destroy_semaphore(semaphore, None);
    }

    unsafe fn set_object_name(
        &self,
        device: vk::Device,
        object_type: vk::ObjectType,
        object_handle: u64,
        name: &CStr,
    ) -> VkResult<()> {
        self.check(device);
        match &self.debug_utils {
            Some(debug_utils) => {
                let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
                    .object_type(object_type)
                    .object_handle(object_handle)
                    .object_name(name);
                debug_utils.set_debug_utils_object_name(device, &name_info)
            }
            None => Ok(()),
        }
    }

    unsafe fn set_object_tag(
        &self,
        device: vk::Device,
        object_type: vk::ObjectType,
        object_handle: u64,
        tag_name: u64,
        tag: &[u8],
    ) -> VkResult<()> {
        self.check(device);
        match &self.debug_utils {
            Some(debug_utils) => {
                let tag_info = vk::DebugUtilsObjectTagInfoEXT::builder()
                    .object_type(object_type)
                    .object_handle(object_handle)
                    .tag_name(tag_name)
                    .tag(tag);
                debug_utils.set_debug_utils_object_tag(device, &tag_info)
            }
            None => Ok(()),
        }
    }
}
