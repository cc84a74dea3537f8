//! Recording dispatch tables for tests. No Vulkan driver is required.
use crate::{
    device::Device,
    dispatch::{DeviceDispatch, InstanceDispatch},
    instance::Instance,
    validation::{DestructionPolicy, DiagnosticSink, Validator},
};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::{
    ffi::{c_void, CStr},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

pub(crate) const MOCK_MEMORY_SIZE: usize = 4096;

/// Captures everything logged through it.
#[derive(Default)]
pub(crate) struct RecordingSink {
    messages: Mutex<Vec<(log::Level, String)>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<RecordingSink> {
        Arc::new(RecordingSink::default())
    }

    pub(crate) fn messages(&self) -> Vec<(log::Level, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, level: log::Level) -> usize {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, _)| *l == level)
            .count()
    }
}

impl DiagnosticSink for RecordingSink {
    fn log(&self, level: log::Level, message: fmt::Arguments) {
        self.messages
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }
}

/// State shared by a [`MockInstance`] and all devices created from it.
pub(crate) struct MockState {
    calls: Mutex<Vec<&'static str>>,
    next_handle: AtomicU64,
    pub(crate) fail_next_create: Mutex<Option<vk::Result>>,
    pub(crate) event_set: AtomicBool,
    pub(crate) fence_signaled: AtomicBool,
    pub(crate) queries_ready: AtomicBool,
    pub(crate) pipeline_cache_data: Mutex<Vec<u8>>,
    pub(crate) object_names: Mutex<Vec<(vk::ObjectType, u64, String)>>,
    pub(crate) object_tags: Mutex<Vec<(vk::ObjectType, u64, u64, Vec<u8>)>>,
    memory: Mutex<Vec<u8>>,
}

impl MockState {
    fn new() -> Arc<MockState> {
        Arc::new(MockState {
            calls: Mutex::new(Vec::new()),
            next_handle: AtomicU64::new(0x1000),
            fail_next_create: Mutex::new(None),
            event_set: AtomicBool::new(false),
            fence_signaled: AtomicBool::new(false),
            queries_ready: AtomicBool::new(true),
            pipeline_cache_data: Mutex::new(Vec::new()),
            object_names: Mutex::new(Vec::new()),
            object_tags: Mutex::new(Vec::new()),
            memory: Mutex::new(vec![0; MOCK_MEMORY_SIZE]),
        })
    }

    /// Number of times the entry point `name` was called.
    pub(crate) fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|&&call| call == name)
            .count()
    }

    /// Number of native calls made so far.
    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
    }

    fn next_handle<H: Handle>(&self) -> H {
        H::from_raw(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    fn create<H: Handle>(&self, name: &'static str) -> VkResult<H> {
        self.record(name);
        match self.fail_next_create.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(self.next_handle()),
        }
    }
}

pub(crate) struct MockInstance {
    handle: vk::Instance,
    state: Arc<MockState>,
}

impl MockInstance {
    pub(crate) fn new() -> (Arc<MockInstance>, Arc<MockState>) {
        let state = MockState::new();
        let instance = Arc::new(MockInstance {
            handle: state.next_handle(),
            state: state.clone(),
        });
        (instance, state)
    }
}

/// Memory types exposed by every mock physical device.
pub(crate) const MOCK_MEMORY_TYPES: [vk::MemoryPropertyFlags; 3] = [
    vk::MemoryPropertyFlags::DEVICE_LOCAL,
    vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    ),
    vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_CACHED.as_raw(),
    ),
];

impl InstanceDispatch for MockInstance {
    fn handle(&self) -> vk::Instance {
        self.handle
    }

    unsafe fn enumerate_physical_devices(
        &self,
        instance: vk::Instance,
    ) -> VkResult<Vec<vk::PhysicalDevice>> {
        assert_eq!(instance, self.handle);
        self.state.record("vkEnumeratePhysicalDevices");
        Ok(vec![self.state.next_handle(), self.state.next_handle()])
    }

    unsafe fn get_physical_device_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceProperties {
        self.state.record("vkGetPhysicalDeviceProperties");
        vk::PhysicalDeviceProperties {
            api_version: vk::API_VERSION_1_1,
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            ..Default::default()
        }
    }

    unsafe fn get_physical_device_memory_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> vk::PhysicalDeviceMemoryProperties {
        self.state.record("vkGetPhysicalDeviceMemoryProperties");
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: MOCK_MEMORY_TYPES.len() as u32,
            memory_heap_count: 1,
            ..Default::default()
        };
        for (memory_type, &flags) in properties.memory_types.iter_mut().zip(&MOCK_MEMORY_TYPES) {
            memory_type.property_flags = flags;
        }
        properties.memory_heaps[0].size = 1 << 30;
        properties
    }

    unsafe fn get_physical_device_queue_family_properties(
        &self,
        _physical_device: vk::PhysicalDevice,
    ) -> Vec<vk::QueueFamilyProperties> {
        self.state.record("vkGetPhysicalDeviceQueueFamilyProperties");
        vec![vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
            queue_count: 1,
            ..Default::default()
        }]
    }

    unsafe fn create_device(
        &self,
        _physical_device: vk::PhysicalDevice,
        _create_info: &vk::DeviceCreateInfo,
    ) -> VkResult<Arc<dyn DeviceDispatch>> {
        let handle = self.state.create("vkCreateDevice")?;
        Ok(Arc::new(MockDevice {
            handle,
            state: self.state.clone(),
        }))
    }

    unsafe fn destroy_instance(&self, instance: vk::Instance) {
        assert_eq!(instance, self.handle);
        self.state.record("vkDestroyInstance");
    }
}

pub(crate) struct MockDevice {
    handle: vk::Device,
    state: Arc<MockState>,
}

impl DeviceDispatch for MockDevice {
    fn handle(&self) -> vk::Device {
        self.handle
    }

    unsafe fn destroy_device(&self, device: vk::Device) {
        assert_eq!(device, self.handle);
        self.state.record("vkDestroyDevice");
    }

    unsafe fn device_wait_idle(&self, _device: vk::Device) -> VkResult<()> {
        self.state.record("vkDeviceWaitIdle");
        Ok(())
    }

    unsafe fn allocate_memory(
        &self,
        device: vk::Device,
        allocate_info: &vk::MemoryAllocateInfo,
    ) -> VkResult<vk::DeviceMemory> {
        assert_eq!(device, self.handle);
        assert_ne!(allocate_info.memory_type_index, u32::MAX);
        self.state.create("vkAllocateMemory")
    }

    unsafe fn free_memory(&self, device: vk::Device, _memory: vk::DeviceMemory) {
        assert_eq!(device, self.handle);
        self.state.record("vkFreeMemory");
    }

    unsafe fn map_memory(
        &self,
        _device: vk::Device,
        _memory: vk::DeviceMemory,
        offset: vk::DeviceSize,
        _size: vk::DeviceSize,
    ) -> VkResult<*mut c_void> {
        self.state.record("vkMapMemory");
        let mut memory = self.state.memory.lock().unwrap();
        Ok(memory.as_mut_ptr().wrapping_add(offset as usize).cast())
    }

    unsafe fn unmap_memory(&self, _device: vk::Device, _memory: vk::DeviceMemory) {
        self.state.record("vkUnmapMemory");
    }

    unsafe fn flush_mapped_memory_ranges(
        &self,
        _device: vk::Device,
        ranges: &[vk::MappedMemoryRange],
    ) -> VkResult<()> {
        assert_eq!(ranges.len(), 1);
        self.state.record("vkFlushMappedMemoryRanges");
        Ok(())
    }

    unsafe fn invalidate_mapped_memory_ranges(
        &self,
        _device: vk::Device,
        ranges: &[vk::MappedMemoryRange],
    ) -> VkResult<()> {
        assert_eq!(ranges.len(), 1);
        self.state.record("vkInvalidateMappedMemoryRanges");
        Ok(())
    }

    unsafe fn create_framebuffer(
        &self,
        _device: vk::Device,
        _create_info: &vk::FramebufferCreateInfo,
    ) -> VkResult<vk::Framebuffer> {
        self.state.create("vkCreateFramebuffer")
    }

    unsafe fn destroy_framebuffer(&self, _device: vk::Device, _framebuffer: vk::Framebuffer) {
        self.state.record("vkDestroyFramebuffer");
    }

    unsafe fn create_pipeline_cache(
        &self,
        _device: vk::Device,
        create_info: &vk::PipelineCacheCreateInfo,
    ) -> VkResult<vk::PipelineCache> {
        let cache = self.state.create("vkCreatePipelineCache")?;
        if create_info.initial_data_size > 0 {
            let initial = std::slice::from_raw_parts(
                create_info.p_initial_data.cast::<u8>(),
                create_info.initial_data_size,
            );
            *self.state.pipeline_cache_data.lock().unwrap() = initial.to_vec();
        }
        Ok(cache)
    }

    unsafe fn destroy_pipeline_cache(&self, _device: vk::Device, _cache: vk::PipelineCache) {
        self.state.record("vkDestroyPipelineCache");
    }

    unsafe fn get_pipeline_cache_data(
        &self,
        _device: vk::Device,
        _cache: vk::PipelineCache,
    ) -> VkResult<Vec<u8>> {
        self.state.record("vkGetPipelineCacheData");
        Ok(self.state.pipeline_cache_data.lock().unwrap().clone())
    }

    unsafe fn create_query_pool(
        &self,
        _device: vk::Device,
        _create_info: &vk::QueryPoolCreateInfo,
    ) -> VkResult<vk::QueryPool> {
        self.state.create("vkCreateQueryPool")
    }

    unsafe fn destroy_query_pool(&self, _device: vk::Device, _pool: vk::QueryPool) {
        self.state.record("vkDestroyQueryPool");
    }

    unsafe fn get_query_pool_results(
        &self,
        _device: vk::Device,
        _pool: vk::QueryPool,
        first_query: u32,
        query_count: u32,
        data: &mut [u8],
        stride: vk::DeviceSize,
        _flags: vk::QueryResultFlags,
    ) -> VkResult<()> {
        self.state.record("vkGetQueryPoolResults");
        if !self.state.queries_ready.load(Ordering::SeqCst) {
            return Err(vk::Result::NOT_READY);
        }

        for query in 0..query_count {
            let offset = (query as u64 * stride) as usize;
            let value = (first_query + query) as u64;
            data[offset..offset + 8].copy_from_slice(&value.to_ne_bytes());
        }
        Ok(())
    }

    unsafe fn create_event(
        &self,
        _device: vk::Device,
        _create_info: &vk::EventCreateInfo,
    ) -> VkResult<vk::Event> {
        self.state.create("vkCreateEvent")
    }

    unsafe fn destroy_event(&self, _device: vk::Device, _event: vk::Event) {
        self.state.record("vkDestroyEvent");
    }

    unsafe fn get_event_status(&self, _device: vk::Device, _event: vk::Event) -> VkResult<bool> {
        self.state.record("vkGetEventStatus");
        Ok(self.state.event_set.load(Ordering::SeqCst))
    }

    unsafe fn set_event(&self, _device: vk::Device, _event: vk::Event) -> VkResult<()> {
        self.state.record("vkSetEvent");
        self.state.event_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn reset_event(&self, _device: vk::Device, _event: vk::Event) -> VkResult<()> {
        self.state.record("vkResetEvent");
        self.state.event_set.store(false, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn create_fence(
        &self,
        _device: vk::Device,
        create_info: &vk::FenceCreateInfo,
    ) -> VkResult<vk::Fence> {
        let fence = self.state.create("vkCreateFence")?;
        self.state.fence_signaled.store(
            create_info.flags.contains(vk::FenceCreateFlags::SIGNALED),
            Ordering::SeqCst,
        );
        Ok(fence)
    }

    unsafe fn destroy_fence(&self, _device: vk::Device, _fence: vk::Fence) {
        self.state.record("vkDestroyFence");
    }

    unsafe fn wait_for_fences(
        &self,
        _device: vk::Device,
        fences: &[vk::Fence],
        _wait_all: bool,
        _timeout: u64,
    ) -> VkResult<()> {
        assert_eq!(fences.len(), 1);
        self.state.record("vkWaitForFences");
        if self.state.fence_signaled.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(vk::Result::TIMEOUT)
        }
    }

    unsafe fn reset_fences(&self, _device: vk::Device, fences: &[vk::Fence]) -> VkResult<()> {
        assert_eq!(fences.len(), 1);
        self.state.record("vkResetFences");
        self.state.fence_signaled.store(false, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn get_fence_status(&self, _device: vk::Device, _fence: vk::Fence) -> VkResult<bool> {
        self.state.record("vkGetFenceStatus");
        Ok(self.state.fence_signaled.load(Ordering::SeqCst))
    }

    unsafe fn create_semaphore(
        &self,
        _device: vk::Device,
        _create_info: &vk::SemaphoreCreateInfo,
    ) -> VkResult<vk::Semaphore> {
        self.state.create("vkCreateSemaphore")
    }

    unsafe fn destroy_semaphore(&self, _device: vk::Device, _semaphore: vk::Semaphore) {
        self.state.record("vkDestroySemaphore");
    }

    unsafe fn set_object_name(
        &self,
        _device: vk::Device,
        object_type: vk::ObjectType,
        object_handle: u64,
        name: &CStr,
    ) -> VkResult<()> {
        self.state.record("vkSetDebugUtilsObjectNameEXT");
        self.state.object_names.lock().unwrap().push((
            object_type,
            object_handle,
            name.to_string_lossy().into_owned(),
        ));
        Ok(())
    }

    unsafe fn set_object_tag(
        &self,
        _device: vk::Device,
        object_type: vk::ObjectType,
        object_handle: u64,
        tag_name: u64,
        tag: &[u8],
    ) -> VkResult<()> {
        self.state.record("vkSetDebugUtilsObjectTagEXT");
        self.state
            .object_tags
            .lock()
            .unwrap()
            .push((object_type, object_handle, tag_name, tag.to_vec()));
        Ok(())
    }
}

/// An instance and device backed by the mock dispatch tables, reporting to a
/// [`RecordingSink`].
pub(crate) struct Fixture {
    pub(crate) state: Arc<MockState>,
    pub(crate) sink: Arc<RecordingSink>,
    pub(crate) instance: Instance,
    pub(crate) device: Device,
}

impl Fixture {
    pub(crate) fn new() -> Fixture {
        Fixture::with_policy(DestructionPolicy::Warn)
    }

    pub(crate) fn with_policy(policy: DestructionPolicy) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();

        let (dispatch, state) = MockInstance::new();
        let sink = RecordingSink::new();
        let validator = Validator::new(policy, sink.clone());
        let instance = Instance::from_dispatch(dispatch, validator);
        let physical_device = instance.physical_devices().unwrap().remove(0);
        let device = physical_device
            .create_device(&vk::DeviceCreateInfo::default())
            .unwrap();

        Fixture {
            state,
            sink,
            instance,
            device,
        }
    }
}
