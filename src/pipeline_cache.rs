//! Pipeline caches.
use crate::{
    debug_marker::{DebugMarker, DeviceChild},
    device::{create_child, live_device, DeviceObject, DeviceWeak},
    handle::{CreationError, DeviceObjectHandle},
    refcount::{EmbeddedResource, Ref},
};
use ash::prelude::VkResult;
use ash::vk;
use std::fmt;

/// Parameters of a pipeline cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineCacheCreateInfo {
    /// Creation flags.
    pub flags: vk::PipelineCacheCreateFlags,
    /// Data previously retrieved from a compatible cache. May be empty.
    pub initial_data: Vec<u8>,
}

impl PipelineCacheCreateInfo {
    /// Seed the cache with `initial_data`.
    pub fn with_initial_data(initial_data: Vec<u8>) -> PipelineCacheCreateInfo {
        PipelineCacheCreateInfo {
            initial_data,
            ..Default::default()
        }
    }
}

/// A pipeline cache.
pub struct PipelineCacheObject {
    handle: DeviceObjectHandle<vk::PipelineCache>,
    marker: DebugMarker,
    flags: vk::PipelineCacheCreateFlags,
}

/// Shared handle to a [`PipelineCacheObject`].
pub type PipelineCache = Ref<PipelineCacheObject>;

impl PipelineCacheObject {
    /// Create a pipeline cache on `device`.
    pub fn create(
        device: &DeviceWeak,
        create_info: &PipelineCacheCreateInfo,
    ) -> Result<PipelineCache, CreationError> {
        create_child(
            device,
            "PipelineCache",
            |device| {
                let cache_info = vk::PipelineCacheCreateInfo::builder()
                    .flags(create_info.flags)
                    .initial_data(&create_info.initial_data);
                Ok(unsafe {
                    device
                        .dispatch()
                        .create_pipeline_cache(device.handle(), &cache_info)
                }?)
            },
            |handle, _| PipelineCacheObject {
                handle,
                marker: DebugMarker::new(vk::ObjectType::PIPELINE_CACHE, "PipelineCache"),
                flags: create_info.flags,
            },
        )
    }

    /// Creation flags.
    #[inline]
    pub fn flags(&self) -> vk::PipelineCacheCreateFlags {
        self.flags
    }

    /// The current contents of the cache, suitable for seeding a new cache
    /// through [`PipelineCacheCreateInfo::initial_data`].
    pub fn data(&self) -> VkResult<Vec<u8>> {
        let device = live_device(self.device())?;
        unsafe {
            device
                .dispatch()
                .get_pipeline_cache_data(device.handle(), self.handle())
        }
    }

    /// Size in bytes of the data [`data`](Self::data) would currently return.
    pub fn max_data_size(&self) -> VkResult<usize> {
        Ok(self.data()?.len())
    }
}

impl DeviceChild for PipelineCacheObject {
    type Handle = vk::PipelineCache;

    #[inline]
    fn object_handle(&self) -> &DeviceObjectHandle<vk::PipelineCache> {
        &self.handle
    }

    #[inline]
    fn debug_marker(&self) -> &DebugMarker {
        &self.marker
    }
}

impl EmbeddedResource for PipelineCacheObject {
    fn destroy_object(&mut self) {
        self.handle
            .release(&self.marker, |device: &DeviceObject, cache| unsafe {
                device
                    .dispatch()
                    .destroy_pipeline_cache(device.handle(), cache)
            });
    }
}

impl fmt::Debug for PipelineCacheObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineCache")
            .field("handle", &self.handle)
            .field("flags", &self.flags)
            .finish()
    }
}
