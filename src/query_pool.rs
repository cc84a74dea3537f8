//! Query pools.
use crate::{
    debug_marker::{DebugMarker, DeviceChild},
    device::{create_child, live_device, DeviceObject, DeviceWeak},
    handle::{CreationError, DeviceObjectHandle},
    refcount::{EmbeddedResource, Ref},
};
use ash::prelude::VkResult;
use ash::vk;
use std::fmt;

/// Parameters of a query pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryPoolCreateInfo {
    /// Kind of queries in the pool.
    pub query_type: vk::QueryType,
    /// Number of queries.
    pub query_count: u32,
    /// Counters returned by pipeline statistics queries.
    pub pipeline_statistics: vk::QueryPipelineStatisticFlags,
}

impl QueryPoolCreateInfo {
    /// A pool of `query_count` queries of `query_type`.
    pub fn new(query_type: vk::QueryType, query_count: u32) -> QueryPoolCreateInfo {
        QueryPoolCreateInfo {
            query_type,
            query_count,
            pipeline_statistics: vk::QueryPipelineStatisticFlags::empty(),
        }
    }
}

/// A query pool.
pub struct QueryPoolObject {
    handle: DeviceObjectHandle<vk::QueryPool>,
    marker: DebugMarker,
    create_info: QueryPoolCreateInfo,
}

/// Shared handle to a [`QueryPoolObject`].
pub type QueryPool = Ref<QueryPoolObject>;

impl QueryPoolObject {
    /// Create a query pool on `device`.
    pub fn create(
        device: &DeviceWeak,
        create_info: &QueryPoolCreateInfo,
    ) -> Result<QueryPool, CreationError> {
        create_child(
            device,
            "QueryPool",
            |device| {
                if create_info.query_count == 0 {
                    return Err(CreationError::Validation(
                        "query pool must contain at least one query".into(),
                    ));
                }

                let pool_info = vk::QueryPoolCreateInfo::builder()
                    .query_type(create_info.query_type)
                    .query_count(create_info.query_count)
                    .pipeline_statistics(create_info.pipeline_statistics);
                Ok(unsafe {
                    device
                        .dispatch()
                        .create_query_pool(device.handle(), &pool_info)
                }?)
            },
            |handle, _| QueryPoolObject {
                handle,
                marker: DebugMarker::new(vk::ObjectType::QUERY_POOL, "QueryPool"),
                create_info: *create_info,
            },
        )
    }

    /// Kind of queries in the pool.
    #[inline]
    pub fn query_type(&self) -> vk::QueryType {
        self.create_info.query_type
    }

    /// Number of queries.
    #[inline]
    pub fn query_count(&self) -> u32 {
        self.create_info.query_count
    }

    /// Counters returned by pipeline statistics queries.
    #[inline]
    pub fn pipeline_statistics(&self) -> vk::QueryPipelineStatisticFlags {
        self.create_info.pipeline_statistics
    }

    /// Copy the results of `query_count` queries starting at `first_query`
    /// into `data`, `stride` bytes apart.
    ///
    /// Returns `Ok(false)` if the results are not available yet, which only
    /// happens without `vk::QueryResultFlags::WAIT`. Fails with
    /// `ERROR_VALIDATION_FAILED_EXT`, without calling the driver, if `data`
    /// is too short for `query_count` results `stride` bytes apart.
    pub fn results(
        &self,
        first_query: u32,
        query_count: u32,
        data: &mut [u8],
        stride: vk::DeviceSize,
        flags: vk::QueryResultFlags,
    ) -> VkResult<bool> {
        let in_range = first_query
            .checked_add(query_count)
            .map_or(false, |end| end <= self.query_count());
        crate::assertion!(
            in_range,
            "QueryPool: queries {}..{} out of range",
            first_query,
            first_query as u64 + query_count as u64
        );
        if !in_range {
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }

        let device = live_device(self.device())?;
        let required = required_result_size(query_count, stride, flags);
        if required.map_or(true, |required| (data.len() as u64) < required) {
            device.validator().log(
                log::Level::Error,
                format_args!(
                    "QueryPool: {} bytes cannot hold {} results with stride {}",
                    data.len(),
                    query_count,
                    stride
                ),
            );
            return Err(vk::Result::ERROR_VALIDATION_FAILED_EXT);
        }

        let result = unsafe {
            device.dispatch().get_query_pool_results(
                device.handle(),
                self.handle(),
                first_query,
                query_count,
                data,
                stride,
                flags,
            )
        };

        match result {
            Ok(()) => Ok(true),
            Err(vk::Result::NOT_READY) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Bytes needed to hold `query_count` results written `stride` bytes apart.
fn required_result_size(
    query_count: u32,
    stride: vk::DeviceSize,
    flags: vk::QueryResultFlags,
) -> Option<u64> {
    if query_count == 0 {
        return Some(0);
    }

    let word = if flags.contains(vk::QueryResultFlags::TYPE_64) { 8 } else { 4 };
    let result = if flags.contains(vk::QueryResultFlags::WITH_AVAILABILITY) {
        word * 2
    } else {
        word
    };
    u64::from(query_count - 1)
        .checked_mul(stride)?
        .checked_add(result)
}

impl DeviceChild for QueryPoolObject {
    type Handle = vk::QueryPool;

    #[inline]
    fn object_handle(&self) -> &DeviceObjectHandle<vk::QueryPool> {
        &self.handle
    }

    #[inline]
    fn debug_marker(&self) -> &DebugMarker {
        &self.marker
    }
}

impl EmbeddedResource for QueryPoolObject {
    fn destroy_object(&mut self) {
        self.handle
            .release(&self.marker, |device: &DeviceObject, pool| unsafe {
                device.dispatch().destroy_query_pool(device.handle(), pool)
            });
    }
}

impl fmt::Debug for QueryPoolObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPool")
            .field("handle", &self.handle)
            .field("create_info", &self.create_info)
            .finish()
    }
}
