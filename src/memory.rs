//! Device memory allocations and host mapping.
use crate::{
    debug_marker::{DebugMarker, DeviceChild},
    device::{create_child, DeviceObject, DeviceWeak},
    handle::{CreationError, DeviceObjectHandle},
    refcount::{EmbeddedResource, Ref},
};
use ash::vk;
use std::{
    ffi::c_void,
    fmt,
    ptr,
    sync::{Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;

/// Parameters of a memory allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAllocationInfo {
    /// Size of the allocation in bytes.
    pub allocation_size: vk::DeviceSize,
    /// Index of the memory type to allocate from. The default, `u32::MAX`,
    /// selects nothing and is rejected.
    pub memory_type_index: u32,
    /// Handle types the allocation can be exported to. Empty for none.
    pub export_handle_types: vk::ExternalMemoryHandleTypeFlags,
}

impl MemoryAllocationInfo {
    /// Allocate `allocation_size` bytes from `memory_type_index`.
    pub fn new(allocation_size: vk::DeviceSize, memory_type_index: u32) -> MemoryAllocationInfo {
        MemoryAllocationInfo {
            allocation_size,
            memory_type_index,
            export_handle_types: vk::ExternalMemoryHandleTypeFlags::empty(),
        }
    }
}

impl Default for MemoryAllocationInfo {
    fn default() -> Self {
        MemoryAllocationInfo::new(0, u32::MAX)
    }
}

/// Errors that can occur while mapping, unmapping, flushing or invalidating
/// device memory.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MemoryMapError {
    /// The memory type is neither host visible nor host coherent.
    #[error("memory was allocated without HOST_VISIBLE or HOST_COHERENT")]
    NotMappable,
    /// The memory is already mapped.
    #[error("memory is already mapped")]
    AlreadyMapped,
    /// The memory is not mapped.
    #[error("memory is not mapped")]
    NotMapped,
    /// The requested range exceeds the allocation.
    #[error("range {offset:#x}+{size:#x} exceeds the allocation size {allocation_size:#x}")]
    OutOfRange {
        /// Requested offset.
        offset: vk::DeviceSize,
        /// Requested size.
        size: vk::DeviceSize,
        /// Size of the allocation.
        allocation_size: vk::DeviceSize,
    },
    /// The device the memory was allocated from is gone.
    #[error("the owning device has already been destroyed")]
    DeviceDestroyed,
    /// Vulkan Error.
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

struct Mapping {
    data: *mut c_void,
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
}

// The pointer is only handed out, never dereferenced here.
unsafe impl Send for Mapping {}

/// A block of device memory.
pub struct DeviceMemoryObject {
    handle: DeviceObjectHandle<vk::DeviceMemory>,
    marker: DebugMarker,
    allocation_info: MemoryAllocationInfo,
    flags: vk::MemoryPropertyFlags,
    mapping: Mutex<Mapping>,
}

/// Shared handle to a [`DeviceMemoryObject`].
pub type DeviceMemory = Ref<DeviceMemoryObject>;

impl DeviceMemoryObject {
    /// Allocate memory from `device`.
    ///
    /// The memory type index is checked against the device's memory types
    /// before anything is allocated.
    pub fn create(
        device: &DeviceWeak,
        allocation_info: &MemoryAllocationInfo,
    ) -> Result<DeviceMemory, CreationError> {
        create_child(
            device,
            "DeviceMemory",
            |device| {
                let memory_types = device.memory_properties();
                let index = allocation_info.memory_type_index;
                if index == u32::MAX
                    || index >= memory_types.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32)
                {
                    return Err(CreationError::InvalidMemoryTypeIndex(index));
                }

                let mut export_info = vk::ExportMemoryAllocateInfo::builder()
                    .handle_types(allocation_info.export_handle_types);
                let mut allocate_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(allocation_info.allocation_size)
                    .memory_type_index(index);
                if !allocation_info.export_handle_types.is_empty() {
                    allocate_info = allocate_info.push_next(&mut export_info);
                }

                Ok(unsafe {
                    device
                        .dispatch()
                        .allocate_memory(device.handle(), &allocate_info)
                }?)
            },
            |handle, device| DeviceMemoryObject {
                handle,
                marker: DebugMarker::new(vk::ObjectType::DEVICE_MEMORY, "DeviceMemory"),
                allocation_info: *allocation_info,
                flags: device.memory_properties().memory_types
                    [allocation_info.memory_type_index as usize]
                    .property_flags,
                mapping: Mutex::new(Mapping {
                    data: ptr::null_mut(),
                    offset: 0,
                    size: 0,
                }),
            },
        )
    }

    fn mapping(&self) -> MutexGuard<'_, Mapping> {
        self.mapping.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true if the memory can be mapped by the host.
    #[inline]
    pub fn is_mappable(&self) -> bool {
        self.flags.intersects(
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// The property flags of the memory type.
    #[inline]
    pub fn memory_flags(&self) -> vk::MemoryPropertyFlags {
        self.flags
    }

    /// Returns true if the memory type has all of `flags`.
    #[inline]
    pub fn has_property_flag(&self, flags: vk::MemoryPropertyFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Size of the allocation in bytes.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.allocation_info.allocation_size
    }

    /// Index of the memory type.
    #[inline]
    pub fn memory_type(&self) -> u32 {
        self.allocation_info.memory_type_index
    }

    /// Parameters the memory was allocated with.
    #[inline]
    pub fn allocation_info(&self) -> &MemoryAllocationInfo {
        &self.allocation_info
    }

    /// Returns true if the memory is currently mapped.
    pub fn is_mapped(&self) -> bool {
        self.mapping().size > 0
    }

    /// Offset of the current mapping, 0 if unmapped.
    pub fn mapped_offset(&self) -> vk::DeviceSize {
        self.mapping().offset
    }

    /// Size of the current mapping, 0 if unmapped.
    pub fn mapped_size(&self) -> vk::DeviceSize {
        self.mapping().size
    }

    /// Pointer to the current mapping, null if unmapped.
    pub fn mapped_data(&self) -> *mut c_void {
        self.mapping().data
    }

    /// Map `size` bytes starting at `offset` into host memory. Pass
    /// `vk::WHOLE_SIZE` to map until the end of the allocation.
    pub fn map(
        &self,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<*mut c_void, MemoryMapError> {
        if !self.is_mappable() {
            return Err(MemoryMapError::NotMappable);
        }

        let mut mapping = self.mapping();
        if mapping.size > 0 {
            return Err(MemoryMapError::AlreadyMapped);
        }

        let allocation_size = self.size();
        let out_of_range = if size == vk::WHOLE_SIZE {
            offset >= allocation_size
        } else {
            size == 0 || offset.checked_add(size).map_or(true, |end| end > allocation_size)
        };
        if out_of_range {
            return Err(MemoryMapError::OutOfRange {
                offset,
                size,
                allocation_size,
            });
        }

        let device = self
            .device()
            .upgrade()
            .ok_or(MemoryMapError::DeviceDestroyed)?;
        let data = unsafe {
            device
                .dispatch()
                .map_memory(device.handle(), self.handle(), offset, size)
        }?;
        if data.is_null() {
            return Err(MemoryMapError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED));
        }

        *mapping = Mapping {
            data,
            offset,
            size: if size == vk::WHOLE_SIZE {
                allocation_size - offset
            } else {
                size
            },
        };
        Ok(data)
    }

    /// Unmap the memory.
    pub fn unmap(&self) -> Result<(), MemoryMapError> {
        let mut mapping = self.mapping();
        if mapping.size == 0 {
            return Err(MemoryMapError::NotMapped);
        }

        *mapping = Mapping {
            data: ptr::null_mut(),
            offset: 0,
            size: 0,
        };

        let device = self
            .device()
            .upgrade()
            .ok_or(MemoryMapError::DeviceDestroyed)?;
        unsafe { device.dispatch().unmap_memory(device.handle(), self.handle()) };
        Ok(())
    }

    /// Make host writes to a range of mapped memory visible to the device.
    /// Unnecessary for `HOST_COHERENT` memory, which is warned about.
    pub fn flush_range(
        &self,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<(), MemoryMapError> {
        self.warn_if_coherent("Flushing");
        let device = self
            .device()
            .upgrade()
            .ok_or(MemoryMapError::DeviceDestroyed)?;
        let range = self.range(offset, size);
        unsafe {
            device
                .dispatch()
                .flush_mapped_memory_ranges(device.handle(), &[range])
        }?;
        Ok(())
    }

    /// Make device writes to a range of mapped memory visible to the host.
    /// Unnecessary for `HOST_COHERENT` memory, which is warned about.
    pub fn invalidate_range(
        &self,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<(), MemoryMapError> {
        self.warn_if_coherent("Invalidating");
        let device = self
            .device()
            .upgrade()
            .ok_or(MemoryMapError::DeviceDestroyed)?;
        let range = self.range(offset, size);
        unsafe {
            device
                .dispatch()
                .invalidate_mapped_memory_ranges(device.handle(), &[range])
        }?;
        Ok(())
    }

    fn range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> vk::MappedMemoryRange {
        vk::MappedMemoryRange::builder()
            .memory(self.handle())
            .offset(offset)
            .size(size)
            .build()
    }

    fn warn_if_coherent(&self, action: &str) {
        if self.has_property_flag(vk::MemoryPropertyFlags::HOST_COHERENT) {
            self.handle.validator().log(
                log::Level::Warn,
                format_args!(
                    "{} range of memory block {:?} created using HOST_COHERENT memory flags, this is unnecessary",
                    action,
                    self.handle()
                ),
            );
        }
    }
}

impl DeviceChild for DeviceMemoryObject {
    type Handle = vk::DeviceMemory;

    #[inline]
    fn object_handle(&self) -> &DeviceObjectHandle<vk::DeviceMemory> {
        &self.handle
    }

    #[inline]
    fn debug_marker(&self) -> &DebugMarker {
        &self.marker
    }
}

impl EmbeddedResource for DeviceMemoryObject {
    fn destroy_object(&mut self) {
        self.handle
            .release(&self.marker, |device: &DeviceObject, memory| unsafe {
                device.dispatch().free_memory(device.handle(), memory)
            });
    }
}

impl fmt::Debug for DeviceMemoryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory")
            .field("handle", &self.handle)
            .field("size", &self.size())
            .field("memory_type", &self.memory_type())
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Fixture, MOCK_MEMORY_SIZE};

    const DEVICE_LOCAL: u32 = 0;
    const HOST_COHERENT: u32 = 1;
    const HOST_CACHED: u32 = 2;

    #[test]
    fn sentinel_type_index_is_rejected_without_native_call() {
        let fixture = Fixture::new();
        let err = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo {
                allocation_size: 256,
                ..Default::default()
            })
            .unwrap_err();

        assert_eq!(err, CreationError::InvalidMemoryTypeIndex(u32::MAX));
        assert_eq!(fixture.state.count("vkAllocateMemory"), 0);
        assert_eq!(fixture.sink.count(log::Level::Error), 1);
    }

    #[test]
    fn out_of_range_type_index_is_rejected() {
        let fixture = Fixture::new();
        let err = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo::new(256, 7))
            .unwrap_err();
        assert_eq!(err, CreationError::InvalidMemoryTypeIndex(7));
        assert_eq!(fixture.state.count("vkAllocateMemory"), 0);
    }

    #[test]
    fn allocation_is_freed_once() {
        let fixture = Fixture::new();
        let memory = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo::new(1024, DEVICE_LOCAL))
            .unwrap();
        assert!(memory.device().is_valid());
        assert!(!memory.is_mappable());
        assert_eq!(memory.size(), 1024);
        assert_eq!(memory.memory_type(), DEVICE_LOCAL);

        let clones: Vec<_> = (0..3).map(|_| memory.clone()).collect();
        drop(memory);
        assert_eq!(fixture.state.count("vkFreeMemory"), 0);
        drop(clones);
        assert_eq!(fixture.state.count("vkFreeMemory"), 1);
    }

    #[test]
    fn map_unmap_cycle() {
        let fixture = Fixture::new();
        let memory = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo::new(
                MOCK_MEMORY_SIZE as u64,
                HOST_COHERENT,
            ))
            .unwrap();

        let data = memory.map(64, vk::WHOLE_SIZE).unwrap();
        assert!(!data.is_null());
        assert!(memory.is_mapped());
        assert_eq!(memory.mapped_offset(), 64);
        assert_eq!(memory.mapped_size(), MOCK_MEMORY_SIZE as u64 - 64);
        assert_eq!(memory.mapped_data(), data);
        assert_eq!(memory.map(0, 16), Err(MemoryMapError::AlreadyMapped));

        memory.unmap().unwrap();
        assert!(!memory.is_mapped());
        assert_eq!(memory.unmap(), Err(MemoryMapError::NotMapped));
        assert_eq!(fixture.state.count("vkMapMemory"), 1);
        assert_eq!(fixture.state.count("vkUnmapMemory"), 1);
    }

    #[test]
    fn map_checks_before_calling_the_driver() {
        let fixture = Fixture::new();
        let local = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo::new(256, DEVICE_LOCAL))
            .unwrap();
        assert_eq!(local.map(0, vk::WHOLE_SIZE), Err(MemoryMapError::NotMappable));

        let cached = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo::new(256, HOST_CACHED))
            .unwrap();
        assert!(matches!(
            cached.map(200, 100),
            Err(MemoryMapError::OutOfRange { .. })
        ));
        assert_eq!(fixture.state.count("vkMapMemory"), 0);
    }

    #[test]
    fn flushing_coherent_memory_warns() {
        let fixture = Fixture::new();
        let coherent = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo::new(256, HOST_COHERENT))
            .unwrap();
        coherent.flush_range(0, vk::WHOLE_SIZE).unwrap();
        coherent.invalidate_range(0, vk::WHOLE_SIZE).unwrap();
        assert_eq!(fixture.sink.count(log::Level::Warn), 2);

        let cached = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo::new(256, HOST_CACHED))
            .unwrap();
        cached.flush_range(0, 128).unwrap();
        assert_eq!(fixture.sink.count(log::Level::Warn), 2);
        assert_eq!(fixture.state.count("vkFlushMappedMemoryRanges"), 2);
        assert_eq!(fixture.state.count("vkInvalidateMappedMemoryRanges"), 1);
    }

    #[test]
    fn memory_outliving_device_is_reported_not_freed() {
        let fixture = Fixture::new();
        let memory = fixture
            .device
            .allocate_memory(&MemoryAllocationInfo::new(64, HOST_CACHED))
            .unwrap();
        memory.set_object_name("staging").unwrap();
        let Fixture {
            state,
            sink,
            device,
            ..
        } = fixture;

        drop(device);
        assert_eq!(memory.map(0, 16), Err(MemoryMapError::DeviceDestroyed));
        drop(memory);

        assert_eq!(state.count("vkFreeMemory"), 0);
        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("[DeviceMemory]"));
        assert!(messages[0].1.contains("staging"));
    }
}
