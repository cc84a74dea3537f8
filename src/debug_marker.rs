//! Object names and tags for debugging tools.
use crate::{device::DeviceWeak, handle::DeviceObjectHandle};
use ash::vk::{self, Handle};
use cstr::cstr;
use std::{
    ffi::{CString, NulError},
    sync::{Mutex, PoisonError},
};
use thiserror::Error;

/// Errors that can occur while naming or tagging an object.
#[derive(Debug, Error)]
pub enum DebugMarkerError {
    /// The name contains a nul byte.
    #[error("object name contains a nul byte")]
    InvalidName(#[from] NulError),
    /// Vulkan Error.
    #[error("vulkan error")]
    Vulkan(#[from] vk::Result),
}

/// Object type and debug name of an object.
///
/// The name is always kept locally, so it is available to diagnostics even
/// when `VK_EXT_debug_utils` is not enabled.
#[derive(Debug)]
pub struct DebugMarker {
    object_type: vk::ObjectType,
    type_name: &'static str,
    name: Mutex<String>,
}

impl DebugMarker {
    /// Create an unnamed marker.
    pub fn new(object_type: vk::ObjectType, type_name: &'static str) -> DebugMarker {
        DebugMarker {
            object_type,
            type_name,
            name: Mutex::new(String::new()),
        }
    }

    /// The Vulkan object type.
    #[inline]
    pub fn object_type(&self) -> vk::ObjectType {
        self.object_type
    }

    /// The type name used in diagnostics, e.g. `"DeviceMemory"`.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The debug name, empty if none was set.
    pub fn name(&self) -> String {
        self.name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the locally stored name.
    pub fn set_name(&self, name: &str) {
        let mut stored = self.name.lock().unwrap_or_else(PoisonError::into_inner);
        stored.clear();
        stored.push_str(name);
    }
}

/// An object created from a [`Device`](crate::Device).
pub trait DeviceChild {
    /// The native handle type.
    type Handle: Handle + Copy;

    /// The handle paired with the owning device.
    fn object_handle(&self) -> &DeviceObjectHandle<Self::Handle>;

    /// The object type and debug name.
    fn debug_marker(&self) -> &DebugMarker;

    /// The native handle.
    #[inline]
    fn handle(&self) -> Self::Handle {
        self.object_handle().handle()
    }

    /// Weak reference to the device that created this object.
    #[inline]
    fn device(&self) -> &DeviceWeak {
        self.object_handle().owner()
    }

    /// The debug name, empty if none was set.
    fn object_name(&self) -> String {
        self.debug_marker().name()
    }

    /// Name this object. The name is forwarded to `VK_EXT_debug_utils` if the
    /// device is still valid and the extension is available.
    fn set_object_name(&self, name: &str) -> Result<(), DebugMarkerError> {
        let object_name = CString::new(name)?;
        self.debug_marker().set_name(name);

        if let Some(device) = self.device().upgrade() {
            unsafe {
                device.dispatch().set_object_name(
                    device.handle(),
                    self.debug_marker().object_type(),
                    self.handle().as_raw(),
                    &object_name,
                )?;
            }
        }

        Ok(())
    }

    /// Remove the name of this object.
    fn reset_object_name(&self) -> Result<(), DebugMarkerError> {
        self.debug_marker().set_name("");

        if let Some(device) = self.device().upgrade() {
            unsafe {
                device.dispatch().set_object_name(
                    device.handle(),
                    self.debug_marker().object_type(),
                    self.handle().as_raw(),
                    cstr!(""),
                )?;
            }
        }

        Ok(())
    }

    /// Attach a binary tag to this object. Tags are not stored locally.
    fn set_object_tag(&self, tag_name: u64, tag: &[u8]) -> Result<(), DebugMarkerError> {
        if let Some(device) = self.device().upgrade() {
            unsafe {
                device.dispatch().set_object_tag(
                    device.handle(),
                    self.debug_marker().object_type(),
                    self.handle().as_raw(),
                    tag_name,
                    tag,
                )?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_round_trips_locally() {
        let marker = DebugMarker::new(vk::ObjectType::EVENT, "Event");
        assert_eq!(marker.name(), "");
        marker.set_name("upload done");
        assert_eq!(marker.name(), "upload done");
        marker.set_name("");
        assert_eq!(marker.name(), "");
        assert_eq!(marker.object_type(), vk::ObjectType::EVENT);
        assert_eq!(marker.type_name(), "Event");
    }

    #[test]
    fn tags_are_forwarded_only_while_the_device_lives() {
        let fixture = crate::mock::Fixture::new();
        let fence = fixture
            .device
            .create_fence(vk::FenceCreateFlags::empty())
            .unwrap();
        fence.set_object_tag(0xfeed, &[1, 2, 3]).unwrap();

        let tags = fixture.state.object_tags.lock().unwrap().clone();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].0, vk::ObjectType::FENCE);
        assert_eq!(tags[0].1, fence.handle().as_raw());
        assert_eq!(tags[0].2, 0xfeed);
        assert_eq!(tags[0].3, vec![1, 2, 3]);

        let crate::mock::Fixture { state, device, .. } = fixture;
        drop(device);
        fence.set_object_tag(0xfeed, &[4]).unwrap();
        assert_eq!(state.count("vkSetDebugUtilsObjectTagEXT"), 1);
        assert_eq!(state.object_tags.lock().unwrap().len(), 1);
    }
}
