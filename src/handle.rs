//! Native handles tied to the lifetime of their owner.
use crate::{
    debug_marker::DebugMarker,
    refcount::{EmbeddedResource, OwnerState, Ref, WeakRef},
    validation::{OrphanedObject, OwnerKind, Validator},
};
use ash::vk::{self, Handle};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while creating an object.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CreationError {
    /// The native create call failed.
    #[error("vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
    /// The object that would own the new object is already destroyed or is
    /// being torn down.
    #[error("the owning object has already been destroyed")]
    OwnerDestroyed,
    /// No memory type was selected for an allocation.
    #[error("invalid memory type index {0}")]
    InvalidMemoryTypeIndex(u32),
    /// The create info was rejected before reaching the driver.
    #[error("invalid create info: {0}")]
    Validation(String),
}

/// An object other objects can be created from.
pub trait Owner: EmbeddedResource {
    /// What kind of owner this is, for diagnostics.
    const KIND: OwnerKind;
}

/// Obtain a strong handle to the owner a new object is created from.
pub(crate) fn upgrade_owner<O: Owner>(owner: &WeakRef<O>) -> Result<Ref<O>, CreationError> {
    owner.upgrade().ok_or(CreationError::OwnerDestroyed)
}

/// A native handle without an owner, e.g. a `VkInstance`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct ObjectHandle<H: Handle + Copy> {
    handle: H,
}

impl<H: Handle + Copy> ObjectHandle<H> {
    /// Wrap `handle`.
    #[inline]
    pub fn new(handle: H) -> ObjectHandle<H> {
        ObjectHandle { handle }
    }

    /// A null handle.
    #[inline]
    pub fn null() -> ObjectHandle<H> {
        ObjectHandle {
            handle: H::from_raw(0),
        }
    }

    /// The native handle.
    #[inline]
    pub fn handle(&self) -> H {
        self.handle
    }

    /// Returns true if the handle is null.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.handle.as_raw() == 0
    }

    /// Null the stored handle, returning the previous value if it was set.
    #[inline]
    pub fn take(&mut self) -> Option<H> {
        if self.is_null() {
            return None;
        }

        Some(std::mem::replace(&mut self.handle, H::from_raw(0)))
    }
}

impl<H: Handle + Copy> fmt::Debug for ObjectHandle<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:#x})", H::TYPE, self.handle.as_raw())
    }
}

/// A native handle paired with a weak reference to the object that owns it.
///
/// The handle and the owner are either both set or both unset. The handle is
/// never freed by anything but [`release`](Self::release), which frees it
/// through the owner if the owner is still valid and reports to the
/// [`Validator`] otherwise.
pub struct OwnedHandle<H: Handle + Copy, O: Owner> {
    handle: ObjectHandle<H>,
    owner: WeakRef<O>,
    validator: Validator,
}

/// Handle of an object owned by a [`Device`](crate::Device).
pub type DeviceObjectHandle<H> = OwnedHandle<H, crate::device::DeviceObject>;

/// Handle of an object owned by an [`Instance`](crate::Instance).
pub type InstanceObjectHandle<H> = OwnedHandle<H, crate::instance::InstanceObject>;

impl<H: Handle + Copy, O: Owner> OwnedHandle<H, O> {
    /// Pair `handle` with its `owner`.
    pub fn new(handle: H, owner: WeakRef<O>, validator: Validator) -> OwnedHandle<H, O> {
        let handle = ObjectHandle::new(handle);
        crate::debug_assertion!(
            handle.is_null() != owner.is_valid(),
            "handle and owner must be set together"
        );

        OwnedHandle {
            handle,
            owner,
            validator,
        }
    }

    /// An unset handle.
    pub fn null(validator: Validator) -> OwnedHandle<H, O> {
        OwnedHandle {
            handle: ObjectHandle::null(),
            owner: WeakRef::new(),
            validator,
        }
    }

    /// The native handle.
    #[inline]
    pub fn handle(&self) -> H {
        self.handle.handle()
    }

    /// Returns true if the handle is null, i.e. not allocated yet or already
    /// released.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.handle.is_null()
    }

    /// Weak reference to the owner.
    #[inline]
    pub fn owner(&self) -> &WeakRef<O> {
        &self.owner
    }

    /// The validator inherited from the owner.
    #[inline]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Free the handle through `destroy` if the owner is still valid, or
    /// report the object to the validator if it is not. Either way the handle
    /// is null and the owner reference is reset afterwards, so calling this
    /// again does nothing.
    pub fn release(&mut self, marker: &DebugMarker, destroy: impl FnOnce(&O, H)) {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return,
        };

        match self.owner.upgrade() {
            Some(owner) => destroy(&owner, handle),
            None => self.report(marker, handle),
        }

        self.owner.reset();
    }

    /// Forget the handle of an object that is not freed natively, such as an
    /// enumerated physical device. The validator is only consulted if the
    /// owner is already fully gone; an owner in its destructor is releasing
    /// its own objects.
    pub fn release_adopted(&mut self, marker: &DebugMarker) {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return,
        };

        if self.owner.state() == OwnerState::Invalid {
            self.report(marker, handle);
        }

        self.owner.reset();
    }

    fn report(&self, marker: &DebugMarker, handle: H) {
        let name = marker.name();
        self.validator
            .report_destroyed_after_owner(&OrphanedObject {
                type_name: marker.type_name(),
                object_type: marker.object_type(),
                raw_handle: handle.as_raw(),
                name: (!name.is_empty()).then(|| name.as_str()),
                owner: O::KIND,
            });
    }
}

impl<H: Handle + Copy, O: Owner> fmt::Debug for OwnedHandle<H, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedHandle")
            .field("handle", &self.handle)
            .field("owner", &self.owner.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::RecordingSink;
    use crate::validation::DestructionPolicy;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    struct TestOwner {
        frees: Arc<AtomicUsize>,
    }

    impl EmbeddedResource for TestOwner {
        fn destroy_object(&mut self) {}
    }

    impl Owner for TestOwner {
        const KIND: OwnerKind = OwnerKind::Device;
    }

    fn owner() -> (Ref<TestOwner>, Arc<AtomicUsize>) {
        let frees = Arc::new(AtomicUsize::new(0));
        let owner = Ref::new(TestOwner {
            frees: frees.clone(),
        });
        (owner, frees)
    }

    fn free(owner: &TestOwner, _fence: vk::Fence) {
        owner.frees.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn release_frees_through_live_owner_once() {
        let (owner, frees) = owner();
        let marker = DebugMarker::new(vk::ObjectType::FENCE, "Fence");
        let mut handle: OwnedHandle<vk::Fence, TestOwner> = OwnedHandle::new(
            vk::Fence::from_raw(7),
            Ref::downgrade(&owner),
            Validator::default(),
        );
        assert!(handle.owner().is_valid());

        handle.release(&marker, free);
        handle.release(&marker, free);
        assert!(handle.is_null());
        assert!(!handle.owner().is_valid());
        assert_eq!(frees.load(Ordering::SeqCst), 1);
        assert_eq!(Ref::weak_count(&owner), 0);
    }

    #[test]
    fn release_after_owner_reports_instead_of_freeing() {
        let (owner, frees) = owner();
        let sink = RecordingSink::new();
        let validator = Validator::new(DestructionPolicy::Warn, sink.clone());
        let marker = DebugMarker::new(vk::ObjectType::FENCE, "Fence");
        marker.set_name("frame fence");
        let mut handle: OwnedHandle<vk::Fence, TestOwner> =
            OwnedHandle::new(vk::Fence::from_raw(7), Ref::downgrade(&owner), validator);

        drop(owner);
        handle.release(&marker, free);
        handle.release(&marker, free);

        assert_eq!(frees.load(Ordering::SeqCst), 0);
        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].1.contains("[Fence]"));
        assert!(messages[0].1.contains("frame fence"));
    }

    #[test]
    fn release_adopted_is_silent_while_owner_lives() {
        let (owner, _frees) = owner();
        let sink = RecordingSink::new();
        let validator = Validator::new(DestructionPolicy::Warn, sink.clone());
        let marker = DebugMarker::new(vk::ObjectType::PHYSICAL_DEVICE, "PhysicalDevice");
        let mut handle: OwnedHandle<vk::PhysicalDevice, TestOwner> = OwnedHandle::new(
            vk::PhysicalDevice::from_raw(3),
            Ref::downgrade(&owner),
            validator,
        );

        handle.release_adopted(&marker);
        assert!(handle.is_null());
        assert!(sink.messages().is_empty());
    }

    #[test]
    fn null_handle_release_is_a_no_op() {
        let marker = DebugMarker::new(vk::ObjectType::FENCE, "Fence");
        let mut handle: OwnedHandle<vk::Fence, TestOwner> = OwnedHandle::null(Validator::default());
        handle.release(&marker, |_, _| panic!("null handles are never freed"));
        assert!(handle.is_null());
    }

    #[test]
    fn object_handle_take() {
        let mut handle = ObjectHandle::new(vk::Semaphore::from_raw(9));
        assert_eq!(handle.take(), Some(vk::Semaphore::from_raw(9)));
        assert_eq!(handle.take(), None);
        assert!(handle.is_null());
    }
}
