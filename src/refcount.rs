//! Intrusive reference counting.
//!
//! Every wrapped object lives in a single heap block holding the object
//! itself, its strong count, a weak count and a lifecycle state. [`Ref`] is
//! the strong, cloneable handle clients keep; [`WeakRef`] is what children
//! store to refer back to their owner.
//!
//! When the strong count drops to zero the object enters its destructor:
//! [`EmbeddedResource::destroy_object`] runs exactly once, then the value is
//! dropped. The allocation itself stays around until the last [`WeakRef`] is
//! gone, so weak references can keep answering "is my owner alive?" without
//! ever touching the destroyed value.
use std::{
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    mem::ManuallyDrop,
    ops::Deref,
    ptr::NonNull,
    sync::atomic::{fence, AtomicU8, AtomicUsize, Ordering},
};

const ALIVE: u8 = 0;
const IN_DESTRUCTOR: u8 = 1;
const DESTROYED: u8 = 2;

/// Teardown hook of a reference-counted object.
pub trait EmbeddedResource {
    /// Releases the native object. Called once, when the last [`Ref`] is
    /// dropped and before the value itself is dropped.
    ///
    /// Implementations must be idempotent: after the first call the stored
    /// native handle is null and further calls do nothing.
    fn destroy_object(&mut self);
}

/// Observable state of the target of a [`WeakRef`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OwnerState {
    /// The target is alive and not being torn down.
    Valid,
    /// The last strong handle is gone and the target is running its teardown.
    /// It must not be asked to create new children anymore.
    InDestructor,
    /// The target is gone, or the reference was never set or was reset.
    Invalid,
}

struct RefCountEntry<T> {
    strong: AtomicUsize,
    /// Number of [`WeakRef`]s, plus one shared by all strong handles.
    weak: AtomicUsize,
    state: AtomicU8,
    value: UnsafeCell<ManuallyDrop<T>>,
}

/// Strong handle to an intrusively reference-counted object.
///
/// Cloning increments the count. Dropping the last clone tears the object
/// down through [`EmbeddedResource::destroy_object`].
pub struct Ref<T: EmbeddedResource> {
    ptr: NonNull<RefCountEntry<T>>,
    _marker: PhantomData<RefCountEntry<T>>,
}

unsafe impl<T: EmbeddedResource + Send + Sync> Send for Ref<T> {}
unsafe impl<T: EmbeddedResource + Send + Sync> Sync for Ref<T> {}

impl<T: EmbeddedResource> Ref<T> {
    /// Moves `value` into a fresh heap block with a strong count of one.
    pub fn new(value: T) -> Ref<T> {
        let entry = Box::new(RefCountEntry {
            strong: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            state: AtomicU8::new(ALIVE),
            value: UnsafeCell::new(ManuallyDrop::new(value)),
        });

        Ref {
            ptr: NonNull::from(Box::leak(entry)),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn entry(&self) -> &RefCountEntry<T> {
        unsafe { self.ptr.as_ref() }
    }

    /// Creates a weak reference to this object.
    #[inline]
    pub fn downgrade(this: &Self) -> WeakRef<T> {
        this.entry().weak.fetch_add(1, Ordering::Relaxed);
        WeakRef {
            ptr: Some(this.ptr),
            _marker: PhantomData,
        }
    }

    /// Number of strong handles currently sharing this object.
    #[inline]
    pub fn ref_count(this: &Self) -> usize {
        this.entry().strong.load(Ordering::Acquire)
    }

    /// Number of weak references to this object.
    #[inline]
    pub fn weak_count(this: &Self) -> usize {
        this.entry().weak.load(Ordering::Acquire) - 1
    }

    /// Returns true if both handles refer to the same object.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    #[cold]
    fn teardown(&mut self) {
        let entry = self.entry();
        entry.state.store(IN_DESTRUCTOR, Ordering::Release);

        // Only the thread that brought the count to zero gets here, and weak
        // references cannot upgrade anymore, so the access is exclusive.
        unsafe {
            let value = &mut *entry.value.get();
            value.destroy_object();
            ManuallyDrop::drop(value);
        }

        entry.state.store(DESTROYED, Ordering::Release);

        drop(WeakRef {
            ptr: Some(self.ptr),
            _marker: PhantomData,
        });
    }
}

impl<T: EmbeddedResource> Clone for Ref<T> {
    fn clone(&self) -> Self {
        let previous = self.entry().strong.fetch_add(1, Ordering::Relaxed);
        crate::debug_assertion!(previous > 0, "cloned a reference with a count of zero");
        if previous > usize::MAX / 2 {
            std::process::abort();
        }

        Ref {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: EmbeddedResource> Drop for Ref<T> {
    fn drop(&mut self) {
        if self.entry().strong.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            self.teardown();
        }
    }
}

impl<T: EmbeddedResource> Deref for Ref<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.entry().value.get() }
    }
}

impl<T: EmbeddedResource + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

/// Weak reference to an object owned by [`Ref`]s.
///
/// A `WeakRef` never keeps the object alive and never hands out access to it
/// except through [`upgrade`](Self::upgrade), which fails once the object has
/// entered its destructor.
pub struct WeakRef<T: EmbeddedResource> {
    ptr: Option<NonNull<RefCountEntry<T>>>,
    _marker: PhantomData<RefCountEntry<T>>,
}

unsafe impl<T: EmbeddedResource + Send + Sync> Send for WeakRef<T> {}
unsafe impl<T: EmbeddedResource + Send + Sync> Sync for WeakRef<T> {}

impl<T: EmbeddedResource> WeakRef<T> {
    /// Creates an empty, invalid reference.
    #[inline]
    pub const fn new() -> WeakRef<T> {
        WeakRef {
            ptr: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    fn entry(&self) -> Option<&RefCountEntry<T>> {
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// State of the referenced object.
    pub fn state(&self) -> OwnerState {
        let entry = match self.entry() {
            Some(entry) => entry,
            None => return OwnerState::Invalid,
        };

        match entry.state.load(Ordering::Acquire) {
            ALIVE if entry.strong.load(Ordering::Acquire) > 0 => OwnerState::Valid,
            // The count just reached zero and teardown is about to start.
            ALIVE | IN_DESTRUCTOR => OwnerState::InDestructor,
            _ => OwnerState::Invalid,
        }
    }

    /// Returns true if the object exists and is not being torn down.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.state() == OwnerState::Valid
    }

    /// Returns true if the object has started its irreversible teardown.
    #[inline]
    pub fn is_in_destructor(&self) -> bool {
        self.state() == OwnerState::InDestructor
    }

    /// Obtains a strong handle, or `None` if the object is no longer valid.
    pub fn upgrade(&self) -> Option<Ref<T>> {
        let entry = self.entry()?;
        let mut count = entry.strong.load(Ordering::Relaxed);
        loop {
            if count == 0 {
                return None;
            }
            assert!(count <= usize::MAX / 2);
            match entry.strong.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Some(Ref {
                        ptr: self.ptr?,
                        _marker: PhantomData,
                    })
                }
                Err(current) => count = current,
            }
        }
    }

    /// Turns this reference into an invalid one. Idempotent.
    pub fn reset(&mut self) {
        drop(WeakRef {
            ptr: self.ptr.take(),
            _marker: PhantomData,
        });
    }

    /// Returns true if both references point to the same object, or are both
    /// empty.
    #[inline]
    pub fn ptr_eq(&self, other: &WeakRef<T>) -> bool {
        self.ptr == other.ptr
    }

    /// Returns true if this reference points to the object behind `strong`.
    #[inline]
    pub fn refers_to(&self, strong: &Ref<T>) -> bool {
        self.ptr == Some(strong.ptr)
    }
}

impl<T: EmbeddedResource> Default for WeakRef<T> {
    fn default() -> Self {
        WeakRef::new()
    }
}

impl<T: EmbeddedResource> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        if let Some(entry) = self.entry() {
            if entry.weak.fetch_add(1, Ordering::Relaxed) > usize::MAX / 2 {
                std::process::abort();
            }
        }

        WeakRef {
            ptr: self.ptr,
            _marker: PhantomData,
        }
    }
}

impl<T: EmbeddedResource> Drop for WeakRef<T> {
    fn drop(&mut self) {
        let ptr = match self.ptr {
            Some(ptr) => ptr,
            None => return,
        };

        if unsafe { ptr.as_ref() }.weak.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            // The value was already dropped by the last strong handle; the
            // `ManuallyDrop` wrapper keeps this from dropping it again.
            unsafe { drop(Box::from_raw(ptr.as_ptr())) };
        }
    }
}

impl<T: EmbeddedResource> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WeakRef").field(&self.state()).finish()
    }
}
