//! Destruction-order validation and diagnostics.
//!
//! A [`Validator`] is handed to an [`Instance`](crate::Instance) when it is
//! created and every object created below that instance keeps a clone of it.
//! It is consulted when an object is released after the object that owns it
//! (its device or instance) is already gone. No native call is made in that
//! case; the validator only decides how loudly to complain.
use ash::vk;
use std::{fmt, sync::Arc};

/// What to do when an object outlives its owner.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum DestructionPolicy {
    /// Skip the native free silently.
    Ignore,
    /// Skip the native free and log a warning.
    #[default]
    Warn,
    /// Skip the native free, report an error through the sink and trap like
    /// a failed [`assertion!`](crate::assertion): fatal in debug builds,
    /// logged only once in release builds.
    Fail,
}

/// The kind of object that owns a resource.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum OwnerKind {
    /// A `VkInstance`.
    Instance,
    /// A `VkDevice`.
    Device,
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OwnerKind::Instance => "instance",
            OwnerKind::Device => "device",
        })
    }
}

/// Receiver of diagnostic messages.
pub trait DiagnosticSink: Send + Sync {
    /// Emit one message.
    fn log(&self, level: log::Level, message: fmt::Arguments);
}

/// Forwards diagnostics to the [`log`] facade.
#[derive(Debug, Copy, Clone, Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn log(&self, level: log::Level, message: fmt::Arguments) {
        log::log!(target: "vk_lifetime", level, "{}", message);
    }
}

/// Description of an object that was released after its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanedObject<'a> {
    /// Human readable type name, e.g. `"DeviceMemory"`.
    pub type_name: &'static str,
    /// Vulkan object type of the released object.
    pub object_type: vk::ObjectType,
    /// Raw native handle that was not freed.
    pub raw_handle: u64,
    /// Debug name assigned to the object, if any.
    pub name: Option<&'a str>,
    /// Kind of the owner that was already gone.
    pub owner: OwnerKind,
}

/// Diagnostic context shared by all objects of an instance.
///
/// Cheap to clone. `Validator::default()` logs a warning through [`LogSink`].
#[derive(Clone)]
pub struct Validator {
    policy: DestructionPolicy,
    sink: Arc<dyn DiagnosticSink>,
}

impl Validator {
    /// Create a validator with a custom policy and sink.
    pub fn new(policy: DestructionPolicy, sink: Arc<dyn DiagnosticSink>) -> Validator {
        Validator { policy, sink }
    }

    /// Create a validator logging through [`LogSink`] with the given policy.
    pub fn with_policy(policy: DestructionPolicy) -> Validator {
        Validator::new(policy, Arc::new(LogSink))
    }

    /// The active destruction policy.
    #[inline]
    pub fn policy(&self) -> DestructionPolicy {
        self.policy
    }

    /// Emit a message through the sink.
    #[inline]
    pub fn log(&self, level: log::Level, message: fmt::Arguments) {
        self.sink.log(level, message);
    }

    /// Called when an object is released after its owner. Never calls into
    /// the native API.
    pub fn report_destroyed_after_owner(&self, object: &OrphanedObject) {
        if self.policy == DestructionPolicy::Ignore {
            return;
        }

        let name = object.name.unwrap_or("<unnamed>");
        let message = format!(
            "Attempted to destroy object of type [{}] ({:?} {:#x}, {}) after its corresponding {}",
            object.type_name, object.object_type, object.raw_handle, name, object.owner
        );
        match self.policy {
            DestructionPolicy::Ignore => (),
            DestructionPolicy::Warn => self.sink.log(log::Level::Warn, format_args!("{}", message)),
            DestructionPolicy::Fail => {
                self.sink.log(log::Level::Error, format_args!("{}", message));
                crate::assert::assertion_trap(format_args!("{}", message));
            }
        }
    }

    /// Called when the creation of an object fails.
    pub fn report_creation_failure(&self, type_name: &str, error: &dyn fmt::Display) {
        self.sink.log(
            log::Level::Error,
            format_args!("Failed to create object of type [{}]: {}", type_name, error),
        );
    }
}

impl Default for Validator {
    fn default() -> Self {
        Validator::with_policy(DestructionPolicy::default())
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
