//! Instance creation utils.
use crate::{
    dispatch::{AshInstance, InstanceDispatch},
    handle::{ObjectHandle, Owner},
    physical_device::{PhysicalDevice, PhysicalDeviceObject},
    refcount::{EmbeddedResource, Ref, WeakRef},
    validation::{OwnerKind, Validator},
    LifetimeSmallVec,
};
use ash::extensions::ext::DebugUtils;
use ash::prelude::VkResult;
use ash::{vk, Entry};
use cstr::cstr;
use std::{
    ffi::{c_void, CStr, CString, NulError},
    fmt,
    os::raw::c_char,
    sync::{Arc, Mutex, PoisonError},
};
use thiserror::Error;

/// Require, request or disable validation layers.
#[derive(Debug, Copy, Clone)]
pub enum ValidationLayers {
    /// Instance creation will fail if there are no validation layers installed.
    Require,
    /// If there are validation layers installed, enable them.
    Request,
    /// Don't enable validation layers.
    Disable,
}

/// Enable or disable the debug messenger, optionally providing a custom callback.
#[derive(Copy, Clone)]
pub enum DebugMessenger {
    /// Enables the debug messenger with the [`default_debug_callback`]
    /// callback.
    Default,
    /// Enables the debug messenger with a custom, user-provided callback.
    Custom {
        /// The user provided callback function. Feel free to take a look at the
        /// [`default_debug_callback`] when implementing your own.
        callback: vk::PFN_vkDebugUtilsMessengerCallbackEXT,
        /// A user data pointer passed to the debug callback.
        user_data_pointer: *mut c_void,
    },
    /// Disables the debug messenger.
    Disable,
}

/// The default debug callback used in [`DebugMessenger::Default`]. Forwards
/// every message to the [`log`] facade under the `vk_lifetime::vulkan` target.
pub unsafe extern "system" fn default_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let level = if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Trace
    };

    let message = if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        "<no message>".into()
    } else {
        CStr::from_ptr((*p_callback_data).p_message).to_string_lossy()
    };
    log::log!(target: "vk_lifetime::vulkan", level, "{:?} | {}", message_type, message);

    vk::FALSE
}

/// Metadata for after instance creation.
#[derive(Clone)]
pub struct InstanceMetadata {
    api_version: u32,
    enabled_layers: LifetimeSmallVec<CString>,
    enabled_extensions: LifetimeSmallVec<CString>,
}

impl InstanceMetadata {
    /// Retrieve the used instance API version.
    #[inline]
    pub fn api_version_raw(&self) -> u32 {
        self.api_version
    }

    /// Retrieve the used instance API major version.
    #[inline]
    pub fn api_version_major(&self) -> u32 {
        vk::api_version_major(self.api_version)
    }

    /// Retrieve the used instance API minor version.
    #[inline]
    pub fn api_version_minor(&self) -> u32 {
        vk::api_version_minor(self.api_version)
    }

    /// List of all enabled layers in the instance.
    #[inline]
    pub fn enabled_layers(&self) -> &[CString] {
        &self.enabled_layers
    }

    /// Returns true if `layer` is enabled.
    #[inline]
    pub fn is_layer_enabled(&self, layer: &CStr) -> bool {
        self.enabled_layers.iter().any(|e| e.as_c_str() == layer)
    }

    /// List of all enabled extensions in the instance.
    #[inline]
    pub fn enabled_extensions(&self) -> &[CString] {
        &self.enabled_extensions
    }

    /// Returns true if `extension` is enabled.
    #[inline]
    pub fn is_extension_enabled(&self, extension: &CStr) -> bool {
        self.enabled_extensions
            .iter()
            .any(|i| i.as_c_str() == extension)
    }
}

impl fmt::Debug for InstanceMetadata {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("InstanceMetadata")
            .field(
                "api_version",
                &format_args!("{}.{}", self.api_version_major(), self.api_version_minor()),
            )
            .field("enabled_layers", &self.enabled_layers)
            .field("enabled_extensions", &self.enabled_extensions)
            .finish()
    }
}

/// Errors that can occur during instance creation.
#[derive(Debug, Error)]
pub enum InstanceCreationError {
    /// Vulkan Error.
    #[error("vulkan error")]
    VulkanError(#[from] vk::Result),
    /// One or more layers are not present.
    #[error("layers ({0:?}) not present")]
    LayersNotPresent(LifetimeSmallVec<CString>),
    /// One or more extensions are not present.
    #[error("extensions ({0:?}) not present")]
    ExtensionsNotPresent(LifetimeSmallVec<CString>),
    /// The loader does not support the required API version.
    #[error("api version {0:#x} not supported")]
    ApiVersionNotSupported(u32),
}

/// The root object. Owns the physical devices enumerated from it.
///
/// Dropping the last [`Instance`] handle releases the physical devices and
/// destroys the native instance. Devices still alive at that point are
/// reported to the [`Validator`] when they are dropped.
pub struct InstanceObject {
    handle: ObjectHandle<vk::Instance>,
    dispatch: Arc<dyn InstanceDispatch>,
    validator: Validator,
    metadata: Option<InstanceMetadata>,
    physical_devices: Mutex<Option<Vec<PhysicalDevice>>>,
}

/// Shared handle to an [`InstanceObject`].
pub type Instance = Ref<InstanceObject>;

/// Weak reference to an [`InstanceObject`].
pub type InstanceWeak = WeakRef<InstanceObject>;

impl InstanceObject {
    /// The native handle.
    #[inline]
    pub fn handle(&self) -> vk::Instance {
        self.handle.handle()
    }

    /// Instance level entry points.
    #[inline]
    pub fn dispatch(&self) -> &dyn InstanceDispatch {
        &*self.dispatch
    }

    /// The validator every object created below this instance reports to.
    #[inline]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// What is enabled in the instance, if it was created by an
    /// [`InstanceBuilder`].
    #[inline]
    pub fn metadata(&self) -> Option<&InstanceMetadata> {
        self.metadata.as_ref()
    }
}

impl Ref<InstanceObject> {
    /// Take ownership of an instance created elsewhere. The instance is
    /// destroyed through `dispatch` when the last handle is dropped.
    pub fn from_dispatch(dispatch: Arc<dyn InstanceDispatch>, validator: Validator) -> Instance {
        Ref::new(InstanceObject {
            handle: ObjectHandle::new(dispatch.handle()),
            dispatch,
            validator,
            metadata: None,
            physical_devices: Mutex::new(None),
        })
    }

    /// The physical devices of this instance. Enumerated on the first call.
    pub fn physical_devices(&self) -> VkResult<Vec<PhysicalDevice>> {
        let mut cached = self
            .physical_devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if cached.is_none() {
            let handles = unsafe { self.dispatch.enumerate_physical_devices(self.handle()) }?;
            log::debug!("enumerated {} physical devices", handles.len());
            *cached = Some(
                handles
                    .into_iter()
                    .map(|handle| PhysicalDeviceObject::adopt(self, handle))
                    .collect(),
            );
        }

        Ok(cached.iter().flatten().cloned().collect())
    }
}

impl EmbeddedResource for InstanceObject {
    fn destroy_object(&mut self) {
        let physical_devices = self
            .physical_devices
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(physical_devices);

        if let Some(instance) = self.handle.take() {
            log::debug!("destroying instance {:?}", instance);
            unsafe { self.dispatch.destroy_instance(instance) };
        }
    }
}

impl Owner for InstanceObject {
    const KIND: OwnerKind = OwnerKind::Instance;
}

impl fmt::Debug for InstanceObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("handle", &self.handle)
            .field("metadata", &self.metadata)
            .field("validator", &self.validator)
            .finish_non_exhaustive()
    }
}

/// Allows to easily create an [`Instance`].
pub struct InstanceBuilder<'a> {
    app_name: Option<CString>,
    app_version: Option<u32>,
    required_api_version: u32,
    requested_api_version: Option<u32>,
    layers: LifetimeSmallVec<(&'a CStr, bool)>,
    extensions: LifetimeSmallVec<(&'a CStr, bool)>,
    debug_messenger: DebugMessenger,
    validator: Validator,
}

impl<'a> InstanceBuilder<'a> {
    /// Create a new instance builder targeting Vulkan 1.0, without layers,
    /// extensions or a debug messenger.
    #[inline]
    pub fn new() -> Self {
        InstanceBuilder {
            app_name: None,
            app_version: None,
            required_api_version: vk::API_VERSION_1_0,
            requested_api_version: None,
            layers: LifetimeSmallVec::new(),
            extensions: LifetimeSmallVec::new(),
            debug_messenger: DebugMessenger::Disable,
            validator: Validator::default(),
        }
    }

    /// Application name to advertise.
    #[inline]
    pub fn app_name(mut self, app_name: &str) -> Result<Self, NulError> {
        self.app_name = Some(CString::new(app_name)?);
        Ok(self)
    }

    /// Application version to advertise.
    #[inline]
    pub fn app_version(mut self, major: u32, minor: u32) -> Self {
        self.app_version = Some(vk::make_api_version(0, major, minor, 0));
        self
    }

    /// Minimum instance API version. [`build`](Self::build) fails if the
    /// loader is older.
    #[inline]
    pub fn require_api_version(mut self, major: u32, minor: u32) -> Self {
        self.required_api_version = vk::make_api_version(0, major, minor, 0);
        self
    }

    /// Preferred instance API version, capped to what the loader supports.
    #[inline]
    pub fn request_api_version(mut self, major: u32, minor: u32) -> Self {
        self.requested_api_version = Some(vk::make_api_version(0, major, minor, 0));
        self
    }

    /// Enable `layer` if the loader has it.
    #[inline]
    pub fn request_layer(mut self, layer: &'a CStr) -> Self {
        self.layers.push((layer, false));
        self
    }

    /// Enable `layer`, failing with [`InstanceCreationError::LayersNotPresent`]
    /// if the loader does not have it.
    #[inline]
    pub fn require_layer(mut self, layer: &'a CStr) -> Self {
        self.layers.push((layer, true));
        self
    }

    /// Enable `extension` if it is available.
    #[inline]
    pub fn request_extension(mut self, extension: &'a CStr) -> Self {
        self.extensions.push((extension, false));
        self
    }

    /// Enable `extension`, failing with
    /// [`InstanceCreationError::ExtensionsNotPresent`] if it is unavailable.
    #[inline]
    pub fn require_extension(mut self, extension: &'a CStr) -> Self {
        self.extensions.push((extension, true));
        self
    }

    /// Add the Khronos validation layer.
    #[inline]
    pub fn validation_layers(mut self, validation_layers: ValidationLayers) -> Self {
        match validation_layers {
            ValidationLayers::Require => self.layers.push((VALIDATION_LAYER, true)),
            ValidationLayers::Request => self.layers.push((VALIDATION_LAYER, false)),
            ValidationLayers::Disable => (),
        }

        self
    }

    /// Route driver diagnostics through `debug_messenger`. Requesting any
    /// messenger also enables object names and tags through
    /// `VK_EXT_debug_utils`.
    #[inline]
    pub fn request_debug_messenger(mut self, debug_messenger: DebugMessenger) -> Self {
        if !matches!(debug_messenger, DebugMessenger::Disable) {
            self.extensions.push((vk::ExtDebugUtilsFn::name(), false));
        }

        self.debug_messenger = debug_messenger;
        self
    }

    /// The validator objects of the new instance report to. Defaults to
    /// [`Validator::default`].
    #[inline]
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Returns the [`Instance`]. A debug messenger, if it was requested and
    /// successfully created, is owned by the instance; [`InstanceMetadata`]
    /// about what is actually enabled is available through
    /// [`InstanceObject::metadata`].
    pub unsafe fn build(self, entry: &Entry) -> Result<Instance, InstanceCreationError> {
        let instance_version = entry
            .try_enumerate_instance_version()?
            .unwrap_or(vk::API_VERSION_1_0);
        let api_version = negotiate_api_version(
            self.required_api_version,
            self.requested_api_version,
            instance_version,
        )?;

        let mut app_info = vk::ApplicationInfo::builder()
            .api_version(api_version)
            .engine_name(cstr!("vk-lifetime"));
        if let Some(app_name) = &self.app_name {
            app_info = app_info.application_name(app_name);
        }

        if let Some(app_version) = self.app_version {
            app_info = app_info.application_version(app_version);
        }

        let layer_properties = entry.enumerate_instance_layer_properties()?;
        let enabled_layers = select_names(&self.layers, "layer", |layer_name| {
            layer_properties
                .iter()
                .any(|layer| CStr::from_ptr(layer.layer_name.as_ptr()) == layer_name)
        })
        .map_err(InstanceCreationError::LayersNotPresent)?;

        let mut extension_properties = entry.enumerate_instance_extension_properties(None)?;
        for &layer_name in &enabled_layers {
            extension_properties.extend(entry.enumerate_instance_extension_properties(Some(layer_name))?);
        }

        let enabled_extensions = select_names(&self.extensions, "extension", |extension_name| {
            extension_properties.iter().any(|extension| {
                CStr::from_ptr(extension.extension_name.as_ptr()) == extension_name
            })
        })
        .map_err(InstanceCreationError::ExtensionsNotPresent)?;

        let is_debug_utils_enabled = enabled_extensions.contains(&vk::ExtDebugUtilsFn::name());

        let layer_pointers: LifetimeSmallVec<*const c_char> =
            enabled_layers.iter().map(|name| name.as_ptr()).collect();
        let extension_pointers: LifetimeSmallVec<*const c_char> =
            enabled_extensions.iter().map(|name| name.as_ptr()).collect();
        let mut instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layer_pointers)
            .enabled_extension_names(&extension_pointers);

        let (callback, user_data): (vk::PFN_vkDebugUtilsMessengerCallbackEXT, *mut c_void) =
            match self.debug_messenger {
                DebugMessenger::Default => (Some(default_debug_callback), std::ptr::null_mut()),
                DebugMessenger::Custom {
                    callback,
                    user_data_pointer,
                } => (callback, user_data_pointer),
                DebugMessenger::Disable => (None, std::ptr::null_mut()),
            };
        let mut messenger_info = (is_debug_utils_enabled && callback.is_some()).then(|| {
            vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(messenger_severity(log::max_level()))
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(callback)
                .user_data(user_data)
                .build()
        });

        // Also covers messages emitted by vkCreateInstance itself.
        let mut instance_messenger_info;
        if let Some(messenger_info) = messenger_info {
            instance_messenger_info = messenger_info;
            instance_info = instance_info.push_next(&mut instance_messenger_info);
        }

        let instance = entry.create_instance(&instance_info, None)?;
        let mut dispatch = AshInstance::new(entry.clone(), instance, is_debug_utils_enabled);
        if let Some(messenger_info) = messenger_info.take() {
            let debug_utils = DebugUtils::new(entry, dispatch.raw());
            match debug_utils.create_debug_utils_messenger(&messenger_info, None) {
                Ok(messenger) => dispatch.adopt_debug_messenger(messenger),
                Err(err) => {
                    dispatch.raw().destroy_instance(None);
                    return Err(err.into());
                }
            }
        }

        let metadata = InstanceMetadata {
            api_version,
            enabled_layers: enabled_layers.iter().map(|&name| name.to_owned()).collect(),
            enabled_extensions: enabled_extensions
                .iter()
                .map(|&name| name.to_owned())
                .collect(),
        };
        log::debug!("created instance: {:?}", metadata);

        Ok(Ref::new(InstanceObject {
            handle: ObjectHandle::new(dispatch.handle()),
            dispatch: Arc::new(dispatch),
            validator: self.validator,
            metadata: Some(metadata),
            physical_devices: Mutex::new(None),
        }))
    }
}

const VALIDATION_LAYER: &CStr = cstr!("VK_LAYER_KHRONOS_validation");

/// Pick the API version to create the instance with, ignoring patch levels.
fn negotiate_api_version(
    required: u32,
    requested: Option<u32>,
    instance_version: u32,
) -> Result<u32, InstanceCreationError> {
    let supported = vk::make_api_version(
        0,
        vk::api_version_major(instance_version),
        vk::api_version_minor(instance_version),
        0,
    );
    if supported < required {
        return Err(InstanceCreationError::ApiVersionNotSupported(required));
    }

    Ok(requested.map_or(required, |requested| required.max(requested.min(supported))))
}

/// Filter `wanted` names by `is_present`, deduplicated. Missing required
/// names are returned as the error.
fn select_names<'n>(
    wanted: &[(&'n CStr, bool)],
    kind: &str,
    mut is_present: impl FnMut(&CStr) -> bool,
) -> Result<LifetimeSmallVec<&'n CStr>, LifetimeSmallVec<CString>> {
    let mut enabled: LifetimeSmallVec<&CStr> = LifetimeSmallVec::new();
    let mut missing = LifetimeSmallVec::new();
    for &(name, required) in wanted {
        if enabled.contains(&name) {
            continue;
        }

        match (required, is_present(name)) {
            (_, true) => enabled.push(name),
            (true, false) => missing.push(name.to_owned()),
            (false, false) => log::info!("optional {} {:?} not present", kind, name),
        }
    }

    if missing.is_empty() {
        Ok(enabled)
    } else {
        Err(missing)
    }
}

/// Messenger severities matching what the [`log`] facade lets through.
fn messenger_severity(max_level: log::LevelFilter) -> vk::DebugUtilsMessageSeverityFlagsEXT {
    let mut severity = vk::DebugUtilsMessageSeverityFlagsEXT::empty();
    if max_level >= log::LevelFilter::Error {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    }
    if max_level >= log::LevelFilter::Warn {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING;
    }
    if max_level >= log::LevelFilter::Info {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::INFO;
    }
    if max_level >= log::LevelFilter::Trace {
        severity |= vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE;
    }
    severity
}

impl<'a> Default for InstanceBuilder<'a> {
    fn default() -> Self {
        Self::new()
    }
}
