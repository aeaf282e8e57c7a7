//! Vulkan loader and instance, with optional Khronos validation.
//!
//! When validation is requested and the layer is installed, a debug-utils
//! messenger forwards warnings and errors from the layer to `tracing`.
//!
//! # Example
//!
//! ```no_run
//! use night_rhi::instance::Instance;
//!
//! # fn example() -> Result<(), night_rhi::RhiError> {
//! // Headless: no surface extensions, no validation.
//! let instance = Instance::new(false, &[])?;
//! # Ok(())
//! # }
//! ```

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::RhiResult;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";
const APPLICATION_NAME: &CStr = c"TriangleNight";

/// Loader entry plus instance. Outlives everything created from it.
pub struct Instance {
    /// Loaded Vulkan library. Must outlive `instance`.
    entry: Entry,
    /// Instance-level function table.
    instance: ash::Instance,
    /// Messenger and its loader, present only while validating.
    debug: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Loads Vulkan and creates a 1.0 instance with `surface_extensions`
    /// enabled.
    ///
    /// A requested but missing validation layer is logged and skipped.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - Ask for the Khronos validation layer
    /// * `surface_extensions` - Extensions the window system needs, empty
    ///   for a headless instance
    ///
    /// # Errors
    ///
    /// `LoadingError` when no loader is installed, `VulkanError` when the
    /// instance cannot be created.
    pub fn new(enable_validation: bool, surface_extensions: &[*const c_char]) -> RhiResult<Self> {
        // SAFETY: the entry is stored in the returned value and outlives
        // every function pointer loaded from it.
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && validation_layer_installed(&entry)?;
        if enable_validation && !validation {
            warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(APPLICATION_NAME)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(c"No Engine")
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extensions = instance_extensions(surface_extensions, validation);
        let layers = instance_layers(validation);

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        // SAFETY: every name pointer refers to a `'static` C string or to
        // `surface_extensions`, both alive for the call.
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            // SAFETY: the debug-utils extension was enabled on `instance`.
            match unsafe { loader.create_debug_utils_messenger(&messenger_create_info(), None) } {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    // SAFETY: nothing else was created from the instance.
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        info!(
            "Vulkan instance created: {} extension(s), validation {}",
            extensions.len(),
            if validation { "on" } else { "off" }
        );

        Ok(Self {
            entry,
            instance,
            debug,
        })
    }

    /// Returns the ash instance.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Returns the loader entry, needed to create surfaces.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        // SAFETY: the device and surface are gone by now; the messenger is
        // destroyed before the instance that owns it.
        unsafe {
            if let Some((loader, messenger)) = self.debug.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

fn validation_layer_installed(entry: &Entry) -> RhiResult<bool> {
    // SAFETY: `entry` holds a loaded library.
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    let found = layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER_NAME));

    debug!("Validation layer installed: {}", found);
    Ok(found)
}

/// Window-system extensions, plus debug utils when validating.
fn instance_extensions(surface_extensions: &[*const c_char], validation: bool) -> Vec<*const c_char> {
    let mut extensions = surface_extensions.to_vec();
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    extensions
}

fn instance_layers(validation: bool) -> Vec<*const c_char> {
    if validation {
        vec![VALIDATION_LAYER_NAME.as_ptr()]
    } else {
        Vec::new()
    }
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// `tracing` level for a validation message.
fn message_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> tracing::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::Level::ERROR
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::Level::WARN
    } else {
        tracing::Level::DEBUG
    }
}

fn message_kind(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

/// # Safety
///
/// Called by the loader; `p_callback_data` is null or valid for the call.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    // SAFETY: the loader passes null or a pointer valid for this call, and
    // a non-null message is a NUL-terminated string.
    let message = unsafe { p_callback_data.as_ref() }
        // SAFETY: as above.
        .and_then(|data| unsafe { data.message_as_c_str() })
        .map(CStr::to_string_lossy)
        .unwrap_or_default();
    let kind = message_kind(message_type);

    match message_level(severity) {
        tracing::Level::ERROR => error!("[vulkan {}] {}", kind, message),
        tracing::Level::WARN => warn!("[vulkan {}] {}", kind, message),
        _ => debug!("[vulkan {}] {}", kind, message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_adds_debug_utils_and_layer() {
        let surface = [ash::khr::surface::NAME.as_ptr()];

        assert_eq!(instance_extensions(&surface, false), surface.to_vec());
        assert!(instance_layers(false).is_empty());

        let extensions = instance_extensions(&surface, true);
        assert_eq!(
            extensions,
            vec![surface[0], ash::ext::debug_utils::NAME.as_ptr()]
        );
        assert_eq!(instance_layers(true), vec![VALIDATION_LAYER_NAME.as_ptr()]);
    }

    #[test]
    fn test_message_level_uses_highest_severity() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as Severity;

        assert_eq!(message_level(Severity::ERROR), tracing::Level::ERROR);
        assert_eq!(message_level(Severity::WARNING), tracing::Level::WARN);
        assert_eq!(
            message_level(Severity::WARNING | Severity::ERROR),
            tracing::Level::ERROR
        );
        assert_eq!(message_level(Severity::INFO), tracing::Level::DEBUG);
    }

    #[test]
    fn test_message_kind() {
        use vk::DebugUtilsMessageTypeFlagsEXT as Kind;

        assert_eq!(message_kind(Kind::VALIDATION), "validation");
        assert_eq!(message_kind(Kind::PERFORMANCE), "performance");
        assert_eq!(message_kind(Kind::GENERAL), "general");
    }
}
