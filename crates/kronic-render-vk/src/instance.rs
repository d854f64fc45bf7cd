// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::ext::debug_utils;
use ash::{vk, Entry, Instance};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, c_void, CStr, CString};
use tracing::{debug, error, info, trace, warn};

use crate::error::SetupError;

pub(crate) const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"kronic";

pub(crate) fn ext_name(p: &vk::ExtensionProperties) -> &CStr {
    // driver-filled, always NUL terminated within the array
    unsafe { CStr::from_ptr(p.extension_name.as_ptr()) }
}

fn layer_name(p: &vk::LayerProperties) -> &CStr {
    unsafe { CStr::from_ptr(p.layer_name.as_ptr()) }
}

/// Names from `required` that no entry of `available` reports, in request order.
pub(crate) fn missing<'r, T>(
    required: &[&'r CStr],
    available: &[T],
    name_of: fn(&T) -> &CStr,
) -> Vec<&'r CStr> {
    required
        .iter()
        .copied()
        .filter(|want| !available.iter().any(|a| name_of(a) == *want))
        .collect()
}

pub(crate) fn message_type_label(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "Validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "Performance"
    } else {
        "General"
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    let kind = message_type_label(types);

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", "{kind}: {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", "{kind}: {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", "{kind}: {msg}");
    } else {
        trace!(target: "vulkan", "{kind}: {msg}");
    }

    vk::FALSE
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    }
}

unsafe fn check_validation_layer_support(entry: &Entry) -> Result<()> {
    let layers = entry
        .enumerate_instance_layer_properties()
        .context("enumerate_instance_layer_properties")?;

    if let Some(layer) = missing(&[VALIDATION_LAYER], &layers, layer_name).first() {
        error!("vk: could not find layer support: {}", layer.to_string_lossy());
        return Err(SetupError::ValidationLayersUnavailable {
            layer: layer.to_string_lossy().into_owned(),
        }
        .into());
    }
    Ok(())
}

/// Window-system extensions for `display`, plus debug utils when validating.
unsafe fn required_extensions(
    display: RawDisplayHandle,
    validation: bool,
) -> Result<Vec<&'static CStr>> {
    let wsi = ash_window::enumerate_required_extensions(display)
        .context("enumerate_required_extensions")?;
    let mut exts: Vec<&'static CStr> = wsi.iter().map(|&p| CStr::from_ptr(p)).collect();
    if validation {
        exts.push(debug_utils::NAME);
    }
    Ok(exts)
}

pub(crate) unsafe fn create_instance(
    entry: &Entry,
    display: RawDisplayHandle,
    app_name: &str,
    validation: bool,
) -> Result<Instance> {
    if validation {
        check_validation_layer_support(entry)?;
    }

    let app_name = CString::new(app_name).context("application name contains a NUL byte")?;
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: vk::make_api_version(0, 1, 0, 0),
        p_engine_name: ENGINE_NAME.as_ptr(),
        engine_version: vk::make_api_version(0, 1, 0, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let required = required_extensions(display, validation)?;
    let available = entry
        .enumerate_instance_extension_properties(None)
        .context("enumerate_instance_extension_properties")?;
    let absent = missing(&required, &available, ext_name);
    for ext in &required {
        if absent.contains(ext) {
            warn!("vk: required instance extension not found: {}", ext.to_string_lossy());
        } else {
            info!("vk: found required instance extension: {}", ext.to_string_lossy());
        }
    }

    let ext_ptrs: Vec<*const c_char> = required.iter().map(|e| e.as_ptr()).collect();
    let layer_ptrs: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    // Chained so instance creation/destruction itself is reported too.
    let debug_ci = messenger_create_info();
    let p_next: *const c_void = if validation {
        (&debug_ci as *const vk::DebugUtilsMessengerCreateInfoEXT).cast()
    } else {
        std::ptr::null()
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_next,
        p_application_info: &app_info,
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };

    entry
        .create_instance(&create_info, None)
        .context("create_instance")
}

pub(crate) struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    pub(crate) unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let handle = loader
            .create_debug_utils_messenger(&messenger_create_info(), None)
            .context("create_debug_utils_messenger")?;
        Ok(Self { loader, handle })
    }

    pub(crate) unsafe fn destroy(&self) {
        self.loader.destroy_debug_utils_messenger(self.handle, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ext(name: &CStr) -> vk::ExtensionProperties {
        let mut p = vk::ExtensionProperties::default();
        for (dst, &src) in p.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = src as c_char;
        }
        p
    }

    #[test]
    fn missing_reports_only_absent_names_in_order() {
        let available = [ext(c"VK_KHR_surface"), ext(c"VK_KHR_xcb_surface")];
        let required = [c"VK_KHR_surface", c"VK_EXT_debug_utils", c"VK_KHR_wayland_surface"];
        let absent = missing(&required, &available, ext_name);
        assert_eq!(absent, vec![c"VK_EXT_debug_utils", c"VK_KHR_wayland_surface"]);
    }

    #[test]
    fn missing_is_empty_when_everything_is_there() {
        let available = [ext(c"VK_KHR_swapchain")];
        assert!(missing(&[c"VK_KHR_swapchain"], &available, ext_name).is_empty());
        assert!(missing::<vk::ExtensionProperties>(&[], &[], ext_name).is_empty());
    }

    #[test]
    fn prefix_names_do_not_match() {
        let available = [ext(c"VK_KHR_swapchain_mutable_format")];
        assert_eq!(
            missing(&[c"VK_KHR_swapchain"], &available, ext_name),
            vec![c"VK_KHR_swapchain"]
        );
    }

    #[test]
    fn message_types_are_labelled() {
        type T = vk::DebugUtilsMessageTypeFlagsEXT;
        assert_eq!(message_type_label(T::GENERAL), "General");
        assert_eq!(message_type_label(T::VALIDATION), "Validation");
        assert_eq!(message_type_label(T::PERFORMANCE), "Performance");
        assert_eq!(message_type_label(T::VALIDATION | T::PERFORMANCE), "Validation");
        assert_eq!(message_type_label(T::empty()), "General");
    }

    #[test]
    fn messenger_listens_to_everything_but_info() {
        let ci = messenger_create_info();
        assert!(ci.pfn_user_callback.is_some());
        assert!(!ci
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(ci
            .message_type
            .contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE));
    }
}
