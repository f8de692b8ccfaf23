// SPDX-License-Identifier: CEPL-1.0
//! Diagnostic callback: one `VK_EXT_debug_utils` messenger whose messages are
//! forwarded to `tracing` at the matching level.

use std::ffi::CStr;

use ash::vk;

/// Tracing level a validation message is logged at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DiagnosticLevel {
    Error,
    Warn,
    Info,
    Trace,
}

pub(crate) fn level_for(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> DiagnosticLevel {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        DiagnosticLevel::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        DiagnosticLevel::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        DiagnosticLevel::Info
    } else {
        DiagnosticLevel::Trace
    }
}

fn kind_name(types: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if types.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}

unsafe extern "system" fn diagnostic_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    // SAFETY: the loader passes a valid callback-data struct for the duration
    // of the call; p_message may be null on some layers.
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    // SAFETY: non-null, NUL-terminated as the loader guarantees.
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    let kind = kind_name(types);

    match level_for(severity) {
        DiagnosticLevel::Error => tracing::error!("[vk {kind}] {msg}"),
        DiagnosticLevel::Warn => tracing::warn!("[vk {kind}] {msg}"),
        DiagnosticLevel::Info => tracing::debug!("[vk {kind}] {msg}"),
        DiagnosticLevel::Trace => tracing::trace!("[vk {kind}] {msg}"),
    }
    vk::FALSE
}

/// Create info for the messenger. Also chained into instance creation so the
/// create/destroy calls themselves are covered.
pub(crate) fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(diagnostic_callback),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_to_the_highest_level_present() {
        type S = vk::DebugUtilsMessageSeverityFlagsEXT;
        assert_eq!(level_for(S::ERROR | S::WARNING), DiagnosticLevel::Error);
        assert_eq!(level_for(S::WARNING), DiagnosticLevel::Warn);
        assert_eq!(level_for(S::INFO), DiagnosticLevel::Info);
        assert_eq!(level_for(S::VERBOSE), DiagnosticLevel::Trace);
    }

    #[test]
    fn null_callback_data_is_ignored() {
        // SAFETY: the callback checks for null before dereferencing.
        let ret = unsafe {
            diagnostic_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                std::ptr::null(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, vk::FALSE);
    }

    #[test]
    fn callback_forwards_message_without_aborting_the_call() {
        let data = vk::DebugUtilsMessengerCallbackDataEXT {
            p_message: c"vkCreateSwapchainKHR: test message".as_ptr(),
            ..Default::default()
        };
        // SAFETY: data and its message outlive the call.
        let ret = unsafe {
            diagnostic_callback(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING,
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL,
                &data,
                std::ptr::null_mut(),
            )
        };
        assert_eq!(ret, vk::FALSE);
    }

    #[test]
    fn create_info_routes_to_our_callback() {
        let ci = messenger_create_info();
        assert!(ci.pfn_user_callback.is_some());
        assert!(ci
            .message_type
            .contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION));
    }
}
