use std::ffi::{c_char, c_void, CStr};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;

use crate::renderer::error::{Error, Result};

const REQUIRED_VALIDATION_LAYERS: &[&CStr] = &[c"VK_LAYER_KHRONOS_validation"];

/// The Vulkan instance, the window surface, and the debug messenger
/// forwarding validation output to `log`.
pub struct Instance {
    pub entry: ash::Entry,
    pub raw: ash::Instance,
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    pub fn new(window: &Window, validation: bool) -> Result<Self> {
        let entry = ash::Entry::linked();

        if validation {
            Self::check_validation_layers_supported(&entry)?;
        }

        let application_info = vk::ApplicationInfo::default()
            .application_name(c"sable")
            .api_version(vk::API_VERSION_1_3);
        let enabled_layer_names = if validation {
            REQUIRED_VALIDATION_LAYERS
                .iter()
                .map(|layer| layer.as_ptr())
                .collect::<Vec<*const c_char>>()
        } else {
            Vec::new()
        };
        let enabled_extension_names = Self::required_instance_extensions(window, validation)?
            .iter()
            .map(|ext| ext.as_ptr())
            .collect::<Vec<*const c_char>>();

        let mut debug_info = debug_utils_messenger_create_info();
        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&enabled_layer_names)
            .enabled_extension_names(&enabled_extension_names);
        if validation {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        #[cfg(target_os = "macos")]
        let instance_info = instance_info.flags(vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR);

        let raw = unsafe { entry.create_instance(&instance_info, None)? };

        let debug_utils = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &raw);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(&debug_utils_messenger_create_info(), None)?
            };
            Some((loader, messenger))
        } else {
            None
        };

        let surface_loader = ash::khr::surface::Instance::new(&entry, &raw);
        let mut instance = Self {
            entry,
            raw,
            surface: vk::SurfaceKHR::null(),
            surface_loader,
            debug_utils,
        };
        instance.surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.raw,
                window.display_handle()?.as_raw(),
                window.window_handle()?.as_raw(),
                None,
            )?
        };

        log::info!("created Vulkan instance (validation: {})", validation);
        Ok(instance)
    }

    fn required_instance_extensions(window: &Window, validation: bool) -> Result<Vec<&'static CStr>> {
        let mut exts = ash_window::enumerate_required_extensions(window.display_handle()?.as_raw())?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect::<Vec<_>>();

        if validation {
            exts.push(ash::ext::debug_utils::NAME);
        }

        #[cfg(target_os = "macos")]
        {
            exts.push(ash::khr::portability_enumeration::NAME);
            exts.push(ash::khr::get_physical_device_properties2::NAME);
        }

        Ok(exts)
    }

    fn check_validation_layers_supported(entry: &ash::Entry) -> Result<()> {
        let supported_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let supported = supported_layers
            .iter()
            .filter_map(|props| props.layer_name_as_c_str().ok())
            .collect::<Vec<_>>();

        for layer in REQUIRED_VALIDATION_LAYERS {
            if !supported.contains(layer) {
                return Err(Error::device(format!("validation layer {layer:?} not supported")));
            }
        }
        Ok(())
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

fn debug_utils_messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT<'static> {
    let message_severity = vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR;
    let message_type = vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE;
    vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(message_severity)
        .message_type(message_type)
        .pfn_user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let msg_type = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        _ => "[Unknown]",
    };
    let msg = unsafe { CStr::from_ptr((*p_callback_data).p_message) };
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE => log::trace!("{} {:?}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::info!("{} {:?}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("{} {:?}", msg_type, msg),
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("{} {:?}", msg_type, msg),
        _ => log::warn!("[Unknown]{} {:?}", msg_type, msg),
    }

    vk::FALSE
}
