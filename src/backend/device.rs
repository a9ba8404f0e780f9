// Device selection and logical device creation
//
// Responsibilities:
// - Instance creation with validation layers
// - Queue family and extension capability queries
// - Physical device selection against the presentation surface
// - Logical device + graphics/present queue creation

use super::error::{RenderError, Result};
use super::surface::Surface;
use super::swapchain::SwapchainSupportDetails;
use ash::{vk, Entry};
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device extensions the renderer cannot run without.
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Queue family indices found on a candidate device. Graphics and
/// present may resolve to the same physical index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// A complete graphics/present pair on the selected device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Deduplicated family indices, for queue-create requests.
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Scan queue families for graphics capability and per-family present
/// support. First match wins; the scan stops once both are found.
pub fn find_queue_families(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: impl FnMut(u32) -> ash::prelude::VkResult<bool>,
) -> Result<QueueFamilyIndices> {
    let mut indices = QueueFamilyIndices::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if indices.graphics.is_none()
            && family.queue_count > 0
            && family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
        {
            indices.graphics = Some(index);
        }

        // Present support is queried per family against the specific
        // surface, not assumed from graphics capability.
        if indices.present.is_none() && supports_present(index)? {
            indices.present = Some(index);
        }

        if indices.is_complete() {
            break;
        }
    }

    Ok(indices)
}

/// Exact set of required extensions the device does not report,
/// sorted for stable diagnostics. Empty means compliant.
pub fn missing_extensions(required: &[&CStr], available: &[String]) -> Vec<String> {
    let available: HashSet<&str> = available.iter().map(String::as_str).collect();

    let mut missing: Vec<String> = required
        .iter()
        .map(|ext| ext.to_string_lossy().into_owned())
        .filter(|ext| !available.contains(ext.as_str()))
        .collect();
    missing.sort();
    missing
}

fn device_extension_names(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<Vec<String>> {
    let properties = unsafe { instance.enumerate_device_extension_properties(physical_device) }?;

    Ok(properties
        .iter()
        .map(|ext| {
            unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                .to_string_lossy()
                .into_owned()
        })
        .collect())
}

fn device_name(properties: &vk::PhysicalDeviceProperties) -> String {
    unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// The chosen physical device and its queue families.
pub struct SelectedDevice {
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub families: QueueFamilies,
}

/// Pick the first device that is queue-complete, extension-compliant,
/// and has a usable swapchain against the surface.
///
/// Every enumerated candidate is logged with its verdict, whether or
/// not selection succeeds. No scoring among suitable devices.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: &Surface,
    required_extensions: &[&CStr],
) -> Result<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        log::error!("No Vulkan-capable devices reported by the driver");
        return Err(RenderError::NoSuitableDevice);
    }

    log::info!("Enumerating {} physical device(s):", devices.len());
    let mut selected: Option<SelectedDevice> = None;

    for physical_device in devices {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = device_name(&properties);

        let available = device_extension_names(instance, physical_device)?;
        let missing = missing_extensions(required_extensions, &available);
        if !missing.is_empty() {
            log::warn!("  {name}: rejected, missing extensions: {}", missing.join(", "));
            continue;
        }

        let family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let indices = find_queue_families(&family_properties, |index| {
            surface.supports_present(physical_device, index)
        })?;
        let Some(families) = indices.complete() else {
            log::warn!("  {name}: rejected, no graphics/present queue families");
            continue;
        };

        let support = SwapchainSupportDetails::query(surface, physical_device)?;
        if !support.is_adequate() {
            log::warn!("  {name}: rejected, no surface formats or present modes");
            continue;
        }

        if selected.is_none() {
            log::info!(
                "  {name}: suitable (graphics family {}, present family {})",
                families.graphics,
                families.present
            );
            selected = Some(SelectedDevice {
                physical_device,
                properties,
                families,
            });
        } else {
            log::info!("  {name}: suitable, not selected (first match wins)");
        }
    }

    selected.ok_or(RenderError::NoSuitableDevice)
}

/// Create the logical device with exactly the required extensions and
/// a deduplicated set of queue-create requests, then fetch the
/// graphics and present queues (which may be the same handle).
pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
    required_extensions: &[&CStr],
) -> Result<(ash::Device, vk::Queue, vk::Queue)> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = selected
        .families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let extension_ptrs: Vec<*const std::os::raw::c_char> =
        required_extensions.iter().map(|ext| ext.as_ptr()).collect();
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_ptrs)
        .enabled_features(&features);

    let device = unsafe { instance.create_device(selected.physical_device, &create_info, None) }
        .map_err(RenderError::DeviceCreation)?;

    let graphics_queue = unsafe { device.get_device_queue(selected.families.graphics, 0) };
    let present_queue = unsafe { device.get_device_queue(selected.families.present, 0) };

    Ok((device, graphics_queue, present_queue))
}

/// Vulkan device wrapper with automatic cleanup.
pub struct RenderDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub families: QueueFamilies,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
}

impl RenderDevice {
    /// Create the instance, surface, and logical device.
    ///
    /// The surface is returned separately so the caller controls its
    /// lifetime relative to the swapchain; it must be dropped before
    /// the device (which owns the instance).
    pub fn new(
        window: &winit::window::Window,
        app_name: &str,
        enable_validation: bool,
    ) -> Result<(Arc<Self>, Surface)> {
        log::info!("Creating Vulkan device: {app_name}");

        let entry = unsafe { Entry::load() }
            .map_err(|e| RenderError::Init(format!("failed to load Vulkan library: {e}")))?;

        let validation = enable_validation && validation_layer_available(&entry);
        if enable_validation && !validation {
            log::warn!("Validation layers requested but not available");
        }

        let instance = Self::create_instance(&entry, window, app_name, validation)?;

        let debug_utils = if validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let surface = Surface::new(&entry, &instance, window)?;

        let required = required_device_extensions();
        let selected = select_physical_device(&instance, &surface, &required)?;
        let (device, graphics_queue, present_queue) =
            create_logical_device(&instance, &selected, &required)?;

        log::info!("Selected GPU: {}", device_name(&selected.properties));
        log::info!(
            "API version: {}.{}.{}",
            vk::api_version_major(selected.properties.api_version),
            vk::api_version_minor(selected.properties.api_version),
            vk::api_version_patch(selected.properties.api_version)
        );

        Ok((
            Arc::new(Self {
                device,
                physical_device: selected.physical_device,
                instance,
                _entry: entry,
                graphics_queue,
                present_queue,
                families: selected.families,
                debug_utils,
                properties: selected.properties,
            }),
            surface,
        ))
    }

    fn create_instance(
        entry: &Entry,
        window: &winit::window::Window,
        app_name: &str,
        validation: bool,
    ) -> Result<ash::Instance> {
        use raw_window_handle::HasRawDisplayHandle;

        let app_name = CString::new(app_name)
            .map_err(|_| RenderError::Init("application name contains NUL".into()))?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"glint")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_0);

        let mut extensions =
            ash_window::enumerate_required_extensions(window.raw_display_handle())?.to_vec();
        if validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layers = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| RenderError::Init(format!("failed to create instance: {e}")))?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    /// Wait for all outstanding GPU work. Required before destroying
    /// or rebuilding anything that in-flight work may reference.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for RenderDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device");

        let _ = self.wait_idle();

        // Reverse creation order
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

fn validation_layer_available(entry: &Entry) -> bool {
    let layers = entry.enumerate_instance_layer_properties().unwrap_or_default();
    layers
        .iter()
        .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER)
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(queue_count: u32, flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count,
            ..Default::default()
        }
    }

    #[test]
    fn finds_combined_graphics_present_family() {
        let families = [family(1, vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();

        assert!(indices.is_complete());
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
    }

    #[test]
    fn finds_split_families() {
        // Family 0 is compute-only but can present; family 1 does graphics.
        let families = [
            family(1, vk::QueueFlags::COMPUTE),
            family(1, vk::QueueFlags::GRAPHICS),
        ];
        let indices = find_queue_families(&families, |index| Ok(index == 0)).unwrap();

        let complete = indices.complete().unwrap();
        assert_eq!(complete.graphics, 1);
        assert_eq!(complete.present, 0);
        assert_eq!(complete.unique(), vec![1, 0]);
    }

    #[test]
    fn incomplete_when_nothing_qualifies() {
        let families = [family(1, vk::QueueFlags::TRANSFER)];
        let indices = find_queue_families(&families, |_| Ok(false)).unwrap();

        assert!(!indices.is_complete());
        assert_eq!(indices.complete(), None);
    }

    #[test]
    fn first_matching_family_wins() {
        let families = [
            family(1, vk::QueueFlags::GRAPHICS),
            family(1, vk::QueueFlags::GRAPHICS),
        ];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
    }

    #[test]
    fn zero_queue_family_is_not_a_graphics_candidate() {
        let families = [
            family(0, vk::QueueFlags::GRAPHICS),
            family(1, vk::QueueFlags::GRAPHICS),
        ];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();

        assert_eq!(indices.graphics, Some(1));
    }

    #[test]
    fn extension_subset_reports_nothing_missing() {
        let available = vec![
            "VK_KHR_swapchain".to_string(),
            "VK_KHR_maintenance1".to_string(),
        ];
        let missing = missing_extensions(&[c"VK_KHR_swapchain"], &available);
        assert!(missing.is_empty());
    }

    #[test]
    fn missing_extensions_is_exact_set_difference() {
        let available = vec!["VK_KHR_maintenance1".to_string()];
        let missing = missing_extensions(
            &[c"VK_KHR_swapchain", c"VK_KHR_maintenance1", c"VK_EXT_mesh_shader"],
            &available,
        );
        assert_eq!(
            missing,
            vec!["VK_EXT_mesh_shader".to_string(), "VK_KHR_swapchain".to_string()]
        );
    }

    #[test]
    fn same_family_deduplicates_queue_requests() {
        let families = QueueFamilies { graphics: 2, present: 2 };
        assert_eq!(families.unique(), vec![2]);
    }
}
