// Presentation surface bound to the native window
//
// Thin RAII wrapper; created through ash-window so it works on any
// platform winit supports.

use super::error::Result;
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use winit::window::Window;

pub struct Surface {
    pub loader: ash::extensions::khr::Surface,
    pub handle: vk::SurfaceKHR,
}

impl Surface {
    pub fn new(entry: &Entry, instance: &ash::Instance, window: &Window) -> Result<Self> {
        let handle = unsafe {
            ash_window::create_surface(
                entry,
                instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }?;
        let loader = ash::extensions::khr::Surface::new(entry, instance);

        Ok(Self { loader, handle })
    }

    /// Whether the given queue family can present to this surface.
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> ash::prelude::VkResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.handle)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // The instance must still be alive here; the renderer drops the
        // surface before the device that owns the instance.
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
