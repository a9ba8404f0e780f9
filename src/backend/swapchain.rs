// Swapchain - Window presentation
//
// Negotiates format, present mode, and extent from the queried surface
// support, then owns the image chain and its per-image views. The
// selection policies are pure functions so they can be tested without
// a device.

use super::device::{QueueFamilies, RenderDevice};
use super::error::{RenderError, Result};
use super::surface::Surface;
use ash::vk;
use std::sync::Arc;

/// Preferred fallback when the surface expresses no preference.
const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Everything the device+surface pairing reports about swapchains.
/// Recomputed whenever either changes; never mutated in place.
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(surface: &Surface, physical_device: vk::PhysicalDevice) -> Result<Self> {
        let capabilities = unsafe {
            surface
                .loader
                .get_physical_device_surface_capabilities(physical_device, surface.handle)
        }?;
        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical_device, surface.handle)
        }?;
        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical_device, surface.handle)
        }?;

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// An empty format or present-mode list means no swapchain can be
    /// built on this device+surface pairing.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Prefer 8-bit BGRA with sRGB non-linear color space; otherwise the
/// first entry of the ordered list. A single UNDEFINED entry means the
/// driver has no preference, so the preferred default applies outright.
pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    if available.len() == 1 && available[0].format == vk::Format::UNDEFINED {
        return PREFERRED_FORMAT;
    }

    available
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space
        })
        .or_else(|| available.first().copied())
        .unwrap_or(PREFERRED_FORMAT)
}

/// Prefer MAILBOX (low-latency triple buffering), falling back to
/// FIFO, which the API guarantees is always available.
pub fn choose_present_mode(available: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if available.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// Use the capability's fixed extent verbatim unless it carries the
/// "match window" sentinel, in which case the window size is clamped
/// component-wise into the reported min/max range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

/// One more than the minimum, clamped by the maximum when the device
/// declares one (zero means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        count = capabilities.max_image_count;
    }
    count
}

/// Concurrent sharing across both families when graphics and present
/// differ; exclusive otherwise, avoiding ownership-transfer barriers
/// where one family suffices.
pub fn sharing_mode(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.graphics == families.present {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<RenderDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<RenderDevice>,
        surface: &Surface,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let support = SwapchainSupportDetails::query(surface, device.physical_device)?;

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);
        let (sharing, family_indices) = sharing_mode(&device.families);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count
        );

        let loader = ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let mut create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(sharing)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);
        if !family_indices.is_empty() {
            create_info = create_info.queue_family_indices(&family_indices);
        }

        let swapchain = unsafe { loader.create_swapchain(&create_info, None) }
            .map_err(RenderError::SwapchainCreation)?;

        // The runtime owns the images; this component owns the views.
        let images = unsafe { loader.get_swapchain_images(swapchain) }?;

        let image_views = images
            .iter()
            .map(|&image| {
                let view_info = vk::ImageViewCreateInfo::builder()
                    .image(image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(surface_format.format)
                    .components(vk::ComponentMapping {
                        r: vk::ComponentSwizzle::IDENTITY,
                        g: vk::ComponentSwizzle::IDENTITY,
                        b: vk::ComponentSwizzle::IDENTITY,
                        a: vk::ComponentSwizzle::IDENTITY,
                    })
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });

                unsafe { device.device.create_image_view(&view_info, None) }
                    .map_err(RenderError::SwapchainCreation)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            swapchain,
            loader,
            images,
            image_views,
            format: surface_format.format,
            extent,
            device,
        })
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Request the next presentable image. The returned index is valid
    /// immediately; the image itself is only safe to write once the
    /// passed semaphore signals.
    ///
    /// The bool reports the suboptimal condition; a stale surface is
    /// the recoverable `SurfaceOutOfDate` error.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool)> {
        let result = unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok(pair) => Ok(pair),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SurfaceOutOfDate),
            Err(e) => Err(RenderError::Vulkan(e)),
        }
    }

    /// Queue a present request, waiting on the given semaphores before
    /// the image is displayed.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SurfaceOutOfDate),
            Err(e) => Err(RenderError::Vulkan(e)),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(
        min_count: u32,
        max_count: u32,
        current: (u32, u32),
        min_extent: (u32, u32),
        max_extent: (u32, u32),
    ) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_count,
            max_image_count: max_count,
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min_extent.0, height: min_extent.1 },
            max_image_extent: vk::Extent2D { width: max_extent.0, height: max_extent.1 },
            ..Default::default()
        }
    }

    #[test]
    fn format_first_entry_when_no_preferred_match() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R5G6B5_UNORM_PACK16, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&available);
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn format_preferred_entry_wins_at_any_position() {
        let available = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&available);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn format_undefined_means_driver_has_no_preference() {
        let available = [format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let chosen = choose_surface_format(&available);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn present_mode_prefers_mailbox_anywhere() {
        let available = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&available), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_present_mode(&available), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_sentinel_uses_window_size() {
        let caps = caps(2, 0, (u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 1024, 768);
        assert_eq!((extent.width, extent.height), (1024, 768));
    }

    #[test]
    fn extent_sentinel_clamps_to_capability_range() {
        let caps = caps(2, 0, (u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 8000, 8000);
        assert_eq!((extent.width, extent.height), (4096, 4096));
    }

    #[test]
    fn fixed_extent_is_used_verbatim() {
        let caps = caps(2, 0, (800, 600), (1, 1), (4096, 4096));
        let extent = choose_extent(&caps, 1024, 768);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn image_count_is_min_plus_one() {
        assert_eq!(choose_image_count(&caps(2, 8, (800, 600), (1, 1), (800, 600))), 3);
    }

    #[test]
    fn image_count_clamps_to_declared_max() {
        assert_eq!(choose_image_count(&caps(3, 3, (800, 600), (1, 1), (800, 600))), 3);
    }

    #[test]
    fn image_count_unbounded_when_max_is_zero() {
        assert_eq!(choose_image_count(&caps(7, 0, (800, 600), (1, 1), (800, 600))), 8);
    }

    #[test]
    fn sharing_exclusive_for_single_family() {
        let (mode, indices) = sharing_mode(&QueueFamilies { graphics: 0, present: 0 });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());
    }

    #[test]
    fn sharing_concurrent_across_distinct_families() {
        let (mode, indices) = sharing_mode(&QueueFamilies { graphics: 0, present: 2 });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![0, 2]);
    }

    // The fake-device path: one family with graphics and present, one
    // format, FIFO only. Selection logic must accept it and size the
    // chain to min + 1 within the declared bounds.
    #[test]
    fn single_family_device_is_usable_end_to_end() {
        use super::super::device::find_queue_families;

        let families = [vk::QueueFamilyProperties {
            queue_flags: vk::QueueFlags::GRAPHICS,
            queue_count: 1,
            ..Default::default()
        }];
        let indices = find_queue_families(&families, |_| Ok(true)).unwrap();
        let complete = indices.complete().unwrap();

        let support = SwapchainSupportDetails {
            capabilities: caps(2, 3, (640, 480), (1, 1), (640, 480)),
            formats: vec![format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(support.is_adequate());

        assert_eq!(choose_image_count(&support.capabilities), 3);
        assert_eq!(choose_present_mode(&support.present_modes), vk::PresentModeKHR::FIFO);
        let (mode, _) = sharing_mode(&complete);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    fn empty_support_is_not_adequate() {
        let support = SwapchainSupportDetails {
            capabilities: caps(2, 3, (640, 480), (1, 1), (640, 480)),
            formats: vec![],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        };
        assert!(!support.is_adequate());
    }
}
