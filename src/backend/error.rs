// Error taxonomy for the rendering backend
//
// Initialization failures are fatal. Per-frame failures split into
// recoverable (surface stale, rebuild the swapchain and retry) and
// fatal (any other driver status).

use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    /// The Vulkan library or a window-system handle was unavailable
    /// during setup.
    #[error("initialization failed: {0}")]
    Init(String),

    /// No enumerated device passed the queue/extension/swapchain checks.
    #[error("no suitable GPU found")]
    NoSuitableDevice,

    /// The driver rejected logical device creation.
    #[error("logical device creation failed: {0}")]
    DeviceCreation(vk::Result),

    /// The driver rejected swapchain or image view creation.
    #[error("swapchain creation failed: {0}")]
    SwapchainCreation(vk::Result),

    /// Acquire or present reported the surface is stale (e.g. after a
    /// resize). The caller must rebuild the swapchain and dependent
    /// per-image objects, then retry.
    #[error("surface out of date, swapchain must be rebuilt")]
    SurfaceOutOfDate,

    /// Any other unexpected driver status.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),
}

impl RenderError {
    /// Whether the condition is handled by rebuilding the swapchain
    /// rather than terminating.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::SurfaceOutOfDate)
    }
}

pub type Result<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_surface_out_of_date_is_recoverable() {
        assert!(RenderError::SurfaceOutOfDate.is_recoverable());
        assert!(!RenderError::NoSuitableDevice.is_recoverable());
        assert!(!RenderError::DeviceCreation(vk::Result::ERROR_INITIALIZATION_FAILED).is_recoverable());
        assert!(!RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_recoverable());
    }
}
