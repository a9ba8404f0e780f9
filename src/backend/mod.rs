// Backend module - Vulkan abstraction layer
//
// Device selection, swapchain negotiation, and frame pacing over ash.

pub mod commands;
pub mod device;
pub mod error;
pub mod renderer;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::RenderDevice;
pub use error::RenderError;
pub use renderer::Renderer;
pub use swapchain::Swapchain;
