// Renderer - steady-state frame loop and resource ownership root
//
// Owns every handle derived from the device and drives the per-frame
// acquire -> submit -> present sequence with N frames in flight.
//
// Field order matters: drop runs in declaration order, which must be
// the reverse of creation (frames/commands/swapchain before surface,
// surface before the device that owns the instance).

use super::commands::Commands;
use super::device::RenderDevice;
use super::error::{RenderError, Result};
use super::surface::Surface;
use super::swapchain::Swapchain;
use super::sync::{FrameSchedule, FrameSync};
use crate::config::Config;
use ash::vk;
use std::sync::Arc;
use winit::window::Window;

pub struct Renderer {
    frames: Vec<FrameSync>,
    schedule: FrameSchedule,
    commands: Commands,
    // None only between teardown and rebuild of a stale chain.
    swapchain: Option<Swapchain>,
    surface: Surface,
    device: Arc<RenderDevice>,

    wait_stages: [vk::PipelineStageFlags; 1],
    clear_color: [f32; 4],
    window_extent: (u32, u32),
    needs_rebuild: bool,
    minimized: bool,
}

impl Renderer {
    /// Build the full chain: device and queues, swapchain and views,
    /// per-image command buffers, and one sync slot per frame in
    /// flight.
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let (device, surface) = RenderDevice::new(window, &config.window.title, enable_validation)?;

        let size = window.inner_size();
        let swapchain = Swapchain::new(device.clone(), &surface, size.width, size.height)?;

        let mut commands = Commands::new(device.clone())?;
        commands.rebuild(&swapchain, config.graphics.clear_color)?;

        let slots = config.graphics.max_frames_in_flight.max(1);
        let frames = (0..slots)
            .map(|_| FrameSync::new(&device))
            .collect::<Result<Vec<_>>>()?;

        log::info!("Renderer ready: {slots} frame(s) in flight");

        Ok(Self {
            frames,
            schedule: FrameSchedule::new(slots),
            commands,
            swapchain: Some(swapchain),
            surface,
            device,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            clear_color: config.graphics.clear_color,
            window_extent: (size.width, size.height),
            needs_rebuild: false,
            minimized: size.width == 0 || size.height == 0,
        })
    }

    /// Note a window size change. A zero extent means minimized, which
    /// suspends rendering instead of rebuilding.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.window_extent = (width, height);
        self.minimized = width == 0 || height == 0;
        if !self.minimized {
            self.needs_rebuild = true;
        }
    }

    /// One full frame iteration: fence wait, acquire, submit, present,
    /// slot advance.
    ///
    /// A stale surface surfaces as the recoverable `SurfaceOutOfDate`;
    /// the swapchain is rebuilt at the start of the next call. Any
    /// other driver status is fatal and must terminate the loop.
    pub fn render_frame(&mut self) -> Result<()> {
        if self.minimized {
            return Ok(());
        }
        if self.needs_rebuild || self.swapchain.is_none() {
            self.recreate_swapchain()?;
        }
        let Some(swapchain) = self.swapchain.as_ref() else {
            return Ok(());
        };

        let slot = self.schedule.current();
        let (image_available, render_finished, in_flight) = {
            let sync = &self.frames[slot];
            (sync.image_available, sync.render_finished, sync.in_flight)
        };

        // 1. Wait: the sole blocking point. Bounds in-flight frames to
        // the slot count so the CPU never touches a command buffer the
        // GPU is still consuming.
        unsafe {
            self.device
                .device
                .wait_for_fences(&[in_flight], true, u64::MAX)?;
        }
        self.schedule.reclaim();
        let began = self.schedule.begin();
        debug_assert!(began, "frame slot reused before fence confirmation");

        // 2. Acquire. The index is usable immediately; the image is
        // only safe once image_available signals. The fence is still
        // signaled here, so an out-of-date exit cannot deadlock the
        // next wait.
        let (image_index, suboptimal) = match swapchain.acquire_next_image(image_available) {
            Ok(pair) => pair,
            Err(e @ RenderError::SurfaceOutOfDate) => {
                self.schedule.abort();
                self.needs_rebuild = true;
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        if suboptimal {
            self.needs_rebuild = true;
        }

        // 3. Reset the fence now that this slot will be resubmitted.
        unsafe {
            self.device.device.reset_fences(&[in_flight])?;
        }

        // 4. Submit, gated on image_available at the color-attachment
        // stage; signals render_finished and the slot fence.
        let wait_semaphores = [image_available];
        let signal_semaphores = [render_finished];
        let command_buffers = [self.commands.buffer(image_index as usize)];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                in_flight,
            )?;
        }
        self.schedule.submitted();

        // 5. Present, gated on render_finished.
        let presented =
            swapchain.present(self.device.present_queue, image_index, &signal_semaphores);
        self.schedule.presented();

        match presented {
            Ok(suboptimal) => {
                if suboptimal {
                    self.needs_rebuild = true;
                }
            }
            Err(e @ RenderError::SurfaceOutOfDate) => {
                // The submission already owns the slot fence, so the
                // rotation still advances.
                self.needs_rebuild = true;
                self.schedule.advance();
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        // 6. Advance to the next slot.
        self.schedule.advance();

        Ok(())
    }

    /// Tear down and rebuild the swapchain and its dependent per-image
    /// objects after a resize or surface loss.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        let (width, height) = self.window_extent;
        if width == 0 || height == 0 {
            self.minimized = true;
            return Ok(());
        }

        log::info!("Rebuilding swapchain: {width}x{height}");
        self.device.wait_idle()?;

        // The surface backs at most one swapchain at a time, so the
        // old chain goes before the new one is created.
        self.swapchain = None;

        let swapchain = Swapchain::new(self.device.clone(), &self.surface, width, height)?;
        self.commands.rebuild(&swapchain, self.clear_color)?;

        self.swapchain = Some(swapchain);
        self.needs_rebuild = false;
        Ok(())
    }

    /// Wait for the device to idle and release everything in reverse
    /// creation order.
    pub fn shutdown(self) {
        log::info!("Shutting down renderer");
        // Drop does the rest.
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Idle guard before any owned object is destroyed.
        let _ = self.device.wait_idle();
    }
}
