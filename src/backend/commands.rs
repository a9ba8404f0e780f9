// Command pool and pre-recorded per-image command buffers
//
// One primary command buffer per swapchain image, recorded once and
// resubmitted every frame. Rebuilt together with the swapchain since
// the buffers reference its images.

use super::device::RenderDevice;
use super::error::Result;
use super::swapchain::Swapchain;
use ash::vk;
use std::sync::Arc;

pub struct Commands {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: Arc<RenderDevice>,
}

impl Commands {
    pub fn new(device: Arc<RenderDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.families.graphics);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }?;

        Ok(Self {
            pool,
            buffers: Vec::new(),
            device,
        })
    }

    /// The pre-recorded buffer bound to a swapchain image index.
    pub fn buffer(&self, image_index: usize) -> vk::CommandBuffer {
        self.buffers[image_index]
    }

    /// Free any previous buffers, allocate one per swapchain image,
    /// and record the clear sequence into each. Callers must ensure no
    /// old buffer is still in flight (device idle before rebuild).
    pub fn rebuild(&mut self, swapchain: &Swapchain, clear_color: [f32; 4]) -> Result<()> {
        if !self.buffers.is_empty() {
            unsafe {
                self.device.device.free_command_buffers(self.pool, &self.buffers);
            }
            self.buffers.clear();
        }

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(swapchain.image_count() as u32);

        let buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }?;
        self.record_clear(&buffers, swapchain, clear_color)?;

        log::info!("Recorded {} command buffer(s)", buffers.len());
        self.buffers = buffers;

        Ok(())
    }

    /// Clear each image to the configured color: transition to
    /// TRANSFER_DST, clear, transition to PRESENT_SRC.
    fn record_clear(
        &self,
        buffers: &[vk::CommandBuffer],
        swapchain: &Swapchain,
        clear_color: [f32; 4],
    ) -> Result<()> {
        let device = &self.device.device;
        let clear_value = vk::ClearColorValue { float32: clear_color };

        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        for (i, &cmd) in buffers.iter().enumerate() {
            let image = swapchain.images[i];

            unsafe {
                let begin_info = vk::CommandBufferBeginInfo::builder();
                device.begin_command_buffer(cmd, &begin_info)?;

                let barrier_to_transfer = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::empty())
                    .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .old_layout(vk::ImageLayout::UNDEFINED)
                    .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(subresource_range)
                    .build();

                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TOP_OF_PIPE,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier_to_transfer],
                );

                device.cmd_clear_color_image(
                    cmd,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &clear_value,
                    &[subresource_range],
                );

                let barrier_to_present = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                    .dst_access_mask(vk::AccessFlags::empty())
                    .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(subresource_range)
                    .build();

                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier_to_present],
                );

                device.end_command_buffer(cmd)?;
            }
        }

        Ok(())
    }
}

impl Drop for Commands {
    fn drop(&mut self) {
        // Destroying the pool frees its buffers.
        unsafe {
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
