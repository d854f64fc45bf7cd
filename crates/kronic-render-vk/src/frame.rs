// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;

pub(crate) const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Per frame-in-flight objects, indexed by the renderer's frame counter.
#[derive(Clone, Copy)]
pub(crate) struct FrameSync {
    pub image_available: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub(crate) unsafe fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    views: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(views.len());
    for view in views {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        match device.create_framebuffer(&fb_info, None) {
            Ok(fb) => framebuffers.push(fb),
            Err(e) => {
                destroy_framebuffers(device, &framebuffers);
                return Err(e).context("create_framebuffer");
            }
        }
    }
    Ok(framebuffers)
}

pub(crate) unsafe fn destroy_framebuffers(device: &ash::Device, framebuffers: &[vk::Framebuffer]) {
    for &fb in framebuffers {
        device.destroy_framebuffer(fb, None);
    }
}

pub(crate) struct CommandResources {
    pub pool: vk::CommandPool,
    pub bufs: Vec<vk::CommandBuffer>,
}

pub(crate) unsafe fn create_command_resources(
    device: &ash::Device,
    queue_family: u32,
    count: usize,
) -> Result<CommandResources> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
        ..Default::default()
    };
    let pool = device
        .create_command_pool(&pool_info, None)
        .context("create_command_pool")?;
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool: pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: count as u32,
        ..Default::default()
    };
    let bufs = match device.allocate_command_buffers(&alloc_info) {
        Ok(b) => b,
        Err(e) => {
            device.destroy_command_pool(pool, None);
            return Err(e).context("allocate_command_buffers");
        }
    };
    Ok(CommandResources { pool, bufs })
}

pub(crate) unsafe fn create_frame_sync(device: &ash::Device) -> Result<Vec<FrameSync>> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    // Signalled so the very first wait on each slot returns immediately.
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };

    let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for _ in 0..MAX_FRAMES_IN_FLIGHT {
        let image_available = match device.create_semaphore(&sem_ci, None) {
            Ok(s) => s,
            Err(e) => {
                destroy_frame_sync(device, &frames);
                return Err(e).context("create_semaphore(image_available)");
            }
        };
        let in_flight = match device.create_fence(&fence_ci, None) {
            Ok(f) => f,
            Err(e) => {
                device.destroy_semaphore(image_available, None);
                destroy_frame_sync(device, &frames);
                return Err(e).context("create_fence(in_flight)");
            }
        };
        frames.push(FrameSync {
            image_available,
            in_flight,
        });
    }
    Ok(frames)
}

pub(crate) unsafe fn destroy_frame_sync(device: &ash::Device, frames: &[FrameSync]) {
    for f in frames {
        device.destroy_fence(f.in_flight, None);
        device.destroy_semaphore(f.image_available, None);
    }
}

/// One render-finished semaphore per swapchain image; present may still be
/// reading it when the next frame in flight starts.
pub(crate) unsafe fn create_render_finished(
    device: &ash::Device,
    image_count: usize,
) -> Result<Vec<vk::Semaphore>> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    let mut sems = Vec::with_capacity(image_count);
    for _ in 0..image_count {
        match device.create_semaphore(&sem_ci, None) {
            Ok(s) => sems.push(s),
            Err(e) => {
                destroy_semaphores(device, &sems);
                return Err(e).context("create_semaphore(render_finished)");
            }
        }
    }
    Ok(sems)
}

pub(crate) unsafe fn destroy_semaphores(device: &ash::Device, sems: &[vk::Semaphore]) {
    for &s in sems {
        device.destroy_semaphore(s, None);
    }
}

pub(crate) fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub(crate) fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

pub(crate) struct RecordTarget {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear: vk::ClearValue,
}

pub(crate) unsafe fn record_triangle(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &RecordTarget,
) -> Result<()> {
    device
        .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
        .context("reset_command_buffer")?;
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &begin)
        .context("begin_command_buffer")?;

    let clears = [target.clear];
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass: target.render_pass,
        framebuffer: target.framebuffer,
        render_area: full_scissor(target.extent),
        clear_value_count: clears.len() as u32,
        p_clear_values: clears.as_ptr(),
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, target.pipeline);
    device.cmd_set_viewport(cmd, 0, &[full_viewport(target.extent)]);
    device.cmd_set_scissor(cmd, 0, &[full_scissor(target.extent)]);
    device.cmd_set_line_width(cmd, 1.0);
    device.cmd_draw(cmd, 3, 1, 0, 0);

    device.cmd_end_render_pass(cmd);
    device
        .end_command_buffer(cmd)
        .context("end_command_buffer")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewport_covers_extent_with_unit_depth() {
        let vp = full_viewport(vk::Extent2D { width: 800, height: 600 });
        assert_eq!((vp.x, vp.y), (0.0, 0.0));
        assert_eq!((vp.width, vp.height), (800.0, 600.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
    }

    #[test]
    fn scissor_starts_at_origin() {
        let sc = full_scissor(vk::Extent2D { width: 640, height: 480 });
        assert_eq!((sc.offset.x, sc.offset.y), (0, 0));
        assert_eq!((sc.extent.width, sc.extent.height), (640, 480));
    }
}
