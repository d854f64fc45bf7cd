// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: a single-pipeline renderer that clears the swapchain image
//! and draws one triangle per frame.

use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::{vk, Entry, Instance};
use kronic_render::{RenderConfig, RenderSize, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, info};

mod device;
mod error;
mod frame;
mod instance;
mod pipeline;
mod swapchain;

pub use error::SetupError;

use device::QueueFamilies;
use frame::{FrameSync, RecordTarget, MAX_FRAMES_IN_FLIGHT};
use instance::DebugMessenger;
use pipeline::PassObjects;
use swapchain::SwapchainBundle;

/// Instance-level objects. Handles start null and are filled in as set-up
/// proceeds, so a failed build tears down exactly what exists.
struct InstanceObjects {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl Drop for InstanceObjects {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

/// The logical device and everything created from it. Same rule as
/// `InstanceObjects`: null or empty until created.
struct DeviceObjects {
    device: ash::Device,
    swapchain_loader: khr_swapchain::Device,
    swapchain: vk::SwapchainKHR,
    image_views: Vec<vk::ImageView>,
    pass: PassObjects,
    framebuffers: Vec<vk::Framebuffer>,
    cmd_pool: vk::CommandPool,
    frames: Vec<FrameSync>,
    render_finished: Vec<vk::Semaphore>,
}

impl DeviceObjects {
    fn new(instance: &Instance, device: ash::Device) -> Self {
        let swapchain_loader = khr_swapchain::Device::new(instance, &device);
        Self {
            device,
            swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            image_views: Vec::new(),
            pass: PassObjects::default(),
            framebuffers: Vec::new(),
            cmd_pool: vk::CommandPool::null(),
            frames: Vec::new(),
            render_finished: Vec::new(),
        }
    }
}

// STRICT TEARDOWN ORDER:
// 1) device idle
// 2) sync objects, command pool (frees its buffers)
// 3) framebuffers, pipeline, pipeline layout, render pass
// 4) image views, swapchain, device
// 5) InstanceObjects: debug messenger, surface, instance
impl Drop for DeviceObjects {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            d.device_wait_idle().ok();

            frame::destroy_frame_sync(d, &self.frames);
            frame::destroy_semaphores(d, &self.render_finished);
            d.destroy_command_pool(self.cmd_pool, None);

            frame::destroy_framebuffers(d, &self.framebuffers);
            self.pass.destroy(d);

            for &iv in &self.image_views {
                d.destroy_image_view(iv, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);

            d.destroy_device(None);
        }
    }
}

/// Framebuffers, semaphores and (on a format change) the pass built for a new
/// swapchain before any of the old objects are touched.
struct StagedSwapchain {
    pass: Option<PassObjects>,
    framebuffers: Vec<vk::Framebuffer>,
    render_finished: Vec<vk::Semaphore>,
}

pub struct VkRenderer {
    // Field order is drop order: device objects before the instance.
    dev: DeviceObjects,
    inst: InstanceObjects,

    phys: vk::PhysicalDevice,
    device_name: String,
    queues: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,

    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    cmd_bufs: Vec<vk::CommandBuffer>,
    frame_index: usize,

    clear: vk::ClearValue,
    vsync: bool,
    size: RenderSize,
    paused: bool,
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    config: &RenderConfig,
) -> Result<VkRenderer> {
    let dh = display
        .display_handle()
        .map_err(|e| anyhow!("display_handle: {e}"))?
        .as_raw();
    let wh = window
        .window_handle()
        .map_err(|e| anyhow!("window_handle: {e}"))?
        .as_raw();

    // 1) Instance, then the debug messenger and surface that hang off it
    let entry = Entry::linked();
    let instance = instance::create_instance(&entry, dh, &config.app_name, config.validation)?;
    let surface_loader = surface::Instance::new(&entry, &instance);
    let mut inst = InstanceObjects {
        entry,
        instance,
        debug: None,
        surface_loader,
        surface: vk::SurfaceKHR::null(),
    };
    if config.validation {
        inst.debug = Some(DebugMessenger::new(&inst.entry, &inst.instance)?);
    }
    inst.surface = ash_window::create_surface(&inst.entry, &inst.instance, dh, wh, None)
        .context("ash_window::create_surface")?;

    // 2) Physical device scored against THIS surface, then the logical device
    let choice = device::pick_physical_device(&inst.instance, &inst.surface_loader, inst.surface)?;
    let logical = device::create_logical_device(
        &inst.instance,
        choice.phys,
        choice.queues,
        config.validation,
    )?;
    let mut dev = DeviceObjects::new(&inst.instance, logical.device);

    // 3) Swapchain + views
    let SwapchainBundle {
        swapchain,
        format,
        extent,
        images,
        image_views,
    } = swapchain::create_swapchain_bundle(
        &dev.device,
        &inst.surface_loader,
        &dev.swapchain_loader,
        choice.phys,
        inst.surface,
        choice.queues,
        vk::SwapchainKHR::null(),
        size,
        config.vsync,
    )?;
    dev.swapchain = swapchain;
    dev.image_views = image_views;

    // 4) Render pass, pipeline, framebuffers (format/extent dependent)
    dev.pass = PassObjects::create(&dev.device, format)?;
    dev.framebuffers =
        frame::create_framebuffers(&dev.device, dev.pass.render_pass, &dev.image_views, extent)?;

    // 5) Commands + sync
    let cmd = frame::create_command_resources(
        &dev.device,
        choice.queues.graphics,
        MAX_FRAMES_IN_FLIGHT,
    )?;
    dev.cmd_pool = cmd.pool;
    dev.frames = frame::create_frame_sync(&dev.device)?;
    dev.render_finished = frame::create_render_finished(&dev.device, images.len())?;

    Ok(VkRenderer {
        dev,
        inst,

        phys: choice.phys,
        device_name: choice.name,
        queues: choice.queues,
        graphics_queue: logical.graphics_queue,
        present_queue: logical.present_queue,

        format,
        extent,
        images,
        cmd_bufs: cmd.bufs,
        frame_index: 0,

        clear: clear_value(config.clear_color),
        vsync: config.vsync,
        size,
        paused: size.is_empty(),
    })
}

fn clear_value(rgba: [f32; 4]) -> vk::ClearValue {
    vk::ClearValue {
        color: vk::ClearColorValue { float32: rgba },
    }
}

impl VkRenderer {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    // ORDER (recreate):
    // 1) device idle, nothing may still reference the old images
    // 2) new swapchain from the old one, then its pass/framebuffers/semaphores
    //    are staged; on any failure the staged objects go and the old set stays
    // 3) only then the old views/framebuffers/semaphores/swapchain are destroyed
    unsafe fn recreate_swapchain(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            return Ok(());
        }

        self.dev
            .device
            .device_wait_idle()
            .context("device_wait_idle(recreate)")?;

        let bundle = swapchain::create_swapchain_bundle(
            &self.dev.device,
            &self.inst.surface_loader,
            &self.dev.swapchain_loader,
            self.phys,
            self.inst.surface,
            self.queues,
            self.dev.swapchain,
            size,
            self.vsync,
        )?;

        let staged = match self.stage_swapchain(&bundle) {
            Ok(s) => s,
            Err(e) => {
                bundle.destroy(&self.dev.device, &self.dev.swapchain_loader);
                return Err(e);
            }
        };

        // Nothing below can fail.
        let d = &mut self.dev;
        frame::destroy_framebuffers(&d.device, &d.framebuffers);
        frame::destroy_semaphores(&d.device, &d.render_finished);
        for &iv in &d.image_views {
            d.device.destroy_image_view(iv, None);
        }
        d.swapchain_loader.destroy_swapchain(d.swapchain, None);

        if let Some(pass) = staged.pass {
            debug!("vk: surface format changed, rebuilt render pass + pipeline");
            d.pass.destroy(&d.device);
            d.pass = pass;
        }
        d.swapchain = bundle.swapchain;
        d.image_views = bundle.image_views;
        d.framebuffers = staged.framebuffers;
        d.render_finished = staged.render_finished;

        self.format = bundle.format;
        self.extent = bundle.extent;
        self.images = bundle.images;
        self.size = size;
        Ok(())
    }

    unsafe fn stage_swapchain(&self, sc: &SwapchainBundle) -> Result<StagedSwapchain> {
        let device = &self.dev.device;
        let pass = if pipeline::pass_outdated(self.format, sc.format) {
            Some(PassObjects::create(device, sc.format)?)
        } else {
            None
        };
        let render_pass = pass.map_or(self.dev.pass.render_pass, |p| p.render_pass);

        let framebuffers =
            match frame::create_framebuffers(device, render_pass, &sc.image_views, sc.extent) {
                Ok(f) => f,
                Err(e) => {
                    if let Some(p) = &pass {
                        p.destroy(device);
                    }
                    return Err(e);
                }
            };

        let render_finished = match frame::create_render_finished(device, sc.images.len()) {
            Ok(s) => s,
            Err(e) => {
                frame::destroy_framebuffers(device, &framebuffers);
                if let Some(p) = &pass {
                    p.destroy(device);
                }
                return Err(e);
            }
        };

        Ok(StagedSwapchain {
            pass,
            framebuffers,
            render_finished,
        })
    }

    /// A minimized window reports a 0x0 surface; there is nothing to present into.
    unsafe fn surface_is_empty(&self) -> Result<bool> {
        let caps = self
            .inst
            .surface_loader
            .get_physical_device_surface_capabilities(self.phys, self.inst.surface)
            .context("get_physical_device_surface_capabilities")?;
        Ok(caps.current_extent.width == 0 || caps.current_extent.height == 0)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        config: &RenderConfig,
    ) -> Result<Self> {
        unsafe {
            let r = build_renderer(window, display, size, config)?;
            info!(
                "Vulkan swapchain ready on \"{}\" ({}x{}, {} images, fmt {:?})",
                r.device_name,
                r.extent.width,
                r.extent.height,
                r.images.len(),
                r.format
            );
            Ok(r)
        }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        if size.is_empty() {
            if !self.paused {
                info!("vk: resize to {}x{} -> paused=true", size.width, size.height);
            }
            self.paused = true;
            return Ok(());
        }

        if self.paused {
            info!("vk: resize to {}x{} -> paused=false", size.width, size.height);
        }
        self.paused = false;

        unsafe { self.recreate_swapchain(size) }
    }

    // STRICT PER-FRAME ORDER:
    // 1) wait for this slot's fence (its previous submit is done)
    // 2) acquire (signals image_available)
    // 3) record; reset the fence only once recording succeeded, right before submit
    // 4) submit (waits image_available, signals render_finished[image] + fence)
    // 5) present (waits render_finished[image])
    fn render(&mut self) -> Result<()> {
        if self.paused {
            return Ok(());
        }

        unsafe {
            if self.surface_is_empty()? {
                return Ok(());
            }

            let FrameSync {
                image_available,
                in_flight,
            } = self.dev.frames[self.frame_index];

            self.dev
                .device
                .wait_for_fences(&[in_flight], true, u64::MAX)
                .context("wait_for_fences(in_flight)")?;

            let image_index = match self.dev.swapchain_loader.acquire_next_image(
                self.dev.swapchain,
                u64::MAX,
                image_available,
                vk::Fence::null(),
            ) {
                Ok((index, _suboptimal)) => index,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    debug!("vk: acquire out of date, recreating swapchain");
                    return self.recreate_swapchain(self.size);
                }
                Err(e) => return Err(e).context("acquire_next_image"),
            };

            let cmd = self.cmd_bufs[self.frame_index];
            frame::record_triangle(
                &self.dev.device,
                cmd,
                &RecordTarget {
                    render_pass: self.dev.pass.render_pass,
                    framebuffer: self.dev.framebuffers[image_index as usize],
                    pipeline: self.dev.pass.pipeline,
                    extent: self.extent,
                    clear: self.clear,
                },
            )?;

            let render_finished = self.dev.render_finished[image_index as usize];
            let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
            let submit = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                wait_semaphore_count: 1,
                p_wait_semaphores: &image_available,
                p_wait_dst_stage_mask: wait_stages.as_ptr(),
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                signal_semaphore_count: 1,
                p_signal_semaphores: &render_finished,
                ..Default::default()
            };

            self.dev
                .device
                .reset_fences(&[in_flight])
                .context("reset_fences")?;
            self.dev
                .device
                .queue_submit(
                    self.graphics_queue,
                    std::slice::from_ref(&submit),
                    in_flight,
                )
                .context("queue_submit")?;

            let present = vk::PresentInfoKHR {
                s_type: vk::StructureType::PRESENT_INFO_KHR,
                wait_semaphore_count: 1,
                p_wait_semaphores: &render_finished,
                swapchain_count: 1,
                p_swapchains: &self.dev.swapchain,
                p_image_indices: &image_index,
                ..Default::default()
            };

            self.frame_index = (self.frame_index + 1) % MAX_FRAMES_IN_FLIGHT;

            match self
                .dev
                .swapchain_loader
                .queue_present(self.present_queue, &present)
            {
                Ok(false) => Ok(()),
                Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    debug!("vk: present suboptimal/out of date, recreating swapchain");
                    self.recreate_swapchain(self.size)
                }
                Err(e) => Err(e).context("queue_present"),
            }
        }
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        // Command buffers are re-recorded every frame, so this lands on the next one.
        self.clear = clear_value(rgba);
    }

    fn set_vsync(&mut self, on: bool) {
        if self.vsync == on {
            return;
        }
        self.vsync = on;
        if let Err(e) = unsafe { self.recreate_swapchain(self.size) } {
            tracing::error!("vk: swapchain recreate after vsync change failed: {e:#}");
        }
    }
}
