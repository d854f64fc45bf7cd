// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use kronic_render::RenderSize;
use tracing::info;

use crate::device::QueueFamilies;
use crate::error::SetupError;

pub(crate) struct SwapchainSupport {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub(crate) unsafe fn query(
        surface_loader: &surface::Instance,
        phys: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> Result<Self> {
        Ok(Self {
            caps: surface_loader
                .get_physical_device_surface_capabilities(phys, surface)
                .context("get_physical_device_surface_capabilities")?,
            formats: surface_loader
                .get_physical_device_surface_formats(phys, surface)
                .context("get_physical_device_surface_formats")?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(phys, surface)
                .context("get_physical_device_surface_present_modes")?,
        })
    }

    pub(crate) fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// BGRA8 sRGB with the sRGB non-linear color space, else whatever the driver lists first.
/// `None` only when the surface reports no formats at all.
pub(crate) fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

pub(crate) fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let preference: &[vk::PresentModeKHR] = if vsync {
        &[vk::PresentModeKHR::MAILBOX]
    } else {
        &[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX]
    };
    // FIFO is the only mode every implementation must support.
    preference
        .iter()
        .copied()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub(crate) fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One image over the minimum; `max_image_count == 0` means no upper bound.
pub(crate) fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        want
    } else {
        want.min(caps.max_image_count)
    }
}

pub(crate) fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        _ => "OTHER",
    }
}

pub(crate) struct SwapchainBundle {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) unsafe fn create_swapchain_bundle(
    device: &ash::Device,
    surface_loader: &surface::Instance,
    swapchain_loader: &swapchain::Device,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    queues: QueueFamilies,
    old_swapchain: vk::SwapchainKHR,
    hint: RenderSize,
    vsync: bool,
) -> Result<SwapchainBundle> {
    let support = SwapchainSupport::query(surface_loader, phys, surface)?;

    // Re-queried on every recreate; the surface may have changed since device selection.
    let surf_format =
        choose_surface_format(&support.formats).ok_or(SetupError::NoSurfaceFormat)?;
    let present_mode = choose_present_mode(&support.present_modes, vsync);
    let extent = choose_extent(&support.caps, hint);
    let image_count = choose_image_count(&support.caps);
    let (sharing_mode, family_indices) = queues.sharing();

    info!(
        "vk: swapchain format {:?} / {:?}, present {}, extent {}x{}, images (min {} -> {})",
        surf_format.format,
        surf_format.color_space,
        present_mode_name(present_mode),
        extent.width,
        extent.height,
        support.caps.min_image_count,
        image_count
    );

    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface,
        min_image_count: image_count,
        image_format: surf_format.format,
        image_color_space: surf_format.color_space,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        image_sharing_mode: sharing_mode,
        queue_family_index_count: family_indices.len() as u32,
        p_queue_family_indices: family_indices.as_ptr(),
        pre_transform: support.caps.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode,
        clipped: vk::TRUE,
        old_swapchain,
        ..Default::default()
    };

    let swapchain = swapchain_loader
        .create_swapchain(&swap_info, None)
        .context("create_swapchain")?;
    let (images, image_views) =
        match swapchain_images(device, swapchain_loader, swapchain, surf_format.format) {
            Ok(v) => v,
            Err(e) => {
                swapchain_loader.destroy_swapchain(swapchain, None);
                return Err(e);
            }
        };

    Ok(SwapchainBundle {
        swapchain,
        format: surf_format.format,
        extent,
        images,
        image_views,
    })
}

impl SwapchainBundle {
    pub(crate) unsafe fn destroy(&self, device: &ash::Device, loader: &swapchain::Device) {
        for &iv in &self.image_views {
            device.destroy_image_view(iv, None);
        }
        loader.destroy_swapchain(self.swapchain, None);
    }
}

unsafe fn swapchain_images(
    device: &ash::Device,
    loader: &swapchain::Device,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
) -> Result<(Vec<vk::Image>, Vec<vk::ImageView>)> {
    let images = loader
        .get_swapchain_images(swapchain)
        .context("get_swapchain_images")?;
    let views = create_image_views(device, &images, format)?;
    Ok((images, views))
}

unsafe fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());
    for &image in images {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            components: vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            },
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        match device.create_image_view(&iv_info, None) {
            Ok(v) => views.push(v),
            Err(e) => {
                for &v in &views {
                    device.destroy_image_view(v, None);
                }
                return Err(e).context("create_image_view");
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: current.0, height: current.1 },
            min_image_extent: vk::Extent2D { width: min.0, height: min.1 },
            max_image_extent: vk::Extent2D { width: max.0, height: max.1 },
            ..Default::default()
        }
    }

    #[test]
    fn srgb_bgra_is_preferred() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let f = choose_surface_format(&formats).unwrap();
        assert_eq!(f.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(f.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn srgb_bgra_needs_the_srgb_color_space() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(
            choose_surface_format(&formats).map(|f| f.format),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
    }

    #[test]
    fn no_formats_is_no_choice() {
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn vsync_prefers_mailbox_then_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn no_vsync_prefers_immediate() {
        let modes = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
        ];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(
            choose_present_mode(&modes[..2], false),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(choose_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let c = caps((1280, 720), (1, 1), (4096, 4096));
        let e = choose_extent(&c, RenderSize { width: 800, height: 600 });
        assert_eq!((e.width, e.height), (1280, 720));
    }

    #[test]
    fn free_extent_is_clamped_per_axis() {
        let c = caps((u32::MAX, u32::MAX), (100, 100), (1000, 500));
        let e = choose_extent(&c, RenderSize { width: 50, height: 800 });
        assert_eq!((e.width, e.height), (100, 500));
        let e = choose_extent(&c, RenderSize { width: 640, height: 480 });
        assert_eq!((e.width, e.height), (640, 480));
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut c = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn adequacy_needs_formats_and_modes() {
        let mut s = SwapchainSupport {
            caps: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR)],
            present_modes: vec![],
        };
        assert!(!s.is_adequate());
        s.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(s.is_adequate());
        s.formats.clear();
        assert!(!s.is_adequate());
    }
}
