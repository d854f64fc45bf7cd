// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::khr::surface;
use ash::{vk, Instance};
use std::collections::BTreeSet;
use std::ffi::{c_char, CStr};
use tracing::{debug, info};

use crate::error::SetupError;
use crate::instance::{ext_name, missing, VALIDATION_LAYER};
use crate::swapchain::SwapchainSupport;

pub(crate) const DEVICE_EXTENSIONS: &[&CStr] = &[ash::khr::swapchain::NAME];

const DISCRETE_GPU_BONUS: u32 = 1000;

/// Queue family indices found so far; either may still be missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Walks families in index order and stops as soon as both roles are filled.
    pub(crate) fn discover(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> Result<bool>,
    ) -> Result<Self> {
        let mut indices = Self::default();
        for (i, family) in families.iter().enumerate() {
            let i = i as u32;
            if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i);
            }
            if supports_present(i)? {
                indices.present = Some(i);
            }
            if indices.is_complete() {
                break;
            }
        }
        Ok(indices)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub(crate) fn complete(&self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Distinct family indices, ascending; one queue is created per entry.
    pub(crate) fn unique(&self) -> Vec<u32> {
        BTreeSet::from([self.graphics, self.present])
            .into_iter()
            .collect()
    }

    /// Swapchain image sharing: concurrent across two families, exclusive otherwise.
    pub(crate) fn sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        if self.graphics != self.present {
            (
                vk::SharingMode::CONCURRENT,
                vec![self.graphics, self.present],
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }
}

/// Everything device scoring looks at, pulled out of the driver up front.
#[derive(Clone, Debug)]
pub(crate) struct DeviceCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub max_image_dimension_2d: u32,
    pub geometry_shader: bool,
    pub extensions_supported: bool,
    pub swapchain_adequate: bool,
    pub queues: QueueFamilyIndices,
}

impl DeviceCandidate {
    /// 0 means unusable. Otherwise discrete GPUs get a flat bonus and larger
    /// max 2D texture sizes rank higher.
    pub(crate) fn score(&self) -> u32 {
        if !self.extensions_supported || !self.swapchain_adequate {
            return 0;
        }
        if !self.queues.is_complete() {
            return 0;
        }
        if !self.geometry_shader {
            return 0;
        }

        let mut score: u32 = 0;
        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += DISCRETE_GPU_BONUS;
        }
        score.saturating_add(self.max_image_dimension_2d)
    }
}

/// Index of the first strictly-highest non-zero score.
pub(crate) fn best_index(scores: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, &s) in scores.iter().enumerate() {
        if s > best.map_or(0, |(_, b)| b) {
            best = Some((i, s));
        }
    }
    best.map(|(i, _)| i)
}

pub(crate) fn device_type_name(t: vk::PhysicalDeviceType) -> &'static str {
    match t {
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
        vk::PhysicalDeviceType::CPU => "cpu",
        _ => "other",
    }
}

unsafe fn query_candidate(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let props = instance.get_physical_device_properties(phys);
    let features = instance.get_physical_device_features(phys);

    let exts = instance
        .enumerate_device_extension_properties(phys)
        .context("enumerate_device_extension_properties")?;
    let extensions_supported = missing(DEVICE_EXTENSIONS, &exts, ext_name).is_empty();

    // Surface queries are only meaningful once the swapchain extension is known to exist.
    let swapchain_adequate = extensions_supported
        && SwapchainSupport::query(surface_loader, phys, surface)?.is_adequate();

    let families = instance.get_physical_device_queue_family_properties(phys);
    let queues = QueueFamilyIndices::discover(&families, |i| {
        surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .context("get_physical_device_surface_support")
    })?;

    Ok(DeviceCandidate {
        name: CStr::from_ptr(props.device_name.as_ptr())
            .to_string_lossy()
            .into_owned(),
        device_type: props.device_type,
        max_image_dimension_2d: props.limits.max_image_dimension2_d,
        geometry_shader: features.geometry_shader == vk::TRUE,
        extensions_supported,
        swapchain_adequate,
        queues,
    })
}

pub(crate) struct PhysicalDeviceChoice {
    pub phys: vk::PhysicalDevice,
    pub queues: QueueFamilies,
    pub name: String,
}

pub(crate) unsafe fn pick_physical_device(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<PhysicalDeviceChoice> {
    let devices = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    if devices.is_empty() {
        return Err(SetupError::NoVulkanDevice.into());
    }

    let mut candidates = Vec::with_capacity(devices.len());
    for &phys in &devices {
        let c = query_candidate(instance, surface_loader, surface, phys)?;
        debug!(
            "vk: candidate \"{}\" ({}) score={}",
            c.name,
            device_type_name(c.device_type),
            c.score()
        );
        candidates.push(c);
    }

    let scores: Vec<u32> = candidates.iter().map(DeviceCandidate::score).collect();
    let best = best_index(&scores).ok_or(SetupError::NoSuitableDevice)?;
    let chosen = &candidates[best];
    let queues = chosen
        .queues
        .complete()
        .ok_or(SetupError::IncompleteQueueFamilies)?;

    info!(
        "vk: using \"{}\" ({}), score={}, graphics family={}, present family={}",
        chosen.name,
        device_type_name(chosen.device_type),
        scores[best],
        queues.graphics,
        queues.present
    );

    Ok(PhysicalDeviceChoice {
        phys: devices[best],
        queues,
        name: chosen.name.clone(),
    })
}

pub(crate) struct LogicalDevice {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

pub(crate) unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    queues: QueueFamilies,
    validation: bool,
) -> Result<LogicalDevice> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = queues
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let features = vk::PhysicalDeviceFeatures::default();
    let ext_ptrs: Vec<*const c_char> = DEVICE_EXTENSIONS.iter().map(|e| e.as_ptr()).collect();
    // Device layers are ignored by current loaders; older ones still read them.
    let layer_ptrs: Vec<*const c_char> = if validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        Vec::new()
    };

    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        p_enabled_features: &features,
        enabled_extension_count: ext_ptrs.len() as u32,
        pp_enabled_extension_names: ext_ptrs.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };

    let device = instance
        .create_device(phys, &dinfo, None)
        .context("create_device")?;
    let graphics_queue = device.get_device_queue(queues.graphics, 0);
    let present_queue = device.get_device_queue(queues.present, 0);

    Ok(LogicalDevice {
        device,
        graphics_queue,
        present_queue,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn suitable() -> DeviceCandidate {
        DeviceCandidate {
            name: "test gpu".into(),
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            max_image_dimension_2d: 8192,
            geometry_shader: true,
            extensions_supported: true,
            swapchain_adequate: true,
            queues: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
        }
    }

    #[test]
    fn discover_stops_at_first_complete_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut asked = Vec::new();
        let idx = QueueFamilyIndices::discover(&families, |i| {
            asked.push(i);
            Ok(true)
        })
        .unwrap();
        assert_eq!(idx.complete(), Some(QueueFamilies { graphics: 0, present: 0 }));
        assert_eq!(asked, vec![0]);
    }

    #[test]
    fn discover_finds_split_families() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
        ];
        let idx = QueueFamilyIndices::discover(&families, |i| Ok(i == 2)).unwrap();
        assert_eq!(idx.graphics, Some(0));
        assert_eq!(idx.present, Some(2));
        assert!(idx.is_complete());
    }

    #[test]
    fn discover_without_graphics_is_incomplete() {
        let families = [family(vk::QueueFlags::COMPUTE), family(vk::QueueFlags::TRANSFER)];
        let idx = QueueFamilyIndices::discover(&families, |_| Ok(true)).unwrap();
        assert_eq!(idx.graphics, None);
        assert_eq!(idx.present, Some(1));
        assert!(idx.complete().is_none());
    }

    #[test]
    fn discover_propagates_present_query_errors() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let res = QueueFamilyIndices::discover(&families, |_| {
            Err(anyhow::anyhow!(vk::Result::ERROR_SURFACE_LOST_KHR))
        });
        assert!(res.is_err());
    }

    #[test]
    fn shared_family_is_exclusive_and_unique() {
        let q = QueueFamilies { graphics: 1, present: 1 };
        assert_eq!(q.unique(), vec![1]);
        assert_eq!(q.sharing(), (vk::SharingMode::EXCLUSIVE, vec![]));
    }

    #[test]
    fn split_families_are_concurrent() {
        let q = QueueFamilies { graphics: 2, present: 0 };
        assert_eq!(q.unique(), vec![0, 2]);
        assert_eq!(q.sharing(), (vk::SharingMode::CONCURRENT, vec![2, 0]));
    }

    #[test]
    fn integrated_scores_its_texture_limit() {
        assert_eq!(suitable().score(), 8192);
    }

    #[test]
    fn discrete_gets_bonus() {
        let c = DeviceCandidate {
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            max_image_dimension_2d: 16384,
            ..suitable()
        };
        assert_eq!(c.score(), 16384 + 1000);
    }

    #[test]
    fn each_requirement_is_disqualifying() {
        let no_ext = DeviceCandidate { extensions_supported: false, ..suitable() };
        let no_sc = DeviceCandidate { swapchain_adequate: false, ..suitable() };
        let no_gs = DeviceCandidate { geometry_shader: false, ..suitable() };
        let no_present = DeviceCandidate {
            queues: QueueFamilyIndices { graphics: Some(0), present: None },
            ..suitable()
        };
        for c in [no_ext, no_sc, no_gs, no_present] {
            assert_eq!(c.score(), 0, "{c:?}");
        }
    }

    #[test]
    fn best_index_prefers_first_of_equal_scores() {
        assert_eq!(best_index(&[10, 30, 30, 5]), Some(1));
    }

    #[test]
    fn best_index_rejects_all_zero() {
        assert_eq!(best_index(&[0, 0]), None);
        assert_eq!(best_index(&[]), None);
    }

    #[test]
    fn best_index_skips_unusable_leaders() {
        assert_eq!(best_index(&[0, 1]), Some(1));
    }

    #[test]
    fn device_types_have_readable_names() {
        assert_eq!(device_type_name(vk::PhysicalDeviceType::DISCRETE_GPU), "discrete");
        assert_eq!(device_type_name(vk::PhysicalDeviceType::OTHER), "other");
    }
}
