// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Set-up failures a caller may want to tell apart from plain driver errors.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("validation layers requested, but not available (missing {layer})")]
    ValidationLayersUnavailable { layer: String },
    #[error("failed to find a GPU with Vulkan support")]
    NoVulkanDevice,
    #[error("failed to find a suitable GPU")]
    NoSuitableDevice,
    #[error("selected device has no graphics/present queue family for this surface")]
    IncompleteQueueFamilies,
    #[error("surface reports no supported formats")]
    NoSurfaceFormat,
    #[error("failed to create graphics pipeline: {0}")]
    PipelineCreation(vk::Result),
}
