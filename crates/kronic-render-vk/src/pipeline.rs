// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::util::read_spv;
use ash::vk;
use std::io::Cursor;

use crate::error::SetupError;

const VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
const FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

/// Viewport, scissor and line width are set while recording, so the pipeline
/// survives extent changes.
pub(crate) const DYNAMIC_STATES: [vk::DynamicState; 3] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::LINE_WIDTH,
];

unsafe fn create_render_pass(
    device: &ash::Device,
    color_format: vk::Format,
) -> Result<vk::RenderPass> {
    let color_att = vk::AttachmentDescription {
        format: color_format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };

    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };

    // The layout transition must wait for the acquire semaphore, which is
    // waited on at COLOR_ATTACHMENT_OUTPUT.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };

    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    device
        .create_render_pass(&rp_info, None)
        .context("create_render_pass")
}

/// Render pass plus the pipeline built against it; both depend only on the
/// swapchain's color format. Null handles until created.
#[derive(Clone, Copy, Default)]
pub(crate) struct PassObjects {
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl PassObjects {
    pub(crate) unsafe fn create(device: &ash::Device, color_format: vk::Format) -> Result<Self> {
        let render_pass = create_render_pass(device, color_format)?;
        match create_pipeline(device, render_pass) {
            Ok((layout, pipeline)) => Ok(Self {
                render_pass,
                layout,
                pipeline,
            }),
            Err(e) => {
                device.destroy_render_pass(render_pass, None);
                Err(e)
            }
        }
    }

    pub(crate) unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
        device.destroy_render_pass(self.render_pass, None);
    }
}

/// The pass and pipeline bake in the attachment format; nothing else about a
/// new swapchain invalidates them.
pub(crate) fn pass_outdated(current: vk::Format, next: vk::Format) -> bool {
    current != next
}

unsafe fn create_shader_module(
    device: &ash::Device,
    spv: &[u8],
    name: &str,
) -> Result<vk::ShaderModule> {
    let code = read_spv(&mut Cursor::new(spv)).with_context(|| format!("read_spv({name})"))?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .with_context(|| format!("create_shader_module({name})"))
}

unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let vs = create_shader_module(device, VERT_SPV, "triangle.vert")?;
    let fs = match create_shader_module(device, FRAG_SPV, "triangle.frag") {
        Ok(fs) => fs,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            return Err(e);
        }
    };

    let result = build_pipeline(device, render_pass, vs, fs);

    // Modules are only needed while the pipeline is being built.
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);
    result
}

unsafe fn build_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
    let entry = c"main";
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: entry.as_ptr(),
            ..Default::default()
        },
    ];

    // Vertices come from gl_VertexIndex, nothing is bound.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: vk::PrimitiveTopology::TRIANGLE_LIST,
        primitive_restart_enable: vk::FALSE,
        ..Default::default()
    };

    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: DYNAMIC_STATES.len() as u32,
        p_dynamic_states: DYNAMIC_STATES.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        p_viewports: std::ptr::null(), // dynamic
        scissor_count: 1,
        p_scissors: std::ptr::null(), // dynamic
        ..Default::default()
    };

    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        depth_clamp_enable: vk::FALSE,
        rasterizer_discard_enable: vk::FALSE,
        polygon_mode: vk::PolygonMode::FILL,
        line_width: 1.0,
        cull_mode: vk::CullModeFlags::BACK,
        front_face: vk::FrontFace::CLOCKWISE,
        depth_bias_enable: vk::FALSE,
        depth_bias_constant_factor: 0.0,
        depth_bias_clamp: 0.0,
        depth_bias_slope_factor: 0.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        sample_shading_enable: vk::FALSE,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        min_sample_shading: 1.0,
        alpha_to_coverage_enable: vk::FALSE,
        alpha_to_one_enable: vk::FALSE,
        ..Default::default()
    };

    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        color_write_mask: vk::ColorComponentFlags::RGBA,
        blend_enable: vk::FALSE,
        src_color_blend_factor: vk::BlendFactor::ONE,
        dst_color_blend_factor: vk::BlendFactor::ZERO,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        logic_op_enable: vk::FALSE,
        logic_op: vk::LogicOp::COPY,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        blend_constants: [0.0; 4],
        ..Default::default()
    };

    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        ..Default::default()
    };
    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .context("create_pipeline_layout")?;

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: std::ptr::null(),
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        base_pipeline_handle: vk::Pipeline::null(),
        base_pipeline_index: -1,
        ..Default::default()
    };

    match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(p) => Ok((layout, p[0])),
        Err((_, err)) => {
            device.destroy_pipeline_layout(layout, None);
            Err(SetupError::PipelineCreation(err).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_shaders_are_spirv() {
        for spv in [VERT_SPV, FRAG_SPV] {
            let words = read_spv(&mut Cursor::new(spv)).unwrap();
            assert_eq!(words[0], 0x0723_0203);
        }
    }

    #[test]
    fn extent_dependent_state_is_dynamic() {
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::VIEWPORT));
        assert!(DYNAMIC_STATES.contains(&vk::DynamicState::SCISSOR));
    }

    #[test]
    fn only_a_format_change_outdates_the_pass() {
        assert!(!pass_outdated(vk::Format::B8G8R8A8_SRGB, vk::Format::B8G8R8A8_SRGB));
        assert!(pass_outdated(vk::Format::B8G8R8A8_SRGB, vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn default_pass_objects_are_null() {
        let p = PassObjects::default();
        assert_eq!(p.render_pass, vk::RenderPass::null());
        assert_eq!(p.layout, vk::PipelineLayout::null());
        assert_eq!(p.pipeline, vk::Pipeline::null());
    }
}
