// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::vk;

use crate::device::DeviceContext;
use crate::error::InitError;
use crate::shader::ShaderBlobs;

fn color_attachment(format: vk::Format) -> vk::AttachmentDescription {
    vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }
}

/// Holds the layout transition until the image-available semaphore wait
/// (at COLOR_ATTACHMENT_OUTPUT) has happened.
fn acquire_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    }
}

/// Shader module destroyed when it goes out of scope; only needed until the
/// pipeline exists.
struct ShaderModule<'a> {
    device: &'a ash::Device,
    handle: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    fn new(device: &'a ash::Device, words: &[u32]) -> Result<Self, InitError> {
        let info = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: words.len() * 4,
            p_code: words.as_ptr(),
            ..Default::default()
        };
        // SAFETY: words is aligned SPIR-V that outlives the call.
        let handle = unsafe { device.create_shader_module(&info, None) }
            .map_err(InitError::vulkan("vkCreateShaderModule"))?;
        Ok(Self { device, handle })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        // SAFETY: modules are not referenced once pipeline creation returns.
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}

/// Render pass, layout and pipeline for one color format.
///
/// Extent is dynamic state, so a resize only needs new framebuffers.
pub struct FramePipeline {
    device: Arc<DeviceContext>,
    format: vk::Format,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("format", &self.format)
            .field("render_pass", &self.render_pass)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl FramePipeline {
    pub fn build(
        device: &Arc<DeviceContext>,
        color_format: vk::Format,
        shaders: &ShaderBlobs,
    ) -> Result<Self, InitError> {
        let vs_words = shaders.vertex_words()?;
        let fs_words = shaders.fragment_words()?;

        // Null handles are fine to destroy, so an early return below cleans
        // up whatever was created so far.
        let mut out = Self {
            device: Arc::clone(device),
            format: color_format,
            render_pass: vk::RenderPass::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };
        let raw = device.raw();

        let attachment = color_attachment(color_format);
        let color_ref = vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        };
        let subpass = vk::SubpassDescription {
            pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
            color_attachment_count: 1,
            p_color_attachments: &color_ref,
            ..Default::default()
        };
        let dependency = acquire_dependency();
        let rp_info = vk::RenderPassCreateInfo {
            s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &attachment,
            subpass_count: 1,
            p_subpasses: &subpass,
            dependency_count: 1,
            p_dependencies: &dependency,
            ..Default::default()
        };
        // SAFETY: every pointer in rp_info references locals above.
        out.render_pass = unsafe { raw.create_render_pass(&rp_info, None) }
            .map_err(InitError::vulkan("vkCreateRenderPass"))?;

        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        // SAFETY: empty layout, no borrowed pointers.
        out.layout = unsafe { raw.create_pipeline_layout(&layout_info, None) }
            .map_err(InitError::vulkan("vkCreatePipelineLayout"))?;

        let vs = ShaderModule::new(raw, &vs_words)?;
        let fs = ShaderModule::new(raw, &fs_words)?;
        let entry = c"main";
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs.handle,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.handle,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        // Positions come from gl_VertexIndex.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let blend_attachment = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: out.layout,
            render_pass: out.render_pass,
            subpass: 0,
            ..Default::default()
        };
        // SAFETY: every state struct and the shader modules outlive the call.
        let pipelines = unsafe {
            raw.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|(_, e)| InitError::vulkan("vkCreateGraphicsPipelines")(e))?;
        out.pipeline = pipelines.into_iter().next().ok_or(InitError::Vulkan {
            what: "vkCreateGraphicsPipelines",
            result: vk::Result::ERROR_UNKNOWN,
        })?;

        tracing::debug!("pipeline built for {:?}", color_format);
        Ok(out)
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        tracing::debug!("dropping pipeline {:?}", self.pipeline);
        let raw = self.device.raw();
        // SAFETY: the device is idle before the pipeline is replaced or torn
        // down; null handles are ignored by Vulkan.
        unsafe {
            raw.destroy_pipeline(self.pipeline, None);
            raw.destroy_pipeline_layout(self.layout, None);
            raw.destroy_render_pass(self.render_pass, None);
        }
    }
}
