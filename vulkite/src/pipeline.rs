use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;
use crate::render_pass::RenderPass;
use crate::shader::{ShaderModule, ShaderStage};

#[derive(Debug, Error)]
pub enum BuildPipelineLayoutError {
    #[error("Vulkan error creating pipeline layout: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum BuildGraphicsPipelineError {
    #[error("No shader stages were added before build")]
    NoStages,

    #[error("Required field `viewport` was not set")]
    MissingViewport,

    #[error("Required field `scissor` was not set")]
    MissingScissor,

    #[error("No color attachments were declared before build")]
    NoColorAttachments,

    #[error(
        "Mismatched parameters to GraphicsPipelineBuilder. Shaders, layout, \
         and render pass must all derive from the same device"
    )]
    MismatchedParams,

    #[error("Vulkan error creating internal empty pipeline layout: {0}")]
    LayoutCreation(vk::Result),

    #[error("Vulkan error creating graphics pipeline: {0}")]
    PipelineCreation(vk::Result),
}

/// An owned `VkPipelineLayout`.
///
/// Pipelines sharing the same descriptor set and push-constant signature
/// can hold the layout behind one `Arc<PipelineLayout>`.
pub struct PipelineLayout {
    parent: Arc<Device>,
    handle: vk::PipelineLayout,
}

impl std::fmt::Debug for PipelineLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineLayout")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl PipelineLayout {
    pub fn raw_handle(&self) -> vk::PipelineLayout {
        self.handle
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline layout {:?}", self.handle);
        //SAFETY: The handle was created from parent; pipelines using this
        //layout hold Arc references and are dropped first.
        unsafe { self.parent.destroy_raw_pipeline_layout(self.handle) };
    }
}

/// Builder for an empty [`PipelineLayout`]: no descriptor sets, no push
/// constant ranges.
pub struct PipelineLayoutBuilder {
    device: Arc<Device>,
}

impl PipelineLayoutBuilder {
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
        }
    }

    pub fn build(self) -> Result<PipelineLayout, BuildPipelineLayoutError> {
        let create_info = vk::PipelineLayoutCreateInfo::default();
        //SAFETY: A default-initialised layout create info references
        //nothing and imposes no provenance requirements.
        let handle = unsafe { self.device.create_raw_pipeline_layout(&create_info) }
            .map_err(BuildPipelineLayoutError::Vulkan)?;
        Ok(PipelineLayout {
            parent: self.device,
            handle,
        })
    }
}

const SHADER_ENTRY_POINT: &CStr = c"main";

/// Fluent configuration for a [`GraphicsPipeline`] with fixed viewport and
/// scissor state.
///
/// Consuming, with fresh stage/attachment accumulators per instance.
pub struct GraphicsPipelineBuilder {
    device: Arc<Device>,
    render_pass: Arc<RenderPass>,
    stages: Vec<(ShaderStage, Arc<ShaderModule>)>,
    viewport: Option<(u32, u32)>,
    scissor: Option<(u32, u32)>,
    layout: Option<Arc<PipelineLayout>>,
    color_attachment_count: u32,
}

impl GraphicsPipelineBuilder {
    pub fn new(device: &Arc<Device>, render_pass: &Arc<RenderPass>) -> Self {
        Self {
            device: Arc::clone(device),
            render_pass: Arc::clone(render_pass),
            stages: Vec::new(),
            viewport: None,
            scissor: None,
            layout: None,
            color_attachment_count: 0,
        }
    }

    /// Append one shader stage. Stage order is preserved.
    pub fn add_shader(mut self, stage: ShaderStage, module: &Arc<ShaderModule>) -> Self {
        self.stages.push((stage, Arc::clone(module)));
        self
    }

    /// Fixed viewport dimensions; the pipeline cannot be used at any other
    /// size without being rebuilt.
    pub fn with_fixed_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Some((width, height));
        self
    }

    /// Fixed scissor dimensions.
    pub fn with_fixed_scissor(mut self, width: u32, height: u32) -> Self {
        self.scissor = Some((width, height));
        self
    }

    /// Share an existing layout. When unset, an empty layout is created
    /// internally and owned by the resulting pipeline.
    pub fn with_pipeline_layout(mut self, layout: &Arc<PipelineLayout>) -> Self {
        self.layout = Some(Arc::clone(layout));
        self
    }

    /// Declare one color attachment (no blending, full RGBA write mask).
    /// Call once per color attachment of the target subpass.
    pub fn add_color_attachment(mut self) -> Self {
        self.color_attachment_count += 1;
        self
    }

    pub fn build(self) -> Result<GraphicsPipeline, BuildGraphicsPipelineError> {
        if self.stages.is_empty() {
            return Err(BuildGraphicsPipelineError::NoStages);
        }
        let (viewport_width, viewport_height) = self
            .viewport
            .ok_or(BuildGraphicsPipelineError::MissingViewport)?;
        let (scissor_width, scissor_height) = self
            .scissor
            .ok_or(BuildGraphicsPipelineError::MissingScissor)?;
        if self.color_attachment_count == 0 {
            return Err(BuildGraphicsPipelineError::NoColorAttachments);
        }

        if !Arc::ptr_eq(self.render_pass.get_parent(), &self.device) {
            return Err(BuildGraphicsPipelineError::MismatchedParams);
        }
        for (_, module) in &self.stages {
            if !Arc::ptr_eq(module.get_parent(), &self.device) {
                return Err(BuildGraphicsPipelineError::MismatchedParams);
            }
        }
        if let Some(layout) = &self.layout {
            if !Arc::ptr_eq(layout.get_parent(), &self.device) {
                return Err(BuildGraphicsPipelineError::MismatchedParams);
            }
        }

        let layout = match self.layout {
            Some(layout) => layout,
            None => Arc::new(
                PipelineLayoutBuilder::new(&self.device)
                    .build()
                    .map_err(|BuildPipelineLayoutError::Vulkan(e)| {
                        BuildGraphicsPipelineError::LayoutCreation(e)
                    })?,
            ),
        };

        let stage_create_infos: Vec<vk::PipelineShaderStageCreateInfo<'_>> = self
            .stages
            .iter()
            .map(|(stage, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage((*stage).into())
                    .module(module.raw_handle())
                    .name(SHADER_ENTRY_POINT)
            })
            .collect();

        // No vertex buffers: vertices are driven from the shader (gl_VertexIndex)
        // or push constants.
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewports = [vk::Viewport::default()
            .x(0.0)
            .y(0.0)
            .width(viewport_width as f32)
            .height(viewport_height as f32)
            .min_depth(0.0)
            .max_depth(1.0)];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: vk::Extent2D {
                width: scissor_width,
                height: scissor_height,
            },
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0
            ..self.color_attachment_count)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&color_blend_attachments);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stage_create_infos)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .layout(layout.raw_handle())
            .render_pass(self.render_pass.raw_handle())
            .subpass(0);

        //SAFETY: create_info references shader stages, a layout, and a
        //render pass that all derive from this device (validated above) and
        //stay alive for the duration of the call.
        let handle = unsafe { self.device.create_raw_graphics_pipeline(&create_info) }
            .map_err(BuildGraphicsPipelineError::PipelineCreation)?;

        Ok(GraphicsPipeline {
            parent: self.device,
            handle,
            render_pass: self.render_pass,
            layout,
            _shaders: self.stages.into_iter().map(|(_, module)| module).collect(),
        })
    }
}

/// An owned graphics `VkPipeline`, keeping its render pass, layout, and
/// shader modules alive for as long as it exists.
pub struct GraphicsPipeline {
    parent: Arc<Device>,
    handle: vk::Pipeline,
    render_pass: Arc<RenderPass>,
    layout: Arc<PipelineLayout>,
    _shaders: Vec<Arc<ShaderModule>>,
}

impl std::fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("handle", &self.handle)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

impl GraphicsPipeline {
    pub fn raw_handle(&self) -> vk::Pipeline {
        self.handle
    }

    pub fn get_layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }

    pub fn get_render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        tracing::debug!("Dropping pipeline {:?}", self.handle);
        //SAFETY: The handle was created from parent and no in-flight GPU
        //work may still reference it at teardown.
        unsafe { self.parent.destroy_raw_pipeline(self.handle) };
        // The layout, render pass, and shader Arcs release afterwards; each
        // is destroyed only when its last user drops.
    }
}
