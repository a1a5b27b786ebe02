use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum BuildAttachmentError {
    #[error("Required field `format` was not set")]
    MissingFormat,

    #[error("Required field `final_layout` was not set")]
    MissingFinalLayout,
}

#[derive(Debug, Error)]
pub enum BuildSubpassError {
    #[error("No color attachments were added before build")]
    NoAttachments,
}

#[derive(Debug, Error)]
pub enum BuildRenderPassError {
    #[error("No subpasses were added before build")]
    NoSubpasses,

    #[error(
        "Attachment id {id:?} is used with conflicting descriptions \
         across subpasses"
    )]
    ConflictingAttachment { id: String },

    #[error("Vulkan error creating render pass: {0}")]
    Vulkan(vk::Result),
}

/// An immutable description of one render target: a named
/// (format, final layout) pair.
///
/// The id is how subpasses refer to the same target; the render pass
/// builder assigns native attachment indices by id, first seen first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    id: String,
    format: vk::Format,
    final_layout: vk::ImageLayout,
}

impl Attachment {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn final_layout(&self) -> vk::ImageLayout {
        self.final_layout
    }
}

/// Fluent configuration for an [`Attachment`] description.
///
/// Consuming: `build` moves the accumulated state out exactly once, and
/// every builder starts from its own empty state.
pub struct AttachmentBuilder {
    id: String,
    format: Option<vk::Format>,
    final_layout: Option<vk::ImageLayout>,
}

impl AttachmentBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            format: None,
            final_layout: None,
        }
    }

    pub fn with_format(mut self, format: vk::Format) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_final_layout(mut self, layout: vk::ImageLayout) -> Self {
        self.final_layout = Some(layout);
        self
    }

    pub fn build(self) -> Result<Attachment, BuildAttachmentError> {
        Ok(Attachment {
            id: self.id,
            format: self.format.ok_or(BuildAttachmentError::MissingFormat)?,
            final_layout: self
                .final_layout
                .ok_or(BuildAttachmentError::MissingFinalLayout)?,
        })
    }
}

/// An immutable ordered set of color attachment references: which
/// attachments a subpass renders to, and in which layout each is kept for
/// its duration.
#[derive(Debug, Clone)]
pub struct Subpass {
    color_attachments: Vec<(Attachment, vk::ImageLayout)>,
}

impl Subpass {
    pub fn color_attachments(&self) -> &[(Attachment, vk::ImageLayout)] {
        &self.color_attachments
    }
}

/// Fluent configuration for a [`Subpass`].
///
/// Consuming, with a fresh attachment list per builder instance.
pub struct SubpassBuilder {
    color_attachments: Vec<(Attachment, vk::ImageLayout)>,
}

impl SubpassBuilder {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            color_attachments: Vec::new(),
        }
    }

    pub fn add_color_attachment(
        mut self,
        attachment: Attachment,
        layout: vk::ImageLayout,
    ) -> Self {
        self.color_attachments.push((attachment, layout));
        self
    }

    pub fn build(self) -> Result<Subpass, BuildSubpassError> {
        if self.color_attachments.is_empty() {
            return Err(BuildSubpassError::NoAttachments);
        }
        Ok(Subpass {
            color_attachments: self.color_attachments,
        })
    }
}

#[derive(Debug)]
struct RenderPassPlan {
    /// Unique attachments in first-seen order; the position is the native
    /// attachment index.
    slots: Vec<Attachment>,
    /// Per subpass: (slot index, layout during the subpass).
    subpass_refs: Vec<Vec<(u32, vk::ImageLayout)>>,
}

#[derive(Debug, PartialEq, Eq)]
enum PlanError {
    NoSubpasses,
    ConflictingAttachment { id: String },
}

/// Assign native attachment indices by id across all subpasses.
///
/// The same id must describe the same (format, final layout) everywhere it
/// appears; distinct ids get distinct slots in first-seen order.
fn plan_render_pass(subpasses: &[Subpass]) -> Result<RenderPassPlan, PlanError> {
    if subpasses.is_empty() {
        return Err(PlanError::NoSubpasses);
    }

    let mut slots: Vec<Attachment> = Vec::new();
    let mut subpass_refs: Vec<Vec<(u32, vk::ImageLayout)>> = Vec::with_capacity(subpasses.len());

    for subpass in subpasses {
        let mut refs = Vec::with_capacity(subpass.color_attachments.len());
        for (attachment, layout) in &subpass.color_attachments {
            let slot = match slots.iter().position(|slot| slot.id == attachment.id) {
                Some(index) => {
                    if slots[index] != *attachment {
                        return Err(PlanError::ConflictingAttachment {
                            id: attachment.id.clone(),
                        });
                    }
                    index as u32
                }
                None => {
                    slots.push(attachment.clone());
                    (slots.len() - 1) as u32
                }
            };
            refs.push((slot, *layout));
        }
        subpass_refs.push(refs);
    }

    Ok(RenderPassPlan {
        slots,
        subpass_refs,
    })
}

/// An owned `VkRenderPass` plus the immutable subpass descriptions it was
/// built from.
pub struct RenderPass {
    parent: Arc<Device>,
    handle: vk::RenderPass,
    subpasses: Vec<Subpass>,
}

impl std::fmt::Debug for RenderPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPass")
            .field("handle", &self.handle)
            .field("subpass_count", &self.subpasses.len())
            .finish_non_exhaustive()
    }
}

impl RenderPass {
    pub fn raw_handle(&self) -> vk::RenderPass {
        self.handle
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }

    pub fn subpass_count(&self) -> usize {
        self.subpasses.len()
    }

    pub fn subpasses(&self) -> &[Subpass] {
        &self.subpasses
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        tracing::debug!("Dropping render pass {:?}", self.handle);
        //SAFETY: The handle was created from parent; framebuffers and
        //pipelines built against it hold Arc references and are dropped
        //first.
        unsafe { self.parent.destroy_raw_render_pass(self.handle) };
    }
}

/// Fluent configuration for [`RenderPass`] creation.
///
/// Consuming, with a fresh subpass list per builder instance.
pub struct RenderPassBuilder {
    device: Arc<Device>,
    subpasses: Vec<Subpass>,
}

impl RenderPassBuilder {
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
            subpasses: Vec::new(),
        }
    }

    pub fn add_subpass(mut self, subpass: Subpass) -> Self {
        self.subpasses.push(subpass);
        self
    }

    pub fn build(self) -> Result<RenderPass, BuildRenderPassError> {
        let plan = plan_render_pass(&self.subpasses).map_err(|e| match e {
            PlanError::NoSubpasses => BuildRenderPassError::NoSubpasses,
            PlanError::ConflictingAttachment { id } => {
                BuildRenderPassError::ConflictingAttachment { id }
            }
        })?;

        let attachment_descriptions: Vec<vk::AttachmentDescription> = plan
            .slots
            .iter()
            .map(|attachment| {
                vk::AttachmentDescription::default()
                    .format(attachment.format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(vk::AttachmentLoadOp::CLEAR)
                    .store_op(vk::AttachmentStoreOp::STORE)
                    .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                    .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .final_layout(attachment.final_layout)
            })
            .collect();

        let reference_storage: Vec<Vec<vk::AttachmentReference>> = plan
            .subpass_refs
            .iter()
            .map(|refs| {
                refs.iter()
                    .map(|&(slot, layout)| {
                        vk::AttachmentReference::default()
                            .attachment(slot)
                            .layout(layout)
                    })
                    .collect()
            })
            .collect();

        let subpass_descriptions: Vec<vk::SubpassDescription<'_>> = reference_storage
            .iter()
            .map(|refs| {
                vk::SubpassDescription::default()
                    .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
                    .color_attachments(refs)
            })
            .collect();

        // One external dependency so the first subpass waits for the
        // presentation engine to release the attachment.
        let dependencies = [vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
            .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)];

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachment_descriptions)
            .subpasses(&subpass_descriptions)
            .dependencies(&dependencies);

        //SAFETY: create_info only references the local storage above, which
        //lives for the duration of the call.
        let handle = unsafe { self.device.create_raw_render_pass(&create_info) }
            .map_err(BuildRenderPassError::Vulkan)?;

        Ok(RenderPass {
            parent: self.device,
            handle,
            subpasses: self.subpasses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_attachment(id: &str) -> Attachment {
        AttachmentBuilder::new(id)
            .with_format(vk::Format::B8G8R8A8_SRGB)
            .with_final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build()
            .expect("attachment should build")
    }

    #[test]
    fn attachment_requires_format() {
        let err = AttachmentBuilder::new("COLOR")
            .with_final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build()
            .expect_err("format is required");
        assert!(matches!(err, BuildAttachmentError::MissingFormat));
    }

    #[test]
    fn attachment_requires_final_layout() {
        let err = AttachmentBuilder::new("COLOR")
            .with_format(vk::Format::B8G8R8A8_SRGB)
            .build()
            .expect_err("final layout is required");
        assert!(matches!(err, BuildAttachmentError::MissingFinalLayout));
    }

    #[test]
    fn subpass_requires_an_attachment() {
        let err = SubpassBuilder::new().build().expect_err("empty subpass");
        assert!(matches!(err, BuildSubpassError::NoAttachments));
    }

    #[test]
    fn independent_builders_do_not_share_accumulated_state() {
        // Regression guard: two builder instances must each start from
        // their own empty list, and continuing one chain after the other
        // has built must not retroactively change the built value.
        let first = SubpassBuilder::new().add_color_attachment(
            color_attachment("COLOR"),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        let second = SubpassBuilder::new().add_color_attachment(
            color_attachment("DEPTH"),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );

        let built_second = second.build().expect("second subpass should build");

        let first = first.add_color_attachment(
            color_attachment("EXTRA"),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        let built_first = first.build().expect("first subpass should build");

        assert_eq!(built_second.color_attachments().len(), 1);
        assert_eq!(built_second.color_attachments()[0].0.id(), "DEPTH");
        assert_eq!(built_first.color_attachments().len(), 2);
    }

    #[test]
    fn plan_rejects_zero_subpasses() {
        assert!(matches!(
            plan_render_pass(&[]),
            Err(PlanError::NoSubpasses)
        ));
    }

    #[test]
    fn plan_shares_one_slot_for_one_id_across_subpasses() {
        let shared = color_attachment("COLOR");
        let first = SubpassBuilder::new()
            .add_color_attachment(shared.clone(), vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()
            .unwrap();
        let second = SubpassBuilder::new()
            .add_color_attachment(shared, vk::ImageLayout::GENERAL)
            .build()
            .unwrap();

        let plan = plan_render_pass(&[first, second]).expect("plan should succeed");
        assert_eq!(plan.slots.len(), 1);
        assert_eq!(plan.subpass_refs.len(), 2);
        assert_eq!(plan.subpass_refs[0][0].0, 0);
        assert_eq!(plan.subpass_refs[1][0].0, 0);
        assert_eq!(plan.subpass_refs[1][0].1, vk::ImageLayout::GENERAL);
    }

    #[test]
    fn plan_assigns_distinct_slots_in_first_seen_order() {
        let pass = SubpassBuilder::new()
            .add_color_attachment(
                color_attachment("COLOR"),
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )
            .add_color_attachment(
                color_attachment("NORMALS"),
                vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            )
            .build()
            .unwrap();

        let plan = plan_render_pass(std::slice::from_ref(&pass)).expect("plan should succeed");
        assert_eq!(plan.slots.len(), 2);
        assert_eq!(plan.slots[0].id(), "COLOR");
        assert_eq!(plan.slots[1].id(), "NORMALS");
        assert_eq!(plan.subpass_refs[0][0].0, 0);
        assert_eq!(plan.subpass_refs[0][1].0, 1);
    }

    #[test]
    fn plan_rejects_conflicting_descriptions_for_one_id() {
        let original = color_attachment("COLOR");
        let conflicting = AttachmentBuilder::new("COLOR")
            .with_format(vk::Format::R8G8B8A8_UNORM)
            .with_final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .build()
            .unwrap();

        let first = SubpassBuilder::new()
            .add_color_attachment(original, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()
            .unwrap();
        let second = SubpassBuilder::new()
            .add_color_attachment(conflicting, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .build()
            .unwrap();

        let err = plan_render_pass(&[first, second]).expect_err("conflict expected");
        assert_eq!(
            err,
            PlanError::ConflictingAttachment {
                id: "COLOR".to_owned()
            }
        );
    }
}
