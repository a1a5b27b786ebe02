use std::any::Any;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;
use crate::render_pass::RenderPass;

#[derive(Debug, Error)]
pub enum BuildImageViewError {
    #[error("Required field `view_type` was not set")]
    MissingViewType,

    #[error("Vulkan error creating image view: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum BuildFramebufferError {
    #[error("No attachments were added before build")]
    NoAttachments,

    #[error(
        "Attachment {index} is {actual_width}x{actual_height} but the \
         framebuffer is being built at {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        index: usize,
        actual_width: u32,
        actual_height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error(
        "Mismatched parameters to FramebufferBuilder. All attachments must \
         derive from the render pass's device"
    )]
    MismatchedParams,

    #[error("Vulkan error creating framebuffer: {0}")]
    Vulkan(vk::Result),
}

/// An image handle plus the ownership facts needed to destroy it correctly.
///
/// Swapchain-provided images are reclaimed by their swapchain, so dropping
/// the wrapper skips the native destroy for them; standalone images are
/// destroyed exactly once on drop. Either way the wrapper keeps its owner
/// alive, so a view onto an image can never outlive the image's source.
pub struct Image {
    parent: Arc<Device>,
    handle: vk::Image,
    format: vk::Format,
    extent: vk::Extent2D,
    owned: bool,
    _owner: Option<Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}

impl Image {
    pub(crate) fn swapchain_owned(
        parent: Arc<Device>,
        handle: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
        owner: Arc<dyn Any + Send + Sync>,
    ) -> Self {
        Self {
            parent,
            handle,
            format,
            extent,
            owned: false,
            _owner: Some(owner),
        }
    }

    /// Adopt a standalone image handle, taking over its destruction.
    ///
    /// # Safety
    /// `handle` must be a valid image created from `device` that no other
    /// owner will destroy, and `format`/`extent` must describe it truthfully.
    pub unsafe fn from_raw(
        device: &Arc<Device>,
        handle: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            parent: Arc::clone(device),
            handle,
            format,
            extent,
            owned: true,
            _owner: None,
        }
    }

    pub fn raw_handle(&self) -> vk::Image {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }

    pub fn is_swapchain_owned(&self) -> bool {
        !self.owned
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        tracing::debug!("Dropping image {:?} (owned: {})", self.handle, self.owned);
        if self.owned {
            //SAFETY: The handle was adopted via from_raw with exclusive
            //destruction rights, and all views onto it are dropped first.
            unsafe { self.parent.destroy_raw_image(self.handle) };
        }
        // Swapchain images are reclaimed when the swapchain itself is
        // destroyed; issuing a destroy here would be a double free.
    }
}

/// Fluent configuration for [`ImageView`] creation.
///
/// Consuming: `build` moves the accumulated state out exactly once.
pub struct ImageViewBuilder {
    image: Arc<Image>,
    view_type: Option<vk::ImageViewType>,
}

impl ImageViewBuilder {
    pub fn new(image: &Arc<Image>) -> Self {
        Self {
            image: Arc::clone(image),
            view_type: None,
        }
    }

    pub fn with_type(mut self, view_type: vk::ImageViewType) -> Self {
        self.view_type = Some(view_type);
        self
    }

    pub fn build(self) -> Result<ImageView, BuildImageViewError> {
        let view_type = self.view_type.ok_or(BuildImageViewError::MissingViewType)?;

        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image.raw_handle())
            .view_type(view_type)
            .format(self.image.format())
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1),
            );

        let device = Arc::clone(self.image.get_parent());
        //SAFETY: create_info references a valid image from this device with
        //a standard 2D color subresource range.
        let handle = unsafe { device.create_raw_image_view(&create_info) }
            .map_err(BuildImageViewError::Vulkan)?;

        Ok(ImageView {
            parent_image: self.image,
            device,
            handle,
        })
    }
}

/// An owned `VkImageView`, keeping its image (and transitively the image's
/// source) alive for as long as the view exists.
pub struct ImageView {
    parent_image: Arc<Image>,
    device: Arc<Device>,
    handle: vk::ImageView,
}

impl std::fmt::Debug for ImageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageView")
            .field("handle", &self.handle)
            .field("image", &self.parent_image)
            .finish_non_exhaustive()
    }
}

impl ImageView {
    pub fn raw_handle(&self) -> vk::ImageView {
        self.handle
    }

    pub fn get_image(&self) -> &Arc<Image> {
        &self.parent_image
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.parent_image.extent()
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        tracing::debug!("Dropping image view {:?}", self.handle);
        //SAFETY: The handle was created from this device and is destroyed
        //before its image (the Arc field keeps the image alive until now).
        unsafe { self.device.destroy_raw_image_view(self.handle) };
    }
}

fn check_attachment_extents(
    extents: &[vk::Extent2D],
    expected: vk::Extent2D,
) -> Result<(), (usize, vk::Extent2D)> {
    for (index, extent) in extents.iter().enumerate() {
        if extent.width != expected.width || extent.height != expected.height {
            return Err((index, *extent));
        }
    }
    Ok(())
}

/// Fluent configuration for [`Framebuffer`] creation.
///
/// The dimensions are fixed at construction; they must match every
/// attachment's image. No dynamic resize exists — recreating the swapchain
/// means rebuilding dependent framebuffers.
///
/// Consuming: `build` moves the accumulated state out exactly once.
pub struct FramebufferBuilder {
    render_pass: Arc<RenderPass>,
    width: u32,
    height: u32,
    attachments: Vec<Arc<ImageView>>,
}

impl FramebufferBuilder {
    pub fn new(render_pass: &Arc<RenderPass>, width: u32, height: u32) -> Self {
        Self {
            render_pass: Arc::clone(render_pass),
            width,
            height,
            attachments: Vec::new(),
        }
    }

    /// Append one attachment. Order must match the render pass's attachment
    /// slot order.
    pub fn add_attachment(mut self, view: &Arc<ImageView>) -> Self {
        self.attachments.push(Arc::clone(view));
        self
    }

    pub fn build(self) -> Result<Framebuffer, BuildFramebufferError> {
        if self.attachments.is_empty() {
            return Err(BuildFramebufferError::NoAttachments);
        }

        let device = Arc::clone(self.render_pass.get_parent());
        for view in &self.attachments {
            if !Arc::ptr_eq(view.get_parent(), &device) {
                return Err(BuildFramebufferError::MismatchedParams);
            }
        }

        let expected = vk::Extent2D {
            width: self.width,
            height: self.height,
        };
        let extents: Vec<vk::Extent2D> =
            self.attachments.iter().map(|view| view.extent()).collect();
        if let Err((index, actual)) = check_attachment_extents(&extents, expected) {
            return Err(BuildFramebufferError::DimensionMismatch {
                index,
                actual_width: actual.width,
                actual_height: actual.height,
                expected_width: self.width,
                expected_height: self.height,
            });
        }

        let raw_attachments: Vec<vk::ImageView> = self
            .attachments
            .iter()
            .map(|view| view.raw_handle())
            .collect();

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(self.render_pass.raw_handle())
            .attachments(&raw_attachments)
            .width(self.width)
            .height(self.height)
            .layers(1);

        //SAFETY: create_info references a valid render pass and image views
        //that all derive from this device (validated above).
        let handle = unsafe { device.create_raw_framebuffer(&create_info) }
            .map_err(BuildFramebufferError::Vulkan)?;

        Ok(Framebuffer {
            render_pass: self.render_pass,
            attachments: self.attachments,
            device,
            handle,
            extent: expected,
        })
    }
}

/// An owned `VkFramebuffer`, keeping its render pass and every attached
/// view alive for as long as it exists.
pub struct Framebuffer {
    render_pass: Arc<RenderPass>,
    attachments: Vec<Arc<ImageView>>,
    device: Arc<Device>,
    handle: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("handle", &self.handle)
            .field("extent", &self.extent)
            .field("attachment_count", &self.attachments.len())
            .finish_non_exhaustive()
    }
}

impl Framebuffer {
    pub fn raw_handle(&self) -> vk::Framebuffer {
        self.handle
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn get_render_pass(&self) -> &Arc<RenderPass> {
        &self.render_pass
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.device
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        tracing::debug!("Dropping framebuffer {:?}", self.handle);
        //SAFETY: The handle was created from this device; the Arc fields
        //keep the render pass and attachments alive until after this call.
        unsafe { self.device.destroy_raw_framebuffer(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_check_accepts_matching_attachments() {
        let expected = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extents = [expected, expected];
        assert!(check_attachment_extents(&extents, expected).is_ok());
    }

    #[test]
    fn extent_check_reports_first_mismatch() {
        let expected = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let wrong = vk::Extent2D {
            width: 1024,
            height: 600,
        };
        let extents = [expected, wrong, wrong];

        let (index, actual) =
            check_attachment_extents(&extents, expected).expect_err("mismatch expected");
        assert_eq!(index, 1);
        assert_eq!(actual.width, 1024);
    }
}
