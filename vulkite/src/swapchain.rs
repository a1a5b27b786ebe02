use std::any::Any;
use std::sync::{Arc, Mutex};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::device::{Device, NameObjectError, SwapchainDeviceError};
use crate::image::Image;
use crate::instance::SurfaceQueryError;
use crate::surface::Surface;
use crate::sync::Semaphore;

#[derive(Debug, Error)]
pub enum CreateSwapchainError {
    #[error(
        "Mismatched parameters to SwapchainBuilder. Device, surface, and \
         optional old swapchain must derive from the same instance"
    )]
    MismatchedParams,

    #[error("No supported surface formats were reported")]
    NoSurfaceFormats,

    #[error("No supported present modes were reported")]
    NoPresentModes,

    #[error("Invalid requested swapchain extent ({width}x{height})")]
    InvalidExtent { width: u32, height: u32 },

    #[error("Swapchain support was not enabled on this device")]
    SwapchainNotEnabled,

    #[error("Failed while querying surface support details: {0}")]
    SurfaceQuery(#[from] SurfaceQueryError),

    #[error("Vulkan error creating swapchain: {0}")]
    VulkanCreate(vk::Result),

    #[error("Vulkan error fetching swapchain images: {0}")]
    VulkanGetImages(vk::Result),
}

#[derive(Debug, Error)]
pub enum AcquireImageError {
    #[error("The wait semaphore does not derive from the swapchain's device")]
    MismatchedParams,

    #[error("The swapchain no longer matches the surface and must be recreated")]
    OutOfDate,

    #[error("Vulkan error acquiring swapchain image: {0}")]
    Vulkan(vk::Result),
}

fn pick_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: Option<vk::Format>,
) -> vk::SurfaceFormatKHR {
    if let Some(preferred) = preferred {
        if let Some(found) = formats.iter().copied().find(|f| f.format == preferred) {
            return found;
        }
    }

    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .unwrap_or(formats[0])
}

fn pick_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

fn pick_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: vk::Extent2D,
) -> vk::Extent2D {
    // A fixed current_extent means the platform dictates the size.
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        vk::Extent2D {
            width: desired.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            height: desired.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        }
    }
}

fn pick_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut count = capabilities.min_image_count.saturating_add(1);
    if capabilities.max_image_count > 0 {
        count = count.min(capabilities.max_image_count);
    }
    count
}

fn pick_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    let supported = capabilities.supported_composite_alpha;
    for mode in [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
    ] {
        if supported.contains(mode) {
            return mode;
        }
    }
    vk::CompositeAlphaFlagsKHR::INHERIT
}

/// Fluent configuration for [`Swapchain`] creation.
///
/// Consuming: `build` moves the accumulated state out exactly once.
pub struct SwapchainBuilder<'old, T: HasDisplayHandle + HasWindowHandle> {
    device: Arc<Device>,
    surface: Arc<Surface<T>>,
    desired_extent: vk::Extent2D,
    preferred_format: Option<vk::Format>,
    old: Option<&'old Swapchain<T>>,
    name: Option<String>,
}

impl<'old, T: HasDisplayHandle + HasWindowHandle> SwapchainBuilder<'old, T> {
    pub fn new(
        device: &Arc<Device>,
        surface: &Arc<Surface<T>>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            device: Arc::clone(device),
            surface: Arc::clone(surface),
            desired_extent: vk::Extent2D { width, height },
            preferred_format: None,
            old: None,
            name: None,
        }
    }

    /// Hint for surface format selection. Falls back to the default choice
    /// (B8G8R8A8_SRGB + SRGB_NONLINEAR) when the surface does not support
    /// the preferred format.
    pub fn preferred_format(mut self, format: vk::Format) -> Self {
        self.preferred_format = Some(format);
        self
    }

    /// Provide the retiring swapchain on recreation so drivers can reuse
    /// its resources. The old swapchain must derive from the same device
    /// and surface.
    pub fn with_old(mut self, old: &'old Swapchain<T>) -> Self {
        self.old = Some(old);
        self
    }

    /// Optional debug label applied via `VK_EXT_debug_utils` when available.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build(self) -> Result<Swapchain<T>, CreateSwapchainError> {
        if !self.device.has_swapchain_support() {
            return Err(CreateSwapchainError::SwapchainNotEnabled);
        }

        if self.desired_extent.width == 0 || self.desired_extent.height == 0 {
            return Err(CreateSwapchainError::InvalidExtent {
                width: self.desired_extent.width,
                height: self.desired_extent.height,
            });
        }

        if !Arc::ptr_eq(self.surface.get_parent(), self.device.get_parent()) {
            return Err(CreateSwapchainError::MismatchedParams);
        }
        if let Some(old) = self.old {
            if !Arc::ptr_eq(&old.parent_device, &self.device)
                || !Arc::ptr_eq(&old._parent_surface, &self.surface)
            {
                return Err(CreateSwapchainError::MismatchedParams);
            }
        }

        let physical_device = self.device.get_physical_device();

        //SAFETY: physical_device belongs to the device's instance, and the
        //surface derives from the same instance (validated above).
        let capabilities = unsafe { self.surface.query_capabilities(physical_device) }?;
        //SAFETY: Same reasoning as above.
        let formats = unsafe { self.surface.query_formats(physical_device) }?;
        //SAFETY: Same reasoning as above.
        let present_modes = unsafe { self.surface.query_present_modes(physical_device) }?;

        if formats.is_empty() {
            return Err(CreateSwapchainError::NoSurfaceFormats);
        }
        if present_modes.is_empty() {
            return Err(CreateSwapchainError::NoPresentModes);
        }

        let surface_format = pick_surface_format(&formats, self.preferred_format);
        let present_mode = pick_present_mode(&present_modes);
        let extent = pick_extent(&capabilities, self.desired_extent);
        let image_count = pick_image_count(&capabilities);
        let composite_alpha = pick_composite_alpha(&capabilities);

        tracing::info!(
            "Creating swapchain {}x{} ({:?}, {:?}, {} images)",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            image_count,
        );

        let queue_family_indices = [self.device.graphics_queue_family()];
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface.raw_handle())
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(composite_alpha)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(
                self.old
                    .map(|old| old.handle)
                    .unwrap_or(vk::SwapchainKHR::null()),
            );

        //SAFETY: create_info references valid handles and values selected
        //from the queried surface support details.
        let handle = unsafe { self.device.create_raw_swapchain(&create_info) }.map_err(
            |e| match e {
                SwapchainDeviceError::SwapchainNotEnabled => {
                    CreateSwapchainError::SwapchainNotEnabled
                }
                SwapchainDeviceError::Vulkan(r) => CreateSwapchainError::VulkanCreate(r),
            },
        )?;

        //SAFETY: handle is a valid swapchain created from this device.
        match unsafe { self.device.set_object_name_str(handle, self.name.as_deref()) } {
            Ok(()) | Err(NameObjectError::DebugUtilsNotEnabled) => {}
            Err(e) => tracing::warn!("Failed to name swapchain {:?}: {e}", handle),
        }

        //SAFETY: handle was created by this device's swapchain loader.
        let images = unsafe { self.device.get_raw_swapchain_images(handle) }
            .map_err(|e| match e {
                SwapchainDeviceError::SwapchainNotEnabled => {
                    CreateSwapchainError::SwapchainNotEnabled
                }
                SwapchainDeviceError::Vulkan(r) => CreateSwapchainError::VulkanGetImages(r),
            })
            .inspect_err(|_| {
                //SAFETY: handle was created above and must be destroyed on
                //the early-exit path.
                unsafe { self.device.destroy_raw_swapchain(handle) };
            })?;

        Ok(Swapchain {
            parent_device: self.device,
            _parent_surface: self.surface,
            handle,
            format: surface_format.format,
            extent,
            images,
            acquire_lock: Mutex::new(()),
        })
    }
}

/// An owned `VkSwapchainKHR`: the rotating set of presentable images tied
/// to a window surface.
pub struct Swapchain<T: HasDisplayHandle + HasWindowHandle> {
    parent_device: Arc<Device>,
    _parent_surface: Arc<Surface<T>>,
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    /// Serializes `vkAcquireNextImageKHR`, which the Vulkan spec requires
    /// to be externally synchronized on the swapchain handle.
    acquire_lock: Mutex<()>,
}

impl<T: HasDisplayHandle + HasWindowHandle> std::fmt::Debug for Swapchain<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swapchain")
            .field("handle", &self.handle)
            .field("format", &self.format)
            .field("extent", &self.extent)
            .field("image_count", &self.images.len())
            .finish_non_exhaustive()
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Swapchain<T> {
    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn raw_handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent_device
    }

    /// Wrap each presentable image.
    ///
    /// The returned images are swapchain-owned: dropping them does not
    /// destroy the underlying `VkImage` (the swapchain reclaims its own
    /// images), but each wrapper keeps this swapchain alive, so views onto
    /// them can never outlive it.
    pub fn images(self: &Arc<Self>) -> Vec<Arc<Image>>
    where
        T: Send + Sync + 'static,
    {
        self.images
            .iter()
            .map(|&image| {
                Arc::new(Image::swapchain_owned(
                    Arc::clone(&self.parent_device),
                    image,
                    self.format,
                    self.extent,
                    Arc::clone(self) as Arc<dyn Any + Send + Sync>,
                ))
            })
            .collect()
    }

    /// Acquire the next presentable image, blocking until one is available.
    ///
    /// Returns `(image_index, suboptimal)`. The index is the only value
    /// accepted by `PresentQueue::present` for this presentation cycle.
    /// When `suboptimal` is `true` the swapchain is still usable but
    /// recreation is recommended; recreation itself is the caller's job.
    pub fn acquire_next_image(
        &self,
        semaphore: &Semaphore,
    ) -> Result<(u32, bool), AcquireImageError> {
        if !Arc::ptr_eq(semaphore.get_parent(), &self.parent_device) {
            return Err(AcquireImageError::MismatchedParams);
        }

        let _guard = self
            .acquire_lock
            .lock()
            .expect("swapchain acquire lock poisoned");
        //SAFETY: The semaphore derives from this swapchain's device
        //(validated above) and self.handle is valid for the lifetime of
        //this swapchain.
        match unsafe {
            self.parent_device.acquire_next_swapchain_image(
                self.handle,
                u64::MAX,
                semaphore.raw_handle(),
                vk::Fence::null(),
            )
        } {
            Ok(result) => Ok(result),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(AcquireImageError::OutOfDate),
            Err(e) => Err(AcquireImageError::Vulkan(e)),
        }
    }
}

impl<T: HasDisplayHandle + HasWindowHandle> Drop for Swapchain<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping swapchain {:?}", self.handle);
        //SAFETY: The swapchain handle was created by parent_device and this
        //is the final destruction path. Callers must ensure GPU
        //synchronization before drop.
        unsafe { self.parent_device.destroy_raw_swapchain(self.handle) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_format_prefers_bgra_srgb_by_default() {
        let fallback = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        let chosen = pick_surface_format(&[fallback, srgb], None);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn surface_format_honors_preference_when_available() {
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        let chosen =
            pick_surface_format(&[srgb, unorm], Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn surface_format_falls_back_to_first_when_preference_missing() {
        let only = vk::SurfaceFormatKHR {
            format: vk::Format::R16G16B16A16_SFLOAT,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        let chosen = pick_surface_format(&[only], Some(vk::Format::B8G8R8A8_UNORM));
        assert_eq!(chosen.format, only.format);
    }

    #[test]
    fn present_mode_prefers_mailbox_over_fifo() {
        let chosen =
            pick_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]);
        assert_eq!(chosen, vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let chosen = pick_present_mode(&[vk::PresentModeKHR::IMMEDIATE]);
        assert_eq!(chosen, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_uses_platform_size_when_fixed() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 1280,
                height: 720,
            },
            ..Default::default()
        };

        let chosen = pick_extent(
            &capabilities,
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
        );
        assert_eq!((chosen.width, chosen.height), (1280, 720));
    }

    #[test]
    fn extent_clamps_to_surface_bounds_when_variable() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 640,
                height: 480,
            },
            max_image_extent: vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            ..Default::default()
        };

        let chosen = pick_extent(
            &capabilities,
            vk::Extent2D {
                width: 4000,
                height: 200,
            },
        );
        assert_eq!((chosen.width, chosen.height), (1920, 480));
    }

    #[test]
    fn image_count_respects_surface_maximum() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(pick_image_count(&capabilities), 3);
    }

    #[test]
    fn image_count_adds_one_when_unbounded() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(pick_image_count(&capabilities), 3);
    }

    #[test]
    fn composite_alpha_prefers_opaque() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED
                | vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        };
        assert_eq!(
            pick_composite_alpha(&capabilities),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
    }
}
