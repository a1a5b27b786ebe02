use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::instance::{Instance, SurfaceQueryError};

#[derive(Debug, Error)]
pub enum CreateSurfaceError {
    #[error("Couldn't get display handle: {0}")]
    InvalidDisplayHandle(raw_window_handle::HandleError),
    #[error("Couldn't get window handle: {0}")]
    InvalidWindowHandle(raw_window_handle::HandleError),
    #[error("Vulkan surface creation failed: {0}")]
    VulkanError(vk::Result),
    #[error(
        "Parent instance did not request the surface extensions \
         for this platform"
    )]
    MissingExtension,
}

/// What device selection needs from a presentation surface, independent of
/// the concrete window-source type behind it.
///
/// Implemented by [`Surface<T>`] for any window source. Passing a typed
/// capability here (rather than anything with a `.handle()`) means
/// construction-time dependencies are checked before any native call.
pub trait PresentationTarget {
    fn parent_instance(&self) -> &Arc<Instance>;

    fn raw_surface(&self) -> vk::SurfaceKHR;

    /// Check if a queue family on a physical device can present to this
    /// surface.
    ///
    /// # Safety
    /// `physical_device` must derive from the same instance as this surface.
    unsafe fn supports_queue_family(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool, SurfaceQueryError>;
}

/// An owned `VkSurfaceKHR` tied to the window source it was created from.
///
/// Holding the source behind an `Arc` keeps the window alive for as long as
/// the surface exists.
pub struct Surface<T: HasWindowHandle + HasDisplayHandle> {
    parent_instance: Arc<Instance>,
    handle: vk::SurfaceKHR,
    _surface_source: Arc<T>,
}

impl<T: HasWindowHandle + HasDisplayHandle> std::fmt::Debug for Surface<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("handle", &self.handle)
            .field("parent", &self.parent_instance)
            .finish_non_exhaustive()
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Surface<T> {
    /// Create a surface for `source`'s window.
    ///
    /// # Safety
    /// The surface must be dropped when the window is invalidated (for
    /// example a suspend event in winit), and no in-flight GPU work may
    /// still reference resources derived from it at that point.
    pub unsafe fn new(
        instance: &Arc<Instance>,
        source: Arc<T>,
    ) -> Result<Self, CreateSurfaceError> {
        use crate::instance::CreateRawSurfaceError as Raw;
        //SAFETY: The returned wrapper holds Arc references to both the
        //instance and the source, so they outlive the surface.
        let handle = unsafe { instance.create_raw_surface(&source) }.map_err(|e| match e {
            Raw::OnCreate(r) => CreateSurfaceError::VulkanError(r),
            Raw::DisplayHandle(h) => CreateSurfaceError::InvalidDisplayHandle(h),
            Raw::WindowHandle(h) => CreateSurfaceError::InvalidWindowHandle(h),
            Raw::ExtensionNotLoaded => CreateSurfaceError::MissingExtension,
        })?;

        Ok(Self {
            parent_instance: Arc::clone(instance),
            handle,
            _surface_source: source,
        })
    }

    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.parent_instance
    }

    pub fn raw_handle(&self) -> vk::SurfaceKHR {
        self.handle
    }

    /// Query surface capabilities for this surface.
    ///
    /// # Safety
    /// `physical_device` must derive from the same instance as this surface.
    pub unsafe fn query_capabilities(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::SurfaceCapabilitiesKHR, SurfaceQueryError> {
        //SAFETY: Caller guarantees physical_device provenance.
        unsafe {
            self.parent_instance
                .get_surface_capabilities(physical_device, self.handle)
        }
    }

    /// Query supported surface formats for this surface.
    ///
    /// # Safety
    /// `physical_device` must derive from the same instance as this surface.
    pub unsafe fn query_formats(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::SurfaceFormatKHR>, SurfaceQueryError> {
        //SAFETY: Caller guarantees physical_device provenance.
        unsafe {
            self.parent_instance
                .get_surface_formats(physical_device, self.handle)
        }
    }

    /// Query supported present modes for this surface.
    ///
    /// # Safety
    /// `physical_device` must derive from the same instance as this surface.
    pub unsafe fn query_present_modes(
        &self,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Vec<vk::PresentModeKHR>, SurfaceQueryError> {
        //SAFETY: Caller guarantees physical_device provenance.
        unsafe {
            self.parent_instance
                .get_surface_present_modes(physical_device, self.handle)
        }
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> PresentationTarget for Surface<T> {
    fn parent_instance(&self) -> &Arc<Instance> {
        &self.parent_instance
    }

    fn raw_surface(&self) -> vk::SurfaceKHR {
        self.handle
    }

    unsafe fn supports_queue_family(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family_index: u32,
    ) -> Result<bool, SurfaceQueryError> {
        //SAFETY: Caller guarantees physical_device derives from the same
        //instance as this surface; self.handle is valid.
        unsafe {
            self.parent_instance.get_raw_physical_device_surface_support(
                physical_device,
                queue_family_index,
                self.handle,
            )
        }
    }
}

impl<T: HasWindowHandle + HasDisplayHandle> Drop for Surface<T> {
    fn drop(&mut self) {
        tracing::debug!("Dropping surface {:?}", self.handle);
        //SAFETY: Every object derived from this surface must already be
        //dropped, and no in-flight work may still reference it.
        let _ = unsafe { self.parent_instance.destroy_raw_surface(self.handle) }.inspect_err(
            |e| tracing::error!("Error while dropping surface {:?}: {e}", self.handle),
        );
    }
}
