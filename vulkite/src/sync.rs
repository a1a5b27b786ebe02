use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;

#[derive(Debug, Error)]
pub enum CreateFenceError {
    #[error("Vulkan error creating fence: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum WaitFenceError {
    #[error("Vulkan error waiting for fence: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum CreateSemaphoreError {
    #[error("Vulkan error creating semaphore: {0}")]
    Vulkan(vk::Result),
}

/// An owned binary fence for CPU–GPU synchronisation.
///
/// [`wait`](Fence::wait) blocks the host until the GPU signals the fence;
/// [`reset`](Fence::reset) returns it to the unsignaled state before the
/// next submission.
pub struct Fence {
    parent: Arc<Device>,
    handle: vk::Fence,
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Fluent configuration for [`Fence`] creation.
pub struct FenceBuilder {
    device: Arc<Device>,
    signaled: bool,
}

impl FenceBuilder {
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
            signaled: false,
        }
    }

    /// Start the fence in the signaled state, so the first wait-then-reset
    /// cycle of a render loop returns immediately.
    pub fn signaled(mut self) -> Self {
        self.signaled = true;
        self
    }

    pub fn build(self) -> Result<Fence, CreateFenceError> {
        let flags = if self.signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);

        //SAFETY: create_info is fully initialised with no borrowed pointers.
        let handle = unsafe { self.device.create_raw_fence(&create_info) }
            .map_err(CreateFenceError::Vulkan)?;

        Ok(Fence {
            parent: self.device,
            handle,
        })
    }
}

impl Fence {
    /// Block until the fence is signaled.
    ///
    /// No timeout is exposed; the wait is indefinite.
    pub fn wait(&self) -> Result<(), WaitFenceError> {
        //SAFETY: The handle is a valid fence created from parent.
        unsafe {
            self.parent
                .wait_for_raw_fences(&[self.handle], true, u64::MAX)
        }
        .map_err(WaitFenceError::Vulkan)
    }

    /// Reset the fence to the unsignaled state.
    ///
    /// # Safety
    /// The fence must not be pending on any queue submission (the GPU has
    /// already signaled it, or it was never submitted).
    pub unsafe fn reset(&mut self) -> Result<(), vk::Result> {
        //SAFETY: Caller guarantees the fence is not pending.
        unsafe { self.parent.reset_raw_fences(&[self.handle]) }
    }

    /// Wait for the fence, then immediately reset it — the canonical
    /// render-loop step.
    ///
    /// # Safety
    /// No other thread may re-submit this fence's raw handle between the
    /// wait returning and the reset completing. The `&mut` receiver rules
    /// out same-thread re-submission.
    pub unsafe fn wait_and_reset(&mut self) -> Result<(), WaitFenceError> {
        self.wait()?;
        //SAFETY: wait() succeeded, so the fence is signaled and not pending.
        unsafe { self.reset() }.map_err(WaitFenceError::Vulkan)
    }

    /// Whether the fence is currently signaled.
    pub fn is_signaled(&self) -> Result<bool, vk::Result> {
        //SAFETY: The handle is a valid fence created from parent.
        unsafe { self.parent.get_raw_fence_status(self.handle) }
    }

    pub fn raw_handle(&self) -> vk::Fence {
        self.handle
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        tracing::debug!("Dropping fence {:?}", self.handle);
        //SAFETY: The handle was created from parent and no GPU work may
        //still reference it at teardown.
        unsafe { self.parent.destroy_raw_fence(self.handle) };
    }
}

/// An owned binary semaphore for GPU–GPU synchronisation.
///
/// Signaled by one queue operation and waited on by another; the host
/// never observes or resets it directly.
pub struct Semaphore {
    parent: Arc<Device>,
    handle: vk::Semaphore,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Fluent configuration for [`Semaphore`] creation.
pub struct SemaphoreBuilder {
    device: Arc<Device>,
}

impl SemaphoreBuilder {
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
        }
    }

    pub fn build(self) -> Result<Semaphore, CreateSemaphoreError> {
        let create_info = vk::SemaphoreCreateInfo::default();

        //SAFETY: create_info is fully initialised with no borrowed pointers.
        let handle = unsafe { self.device.create_raw_semaphore(&create_info) }
            .map_err(CreateSemaphoreError::Vulkan)?;

        Ok(Semaphore {
            parent: self.device,
            handle,
        })
    }
}

impl Semaphore {
    pub fn raw_handle(&self) -> vk::Semaphore {
        self.handle
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        tracing::debug!("Dropping semaphore {:?}", self.handle);
        //SAFETY: The handle was created from parent and no GPU work may be
        //waiting on or about to signal it at teardown.
        unsafe { self.parent.destroy_raw_semaphore(self.handle) };
    }
}
