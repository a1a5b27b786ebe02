use std::sync::Arc;

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use thiserror::Error;

use crate::command::CommandBuffer;
use crate::device::Device;
use crate::swapchain::Swapchain;
use crate::sync::{Fence, Semaphore};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(
        "Mismatched wait lists: {stages} wait stages for {semaphores} wait \
         semaphores (one stage per wait point is required)"
    )]
    MismatchedWaitCounts { stages: usize, semaphores: usize },

    #[error("Command buffer {index} has no finished recording to submit")]
    NotExecutable { index: usize },

    #[error(
        "Mismatched parameters to submit. Buffers, semaphores, and the \
         fence must derive from the queue's device"
    )]
    MismatchedParams,

    #[error("Vulkan error submitting to queue: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum PresentError {
    #[error(
        "Image index {index} is out of range for a swapchain with \
         {count} images"
    )]
    ImageIndexOutOfRange { index: u32, count: u32 },

    #[error(
        "Mismatched parameters to present. The swapchain and semaphore must \
         derive from the queue's device"
    )]
    MismatchedParams,

    #[error("The swapchain no longer matches the surface and must be recreated")]
    OutOfDate,

    #[error("Vulkan error presenting: {0}")]
    Vulkan(vk::Result),
}

/// Host-side validation gate in front of the native submit call.
///
/// The native closure runs only after every check passes, so a rejected
/// submission provably issues zero native calls.
fn submit_guarded<F>(
    wait_stage_count: usize,
    wait_semaphore_count: usize,
    buffers_executable: &[bool],
    native: F,
) -> Result<(), SubmitError>
where
    F: FnOnce() -> Result<(), vk::Result>,
{
    if wait_stage_count != wait_semaphore_count {
        return Err(SubmitError::MismatchedWaitCounts {
            stages: wait_stage_count,
            semaphores: wait_semaphore_count,
        });
    }
    if let Some(index) = buffers_executable.iter().position(|executable| !executable) {
        return Err(SubmitError::NotExecutable { index });
    }
    native().map_err(SubmitError::Vulkan)
}

/// Same gate for presentation: the image index must come from this
/// presentation cycle's acquire.
fn present_guarded<F>(
    image_index: u32,
    image_count: u32,
    native: F,
) -> Result<bool, PresentError>
where
    F: FnOnce() -> Result<bool, vk::Result>,
{
    if image_index >= image_count {
        return Err(PresentError::ImageIndexOutOfRange {
            index: image_index,
            count: image_count,
        });
    }
    match native() {
        Ok(suboptimal) => Ok(suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(PresentError::OutOfDate),
        Err(e) => Err(PresentError::Vulkan(e)),
    }
}

/// The queue selected for the device's requested capability flags.
pub struct GraphicsQueue {
    parent: Arc<Device>,
    handle: vk::Queue,
    family: u32,
}

impl std::fmt::Debug for GraphicsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsQueue")
            .field("handle", &self.handle)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl GraphicsQueue {
    pub(crate) fn new(parent: Arc<Device>, handle: vk::Queue, family: u32) -> Self {
        Self {
            parent,
            handle,
            family,
        }
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }

    /// Submit finished command buffers.
    ///
    /// `wait_stages` and `wait_semaphores` pair up one-to-one: each wait
    /// semaphore blocks the pipeline at its paired stage. Mismatched
    /// lengths are rejected before any native call.
    ///
    /// `fence` is signaled when all submitted work completes.
    pub fn submit(
        &self,
        command_buffers: &[&CommandBuffer],
        wait_stages: &[vk::PipelineStageFlags],
        wait_semaphores: &[&Semaphore],
        signal_semaphores: &[&Semaphore],
        fence: &Fence,
    ) -> Result<(), SubmitError> {
        let same_device = command_buffers
            .iter()
            .all(|buffer| Arc::ptr_eq(buffer.get_parent(), &self.parent))
            && wait_semaphores
                .iter()
                .chain(signal_semaphores.iter())
                .all(|semaphore| Arc::ptr_eq(semaphore.get_parent(), &self.parent))
            && Arc::ptr_eq(fence.get_parent(), &self.parent);
        if !same_device {
            return Err(SubmitError::MismatchedParams);
        }

        let executable: Vec<bool> = command_buffers
            .iter()
            .map(|buffer| buffer.is_executable())
            .collect();

        submit_guarded(wait_stages.len(), wait_semaphores.len(), &executable, || {
            let raw_buffers: Vec<vk::CommandBuffer> = command_buffers
                .iter()
                .map(|buffer| buffer.raw_handle())
                .collect();
            let raw_waits: Vec<vk::Semaphore> = wait_semaphores
                .iter()
                .map(|semaphore| semaphore.raw_handle())
                .collect();
            let raw_signals: Vec<vk::Semaphore> = signal_semaphores
                .iter()
                .map(|semaphore| semaphore.raw_handle())
                .collect();

            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&raw_waits)
                .wait_dst_stage_mask(wait_stages)
                .command_buffers(&raw_buffers)
                .signal_semaphores(&raw_signals);

            //SAFETY: The queue belongs to this device, and every handle in
            //the submit info was validated to derive from it.
            unsafe {
                self.parent.queue_submit_raw(
                    self.handle,
                    std::slice::from_ref(&submit_info),
                    fence.raw_handle(),
                )
            }
        })
    }
}

/// The queue able to present to the surface the device was built with.
pub struct PresentQueue {
    parent: Arc<Device>,
    handle: vk::Queue,
    family: u32,
}

impl std::fmt::Debug for PresentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentQueue")
            .field("handle", &self.handle)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

impl PresentQueue {
    pub(crate) fn new(parent: Arc<Device>, handle: vk::Queue, family: u32) -> Self {
        Self {
            parent,
            handle,
            family,
        }
    }

    pub fn family(&self) -> u32 {
        self.family
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }

    /// Queue `image_index` for presentation once `wait_semaphore` signals.
    ///
    /// The index must be one returned by the swapchain's acquire for this
    /// presentation cycle; anything out of range is rejected before any
    /// native call. Returns `true` when the swapchain is suboptimal and
    /// recreation is recommended (the caller's responsibility).
    pub fn present<T: HasDisplayHandle + HasWindowHandle>(
        &self,
        swapchain: &Swapchain<T>,
        image_index: u32,
        wait_semaphore: &Semaphore,
    ) -> Result<bool, PresentError> {
        if !Arc::ptr_eq(swapchain.get_parent(), &self.parent)
            || !Arc::ptr_eq(wait_semaphore.get_parent(), &self.parent)
        {
            return Err(PresentError::MismatchedParams);
        }

        present_guarded(image_index, swapchain.image_count(), || {
            let wait_semaphores = [wait_semaphore.raw_handle()];
            let swapchains = [swapchain.raw_handle()];
            let image_indices = [image_index];

            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            //SAFETY: The queue belongs to this device, and the swapchain and
            //semaphore were validated to derive from it.
            unsafe { self.parent.queue_present_raw(self.handle, &present_info) }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn mismatched_wait_lists_are_rejected_before_the_native_call() {
        let native_calls = Cell::new(0usize);

        let err = submit_guarded(2, 1, &[true], || {
            native_calls.set(native_calls.get() + 1);
            Ok(())
        })
        .expect_err("mismatched wait lists must fail");

        assert!(matches!(
            err,
            SubmitError::MismatchedWaitCounts {
                stages: 2,
                semaphores: 1
            }
        ));
        assert_eq!(native_calls.get(), 0, "no native submission may be issued");
    }

    #[test]
    fn unfinished_buffers_are_rejected_before_the_native_call() {
        let native_calls = Cell::new(0usize);

        let err = submit_guarded(1, 1, &[true, false], || {
            native_calls.set(native_calls.get() + 1);
            Ok(())
        })
        .expect_err("unfinished buffer must fail");

        assert!(matches!(err, SubmitError::NotExecutable { index: 1 }));
        assert_eq!(native_calls.get(), 0);
    }

    #[test]
    fn valid_submission_reaches_the_native_call_once() {
        let native_calls = Cell::new(0usize);

        submit_guarded(1, 1, &[true], || {
            native_calls.set(native_calls.get() + 1);
            Ok(())
        })
        .expect("valid submission");

        assert_eq!(native_calls.get(), 1);
    }

    #[test]
    fn out_of_range_image_index_is_rejected_before_the_native_call() {
        let native_calls = Cell::new(0usize);

        let err = present_guarded(3, 3, || {
            native_calls.set(native_calls.get() + 1);
            Ok(false)
        })
        .expect_err("index == count is out of range");

        assert!(matches!(
            err,
            PresentError::ImageIndexOutOfRange { index: 3, count: 3 }
        ));
        assert_eq!(native_calls.get(), 0);
    }

    #[test]
    fn out_of_date_surfaces_as_a_distinct_error() {
        let err = present_guarded(0, 3, || Err(vk::Result::ERROR_OUT_OF_DATE_KHR))
            .expect_err("out of date must propagate");
        assert!(matches!(err, PresentError::OutOfDate));
    }

    #[test]
    fn suboptimal_present_is_reported_to_the_caller() {
        let suboptimal = present_guarded(1, 3, || Ok(true)).expect("present succeeds");
        assert!(suboptimal);
    }
}
