use std::collections::BTreeSet;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::instance::{FetchPhysicalDeviceError, Instance, SurfaceQueryError};
use crate::queue::{GraphicsQueue, PresentQueue};
use crate::surface::PresentationTarget;

#[derive(Debug, Error)]
pub enum CreateDeviceError {
    #[error("No queue capability flags were requested before build")]
    NoQueueCapabilities,

    #[error(
        "Mismatched parameters to DeviceFinder::build. The presentation \
         surface must derive from the same instance as the finder"
    )]
    MismatchedParams,

    #[error("Host memory exhaustion while enumerating physical devices")]
    MemoryExhaustion,

    #[error("Unknown Vulkan error while selecting a physical device: {0}")]
    UnknownVulkan(vk::Result),

    #[error("No physical device satisfies the requested capabilities")]
    NoSuitableDevice,

    #[error("Failed to create logical device: {0}")]
    DeviceCreationFailed(vk::Result),

    #[error("Error checking surface support: {0}")]
    SurfaceSupport(#[from] SurfaceQueryError),
}

impl From<FetchPhysicalDeviceError> for CreateDeviceError {
    fn from(value: FetchPhysicalDeviceError) -> Self {
        match value {
            FetchPhysicalDeviceError::MemoryExhaustion => Self::MemoryExhaustion,
            FetchPhysicalDeviceError::UnknownVulkan(e) => Self::UnknownVulkan(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum NameObjectError {
    #[error("Debug utils extension is not enabled on this device")]
    DebugUtilsNotEnabled,

    #[error("Invalid Vulkan object name (contains interior NUL): {0}")]
    InvalidName(std::ffi::NulError),

    #[error("Vulkan error setting object name: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum SwapchainDeviceError {
    #[error("Swapchain support was not enabled on this device")]
    SwapchainNotEnabled,
    #[error("Vulkan error: {0}")]
    Vulkan(vk::Result),
}

/// An owned logical device plus the queues selected for it.
///
/// All child resources are created and destroyed through the `*_raw_*`
/// wrappers here, so the extension loaders live exactly as long as the
/// device that needs them.
pub struct Device {
    parent: Arc<Instance>,
    handle: ash::Device,
    swapchain_device: Option<ash::khr::swapchain::Device>,
    debug_utils_device: Option<ash::ext::debug_utils::Device>,
    physical_device: vk::PhysicalDevice,
    graphics_queue: (vk::Queue, u32),
    present_queue: Option<(vk::Queue, u32)>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.handle.handle())
            .finish_non_exhaustive()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        tracing::debug!("Dropping device {:?}", self.handle.handle());
        //SAFETY: All objects derived from this device are dropped before
        //the device (enforced by their Arc parent references).
        unsafe { self.handle.destroy_device(None) };
    }
}

/// Fluent device selection: accumulate queue capability flags and an
/// optional presentation surface, then `build` the logical device.
///
/// Consuming: the accumulated state moves out exactly once in `build`.
pub struct DeviceFinder<'a> {
    instance: Arc<Instance>,
    queue_flags: vk::QueueFlags,
    present_to: Option<&'a dyn PresentationTarget>,
}

impl<'a> DeviceFinder<'a> {
    pub(crate) fn new(instance: Arc<Instance>) -> DeviceFinder<'static> {
        DeviceFinder {
            instance,
            queue_flags: vk::QueueFlags::empty(),
            present_to: None,
        }
    }

    /// Require a queue family with (at least) these capability flags.
    /// Multiple calls accumulate.
    pub fn with_queue(mut self, flags: vk::QueueFlags) -> Self {
        self.queue_flags |= flags;
        self
    }

    /// Require presentation support to `target` and enable the swapchain
    /// extension on the built device.
    pub fn with_presentation<'b>(self, target: &'b dyn PresentationTarget) -> DeviceFinder<'b>
    where
        'a: 'b,
    {
        DeviceFinder {
            instance: self.instance,
            queue_flags: self.queue_flags,
            present_to: Some(target),
        }
    }

    /// Select the best physical device and create the logical device.
    pub fn build(self) -> Result<Device, CreateDeviceError> {
        if self.queue_flags.is_empty() {
            return Err(CreateDeviceError::NoQueueCapabilities);
        }
        if let Some(target) = self.present_to {
            if !Arc::ptr_eq(target.parent_instance(), &self.instance) {
                return Err(CreateDeviceError::MismatchedParams);
            }
        }

        let device_type_priority = |dt: vk::PhysicalDeviceType| -> u32 {
            match dt {
                vk::PhysicalDeviceType::DISCRETE_GPU => 3,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 2,
                vk::PhysicalDeviceType::VIRTUAL_GPU => 1,
                _ => 0,
            }
        };

        struct Candidate {
            handle: vk::PhysicalDevice,
            props: vk::PhysicalDeviceProperties,
            capability_family: u32,
            present_family: Option<u32>,
            score: u32,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for physical_device in self.instance.fetch_physical_devices()? {
            //SAFETY: physical_device was fetched from this instance.
            let props = unsafe {
                self.instance
                    .get_raw_physical_device_properties(physical_device)
            };
            //SAFETY: physical_device was fetched from this instance.
            let queue_families = unsafe {
                self.instance
                    .get_raw_physical_device_queue_family_properties(physical_device)
            };

            let capability_family = queue_families
                .iter()
                .enumerate()
                .find(|(_, family)| family.queue_flags.contains(self.queue_flags))
                .map(|(idx, _)| idx as u32);
            let Some(capability_family) = capability_family else {
                continue;
            };

            let present_family = match self.present_to {
                Some(target) => {
                    let mut found = None;
                    // Prefer presenting from the capability family so one
                    // queue serves both roles.
                    let ordering = std::iter::once(capability_family).chain(
                        (0..queue_families.len() as u32).filter(|idx| *idx != capability_family),
                    );
                    for family_index in ordering {
                        //SAFETY: physical_device and the surface both derive
                        //from self.instance (validated above).
                        if unsafe {
                            target.supports_queue_family(physical_device, family_index)
                        }? {
                            found = Some(family_index);
                            break;
                        }
                    }
                    match found {
                        Some(idx) => Some(idx),
                        None => continue,
                    }
                }
                None => None,
            };

            candidates.push(Candidate {
                handle: physical_device,
                props,
                capability_family,
                present_family,
                score: device_type_priority(props.device_type),
            });
        }

        let best = candidates
            .into_iter()
            .max_by_key(|candidate| candidate.score)
            .ok_or(CreateDeviceError::NoSuitableDevice)?;

        tracing::info!(
            "Selected physical device: {:?} (type: {:?}, capability family: {}, present family: {:?})",
            best.props.device_name_as_c_str().unwrap_or(c"unknown"),
            best.props.device_type,
            best.capability_family,
            best.present_family,
        );

        let families: BTreeSet<u32> = [Some(best.capability_family), best.present_family]
            .into_iter()
            .flatten()
            .collect();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo<'_>> = families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let mut enabled_exts: Vec<&CStr> = Vec::new();
        if self.present_to.is_some() {
            enabled_exts.push(ash::khr::swapchain::NAME);
        }
        let ext_ptrs: Vec<*const std::ffi::c_char> =
            enabled_exts.iter().map(|ext| ext.as_ptr()).collect();

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&ext_ptrs);

        //SAFETY: best.handle was fetched from this instance and
        //device_create_info is valid for the duration of the call.
        let handle = unsafe {
            self.instance
                .create_ash_device(best.handle, &device_create_info)
        }
        .map_err(CreateDeviceError::DeviceCreationFailed)?;

        //SAFETY: The device was just created with one queue per family in
        //`families`, so (family, 0) is always valid.
        let graphics_queue = unsafe { handle.get_device_queue(best.capability_family, 0) };
        let present_queue = best.present_family.map(|family| {
            //SAFETY: Same reasoning as above.
            (unsafe { handle.get_device_queue(family, 0) }, family)
        });

        Ok(Device {
            swapchain_device: if self.present_to.is_some() {
                Some(self.instance.create_swapchain_loader(&handle))
            } else {
                None
            },
            debug_utils_device: self.instance.create_debug_utils_device_loader(&handle),
            parent: self.instance,
            handle,
            physical_device: best.handle,
            graphics_queue: (graphics_queue, best.capability_family),
            present_queue,
        })
    }
}

impl Device {
    pub fn get_parent(&self) -> &Arc<Instance> {
        &self.parent
    }

    pub fn get_physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn raw_handle(&self) -> vk::Device {
        self.handle.handle()
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue.1
    }

    pub fn has_swapchain_support(&self) -> bool {
        self.swapchain_device.is_some()
    }

    /// The queue selected for the requested capability flags.
    pub fn graphics_queue(self: &Arc<Self>) -> GraphicsQueue {
        GraphicsQueue::new(Arc::clone(self), self.graphics_queue.0, self.graphics_queue.1)
    }

    /// The presentation queue, when the device was built with a
    /// presentation surface.
    pub fn present_queue(self: &Arc<Self>) -> Option<PresentQueue> {
        self.present_queue
            .map(|(queue, family)| PresentQueue::new(Arc::clone(self), queue, family))
    }

    /// Wait until all submitted work on this device has completed.
    ///
    /// Blocks the calling thread; meant for coarse transitions (shutdown,
    /// suspend, swapchain teardown) rather than per-frame paths.
    pub fn wait_idle(&self) -> Result<(), vk::Result> {
        let _span = tracing::debug_span!("device_wait_idle").entered();
        //SAFETY: The handle is a valid logical device for the lifetime of
        //self; no pointer preconditions.
        unsafe { self.handle.device_wait_idle() }
    }
}

// Swapchain functionality
impl Device {
    /// # Safety
    /// `create_info` must reference valid objects derived from this device
    /// and its parent instance. A non-null `old_swapchain` must be a valid
    /// swapchain created from this device.
    pub unsafe fn create_raw_swapchain(
        &self,
        create_info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> Result<vk::SwapchainKHR, SwapchainDeviceError> {
        let loader = self
            .swapchain_device
            .as_ref()
            .ok_or(SwapchainDeviceError::SwapchainNotEnabled)?;
        //SAFETY: Caller guarantees create_info validity and provenance.
        unsafe { loader.create_swapchain(create_info, None) }.map_err(SwapchainDeviceError::Vulkan)
    }

    /// # Safety
    /// `swapchain` must be a valid, not-yet-destroyed swapchain created from
    /// this device.
    pub unsafe fn get_raw_swapchain_images(
        &self,
        swapchain: vk::SwapchainKHR,
    ) -> Result<Vec<vk::Image>, SwapchainDeviceError> {
        let loader = self
            .swapchain_device
            .as_ref()
            .ok_or(SwapchainDeviceError::SwapchainNotEnabled)?;
        //SAFETY: Caller guarantees swapchain validity.
        unsafe { loader.get_swapchain_images(swapchain) }.map_err(SwapchainDeviceError::Vulkan)
    }

    /// # Safety
    /// `swapchain` must derive from this device; all child resources derived
    /// from it must be destroyed first and no in-flight GPU work may still
    /// reference it.
    pub unsafe fn destroy_raw_swapchain(&self, swapchain: vk::SwapchainKHR) {
        if let Some(loader) = self.swapchain_device.as_ref() {
            //SAFETY: Caller guarantees provenance and drop ordering.
            unsafe { loader.destroy_swapchain(swapchain, None) };
        }
    }

    /// # Safety
    /// `swapchain` must derive from this device. `semaphore` and `fence`,
    /// when not null, must be valid unsignaled handles from this device.
    pub unsafe fn acquire_next_swapchain_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        semaphore: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<(u32, bool), vk::Result> {
        let loader = self
            .swapchain_device
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        //SAFETY: Caller guarantees handle provenance and sync object state.
        unsafe { loader.acquire_next_image(swapchain, timeout_ns, semaphore, fence) }
    }

    /// # Safety
    /// `queue` must belong to this device and `present_info` must reference
    /// valid handles derived from it.
    pub unsafe fn queue_present_raw(
        &self,
        queue: vk::Queue,
        present_info: &vk::PresentInfoKHR<'_>,
    ) -> Result<bool, vk::Result> {
        let loader = self
            .swapchain_device
            .as_ref()
            .ok_or(vk::Result::ERROR_EXTENSION_NOT_PRESENT)?;
        //SAFETY: Caller guarantees handle provenance.
        unsafe { loader.queue_present(queue, present_info) }
    }
}

// Image and framebuffer functionality
impl Device {
    /// # Safety
    /// `create_info` must reference valid objects derived from this device.
    pub unsafe fn create_raw_image_view(
        &self,
        create_info: &vk::ImageViewCreateInfo<'_>,
    ) -> Result<vk::ImageView, vk::Result> {
        //SAFETY: Caller guarantees create_info validity and provenance.
        unsafe { self.handle.create_image_view(create_info, None) }
    }

    /// # Safety
    /// `image_view` must derive from this device, with all objects using it
    /// destroyed first and no in-flight GPU work referencing it.
    pub unsafe fn destroy_raw_image_view(&self, image_view: vk::ImageView) {
        //SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_image_view(image_view, None) };
    }

    /// # Safety
    /// `image` must be a standalone (non-swapchain) image derived from this
    /// device, with all views onto it destroyed first.
    pub unsafe fn destroy_raw_image(&self, image: vk::Image) {
        //SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_image(image, None) };
    }

    /// # Safety
    /// `create_info` must reference a valid render pass and image views, all
    /// derived from this device.
    pub unsafe fn create_raw_framebuffer(
        &self,
        create_info: &vk::FramebufferCreateInfo<'_>,
    ) -> Result<vk::Framebuffer, vk::Result> {
        //SAFETY: Caller guarantees create_info validity and provenance.
        unsafe { self.handle.create_framebuffer(create_info, None) }
    }

    /// # Safety
    /// `framebuffer` must derive from this device and no in-flight GPU work
    /// may still reference it.
    pub unsafe fn destroy_raw_framebuffer(&self, framebuffer: vk::Framebuffer) {
        //SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_framebuffer(framebuffer, None) };
    }
}

// Render pass functionality
impl Device {
    /// # Safety
    /// `create_info` must be fully initialised with no dangling pointers.
    pub unsafe fn create_raw_render_pass(
        &self,
        create_info: &vk::RenderPassCreateInfo<'_>,
    ) -> Result<vk::RenderPass, vk::Result> {
        //SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_render_pass(create_info, None) }
    }

    /// # Safety
    /// `render_pass` must derive from this device, with all framebuffers and
    /// pipelines built against it destroyed first.
    pub unsafe fn destroy_raw_render_pass(&self, render_pass: vk::RenderPass) {
        //SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_render_pass(render_pass, None) };
    }
}

// Shader module functionality
impl Device {
    /// # Safety
    /// `create_info` must contain valid SPIR-V code words.
    pub unsafe fn create_raw_shader_module(
        &self,
        create_info: &vk::ShaderModuleCreateInfo<'_>,
    ) -> Result<vk::ShaderModule, vk::Result> {
        //SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_shader_module(create_info, None) }
    }

    /// # Safety
    /// `shader_module` must derive from this device, with all pipelines
    /// built from it destroyed first.
    pub unsafe fn destroy_raw_shader_module(&self, shader_module: vk::ShaderModule) {
        //SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_shader_module(shader_module, None) };
    }
}

// Pipeline functionality
impl Device {
    /// # Safety
    /// `create_info` must reference valid descriptor set layouts derived
    /// from this device, if any.
    pub unsafe fn create_raw_pipeline_layout(
        &self,
        create_info: &vk::PipelineLayoutCreateInfo<'_>,
    ) -> Result<vk::PipelineLayout, vk::Result> {
        //SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_pipeline_layout(create_info, None) }
    }

    /// # Safety
    /// `layout` must derive from this device, with no pipeline still using
    /// it in flight.
    pub unsafe fn destroy_raw_pipeline_layout(&self, layout: vk::PipelineLayout) {
        //SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline_layout(layout, None) };
    }

    /// Create a single graphics pipeline.
    ///
    /// On partial batch failure ash returns any successfully-created
    /// handles alongside the error; this wrapper destroys them so callers
    /// never receive a mix of valid and invalid handles.
    ///
    /// # Safety
    /// `create_info` must reference valid shader stages, a valid pipeline
    /// layout, and a valid render pass, all derived from this device.
    pub unsafe fn create_raw_graphics_pipeline(
        &self,
        create_info: &vk::GraphicsPipelineCreateInfo<'_>,
    ) -> Result<vk::Pipeline, vk::Result> {
        //SAFETY: Caller guarantees create_info validity.
        unsafe {
            self.handle.create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(create_info),
                None,
            )
        }
        .map_err(|(partial, result)| {
            for pipeline in partial {
                if pipeline != vk::Pipeline::null() {
                    //SAFETY: pipeline was just created by this device.
                    unsafe { self.handle.destroy_pipeline(pipeline, None) };
                }
            }
            result
        })
        .map(|mut pipelines| {
            debug_assert_eq!(pipelines.len(), 1);
            pipelines.remove(0)
        })
    }

    /// # Safety
    /// `pipeline` must derive from this device and no in-flight GPU work may
    /// still reference it.
    pub unsafe fn destroy_raw_pipeline(&self, pipeline: vk::Pipeline) {
        //SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_pipeline(pipeline, None) };
    }
}

// Command pool and recording functionality
impl Device {
    /// # Safety
    /// `create_info` must use a queue family index valid for this device.
    pub unsafe fn create_raw_command_pool(
        &self,
        create_info: &vk::CommandPoolCreateInfo<'_>,
    ) -> Result<vk::CommandPool, vk::Result> {
        //SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_command_pool(create_info, None) }
    }

    /// # Safety
    /// `pool` must derive from this device and none of its buffers may be
    /// pending execution. Destroying the pool frees all buffers allocated
    /// from it.
    pub unsafe fn destroy_raw_command_pool(&self, pool: vk::CommandPool) {
        //SAFETY: Caller guarantees provenance and drop ordering.
        unsafe { self.handle.destroy_command_pool(pool, None) };
    }

    /// # Safety
    /// `allocate_info` must reference a valid pool created from this device,
    /// with no concurrent pool access.
    pub unsafe fn allocate_raw_command_buffers(
        &self,
        allocate_info: &vk::CommandBufferAllocateInfo<'_>,
    ) -> Result<Vec<vk::CommandBuffer>, vk::Result> {
        //SAFETY: Caller guarantees allocate_info validity and external
        //synchronization on the pool.
        unsafe { self.handle.allocate_command_buffers(allocate_info) }
    }

    /// # Safety
    /// `cmd` must be a command buffer in the initial state, allocated from a
    /// pool of this device.
    pub unsafe fn begin_raw_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
    ) -> Result<(), vk::Result> {
        let begin_info = vk::CommandBufferBeginInfo::default();
        //SAFETY: Caller guarantees the buffer is in the initial state.
        unsafe { self.handle.begin_command_buffer(cmd, &begin_info) }
    }

    /// # Safety
    /// `cmd` must be in the recording state with all nested scopes closed.
    pub unsafe fn end_raw_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
        //SAFETY: Caller guarantees the buffer is in the recording state.
        unsafe { self.handle.end_command_buffer(cmd) }
    }

    /// # Safety
    /// `cmd` must be in the recording state, outside a render pass.
    /// `begin_info` must reference a render pass and framebuffer derived
    /// from this device.
    pub unsafe fn cmd_begin_raw_render_pass(
        &self,
        cmd: vk::CommandBuffer,
        begin_info: &vk::RenderPassBeginInfo<'_>,
    ) {
        //SAFETY: Caller guarantees recording state and begin_info validity.
        unsafe {
            self.handle
                .cmd_begin_render_pass(cmd, begin_info, vk::SubpassContents::INLINE)
        }
    }

    /// # Safety
    /// `cmd` must be in the recording state, inside an active render pass.
    pub unsafe fn cmd_end_raw_render_pass(&self, cmd: vk::CommandBuffer) {
        //SAFETY: Caller guarantees active render pass state.
        unsafe { self.handle.cmd_end_render_pass(cmd) }
    }

    /// # Safety
    /// `cmd` must be in the recording state. `pipeline` must be a valid
    /// graphics pipeline derived from this device.
    pub unsafe fn cmd_bind_raw_graphics_pipeline(
        &self,
        cmd: vk::CommandBuffer,
        pipeline: vk::Pipeline,
    ) {
        //SAFETY: Caller guarantees recording state and pipeline validity.
        unsafe {
            self.handle
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    /// # Safety
    /// `cmd` must be in the recording state, inside an active render pass,
    /// with a compatible graphics pipeline bound.
    pub unsafe fn cmd_draw_raw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        //SAFETY: Caller guarantees render pass and pipeline state validity.
        unsafe {
            self.handle
                .cmd_draw(cmd, vertex_count, instance_count, first_vertex, first_instance)
        }
    }
}

// Synchronization functionality
impl Device {
    /// # Safety
    /// `create_info` must be fully initialised.
    pub unsafe fn create_raw_fence(
        &self,
        create_info: &vk::FenceCreateInfo<'_>,
    ) -> Result<vk::Fence, vk::Result> {
        //SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_fence(create_info, None) }
    }

    /// # Safety
    /// `fence` must derive from this device and not be pending on any queue.
    pub unsafe fn destroy_raw_fence(&self, fence: vk::Fence) {
        //SAFETY: Caller guarantees provenance and that the fence is idle.
        unsafe { self.handle.destroy_fence(fence, None) };
    }

    /// # Safety
    /// All fences must derive from this device.
    pub unsafe fn wait_for_raw_fences(
        &self,
        fences: &[vk::Fence],
        wait_all: bool,
        timeout_ns: u64,
    ) -> Result<(), vk::Result> {
        //SAFETY: Caller guarantees fence provenance.
        unsafe { self.handle.wait_for_fences(fences, wait_all, timeout_ns) }
    }

    /// # Safety
    /// All fences must derive from this device and none may be pending.
    pub unsafe fn reset_raw_fences(&self, fences: &[vk::Fence]) -> Result<(), vk::Result> {
        //SAFETY: Caller guarantees fence provenance and idle state.
        unsafe { self.handle.reset_fences(fences) }
    }

    /// # Safety
    /// `fence` must derive from this device.
    pub unsafe fn get_raw_fence_status(&self, fence: vk::Fence) -> Result<bool, vk::Result> {
        //SAFETY: Caller guarantees fence provenance.
        unsafe { self.handle.get_fence_status(fence) }
    }

    /// # Safety
    /// `create_info` must be fully initialised.
    pub unsafe fn create_raw_semaphore(
        &self,
        create_info: &vk::SemaphoreCreateInfo<'_>,
    ) -> Result<vk::Semaphore, vk::Result> {
        //SAFETY: Caller guarantees create_info validity.
        unsafe { self.handle.create_semaphore(create_info, None) }
    }

    /// # Safety
    /// `semaphore` must derive from this device with no GPU work waiting on
    /// or about to signal it.
    pub unsafe fn destroy_raw_semaphore(&self, semaphore: vk::Semaphore) {
        //SAFETY: Caller guarantees provenance and idle state.
        unsafe { self.handle.destroy_semaphore(semaphore, None) };
    }

    /// # Safety
    /// `queue` must belong to this device, `submits` must reference valid
    /// handles from it, and `fence` (when not null) must be unsignaled.
    pub unsafe fn queue_submit_raw(
        &self,
        queue: vk::Queue,
        submits: &[vk::SubmitInfo<'_>],
        fence: vk::Fence,
    ) -> Result<(), vk::Result> {
        //SAFETY: Caller guarantees handle provenance and fence state.
        unsafe { self.handle.queue_submit(queue, submits, fence) }
    }
}

// Debug naming functionality
impl Device {
    /// Set a Vulkan debug name for an object owned by this device.
    ///
    /// Passing `None` as the name is treated as a no-op.
    ///
    /// # Safety
    /// `object` must be a valid handle created from this device and remain
    /// valid for the duration of the call.
    pub unsafe fn set_object_name<H>(
        &self,
        object: H,
        name: Option<&CStr>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let debug_utils = self
            .debug_utils_device
            .as_ref()
            .ok_or(NameObjectError::DebugUtilsNotEnabled)?;

        let Some(name) = name else {
            return Ok(());
        };

        let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(object)
            .object_name(name);

        //SAFETY: Caller guarantees object provenance and validity.
        unsafe { debug_utils.set_debug_utils_object_name(&name_info) }
            .map_err(NameObjectError::Vulkan)
    }

    /// Convenience helper to set a debug name from UTF-8 text.
    ///
    /// # Safety
    /// Same contract as [`set_object_name`](Self::set_object_name).
    pub unsafe fn set_object_name_str<H>(
        &self,
        object: H,
        name: Option<&str>,
    ) -> Result<(), NameObjectError>
    where
        H: vk::Handle,
    {
        let name = match name {
            Some(name) => Some(CString::new(name).map_err(NameObjectError::InvalidName)?),
            None => None,
        };
        //SAFETY: Shares the safety contract of set_object_name.
        unsafe { self.set_object_name(object, name.as_deref()) }
    }
}
