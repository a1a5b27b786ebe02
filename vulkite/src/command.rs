use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use crate::device::Device;
use crate::image::Framebuffer;
use crate::pipeline::GraphicsPipeline;
use crate::render_pass::RenderPass;

#[derive(Debug, Error)]
pub enum CreateCommandPoolError {
    #[error("Vulkan error creating command pool: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum AllocateCommandBufferError {
    #[error("Vulkan error allocating command buffers: {0}")]
    Vulkan(vk::Result),
}

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("The command buffer is already being recorded")]
    AlreadyRecording,

    #[error("The command buffer was already recorded; recording is single-use")]
    AlreadyRecorded,

    #[error(
        "Mismatched parameters to the recorder. Render passes, framebuffers, \
         and pipelines must derive from the command buffer's device"
    )]
    MismatchedParams,

    #[error("Vulkan error recording command buffer: {0}")]
    Vulkan(vk::Result),
}

/// Everything the recorder hierarchy needs from the native layer, as an
/// explicit capability rather than a concrete device.
///
/// [`Device`] is the production implementation; tests substitute a
/// call-recording fake to observe begin/end pairing without a GPU.
///
/// Binding a pipeline opens a logical scope with no native end call, so
/// `end_pipeline_scope` defaults to a no-op.
pub trait CommandSink {
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result>;
    fn begin_render_pass(&self, cmd: vk::CommandBuffer, params: &RenderPassBeginParams);
    fn end_render_pass(&self, cmd: vk::CommandBuffer);
    fn bind_graphics_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn end_pipeline_scope(&self, cmd: vk::CommandBuffer) {
        let _ = cmd;
    }
    fn draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );
}

/// Parameters for opening a render pass scope on a command buffer.
#[derive(Debug, Clone, Copy)]
pub struct RenderPassBeginParams {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

impl CommandSink for Device {
    fn begin_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
        //SAFETY: Recorders only begin buffers tracked as Initial, allocated
        //from a pool of this device.
        unsafe { self.begin_raw_command_buffer(cmd) }
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
        //SAFETY: The recorder hierarchy guarantees the buffer is recording
        //with every nested scope already closed.
        unsafe { self.end_raw_command_buffer(cmd) }
    }

    fn begin_render_pass(&self, cmd: vk::CommandBuffer, params: &RenderPassBeginParams) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: params.clear_color,
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(params.render_pass)
            .framebuffer(params.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: params.extent,
            })
            .clear_values(&clear_values);
        //SAFETY: The recorder guarantees recording state, and the typed
        //entry point validated that the render pass and framebuffer derive
        //from this device.
        unsafe { self.cmd_begin_raw_render_pass(cmd, &begin_info) };
    }

    fn end_render_pass(&self, cmd: vk::CommandBuffer) {
        //SAFETY: The recorder guarantees an active render pass scope.
        unsafe { self.cmd_end_raw_render_pass(cmd) };
    }

    fn bind_graphics_pipeline(&self, cmd: vk::CommandBuffer, pipeline: vk::Pipeline) {
        //SAFETY: The recorder guarantees recording state, and the typed
        //entry point validated the pipeline derives from this device.
        unsafe { self.cmd_bind_raw_graphics_pipeline(cmd, pipeline) };
    }

    fn draw(
        &self,
        cmd: vk::CommandBuffer,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        //SAFETY: Draws are only reachable through a pipeline-bound recorder
        //nested inside an active render pass scope.
        unsafe {
            self.cmd_draw_raw(cmd, vertex_count, instance_count, first_vertex, first_instance)
        };
    }
}

/// Shared ownership of the raw pool handle.
///
/// Held via `Arc` by the pool wrapper and every buffer allocated from it,
/// so the native pool is destroyed only after the pool and all its buffers
/// are gone. `vkDestroyCommandPool` then frees the buffers implicitly.
struct CommandPoolShared {
    parent: Arc<Device>,
    pool: vk::CommandPool,
}

impl Drop for CommandPoolShared {
    fn drop(&mut self) {
        tracing::debug!("Dropping command pool {:?}", self.pool);
        //SAFETY: This runs only once the pool wrapper and every buffer
        //allocated from it have been dropped; destroying the pool frees all
        //its buffers.
        unsafe { self.parent.destroy_raw_command_pool(self.pool) };
    }
}

/// Fluent configuration for [`CommandPool`] creation. Defaults to the
/// device's graphics queue family.
pub struct CommandPoolBuilder {
    device: Arc<Device>,
    queue_family: Option<u32>,
}

impl CommandPoolBuilder {
    pub fn new(device: &Arc<Device>) -> Self {
        Self {
            device: Arc::clone(device),
            queue_family: None,
        }
    }

    pub fn for_queue_family(mut self, queue_family: u32) -> Self {
        self.queue_family = Some(queue_family);
        self
    }

    pub fn build(self) -> Result<CommandPool, CreateCommandPoolError> {
        let queue_family = self
            .queue_family
            .unwrap_or_else(|| self.device.graphics_queue_family());
        let create_info =
            vk::CommandPoolCreateInfo::default().queue_family_index(queue_family);

        //SAFETY: queue_family is either caller-provided for this device or
        //the device's own graphics family.
        let pool = unsafe { self.device.create_raw_command_pool(&create_info) }
            .map_err(CreateCommandPoolError::Vulkan)?;

        Ok(CommandPool {
            shared: Arc::new(CommandPoolShared {
                parent: self.device,
                pool,
            }),
            _not_sync: PhantomData,
        })
    }
}

/// An owned command pool that allocates single-use primary command buffers.
///
/// `CommandPool` is `!Sync`: pool-level operations require external
/// synchronization per the Vulkan spec, guaranteed structurally rather
/// than with a mutex.
pub struct CommandPool {
    shared: Arc<CommandPoolShared>,
    _not_sync: PhantomData<Cell<()>>,
}

impl std::fmt::Debug for CommandPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandPool")
            .field("pool", &self.shared.pool)
            .finish_non_exhaustive()
    }
}

impl CommandPool {
    /// Allocate `count` primary command buffers from this pool.
    ///
    /// Each buffer co-owns the pool, so the native pool outlives every
    /// buffer regardless of drop order.
    pub fn allocate(&self, count: u32) -> Result<Vec<CommandBuffer>, AllocateCommandBufferError> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.shared.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        //SAFETY: allocate_info references this pool; CommandPool is !Sync so
        //no concurrent pool access is possible.
        let handles = unsafe {
            self.shared
                .parent
                .allocate_raw_command_buffers(&allocate_info)
        }
        .map_err(AllocateCommandBufferError::Vulkan)?;

        Ok(handles
            .into_iter()
            .map(|handle| CommandBuffer {
                _pool: Arc::clone(&self.shared),
                parent: Arc::clone(&self.shared.parent),
                handle,
                state: RecordState::Initial,
            })
            .collect())
    }

    pub fn raw_command_pool(&self) -> vk::CommandPool {
        self.shared.pool
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.shared.parent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordState {
    Initial,
    Recording,
    Executable,
}

/// A primary command buffer allocated from a [`CommandPool`].
///
/// Recording is single-use: one `begin_recording` → nested scopes →
/// `finish` cycle moves the buffer to the executable state, after which it
/// can be submitted any number of times but never re-recorded.
pub struct CommandBuffer {
    /// Keeps the pool alive until this buffer is dropped.
    _pool: Arc<CommandPoolShared>,
    parent: Arc<Device>,
    handle: vk::CommandBuffer,
    state: RecordState,
}

impl std::fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandBuffer")
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl CommandBuffer {
    /// Open the outermost recording scope.
    ///
    /// Fails with [`RecordError::AlreadyRecording`] when a previous
    /// recorder was abandoned mid-recording, and with
    /// [`RecordError::AlreadyRecorded`] once a recording has finished.
    pub fn begin_recording(&mut self) -> Result<CommandBufferRecorder<'_, Device>, RecordError> {
        let sink: &Device = &self.parent;
        CommandBufferRecorder::begin(sink, self.handle, &mut self.state)
    }

    /// Whether a finished recording is ready for submission.
    pub fn is_executable(&self) -> bool {
        self.state == RecordState::Executable
    }

    pub fn raw_handle(&self) -> vk::CommandBuffer {
        self.handle
    }

    pub fn get_parent(&self) -> &Arc<Device> {
        &self.parent
    }
}

/// The outermost recording scope over one command buffer.
///
/// Close it with [`finish`](Self::finish); dropping it mid-recording
/// leaves the buffer unusable (submission will be refused) and logs a
/// warning.
#[derive(Debug)]
pub struct CommandBufferRecorder<'a, S: CommandSink = Device> {
    sink: &'a S,
    cmd: vk::CommandBuffer,
    state: &'a mut RecordState,
    finished: bool,
}

impl<'a, S: CommandSink> CommandBufferRecorder<'a, S> {
    pub(crate) fn begin(
        sink: &'a S,
        cmd: vk::CommandBuffer,
        state: &'a mut RecordState,
    ) -> Result<Self, RecordError> {
        match *state {
            RecordState::Initial => {}
            RecordState::Recording => return Err(RecordError::AlreadyRecording),
            RecordState::Executable => return Err(RecordError::AlreadyRecorded),
        }

        sink.begin_command_buffer(cmd).map_err(RecordError::Vulkan)?;
        *state = RecordState::Recording;

        Ok(Self {
            sink,
            cmd,
            state,
            finished: false,
        })
    }

    fn begin_render_pass_scope(
        &mut self,
        params: RenderPassBeginParams,
    ) -> RenderPassRecorder<'_, 'a, S> {
        self.sink.begin_render_pass(self.cmd, &params);
        RenderPassRecorder {
            parent: self,
            ended: false,
        }
    }

    /// Close the recording scope, leaving the buffer executable.
    pub fn finish(mut self) -> Result<(), RecordError> {
        self.sink
            .end_command_buffer(self.cmd)
            .map_err(RecordError::Vulkan)?;
        *self.state = RecordState::Executable;
        self.finished = true;
        Ok(())
    }

    pub fn raw_command_buffer(&self) -> vk::CommandBuffer {
        self.cmd
    }
}

impl<'a> CommandBufferRecorder<'a, Device> {
    /// Open a render pass scope. The render area is the framebuffer's full
    /// extent, and every attachment is cleared to `clear_color`.
    ///
    /// The returned recorder mutably borrows this one, so the recording
    /// scope cannot be finished (or another pass begun) until the render
    /// pass scope closes.
    pub fn begin_render_pass(
        &mut self,
        render_pass: &RenderPass,
        framebuffer: &Framebuffer,
        clear_color: [f32; 4],
    ) -> Result<RenderPassRecorder<'_, 'a, Device>, RecordError> {
        if !std::ptr::eq(
            self.sink as *const Device,
            Arc::as_ptr(render_pass.get_parent()),
        ) || !std::ptr::eq(
            self.sink as *const Device,
            Arc::as_ptr(framebuffer.get_parent()),
        ) {
            return Err(RecordError::MismatchedParams);
        }

        Ok(self.begin_render_pass_scope(RenderPassBeginParams {
            render_pass: render_pass.raw_handle(),
            framebuffer: framebuffer.raw_handle(),
            extent: framebuffer.extent(),
            clear_color,
        }))
    }
}

impl<S: CommandSink> Drop for CommandBufferRecorder<'_, S> {
    fn drop(&mut self) {
        if !self.finished {
            // The buffer stays in the recording state and can never be
            // submitted; the native end call is deliberately not issued for
            // a scope the caller walked away from.
            tracing::warn!(
                "Command buffer recorder for {:?} dropped without finish; \
                 the buffer is left unusable",
                self.cmd
            );
        }
    }
}

/// A render pass scope nested inside a recording scope.
///
/// Closing — explicitly via [`end`](Self::end) or implicitly on drop —
/// issues the native end-render-pass call exactly once.
pub struct RenderPassRecorder<'r, 'a, S: CommandSink = Device> {
    parent: &'r mut CommandBufferRecorder<'a, S>,
    ended: bool,
}

impl<'r, 'a, S: CommandSink> RenderPassRecorder<'r, 'a, S> {
    fn bind_pipeline_scope(&mut self, pipeline: vk::Pipeline) -> PipelineRecorder<'_, 'r, 'a, S> {
        self.parent
            .sink
            .bind_graphics_pipeline(self.parent.cmd, pipeline);
        PipelineRecorder {
            parent: self,
            ended: false,
        }
    }

    /// Close the render pass scope explicitly.
    pub fn end(mut self) {
        self.parent.sink.end_render_pass(self.parent.cmd);
        self.ended = true;
    }
}

impl<'r, 'a> RenderPassRecorder<'r, 'a, Device> {
    /// Bind a graphics pipeline, opening the innermost scope.
    ///
    /// Draws are only expressible on the returned recorder, and the render
    /// pass scope cannot close until it is dropped.
    pub fn bind_graphics_pipeline(
        &mut self,
        pipeline: &GraphicsPipeline,
    ) -> Result<PipelineRecorder<'_, 'r, 'a, Device>, RecordError> {
        if !std::ptr::eq(
            self.parent.sink as *const Device,
            Arc::as_ptr(pipeline.get_parent()),
        ) {
            return Err(RecordError::MismatchedParams);
        }
        Ok(self.bind_pipeline_scope(pipeline.raw_handle()))
    }
}

impl<S: CommandSink> Drop for RenderPassRecorder<'_, '_, S> {
    fn drop(&mut self) {
        if !self.ended {
            self.parent.sink.end_render_pass(self.parent.cmd);
        }
    }
}

/// The innermost scope: a pipeline bound inside an active render pass.
///
/// Multiple draws are allowed while the scope is open. Closing it has no
/// native counterpart but still ends the logical scope exactly once.
pub struct PipelineRecorder<'p, 'r, 'a, S: CommandSink = Device> {
    parent: &'p mut RenderPassRecorder<'r, 'a, S>,
    ended: bool,
}

impl<S: CommandSink> PipelineRecorder<'_, '_, '_, S> {
    /// Record one non-indexed draw.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        self.parent.parent.sink.draw(
            self.parent.parent.cmd,
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        );
    }

    /// Close the pipeline scope explicitly.
    pub fn end(mut self) {
        self.parent
            .parent
            .sink
            .end_pipeline_scope(self.parent.parent.cmd);
        self.ended = true;
    }
}

impl<S: CommandSink> Drop for PipelineRecorder<'_, '_, '_, S> {
    fn drop(&mut self) {
        if !self.ended {
            self.parent
                .parent
                .sink
                .end_pipeline_scope(self.parent.parent.cmd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        BeginBuffer,
        BeginPass,
        BindPipeline,
        Draw(u32, u32),
        EndPipeline,
        EndPass,
        EndBuffer,
    }

    #[derive(Default, Debug)]
    struct FakeSink {
        calls: RefCell<Vec<Call>>,
        fail_begin: bool,
    }

    impl CommandSink for FakeSink {
        fn begin_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
            if self.fail_begin {
                return Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY);
            }
            self.calls.borrow_mut().push(Call::BeginBuffer);
            Ok(())
        }

        fn end_command_buffer(&self, _cmd: vk::CommandBuffer) -> Result<(), vk::Result> {
            self.calls.borrow_mut().push(Call::EndBuffer);
            Ok(())
        }

        fn begin_render_pass(&self, _cmd: vk::CommandBuffer, _params: &RenderPassBeginParams) {
            self.calls.borrow_mut().push(Call::BeginPass);
        }

        fn end_render_pass(&self, _cmd: vk::CommandBuffer) {
            self.calls.borrow_mut().push(Call::EndPass);
        }

        fn bind_graphics_pipeline(&self, _cmd: vk::CommandBuffer, _pipeline: vk::Pipeline) {
            self.calls.borrow_mut().push(Call::BindPipeline);
        }

        fn end_pipeline_scope(&self, _cmd: vk::CommandBuffer) {
            self.calls.borrow_mut().push(Call::EndPipeline);
        }

        fn draw(
            &self,
            _cmd: vk::CommandBuffer,
            vertex_count: u32,
            instance_count: u32,
            _first_vertex: u32,
            _first_instance: u32,
        ) {
            self.calls
                .borrow_mut()
                .push(Call::Draw(vertex_count, instance_count));
        }
    }

    fn fake_cmd() -> vk::CommandBuffer {
        vk::CommandBuffer::from_raw(0xC0FFEE)
    }

    fn fake_params() -> RenderPassBeginParams {
        RenderPassBeginParams {
            render_pass: vk::RenderPass::from_raw(1),
            framebuffer: vk::Framebuffer::from_raw(2),
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            clear_color: [0.0; 4],
        }
    }

    #[test]
    fn nested_scopes_issue_one_end_per_begin_in_reverse_order() {
        let sink = FakeSink::default();
        let mut state = RecordState::Initial;

        let mut recorder =
            CommandBufferRecorder::begin(&sink, fake_cmd(), &mut state).expect("begin");
        {
            let mut pass = recorder.begin_render_pass_scope(fake_params());
            {
                let mut bound = pass.bind_pipeline_scope(vk::Pipeline::from_raw(3));
                bound.draw(3, 1, 0, 0);
                bound.draw(6, 1, 3, 0);
                bound.end();
            }
            pass.end();
        }
        recorder.finish().expect("finish");

        assert_eq!(state, RecordState::Executable);
        assert_eq!(
            sink.calls.into_inner(),
            vec![
                Call::BeginBuffer,
                Call::BeginPass,
                Call::BindPipeline,
                Call::Draw(3, 1),
                Call::Draw(6, 1),
                Call::EndPipeline,
                Call::EndPass,
                Call::EndBuffer,
            ]
        );
    }

    #[test]
    fn dropping_inner_scopes_still_closes_them_exactly_once() {
        let sink = FakeSink::default();
        let mut state = RecordState::Initial;

        let mut recorder =
            CommandBufferRecorder::begin(&sink, fake_cmd(), &mut state).expect("begin");
        {
            let mut pass = recorder.begin_render_pass_scope(fake_params());
            {
                let mut bound = pass.bind_pipeline_scope(vk::Pipeline::from_raw(3));
                bound.draw(3, 1, 0, 0);
                // Dropped without an explicit end.
            }
            // Dropped without an explicit end.
        }
        recorder.finish().expect("finish");

        let calls = sink.calls.into_inner();
        let ends_pipeline = calls.iter().filter(|c| **c == Call::EndPipeline).count();
        let ends_pass = calls.iter().filter(|c| **c == Call::EndPass).count();
        assert_eq!(ends_pipeline, 1);
        assert_eq!(ends_pass, 1);
        assert_eq!(
            calls.last(),
            Some(&Call::EndBuffer),
            "the recording scope must close last"
        );
    }

    #[test]
    fn sequential_render_passes_in_one_recording_are_allowed() {
        let sink = FakeSink::default();
        let mut state = RecordState::Initial;

        let mut recorder =
            CommandBufferRecorder::begin(&sink, fake_cmd(), &mut state).expect("begin");
        recorder.begin_render_pass_scope(fake_params()).end();
        recorder.begin_render_pass_scope(fake_params()).end();
        recorder.finish().expect("finish");

        let calls = sink.calls.into_inner();
        assert_eq!(calls.iter().filter(|c| **c == Call::BeginPass).count(), 2);
        assert_eq!(calls.iter().filter(|c| **c == Call::EndPass).count(), 2);
    }

    #[test]
    fn begin_fails_while_a_previous_recording_is_abandoned() {
        let sink = FakeSink::default();
        let mut state = RecordState::Initial;

        let recorder =
            CommandBufferRecorder::begin(&sink, fake_cmd(), &mut state).expect("begin");
        drop(recorder); // Abandoned without finish.

        let err = CommandBufferRecorder::begin(&sink, fake_cmd(), &mut state)
            .expect_err("second begin must fail");
        assert!(matches!(err, RecordError::AlreadyRecording));
    }

    #[test]
    fn begin_fails_once_recording_has_finished() {
        let sink = FakeSink::default();
        let mut state = RecordState::Initial;

        CommandBufferRecorder::begin(&sink, fake_cmd(), &mut state)
            .expect("begin")
            .finish()
            .expect("finish");

        let err = CommandBufferRecorder::begin(&sink, fake_cmd(), &mut state)
            .expect_err("re-recording must fail");
        assert!(matches!(err, RecordError::AlreadyRecorded));
    }

    #[test]
    fn failed_native_begin_leaves_the_buffer_reusable() {
        let sink = FakeSink {
            fail_begin: true,
            ..Default::default()
        };
        let mut state = RecordState::Initial;

        let err = CommandBufferRecorder::begin(&sink, fake_cmd(), &mut state)
            .expect_err("native begin failure must propagate");
        assert!(matches!(err, RecordError::Vulkan(_)));
        assert_eq!(state, RecordState::Initial);
    }
}
