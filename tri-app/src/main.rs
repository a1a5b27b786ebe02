#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};
use vulkite::ash::vk;
use vulkite::command::{CommandBuffer, CommandPoolBuilder};
use vulkite::device::Device;
use vulkite::image::{Framebuffer, FramebufferBuilder, ImageViewBuilder};
use vulkite::instance::{Instance, InstanceBuilder};
use vulkite::pipeline::{GraphicsPipeline, GraphicsPipelineBuilder};
use vulkite::queue::{GraphicsQueue, PresentError, PresentQueue};
use vulkite::render_pass::{AttachmentBuilder, RenderPass, RenderPassBuilder, SubpassBuilder};
use vulkite::scope::ScopeStack;
use vulkite::shader::{ShaderModule, ShaderStage};
use vulkite::surface::Surface;
use vulkite::swapchain::{AcquireImageError, Swapchain, SwapchainBuilder};
use vulkite::sync::{Fence, FenceBuilder, Semaphore, SemaphoreBuilder};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::ControlFlow,
    window::{Window as WinitWindow, WindowAttributes},
};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, clap::ValueEnum)]
enum TracingLogLevel {
    Off,
    Trace,
    Debug,
    Info,
    Warn,
    #[default]
    Error,
}

impl From<TracingLogLevel> for tracing::Level {
    fn from(value: TracingLogLevel) -> Self {
        match value {
            // Off never reaches the subscriber; clamp defensively.
            TracingLogLevel::Off | TracingLogLevel::Trace => tracing::Level::TRACE,
            TracingLogLevel::Debug => tracing::Level::DEBUG,
            TracingLogLevel::Info => tracing::Level::INFO,
            TracingLogLevel::Warn => tracing::Level::WARN,
            TracingLogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum CliVulkanLogLevel {
    Verbose,
    Info,
    Warning,
    Error,
}

impl From<CliVulkanLogLevel> for vulkite::log::VulkanLogLevel {
    fn from(value: CliVulkanLogLevel) -> Self {
        match value {
            CliVulkanLogLevel::Verbose => vulkite::log::VulkanLogLevel::Verbose,
            CliVulkanLogLevel::Info => vulkite::log::VulkanLogLevel::Info,
            CliVulkanLogLevel::Warning => vulkite::log::VulkanLogLevel::Warning,
            CliVulkanLogLevel::Error => vulkite::log::VulkanLogLevel::Error,
        }
    }
}

#[derive(clap::Parser, Debug)]
struct CliArgs {
    #[arg(short, long, default_value = "error")]
    tracing_log_level: TracingLogLevel,
    #[arg(short, long)]
    graphics_debug_level: Option<CliVulkanLogLevel>,
    #[arg(long, default_value = "shaders/tri.vert.spv")]
    vert_shader: PathBuf,
    #[arg(long, default_value = "shaders/tri.frag.spv")]
    frag_shader: PathBuf,
}

fn main() -> eyre::Result<()> {
    let cli_args = CliArgs::parse();

    if cli_args.tracing_log_level != TracingLogLevel::Off {
        let app_dirs = directories::ProjectDirs::from("", "", "tri-app");
        let log_dir = match app_dirs
            .as_ref()
            .and_then(|dirs| dirs.runtime_dir().or_else(|| Some(dirs.data_dir())))
            .map(|path| path.to_owned())
        {
            Some(path) => path,
            None => std::env::current_dir()?,
        };
        fs::create_dir_all(&log_dir)?;
        let log_file_path = log_dir.join("log-file.txt");
        let log_file = File::create(&log_file_path)?;
        let file_log = tracing_subscriber::fmt::layer()
            .with_writer(log_file)
            .with_ansi(false);
        let stdout_log = tracing_subscriber::fmt::layer().pretty();

        tracing_subscriber::registry()
            .with(
                stdout_log
                    .with_filter(tracing_subscriber::filter::LevelFilter::from_level(
                        cli_args.tracing_log_level.into(),
                    ))
                    .and_then(file_log),
            )
            .init();
    }

    let event_loop = winit::event_loop::EventLoop::builder().build()?;

    let mut instance_builder =
        InstanceBuilder::new("tri-app").with_surface_support(&event_loop);
    if let Some(level) = cli_args.graphics_debug_level {
        instance_builder = instance_builder.with_debug(level.into());
    }
    //SAFETY: Loads vulkan via libloading; every derived object is dropped
    //before the instance through the Arc parent chain.
    let instance = Arc::new(unsafe { instance_builder.build() }?);

    let mut app = App {
        instance,
        vert_shader: cli_args.vert_shader,
        frag_shader: cli_args.frag_shader,
        running: None,
    };

    tracing::trace!("Entering main event loop");
    Ok(event_loop.run_app(&mut app)?)
}

struct App {
    instance: Arc<Instance>,
    vert_shader: PathBuf,
    frag_shader: PathBuf,
    running: Option<Running>,
}

struct Running {
    window: Arc<WinitWindow>,
    surface: Arc<Surface<WinitWindow>>,
    device: Arc<Device>,
    graphics_queue: GraphicsQueue,
    present_queue: PresentQueue,
    vert: Arc<ShaderModule>,
    frag: Arc<ShaderModule>,
    frame: Option<FrameResources>,
}

/// Everything rebuilt together when the swapchain goes stale: the
/// swapchain, its framebuffers and pipeline, the recorded command buffers,
/// and the per-frame synchronization objects.
struct FrameResources {
    /// Releases the construction chain in reverse acquisition order.
    _scope: ScopeStack,
    swapchain: Arc<Swapchain<WinitWindow>>,
    command_buffers: Vec<CommandBuffer>,
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

enum FrameOutcome {
    Presented,
    NeedsRebuild,
}

const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.08, 1.0];

fn build_frame_resources(
    device: &Arc<Device>,
    surface: &Arc<Surface<WinitWindow>>,
    vert: &Arc<ShaderModule>,
    frag: &Arc<ShaderModule>,
    width: u32,
    height: u32,
) -> eyre::Result<FrameResources> {
    let mut scope = ScopeStack::new();

    let swapchain = scope.adopt(
        "swapchain",
        SwapchainBuilder::new(device, surface, width, height)
            .named("tri-app swapchain")
            .build()?,
    );
    let extent = swapchain.extent();

    let color = AttachmentBuilder::new("COLOR")
        .with_format(swapchain.format())
        .with_final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build()?;
    let subpass = SubpassBuilder::new()
        .add_color_attachment(color, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build()?;
    let render_pass: Arc<RenderPass> = scope.adopt(
        "render_pass",
        RenderPassBuilder::new(device).add_subpass(subpass).build()?,
    );

    let pipeline: Arc<GraphicsPipeline> = scope.adopt(
        "pipeline",
        GraphicsPipelineBuilder::new(device, &render_pass)
            .add_shader(ShaderStage::Vertex, vert)
            .add_shader(ShaderStage::Fragment, frag)
            .with_fixed_viewport(extent.width, extent.height)
            .with_fixed_scissor(extent.width, extent.height)
            .add_color_attachment()
            .build()?,
    );

    let mut framebuffers: Vec<Arc<Framebuffer>> = Vec::new();
    for (index, image) in swapchain.images().into_iter().enumerate() {
        let view = scope.adopt(
            format!("image_view_{index}"),
            ImageViewBuilder::new(&image)
                .with_type(vk::ImageViewType::TYPE_2D)
                .build()?,
        );
        let framebuffer = scope.adopt(
            format!("framebuffer_{index}"),
            FramebufferBuilder::new(&render_pass, extent.width, extent.height)
                .add_attachment(&view)
                .build()?,
        );
        framebuffers.push(framebuffer);
    }

    let command_pool = scope.adopt("command_pool", CommandPoolBuilder::new(device).build()?);
    let mut command_buffers = command_pool.allocate(framebuffers.len() as u32)?;

    // One static recording per swapchain image; resubmitted every frame.
    for (buffer, framebuffer) in command_buffers.iter_mut().zip(&framebuffers) {
        let mut recorder = buffer.begin_recording()?;
        {
            let mut pass = recorder.begin_render_pass(&render_pass, framebuffer, CLEAR_COLOR)?;
            {
                let mut bound = pass.bind_graphics_pipeline(&pipeline)?;
                bound.draw(3, 1, 0, 0);
            }
        }
        recorder.finish()?;
    }

    let image_available = SemaphoreBuilder::new(device).build()?;
    let render_finished = SemaphoreBuilder::new(device).build()?;
    let in_flight = FenceBuilder::new(device).signaled().build()?;

    Ok(FrameResources {
        _scope: scope,
        swapchain,
        command_buffers,
        image_available,
        render_finished,
        in_flight,
    })
}

fn draw_frame(
    frame: &mut FrameResources,
    graphics_queue: &GraphicsQueue,
    present_queue: &PresentQueue,
) -> eyre::Result<FrameOutcome> {
    //SAFETY: The fence is only submitted from this thread, and the wait
    //guarantees it is no longer pending when the reset runs.
    unsafe { frame.in_flight.wait_and_reset() }?;

    let image_index = match frame.swapchain.acquire_next_image(&frame.image_available) {
        Ok((index, _suboptimal)) => index,
        Err(AcquireImageError::OutOfDate) => return Ok(FrameOutcome::NeedsRebuild),
        Err(e) => return Err(e.into()),
    };

    graphics_queue.submit(
        &[&frame.command_buffers[image_index as usize]],
        &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
        &[&frame.image_available],
        &[&frame.render_finished],
        &frame.in_flight,
    )?;

    match present_queue.present(&frame.swapchain, image_index, &frame.render_finished) {
        Ok(false) => Ok(FrameOutcome::Presented),
        Ok(true) | Err(PresentError::OutOfDate) => Ok(FrameOutcome::NeedsRebuild),
        Err(e) => Err(e.into()),
    }
}

impl App {
    fn rebuild_frame(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };

        // Tear the previous frame chain down (reverse order via the scope)
        // before its replacement touches the surface.
        if let Err(e) = running.device.wait_idle() {
            tracing::error!("Error waiting for device idle before rebuild: {e}");
            return;
        }
        running.frame = None;

        let size = running.window.inner_size();
        if size.width == 0 || size.height == 0 {
            tracing::trace!("Window extent is zero; staying without a swapchain");
            return;
        }

        match build_frame_resources(
            &running.device,
            &running.surface,
            &running.vert,
            &running.frag,
            size.width,
            size.height,
        ) {
            Ok(frame) => running.frame = Some(frame),
            Err(e) => tracing::error!("Error rebuilding frame resources: {e}"),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if self.running.is_some() {
            tracing::warn!("resumed() called while already running");
            return;
        }
        event_loop.set_control_flow(ControlFlow::Poll);

        let window = match event_loop.create_window(
            WindowAttributes::default()
                .with_title("tri-app")
                .with_inner_size(LogicalSize {
                    width: 1280,
                    height: 720,
                }),
        ) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                tracing::error!("Error creating window: {e}");
                event_loop.exit();
                return;
            }
        };

        //SAFETY: The surface is dropped (inside Running) before the window
        //and instance, via the teardown in window_event/drop order.
        let surface = match unsafe { Surface::new(&self.instance, Arc::clone(&window)) } {
            Ok(surface) => Arc::new(surface),
            Err(e) => {
                tracing::error!("Error creating surface: {e}");
                event_loop.exit();
                return;
            }
        };

        let device = match self
            .instance
            .find_gpu()
            .with_queue(vk::QueueFlags::GRAPHICS)
            .with_presentation(&*surface)
            .build()
        {
            Ok(device) => Arc::new(device),
            Err(e) => {
                tracing::error!("Error creating device: {e}");
                event_loop.exit();
                return;
            }
        };

        let graphics_queue = device.graphics_queue();
        let Some(present_queue) = device.present_queue() else {
            tracing::error!("Device was built with presentation but has no present queue");
            event_loop.exit();
            return;
        };

        let vert = match ShaderModule::from_spirv_file(&device, &self.vert_shader) {
            Ok(module) => Arc::new(module),
            Err(e) => {
                tracing::error!("Error loading vertex shader: {e}");
                event_loop.exit();
                return;
            }
        };
        let frag = match ShaderModule::from_spirv_file(&device, &self.frag_shader) {
            Ok(module) => Arc::new(module),
            Err(e) => {
                tracing::error!("Error loading fragment shader: {e}");
                event_loop.exit();
                return;
            }
        };

        self.running = Some(Running {
            window,
            surface,
            device,
            graphics_queue,
            present_queue,
            vert,
            frag,
            frame: None,
        });
        self.rebuild_frame();

        if let Some(running) = &self.running {
            running.window.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if window_id != running.window.id() {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                tracing::trace!("Close requested");
                if let Err(e) = running.device.wait_idle() {
                    tracing::error!("Error waiting for device idle on exit: {e}");
                }
                self.running = None;
                event_loop.exit();
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                self.rebuild_frame();
            }
            WindowEvent::RedrawRequested => {
                let outcome = match running.frame.as_mut() {
                    Some(frame) => {
                        draw_frame(frame, &running.graphics_queue, &running.present_queue)
                    }
                    None => Ok(FrameOutcome::NeedsRebuild),
                };

                match outcome {
                    Ok(FrameOutcome::Presented) => {}
                    Ok(FrameOutcome::NeedsRebuild) => self.rebuild_frame(),
                    Err(e) => {
                        tracing::error!("Error drawing frame: {e}");
                        if let Err(e) = running.device.wait_idle() {
                            tracing::error!("Error waiting for device idle on exit: {e}");
                        }
                        self.running = None;
                        event_loop.exit();
                        return;
                    }
                }

                if let Some(running) = &self.running {
                    running.window.request_redraw();
                }
            }
            _ => {}
        }
    }
}
