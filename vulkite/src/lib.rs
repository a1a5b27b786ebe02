//! `vulkite` naming conventions:
//! - `raw_*` accessors return the Vulkan handle type from `ash::vk`.
//! - Owned wrappers hold `Arc` references to every parent they were built
//!   from, so destruction always runs child-before-parent.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod command;
pub mod device;
pub mod image;
pub mod instance;
pub mod log;
pub mod pipeline;
pub mod queue;
pub mod render_pass;
pub mod scope;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use ash;
pub use raw_window_handle::HandleError as RWHHandleError;
