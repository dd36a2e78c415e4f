//! Frame orchestration.
//!
//! This crate drives rendering on top of the RHI:
//! - Frame slots and the per-image fence table
//! - The acquire, submit and present scheduler
//! - The clear render pass
//! - The [`Renderer`] that owns everything for one window

pub mod frame_resources;
pub mod frame_scheduler;
pub mod image_fences;
pub mod render_pass;
pub mod renderer;

pub use frame_scheduler::{FrameOutcome, FrameScheduler, FrameStats, SkipReason};
pub use renderer::Renderer;

/// Maximum number of frames that can be in flight simultaneously.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
