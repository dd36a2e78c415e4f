//! Platform layer for the renderer.
//!
//! This crate provides:
//! - Window management via winit
//! - Vulkan surface creation and ownership
//! - The window-event capability trait and its dispatcher

mod events;
mod window;

pub use events::{KeyCode, MouseButton, WindowEventHandler, WindowEventRouter};
pub use window::{Surface, Window, required_extensions};

// Re-export winit types that users might need
pub use winit::event::WindowEvent;
pub use winit::event_loop::{ActiveEventLoop, EventLoop};
