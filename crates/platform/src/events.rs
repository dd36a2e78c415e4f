//! Window-event capability interface.
//!
//! The renderer implements [`WindowEventHandler`]; [`WindowEventRouter`]
//! translates raw winit events into calls on it. Nothing here knows about
//! Vulkan.

use winit::event::{ElementState, WindowEvent};
use winit::keyboard::PhysicalKey;

pub use winit::keyboard::KeyCode;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other,
}

impl From<winit::event::MouseButton> for MouseButton {
    fn from(button: winit::event::MouseButton) -> Self {
        match button {
            winit::event::MouseButton::Left => MouseButton::Left,
            winit::event::MouseButton::Right => MouseButton::Right,
            winit::event::MouseButton::Middle => MouseButton::Middle,
            _ => MouseButton::Other,
        }
    }
}

/// Named window-event operations.
///
/// Only geometry is required; input hooks default to doing nothing.
pub trait WindowEventHandler {
    /// The client area changed to a non-zero size in pixels.
    fn on_resize(&mut self, width: u32, height: u32);

    /// The client area became empty (`true`) or usable again (`false`).
    fn on_minimized(&mut self, minimized: bool);

    fn on_key(&mut self, _key: KeyCode, _pressed: bool) {}

    fn on_mouse_button(&mut self, _button: MouseButton, _pressed: bool) {}

    fn on_cursor_moved(&mut self, _x: f64, _y: f64) {}
}

/// Turns winit window events into [`WindowEventHandler`] calls.
///
/// A zero-sized resize is reported as minimization. The next non-zero
/// resize reports restoration first, then the new size.
#[derive(Debug, Default)]
pub struct WindowEventRouter {
    minimized: bool,
}

impl WindowEventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the last reported size was zero.
    #[inline]
    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// Forwards `event` to `handler`. Returns `true` if it was consumed.
    pub fn dispatch<H: WindowEventHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        event: &WindowEvent,
    ) -> bool {
        match event {
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    if !self.minimized {
                        self.minimized = true;
                        handler.on_minimized(true);
                    }
                } else {
                    if self.minimized {
                        self.minimized = false;
                        handler.on_minimized(false);
                    }
                    handler.on_resize(size.width, size.height);
                }
                true
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(code) = event.physical_key {
                    handler.on_key(code, event.state == ElementState::Pressed);
                    true
                } else {
                    false
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                handler.on_mouse_button((*button).into(), *state == ElementState::Pressed);
                true
            }
            WindowEvent::CursorMoved { position, .. } => {
                handler.on_cursor_moved(position.x, position.y);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalSize;

    #[derive(Debug, PartialEq)]
    enum Call {
        Resize(u32, u32),
        Minimized(bool),
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<Call>,
    }

    impl WindowEventHandler for Recorder {
        fn on_resize(&mut self, width: u32, height: u32) {
            self.calls.push(Call::Resize(width, height));
        }

        fn on_minimized(&mut self, minimized: bool) {
            self.calls.push(Call::Minimized(minimized));
        }
    }

    fn resized(width: u32, height: u32) -> WindowEvent {
        WindowEvent::Resized(PhysicalSize::new(width, height))
    }

    #[test]
    fn test_resize_is_forwarded() {
        let mut router = WindowEventRouter::new();
        let mut recorder = Recorder::default();

        assert!(router.dispatch(&mut recorder, &resized(800, 600)));
        assert_eq!(recorder.calls, vec![Call::Resize(800, 600)]);
    }

    #[test]
    fn test_zero_size_reports_minimized_once() {
        let mut router = WindowEventRouter::new();
        let mut recorder = Recorder::default();

        router.dispatch(&mut recorder, &resized(0, 0));
        router.dispatch(&mut recorder, &resized(1024, 0));
        assert!(router.is_minimized());
        assert_eq!(recorder.calls, vec![Call::Minimized(true)]);
    }

    #[test]
    fn test_restore_reports_before_resize() {
        let mut router = WindowEventRouter::new();
        let mut recorder = Recorder::default();

        router.dispatch(&mut recorder, &resized(0, 0));
        router.dispatch(&mut recorder, &resized(640, 480));

        assert!(!router.is_minimized());
        assert_eq!(
            recorder.calls,
            vec![
                Call::Minimized(true),
                Call::Minimized(false),
                Call::Resize(640, 480)
            ]
        );
    }

    #[test]
    fn test_unrelated_events_are_not_consumed() {
        let mut router = WindowEventRouter::new();
        let mut recorder = Recorder::default();

        assert!(!router.dispatch(&mut recorder, &WindowEvent::CloseRequested));
        assert!(!router.dispatch(&mut recorder, &WindowEvent::Focused(true)));
        assert!(recorder.calls.is_empty());
    }

    #[test]
    fn test_mouse_button_conversion() {
        assert_eq!(
            MouseButton::from(winit::event::MouseButton::Right),
            MouseButton::Right
        );
        assert_eq!(
            MouseButton::from(winit::event::MouseButton::Back),
            MouseButton::Other
        );
    }
}
