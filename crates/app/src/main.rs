//! Cadence - windowed driver for the frame orchestration core.
//!
//! Opens a window, clears it every frame through the frame scheduler and
//! uploads any images given on the command line through one batched
//! transfer.

use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::WindowId;

use cadence_core::{Config, FpsCounter, PresentModePreference, Timer};
use cadence_platform::{Window, WindowEventRouter};
use cadence_renderer::Renderer;
use cadence_resources::{DecodedImage, ResourceResult, load_images};

type DecodeJob = JoinHandle<ResourceResult<std::collections::HashMap<String, DecodedImage>>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file; defaults are used if it does not exist
    #[arg(long, default_value = "cadence.toml")]
    config: PathBuf,

    /// Enable Vulkan validation layers regardless of the config
    #[arg(long)]
    validation: bool,

    /// Preferred present mode: mailbox | fifo | immediate | fifo_relaxed
    #[arg(long)]
    present_mode: Option<PresentModePreference>,

    /// Worker threads for image decoding (default: available parallelism)
    #[arg(long)]
    decode_workers: Option<usize>,

    /// Images to decode and upload at startup
    images: Vec<PathBuf>,
}

// The renderer holds a surface created from the window, so it is declared
// (and dropped) first.
struct App {
    renderer: Option<Renderer>,
    window: Option<Window>,
    config: Config,
    router: WindowEventRouter,
    decode_job: Option<DecodeJob>,
    timer: Timer,
    fps: FpsCounter,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config, decode_job: Option<DecodeJob>) -> Self {
        Self {
            renderer: None,
            window: None,
            config,
            router: WindowEventRouter::new(),
            decode_job,
            timer: Timer::new(),
            fps: FpsCounter::new(Duration::from_secs(2)),
            failure: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        error!("{:#}", error);
        self.failure = Some(error);
        event_loop.exit();
    }

    fn initialize(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window =
            Window::new(event_loop, &self.config.window).context("Failed to create window")?;
        let mut renderer =
            Renderer::new(&window, &self.config).context("Failed to create renderer")?;

        if let Some(job) = self.decode_job.take() {
            let images = job
                .join()
                .map_err(|_| anyhow::anyhow!("Image decoding thread panicked"))?
                .context("Failed to decode images")?;
            renderer
                .upload_images(&images)
                .context("Failed to upload images")?;
        }

        info!("Initialization complete, entering main loop");
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let delta = self.timer.tick();
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        if let Err(e) = renderer.render_frame() {
            self.fail(event_loop, anyhow::Error::new(e).context("Render error"));
            return;
        }

        if let Some(fps) = self.fps.record(delta) {
            let stats = renderer.frame_stats();
            info!(
                "{:.1} fps | frames {} started, {} completed, {} skipped | waits {} slot, {} image | {} recreations",
                fps,
                stats.cycles_started,
                stats.cycles_completed,
                stats.skipped,
                stats.slot_fence_waits,
                stats.image_fence_waits,
                stats.recreations
            );
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none()
            && let Err(e) = self.initialize(event_loop)
        {
            self.fail(event_loop, e);
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match &event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                event_loop.exit();
                return;
            }
            WindowEvent::KeyboardInput { event: key, .. }
                if key.physical_key == PhysicalKey::Code(KeyCode::Escape)
                    && key.state == ElementState::Pressed =>
            {
                info!("Escape pressed, shutting down");
                event_loop.exit();
                return;
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = self.window.as_mut() {
                    window.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                self.redraw(event_loop);
                return;
            }
            _ => {}
        }

        if let Some(renderer) = self.renderer.as_mut() {
            self.router.dispatch(renderer, &event);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let minimized = self.router.is_minimized();
        event_loop.set_control_flow(control_flow(minimized));
        if !minimized && let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            if let Err(e) = renderer.wait_idle() {
                warn!("Failed to wait for device idle on exit: {}", e);
            }
            let transfers = renderer.transfer_stats();
            info!(
                "Transfers: {} submissions, {} copies, {} bytes",
                transfers.submissions, transfers.copies, transfers.bytes
            );
        }
        self.renderer = None;
    }
}

/// Polls while frames are being drawn; sleeps until the next event while
/// minimized, since every frame would be skipped.
fn control_flow(minimized: bool) -> ControlFlow {
    if minimized {
        ControlFlow::Wait
    } else {
        ControlFlow::Poll
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load_or_default(&args.config)?;
    if args.validation {
        config.gpu.validation = true;
    }
    if let Some(present_mode) = args.present_mode {
        config.gpu.present_mode = present_mode;
    }

    cadence_core::init_logging(&config.logging.filter);
    info!("Starting cadence with {}", args.config.display());

    // Decoding runs alongside window and device setup.
    let decode_job = if args.images.is_empty() {
        None
    } else {
        let paths = args.images.clone();
        let workers = args.decode_workers;
        Some(std::thread::spawn(move || load_images(&paths, workers)))
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(control_flow(false));

    let mut app = App::new(config, decode_job);
    event_loop.run_app(&mut app)?;

    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimized_window_waits_for_events() {
        assert_eq!(control_flow(true), ControlFlow::Wait);
        assert_eq!(control_flow(false), ControlFlow::Poll);
    }

    #[test]
    fn test_router_drives_control_flow() {
        use winit::dpi::PhysicalSize;

        struct Sink;
        impl cadence_platform::WindowEventHandler for Sink {
            fn on_resize(&mut self, _width: u32, _height: u32) {}
            fn on_minimized(&mut self, _minimized: bool) {}
        }

        let mut router = WindowEventRouter::new();
        router.dispatch(&mut Sink, &WindowEvent::Resized(PhysicalSize::new(0, 0)));
        assert_eq!(control_flow(router.is_minimized()), ControlFlow::Wait);

        router.dispatch(&mut Sink, &WindowEvent::Resized(PhysicalSize::new(640, 480)));
        assert_eq!(control_flow(router.is_minimized()), ControlFlow::Poll);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from([
            "cadence",
            "--validation",
            "--present-mode",
            "fifo",
            "--decode-workers",
            "3",
            "a.png",
            "b.png",
        ])
        .unwrap();
        assert!(args.validation);
        assert_eq!(args.present_mode, Some(PresentModePreference::Fifo));
        assert_eq!(args.decode_workers, Some(3));
        assert_eq!(args.images.len(), 2);
        assert_eq!(args.config, PathBuf::from("cadence.toml"));
    }
}
