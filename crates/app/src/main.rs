//! TriangleNight - spinning textured model viewer.
//!
//! Usage: `triangle-night [CONFIG]`. Without an argument the configuration is
//! read from `triangle-night.toml` in the working directory when present.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use night_core::{Config, DEFAULT_LOG_FILTER};
use night_platform::Window;
use night_renderer::Renderer;

/// Exit status for any fatal setup or frame-loop error.
const FATAL_EXIT_CODE: u8 = 69;

struct App {
    config: Config,
    // Declared before the window so it is dropped first.
    renderer: Option<Renderer>,
    window: Option<Window>,
    failed: bool,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            failed: false,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop) {
        self.failed = true;
        self.renderer = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.failed {
            return;
        }

        let window = match Window::new(event_loop, &self.config.window) {
            Ok(window) => window,
            Err(e) => {
                error!("Failed to create window: {}", e);
                self.fail(event_loop);
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => {
                info!("Initialization complete, entering main loop");
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => {
                error!("Failed to create renderer: {}", e);
                self.fail(event_loop);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                self.renderer = None;
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(ref mut window) = self.window {
                    window.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref())
                else {
                    return;
                };

                if let Err(e) = renderer.render_frame(window) {
                    if e.is_fence_timeout() {
                        error!("GPU stopped responding: {}", e);
                    } else {
                        error!("Render error: {}", e);
                    }
                    self.fail(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(ref window) = self.window else {
            return;
        };

        // Block in the event wait while there is nothing to present to.
        if window.is_minimized() {
            event_loop.set_control_flow(ControlFlow::Wait);
        } else {
            event_loop.set_control_flow(ControlFlow::Poll);
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.renderer = None;
    }
}

/// Process status after the event loop has returned.
fn exit_status(failed: bool) -> u8 {
    if failed { FATAL_EXIT_CODE } else { 0 }
}

fn main() -> Result<ExitCode> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);

    let config = match Config::load_or_default(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            night_core::init_logging(DEFAULT_LOG_FILTER);
            error!("{}", e);
            return Ok(ExitCode::from(FATAL_EXIT_CODE));
        }
    };

    night_core::init_logging(&config.renderer.log_filter);
    info!("Starting TriangleNight");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    let status = exit_status(app.failed);
    if status == 0 {
        info!("Shutdown complete");
    }
    Ok(ExitCode::from(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_exit_status_is_69() {
        assert_eq!(exit_status(true), 69);
        assert_eq!(FATAL_EXIT_CODE, 69);
    }

    #[test]
    fn test_clean_shutdown_exits_zero() {
        assert_eq!(exit_status(false), 0);
    }
}
