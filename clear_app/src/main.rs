//! Clear screen demo
//!
//! Opens a window and clears it every frame through the Vulkan backend.
//! Pass a TOML or RON renderer config path as the first argument to override
//! the defaults.

use glfw::{Action, Key, WindowEvent};
use rust_renderer::foundation::logging::{self, LevelFilter};
use rust_renderer::prelude::*;

const APP_NAME: &str = "Clear Demo";

struct ClearApp {
    window: Window,
    backend: VulkanBackend,
    last_time: f64,
}

impl ClearApp {
    fn new(config: RendererConfig) -> Result<Self, Box<dyn std::error::Error>> {
        log::info!("Creating window...");
        let window = Window::new(APP_NAME, 1280, 720)?;
        let backend = create_backend(BackendType::Vulkan, config)?;
        let last_time = window.time();

        Ok(Self {
            window,
            backend,
            last_time,
        })
    }

    fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.backend.initialize(APP_NAME, &mut self.window)?;
        log::info!("Entering main loop");

        while !self.window.should_close() {
            self.window.poll_events();

            let events: Vec<_> = self.window.flush_events().collect();
            for (_, event) in events {
                match event {
                    WindowEvent::Key(Key::Escape, _, Action::Press, _) => {
                        self.window.set_should_close(true);
                    }
                    WindowEvent::FramebufferSize(width, height) => {
                        self.backend
                            .on_window_resize(width.max(0) as u32, height.max(0) as u32);
                    }
                    _ => {}
                }
            }

            let now = self.window.time();
            let packet = RenderPacket {
                delta_time: (now - self.last_time) as f32,
            };
            self.last_time = now;

            if let Err(e) = self.backend.draw_frame(&packet) {
                if e.is_fatal() {
                    log::error!("Fatal render error: {}", e);
                    return Err(e.into());
                }
                log::warn!("Frame {} failed: {}", self.backend.frame_number(), e);
            }
        }

        log::info!("Rendered {} frames", self.backend.frame_number());
        Ok(())
    }
}

impl Drop for ClearApp {
    fn drop(&mut self) {
        // The backend must go before the window that owns its surface.
        self.backend.shutdown();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_with_level(LevelFilter::Info);

    let config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading renderer config from {}", path);
            RendererConfig::load_from_file(&path)?
        }
        None => RendererConfig::new(APP_NAME),
    };

    let mut app = ClearApp::new(config)?;
    match app.run() {
        Ok(()) => {
            log::info!("Clear demo finished successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Application error: {}", e);
            Err(e)
        }
    }
}
