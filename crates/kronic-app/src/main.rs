// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{anyhow, Result};
use clap::Parser;
use kronic_core::init_tracing;
use kronic_render::{RenderConfig, RenderSize, Renderer};
use kronic_render_vk::VkRenderer;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info};

use kronic_platform::winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use kronic_platform::WindowSettings;

mod config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing means defaults
    #[arg(long, default_value = "kronic.toml")]
    config: PathBuf,
    /// Override `render.validation`
    #[arg(long)]
    validation: Option<bool>,
    /// Override `render.vsync`
    #[arg(long)]
    vsync: Option<bool>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,
}

struct App {
    window_cfg: WindowSettings,
    render_cfg: RenderConfig,

    // Field order is drop order: renderer before the window it presents to.
    renderer: Option<VkRenderer>,
    window: Option<Window>,
    render_size: RenderSize,

    /// First fatal error (init or render); ends the loop and is returned from main.
    fatal: Option<anyhow::Error>,
    exiting: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(window_cfg: WindowSettings, render_cfg: RenderConfig) -> Self {
        App {
            window_cfg,
            render_cfg,
            renderer: None,
            window: None,
            render_size: RenderSize {
                width: 1,
                height: 1,
            },
            fatal: None,
            exiting: false,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop
            .create_window(self.window_cfg.attributes())
            .map_err(|e| anyhow!("create_window: {e}"))?;

        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };

        let renderer = VkRenderer::new(&window, &window, self.render_size, &self.render_cfg)?;
        info!(
            "renderer up on \"{}\", vsync={}, validation={}",
            renderer.device_name(),
            self.render_cfg.vsync,
            self.render_cfg.validation
        );

        window.request_redraw();
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Counts a rendered frame. A failed one is kept as the exit error;
    /// returns whether the loop may go on.
    fn finish_frame(&mut self, res: Result<()>) -> bool {
        match res {
            Ok(()) => {
                self.frames = self.frames.saturating_add(1);
                true
            }
            Err(e) => {
                error!("render error: {e:#}");
                self.fatal = Some(e.context("render"));
                false
            }
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);

        if let Err(e) = self.init(event_loop) {
            error!("init failed: {e:#}");
            self.fatal = Some(e);
            self.shutdown(event_loop);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                debug!(
                    "Resized -> {}x{}",
                    self.render_size.width, self.render_size.height
                );
                if let Some(r) = &mut self.renderer {
                    if let Err(e) = r.resize(self.render_size) {
                        error!("resize error: {e:#}");
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let res = match &mut self.renderer {
                    Some(r) => r.render(),
                    None => return,
                };
                if !self.finish_frame(res) {
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            debug!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log);

    let cfg = config::load_cfg(&args.config)?;
    let render_cfg = cfg.render.resolve(args.validation, args.vsync);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg.window, render_cfg);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_frames_are_counted() {
        let mut app = App::new(WindowSettings::default(), RenderConfig::default());
        assert!(app.finish_frame(Ok(())));
        assert!(app.finish_frame(Ok(())));
        assert_eq!(app.frames, 2);
        assert!(app.fatal.is_none());
    }

    #[test]
    fn a_failed_frame_stops_the_loop_and_keeps_the_error() {
        let mut app = App::new(WindowSettings::default(), RenderConfig::default());
        assert!(!app.finish_frame(Err(anyhow!("queue_submit: ERROR_DEVICE_LOST"))));
        assert_eq!(app.frames, 0);
        let err = app.fatal.take().unwrap();
        assert_eq!(err.to_string(), "render");
        assert!(format!("{err:#}").contains("ERROR_DEVICE_LOST"));
    }

    #[test]
    fn args_default_to_local_config_and_info() {
        let a = Args::try_parse_from(["kronic-app"]).unwrap();
        assert_eq!(a.config, PathBuf::from("kronic.toml"));
        assert_eq!(a.log, "info");
        assert_eq!((a.validation, a.vsync), (None, None));
    }

    #[test]
    fn bool_overrides_take_explicit_values() {
        let a = Args::try_parse_from([
            "kronic-app",
            "--validation",
            "false",
            "--vsync",
            "true",
            "--config",
            "other.toml",
        ])
        .unwrap();
        assert_eq!(a.validation, Some(false));
        assert_eq!(a.vsync, Some(true));
        assert_eq!(a.config, PathBuf::from("other.toml"));
    }
}
