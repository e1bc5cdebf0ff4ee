use std::sync::Arc;
use std::time::Instant;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, Touch, TouchPhase, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use voronoi_drift::{EngineConfig, MetricsSink, PipelineState, PresentOutcome, VoronoiEngine};

use crate::gpu::GpuSurface;

/// Sites added or removed per keypress
const SITE_STEP: usize = 50;

/// Window host: plays the lifecycle, configuration and surface roles
pub struct App {
    window: Option<Arc<Window>>,
    surface: Option<GpuSurface>,
    engine: VoronoiEngine,
    started: Instant,
}

impl App {
    pub fn new(config: EngineConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            window: None,
            surface: None,
            engine: VoronoiEngine::new(config, metrics),
            started: Instant::now(),
        }
    }

    fn render(&mut self) {
        let Some(surface) = self.surface.as_mut() else {
            return;
        };

        match self.engine.state() {
            PipelineState::Running => {
                if self.engine.present(surface) == PresentOutcome::Idle {
                    log::trace!("No frame ready this tick");
                }
            }
            PipelineState::Paused | PipelineState::Stopped => self.engine.redraw(surface),
        }

        // Paused or failed: stop spinning until an input wakes us
        if self.engine.state() == PipelineState::Running {
            if let Some(window) = &self.window {
                window.request_redraw();
            }
        } else {
            self.update_title();
        }
    }

    fn update_title(&self) {
        let Some(window) = &self.window else {
            return;
        };
        let config = self.engine.config();
        let state = match self.engine.state() {
            PipelineState::Running => "",
            PipelineState::Paused => " [Paused]",
            PipelineState::Stopped => " [Stopped]",
        };
        window.set_title(&format!(
            "Voronoi Drift - {} sites - step {}{}",
            config.site_count, config.pixel_step, state
        ));
    }

    fn reconfigure(&mut self, config: EngineConfig) {
        self.engine.apply_configuration(config);
        self.update_title();
        self.wake();
    }

    fn wake(&self) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// A click release or a lifted finger
    fn tap(&mut self) {
        let now = self.elapsed_ms();
        if self.engine.on_interaction(now) {
            log::info!("Triple tap: {:?}", self.engine.state());
            self.update_title();
            self.wake();
        }
    }

    fn handle_key(&mut self, key_code: KeyCode) {
        let config = self.engine.config();
        match key_code {
            KeyCode::Space => {
                let state = self.engine.toggle_pause();
                log::info!("Pause toggled: {:?}", state);
                self.update_title();
                self.wake();
            }

            KeyCode::KeyM => self.reconfigure(EngineConfig {
                draw_markers: !config.draw_markers,
                ..config
            }),

            KeyCode::KeyG => self.reconfigure(EngineConfig {
                use_spatial_grid: !config.use_spatial_grid,
                ..config
            }),

            KeyCode::Equal | KeyCode::NumpadAdd => self.reconfigure(EngineConfig {
                site_count: config.site_count + SITE_STEP,
                ..config
            }),
            KeyCode::Minus | KeyCode::NumpadSubtract => self.reconfigure(EngineConfig {
                site_count: config.site_count.saturating_sub(SITE_STEP),
                ..config
            }),

            KeyCode::BracketLeft => self.reconfigure(EngineConfig {
                pixel_step: config.pixel_step.saturating_sub(1),
                ..config
            }),
            KeyCode::BracketRight => self.reconfigure(EngineConfig {
                pixel_step: config.pixel_step + 1,
                ..config
            }),

            // Re-seed with the same configuration
            KeyCode::KeyR => self.reconfigure(config),

            _ => {}
        }
    }
}

/// Click releases and lifted fingers both count toward the tap gesture
fn is_tap(event: &WindowEvent) -> bool {
    matches!(
        event,
        WindowEvent::MouseInput {
            state: ElementState::Released,
            ..
        } | WindowEvent::Touch(Touch {
            phase: TouchPhase::Ended,
            ..
        })
    )
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        log::info!("Initializing Voronoi Drift...");

        let window_attrs = Window::default_attributes()
            .with_title("Voronoi Drift - Initializing...")
            .with_inner_size(winit::dpi::LogicalSize::new(720, 1280));

        let window = Arc::new(
            event_loop
                .create_window(window_attrs)
                .expect("Failed to create window"),
        );

        log::info!("Creating GPU surface...");
        let surface = pollster::block_on(GpuSurface::new(window.clone()));

        log::info!("Controls:");
        log::info!("  Space or triple tap/click: Pause/resume");
        log::info!("  M: Toggle site markers");
        log::info!("  G: Toggle spatial grid");
        log::info!("  +/-: More/fewer sites");
        log::info!("  [/]: Finer/coarser raster");
        log::info!("  R: Re-seed");
        log::info!("  Escape: Quit");

        let size = window.inner_size();
        self.window = Some(window);
        self.surface = Some(surface);

        self.engine.on_viewport_changed(size.width, size.height);
        self.engine.on_visibility_changed(true);
        self.update_title();
        self.wake();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, exiting...");
                self.engine.on_teardown();
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                if event.state.is_pressed() && !event.repeat {
                    if let PhysicalKey::Code(key_code) = event.physical_key {
                        if key_code == KeyCode::Escape {
                            log::info!("Escape pressed, exiting...");
                            self.engine.on_teardown();
                            event_loop.exit();
                        } else {
                            self.handle_key(key_code);
                        }
                    }
                }
            }
            event if is_tap(&event) => self.tap(),
            WindowEvent::Resized(new_size) => {
                if let Some(surface) = &mut self.surface {
                    log::info!("Window resized to {}x{}", new_size.width, new_size.height);
                    surface.resize(new_size.width, new_size.height);
                    self.engine
                        .on_viewport_changed(new_size.width, new_size.height);
                    self.wake();
                }
            }
            WindowEvent::Occluded(occluded) => {
                self.engine.on_visibility_changed(!occluded);
                self.update_title();
                self.wake();
            }
            WindowEvent::RedrawRequested => self.render(),
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.engine.on_teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::PhysicalPosition;
    use winit::event::{DeviceId, MouseButton};

    fn touch(phase: TouchPhase) -> WindowEvent {
        WindowEvent::Touch(Touch {
            // SAFETY: only compared, never passed back to the platform
            device_id: unsafe { DeviceId::dummy() },
            phase,
            location: PhysicalPosition::new(10.0, 10.0),
            force: None,
            id: 0,
        })
    }

    #[test]
    fn test_taps_from_mouse_and_touch() {
        let click = |state| WindowEvent::MouseInput {
            device_id: unsafe { DeviceId::dummy() },
            state,
            button: MouseButton::Left,
        };
        assert!(is_tap(&click(ElementState::Released)));
        assert!(!is_tap(&click(ElementState::Pressed)));

        assert!(is_tap(&touch(TouchPhase::Ended)));
        assert!(!is_tap(&touch(TouchPhase::Started)));
        assert!(!is_tap(&touch(TouchPhase::Cancelled)));
    }
}
