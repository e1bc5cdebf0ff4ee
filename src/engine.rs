//! Engine object owning every piece of animation state.
//!
//! The host drives it exclusively through the lifecycle methods
//! (`on_viewport_changed`, `on_visibility_changed`, `on_teardown`,
//! `on_interaction`, `apply_configuration`, `toggle_pause`) and calls
//! [`VoronoiEngine::present`] from the thread that owns the output surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EngineConfig, BUFFER_POOL_SIZE, PRESENT_WAIT, TARGET_FRAME_INTERVAL};
use crate::error::PipelineError;
use crate::gesture::TapDetector;
use crate::metrics::MetricsSink;
use crate::pipeline::{
    BufferPool, FramePipeline, Generator, PipelineState, PresentOutcome, Rect, Surface,
};
use crate::raster::buffer_dimensions;
use crate::simulation::SiteField;

pub struct VoronoiEngine {
    config: EngineConfig,
    viewport: Option<(u32, u32)>,
    visible: bool,
    state: PipelineState,
    paused: Arc<AtomicBool>,
    /// Set after a failure; the next resume rebuilds everything
    needs_restart: bool,
    metrics: Arc<dyn MetricsSink>,
    pool: Option<BufferPool>,
    generator: Option<Generator>,
    pipeline: Option<FramePipeline>,
    seed: Option<u64>,
    sessions: u64,
    taps: TapDetector,
    frame_interval: Duration,
}

impl VoronoiEngine {
    pub fn new(config: EngineConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            config: config.normalized(),
            viewport: None,
            visible: false,
            state: PipelineState::Stopped,
            paused: Arc::new(AtomicBool::new(false)),
            needs_restart: false,
            metrics,
            pool: None,
            generator: None,
            pipeline: None,
            seed: None,
            sessions: 0,
            taps: TapDetector::default(),
            frame_interval: TARGET_FRAME_INTERVAL,
        }
    }

    /// Make every session reproducible; each reinit derives a fresh seed from it
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn viewport(&self) -> Option<(u32, u32)> {
        self.viewport
    }

    pub fn is_paused(&self) -> bool {
        self.state == PipelineState::Paused
    }

    pub fn buffer_pool(&self) -> Option<&BufferPool> {
        self.pool.as_ref()
    }

    /// The site field, when no generation thread currently owns it
    pub fn field(&self) -> Option<&SiteField> {
        self.generator.as_ref().map(Generator::field)
    }

    /// Sequence number of the frame on screen
    pub fn current_sequence(&self) -> Option<u64> {
        self.pipeline.as_ref().and_then(|p| p.presenter().current_sequence())
    }

    /// Flip between running and paused; returns the new state.
    ///
    /// Pausing keeps the last presented frame. Resuming after a failure
    /// reinitializes the whole session first.
    pub fn toggle_pause(&mut self) -> PipelineState {
        match self.state {
            PipelineState::Running => {
                self.paused.store(true, Ordering::Release);
                self.state = PipelineState::Paused;
                log::info!("Animation paused");
            }
            PipelineState::Paused if self.needs_restart => {
                log::info!("Resuming after failure; reinitializing");
                self.stop();
                if let Err(e) = self.reinitialize().and_then(|()| self.start(false)) {
                    self.suspend(e);
                }
            }
            PipelineState::Paused => {
                self.paused.store(false, Ordering::Release);
                self.state = PipelineState::Running;
                log::info!("Animation resumed");
            }
            PipelineState::Stopped => log::debug!("Pause toggle ignored while stopped"),
        }
        self.state
    }

    /// Resize every per-session resource to a new viewport
    pub fn on_viewport_changed(&mut self, width: u32, height: u32) {
        if self.viewport == Some((width, height)) && self.pool.is_some() {
            log::debug!("Viewport unchanged at {}x{}", width, height);
            return;
        }

        let previous = self.state;
        self.stop();

        if width == 0 || height == 0 {
            log::debug!("Viewport collapsed to {}x{}; releasing buffers", width, height);
            self.viewport = None;
            self.pool = None;
            self.generator = None;
            return;
        }

        log::info!("Viewport changed to {}x{}", width, height);
        self.viewport = Some((width, height));
        if let Err(e) = self.reinitialize() {
            self.suspend(e);
            return;
        }
        self.resume_as(previous);
    }

    /// Start when shown, stop when hidden
    pub fn on_visibility_changed(&mut self, visible: bool) {
        self.visible = visible;
        if !visible {
            self.stop();
            return;
        }
        if self.state != PipelineState::Stopped {
            return;
        }
        if self.viewport.is_none() {
            log::debug!("Visible before any viewport; waiting for dimensions");
            return;
        }
        if let Err(e) = self.start(false) {
            self.suspend(e);
        }
    }

    /// Full shutdown: stop both stages and release every buffer
    pub fn on_teardown(&mut self) {
        self.stop();
        self.pool = None;
        self.generator = None;
        self.viewport = None;
        self.visible = false;
        self.taps.reset();
        log::info!("Engine torn down");
    }

    /// Count a user interaction; three quick taps toggle pause.
    ///
    /// Returns true when the tap completed the gesture.
    pub fn on_interaction(&mut self, timestamp_ms: u64) -> bool {
        self.metrics.on_user_interaction();
        if self.taps.register(timestamp_ms) {
            self.toggle_pause();
            return true;
        }
        false
    }

    /// Replace the configuration and rebuild the session.
    ///
    /// Values are clamped, never rejected. A running pipeline is restarted
    /// with fresh sites; a paused one comes back paused.
    pub fn apply_configuration(&mut self, config: EngineConfig) {
        self.config = config.normalized();
        log::info!(
            "Configuration applied: {} sites, pixel step {}, markers {}, grid {}",
            self.config.site_count,
            self.config.pixel_step,
            self.config.draw_markers,
            self.config.grid_enabled()
        );

        if self.viewport.is_none() {
            return;
        }
        let previous = self.state;
        self.stop();
        if let Err(e) = self.reinitialize() {
            self.suspend(e);
            return;
        }
        self.resume_as(previous);
    }

    /// One presentation tick: wait briefly for the next frame and draw it.
    ///
    /// A surface failure is logged, counted and pauses the engine.
    pub fn present<S: Surface>(&mut self, surface: &mut S) -> PresentOutcome {
        if self.state != PipelineState::Running {
            return PresentOutcome::Idle;
        }
        let Some(pipeline) = self.pipeline.as_mut() else {
            return PresentOutcome::Idle;
        };

        match pipeline.presenter_mut().present_next(surface, PRESENT_WAIT) {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.on_presentation_failed();
                self.suspend(e);
                PresentOutcome::Idle
            }
        }
    }

    /// Draw the frame currently on screen again, e.g. after an expose while paused
    pub fn redraw<S: Surface>(&mut self, surface: &mut S) {
        if let Some(pipeline) = self.pipeline.as_mut() {
            if let Err(e) = pipeline.presenter_mut().redraw(surface) {
                log::warn!("Redraw skipped: {}", e);
            }
        }
    }

    fn resume_as(&mut self, previous: PipelineState) {
        let result = match previous {
            PipelineState::Running => self.start(false),
            PipelineState::Paused => self.start(true),
            PipelineState::Stopped if self.visible => self.start(false),
            PipelineState::Stopped => Ok(()),
        };
        if let Err(e) = result {
            self.suspend(e);
        }
    }

    /// Rebuild the site field, spatial grid and buffer pool for the viewport
    fn reinitialize(&mut self) -> Result<(), PipelineError> {
        let (width, height) = self.viewport.ok_or(PipelineError::NoViewport)?;
        // Release the old pool before allocating the new one
        self.pool = None;
        self.needs_restart = false;

        self.generator = None;
        let (bw, bh) = buffer_dimensions(width, height, self.config.pixel_step);
        self.pool = Some(BufferPool::new(
            BUFFER_POOL_SIZE,
            bw,
            bh,
            Arc::clone(&self.metrics),
        )?);
        self.generator = Some(self.new_generator(width, height));
        log::debug!(
            "Session initialized: {} sites over {}x{}, buffers {}x{}",
            self.config.site_count,
            width,
            height,
            bw,
            bh
        );
        Ok(())
    }

    fn new_generator(&mut self, width: u32, height: u32) -> Generator {
        let seed = self.seed.map(|s| s.wrapping_add(self.sessions));
        self.sessions += 1;
        Generator::new(&self.config, width, height, seed)
    }

    fn start(&mut self, paused: bool) -> Result<(), PipelineError> {
        let (width, height) = self.viewport.ok_or(PipelineError::NoViewport)?;
        let generator = match self.generator.take() {
            Some(generator) => generator,
            None => self.new_generator(width, height),
        };
        let pool = match self.pool.take() {
            Some(pool) => pool,
            None => {
                let (bw, bh) = buffer_dimensions(width, height, self.config.pixel_step);
                BufferPool::new(BUFFER_POOL_SIZE, bw, bh, Arc::clone(&self.metrics))?
            }
        };

        self.paused.store(paused, Ordering::Release);
        let started = FramePipeline::start(
            generator,
            &pool,
            Rect::sized(width, height),
            Arc::clone(&self.paused),
            Arc::clone(&self.metrics),
            self.frame_interval,
        );
        self.pool = Some(pool);
        self.pipeline = Some(started?);

        self.metrics.start_monitoring();
        self.state = if paused {
            PipelineState::Paused
        } else {
            PipelineState::Running
        };
        log::info!("Pipeline started ({:?})", self.state);
        Ok(())
    }

    /// Cancel both stages and put every frame back in the pool
    fn stop(&mut self) {
        if let Some(pipeline) = self.pipeline.take() {
            match self.pool.as_ref() {
                Some(pool) => match pipeline.stop(pool) {
                    Ok(generator) => self.generator = Some(generator),
                    Err(e) => log::error!("Generation stage ended abnormally: {}", e),
                },
                None => drop(pipeline),
            }
            self.metrics.stop_monitoring();
            log::info!("Pipeline stopped");
        }
        self.paused.store(false, Ordering::Release);
        self.needs_restart = false;
        self.state = PipelineState::Stopped;
    }

    /// Recoverable failure: freeze on the last frame until resumed
    fn suspend(&mut self, err: PipelineError) {
        log::error!("Frame pipeline failed: {}; pausing", err);
        self.paused.store(true, Ordering::Release);
        self.needs_restart = true;
        self.state = PipelineState::Paused;
    }
}

impl Drop for VoronoiEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
