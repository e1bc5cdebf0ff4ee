//! Double-buffered producer/consumer frame pipeline.
//!
//! A generation thread advances the site field and rasterizes into frames
//! claimed from a [`BufferPool`], then hands them to the [`Presenter`]
//! through a bounded channel of [`FRAME_CHANNEL_CAPACITY`]. A full channel
//! blocks the producer, so generation never runs more than two frames ahead
//! of presentation. Frames are presented strictly in generation order.

pub mod pacing;
pub mod pool;
pub mod present;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{
    bounded, select, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError,
};

pub use pacing::FramePacer;
pub use pool::BufferPool;
pub use present::{MarkerInstance, PresentOutcome, Presenter, Rect, Surface};

use crate::config::{marker_radius, EngineConfig, FRAME_CHANNEL_CAPACITY, PAUSED_IDLE_TICK};
use crate::error::PipelineError;
use crate::metrics::MetricsSink;
use crate::raster::{PixelBuffer, Rasterizer};
use crate::simulation::{Rgba, SiteField};

/// How often a producer blocked on a full channel checks for shutdown
const HANDOFF_POLL: Duration = Duration::from_millis(5);

/// Lifecycle state of the pipeline
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PipelineState {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// One pooled frame: a rasterized buffer plus the site positions it was
/// rendered from, for the marker overlay.
#[derive(Debug)]
pub struct Frame {
    pub sequence: u64,
    pub pixels: PixelBuffer,
    pub sites: Vec<[f32; 2]>,
}

impl Frame {
    pub fn new(pixels: PixelBuffer) -> Self {
        Self {
            sequence: 0,
            pixels,
            sites: Vec::new(),
        }
    }
}

/// Producer-side state: the site field and its rasterizer.
///
/// Owned by the generation thread while the pipeline runs; nothing else
/// touches the field, so no lock guards it.
pub struct Generator {
    field: SiteField,
    rasterizer: Rasterizer,
    draw_markers: bool,
    next_sequence: u64,
}

impl Generator {
    pub fn new(config: &EngineConfig, width: u32, height: u32, seed: Option<u64>) -> Self {
        Self {
            field: SiteField::new(config.site_count, width, height, seed),
            rasterizer: Rasterizer::new(config, width, height),
            draw_markers: config.draw_markers,
            next_sequence: 1,
        }
    }

    pub fn field(&self) -> &SiteField {
        &self.field
    }

    pub fn draw_markers(&self) -> bool {
        self.draw_markers
    }

    /// Produce the next frame: advance, rasterize, snapshot positions
    pub fn generate(&mut self, frame: &mut Frame) {
        self.field.advance();
        self.rasterizer.render(&self.field, &mut frame.pixels);

        frame.sites.clear();
        if self.draw_markers {
            frame.sites.extend_from_slice(self.field.positions());
        }
        frame.sequence = self.next_sequence;
        self.next_sequence += 1;
    }
}

/// Generation loop on its own thread plus the presenter on the caller's
pub struct FramePipeline {
    shutdown: Sender<()>,
    worker: JoinHandle<Generator>,
    presenter: Presenter,
}

impl FramePipeline {
    /// Spawn the generation thread for `generator`, claiming frames from `pool`
    pub fn start(
        generator: Generator,
        pool: &BufferPool,
        viewport: Rect,
        paused: Arc<AtomicBool>,
        metrics: Arc<dyn MetricsSink>,
        interval: Duration,
    ) -> Result<Self, PipelineError> {
        let (frames_tx, frames_rx) = bounded(FRAME_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let marker_colors: Arc<[Rgba]> = generator.field().marker_colors().into();
        let presenter = Presenter::new(
            frames_rx,
            pool.returner(),
            viewport,
            marker_colors,
            marker_radius(generator.field().len()),
            generator.draw_markers(),
            Arc::clone(&metrics),
        );

        let worker = GenerationLoop {
            generator,
            claim: pool.claimer(),
            frames: frames_tx,
            recycle: pool.returner(),
            shutdown: shutdown_rx,
            paused,
            metrics,
            pacer: FramePacer::new(interval),
        };
        let worker = std::thread::Builder::new()
            .name("voronoi-generate".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            shutdown: shutdown_tx,
            worker,
            presenter,
        })
    }

    pub fn presenter(&self) -> &Presenter {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut Presenter {
        &mut self.presenter
    }

    /// Cancel generation, wait for the thread and return every frame to `pool`.
    ///
    /// Frames still queued for presentation are discarded, not shown.
    pub fn stop(self, pool: &BufferPool) -> Result<Generator, PipelineError> {
        let Self {
            shutdown,
            worker,
            mut presenter,
        } = self;

        drop(shutdown);
        let joined = worker.join();

        for frame in presenter.drain() {
            pool.recycle(frame);
        }
        joined.map_err(|_| PipelineError::GenerationPanicked)
    }
}

struct GenerationLoop {
    generator: Generator,
    claim: Receiver<Frame>,
    frames: Sender<Frame>,
    recycle: Sender<Frame>,
    shutdown: Receiver<()>,
    paused: Arc<AtomicBool>,
    metrics: Arc<dyn MetricsSink>,
    pacer: FramePacer,
}

impl GenerationLoop {
    fn run(mut self) -> Generator {
        log::debug!("Generation loop started");
        loop {
            if self.paused.load(Ordering::Acquire) {
                if self.wait_for_shutdown(PAUSED_IDLE_TICK) {
                    break;
                }
                continue;
            }

            self.pacer.begin_tick();
            let claimed = select! {
                recv(self.claim) -> frame => frame.ok(),
                recv(self.shutdown) -> _ => None,
            };
            let Some(mut frame) = claimed else {
                break;
            };

            let started = Instant::now();
            self.generator.generate(&mut frame);
            let cost = started.elapsed();

            if !self.handoff(frame) {
                break;
            }
            self.metrics.on_frame_generated(cost);

            if self.wait_for_shutdown(self.pacer.remaining()) {
                break;
            }
        }
        log::debug!("Generation loop stopped");
        self.generator
    }

    /// Sleep up to `timeout`; true once shutdown has been signalled
    fn wait_for_shutdown(&self, timeout: Duration) -> bool {
        !matches!(self.shutdown.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    /// Block until the presenter has room; false if cancelled meanwhile
    fn handoff(&self, mut frame: Frame) -> bool {
        loop {
            match self.frames.send_timeout(frame, HANDOFF_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if matches!(self.shutdown.try_recv(), Err(TryRecvError::Disconnected)) {
                        pool::give_back(&self.recycle, pending, &*self.metrics);
                        return false;
                    }
                    frame = pending;
                }
                Err(SendTimeoutError::Disconnected(pending)) => {
                    pool::give_back(&self.recycle, pending, &*self.metrics);
                    return false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BUFFER_POOL_SIZE, TARGET_FRAME_INTERVAL};
    use crate::metrics::MetricsLogger;
    use crate::raster::buffer_dimensions;
    use crate::pipeline::present::tests::RecordingSurface;

    const WIDTH: u32 = 90;
    const HEIGHT: u32 = 60;

    fn small_config() -> EngineConfig {
        EngineConfig {
            site_count: 24,
            pixel_step: 3,
            ..EngineConfig::default()
        }
    }

    fn setup(metrics: Arc<MetricsLogger>) -> (BufferPool, Generator) {
        let config = small_config();
        let (bw, bh) = buffer_dimensions(WIDTH, HEIGHT, config.pixel_step);
        let pool = BufferPool::new(BUFFER_POOL_SIZE, bw, bh, metrics).unwrap();
        let generator = Generator::new(&config, WIDTH, HEIGHT, Some(3));
        (pool, generator)
    }

    fn start(pool: &BufferPool, generator: Generator, metrics: Arc<MetricsLogger>) -> (FramePipeline, Arc<AtomicBool>) {
        let paused = Arc::new(AtomicBool::new(false));
        let pipeline = FramePipeline::start(
            generator,
            pool,
            Rect::sized(WIDTH, HEIGHT),
            Arc::clone(&paused),
            metrics,
            Duration::from_millis(2),
        )
        .unwrap();
        (pipeline, paused)
    }

    #[test]
    fn test_generate_snapshots_sites() {
        let config = small_config();
        let mut generator = Generator::new(&config, WIDTH, HEIGHT, Some(1));
        let mut frame = Frame::new(PixelBuffer::for_viewport(WIDTH, HEIGHT, 3));

        generator.generate(&mut frame);
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.sites.as_slice(), generator.field().positions());

        generator.generate(&mut frame);
        assert_eq!(frame.sequence, 2);
        assert_eq!(frame.sites.len(), 24);
    }

    #[test]
    fn test_no_snapshot_without_markers() {
        let config = EngineConfig { draw_markers: false, ..small_config() };
        let mut generator = Generator::new(&config, WIDTH, HEIGHT, Some(1));
        let mut frame = Frame::new(PixelBuffer::for_viewport(WIDTH, HEIGHT, 3));
        generator.generate(&mut frame);
        assert!(frame.sites.is_empty());
    }

    #[test]
    fn test_stalled_presenter_applies_backpressure() {
        let metrics = Arc::new(MetricsLogger::default());
        let (pool, generator) = setup(metrics.clone());
        let (pipeline, _paused) = start(&pool, generator, metrics.clone());

        // Nobody presents: the producer fills the channel and blocks
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(
            metrics.snapshot().frames_generated,
            FRAME_CHANNEL_CAPACITY as u64,
            "producer must stop once the channel is full"
        );

        pipeline.stop(&pool).unwrap();
        assert_eq!(pool.available(), pool.capacity(), "all frames returned");
    }

    #[test]
    fn test_frames_arrive_in_generation_order() {
        let metrics = Arc::new(MetricsLogger::default());
        let (pool, generator) = setup(metrics.clone());
        let (mut pipeline, _paused) = start(&pool, generator, metrics.clone());
        let mut surface = RecordingSurface::new();

        let mut sequences = Vec::new();
        while sequences.len() < 10 {
            match pipeline
                .presenter_mut()
                .present_next(&mut surface, Duration::from_millis(500))
                .unwrap()
            {
                PresentOutcome::Presented(seq) => sequences.push(seq),
                PresentOutcome::Idle => panic!("producer stalled"),
            }
        }
        let expected: Vec<u64> = (1..=10).collect();
        assert_eq!(sequences, expected, "no reordering or skipping");
        assert_eq!(surface.blits.len(), 10);

        pipeline.stop(&pool).unwrap();
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn test_pause_halts_production() {
        let metrics = Arc::new(MetricsLogger::default());
        let (pool, generator) = setup(metrics.clone());
        let (mut pipeline, paused) = start(&pool, generator, metrics.clone());
        let mut surface = RecordingSurface::new();

        for _ in 0..3 {
            pipeline
                .presenter_mut()
                .present_next(&mut surface, Duration::from_millis(500))
                .unwrap();
        }
        paused.store(true, Ordering::Release);

        // Let any in-flight tick finish, then production must be flat
        std::thread::sleep(TARGET_FRAME_INTERVAL * 2);
        let before = metrics.snapshot().frames_generated;
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(metrics.snapshot().frames_generated, before, "paused producer idles");

        paused.store(false, Ordering::Release);
        let outcome = pipeline
            .presenter_mut()
            .present_next(&mut surface, Duration::from_millis(500))
            .unwrap();
        assert!(matches!(outcome, PresentOutcome::Presented(_)), "resumes after unpause");

        let generator = pipeline.stop(&pool).unwrap();
        assert_eq!(generator.field().len(), 24);
        assert_eq!(pool.available(), pool.capacity());
    }

    /// Loop whose presenter has already gone away
    fn orphaned_loop(
        pool: &BufferPool,
        recycle: Sender<Frame>,
        metrics: Arc<MetricsLogger>,
    ) -> (GenerationLoop, Sender<()>) {
        let (frames_tx, _) = bounded(FRAME_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let worker = GenerationLoop {
            generator: Generator::new(&small_config(), WIDTH, HEIGHT, Some(5)),
            claim: pool.claimer(),
            frames: frames_tx,
            recycle,
            shutdown: shutdown_rx,
            paused: Arc::new(AtomicBool::new(false)),
            metrics,
            pacer: FramePacer::new(TARGET_FRAME_INTERVAL),
        };
        (worker, shutdown_tx)
    }

    #[test]
    fn test_failed_handoff_returns_frame() {
        let metrics = Arc::new(MetricsLogger::default());
        let (pool, _) = setup(metrics.clone());
        let (worker, _shutdown) = orphaned_loop(&pool, pool.returner(), metrics.clone());

        let frame = worker.claim.try_recv().unwrap();
        assert!(!worker.handoff(frame));
        assert_eq!(pool.available(), pool.capacity(), "frame back in the pool");
    }

    #[test]
    fn test_refused_frame_is_accounted() {
        let metrics = Arc::new(MetricsLogger::default());
        let (pool, _) = setup(metrics.clone());
        let (refused, closed) = bounded(1);
        drop(closed);
        let (worker, _shutdown) = orphaned_loop(&pool, refused, metrics.clone());

        let live = metrics.snapshot().live_buffer_bytes;
        let frame = worker.claim.try_recv().unwrap();
        assert!(!worker.handoff(frame));
        assert_eq!(
            metrics.snapshot().live_buffer_bytes,
            live - pool.frame_bytes() as u64,
            "dropped frame reported released"
        );
    }

    #[test]
    fn test_stop_while_paused_is_prompt() {
        let metrics = Arc::new(MetricsLogger::default());
        let (pool, generator) = setup(metrics.clone());
        let (pipeline, paused) = start(&pool, generator, metrics);
        paused.store(true, Ordering::Release);

        let started = Instant::now();
        pipeline.stop(&pool).unwrap();
        assert!(started.elapsed() < Duration::from_secs(1), "stop must not hang");
        assert_eq!(pool.available(), pool.capacity());
    }
}
