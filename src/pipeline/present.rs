use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::PipelineError;
use crate::metrics::MetricsSink;
use crate::pipeline::pool::give_back;
use crate::pipeline::Frame;
use crate::raster::PixelBuffer;
use crate::simulation::Rgba;

/// Axis-aligned pixel rectangle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn sized(width: u32, height: u32) -> Self {
        Self { x: 0, y: 0, width, height }
    }
}

/// One marker circle, laid out as GPU instance data (32 bytes)
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MarkerInstance {
    /// Center in viewport pixels
    pub center: [f32; 2],
    pub radius: f32,
    pub _padding: f32,
    /// Straight (non-premultiplied) RGBA
    pub color: [f32; 4],
}

/// Output surface the presentation stage draws onto.
///
/// `acquire_draw_target` returning `None` means the surface is unavailable
/// right now; the pipeline treats that as recoverable.
pub trait Surface {
    type Target;

    fn acquire_draw_target(&mut self) -> Option<Self::Target>;

    /// Scale `src` of `buffer` onto `dst` of the target
    fn draw_scaled(
        &mut self,
        target: &mut Self::Target,
        buffer: &PixelBuffer,
        src: Rect,
        dst: Rect,
        filtered: bool,
    );

    fn draw_markers(&mut self, target: &mut Self::Target, markers: &[MarkerInstance]);

    fn release_draw_target(&mut self, target: Self::Target) -> Result<(), PipelineError>;
}

/// Result of one presentation tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    /// A new frame with this sequence number reached the surface
    Presented(u64),
    /// No frame arrived in time, or the pipeline is not running
    Idle,
}

/// Presentation stage: receives frames in generation order and blits them.
///
/// Keeps the most recently presented frame so it can be redrawn while the
/// pipeline is paused; older frames go straight back to the pool.
pub struct Presenter {
    frames: Receiver<Frame>,
    recycle: Sender<Frame>,
    current: Option<Frame>,
    viewport: Rect,
    marker_colors: Arc<[Rgba]>,
    marker_radius: f32,
    draw_markers: bool,
    instances: Vec<MarkerInstance>,
    metrics: Arc<dyn MetricsSink>,
}

impl Presenter {
    pub(crate) fn new(
        frames: Receiver<Frame>,
        recycle: Sender<Frame>,
        viewport: Rect,
        marker_colors: Arc<[Rgba]>,
        marker_radius: f32,
        draw_markers: bool,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            frames,
            recycle,
            current: None,
            viewport,
            marker_colors,
            marker_radius,
            draw_markers,
            instances: Vec::new(),
            metrics,
        }
    }

    /// Sequence number of the frame currently on screen
    pub fn current_sequence(&self) -> Option<u64> {
        self.current.as_ref().map(|f| f.sequence)
    }

    /// Wait up to `wait` for the next frame and draw it.
    ///
    /// On failure the received frame is discarded back to the pool and the
    /// previously presented frame stays current.
    pub fn present_next<S: Surface>(
        &mut self,
        surface: &mut S,
        wait: Duration,
    ) -> Result<PresentOutcome, PipelineError> {
        let frame = match self.frames.recv_timeout(wait) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => return Ok(PresentOutcome::Idle),
            // The producer only hangs up early if it died
            Err(RecvTimeoutError::Disconnected) => return Err(PipelineError::GenerationPanicked),
        };

        let started = Instant::now();
        if let Err(e) = self.draw(surface, &frame) {
            self.give_back(frame);
            return Err(e);
        }
        self.metrics.on_frame_presented(started.elapsed());

        let sequence = frame.sequence;
        if let Some(previous) = self.current.replace(frame) {
            self.give_back(previous);
        }
        Ok(PresentOutcome::Presented(sequence))
    }

    /// Draw the current frame again without consuming a new one
    pub fn redraw<S: Surface>(&mut self, surface: &mut S) -> Result<(), PipelineError> {
        match self.current.take() {
            Some(frame) => {
                let result = self.draw(surface, &frame);
                self.current = Some(frame);
                result
            }
            None => Ok(()),
        }
    }

    /// Return every frame the presenter holds or could still receive
    pub(crate) fn drain(&mut self) -> Vec<Frame> {
        let mut frames: Vec<Frame> = self.frames.try_iter().collect();
        frames.extend(self.current.take());
        frames
    }

    fn draw<S: Surface>(&mut self, surface: &mut S, frame: &Frame) -> Result<(), PipelineError> {
        let mut target = surface
            .acquire_draw_target()
            .ok_or(PipelineError::SurfaceUnavailable)?;

        let src = Rect::sized(frame.pixels.width(), frame.pixels.height());
        surface.draw_scaled(&mut target, &frame.pixels, src, self.viewport, true);

        if self.draw_markers && !frame.sites.is_empty() {
            self.instances.clear();
            self.instances.extend(frame.sites.iter().zip(self.marker_colors.iter()).map(
                |(&center, color)| MarkerInstance {
                    center,
                    radius: self.marker_radius,
                    _padding: 0.0,
                    color: color.to_f32(),
                },
            ));
            surface.draw_markers(&mut target, &self.instances);
        }

        surface.release_draw_target(target)
    }

    fn give_back(&self, frame: Frame) {
        give_back(&self.recycle, frame, &*self.metrics);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::metrics::NoopMetrics;
    use crossbeam_channel::bounded;

    /// Surface double recording what reached it
    #[derive(Default)]
    pub(crate) struct RecordingSurface {
        pub available: bool,
        pub blits: Vec<(Rect, Rect, bool, Rgba)>,
        pub marker_batches: Vec<usize>,
        pub released: usize,
    }

    impl RecordingSurface {
        pub(crate) fn new() -> Self {
            Self { available: true, ..Self::default() }
        }
    }

    impl Surface for RecordingSurface {
        type Target = ();

        fn acquire_draw_target(&mut self) -> Option<()> {
            self.available.then_some(())
        }

        fn draw_scaled(&mut self, _: &mut (), buffer: &PixelBuffer, src: Rect, dst: Rect, filtered: bool) {
            self.blits.push((src, dst, filtered, buffer.pixel(0, 0)));
        }

        fn draw_markers(&mut self, _: &mut (), markers: &[MarkerInstance]) {
            self.marker_batches.push(markers.len());
        }

        fn release_draw_target(&mut self, _: ()) -> Result<(), PipelineError> {
            self.released += 1;
            Ok(())
        }
    }

    fn frame(sequence: u64, shade: u8, sites: usize) -> Frame {
        let mut f = Frame::new(PixelBuffer::new(2, 2));
        f.sequence = sequence;
        f.pixels.fill_with(Rgba::opaque(shade, shade, shade));
        f.sites = vec![[1.0, 1.0]; sites];
        f
    }

    fn presenter(draw_markers: bool) -> (Presenter, Sender<Frame>, Receiver<Frame>) {
        let (frames_tx, frames_rx) = bounded(2);
        let (free_tx, free_rx) = bounded(4);
        let colors: Arc<[Rgba]> = vec![Rgba::opaque(1, 2, 3).with_alpha(128); 3].into();
        let presenter = Presenter::new(
            frames_rx,
            free_tx,
            Rect::sized(6, 6),
            colors,
            4.0,
            draw_markers,
            Arc::new(NoopMetrics),
        );
        (presenter, frames_tx, free_rx)
    }

    #[test]
    fn test_frames_presented_in_order() {
        let (mut presenter, tx, free) = presenter(false);
        let mut surface = RecordingSurface::new();
        tx.send(frame(1, 10, 0)).unwrap();
        tx.send(frame(2, 20, 0)).unwrap();

        let wait = Duration::from_millis(10);
        assert_eq!(presenter.present_next(&mut surface, wait).unwrap(), PresentOutcome::Presented(1));
        assert_eq!(presenter.present_next(&mut surface, wait).unwrap(), PresentOutcome::Presented(2));
        assert_eq!(presenter.present_next(&mut surface, wait).unwrap(), PresentOutcome::Idle);

        assert_eq!(surface.blits.len(), 2);
        assert_eq!(surface.released, 2, "every target handed back");
        assert_eq!(surface.blits[0].3, Rgba::opaque(10, 10, 10));
        assert_eq!(surface.blits[1].0, Rect::sized(2, 2));
        assert_eq!(surface.blits[1].1, Rect::sized(6, 6));
        assert!(surface.blits[1].2, "blit is filtered");

        // Frame 1 went back to the pool once frame 2 replaced it
        assert_eq!(free.len(), 1);
        assert_eq!(presenter.current_sequence(), Some(2));
    }

    #[test]
    fn test_markers_drawn_when_enabled() {
        let (mut presenter, tx, _free) = presenter(true);
        let mut surface = RecordingSurface::new();
        tx.send(frame(1, 10, 3)).unwrap();
        presenter.present_next(&mut surface, Duration::from_millis(10)).unwrap();
        assert_eq!(surface.marker_batches, vec![3]);
    }

    #[test]
    fn test_unavailable_surface_keeps_last_frame() {
        let (mut presenter, tx, free) = presenter(false);
        let mut surface = RecordingSurface::new();
        tx.send(frame(1, 10, 0)).unwrap();
        presenter.present_next(&mut surface, Duration::from_millis(10)).unwrap();

        surface.available = false;
        tx.send(frame(2, 20, 0)).unwrap();
        let err = presenter.present_next(&mut surface, Duration::from_millis(10));
        assert!(matches!(err, Err(PipelineError::SurfaceUnavailable)));

        assert_eq!(presenter.current_sequence(), Some(1), "last good frame stays");
        assert_eq!(free.len(), 1, "failed frame is recycled");

        surface.available = true;
        presenter.redraw(&mut surface).unwrap();
        assert_eq!(surface.blits.last().unwrap().3, Rgba::opaque(10, 10, 10));
    }

    #[test]
    fn test_dead_producer_is_an_error() {
        let (mut presenter, tx, _free) = presenter(false);
        let mut surface = RecordingSurface::new();
        tx.send(frame(1, 10, 0)).unwrap();
        drop(tx);

        let wait = Duration::from_millis(10);
        assert_eq!(presenter.present_next(&mut surface, wait).unwrap(), PresentOutcome::Presented(1));
        let err = presenter.present_next(&mut surface, wait);
        assert!(matches!(err, Err(PipelineError::GenerationPanicked)));
        assert_eq!(presenter.current_sequence(), Some(1));
    }

    #[test]
    fn test_drain_returns_everything() {
        let (mut presenter, tx, _free) = presenter(false);
        let mut surface = RecordingSurface::new();
        tx.send(frame(1, 10, 0)).unwrap();
        presenter.present_next(&mut surface, Duration::from_millis(10)).unwrap();
        tx.send(frame(2, 20, 0)).unwrap();
        tx.send(frame(3, 30, 0)).unwrap();

        let drained = presenter.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(presenter.current_sequence(), None);
    }
}
