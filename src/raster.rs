#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::error::PipelineError;
use crate::simulation::{nearest_brute_force, DistanceMetric, Rgba, SiteField, SpatialGrid};

/// Buffer size covering a viewport at `pixel_step` screen pixels per cell
pub fn buffer_dimensions(width: u32, height: u32, pixel_step: u32) -> (u32, u32) {
    let step = pixel_step.max(1);
    (width.div_ceil(step), height.div_ceil(step))
}

/// Low-resolution nearest-site raster, row-major
#[derive(Clone, Debug)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    pixels: Vec<Rgba>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Rgba::BLACK; width as usize * height as usize],
        }
    }

    /// Like [`PixelBuffer::new`] but reports allocation failure instead of aborting
    pub fn try_new(width: u32, height: u32) -> Result<Self, PipelineError> {
        let len = (width as usize).checked_mul(height as usize);
        let failed = || PipelineError::AllocationFailed {
            bytes: len.map_or(usize::MAX, |n| n.saturating_mul(std::mem::size_of::<Rgba>())),
        };

        let len = len.ok_or_else(failed)?;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len).map_err(|_| failed())?;
        pixels.resize(len, Rgba::BLACK);
        Ok(Self { width, height, pixels })
    }

    pub fn for_viewport(width: u32, height: u32, pixel_step: u32) -> Self {
        let (w, h) = buffer_dimensions(width, height, pixel_step);
        Self::new(w, h)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Rgba] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        self.pixels[(y * self.width + x) as usize]
    }

    pub fn fill_with(&mut self, color: Rgba) {
        self.pixels.fill(color);
    }

    /// Raw RGBA8 bytes for a bulk texture upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<Rgba>()
    }
}

/// Fill every cell of `buffer` with the fill color of its nearest site.
///
/// Cell `(bx, by)` samples screen pixel `(bx * pixel_step, by * pixel_step)`.
/// With `index` the query goes through the spatial grid (which must have been
/// rebuilt from `positions`), otherwise every site is scanned.
pub fn fill(
    buffer: &mut PixelBuffer,
    positions: &[[f32; 2]],
    colors: &[Rgba],
    index: Option<&SpatialGrid>,
    pixel_step: u32,
    metric: &DistanceMetric,
) {
    let width = buffer.width as usize;
    if width == 0 {
        return;
    }
    let step = pixel_step.max(1) as f32;

    let fill_row = |(by, row): (usize, &mut [Rgba])| {
        let y = by as f32 * step;
        for (bx, out) in row.iter_mut().enumerate() {
            let x = bx as f32 * step;
            let nearest = match index {
                Some(grid) => grid.nearest(x, y, positions, metric),
                None => nearest_brute_force(x, y, positions, metric),
            };
            *out = nearest.map_or(Rgba::BLACK, |i| colors[i]);
        }
    };

    #[cfg(feature = "parallel")]
    buffer.pixels.par_chunks_mut(width).enumerate().for_each(fill_row);

    #[cfg(not(feature = "parallel"))]
    buffer.pixels.chunks_mut(width).enumerate().for_each(fill_row);
}

/// Per-session rasterizer: owns the spatial grid sized for the viewport
pub struct Rasterizer {
    pixel_step: u32,
    metric: DistanceMetric,
    grid: Option<SpatialGrid>,
}

impl Rasterizer {
    pub fn new(config: &EngineConfig, width: u32, height: u32) -> Self {
        let grid = config
            .grid_enabled()
            .then(|| SpatialGrid::for_viewport(width, height, config.site_count));
        if let Some(grid) = &grid {
            let (gw, gh) = grid.dimensions();
            log::debug!("Spatial grid: {}x{} cells of {}px", gw, gh, grid.cell_size());
        }
        Self {
            pixel_step: config.pixel_step,
            metric: DistanceMetric::SquaredEuclidean,
            grid,
        }
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn uses_grid(&self) -> bool {
        self.grid.is_some()
    }

    /// Rebuild the index (if any) and rasterize the field into `buffer`
    pub fn render(&mut self, field: &SiteField, buffer: &mut PixelBuffer) {
        if let Some(grid) = self.grid.as_mut() {
            grid.rebuild(field.positions());
        }
        fill(
            buffer,
            field.positions(),
            field.fill_colors(),
            self.grid.as_ref(),
            self.pixel_step,
            &self.metric,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::InverseCovariance;
    use std::collections::HashSet;

    #[test]
    fn test_buffer_dimensions_round_up() {
        assert_eq!(buffer_dimensions(1000, 2000, 3), (334, 667));
        assert_eq!(buffer_dimensions(999, 999, 3), (333, 333));
        assert_eq!(buffer_dimensions(5, 5, 1), (5, 5));
        assert_eq!(buffer_dimensions(u32::MAX, u32::MAX, 3), (1_431_655_765, 1_431_655_765));
    }

    #[test]
    fn test_oversized_buffer_reports_failure() {
        let err = PixelBuffer::try_new(u32::MAX, u32::MAX).unwrap_err();
        assert!(matches!(err, PipelineError::AllocationFailed { bytes: usize::MAX }));

        let err = PixelBuffer::try_new(1 << 31, 1 << 31).unwrap_err();
        assert!(matches!(err, PipelineError::AllocationFailed { .. }));
    }

    #[test]
    fn test_byte_layout() {
        let buffer = PixelBuffer::new(4, 3);
        assert_eq!(buffer.byte_size(), 48);
        assert_eq!(buffer.as_bytes().len(), 48);
        assert_eq!(&buffer.as_bytes()[..4], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_full_frame_uses_site_colors() {
        let config = EngineConfig::default();
        let field = SiteField::new(config.site_count, 1000, 2000, Some(8));
        let mut rasterizer = Rasterizer::new(&config, 1000, 2000);
        assert!(rasterizer.uses_grid());

        let mut buffer = PixelBuffer::for_viewport(1000, 2000, config.pixel_step);
        assert_eq!((buffer.width(), buffer.height()), (334, 667));
        rasterizer.render(&field, &mut buffer);

        let palette: HashSet<Rgba> = field.fill_colors().iter().copied().collect();
        assert_eq!(buffer.pixels().len(), 334 * 667);
        assert!(buffer.pixels().iter().all(|c| palette.contains(c)));
    }

    #[test]
    fn test_grid_and_brute_force_rasters_agree() {
        let grid_config = EngineConfig { site_count: 600, ..EngineConfig::default() };
        let brute_config = EngineConfig { use_spatial_grid: false, ..grid_config };
        let field = SiteField::new(600, 480, 320, Some(9));

        let mut with_grid = PixelBuffer::for_viewport(480, 320, 2);
        let mut without = with_grid.clone();
        Rasterizer::new(&EngineConfig { pixel_step: 2, ..grid_config }, 480, 320)
            .render(&field, &mut with_grid);
        Rasterizer::new(&EngineConfig { pixel_step: 2, ..brute_config }, 480, 320)
            .render(&field, &mut without);

        assert_eq!(with_grid.pixels(), without.pixels());
    }

    #[test]
    fn test_alternate_metrics_through_grid() {
        let config = EngineConfig { site_count: 520, pixel_step: 4, ..EngineConfig::default() };
        let field = SiteField::new(520, 400, 300, Some(12));
        let inverse = InverseCovariance::from_points(field.positions()).unwrap();

        for metric in [DistanceMetric::Manhattan, DistanceMetric::Mahalanobis(inverse)] {
            let mut via_grid = PixelBuffer::for_viewport(400, 300, 4);
            Rasterizer::new(&config, 400, 300)
                .with_metric(metric)
                .render(&field, &mut via_grid);

            let mut direct = via_grid.clone();
            fill(&mut direct, field.positions(), field.fill_colors(), None, 4, &metric);
            assert_eq!(via_grid.pixels(), direct.pixels(), "{:?} disagrees", metric);
        }
    }

    #[test]
    fn test_cell_takes_nearest_site_color() {
        let positions = [[0.0, 0.0], [9.0, 9.0]];
        let colors = [Rgba::opaque(255, 0, 0), Rgba::opaque(0, 0, 255)];
        let mut buffer = PixelBuffer::new(4, 4);
        fill(&mut buffer, &positions, &colors, None, 3, &DistanceMetric::SquaredEuclidean);

        assert_eq!(buffer.pixel(0, 0), colors[0]);
        assert_eq!(buffer.pixel(3, 3), colors[1]);
        assert_eq!(buffer.pixel(2, 2), colors[1]);
        // (3, 6) is equidistant; lowest index wins
        assert_eq!(buffer.pixel(1, 2), colors[0]);
    }
}
