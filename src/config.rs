use std::time::Duration;

/// Site count (553 sites fills a phone-sized viewport with ~60px cells)
pub const DEFAULT_SITE_COUNT: usize = 553;
pub const MIN_SITE_COUNT: usize = 2;
pub const MAX_SITE_COUNT: usize = 3000;

/// Screen pixels per buffer cell along each axis
pub const DEFAULT_PIXEL_STEP: u32 = 3;
pub const MIN_PIXEL_STEP: u32 = 1;
pub const MAX_PIXEL_STEP: u32 = 5;

// ============================================
// Spatial Grid
// ============================================

/// Below this many sites the rasterizer scans every site instead
pub const GRID_ACTIVATION_THRESHOLD: usize = 500;

/// Multiplier on sqrt(area / sites) when sizing grid cells
pub const GRID_FACTOR: f32 = 1.0;

// ============================================
// Site Physics
// ============================================

/// Initial velocity range per axis (pixels per tick)
pub const INITIAL_SPEED: f32 = 2.5;

/// Velocity magnitude multiplier drawn on every wall bounce
pub const BOUNCE_DAMPING_MIN: f32 = 0.9;
pub const BOUNCE_DAMPING_MAX: f32 = 1.1;

// ============================================
// Palette
// ============================================

/// Golden-angle hue increment in degrees
pub const GOLDEN_ANGLE: f32 = 137.508;

pub const SATURATION_MIN: f32 = 0.65;
pub const SATURATION_MAX: f32 = 0.95;
pub const VALUE_MIN: f32 = 0.75;
pub const VALUE_MAX: f32 = 0.95;

/// Relative luminance below which a fill color counts as dark
pub const DARK_THRESHOLD: f32 = 0.4;

/// Marker contrast: lighten dark fills by 60%, darken light fills by 40%
pub const LIGHTEN_FACTOR: f32 = 0.6;
pub const DARKEN_FACTOR: f32 = 0.4;

/// Saturation multiplier applied when lightening
pub const LIGHTEN_SATURATION: f32 = 0.8;

/// Marker alpha (50% transparency)
pub const MARKER_ALPHA: u8 = 128;

/// Marker radius in screen pixels
pub fn marker_radius(site_count: usize) -> f32 {
    if site_count > 100 {
        4.0
    } else {
        5.0
    }
}

// ============================================
// Frame Pipeline
// ============================================

/// Bounded handoff between generation and presentation
pub const FRAME_CHANNEL_CAPACITY: usize = 2;

/// One extra buffer so the presenter can hold the frame on screen
pub const BUFFER_POOL_SIZE: usize = FRAME_CHANNEL_CAPACITY + 1;

/// Target frame interval (~60 FPS)
pub const TARGET_FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Poll interval of the generation loop while paused
pub const PAUSED_IDLE_TICK: Duration = Duration::from_millis(50);

/// Longest the presenter waits on an empty channel before yielding
pub const PRESENT_WAIT: Duration = Duration::from_millis(16);

// ============================================
// Host Integration
// ============================================

/// Aggregated metrics are logged this often
pub const METRICS_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Triple-tap toggles pause
pub const TAP_COUNT: usize = 3;
pub const TAP_WINDOW_MS: u64 = 800;

/// Engine configuration supplied by the host's preference store.
///
/// Values are never rejected; [`EngineConfig::normalized`] clamps them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub site_count: usize,
    pub draw_markers: bool,
    pub pixel_step: u32,
    pub use_spatial_grid: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            site_count: DEFAULT_SITE_COUNT,
            draw_markers: true,
            pixel_step: DEFAULT_PIXEL_STEP,
            use_spatial_grid: true,
        }
    }
}

impl EngineConfig {
    /// Clamp every field into its valid range
    pub fn normalized(self) -> Self {
        Self {
            site_count: self.site_count.clamp(MIN_SITE_COUNT, MAX_SITE_COUNT),
            pixel_step: self.pixel_step.clamp(MIN_PIXEL_STEP, MAX_PIXEL_STEP),
            ..self
        }
    }

    /// Whether nearest-site queries go through the spatial grid
    pub fn grid_enabled(&self) -> bool {
        self.use_spatial_grid && self.site_count >= GRID_ACTIVATION_THRESHOLD
    }

    /// Read overrides from `VORONOI_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            site_count: parse_or("VORONOI_SITES", &lookup, defaults.site_count),
            draw_markers: parse_or("VORONOI_MARKERS", &lookup, defaults.draw_markers),
            pixel_step: parse_or("VORONOI_PIXEL_STEP", &lookup, defaults.pixel_step),
            use_spatial_grid: parse_or("VORONOI_GRID", &lookup, defaults.use_spatial_grid),
        }
        .normalized()
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring unparsable {}={:?}", key, raw);
            default
        }),
        None => default,
    }
}
