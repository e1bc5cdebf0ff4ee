use rand::seq::SliceRandom;
use rand::Rng;

use crate::config::{
    DARKEN_FACTOR, DARK_THRESHOLD, GOLDEN_ANGLE, LIGHTEN_FACTOR, LIGHTEN_SATURATION,
    MARKER_ALPHA, SATURATION_MAX, SATURATION_MIN, VALUE_MAX, VALUE_MIN,
};

/// 8-bit RGBA color, laid out to upload straight into an `Rgba8Unorm` texture
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba::opaque(0, 0, 0);

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    /// Relative luminance with channels normalized to [0, 1]
    pub fn luminance(&self) -> f32 {
        0.2126 * self.r as f32 / 255.0
            + 0.7152 * self.g as f32 / 255.0
            + 0.0722 * self.b as f32 / 255.0
    }

    /// Channels as normalized floats, for GPU instance data
    pub fn to_f32(self) -> [f32; 4] {
        [
            self.r as f32 / 255.0,
            self.g as f32 / 255.0,
            self.b as f32 / 255.0,
            self.a as f32 / 255.0,
        ]
    }
}

/// Hue in degrees [0, 360), saturation and value in [0, 1]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Hsv {
    pub h: f32,
    pub s: f32,
    pub v: f32,
}

impl Hsv {
    pub fn to_rgb(self) -> Rgba {
        let h = self.h.rem_euclid(360.0);
        let s = self.s.clamp(0.0, 1.0);
        let v = self.v.clamp(0.0, 1.0);

        let c = v * s;
        let hp = h / 60.0;
        let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
        let (r1, g1, b1) = match hp as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let m = v - c;
        let to_u8 = |f: f32| ((f + m) * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgba::opaque(to_u8(r1), to_u8(g1), to_u8(b1))
    }

    pub fn from_rgb(color: Rgba) -> Self {
        let r = color.r as f32 / 255.0;
        let g = color.g as f32 / 255.0;
        let b = color.b as f32 / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let delta = max - min;

        let h = if delta == 0.0 {
            0.0
        } else if max == r {
            60.0 * ((g - b) / delta).rem_euclid(6.0)
        } else if max == g {
            60.0 * ((b - r) / delta + 2.0)
        } else {
            60.0 * ((r - g) / delta + 4.0)
        };
        let s = if max == 0.0 { 0.0 } else { delta / max };

        Self { h, s, v: max }
    }
}

/// Fill and marker colors for every site, index-aligned
#[derive(Clone, Debug)]
pub struct Palette {
    pub fill: Vec<Rgba>,
    pub marker: Vec<Rgba>,
}

impl Palette {
    /// Generate `n` perceptually spread fill colors and their contrast markers
    pub fn generate<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Self {
        let start_hue = rng.gen_range(0.0..360.0);
        let mut fill = band_colors(start_hue, n);

        // Decouple hue progression from site index
        fill.shuffle(rng);

        let marker = fill.iter().map(|&c| marker_color(c)).collect();
        Self { fill, marker }
    }
}

/// Hues advanced by the golden angle from `start`, one per site
pub fn golden_hues(start: f32, n: usize) -> impl Iterator<Item = f32> {
    (1..=n).map(move |i| (start + GOLDEN_ANGLE * i as f32).rem_euclid(360.0))
}

/// Pre-shuffle fill colors: golden-angle hues with banded saturation/value
fn band_colors(start_hue: f32, n: usize) -> Vec<Rgba> {
    let bands = ((n as f32).sqrt() as usize).max(2);
    let span = (bands - 1) as f32;

    golden_hues(start_hue, n)
        .enumerate()
        .map(|(i, hue)| {
            let saturation = SATURATION_MIN + (SATURATION_MAX - SATURATION_MIN) * (i % bands) as f32 / span;
            let value = VALUE_MIN + (VALUE_MAX - VALUE_MIN) * ((i / bands) % bands) as f32 / span;
            Hsv {
                h: hue,
                s: saturation.clamp(SATURATION_MIN, SATURATION_MAX),
                v: value.clamp(VALUE_MIN, VALUE_MAX),
            }
            .to_rgb()
        })
        .collect()
}

/// Contrast-adjusted, semi-transparent marker for a fill color
pub fn marker_color(fill: Rgba) -> Rgba {
    let mut hsv = Hsv::from_rgb(fill);
    if fill.luminance() < DARK_THRESHOLD {
        hsv.s *= LIGHTEN_SATURATION;
        hsv.v = 1.0 - (1.0 - hsv.v) * (1.0 - LIGHTEN_FACTOR);
    } else {
        hsv.v *= 1.0 - DARKEN_FACTOR;
    }
    hsv.to_rgb().with_alpha(MARKER_ALPHA)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn hue_gap(a: f32, b: f32) -> f32 {
        let d = (a - b).rem_euclid(360.0);
        d.min(360.0 - d)
    }

    #[test]
    fn test_hsv_primaries() {
        assert_eq!(Hsv { h: 0.0, s: 1.0, v: 1.0 }.to_rgb(), Rgba::opaque(255, 0, 0));
        assert_eq!(Hsv { h: 120.0, s: 1.0, v: 1.0 }.to_rgb(), Rgba::opaque(0, 255, 0));
        assert_eq!(Hsv { h: 240.0, s: 1.0, v: 1.0 }.to_rgb(), Rgba::opaque(0, 0, 255));
        assert_eq!(Hsv { h: 42.0, s: 0.0, v: 0.0 }.to_rgb(), Rgba::BLACK);
    }

    #[test]
    fn test_hsv_recovers_from_rgb() {
        let original = Hsv { h: 200.0, s: 0.8, v: 0.9 };
        let back = Hsv::from_rgb(original.to_rgb());
        assert!(hue_gap(back.h, original.h) < 1.0, "hue drifted: {}", back.h);
        assert!((back.s - original.s).abs() < 0.01);
        assert!((back.v - original.v).abs() < 0.01);
    }

    #[test]
    fn test_golden_hues_are_spread() {
        let hues: Vec<f32> = golden_hues(10.0, 553).collect();
        for pair in hues.windows(2) {
            let gap = hue_gap(pair[0], pair[1]);
            assert!(gap > 137.0, "consecutive hues too close: {}", gap);
        }
    }

    #[test]
    fn test_shuffled_neighbors_are_not_near_hues() {
        // Index-adjacent fills should look like random hue pairs (mean gap
        // around 90 degrees), not a sorted run of near-identical hues
        for seed in [1, 2, 3] {
            let mut rng = StdRng::seed_from_u64(seed);
            let palette = Palette::generate(553, &mut rng);
            let gaps: Vec<f32> = palette
                .fill
                .windows(2)
                .map(|pair| hue_gap(Hsv::from_rgb(pair[0]).h, Hsv::from_rgb(pair[1]).h))
                .collect();

            let mean = gaps.iter().sum::<f32>() / gaps.len() as f32;
            let close = gaps.iter().filter(|&&g| g < 5.0).count();
            assert!(mean > 70.0, "seed {}: mean gap {}", seed, mean);
            assert!(close * 10 < gaps.len(), "seed {}: {} near-identical neighbors", seed, close);
        }
    }

    #[test]
    fn test_generate_counts_and_alpha() {
        let mut rng = StdRng::seed_from_u64(7);
        let palette = Palette::generate(553, &mut rng);
        assert_eq!(palette.fill.len(), 553);
        assert_eq!(palette.marker.len(), 553);
        assert!(palette.fill.iter().all(|c| c.a == 255));
        assert!(palette.marker.iter().all(|c| c.a == MARKER_ALPHA));
    }

    #[test]
    fn test_generate_is_permutation_of_band_colors() {
        let mut rng = StdRng::seed_from_u64(99);
        let palette = Palette::generate(200, &mut rng);

        // Replay the hue draw with the same seed to rebuild the unshuffled set
        let mut replay = StdRng::seed_from_u64(99);
        let start: f32 = replay.gen_range(0.0..360.0);
        let unshuffled = band_colors(start, 200);

        let mut counts: HashMap<Rgba, i32> = HashMap::new();
        for c in &unshuffled {
            *counts.entry(*c).or_default() += 1;
        }
        for c in &palette.fill {
            *counts.entry(*c).or_default() -= 1;
        }
        assert!(counts.values().all(|&v| v == 0), "shuffle must only reorder");
    }

    #[test]
    fn test_band_colors_stay_in_band() {
        for color in band_colors(0.0, 300) {
            let hsv = Hsv::from_rgb(color);
            assert!(hsv.s >= SATURATION_MIN - 0.01 && hsv.s <= SATURATION_MAX + 0.01);
            assert!(hsv.v >= VALUE_MIN - 0.01 && hsv.v <= VALUE_MAX + 0.01);
        }
    }

    #[test]
    fn test_marker_contrast_direction() {
        let dark = Rgba::opaque(30, 20, 120);
        assert!(dark.luminance() < DARK_THRESHOLD);
        let marker = marker_color(dark);
        assert!(marker.luminance() > dark.luminance(), "dark fills get lighter markers");

        let light = Rgba::opaque(240, 230, 120);
        assert!(light.luminance() >= DARK_THRESHOLD);
        let marker = marker_color(light);
        assert!(marker.luminance() < light.luminance(), "light fills get darker markers");
        assert_eq!(marker.a, MARKER_ALPHA);
    }
}
