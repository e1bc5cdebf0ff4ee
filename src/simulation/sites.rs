use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{BOUNCE_DAMPING_MAX, BOUNCE_DAMPING_MIN, INITIAL_SPEED};
use crate::simulation::color::{Palette, Rgba};

/// Moving Voronoi sites with reflective, slightly randomized wall bounces.
///
/// Site identity is the index into the parallel arrays; the count is fixed
/// for the lifetime of the field.
pub struct SiteField {
    positions: Vec<[f32; 2]>,
    velocities: Vec<[f32; 2]>,
    palette: Palette,
    width: f32,
    height: f32,
    rng: StdRng,
}

impl SiteField {
    /// Create `count` sites scattered over a `width` x `height` viewport.
    ///
    /// With `seed` the placement, velocities, palette and bounces are
    /// reproducible; without it the field draws from OS entropy.
    pub fn new(count: usize, width: u32, height: u32, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut field = Self {
            positions: vec![[0.0; 2]; count],
            velocities: vec![[0.0; 2]; count],
            palette: Palette { fill: Vec::new(), marker: Vec::new() },
            width: 0.0,
            height: 0.0,
            rng,
        };
        field.initialize(width, height);
        field
    }

    /// Re-scatter every site over a new viewport and regenerate colors
    pub fn initialize(&mut self, width: u32, height: u32) {
        debug_assert!(width > 0 && height > 0, "viewport must be non-empty");
        self.width = width.max(1) as f32;
        self.height = height.max(1) as f32;

        for (pos, vel) in self.positions.iter_mut().zip(self.velocities.iter_mut()) {
            *pos = [
                self.rng.gen::<f32>() * self.width,
                self.rng.gen::<f32>() * self.height,
            ];
            *vel = [
                self.rng.gen_range(-INITIAL_SPEED..=INITIAL_SPEED),
                self.rng.gen_range(-INITIAL_SPEED..=INITIAL_SPEED),
            ];
        }

        self.palette = Palette::generate(self.positions.len(), &mut self.rng);
    }

    /// Move every site one tick, bouncing off the viewport edges
    pub fn advance(&mut self) {
        let extents = [self.width, self.height];
        for (pos, vel) in self.positions.iter_mut().zip(self.velocities.iter_mut()) {
            for axis in 0..2 {
                pos[axis] += vel[axis];
                let extent = extents[axis];
                if pos[axis] < 0.0 || pos[axis] > extent {
                    let damping = self.rng.gen_range(BOUNCE_DAMPING_MIN..BOUNCE_DAMPING_MAX);
                    vel[axis] = -vel[axis] * damping;
                    pos[axis] = pos[axis].clamp(0.0, extent);
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[[f32; 2]] {
        &self.positions
    }

    pub fn velocities(&self) -> &[[f32; 2]] {
        &self.velocities
    }

    pub fn fill_colors(&self) -> &[Rgba] {
        &self.palette.fill
    }

    pub fn marker_colors(&self) -> &[Rgba] {
        &self.palette.marker
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    #[cfg(test)]
    pub(crate) fn set_site(&mut self, index: usize, position: [f32; 2], velocity: [f32; 2]) {
        self.positions[index] = position;
        self.velocities[index] = velocity;
    }
}
