//! Uniform-grid index bounding nearest-site search to nearby cells.
//!
//! Uses a counting-sort layout (per-cell start offsets into one index array)
//! instead of a `Vec` per cell, so a rebuild never allocates once warm.

use crate::config::GRID_FACTOR;
use crate::simulation::distance::DistanceMetric;

pub struct SpatialGrid {
    cell_size: f32,
    grid_width: usize,
    grid_height: usize,
    /// Flat cell index of each site, parallel to the position array
    site_cells: Vec<u32>,
    /// `cell_starts[c]..cell_starts[c + 1]` spans cell `c` in `sorted_sites`
    cell_starts: Vec<u32>,
    /// Site indices grouped by cell
    sorted_sites: Vec<u32>,
    /// Scratch write heads for the scatter pass
    cell_heads: Vec<u32>,
}

impl SpatialGrid {
    /// Size cells so that on average one site lands in each
    pub fn for_viewport(width: u32, height: u32, site_count: usize) -> Self {
        let area = width.max(1) as f32 * height.max(1) as f32;
        let cell_size = ((area / site_count.max(1) as f32).sqrt() * GRID_FACTOR).floor();
        Self::with_cell_size(width, height, cell_size)
    }

    pub fn with_cell_size(width: u32, height: u32, cell_size: f32) -> Self {
        let cell_size = cell_size.max(1.0);
        let grid_width = ((width.max(1) as f32 / cell_size).ceil() as usize).max(1);
        let grid_height = ((height.max(1) as f32 / cell_size).ceil() as usize).max(1);
        Self {
            cell_size,
            grid_width,
            grid_height,
            site_cells: Vec::new(),
            cell_starts: vec![0; grid_width * grid_height + 1],
            sorted_sites: Vec::new(),
            cell_heads: Vec::new(),
        }
    }

    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.grid_width, self.grid_height)
    }

    /// Cell coordinates of a point, clamped into the grid
    #[inline]
    pub fn cell_coords(&self, x: f32, y: f32) -> (usize, usize) {
        let cx = (x / self.cell_size).floor().max(0.0) as usize;
        let cy = (y / self.cell_size).floor().max(0.0) as usize;
        (cx.min(self.grid_width - 1), cy.min(self.grid_height - 1))
    }

    /// Site indices currently bucketed in cell `(cx, cy)`
    pub fn cell(&self, cx: usize, cy: usize) -> &[u32] {
        let c = cy * self.grid_width + cx;
        let start = self.cell_starts[c] as usize;
        let end = self.cell_starts[c + 1] as usize;
        &self.sorted_sites[start..end]
    }

    /// Re-bucket every site from scratch
    pub fn rebuild(&mut self, positions: &[[f32; 2]]) {
        let total_cells = self.grid_width * self.grid_height;

        // 1. Cell of each site, counted into cell_starts[c + 1]
        self.site_cells.clear();
        self.cell_starts.clear();
        self.cell_starts.resize(total_cells + 1, 0);
        for p in positions {
            let (cx, cy) = self.cell_coords(p[0], p[1]);
            let c = cy * self.grid_width + cx;
            self.site_cells.push(c as u32);
            self.cell_starts[c + 1] += 1;
        }

        // 2. Prefix sum turns counts into start offsets
        for c in 0..total_cells {
            self.cell_starts[c + 1] += self.cell_starts[c];
        }

        // 3. Scatter indices; walking sites in order keeps each cell ascending
        self.sorted_sites.clear();
        self.sorted_sites.resize(positions.len(), 0);
        self.cell_heads.clear();
        self.cell_heads.extend_from_slice(&self.cell_starts[..total_cells]);
        for (site, &c) in self.site_cells.iter().enumerate() {
            let head = &mut self.cell_heads[c as usize];
            self.sorted_sites[*head as usize] = site as u32;
            *head += 1;
        }
    }

    /// True if the 3x3 block around the query's cell holds no sites
    #[cfg(test)]
    fn neighborhood_is_empty(&self, px: f32, py: f32) -> bool {
        let (cx, cy) = self.cell_coords(px, py);
        let mut empty = true;
        self.for_each_ring_cell(cx, cy, 0, |cell| empty &= cell.is_empty());
        self.for_each_ring_cell(cx, cy, 1, |cell| empty &= cell.is_empty());
        empty
    }

    /// Index of the site nearest to `(px, py)`.
    ///
    /// Scans the 3x3 neighborhood first, then widens ring by ring while a
    /// site outside the scanned block could still be closer. Ties resolve to
    /// the lowest index, matching [`nearest_brute_force`]. Returns `None`
    /// only when there are no sites at all.
    pub fn nearest(
        &self,
        px: f32,
        py: f32,
        positions: &[[f32; 2]],
        metric: &DistanceMetric,
    ) -> Option<usize> {
        let (cx, cy) = self.cell_coords(px, py);
        let mut best: Option<(f32, usize)> = None;

        for ring in 0..=1 {
            self.for_each_ring_cell(cx, cy, ring, |cell| {
                scan_cell(cell, px, py, positions, metric, &mut best)
            });
        }

        let max_ring = self.grid_width.max(self.grid_height);
        for ring in 2..=max_ring {
            let Some(gap) = self.unscanned_gap(px, py, cx, cy, ring) else {
                break;
            };
            if let (Some((best_d, _)), Some(bound)) = (best, metric.axis_lower_bound(gap)) {
                if bound > best_d {
                    break;
                }
            }
            self.for_each_ring_cell(cx, cy, ring, |cell| {
                scan_cell(cell, px, py, positions, metric, &mut best)
            });
        }

        best.map(|(_, i)| i)
    }

    /// Axis distance from the query to the nearest grid cell not yet scanned
    /// when rings `0..ring` are done, or `None` if nothing is left.
    fn unscanned_gap(&self, px: f32, py: f32, cx: usize, cy: usize, ring: usize) -> Option<f32> {
        let inner = ring - 1;
        let cs = self.cell_size;
        let mut gap: Option<f32> = None;
        let mut consider = |g: f32| gap = Some(gap.map_or(g, |cur: f32| cur.min(g)));

        if cx > inner {
            consider((px - (cx - inner) as f32 * cs).max(0.0));
        }
        if cx + inner + 1 < self.grid_width {
            consider(((cx + inner + 1) as f32 * cs - px).max(0.0));
        }
        if cy > inner {
            consider((py - (cy - inner) as f32 * cs).max(0.0));
        }
        if cy + inner + 1 < self.grid_height {
            consider(((cy + inner + 1) as f32 * cs - py).max(0.0));
        }
        gap
    }

    /// Visit every in-grid cell at Chebyshev cell distance exactly `ring`
    fn for_each_ring_cell(&self, cx: usize, cy: usize, ring: usize, mut f: impl FnMut(&[u32])) {
        let r = ring as isize;
        let (cx, cy) = (cx as isize, cy as isize);
        let (gw, gh) = (self.grid_width as isize, self.grid_height as isize);

        for y in (cy - r).max(0)..=(cy + r).min(gh - 1) {
            let on_edge_row = (y - cy).abs() == r;
            for x in (cx - r).max(0)..=(cx + r).min(gw - 1) {
                if on_edge_row || (x - cx).abs() == r {
                    f(self.cell(x as usize, y as usize));
                }
            }
        }
    }
}

#[inline]
fn scan_cell(
    cell: &[u32],
    px: f32,
    py: f32,
    positions: &[[f32; 2]],
    metric: &DistanceMetric,
    best: &mut Option<(f32, usize)>,
) {
    for &site in cell {
        let site = site as usize;
        let d = metric.distance(px, py, positions[site]);
        let better = match *best {
            Some((best_d, best_i)) => d < best_d || (d == best_d && site < best_i),
            None => true,
        };
        if better {
            *best = Some((d, site));
        }
    }
}

/// Nearest site by scanning every site; lowest index wins ties
pub fn nearest_brute_force(
    px: f32,
    py: f32,
    positions: &[[f32; 2]],
    metric: &DistanceMetric,
) -> Option<usize> {
    let mut best: Option<(f32, usize)> = None;
    for (i, &p) in positions.iter().enumerate() {
        let d = metric.distance(px, py, p);
        if best.map_or(true, |(best_d, _)| d < best_d) {
            best = Some((d, i));
        }
    }
    best.map(|(_, i)| i)
}
