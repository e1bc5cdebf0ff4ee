//! Comparable distances between a query pixel and a site.
//!
//! Every metric returns a monotonic surrogate used only for `<` comparisons:
//! no square roots and no normalization.

/// Inverse of a 2x2 covariance matrix, row-major
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct InverseCovariance(pub [[f32; 2]; 2]);

impl InverseCovariance {
    /// Invert the unbiased covariance of `points`.
    ///
    /// Returns `None` for fewer than two points or a singular covariance
    /// (e.g. all points collinear along an axis).
    pub fn from_points(points: &[[f32; 2]]) -> Option<Self> {
        let cov = covariance(points)?;
        invert_2x2(cov).map(Self)
    }
}

/// Unbiased (n - 1) covariance matrix of a 2D point set
pub fn covariance(points: &[[f32; 2]]) -> Option<[[f32; 2]; 2]> {
    let n = points.len();
    if n < 2 {
        return None;
    }

    let (sum_x, sum_y) = points
        .iter()
        .fold((0.0f32, 0.0f32), |(sx, sy), p| (sx + p[0], sy + p[1]));
    let mean_x = sum_x / n as f32;
    let mean_y = sum_y / n as f32;

    let mut var_x = 0.0;
    let mut var_y = 0.0;
    let mut cov_xy = 0.0;
    for p in points {
        let dx = p[0] - mean_x;
        let dy = p[1] - mean_y;
        var_x += dx * dx;
        var_y += dy * dy;
        cov_xy += dx * dy;
    }

    let denom = (n - 1) as f32;
    Some([
        [var_x / denom, cov_xy / denom],
        [cov_xy / denom, var_y / denom],
    ])
}

fn invert_2x2(m: [[f32; 2]; 2]) -> Option<[[f32; 2]; 2]> {
    let [[a, b], [c, d]] = m;
    let det = a * d - b * c;
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    Some([[d / det, -b / det], [-c / det, a / det]])
}

/// Squared Mahalanobis distance `[dx dy] * S^-1 * [dx dy]^T`
#[inline]
pub fn mahalanobis(p: [f32; 2], q: [f32; 2], inv: &InverseCovariance) -> f32 {
    let dx = p[0] - q[0];
    let dy = p[1] - q[1];
    let s = inv.0;
    dx * (s[0][0] * dx + s[0][1] * dy) + dy * (s[1][0] * dx + s[1][1] * dy)
}

/// Distance strategy used by nearest-site queries
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum DistanceMetric {
    /// dx^2 + dy^2
    #[default]
    SquaredEuclidean,
    /// |dx| + |dy|
    Manhattan,
    /// max(|dx|, |dy|)
    Chebyshev,
    /// min(|dx|, |dy|)
    Skyline,
    /// Covariance-weighted quadratic form
    Mahalanobis(InverseCovariance),
}

impl DistanceMetric {
    #[inline]
    pub fn distance(&self, px: f32, py: f32, site: [f32; 2]) -> f32 {
        let dx = px - site[0];
        let dy = py - site[1];
        match self {
            Self::SquaredEuclidean => dx * dx + dy * dy,
            Self::Manhattan => dx.abs() + dy.abs(),
            Self::Chebyshev => dx.abs().max(dy.abs()),
            Self::Skyline => dx.abs().min(dy.abs()),
            Self::Mahalanobis(inv) => mahalanobis([px, py], site, inv),
        }
    }

    /// Smallest comparable distance to any point at least `gap` away along
    /// one axis, or `None` if the metric admits no such bound.
    ///
    /// Used to decide when widening a grid search can stop.
    #[inline]
    pub fn axis_lower_bound(&self, gap: f32) -> Option<f32> {
        match self {
            Self::SquaredEuclidean => Some(gap * gap),
            Self::Manhattan | Self::Chebyshev => Some(gap),
            Self::Skyline | Self::Mahalanobis(_) => None,
        }
    }
}
