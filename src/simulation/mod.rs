pub mod color;
pub mod distance;
pub mod sites;
pub mod spatial;

pub use color::{Palette, Rgba};
pub use distance::{DistanceMetric, InverseCovariance};
pub use sites::SiteField;
pub use spatial::{nearest_brute_force, SpatialGrid};
