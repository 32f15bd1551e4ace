//! Region coordinates identifying chunks

use serde::{Deserialize, Serialize};

/// Chunk coordinate in region space (one unit per chunk)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Squared Euclidean distance to another key, in region units.
    ///
    /// Saturates at `i64::MAX` for keys at opposite ends of the coordinate range.
    pub fn distance_squared(&self, other: ChunkKey) -> i64 {
        let dx = self.x as i64 - other.x as i64;
        let dz = self.z as i64 - other.z as i64;
        dx.saturating_mul(dx).saturating_add(dz.saturating_mul(dz))
    }

    /// Euclidean distance to another key, in region units.
    pub fn distance(&self, other: ChunkKey) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dz = self.z as f64 - other.z as f64;
        (dx * dx + dz * dz).sqrt()
    }

    /// All keys within `radius` (Euclidean, inclusive) of this key.
    ///
    /// Keys past the edge of the `i32` coordinate range are skipped.
    pub fn within_radius(self, radius: u32) -> impl Iterator<Item = ChunkKey> {
        let r = i64::from(radius);
        let r2 = i128::from(r) * i128::from(r);
        let (cx, cz) = (i64::from(self.x), i64::from(self.z));

        let x_lo = (cx - r).max(i64::from(i32::MIN));
        let x_hi = (cx + r).min(i64::from(i32::MAX));
        (x_lo..=x_hi).flat_map(move |x| {
            let dx = i128::from(x - cx);
            // Half-width of the disc on this column
            let reach = (r2 - dx * dx).isqrt() as i64;
            let z_lo = (cz - reach).max(i64::from(i32::MIN));
            let z_hi = (cz + reach).min(i64::from(i32::MAX));
            (z_lo..=z_hi).map(move |z| ChunkKey::new(x as i32, z as i32))
        })
    }
}

impl std::fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}, {}>", self.x, self.z)
    }
}

impl From<(i32, i32)> for ChunkKey {
    fn from((x, z): (i32, i32)) -> Self {
        Self::new(x, z)
    }
}
