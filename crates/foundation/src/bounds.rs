use std::cmp::Ordering;
use std::fmt;

/// A WGS84 position in degrees, longitude first (GeoJSON order).
#[derive(Copy, Clone, Debug)]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    pub fn new(lon: f64, lat: f64) -> Self {
        LonLat { lon, lat }
    }

    /// Checks the position is finite and inside the WGS84 domain.
    pub fn validate(&self) -> Result<(), ViewportError> {
        if !self.lon.is_finite() || !self.lat.is_finite() {
            return Err(ViewportError::NonFinite);
        }
        if !(-180.0..=180.0).contains(&self.lon) {
            return Err(ViewportError::LongitudeOutOfRange(self.lon));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(ViewportError::LatitudeOutOfRange(self.lat));
        }
        Ok(())
    }

    pub fn as_array(&self) -> [f64; 2] {
        [self.lon, self.lat]
    }
}

/// Bit-level comparison: `-0.0` and `0.0` are different positions.
impl PartialEq for LonLat {
    fn eq(&self, other: &Self) -> bool {
        self.lon.total_cmp(&other.lon) == Ordering::Equal
            && self.lat.total_cmp(&other.lat) == Ordering::Equal
    }
}

impl Eq for LonLat {}

impl fmt::Display for LonLat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.6}, {:.6}]", self.lon, self.lat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ViewportError {
    #[error("coordinate is not finite")]
    NonFinite,
    #[error("longitude {0} outside [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("latitude {0} outside [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("corners are inverted or cross the antimeridian (west {west} >= east {east})")]
    InvertedLongitude { west: f64, east: f64 },
    #[error("viewport has zero extent")]
    Degenerate,
}

/// The geographic rectangle currently visible on the map.
///
/// Corners are kept in the order the map reported them, because that order is
/// what goes out on the wire. The first corner must be strictly west of the
/// second; an inverted longitude pair is what an antimeridian-crossing region
/// looks like and is not supported. Latitudes may come in either order (map
/// SDKs commonly report a north-west/south-east pair) but must differ.
///
/// Equality is structural and tolerance-free. Coordinates are validated finite,
/// so the bit-level comparison is a total equivalence.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Viewport {
    corners: [LonLat; 2],
}

impl Viewport {
    pub fn from_corners(first: LonLat, second: LonLat) -> Result<Self, ViewportError> {
        first.validate()?;
        second.validate()?;
        if first.lon >= second.lon {
            return Err(ViewportError::InvertedLongitude {
                west: first.lon,
                east: second.lon,
            });
        }
        if first.lat.total_cmp(&second.lat) == Ordering::Equal {
            return Err(ViewportError::Degenerate);
        }
        Ok(Viewport {
            corners: [first, second],
        })
    }

    /// Builds a viewport from the nested `[[lon, lat], [lon, lat]]` form.
    pub fn from_array(raw: [[f64; 2]; 2]) -> Result<Self, ViewportError> {
        Self::from_corners(
            LonLat::new(raw[0][0], raw[0][1]),
            LonLat::new(raw[1][0], raw[1][1]),
        )
    }

    pub fn to_array(&self) -> [[f64; 2]; 2] {
        [self.corners[0].as_array(), self.corners[1].as_array()]
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.corners[0], self.corners[1])
    }
}
