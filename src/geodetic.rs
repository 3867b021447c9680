//! Geodetic conversions.
//!
//! This module converts WGS-84 geodetic coordinates to ECEF and to a local
//! North-East-Down tangent plane around a reference point.

use crate::types::GeodeticPosition;

/// WGS-84 semi-major axis (m).
const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
/// WGS-84 flattening.
const FLATTENING: f64 = 1.0 / 298.257_223_563;
/// WGS-84 first eccentricity squared.
const ECCENTRICITY_SQ: f64 = FLATTENING * (2.0 - FLATTENING);

/// Converts geodetic coordinates (radians, meters) to ECEF (meters).
pub fn geodetic_to_ecef(latitude: f64, longitude: f64, altitude: f64) -> [f64; 3] {
    let (sin_lat, cos_lat) = latitude.sin_cos();
    let (sin_lon, cos_lon) = longitude.sin_cos();
    let n = SEMI_MAJOR_AXIS / (1.0 - ECCENTRICITY_SQ * sin_lat * sin_lat).sqrt();
    [
        (n + altitude) * cos_lat * cos_lon,
        (n + altitude) * cos_lat * sin_lon,
        (n * (1.0 - ECCENTRICITY_SQ) + altitude) * sin_lat,
    ]
}

/// Straight-line distance between two geodetic positions (meters).
pub fn distance(a: &GeodeticPosition, b: &GeodeticPosition) -> f64 {
    let p0 = geodetic_to_ecef(a.latitude, a.longitude, a.altitude);
    let p1 = geodetic_to_ecef(b.latitude, b.longitude, b.altitude);
    let dx = p0[0] - p1[0];
    let dy = p0[1] - p1[1];
    let dz = p0[2] - p1[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// Geodetic to local tangent plane converter.
///
/// The converter holds a reference point. It is reused across calls and the
/// reference can be moved at any time with
/// [`initialize_reference`](GeodeticConverter::initialize_reference).
///
/// # Examples
///
/// ```
/// use pnt_integrity::GeodeticConverter;
///
/// let lat = 34.0_f64.to_radians();
/// let lon = (-86.0_f64).to_radians();
/// let mut conv = GeodeticConverter::new();
/// conv.initialize_reference(lat, lon, 200.0);
/// let (north, east, down) = conv.geodetic_to_ned(lat, lon, 190.0);
/// assert!(north.abs() < 1e-6);
/// assert!(east.abs() < 1e-6);
/// assert!((down - 10.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeodeticConverter {
    reference: Option<Reference>,
}

#[derive(Debug, Clone, PartialEq)]
struct Reference {
    ecef: [f64; 3],
    // rows are the north, east and down unit vectors in ECEF
    rotation: [[f64; 3]; 3],
}

impl GeodeticConverter {
    /// Creates a converter with no reference point.
    pub fn new() -> GeodeticConverter {
        GeodeticConverter::default()
    }

    /// Returns `true` once a reference has been set.
    pub fn is_initialized(&self) -> bool {
        self.reference.is_some()
    }

    /// Sets the origin of the local frame.
    pub fn initialize_reference(&mut self, latitude: f64, longitude: f64, altitude: f64) {
        let (sin_lat, cos_lat) = latitude.sin_cos();
        let (sin_lon, cos_lon) = longitude.sin_cos();
        self.reference = Some(Reference {
            ecef: geodetic_to_ecef(latitude, longitude, altitude),
            rotation: [
                [-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat],
                [-sin_lon, cos_lon, 0.0],
                [-cos_lat * cos_lon, -cos_lat * sin_lon, -sin_lat],
            ],
        });
    }

    /// Converts a geodetic position to `(north, east, down)` relative to the
    /// reference.
    ///
    /// Without a reference the origin is the center of the Earth and the
    /// frame is aligned with ECEF.
    pub fn geodetic_to_ned(&self, latitude: f64, longitude: f64, altitude: f64) -> (f64, f64, f64) {
        let ecef = geodetic_to_ecef(latitude, longitude, altitude);
        let Some(reference) = &self.reference else {
            return (ecef[0], ecef[1], ecef[2]);
        };
        let d = [
            ecef[0] - reference.ecef[0],
            ecef[1] - reference.ecef[1],
            ecef[2] - reference.ecef[2],
        ];
        let r = &reference.rotation;
        let project = |row: &[f64; 3]| row[0] * d[0] + row[1] * d[1] + row[2] * d[2];
        (project(&r[0]), project(&r[1]), project(&r[2]))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ecef_equator() {
        let p = geodetic_to_ecef(0.0, 0.0, 0.0);
        assert!((p[0] - SEMI_MAJOR_AXIS).abs() < 1e-6);
        assert!(p[1].abs() < 1e-6);
        assert!(p[2].abs() < 1e-6);
    }

    #[test]
    fn ecef_pole() {
        // WGS-84 semi-minor axis
        let p = geodetic_to_ecef(core::f64::consts::FRAC_PI_2, 0.0, 0.0);
        assert!((p[2] - 6_356_752.314_245).abs() < 1e-3);
    }

    #[test]
    fn ned_offsets() {
        let lat = 45.0_f64.to_radians();
        let lon = 10.0_f64.to_radians();
        let mut conv = GeodeticConverter::new();
        conv.initialize_reference(lat, lon, 0.0);
        // one arc-second of latitude is about 30.9 m at 45 deg
        let (n, e, _) = conv.geodetic_to_ned(lat + (1.0_f64 / 3600.0).to_radians(), lon, 0.0);
        assert!((n - 30.87).abs() < 0.1);
        assert!(e.abs() < 1e-3);
        // one arc-second of longitude is about 21.9 m at 45 deg
        let (n, e, _) = conv.geodetic_to_ned(lat, lon + (1.0_f64 / 3600.0).to_radians(), 0.0);
        assert!(n.abs() < 1e-3);
        assert!((e - 21.89).abs() < 0.1);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = GeodeticPosition::from_degrees(34.7, -86.6, 190.0);
        let b = GeodeticPosition::from_degrees(34.7, -86.6, 290.0);
        assert!((distance(&a, &b) - 100.0).abs() < 1e-6);
        assert!((distance(&a, &b) - distance(&b, &a)).abs() < 1e-9);
        assert_eq!(distance(&a, &a), 0.0);
    }
}
