//! Data records.
//!
//! This module contains the records that the checks consume. They are
//! produced by the receiver decoders and by the peer nodes, and are only read
//! by the checks.

use crate::level::AssuranceLevel;
use crate::time::Timestamp;
use std::collections::BTreeMap;

/// Satellite identifier (PRN).
pub type Prn = u16;

/// Node identifier.
///
/// Identifies the local receiver or a peer node contributing data.
pub type NodeId = String;

/// Record header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    /// Identifier of the node that produced the record.
    pub device_id: NodeId,
    /// Time at which the record is valid.
    pub timestamp_valid: Timestamp,
}

impl Header {
    /// Constructs a header for `device_id` valid at `timestamp_valid`.
    pub fn new(device_id: impl Into<NodeId>, timestamp_valid: Timestamp) -> Header {
        Header {
            device_id: device_id.into(),
            timestamp_valid,
        }
    }
}

/// Observables of a single satellite.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GnssObservable {
    /// Satellite identifier.
    pub prn: Prn,
    /// Pseudorange in meters.
    pub pseudorange: f64,
    /// Whether `pseudorange` holds a valid measurement.
    pub pseudorange_valid: bool,
    /// Carrier phase in cycles.
    pub carrier_phase: f64,
    /// Whether `carrier_phase` holds a valid measurement.
    pub carrier_phase_valid: bool,
    /// Assurance level assigned to this satellite upstream, if any.
    pub assurance: AssuranceLevel,
}

impl GnssObservable {
    /// Constructs an observable holding only a pseudorange.
    pub fn from_pseudorange(prn: Prn, pseudorange: f64, pseudorange_valid: bool) -> Self {
        GnssObservable {
            prn,
            pseudorange,
            pseudorange_valid,
            ..Default::default()
        }
    }
}

/// Batch of observables from one node at one epoch.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GnssObservables {
    /// Record header.
    pub header: Header,
    /// GNSS time of week of the epoch, in seconds.
    pub seconds_of_week: f64,
    /// Observables keyed by satellite.
    pub observables: BTreeMap<Prn, GnssObservable>,
}

impl GnssObservables {
    /// Constructs a batch from an iterator of observables.
    pub fn new(header: Header, observables: impl IntoIterator<Item = GnssObservable>) -> Self {
        let seconds_of_week = header.timestamp_valid.as_seconds();
        GnssObservables {
            header,
            seconds_of_week,
            observables: observables.into_iter().map(|o| (o.prn, o)).collect(),
        }
    }
}

/// Range measured between the local node and a peer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeasuredRange {
    /// Record header.
    pub header: Header,
    /// Range in meters.
    pub range: f64,
    /// Whether `range` holds a valid measurement.
    pub range_valid: bool,
}

/// Geodetic position.
///
/// Latitude and longitude are given in radians, and the altitude in meters
/// above the WGS-84 ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeodeticPosition {
    /// Latitude (rad).
    pub latitude: f64,
    /// Longitude (rad).
    pub longitude: f64,
    /// Altitude (m).
    pub altitude: f64,
}

impl GeodeticPosition {
    /// Constructs a position from latitude and longitude in radians.
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        GeodeticPosition {
            latitude,
            longitude,
            altitude,
        }
    }

    /// Constructs a position from latitude and longitude in degrees.
    pub fn from_degrees(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self::new(latitude.to_radians(), longitude.to_radians(), altitude)
    }
}

/// Position and velocity solution with its covariance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PositionVelocity {
    /// Record header.
    pub header: Header,
    /// Position.
    pub position: GeodeticPosition,
    /// Velocity in the local NED frame (m/s).
    pub velocity: [f64; 3],
    /// Position covariance in the local NED frame (m²).
    pub covariance: [[f64; 3]; 3],
}

impl PositionVelocity {
    /// Constructs a solution with a diagonal NED covariance.
    pub fn new(header: Header, position: GeodeticPosition, variances: [f64; 3]) -> Self {
        let mut covariance = [[0.0; 3]; 3];
        for (j, v) in variances.iter().enumerate() {
            covariance[j][j] = *v;
        }
        PositionVelocity {
            header,
            position,
            velocity: [0.0; 3],
            covariance,
        }
    }

    /// Horizontal standard deviation, `sqrt(var_north + var_east)`.
    pub fn horizontal_std_dev(&self) -> f64 {
        (self.covariance[0][0] + self.covariance[1][1]).sqrt()
    }
}

/// Distance traveled by the platform since the previous report.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DistanceTraveled {
    /// Record header.
    pub header: Header,
    /// Distance in meters.
    pub distance: f64,
}
