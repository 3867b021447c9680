//! Assurance check contract.
//!
//! This module contains the [`AssuranceCheck`] trait implemented by every
//! check, the [`AssuranceState`] level state machine that each check embeds in
//! its locked state, the [`DiagnosticsSink`] used to publish per-round
//! diagnostics, and the [`CheckError`] returned when a round cannot be
//! evaluated.

use crate::level::AssuranceLevel;
use crate::types::{
    DistanceTraveled, GeodeticPosition, GnssObservables, MeasuredRange, PositionVelocity,
};
use core::fmt;
use std::collections::VecDeque;
use std::sync::mpsc::Sender;

/// Default number of level changes kept in the history.
pub const DEFAULT_HISTORY_DEPTH: usize = 100;

/// A level change, as recorded in the history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelChange {
    /// Time of the change (seconds).
    pub time: f64,
    /// New level.
    pub level: AssuranceLevel,
}

/// Assurance level state machine.
///
/// Holds the current level of a check and the bookkeeping around it. Any
/// level may follow any other; the check using this state decides which
/// transitions happen. The level is only modified through
/// [`change_level`](AssuranceState::change_level), so that every transition is
/// timestamped and recorded in the history.
#[derive(Debug, Clone, PartialEq)]
pub struct AssuranceState {
    level: AssuranceLevel,
    last_update: f64,
    history: VecDeque<LevelChange>,
    history_depth: usize,
    last_good_position: Option<GeodeticPosition>,
    last_good_time: f64,
}

impl Default for AssuranceState {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_DEPTH)
    }
}

impl AssuranceState {
    /// Creates a state at `Unavailable` that keeps at most `history_depth`
    /// level changes.
    pub fn new(history_depth: usize) -> AssuranceState {
        AssuranceState {
            level: AssuranceLevel::Unavailable,
            last_update: 0.0,
            history: VecDeque::with_capacity(history_depth),
            history_depth,
            last_good_position: None,
            last_good_time: 0.0,
        }
    }

    /// Records `level` as the current level at `time`.
    pub fn change_level(&mut self, time: f64, level: AssuranceLevel) {
        if level != self.level {
            log::info!("assurance level {} -> {} at {}", self.level, level, time);
        }
        self.level = level;
        self.last_update = time;
        if self.history_depth == 0 {
            return;
        }
        if self.history.len() == self.history_depth {
            self.history.pop_front();
        }
        self.history.push_back(LevelChange { time, level });
    }

    /// Current level.
    pub fn level(&self) -> AssuranceLevel {
        self.level
    }

    /// Time of the last call to [`change_level`](AssuranceState::change_level).
    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    /// Level changes, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &LevelChange> {
        self.history.iter()
    }

    /// Records the last position associated with an `Assured` classification.
    pub fn set_last_good_position(&mut self, time: f64, position: GeodeticPosition) {
        self.last_good_position = Some(position);
        self.last_good_time = time;
    }

    /// Last known-good position, if one has been set.
    pub fn last_good_position(&self) -> Option<&GeodeticPosition> {
        self.last_good_position.as_ref()
    }

    /// Time of the last known-good position.
    pub fn last_good_time(&self) -> f64 {
        self.last_good_time
    }
}

/// Diagnostics publisher.
///
/// A sink is called synchronously while the check holds its lock, so a slow
/// sink stalls the check. [`Sender`] implements this trait and can be used to
/// hand the records to another thread instead.
pub trait DiagnosticsSink<D>: Send + Sync {
    /// Publishes `diagnostics` computed at `time`.
    fn publish(&self, time: f64, diagnostics: &D);
}

impl<D, F> DiagnosticsSink<D> for F
where
    F: Fn(f64, &D) + Send + Sync,
{
    fn publish(&self, time: f64, diagnostics: &D) {
        self(time, diagnostics)
    }
}

impl<D: Clone + Send> DiagnosticsSink<D> for Sender<(f64, D)>
where
    Sender<(f64, D)>: Sync,
{
    fn publish(&self, time: f64, diagnostics: &D) {
        if self.send((time, diagnostics.clone())).is_err() {
            log::debug!("diagnostics receiver disconnected");
        }
    }
}

/// Reasons why a round could not be evaluated.
///
/// Apart from [`NoReference`](CheckError::NoReference), which is reported
/// after the check has moved to `Unavailable`, these leave the level of the
/// check untouched.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CheckError {
    /// The repository has no entry for the requested time.
    NoRepositoryEntry(i64),
    /// The repository entry holds no local observables.
    NoLocalObservables,
    /// Fewer local satellites than the minimum required.
    InsufficientSatellites {
        /// Satellites available.
        found: usize,
        /// Minimum satellites required.
        required: usize,
    },
    /// The repository entry holds no peer data.
    NoPeers,
    /// The last peer in the entry had no observables or was the local node
    /// itself, which aborts the round.
    UnusableLastPeer,
    /// No receiver position has been received yet.
    NoReceiverPosition,
    /// The active bound mode has no reference to compare against.
    NoReference,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::NoRepositoryEntry(key) => write!(f, "no repository entry for time {key}"),
            CheckError::NoLocalObservables => "no local observables".fmt(f),
            CheckError::InsufficientSatellites { found, required } => {
                write!(f, "{found} satellites available, {required} required")
            }
            CheckError::NoPeers => "no peer data".fmt(f),
            CheckError::UnusableLastPeer => "last peer has no usable data".fmt(f),
            CheckError::NoReceiverPosition => "no receiver position received".fmt(f),
            CheckError::NoReference => "no reference available for the bound mode".fmt(f),
        }
    }
}

impl std::error::Error for CheckError {}

/// Errors produced when parsing configuration values from their names.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ParseConfigError {
    /// The name is not one of `pseudorange`, `carrier-phase` or `both`.
    UnknownDifferenceSource,
    /// The name is not one of `platform`, `distance-traveled` or `estimator`.
    UnknownBoundMode,
}

impl fmt::Display for ParseConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseConfigError::UnknownDifferenceSource => "unknown difference source".fmt(f),
            ParseConfigError::UnknownBoundMode => "unknown bound mode".fmt(f),
        }
    }
}

impl std::error::Error for ParseConfigError {}

/// Assurance check.
///
/// A check ingests data through the `handle_*` methods, evaluates it in
/// [`run_check`](AssuranceCheck::run_check), and holds the resulting
/// [`AssuranceLevel`]. Implementations guard their state with a single lock
/// taken by each of these methods, so that a check can be shared between the
/// threads producing its input data.
///
/// The `handle_*` methods return `Ok(())` when the data was accepted for
/// processing, not when the check passed. The default implementations accept
/// data the check does not use and ignore it.
pub trait AssuranceCheck: Send + Sync {
    /// Name of the check, used in logs.
    fn name(&self) -> &str;

    /// Current assurance level.
    fn assurance_level(&self) -> AssuranceLevel;

    /// Level changes, oldest first.
    fn level_history(&self) -> Vec<LevelChange>;

    /// Evaluates the check with the data received so far.
    fn run_check(&self) -> Result<(), CheckError>;

    /// Records the last position associated with an `Assured` classification.
    fn set_last_good_position(&self, time: f64, position: GeodeticPosition);

    /// Handles a batch of observables.
    ///
    /// `time` is the time of week of the batch in seconds. If it is zero, the
    /// time is taken from the header of the batch.
    fn handle_gnss_observables(
        &self,
        _observables: &GnssObservables,
        _time: f64,
    ) -> Result<(), CheckError> {
        Ok(())
    }

    /// Handles a position solution, either from the local receiver
    /// (`is_local`) or from a peer.
    fn handle_position_velocity(
        &self,
        _position_velocity: &PositionVelocity,
        _is_local: bool,
    ) -> Result<(), CheckError> {
        Ok(())
    }

    /// Handles a position estimate from an independent estimator.
    fn handle_estimated_position_velocity(
        &self,
        _position_velocity: &PositionVelocity,
    ) -> Result<(), CheckError> {
        Ok(())
    }

    /// Handles a distance traveled report.
    fn handle_distance_traveled(&self, _distance: &DistanceTraveled) -> Result<(), CheckError> {
        Ok(())
    }

    /// Handles a range measured to a peer.
    fn handle_measured_range(&self, _range: &MeasuredRange) -> Result<(), CheckError> {
        Ok(())
    }
}
