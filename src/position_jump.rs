//! Position jump check.
//!
//! This module contains [`PositionJumpCheck`], which flags receiver positions
//! that moved further than plausible since the last trusted fix. The largest
//! plausible displacement (the bound) is maintained in one of three modes,
//! selected by [`BoundMode`].

use crate::check::{
    AssuranceCheck, AssuranceState, CheckError, DiagnosticsSink, LevelChange, ParseConfigError,
};
use crate::geodetic::{self, GeodeticConverter};
use crate::level::AssuranceLevel;
use crate::types::{DistanceTraveled, GeodeticPosition, PositionVelocity};
use core::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// How the position jump bound is propagated.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum BoundMode {
    /// The bound grows with the time elapsed since the last good position at
    /// the maximum platform velocity.
    #[default]
    Platform,
    /// The bound is the distance traveled since the last good position, as
    /// reported by an external source.
    DistanceTraveled,
    /// The bound is derived from the covariance of an independent position
    /// estimate, which is also the reference the position is compared to.
    Estimator,
}

impl FromStr for BoundMode {
    type Err = ParseConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform" => Ok(BoundMode::Platform),
            "distance-traveled" => Ok(BoundMode::DistanceTraveled),
            "estimator" => Ok(BoundMode::Estimator),
            _ => Err(ParseConfigError::UnknownBoundMode),
        }
    }
}

/// Configuration of the position jump check.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionJumpConfig {
    /// Bound propagation mode.
    pub mode: BoundMode,
    /// The bound never goes below this value (m).
    pub minimum_bound: f64,
    /// Maximum platform velocity (m/s), used in platform mode.
    pub maximum_velocity: f64,
    /// Number of standard deviations of the estimate used as bound in
    /// estimator mode.
    pub std_dev_multiplier: f64,
    /// Horizontal standard deviation of the receiver (m) above which a jump
    /// in estimator mode is `Inconsistent` rather than `Unassured`.
    pub receiver_std_dev_cutoff: f64,
    /// Number of level changes kept in the history.
    pub history_depth: usize,
}

impl Default for PositionJumpConfig {
    fn default() -> Self {
        PositionJumpConfig {
            mode: BoundMode::Platform,
            minimum_bound: 10.0,
            maximum_velocity: 50.0,
            std_dev_multiplier: 3.0,
            receiver_std_dev_cutoff: 30.0,
            history_depth: crate::check::DEFAULT_HISTORY_DEPTH,
        }
    }
}

/// Diagnostics published on every run of the check.
///
/// Both fields are NaN when the check could not compute them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PosJumpCheckDiagnostics {
    /// Bound used in this run (m).
    pub bound: f64,
    /// Distance compared against the bound (m).
    pub distance: f64,
}

impl Default for PosJumpCheckDiagnostics {
    fn default() -> Self {
        PosJumpCheckDiagnostics {
            bound: f64::NAN,
            distance: f64::NAN,
        }
    }
}

#[derive(Debug)]
struct JumpState {
    assurance: AssuranceState,
    last_receiver_pv: Option<PositionVelocity>,
    estimated_position: Option<GeodeticPosition>,
    estimated_covariance: [[f64; 3]; 3],
    converter: GeodeticConverter,
    bound: f64,
    distance_traveled: f64,
    bound_propagated: bool,
    distance_to_last_good: f64,
}

/// Position jump check.
///
/// The check runs on every local position received through
/// [`handle_position_velocity`](AssuranceCheck::handle_position_velocity).
pub struct PositionJumpCheck {
    name: String,
    config: PositionJumpConfig,
    diagnostics: Option<Box<dyn DiagnosticsSink<PosJumpCheckDiagnostics>>>,
    state: Mutex<JumpState>,
}

impl PositionJumpCheck {
    /// Creates a new check.
    pub fn new(name: impl Into<String>, config: PositionJumpConfig) -> PositionJumpCheck {
        let state = JumpState {
            assurance: AssuranceState::new(config.history_depth),
            last_receiver_pv: None,
            estimated_position: None,
            estimated_covariance: [[0.0; 3]; 3],
            converter: GeodeticConverter::new(),
            bound: config.minimum_bound,
            distance_traveled: 0.0,
            bound_propagated: false,
            distance_to_last_good: 0.0,
        };
        PositionJumpCheck {
            name: name.into(),
            config,
            diagnostics: None,
            state: Mutex::new(state),
        }
    }

    /// Publishes diagnostics to `sink` on every run.
    pub fn with_diagnostics(
        mut self,
        sink: impl DiagnosticsSink<PosJumpCheckDiagnostics> + 'static,
    ) -> Self {
        self.diagnostics = Some(Box::new(sink));
        self
    }

    /// Configuration of the check.
    pub fn config(&self) -> &PositionJumpConfig {
        &self.config
    }

    /// Current bound (m).
    pub fn bound(&self) -> f64 {
        self.lock().bound
    }

    /// Distance traveled since the last good position (m).
    pub fn distance_traveled(&self) -> f64 {
        self.lock().distance_traveled
    }

    /// Distance to the last good position computed in the last run (m).
    pub fn distance_to_last_good(&self) -> f64 {
        self.lock().distance_to_last_good
    }

    /// Updates the bound from the distance traveled.
    ///
    /// Only valid in [`BoundMode::DistanceTraveled`]. In other modes this logs
    /// an error and does nothing.
    pub fn update_bound(&self) {
        let mut state = self.lock();
        self.update_bound_from_distance(&mut state);
    }

    /// Propagates the bound to `update_time` at the maximum velocity.
    ///
    /// Not valid in [`BoundMode::DistanceTraveled`], where this logs an error
    /// and does nothing.
    pub fn update_bound_at(&self, update_time: f64) {
        let mut state = self.lock();
        self.propagate_bound(&mut state, update_time);
    }

    fn lock(&self) -> MutexGuard<'_, JumpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update_bound_from_distance(&self, state: &mut JumpState) {
        if self.config.mode == BoundMode::DistanceTraveled {
            state.bound = self.config.minimum_bound.max(state.distance_traveled);
        } else {
            log::error!(
                "{}: the bound can only be updated from the distance traveled \
                 in distance traveled mode",
                self.name
            );
        }
    }

    fn propagate_bound(&self, state: &mut JumpState, update_time: f64) {
        if self.config.mode != BoundMode::DistanceTraveled {
            let dt = update_time - state.assurance.last_good_time();
            state.bound = self
                .config
                .minimum_bound
                .max(self.config.maximum_velocity * dt);
        } else {
            log::error!(
                "{}: the bound cannot be propagated with time in distance traveled mode",
                self.name
            );
        }
    }

    fn run(&self, state: &mut JumpState) -> Result<(), CheckError> {
        let Some(pv) = state.last_receiver_pv.clone() else {
            log::debug!("{}: no receiver position yet", self.name);
            return Err(CheckError::NoReceiverPosition);
        };
        let update_time = pv.header.timestamp_valid.as_seconds();
        let level_time = pv.header.timestamp_valid.sec as f64;

        if self.config.mode == BoundMode::Platform {
            state.bound_propagated = true;
            self.propagate_bound(state, update_time);
        }

        let last_good = state.assurance.last_good_position().copied();
        let (result, diagnostics) = match (self.config.mode, last_good, state.estimated_position)
        {
            (BoundMode::Platform | BoundMode::DistanceTraveled, Some(last_good), _)
                if state.bound_propagated =>
            {
                let distance = geodetic::distance(&pv.position, &last_good);
                state.distance_to_last_good = distance;
                if distance > state.bound {
                    log::debug!(
                        "{}: distance to last good position {} m exceeds bound {} m",
                        self.name,
                        distance,
                        state.bound
                    );
                    state
                        .assurance
                        .change_level(level_time, AssuranceLevel::Unassured);
                } else {
                    state
                        .assurance
                        .change_level(level_time, AssuranceLevel::Assured);
                }
                let diagnostics = PosJumpCheckDiagnostics {
                    bound: state.bound,
                    distance,
                };
                (Ok(()), diagnostics)
            }
            (BoundMode::Estimator, _, Some(_)) => {
                // the converter reference is the estimated position
                let (north, east, _) = state.converter.geodetic_to_ned(
                    pv.position.latitude,
                    pv.position.longitude,
                    pv.position.altitude,
                );
                let distance = north.hypot(east);
                let cov = state.estimated_covariance;
                let estimate_std_dev = (cov[0][0] + cov[1][1]).sqrt();
                state.bound = self
                    .config
                    .minimum_bound
                    .max(self.config.std_dev_multiplier * estimate_std_dev);
                let jump = distance > state.bound;
                let receiver_std_dev = pv.horizontal_std_dev();
                log::debug!(
                    "{}: north {} east {} distance {} bound {} estimate std dev {} \
                     receiver std dev {}",
                    self.name,
                    north,
                    east,
                    distance,
                    state.bound,
                    estimate_std_dev,
                    receiver_std_dev
                );
                let level = if jump && receiver_std_dev > self.config.receiver_std_dev_cutoff {
                    log::debug!(
                        "{}: distance to estimated position {} m exceeds bound {} m \
                         with a poor receiver solution",
                        self.name,
                        distance,
                        state.bound
                    );
                    AssuranceLevel::Inconsistent
                } else if jump {
                    log::debug!(
                        "{}: distance to estimated position {} m exceeds bound {} m",
                        self.name,
                        distance,
                        state.bound
                    );
                    AssuranceLevel::Unassured
                } else {
                    AssuranceLevel::Assured
                };
                state.assurance.change_level(level_time, level);
                let diagnostics = PosJumpCheckDiagnostics {
                    bound: state.bound,
                    distance,
                };
                (Ok(()), diagnostics)
            }
            _ => {
                state
                    .assurance
                    .change_level(level_time, AssuranceLevel::Unavailable);
                (Err(CheckError::NoReference), PosJumpCheckDiagnostics::default())
            }
        };

        if let Some(sink) = &self.diagnostics {
            sink.publish(update_time, &diagnostics);
        }
        result
    }
}

impl AssuranceCheck for PositionJumpCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn assurance_level(&self) -> AssuranceLevel {
        self.lock().assurance.level()
    }

    fn level_history(&self) -> Vec<LevelChange> {
        self.lock().assurance.history().copied().collect()
    }

    fn run_check(&self) -> Result<(), CheckError> {
        let mut state = self.lock();
        self.run(&mut state)
    }

    fn set_last_good_position(&self, time: f64, position: GeodeticPosition) {
        let mut state = self.lock();
        state.assurance.set_last_good_position(time, position);
        state.distance_traveled = 0.0;
        if self.config.mode == BoundMode::DistanceTraveled {
            state.bound = self.config.minimum_bound;
        }
    }

    fn handle_position_velocity(
        &self,
        position_velocity: &PositionVelocity,
        is_local: bool,
    ) -> Result<(), CheckError> {
        if !is_local {
            return Ok(());
        }
        let mut state = self.lock();
        state.last_receiver_pv = Some(position_velocity.clone());
        self.run(&mut state)
    }

    fn handle_estimated_position_velocity(
        &self,
        position_velocity: &PositionVelocity,
    ) -> Result<(), CheckError> {
        // a zero covariance means the estimator has not initialized
        if self.config.mode == BoundMode::Estimator && position_velocity.covariance[0][0] != 0.0 {
            let mut state = self.lock();
            let position = position_velocity.position;
            state.estimated_position = Some(position);
            state.estimated_covariance = position_velocity.covariance;
            state
                .converter
                .initialize_reference(position.latitude, position.longitude, position.altitude);
        }
        Ok(())
    }

    fn handle_distance_traveled(&self, distance: &DistanceTraveled) -> Result<(), CheckError> {
        if self.config.mode == BoundMode::DistanceTraveled {
            let mut state = self.lock();
            state.distance_traveled += distance.distance;
            state.bound_propagated = true;
            self.update_bound_from_distance(&mut state);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::time::Timestamp;
    use crate::types::Header;
    use std::sync::mpsc;

    // Meridian radius of curvature at the equator
    const MERIDIAN_RADIUS: f64 = 6_335_439.0;

    fn base() -> GeodeticPosition {
        GeodeticPosition::new(0.0, 0.0, 100.0)
    }

    fn north_of(position: GeodeticPosition, meters: f64) -> GeodeticPosition {
        GeodeticPosition::new(
            position.latitude + meters / MERIDIAN_RADIUS,
            position.longitude,
            position.altitude,
        )
    }

    fn above(position: GeodeticPosition, meters: f64) -> GeodeticPosition {
        GeodeticPosition::new(
            position.latitude,
            position.longitude,
            position.altitude + meters,
        )
    }

    fn pv(time: f64, position: GeodeticPosition, variances: [f64; 3]) -> PositionVelocity {
        let sec = time.trunc() as i64;
        let nanoseconds = ((time - time.trunc()) * 1e9).round() as i64;
        PositionVelocity::new(
            Header::new("local", Timestamp::new(sec, nanoseconds)),
            position,
            variances,
        )
    }

    fn check(mode: BoundMode) -> PositionJumpCheck {
        PositionJumpCheck::new(
            "jump",
            PositionJumpConfig {
                mode,
                ..Default::default()
            },
        )
    }

    #[test]
    fn platform_bound_propagation() {
        let check = check(BoundMode::Platform);
        check.set_last_good_position(100.0, base());
        check
            .handle_position_velocity(&pv(101.0, base(), [1.0; 3]), true)
            .unwrap();
        assert_eq!(check.bound(), 50.0);
        assert_eq!(check.assurance_level(), AssuranceLevel::Assured);

        // the bound never goes below the minimum
        check.update_bound_at(100.1);
        assert_eq!(check.bound(), 10.0);
        check.update_bound_at(99.0);
        assert_eq!(check.bound(), 10.0);
        check.update_bound_at(104.0);
        assert_eq!(check.bound(), 200.0);
    }

    #[test]
    fn platform_jump() {
        let check = check(BoundMode::Platform);
        check.set_last_good_position(100.0, base());
        check
            .handle_position_velocity(&pv(101.0, above(base(), 40.0), [1.0; 3]), true)
            .unwrap();
        assert_eq!(check.assurance_level(), AssuranceLevel::Assured);
        assert!((check.distance_to_last_good() - 40.0).abs() < 1e-6);
        check
            .handle_position_velocity(&pv(101.5, above(base(), 1000.0), [1.0; 3]), true)
            .unwrap();
        assert_eq!(check.bound(), 75.0);
        assert_eq!(check.assurance_level(), AssuranceLevel::Unassured);
        let history: Vec<_> = check
            .level_history()
            .iter()
            .map(|c| (c.time, c.level))
            .collect();
        // level changes are stamped with the whole seconds of the solution
        assert_eq!(
            history,
            [
                (101.0, AssuranceLevel::Assured),
                (101.0, AssuranceLevel::Unassured)
            ]
        );
    }

    #[test]
    fn platform_without_last_good_position() {
        let (tx, rx) = mpsc::channel::<(f64, PosJumpCheckDiagnostics)>();
        let check = check(BoundMode::Platform).with_diagnostics(tx);
        assert_eq!(check.run_check(), Err(CheckError::NoReceiverPosition));
        assert!(rx.try_recv().is_err());
        assert_eq!(
            check.handle_position_velocity(&pv(101.25, base(), [1.0; 3]), true),
            Err(CheckError::NoReference)
        );
        assert_eq!(check.assurance_level(), AssuranceLevel::Unavailable);
        assert_eq!(check.level_history().len(), 1);
        let (time, diagnostics) = rx.try_recv().unwrap();
        assert_eq!(time, 101.25);
        assert!(diagnostics.bound.is_nan());
        assert!(diagnostics.distance.is_nan());
    }

    #[test]
    fn distance_traveled_mode() {
        let check = check(BoundMode::DistanceTraveled);
        check.set_last_good_position(100.0, base());
        // no distance reported yet
        assert_eq!(
            check.handle_position_velocity(&pv(101.0, base(), [1.0; 3]), true),
            Err(CheckError::NoReference)
        );
        assert_eq!(check.assurance_level(), AssuranceLevel::Unavailable);

        let report = |distance| DistanceTraveled {
            header: Header::default(),
            distance,
        };
        check.handle_distance_traveled(&report(5.0)).unwrap();
        assert_eq!(check.bound(), 10.0);
        check.handle_distance_traveled(&report(25.0)).unwrap();
        assert_eq!(check.distance_traveled(), 30.0);
        assert_eq!(check.bound(), 30.0);

        check
            .handle_position_velocity(&pv(102.0, above(base(), 20.0), [1.0; 3]), true)
            .unwrap();
        assert_eq!(check.assurance_level(), AssuranceLevel::Assured);
        // time alone does not grow the bound in this mode
        check
            .handle_position_velocity(&pv(200.0, above(base(), 40.0), [1.0; 3]), true)
            .unwrap();
        assert_eq!(check.bound(), 30.0);
        assert_eq!(check.assurance_level(), AssuranceLevel::Unassured);

        check.set_last_good_position(200.0, above(base(), 40.0));
        assert_eq!(check.distance_traveled(), 0.0);
        assert_eq!(check.bound(), 10.0);
    }

    #[test]
    fn wrong_bound_update_variant() {
        let check = check(BoundMode::Platform);
        check.set_last_good_position(100.0, base());
        check.update_bound_at(102.0);
        assert_eq!(check.bound(), 100.0);
        check.update_bound();
        assert_eq!(check.bound(), 100.0);

        let check = self::check(BoundMode::DistanceTraveled);
        check.set_last_good_position(100.0, base());
        check.update_bound_at(1000.0);
        assert_eq!(check.bound(), 10.0);
        check.update_bound();
        assert_eq!(check.bound(), 10.0);
    }

    #[test]
    fn last_good_position_resets_distance() {
        let check = check(BoundMode::Platform);
        check.set_last_good_position(100.0, base());
        check.update_bound_at(110.0);
        assert_eq!(check.bound(), 500.0);
        check.set_last_good_position(110.0, base());
        assert_eq!(check.distance_traveled(), 0.0);
        // in platform mode the bound is only recomputed on propagation
        assert_eq!(check.bound(), 500.0);
        check.update_bound_at(110.0);
        assert_eq!(check.bound(), 10.0);
    }

    #[test]
    fn estimator_mode() {
        let check = check(BoundMode::Estimator);
        // no estimate yet
        assert_eq!(
            check.handle_position_velocity(&pv(100.0, base(), [1.0; 3]), true),
            Err(CheckError::NoReference)
        );
        assert_eq!(check.assurance_level(), AssuranceLevel::Unavailable);

        // an uninitialized estimator reports zero covariance
        check
            .handle_estimated_position_velocity(&pv(100.0, base(), [0.0; 3]))
            .unwrap();
        assert_eq!(
            check.handle_position_velocity(&pv(100.0, base(), [1.0; 3]), true),
            Err(CheckError::NoReference)
        );

        // bound = max(10, 3 * sqrt(50 + 50)) = 30
        check
            .handle_estimated_position_velocity(&pv(100.0, base(), [50.0, 50.0, 50.0]))
            .unwrap();
        check
            .handle_position_velocity(&pv(101.0, north_of(base(), 20.0), [1.0; 3]), true)
            .unwrap();
        assert!((check.bound() - 30.0).abs() < 1e-9);
        assert_eq!(check.assurance_level(), AssuranceLevel::Assured);

        // jump with a confident receiver
        check
            .handle_position_velocity(&pv(102.0, north_of(base(), 60.0), [1.0; 3]), true)
            .unwrap();
        assert_eq!(check.assurance_level(), AssuranceLevel::Unassured);

        // jump with sqrt(400 + 600) > 30
        check
            .handle_position_velocity(
                &pv(103.0, north_of(base(), 60.0), [400.0, 600.0, 1.0]),
                true,
            )
            .unwrap();
        assert_eq!(check.assurance_level(), AssuranceLevel::Inconsistent);

        // sqrt(400 + 500) = 30 is not above the cutoff
        check
            .handle_position_velocity(
                &pv(104.0, north_of(base(), 60.0), [400.0, 500.0, 1.0]),
                true,
            )
            .unwrap();
        assert_eq!(check.assurance_level(), AssuranceLevel::Unassured);
    }

    #[test]
    fn estimator_ignores_altitude() {
        let check = check(BoundMode::Estimator);
        check
            .handle_estimated_position_velocity(&pv(100.0, base(), [1.0, 1.0, 1.0]))
            .unwrap();
        check
            .handle_position_velocity(&pv(101.0, above(base(), 500.0), [1.0; 3]), true)
            .unwrap();
        assert_eq!(check.bound(), 10.0);
        assert_eq!(check.assurance_level(), AssuranceLevel::Assured);
    }

    #[test]
    fn estimates_ignored_in_other_modes() {
        let check = check(BoundMode::Platform);
        check
            .handle_estimated_position_velocity(&pv(100.0, base(), [50.0, 50.0, 50.0]))
            .unwrap();
        assert_eq!(
            check.handle_position_velocity(&pv(101.0, base(), [1.0; 3]), true),
            Err(CheckError::NoReference)
        );
    }

    #[test]
    fn remote_positions_are_ignored() {
        let check = check(BoundMode::Platform);
        check.set_last_good_position(100.0, base());
        check
            .handle_position_velocity(&pv(101.0, above(base(), 1.0e6), [1.0; 3]), false)
            .unwrap();
        assert!(check.level_history().is_empty());
        assert_eq!(check.run_check(), Err(CheckError::NoReceiverPosition));
    }

    #[test]
    fn repeated_runs_are_stable() {
        let (tx, rx) = mpsc::channel::<(f64, PosJumpCheckDiagnostics)>();
        let check = check(BoundMode::Estimator).with_diagnostics(tx);
        check
            .handle_estimated_position_velocity(&pv(100.0, base(), [4.0, 4.0, 4.0]))
            .unwrap();
        check
            .handle_position_velocity(&pv(101.0, north_of(base(), 15.0), [1.0; 3]), true)
            .unwrap();
        check.run_check().unwrap();
        assert_eq!(check.assurance_level(), AssuranceLevel::Unassured);
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.1.bound, 10.0);
        assert!((first.1.distance - 15.0).abs() < 0.1);
    }

    #[test]
    fn parse_bound_mode() {
        assert_eq!("platform".parse(), Ok(BoundMode::Platform));
        assert_eq!("distance-traveled".parse(), Ok(BoundMode::DistanceTraveled));
        assert_eq!("estimator".parse(), Ok(BoundMode::Estimator));
        assert_eq!(
            "inertial".parse::<BoundMode>(),
            Err(ParseConfigError::UnknownBoundMode)
        );
    }
}
