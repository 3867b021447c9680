//! Integrity monitor.
//!
//! [`IntegrityMonitor`] is the entry point for a node running several checks.
//! It stores the incoming data in the shared repository, feeds it to every
//! check, and combines their levels into a single assurance level.

use crate::check::{AssuranceCheck, CheckError};
use crate::level::AssuranceLevel;
use crate::repository::{EntryData, MemoryRepository};
use crate::time::{TimeKey, seconds_to_key};
use crate::types::{
    DistanceTraveled, GnssObservables, Header, MeasuredRange, NodeId, PositionVelocity,
};
use std::sync::Arc;

/// Integrity monitor.
///
/// Data whose header device id equals the local node id is stored as local
/// data. Everything else is stored under the device id of its header.
///
/// # Examples
///
/// ```
/// use pnt_integrity::{
///     AoaCheckConfig, AngleOfArrivalCheck, AssuranceLevel, IntegrityMonitor, MemoryRepository,
/// };
/// use std::sync::Arc;
///
/// let repository = Arc::new(MemoryRepository::default());
/// let mut monitor = IntegrityMonitor::new("rover", Arc::clone(&repository));
/// monitor.add_check(Arc::new(AngleOfArrivalCheck::new(
///     "aoa",
///     AoaCheckConfig::default(),
///     repository,
/// )));
/// assert_eq!(monitor.assurance_level(), AssuranceLevel::Unavailable);
/// ```
pub struct IntegrityMonitor {
    local_node: NodeId,
    repository: Arc<MemoryRepository>,
    checks: Vec<Arc<dyn AssuranceCheck>>,
}

impl IntegrityMonitor {
    /// Creates a monitor with no checks for the node `local_node`.
    pub fn new(local_node: impl Into<NodeId>, repository: Arc<MemoryRepository>) -> Self {
        IntegrityMonitor {
            local_node: local_node.into(),
            repository,
            checks: Vec::new(),
        }
    }

    /// Adds a check.
    pub fn add_check(&mut self, check: Arc<dyn AssuranceCheck>) {
        log::info!("adding check {}", check.name());
        self.checks.push(check);
    }

    /// Checks run by the monitor.
    pub fn checks(&self) -> &[Arc<dyn AssuranceCheck>] {
        &self.checks
    }

    /// Repository where the monitor stores its input data.
    pub fn repository(&self) -> &Arc<MemoryRepository> {
        &self.repository
    }

    /// Identifier of the local node.
    pub fn local_node(&self) -> &str {
        &self.local_node
    }

    /// Handles a batch of observables.
    ///
    /// `time` is the time of week of the batch in seconds, or zero to use the
    /// header time.
    pub fn handle_gnss_observables(&self, observables: &GnssObservables, time: f64) {
        let key = if time != 0.0 {
            seconds_to_key(time)
        } else {
            observables.header.timestamp_valid.key()
        };
        self.store(key, &observables.header, observables.clone());
        self.for_each_check(|check| check.handle_gnss_observables(observables, time));
    }

    /// Handles a range measured to a peer.
    pub fn handle_measured_range(&self, range: &MeasuredRange) {
        let key = range.header.timestamp_valid.key();
        self.store(key, &range.header, range.clone());
        self.for_each_check(|check| check.handle_measured_range(range));
    }

    /// Handles a position solution from the local receiver or a peer.
    ///
    /// If the solution is local and the combined level after processing it is
    /// `Assured`, the solution becomes the last good position of every check.
    pub fn handle_position_velocity(&self, position_velocity: &PositionVelocity) {
        let header = &position_velocity.header;
        let is_local = self.is_local(header);
        self.store(
            header.timestamp_valid.key(),
            header,
            position_velocity.clone(),
        );
        self.for_each_check(|check| check.handle_position_velocity(position_velocity, is_local));
        if is_local && self.assurance_level() == AssuranceLevel::Assured {
            let time = header.timestamp_valid.as_seconds();
            log::debug!("setting last good position at {}", time);
            for check in &self.checks {
                check.set_last_good_position(time, position_velocity.position);
            }
        }
    }

    /// Handles a position estimate from an independent estimator.
    pub fn handle_estimated_position_velocity(&self, position_velocity: &PositionVelocity) {
        self.for_each_check(|check| check.handle_estimated_position_velocity(position_velocity));
    }

    /// Handles a distance traveled report.
    pub fn handle_distance_traveled(&self, distance: &DistanceTraveled) {
        self.for_each_check(|check| check.handle_distance_traveled(distance));
    }

    /// Runs every check with the data received so far.
    pub fn run_checks(&self) {
        self.for_each_check(|check| check.run_check());
    }

    /// Combined assurance level.
    ///
    /// Any `Unassured` check makes the result `Unassured`. Otherwise any
    /// `Inconsistent` check makes it `Inconsistent`, and otherwise any
    /// `Assured` check makes it `Assured`. With no usable check the result is
    /// `Unavailable`.
    pub fn assurance_level(&self) -> AssuranceLevel {
        let levels: Vec<_> = self.checks.iter().map(|c| c.assurance_level()).collect();
        [
            AssuranceLevel::Unassured,
            AssuranceLevel::Inconsistent,
            AssuranceLevel::Assured,
        ]
        .into_iter()
        .find(|level| levels.contains(level))
        .unwrap_or(AssuranceLevel::Unavailable)
    }

    /// Level of each check, in the order the checks were added.
    pub fn levels(&self) -> Vec<(String, AssuranceLevel)> {
        self.checks
            .iter()
            .map(|c| (c.name().to_owned(), c.assurance_level()))
            .collect()
    }

    fn is_local(&self, header: &Header) -> bool {
        header.device_id == self.local_node
    }

    fn store<T: EntryData>(&self, key: TimeKey, header: &Header, data: T) {
        if self.is_local(header) {
            self.repository.add_local(key, data);
        } else {
            self.repository.add_remote(key, &header.device_id, data);
        }
    }

    fn for_each_check<F>(&self, mut f: F)
    where
        F: FnMut(&dyn AssuranceCheck) -> Result<(), CheckError>,
    {
        for check in &self.checks {
            if let Err(e) = f(check.as_ref()) {
                log::debug!("{}: round not evaluated: {}", check.name(), e);
            }
        }
    }
}
