//! # PNT integrity
//!
//! pnt-integrity is a Rust implementation of GNSS integrity monitoring
//! checks. The checks evaluate positioning and raw observable data from a
//! local receiver and from zero or more peer nodes, and each of them holds an
//! [`AssuranceLevel`] telling whether the navigation solution appears genuine
//! (`Assured`), degraded (`Inconsistent`), spoofed or jammed (`Unassured`), or
//! whether there is not enough data to tell (`Unavailable`).
//!
//! Two checks are provided:
//!
//! * [`AngleOfArrivalCheck`] forms single differences of the pseudoranges
//!   observed by the local receiver and by each peer, and compares them across
//!   satellites. Signals broadcast by a single spoofing transmitter arrive
//!   along the same line of sight, so their single differences agree much more
//!   than those of genuine satellites.
//!
//! * [`PositionJumpCheck`] compares each receiver position against a
//!   reference and flags displacements larger than a bound. The bound is
//!   propagated from the maximum platform velocity, from an external distance
//!   traveled source, or from the covariance of an independent estimator.
//!
//! Both checks implement the [`AssuranceCheck`] trait. They can be used
//! directly, or through an [`IntegrityMonitor`], which stores the incoming
//! data in a [`MemoryRepository`], feeds it to all the checks, and combines
//! their levels.
//!
//! Checks are `Send + Sync` and can be shared between the threads that
//! produce their input data. Each check serializes its own processing with an
//! internal lock.
//!
//! ## Logging
//!
//! The pnt-integrity crate makes extensive use of the
//! [log](https://docs.rs/log/latest/log/) crate to log level changes and the
//! intermediate results of each check.
//!
//! ## Features
//!
//! The crate supports the following features:
//! * `replay`. Enabled by default. This builds the `integrity-replay` binary,
//!   which runs the checks over a scenario given as a CSV file.

#![warn(missing_docs)]

pub mod aoa;
pub use aoa::{AngleOfArrivalCheck, AoaCheckConfig, DifferenceSource};
pub mod check;
pub use check::{AssuranceCheck, AssuranceState, CheckError, DiagnosticsSink};
pub mod geodetic;
pub use geodetic::GeodeticConverter;
mod level;
pub use level::AssuranceLevel;
pub mod monitor;
pub use monitor::IntegrityMonitor;
pub mod position_jump;
pub use position_jump::{BoundMode, PositionJumpCheck, PositionJumpConfig};
pub mod repository;
pub use repository::{MemoryRepository, ObservationRepository};
mod time;
pub use time::{TimeKey, Timestamp, seconds_to_key, time_of_week_key};
pub mod types;
