use anyhow::{Context, Result};
use clap::Parser;
use pnt_integrity::{
    AngleOfArrivalCheck, AoaCheckConfig, BoundMode, DifferenceSource, IntegrityMonitor,
    MemoryRepository, PositionJumpCheck, PositionJumpConfig, Timestamp,
    types::{
        DistanceTraveled, GeodeticPosition, GnssObservable, GnssObservables, Header,
        MeasuredRange, NodeId, PositionVelocity, Prn,
    },
};
use std::{collections::BTreeMap, fs, path::PathBuf, sync::Arc};

/// Run the integrity checks over a scenario given as a CSV file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input CSV file
    input_file: PathBuf,
    /// Identifier of the local node
    #[arg(long, default_value = "local")]
    local_node: String,
    /// Repository history window (s)
    #[arg(long, default_value_t = 10)]
    history_seconds: i64,
    /// Minimum number of local satellites for the angle of arrival check
    #[arg(long, default_value_t = 4)]
    prn_count_threshold: usize,
    /// Single difference agreement threshold (m)
    #[arg(long, default_value_t = 5.0)]
    single_diff_compare_threshold: f64,
    /// Fraction of agreeing comparisons above which a satellite is unassured
    #[arg(long, default_value_t = 0.5)]
    single_diff_failure_limit: f64,
    /// Fraction of suspect satellites for the unassured level
    #[arg(long, default_value_t = 0.5)]
    unassured_threshold: f64,
    /// Fraction of suspect satellites for the inconsistent level
    #[arg(long, default_value_t = 0.25)]
    inconsistent_threshold: f64,
    /// Fraction of assured satellites for the assured level
    #[arg(long, default_value_t = 0.5)]
    assured_threshold: f64,
    /// Lifetime of the satellite levels (s)
    #[arg(long, default_value_t = 5.0)]
    assurance_level_period: f64,
    /// Peers closer than this range (m) are not compared
    #[arg(long, default_value_t = 0.0)]
    range_threshold: f64,
    /// Single difference source: pseudorange, carrier-phase or both
    #[arg(long, default_value = "pseudorange")]
    difference_source: DifferenceSource,
    /// Position jump bound mode: platform, distance-traveled or estimator
    #[arg(long, default_value = "platform")]
    bound_mode: BoundMode,
    /// Minimum position jump bound (m)
    #[arg(long, default_value_t = 10.0)]
    minimum_bound: f64,
    /// Maximum platform velocity (m/s)
    #[arg(long, default_value_t = 50.0)]
    maximum_velocity: f64,
    /// Estimator standard deviations used as bound
    #[arg(long, default_value_t = 3.0)]
    std_dev_multiplier: f64,
    /// Receiver horizontal standard deviation separating inconsistent from unassured jumps (m)
    #[arg(long, default_value_t = 30.0)]
    receiver_std_dev_cutoff: f64,
}

impl Args {
    fn aoa_config(&self) -> AoaCheckConfig {
        AoaCheckConfig {
            prn_count_threshold: self.prn_count_threshold,
            single_diff_compare_threshold: self.single_diff_compare_threshold,
            single_diff_failure_limit: self.single_diff_failure_limit,
            unassured_threshold: self.unassured_threshold,
            inconsistent_threshold: self.inconsistent_threshold,
            assured_threshold: self.assured_threshold,
            assurance_level_period: self.assurance_level_period,
            range_threshold: self.range_threshold,
            difference_source: self.difference_source,
            ..Default::default()
        }
    }

    fn position_jump_config(&self) -> PositionJumpConfig {
        PositionJumpConfig {
            mode: self.bound_mode,
            minimum_bound: self.minimum_bound,
            maximum_velocity: self.maximum_velocity,
            std_dev_multiplier: self.std_dev_multiplier,
            receiver_std_dev_cutoff: self.receiver_std_dev_cutoff,
            ..Default::default()
        }
    }
}

enum Record {
    Observable {
        tow: i64,
        node: NodeId,
        observable: GnssObservable,
    },
    Range(MeasuredRange),
    Position(PositionVelocity),
    Estimate(PositionVelocity),
    Distance(DistanceTraveled),
}

fn parse_valid(field: &str) -> Result<bool> {
    match field {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(anyhow::anyhow!("invalid validity flag {field}")),
    }
}

fn parse_position<'a>(
    header: Header,
    fields: &mut impl Iterator<Item = &'a str>,
) -> Result<PositionVelocity> {
    let wrong_format = || anyhow::anyhow!("position has wrong format");
    let mut values = [0.0_f64; 6];
    for value in values.iter_mut() {
        *value = fields.next().ok_or_else(wrong_format)?.parse()?;
    }
    let [lat, lon, alt, var_n, var_e, var_d] = values;
    Ok(PositionVelocity::new(
        header,
        GeodeticPosition::from_degrees(lat, lon, alt),
        [var_n, var_e, var_d],
    ))
}

fn csv_line_to_record(line: &str) -> Result<Record> {
    let mut fields = line.split(',').map(str::trim);
    let wrong_format = || anyhow::anyhow!("CSV has wrong format");
    let kind = fields.next().ok_or_else(wrong_format)?;
    let record = match kind {
        "obs" => {
            let tow: i64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            let node = fields.next().ok_or_else(wrong_format)?.to_owned();
            let prn: Prn = fields.next().ok_or_else(wrong_format)?.parse()?;
            let pseudorange: f64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            let valid = parse_valid(fields.next().ok_or_else(wrong_format)?)?;
            Record::Observable {
                tow,
                node,
                observable: GnssObservable::from_pseudorange(prn, pseudorange, valid),
            }
        }
        "range" => {
            let tow: i64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            let node = fields.next().ok_or_else(wrong_format)?;
            let range: f64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            Record::Range(MeasuredRange {
                header: Header::new(node, Timestamp::new(tow, 0)),
                range,
                range_valid: true,
            })
        }
        "pv" => {
            let sec: i64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            let nanos: i64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            let node = fields.next().ok_or_else(wrong_format)?;
            let header = Header::new(node, Timestamp::new(sec, nanos));
            Record::Position(parse_position(header, &mut fields)?)
        }
        "est" => {
            let sec: i64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            let nanos: i64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            let header = Header::new("estimator", Timestamp::new(sec, nanos));
            Record::Estimate(parse_position(header, &mut fields)?)
        }
        "dist" => {
            let sec: i64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            let distance: f64 = fields.next().ok_or_else(wrong_format)?.parse()?;
            Record::Distance(DistanceTraveled {
                header: Header::new("odometer", Timestamp::new(sec, 0)),
                distance,
            })
        }
        _ => return Err(anyhow::anyhow!("unknown record type {kind}")),
    };
    Ok(record)
}

/// Observables of one time of week, grouped by node.
#[derive(Default)]
struct ObservationBatch {
    tow: Option<i64>,
    nodes: BTreeMap<NodeId, Vec<GnssObservable>>,
}

impl ObservationBatch {
    fn push(&mut self, monitor: &IntegrityMonitor, tow: i64, node: NodeId, obs: GnssObservable) {
        if self.tow != Some(tow) {
            self.flush(monitor);
            self.tow = Some(tow);
        }
        self.nodes.entry(node).or_default().push(obs);
    }

    // Peers go first, so that the local batch finds their data in the
    // repository when it triggers the checks.
    fn flush(&mut self, monitor: &IntegrityMonitor) {
        let Some(tow) = self.tow.take() else {
            return;
        };
        let mut nodes = core::mem::take(&mut self.nodes);
        let local = nodes.remove(monitor.local_node());
        let batches = nodes
            .into_iter()
            .chain(local.map(|obs| (monitor.local_node().to_owned(), obs)));
        for (node, observables) in batches {
            log::debug!(
                "flushing {} observables from {} at time of week {}",
                observables.len(),
                node,
                tow
            );
            let observables =
                GnssObservables::new(Header::new(node, Timestamp::new(tow, 0)), observables);
            monitor.handle_gnss_observables(&observables, tow as f64);
        }
    }
}

fn log_levels(monitor: &IntegrityMonitor) {
    for (name, level) in monitor.levels() {
        log::info!("{}: {}", name, level);
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let repository = Arc::new(MemoryRepository::new(args.history_seconds));
    let mut monitor = IntegrityMonitor::new(args.local_node.as_str(), Arc::clone(&repository));
    monitor.add_check(Arc::new(AngleOfArrivalCheck::new(
        "angle-of-arrival",
        args.aoa_config(),
        repository,
    )));
    monitor.add_check(Arc::new(PositionJumpCheck::new(
        "position-jump",
        args.position_jump_config(),
    )));

    let csv = fs::read_to_string(&args.input_file)
        .with_context(|| format!("could not read {}", args.input_file.display()))?;
    let mut batch = ObservationBatch::default();
    for (j, line) in csv.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record = csv_line_to_record(line).with_context(|| format!("line {}", j + 1))?;
        match record {
            Record::Observable {
                tow,
                node,
                observable,
            } => batch.push(&monitor, tow, node, observable),
            // other records are applied after any pending observables
            Record::Range(range) => {
                batch.flush(&monitor);
                monitor.handle_measured_range(&range);
            }
            Record::Position(pv) => {
                batch.flush(&monitor);
                monitor.handle_position_velocity(&pv);
            }
            Record::Estimate(pv) => {
                batch.flush(&monitor);
                monitor.handle_estimated_position_velocity(&pv);
            }
            Record::Distance(distance) => {
                batch.flush(&monitor);
                monitor.handle_distance_traveled(&distance);
            }
        }
        log_levels(&monitor);
    }
    batch.flush(&monitor);
    log_levels(&monitor);

    for check in monitor.checks() {
        println!(
            "{}: {} ({} level changes)",
            check.name(),
            check.assurance_level(),
            check.level_history().len()
        );
    }
    println!("combined: {}", monitor.assurance_level());
    Ok(())
}
