use std::io::Write;
use std::process;

use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

use fog_coalition_sim::error::{Error, Result};
use fog_coalition_sim::experiment::Experiment;
use fog_coalition_sim::options::{CoalitionFormationPolicy, Options, PayoffDivisionPolicy};
use fog_coalition_sim::scenario::Scenario;

/// Simulates coalition formation among fog providers pooling their fog
/// nodes to serve latency-sensitive services.
#[derive(Parser, Debug)]
#[clap(name = "fog-coalition-sim", version, about)]
struct Args {
    /// Path to the scenario file.
    #[clap(long)]
    scenario: String,

    /// Coalition formation category ('nash').
    #[clap(long, default_value = "nash")]
    formation: String,

    /// Payoff division category ('shapley').
    #[clap(long, default_value = "shapley")]
    payoff: String,

    /// Simulated time between activations of the coalition formation
    /// algorithm.
    #[clap(long, default_value_t = 0.0)]
    formation_interval: f64,

    /// Relative tolerance parameter of the placement optimizer, in [0,1].
    #[clap(long, default_value_t = 0.0)]
    optim_reltol: f64,

    /// Wall-clock seconds granted to each placement solve (non-positive
    /// means unlimited).
    #[clap(long, default_value_t = -1.0)]
    optim_tilim: f64,

    /// Relative tolerance of the service performance model, in [0,1].
    #[clap(long, default_value_t = 1e-5)]
    service_delay_tol: f64,

    /// Confidence level of the output intervals, in [0,1].
    #[clap(long, default_value_t = 0.95)]
    ci_level: f64,

    /// Target relative precision of the interval half-widths, in [0,1].
    #[clap(long, default_value_t = 0.04)]
    ci_rel_precision: f64,

    /// Maximum simulated duration of each replication.
    #[clap(long, default_value_t = 0.0)]
    sim_max_rep_len: f64,

    /// Maximum number of replications (0 means unlimited).
    #[clap(long, default_value_t = 0)]
    sim_max_num_rep: usize,

    /// Seed for random number generation.
    #[clap(long, default_value_t = 5489)]
    rng_seed: u64,

    /// Report every stable partition of each interval instead of the best
    /// one only.
    #[clap(long)]
    find_all_parts: bool,

    /// Verbosity level in [0,9].
    #[clap(long, default_value_t = 0)]
    verbosity: u8,

    /// Output CSV file for per-interval statistics.
    #[clap(long)]
    out_stats_file: Option<String>,

    /// Output CSV file for per-partition trace rows.
    #[clap(long)]
    out_trace_file: Option<String>,
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1..=2 => LevelFilter::Info,
        3..=5 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .filter_level(level)
        .init();
}

fn build_options(args: &Args) -> Result<Options> {
    let coalition_formation = match args.formation.as_str() {
        "nash" => CoalitionFormationPolicy::NashStable,
        other => {
            return Err(Error::InvalidArgument(format!(
                "unknown coalition formation category '{}'",
                other
            )))
        }
    };
    let coalition_value_division = match args.payoff.as_str() {
        "shapley" => PayoffDivisionPolicy::Shapley,
        other => {
            return Err(Error::InvalidArgument(format!(
                "unknown coalition value division category '{}'",
                other
            )))
        }
    };
    Ok(Options {
        coalition_formation,
        coalition_formation_interval: args.formation_interval,
        coalition_value_division,
        find_all_best_partitions: args.find_all_parts,
        optim_relative_tolerance: args.optim_reltol,
        optim_time_limit: args.optim_tilim,
        output_stats_data_file: args.out_stats_file.clone(),
        output_trace_data_file: args.out_trace_file.clone(),
        rng_seed: args.rng_seed,
        service_delay_tolerance: args.service_delay_tol,
        sim_ci_level: args.ci_level,
        sim_ci_rel_precision: args.ci_rel_precision,
        sim_max_num_replications: args.sim_max_num_rep,
        sim_max_replication_duration: args.sim_max_rep_len,
    })
}

fn run(args: &Args) -> Result<()> {
    let scenario = Scenario::from_file(&args.scenario)?;
    let options = build_options(args)?;
    let mut experiment = Experiment::new(scenario, options)?;
    experiment.run()
}

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version print to stdout and exit successfully;
            // anything else is a usage error.
            let code = if e.use_stderr() { 1 } else { 0 };
            e.print().ok();
            process::exit(code);
        }
    };
    init_logging(args.verbosity.min(9));

    if let Err(e) = run(&args) {
        eprintln!("{}", e);
        process::exit(1);
    }
}
