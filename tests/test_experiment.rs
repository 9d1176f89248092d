use std::fs;

use fog_coalition_sim::experiment::Experiment;
use fog_coalition_sim::options::Options;
use fog_coalition_sim::scenario::Scenario;

fn name_wrapper(file_name: &str) -> String {
    format!("test-scenarios/{}", file_name)
}

fn temp_path(name: &str) -> String {
    std::env::temp_dir()
        .join(format!("fogcoalsim-test-{}-{}", std::process::id(), name))
        .display()
        .to_string()
}

fn base_options(stats_file: &str, trace_file: &str) -> Options {
    Options {
        coalition_formation_interval: 100.0,
        sim_max_replication_duration: 100.0,
        sim_max_num_replications: 1,
        output_stats_data_file: Some(stats_file.to_string()),
        output_trace_data_file: Some(trace_file.to_string()),
        ..Options::default()
    }
}

fn read_rows(path: &str) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| l.to_string())
        .collect()
}

fn field(row: &str, idx: usize) -> f64 {
    row.split(',').nth(idx).unwrap().parse().unwrap()
}

#[test]
fn test_single_fp_single_service() {
    let scenario = Scenario::from_file(name_wrapper("single_fp.scn")).unwrap();
    let stats = temp_path("single-stats.csv");
    let trace = temp_path("single-trace.csv");
    let mut experiment = Experiment::new(scenario, base_options(&stats, &trace)).unwrap();
    experiment.run().unwrap();
    assert_eq!(experiment.num_replications(), 1);

    // One trigger at t=100 over [0, 100]; the single VM fits on the single
    // FN: objective = (0.1 + 0.1 * 0.5) * 0.1 = 0.015, so the interval
    // profit is (5 - 0.015) * 100 = 498.5 both in and out of coalition.
    let rows = read_rows(&stats);
    assert_eq!(rows.len(), 2);
    let row = &rows[1];
    assert_eq!(field(row, 0), 100.0);
    assert_eq!(field(row, 1), 0.0);
    assert_eq!(field(row, 2), 100.0);
    assert!((field(row, 3) - 498.5).abs() < 1e-9);
    assert!((field(row, 4) - 498.5).abs() < 1e-9);
    assert_eq!(field(row, 5), 0.0);

    let trace_rows = read_rows(&trace);
    assert_eq!(trace_rows.len(), 2);
    assert!(trace_rows[1].contains("\"{{0}}\""));

    fs::remove_file(&stats).ok();
    fs::remove_file(&trace).ok();
}

#[test]
fn test_grand_coalition_dominates_for_identical_fps() {
    let scenario = Scenario::from_file(name_wrapper("two_fps.scn")).unwrap();
    let stats = temp_path("two-stats.csv");
    let trace = temp_path("two-trace.csv");
    let mut experiment = Experiment::new(scenario, base_options(&stats, &trace)).unwrap();
    experiment.run().unwrap();

    // Pooling parks both replicas on one node and powers the other down:
    // v({0,1}) = (10 - 0.025) * 100 = 997.5 against 2 * 498.5 alone, and the
    // symmetric Shapley division gives 498.75 to each provider.
    let trace_rows = read_rows(&trace);
    assert_eq!(trace_rows.len(), 2);
    assert!(trace_rows[1].contains("\"{{0,1}}\""));

    let rows = read_rows(&stats);
    let row = &rows[1];
    for fp in 0..2 {
        let coal = field(row, 3 + 3 * fp);
        let alone = field(row, 4 + 3 * fp);
        assert!((coal - 498.75).abs() < 1e-9);
        assert!((alone - 498.5).abs() < 1e-9);
        assert!(coal > alone);
    }

    fs::remove_file(&stats).ok();
    fs::remove_file(&trace).ok();
}

#[test]
fn test_infeasible_coalitions_do_not_crash_the_simulation() {
    let scenario = Scenario::from_file(name_wrapper("infeasible.scn")).unwrap();
    let stats = temp_path("infeasible-stats.csv");
    let trace = temp_path("infeasible-trace.csv");
    let mut experiment = Experiment::new(scenario, base_options(&stats, &trace)).unwrap();
    experiment.run().unwrap();
    assert_eq!(experiment.num_replications(), 1);

    // Every coalition is unserveable, so no partition is stable and the
    // sentinel profits reach the output as NaN.
    let rows = read_rows(&stats);
    assert_eq!(rows.len(), 2);
    assert!(rows[1].contains("nan"));
    let trace_rows = read_rows(&trace);
    assert!(trace_rows[1].contains("\"{}\""));

    fs::remove_file(&stats).ok();
    fs::remove_file(&trace).ok();
}

#[test]
fn test_burst_driven_resizing() {
    let scenario = Scenario::from_file(name_wrapper("bursty.scn")).unwrap();
    let stats = temp_path("bursty-stats.csv");
    let trace = temp_path("bursty-trace.csv");
    let mut experiment = Experiment::new(scenario, base_options(&stats, &trace)).unwrap();
    experiment.run().unwrap();

    // The trigger sees the peak rate 9 of the second burst, which needs two
    // replicas under the 0.2s bound; the host runs at full load and the
    // interval profit drops to (5 - 0.02) * 100 = 498.
    let rows = read_rows(&stats);
    let row = &rows[1];
    assert!((field(row, 3) - 498.0).abs() < 1e-9);

    fs::remove_file(&stats).ok();
    fs::remove_file(&trace).ok();
}

#[test]
fn test_ci_stopping_on_deterministic_scenario() {
    let scenario = Scenario::from_file(name_wrapper("single_fp.scn")).unwrap();
    let stats = temp_path("ci-stats.csv");
    let trace = temp_path("ci-trace.csv");
    let mut options = base_options(&stats, &trace);
    // Unlimited replications: the run must stop on interval precision alone.
    options.sim_max_num_replications = 0;
    let mut experiment = Experiment::new(scenario, options).unwrap();
    experiment.run().unwrap();

    // Identical replications give a zero-width interval as soon as two
    // observations are in.
    assert_eq!(experiment.num_replications(), 2);

    fs::remove_file(&stats).ok();
    fs::remove_file(&trace).ok();
}

#[test]
fn test_same_seed_reproduces_output_files() {
    let run = |tag: &str| -> (String, String) {
        let scenario = Scenario::from_file(name_wrapper("two_fps.scn")).unwrap();
        let stats = temp_path(&format!("det-stats-{}.csv", tag));
        let trace = temp_path(&format!("det-trace-{}.csv", tag));
        let mut options = base_options(&stats, &trace);
        options.sim_max_num_replications = 3;
        options.sim_max_replication_duration = 300.0;
        let mut experiment = Experiment::new(scenario, options).unwrap();
        experiment.run().unwrap();
        (stats, trace)
    };

    let (stats_a, trace_a) = run("a");
    let (stats_b, trace_b) = run("b");
    assert_eq!(
        fs::read(&stats_a).unwrap(),
        fs::read(&stats_b).unwrap(),
        "stats files must be byte-identical for equal seeds"
    );
    assert_eq!(
        fs::read(&trace_a).unwrap(),
        fs::read(&trace_b).unwrap(),
        "trace files must be byte-identical for equal seeds"
    );

    for path in [stats_a, trace_a, stats_b, trace_b] {
        fs::remove_file(&path).ok();
    }
}

#[test]
fn test_all_best_partitions_are_traced() {
    let scenario = Scenario::from_file(name_wrapper("single_fp.scn")).unwrap();
    let stats = temp_path("all-stats.csv");
    let trace = temp_path("all-trace.csv");
    let mut options = base_options(&stats, &trace);
    options.find_all_best_partitions = true;
    let mut experiment = Experiment::new(scenario, options).unwrap();
    experiment.run().unwrap();

    // A single provider has exactly one partition, so exactly one trace row
    // per trigger either way.
    let trace_rows = read_rows(&trace);
    assert_eq!(trace_rows.len(), 2);
    assert!(trace_rows[1].contains("\"{{0}}\""));

    fs::remove_file(&stats).ok();
    fs::remove_file(&trace).ok();
}
