//! # Integration tests: bundled scenarios
//!
//! Runs the scenario files shipped with the crate end to end through the
//! medium and checks the reports.

use std::path::PathBuf;

use airlink_mac::PeerAddress;
use airlink_sim::{Report, Scenario, Simulation};

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn scenario_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("scenarios")
        .join(name)
}

fn run(name: &str) -> Report {
    let scenario = Scenario::load(&scenario_path(name)).unwrap();
    Simulation::new(&scenario).run()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[test]
fn bundled_scenarios_load() {
    for name in [
        "pair_stop_and_wait.toml",
        "block_ack_aggregation.toml",
        "hidden_mimo.toml",
    ] {
        let scenario = Scenario::load(&scenario_path(name))
            .unwrap_or_else(|e| panic!("{name}: {e:#}"));
        assert!(!scenario.stations.is_empty(), "{name}");
    }
}

#[test]
fn same_seed_gives_identical_report() {
    let first = run("pair_stop_and_wait.toml").to_json().unwrap();
    let second = run("pair_stop_and_wait.toml").to_json().unwrap();
    assert_eq!(first, second);
}

#[test]
fn stop_and_wait_pair_delivers() {
    let report = run("pair_stop_and_wait.toml");
    let sender = report.station(PeerAddress(1)).unwrap();
    let receiver = report.station(PeerAddress(2)).unwrap();

    // one frame every 2 ms, both ends of the run included
    assert!((100..=101).contains(&sender.generated), "generated {}", sender.generated);
    assert!(receiver.delivered_frames > 50, "delivered {}", receiver.delivered_frames);
    assert!(receiver.delivered_frames <= sender.generated);
    assert_eq!(receiver.delivered_bytes, receiver.delivered_frames * 1500);
    assert!(receiver.throughput_mbps > 0.0);
    assert!(sender.mac.confirmed <= receiver.delivered_frames);
}

#[test]
fn aggregation_builds_trains() {
    let report = run("block_ack_aggregation.toml");
    let sender = report.station(PeerAddress(1)).unwrap();
    let receiver = report.station(PeerAddress(2)).unwrap();

    let aggregation = sender.mac.aggregation.as_ref().unwrap();
    assert!(aggregation.trains > 0);
    assert!(aggregation.frames > aggregation.trains);
    assert!(receiver.delivered_frames > 0);
    assert!(receiver.delivered_frames <= sender.generated - sender.refused);
}

#[test]
fn hidden_senders_collide() {
    let report = run("hidden_mimo.toml");
    assert!(report.medium.overlaps > 0);

    let receiver = report.station(PeerAddress(3)).unwrap();
    assert!(receiver.delivered_frames > 0);
    assert!(report.total_delivered() >= receiver.delivered_frames);
}

#[test]
fn short_run_reports_every_station() {
    let mut scenario = Scenario::load(&scenario_path("pair_stop_and_wait.toml")).unwrap();
    scenario.duration = std::time::Duration::from_millis(20);
    let report = Simulation::new(&scenario).run();
    assert_eq!(report.duration_ms, 20);
    assert_eq!(report.stations.len(), 2);
    assert!(report.events > 0);
}
