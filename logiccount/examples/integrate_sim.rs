//! End-to-end run against the scripted simulator: declare a run, configure a
//! session, integrate with a couple of latch events in the script, and print
//! the status report and totals.

use std::collections::HashMap;
use std::time::Duration;

use logiccount::integrate::{IntegrationConfig, Integrator};
use logiccount::sample::SampleReader;
use logiccount::session::{DeviceSession, DEFAULT_DELAY_NS, DEFAULT_THRESHOLD_V};
use logiccount::sim::{SimDriver, SimSlice};
use logictools::{bit, cfg};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let run: cfg::Run = serde_json::from_str(
        r#"{
            "name": "simulated bell pairs",
            "timestamp": null,
            "duration": null,
            "integration_window": "1s",
            "timeslice": "100ms",
            "coincidence_window_ns": 2.0,
            "singles": [
                {"channel": 1},
                {"channel": 2}
            ],
            "coincidences": [
                {"channels": [1, 2]}
            ],
            "antilatch": {
                "retry_threshold": 5,
                "cooldown": "2s",
                "retry_backoff": "200ms"
            }
        }"#,
    )?;

    let ch1 = bit::chan_to_mask(1)?;
    let ch2 = bit::chan_to_mask(2)?;
    let pair = ch1 | ch2;

    // 250 ms of hardware time per slice; two slices latch along the way
    let ticks = 50_000_000u64;
    let good = || {
        SimSlice::idle(ticks)
            .count(ch1, 0, 1100)
            .count(ch2, 0, 900)
            .count(pair, 0, 70)
    };
    let bad = SimSlice::idle(ticks).count(ch2, 0, 900);
    let script = vec![
        SimSlice::idle(0),
        SimSlice::idle(0),
        good(),
        bad.clone(),
        SimSlice::idle(0),
        good(),
        bad,
        SimSlice::idle(0),
        good(),
    ];

    let mut session = DeviceSession::open(SimDriver::new(5e-9, 16, script))?;
    run.validate(session.total_channels())?;
    session.set_delays(&HashMap::new(), DEFAULT_DELAY_NS)?;
    session.set_all_thresholds(DEFAULT_THRESHOLD_V)?;
    session.enable_logic_mode()?;
    session.set_coincidence_window(run.coincidence_window_ns)?;
    session.set_integration_window(run.integration_window);
    println!("{}", session.status_report());

    let reader = SampleReader::from_run(&run)?;
    let mut cfg = IntegrationConfig::from(&run);
    cfg.timeslice = Duration::from_millis(10); // no need to dawdle in a demo
    cfg.retry_backoff = Duration::from_millis(10);
    let mut integrator = Integrator::new(
        cfg,
        Box::new(|| println!("pulsing the detector reset line")),
    );

    let totals = integrator.run(&mut session, &reader)?;

    // Record the run the way it was declared
    let mut record = cfg::Run {
        timestamp: Some(chrono::Local::now()),
        duration: Some(totals.elapsed),
        singles: Vec::new(),
        coincidences: Vec::new(),
        ..run
    };
    record.singles = vec![
        cfg::Single::ChannelCounts((1, totals.singles[0])),
        cfg::Single::ChannelCounts((2, totals.singles[1])),
    ];
    record.coincidences = vec![cfg::Coincidence::ChannelsCounts((
        vec![1, 2],
        vec![],
        totals.coincidences[0],
    ))];
    println!("{}", serde_json::to_string_pretty(&record)?);

    Ok(())
}
