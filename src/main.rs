//! BMS core — simulation entry point.
//!
//! Wires [`Core`] to the simulated plant adapter and the periodic driver,
//! and runs a bounded simulation rather than the real firmware's
//! never-returning task loop (no hardware target is in scope here, §1).
#![deny(unused_must_use)]

use anyhow::Result;
use log::info;

use bms_core::adapters::hardware::SimulatedPlant;
use bms_core::adapters::log_sink::{LogDiagnosticsSink, LogEventSink};
use bms_core::adapters::nvs::NvsAdapter;
use bms_core::adapters::time::SystemClock;
use bms_core::app::commands::CoreCommand;
use bms_core::app::service::Core;
use bms_core::clock::TickSource;
use bms_core::config::BmsConfig;
use bms_core::measurement::ContactorState;
use bms_core::nvm::StorageBackend;
use bms_core::pack::PackRequest;
use bms_core::scheduler::PeriodicDriver;

/// A minimal `log::Log` implementation for host-side simulation; the real
/// firmware wires `log` to the UART/USB-CDC console through an ESP-IDF
/// logger instead (out of scope here, same as the hardware adapters).
struct StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }
    fn log(&self, record: &log::Record) {
        eprintln!("[{:<5}] {}", record.level(), record.args());
    }
    fn flush(&self) {}
}

static LOGGER: StderrLogger = StderrLogger;

fn main() -> Result<()> {
    log::set_logger(&LOGGER).map_err(|e| anyhow::anyhow!("logger init failed: {e}"))?;
    log::set_max_level(log::LevelFilter::Info);

    info!("bms-core simulation starting");

    let config = BmsConfig::default();
    config.validate().map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    let mut nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {e}"))?;
    let mut core = Core::new(config);
    let mut diag_sink = LogDiagnosticsSink;
    let mut event_sink = LogEventSink;

    core.restore_from_nvm(&nvs, 0, &mut diag_sink);

    let plant = SimulatedPlant::new();
    let clock = SystemClock::new();
    let mut contactors = ContactorState::default();

    let boot_measurements = plant.measure(clock.now_ms());
    core.initialize_soc(&boot_measurements, clock.now_ms());

    core.issue_command(CoreCommand::Pack(PackRequest::Init), &mut diag_sink, clock.now_ms());
    core.issue_command(CoreCommand::Pack(PackRequest::Normal), &mut diag_sink, clock.now_ms());

    let mut driver = PeriodicDriver::new(&config.task_health);

    // Run for a few seconds of simulated time, logging telemetry every
    // second, then exit — a bounded run in place of the firmware's
    // never-returning task loop.
    let run_for_ms: u32 = 5_000;
    let mut last_telemetry_ms: u32 = 0;

    bms_core::scheduler::run_forever(
        &mut driver,
        &mut core,
        &clock,
        &plant,
        &mut contactors,
        &mut nvs as &mut dyn StorageBackend,
        &mut diag_sink,
        &mut event_sink,
        |now_ms| {
            if now_ms.wrapping_sub(last_telemetry_ms) >= 1_000 {
                last_telemetry_ms = now_ms;
                let t = core.telemetry();
                info!(
                    "telemetry | phase={:?} strings={} balancing={} soc_avg={:?}",
                    t.pack_phase, t.connected_strings, t.balancing_active, t.soc_avg_perc
                );
            }
            now_ms >= run_for_ms
        },
    );

    info!("bms-core simulation finished");
    Ok(())
}
