use anyhow::{Context, Result};
use fs2::FileExt;
use lightdip_control::{
    ControlLoop, Devices, EngineCommands, PulseDriver, ReportOutcome, RotationCount, ShutdownFlag,
    Step,
};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::MonotonicClock;
use crate::config::Config;
use crate::display::ConsoleDisplay;
use crate::hw::HwError;
use crate::hw::adc::Mcp3208;
use crate::hw::encoder::Encoder;
use crate::hw::pwm::SysfsPwm;
use crate::sampler::Sampler;
use crate::services::Services;
use crate::telemetry::{TelemetryError, UdpTelemetry};

type DaemonStep = Step<HwError, io::Error, TelemetryError>;

/// Bring the board up, run the control loop until stopped, tear down.
pub fn run(cfg: &Config) -> Result<()> {
    let _lock = acquire_lock(&cfg.daemon.lock_path)?;
    let clock = MonotonicClock::new();
    let shutdown = Arc::new(ShutdownFlag::new());
    let sampler = Arc::new(Sampler::new(cfg.window()));

    // SIGINT is watched before any device is touched.
    let services = Services::start(
        cfg.net.command_bind,
        EngineCommands::new(sampler.clone(), shutdown.clone()),
        shutdown.clone(),
    )?;
    if services.command_addr().is_none() {
        warn!("running without the command channel");
    }

    let mut pwm = SysfsPwm::open(&cfg.pwm.path).context("open LED PWM")?;
    let encoder = Encoder::open(&cfg.encoder).context("open rotary encoder")?;

    let adc = Mcp3208::open(&cfg.adc).context("open light sensor ADC")?;
    let sampling = Sampler::spawn(
        &sampler,
        adc,
        clock,
        Duration::from_micros(cfg.adc.sample_interval_us),
    )?;

    let rotation = Arc::new(RotationCount::new(0));
    let knob = encoder.spawn(rotation.clone())?;

    if shutdown.is_requested() {
        info!("stop requested during start-up, LED left disabled");
    } else {
        pwm.enable().context("enable LED PWM")?;
    }

    let telemetry = match UdpTelemetry::connect(cfg.net.telemetry_target, clock) {
        Ok(t) => {
            info!(dest = %t.target(), "sending status frames");
            Some(t)
        }
        Err(e) => {
            warn!(dest = %cfg.net.telemetry_target, "telemetry disabled: {e}");
            None
        }
    };

    let devices = Devices {
        clock,
        encoder: rotation,
        pulse: pwm,
        engine: sampler,
        local: ConsoleDisplay::stdout(),
        remote: telemetry,
    };
    let mut control = ControlLoop::new(cfg.control(), devices).context("control settings")?;
    info!("control loop running");

    let mut log = StepLog::default();
    let iterations = control.run(&shutdown, |step| log.observe(step));
    info!(iterations, "control loop stopped");

    let Devices {
        mut pulse, remote, ..
    } = control.into_devices();
    drop(remote);
    services.stop();
    if let Err(e) = pulse.disable() {
        warn!("disable LED PWM: {e}");
    }
    knob.stop();
    sampling.stop();
    Ok(())
}

fn acquire_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    file.try_lock_exclusive()
        .with_context(|| format!("another instance holds {}", path.display()))?;
    Ok(file)
}

/// Turns per-iteration results into log lines, reporting a persistent
/// failure once and its recovery once.
#[derive(Debug, Default)]
struct StepLog {
    led_failing: bool,
    console_failing: bool,
    telemetry_failing: bool,
}

impl StepLog {
    fn observe(&mut self, step: &DaemonStep) {
        if let Some(edge) = step.clamped {
            debug!(?edge, hz = step.target_hz, "knob clamped");
        }

        match &step.blink {
            Ok(tick) => {
                if let Some(t) = tick.transition {
                    info!(from = ?t.from, to = ?t.to, hz = step.target_hz, "blink mode changed");
                }
                if tick.programmed.is_some() && self.led_failing {
                    info!("LED writes recovered");
                    self.led_failing = false;
                }
            }
            Err(f) => {
                if let Some(t) = f.transition {
                    info!(from = ?t.from, to = ?t.to, hz = step.target_hz, "blink mode changed");
                }
                if !self.led_failing {
                    warn!(
                        hz = f.setting.hz,
                        duty_pct = f.setting.duty_pct,
                        mode = ?f.mode,
                        "LED write failed: {}",
                        f.error
                    );
                    self.led_failing = true;
                }
            }
        }

        match &step.report {
            ReportOutcome::NotDue => {}
            ReportOutcome::EmptyWindow => debug!("no samples in the last window"),
            ReportOutcome::Published(d) => {
                note(&mut self.console_failing, "console", &d.local);
                note(&mut self.telemetry_failing, "telemetry", &d.remote);
            }
        }
    }
}

fn note<E: std::fmt::Display>(failing: &mut bool, sink: &str, result: &Result<(), E>) {
    match result {
        Ok(()) if *failing => {
            debug!(sink, "status sink recovered");
            *failing = false;
        }
        Ok(()) => {}
        Err(e) if !*failing => {
            warn!(sink, "status publish failed: {e}");
            *failing = true;
        }
        Err(_) => {}
    }
}
