//! The main control loop: encoder -> frequency -> blink -> report gate.

use core::fmt;

use crate::blink::{
    BlinkConfig, BlinkDriver, BlinkMode, BlinkTick, DEFAULT_CARRIER_HZ, DEFAULT_DUTY_PCT,
    DEFAULT_SOFT_ENTER_HZ, DEFAULT_SOFT_EXIT_HZ, SoftBlinkState, WriteFailure,
};
use crate::device::{Clock, EncoderSource, PulseDriver, SampleEngine, ShutdownFlag, StatusSink};
use crate::frequency::{ClampEdge, FrequencyController, MAX_HZ};
use crate::report::{DEFAULT_REPORT_PERIOD_MS, ReportCycle, ReportOutcome};

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlConfig {
    pub carrier_hz: u32,
    pub soft_enter_hz: u32,
    pub soft_exit_hz: u32,
    pub duty_pct: u8,
    pub report_period_ms: u64,
    /// Sleep after each iteration; 0 keeps the loop a tight poll.
    pub idle_sleep_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            carrier_hz: DEFAULT_CARRIER_HZ,
            soft_enter_hz: DEFAULT_SOFT_ENTER_HZ,
            soft_exit_hz: DEFAULT_SOFT_EXIT_HZ,
            duty_pct: DEFAULT_DUTY_PCT,
            report_period_ms: DEFAULT_REPORT_PERIOD_MS,
            idle_sleep_ms: 0,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The hysteresis band is empty or inverted.
    InvertedBand { enter_hz: u32, exit_hz: u32 },
    ExitAboveMax(u32),
    ZeroCarrier,
    DutyOutOfRange(u8),
    ZeroReportPeriod,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvertedBand { enter_hz, exit_hz } => write!(
                f,
                "soft enter threshold {enter_hz} Hz must be below exit threshold {exit_hz} Hz"
            ),
            ConfigError::ExitAboveMax(hz) => {
                write!(f, "soft exit threshold {hz} Hz exceeds {MAX_HZ} Hz")
            }
            ConfigError::ZeroCarrier => f.write_str("carrier frequency must be non-zero"),
            ConfigError::DutyOutOfRange(pct) => write!(f, "duty {pct}% is outside 1..=100"),
            ConfigError::ZeroReportPeriod => f.write_str("report period must be non-zero"),
        }
    }
}

impl core::error::Error for ConfigError {}

impl ControlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.soft_enter_hz >= self.soft_exit_hz {
            return Err(ConfigError::InvertedBand {
                enter_hz: self.soft_enter_hz,
                exit_hz: self.soft_exit_hz,
            });
        }
        if self.soft_exit_hz > MAX_HZ {
            return Err(ConfigError::ExitAboveMax(self.soft_exit_hz));
        }
        if self.carrier_hz == 0 {
            return Err(ConfigError::ZeroCarrier);
        }
        if self.duty_pct == 0 || self.duty_pct > 100 {
            return Err(ConfigError::DutyOutOfRange(self.duty_pct));
        }
        if self.report_period_ms == 0 {
            return Err(ConfigError::ZeroReportPeriod);
        }
        Ok(())
    }

    pub const fn blink(&self) -> BlinkConfig {
        BlinkConfig::new(
            self.carrier_hz,
            self.soft_enter_hz,
            self.soft_exit_hz,
            self.duty_pct,
        )
    }
}

/// Everything the loop drives or reads. Owned by the loop while it runs.
pub struct Devices<C, E, P, S, L, R> {
    pub clock: C,
    pub encoder: E,
    pub pulse: P,
    pub engine: S,
    pub local: L,
    pub remote: R,
}

/// Record of one loop iteration, handed to the caller for logging.
#[derive(Debug)]
pub struct Step<PE, LE, RE> {
    pub now_ms: u64,
    pub target_hz: u32,
    pub clamped: Option<ClampEdge>,
    pub blink: Result<BlinkTick, WriteFailure<PE>>,
    pub report: ReportOutcome<LE, RE>,
}

pub struct ControlLoop<C, E, P, S, L, R> {
    cfg: ControlConfig,
    frequency: FrequencyController,
    blink: BlinkDriver,
    report: ReportCycle,
    target_hz: u32,
    dev: Devices<C, E, P, S, L, R>,
}

impl<C, E, P, S, L, R> ControlLoop<C, E, P, S, L, R>
where
    C: Clock,
    E: EncoderSource,
    P: PulseDriver,
    S: SampleEngine,
    L: StatusSink,
    R: StatusSink,
{
    pub fn new(cfg: ControlConfig, dev: Devices<C, E, P, S, L, R>) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let started = dev.clock.now_ms();
        Ok(Self {
            cfg,
            frequency: FrequencyController::new(),
            blink: BlinkDriver::new(cfg.blink()),
            report: ReportCycle::new(cfg.report_period_ms, started),
            target_hz: 0,
            dev,
        })
    }

    pub fn target_hz(&self) -> u32 {
        self.target_hz
    }

    pub fn mode(&self) -> BlinkMode {
        self.blink.mode()
    }

    pub fn soft_state(&self) -> Option<SoftBlinkState> {
        self.blink.soft_state()
    }

    pub fn devices(&self) -> &Devices<C, E, P, S, L, R> {
        &self.dev
    }

    pub fn into_devices(self) -> Devices<C, E, P, S, L, R> {
        self.dev
    }

    /// One pass: encoder -> frequency -> blink -> report gate.
    pub fn step(&mut self) -> Step<P::Error, L::Error, R::Error> {
        let now_ms = self.dev.clock.now_ms();

        let freq = self.frequency.update(&self.dev.encoder);
        self.target_hz = freq.target_hz;

        let blink = if freq.force_soft_off {
            self.blink
                .force_soft_off(freq.target_hz, now_ms, &mut self.dev.pulse)
        } else {
            self.blink.update(freq.target_hz, now_ms, &mut self.dev.pulse)
        };

        let report = self.report.run(
            now_ms,
            self.target_hz,
            &self.dev.engine,
            &mut self.dev.local,
            &mut self.dev.remote,
        );

        Step {
            now_ms,
            target_hz: freq.target_hz,
            clamped: freq.clamped,
            blink,
            report,
        }
    }

    /// Repeat `step` until `shutdown` is observed. Returns the iteration count.
    pub fn run<F>(&mut self, shutdown: &ShutdownFlag, mut observe: F) -> u64
    where
        F: FnMut(&Step<P::Error, L::Error, R::Error>),
    {
        let mut iterations = 0u64;
        while !shutdown.is_requested() {
            if iterations > 0 && self.cfg.idle_sleep_ms > 0 {
                self.dev.clock.sleep_ms(self.cfg.idle_sleep_ms);
            }
            let step = self.step();
            iterations += 1;
            observe(&step);
        }
        iterations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blink::PulseSetting;
    use crate::device::{RotationCount, WindowSummary};
    use crate::report::StatusSnapshot;
    use alloc::vec::Vec;
    use core::cell::Cell;

    /// Advances by `tick_ms` on every read.
    struct SteppingClock {
        now: Cell<u64>,
        tick_ms: u64,
        slept: Cell<u64>,
    }

    impl SteppingClock {
        fn new(start: u64, tick_ms: u64) -> Self {
            Self {
                now: Cell::new(start),
                tick_ms,
                slept: Cell::new(0),
            }
        }
    }

    impl Clock for SteppingClock {
        fn now_ms(&self) -> u64 {
            let now = self.now.get();
            self.now.set(now + self.tick_ms);
            now
        }

        fn sleep_ms(&self, duration_ms: u64) {
            self.slept.set(self.slept.get() + duration_ms);
            self.now.set(self.now.get() + duration_ms);
        }
    }

    #[derive(Default)]
    struct RecordingPulse {
        writes: Vec<PulseSetting>,
        fail_next: bool,
    }

    impl PulseDriver for RecordingPulse {
        type Error = ();

        fn set_frequency(&mut self, hz: u32, duty_pct: u8) -> Result<(), ()> {
            self.writes.push(PulseSetting { hz, duty_pct });
            if core::mem::take(&mut self.fail_next) {
                return Err(());
            }
            Ok(())
        }

        fn enable(&mut self) -> Result<(), ()> {
            Ok(())
        }

        fn disable(&mut self) -> Result<(), ()> {
            Ok(())
        }
    }

    /// One sample per rotation, so every due report publishes.
    struct SteadyEngine;

    impl SampleEngine for SteadyEngine {
        fn rotate_window(&self) -> WindowSummary {
            WindowSummary::default()
        }

        fn history(&self) -> Vec<f64> {
            alloc::vec![1.25]
        }

        fn history_len(&self) -> usize {
            1
        }

        fn dip_count(&self) -> u32 {
            0
        }

        fn total_samples(&self) -> u64 {
            0
        }
    }

    #[derive(Default)]
    struct CountingSink {
        published: u32,
        last_hz: Option<u32>,
    }

    impl StatusSink for CountingSink {
        type Error = ();

        fn publish(&mut self, snapshot: &StatusSnapshot) -> Result<(), ()> {
            self.published += 1;
            self.last_hz = Some(snapshot.led_hz);
            Ok(())
        }
    }

    type TestLoop<'a> = ControlLoop<
        SteppingClock,
        &'a RotationCount,
        RecordingPulse,
        SteadyEngine,
        CountingSink,
        CountingSink,
    >;

    fn control_loop(count: &RotationCount, start_ms: u64, tick_ms: u64) -> TestLoop<'_> {
        ControlLoop::new(
            ControlConfig::default(),
            Devices {
                clock: SteppingClock::new(start_ms, tick_ms),
                encoder: count,
                pulse: RecordingPulse::default(),
                engine: SteadyEngine,
                local: CountingSink::default(),
                remote: CountingSink::default(),
            },
        )
        .unwrap()
    }

    fn last_write(lp: &TestLoop<'_>) -> Option<PulseSetting> {
        lp.devices().pulse.writes.last().copied()
    }

    #[test]
    fn config_validation() {
        assert!(ControlConfig::default().validate().is_ok());
        let bad = ControlConfig {
            soft_enter_hz: 5,
            soft_exit_hz: 5,
            ..ControlConfig::default()
        };
        assert_eq!(
            bad.validate(),
            Err(ConfigError::InvertedBand {
                enter_hz: 5,
                exit_hz: 5
            })
        );
        let bad = ControlConfig {
            soft_exit_hz: 501,
            ..ControlConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::ExitAboveMax(501)));
        let bad = ControlConfig {
            duty_pct: 101,
            ..ControlConfig::default()
        };
        assert_eq!(bad.validate(), Err(ConfigError::DutyOutOfRange(101)));
    }

    #[test]
    fn rest_position_programs_hardware_then_floor_forces_soft_off() {
        let count = RotationCount::new(0);
        let mut lp = control_loop(&count, 0, 1);

        let step = lp.step();
        assert_eq!(step.target_hz, 10);
        assert_eq!(lp.mode(), BlinkMode::Hardware);
        assert_eq!(
            last_write(&lp),
            Some(PulseSetting {
                hz: 10,
                duty_pct: 50
            })
        );

        count.reset_count(-44);
        let step = lp.step();
        assert_eq!(step.target_hz, 0);
        assert_eq!(step.clamped, Some(ClampEdge::Floor));
        assert_eq!(count.count(), -40);
        assert_eq!(lp.mode(), BlinkMode::Soft);
        assert!(!lp.soft_state().unwrap().phase_on);
        assert_eq!(
            last_write(&lp),
            Some(PulseSetting {
                hz: 100,
                duty_pct: 0
            })
        );

        // Steady off on every later cycle.
        for _ in 0..2_000 {
            lp.step();
            assert_eq!(last_write(&lp).unwrap().duty_pct, 0);
            assert!(!lp.soft_state().unwrap().phase_on);
        }
    }

    #[test]
    fn dropping_to_three_hz_schedules_first_soft_toggle() {
        let count = RotationCount::new(0);
        let mut lp = control_loop(&count, 1_000, 0);
        lp.step();
        assert_eq!(lp.mode(), BlinkMode::Hardware);

        count.reset_count(-28);
        let step = lp.step();
        assert_eq!(step.target_hz, 3);
        assert_eq!(lp.mode(), BlinkMode::Soft);
        let soft = lp.soft_state().unwrap();
        assert!(!soft.phase_on);
        assert_eq!(soft.next_toggle_ms, 1_000 + 166);
    }

    #[test]
    fn failed_write_keeps_state_and_next_change_writes() {
        let count = RotationCount::new(40);
        let mut lp = control_loop(&count, 0, 1);
        lp.dev.pulse.fail_next = true;

        let step = lp.step();
        assert!(step.blink.is_err());
        assert_eq!(lp.target_hz(), 20);
        assert_eq!(lp.mode(), BlinkMode::Hardware);
        let attempts = lp.devices().pulse.writes.len();

        lp.step();
        assert_eq!(lp.devices().pulse.writes.len(), attempts);

        count.add(4);
        let step = lp.step();
        assert!(step.blink.is_ok());
        assert_eq!(
            last_write(&lp),
            Some(PulseSetting {
                hz: 21,
                duty_pct: 50
            })
        );
    }

    #[test]
    fn run_stops_after_shutdown_and_reports_each_second() {
        let count = RotationCount::new(0);
        let mut lp = control_loop(&count, 0, 3);
        let shutdown = ShutdownFlag::new();

        let mut published = 0;
        let iterations = lp.run(&shutdown, |step| {
            if step.report.is_published() {
                published += 1;
            }
            if step.now_ms >= 5_100 {
                shutdown.request();
            }
        });

        assert_eq!(published, 5);
        assert_eq!(iterations, 1_700);
        let dev = lp.into_devices();
        assert_eq!(dev.local.published, 5);
        assert_eq!(dev.remote.published, 5);
        assert_eq!(dev.remote.last_hz, Some(10));
        assert_eq!(dev.clock.slept.get(), 0);
    }

    #[test]
    fn run_with_shutdown_already_requested_touches_nothing() {
        let count = RotationCount::new(0);
        let mut lp = control_loop(&count, 0, 1);
        let shutdown = ShutdownFlag::new();
        shutdown.request();

        let mut observed = 0;
        let iterations = lp.run(&shutdown, |_| observed += 1);
        assert_eq!(iterations, 0);
        assert_eq!(observed, 0);
        let dev = lp.into_devices();
        assert!(dev.pulse.writes.is_empty());
        assert_eq!(dev.local.published, 0);
    }

    #[test]
    fn idle_sleep_is_applied_between_iterations() {
        let count = RotationCount::new(0);
        let shutdown = ShutdownFlag::new();
        let mut lp = ControlLoop::new(
            ControlConfig {
                idle_sleep_ms: 2,
                ..ControlConfig::default()
            },
            Devices {
                clock: SteppingClock::new(0, 0),
                encoder: &count,
                pulse: RecordingPulse::default(),
                engine: SteadyEngine,
                local: CountingSink::default(),
                remote: CountingSink::default(),
            },
        )
        .unwrap();

        let mut seen = 0;
        let iterations = lp.run(&shutdown, |_| {
            seen += 1;
            if seen == 10 {
                shutdown.request();
            }
        });
        assert_eq!(iterations, 10);
        assert_eq!(lp.devices().clock.slept.get(), 18);
    }
}
