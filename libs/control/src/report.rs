//! Once-per-second status snapshot and its delivery to two sinks.

use alloc::vec::Vec;

use crate::device::{SampleEngine, StatusSink};

pub const DEFAULT_REPORT_PERIOD_MS: u64 = 1_000;

/// Inter-sample timing for one closed window.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PeriodStats {
    pub min_period_ms: f64,
    pub max_period_ms: f64,
    pub avg_period_ms: f64,
    /// Number of periods measured (samples - 1).
    pub periods: u32,
}

/// Immutable per-report view handed to every sink.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusSnapshot {
    pub samples_in_window: usize,
    pub led_hz: u32,
    pub avg_light: f64,
    pub dips_in_window: u32,
    pub jitter: Option<PeriodStats>,
    pub history: Vec<f64>,
}

impl StatusSnapshot {
    /// Build from the closed window's owned sample copy. `None` when empty.
    pub fn from_window(
        history: Vec<f64>,
        led_hz: u32,
        dips_in_window: u32,
        jitter: Option<PeriodStats>,
    ) -> Option<Self> {
        if history.is_empty() {
            return None;
        }
        let avg_light = history.iter().sum::<f64>() / history.len() as f64;
        Some(Self {
            samples_in_window: history.len(),
            led_hz,
            avg_light,
            dips_in_window,
            jitter,
            history,
        })
    }
}

/// Per-sink delivery result for one published snapshot.
#[derive(Debug)]
pub struct Delivery<LE, RE> {
    pub samples: usize,
    pub local: Result<(), LE>,
    pub remote: Result<(), RE>,
}

#[derive(Debug)]
pub enum ReportOutcome<LE, RE> {
    NotDue,
    /// Window rotated but held no samples; nothing was published.
    EmptyWindow,
    Published(Delivery<LE, RE>),
}

impl<LE, RE> ReportOutcome<LE, RE> {
    pub fn is_published(&self) -> bool {
        matches!(self, ReportOutcome::Published(_))
    }
}

/// Elapsed-time gate that owns window rotation.
#[derive(Clone, Copy, Debug)]
pub struct ReportCycle {
    period_ms: u64,
    last_report_ms: u64,
}

impl ReportCycle {
    pub const fn new(period_ms: u64, now_ms: u64) -> Self {
        Self {
            period_ms,
            last_report_ms: now_ms,
        }
    }

    pub const fn last_report_ms(&self) -> u64 {
        self.last_report_ms
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_report_ms) >= self.period_ms
    }

    pub fn run<S, L, R>(
        &mut self,
        now_ms: u64,
        led_hz: u32,
        engine: &S,
        local: &mut L,
        remote: &mut R,
    ) -> ReportOutcome<L::Error, R::Error>
    where
        S: SampleEngine + ?Sized,
        L: StatusSink + ?Sized,
        R: StatusSink + ?Sized,
    {
        if !self.is_due(now_ms) {
            return ReportOutcome::NotDue;
        }

        let summary = engine.rotate_window();
        let history = engine.history();
        // Restart from "now" rather than adding the period, so a slow
        // iteration shifts the cadence instead of causing a double fire.
        self.last_report_ms = now_ms;

        let Some(snapshot) =
            StatusSnapshot::from_window(history, led_hz, summary.dips, summary.stats)
        else {
            return ReportOutcome::EmptyWindow;
        };

        let local = local.publish(&snapshot);
        let remote = remote.publish(&snapshot);
        ReportOutcome::Published(Delivery {
            samples: snapshot.samples_in_window,
            local,
            remote,
        })
    }
}
