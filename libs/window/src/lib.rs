#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

use alloc::vec::Vec;
use core::fmt;

use lightdip_control::{PeriodStats, WindowSummary};

pub const DEFAULT_AVERAGE_WEIGHT: f64 = 0.999;
pub const DEFAULT_DIP_DROP_V: f64 = 0.1;
pub const DEFAULT_DIP_HYSTERESIS_V: f64 = 0.03;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowConfig {
    /// Weight of the previous average in the exponential smoothing.
    pub average_weight: f64,
    /// A reading this far below the average counts as a dip.
    pub dip_drop_v: f64,
    /// Extra rise above the dip threshold needed before the next dip can count.
    pub dip_hysteresis_v: f64,
}

impl WindowConfig {
    pub const fn new(average_weight: f64, dip_drop_v: f64, dip_hysteresis_v: f64) -> Self {
        Self {
            average_weight,
            dip_drop_v,
            dip_hysteresis_v,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WindowConfigError {
    /// Smoothing weight outside `0.0..1.0`; 1.0 would freeze the average.
    AverageWeight(f64),
    NegativeDipDrop(f64),
    NegativeHysteresis(f64),
}

impl fmt::Display for WindowConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowConfigError::AverageWeight(w) => {
                write!(f, "average weight {w} is outside 0.0..1.0")
            }
            WindowConfigError::NegativeDipDrop(v) => {
                write!(f, "dip drop {v} V must not be negative")
            }
            WindowConfigError::NegativeHysteresis(v) => {
                write!(f, "dip hysteresis {v} V must not be negative")
            }
        }
    }
}

impl core::error::Error for WindowConfigError {}

impl WindowConfig {
    pub fn validate(&self) -> Result<(), WindowConfigError> {
        if !(0.0..1.0).contains(&self.average_weight) {
            return Err(WindowConfigError::AverageWeight(self.average_weight));
        }
        if self.dip_drop_v.is_nan() || self.dip_drop_v < 0.0 {
            return Err(WindowConfigError::NegativeDipDrop(self.dip_drop_v));
        }
        if self.dip_hysteresis_v.is_nan() || self.dip_hysteresis_v < 0.0 {
            return Err(WindowConfigError::NegativeHysteresis(self.dip_hysteresis_v));
        }
        Ok(())
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_AVERAGE_WEIGHT,
            DEFAULT_DIP_DROP_V,
            DEFAULT_DIP_HYSTERESIS_V,
        )
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct PeriodAccumulator {
    min_ms: f64,
    max_ms: f64,
    sum_ms: f64,
    count: u32,
}

impl PeriodAccumulator {
    fn record(&mut self, period_ms: f64) {
        if self.count == 0 {
            self.min_ms = period_ms;
            self.max_ms = period_ms;
        } else {
            self.min_ms = self.min_ms.min(period_ms);
            self.max_ms = self.max_ms.max(period_ms);
        }
        self.sum_ms += period_ms;
        self.count += 1;
    }

    fn finish(self) -> Option<PeriodStats> {
        (self.count > 0).then(|| PeriodStats {
            min_period_ms: self.min_ms,
            max_period_ms: self.max_ms,
            avg_period_ms: self.sum_ms / self.count as f64,
            periods: self.count,
        })
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleEvent {
    pub average: f64,
    pub dip: bool,
}

/// Current accumulation window plus the last closed one.
#[derive(Clone, Debug)]
pub struct SampleWindow {
    cfg: WindowConfig,
    average: Option<f64>,
    /// Dip detector is ready to count the next drop.
    armed: bool,
    last_sample_ms: Option<f64>,
    total: u64,

    current: Vec<f64>,
    current_dips: u32,
    current_periods: PeriodAccumulator,

    history: Vec<f64>,
    history_dips: u32,
    history_stats: Option<PeriodStats>,
}

impl SampleWindow {
    pub fn new(cfg: WindowConfig) -> Self {
        Self {
            cfg,
            average: None,
            armed: true,
            last_sample_ms: None,
            total: 0,
            current: Vec::new(),
            current_dips: 0,
            current_periods: PeriodAccumulator::default(),
            history: Vec::new(),
            history_dips: 0,
            history_stats: None,
        }
    }

    /// Add one reading taken at `at_ms` on the monotonic clock.
    pub fn push(&mut self, volts: f64, at_ms: f64) -> SampleEvent {
        let average = match self.average {
            None => volts,
            Some(prev) => {
                self.cfg.average_weight * prev + (1.0 - self.cfg.average_weight) * volts
            }
        };
        self.average = Some(average);

        let threshold = average - self.cfg.dip_drop_v;
        let dip = self.armed && volts <= threshold;
        if dip {
            self.armed = false;
            self.current_dips += 1;
        } else if !self.armed && volts > threshold + self.cfg.dip_hysteresis_v {
            self.armed = true;
        }

        if let Some(prev) = self.last_sample_ms {
            self.current_periods.record(at_ms - prev);
        }
        self.last_sample_ms = Some(at_ms);

        self.current.push(volts);
        self.total += 1;
        SampleEvent { average, dip }
    }

    /// Close the current window into history and start a fresh one.
    pub fn rotate(&mut self) -> WindowSummary {
        self.history = core::mem::take(&mut self.current);
        self.history_dips = core::mem::take(&mut self.current_dips);
        self.history_stats = core::mem::take(&mut self.current_periods).finish();
        WindowSummary {
            stats: self.history_stats,
            dips: self.history_dips,
        }
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }

    pub fn history_dips(&self) -> u32 {
        self.history_dips
    }

    pub fn history_stats(&self) -> Option<PeriodStats> {
        self.history_stats
    }

    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    pub fn average(&self) -> Option<f64> {
        self.average
    }

    pub fn total_samples(&self) -> u64 {
        self.total
    }
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self::new(WindowConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(win: &mut SampleWindow, values: &[f64], start_ms: f64, step_ms: f64) -> u32 {
        let mut dips = 0;
        for (i, v) in values.iter().enumerate() {
            if win.push(*v, start_ms + i as f64 * step_ms).dip {
                dips += 1;
            }
        }
        dips
    }

    #[test]
    fn window_settings_are_range_checked() {
        assert_eq!(WindowConfig::default().validate(), Ok(()));
        assert_eq!(WindowConfig::new(0.0, 0.0, 0.0).validate(), Ok(()));
        assert_eq!(
            WindowConfig::new(1.0, 0.1, 0.03).validate(),
            Err(WindowConfigError::AverageWeight(1.0))
        );
        assert_eq!(
            WindowConfig::new(-0.5, 0.1, 0.03).validate(),
            Err(WindowConfigError::AverageWeight(-0.5))
        );
        assert!(matches!(
            WindowConfig::new(f64::NAN, 0.1, 0.03).validate(),
            Err(WindowConfigError::AverageWeight(_))
        ));
        assert_eq!(
            WindowConfig::new(0.9, -0.1, 0.03).validate(),
            Err(WindowConfigError::NegativeDipDrop(-0.1))
        );
        assert_eq!(
            WindowConfig::new(0.9, 0.1, -0.01).validate(),
            Err(WindowConfigError::NegativeHysteresis(-0.01))
        );
    }

    #[test]
    fn first_reading_seeds_average() {
        let mut win = SampleWindow::default();
        let ev = win.push(1.8, 0.0);
        assert_eq!(ev.average, 1.8);
        assert!(!ev.dip);
        let ev = win.push(0.8, 1.0);
        assert!((ev.average - (0.999 * 1.8 + 0.001 * 0.8)).abs() < 1e-12);
    }

    #[test]
    fn dip_counts_once_until_rearmed() {
        let mut win = SampleWindow::default();
        feed(&mut win, &[1.0; 20], 0.0, 1.0);

        // Drop, hover just under the re-arm level, recover, drop again.
        let dips = feed(&mut win, &[0.85, 0.88, 0.92, 0.85, 0.95, 0.85], 20.0, 1.0);
        assert_eq!(dips, 2);

        let summary = win.rotate();
        assert_eq!(summary.dips, 2);
        assert_eq!(win.history_dips(), 2);
    }

    #[test]
    fn arming_state_carries_across_windows() {
        let mut win = SampleWindow::default();
        feed(&mut win, &[1.0; 10], 0.0, 1.0);
        assert_eq!(feed(&mut win, &[0.8], 10.0, 1.0), 1);
        win.rotate();

        // Still below re-arm level: no new dip in the next window.
        assert_eq!(feed(&mut win, &[0.8, 0.8], 11.0, 1.0), 0);
        assert_eq!(feed(&mut win, &[1.0, 0.8], 13.0, 1.0), 1);
        assert_eq!(win.rotate().dips, 1);
    }

    #[test]
    fn rotate_moves_samples_and_period_stats() {
        let mut win = SampleWindow::default();
        assert_eq!(win.rotate(), WindowSummary::default());
        assert!(win.history().is_empty());

        win.push(1.0, 0.0);
        win.push(1.1, 1.0);
        win.push(1.2, 3.0);
        win.push(1.3, 3.5);
        let summary = win.rotate();
        let stats = summary.stats.unwrap();
        assert_eq!(stats.periods, 3);
        assert_eq!(stats.min_period_ms, 0.5);
        assert_eq!(stats.max_period_ms, 2.0);
        assert!((stats.avg_period_ms - 3.5 / 3.0).abs() < 1e-12);
        assert_eq!(win.history(), &[1.0, 1.1, 1.2, 1.3]);
        assert_eq!(win.current_len(), 0);

        // The gap across the rotation belongs to the new window.
        win.push(1.0, 4.5);
        let stats = win.rotate().stats.unwrap();
        assert_eq!(stats.periods, 1);
        assert_eq!(stats.max_period_ms, 1.0);
        assert_eq!(win.total_samples(), 5);
    }

    #[test]
    fn single_sample_window_has_no_stats() {
        let mut win = SampleWindow::default();
        win.push(2.0, 0.0);
        let summary = win.rotate();
        assert_eq!(summary.stats, None);
        assert_eq!(win.history(), &[2.0]);
    }
}
