//! Collaborator interfaces consumed by the control loop.
//!
//! Everything here is implemented outside this crate (sysfs PWM, GPIO encoder
//! thread, ADC sampler, UDP/console sinks) or by test fakes.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::report::{PeriodStats, StatusSnapshot};

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, duration_ms: u64);
}

/// Signed quadrature tick counter, four ticks per detent.
pub trait EncoderSource {
    fn count(&self) -> i32;

    fn reset_count(&self, value: i32);

    /// Replace the count with `new` only if it still equals `expected`.
    ///
    /// Returns `false` when a concurrent tick moved the count in between.
    fn compare_and_reset(&self, expected: i32, new: i32) -> bool;
}

/// Hardware pulse generator driving the LED.
pub trait PulseDriver {
    type Error;

    fn set_frequency(&mut self, hz: u32, duty_pct: u8) -> Result<(), Self::Error>;
    fn enable(&mut self) -> Result<(), Self::Error>;
    fn disable(&mut self) -> Result<(), Self::Error>;
}

/// What the sample engine hands back when a window is closed.
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindowSummary {
    /// Inter-sample timing for the closed window; `None` with fewer than two samples.
    pub stats: Option<PeriodStats>,
    pub dips: u32,
}

/// Light sample accumulator with a one-window history.
pub trait SampleEngine {
    /// Close the current window into history and start a new one.
    fn rotate_window(&self) -> WindowSummary;

    /// Owned copy of the closed window's samples.
    fn history(&self) -> Vec<f64>;

    fn history_len(&self) -> usize;

    /// Dips counted in the closed window.
    fn dip_count(&self) -> u32;

    fn total_samples(&self) -> u64;
}

impl<T: SampleEngine + ?Sized> SampleEngine for &T {
    fn rotate_window(&self) -> WindowSummary {
        (**self).rotate_window()
    }

    fn history(&self) -> Vec<f64> {
        (**self).history()
    }

    fn history_len(&self) -> usize {
        (**self).history_len()
    }

    fn dip_count(&self) -> u32 {
        (**self).dip_count()
    }

    fn total_samples(&self) -> u64 {
        (**self).total_samples()
    }
}

impl<T: SampleEngine + ?Sized> SampleEngine for Arc<T> {
    fn rotate_window(&self) -> WindowSummary {
        (**self).rotate_window()
    }

    fn history(&self) -> Vec<f64> {
        (**self).history()
    }

    fn history_len(&self) -> usize {
        (**self).history_len()
    }

    fn dip_count(&self) -> u32 {
        (**self).dip_count()
    }

    fn total_samples(&self) -> u64 {
        (**self).total_samples()
    }
}

/// Destination for the once-per-second status snapshot.
pub trait StatusSink {
    type Error;

    fn publish(&mut self, snapshot: &StatusSnapshot) -> Result<(), Self::Error>;
}

/// An absent sink accepts every snapshot.
impl<T: StatusSink> StatusSink for Option<T> {
    type Error = T::Error;

    fn publish(&mut self, snapshot: &StatusSnapshot) -> Result<(), T::Error> {
        match self {
            Some(sink) => sink.publish(snapshot),
            None => Ok(()),
        }
    }
}

/// Shared encoder count. The encoder thread only adds; the frequency
/// controller rewrites it with compare-and-swap.
#[derive(Debug, Default)]
pub struct RotationCount {
    ticks: AtomicI32,
}

impl RotationCount {
    pub const fn new(initial: i32) -> Self {
        Self {
            ticks: AtomicI32::new(initial),
        }
    }

    pub fn add(&self, delta: i32) {
        self.ticks.fetch_add(delta, Ordering::AcqRel);
    }
}

impl EncoderSource for RotationCount {
    fn count(&self) -> i32 {
        self.ticks.load(Ordering::Acquire)
    }

    fn reset_count(&self, value: i32) {
        self.ticks.store(value, Ordering::Release);
    }

    fn compare_and_reset(&self, expected: i32, new: i32) -> bool {
        self.ticks
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<T: EncoderSource + ?Sized> EncoderSource for Arc<T> {
    fn count(&self) -> i32 {
        (**self).count()
    }

    fn reset_count(&self, value: i32) {
        (**self).reset_count(value)
    }

    fn compare_and_reset(&self, expected: i32, new: i32) -> bool {
        (**self).compare_and_reset(expected, new)
    }
}

impl<T: EncoderSource + ?Sized> EncoderSource for &T {
    fn count(&self) -> i32 {
        (**self).count()
    }

    fn reset_count(&self, value: i32) {
        (**self).reset_count(value)
    }

    fn compare_and_reset(&self, expected: i32, new: i32) -> bool {
        (**self).compare_and_reset(expected, new)
    }
}

/// Process-wide stop request, observed once per loop iteration.
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    requested: AtomicBool,
}

impl ShutdownFlag {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}
