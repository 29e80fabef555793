//! Light sampling: the acquisition thread feeds a mutex-guarded window that
//! the control loop rotates once per report.

use lightdip_control::{SampleEngine, WindowSummary};
use lightdip_window::{SampleWindow, WindowConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::clock::MonotonicClock;
use crate::hw::{HwError, Worker};

/// Anything that yields one light reading in volts.
pub trait LightSensor: Send + 'static {
    fn read_volts(&mut self) -> Result<f64, HwError>;
}

impl<S> LightSensor for crate::hw::adc::Mcp3208<S>
where
    S: embedded_hal::spi::SpiDevice + Send + 'static,
{
    fn read_volts(&mut self) -> Result<f64, HwError> {
        crate::hw::adc::Mcp3208::read_volts(self)
    }
}

#[derive(Debug)]
pub struct Sampler {
    window: Mutex<SampleWindow>,
}

impl Sampler {
    pub fn new(cfg: WindowConfig) -> Self {
        Self {
            window: Mutex::new(SampleWindow::new(cfg)),
        }
    }

    pub fn record(&self, volts: f64, at_ms: f64) -> bool {
        self.window.lock().push(volts, at_ms).dip
    }

    /// Start reading `sensor` every `interval` until the worker is stopped.
    pub fn spawn<L: LightSensor>(
        this: &Arc<Self>,
        mut sensor: L,
        clock: MonotonicClock,
        interval: Duration,
    ) -> Result<Worker, HwError> {
        let sampler = Arc::clone(this);
        Worker::spawn("sampler", move |stop| {
            let mut next = Instant::now();
            let mut failures = 0u64;
            while !stop.load(Ordering::Relaxed) {
                match sensor.read_volts() {
                    Ok(volts) => {
                        if failures > 0 {
                            debug!(failures, "light sensor recovered");
                            failures = 0;
                        }
                        sampler.record(volts, clock.elapsed_ms_f64());
                    }
                    Err(e) => {
                        if failures == 0 {
                            warn!("light sensor read failed: {e}");
                        }
                        failures += 1;
                    }
                }
                next += interval;
                let now = Instant::now();
                if next > now {
                    std::thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
        })
    }
}

impl SampleEngine for Sampler {
    fn rotate_window(&self) -> WindowSummary {
        self.window.lock().rotate()
    }

    fn history(&self) -> Vec<f64> {
        self.window.lock().history().to_vec()
    }

    fn history_len(&self) -> usize {
        self.window.lock().history().len()
    }

    fn dip_count(&self) -> u32 {
        self.window.lock().history_dips()
    }

    fn total_samples(&self) -> u64 {
        self.window.lock().total_samples()
    }
}
