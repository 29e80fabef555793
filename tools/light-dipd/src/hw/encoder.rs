//! Rotary encoder: two GPIO lines decoded into signed ticks.

use embedded_hal::digital::InputPin;
use lightdip_control::RotationCount;
use linux_embedded_hal::CdevPin;
use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use super::{HwError, Worker};
use crate::config::EncoderConfig;

const CONSUMER: &str = "light-dipd";

/// Tick delta indexed by `(previous_state << 2) | current_state`, where a
/// state is `(a << 1) | b`. Illegal double steps decode to 0.
const TRANSITIONS: [i8; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

#[derive(Clone, Copy, Debug, Default)]
pub struct QuadratureDecoder {
    state: u8,
}

impl QuadratureDecoder {
    pub fn new(a: bool, b: bool) -> Self {
        Self {
            state: Self::encode(a, b),
        }
    }

    fn encode(a: bool, b: bool) -> u8 {
        ((a as u8) << 1) | b as u8
    }

    /// Feed the current pin levels; returns -1, 0 or +1.
    pub fn update(&mut self, a: bool, b: bool) -> i8 {
        let next = Self::encode(a, b);
        let delta = TRANSITIONS[((self.state << 2) | next) as usize];
        self.state = next;
        delta
    }
}

/// The two requested input lines, not yet polled.
pub struct Encoder<P> {
    a: P,
    b: P,
    poll: Duration,
}

impl Encoder<CdevPin> {
    pub fn open(cfg: &EncoderConfig) -> Result<Self, HwError> {
        let gpio_err = |what: String| {
            move |e: linux_embedded_hal::gpio_cdev::Error| HwError::Gpio {
                what,
                reason: e.to_string(),
            }
        };
        let chip_name = cfg.chip.display().to_string();
        let mut chip = Chip::new(&cfg.chip).map_err(gpio_err(chip_name.clone()))?;

        let mut request = |line: u32| -> Result<CdevPin, HwError> {
            let what = format!("{chip_name} line {line}");
            let handle = chip
                .get_line(line)
                .and_then(|l| l.request(LineRequestFlags::INPUT, 0, CONSUMER))
                .map_err(gpio_err(what.clone()))?;
            CdevPin::new(handle).map_err(gpio_err(what))
        };
        let a = request(cfg.line_a)?;
        let b = request(cfg.line_b)?;
        Ok(Self::from_pins(
            a,
            b,
            Duration::from_micros(cfg.poll_interval_us),
        ))
    }
}

impl<P> Encoder<P>
where
    P: InputPin + Send + 'static,
{
    pub fn from_pins(a: P, b: P, poll: Duration) -> Self {
        Self { a, b, poll }
    }

    /// Start polling; every decoded tick is added to `count`.
    pub fn spawn(self, count: Arc<RotationCount>) -> Result<Worker, HwError> {
        Worker::spawn("encoder", move |stop| self.poll_until(stop, &count))
    }

    fn poll_until(mut self, stop: &AtomicBool, count: &RotationCount) {
        let mut decoder = match self.levels() {
            Ok((a, b)) => QuadratureDecoder::new(a, b),
            Err(e) => {
                warn!("encoder initial read failed: {e}");
                QuadratureDecoder::default()
            }
        };
        let mut failing = false;

        while !stop.load(Ordering::Relaxed) {
            match self.levels() {
                Ok((a, b)) => {
                    failing = false;
                    let delta = decoder.update(a, b);
                    if delta != 0 {
                        count.add(delta as i32);
                    }
                }
                Err(e) => {
                    if !failing {
                        warn!("encoder read failed: {e}");
                    }
                    failing = true;
                }
            }
            std::thread::sleep(self.poll);
        }
    }

    fn levels(&mut self) -> Result<(bool, bool), HwError> {
        let read = |pin: &mut P, name: &str| {
            pin.is_high().map_err(|e| HwError::Gpio {
                what: format!("encoder {name}"),
                reason: format!("{e:?}"),
            })
        };
        Ok((read(&mut self.a, "A")?, read(&mut self.b, "B")?))
    }
}
