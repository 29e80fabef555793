//! Dual-mode LED blink driver.
//!
//! At or above the hysteresis band the pulse generator blinks the LED itself
//! (`Hardware`). Below it the generator runs a fixed carrier and this driver
//! gates it fully on/off every half period (`Soft`), since the generator can
//! not resolve periods of a few hertz with usable duty accuracy.

use crate::device::PulseDriver;

pub const DEFAULT_CARRIER_HZ: u32 = 100;
pub const DEFAULT_SOFT_ENTER_HZ: u32 = 3;
pub const DEFAULT_SOFT_EXIT_HZ: u32 = 5;
pub const DEFAULT_DUTY_PCT: u8 = 50;
/// Half period used for 0 Hz, where nothing toggles but the timer keeps moving.
pub const IDLE_HALF_PERIOD_MS: u64 = 500;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlinkMode {
    Hardware,
    Soft,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlinkConfig {
    pub carrier_hz: u32,
    /// Hardware -> Soft when the target is at or below this.
    pub soft_enter_hz: u32,
    /// Soft -> Hardware when the target is at or above this.
    pub soft_exit_hz: u32,
    pub duty_pct: u8,
}

impl BlinkConfig {
    pub const fn new(carrier_hz: u32, soft_enter_hz: u32, soft_exit_hz: u32, duty_pct: u8) -> Self {
        Self {
            carrier_hz,
            soft_enter_hz,
            soft_exit_hz,
            duty_pct,
        }
    }
}

impl Default for BlinkConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_CARRIER_HZ,
            DEFAULT_SOFT_ENTER_HZ,
            DEFAULT_SOFT_EXIT_HZ,
            DEFAULT_DUTY_PCT,
        )
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SoftBlinkState {
    pub phase_on: bool,
    pub next_toggle_ms: u64,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PulseSetting {
    pub hz: u32,
    pub duty_pct: u8,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeTransition {
    pub from: BlinkMode,
    pub to: BlinkMode,
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlinkTick {
    pub mode: BlinkMode,
    pub transition: Option<ModeTransition>,
    /// Last setting written to the pulse driver this cycle, if any.
    pub programmed: Option<PulseSetting>,
}

/// A pulse driver write failed. Mode decisions for the cycle still stand.
#[derive(Debug)]
pub struct WriteFailure<E> {
    pub setting: PulseSetting,
    pub mode: BlinkMode,
    pub transition: Option<ModeTransition>,
    pub error: E,
}

/// `500 / f` ms, or `IDLE_HALF_PERIOD_MS` at 0 Hz.
pub const fn half_period_ms(hz: u32) -> u64 {
    if hz == 0 {
        IDLE_HALF_PERIOD_MS
    } else {
        500 / hz as u64
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BlinkDriver {
    cfg: BlinkConfig,
    mode: BlinkMode,
    soft: Option<SoftBlinkState>,
    /// Frequency last sent in Hardware mode; `None` forces the next write.
    last_hw_hz: Option<u32>,
}

impl BlinkDriver {
    pub const fn new(cfg: BlinkConfig) -> Self {
        Self {
            cfg,
            mode: BlinkMode::Hardware,
            soft: None,
            last_hw_hz: None,
        }
    }

    pub const fn mode(&self) -> BlinkMode {
        self.mode
    }

    pub const fn soft_state(&self) -> Option<SoftBlinkState> {
        self.soft
    }

    pub const fn config(&self) -> BlinkConfig {
        self.cfg
    }

    /// Drop straight into Soft mode with the LED off.
    ///
    /// Used when the knob is pushed below 0 Hz so a stale ON phase can never
    /// survive into the 0 Hz steady state.
    pub fn force_soft_off<P: PulseDriver>(
        &mut self,
        target_hz: u32,
        now_ms: u64,
        pulse: &mut P,
    ) -> Result<BlinkTick, WriteFailure<P::Error>> {
        let transition = self.reset_soft(target_hz, now_ms);
        let off = self.carrier(false);
        self.write(pulse, off, transition)?;
        Ok(BlinkTick {
            mode: self.mode,
            transition,
            programmed: Some(off),
        })
    }

    pub fn update<P: PulseDriver>(
        &mut self,
        target_hz: u32,
        now_ms: u64,
        pulse: &mut P,
    ) -> Result<BlinkTick, WriteFailure<P::Error>> {
        let want_soft = match self.mode {
            BlinkMode::Soft => target_hz < self.cfg.soft_exit_hz,
            BlinkMode::Hardware => target_hz <= self.cfg.soft_enter_hz,
        };

        if want_soft {
            let transition = match self.mode {
                BlinkMode::Soft => None,
                BlinkMode::Hardware => self.reset_soft(target_hz, now_ms),
            };
            // The entry write already turned the LED off and the first
            // toggle is a half period out, so the timer is not stepped.
            let programmed = if transition.is_some() {
                let off = self.carrier(false);
                self.write(pulse, off, transition)?;
                Some(off)
            } else if let Some(setting) = self.soft_step(target_hz, now_ms) {
                self.write(pulse, setting, transition)?;
                Some(setting)
            } else {
                None
            };
            Ok(BlinkTick {
                mode: self.mode,
                transition,
                programmed,
            })
        } else {
            let transition = self.enter_hardware();
            if transition.is_none() && self.last_hw_hz == Some(target_hz) {
                return Ok(BlinkTick {
                    mode: self.mode,
                    transition,
                    programmed: None,
                });
            }
            let setting = PulseSetting {
                hz: target_hz,
                duty_pct: self.cfg.duty_pct,
            };
            // Remembered even if the write fails: the retry is the next
            // frequency or mode change, not a hammering loop.
            self.last_hw_hz = Some(target_hz);
            self.write(pulse, setting, transition)?;
            Ok(BlinkTick {
                mode: self.mode,
                transition,
                programmed: Some(setting),
            })
        }
    }

    /// Start a fresh soft cycle: LED off, first toggle one half period out.
    fn reset_soft(&mut self, target_hz: u32, now_ms: u64) -> Option<ModeTransition> {
        let from = self.mode;
        self.mode = BlinkMode::Soft;
        self.soft = Some(SoftBlinkState {
            phase_on: false,
            next_toggle_ms: now_ms.saturating_add(half_period_ms(target_hz)),
        });
        self.last_hw_hz = None;
        (from != BlinkMode::Soft).then_some(ModeTransition {
            from,
            to: BlinkMode::Soft,
        })
    }

    fn enter_hardware(&mut self) -> Option<ModeTransition> {
        if self.mode == BlinkMode::Hardware {
            return None;
        }
        self.mode = BlinkMode::Hardware;
        self.soft = None;
        self.last_hw_hz = None;
        Some(ModeTransition {
            from: BlinkMode::Soft,
            to: BlinkMode::Hardware,
        })
    }

    /// Advance the soft timer; returns the carrier setting to write, if any.
    fn soft_step(&mut self, target_hz: u32, now_ms: u64) -> Option<PulseSetting> {
        let mut state = self.soft?;
        let setting = if target_hz == 0 {
            state.phase_on = false;
            if now_ms >= state.next_toggle_ms {
                state.next_toggle_ms = now_ms.saturating_add(IDLE_HALF_PERIOD_MS);
            }
            Some(self.carrier(false))
        } else if now_ms >= state.next_toggle_ms {
            state.phase_on = !state.phase_on;
            state.next_toggle_ms = now_ms.saturating_add(half_period_ms(target_hz));
            Some(self.carrier(state.phase_on))
        } else {
            None
        };
        self.soft = Some(state);
        setting
    }

    fn carrier(&self, on: bool) -> PulseSetting {
        PulseSetting {
            hz: self.cfg.carrier_hz,
            duty_pct: if on { self.cfg.duty_pct } else { 0 },
        }
    }

    fn write<P: PulseDriver>(
        &self,
        pulse: &mut P,
        setting: PulseSetting,
        transition: Option<ModeTransition>,
    ) -> Result<(), WriteFailure<P::Error>> {
        pulse
            .set_frequency(setting.hz, setting.duty_pct)
            .map_err(|error| WriteFailure {
                setting,
                mode: self.mode,
                transition,
                error,
            })
    }
}
