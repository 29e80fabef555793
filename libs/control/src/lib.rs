#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod blink;
pub mod command;
pub mod control;
pub mod device;
pub mod frequency;
pub mod report;

pub use blink::{
    BlinkConfig, BlinkDriver, BlinkMode, BlinkTick, ModeTransition, PulseSetting, SoftBlinkState,
    WriteFailure, half_period_ms,
};
pub use command::{CommandTarget, EngineCommands};
pub use control::{ConfigError, ControlConfig, ControlLoop, Devices, Step};
pub use device::{
    Clock, EncoderSource, PulseDriver, RotationCount, SampleEngine, ShutdownFlag, StatusSink,
    WindowSummary,
};
pub use frequency::{ClampEdge, FrequencyController, FrequencyUpdate, derive_target};
pub use report::{Delivery, PeriodStats, ReportCycle, ReportOutcome, StatusSnapshot};
