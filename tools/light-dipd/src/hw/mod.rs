//! Board devices: sysfs PWM, GPIO quadrature encoder, SPI ADC.

pub mod adc;
pub mod encoder;
pub mod pwm;

use std::io;
use std::path::PathBuf;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum HwError {
    #[error("{path}: not found")]
    Missing { path: PathBuf },
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("PWM setting rejected: {hz} Hz at {duty_pct}%")]
    InvalidPwm { hz: u32, duty_pct: u8 },
    #[error("GPIO {what}: {reason}")]
    Gpio { what: String, reason: String },
    #[error("SPI: {0}")]
    Spi(String),
    #[error("ADC channel {0} out of range (0..=7)")]
    AdcChannel(u8),
    #[error("spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Stop flag plus join handle for a background polling thread.
///
/// Dropping it stops and joins the thread.
pub struct Worker {
    name: &'static str,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn<F>(name: &'static str, body: F) -> Result<Self, HwError>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(&flag))
            .map_err(|source| HwError::Spawn { name, source })?;
        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(thread = self.name, "worker panicked");
            } else {
                tracing::debug!(thread = self.name, "worker stopped");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
