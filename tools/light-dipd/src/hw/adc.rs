//! MCP3208 12-bit ADC on spidev.

use embedded_hal::spi::SpiDevice;
use linux_embedded_hal::SpidevDevice;
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};

use super::HwError;
use crate::config::AdcConfig;

pub const FULL_SCALE: u16 = 4095;

pub struct Mcp3208<S> {
    spi: S,
    channel: u8,
    vref: f64,
}

impl Mcp3208<SpidevDevice> {
    pub fn open(cfg: &AdcConfig) -> Result<Self, HwError> {
        let path = cfg.device.display().to_string();
        let mut spi =
            SpidevDevice::open(&cfg.device).map_err(|e| HwError::Spi(format!("{path}: {e:?}")))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(cfg.spi_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.0
            .configure(&options)
            .map_err(|e| HwError::Spi(format!("{path}: configure: {e}")))?;
        Self::new(spi, cfg.channel, cfg.vref)
    }
}

impl<S: SpiDevice> Mcp3208<S> {
    pub fn new(spi: S, channel: u8, vref: f64) -> Result<Self, HwError> {
        if channel > 7 {
            return Err(HwError::AdcChannel(channel));
        }
        Ok(Self { spi, channel, vref })
    }

    /// Single-ended conversion, raw 0..=4095.
    pub fn read_raw(&mut self) -> Result<u16, HwError> {
        let ch = self.channel;
        // Start bit, single-ended, then the channel number straddling bytes 0/1.
        let mut buf = [0x06 | (ch >> 2), (ch & 0x03) << 6, 0x00];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(|e| HwError::Spi(format!("{e:?}")))?;
        Ok((((buf[1] & 0x0F) as u16) << 8) | buf[2] as u16)
    }

    pub fn read_volts(&mut self) -> Result<f64, HwError> {
        Ok(self.read_raw()? as f64 * self.vref / FULL_SCALE as f64)
    }
}
