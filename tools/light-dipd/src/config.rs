use anyhow::{Context, Result, bail};
use lightdip_control::ControlConfig;
use lightdip_window::WindowConfig;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "configs/light-dipd.toml";

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pwm: PwmConfig,
    pub encoder: EncoderConfig,
    pub adc: AdcConfig,
    pub window: WindowSection,
    pub blink: BlinkSection,
    pub net: NetConfig,
    pub daemon: DaemonSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PwmConfig {
    /// Directory holding `period`, `duty_cycle` and `enable`.
    pub path: PathBuf,
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/dev/hat/pwm/GPIO15"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    pub chip: PathBuf,
    pub line_a: u32,
    pub line_b: u32,
    pub poll_interval_us: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            chip: PathBuf::from("/dev/gpiochip2"),
            line_a: 15,
            line_b: 17,
            poll_interval_us: 200,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub device: PathBuf,
    pub channel: u8,
    pub vref: f64,
    pub spi_hz: u32,
    pub sample_interval_us: u64,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            device: PathBuf::from("/dev/spidev0.0"),
            channel: 0,
            vref: 3.3,
            spi_hz: 250_000,
            sample_interval_us: 1_000,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WindowSection {
    pub average_weight: f64,
    pub dip_drop_v: f64,
    pub dip_hysteresis_v: f64,
}

impl Default for WindowSection {
    fn default() -> Self {
        let w = WindowConfig::default();
        Self {
            average_weight: w.average_weight,
            dip_drop_v: w.dip_drop_v,
            dip_hysteresis_v: w.dip_hysteresis_v,
        }
    }
}

impl From<&WindowSection> for WindowConfig {
    fn from(s: &WindowSection) -> Self {
        WindowConfig::new(s.average_weight, s.dip_drop_v, s.dip_hysteresis_v)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BlinkSection {
    pub carrier_hz: u32,
    pub soft_enter_hz: u32,
    pub soft_exit_hz: u32,
    pub duty_pct: u8,
    pub report_period_ms: u64,
    pub idle_sleep_ms: u64,
}

impl Default for BlinkSection {
    fn default() -> Self {
        let c = ControlConfig::default();
        Self {
            carrier_hz: c.carrier_hz,
            soft_enter_hz: c.soft_enter_hz,
            soft_exit_hz: c.soft_exit_hz,
            duty_pct: c.duty_pct,
            report_period_ms: c.report_period_ms,
            idle_sleep_ms: c.idle_sleep_ms,
        }
    }
}

impl From<&BlinkSection> for ControlConfig {
    fn from(s: &BlinkSection) -> Self {
        ControlConfig {
            carrier_hz: s.carrier_hz,
            soft_enter_hz: s.soft_enter_hz,
            soft_exit_hz: s.soft_exit_hz,
            duty_pct: s.duty_pct,
            report_period_ms: s.report_period_ms,
            idle_sleep_ms: s.idle_sleep_ms,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct NetConfig {
    pub command_bind: SocketAddr,
    pub telemetry_target: SocketAddr,
}

impl Default for NetConfig {
    fn default() -> Self {
        Self {
            command_bind: SocketAddr::from(([0, 0, 0, 0], 12345)),
            telemetry_target: SocketAddr::from(([192, 168, 7, 1], 12346)),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    /// Exclusive lock so only one process drives the LED.
    pub lock_path: PathBuf,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            lock_path: std::env::temp_dir().join("light-dipd.lock"),
        }
    }
}

impl Config {
    /// Read `path`; a missing file yields the built-in defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let txt =
            fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let cfg: Config =
            toml::from_str(&txt).with_context(|| format!("parse config {}", path.display()))?;
        cfg.control()
            .validate()
            .with_context(|| format!("invalid [blink] section in {}", path.display()))?;
        cfg.window()
            .validate()
            .with_context(|| format!("invalid [window] section in {}", path.display()))?;
        if cfg.adc.sample_interval_us == 0 {
            bail!(
                "invalid [adc] section in {}: sample_interval_us must be non-zero",
                path.display()
            );
        }
        Ok(cfg)
    }

    pub fn control(&self) -> ControlConfig {
        ControlConfig::from(&self.blink)
    }

    pub fn window(&self) -> WindowConfig {
        WindowConfig::from(&self.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.pwm.path, PathBuf::from("/dev/hat/pwm/GPIO15"));
        assert_eq!((cfg.encoder.line_a, cfg.encoder.line_b), (15, 17));
        assert_eq!(cfg.net.command_bind.port(), 12345);
        assert_eq!(cfg.net.telemetry_target.to_string(), "192.168.7.1:12346");
        assert_eq!(cfg.control(), ControlConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[blink]
soft_exit_hz = 6

[net]
telemetry_target = "10.0.0.2:9000"

[adc]
channel = 1
"#
        )
        .unwrap();
        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.blink.soft_exit_hz, 6);
        assert_eq!(cfg.blink.soft_enter_hz, 3);
        assert_eq!(cfg.net.telemetry_target.port(), 9000);
        assert_eq!(cfg.net.command_bind.port(), 12345);
        assert_eq!(cfg.adc.channel, 1);
        assert_eq!(cfg.adc.vref, 3.3);
    }

    #[test]
    fn inverted_hysteresis_band_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[blink]\nsoft_enter_hz = 8\nsoft_exit_hz = 5").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("must be below"), "{err:#}");
    }

    #[test]
    fn out_of_range_window_settings_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]
average_weight = 1.5").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("[window]"), "{msg}");
        assert!(msg.contains("average weight 1.5"), "{msg}");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[window]
dip_drop_v = -0.2").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("dip drop"), "{err:#}");
    }

    #[test]
    fn zero_sample_interval_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[adc]
sample_interval_us = 0").unwrap();
        let err = Config::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("sample_interval_us"), "{err:#}");
    }
}
