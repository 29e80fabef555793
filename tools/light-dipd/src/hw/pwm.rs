//! LED PWM through a sysfs-style attribute directory.

use lightdip_control::PulseDriver;
use std::fs;
use std::path::{Path, PathBuf};

use super::HwError;

const NS_PER_SEC: u64 = 1_000_000_000;

/// Where the PWM attributes are written.
pub trait Attributes {
    fn write(&mut self, name: &str, value: u64) -> Result<(), HwError>;
}

/// Attribute files inside one directory (`period`, `duty_cycle`, `enable`).
#[derive(Debug)]
pub struct SysfsDir {
    dir: PathBuf,
}

impl SysfsDir {
    pub fn open(dir: &Path) -> Result<Self, HwError> {
        if !dir.is_dir() {
            return Err(HwError::Missing {
                path: dir.to_path_buf(),
            });
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }
}

impl Attributes for SysfsDir {
    fn write(&mut self, name: &str, value: u64) -> Result<(), HwError> {
        let path = self.dir.join(name);
        fs::write(&path, value.to_string()).map_err(|source| HwError::Io { path, source })
    }
}

/// Period/duty in nanoseconds for `hz` at `duty_pct`.
pub fn timing_ns(hz: u32, duty_pct: u8) -> Result<(u64, u64), HwError> {
    if hz == 0 || duty_pct > 100 {
        return Err(HwError::InvalidPwm { hz, duty_pct });
    }
    let period = NS_PER_SEC / hz as u64;
    let duty = period * duty_pct as u64 / 100;
    Ok((period, duty))
}

#[derive(Debug)]
pub struct SysfsPwm<A = SysfsDir> {
    attrs: A,
}

impl SysfsPwm<SysfsDir> {
    pub fn open(dir: &Path) -> Result<Self, HwError> {
        Ok(Self::with_attributes(SysfsDir::open(dir)?))
    }
}

impl<A: Attributes> SysfsPwm<A> {
    pub fn with_attributes(attrs: A) -> Self {
        Self { attrs }
    }
}

impl<A: Attributes> PulseDriver for SysfsPwm<A> {
    type Error = HwError;

    fn set_frequency(&mut self, hz: u32, duty_pct: u8) -> Result<(), HwError> {
        let (period, duty) = timing_ns(hz, duty_pct)?;
        // The kernel rejects a period shorter than the current duty.
        self.attrs.write("duty_cycle", 0)?;
        self.attrs.write("period", period)?;
        self.attrs.write("duty_cycle", duty)
    }

    fn enable(&mut self) -> Result<(), HwError> {
        self.attrs.write("enable", 1)
    }

    fn disable(&mut self) -> Result<(), HwError> {
        self.attrs.write("enable", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        writes: Vec<(String, u64)>,
    }

    impl Attributes for Recorder {
        fn write(&mut self, name: &str, value: u64) -> Result<(), HwError> {
            self.writes.push((name.to_string(), value));
            Ok(())
        }
    }

    #[test]
    fn timing_table() {
        assert_eq!(timing_ns(10, 50).unwrap(), (100_000_000, 50_000_000));
        assert_eq!(timing_ns(100, 0).unwrap(), (10_000_000, 0));
        assert_eq!(timing_ns(500, 100).unwrap(), (2_000_000, 2_000_000));
        assert!(matches!(
            timing_ns(0, 50),
            Err(HwError::InvalidPwm { hz: 0, .. })
        ));
        assert!(timing_ns(10, 101).is_err());
    }

    #[test]
    fn duty_is_zeroed_before_period_changes() {
        let mut pwm = SysfsPwm::with_attributes(Recorder::default());
        for (hz, duty) in [(10, 50), (500, 50), (100, 0), (3, 50)] {
            pwm.set_frequency(hz, duty).unwrap();
        }

        let writes = &pwm.attrs.writes;
        assert_eq!(writes.len(), 12);
        let mut period = 0;
        for triple in writes.chunks(3) {
            assert_eq!(triple[0], ("duty_cycle".to_string(), 0));
            assert_eq!(triple[1].0, "period");
            assert_eq!(triple[2].0, "duty_cycle");
            period = triple[1].1;
            assert!(triple[2].1 <= period);
        }
        assert_eq!(period, NS_PER_SEC / 3);
    }

    #[test]
    fn rejected_setting_writes_nothing() {
        let mut pwm = SysfsPwm::with_attributes(Recorder::default());
        assert!(pwm.set_frequency(0, 50).is_err());
        assert!(pwm.attrs.writes.is_empty());
    }

    #[test]
    fn writes_attribute_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut pwm = SysfsPwm::open(dir.path()).unwrap();
        pwm.set_frequency(20, 50).unwrap();
        pwm.enable().unwrap();

        let read = |name: &str| fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("period"), "50000000");
        assert_eq!(read("duty_cycle"), "25000000");
        assert_eq!(read("enable"), "1");

        pwm.disable().unwrap();
        assert_eq!(read("enable"), "0");
    }

    #[test]
    fn missing_directory_is_an_init_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SysfsPwm::open(&dir.path().join("GPIO15")).unwrap_err();
        assert!(matches!(err, HwError::Missing { .. }));
    }
}
