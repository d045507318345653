//! Raw button line access

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::HardwareError;

/// Where the kernel exposes the legacy GPIO interface
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// How long udev gets to fix permissions on a freshly exported line
const EXPORT_SETTLE: Duration = Duration::from_millis(100);

/// A readable push-to-talk line
pub trait ButtonLine: Send {
    /// True while the button is held
    fn read_button_line(&mut self) -> Result<bool, HardwareError>;
}

/// A GPIO input read through sysfs
pub struct SysfsLine {
    pin: u32,
    active_low: bool,
    value: File,
}

impl SysfsLine {
    pub fn open(pin: u32, active_low: bool) -> Result<Self, HardwareError> {
        Self::open_at(Path::new(SYSFS_GPIO_ROOT), pin, active_low)
    }

    /// Open `pin` under an alternate sysfs root, exporting it if needed
    pub fn open_at(root: &Path, pin: u32, active_low: bool) -> Result<Self, HardwareError> {
        let gpio_err = |reason: String| HardwareError::Gpio { pin, reason };
        let line_dir = root.join(format!("gpio{pin}"));

        if !line_dir.exists() {
            debug!(pin, "exporting gpio line");
            fs::write(root.join("export"), pin.to_string())
                .map_err(|e| gpio_err(format!("export failed: {e}")))?;
            std::thread::sleep(EXPORT_SETTLE);
        }

        write_direction(&line_dir).map_err(|e| gpio_err(format!("set direction: {e}")))?;

        let value_path = line_dir.join("value");
        let value = File::open(&value_path)
            .map_err(|e| gpio_err(format!("open {}: {e}", value_path.display())))?;

        info!(pin, active_low, "gpio line ready");
        Ok(Self {
            pin,
            active_low,
            value,
        })
    }
}

/// Lines already configured as inputs may have a read-only direction file
fn write_direction(line_dir: &Path) -> std::io::Result<()> {
    let path: PathBuf = line_dir.join("direction");
    match fs::read_to_string(&path) {
        Ok(current) if current.trim() == "in" => Ok(()),
        _ => fs::write(&path, "in"),
    }
}

impl ButtonLine for SysfsLine {
    fn read_button_line(&mut self) -> Result<bool, HardwareError> {
        let mut raw = [0u8; 2];
        self.value
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.value.read(&mut raw))
            .map_err(|e| HardwareError::Gpio {
                pin: self.pin,
                reason: format!("read failed: {e}"),
            })?;

        let high = match raw[0] {
            b'1' => true,
            b'0' => false,
            other => {
                return Err(HardwareError::Gpio {
                    pin: self.pin,
                    reason: format!("unexpected value byte {other:#04x}"),
                })
            }
        };
        Ok(high != self.active_low)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::*;

    /// Line whose level the test flips directly
    #[derive(Clone, Default)]
    pub(crate) struct SharedLine(pub Arc<AtomicBool>);

    impl ButtonLine for SharedLine {
        fn read_button_line(&mut self) -> Result<bool, HardwareError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    fn fake_sysfs(pin: u32, value: &str) -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        let line = root.path().join(format!("gpio{pin}"));
        fs::create_dir(&line).unwrap();
        fs::write(line.join("direction"), "out").unwrap();
        fs::write(line.join("value"), value).unwrap();
        root
    }

    #[test]
    fn test_active_low_inverts_level() {
        let root = fake_sysfs(17, "0\n");
        let mut line = SysfsLine::open_at(root.path(), 17, true).unwrap();
        assert!(line.read_button_line().unwrap());

        fs::write(root.path().join("gpio17/value"), "1\n").unwrap();
        assert!(!line.read_button_line().unwrap());
    }

    #[test]
    fn test_active_high() {
        let root = fake_sysfs(4, "1\n");
        let mut line = SysfsLine::open_at(root.path(), 4, false).unwrap();
        assert!(line.read_button_line().unwrap());
    }

    #[test]
    fn test_direction_set_to_input() {
        let root = fake_sysfs(17, "1\n");
        SysfsLine::open_at(root.path(), 17, true).unwrap();
        let direction = fs::read_to_string(root.path().join("gpio17/direction")).unwrap();
        assert_eq!(direction, "in");
    }

    #[test]
    fn test_missing_line_is_gpio_error() {
        let root = tempfile::tempdir().unwrap();
        match SysfsLine::open_at(&root.path().join("absent"), 22, true) {
            Err(HardwareError::Gpio { pin, .. }) => assert_eq!(pin, 22),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("line should not open"),
        }
    }

    #[test]
    fn test_garbage_value_rejected() {
        let root = fake_sysfs(17, "x");
        let mut line = SysfsLine::open_at(root.path(), 17, true).unwrap();
        assert!(line.read_button_line().is_err());
    }
}
