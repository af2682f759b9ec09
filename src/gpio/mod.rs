//! Pins through the (legacy) Linux sysfs GPIO interface.

use std::collections::HashMap;
use std::path::{
	Path,
	PathBuf,
};
use std::thread;
use std::time::{
	Duration,
	Instant,
};

use crate::bus::{
	Hardware,
	Pin,
	PinMode,
};

mod file;

use self::file::{
	ValueFile,
	write_attribute,
};

pub const SYSFS_GPIO: &str = "/sys/class/gpio";

/// how long to wait for udev to make a freshly exported pin accessible
const EXPORT_TIMEOUT: Duration = Duration::from_secs(1);

struct GpioPin {
	value: ValueFile,
	mode: Option<PinMode>,
	// level to apply when the pin becomes an output
	level: bool,
	exported_here: bool,
}

/// Owns a set of exported GPIOs; only the pins it exported itself are
/// unexported again on drop.
pub struct SysfsGpio {
	base: PathBuf,
	pins: HashMap<Pin, GpioPin>,
}

impl SysfsGpio {
	pub fn open(pins: &[Pin]) -> crate::AResult<Self> {
		Self::open_at(Path::new(SYSFS_GPIO), pins)
	}

	pub fn open_at(base: &Path, pins: &[Pin]) -> crate::AResult<Self> {
		let mut gpio = SysfsGpio {
			base: base.to_path_buf(),
			pins: HashMap::new(),
		};
		for &pin in pins {
			if gpio.pins.contains_key(&pin) {
				continue;
			}
			let exported_here = gpio.export(pin)?;
			let value_path = gpio.pin_dir(pin).join("value");
			let value = match with_context!(("open GPIO {} value", pin), Ok(ValueFile::open(&value_path)?)) {
				Ok(value) => value,
				Err(e) => {
					if exported_here {
						gpio.unexport(pin);
					}
					return Err(e);
				},
			};
			gpio.pins.insert(pin, GpioPin {
				value,
				mode: None,
				level: false,
				exported_here,
			});
		}
		debug!("opened GPIOs {:?} under {:?}", pins, gpio.base);
		Ok(gpio)
	}

	fn pin_dir(&self, pin: Pin) -> PathBuf {
		self.base.join(format!("gpio{}", pin))
	}

	// returns whether the pin was exported by us
	fn export(&self, pin: Pin) -> crate::AResult<bool> {
		let dir = self.pin_dir(pin);
		if dir.exists() {
			return Ok(false);
		}
		with_context!(("export GPIO {}", pin), {
			write_attribute(&self.base.join("export"), &pin.to_string())?;
			Ok(())
		})?;
		let start = Instant::now();
		while !dir.join("value").exists() {
			ensure!(start.elapsed() < EXPORT_TIMEOUT, "exported GPIO {} didn't show up in {:?}", pin, dir);
			thread::sleep(Duration::from_millis(10));
		}
		debug!("exported GPIO {}", pin);
		Ok(true)
	}

	fn unexport(&self, pin: Pin) {
		if let Err(e) = write_attribute(&self.base.join("unexport"), &pin.to_string()) {
			warn!("unexport GPIO {} failed: {}", pin, e);
		}
	}

	fn pin(&mut self, pin: Pin) -> &mut GpioPin {
		match self.pins.get_mut(&pin) {
			Some(p) => p,
			None => panic!("GPIO {} wasn't opened", pin),
		}
	}
}

impl Drop for SysfsGpio {
	fn drop(&mut self) {
		for (&pin, p) in &self.pins {
			if p.exported_here {
				self.unexport(pin);
			}
		}
	}
}

impl Hardware for SysfsGpio {
	fn set_mode(&mut self, pin: Pin, mode: PinMode) {
		let direction_path = self.pin_dir(pin).join("direction");
		let p = self.pin(pin);
		if p.mode == Some(mode) {
			return;
		}
		// "high"/"low" switch to output with the level already set
		let direction = match mode {
			PinMode::Input => "in",
			PinMode::Output if p.level => "high",
			PinMode::Output => "low",
		};
		write_attribute(&direction_path, direction).expect("setting GPIO direction must not fail");
		p.mode = Some(mode);
	}

	fn write_pin(&mut self, pin: Pin, high: bool) {
		let p = self.pin(pin);
		p.level = high;
		if p.mode == Some(PinMode::Output) {
			p.value.write(high);
		}
	}

	fn read_pin(&mut self, pin: Pin) -> bool {
		self.pin(pin).value.read()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;

	// fake sysfs tree: pins that "exist" already have their attribute files
	fn fake_sysfs(name: &str, pins: &[Pin]) -> PathBuf {
		let base = std::env::temp_dir().join(format!("eeprom-bridge-gpio-{}-{}", name, std::process::id()));
		let _ = fs::remove_dir_all(&base);
		fs::create_dir_all(&base).unwrap();
		fs::write(base.join("export"), b"").unwrap();
		fs::write(base.join("unexport"), b"").unwrap();
		for pin in pins {
			let dir = base.join(format!("gpio{}", pin));
			fs::create_dir_all(&dir).unwrap();
			fs::write(dir.join("value"), b"0").unwrap();
			fs::write(dir.join("direction"), b"in").unwrap();
		}
		base
	}

	#[test]
	fn output_direction_carries_level() {
		let base = fake_sysfs("direction", &[4, 5]);
		{
			let mut gpio = SysfsGpio::open_at(&base, &[4, 5]).unwrap();
			gpio.write_pin(4, true);
			gpio.set_mode(4, PinMode::Output);
			gpio.set_mode(5, PinMode::Output);
			gpio.write_pin(5, true);
			assert!(gpio.read_pin(5));
		}
		assert_eq!(fs::read_to_string(base.join("gpio4/direction")).unwrap(), "high");
		assert_eq!(fs::read_to_string(base.join("gpio5/direction")).unwrap(), "low");
		// nothing was exported by us
		assert_eq!(fs::read_to_string(base.join("unexport")).unwrap(), "");
		fs::remove_dir_all(&base).unwrap();
	}

	#[test]
	fn input_level_is_not_written() {
		let base = fake_sysfs("input", &[7]);
		let mut gpio = SysfsGpio::open_at(&base, &[7]).unwrap();
		gpio.set_mode(7, PinMode::Input);
		gpio.write_pin(7, true);
		assert!(!gpio.read_pin(7));
		drop(gpio);
		fs::remove_dir_all(&base).unwrap();
	}

	#[test]
	fn missing_pin_fails_to_export() {
		let base = fake_sysfs("missing", &[]);
		assert!(SysfsGpio::open_at(&base, &[9]).is_err());
		assert_eq!(fs::read_to_string(base.join("export")).unwrap(), "9");
		fs::remove_dir_all(&base).unwrap();
	}
}
