use std::time::Duration;

use super::{
	BusPins,
	Hardware,
	PinMode,
	ShiftWord,
	low_level::LowLevel,
};

/// WRITE ENABLE low time
pub const WRITE_PULSE: Duration = Duration::from_micros(1);
/// internal write cycle of the chip; no other access before it completes
pub const WRITE_CYCLE: Duration = Duration::from_millis(5);

/// Byte access to the chip; this is what request handlers program against.
///
/// Addresses must be validated by the caller (see `contains`), implementations
/// don't check them again.
pub trait Eeprom {
	fn max_address(&self) -> u16;

	fn read(&mut self, address: u16) -> u8;

	/// Returns `false` if the cell already held `data` and no write cycle was
	/// issued.
	fn write(&mut self, address: u16, data: u8) -> bool;

	/// whether `len` bytes starting at `address` are inside the chip
	fn contains(&self, address: u16, len: usize) -> bool {
		let end = self.max_address() as usize + 1;
		(address as usize) < end && address as usize + len <= end
	}

	fn read_into(&mut self, address: u16, target: &mut [u8]) {
		for (offset, t) in target.iter_mut().enumerate() {
			*t = self.read(address.wrapping_add(offset as u16));
		}
	}

	/// returns the number of write cycles actually issued
	fn write_from(&mut self, address: u16, data: &[u8]) -> usize {
		let mut written = 0;
		for (offset, &d) in data.iter().enumerate() {
			if self.write(address.wrapping_add(offset as u16), d) {
				written += 1;
			}
		}
		written
	}
}

pub struct EepromController<H: Hardware> {
	hardware: H,
	pins: BusPins,
	max_address: u16,
}

impl<H: Hardware> EepromController<H> {
	pub fn new(hardware: H, pins: BusPins, max_address: u16) -> Self {
		assert!(max_address <= ShiftWord::MAX_ADDRESS, "address 0x{:04x} doesn't fit the shift register chain", max_address);
		assert!(!pins.has_duplicates(), "bus pins must be distinct: {:?}", pins);
		EepromController {
			hardware,
			pins,
			max_address,
		}
	}

	pub fn pins(&self) -> &BusPins {
		&self.pins
	}

	pub fn hardware(&mut self) -> &mut H {
		&mut self.hardware
	}

	pub fn into_hardware(self) -> H {
		self.hardware
	}

	/// Puts all pins into their idle state and clears the address registers.
	///
	/// Must run before the first `read`/`write`; running it again resets the
	/// bus to the same state.
	pub fn init(&mut self) {
		let pins = &self.pins;
		let hw = &mut self.hardware;
		hw.init_pin(pins.shift_data, PinMode::Output, false);
		hw.init_pin(pins.shift_clock, PinMode::Output, false);
		hw.init_pin(pins.shift_latch, PinMode::Output, false);
		// active low
		hw.init_pin(pins.write_enable, PinMode::Output, true);
		hw.set_data_mode(pins, PinMode::Input);

		self.set_address(0x0000, true);
		debug!("EEPROM bus initialized ({:?})", self.pins);
	}

	pub fn set_address(&mut self, address: u16, output_enable: bool) {
		let word = ShiftWord::new(address, output_enable);
		trace!("latch {:?}", word);
		self.hardware.push_word(&self.pins, word);
	}

	/// Doesn't modify the chip; safe to call before every write.
	pub fn read(&mut self, address: u16) -> u8 {
		self.hardware.set_data_mode(&self.pins, PinMode::Input);
		self.set_address(address, true);
		let data = self.hardware.sample_data(&self.pins);
		trace!("read 0x{:04x}: 0x{:02x}", address, data);
		data
	}

	/// Skips the write cycle if the cell already contains `data`; the chip only
	/// survives a limited number of write cycles.
	pub fn write(&mut self, address: u16, data: u8) -> bool {
		let current = self.read(address);
		if current == data {
			trace!("write 0x{:04x}: already 0x{:02x}", address, data);
			return false;
		}

		self.hardware.set_data_mode(&self.pins, PinMode::Output);
		// chip must not drive the bus while we do
		self.set_address(address, false);
		self.hardware.drive_data(&self.pins, data);

		let write_enable = self.pins.write_enable;
		self.hardware.write_pin(write_enable, false);
		self.hardware.delay(WRITE_PULSE);
		self.hardware.write_pin(write_enable, true);
		self.hardware.delay(WRITE_CYCLE);

		debug!("write 0x{:04x}: 0x{:02x} -> 0x{:02x}", address, current, data);
		true
	}
}

impl<H: Hardware> Eeprom for EepromController<H> {
	fn max_address(&self) -> u16 {
		self.max_address
	}

	fn read(&mut self, address: u16) -> u8 {
		EepromController::read(self, address)
	}

	fn write(&mut self, address: u16, data: u8) -> bool {
		EepromController::write(self, address, data)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sim::{
		BusEvent,
		SimulatedBoard,
	};

	const MAX: u16 = 0x07ff;

	fn controller() -> EepromController<SimulatedBoard> {
		let pins = BusPins::default();
		let mut ctl = EepromController::new(SimulatedBoard::new(pins.clone(), MAX), pins, MAX);
		ctl.init();
		ctl.hardware().take_events();
		ctl
	}

	#[test]
	fn init_resets_bus() {
		let mut ctl = controller();
		ctl.set_address(0x0555, false);
		ctl.write(0x0001, 0x42);
		for _ in 0..2 {
			ctl.init();
			let pins = ctl.pins().clone();
			let board = ctl.hardware();
			assert_eq!(board.latched(), ShiftWord::new(0, true));
			for &pin in pins.data.iter() {
				assert_eq!(board.pin_mode(pin), Some(PinMode::Input));
			}
			assert_eq!(board.pin_mode(pins.write_enable), Some(PinMode::Output));
			assert!(board.pin_level(pins.write_enable));
			assert!(!board.pin_level(pins.shift_latch));
		}
	}

	#[test]
	fn set_address_is_two_pushes_and_one_latch() {
		let mut ctl = controller();
		for &oe in [true, false].iter() {
			ctl.set_address(0x03a5, oe);
			let events = ctl.hardware().take_events();
			assert_eq!(events.len(), 17);
			assert!(events[..16].iter().all(|e| *e == BusEvent::Clock));
			assert_eq!(events[16], BusEvent::Latch);
			assert_eq!(ctl.hardware().latched(), ShiftWord::new(0x03a5, oe));
		}
	}

	#[test]
	fn read_back_written_values() {
		let mut ctl = controller();
		for &(address, value) in [(0x0000, 0x01), (0x0123, 0xa5), (MAX, 0x80), (0x0400, 0x00)].iter() {
			ctl.write(address, value);
			assert_eq!(ctl.read(address), value);
		}
		assert_eq!(ctl.hardware().bus_conflicts(), 0);
	}

	#[test]
	fn repeated_write_is_elided() {
		let mut ctl = controller();
		assert!(ctl.write(0x0010, 0x5a));
		assert!(!ctl.write(0x0010, 0x5a));
		assert_eq!(ctl.hardware().write_pulses(), 1);
		assert_eq!(ctl.hardware().memory()[0x10], 0x5a);
	}

	#[test]
	fn writing_erased_value_is_elided() {
		let mut ctl = controller();
		// blank chip reads 0xff
		assert!(!ctl.write(0x0020, 0xff));
		assert_eq!(ctl.hardware().write_pulses(), 0);
	}

	#[test]
	fn write_waits_for_write_cycle() {
		let mut ctl = controller();
		let before = ctl.hardware().elapsed();
		ctl.write(0x0001, 0x00);
		assert!(ctl.hardware().elapsed() - before >= WRITE_PULSE + WRITE_CYCLE);
	}

	#[test]
	fn read_does_not_pulse_write_enable() {
		let mut ctl = controller();
		ctl.read(0x0100);
		let events = ctl.hardware().take_events();
		assert!(!events.contains(&BusEvent::WritePulse));
		assert_eq!(ctl.hardware().latched(), ShiftWord::new(0x0100, true));
	}

	#[test]
	fn range_checks() {
		let ctl = controller();
		assert!(ctl.contains(0, 0x800));
		assert!(ctl.contains(MAX, 1));
		assert!(!ctl.contains(MAX, 2));
		assert!(!ctl.contains(0x0800, 0));
	}

	#[test]
	#[should_panic]
	fn address_space_limited_by_chain() {
		let pins = BusPins::default();
		EepromController::new(SimulatedBoard::new(pins.clone(), 0x7fff), pins, 0x8000);
	}
}
