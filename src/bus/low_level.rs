use super::{
	BusPins,
	Hardware,
	Pin,
	PinMode,
	ShiftWord,
};

// raw bus sequences; no timing beyond what the pins themselves impose
pub(super) trait LowLevel: Hardware {
	// clock out one byte, highest bit first; data is taken on the rising edge
	fn shift_out(&mut self, data_pin: Pin, clock_pin: Pin, byte: u8) {
		for bit in (0..8).rev() {
			self.write_pin(data_pin, 0 != byte & (1 << bit));
			self.write_pin(clock_pin, true);
			self.write_pin(clock_pin, false);
		}
	}

	// low -> high -> low; the rising edge commits the shifted bits
	fn pulse_latch(&mut self, latch_pin: Pin) {
		self.write_pin(latch_pin, false);
		self.write_pin(latch_pin, true);
		self.write_pin(latch_pin, false);
	}

	// two pushes and the latch pulse form one indivisible sequence
	fn push_word(&mut self, pins: &BusPins, word: ShiftWord) {
		self.shift_out(pins.shift_data, pins.shift_clock, word.high());
		self.shift_out(pins.shift_data, pins.shift_clock, word.low());
		self.pulse_latch(pins.shift_latch);
	}

	fn set_data_mode(&mut self, pins: &BusPins, mode: PinMode) {
		for &pin in pins.data.iter() {
			self.set_mode(pin, mode);
		}
	}

	// D7 is sampled first and ends up as the most significant bit
	fn sample_data(&mut self, pins: &BusPins) -> u8 {
		let mut data = 0u8;
		for &pin in pins.data.iter().rev() {
			data = (data << 1) | self.read_pin(pin) as u8;
		}
		data
	}

	// D0 first, taking the lowest bit each time
	fn drive_data(&mut self, pins: &BusPins, mut data: u8) {
		for &pin in pins.data.iter() {
			self.write_pin(pin, 0 != data & 1);
			data >>= 1;
		}
	}

	// writes the default level before switching to output, so the pin never glitches
	fn init_pin(&mut self, pin: Pin, mode: PinMode, high: bool) {
		if mode == PinMode::Output {
			self.write_pin(pin, high);
		}
		self.set_mode(pin, mode);
	}
}

impl<H: Hardware + ?Sized> LowLevel for H {
}
