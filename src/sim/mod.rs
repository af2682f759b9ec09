//! Software model of the programmer board: two cascaded 8-bit shift
//! registers feeding the address lines and a parallel EEPROM on the data bus.
//!
//! Edges only count on pins configured as outputs; writing an input pin just
//! records its level (like enabling a pull-up). Delays advance a virtual clock
//! instead of sleeping.

use std::collections::HashMap;
use std::time::Duration;

use crate::bus::{
	BusPins,
	Hardware,
	Pin,
	PinMode,
	ShiftWord,
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BusEvent {
	/// rising edge on the shift clock
	Clock,
	/// rising edge on the latch line
	Latch,
	/// WRITE ENABLE returned high after a low pulse
	WritePulse,
}

#[derive(Clone, Copy, Debug)]
struct PinState {
	mode: PinMode,
	high: bool,
}

impl Default for PinState {
	fn default() -> Self {
		PinState {
			mode: PinMode::Input,
			high: false,
		}
	}
}

pub struct SimulatedBoard {
	pins: BusPins,
	states: HashMap<Pin, PinState>,
	shift: u16,
	latched: ShiftWord,
	memory: Vec<u8>,
	events: Vec<BusEvent>,
	record_events: bool,
	write_pulses: usize,
	bus_conflicts: usize,
	elapsed: Duration,
}

impl SimulatedBoard {
	/// blank chip (all cells 0xff)
	pub fn new(pins: BusPins, max_address: u16) -> Self {
		SimulatedBoard {
			pins,
			states: HashMap::new(),
			shift: 0,
			latched: ShiftWord::new(0, false),
			memory: vec![0xff; max_address as usize + 1],
			events: Vec::new(),
			record_events: true,
			write_pulses: 0,
			bus_conflicts: 0,
			elapsed: Duration::from_secs(0),
		}
	}

	/// chip preloaded with `contents`; cells past its end stay blank
	pub fn with_contents(pins: BusPins, max_address: u16, contents: &[u8]) -> Self {
		let mut board = Self::new(pins, max_address);
		let len = contents.len().min(board.memory.len());
		board.memory[..len].copy_from_slice(&contents[..len]);
		board
	}

	pub fn memory(&self) -> &[u8] {
		&self.memory
	}

	pub fn latched(&self) -> ShiftWord {
		self.latched
	}

	pub fn pin_mode(&self, pin: Pin) -> Option<PinMode> {
		self.states.get(&pin).map(|s| s.mode)
	}

	pub fn pin_level(&self, pin: Pin) -> bool {
		self.state(pin).high
	}

	pub fn events(&self) -> &[BusEvent] {
		&self.events
	}

	/// long running boards (the daemon's `--simulate`) don't keep a log
	pub fn set_record_events(&mut self, record: bool) {
		self.record_events = record;
		if !record {
			self.events = Vec::new();
		}
	}

	pub fn take_events(&mut self) -> Vec<BusEvent> {
		std::mem::replace(&mut self.events, Vec::new())
	}

	pub fn write_pulses(&self) -> usize {
		self.write_pulses
	}

	/// number of times a data pin was driven while the chip was driving the bus
	pub fn bus_conflicts(&self) -> usize {
		self.bus_conflicts
	}

	/// virtual time spent in delays
	pub fn elapsed(&self) -> Duration {
		self.elapsed
	}

	fn state(&self, pin: Pin) -> PinState {
		self.states.get(&pin).cloned().unwrap_or_default()
	}

	fn is_output(&self, pin: Pin) -> bool {
		self.state(pin).mode == PinMode::Output
	}

	fn data_index(&self, pin: Pin) -> Option<usize> {
		self.pins.data.iter().position(|&p| p == pin)
	}

	// address lines above the chip size are not connected
	fn cell(&self) -> usize {
		self.latched.address() as usize % self.memory.len()
	}

	// chip outputs while OE is low and WE is high
	fn chip_drives_bus(&self) -> bool {
		self.latched.is_output_enabled() && self.state(self.pins.write_enable).high
	}

	fn data_bus(&self) -> u8 {
		let mut value = 0u8;
		for (bit, &pin) in self.pins.data.iter().enumerate() {
			let state = self.state(pin);
			// undriven lines float high
			let high = state.mode == PinMode::Input || state.high;
			if high {
				value |= 1 << bit;
			}
		}
		value
	}

	fn record(&mut self, event: BusEvent) {
		if self.record_events {
			self.events.push(event);
		}
	}

	fn rising_edge(&mut self, pin: Pin) {
		if pin == self.pins.shift_clock {
			let data = self.state(self.pins.shift_data).high;
			self.shift = (self.shift << 1) | data as u16;
			self.record(BusEvent::Clock);
		} else if pin == self.pins.shift_latch {
			self.latched = ShiftWord(self.shift);
			self.record(BusEvent::Latch);
		} else if pin == self.pins.write_enable {
			self.write_pulses += 1;
			self.record(BusEvent::WritePulse);
			if !self.latched.is_output_enabled() {
				let cell = self.cell();
				self.memory[cell] = self.data_bus();
			}
		}
	}
}

impl Hardware for SimulatedBoard {
	fn set_mode(&mut self, pin: Pin, mode: PinMode) {
		self.states.entry(pin).or_default().mode = mode;
	}

	fn write_pin(&mut self, pin: Pin, high: bool) {
		let was_output = self.is_output(pin);
		let previous = {
			let state = self.states.entry(pin).or_default();
			let previous = state.high;
			state.high = high;
			previous
		};

		if !was_output {
			return;
		}
		if self.data_index(pin).is_some() {
			if self.chip_drives_bus() {
				self.bus_conflicts += 1;
			}
		} else if !previous && high {
			self.rising_edge(pin);
		}
	}

	fn read_pin(&mut self, pin: Pin) -> bool {
		match self.data_index(pin) {
			Some(bit) if !self.is_output(pin) => {
				if self.chip_drives_bus() {
					0 != self.memory[self.cell()] & (1 << bit)
				} else {
					// floating
					true
				}
			},
			_ => self.state(pin).high,
		}
	}

	fn delay(&mut self, duration: Duration) {
		self.elapsed += duration;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn output(board: &mut SimulatedBoard, pin: Pin) {
		board.set_mode(pin, PinMode::Output);
	}

	#[test]
	fn shifts_msb_first_and_latches_on_rising_edge() {
		let pins = BusPins::default();
		let mut board = SimulatedBoard::new(pins.clone(), 0x07ff);
		for &pin in [pins.shift_data, pins.shift_clock, pins.shift_latch].iter() {
			output(&mut board, pin);
		}
		for bit in (0..16).rev() {
			board.write_pin(pins.shift_data, 0 != 0x8421u16 & (1 << bit));
			board.write_pin(pins.shift_clock, true);
			board.write_pin(pins.shift_clock, false);
		}
		assert_eq!(board.latched(), ShiftWord::new(0, false));
		board.write_pin(pins.shift_latch, true);
		assert_eq!(board.latched(), ShiftWord(0x8421));
	}

	#[test]
	fn edges_on_input_pins_are_ignored() {
		let pins = BusPins::default();
		let mut board = SimulatedBoard::new(pins.clone(), 0x07ff);
		board.write_pin(pins.write_enable, true);
		board.write_pin(pins.shift_clock, true);
		assert!(board.events().is_empty());
		assert_eq!(board.write_pulses(), 0);
	}

	#[test]
	fn preloaded_contents() {
		let board = SimulatedBoard::with_contents(BusPins::default(), 0x000f, b"hello");
		assert_eq!(&board.memory()[..5], b"hello");
		assert_eq!(board.memory()[5], 0xff);
		assert_eq!(board.memory().len(), 16);
	}

	#[test]
	fn event_log_can_be_disabled() {
		let pins = BusPins::default();
		let mut board = SimulatedBoard::new(pins.clone(), 0x07ff);
		output(&mut board, pins.shift_clock);
		board.write_pin(pins.shift_clock, true);
		board.set_record_events(false);
		assert!(board.events().is_empty());
		board.write_pin(pins.shift_clock, false);
		board.write_pin(pins.shift_clock, true);
		assert!(board.events().is_empty());
	}
}
