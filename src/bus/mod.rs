/// Parallel EEPROM (28C16 style, 2K x 8) behind two cascaded 8-bit shift registers.
///
/// The address bus is fed through a serial-in/parallel-out chain: 16 bits are
/// shifted in MSB first (high byte first), then committed to the register
/// outputs with a single pulse on the latch line.
///
/// Latched word layout:
/// - bit 15: OUTPUT ENABLE of the chip, active low (0 = chip drives data bus)
/// - bits 0..14: address lines (only the low bits are wired on small chips)
///
/// The 8 data lines are connected directly and switch direction depending on
/// the operation: input while reading, output while writing.
///
/// WRITE ENABLE (active low) is connected directly; a short low pulse while
/// output is disabled starts the internal write cycle of the chip, which then
/// needs a few milliseconds before it accepts the next command.

mod controller;
mod hardware;
mod low_level;
mod pins;
mod word;

pub use self::controller::{
	Eeprom,
	EepromController,
	WRITE_CYCLE,
	WRITE_PULSE,
};

pub use self::hardware::{
	Hardware,
	Pin,
	PinMode,
	reliable_sleep,
};

pub use self::pins::BusPins;

pub use self::word::ShiftWord;
