use std::fmt;

// latched word layout
const OUTPUT_DISABLE: u16 = 0x8000;
const ADDRESS_MASK:   u16 = 0x7fff;

/// 16-bit word pushed through the shift register chain.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ShiftWord(pub u16);

impl ShiftWord {
	/// highest address the chain can carry; the top bit is OUTPUT ENABLE
	pub const MAX_ADDRESS: u16 = ADDRESS_MASK;

	pub fn new(address: u16, output_enable: bool) -> Self {
		let flag = if output_enable { 0 } else { OUTPUT_DISABLE };
		ShiftWord((address & ADDRESS_MASK) | flag)
	}

	pub fn from_bytes(high: u8, low: u8) -> Self {
		ShiftWord((high as u16) << 8 | low as u16)
	}

	pub fn address(&self) -> u16 {
		self.0 & ADDRESS_MASK
	}

	// OUTPUT ENABLE is active low
	pub fn is_output_enabled(&self) -> bool {
		0 == self.0 & OUTPUT_DISABLE
	}

	/// first byte on the wire
	pub fn high(&self) -> u8 {
		(self.0 >> 8) as u8
	}

	/// second byte on the wire
	pub fn low(&self) -> u8 {
		self.0 as u8
	}
}

impl fmt::Display for ShiftWord {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "0x{:04x}", self.0)
	}
}

impl fmt::Debug for ShiftWord {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "0x{:04x} (address: 0x{:04x}", self.0, self.address())?;
		if self.is_output_enabled() { write!(f, " [OE]")?; }
		write!(f, ")")
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn output_enable_is_inverted_top_bit() {
		let enabled = ShiftWord::new(0x0123, true);
		assert_eq!(enabled.0, 0x0123);
		assert!(enabled.is_output_enabled());

		let disabled = ShiftWord::new(0x0123, false);
		assert_eq!(disabled.0, 0x8123);
		assert!(!disabled.is_output_enabled());
		assert_eq!(disabled.address(), 0x0123);
	}

	#[test]
	fn high_byte_goes_first() {
		let word = ShiftWord::new(0x07ff, false);
		assert_eq!(word.high(), 0x87);
		assert_eq!(word.low(), 0xff);
		assert_eq!(ShiftWord::from_bytes(word.high(), word.low()), word);
	}

	#[test]
	fn address_cannot_clobber_output_enable() {
		let word = ShiftWord::new(0xffff, true);
		assert!(word.is_output_enabled());
		assert_eq!(word.address(), ShiftWord::MAX_ADDRESS);
	}

	#[test]
	fn debug_shows_flags() {
		assert_eq!(format!("{:?}", ShiftWord::new(0x10, true)), "0x0010 (address: 0x0010 [OE])");
		assert_eq!(format!("{}", ShiftWord::new(0x10, false)), "0x8010");
	}
}
