use super::Pin;

/// Wiring of the bus; fixed for the lifetime of a controller.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct BusPins {
	pub shift_data: Pin,
	pub shift_clock: Pin,
	pub shift_latch: Pin,
	/// active low
	pub write_enable: Pin,
	/// D0 first
	pub data: [Pin; 8],
}

impl BusPins {
	/// all pins the controller drives or samples, control pins first
	pub fn all(&self) -> Vec<Pin> {
		let mut pins = vec![self.shift_data, self.shift_clock, self.shift_latch, self.write_enable];
		pins.extend_from_slice(&self.data);
		pins
	}

	pub fn has_duplicates(&self) -> bool {
		let mut pins = self.all();
		pins.sort();
		pins.windows(2).any(|w| w[0] == w[1])
	}
}

impl Default for BusPins {
	fn default() -> Self {
		BusPins {
			shift_data: 4,
			shift_clock: 2,
			shift_latch: 3,
			write_enable: 13,
			data: [5, 6, 7, 8, 9, 10, 11, 12],
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_wiring_is_unique() {
		let pins = BusPins::default();
		assert!(!pins.has_duplicates());
		assert_eq!(pins.all().len(), 12);
	}

	#[test]
	fn duplicate_detection() {
		let mut pins = BusPins::default();
		pins.data[3] = pins.write_enable;
		assert!(pins.has_duplicates());
	}
}
