use std::thread;
use std::time::{
	Duration,
	Instant,
};

pub fn reliable_sleep(mut duration: Duration) {
	loop {
		let now = Instant::now();
		thread::sleep(duration);
		let elapsed = now.elapsed();
		if elapsed >= duration {
			return;
		}
		duration -= elapsed;
	}
}

/// Pin number as understood by the GPIO backend.
pub type Pin = u32;

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum PinMode {
	Input,
	Output,
}

/// Raw pin access the bus controller is built on.
pub trait Hardware {
	fn set_mode(&mut self, pin: Pin, mode: PinMode);
	fn write_pin(&mut self, pin: Pin, high: bool);
	fn read_pin(&mut self, pin: Pin) -> bool;

	// delay for (at least) `duration`
	fn delay(&mut self, duration: Duration) {
		reliable_sleep(duration);
	}
}

impl<'a, H: ?Sized + Hardware> Hardware for &'a mut H {
	fn set_mode(&mut self, pin: Pin, mode: PinMode) {
		H::set_mode(*self, pin, mode)
	}
	fn write_pin(&mut self, pin: Pin, high: bool) {
		H::write_pin(*self, pin, high)
	}
	fn read_pin(&mut self, pin: Pin) -> bool {
		H::read_pin(*self, pin)
	}
	fn delay(&mut self, duration: Duration) {
		H::delay(*self, duration)
	}
}

impl<H: ?Sized + Hardware> Hardware for Box<H> {
	fn set_mode(&mut self, pin: Pin, mode: PinMode) {
		(**self).set_mode(pin, mode)
	}
	fn write_pin(&mut self, pin: Pin, high: bool) {
		(**self).write_pin(pin, high)
	}
	fn read_pin(&mut self, pin: Pin) -> bool {
		(**self).read_pin(pin)
	}
	fn delay(&mut self, duration: Duration) {
		(**self).delay(duration)
	}
}
