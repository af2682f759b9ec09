//! Runtime settings of the bridge; the binaries fill these from the command
//! line.

use std::time::Duration;

use crate::bus::{
	BusPins,
	Pin,
	ShiftWord,
};
use crate::link::{
	DEFAULT_POLL_INTERVAL,
	DEFAULT_RECEIVE_TIMEOUT,
};

/// 2 KiB part (28C16)
pub const DEFAULT_MAX_ADDRESS: u16 = 0x07ff;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ServerConfig {
	/// how long a single handshake attempt waits for the first byte
	pub handshake_wait: Duration,
	/// how long `serve` waits for an opcode before reporting idle
	pub request_wait: Duration,
	/// pause after an idle `serve`
	pub idle_delay: Duration,
	/// pause between attempts to reopen a closed link
	pub reopen_delay: Duration,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig {
			handshake_wait: Duration::from_secs(1),
			request_wait: Duration::from_secs(1),
			idle_delay: Duration::from_millis(20),
			reopen_delay: Duration::from_millis(200),
		}
	}
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct BridgeConfig {
	pub pins: BusPins,
	pub max_address: u16,
	pub receive_timeout: Duration,
	pub poll_interval: Duration,
	pub server: ServerConfig,
}

impl BridgeConfig {
	pub fn validate(&self) -> crate::AResult<()> {
		ensure!(self.max_address <= ShiftWord::MAX_ADDRESS, "max address 0x{:04x} doesn't fit into the 15 address bits", self.max_address);
		ensure!(!self.pins.has_duplicates(), "bus pins must be distinct: {:?}", self.pins.all());
		Ok(())
	}
}

impl Default for BridgeConfig {
	fn default() -> Self {
		BridgeConfig {
			pins: BusPins::default(),
			max_address: DEFAULT_MAX_ADDRESS,
			receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
			poll_interval: DEFAULT_POLL_INTERVAL,
			server: ServerConfig::default(),
		}
	}
}

/// `0x`-prefixed hex or decimal
pub fn parse_address(s: &str) -> crate::AResult<u16> {
	let s = s.trim();
	with_context!(("invalid address {:?}", s), {
		if s.starts_with("0x") || s.starts_with("0X") {
			Ok(u16::from_str_radix(&s[2..], 16)?)
		} else {
			Ok(s.parse::<u16>()?)
		}
	})
}

pub fn parse_pin(s: &str) -> crate::AResult<Pin> {
	let s = s.trim();
	with_context!(("invalid pin {:?}", s), Ok(s.parse::<Pin>()?))
}

/// eight comma separated pins, D0 first
pub fn parse_pin_list(s: &str) -> crate::AResult<[Pin; 8]> {
	let parts: Vec<&str> = s.split(',').collect();
	ensure!(parts.len() == 8, "expected 8 data pins, got {} in {:?}", parts.len(), s);
	let mut pins = [0; 8];
	for (pin, part) in pins.iter_mut().zip(parts) {
		*pin = parse_pin(part)?;
	}
	Ok(pins)
}

pub fn parse_millis(s: &str) -> crate::AResult<Duration> {
	let s = s.trim();
	with_context!(("invalid duration {:?} (milliseconds)", s), Ok(Duration::from_millis(s.parse::<u64>()?)))
}
