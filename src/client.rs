//! Host side of the protocol.

use failure::Fail;

use crate::handlers::opcodes;
use crate::link::{
	Link,
	Transport,
	TransportError,
};
use crate::server::signals::*;

/// chunk size of `dump`, also the width of a hex listing line
pub const DUMP_CHUNK: usize = 16;
/// largest payload a single length byte can announce
pub const MAX_CHUNK: usize = 255;

#[derive(Debug, Fail)]
pub enum ClientError {
	#[fail(display = "expected signal {:?}, got 0x{:02x}", expected, got)]
	UnexpectedSignal {
		expected: char,
		got: u8,
	},
	#[fail(display = "no session established")]
	NotConnected,
	#[fail(display = "device rejected request 0x{:02x} and closed the session", opcode)]
	Rejected {
		opcode: u8,
	},
	#[fail(display = "range 0x{:04x}+{} outside of EEPROM (max address 0x{:04x})", address, len, max_address)]
	OutOfRange {
		address: u16,
		len: usize,
		max_address: u16,
	},
}

pub struct Client<L: Link> {
	transport: Transport<L>,
	connected: bool,
	max_address: Option<u16>,
}

impl<L: Link> Client<L> {
	pub fn new(transport: Transport<L>) -> Self {
		Client {
			transport,
			connected: false,
			max_address: None,
		}
	}

	pub fn is_connected(&self) -> bool {
		self.connected
	}

	fn expect_signal(&mut self, expected: u8) -> crate::AResult<()> {
		let got = self.transport.read_i8()? as u8;
		if got != expected {
			if got == ERR || got == RST || got == BYE {
				self.connected = false;
			}
			return Err(ClientError::UnexpectedSignal { expected: expected as char, got }.into());
		}
		Ok(())
	}

	/// `SYN` → `ACK`
	pub fn connect(&mut self) -> crate::AResult<()> {
		if self.connected {
			return Ok(());
		}
		self.transport.write_i8(SYN as i8)?;
		self.expect_signal(ACK)?;
		self.connected = true;
		debug!("connected");
		Ok(())
	}

	/// `BYE` → `BYE`
	pub fn disconnect(&mut self) -> crate::AResult<()> {
		if !self.connected {
			return Ok(());
		}
		self.connected = false;
		self.transport.write_i8(BYE as i8)?;
		self.expect_signal(BYE)?;
		debug!("disconnected");
		Ok(())
	}

	/// Sends `opcode`, runs `body` between `ACK` and `FIN`.
	///
	/// `body` writes the request payload and reads the response. A failed
	/// handler on the device answers `ACK` .. `ERR`; since the `ERR` can land
	/// where `body` expects response data, any failure drops the session and
	/// discards pending input, so the next `connect` starts from a clean link.
	pub fn call<T, F>(&mut self, opcode: u8, body: F) -> crate::AResult<T>
	where
		F: FnOnce(&mut Transport<L>) -> crate::AResult<T>,
	{
		if !self.connected {
			return Err(ClientError::NotConnected.into());
		}
		let e = match self.exchange(opcode, body) {
			Ok(result) => return Ok(result),
			Err(e) => e,
		};

		// false once expect_signal saw ERR, RST or BYE
		let device_in_session = self.connected;
		self.connected = false;
		if TransportError::is_closed(&e) {
			return Err(e);
		}
		if self.drain().last() == Some(&ERR) {
			warn!("request 0x{:02x} failed on the device", opcode);
			return Err(ClientError::Rejected { opcode }.into());
		}
		if device_in_session {
			// answered with BYE, or RST if the device already left
			debug!("resyncing after failed request 0x{:02x}: {}", opcode, e);
			if self.transport.write_i8(BYE as i8).is_ok() {
				let _ = self.transport.read_i8();
			}
			self.drain();
		}
		Err(e)
	}

	fn exchange<T, F>(&mut self, opcode: u8, body: F) -> crate::AResult<T>
	where
		F: FnOnce(&mut Transport<L>) -> crate::AResult<T>,
	{
		self.transport.write_i8(opcode as i8)?;
		self.expect_signal(ACK)?;
		let result = body(&mut self.transport)?;
		self.expect_signal(FIN)?;
		Ok(result)
	}

	// everything already received; nothing of it can be framed anymore
	fn drain(&mut self) -> Vec<u8> {
		let mut rest = Vec::new();
		loop {
			let pending = match self.transport.available() {
				Ok(0) | Err(_) => break,
				Ok(n) => n,
			};
			match self.transport.read_buffer(pending) {
				Ok(data) => rest.extend(data),
				Err(_) => break,
			}
		}
		rest
	}

	/// cached after the first request
	pub fn max_address(&mut self) -> crate::AResult<u16> {
		if let Some(max) = self.max_address {
			return Ok(max);
		}
		let max = self.call(opcodes::MAX_ADDRESS, |t| t.read_i16())? as u16;
		self.max_address = Some(max);
		Ok(max)
	}

	pub fn check_range(&mut self, address: u16, len: usize) -> crate::AResult<()> {
		let max_address = self.max_address()?;
		let end = max_address as usize + 1;
		if address as usize >= end || address as usize + len > end {
			return Err(ClientError::OutOfRange { address, len, max_address }.into());
		}
		Ok(())
	}

	pub fn identify(&mut self) -> crate::AResult<String> {
		self.call(opcodes::IDENTIFY, |t| t.read_string())
	}

	pub fn echo(&mut self, data: &[u8]) -> crate::AResult<Vec<u8>> {
		ensure!(data.len() <= MAX_CHUNK, "echo payload too long: {} bytes", data.len());
		self.call(opcodes::ECHO, |t| {
			t.write_i8(data.len() as u8 as i8)?;
			t.write_buffer(data)?;
			let len = t.read_i8()? as u8 as usize;
			t.read_buffer(len)
		})
	}

	pub fn read(&mut self, address: u16) -> crate::AResult<u8> {
		self.check_range(address, 1)?;
		self.call(opcodes::READ, |t| {
			t.write_i16(address as i16)?;
			Ok(t.read_i8()? as u8)
		})
	}

	pub fn read_buffer(&mut self, address: u16, len: usize) -> crate::AResult<Vec<u8>> {
		ensure!(len <= MAX_CHUNK, "read too long: {} bytes", len);
		self.check_range(address, len)?;
		self.call(opcodes::READ_BUFFER, |t| {
			t.write_i16(address as i16)?;
			t.write_i8(len as u8 as i8)?;
			t.read_buffer(len)
		})
	}

	pub fn write(&mut self, address: u16, data: u8) -> crate::AResult<()> {
		self.check_range(address, 1)?;
		self.call(opcodes::WRITE, |t| {
			t.write_i16(address as i16)?;
			t.write_i8(data as i8)
		})
	}

	pub fn write_buffer(&mut self, address: u16, data: &[u8]) -> crate::AResult<()> {
		ensure!(data.len() <= MAX_CHUNK, "write too long: {} bytes", data.len());
		self.check_range(address, data.len())?;
		self.call(opcodes::WRITE_BUFFER, |t| {
			t.write_i16(address as i16)?;
			t.write_i8(data.len() as u8 as i8)?;
			t.write_buffer(data)
		})
	}

	/// Reads `len` bytes starting at `address`; `None` reads up to the end
	/// of the chip.
	pub fn dump(&mut self, address: u16, len: Option<usize>) -> crate::AResult<Vec<u8>> {
		let end = self.max_address()? as usize + 1;
		let len = len.unwrap_or_else(|| end.saturating_sub(address as usize));
		self.check_range(address, len)?;
		let mut result = Vec::with_capacity(len);
		while result.len() < len {
			let chunk = (len - result.len()).min(DUMP_CHUNK);
			let at = address + result.len() as u16;
			result.extend(self.read_buffer(at, chunk)?);
		}
		Ok(result)
	}

	/// Writes `data` at `address` and verifies it by reading it back.
	pub fn program(&mut self, address: u16, data: &[u8]) -> crate::AResult<()> {
		self.check_range(address, data.len())?;
		for (index, chunk) in data.chunks(MAX_CHUNK).enumerate() {
			let at = address + (index * MAX_CHUNK) as u16;
			debug!("programming {} bytes at 0x{:04x}", chunk.len(), at);
			self.write_buffer(at, chunk)?;
		}
		let stored = self.dump(address, Some(data.len()))?;
		for (offset, (&expected, &found)) in data.iter().zip(&stored).enumerate() {
			ensure!(expected == found,
				"Verify failed at 0x{:04x}: expected 0x{:02x}, EEPROM has 0x{:02x}",
				address as usize + offset, expected, found
			);
		}
		info!("programmed and verified {} bytes at 0x{:04x}", data.len(), address);
		Ok(())
	}

	/// clears the whole chip to 0x00
	pub fn zero(&mut self) -> crate::AResult<()> {
		let size = self.max_address()? as usize + 1;
		self.program(0, &vec![0u8; size])
	}
}

/// Hex listing, `DUMP_CHUNK` bytes per line with the address in front.
pub fn hex_listing(address: u16, data: &[u8]) -> String {
	let mut out = String::new();
	for (index, line) in data.chunks(DUMP_CHUNK).enumerate() {
		out.push_str(&format!("{:04x}:", address as usize + index * DUMP_CHUNK));
		for (i, b) in line.iter().enumerate() {
			if i == DUMP_CHUNK / 2 {
				out.push(' ');
			}
			out.push_str(&format!(" {:02x}", b));
		}
		out.push('\n');
	}
	out
}
