//! The EEPROM requests served by the bridge.
//!
//! Payload integers are little-endian, lengths single unsigned bytes. Each
//! handler reads its whole payload before checking it, so a rejected request
//! never leaves half a payload in the receive buffer.

use crate::bus::Eeprom;
use crate::link::{
	Link,
	Transport,
};
use crate::server::Server;

pub mod opcodes {
	pub const MAX_ADDRESS: u8 = b'm';
	pub const IDENTIFY: u8 = b'i';
	pub const ECHO: u8 = b'e';
	pub const READ: u8 = b'r';
	pub const READ_BUFFER: u8 = b'R';
	pub const WRITE: u8 = b'w';
	pub const WRITE_BUFFER: u8 = b'W';
}

use self::opcodes::*;

pub const IDENTITY: &str = concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"));

fn read_len<L: Link>(transport: &mut Transport<L>) -> crate::AResult<usize> {
	Ok(transport.read_i8()? as u8 as usize)
}

fn read_address<L: Link>(transport: &mut Transport<L>) -> crate::AResult<u16> {
	Ok(transport.read_i16()? as u16)
}

fn check_range<E: Eeprom>(eeprom: &E, address: u16, len: usize) -> crate::AResult<()> {
	ensure!(
		eeprom.contains(address, len),
		"range 0x{:04x}+{} outside of EEPROM (max address 0x{:04x})",
		address, len, eeprom.max_address()
	);
	Ok(())
}

pub fn max_address<E: Eeprom, L: Link>(eeprom: &mut E, transport: &mut Transport<L>) -> crate::AResult<()> {
	transport.write_i16(eeprom.max_address() as i16)
}

pub fn identify<E, L: Link>(_: &mut E, transport: &mut Transport<L>) -> crate::AResult<()> {
	transport.print(IDENTITY)
}

pub fn echo<E, L: Link>(_: &mut E, transport: &mut Transport<L>) -> crate::AResult<()> {
	let len = read_len(transport)?;
	let data = transport.read_buffer(len)?;
	transport.write_i8(len as u8 as i8)?;
	transport.write_buffer(&data)
}

pub fn read<E: Eeprom, L: Link>(eeprom: &mut E, transport: &mut Transport<L>) -> crate::AResult<()> {
	let address = read_address(transport)?;
	check_range(eeprom, address, 1)?;
	let data = eeprom.read(address);
	trace!("read 0x{:04x}: 0x{:02x}", address, data);
	transport.write_i8(data as i8)
}

pub fn read_buffer<E: Eeprom, L: Link>(eeprom: &mut E, transport: &mut Transport<L>) -> crate::AResult<()> {
	let address = read_address(transport)?;
	let len = read_len(transport)?;
	check_range(eeprom, address, len)?;
	let mut data = vec![0u8; len];
	eeprom.read_into(address, &mut data);
	debug!("read {} bytes at 0x{:04x}", len, address);
	transport.write_buffer(&data)
}

pub fn write<E: Eeprom, L: Link>(eeprom: &mut E, transport: &mut Transport<L>) -> crate::AResult<()> {
	let address = read_address(transport)?;
	let data = transport.read_i8()? as u8;
	check_range(eeprom, address, 1)?;
	if eeprom.write(address, data) {
		trace!("wrote 0x{:04x}: 0x{:02x}", address, data);
	}
	Ok(())
}

pub fn write_buffer<E: Eeprom, L: Link>(eeprom: &mut E, transport: &mut Transport<L>) -> crate::AResult<()> {
	let address = read_address(transport)?;
	let len = read_len(transport)?;
	let data = transport.read_buffer(len)?;
	check_range(eeprom, address, len)?;
	let written = eeprom.write_from(address, &data);
	debug!("wrote {} bytes at 0x{:04x} ({} write cycles)", len, address, written);
	Ok(())
}

/// Installs every EEPROM request on `server`.
pub fn register_all<E, L>(server: &mut Server<E, L>) -> crate::AResult<()>
where
	E: Eeprom + 'static,
	L: Link + 'static,
{
	server.register_handler(MAX_ADDRESS, max_address::<E, L>)?;
	server.register_handler(IDENTIFY, identify::<E, L>)?;
	server.register_handler(ECHO, echo::<E, L>)?;
	server.register_handler(READ, read::<E, L>)?;
	server.register_handler(READ_BUFFER, read_buffer::<E, L>)?;
	server.register_handler(WRITE, write::<E, L>)?;
	server.register_handler(WRITE_BUFFER, write_buffer::<E, L>)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	use crate::link::MemoryLink;

	/// plain memory, no bus
	struct Cells {
		data: Vec<u8>,
		writes: usize,
	}

	impl Eeprom for Cells {
		fn max_address(&self) -> u16 {
			self.data.len() as u16 - 1
		}

		fn read(&mut self, address: u16) -> u8 {
			self.data[address as usize]
		}

		fn write(&mut self, address: u16, data: u8) -> bool {
			if self.data[address as usize] == data {
				return false;
			}
			self.data[address as usize] = data;
			self.writes += 1;
			true
		}
	}

	fn setup() -> (Cells, Transport<MemoryLink>, MemoryLink) {
		let (local, peer) = MemoryLink::pair();
		let mut transport = Transport::new(local);
		transport.set_receive_timeout(Duration::from_millis(10));
		let cells = Cells { data: (0..16).collect(), writes: 0 };
		(cells, transport, peer)
	}

	#[test]
	fn max_address_is_i16() {
		let (mut cells, mut t, peer) = setup();
		max_address(&mut cells, &mut t).unwrap();
		assert_eq!(peer.received(), vec![0x0f, 0x00]);
	}

	#[test]
	fn identify_is_nul_terminated() {
		let (mut cells, mut t, peer) = setup();
		identify(&mut cells, &mut t).unwrap();
		let mut expected = IDENTITY.as_bytes().to_vec();
		expected.push(0);
		assert_eq!(peer.received(), expected);
	}

	#[test]
	fn echo_returns_len_and_bytes() {
		let (mut cells, mut t, peer) = setup();
		peer.send(&[3, b'a', b'b', b'c']);
		echo(&mut cells, &mut t).unwrap();
		assert_eq!(peer.received(), vec![3, b'a', b'b', b'c']);

		peer.send(&[0]);
		echo(&mut cells, &mut t).unwrap();
		assert_eq!(peer.received(), vec![0]);
	}

	#[test]
	fn read_single_and_buffer() {
		let (mut cells, mut t, peer) = setup();
		peer.send(&[0x05, 0x00]);
		read(&mut cells, &mut t).unwrap();
		assert_eq!(peer.received(), vec![5]);

		peer.send(&[0x0c, 0x00, 4]);
		read_buffer(&mut cells, &mut t).unwrap();
		assert_eq!(peer.received(), vec![12, 13, 14, 15]);
	}

	#[test]
	fn read_out_of_range() {
		let (mut cells, mut t, peer) = setup();
		peer.send(&[0x10, 0x00]);
		assert!(read(&mut cells, &mut t).is_err());

		peer.send(&[0x0d, 0x00, 4]);
		assert!(read_buffer(&mut cells, &mut t).is_err());
		assert!(peer.received().is_empty());
		assert_eq!(t.available().unwrap(), 0);
	}

	#[test]
	fn writes_skip_unchanged_cells() {
		let (mut cells, mut t, peer) = setup();
		peer.send(&[0x02, 0x00, 0x02]);
		write(&mut cells, &mut t).unwrap();
		assert_eq!(cells.writes, 0);

		peer.send(&[0x02, 0x00, 3, 0xaa, 0x03, 0xbb]);
		write_buffer(&mut cells, &mut t).unwrap();
		assert_eq!(&cells.data[2..5], &[0xaa, 0x03, 0xbb]);
		assert_eq!(cells.writes, 2);
		assert!(peer.received().is_empty());
	}

	#[test]
	fn rejected_write_buffer_consumes_payload() {
		let (mut cells, mut t, peer) = setup();
		peer.send(&[0x0e, 0x00, 3, 1, 2, 3]);
		assert!(write_buffer(&mut cells, &mut t).is_err());
		assert_eq!(t.available().unwrap(), 0);
		assert_eq!(cells.writes, 0);
	}

	#[test]
	fn all_handlers_register() {
		let (cells, t, _peer) = setup();
		let mut server = Server::new(t, cells, crate::config::ServerConfig::default());
		register_all(&mut server).unwrap();
		assert_eq!(server.handlers().opcodes(), vec![b'R', b'W', b'e', b'i', b'm', b'r', b'w']);
	}

	#[test]
	fn short_payload_times_out() {
		let (mut cells, mut t, peer) = setup();
		peer.send(&[0x02]);
		let e = write(&mut cells, &mut t).unwrap_err();
		assert!(crate::link::TransportError::is_timeout(&e));
	}
}
