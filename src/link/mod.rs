//! Byte stream between host and bridge.
//!
//! `Link` is the raw, non-blocking byte pipe (tty, socket, memory). `Transport`
//! puts bounded waits and the wire encoding on top of it: integers are signed
//! little-endian (8/16/32 bit), strings are raw bytes followed by a single NUL.

use std::io;
use std::thread;
use std::time::{
	Duration,
	Instant,
};

use failure::Fail;

mod fd;
mod memory;

pub use self::fd::{
	FdLink,
	open_serial,
};

pub use self::memory::MemoryLink;

pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub trait Link {
	/// whether the other side is (still) attached
	fn is_connected(&mut self) -> bool;

	/// number of bytes that can be read without blocking
	fn available(&mut self) -> io::Result<usize>;

	/// reads already buffered bytes only, never blocks
	fn read_available(&mut self, target: &mut [u8]) -> io::Result<usize>;

	fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

	fn flush(&mut self) -> io::Result<()> {
		Ok(())
	}
}

impl<'a, L: ?Sized + Link> Link for &'a mut L {
	fn is_connected(&mut self) -> bool {
		L::is_connected(*self)
	}
	fn available(&mut self) -> io::Result<usize> {
		L::available(*self)
	}
	fn read_available(&mut self, target: &mut [u8]) -> io::Result<usize> {
		L::read_available(*self, target)
	}
	fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
		L::write_all(*self, data)
	}
	fn flush(&mut self) -> io::Result<()> {
		L::flush(*self)
	}
}

impl<L: ?Sized + Link> Link for Box<L> {
	fn is_connected(&mut self) -> bool {
		(**self).is_connected()
	}
	fn available(&mut self) -> io::Result<usize> {
		(**self).available()
	}
	fn read_available(&mut self, target: &mut [u8]) -> io::Result<usize> {
		(**self).read_available(target)
	}
	fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
		(**self).write_all(data)
	}
	fn flush(&mut self) -> io::Result<()> {
		(**self).flush()
	}
}

#[derive(Debug, Fail)]
pub enum TransportError {
	#[fail(display = "timed out waiting for {} byte(s), {} available", wanted, available)]
	Timeout {
		wanted: usize,
		available: usize,
	},
	#[fail(display = "link closed")]
	Closed,
}

impl TransportError {
	pub fn is_closed(e: &failure::Error) -> bool {
		match e.downcast_ref::<TransportError>() {
			Some(TransportError::Closed) => true,
			_ => false,
		}
	}

	pub fn is_timeout(e: &failure::Error) -> bool {
		match e.downcast_ref::<TransportError>() {
			Some(TransportError::Timeout { .. }) => true,
			_ => false,
		}
	}
}

// a vanished peer is a closed link, everything else stays an I/O error
fn link_error(e: io::Error) -> failure::Error {
	match e.kind() {
		io::ErrorKind::BrokenPipe
		| io::ErrorKind::ConnectionReset
		| io::ErrorKind::ConnectionAborted
		| io::ErrorKind::UnexpectedEof => TransportError::Closed.into(),
		_ => e.into(),
	}
}

pub struct Transport<L: Link> {
	link: L,
	receive_timeout: Duration,
	poll_interval: Duration,
}

impl<L: Link> Transport<L> {
	pub fn new(link: L) -> Self {
		Transport {
			link,
			receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
			poll_interval: DEFAULT_POLL_INTERVAL,
		}
	}

	pub fn link_mut(&mut self) -> &mut L {
		&mut self.link
	}

	pub fn replace_link(&mut self, link: L) -> L {
		std::mem::replace(&mut self.link, link)
	}

	pub fn is_connected(&mut self) -> bool {
		self.link.is_connected()
	}

	/// default bound for all reads below
	pub fn set_receive_timeout(&mut self, timeout: Duration) {
		self.receive_timeout = timeout;
	}

	/// pause between two checks while waiting for data
	pub fn set_poll_interval(&mut self, interval: Duration) {
		self.poll_interval = interval;
	}

	pub fn available(&mut self) -> crate::AResult<usize> {
		self.link.available().map_err(link_error)
	}

	/// Polls until at least `count` bytes are buffered or `timeout` passed.
	///
	/// Running out of time is not an error, but a closed link is (once the
	/// remaining buffered bytes aren't enough anymore).
	pub fn wait_for_bytes(&mut self, count: usize, timeout: Duration) -> crate::AResult<bool> {
		let start = Instant::now();
		loop {
			if self.available()? >= count {
				return Ok(true);
			}
			if !self.is_connected() {
				return Err(TransportError::Closed.into());
			}
			if start.elapsed() >= timeout {
				return Ok(false);
			}
			thread::sleep(self.poll_interval);
		}
	}

	/// Fills `target` completely, waiting up to the receive timeout.
	pub fn read_into(&mut self, target: &mut [u8]) -> crate::AResult<()> {
		let wanted = target.len();
		if !self.wait_for_bytes(wanted, self.receive_timeout)? {
			let available = self.available()?;
			return Err(TransportError::Timeout { wanted, available }.into());
		}
		let mut filled = 0;
		while filled < wanted {
			let n = self.link.read_available(&mut target[filled..]).map_err(link_error)?;
			ensure!(n > 0, "link announced {} bytes but only delivered {}", wanted, filled);
			filled += n;
		}
		Ok(())
	}

	pub fn read_buffer(&mut self, len: usize) -> crate::AResult<Vec<u8>> {
		let mut buf = vec![0u8; len];
		self.read_into(&mut buf)?;
		Ok(buf)
	}

	pub fn read_i8(&mut self) -> crate::AResult<i8> {
		let mut buf = [0u8; 1];
		self.read_into(&mut buf)?;
		Ok(buf[0] as i8)
	}

	pub fn read_i16(&mut self) -> crate::AResult<i16> {
		let mut buf = [0u8; 2];
		self.read_into(&mut buf)?;
		Ok(i16::from_le_bytes(buf))
	}

	pub fn read_i32(&mut self) -> crate::AResult<i32> {
		let mut buf = [0u8; 4];
		self.read_into(&mut buf)?;
		Ok(i32::from_le_bytes(buf))
	}

	/// reads up to (and consumes) the NUL terminator
	pub fn read_string(&mut self) -> crate::AResult<String> {
		let mut buf = Vec::new();
		loop {
			match self.read_i8()? as u8 {
				0 => break,
				b => buf.push(b),
			}
		}
		Ok(String::from_utf8(buf)?)
	}

	pub fn write_buffer(&mut self, data: &[u8]) -> crate::AResult<()> {
		self.link.write_all(data).map_err(link_error)?;
		self.link.flush().map_err(link_error)
	}

	pub fn write_i8(&mut self, value: i8) -> crate::AResult<()> {
		self.write_buffer(&[value as u8])
	}

	pub fn write_i16(&mut self, value: i16) -> crate::AResult<()> {
		self.write_buffer(&value.to_le_bytes())
	}

	pub fn write_i32(&mut self, value: i32) -> crate::AResult<()> {
		self.write_buffer(&value.to_le_bytes())
	}

	/// text plus NUL terminator
	pub fn print(&mut self, text: &str) -> crate::AResult<()> {
		let mut buf = Vec::with_capacity(text.len() + 1);
		buf.extend_from_slice(text.as_bytes());
		buf.push(0);
		self.write_buffer(&buf)
	}

	/// text, CRLF, then the NUL terminator
	pub fn println(&mut self, text: &str) -> crate::AResult<()> {
		let mut buf = Vec::with_capacity(text.len() + 3);
		buf.extend_from_slice(text.as_bytes());
		buf.extend_from_slice(b"\r\n");
		buf.push(0);
		self.write_buffer(&buf)
	}
}
