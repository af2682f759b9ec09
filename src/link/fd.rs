use std::ffi::CString;
use std::fs;
use std::io::{
	self,
	Read,
	Write,
};
use std::mem;
use std::net::TcpStream;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{
	AsRawFd,
	FromRawFd,
	RawFd,
};
use std::path::Path;

use libc::{
	O_CLOEXEC,
	O_NOCTTY,
	O_NONBLOCK,
	O_RDWR,
	POLLERR,
	POLLHUP,
	POLLIN,
	POLLNVAL,
	POLLOUT,
	POLLRDHUP,
	TCIOFLUSH,
	TCSANOW,
	c_int,
	open,
};

use super::Link;

// wait granularity while the kernel buffer is full
const WRITE_POLL_MS: c_int = 100;

fn poll_fd(fd: RawFd, events: i16, timeout_ms: c_int) -> io::Result<i16> {
	let mut pfd = libc::pollfd {
		fd,
		events,
		revents: 0,
	};
	let res = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
	if res < 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(pfd.revents)
}

fn bytes_readable(fd: RawFd) -> io::Result<usize> {
	let mut count: c_int = 0;
	let res = unsafe { libc::ioctl(fd, libc::FIONREAD, &mut count) };
	if res < 0 {
		return Err(io::Error::last_os_error());
	}
	Ok(count.max(0) as usize)
}

/// Link over a non-blocking file descriptor (tty or socket).
pub struct FdLink<S: AsRawFd + Read + Write> {
	stream: S,
	hung_up: bool,
}

impl<S: AsRawFd + Read + Write> FdLink<S> {
	/// `stream` must already be in non-blocking mode
	pub fn new(stream: S) -> Self {
		FdLink {
			stream,
			hung_up: false,
		}
	}
}

impl FdLink<fs::File> {
	/// Drops the exclusive claim `open_serial` put on the tty, so the port can
	/// be opened again while this link is still around.
	pub fn release_exclusive(&mut self) -> io::Result<()> {
		if 0 != unsafe { libc::ioctl(self.stream.as_raw_fd(), libc::TIOCNXCL) } {
			return Err(io::Error::last_os_error());
		}
		Ok(())
	}
}

impl FdLink<TcpStream> {
	pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
		stream.set_nonblocking(true)?;
		stream.set_nodelay(true)?;
		Ok(FdLink::new(stream))
	}
}

impl<S: AsRawFd + Read + Write> Link for FdLink<S> {
	fn is_connected(&mut self) -> bool {
		if self.hung_up {
			return false;
		}
		let fd = self.stream.as_raw_fd();
		match poll_fd(fd, POLLIN | POLLRDHUP, 0) {
			Ok(revents) => {
				if 0 != revents & (POLLHUP | POLLERR | POLLNVAL) {
					self.hung_up = true;
				} else if 0 != revents & POLLRDHUP {
					// peer shut down its side; still connected while data is pending
					self.hung_up = bytes_readable(fd).map(|n| n == 0).unwrap_or(true);
				}
			},
			Err(e) => {
				warn!("poll on link failed: {}", e);
				self.hung_up = true;
			},
		}
		!self.hung_up
	}

	fn available(&mut self) -> io::Result<usize> {
		bytes_readable(self.stream.as_raw_fd())
	}

	fn read_available(&mut self, target: &mut [u8]) -> io::Result<usize> {
		if target.is_empty() {
			return Ok(0);
		}
		match self.stream.read(target) {
			Ok(0) => {
				self.hung_up = true;
				Ok(0)
			},
			Ok(n) => Ok(n),
			Err(ref e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => Ok(0),
			Err(e) => Err(e),
		}
	}

	fn write_all(&mut self, mut data: &[u8]) -> io::Result<()> {
		while !data.is_empty() {
			match self.stream.write(data) {
				Ok(0) => return Err(io::Error::new(io::ErrorKind::WriteZero, "link accepted no data")),
				Ok(n) => data = &data[n..],
				Err(ref e) if e.kind() == io::ErrorKind::Interrupted => (),
				Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
					let revents = poll_fd(self.stream.as_raw_fd(), POLLOUT, WRITE_POLL_MS)?;
					if 0 != revents & (POLLHUP | POLLERR | POLLNVAL) {
						self.hung_up = true;
						return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link hung up while writing"));
					}
				},
				Err(e) => return Err(e),
			}
		}
		Ok(())
	}

	fn flush(&mut self) -> io::Result<()> {
		self.stream.flush()
	}
}

fn baud_rate(baud: u32) -> crate::AResult<libc::speed_t> {
	Ok(match baud {
		1200 => libc::B1200,
		2400 => libc::B2400,
		4800 => libc::B4800,
		9600 => libc::B9600,
		19200 => libc::B19200,
		38400 => libc::B38400,
		57600 => libc::B57600,
		115200 => libc::B115200,
		230400 => libc::B230400,
		_ => bail!("unsupported baud rate: {}", baud),
	})
}

// 8N1, no flow control, no line discipline
fn configure_raw(fd: RawFd, speed: libc::speed_t) -> io::Result<()> {
	unsafe {
		let mut tio: libc::termios = mem::zeroed();
		if 0 != libc::tcgetattr(fd, &mut tio) {
			return Err(io::Error::last_os_error());
		}
		libc::cfmakeraw(&mut tio);
		tio.c_cflag |= libc::CLOCAL | libc::CREAD;
		tio.c_cc[libc::VMIN] = 0;
		tio.c_cc[libc::VTIME] = 0;
		if 0 != libc::cfsetispeed(&mut tio, speed) || 0 != libc::cfsetospeed(&mut tio, speed) {
			return Err(io::Error::last_os_error());
		}
		if 0 != libc::tcsetattr(fd, TCSANOW, &tio) {
			return Err(io::Error::last_os_error());
		}
		// drop whatever arrived before we were ready
		libc::tcflush(fd, TCIOFLUSH);
	}
	Ok(())
}

/// Opens `path` as a raw, non-blocking tty at `baud`.
///
/// The port is claimed exclusively (`TIOCEXCL`): further opens fail with
/// `EBUSY` while the returned link is alive (root is exempt).
pub fn open_serial(path: &Path, baud: u32) -> crate::AResult<FdLink<fs::File>> {
	let speed = baud_rate(baud)?;

	with_context!(("open serial port {}", path.display()), {
		let c_path = CString::new(path.as_os_str().as_bytes())?;
		let fd = unsafe { open(c_path.as_ptr(), O_RDWR | O_NOCTTY | O_NONBLOCK | O_CLOEXEC) };
		if -1 == fd {
			return Err(io::Error::last_os_error().into());
		}
		// closes the fd on every error path below
		let file = unsafe { fs::File::from_raw_fd(fd) };
		if 0 != unsafe { libc::ioctl(fd, libc::TIOCEXCL) } {
			return Err(io::Error::last_os_error().into());
		}
		configure_raw(fd, speed)?;

		debug!("opened {} at {} baud", path.display(), baud);
		Ok(FdLink::new(file))
	})
}
