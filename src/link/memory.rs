use std::collections::VecDeque;
use std::io;
use std::sync::{
	Arc,
	Mutex,
	MutexGuard,
};

use super::Link;

#[derive(Default, Debug)]
struct Pipe {
	data: VecDeque<u8>,
	closed: bool,
}

#[derive(Clone, Default, Debug)]
struct SharedPipe(Arc<Mutex<Pipe>>);

impl SharedPipe {
	fn lock(&self) -> MutexGuard<Pipe> {
		// a panicking peer doesn't make the buffered bytes invalid
		self.0.lock().unwrap_or_else(|e| e.into_inner())
	}
}

/// One end of an in-memory duplex link.
///
/// Dropping (or `close`-ing) an end hangs up: the other end still gets the
/// bytes already sent, then reports itself disconnected.
#[derive(Debug)]
pub struct MemoryLink {
	rx: SharedPipe,
	tx: SharedPipe,
}

impl MemoryLink {
	pub fn pair() -> (MemoryLink, MemoryLink) {
		let a = SharedPipe::default();
		let b = SharedPipe::default();
		(
			MemoryLink { rx: a.clone(), tx: b.clone() },
			MemoryLink { rx: b, tx: a },
		)
	}

	/// queue bytes for the other end
	pub fn send(&self, data: &[u8]) {
		self.tx.lock().data.extend(data.iter().cloned());
	}

	/// take everything the other end sent so far
	pub fn received(&self) -> Vec<u8> {
		self.rx.lock().data.drain(..).collect()
	}

	pub fn close(&self) {
		self.tx.lock().closed = true;
	}
}

impl Drop for MemoryLink {
	fn drop(&mut self) {
		self.close();
	}
}

impl Link for MemoryLink {
	fn is_connected(&mut self) -> bool {
		!self.rx.lock().closed
	}

	fn available(&mut self) -> io::Result<usize> {
		Ok(self.rx.lock().data.len())
	}

	fn read_available(&mut self, target: &mut [u8]) -> io::Result<usize> {
		let mut pipe = self.rx.lock();
		let n = target.len().min(pipe.data.len());
		for (t, b) in target.iter_mut().zip(pipe.data.drain(..n)) {
			*t = b;
		}
		Ok(n)
	}

	fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
		self.send(data);
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bytes_cross_over() {
		let (mut a, mut b) = MemoryLink::pair();
		a.write_all(b"ping").unwrap();
		assert_eq!(b.available().unwrap(), 4);
		let mut buf = [0u8; 3];
		assert_eq!(b.read_available(&mut buf).unwrap(), 3);
		assert_eq!(&buf, b"pin");
		assert_eq!(b.received(), b"g".to_vec());
		assert_eq!(a.available().unwrap(), 0);
	}

	#[test]
	fn drop_hangs_up() {
		let (a, mut b) = MemoryLink::pair();
		assert!(b.is_connected());
		drop(a);
		assert!(!b.is_connected());
	}
}
