//! Session handling and opcode dispatch.
//!
//! A session starts with the host sending `SYN`; everything else while
//! disconnected is answered with `RST`. While connected every request is a
//! single opcode byte followed by a payload only the registered handler knows
//! how to read; the server wraps the handler's response in `ACK` ... `FIN`.
//! `BYE` closes the session, an unknown opcode is answered with `ERR` and
//! also closes it.

use std::thread;

use crate::config::ServerConfig;
use crate::link::{
	Link,
	Transport,
	TransportError,
};

pub mod signals {
	pub const SYN: u8 = b's'; // host: request session
	pub const ACK: u8 = b'a'; // session accepted / handler started
	pub const ERR: u8 = b'e'; // unknown opcode or failed handler; session closed
	pub const RST: u8 = b'r'; // handshake rejected
	pub const FIN: u8 = b'f'; // handler completed
	pub const BYE: u8 = b'b'; // close session (both directions)

	/// opcodes a handler can never be registered for
	pub fn is_reserved(opcode: u8) -> bool {
		opcode == SYN || opcode == BYE
	}
}

use self::signals::*;

/// One request type; reads its own payload and writes its own response.
///
/// `context` is whatever the server was built with (usually the bus
/// controller).
pub trait Handler<C, L: Link> {
	fn handle(&mut self, context: &mut C, transport: &mut Transport<L>) -> crate::AResult<()>;
}

impl<C, L: Link, F> Handler<C, L> for F
where
	F: FnMut(&mut C, &mut Transport<L>) -> crate::AResult<()>,
{
	fn handle(&mut self, context: &mut C, transport: &mut Transport<L>) -> crate::AResult<()> {
		self(context, transport)
	}
}

/// One slot per opcode value; `None` means nothing registered.
pub struct HandlerTable<C, L: Link> {
	slots: Vec<Option<Box<dyn Handler<C, L>>>>,
}

impl<C, L: Link> HandlerTable<C, L> {
	pub fn new() -> Self {
		HandlerTable {
			slots: (0..256).map(|_| None).collect(),
		}
	}

	/// returns the handler previously registered for `opcode`
	pub fn register(&mut self, opcode: u8, handler: Box<dyn Handler<C, L>>) -> Option<Box<dyn Handler<C, L>>> {
		std::mem::replace(&mut self.slots[opcode as usize], Some(handler))
	}

	pub fn is_registered(&self, opcode: u8) -> bool {
		self.slots[opcode as usize].is_some()
	}

	pub fn get_mut(&mut self, opcode: u8) -> Option<&mut (dyn Handler<C, L> + 'static)> {
		match self.slots[opcode as usize] {
			Some(ref mut handler) => Some(handler.as_mut()),
			None => None,
		}
	}

	pub fn opcodes(&self) -> Vec<u8> {
		(0..=255u8).filter(|&op| self.is_registered(op)).collect()
	}
}

impl<C, L: Link> Default for HandlerTable<C, L> {
	fn default() -> Self {
		Self::new()
	}
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum SessionState {
	Disconnected,
	Connected,
}

/// What a single `serve` call did.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Served {
	/// nothing arrived within the request wait
	Idle,
	/// handler ran to completion (`ACK` ... `FIN`)
	Dispatched(u8),
	/// handler failed after `ACK`; answered `ERR`, session closed
	Failed(u8),
	/// no handler for the opcode; answered `ERR`, session closed
	Rejected(u8),
	/// host sent `BYE`
	Closed,
}

pub struct Server<C, L: Link> {
	transport: Transport<L>,
	context: C,
	handlers: HandlerTable<C, L>,
	state: SessionState,
	config: ServerConfig,
}

impl<C, L: Link> Server<C, L> {
	pub fn new(transport: Transport<L>, context: C, config: ServerConfig) -> Self {
		Server {
			transport,
			context,
			handlers: HandlerTable::new(),
			state: SessionState::Disconnected,
			config,
		}
	}

	/// Installs `handler` for `opcode`, replacing any earlier registration.
	///
	/// `SYN` and `BYE` never reach dispatch and are refused.
	pub fn register_handler<H>(&mut self, opcode: u8, handler: H) -> crate::AResult<()>
	where
		H: Handler<C, L> + 'static,
	{
		ensure!(!is_reserved(opcode), "opcode 0x{:02x} is reserved for session control", opcode);
		if self.handlers.register(opcode, Box::new(handler)).is_some() {
			debug!("replaced handler for opcode 0x{:02x}", opcode);
		}
		Ok(())
	}

	pub fn handlers(&self) -> &HandlerTable<C, L> {
		&self.handlers
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn is_connected(&self) -> bool {
		self.state == SessionState::Connected
	}

	pub fn context(&self) -> &C {
		&self.context
	}

	pub fn into_parts(self) -> (Transport<L>, C) {
		(self.transport, self.context)
	}

	/// Swaps in a new link (e.g. the next accepted client); the session on the
	/// old link is gone.
	pub fn attach(&mut self, link: L) -> L {
		self.state = SessionState::Disconnected;
		self.transport.replace_link(link)
	}

	/// Replaces a closed link with the first one `open` manages to produce,
	/// retrying every `reopen_delay`.
	///
	/// A hung up tty stays hung up until it is opened again, and a socket
	/// needs the next client accepted; `open` does either. It gets the closed
	/// link to release whatever that still holds.
	pub fn reopen<F>(&mut self, mut open: F) -> L
	where
		F: FnMut(&mut L) -> crate::AResult<L>,
	{
		loop {
			match open(self.transport.link_mut()) {
				Ok(link) => {
					info!("link reopened");
					return self.attach(link);
				},
				Err(e) => {
					debug!("reopening link failed: {}", e);
					thread::sleep(self.config.reopen_delay);
				},
			}
		}
	}

	/// One handshake attempt: `Ok(true)` once `SYN` was answered with `ACK`.
	pub fn handshake(&mut self) -> crate::AResult<bool> {
		if self.is_connected() {
			return Ok(true);
		}
		if !self.transport.wait_for_bytes(1, self.config.handshake_wait)? {
			return Ok(false);
		}
		let byte = self.transport.read_i8()? as u8;
		if byte == SYN {
			self.transport.write_i8(ACK as i8)?;
			self.state = SessionState::Connected;
			info!("session established");
			Ok(true)
		} else {
			debug!("handshake rejected: got 0x{:02x} instead of SYN", byte);
			self.transport.write_i8(RST as i8)?;
			Ok(false)
		}
	}

	/// Retries the handshake until a session is established; only a closed
	/// link ends the wait.
	pub fn wait_for_connection(&mut self) -> crate::AResult<()> {
		while !self.handshake()? {}
		Ok(())
	}

	/// Handles at most one request.
	///
	/// Waits for a session first if there is none, then waits (bounded) for an
	/// opcode, so the caller can interleave other work between calls. Errors
	/// only come from the link itself; a closed link also ends the session.
	pub fn serve(&mut self) -> crate::AResult<Served> {
		let result = self.serve_request();
		if let Err(ref e) = result {
			if TransportError::is_closed(e) {
				self.state = SessionState::Disconnected;
			}
		}
		result
	}

	fn serve_request(&mut self) -> crate::AResult<Served> {
		self.wait_for_connection()?;

		if !self.transport.wait_for_bytes(1, self.config.request_wait)? {
			thread::sleep(self.config.idle_delay);
			return Ok(Served::Idle);
		}

		let opcode = self.transport.read_i8()? as u8;
		if opcode == BYE {
			self.transport.write_i8(BYE as i8)?;
			self.state = SessionState::Disconnected;
			info!("session closed by host");
			return Ok(Served::Closed);
		}

		let handler = match self.handlers.get_mut(opcode) {
			Some(handler) => handler,
			None => {
				warn!("unknown opcode 0x{:02x}, terminating session", opcode);
				self.transport.write_i8(ERR as i8)?;
				self.state = SessionState::Disconnected;
				return Ok(Served::Rejected(opcode));
			},
		};

		self.transport.write_i8(ACK as i8)?;
		match handler.handle(&mut self.context, &mut self.transport) {
			Ok(()) => {
				self.transport.write_i8(FIN as i8)?;
				trace!("opcode 0x{:02x} done", opcode);
				Ok(Served::Dispatched(opcode))
			},
			Err(e) => {
				if TransportError::is_closed(&e) {
					return Err(e);
				}
				warn!("handler for opcode 0x{:02x} failed, terminating session: {}", opcode, e);
				self.transport.write_i8(ERR as i8)?;
				self.state = SessionState::Disconnected;
				Ok(Served::Failed(opcode))
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	use crate::link::MemoryLink;

	fn config() -> ServerConfig {
		ServerConfig {
			handshake_wait: Duration::from_millis(10),
			request_wait: Duration::from_millis(10),
			idle_delay: Duration::from_millis(1),
			reopen_delay: Duration::from_millis(1),
		}
	}

	// context records the payloads the handlers saw
	fn server() -> (Server<Vec<i16>, MemoryLink>, MemoryLink) {
		let (local, peer) = MemoryLink::pair();
		let mut transport = Transport::new(local);
		transport.set_receive_timeout(Duration::from_millis(10));
		let mut server = Server::new(transport, Vec::new(), config());
		server.register_handler(0x10, |seen: &mut Vec<i16>, t: &mut Transport<MemoryLink>| {
			let value = t.read_i16()?;
			seen.push(value);
			t.write_i16(value.wrapping_add(1))
		}).unwrap();
		(server, peer)
	}

	fn connected() -> (Server<Vec<i16>, MemoryLink>, MemoryLink) {
		let (mut server, peer) = server();
		peer.send(&[SYN]);
		assert!(server.handshake().unwrap());
		assert_eq!(peer.received(), vec![ACK]);
		(server, peer)
	}

	#[test]
	fn all_slots_start_empty() {
		let table: HandlerTable<(), MemoryLink> = HandlerTable::new();
		assert!(table.opcodes().is_empty());
		assert!(!table.is_registered(0xff));
	}

	#[test]
	fn handshake_rejects_anything_but_syn() {
		let (mut server, peer) = server();
		peer.send(b"x");
		assert!(!server.handshake().unwrap());
		assert_eq!(peer.received(), vec![RST]);
		assert_eq!(server.state(), SessionState::Disconnected);

		peer.send(&[SYN]);
		assert!(server.handshake().unwrap());
		assert_eq!(peer.received(), vec![ACK]);
		assert_eq!(server.state(), SessionState::Connected);
	}

	#[test]
	fn handshake_retries_until_link_closes() {
		let (mut server, peer) = server();
		peer.send(b"xy");
		peer.close();
		let e = server.serve().unwrap_err();
		assert!(TransportError::is_closed(&e));
		assert_eq!(peer.received(), vec![RST, RST]);
		assert_eq!(server.state(), SessionState::Disconnected);
	}

	#[test]
	fn handshake_without_data_keeps_waiting() {
		let (mut server, peer) = server();
		assert!(!server.handshake().unwrap());
		assert!(peer.received().is_empty());
	}

	#[test]
	fn dispatch_wraps_handler_in_ack_fin() {
		let (mut server, peer) = connected();
		peer.send(&[0x10, 0x34, 0x12]);
		assert_eq!(server.serve().unwrap(), Served::Dispatched(0x10));
		assert_eq!(peer.received(), vec![ACK, 0x35, 0x12, FIN]);
		assert_eq!(server.context(), &vec![0x1234]);
		assert!(server.is_connected());
	}

	#[test]
	fn unknown_opcode_terminates_session() {
		let (mut server, peer) = connected();
		peer.send(&[0x99]);
		assert_eq!(server.serve().unwrap(), Served::Rejected(0x99));
		assert_eq!(peer.received(), vec![ERR]);
		assert_eq!(server.state(), SessionState::Disconnected);
	}

	#[test]
	fn bye_closes_session() {
		let (mut server, peer) = connected();
		peer.send(&[BYE]);
		assert_eq!(server.serve().unwrap(), Served::Closed);
		assert_eq!(peer.received(), vec![BYE]);
		assert_eq!(server.state(), SessionState::Disconnected);
	}

	#[test]
	fn idle_when_nothing_arrives() {
		let (mut server, peer) = connected();
		assert_eq!(server.serve().unwrap(), Served::Idle);
		assert!(peer.received().is_empty());
		assert!(server.is_connected());
	}

	#[test]
	fn short_payload_fails_the_handler() {
		let (mut server, peer) = connected();
		peer.send(&[0x10, 0x01]);
		assert_eq!(server.serve().unwrap(), Served::Failed(0x10));
		assert_eq!(peer.received(), vec![ACK, ERR]);
		assert_eq!(server.state(), SessionState::Disconnected);
	}

	#[test]
	fn registration_overwrites() {
		let (mut server, peer) = connected();
		server.register_handler(0x10, |_: &mut Vec<i16>, t: &mut Transport<MemoryLink>| t.write_i8(7)).unwrap();
		peer.send(&[0x10]);
		assert_eq!(server.serve().unwrap(), Served::Dispatched(0x10));
		assert_eq!(peer.received(), vec![ACK, 7, FIN]);
		assert_eq!(server.handlers().opcodes(), vec![0x10]);
	}

	#[test]
	fn reserved_opcodes_cannot_be_registered() {
		let (mut server, peer) = connected();
		for &opcode in [SYN, BYE].iter() {
			let noop = |_: &mut Vec<i16>, _: &mut Transport<MemoryLink>| -> crate::AResult<()> { Ok(()) };
			assert!(server.register_handler(opcode, noop).is_err());
			assert!(!server.handlers().is_registered(opcode));
		}
		// BYE still closes the session
		peer.send(&[BYE]);
		assert_eq!(server.serve().unwrap(), Served::Closed);
		assert_eq!(peer.received(), vec![BYE]);
	}

	#[test]
	fn attach_drops_session() {
		let (mut server, _old) = connected();
		let (fresh, peer) = MemoryLink::pair();
		server.attach(fresh);
		assert_eq!(server.state(), SessionState::Disconnected);
		peer.send(&[SYN]);
		assert!(server.handshake().unwrap());
		assert_eq!(peer.received(), vec![ACK]);
	}

	#[test]
	fn closed_link_is_reopened() {
		let (mut server, peer) = connected();
		drop(peer);
		let e = server.serve().unwrap_err();
		assert!(TransportError::is_closed(&e));
		assert_eq!(server.state(), SessionState::Disconnected);

		let (fresh, host) = MemoryLink::pair();
		let mut fresh = Some(fresh);
		let mut attempts = 0;
		server.reopen(|_| {
			attempts += 1;
			if attempts < 3 {
				bail!("port not there yet");
			}
			fresh.take().ok_or_else(|| format_err!("opened twice"))
		});
		assert_eq!(attempts, 3);

		host.send(&[SYN, 0x10, 0x01, 0x00]);
		assert_eq!(server.serve().unwrap(), Served::Dispatched(0x10));
		assert_eq!(host.received(), vec![ACK, ACK, 0x02, 0x00, FIN]);
	}
}
