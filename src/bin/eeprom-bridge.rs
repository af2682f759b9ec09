#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate eeprom_bridge;
use eeprom_bridge::*;

use std::fs;
use std::net::{
	TcpListener,
	TcpStream,
};
use std::path::Path;
use std::process::exit;

use eeprom_bridge::bus::{
	EepromController,
	Hardware,
};
use eeprom_bridge::config::BridgeConfig;
use eeprom_bridge::link::{
	FdLink,
	Link,
	Transport,
	TransportError,
};
use eeprom_bridge::server::Server;

type Controller = EepromController<Box<dyn Hardware>>;

fn get_param<T>(matches: &clap::ArgMatches, name: &str) -> AResult<T>
where
	T: std::str::FromStr,
	failure::Error: From<<T as std::str::FromStr>::Err>,
{
	let param = match matches.value_of(name) {
		Some(p) => p,
		None => bail!("missing parameter {}", name),
	};
	param.parse::<T>().map_err(|e| {
		let e = failure::Error::from(e);
		let msg = format!("invalid parameter {}: {}", name, e);
		e.context(msg).into()
	})
}

fn bridge_config(matches: &clap::ArgMatches) -> AResult<BridgeConfig> {
	let mut config = BridgeConfig::default();
	if let Some(p) = matches.value_of("shift_data") {
		config.pins.shift_data = config::parse_pin(p)?;
	}
	if let Some(p) = matches.value_of("shift_clock") {
		config.pins.shift_clock = config::parse_pin(p)?;
	}
	if let Some(p) = matches.value_of("shift_latch") {
		config.pins.shift_latch = config::parse_pin(p)?;
	}
	if let Some(p) = matches.value_of("write_enable") {
		config.pins.write_enable = config::parse_pin(p)?;
	}
	if let Some(p) = matches.value_of("data_pins") {
		config.pins.data = config::parse_pin_list(p)?;
	}
	if let Some(a) = matches.value_of("max_address") {
		config.max_address = config::parse_address(a)?;
	}
	if let Some(t) = matches.value_of("timeout") {
		config.receive_timeout = config::parse_millis(t)?;
	}
	if let Some(t) = matches.value_of("idle_delay") {
		config.server.idle_delay = config::parse_millis(t)?;
	}
	config.validate()?;
	Ok(config)
}

fn open_hardware(matches: &clap::ArgMatches, config: &BridgeConfig) -> AResult<Box<dyn Hardware>> {
	if matches.is_present("simulate") {
		let contents = match matches.value_of("image") {
			Some(path) => fs::read(path).map_err(|e| format_err!("read image {}: {}", path, e))?,
			None => Vec::new(),
		};
		info!("simulating a {} byte EEPROM", config.max_address as usize + 1);
		let mut board = sim::SimulatedBoard::with_contents(config.pins.clone(), config.max_address, &contents);
		board.set_record_events(false);
		Ok(Box::new(board))
	} else {
		Ok(Box::new(gpio::SysfsGpio::open(&config.pins.all())?))
	}
}

fn transport<L: Link>(link: L, config: &BridgeConfig) -> Transport<L> {
	let mut transport = Transport::new(link);
	transport.set_receive_timeout(config.receive_timeout);
	transport.set_poll_interval(config.poll_interval);
	transport
}

fn serve_serial(port: &Path, baud: u32, controller: Controller, config: &BridgeConfig) -> AResult<()> {
	let link = link::open_serial(port, baud)?;
	info!("serving on {} ({} baud)", port.display(), baud);
	let mut server = Server::new(transport(link, config), controller, config.server);
	handlers::register_all(&mut server)?;
	loop {
		match server.serve() {
			Ok(_) => (),
			Err(ref e) if TransportError::is_closed(e) => {
				warn!("serial link hung up, reopening {}", port.display());
				server.reopen(|old| {
					if let Err(e) = old.release_exclusive() {
						debug!("releasing {} failed: {}", port.display(), e);
					}
					link::open_serial(port, baud)
				});
			},
			Err(e) => return Err(e),
		}
	}
}

fn accept(listener: &TcpListener) -> AResult<FdLink<TcpStream>> {
	let (stream, peer) = listener.accept()?;
	info!("client {} attached", peer);
	Ok(FdLink::from_tcp(stream)?)
}

fn serve_tcp(address: &str, controller: Controller, config: &BridgeConfig) -> AResult<()> {
	let listener = TcpListener::bind(address).map_err(|e| format_err!("listen on {}: {}", address, e))?;
	info!("listening on {}", listener.local_addr()?);
	let mut server = Server::new(transport(accept(&listener)?, config), controller, config.server);
	handlers::register_all(&mut server)?;
	loop {
		match server.serve() {
			Ok(_) => (),
			Err(ref e) if TransportError::is_closed(e) => {
				info!("client gone, waiting for the next one");
				server.reopen(|_| accept(&listener));
			},
			Err(e) => return Err(e),
		}
	}
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@arg port: -p --port +takes_value conflicts_with("listen") "serial port to serve on")
		(@arg listen: -l --listen +takes_value "serve on TCP address (host:port) instead")
		(@arg baud: -b --baud +takes_value default_value("115200") "serial baud rate")
		(@arg simulate: --simulate "use a simulated board instead of GPIOs")
		(@arg image: --image +takes_value requires("simulate") "initial contents of the simulated EEPROM")
		(@arg max_address: -m long("max-address") +takes_value "highest EEPROM address (default 0x07ff)")
		(@arg shift_data: long("shift-data") +takes_value "GPIO of the shift register data line")
		(@arg shift_clock: long("shift-clock") +takes_value "GPIO of the shift register clock")
		(@arg shift_latch: long("shift-latch") +takes_value "GPIO of the shift register latch")
		(@arg write_enable: long("write-enable") +takes_value "GPIO of WRITE ENABLE (active low)")
		(@arg data_pins: long("data-pins") +takes_value "GPIOs of D0..D7, comma separated")
		(@arg timeout: --timeout +takes_value "payload receive timeout in ms")
		(@arg idle_delay: long("idle-delay") +takes_value "pause between idle polls in ms")
	).get_matches();

	ensure!(matches.is_present("port") || matches.is_present("listen"), "need either --port or --listen");
	let config = bridge_config(&matches)?;
	debug!("{:?}", config);

	let mut controller = EepromController::new(open_hardware(&matches, &config)?, config.pins.clone(), config.max_address);
	controller.init();

	if let Some(port) = matches.value_of("port") {
		let baud: u32 = get_param(&matches, "baud")?;
		serve_serial(Path::new(port), baud, controller, &config)
	} else {
		let address = matches.value_of("listen").ok_or_else(|| format_err!("missing parameter listen"))?;
		serve_tcp(address, controller, &config)
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
