#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate eeprom_bridge;
use eeprom_bridge::*;

use std::fs;
use std::io::{
	self,
	Write,
};
use std::net::TcpStream;
use std::path::Path;
use std::process::exit;
use std::thread;

use eeprom_bridge::client::Client;
use eeprom_bridge::link::{
	FdLink,
	Link,
	Transport,
};

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

fn get_address(matches: &clap::ArgMatches, name: &str) -> AResult<Option<u16>> {
	match matches.value_of(name) {
		Some(a) => Ok(Some(config::parse_address(a)?)),
		None => Ok(None),
	}
}

fn require_address(matches: &clap::ArgMatches, name: &str) -> AResult<u16> {
	get_address(matches, name)?.ok_or_else(|| format_err!("missing parameter {}", name))
}

fn print_listing<L: Link>(client: &mut Client<L>, matches: &clap::ArgMatches) -> AResult<()> {
	let address = get_address(matches, "ADDRESS")?.unwrap_or(0);
	let len = get_address(matches, "LEN")?.map(|l| l as usize);
	let data = client.dump(address, len)?;
	print!("{}", client::hex_listing(address, &data));
	Ok(())
}

fn dump<L: Link>(client: &mut Client<L>, matches: &clap::ArgMatches) -> AResult<()> {
	let address = get_address(matches, "address")?.unwrap_or(0);
	let len = get_address(matches, "len")?.map(|l| l as usize);
	let data = client.dump(address, len)?;
	match matches.value_of("FILE") {
		None | Some("-") => {
			let stdout = io::stdout();
			let mut stdout = stdout.lock();
			stdout.write_all(&data)?;
			stdout.flush()?;
		},
		Some(path) => {
			fs::write(path, &data).map_err(|e| format_err!("write {}: {}", path, e))?;
			info!("dumped {} bytes to {}", data.len(), path);
		},
	}
	Ok(())
}

fn program<L: Link>(client: &mut Client<L>, matches: &clap::ArgMatches) -> AResult<()> {
	let path = matches.value_of("FILE").ok_or_else(|| format_err!("missing parameter FILE"))?;
	let data = fs::read(path).map_err(|e| format_err!("read {}: {}", path, e))?;
	let address = get_address(matches, "address")?.unwrap_or(0);
	client.program(address, &data)
}

fn run<L: Link>(client: &mut Client<L>, matches: &clap::ArgMatches) -> AResult<()> {
	match matches.subcommand() {
		("identify", _) => {
			println!("{}", client.identify()?);
		},
		("max_address", _) => {
			println!("0x{:04x}", client.max_address()?);
		},
		("echo", Some(sub_m)) => {
			let text = sub_m.value_of("TEXT").unwrap_or("");
			let reply = client.echo(text.as_bytes())?;
			println!("{}", String::from_utf8_lossy(&reply));
		},
		("read", Some(sub_m)) => {
			let address = require_address(sub_m, "ADDRESS")?;
			println!("0x{:02x}", client.read(address)?);
		},
		("write", Some(sub_m)) => {
			let address = require_address(sub_m, "ADDRESS")?;
			let value = require_address(sub_m, "VALUE")?;
			ensure!(value <= 0xff, "value 0x{:x} doesn't fit into a byte", value);
			client.write(address, value as u8)?;
		},
		("print", Some(sub_m)) => print_listing(client, sub_m)?,
		("dump", Some(sub_m)) => dump(client, sub_m)?,
		("program", Some(sub_m)) => program(client, sub_m)?,
		("zero", _) => {
			client.zero()?;
		},
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
	Ok(())
}

fn session<L: Link>(link: L, matches: &clap::ArgMatches) -> AResult<()> {
	let mut transport = Transport::new(link);
	if let Some(t) = matches.value_of("timeout") {
		transport.set_receive_timeout(config::parse_millis(t)?);
	}
	let mut client = Client::new(transport);
	client.connect()?;
	let result = run(&mut client, matches);
	if let Err(e) = client.disconnect() {
		warn!("disconnect failed: {}", e);
	}
	result
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@arg port: -p --port +takes_value conflicts_with("connect") "serial port of the bridge")
		(@arg baud: -b --baud +takes_value default_value("115200") "serial baud rate")
		(@arg settle: --settle +takes_value default_value("2000") "ms to wait after opening the serial port (board reset)")
		(@arg connect: -c --connect +takes_value "TCP address (host:port) of the bridge")
		(@arg timeout: --timeout +takes_value "response timeout in ms")
		(@subcommand identify =>
			(about: "show bridge firmware name and version")
		)
		(@subcommand max_address =>
			(about: "show highest EEPROM address")
		)
		(@subcommand echo =>
			(about: "send text and print what comes back")
			(@arg TEXT: +required "text to echo (at most 255 bytes)")
		)
		(@subcommand read =>
			(about: "read a single byte")
			(@arg ADDRESS: +required "address (decimal or 0x hex)")
		)
		(@subcommand write =>
			(about: "write a single byte")
			(@arg ADDRESS: +required "address (decimal or 0x hex)")
			(@arg VALUE: +required "byte value (decimal or 0x hex)")
		)
		(@subcommand print =>
			(about: "print EEPROM contents as hex listing")
			(@arg ADDRESS: "start address (default 0)")
			(@arg LEN: "number of bytes (default: up to the end)")
		)
		(@subcommand dump =>
			(about: "dump EEPROM contents as binary")
			(@arg address: -a --address +takes_value "start address (default 0)")
			(@arg len: -n --len +takes_value "number of bytes (default: up to the end)")
			(@arg FILE: "output file (default stdout)")
		)
		(@subcommand program =>
			(about: "write file to EEPROM and verify it")
			(@arg address: -a --address +takes_value "start address (default 0)")
			(@arg FILE: +required "image to write")
		)
		(@subcommand zero =>
			(about: "clear the whole EEPROM to 0x00")
		)
	).get_matches();

	if let Some(port) = matches.value_of("port") {
		let baud: u32 = get_param(&matches, "baud")?;
		let link = link::open_serial(Path::new(port), baud)?;
		let settle = config::parse_millis(matches.value_of("settle").unwrap_or("2000"))?;
		debug!("waiting {:?} for the bridge to come up", settle);
		thread::sleep(settle);
		session(link, &matches)
	} else if let Some(address) = matches.value_of("connect") {
		let stream = TcpStream::connect(address).map_err(|e| format_err!("connect to {}: {}", address, e))?;
		session(FdLink::from_tcp(stream)?, &matches)
	} else {
		bail!("need either --port or --connect")
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
