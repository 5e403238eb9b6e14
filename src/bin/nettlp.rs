#[macro_use]
extern crate clap;
#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

extern crate nettlp_pci;
use nettlp_pci::*;

use std::io;
use std::process::exit;
use std::sync::Arc;

use nettlp_pci::msix::MsixCapability;
use nettlp_pci::pci::LinuxPlatform;

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

fn parse_u32(value: &str) -> AResult<u32> {
	if value.starts_with("0x") || value.starts_with("0X") {
		Ok(u32::from_str_radix(&value[2..], 16)?)
	} else {
		Ok(value.parse::<u32>()?)
	}
}

fn parse_value(value: &str) -> AResult<u32> {
	parse_u32(value).map_err(|e| {
		let msg = format!("invalid parameter VALUE: {}", e);
		e.context(msg).into()
	})
}

fn check_nettlp(ep: pci::PciEndpoint) -> AResult<()> {
	let ids = ep.ids()?;
	if pci::match_id_table(ID_TABLE, &ids).is_none() {
		eprintln!("Device {} ({}:{}) is not a NetTLP adapter", ep, ids.vendor, ids.device);
		exit(1);
	}
	Ok(())
}

fn list() -> AResult<()> {
	for ep in pci::list_matching_endpoints(ID_TABLE)? {
		println!("{}", ep);
	}

	Ok(())
}

fn list_all() -> AResult<()> {
	for ep in pci::list_all_endpoints()? {
		println!("{}", ep);
	}

	Ok(())
}

fn info(sub_m: &clap::ArgMatches) -> AResult<()> {
	let ep: pci::PciEndpoint = get_param(sub_m, "DEVICE")?;
	check_nettlp(ep)?;

	let ids = ep.ids()?;
	println!("{} ({}:{}, subsystem {}:{})", ep, ids.vendor, ids.device, ids.subsystem_vendor, ids.subsystem_device);
	println!("devid {:#06x}, enabled: {}", ep.devid(), ep.is_enabled()?);
	match ep.driver()? {
		None => println!("no driver"),
		Some(driver) => println!("driver {}", driver),
	}
	for bar in 0..6 {
		if let Some(descriptor) = ep.resource(bar)? {
			println!("{}", descriptor);
		}
	}

	let config = pci::open_config_space_readonly(ep)?;
	match MsixCapability::find(&config) {
		None => println!("no MSI-X capability"),
		Some(cap) => println!("{}", cap),
	}

	Ok(())
}

fn attach(sub_m: &clap::ArgMatches) -> AResult<()> {
	let vectors: usize = get_param(sub_m, "vectors")?;
	ensure!(
		(1..=MAX_VECTORS).contains(&vectors),
		"--vectors must be between 1 and {}, got {}", MAX_VECTORS, vectors
	);
	let config = Config {
		disable_msg_socket: sub_m.is_present("disable_msg_socket"),
		vectors,
	};

	let endpoints = match sub_m.value_of("DEVICE") {
		Some(_) => {
			let ep: pci::PciEndpoint = get_param(sub_m, "DEVICE")?;
			check_nettlp(ep)?;
			vec![ep]
		},
		None => pci::list_matching_endpoints(ID_TABLE)?,
	};
	if endpoints.is_empty() {
		eprintln!("No NetTLP adapter found");
		exit(1);
	}

	let ack = Arc::new(AckHandler::default());
	let mut driver: NettlpDriver<LinuxPlatform> = NettlpDriver::new(config).with_handler(ack.clone());
	for ep in endpoints {
		if let Err(e) = LinuxPlatform::open(ep).and_then(|platform| driver.probe(platform)) {
			error!("PCI {}: {}", ep, e);
		}
	}
	if driver.endpoints().is_empty() {
		bail!("no device attached");
	}

	for ep in driver.endpoints() {
		if let Some(session) = driver.session(ep) {
			println!("{}: devid {:#06x}", ep, ep.devid());
			for (n, entry) in session.msix().iter().enumerate() {
				println!("  MSI-X {:2}: {}", n, entry);
			}
		}
	}

	info!("holding devices until stdin is closed");
	io::copy(&mut io::stdin(), &mut io::sink())?;

	for vector in 0..vectors {
		println!("vector {}: {} interrupts", vector, ack.count(vector));
	}
	driver.unload();

	Ok(())
}

fn with_register<F>(ep: pci::PciEndpoint, f: F) -> AResult<()>
where
	F: FnOnce(&mut RegisterBridge<pci::Mapped>) -> AResult<()>,
{
	check_nettlp(ep)?;

	// register access needs neither interrupts nor the message socket
	let config = Config {
		disable_msg_socket: true,
		vectors: 0,
	};
	let mut driver: NettlpDriver<LinuxPlatform> = NettlpDriver::new(config);
	driver.probe(LinuxPlatform::open(ep)?)?;

	let res = match driver.session_mut(ep) {
		None => Err(format_err!("PCI {}: not attached", ep)),
		Some(session) => session.register_bridge().and_then(|mut bridge| {
			let res = f(&mut bridge);
			bridge.release();
			res
		}),
	};
	driver.unload();
	res
}

fn reg_read(sub_m: &clap::ArgMatches) -> AResult<()> {
	let ep: pci::PciEndpoint = get_param(sub_m, "DEVICE")?;

	with_register(ep, |bridge| {
		let mut buf = [0u8; 4];
		bridge.read(0, &mut buf)?;
		println!("{:#010x}", u32::from_ne_bytes(buf));
		Ok(())
	})
}

fn reg_write(sub_m: &clap::ArgMatches) -> AResult<()> {
	let ep: pci::PciEndpoint = get_param(sub_m, "DEVICE")?;
	let value = match sub_m.value_of("VALUE") {
		Some(v) => parse_value(v)?,
		None => bail!("missing parameter VALUE"),
	};

	with_register(ep, |bridge| {
		bridge.write(0, &value.to_ne_bytes())?;
		Ok(())
	})
}

fn main_app() -> AResult<()> {
	let matches = clap_app!(@app (app_from_crate!())
		(@setting SubcommandRequiredElseHelp)
		(global_setting: clap::AppSettings::VersionlessSubcommands)
		(@subcommand list =>
			(about: "list NetTLP adapters")
		)
		(@subcommand list_all =>
			(about: "list all PCI devices")
		)
		(@subcommand info =>
			(about: "show BARs and MSI-X capability of a NetTLP adapter")
			(@arg DEVICE: +required "PCI device to use ([bus:]slot:dev.fun)")
		)
		(@subcommand attach =>
			(about: "attach NetTLP adapters until stdin is closed")
			(@arg disable_msg_socket: --("disable-msg-socket") "don't hand devices to the message socket")
			(@arg vectors: --vectors +takes_value default_value("4") "number of MSI-X vectors to use")
			(@arg DEVICE: "PCI device to use ([bus:]slot:dev.fun); all adapters if missing")
		)
		(@subcommand reg =>
			(about: "access the user register in BAR2")
			(@setting SubcommandRequiredElseHelp)
			(@subcommand read =>
				(about: "read the register")
				(@arg DEVICE: +required "PCI device to use ([bus:]slot:dev.fun)")
			)
			(@subcommand write =>
				(about: "write the register")
				(@arg DEVICE: +required "PCI device to use ([bus:]slot:dev.fun)")
				(@arg VALUE: +required "32-bit value (decimal or 0x-prefixed hex)")
			)
		)
	).get_matches();

	match matches.subcommand() {
		("list", _) => {
			list()
		}
		("list_all", _) => {
			list_all()
		}
		("info", Some(sub_m)) => {
			info(sub_m)
		}
		("attach", Some(sub_m)) => {
			attach(sub_m)
		}
		("reg", Some(sub_m)) => match sub_m.subcommand() {
			("read", Some(sub_sub_m)) => {
				reg_read(sub_sub_m)
			},
			("write", Some(sub_sub_m)) => {
				reg_write(sub_sub_m)
			},
			("", _) => bail!("no subcommand"),
			(cmd, _) => bail!("not implemented subcommand for 'reg' {:?}", cmd),
		},
		("", _) => bail!("no subcommand"),
		(cmd, _) => bail!("not implemented subcommand {:?}", cmd),
	}
}

fn main() {
	env_logger::from_env(env_logger::Env::default().default_filter_or("info")).init();

	if let Err(e) = main_app() {
		error!("Error: {}", e);
		exit(1);
	}
}
