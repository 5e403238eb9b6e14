use std::fmt;
use std::fs;
use std::io::{
	self,
	Read,
	Write,
};
use std::num::ParseIntError;
use std::path::PathBuf;
use std::str;

use super::Driver;
use crate::platform::DeviceIds;
use crate::region::RegionDescriptor;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotFunction(pub u8);

impl SlotFunction {
	pub fn slot(&self) -> u8 {
		self.0 >> 3
	}

	pub fn function(&self) -> u8 {
		self.0 & 0x7
	}
}

impl fmt::Debug for SlotFunction {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("SlotFunction")
			.field("slot", &self.slot())
			.field("function", &self.function())
			.finish()
	}
}

impl fmt::Display for SlotFunction {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:02x}.{}", self.slot(), self.function())
	}
}

impl str::FromStr for SlotFunction {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (slot_s, fun_s) = match s.find('.') {
			Some(pos) => (&s[..pos], &s[pos + 1..]),
			None => bail!("Couldn't find '.' in PCI slot.function: {:?}", s),
		};
		ensure!(
			(1..=2).contains(&slot_s.len()) && fun_s.len() == 1,
			"Invalid PCI slot.function: {:?}", s
		);

		let slot = with_context!(("invalid PCI slot: {}", slot_s),
			Ok(u8::from_str_radix(slot_s, 16)?)
		)?;
		let fun = with_context!(("invalid PCI function: {}", fun_s),
			Ok(u8::from_str_radix(fun_s, 8)?)
		)?;

		ensure!(slot < 0x20, "invalid PCI slot: {} (too big)", slot);

		Ok(SlotFunction(slot << 3 | fun))
	}
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PciBus {
	pub domain: u16,
	pub bus: u8,
}

impl fmt::Display for PciBus {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:04x}:{:02x}", self.domain, self.bus)
	}
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct PciEndpoint {
	pub bus: PciBus,
	pub slot_function: SlotFunction,
}

fn read_trimmed_info_file(ep: PciEndpoint, name: &str) -> crate::AResult<String> {
	with_context!(("couldn't read info file {} for PCI device {}", name, ep), {
		let mut f = fs::File::open(ep.device_file(name))?;
		let mut result = String::new();
		f.read_to_string(&mut result)?;
		Ok(result.trim().into())
	})
}

fn parse_hex<T>(value: &str, from_str_radix: fn(&str, u32) -> Result<T, ParseIntError>) -> crate::AResult<T> {
	ensure!(value.starts_with("0x"), "hex value doesn't start with '0x': {:?}", value);
	Ok(from_str_radix(&value[2..], 16)?)
}

fn read_hex_info_file<T>(ep: PciEndpoint, name: &str, from_str_radix: fn(&str, u32) -> Result<T, ParseIntError>) -> crate::AResult<T> {
	let value = read_trimmed_info_file(ep, name)?;
	with_context!(("couldn't parse info {} for PCI device {}", name, ep),
		parse_hex(&value, from_str_radix)
	)
}

/// Parses one line of the sysfs `resource` file: `start end flags`.
///
/// Unimplemented BARs show up as all zero and yield `None`.
pub(crate) fn parse_resource_line(bar: usize, line: &str) -> crate::AResult<Option<RegionDescriptor>> {
	let mut fields = line.split_whitespace();
	let mut next = |what: &str| -> crate::AResult<u64> {
		let field = fields.next().ok_or_else(|| format_err!("missing {} for BAR{}", what, bar))?;
		with_context!(("invalid {} for BAR{}", what, bar), parse_hex(field, u64::from_str_radix))
	};
	let start = next("start")?;
	let end = next("end")?;
	let flags = next("flags")?;

	if start == 0 && end == 0 {
		return Ok(None);
	}
	ensure!(end >= start, "BAR{} ends before it starts: {:#x} < {:#x}", bar, end, start);

	Ok(Some(RegionDescriptor {
		bar,
		start,
		end,
		flags,
		len: end - start + 1,
	}))
}

impl PciEndpoint {
	pub(crate) fn device_file(&self, name: &str) -> PathBuf {
		PathBuf::from(format!("/sys/bus/pci/devices/{}/{}", *self, name))
	}

	pub(crate) fn resource_file(&self, bar: usize) -> PathBuf {
		self.device_file(&format!("resource{}", bar))
	}

	/// Device locator as handed to the message socket: bus number in the
	/// high byte, slot/function in the low byte.
	pub fn devid(&self) -> u16 {
		(self.bus.bus as u16) << 8 | self.slot_function.0 as u16
	}

	pub fn is_enabled(&self) -> crate::AResult<bool> {
		match read_trimmed_info_file(*self, "enable")?.as_str() {
			"0" => Ok(false),
			"1" => Ok(true),
			e => bail!("Invalid 'enable' value {:?} for PCI device {}", e, self),
		}
	}

	pub fn enable(&self) -> crate::AResult<()> {
		with_context!(("PCI {}: enable device", self), {
			fs::OpenOptions::new().write(true).open(self.device_file("enable"))?.write_all(b"1")?;
			Ok(())
		})
	}

	pub fn disable(&self) -> crate::AResult<()> {
		with_context!(("PCI {}: disable device", self), {
			fs::OpenOptions::new().write(true).open(self.device_file("enable"))?.write_all(b"0")?;
			Ok(())
		})
	}

	pub fn vendor(&self) -> crate::AResult<VendorId> {
		read_hex_info_file::<u16>(*self, "vendor", u16::from_str_radix).map(VendorId)
	}

	pub fn device(&self) -> crate::AResult<DeviceID> {
		read_hex_info_file::<u16>(*self, "device", u16::from_str_radix).map(DeviceID)
	}

	pub fn subsystem_vendor(&self) -> crate::AResult<VendorId> {
		read_hex_info_file::<u16>(*self, "subsystem_vendor", u16::from_str_radix).map(VendorId)
	}

	pub fn subsystem_device(&self) -> crate::AResult<DeviceID> {
		read_hex_info_file::<u16>(*self, "subsystem_device", u16::from_str_radix).map(DeviceID)
	}

	pub fn ids(&self) -> crate::AResult<DeviceIds> {
		Ok(DeviceIds {
			vendor: self.vendor()?,
			device: self.device()?,
			subsystem_vendor: self.subsystem_vendor()?,
			subsystem_device: self.subsystem_device()?,
		})
	}

	/// BAR descriptor from the `resource` info file
	pub fn resource(&self, bar: usize) -> crate::AResult<Option<RegionDescriptor>> {
		let table = read_trimmed_info_file(*self, "resource")?;
		match table.lines().nth(bar) {
			None => Ok(None),
			Some(line) => with_context!(("PCI {}: resource table", self), parse_resource_line(bar, line)),
		}
	}

	pub fn iommu_group(&self) -> crate::AResult<u32> {
		let link = with_context!(("PCI {}: no IOMMU group (is the IOMMU enabled?)", self),
			Ok(fs::read_link(self.device_file("iommu_group"))?)
		)?;
		let name = link.file_name()
			.and_then(|n| n.to_str())
			.ok_or_else(|| format_err!("PCI {}: invalid IOMMU group link {:?}", self, link))?;
		with_context!(("PCI {}: invalid IOMMU group {:?}", self, name),
			Ok(name.parse::<u32>()?)
		)
	}

	pub fn driver(&self) -> crate::AResult<Option<Driver>> {
		let link = self.device_file("driver");
		match fs::symlink_metadata(&link) {
			Err(ref e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
			Err(e) => bail!("Couldn't locate driver for PCI device {}: {}", self, e),
			Ok(attr) => if !attr.file_type().is_symlink() {
				bail!("driver for PCI device {} not a symlink", self);
			},
		}
		let path = with_context!(("Couldn't follow driver symlink for PCI device {}", self),
			Ok(fs::canonicalize(link)?)
		)?;
		Ok(Some(Driver{path}))
	}
}

impl fmt::Display for PciEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.bus, self.slot_function)
	}
}

impl str::FromStr for PciEndpoint {
	type Err = ::failure::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		// max len: 0000:00:00.0
		// short: 0:0.0

		ensure!(s.len() <= 12, "PCI endpoint too long: {:?}", s);

		let (domain, bus_s, devfun_s) = {
			let mut parts = s.split(':');
			let p1 = parts.next().ok_or_else(|| format_err!("Need at least one ':' in PCI endpoint: {:?}", s))?;
			let p2 = parts.next().ok_or_else(|| format_err!("Need at least one ':' in PCI endpoint: {:?}", s))?;
			match parts.next() {
				None => (0, p1, p2),
				Some(p3) => {
					ensure!(parts.next().is_none(), "At most two ':' in PCI endpoint: {:?}", s);

					let domain = with_context!(("invalid PCI domain: {}", p1),
						Ok(u16::from_str_radix(p1, 16)?)
					)?;

					(domain, p2, p3)
				}
			}
		};

		let bus = with_context!(("invalid PCI bus: {}", bus_s),
			Ok(u8::from_str_radix(bus_s, 16)?)
		)?;

		Ok(PciEndpoint {
			bus: PciBus {
				domain,
				bus,
			},
			slot_function: devfun_s.parse::<SlotFunction>()?,
		})
	}
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VendorId(pub u16);

impl fmt::Display for VendorId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "0x{:04x}", self.0)
	}
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DeviceID(pub u16);

impl fmt::Display for DeviceID {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "0x{:04x}", self.0)
	}
}

#[cfg(test)]
mod test {
	use super::{
		PciBus,
		PciEndpoint,
		SlotFunction,
		parse_resource_line,
	};

	fn check_slot_fun(slot: u8, fun: u8, repr: &str) {
		match repr.parse::<SlotFunction>() {
			Err(e) => panic!("{} failed to parse as SlotFunction: {}", repr, e),
			Ok(sf) => assert_eq!(SlotFunction(slot << 3 | fun), sf, "failed validating parsed {}", repr),
		}
	}

	fn check_invalid_slot_fun(repr: &str) {
		assert!(repr.parse::<SlotFunction>().is_err(), "{:?} must not be a valid SLOT.FUN", repr);
	}

	#[test]
	fn parse_slot_function() {
		check_slot_fun(0x00, 0, "0.0");
		check_slot_fun(0x00, 0, "00.0");
		check_slot_fun(0x01, 7, "01.7");
		check_slot_fun(0x1f, 3, "1f.3");
		assert_eq!(SlotFunction(0x1f << 3 | 7).to_string(), "1f.7");
		check_invalid_slot_fun("");
		check_invalid_slot_fun(".");
		check_invalid_slot_fun("0.");
		check_invalid_slot_fun("000.0");
		check_invalid_slot_fun(".0");
		check_invalid_slot_fun("0.8");
		check_invalid_slot_fun("20.0");
		check_invalid_slot_fun("0000");
	}

	#[test]
	fn parse_endpoint() {
		let ep = "0000:03:00.0".parse::<PciEndpoint>().unwrap();
		assert_eq!(ep.bus, PciBus { domain: 0, bus: 3 });
		assert_eq!(ep.slot_function, SlotFunction(0));
		assert_eq!(ep.to_string(), "0000:03:00.0");

		let short = "3:0.1".parse::<PciEndpoint>().unwrap();
		assert_eq!(short.to_string(), "0000:03:00.1");

		assert!("0000:03".parse::<PciEndpoint>().is_err());
		assert!("0:0:0:0.0".parse::<PciEndpoint>().is_err());
	}

	#[test]
	fn devid_packs_bus_and_devfn() {
		let ep = "0000:0a:1f.2".parse::<PciEndpoint>().unwrap();
		assert_eq!(ep.devid(), 0x0a00 | (0x1f << 3 | 2));
	}

	#[test]
	fn resource_lines() {
		let bar = parse_resource_line(2, "0x00000000fb000000 0x00000000fb00ffff 0x0000000000040200")
			.unwrap()
			.unwrap();
		assert_eq!(bar.bar, 2);
		assert_eq!(bar.start, 0xfb00_0000);
		assert_eq!(bar.end, 0xfb00_ffff);
		assert_eq!(bar.len, 0x1_0000);
		assert_eq!(bar.flags, 0x40200);

		let empty = parse_resource_line(1, "0x0000000000000000 0x0000000000000000 0x0000000000000000").unwrap();
		assert!(empty.is_none());

		assert!(parse_resource_line(0, "0x1000 0x0fff 0x200").is_err());
		assert!(parse_resource_line(0, "0x1000 0x1fff").is_err());
		assert!(parse_resource_line(0, "1000 0x1fff 0x200").is_err());
	}
}
