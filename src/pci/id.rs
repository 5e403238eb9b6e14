use std::fmt;

use crate::platform::DeviceIds;

/// One entry of a driver's match table; `None` matches any value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PciDeviceId {
	pub vendor: u16,
	pub device: u16,
	pub subsystem_vendor: Option<u16>,
	pub subsystem_device: Option<u16>,
}

impl PciDeviceId {
	/// match vendor and device, any subsystem
	pub const fn new(vendor: u16, device: u16) -> Self {
		PciDeviceId {
			vendor,
			device,
			subsystem_vendor: None,
			subsystem_device: None,
		}
	}

	pub fn matches(&self, ids: &DeviceIds) -> bool {
		self.vendor == ids.vendor.0
			&& self.device == ids.device.0
			&& self.subsystem_vendor.map_or(true, |v| v == ids.subsystem_vendor.0)
			&& self.subsystem_device.map_or(true, |d| d == ids.subsystem_device.0)
	}
}

impl fmt::Display for PciDeviceId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:04x}:{:04x}", self.vendor, self.device)?;
		if let (None, None) = (self.subsystem_vendor, self.subsystem_device) {
			return Ok(());
		}
		let any = |v: Option<u16>| v.map_or("*".to_string(), |v| format!("{:04x}", v));
		write!(f, " ({}:{})", any(self.subsystem_vendor), any(self.subsystem_device))
	}
}

pub fn match_id_table<'a>(table: &'a [PciDeviceId], ids: &DeviceIds) -> Option<&'a PciDeviceId> {
	table.iter().find(|id| id.matches(ids))
}

#[cfg(test)]
mod test {
	use super::{
		PciDeviceId,
		match_id_table,
	};
	use crate::pci::{
		DeviceID,
		VendorId,
	};
	use crate::platform::DeviceIds;

	fn ids(vendor: u16, device: u16, sv: u16, sd: u16) -> DeviceIds {
		DeviceIds {
			vendor: VendorId(vendor),
			device: DeviceID(device),
			subsystem_vendor: VendorId(sv),
			subsystem_device: DeviceID(sd),
		}
	}

	#[test]
	fn wildcard_subsystem() {
		let id = PciDeviceId::new(0x3776, 0x8022);
		assert!(id.matches(&ids(0x3776, 0x8022, 0, 0)));
		assert!(id.matches(&ids(0x3776, 0x8022, 0x1234, 0x5678)));
		assert!(!id.matches(&ids(0x3776, 0x8023, 0, 0)));
		assert!(!id.matches(&ids(0x10ee, 0x8022, 0, 0)));
		assert_eq!(id.to_string(), "3776:8022");
	}

	#[test]
	fn exact_subsystem() {
		let id = PciDeviceId {
			subsystem_vendor: Some(0x1234),
			..PciDeviceId::new(0x3776, 0x8022)
		};
		assert!(id.matches(&ids(0x3776, 0x8022, 0x1234, 0x5678)));
		assert!(!id.matches(&ids(0x3776, 0x8022, 0x4321, 0x5678)));
		assert_eq!(id.to_string(), "3776:8022 (1234:*)");
	}

	#[test]
	fn table_lookup() {
		let table = [PciDeviceId::new(0x3776, 0x8022), PciDeviceId::new(0x10ee, 0x7022)];
		assert_eq!(match_id_table(&table, &ids(0x10ee, 0x7022, 0, 0)), Some(&table[1]));
		assert_eq!(match_id_table(&table, &ids(0x8086, 0x1533, 0, 0)), None);
	}
}
