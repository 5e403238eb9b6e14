use std::fs;
use std::io;

use super::{
	PciDeviceId,
	PciEndpoint,
	match_id_table,
};

pub fn list_all_endpoints() -> io::Result<Vec<PciEndpoint>> {
	let mut list = Vec::new();
	for entry in fs::read_dir("/sys/bus/pci/devices")? {
		let entry = entry?;
		let fname = entry.file_name().into_string().map_err(|e| {
			io::Error::new(io::ErrorKind::Other, format!("Invalid (Non-UTF8) PCI device name {:?}", e))
		})?;
		let ep = fname.parse::<PciEndpoint>().map_err(|e| {
			io::Error::new(io::ErrorKind::Other, format!("Invalid PCI device name: {}", e))
		})?;
		list.push(ep);
	}

	list.sort();
	Ok(list)
}

/// all endpoints matching an entry of `table`, sorted
pub fn list_matching_endpoints(table: &[PciDeviceId]) -> crate::AResult<Vec<PciEndpoint>> {
	let mut matching = Vec::new();
	for ep in list_all_endpoints()? {
		let ids = match ep.ids() {
			Ok(ids) => ids,
			Err(e) => {
				debug!("PCI {}: skipping, couldn't read ids: {}", ep, e);
				continue;
			}
		};
		if match_id_table(table, &ids).is_some() {
			matching.push(ep);
		}
	}
	Ok(matching)
}
