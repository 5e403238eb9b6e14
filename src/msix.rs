//! MSI-X table snapshot and capability decoding.
//!
//! The NetTLP adapter exposes its MSI-X table at the start of BAR2, one
//! 16 byte record per vector:
//!
//! ```text
//! +0x0  message address, low dword
//! +0x4  message address, high dword
//! +0x8  message data
//! +0xc  vector control (bit 0: masked)
//! ```

use std::fmt;

use crate::error::Error;
use crate::pci::{
	PciConfigSpaceReadOnly,
	PciResource,
	PciResourceReadOnly,
};
use crate::region::Region;

pub const TABLE_OFFSET: usize = 0x0;
pub const ENTRY_SIZE: usize = 16;

pub const CAPABILITY_ID: u8 = 0x11;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct MsixEntry {
	pub address: u64,
	pub data: u32,
	pub vector_control: u32,
}

impl MsixEntry {
	pub fn masked(&self) -> bool {
		self.vector_control & 0x1 != 0
	}
}

impl fmt::Display for MsixEntry {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Addr={:#x}, Data={:08x}", self.address, self.data)?;
		if self.masked() {
			f.write_str(" (masked)")?;
		}
		Ok(())
	}
}

/// Read `count` entries starting at `offset`.
pub fn read_entries<R>(resource: &R, offset: usize, count: usize) -> Result<Vec<MsixEntry>, Error>
where
	R: PciResourceReadOnly + ?Sized,
{
	let end = count.checked_mul(ENTRY_SIZE).and_then(|size| size.checked_add(offset));
	match end {
		Some(end) if end <= resource.len() => (),
		_ => return Err(Error::read(format!(
			"{} entries at {:#x} exceed {:#x} byte region", count, offset, resource.len()
		))),
	}
	if offset & 3 != 0 {
		return Err(Error::read(format!("unaligned table offset {:#x}", offset)));
	}

	Ok((0..count).map(|n| {
		let base = offset + n * ENTRY_SIZE;
		let low = resource.read_dword(base) as u64;
		let high = resource.read_dword(base + 4) as u64;
		MsixEntry {
			address: high << 32 | low,
			data: resource.read_dword(base + 8),
			vector_control: resource.read_dword(base + 12),
		}
	}).collect())
}

/// Snapshot the first `vector_count` table entries from a mapped region.
pub fn read_table<M: PciResource>(region: &Region<M>, vector_count: usize) -> Result<Vec<MsixEntry>, Error> {
	match region.mapping() {
		None => Err(Error::read(format!("BAR{} is not mapped", region.bar()))),
		Some(mapping) => read_entries(mapping, TABLE_OFFSET, vector_count),
	}
}

/// The MSI-X capability structure from config space.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MsixCapability {
	pub offset: usize,
	pub table_size: usize,
	pub enabled: bool,
	pub function_mask: bool,
	pub table_bir: usize,
	pub table_offset: u32,
	pub pba_bir: usize,
	pub pba_offset: u32,
}

impl MsixCapability {
	pub fn find<S: PciConfigSpaceReadOnly + ?Sized>(config: &S) -> Option<Self> {
		let offset = config.find_capability(CAPABILITY_ID)?;
		if offset + 12 > config.len() {
			return None;
		}
		let control = config.read_word(offset + 2);
		let table = config.read_dword(offset + 4);
		let pba = config.read_dword(offset + 8);
		Some(MsixCapability {
			offset,
			table_size: (control & 0x7ff) as usize + 1,
			enabled: control & 0x8000 != 0,
			function_mask: control & 0x4000 != 0,
			table_bir: (table & 0x7) as usize,
			table_offset: table & !0x7,
			pba_bir: (pba & 0x7) as usize,
			pba_offset: pba & !0x7,
		})
	}
}

impl fmt::Display for MsixCapability {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"MSI-X: {} vectors, {}{}, table BAR{}+{:#x}, PBA BAR{}+{:#x}",
			self.table_size,
			if self.enabled { "enabled" } else { "disabled" },
			if self.function_mask { " (masked)" } else { "" },
			self.table_bir, self.table_offset,
			self.pba_bir, self.pba_offset,
		)
	}
}
