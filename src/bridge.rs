//! File-like access to the single user register in BAR2.

use failure::Error;

use crate::pci::PciResource;
use crate::region::Region;

/// Offset of the user register inside BAR2.
pub const REGISTER_OFFSET: usize = 0x04;
pub const REGISTER_SIZE: usize = 4;

/// Open handle on the register; only the 4 byte window is reachable.
pub struct RegisterBridge<'a, M: PciResource> {
	bar2: &'a mut M,
}

impl<'a, M: PciResource> RegisterBridge<'a, M> {
	pub fn open(region: &'a mut Region<M>) -> crate::AResult<Self> {
		let bar = region.bar();
		let bar2 = match region.mapping_mut() {
			Some(mapping) => mapping,
			None => bail!("register bridge: BAR{} is not mapped", bar),
		};
		ensure!(
			bar2.len() >= REGISTER_OFFSET + REGISTER_SIZE,
			"register bridge: BAR{} too small ({} bytes) for register at {:#x}", bar, bar2.len(), REGISTER_OFFSET
		);
		debug!("PCI {}: register bridge opened", bar2.endpoint());
		Ok(RegisterBridge { bar2 })
	}

	pub fn read_register(&self) -> u32 {
		self.bar2.read_dword(REGISTER_OFFSET)
	}

	pub fn write_register(&mut self, value: u32) {
		self.bar2.write_dword(REGISTER_OFFSET, value)
	}

	/// Read the register into `buf` (native byte order); returns the number of bytes read.
	pub fn read(&self, pos: u64, buf: &mut [u8]) -> crate::AResult<usize> {
		check_window(pos, buf.len(), true)?;
		buf[..REGISTER_SIZE].copy_from_slice(&self.read_register().to_ne_bytes());
		Ok(REGISTER_SIZE)
	}

	/// Write the register from exactly 4 bytes (native byte order).
	pub fn write(&mut self, pos: u64, buf: &[u8]) -> crate::AResult<usize> {
		check_window(pos, buf.len(), false)?;
		let mut value = [0u8; REGISTER_SIZE];
		value.copy_from_slice(buf);
		self.write_register(u32::from_ne_bytes(value));
		Ok(REGISTER_SIZE)
	}

	pub fn release(self) {
		debug!("PCI {}: register bridge released", self.bar2.endpoint());
	}
}

fn check_window(pos: u64, len: usize, read: bool) -> Result<(), Error> {
	ensure!(pos == 0, "register access at position {} outside of {} byte register", pos, REGISTER_SIZE);
	if read {
		ensure!(len >= REGISTER_SIZE, "register read needs a {} byte buffer, got {}", REGISTER_SIZE, len);
	} else {
		ensure!(len == REGISTER_SIZE, "register write needs exactly {} bytes, got {}", REGISTER_SIZE, len);
	}
	Ok(())
}
