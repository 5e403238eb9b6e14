use std::fs;
use std::io;
use std::os::unix::fs::FileExt;

use crate::pci::{
	PciConfigSpace,
	PciConfigSpaceReadOnly,
	PciEndpoint,
};

/// Config space through the sysfs `config` file.
///
/// Failed reads return all ones, like a master abort on the bus would;
/// failed writes are logged and dropped.
pub struct File {
	file: fs::File,
	len: usize,
	endpoint: PciEndpoint,
}

impl File {
	fn read_exact_at(&self, offset: usize, buf: &mut [u8]) {
		assert!(offset + buf.len() <= self.len);
		if let Err(e) = self.file.read_exact_at(buf, offset as u64) {
			error!("PCI {}: config read at {:#x} failed: {}", self.endpoint, offset, e);
			for b in buf.iter_mut() {
				*b = 0xff;
			}
		}
	}

	fn write_all_at(&self, offset: usize, buf: &[u8]) {
		assert!(offset + buf.len() <= self.len);
		if let Err(e) = self.file.write_all_at(buf, offset as u64) {
			error!("PCI {}: config write at {:#x} failed: {}", self.endpoint, offset, e);
		}
	}
}

impl PciConfigSpaceReadOnly for File {
	fn endpoint(&self) -> PciEndpoint {
		self.endpoint
	}

	fn len(&self) -> usize {
		self.len
	}

	fn read_byte(&self, offset: usize) -> u8 {
		let mut buf = [0u8];
		self.read_exact_at(offset, &mut buf);
		buf[0]
	}

	fn read_word(&self, offset: usize) -> u16 {
		assert!(offset & 1 == 0);
		let mut buf = [0u8; 2];
		self.read_exact_at(offset, &mut buf);
		u16::from_le_bytes(buf)
	}

	fn read_dword(&self, offset: usize) -> u32 {
		assert!(offset & 3 == 0);
		let mut buf = [0u8; 4];
		self.read_exact_at(offset, &mut buf);
		u32::from_le_bytes(buf)
	}
}

impl PciConfigSpace for File {
	fn write_word(&mut self, offset: usize, data: u16) {
		assert!(offset & 1 == 0);
		self.write_all_at(offset, &data.to_le_bytes());
	}
}

pub fn open(endpoint: PciEndpoint, writable: bool) -> io::Result<File> {
	let file = fs::OpenOptions::new()
		.read(true)
		.write(writable)
		.open(endpoint.device_file("config"))?;

	// unprivileged readers only see the first 64 bytes
	let len = file.metadata()?.len().min(4096) as usize;

	Ok(File {
		file,
		len,
		endpoint,
	})
}
