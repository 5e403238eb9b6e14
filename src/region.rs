use std::fmt;

use crate::error::Error;
use crate::pci::PciResource;
use crate::platform::Platform;

// kernel resource flags as exported through sysfs
const IORESOURCE_IO: u64 = 0x0000_0100;
const IORESOURCE_MEM: u64 = 0x0000_0200;
const IORESOURCE_PREFETCH: u64 = 0x0000_2000;
const IORESOURCE_MEM_64: u64 = 0x0010_0000;

/// Address range and flags of one BAR.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RegionDescriptor {
	pub bar: usize,
	pub start: u64,
	pub end: u64,
	pub flags: u64,
	pub len: u64,
}

impl RegionDescriptor {
	pub fn is_io(&self) -> bool {
		self.flags & IORESOURCE_IO != 0
	}

	pub fn is_memory(&self) -> bool {
		self.flags & IORESOURCE_MEM != 0
	}

	pub fn is_64bit(&self) -> bool {
		self.flags & IORESOURCE_MEM_64 != 0
	}

	pub fn is_prefetchable(&self) -> bool {
		self.flags & IORESOURCE_PREFETCH != 0
	}
}

impl fmt::Display for RegionDescriptor {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(
			f,
			"BAR{}: start {:#x}, end {:#x}, flags {:#x}, len {}",
			self.bar, self.start, self.end, self.flags, self.len,
		)?;
		match (self.is_io(), self.is_memory()) {
			(true, _) => f.write_str(" (I/O)"),
			(false, true) => write!(
				f,
				" ({}-bit{})",
				if self.is_64bit() { 64 } else { 32 },
				if self.is_prefetchable() { ", prefetchable" } else { "" },
			),
			(false, false) => Ok(()),
		}
	}
}

/// `NoSuchBar` only if the device doesn't implement `bar`; a failed query
/// is a `MapFailure`.
pub fn describe<P: Platform + ?Sized>(platform: &P, bar: usize) -> Result<RegionDescriptor, Error> {
	match platform.bar(bar) {
		Ok(Some(descriptor)) => Ok(descriptor),
		Ok(None) => Err(Error::NoSuchBar { bar }),
		Err(e) => Err(Error::MapFailure {
			bar,
			reason: format!("couldn't query resource: {}", e),
		}),
	}
}

/// A BAR, optionally mapped into our address space.
///
/// The mapping is only ever released by dropping the region.
#[derive(Debug)]
pub struct Region<M: PciResource> {
	descriptor: RegionDescriptor,
	mapping: Option<M>,
}

impl<M: PciResource> Region<M> {
	pub fn unmapped(descriptor: RegionDescriptor) -> Self {
		Region {
			descriptor,
			mapping: None,
		}
	}

	pub fn map<P>(platform: &P, descriptor: RegionDescriptor) -> Result<Self, Error>
	where
		P: Platform<Mapping = M> + ?Sized,
	{
		let bar = descriptor.bar;
		if descriptor.len == 0 {
			return Err(Error::MapFailure { bar, reason: "empty region".into() });
		}
		let mapping = platform.map_bar(&descriptor).map_err(|e| {
			Error::MapFailure { bar, reason: e.to_string() }
		})?;
		if (mapping.len() as u64) < descriptor.len {
			return Err(Error::MapFailure {
				bar,
				reason: format!("mapped {} bytes, region has {}", mapping.len(), descriptor.len),
			});
		}
		debug!("PCI {}: BAR{} mapped ({} bytes)", platform.endpoint(), bar, mapping.len());

		Ok(Region {
			descriptor,
			mapping: Some(mapping),
		})
	}

	pub fn descriptor(&self) -> &RegionDescriptor {
		&self.descriptor
	}

	pub fn bar(&self) -> usize {
		self.descriptor.bar
	}

	pub fn start(&self) -> u64 {
		self.descriptor.start
	}

	pub fn len(&self) -> u64 {
		self.descriptor.len
	}

	pub fn is_mapped(&self) -> bool {
		self.mapping.is_some()
	}

	pub fn mapping(&self) -> Option<&M> {
		self.mapping.as_ref()
	}

	pub fn mapping_mut(&mut self) -> Option<&mut M> {
		self.mapping.as_mut()
	}
}

impl<M: PciResource> Drop for Region<M> {
	fn drop(&mut self) {
		if let Some(mapping) = self.mapping.take() {
			debug!("PCI {}: unmap BAR{}", mapping.endpoint(), self.descriptor.bar);
		}
	}
}
