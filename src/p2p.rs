use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::pci::PciResource;
use crate::platform::Platform;
use crate::region::Region;

/// Part of a BAR published as peer-to-peer DMA memory.
///
/// Revoked on drop; the owner has to drop it before the backing region.
pub struct Advertisement<P: Platform + ?Sized> {
	platform: Arc<P>,
	bar: usize,
	offset: u64,
	length: u64,
	active: bool,
}

impl<P: Platform + ?Sized> fmt::Debug for Advertisement<P> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Advertisement")
			.field("bar", &self.bar)
			.field("offset", &self.offset)
			.field("length", &self.length)
			.field("active", &self.active)
			.finish()
	}
}

/// Publish `[offset, offset + length)` of `region` for peer-to-peer DMA.
///
/// Peer-to-peer support is optional; callers log the error and go on.
pub fn publish<P, M>(platform: &Arc<P>, region: &Region<M>, offset: u64, length: u64) -> Result<Advertisement<P>, Error>
where
	P: Platform + ?Sized,
	M: PciResource,
{
	if !platform.p2pdma_supported() {
		return Err(Error::publish("platform has no peer-to-peer DMA support"));
	}
	match offset.checked_add(length) {
		Some(end) if end <= region.len() => (),
		_ => return Err(Error::publish(format!(
			"range {:#x}+{:#x} exceeds BAR{} ({:#x} bytes)", offset, length, region.bar(), region.len()
		))),
	}

	let bar = region.bar();
	platform.p2pdma_add_resource(bar, length, offset).map_err(Error::publish)?;
	if let Err(e) = platform.p2pmem_publish(true) {
		if let Err(e) = platform.p2pdma_remove_resource(bar) {
			error!("PCI {}: failed to remove BAR{} p2pdma resource: {}", platform.endpoint(), bar, e);
		}
		return Err(Error::publish(e));
	}
	info!("PCI {}: BAR{} published as p2pdma memory ({:#x} bytes at {:#x})", platform.endpoint(), bar, length, offset);

	Ok(Advertisement {
		platform: platform.clone(),
		bar,
		offset,
		length,
		active: true,
	})
}

impl<P: Platform + ?Sized> Advertisement<P> {
	pub fn bar(&self) -> usize {
		self.bar
	}

	pub fn offset(&self) -> u64 {
		self.offset
	}

	pub fn length(&self) -> u64 {
		self.length
	}

	pub fn is_active(&self) -> bool {
		self.active
	}

	pub fn revoke(&mut self) {
		if !self.active {
			return;
		}
		self.active = false;
		let ep = self.platform.endpoint();
		if let Err(e) = self.platform.p2pmem_publish(false) {
			error!("PCI {}: failed to unpublish p2p memory: {}", ep, e);
		}
		if let Err(e) = self.platform.p2pdma_remove_resource(self.bar) {
			error!("PCI {}: failed to remove BAR{} p2pdma resource: {}", ep, self.bar, e);
		}
		debug!("PCI {}: BAR{} p2pdma memory revoked", ep, self.bar);
	}
}

impl<P: Platform + ?Sized> Drop for Advertisement<P> {
	fn drop(&mut self) {
		self.revoke();
	}
}
