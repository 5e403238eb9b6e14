//! Host operations the resource lifecycle is built on.
//!
//! Everything that touches hardware goes through [`Platform`]: the Linux
//! backend in [`crate::pci::linux`] talks to sysfs and VFIO, tests use a
//! recording fake. All methods take `&self`; backends keep their own
//! bookkeeping behind locks because interrupt dispatch runs on other threads.

use std::sync::Arc;

use crate::pci::{
	DeviceID,
	PciEndpoint,
	PciResource,
	VendorId,
};
use crate::region::RegionDescriptor;

/// What an interrupt handler tells the dispatcher.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum IrqReturn {
	/// interrupt was not from this device
	None,
	Handled,
}

/// Callback bound to interrupt vectors.
///
/// Runs on a dispatch thread concurrently with everything else; must not
/// block.
pub trait InterruptHandler: Send + Sync {
	fn handle(&self, vector: usize) -> IrqReturn;
}

impl<F> InterruptHandler for F
where
	F: Fn(usize) -> IrqReturn + Send + Sync,
{
	fn handle(&self, vector: usize) -> IrqReturn {
		self(vector)
	}
}

/// Identity registers used for id table matching.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DeviceIds {
	pub vendor: VendorId,
	pub device: DeviceID,
	pub subsystem_vendor: VendorId,
	pub subsystem_device: DeviceID,
}

pub trait Platform: Send + Sync {
	/// A mapped BAR; dropping it unmaps.
	type Mapping: PciResource + Send;

	fn endpoint(&self) -> PciEndpoint;
	fn ids(&self) -> crate::AResult<DeviceIds>;

	fn enable_device(&self) -> crate::AResult<()>;
	fn disable_device(&self) -> crate::AResult<()>;

	/// reserve all BARs of the device for `owner`
	fn request_regions(&self, owner: &str) -> crate::AResult<()>;
	fn release_regions(&self) -> crate::AResult<()>;

	fn set_master(&self, enable: bool) -> crate::AResult<()>;

	/// `None` if the BAR isn't implemented by the device
	fn bar(&self, index: usize) -> crate::AResult<Option<RegionDescriptor>>;
	fn map_bar(&self, descriptor: &RegionDescriptor) -> crate::AResult<Self::Mapping>;

	/// allocate exactly `count` MSI-X vectors
	fn alloc_irq_vectors(&self, count: usize) -> crate::AResult<()>;
	fn free_irq_vectors(&self) -> crate::AResult<()>;

	fn request_irq(&self, vector: usize, handler: Arc<dyn InterruptHandler>) -> crate::AResult<()>;
	/// When this returns the handler is not running and won't be called again for `vector`.
	fn free_irq(&self, vector: usize) -> crate::AResult<()>;

	fn p2pdma_supported(&self) -> bool;
	fn p2pdma_add_resource(&self, bar: usize, size: u64, offset: u64) -> crate::AResult<()>;
	fn p2pdma_remove_resource(&self, bar: usize) -> crate::AResult<()>;
	fn p2pmem_publish(&self, publish: bool) -> crate::AResult<()>;
}
