use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{
	AtomicU64,
	Ordering,
};

use crate::MAX_VECTORS;
use crate::error::Error;
use crate::platform::{
	InterruptHandler,
	IrqReturn,
	Platform,
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum VectorState {
	Free,
	Bound,
}

/// MSI-X vectors of one device.
///
/// `allocate` reserves a block of exactly the requested size; slots in that
/// block go `Free -> Bound -> Free`. Dropping the table tears it down.
pub struct VectorTable<P: Platform + ?Sized> {
	platform: Arc<P>,
	slots: [VectorState; MAX_VECTORS],
	active: usize,
	allocated: bool,
}

impl<P: Platform + ?Sized> fmt::Debug for VectorTable<P> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("VectorTable")
			.field("slots", &&self.slots[..self.active])
			.field("allocated", &self.allocated)
			.finish()
	}
}

impl<P: Platform + ?Sized> VectorTable<P> {
	pub fn allocate(platform: Arc<P>, requested: usize) -> Result<Self, Error> {
		if requested > MAX_VECTORS {
			return Err(Error::alloc(format!("{} vectors requested, hardware has {}", requested, MAX_VECTORS)));
		}
		if requested > 0 {
			platform.alloc_irq_vectors(requested).map_err(|e| {
				Error::alloc(format!("request for {} MSI-X vectors failed: {}", requested, e))
			})?;
		}
		debug!("PCI {}: {} MSI-X vectors allocated", platform.endpoint(), requested);

		Ok(VectorTable {
			platform,
			slots: [VectorState::Free; MAX_VECTORS],
			active: requested,
			allocated: requested > 0,
		})
	}

	/// number of vectors in the allocated block
	pub fn len(&self) -> usize {
		self.active
	}

	pub fn is_empty(&self) -> bool {
		self.active == 0
	}

	pub fn state(&self, slot: usize) -> VectorState {
		self.slots.get(slot).cloned().unwrap_or(VectorState::Free)
	}

	pub fn bound_count(&self) -> usize {
		self.slots.iter().filter(|&&s| s == VectorState::Bound).count()
	}

	/// Bind `handler` to the lowest free slot.
	pub fn register(&mut self, handler: Arc<dyn InterruptHandler>) -> Result<usize, Error> {
		if !self.allocated {
			return Err(Error::alloc("no vectors allocated"));
		}
		let slot = match self.slots[..self.active].iter().position(|&s| s == VectorState::Free) {
			Some(slot) => slot,
			None => return Err(Error::alloc("all allocated vectors are bound")),
		};
		self.platform.request_irq(slot, handler).map_err(|e| {
			Error::alloc(format!("request_irq for vector {} failed: {}", slot, e))
		})?;
		self.slots[slot] = VectorState::Bound;
		Ok(slot)
	}

	/// No-op on a free slot.
	pub fn unregister(&mut self, slot: usize) {
		if self.state(slot) != VectorState::Bound {
			return;
		}
		// the line is gone for us even if the platform complains
		self.slots[slot] = VectorState::Free;
		if let Err(e) = self.platform.free_irq(slot) {
			error!("PCI {}: failed to free vector {}: {}", self.platform.endpoint(), slot, e);
		}
	}

	/// Bind `handler` to every free slot of the block, or to none.
	pub fn bind_handler(&mut self, handler: Arc<dyn InterruptHandler>) -> Result<(), Error> {
		let free = self.slots[..self.active].iter().filter(|&&s| s == VectorState::Free).count();
		let mut bound = Vec::with_capacity(free);
		for _ in 0..free {
			match self.register(handler.clone()) {
				Ok(slot) => bound.push(slot),
				Err(e) => {
					for slot in bound {
						self.unregister(slot);
					}
					return Err(e);
				}
			}
		}
		debug!("PCI {}: handler bound to {} vectors", self.platform.endpoint(), bound.len());
		Ok(())
	}

	/// Unregister all bound slots and release the block; repeatable.
	pub fn teardown(&mut self) {
		for slot in 0..MAX_VECTORS {
			self.unregister(slot);
		}
		if self.allocated {
			self.allocated = false;
			if let Err(e) = self.platform.free_irq_vectors() {
				error!("PCI {}: failed to free MSI-X vectors: {}", self.platform.endpoint(), e);
			}
			debug!("PCI {}: MSI-X vectors released", self.platform.endpoint());
		}
		self.active = 0;
	}
}

impl<P: Platform + ?Sized> Drop for VectorTable<P> {
	fn drop(&mut self) {
		self.teardown();
	}
}

/// Acknowledges every interrupt and counts them per vector.
#[derive(Default)]
pub struct AckHandler {
	counts: [AtomicU64; MAX_VECTORS],
}

impl AckHandler {
	pub fn count(&self, vector: usize) -> u64 {
		self.counts.get(vector).map_or(0, |c| c.load(Ordering::Relaxed))
	}
}

impl InterruptHandler for AckHandler {
	fn handle(&self, vector: usize) -> IrqReturn {
		if let Some(count) = self.counts.get(vector) {
			count.fetch_add(1, Ordering::Relaxed);
		}
		debug!("interrupt on vector {}", vector);
		IrqReturn::Handled
	}
}
