use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::{
	Arc,
	Mutex,
	MutexGuard,
};

use libc::{
	LOCK_EX,
	LOCK_NB,
	flock,
};
use vmm_sys_util::eventfd::EventFd;

use super::irq::{
	self,
	Dispatcher,
};
use super::mapped::{
	self,
	Mapped,
};
use super::vfio::{
	self,
	PCI_MSIX_IRQ_INDEX,
	Vfio,
};
use crate::pci::{
	COMMAND,
	COMMAND_BUS_MASTER,
	PciConfigSpace,
	PciConfigSpaceReadOnly,
	PciEndpoint,
};
use crate::platform::{
	DeviceIds,
	InterruptHandler,
	Platform,
};
use crate::region::RegionDescriptor;

const BAR_COUNT: usize = 6;

#[derive(Default)]
struct State {
	/// set if the device was disabled before we enabled it
	enabled_by_us: bool,
	/// set if bus mastering was off before we turned it on
	master_set_by_us: bool,
	/// `flock`ed resource files
	regions: Vec<fs::File>,
	/// exclusive handle on the IOMMU group, if bound to vfio-pci
	group: Option<fs::File>,
	vfio: Option<Vfio>,
	vectors: usize,
	irqs: BTreeMap<usize, (Arc<EventFd>, Dispatcher)>,
}

/// Userspace access to one PCI device through sysfs and VFIO.
///
/// MSI-X needs the device bound to `vfio-pci` with the IOMMU enabled.
pub struct LinuxPlatform {
	endpoint: PciEndpoint,
	state: Mutex<State>,
}

impl LinuxPlatform {
	pub fn open(endpoint: PciEndpoint) -> crate::AResult<Arc<Self>> {
		ensure!(
			endpoint.device_file("").exists(),
			"PCI {}: no such device", endpoint
		);
		Ok(Arc::new(LinuxPlatform {
			endpoint,
			state: Mutex::new(State::default()),
		}))
	}

	fn state(&self) -> crate::AResult<MutexGuard<State>> {
		self.state.lock().map_err(|_| format_err!("PCI {}: platform state poisoned", self.endpoint))
	}
}

fn lock_resource(ep: PciEndpoint, bar: usize, owner: &str) -> crate::AResult<fs::File> {
	let path = ep.resource_file(bar);
	let file = with_context!(("PCI {}: open {:?}", ep, path),
		Ok(fs::File::open(&path)?)
	)?;
	if 0 != unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) } {
		let e = io::Error::last_os_error();
		if e.kind() == io::ErrorKind::WouldBlock {
			bail!("BAR{} already in use (wanted by {})", bar, owner);
		}
		bail!("couldn't lock BAR{}: {}", bar, e);
	}
	Ok(file)
}

/// Turn bus mastering on or off; only a bit set by us is cleared again.
fn update_bus_master<C>(config: &mut C, enable: bool, set_by_us: &mut bool) -> crate::AResult<()>
where
	C: PciConfigSpace + ?Sized,
{
	let ep = config.endpoint();
	if enable {
		if config.read_word(COMMAND) & COMMAND_BUS_MASTER != 0 {
			debug!("PCI {}: bus mastering already enabled", ep);
			return Ok(());
		}
		config.update_command(COMMAND_BUS_MASTER, 0);
	} else {
		if !*set_by_us {
			debug!("PCI {}: leaving bus mastering as found", ep);
			return Ok(());
		}
		config.update_command(0, COMMAND_BUS_MASTER);
	}
	let command = config.read_word(COMMAND);
	ensure!(
		(command & COMMAND_BUS_MASTER != 0) == enable,
		"PCI {}: bus master bit didn't stick (command {:#06x})", ep, command
	);
	*set_by_us = enable;
	Ok(())
}

impl Platform for LinuxPlatform {
	type Mapping = Mapped;

	fn endpoint(&self) -> PciEndpoint {
		self.endpoint
	}

	fn ids(&self) -> crate::AResult<DeviceIds> {
		self.endpoint.ids()
	}

	fn enable_device(&self) -> crate::AResult<()> {
		let mut state = self.state()?;
		ensure!(!self.endpoint.is_enabled()?, "PCI {}: already enabled elsewhere", self.endpoint);
		self.endpoint.enable()?;
		state.enabled_by_us = true;
		Ok(())
	}

	fn disable_device(&self) -> crate::AResult<()> {
		let mut state = self.state()?;
		if state.enabled_by_us {
			state.enabled_by_us = false;
			self.endpoint.disable()?;
		}
		Ok(())
	}

	fn request_regions(&self, owner: &str) -> crate::AResult<()> {
		let ep = self.endpoint;
		let mut state = self.state()?;
		ensure!(state.group.is_none() && state.regions.is_empty(), "PCI {}: regions already reserved", ep);
		// taken before anything is written to the device
		let group = match ep.driver()? {
			None => None,
			Some(driver) => {
				ensure!(driver.is_vfio(), "PCI {}: bound to kernel driver {}", ep, driver);
				Some(vfio::open_group(ep)?)
			},
		};
		let mut locks = Vec::new();
		for bar in 0..BAR_COUNT {
			if ep.resource(bar)?.is_some() {
				locks.push(lock_resource(ep, bar, owner)?);
			}
		}
		debug!("PCI {}: {} regions reserved for {}", ep, locks.len(), owner);
		state.regions = locks;
		state.group = group;
		Ok(())
	}

	fn release_regions(&self) -> crate::AResult<()> {
		let mut state = self.state()?;
		// closing the files drops the locks and the group
		state.vfio = None;
		state.group = None;
		state.regions.clear();
		Ok(())
	}

	fn set_master(&self, enable: bool) -> crate::AResult<()> {
		let ep = self.endpoint;
		let mut state = self.state()?;
		let mut config = with_context!(("PCI {}: open config space", ep),
			Ok(super::file::open(ep, true)?)
		)?;
		update_bus_master(&mut config, enable, &mut state.master_set_by_us)
	}

	fn bar(&self, index: usize) -> crate::AResult<Option<RegionDescriptor>> {
		if index >= BAR_COUNT {
			return Ok(None);
		}
		self.endpoint.resource(index)
	}

	fn map_bar(&self, descriptor: &RegionDescriptor) -> crate::AResult<Mapped> {
		ensure!(descriptor.is_memory(), "BAR{} is not a memory BAR", descriptor.bar);
		ensure!(
			descriptor.len <= usize::max_value() as u64,
			"BAR{} too large to map ({} bytes)", descriptor.bar, descriptor.len
		);
		mapped::open(self.endpoint, descriptor.bar, descriptor.len as usize)
	}

	fn alloc_irq_vectors(&self, count: usize) -> crate::AResult<()> {
		let mut state = self.state()?;
		ensure!(state.vectors == 0, "PCI {}: vectors already allocated", self.endpoint);
		if state.vfio.is_none() {
			let vfio = match state.group.as_ref() {
				Some(group) => Vfio::open(self.endpoint, group)?,
				None => bail!("PCI {}: MSI-X needs the device bound to vfio-pci", self.endpoint),
			};
			state.vfio = Some(vfio);
		}
		let vfio = state.vfio.as_ref().ok_or_else(|| format_err!("no VFIO device"))?;
		let available = vfio.irq_count(PCI_MSIX_IRQ_INDEX)? as usize;
		ensure!(
			count <= available,
			"PCI {}: {} MSI-X vectors requested, device has {}", self.endpoint, count, available
		);
		vfio.set_irq_eventfds(PCI_MSIX_IRQ_INDEX, 0, &vec![-1; count])?;
		state.vectors = count;
		Ok(())
	}

	fn free_irq_vectors(&self) -> crate::AResult<()> {
		let mut state = self.state()?;
		if state.vectors == 0 {
			return Ok(());
		}
		state.vectors = 0;
		match state.vfio.as_ref() {
			Some(vfio) => vfio.disable_irqs(PCI_MSIX_IRQ_INDEX),
			None => Ok(()),
		}
	}

	fn request_irq(&self, vector: usize, handler: Arc<dyn InterruptHandler>) -> crate::AResult<()> {
		let ep = self.endpoint;
		let mut state = self.state()?;
		ensure!(vector < state.vectors, "PCI {}: vector {} not allocated", ep, vector);
		ensure!(!state.irqs.contains_key(&vector), "PCI {}: vector {} already bound", ep, vector);
		let vfio = state.vfio.as_ref().ok_or_else(|| format_err!("no VFIO device"))?;

		let trigger = Arc::new(irq::eventfd()?);
		let dispatcher = Dispatcher::spawn(ep, vector, trigger.clone(), handler)?;
		vfio.set_irq_eventfds(PCI_MSIX_IRQ_INDEX, vector as u32, &[trigger.as_raw_fd()])?;
		state.irqs.insert(vector, (trigger, dispatcher));
		trace!("PCI {}: vector {} bound", ep, vector);
		Ok(())
	}

	fn free_irq(&self, vector: usize) -> crate::AResult<()> {
		let ep = self.endpoint;
		let (trigger, dispatcher) = {
			let mut state = self.state()?;
			let bound = match state.irqs.remove(&vector) {
				Some(bound) => bound,
				None => return Ok(()),
			};
			if let Some(vfio) = state.vfio.as_ref() {
				if let Err(e) = vfio.set_irq_eventfds(PCI_MSIX_IRQ_INDEX, vector as u32, &[-1]) {
					error!("PCI {}: couldn't detach vector {}: {}", ep, vector, e);
				}
			}
			bound
		};
		// join outside the lock; the eventfd is closed after the thread is gone
		dispatcher.stop();
		drop(trigger);
		trace!("PCI {}: vector {} freed", ep, vector);
		Ok(())
	}

	fn p2pdma_supported(&self) -> bool {
		false
	}

	fn p2pdma_add_resource(&self, bar: usize, _size: u64, _offset: u64) -> crate::AResult<()> {
		bail!("PCI {}: can't register BAR{} as p2pdma memory from userspace", self.endpoint, bar);
	}

	fn p2pdma_remove_resource(&self, _bar: usize) -> crate::AResult<()> {
		Ok(())
	}

	fn p2pmem_publish(&self, _publish: bool) -> crate::AResult<()> {
		bail!("PCI {}: p2pmem publishing not available from userspace", self.endpoint);
	}
}
