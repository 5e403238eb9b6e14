//! Just enough VFIO to route MSI-X vectors to eventfds.

use std::ffi::CString;
use std::fs;
use std::io;
use std::mem;
use std::os::unix::io::{
	AsRawFd,
	FromRawFd,
	RawFd,
};

use libc::{
	EBUSY,
	c_ulong,
	ioctl,
};

use crate::pci::PciEndpoint;

mod ioctls {
	use libc::c_ulong;

	// _IO(type, nr); VFIO encodes no size or direction
	const fn io(nr: u8) -> c_ulong {
		(b';' as c_ulong) << 8 | nr as c_ulong
	}

	pub const GET_API_VERSION: c_ulong = io(100);
	pub const CHECK_EXTENSION: c_ulong = io(101);
	pub const SET_IOMMU: c_ulong = io(102);
	pub const GROUP_GET_STATUS: c_ulong = io(103);
	pub const GROUP_SET_CONTAINER: c_ulong = io(104);
	pub const GROUP_GET_DEVICE_FD: c_ulong = io(106);
	pub const DEVICE_GET_IRQ_INFO: c_ulong = io(109);
	pub const DEVICE_SET_IRQS: c_ulong = io(110);
}

const API_VERSION: i32 = 0;
const TYPE1V2_IOMMU: c_ulong = 3;
const GROUP_FLAGS_VIABLE: u32 = 1 << 0;

pub const PCI_MSIX_IRQ_INDEX: u32 = 2;

const IRQ_SET_DATA_NONE: u32 = 1 << 0;
const IRQ_SET_DATA_EVENTFD: u32 = 1 << 2;
const IRQ_SET_ACTION_TRIGGER: u32 = 1 << 5;

#[repr(C)]
#[derive(Default)]
struct GroupStatus {
	argsz: u32,
	flags: u32,
}

#[repr(C)]
#[derive(Default)]
struct IrqInfo {
	argsz: u32,
	flags: u32,
	index: u32,
	count: u32,
}

fn check(ret: i32, what: &str) -> crate::AResult<i32> {
	if ret < 0 {
		bail!("{} failed: {}", what, io::Error::last_os_error());
	}
	Ok(ret)
}

fn open_rw(path: &str) -> crate::AResult<fs::File> {
	with_context!(("couldn't open {}", path),
		Ok(fs::OpenOptions::new().read(true).write(true).open(path)?)
	)
}

/// Open the IOMMU group of `endpoint`.
///
/// The kernel allows only one open handle per group, so holding it keeps
/// other VFIO users (and ourselves, a second time) away from the device.
pub fn open_group(endpoint: PciEndpoint) -> crate::AResult<fs::File> {
	let group_id = endpoint.iommu_group()?;
	let path = format!("/dev/vfio/{}", group_id);
	match fs::OpenOptions::new().read(true).write(true).open(&path) {
		Ok(group) => Ok(group),
		Err(ref e) if e.raw_os_error() == Some(EBUSY) => {
			bail!("PCI {}: IOMMU group {} is in use by another VFIO user", endpoint, group_id)
		},
		Err(e) => Err(format_err!("PCI {}: couldn't open {}: {}", endpoint, path, e)),
	}
}

/// Container, group and device handles of a vfio-pci bound device.
///
/// The group stays attached to the container for the lifetime of this
/// value; dropping it closes all three.
pub struct Vfio {
	device: fs::File,
	_group: fs::File,
	_container: fs::File,
}

impl Vfio {
	/// Set up the device through `group`, as returned by [`open_group`].
	pub fn open(endpoint: PciEndpoint, group: &fs::File) -> crate::AResult<Self> {
		with_context!(("PCI {}: VFIO setup", endpoint), {
			let container = open_rw("/dev/vfio/vfio")?;
			let version = unsafe { ioctl(container.as_raw_fd(), ioctls::GET_API_VERSION as _) };
			ensure!(version == API_VERSION, "unsupported VFIO API version {}", version);
			let type1 = unsafe { ioctl(container.as_raw_fd(), ioctls::CHECK_EXTENSION as _, TYPE1V2_IOMMU) };
			ensure!(type1 > 0, "VFIO type1v2 IOMMU not supported");

			let group = group.try_clone()?;
			let mut status = GroupStatus { argsz: mem::size_of::<GroupStatus>() as u32, ..GroupStatus::default() };
			check(unsafe { ioctl(group.as_raw_fd(), ioctls::GROUP_GET_STATUS as _, &mut status as *mut GroupStatus) }, "VFIO_GROUP_GET_STATUS")?;
			ensure!(
				status.flags & GROUP_FLAGS_VIABLE != 0,
				"group not viable (all its devices must be bound to vfio-pci)"
			);

			let container_fd: RawFd = container.as_raw_fd();
			check(unsafe { ioctl(group.as_raw_fd(), ioctls::GROUP_SET_CONTAINER as _, &container_fd as *const RawFd) }, "VFIO_GROUP_SET_CONTAINER")?;
			check(unsafe { ioctl(container.as_raw_fd(), ioctls::SET_IOMMU as _, TYPE1V2_IOMMU) }, "VFIO_SET_IOMMU")?;

			let name = CString::new(endpoint.to_string())?;
			let fd = check(unsafe { ioctl(group.as_raw_fd(), ioctls::GROUP_GET_DEVICE_FD as _, name.as_ptr()) }, "VFIO_GROUP_GET_DEVICE_FD")?;
			let device = unsafe { fs::File::from_raw_fd(fd) };
			debug!("PCI {}: VFIO device opened", endpoint);

			Ok(Vfio {
				device,
				_group: group,
				_container: container,
			})
		})
	}

	/// Number of interrupts the device supports for `index`.
	pub fn irq_count(&self, index: u32) -> crate::AResult<u32> {
		let mut info = IrqInfo {
			argsz: mem::size_of::<IrqInfo>() as u32,
			index,
			..IrqInfo::default()
		};
		check(unsafe { ioctl(self.device.as_raw_fd(), ioctls::DEVICE_GET_IRQ_INFO as _, &mut info as *mut IrqInfo) }, "VFIO_DEVICE_GET_IRQ_INFO")?;
		Ok(info.count)
	}

	/// Route vectors `start..start + fds.len()` to `fds`; `-1` leaves a vector unrouted.
	///
	/// The first call enables MSI-X with exactly `fds.len()` vectors.
	pub fn set_irq_eventfds(&self, index: u32, start: u32, fds: &[RawFd]) -> crate::AResult<()> {
		self.set_irqs(IRQ_SET_DATA_EVENTFD | IRQ_SET_ACTION_TRIGGER, index, start, fds)
	}

	pub fn disable_irqs(&self, index: u32) -> crate::AResult<()> {
		self.set_irqs(IRQ_SET_DATA_NONE | IRQ_SET_ACTION_TRIGGER, index, 0, &[])
	}

	fn set_irqs(&self, flags: u32, index: u32, start: u32, fds: &[RawFd]) -> crate::AResult<()> {
		// struct vfio_irq_set with its variable length data
		let mut irq_set: Vec<u32> = vec![0, flags, index, start, fds.len() as u32];
		irq_set.extend(fds.iter().map(|&fd| fd as u32));
		irq_set[0] = (irq_set.len() * mem::size_of::<u32>()) as u32;
		check(unsafe { ioctl(self.device.as_raw_fd(), ioctls::DEVICE_SET_IRQS as _, irq_set.as_ptr()) }, "VFIO_DEVICE_SET_IRQS")?;
		Ok(())
	}
}
