mod file;
mod irq;
mod mapped;
mod platform;
mod vfio;

pub use self::mapped::Mapped;
pub use self::platform::LinuxPlatform;

use crate::pci::{
	PciEndpoint,
	PciConfigSpace,
	PciConfigSpaceReadOnly,
};

pub fn open_config_space_readonly(endpoint: PciEndpoint) -> crate::AResult<impl PciConfigSpaceReadOnly> {
	with_context!(("PCI {}: open config space", endpoint),
		Ok(file::open(endpoint, false)?)
	)
}

pub fn open_config_space_readwrite(endpoint: PciEndpoint) -> crate::AResult<impl PciConfigSpace> {
	with_context!(("PCI {}: open config space", endpoint),
		Ok(file::open(endpoint, true)?)
	)
}
