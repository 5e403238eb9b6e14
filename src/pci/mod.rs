mod config_space;
mod driver;
mod endpoint;
mod id;
mod list;
mod resource;

pub mod linux;

pub use self::config_space::{
	COMMAND,
	COMMAND_BUS_MASTER,
	COMMAND_MEMORY_SPACE,
	PciConfigSpace,
	PciConfigSpaceReadOnly,
};

pub use self::driver::{
	Driver,
};

pub use self::endpoint::{
	DeviceID,
	PciBus,
	PciEndpoint,
	SlotFunction,
	VendorId,
};

pub use self::id::{
	PciDeviceId,
	match_id_table,
};

pub use self::list::{
	list_all_endpoints,
	list_matching_endpoints,
};

pub use self::resource::{
	PciResource,
	PciResourceReadOnly,
};

// OS-specific. for now linux only.
pub use self::linux::{
	LinuxPlatform,
	Mapped,
	open_config_space_readonly,
	open_config_space_readwrite,
};
