#[macro_use]
extern crate failure;
#[macro_use]
extern crate log;

macro_rules! with_context {
	(( $fmt:tt $($t:tt)* ), $e:expr) => {{
		use failure::Error;

		match (|| { $e })() {
			Ok(v) => Ok(v),
			Err(e) => {
				let e: Error = e;
				let msg = format!(concat!($fmt, ": {}") $($t)*, e);
				Err(Error::from(e.context(msg)))
			}
		}
	}};

	($msg:expr, $e:expr) => {
		with_context!(("{}", $msg), $e)
	};
}

pub type AResult<T> = Result<T, failure::Error>;

pub const DRV_NAME: &str = "nettlp";

pub const VENDOR_ID: u16 = 0x3776;
pub const DEVICE_ID: u16 = 0x8022;

/// hardware limit of MSI-X vectors on the NetTLP adapter
pub const MAX_VECTORS: usize = 16;
/// vectors requested by default
pub const NUM_VECTORS: usize = 4;

pub const BAR_PIO: usize = 0;
pub const BAR_MSIX: usize = 2;
pub const BAR_P2P: usize = 4;

mod bridge;
mod claim;
mod driver;
mod error;
mod messaging;
mod p2p;
mod region;
mod session;
mod vectors;

pub mod msix;
pub mod pci;
pub mod platform;

#[cfg(test)]
pub(crate) mod testing;

pub use self::bridge::{
	REGISTER_OFFSET,
	RegisterBridge,
};

pub use self::claim::Claim;

pub use self::driver::{
	ID_TABLE,
	NettlpDriver,
};

pub use self::error::{
	AttachError,
	Error,
	Stage,
};

pub use self::messaging::{
	LogMessenger,
	MessageContext,
	Messenger,
};

pub use self::msix::MsixEntry;

pub use self::p2p::Advertisement;

pub use self::region::{
	Region,
	RegionDescriptor,
};

pub use self::session::{
	AttachState,
	Config,
	DeviceSession,
};

pub use self::vectors::{
	AckHandler,
	VectorState,
	VectorTable,
};
