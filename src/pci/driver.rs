use std::fmt;
use std::path::{
	Path,
	PathBuf,
};

/// Kernel driver a PCI device is currently bound to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Driver {
	pub(super) path: PathBuf,
}

impl fmt::Display for Driver {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:?}", self.name())
	}
}

impl Driver {
	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn name(&self) -> &str {
		self.path.file_name().and_then(|n| n.to_str()).unwrap_or("")
	}

	/// userspace drivers get the device through vfio-pci
	pub fn is_vfio(&self) -> bool {
		self.name() == "vfio-pci"
	}
}
