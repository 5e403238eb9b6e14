use crate::msix::MsixEntry;
use crate::pci::{
	PciEndpoint,
	PciResourceReadOnly,
};

/// What the message socket gets to see of an attached device.
///
/// Borrowed from the session; only valid during `Messenger::init`.
pub struct MessageContext<'a> {
	pub endpoint: PciEndpoint,
	/// physical start of BAR4
	pub bar4_start: u64,
	/// `bus << 8 | devfn`
	pub devid: u16,
	/// mapped BAR2 (MSI-X table and register window)
	pub bar2: &'a dyn PciResourceReadOnly,
	pub msix: &'a [MsixEntry],
}

/// The NetTLP message socket relaying TLP events.
///
/// `init` is called once when a device reached `Ready`, `shutdown` once at
/// the start of detach.
pub trait Messenger: Send {
	fn init(&mut self, context: &MessageContext);
	fn shutdown(&mut self);
}

/// Messenger that only logs; stands in where no socket is wired up.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct LogMessenger;

impl Messenger for LogMessenger {
	fn init(&mut self, context: &MessageContext) {
		info!(
			"PCI {}: message socket init: BAR4 start {:#x}, devid {:#06x}, BAR2 {} bytes, {} MSI-X entries",
			context.endpoint, context.bar4_start, context.devid, context.bar2.len(), context.msix.len(),
		);
	}

	fn shutdown(&mut self) {
		info!("message socket shutdown");
	}
}

/// Makes sure an initialized messenger gets its `shutdown`.
pub(crate) struct MessengerGuard {
	messenger: Box<dyn Messenger>,
	active: bool,
}

impl MessengerGuard {
	pub(crate) fn new(messenger: Box<dyn Messenger>) -> Self {
		MessengerGuard {
			messenger,
			active: false,
		}
	}

	pub(crate) fn init(&mut self, context: &MessageContext) {
		if !self.active {
			self.messenger.init(context);
			self.active = true;
		}
	}

	pub(crate) fn is_active(&self) -> bool {
		self.active
	}

	pub(crate) fn shutdown(&mut self) {
		if self.active {
			self.active = false;
			self.messenger.shutdown();
		}
	}
}

impl Drop for MessengerGuard {
	fn drop(&mut self) {
		self.shutdown();
	}
}
