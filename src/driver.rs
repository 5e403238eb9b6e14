use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{
	DEVICE_ID,
	VENDOR_ID,
};
use crate::messaging::{
	LogMessenger,
	Messenger,
};
use crate::pci::{
	PciDeviceId,
	PciEndpoint,
	match_id_table,
};
use crate::platform::{
	InterruptHandler,
	Platform,
};
use crate::session::{
	Config,
	DeviceSession,
};
use crate::vectors::AckHandler;

/// Devices handled by this driver: NetTLP adapters with any subsystem ids.
pub const ID_TABLE: &[PciDeviceId] = &[
	PciDeviceId::new(VENDOR_ID, DEVICE_ID),
];

type MessengerFactory<P> = Box<dyn FnMut(&P) -> Box<dyn Messenger> + Send>;

/// Attached devices, keyed by endpoint.
///
/// A device only shows up in the table once its session is `Ready`, and it
/// is taken out of the table before being detached.
pub struct NettlpDriver<P: Platform + ?Sized + 'static> {
	config: Config,
	messengers: MessengerFactory<P>,
	handler: Arc<dyn InterruptHandler>,
	devices: BTreeMap<PciEndpoint, DeviceSession<P>>,
}

impl<P: Platform + ?Sized + 'static> NettlpDriver<P> {
	pub fn new(config: Config) -> Self {
		NettlpDriver {
			config,
			messengers: Box::new(|_: &P| Box::new(LogMessenger) as Box<dyn Messenger>),
			handler: Arc::new(AckHandler::default()),
			devices: BTreeMap::new(),
		}
	}

	/// Hand attached devices to messengers built by `factory`.
	pub fn with_messenger<F>(mut self, factory: F) -> Self
	where
		F: FnMut(&P) -> Box<dyn Messenger> + Send + 'static,
	{
		self.messengers = Box::new(factory);
		self
	}

	pub fn with_handler(mut self, handler: Arc<dyn InterruptHandler>) -> Self {
		self.handler = handler;
		self
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// Attach the device behind `platform` if it is one of ours.
	///
	/// Returns `false` for devices not in [`ID_TABLE`].
	pub fn probe(&mut self, platform: Arc<P>) -> crate::AResult<bool> {
		let ep = platform.endpoint();
		let ids = platform.ids()?;
		match match_id_table(ID_TABLE, &ids) {
			None => {
				debug!("PCI {}: {}:{} not handled", ep, ids.vendor, ids.device);
				return Ok(false);
			},
			Some(id) => debug!("PCI {}: matches {}", ep, id),
		}
		ensure!(!self.devices.contains_key(&ep), "PCI {}: already attached", ep);

		let messenger = (self.messengers)(&*platform);
		let session = DeviceSession::attach(platform, ids, &self.config, messenger, self.handler.clone())
			.map_err(|e| format_err!("PCI {}: {}", ep, e))?;
		self.devices.insert(ep, session);
		Ok(true)
	}

	/// Detach a device; `false` if it wasn't attached.
	pub fn remove(&mut self, ep: PciEndpoint) -> bool {
		match self.devices.remove(&ep) {
			None => false,
			Some(session) => {
				session.detach();
				true
			},
		}
	}

	/// Detach all devices.
	pub fn unload(&mut self) {
		for ep in self.endpoints() {
			self.remove(ep);
		}
	}

	pub fn endpoints(&self) -> Vec<PciEndpoint> {
		self.devices.keys().cloned().collect()
	}

	pub fn session(&self, ep: PciEndpoint) -> Option<&DeviceSession<P>> {
		self.devices.get(&ep)
	}

	pub fn session_mut(&mut self, ep: PciEndpoint) -> Option<&mut DeviceSession<P>> {
		self.devices.get_mut(&ep)
	}
}

impl<P: Platform + ?Sized + 'static> Drop for NettlpDriver<P> {
	fn drop(&mut self) {
		self.unload();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::pci::{
		DeviceID,
		VendorId,
	};
	use crate::platform::DeviceIds;
	use crate::session::AttachState;
	use crate::testing::{
		Call,
		FakePlatform,
		Faults,
		nettlp_ids,
	};

	fn driver() -> NettlpDriver<FakePlatform> {
		NettlpDriver::new(Config::default()).with_messenger(|p: &FakePlatform| p.messenger())
	}

	fn fake(ep: &str) -> Arc<FakePlatform> {
		FakePlatform::device(ep.parse().unwrap(), nettlp_ids(), Faults::default())
	}

	#[test]
	fn probe_and_remove() {
		let platform = fake("0000:03:00.0");
		let ep = platform.endpoint();
		let mut driver = driver();

		assert!(driver.probe(platform.clone()).unwrap());
		assert_eq!(driver.endpoints(), vec![ep]);
		assert_eq!(driver.session(ep).unwrap().state(), AttachState::Ready);
		assert!(platform.calls().contains(&Call::MsgInit(0xe000_0000, 0x0300, 4)));

		assert!(driver.remove(ep));
		assert!(driver.session(ep).is_none());
		assert_eq!(platform.outstanding(), 0);
		assert!(!driver.remove(ep));
	}

	#[test]
	fn foreign_device_ignored() {
		let ids = DeviceIds { vendor: VendorId(0x8086), device: DeviceID(0x10d3), ..nettlp_ids() };
		let platform = FakePlatform::device("0000:04:00.0".parse().unwrap(), ids, Faults::default());
		let mut driver = driver();
		assert!(!driver.probe(platform.clone()).unwrap());
		assert!(driver.endpoints().is_empty());
		assert_eq!(platform.calls(), vec![]);
	}

	#[test]
	fn any_subsystem_matches() {
		let ids = DeviceIds { subsystem_vendor: VendorId(0x1234), subsystem_device: DeviceID(0x5678), ..nettlp_ids() };
		let platform = FakePlatform::device("0000:05:00.0".parse().unwrap(), ids, Faults::default());
		assert!(driver().probe(platform).unwrap());
	}

	#[test]
	fn failed_probe_installs_nothing() {
		let platform = FakePlatform::with_faults(Faults { map_bar: Some(2), ..Faults::default() });
		let mut driver = driver();
		assert!(driver.probe(platform.clone()).is_err());
		assert!(driver.endpoints().is_empty());
		assert_eq!(platform.outstanding(), 0);
	}

	#[test]
	fn double_probe_refused() {
		let platform = fake("0000:03:00.0");
		let mut driver = driver();
		assert!(driver.probe(platform.clone()).unwrap());
		let calls = platform.calls().len();
		assert!(driver.probe(platform.clone()).is_err());
		assert_eq!(platform.calls().len(), calls);
		assert_eq!(driver.endpoints().len(), 1);
	}

	#[test]
	fn several_devices() {
		let first = fake("0000:03:00.0");
		let second = fake("0000:81:00.0");
		let mut driver = driver();
		assert!(driver.probe(first.clone()).unwrap());
		assert!(driver.probe(second.clone()).unwrap());
		assert!(second.calls().contains(&Call::MsgInit(0xe000_0000, 0x8100, 4)));

		assert!(driver.remove(first.endpoint()));
		assert_eq!(first.outstanding(), 0);
		assert_ne!(second.outstanding(), 0);
		assert_eq!(driver.endpoints(), vec![second.endpoint()]);

		driver.unload();
		assert_eq!(second.outstanding(), 0);
		assert!(driver.endpoints().is_empty());
	}

	#[test]
	fn drop_unloads() {
		let platform = fake("0000:03:00.0");
		{
			let mut driver = driver();
			driver.probe(platform.clone()).unwrap();
		}
		assert_eq!(platform.outstanding(), 0);
		assert_eq!(platform.calls().last(), Some(&Call::Disable));
	}

	#[test]
	fn shutdown_precedes_interrupt_release() {
		let platform = fake("0000:03:00.0");
		let mut driver = driver();
		driver.probe(platform.clone()).unwrap();
		let attached = platform.calls().len();
		driver.remove(platform.endpoint());
		let detach = platform.calls()[attached..].to_vec();
		assert_eq!(detach[0], Call::MsgShutdown);
		assert_eq!(detach[1], Call::FreeIrq(0));
	}
}
