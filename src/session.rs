use std::fmt;
use std::sync::Arc;

use crate::{
	BAR_MSIX,
	BAR_P2P,
	BAR_PIO,
	NUM_VECTORS,
};
use crate::bridge::RegisterBridge;
use crate::claim::Claim;
use crate::error::{
	AttachError,
	Stage,
};
use crate::messaging::{
	MessageContext,
	Messenger,
	MessengerGuard,
};
use crate::msix::{
	self,
	MsixEntry,
};
use crate::p2p::{
	self,
	Advertisement,
};
use crate::pci::PciEndpoint;
use crate::platform::{
	DeviceIds,
	InterruptHandler,
	Platform,
};
use crate::region::{
	self,
	Region,
	RegionDescriptor,
};
use crate::vectors::VectorTable;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Config {
	/// don't hand attached devices to the message socket
	pub disable_msg_socket: bool,
	/// MSI-X vectors to allocate and snapshot
	pub vectors: usize,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			disable_msg_socket: false,
			vectors: NUM_VECTORS,
		}
	}
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum AttachState {
	Unattached,
	ResourcesClaimed,
	RegionsMapped,
	InterruptsBound,
	P2pPublished,
	MsixSnapshotted,
	Ready,
}

impl fmt::Display for AttachState {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

/// Everything held for one attached device.
///
/// Built by [`DeviceSession::attach`] in `Ready` state; [`DeviceSession::detach`]
/// gives everything back in reverse order. Dropping a session without
/// detaching releases the same way, as the fields are declared in teardown
/// order.
pub struct DeviceSession<P: Platform + ?Sized> {
	messenger: MessengerGuard,
	vectors: VectorTable<P>,
	advertisement: Option<Advertisement<P>>,
	bar4: Region<P::Mapping>,
	bar2: Region<P::Mapping>,
	bar0: Region<P::Mapping>,
	claim: Claim<P>,
	msix: Vec<MsixEntry>,
	ids: DeviceIds,
	endpoint: PciEndpoint,
	state: AttachState,
}

fn enter(ep: PciEndpoint, state: &mut AttachState, next: AttachState) {
	debug!("PCI {}: {} -> {}", ep, *state, next);
	*state = next;
}

impl<P: Platform + ?Sized> DeviceSession<P> {
	/// Bring the device up to `Ready`.
	///
	/// On failure every completed stage is undone (in reverse) before the
	/// error naming the failed stage is returned.
	pub fn attach(
		platform: Arc<P>,
		ids: DeviceIds,
		config: &Config,
		messenger: Box<dyn Messenger>,
		handler: Arc<dyn InterruptHandler>,
	) -> Result<Self, AttachError> {
		let ep = platform.endpoint();
		let mut state = AttachState::Unattached;

		// locals are dropped in reverse order, which unwinds a partial attach
		let claim = Claim::claim(&platform).map_err(AttachError::at(Stage::ClaimResources))?;
		enter(ep, &mut state, AttachState::ResourcesClaimed);

		let (bar0, bar2, bar4) = {
			let describe = |bar| -> Result<RegionDescriptor, AttachError> {
				let descriptor = region::describe(&*platform, bar).map_err(AttachError::at(Stage::MapRegions))?;
				info!("PCI {}: {}", ep, descriptor);
				Ok(descriptor)
			};
			let bar0 = Region::unmapped(describe(BAR_PIO)?);
			let bar2 = Region::map(&*platform, describe(BAR_MSIX)?).map_err(AttachError::at(Stage::MapRegions))?;
			let bar4 = Region::unmapped(describe(BAR_P2P)?);
			(bar0, bar2, bar4)
		};
		enter(ep, &mut state, AttachState::RegionsMapped);

		let mut vectors = VectorTable::allocate(platform.clone(), config.vectors)
			.map_err(AttachError::at(Stage::BindInterrupts))?;
		vectors.bind_handler(handler).map_err(AttachError::at(Stage::BindInterrupts))?;
		enter(ep, &mut state, AttachState::InterruptsBound);

		let advertisement = match p2p::publish(&platform, &bar4, 0, bar4.len()) {
			Ok(advertisement) => {
				enter(ep, &mut state, AttachState::P2pPublished);
				Some(advertisement)
			},
			Err(e) => {
				warn!("PCI {}: continuing without p2p memory: {}", ep, AttachError::at(Stage::PublishP2p)(e));
				None
			},
		};

		let msix = msix::read_table(&bar2, config.vectors).map_err(AttachError::at(Stage::SnapshotMsix))?;
		for (n, entry) in msix.iter().enumerate() {
			info!("PCI {}: MSI-X entry {}: {}", ep, n, entry);
		}
		enter(ep, &mut state, AttachState::MsixSnapshotted);

		enter(ep, &mut state, AttachState::Ready);
		let mut session = DeviceSession {
			messenger: MessengerGuard::new(messenger),
			vectors,
			advertisement,
			bar4,
			bar2,
			bar0,
			claim,
			msix,
			ids,
			endpoint: ep,
			state,
		};

		if config.disable_msg_socket {
			warn!("PCI {}: message socket disabled", ep);
		} else if let Some(view) = session.bar2.mapping() {
			let context = MessageContext {
				endpoint: ep,
				bar4_start: session.bar4.start(),
				devid: ep.devid(),
				bar2: view,
				msix: &session.msix,
			};
			session.messenger.init(&context);
		}

		info!("PCI {}: attached ({} vectors)", ep, session.vectors.len());
		Ok(session)
	}

	/// Tear down in reverse attach order.
	pub fn detach(self) {
		let DeviceSession {
			mut messenger,
			mut vectors,
			advertisement,
			bar4,
			bar2,
			bar0,
			mut claim,
			endpoint,
			..
		} = self;

		messenger.shutdown();
		vectors.teardown();
		if let Some(mut advertisement) = advertisement {
			advertisement.revoke();
		}
		drop(bar4);
		drop(bar2);
		drop(bar0);
		claim.release();
		info!("PCI {}: detached", endpoint);
	}

	pub fn endpoint(&self) -> PciEndpoint {
		self.endpoint
	}

	pub fn ids(&self) -> DeviceIds {
		self.ids
	}

	pub fn state(&self) -> AttachState {
		self.state
	}

	pub fn bar0(&self) -> &Region<P::Mapping> {
		&self.bar0
	}

	pub fn bar2(&self) -> &Region<P::Mapping> {
		&self.bar2
	}

	pub fn bar4(&self) -> &Region<P::Mapping> {
		&self.bar4
	}

	pub fn vectors(&self) -> &VectorTable<P> {
		&self.vectors
	}

	pub fn advertisement(&self) -> Option<&Advertisement<P>> {
		self.advertisement.as_ref()
	}

	pub fn msix(&self) -> &[MsixEntry] {
		&self.msix
	}

	pub fn messaging_active(&self) -> bool {
		self.messenger.is_active()
	}

	pub fn register_bridge(&mut self) -> crate::AResult<RegisterBridge<P::Mapping>> {
		RegisterBridge::open(&mut self.bar2)
	}
}
