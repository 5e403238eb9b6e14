use std::sync::Arc;

use crate::error::Error;
use crate::platform::Platform;

/// Enabled device, reserved regions and bus mastering.
///
/// Released on drop; a failed [`Claim::claim`] leaves nothing behind.
pub struct Claim<P: Platform + ?Sized> {
	platform: Arc<P>,
	enabled: bool,
	regions: bool,
	master: bool,
}

impl<P: Platform + ?Sized> Claim<P> {
	pub fn claim(platform: &Arc<P>) -> Result<Self, Error> {
		let ep = platform.endpoint();
		let mut claim = Claim {
			platform: platform.clone(),
			enabled: false,
			regions: false,
			master: false,
		};

		platform.enable_device().map_err(Error::enable)?;
		claim.enabled = true;

		// on error `claim` drops and undoes the previous steps
		platform.request_regions(crate::DRV_NAME).map_err(Error::busy)?;
		claim.regions = true;

		platform.set_master(true).map_err(|e| Error::EnableFailure {
			reason: format!("bus mastering: {}", e),
		})?;
		claim.master = true;

		debug!("PCI {}: resources claimed", ep);
		Ok(claim)
	}

	pub fn is_active(&self) -> bool {
		self.enabled || self.regions || self.master
	}

	pub fn release(&mut self) {
		let ep = self.platform.endpoint();
		if self.master {
			self.master = false;
			if let Err(e) = self.platform.set_master(false) {
				error!("PCI {}: failed to clear bus mastering: {}", ep, e);
			}
		}
		if self.regions {
			self.regions = false;
			if let Err(e) = self.platform.release_regions() {
				error!("PCI {}: failed to release regions: {}", ep, e);
			}
		}
		if self.enabled {
			self.enabled = false;
			if let Err(e) = self.platform.disable_device() {
				error!("PCI {}: failed to disable device: {}", ep, e);
			}
		}
	}
}

impl<P: Platform + ?Sized> Drop for Claim<P> {
	fn drop(&mut self) {
		self.release();
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::testing::{
		Call,
		FakePlatform,
		Faults,
	};

	#[test]
	fn claim_and_release() {
		let platform = FakePlatform::new();
		let mut claim = Claim::claim(&platform).unwrap();
		assert!(claim.is_active());
		assert_eq!(platform.outstanding(), 3);

		claim.release();
		assert!(!claim.is_active());
		assert_eq!(platform.outstanding(), 0);

		// second release (and the one in drop) must not touch hardware
		claim.release();
		drop(claim);
		assert_eq!(platform.calls(), vec![
			Call::Enable,
			Call::RequestRegions,
			Call::SetMaster(true),
			Call::SetMaster(false),
			Call::ReleaseRegions,
			Call::Disable,
		]);
	}

	#[test]
	fn enable_failure() {
		let platform = FakePlatform::with_faults(Faults { enable: true, ..Faults::default() });
		match Claim::claim(&platform) {
			Err(Error::EnableFailure { .. }) => (),
			other => panic!("unexpected claim result: {:?}", other.map(|_| ())),
		}
		assert_eq!(platform.outstanding(), 0);
		assert_eq!(platform.calls(), vec![Call::Enable]);
	}

	#[test]
	fn busy_regions_unwind_enable() {
		let platform = FakePlatform::with_faults(Faults { regions: true, ..Faults::default() });
		match Claim::claim(&platform) {
			Err(Error::RegionBusy { .. }) => (),
			other => panic!("unexpected claim result: {:?}", other.map(|_| ())),
		}
		assert_eq!(platform.outstanding(), 0);
		assert_eq!(platform.calls(), vec![Call::Enable, Call::RequestRegions, Call::Disable]);
	}

	#[test]
	fn bus_master_failure_unwinds() {
		let platform = FakePlatform::with_faults(Faults { master: true, ..Faults::default() });
		assert!(Claim::claim(&platform).is_err());
		assert_eq!(platform.outstanding(), 0);
		assert_eq!(platform.calls(), vec![
			Call::Enable,
			Call::RequestRegions,
			Call::SetMaster(true),
			Call::ReleaseRegions,
			Call::Disable,
		]);
	}
}
