use std::fmt;

/// Failures of the individual lifecycle components.
#[derive(Clone, PartialEq, Eq, Debug, Fail)]
pub enum Error {
	#[fail(display = "BAR{} is not backed by hardware", bar)]
	NoSuchBar { bar: usize },
	#[fail(display = "failed to enable device: {}", reason)]
	EnableFailure { reason: String },
	#[fail(display = "device regions busy: {}", reason)]
	RegionBusy { reason: String },
	#[fail(display = "failed to map BAR{}: {}", bar, reason)]
	MapFailure { bar: usize, reason: String },
	#[fail(display = "failed to allocate interrupt vectors: {}", reason)]
	AllocFailure { reason: String },
	#[fail(display = "failed to publish p2p memory: {}", reason)]
	PublishFailure { reason: String },
	#[fail(display = "failed to read MSI-X table: {}", reason)]
	ReadFailure { reason: String },
}

impl Error {
	pub(crate) fn enable(e: failure::Error) -> Self {
		Error::EnableFailure { reason: e.to_string() }
	}

	pub(crate) fn busy(e: failure::Error) -> Self {
		Error::RegionBusy { reason: e.to_string() }
	}

	pub(crate) fn alloc<R: fmt::Display>(reason: R) -> Self {
		Error::AllocFailure { reason: reason.to_string() }
	}

	pub(crate) fn publish<R: fmt::Display>(reason: R) -> Self {
		Error::PublishFailure { reason: reason.to_string() }
	}

	pub(crate) fn read<R: fmt::Display>(reason: R) -> Self {
		Error::ReadFailure { reason: reason.to_string() }
	}
}

/// Attach stage, named in attach failures.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Stage {
	ClaimResources,
	MapRegions,
	BindInterrupts,
	PublishP2p,
	SnapshotMsix,
}

impl fmt::Display for Stage {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let name = match self {
			Stage::ClaimResources => "claim resources",
			Stage::MapRegions => "map regions",
			Stage::BindInterrupts => "bind interrupts",
			Stage::PublishP2p => "publish p2p memory",
			Stage::SnapshotMsix => "snapshot MSI-X table",
		};
		f.write_str(name)
	}
}

#[derive(Clone, PartialEq, Eq, Debug, Fail)]
#[fail(display = "attach failed at stage '{}': {}", stage, error)]
pub struct AttachError {
	pub stage: Stage,
	#[fail(cause)]
	pub error: Error,
}

impl AttachError {
	pub(crate) fn at(stage: Stage) -> impl FnOnce(Error) -> AttachError {
		move |error| AttachError { stage, error }
	}
}
