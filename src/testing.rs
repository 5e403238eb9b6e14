//! Recording fake of the host platform for unit tests.

use std::collections::BTreeMap;
use std::sync::{
	Arc,
	Mutex,
	MutexGuard,
};

use crate::messaging::{
	MessageContext,
	Messenger,
};
use crate::msix;
use crate::pci::{
	DeviceID,
	PciConfigSpace,
	PciConfigSpaceReadOnly,
	PciEndpoint,
	PciResource,
	PciResourceReadOnly,
	VendorId,
};
use crate::platform::{
	DeviceIds,
	InterruptHandler,
	IrqReturn,
	Platform,
};
use crate::region::RegionDescriptor;

fn default_endpoint() -> PciEndpoint {
	"0000:01:00.0".parse().unwrap()
}

/// Config space held in memory.
pub struct ConfigSnapshot(pub Vec<u8>);

impl PciConfigSpaceReadOnly for ConfigSnapshot {
	fn endpoint(&self) -> PciEndpoint {
		default_endpoint()
	}

	fn len(&self) -> usize {
		self.0.len()
	}

	fn read_byte(&self, offset: usize) -> u8 {
		self.0[offset]
	}

	fn read_word(&self, offset: usize) -> u16 {
		u16::from_le_bytes([self.0[offset], self.0[offset + 1]])
	}

	fn read_dword(&self, offset: usize) -> u32 {
		let mut b = [0u8; 4];
		b.copy_from_slice(&self.0[offset..offset + 4]);
		u32::from_le_bytes(b)
	}
}

impl PciConfigSpace for ConfigSnapshot {
	fn write_word(&mut self, offset: usize, data: u16) {
		self.0[offset..offset + 2].copy_from_slice(&data.to_le_bytes());
	}
}

/// Platform operations in the order they were issued.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Call {
	Enable,
	Disable,
	RequestRegions,
	ReleaseRegions,
	SetMaster(bool),
	Map(usize),
	Unmap(usize),
	AllocVectors(usize),
	FreeVectors,
	RequestIrq(usize),
	FreeIrq(usize),
	/// bar, size, offset
	P2pAdd(usize, u64, u64),
	P2pRemove(usize),
	P2pPublish(bool),
	/// bar4 start, devid, number of MSI-X entries
	MsgInit(u64, u16, usize),
	MsgShutdown,
}

/// Operations that fail; the failing call is still recorded.
#[derive(Clone, Default, Debug)]
pub struct Faults {
	pub enable: bool,
	pub regions: bool,
	pub master: bool,
	pub map_bar: Option<usize>,
	pub alloc: bool,
	pub request_irq_at: Option<usize>,
	pub no_p2p: bool,
	pub publish: bool,
	/// BAR2 size instead of 4 KiB
	pub bar2_len: Option<u64>,
	/// BAR the device doesn't implement
	pub missing_bar: Option<usize>,
	/// BAR whose resource can't be queried
	pub query_bar: Option<usize>,
}

#[derive(Default)]
struct State {
	calls: Vec<Call>,
	enabled: bool,
	regions: bool,
	master: bool,
	mappings: usize,
	vectors: bool,
	irqs: BTreeMap<usize, Arc<dyn InterruptHandler>>,
	p2p_added: bool,
	published: bool,
	messenger: bool,
}

struct Bar {
	descriptor: RegionDescriptor,
	memory: Arc<Mutex<Vec<u8>>>,
}

pub struct FakePlatform {
	endpoint: PciEndpoint,
	ids: DeviceIds,
	faults: Faults,
	bars: Vec<Option<Bar>>,
	state: Arc<Mutex<State>>,
}

fn bar(bar: usize, start: u64, len: u64, flags: u64) -> Option<Bar> {
	Some(Bar {
		descriptor: RegionDescriptor { bar, start, end: start + len - 1, flags, len },
		memory: Arc::new(Mutex::new(vec![0u8; len as usize])),
	})
}

impl FakePlatform {
	pub fn new() -> Arc<Self> {
		Self::with_faults(Faults::default())
	}

	pub fn with_faults(faults: Faults) -> Arc<Self> {
		Self::device(default_endpoint(), nettlp_ids(), faults)
	}

	pub fn device(endpoint: PciEndpoint, ids: DeviceIds, faults: Faults) -> Arc<Self> {
		let mut bars = vec![
			bar(0, 0xfb00_0000, 0x1000, 0x4_0200),
			None,
			bar(2, 0xfb10_0000, faults.bar2_len.unwrap_or(0x1000), 0x4_0200),
			None,
			bar(4, 0xe000_0000, 0x10_0000, 0x14_220c),
			None,
		];
		if let Some(missing) = faults.missing_bar {
			bars[missing] = None;
		}
		let platform = FakePlatform {
			endpoint,
			ids,
			faults,
			bars,
			state: Arc::new(Mutex::new(State::default())),
		};
		let bar2_len = platform.bars[2].as_ref().map_or(0, |b| b.descriptor.len as usize);
		for n in 0..(bar2_len / msix::ENTRY_SIZE).min(16) as u32 {
			let base = n as usize * msix::ENTRY_SIZE;
			platform.write_bar(2, base, &(0xfee0_0000u32 + (n << 12)).to_le_bytes());
			platform.write_bar(2, base + 8, &(0x4020u32 + n).to_le_bytes());
		}
		Arc::new(platform)
	}

	fn state(&self) -> MutexGuard<State> {
		self.state.lock().unwrap()
	}

	fn record(&self, call: Call) -> MutexGuard<State> {
		let mut state = self.state();
		state.calls.push(call);
		state
	}

	pub fn calls(&self) -> Vec<Call> {
		self.state().calls.clone()
	}

	/// Number of acquired resources not yet given back.
	pub fn outstanding(&self) -> usize {
		let s = self.state();
		s.enabled as usize
			+ s.regions as usize
			+ s.master as usize
			+ s.mappings
			+ s.vectors as usize
			+ s.irqs.len()
			+ s.p2p_added as usize
			+ s.published as usize
			+ s.messenger as usize
	}

	pub fn bound_irqs(&self) -> usize {
		self.state().irqs.len()
	}

	/// Raise `vector`; `None` if no handler is bound.
	pub fn fire(&self, vector: usize) -> Option<IrqReturn> {
		let handler = self.state().irqs.get(&vector).cloned();
		handler.map(|h| h.handle(vector))
	}

	fn memory(&self, bar: usize) -> &Arc<Mutex<Vec<u8>>> {
		&self.bars[bar].as_ref().unwrap().memory
	}

	pub fn write_bar(&self, bar: usize, offset: usize, data: &[u8]) {
		self.memory(bar).lock().unwrap()[offset..offset + data.len()].copy_from_slice(data);
	}

	pub fn read_bar(&self, bar: usize, offset: usize, len: usize) -> Vec<u8> {
		self.memory(bar).lock().unwrap()[offset..offset + len].to_vec()
	}

	pub fn messenger(&self) -> Box<dyn Messenger> {
		Box::new(FakeMessenger { state: self.state.clone() })
	}
}

pub fn nettlp_ids() -> DeviceIds {
	DeviceIds {
		vendor: VendorId(crate::VENDOR_ID),
		device: DeviceID(crate::DEVICE_ID),
		subsystem_vendor: VendorId(0),
		subsystem_device: DeviceID(0),
	}
}

impl Platform for FakePlatform {
	type Mapping = FakeMapping;

	fn endpoint(&self) -> PciEndpoint {
		self.endpoint
	}

	fn ids(&self) -> crate::AResult<DeviceIds> {
		Ok(self.ids)
	}

	fn enable_device(&self) -> crate::AResult<()> {
		let mut state = self.record(Call::Enable);
		ensure!(!self.faults.enable, "enable refused");
		state.enabled = true;
		Ok(())
	}

	fn disable_device(&self) -> crate::AResult<()> {
		self.record(Call::Disable).enabled = false;
		Ok(())
	}

	fn request_regions(&self, owner: &str) -> crate::AResult<()> {
		assert_eq!(owner, crate::DRV_NAME);
		let mut state = self.record(Call::RequestRegions);
		ensure!(!self.faults.regions, "regions owned by someone else");
		state.regions = true;
		Ok(())
	}

	fn release_regions(&self) -> crate::AResult<()> {
		self.record(Call::ReleaseRegions).regions = false;
		Ok(())
	}

	fn set_master(&self, enable: bool) -> crate::AResult<()> {
		let mut state = self.record(Call::SetMaster(enable));
		ensure!(!(enable && self.faults.master), "bus master bit stuck");
		state.master = enable;
		Ok(())
	}

	fn bar(&self, index: usize) -> crate::AResult<Option<RegionDescriptor>> {
		ensure!(self.faults.query_bar != Some(index), "resource file unreadable");
		Ok(self.bars.get(index).and_then(|b| b.as_ref()).map(|b| b.descriptor))
	}

	fn map_bar(&self, descriptor: &RegionDescriptor) -> crate::AResult<FakeMapping> {
		let mut state = self.record(Call::Map(descriptor.bar));
		ensure!(self.faults.map_bar != Some(descriptor.bar), "mmap refused");
		let memory = match self.bars.get(descriptor.bar).and_then(|b| b.as_ref()) {
			Some(bar) => bar.memory.clone(),
			None => bail!("no BAR{}", descriptor.bar),
		};
		let len = memory.lock().unwrap().len().min(descriptor.len as usize);
		state.mappings += 1;
		Ok(FakeMapping {
			endpoint: self.endpoint,
			bar: descriptor.bar,
			len,
			memory,
			state: self.state.clone(),
		})
	}

	fn alloc_irq_vectors(&self, count: usize) -> crate::AResult<()> {
		let mut state = self.record(Call::AllocVectors(count));
		ensure!(!self.faults.alloc, "no MSI-X vectors left");
		state.vectors = true;
		Ok(())
	}

	fn free_irq_vectors(&self) -> crate::AResult<()> {
		let mut state = self.record(Call::FreeVectors);
		assert!(state.irqs.is_empty(), "vectors freed while handlers bound");
		state.vectors = false;
		Ok(())
	}

	fn request_irq(&self, vector: usize, handler: Arc<dyn InterruptHandler>) -> crate::AResult<()> {
		let mut state = self.record(Call::RequestIrq(vector));
		ensure!(self.faults.request_irq_at != Some(vector), "request_irq refused");
		ensure!(state.vectors, "no vectors allocated");
		state.irqs.insert(vector, handler);
		Ok(())
	}

	fn free_irq(&self, vector: usize) -> crate::AResult<()> {
		self.record(Call::FreeIrq(vector)).irqs.remove(&vector);
		Ok(())
	}

	fn p2pdma_supported(&self) -> bool {
		!self.faults.no_p2p
	}

	fn p2pdma_add_resource(&self, bar: usize, size: u64, offset: u64) -> crate::AResult<()> {
		self.record(Call::P2pAdd(bar, size, offset)).p2p_added = true;
		Ok(())
	}

	fn p2pdma_remove_resource(&self, bar: usize) -> crate::AResult<()> {
		self.record(Call::P2pRemove(bar)).p2p_added = false;
		Ok(())
	}

	fn p2pmem_publish(&self, publish: bool) -> crate::AResult<()> {
		let mut state = self.record(Call::P2pPublish(publish));
		ensure!(!(publish && self.faults.publish), "publish refused");
		state.published = publish;
		Ok(())
	}
}

/// A view on the fake BAR memory; unmaps on drop.
pub struct FakeMapping {
	endpoint: PciEndpoint,
	bar: usize,
	len: usize,
	memory: Arc<Mutex<Vec<u8>>>,
	state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for FakeMapping {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "FakeMapping(BAR{}, {} bytes)", self.bar, self.len)
	}
}

impl Drop for FakeMapping {
	fn drop(&mut self) {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::Unmap(self.bar));
		state.mappings -= 1;
	}
}

impl PciResourceReadOnly for FakeMapping {
	fn endpoint(&self) -> PciEndpoint {
		self.endpoint
	}

	fn len(&self) -> usize {
		self.len
	}

	fn read_byte(&self, offset: usize) -> u8 {
		assert!(offset < self.len);
		self.memory.lock().unwrap()[offset]
	}

	fn read_dword(&self, offset: usize) -> u32 {
		let mut b = [0u8; 4];
		self.read_slice(offset, &mut b);
		u32::from_le_bytes(b)
	}

	fn read_slice(&self, offset: usize, target: &mut [u8]) {
		assert!(offset + target.len() <= self.len);
		target.copy_from_slice(&self.memory.lock().unwrap()[offset..offset + target.len()]);
	}
}

impl PciResource for FakeMapping {
	fn write_byte(&mut self, offset: usize, data: u8) {
		assert!(offset < self.len);
		self.memory.lock().unwrap()[offset] = data;
	}

	fn write_dword(&mut self, offset: usize, data: u32) {
		assert!(offset + 4 <= self.len);
		self.memory.lock().unwrap()[offset..offset + 4].copy_from_slice(&data.to_le_bytes());
	}
}

struct FakeMessenger {
	state: Arc<Mutex<State>>,
}

impl Messenger for FakeMessenger {
	fn init(&mut self, context: &MessageContext) {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::MsgInit(context.bar4_start, context.devid, context.msix.len()));
		state.messenger = true;
	}

	fn shutdown(&mut self) {
		let mut state = self.state.lock().unwrap();
		state.calls.push(Call::MsgShutdown);
		state.messenger = false;
	}
}
