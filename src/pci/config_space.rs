use super::PciEndpoint;

pub const COMMAND: usize = 0x04;
pub const STATUS: usize = 0x06;
pub const CAPABILITIES_POINTER: usize = 0x34;

pub const COMMAND_MEMORY_SPACE: u16 = 1 << 1;
pub const COMMAND_BUS_MASTER: u16 = 1 << 2;
pub const STATUS_CAPABILITIES_LIST: u16 = 1 << 4;

pub trait PciConfigSpaceReadOnly {
	fn endpoint(&self) -> PciEndpoint;
	fn len(&self) -> usize;

	fn read_byte(&self, offset: usize) -> u8;
	fn read_word(&self, offset: usize) -> u16; // handle PCI little-endian conversion
	fn read_dword(&self, offset: usize) -> u32; // handle PCI little-endian conversion

	/// Offsets of capabilities in the standard capability list, in list order.
	fn capabilities(&self) -> Vec<(u8, usize)> {
		let mut caps = Vec::new();
		if self.len() <= CAPABILITIES_POINTER || self.read_word(STATUS) & STATUS_CAPABILITIES_LIST == 0 {
			return caps;
		}
		let mut next = (self.read_byte(CAPABILITIES_POINTER) & !0x3) as usize;
		// the list lives in the first 256 bytes; 48 entries max, guards against loops
		while next >= 0x40 && next + 1 < self.len().min(0x100) && caps.len() < 48 {
			caps.push((self.read_byte(next), next));
			next = (self.read_byte(next + 1) & !0x3) as usize;
		}
		caps
	}

	fn find_capability(&self, id: u8) -> Option<usize> {
		self.capabilities().into_iter().find(|&(cap_id, _)| cap_id == id).map(|(_, offset)| offset)
	}
}

pub trait PciConfigSpace: PciConfigSpaceReadOnly {
	fn write_word(&mut self, offset: usize, data: u16); // handle PCI little-endian conversion

	fn update_command(&mut self, set: u16, clear: u16) {
		let command = self.read_word(COMMAND);
		self.write_word(COMMAND, (command | set) & !clear);
	}
}

impl<'a, S: ?Sized + PciConfigSpaceReadOnly> PciConfigSpaceReadOnly for &'a mut S {
	fn endpoint(&self) -> PciEndpoint {
		S::endpoint(*self)
	}
	fn len(&self) -> usize {
		S::len(*self)
	}

	fn read_byte(&self, offset: usize) -> u8 {
		S::read_byte(*self, offset)
	}
	fn read_word(&self, offset: usize) -> u16 {
		S::read_word(*self, offset)
	}
	fn read_dword(&self, offset: usize) -> u32 {
		S::read_dword(*self, offset)
	}
}

impl<'a, S: ?Sized + PciConfigSpace> PciConfigSpace for &'a mut S {
	fn write_word(&mut self, offset: usize, data: u16) {
		S::write_word(*self, offset, data);
	}
}
