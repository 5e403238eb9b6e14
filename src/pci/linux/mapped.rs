use std::fs;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::ptr;

use libc::{
	MAP_FAILED,
	MAP_SHARED,
	O_SYNC,
	PROT_READ,
	PROT_WRITE,
	c_void,
	mmap,
	munmap,
};

use crate::pci::{
	PciEndpoint,
	PciResource,
	PciResourceReadOnly,
};

/// A BAR mapped through its sysfs `resourceN` file.
#[derive(Debug)]
pub struct Mapped {
	ptr: ptr::NonNull<u8>, // u8 instead of void for easier offset operations
	len: usize,
	bar: usize,
	endpoint: PciEndpoint,
}

// plain MMIO; nothing thread-local about the mapping
unsafe impl Send for Mapped {}

impl Drop for Mapped {
	fn drop(&mut self) {
		let res = unsafe { munmap(self.ptr.as_ptr() as *mut c_void, self.len) };
		if 0 != res {
			error!("PCI {}: munmap of BAR{} failed: {}", self.endpoint, self.bar, io::Error::last_os_error());
		}
	}
}

impl PciResourceReadOnly for Mapped {
	fn endpoint(&self) -> PciEndpoint {
		self.endpoint
	}

	fn len(&self) -> usize {
		self.len
	}

	fn read_byte(&self, offset: usize) -> u8 {
		assert!(offset < self.len);
		unsafe { ptr::read_volatile(self.ptr.as_ptr().add(offset)) }
	}

	fn read_dword(&self, offset: usize) -> u32 {
		assert!(offset & 3 == 0);
		assert!(offset + 3 < self.len);
		u32::from_le(unsafe { ptr::read_volatile(self.ptr.as_ptr().add(offset) as *const u32) })
	}

	fn read_slice(&self, offset: usize, target: &mut [u8]) {
		assert!(offset + target.len() <= self.len);
		for (n, b) in target.iter_mut().enumerate() {
			*b = self.read_byte(offset + n);
		}
	}
}

impl PciResource for Mapped {
	fn write_byte(&mut self, offset: usize, data: u8) {
		assert!(offset < self.len);
		unsafe { ptr::write_volatile(self.ptr.as_ptr().add(offset), data) }
	}

	fn write_dword(&mut self, offset: usize, data: u32) {
		assert!(offset & 3 == 0);
		assert!(offset + 3 < self.len);
		unsafe { ptr::write_volatile(self.ptr.as_ptr().add(offset) as *mut u32, data.to_le()) }
	}
}

/// Map the first `len` bytes of BAR `bar` read/write.
pub fn open(endpoint: PciEndpoint, bar: usize, len: usize) -> crate::AResult<Mapped> {
	let path = endpoint.resource_file(bar);
	with_context!(("PCI {}: map BAR{} from {:?}", endpoint, bar, path), {
		let file = fs::OpenOptions::new()
			.read(true)
			.write(true)
			.custom_flags(O_SYNC)
			.open(&path)?;

		let size = file.metadata()?.len();
		ensure!(size >= len as u64, "resource file has {} bytes, need {}", size, len);

		// the mapping stays valid after the file is closed
		let area = unsafe {
			mmap(
				ptr::null_mut(),
				len,
				PROT_READ | PROT_WRITE,
				MAP_SHARED,
				file.as_raw_fd(),
				0,
			)
		};
		if area == MAP_FAILED {
			return Err(io::Error::last_os_error().into());
		}
		let ptr = ptr::NonNull::new(area as *mut u8).ok_or_else(|| format_err!("mmap returned NULL"))?;

		Ok(Mapped {
			ptr,
			len,
			bar,
			endpoint,
		})
	})
}
