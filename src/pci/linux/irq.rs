use std::io;
use std::os::unix::io::{
	AsRawFd,
	RawFd,
};
use std::sync::Arc;
use std::thread;

use libc::{
	EFD_CLOEXEC,
	POLLIN,
	poll,
	pollfd,
};
use vmm_sys_util::eventfd::EventFd;

use crate::pci::PciEndpoint;
use crate::platform::{
	InterruptHandler,
	IrqReturn,
};

/// Blocking eventfd, not inherited by child processes.
pub fn eventfd() -> io::Result<EventFd> {
	EventFd::new(EFD_CLOEXEC)
}

/// Wait until one of `fds` is readable; returns their readiness.
fn wait_readable(fds: &[RawFd; 2]) -> io::Result<[bool; 2]> {
	let mut pfds = [
		pollfd { fd: fds[0], events: POLLIN, revents: 0 },
		pollfd { fd: fds[1], events: POLLIN, revents: 0 },
	];
	loop {
		let res = unsafe { poll(pfds.as_mut_ptr(), pfds.len() as _, -1) };
		if res >= 0 {
			return Ok([pfds[0].revents & POLLIN != 0, pfds[1].revents & POLLIN != 0]);
		}
		let e = io::Error::last_os_error();
		if e.kind() != io::ErrorKind::Interrupted {
			return Err(e);
		}
	}
}

/// Thread calling a handler whenever the vector's eventfd fires.
pub struct Dispatcher {
	vector: usize,
	stop: Arc<EventFd>,
	thread: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
	/// `trigger` must already be routed to `vector` (or be so right after).
	pub fn spawn(
		endpoint: PciEndpoint,
		vector: usize,
		trigger: Arc<EventFd>,
		handler: Arc<dyn InterruptHandler>,
	) -> crate::AResult<Self> {
		let stop = Arc::new(eventfd()?);
		let thread_stop = stop.clone();
		let thread = thread::Builder::new()
			.name(format!("nettlp-irq{}", vector))
			.spawn(move || dispatch(endpoint, vector, &trigger, &thread_stop, &*handler))?;
		Ok(Dispatcher {
			vector,
			stop,
			thread: Some(thread),
		})
	}

	/// Stop the thread; when this returns the handler isn't running anymore.
	pub fn stop(mut self) {
		self.shutdown();
	}

	fn shutdown(&mut self) {
		if let Some(thread) = self.thread.take() {
			if let Err(e) = self.stop.write(1) {
				error!("couldn't stop dispatcher for vector {}: {}", self.vector, e);
				return;
			}
			if thread.join().is_err() {
				error!("interrupt handler for vector {} panicked", self.vector);
			}
		}
	}
}

impl Drop for Dispatcher {
	fn drop(&mut self) {
		self.shutdown();
	}
}

fn dispatch(ep: PciEndpoint, vector: usize, trigger: &EventFd, stop: &EventFd, handler: &dyn InterruptHandler) {
	let fds = [trigger.as_raw_fd(), stop.as_raw_fd()];
	loop {
		let ready = match wait_readable(&fds) {
			Ok(ready) => ready,
			Err(e) => {
				error!("PCI {}: waiting for vector {} failed: {}", ep, vector, e);
				return;
			},
		};
		if ready[1] {
			trace!("PCI {}: dispatcher for vector {} stopped", ep, vector);
			return;
		}
		if ready[0] {
			match trigger.read() {
				Ok(_) => if handler.handle(vector) == IrqReturn::None {
					trace!("PCI {}: spurious interrupt on vector {}", ep, vector);
				},
				Err(e) => {
					error!("PCI {}: reading vector {} eventfd failed: {}", ep, vector, e);
					return;
				},
			}
		}
	}
}
