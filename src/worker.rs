//! Loop-thread lifecycle.

use std::io;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Receiver;

use crate::client::Shared;
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::reactor::EventFd;
use crate::request::PendingRequest;

/// Spawn one thread per event loop. Each thread builds its own epoll
/// instance and slot table, optionally pins itself to a core, and runs
/// until shutdown.
pub(crate) fn spawn_loops(
    shared: Arc<Shared>,
    wakes: Vec<EventFd>,
    receivers: Vec<Receiver<PendingRequest>>,
) -> Result<Vec<thread::JoinHandle<Result<(), Error>>>, Error> {
    let mut handles = Vec::with_capacity(wakes.len());

    for (loop_id, (wake, inject_rx)) in wakes.into_iter().zip(receivers).enumerate() {
        let shared = shared.clone();
        let handle = thread::Builder::new()
            .name(format!("burstline-loop-{loop_id}"))
            .spawn(move || {
                if shared.config.pin_to_core {
                    pin_to_core(shared.config.core_offset + loop_id)?;
                }
                let mut event_loop = EventLoop::new(loop_id, shared, wake, inject_rx)?;
                event_loop.run()
            })
            .map_err(Error::Io)?;
        handles.push(handle);
    }

    Ok(handles)
}

/// Pin the current thread to a specific CPU core.
fn pin_to_core(core: usize) -> Result<(), Error> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        let ret = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if ret != 0 {
            return Err(Error::Io(io::Error::last_os_error()));
        }
    }
    Ok(())
}
