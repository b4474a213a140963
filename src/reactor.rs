//! Thin wrappers over the kernel readiness primitives.
//!
//! `Poller` owns an epoll instance (level-triggered), `TimerFd` a periodic
//! timerfd, `EventFd` a wakeup eventfd. Readiness sources are identified
//! by a `Token` packed into the epoll user data word.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

const TAG_CONN: u64 = 0;
const TAG_TICK: u64 = 1;
const TAG_RENEW: u64 = 2;
const TAG_WAKE: u64 = 3;

/// Identity of a readiness source: tag in the top byte, slot generation
/// in the middle, slot index in the low word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    Conn { idx: u16, generation: u32 },
    Tick,
    Renew,
    Wake,
}

impl Token {
    pub(crate) fn raw(self) -> u64 {
        match self {
            Token::Conn { idx, generation } => {
                (TAG_CONN << 56) | ((generation as u64) << 16) | idx as u64
            }
            Token::Tick => TAG_TICK << 56,
            Token::Renew => TAG_RENEW << 56,
            Token::Wake => TAG_WAKE << 56,
        }
    }

    pub(crate) fn decode(raw: u64) -> Token {
        match raw >> 56 {
            TAG_TICK => Token::Tick,
            TAG_RENEW => Token::Renew,
            TAG_WAKE => Token::Wake,
            _ => Token::Conn {
                idx: (raw & 0xffff) as u16,
                generation: ((raw >> 16) & 0xffff_ffff) as u32,
            },
        }
    }
}

/// One readiness notification.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Event {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

/// Level-triggered epoll instance.
pub(crate) struct Poller {
    epfd: RawFd,
    scratch: Vec<libc::epoll_event>,
}

fn interest_mask(readable: bool, writable: bool) -> u32 {
    let mut mask = libc::EPOLLRDHUP as u32;
    if readable {
        mask |= libc::EPOLLIN as u32;
    }
    if writable {
        mask |= libc::EPOLLOUT as u32;
    }
    mask
}

impl Poller {
    pub(crate) fn new() -> io::Result<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Poller {
            epfd,
            scratch: vec![unsafe { std::mem::zeroed() }; 256],
        })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: Token, mask: u32) -> io::Result<()> {
        let mut ev = libc::epoll_event {
            events: mask,
            u64: token.raw(),
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd, op, fd, &mut ev) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn register(
        &self,
        fd: RawFd,
        token: Token,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, interest_mask(readable, writable))
    }

    pub(crate) fn rearm(
        &self,
        fd: RawFd,
        token: Token,
        readable: bool,
        writable: bool,
    ) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, interest_mask(readable, writable))
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let ret =
            unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until readiness arrives, then fill `events`.
    pub(crate) fn wait(&mut self, events: &mut Vec<Event>, timeout_ms: i32) -> io::Result<()> {
        events.clear();
        let n = loop {
            let ret = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    self.scratch.as_mut_ptr(),
                    self.scratch.len() as libc::c_int,
                    timeout_ms,
                )
            };
            if ret >= 0 {
                break ret as usize;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        };

        for raw in &self.scratch[..n] {
            let bits = raw.events;
            events.push(Event {
                token: Token::decode(raw.u64),
                readable: bits
                    & (libc::EPOLLIN as u32 | libc::EPOLLHUP as u32 | libc::EPOLLRDHUP as u32)
                    != 0,
                writable: bits & libc::EPOLLOUT as u32 != 0,
                error: bits & libc::EPOLLERR as u32 != 0,
            });
        }
        Ok(())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epfd);
        }
    }
}

/// Periodic monotonic timer delivered through readiness.
pub(crate) struct TimerFd {
    fd: RawFd,
}

impl TimerFd {
    pub(crate) fn periodic(initial: Duration, interval: Duration) -> io::Result<Self> {
        let fd = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let spec = libc::itimerspec {
            it_interval: to_timespec(interval),
            it_value: to_timespec(initial.max(Duration::from_nanos(1))),
        };
        let ret = unsafe { libc::timerfd_settime(fd, 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
            }
            return Err(err);
        }
        Ok(TimerFd { fd })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    /// Consume the expiration count so the level-triggered poll settles.
    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }
}

impl Drop for TimerFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn to_timespec(d: Duration) -> libc::timespec {
    libc::timespec {
        tv_sec: d.as_secs() as libc::time_t,
        tv_nsec: d.subsec_nanos() as libc::c_long,
    }
}

/// Cross-thread wakeup fd.
pub(crate) struct EventFd {
    fd: RawFd,
}

impl EventFd {
    pub(crate) fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(EventFd { fd })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.fd
    }

    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 8];
        unsafe {
            libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, 8);
        }
    }
}

/// Wake the loop owning `fd`. Usable with a borrowed raw fd so other
/// threads can signal without owning the `EventFd`.
pub(crate) fn wake(fd: RawFd) {
    let val: u64 = 1;
    unsafe {
        libc::write(fd, &val as *const u64 as *const libc::c_void, 8);
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        for token in [
            Token::Conn {
                idx: 0,
                generation: 0,
            },
            Token::Conn {
                idx: 65535,
                generation: 7,
            },
            Token::Conn {
                idx: 12,
                generation: u32::MAX,
            },
            Token::Tick,
            Token::Renew,
            Token::Wake,
        ] {
            assert_eq!(Token::decode(token.raw()), token);
        }
    }

    #[test]
    fn eventfd_wakes_poller() {
        let mut poller = Poller::new().unwrap();
        let efd = EventFd::new().unwrap();
        poller
            .register(efd.fd(), Token::Wake, true, false)
            .unwrap();

        let mut events = Vec::new();
        wake(efd.fd());
        poller.wait(&mut events, 1000).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, Token::Wake);
        assert!(events[0].readable);

        // Draining clears the level-triggered readiness.
        efd.drain();
        poller.wait(&mut events, 0).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn timerfd_fires() {
        let mut poller = Poller::new().unwrap();
        let timer =
            TimerFd::periodic(Duration::from_millis(1), Duration::from_millis(1)).unwrap();
        poller
            .register(timer.fd(), Token::Tick, true, false)
            .unwrap();

        let mut events = Vec::new();
        poller.wait(&mut events, 1000).unwrap();
        assert_eq!(events[0].token, Token::Tick);
        timer.drain();
    }
}
