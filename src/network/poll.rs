use libc::{
    epoll_create1,
    epoll_ctl,
    epoll_wait,
    epoll_event,
    EPOLL_CLOEXEC,
    EPOLL_CTL_ADD,
    EPOLL_CTL_DEL,
    EPOLL_CTL_MOD,
    EPOLLERR,
    EPOLLET,
    EPOLLHUP,
    EPOLLIN,
    EPOLLONESHOT,
    EPOLLOUT,
    EPOLLRDHUP,
};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// Which readiness a descriptor is armed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
}

impl Interest {
    pub const READ: Interest = Interest { read: true, write: false };
    pub const WRITE: Interest = Interest { read: false, write: true };

    fn bits(self, one_shot: bool) -> u32 {
        let mut events = 0;
        if self.read {
            events |= (EPOLLIN | EPOLLRDHUP) as u32;
        }
        if self.write {
            events |= EPOLLOUT as u32;
        }
        if one_shot {
            events |= (EPOLLET | EPOLLONESHOT) as u32;
        }
        events
    }
}

/// One delivered readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub fd: RawFd,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl Readiness {
    fn from_event(event: &epoll_event) -> Self {
        let bits = event.events;
        Self {
            fd: event.u64 as RawFd,
            readable: bits & (EPOLLIN as u32 | EPOLLRDHUP as u32) != 0,
            writable: bits & EPOLLOUT as u32 != 0,
            error: bits & (EPOLLERR as u32 | EPOLLHUP as u32) != 0,
        }
    }
}

/// Thin epoll wrapper that also owns the registration table.
///
/// One-shot registrations are edge-triggered and disarm after each delivered
/// event; the owner must call [`Poller::modify`] to observe the next one.
pub struct Poller {
    epoll_fd: RawFd,
    registered: HashMap<RawFd, bool>,
    events: Vec<epoll_event>,
}

impl Poller {
    pub fn new(capacity: usize) -> io::Result<Self> {
        let fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epoll_fd: fd,
            registered: HashMap::new(),
            events: vec![epoll_event { events: 0, u64: 0 }; capacity.max(1)],
        })
    }

    pub fn register(&mut self, fd: RawFd, interest: Interest, one_shot: bool) -> io::Result<()> {
        if self.registered.contains_key(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("descriptor {} is already registered", fd),
            ));
        }
        self.ctl(EPOLL_CTL_ADD, fd, interest.bits(one_shot))?;
        self.registered.insert(fd, one_shot);
        Ok(())
    }

    /// Re-arms `fd`, keeping the mode it was registered with.
    pub fn modify(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let one_shot = *self.registered.get(&fd).ok_or_else(|| not_registered(fd))?;
        self.ctl(EPOLL_CTL_MOD, fd, interest.bits(one_shot))
    }

    pub fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        if self.registered.remove(&fd).is_none() {
            return Err(not_registered(fd));
        }
        let res = unsafe { epoll_ctl(self.epoll_fd, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.registered.contains_key(&fd)
    }

    /// Waits for readiness. An interrupted wait yields no events.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<Readiness>> {
        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };
        let res = unsafe {
            epoll_wait(
                self.epoll_fd,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }
        Ok(self.events[..res as usize].iter().map(Readiness::from_event).collect())
    }

    fn ctl(&self, op: i32, fd: RawFd, events: u32) -> io::Result<()> {
        let mut event = epoll_event { events, u64: fd as u64 };
        let res = unsafe { epoll_ctl(self.epoll_fd, op, fd, &mut event) };
        if res < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

fn not_registered(fd: RawFd) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("descriptor {} is not registered", fd))
}
