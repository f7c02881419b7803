//! Running/stopped notification fan-out
//!
//! Subscribers are plain blocking sockets so that an announcement made from a
//! stop routine is on the wire before the process exits. Nobody reads them
//! between announcements, so a peer that hangs up is noticed by peeking for
//! end-of-stream whenever the list is touched.

use nix::errno::Errno;
use nix::sys::socket::{recv, MsgFlags};
use privd_core::{encode_line, Notification};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

struct Subscriber {
    uid: Option<u32>,
    stream: UnixStream,
}

impl Subscriber {
    /// True once the peer has closed its end. Never blocks.
    fn hung_up(&self) -> bool {
        let mut byte = [0u8; 1];
        match recv(
            self.stream.as_raw_fd(),
            &mut byte,
            MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT,
        ) {
            Ok(0) => true,
            Ok(_) => false,
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => false,
            Err(e) => {
                debug!("subscriber uid={:?} unreadable: {}", self.uid, e);
                true
            }
        }
    }
}

fn drop_hung_up(subscribers: &mut Vec<Subscriber>) {
    subscribers.retain(|s| {
        let gone = s.hung_up();
        if gone {
            debug!("subscriber uid={:?} hung up", s.uid);
        }
        !gone
    });
}

#[derive(Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `initial` to the new subscriber and keep it for later announcements.
    pub fn add(
        &self,
        mut stream: UnixStream,
        uid: Option<u32>,
        initial: &Notification,
    ) -> std::io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;
        let line = encode_line(initial)?;
        stream.write_all(line.as_bytes())?;
        stream.flush()?;
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        drop_hung_up(&mut subscribers);
        subscribers.push(Subscriber { uid, stream });
        Ok(())
    }

    /// Forget subscribers whose peer has closed. Returns how many remain.
    pub fn prune(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        drop_hung_up(&mut subscribers);
        subscribers.len()
    }

    /// Deliver to every subscriber, dropping the ones that are gone.
    /// Returns how many received it.
    pub fn announce(&self, notification: &Notification) -> usize {
        let line = match encode_line(notification) {
            Ok(line) => line,
            Err(e) => {
                debug!("cannot encode notification: {}", e);
                return 0;
            }
        };
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        drop_hung_up(&mut subscribers);
        subscribers.retain_mut(|s| {
            let delivered = s
                .stream
                .write_all(line.as_bytes())
                .and_then(|_| s.stream.flush());
            if let Err(e) = &delivered {
                debug!("dropping subscriber uid={:?}: {}", s.uid, e);
            }
            delivered.is_ok()
        });
        subscribers.len()
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
