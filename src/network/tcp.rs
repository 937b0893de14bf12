// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: TCP-backed network stack for host-mode bridging.
// Author: Lukas Bower

//! Network stack that opens one TCP connection per descriptor.

use std::collections::BTreeMap;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, trace};

use super::{Descriptor, NetError, NetworkStack};

#[derive(Debug, Default)]
struct TcpState {
    next: i32,
    streams: BTreeMap<Descriptor, Arc<TcpStream>>,
}

/// [`NetworkStack`] connecting to a fixed peer.
#[derive(Debug)]
pub struct TcpNetwork {
    peer: SocketAddr,
    connect_timeout: Duration,
    state: Mutex<TcpState>,
}

impl TcpNetwork {
    /// Create a stack that connects to `peer` on each allocation.
    #[must_use]
    pub fn new(peer: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            peer,
            connect_timeout,
            state: Mutex::new(TcpState::default()),
        }
    }

    /// Peer address used for new descriptors.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Clone the stream behind `fd` so a caller can read the inbound side.
    pub fn try_clone_stream(&self, fd: Descriptor) -> Result<TcpStream, NetError> {
        Ok(self.stream(fd)?.try_clone()?)
    }

    /// Shared handle on the stream behind `fd`. The table lock is released
    /// before the caller touches the socket.
    fn stream(&self, fd: Descriptor) -> Result<Arc<TcpStream>, NetError> {
        self.lock()
            .streams
            .get(&fd)
            .cloned()
            .ok_or(NetError::UnknownDescriptor(fd))
    }

    fn lock(&self) -> MutexGuard<'_, TcpState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NetworkStack for TcpNetwork {
    fn allocate_descriptor(&self) -> Result<Descriptor, NetError> {
        let stream = TcpStream::connect_timeout(&self.peer, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        let mut state = self.lock();
        let fd = Descriptor::new(state.next).ok_or(NetError::Exhausted)?;
        state.next = state.next.checked_add(1).ok_or(NetError::Exhausted)?;
        state.streams.insert(fd, Arc::new(stream));
        info!("connected {fd} to {}", self.peer);
        Ok(fd)
    }

    fn close(&self, fd: Descriptor) -> Result<(), NetError> {
        let stream = self
            .lock()
            .streams
            .remove(&fd)
            .ok_or(NetError::UnknownDescriptor(fd))?;
        // Wakes a sender blocked on a peer that stopped reading.
        let _ = stream.shutdown(std::net::Shutdown::Both);
        info!("closed {fd}");
        Ok(())
    }

    fn notify_readable(&self, fd: Descriptor) {
        trace!("{fd} readable");
    }

    fn clear_readable(&self, fd: Descriptor) {
        trace!("{fd} drained");
    }

    fn send(&self, fd: Descriptor, data: &[u8]) -> Result<usize, NetError> {
        let stream = self.stream(fd)?;
        let written = (&*stream).write(data)?;
        if written == 0 && !data.is_empty() {
            debug!("{fd} peer closed during send");
            return Err(NetError::Disconnected);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn sends_reach_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let network = TcpNetwork::new(listener.local_addr().unwrap(), Duration::from_secs(1));
        let fd = network.allocate_descriptor().unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let mut sent = 0;
        while sent < 5 {
            sent += network.send(fd, &b"hello"[sent..]).unwrap();
        }
        let mut buf = [0u8; 5];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        network.close(fd).unwrap();
        assert!(matches!(
            network.send(fd, b"x"),
            Err(NetError::UnknownDescriptor(_))
        ));
    }

    #[test]
    fn close_unblocks_a_sender_stuck_on_a_silent_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let network = Arc::new(TcpNetwork::new(
            listener.local_addr().unwrap(),
            Duration::from_secs(1),
        ));
        let fd = network.allocate_descriptor().unwrap();
        // Accepted but never read, so the send buffers fill up.
        let (_peer, _) = listener.accept().unwrap();

        let (sender_done, sender_result) = mpsc::channel();
        let sender = {
            let network = Arc::clone(&network);
            thread::spawn(move || {
                let block = vec![0u8; 1 << 20];
                let outcome = loop {
                    if let Err(err) = network.send(fd, &block) {
                        break err;
                    }
                };
                let _ = sender_done.send(outcome);
            })
        };
        thread::sleep(Duration::from_millis(300));

        let (close_done, close_result) = mpsc::channel();
        {
            let network = Arc::clone(&network);
            thread::spawn(move || {
                let _ = close_done.send(network.close(fd).is_ok());
            });
        }
        assert_eq!(close_result.recv_timeout(Duration::from_secs(3)), Ok(true));
        assert!(sender_result.recv_timeout(Duration::from_secs(3)).is_ok());
        sender.join().unwrap();
    }
}
