//! Fan-out of one formatted message to every participant

use std::io;

use tokio::net::tcp::OwnedWriteHalf;
use tracing::{debug, warn};

use super::registry::Registry;
use crate::ConnectionId;
use crate::terminal::Console;

/// Something a message can be pushed into without waiting
pub trait PeerLink {
    /// Write as much of `bytes` as the peer accepts right now. No retry and
    /// no queueing: a slow or dead peer simply misses the remainder.
    fn send_best_effort(&self, bytes: &[u8]) -> io::Result<()>;
}

impl PeerLink for OwnedWriteHalf {
    fn send_best_effort(&self, bytes: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            match self.try_write(&bytes[written..]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Send `message` to the local output and to every registered user except
/// `except`. Returns how many peers took the whole message.
pub fn broadcast<L: PeerLink>(
    registry: &Registry<L>,
    console: &mut dyn Console,
    message: &[u8],
    except: Option<ConnectionId>,
) -> usize {
    console.render_line(message);

    let mut delivered = 0;
    registry.for_each(|member| {
        if Some(member.user.connection) == except {
            return;
        }
        match member.link.send_best_effort(message) {
            Ok(()) => delivered += 1,
            Err(e) => warn!(
                "Dropped {} bytes for {} ({}): {}",
                message.len(),
                member.user.name,
                member.user.connection,
                e
            ),
        }
    });

    debug!("Broadcast {} bytes to {} peers", message.len(), delivered);
    delivered
}
