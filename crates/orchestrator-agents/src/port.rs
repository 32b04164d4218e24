//! Ephemeral port assignment for agent and subagent processes (§3
//! `AgentDefinition.spawnSpec.port-hint`, §4.8 "Allocate an unused port").

use std::net::{SocketAddr, TcpListener};

use anyhow::{Context, Result};

/// Binds an OS-assigned loopback port and immediately releases it. The
/// caller passes the returned port to the spawned child, which is expected
/// to claim it before another allocation races it — acceptable for the
/// local, single-host deployment this supervises.
pub fn allocate(hint: Option<u16>) -> Result<u16> {
    if let Some(port) = hint {
        if TcpListener::bind(("127.0.0.1", port)).is_ok() {
            return Ok(port);
        }
    }
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let listener = TcpListener::bind(addr).context("failed to bind an ephemeral port")?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_a_nonzero_port() {
        let port = allocate(None).unwrap();
        assert!(port > 0);
    }

    #[test]
    fn honors_hint_when_free() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let free_port = listener.local_addr().unwrap().port();
        drop(listener);
        let port = allocate(Some(free_port)).unwrap();
        assert_eq!(port, free_port);
    }
}
