use std::collections::HashSet;
use std::net::{Ipv4Addr, TcpListener};

use crate::error::{CipherdeskError, Result};

/// Finds free loopback TCP ports, scanning upward from a base port.
///
/// The port is not reserved: another process may take it before the worker
/// binds. Ports already handed out by this allocator are never returned twice.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    scan_limit: u16,
    issued: HashSet<u16>,
}

impl PortAllocator {
    pub fn new(base: u16, scan_limit: u16) -> Self {
        Self {
            base,
            scan_limit: scan_limit.max(1),
            issued: HashSet::new(),
        }
    }

    pub fn allocate(&mut self) -> Result<u16> {
        let end = self.base.saturating_add(self.scan_limit - 1);
        for port in self.base..=end {
            if self.issued.contains(&port) {
                continue;
            }
            if is_free(port) {
                self.issued.insert(port);
                tracing::debug!(port, "allocated worker port");
                return Ok(port);
            }
        }
        Err(CipherdeskError::Allocation {
            base: self.base,
            attempts: self.scan_limit,
        })
    }
}

/// True if `port` can be bound on 127.0.0.1 right now.
pub fn is_free(port: u16) -> bool {
    port != 0 && TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
