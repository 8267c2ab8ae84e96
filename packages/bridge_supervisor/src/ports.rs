use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::SupervisorError;

/// Hands out strictly increasing loopback ports.
///
/// Ports are never reclaimed, even after the bridge that owned one exits.
/// The counter is wider than a port so running off the end of the port range
/// is reported instead of wrapping back onto low (possibly issued) ports.
#[derive(Debug)]
pub struct PortAllocator {
    next: AtomicU32,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            next: AtomicU32::new(u32::from(base)),
        }
    }

    /// Take the next port.
    pub fn next(&self) -> Result<u16, SupervisorError> {
        let value = self.next.fetch_add(1, Ordering::SeqCst);
        u16::try_from(value).map_err(|_| SupervisorError::PortsExhausted)
    }

    /// The port the next call to [`PortAllocator::next`] would return.
    pub fn peek(&self) -> u32 {
        self.next.load(Ordering::SeqCst)
    }
}
