//! Host port allocation.
//!
//! Ports are acquired compare-and-bind: a candidate is claimed only by
//! successfully binding a listener on it while holding the process-wide
//! claim set, so two supervisors in one process never receive the same port
//! and ports held by other processes are skipped.

use std::collections::BTreeSet;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::ops::RangeInclusive;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::ContainerError;

/// Ports currently leased by this process.
static CLAIMED: Mutex<BTreeSet<u16>> = Mutex::new(BTreeSet::new());

fn claimed() -> MutexGuard<'static, BTreeSet<u16>> {
    // The set stays consistent even if a holder panicked.
    CLAIMED.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A leased host port.
///
/// While the lease holds its listener, no other process can bind the port.
/// [`Self::release_listener`] frees the socket so the container engine can
/// publish on it; the claim itself is released when the lease drops.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
    listener: Option<TcpListener>,
}

impl PortLease {
    /// The leased port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Close the reserving listener, keeping the in-process claim.
    pub fn release_listener(&mut self) {
        self.listener = None;
    }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        claimed().remove(&self.port);
        debug!(port = self.port, "released port lease");
    }
}

/// Allocates host ports for engine containers.
pub struct PortAllocator;

impl PortAllocator {
    /// Lease the first free port in `range`.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::NoPortAvailable` when every port in the range
    /// is claimed or bound.
    pub fn acquire(range: RangeInclusive<u16>) -> Result<PortLease, ContainerError> {
        let (start, end) = (*range.start(), *range.end());
        let mut claims = claimed();
        range
            .into_iter()
            .find_map(|port| Self::try_claim(&mut claims, port))
            .ok_or(ContainerError::NoPortAvailable { start, end })
    }

    /// Lease exactly `port`.
    ///
    /// # Errors
    ///
    /// Returns `ContainerError::PortUnavailable` when the port is claimed or
    /// bound.
    pub fn acquire_exact(port: u16) -> Result<PortLease, ContainerError> {
        let mut claims = claimed();
        Self::try_claim(&mut claims, port).ok_or(ContainerError::PortUnavailable { port })
    }

    fn try_claim(claims: &mut BTreeSet<u16>, port: u16) -> Option<PortLease> {
        if claims.contains(&port) {
            return None;
        }
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)).ok()?;
        claims.insert(port);
        debug!(port, "leased port");
        Some(PortLease {
            port,
            listener: Some(listener),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use rstest::rstest;

    use super::*;

    fn free_range(len: u16) -> RangeInclusive<u16> {
        // Ask the OS for a free port and scan upward from it.
        let probe = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
            .expect("ephemeral bind should succeed");
        let start = probe
            .local_addr()
            .expect("local addr should be available")
            .port()
            .saturating_sub(len);
        drop(probe);
        start..=start.saturating_add(len)
    }

    #[rstest]
    fn acquire_returns_port_within_range() {
        let range = free_range(20);
        let lease = PortAllocator::acquire(range.clone()).expect("a port should be free");
        assert!(range.contains(&lease.port()));
    }

    #[rstest]
    fn claimed_port_is_not_handed_out_twice() {
        let range = free_range(20);
        let first = PortAllocator::acquire(range.clone()).expect("first lease");
        let second = PortAllocator::acquire(range).expect("second lease");
        assert_ne!(first.port(), second.port());
    }

    #[rstest]
    fn claim_outlives_listener_until_drop() {
        let range = free_range(20);
        let mut lease = PortAllocator::acquire(range).expect("lease");
        let port = lease.port();
        lease.release_listener();

        assert!(matches!(
            PortAllocator::acquire_exact(port),
            Err(ContainerError::PortUnavailable { port: p }) if p == port
        ));

        drop(lease);
        let again = PortAllocator::acquire_exact(port).expect("port should be free after drop");
        assert_eq!(again.port(), port);
    }

    #[rstest]
    fn port_bound_by_someone_else_is_skipped() {
        let foreign = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
            .expect("ephemeral bind should succeed");
        let port = foreign.local_addr().expect("local addr").port();

        assert!(matches!(
            PortAllocator::acquire_exact(port),
            Err(ContainerError::PortUnavailable { .. })
        ));
    }

    #[rstest]
    fn exhausted_range_reports_bounds() {
        let foreign = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
            .expect("ephemeral bind should succeed");
        let port = foreign.local_addr().expect("local addr").port();

        assert!(matches!(
            PortAllocator::acquire(port..=port),
            Err(ContainerError::NoPortAvailable { start, end }) if start == port && end == port
        ));
    }

    #[rstest]
    fn concurrent_allocations_never_share_a_port() {
        let range = free_range(40);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let candidates = range.clone();
                thread::spawn(move || PortAllocator::acquire(candidates).expect("lease"))
            })
            .collect();
        let leases: Vec<PortLease> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should not panic"))
            .collect();

        let distinct: BTreeSet<u16> = leases.iter().map(PortLease::port).collect();
        assert_eq!(distinct.len(), leases.len());
    }
}
