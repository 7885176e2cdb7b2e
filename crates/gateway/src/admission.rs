//! Per-address connection admission.
//!
//! Every connection is keyed by the address reported in `X-Forwarded-For`
//! (the gateway runs behind a proxy), not by the TCP peer.

use axum::http::HeaderMap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::{counter, gauge};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Default limit of concurrent connections from one address.
pub const DEFAULT_MAX_CONNECTIONS_PER_ADDRESS: usize = 5;

/// Address used when no forwarded address is present.
pub const DEFAULT_CLIENT_ADDRESS: &str = "127.0.0.1";

/// Resolve the client address from the first `X-Forwarded-For` entry.
pub fn client_address(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .unwrap_or(DEFAULT_CLIENT_ADDRESS)
        .to_string()
}

/// Admission refused because the address is at its limit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("too many connections from {address} ({live} live)")]
pub struct AdmissionRejected {
    pub address: String,
    pub live: usize,
}

/// Live connection counts, per address and in total.
///
/// Each address entry is updated under its DashMap shard lock, so the
/// check-then-increment in [`admit`](Self::admit) cannot race with another
/// admit or release for the same address.
#[derive(Debug)]
pub struct ConnectionAdmission {
    per_address: DashMap<String, usize>,
    total: AtomicUsize,
    max_per_address: usize,
}

impl ConnectionAdmission {
    /// Create an admission registry with the given per-address limit.
    pub fn new(max_per_address: usize) -> Self {
        Self {
            per_address: DashMap::new(),
            total: AtomicUsize::new(0),
            max_per_address,
        }
    }

    /// Try to admit a connection from `address`.
    ///
    /// The returned guard holds the slot until it is released or dropped.
    pub fn admit(self: &Arc<Self>, address: &str) -> Result<AdmissionGuard, AdmissionRejected> {
        let entry = self.per_address.entry(address.to_string());
        let current = match &entry {
            Entry::Occupied(occupied) => *occupied.get(),
            Entry::Vacant(_) => 0,
        };
        if current >= self.max_per_address {
            drop(entry);
            warn!("Rejecting connection from {}: too many connections", address);
            counter!("gateway_connections_rejected_total").increment(1);
            return Err(AdmissionRejected {
                address: address.to_string(),
                live: current,
            });
        }

        let mut live = entry.or_insert(0);
        *live += 1;
        let for_address = *live;
        let total = self.total.fetch_add(1, Ordering::SeqCst) + 1;
        drop(live);

        info!(
            "Connection from {} ({}) total {}",
            address, for_address, total
        );
        counter!("gateway_connections_total").increment(1);
        gauge!("gateway_active_connections").set(total as f64);

        Ok(AdmissionGuard {
            admission: Arc::clone(self),
            address: address.to_string(),
            released: AtomicBool::new(false),
        })
    }

    /// Live connections from `address`.
    pub fn live_for(&self, address: &str) -> usize {
        self.per_address.get(address).map(|n| *n).unwrap_or(0)
    }

    /// Live connections in total.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    fn release(&self, address: &str) {
        if let Entry::Occupied(mut entry) = self.per_address.entry(address.to_string()) {
            let live = entry.get_mut();
            *live = live.saturating_sub(1);
            if *live == 0 {
                entry.remove();
            }
            let total = self.total.fetch_sub(1, Ordering::SeqCst) - 1;
            gauge!("gateway_active_connections").set(total as f64);
            info!("Connection from {} released, total {}", address, total);
        }
    }
}

impl Default for ConnectionAdmission {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS_PER_ADDRESS)
    }
}

/// An admitted connection slot.
///
/// Released exactly once, either explicitly or on drop.
#[derive(Debug)]
pub struct AdmissionGuard {
    admission: Arc<ConnectionAdmission>,
    address: String,
    released: AtomicBool,
}

impl AdmissionGuard {
    /// Address this slot was admitted for.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Give the slot back. Later calls are no-ops.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.admission.release(&self.address);
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
