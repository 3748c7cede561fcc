//! Endpoint (namespace) multiplexing state.

use crate::error::ClientError;
use sockio_core::{Packet, ROOT_ENDPOINT, is_valid_endpoint};
use std::collections::{HashMap, HashSet};

/// Reject endpoint names that cannot be written to the wire.
pub fn check_name(name: &str) -> Result<(), ClientError> {
    if is_valid_endpoint(name) {
        Ok(())
    } else {
        Err(ClientError::InvalidEndpoint(name.to_string()))
    }
}

/// Requested and confirmed endpoints on one physical connection.
///
/// The root endpoint is implicit: it is never stored in `requested`, but
/// is tracked in `connected` once the server confirms it.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    requested: Vec<String>,
    /// Connect query per requested endpoint, sent with its connect packet.
    queries: HashMap<String, String>,
    connected: HashSet<String>,
    current: String,
}

impl Endpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the requested set; the first requested endpoint becomes current.
    pub fn reset(&mut self, requested: impl IntoIterator<Item = String>) {
        self.requested.clear();
        self.queries.clear();
        self.connected.clear();
        for name in requested {
            self.request(name, None);
        }
        self.current = self
            .requested
            .first()
            .cloned()
            .unwrap_or_else(|| ROOT_ENDPOINT.to_string());
    }

    /// Add an endpoint to the requested set. Returns `false` if already
    /// present; a new query still replaces the stored one.
    pub fn request(&mut self, name: String, query: Option<String>) -> bool {
        if name == ROOT_ENDPOINT {
            return false;
        }
        if let Some(query) = query {
            self.queries.insert(name.clone(), query);
        }
        if self.requested.contains(&name) {
            return false;
        }
        self.requested.push(name);
        true
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.queries.get(name).map(String::as_str)
    }

    /// Connect packets for every requested endpoint, in request order.
    pub fn connect_packets(&self) -> Vec<Packet> {
        self.requested
            .iter()
            .map(|name| Packet::Connect {
                endpoint: name.clone(),
                query: self.queries.get(name).cloned(),
            })
            .collect()
    }

    /// Drop an endpoint entirely; the current endpoint falls back to root.
    pub fn forget(&mut self, name: &str) {
        self.requested.retain(|n| n != name);
        self.queries.remove(name);
        self.connected.remove(name);
        if self.current == name {
            self.current = ROOT_ENDPOINT.to_string();
        }
    }

    /// Mark an endpoint confirmed. Returns `true` if it was not already.
    pub fn confirm(&mut self, name: &str) -> bool {
        self.connected.insert(name.to_string())
    }

    /// Remove an endpoint from the confirmed set only.
    pub fn unconfirm(&mut self, name: &str) -> bool {
        self.connected.remove(name)
    }

    /// Forget every confirmation (the transport is gone).
    pub fn clear_connected(&mut self) {
        self.connected.clear();
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.connected.contains(name)
    }

    pub fn is_requested(&self, name: &str) -> bool {
        name == ROOT_ENDPOINT || self.requested.iter().any(|n| n == name)
    }

    /// Requested non-root endpoints, in request order.
    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    /// Confirmed endpoints, sorted.
    pub fn connected(&self) -> Vec<String> {
        let mut names: Vec<_> = self.connected.iter().cloned().collect();
        names.sort();
        names
    }

    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn set_current(&mut self, name: &str) -> Result<(), ClientError> {
        check_name(name)?;
        if !self.is_requested(name) {
            return Err(ClientError::UnknownEndpoint(name.to_string()));
        }
        self.current = name.to_string();
        Ok(())
    }

    /// The endpoint a send goes to: the explicit one, or the current one.
    pub fn resolve(&self, explicit: Option<&str>) -> String {
        explicit.unwrap_or(&self.current).to_string()
    }
}
