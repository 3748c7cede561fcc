//! Pending acknowledgement callbacks.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Callback invoked with the arguments of a matching ack packet.
///
/// Runs on the connection's driver task, so it must not block.
pub type AckCallback = Box<dyn FnOnce(Vec<Value>) + Send + 'static>;

/// Maps correlation ids to the callbacks awaiting them.
///
/// Ids increase strictly and are never reused for the lifetime of the
/// registry, even across [`clear`](Self::clear).
#[derive(Default)]
pub struct AckRegistry {
    last_id: u64,
    pending: HashMap<u64, AckCallback>,
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a callback and return the id to embed in the outgoing packet.
    pub fn register(&mut self, callback: AckCallback) -> u64 {
        self.last_id += 1;
        let id = self.last_id;
        self.pending.insert(id, callback);
        id
    }

    /// Invoke and remove the callback for `id`.
    ///
    /// Returns `false` if the id is unknown (already resolved, cleared, or
    /// never registered).
    pub fn resolve(&mut self, id: u64, args: Vec<Value>) -> bool {
        match self.pending.remove(&id) {
            Some(callback) => {
                callback(args);
                true
            }
            None => false,
        }
    }

    /// Drop every pending callback without invoking it.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    /// Whether `id` is still waiting for the server.
    pub fn contains(&self, id: u64) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl fmt::Debug for AckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("AckRegistry")
            .field("last_id", &self.last_id)
            .field("pending", &ids)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<Vec<Value>>>>, impl Fn() -> AckCallback) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let calls = calls.clone();
            move || -> AckCallback {
                let calls = calls.clone();
                Box::new(move |args| calls.lock().unwrap().push(args))
            }
        };
        (calls, make)
    }

    #[test]
    fn ids_increase() {
        let (_, make) = recorder();
        let mut acks = AckRegistry::new();
        let a = acks.register(make());
        let b = acks.register(make());
        assert_eq!(a, 1);
        assert!(b > a);
        assert_eq!(acks.len(), 2);
    }

    #[test]
    fn resolve_invokes_once() {
        let (calls, make) = recorder();
        let mut acks = AckRegistry::new();
        let id = acks.register(make());
        assert!(acks.contains(id));

        assert!(acks.resolve(id, vec![json!("ok")]));
        assert!(!acks.contains(id));
        assert!(!acks.resolve(id, vec![json!("again")]));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec![json!("ok")]);
    }

    #[test]
    fn unknown_id_is_noop() {
        let mut acks = AckRegistry::new();
        assert!(!acks.resolve(42, vec![]));
    }

    #[test]
    fn clear_discards_without_invoking() {
        let (calls, make) = recorder();
        let mut acks = AckRegistry::new();
        let id = acks.register(make());
        acks.register(make());

        assert_eq!(acks.clear(), 2);
        assert!(acks.is_empty());
        assert!(!acks.resolve(id, vec![]));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn ids_not_reused_after_clear() {
        let (_, make) = recorder();
        let mut acks = AckRegistry::new();
        let first = acks.register(make());
        acks.clear();
        let second = acks.register(make());
        assert!(second > first);
    }
}
