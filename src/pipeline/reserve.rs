use std::collections::HashSet;
use std::sync::Mutex;

/// In-flight marker set: at most one concurrent test per host. Constructed
/// once by the pipeline and shared by handle with every stage that needs it.
#[derive(Debug, Default)]
pub struct ReservationSet {
    hosts: Mutex<HashSet<String>>,
}

impl ReservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomic insert-if-absent. True iff this call took the reservation;
    /// the caller then owns it until [`release`](Self::release).
    pub fn reserve(&self, host: &str) -> bool {
        self.hosts
            .lock()
            .expect("reservation set lock poisoned")
            .insert(host.to_string())
    }

    /// Unconditional remove. A release for a host that holds no reservation
    /// is a no-op; cleanup paths may overlap.
    pub fn release(&self, host: &str) {
        self.hosts
            .lock()
            .expect("reservation set lock poisoned")
            .remove(host);
    }

    /// Diagnostic cardinality.
    pub fn host_count(&self) -> usize {
        self.hosts
            .lock()
            .expect("reservation set lock poisoned")
            .len()
    }
}
