use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Entries created on first sighting live this long unless the test
/// completes and stamps the real retest period.
const PROVISIONAL_TTL_SECS: i64 = 3600;

/// Sightings this close together count as one wave: the ledger waves them
/// all through and the reservation set arbitrates instead, so a duplicate
/// delivered in the same poll batch stays queued rather than being
/// acknowledged untested.
const DUPLICATE_WINDOW_MS: i64 = 1000;

#[derive(Debug, Clone, Copy)]
struct LedgerSlot {
    expires_at: DateTime<Utc>,
    /// Set while the entry is provisional (no successful test yet);
    /// cleared by [`RetestLedger::set`].
    first_seen: Option<DateTime<Utc>>,
}

/// TTL ledger of recently tested hosts. `contains` doubles as the
/// first-sighting gate: a miss inserts a provisional entry so later
/// redeliveries are suppressed even if the test never finishes. Expiry is
/// lazy; nothing sweeps the map.
#[derive(Debug)]
pub struct RetestLedger {
    entries: Mutex<HashMap<String, LedgerSlot>>,
    retest_period: Duration,
    provisional_ttl: Duration,
    duplicate_window: Duration,
}

impl RetestLedger {
    pub fn new(retest_period: std::time::Duration) -> Self {
        Self::with_windows(
            retest_period,
            std::time::Duration::from_secs(PROVISIONAL_TTL_SECS as u64),
            std::time::Duration::from_millis(DUPLICATE_WINDOW_MS as u64),
        )
    }

    /// Injectable windows so tests can shrink the provisional TTL and the
    /// duplicate window without waiting on wall-clock defaults.
    pub fn with_windows(
        retest_period: std::time::Duration,
        provisional_ttl: std::time::Duration,
        duplicate_window: std::time::Duration,
    ) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retest_period: Duration::from_std(retest_period)
                .unwrap_or_else(|_| Duration::seconds(i64::MAX / 2_000)),
            provisional_ttl: Duration::from_std(provisional_ttl)
                .unwrap_or_else(|_| Duration::seconds(PROVISIONAL_TTL_SECS)),
            duplicate_window: Duration::from_std(duplicate_window)
                .unwrap_or_else(|_| Duration::milliseconds(DUPLICATE_WINDOW_MS)),
        }
    }

    /// True when the host was tested (or first sighted) too recently to test
    /// again. A miss arms a provisional entry; an expired entry re-arms and
    /// reports a miss.
    pub fn contains(&self, host: &str) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("retest ledger lock poisoned");

        match entries.get_mut(host) {
            None => {
                entries.insert(
                    host.to_string(),
                    LedgerSlot {
                        expires_at: now + self.provisional_ttl,
                        first_seen: Some(now),
                    },
                );
                false
            }
            Some(slot) if slot.expires_at <= now => {
                *slot = LedgerSlot {
                    expires_at: now + self.provisional_ttl,
                    first_seen: Some(now),
                };
                false
            }
            Some(slot) => match slot.first_seen {
                // Same sighting wave: still a miss, the reservation set
                // decides which duplicate actually runs.
                Some(seen) if now - seen <= self.duplicate_window => false,
                _ => true,
            },
        }
    }

    /// Authoritative success marker: the host was tested, hold it out of
    /// rotation for the full retest period.
    pub fn set(&self, host: &str) {
        let now = Utc::now();
        self.entries
            .lock()
            .expect("retest ledger lock poisoned")
            .insert(
                host.to_string(),
                LedgerSlot {
                    expires_at: now + self.retest_period,
                    first_seen: None,
                },
            );
    }

    /// Diagnostic size (expired entries linger until re-sighted).
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("retest ledger lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
