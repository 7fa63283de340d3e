use std::{collections::HashMap, sync::Mutex};

use chrono::{DateTime, Utc};
use pobox_api::{order::OrderMeta, PlayerId, PoNumber};
use tracing::debug;

/// A PO number announced by the order flow, awaiting its artifact.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpectedInvoice {
    pub po: PoNumber,
    pub player: PlayerId,
    pub order: OrderMeta,
    pub registered_at: DateTime<Utc>,
    /// Completed bucket scans that left this entry unconsumed. Only
    /// consulted when the retry budget is finite.
    pub misses: u32,
}

/// The expected-invoice map: `PN -> (player, order metadata)`.
///
/// Admitted by the `register_expected_invoice` handler, drained by the
/// polling engine. One mutex, short critical sections, no I/O under the
/// lock. For any PN at most one entry exists; re-registering replaces it
/// (last write wins).
pub struct ExpectedInvoices {
    inner: Mutex<HashMap<PoNumber, ExpectedInvoice>>,
}

impl ExpectedInvoices {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Unconditional upsert. A replaced entry's retry budget resets; the
    /// new registration is a new promise.
    pub fn register(
        &self,
        po: PoNumber,
        player: PlayerId,
        order: OrderMeta,
    ) {
        let entry = ExpectedInvoice {
            po: po.clone(),
            player,
            order,
            registered_at: Utc::now(),
            misses: 0,
        };
        let replaced =
            self.inner.lock().unwrap().insert(po.clone(), entry);
        if let Some(old) = replaced {
            debug!(
                "re-registered invoice {po}: {} -> new registration",
                old.player,
            );
        }
    }

    pub fn lookup(&self, po: &PoNumber) -> Option<ExpectedInvoice> {
        self.inner.lock().unwrap().get(po).cloned()
    }

    /// Atomic read-and-delete.
    pub fn consume(&self, po: &PoNumber) -> Option<ExpectedInvoice> {
        self.inner.lock().unwrap().remove(po)
    }

    /// Best-effort linear scan, for callers that only hold a player id.
    pub fn find_by_player(
        &self,
        player: &PlayerId,
    ) -> Option<ExpectedInvoice> {
        self.inner
            .lock()
            .unwrap()
            .values()
            .find(|entry| &entry.player == player)
            .cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    /// Charge every remaining entry one miss for a completed scan and
    /// remove those whose misses exceed `limit`. Returns the expired
    /// entries so the poller can log them. Never called when the retry
    /// budget is unlimited; listing failures don't reach here either
    /// (a failed listing is "no state change").
    pub fn charge_scan_miss(&self, limit: u32) -> Vec<ExpectedInvoice> {
        let mut inner = self.inner.lock().unwrap();
        let mut expired = Vec::new();
        inner.retain(|_, entry| {
            entry.misses += 1;
            if entry.misses > limit {
                expired.push(entry.clone());
                false
            } else {
                true
            }
        });
        expired
    }
}
