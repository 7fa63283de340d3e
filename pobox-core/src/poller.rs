use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use chrono::Utc;
use pobox_api::{InvoiceRecord, PlayerId, PoNumber, S3Metadata};
use pobox_s3::{ObjectInfo, ObjectStore};
use pobox_store::InvoiceStore;
use pobox_tokio::{NamedTask, ShutdownSignal};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{pattern, registry::ExpectedInvoice, ExpectedInvoices};

/// How the session layer is told an invoice is ready. Implemented by the
/// session router; injected so the poller never touches socket state and
/// tests can observe deliveries.
///
/// Must not block: implementations enqueue, they don't await.
pub trait DeliveryHook: Send + Sync + 'static {
    /// Notify `player` that the invoice for `po` is persisted and
    /// requestable. Returns `false` when no live session took the frame;
    /// the poller does not retry either way, since retrieval is
    /// player-initiated from then on.
    fn invoice_ready(
        &self,
        player: &PlayerId,
        po: &PoNumber,
        record: &InvoiceRecord,
    ) -> bool;
}

/// Retry budget for expected-invoice registrations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MaxRetries {
    /// Registrations never expire; the registry grows until consumed.
    Unlimited,
    /// A registration that survives this many completed scans is dropped.
    Limit(u32),
}

impl MaxRetries {
    pub fn is_finite(self) -> bool {
        matches!(self, Self::Limit(_))
    }
}

impl FromStr for MaxRetries {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::Unlimited);
        }
        s.parse::<u32>().map(Self::Limit).map_err(|_| {
            format!("expected a number or 'unlimited', got '{s}'")
        })
    }
}

impl fmt::Display for MaxRetries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Limit(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub max_retries: MaxRetries,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_retries: MaxRetries::Unlimited,
        }
    }
}

/// The polling engine: periodically scans the bucket for artifacts whose
/// filenames encode an expected PO number, persists them, and triggers
/// delivery. One logical loop; a scan runs inline in the loop so ticks can
/// never overlap, and timer fires during a long scan are dropped, not
/// queued.
pub struct Poller<S> {
    bucket: Arc<S>,
    store: Arc<InvoiceStore>,
    registry: Arc<ExpectedInvoices>,
    delivery: Arc<dyn DeliveryHook>,
    config: PollerConfig,
}

impl<S: ObjectStore> Poller<S> {
    pub fn new(
        bucket: Arc<S>,
        store: Arc<InvoiceStore>,
        registry: Arc<ExpectedInvoices>,
        delivery: Arc<dyn DeliveryHook>,
        config: PollerConfig,
    ) -> Self {
        Self {
            bucket,
            store,
            registry,
            delivery,
            config,
        }
    }

    /// Run the loop until shutdown. An in-flight scan always completes;
    /// only the scheduling of further ticks stops.
    pub fn spawn(self, shutdown: ShutdownSignal) -> NamedTask<()> {
        NamedTask::spawn("invoice poller", async move {
            info!(
                "polling every {:?} (max retries: {})",
                self.config.poll_interval, self.config.max_retries,
            );
            let mut timer = time::interval(self.config.poll_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = shutdown.recv() => break,
                    _ = timer.tick() => (),
                }
                // Outside the select: a shutdown mid-scan must not cancel
                // the scan.
                self.tick().await;
            }
            info!("invoice poller shutting down");
        })
    }

    /// One scan of the bucket. Public so tests can drive ticks directly.
    pub async fn tick(&self) {
        // Gated, not stopped, by an empty registry: nothing is expected,
        // so don't bother the object store.
        if self.registry.is_empty() {
            return;
        }

        let listing = match self.bucket.list().await {
            Ok(listing) => listing,
            // Next tick retries; a failed listing changes no state, so
            // finite retry budgets are not charged either.
            Err(err) => return warn!("bucket listing failed: {err}"),
        };
        debug!(
            "scan: {} objects, {} expected",
            listing.len(),
            self.registry.len(),
        );

        for object in &listing {
            self.consider(object).await;
        }

        if let MaxRetries::Limit(limit) = self.config.max_retries {
            for expired in self.registry.charge_scan_miss(limit) {
                warn!(
                    "expected invoice {} for {} expired after {limit} scans",
                    expired.po, expired.player,
                );
            }
        }
    }

    async fn consider(&self, object: &ObjectInfo) {
        let filename = pattern::filename_of(&object.key);
        if !pattern::looks_like_invoice(filename) {
            return;
        }
        let Some(po) = pattern::extract_po(filename) else {
            return;
        };
        // Strict expected-only rule: the filename is advisory, the
        // registry is the authority. Unsolicited objects are skipped
        // without a fetch, a write, or a log line they could flood.
        let Some(expected) = self.registry.lookup(&po) else {
            return;
        };

        if self.store.has(&po) {
            self.renotify(&po, &expected);
        } else {
            self.process(&po, &expected, object).await;
        }
    }

    /// The artifact was processed by an earlier run: deliver from the
    /// existing record, no fetch, and retire the registration.
    fn renotify(&self, po: &PoNumber, expected: &ExpectedInvoice) {
        let record = match self.store.get(po) {
            Ok(record) => record,
            Err(err) => {
                // Registration stays; next tick retries the read.
                return warn!("record for processed invoice {po}: {err}");
            }
        };

        info!("invoice {po} already on disk; re-notifying");
        let player = record
            .player_id
            .clone()
            .unwrap_or_else(|| expected.player.clone());
        if !self.delivery.invoice_ready(&player, po, &record) {
            info!("no live session for {player}; invoice {po} waits");
        }
        self.registry.consume(po);
    }

    /// First sighting: fetch, persist, deliver, consume. Fetch and
    /// persistence failures leave the registration for the next tick;
    /// there is no delivery without persistence. A failed delivery still
    /// consumes, because the record is on disk and retrieval is
    /// player-initiated.
    async fn process(
        &self,
        po: &PoNumber,
        expected: &ExpectedInvoice,
        object: &ObjectInfo,
    ) {
        let bytes = match self.bucket.fetch(&object.key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return warn!(
                    "fetching '{}' for invoice {po} failed: {err}",
                    object.key,
                );
            }
        };

        let now = Utc::now();
        let record = InvoiceRecord {
            player_id: Some(expected.player.clone()),
            file_size: bytes.len() as u64,
            data: bytes.to_vec(),
            filename: pattern::filename_of(&object.key).to_owned(),
            processed_at: now,
            s3_metadata: S3Metadata {
                s3_key: object.key.clone(),
                s3_size: object.size,
                s3_last_modified: object.last_modified.clone(),
            },
            saved_at: now,
            file_path: self.store.record_path(po).display().to_string(),
            summary: expected.order.summary.clone(),
        };

        if let Err(err) = self.store.put(po, &record) {
            return warn!("persisting invoice {po} failed: {err}");
        }
        info!(
            "processed invoice {po} for {} ({} bytes)",
            expected.player, record.file_size,
        );

        if !self.delivery.invoice_ready(&expected.player, po, &record) {
            info!(
                "no live session for {}; invoice {po} waits",
                expected.player,
            );
        }
        self.registry.consume(po);
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use pobox_api::order::OrderMeta;
    use pobox_s3::BucketError;

    use super::*;

    #[derive(Default)]
    struct MockBucket {
        objects: Mutex<Vec<(ObjectInfo, Bytes)>>,
        list_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
        fail_listings: AtomicBool,
        fail_fetches: AtomicBool,
    }

    impl MockBucket {
        fn put(&self, key: &str, bytes: &[u8]) {
            self.objects.lock().unwrap().push((
                ObjectInfo {
                    key: key.to_owned(),
                    size: bytes.len() as u64,
                    last_modified: "2026-01-05T12:00:00Z".to_owned(),
                    etag: "\"mock\"".to_owned(),
                },
                Bytes::copy_from_slice(bytes),
            ));
        }

        fn fetches(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }

        fn listings(&self) -> usize {
            self.list_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ObjectStore for MockBucket {
        async fn list(&self) -> Result<Vec<ObjectInfo>, BucketError> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_listings.load(Ordering::SeqCst) {
                return Err(BucketError::Transport("injected".to_owned()));
            }
            Ok(self
                .objects
                .lock()
                .unwrap()
                .iter()
                .map(|(info, _)| info.clone())
                .collect())
        }

        async fn fetch(&self, key: &str) -> Result<Bytes, BucketError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetches.load(Ordering::SeqCst) {
                return Err(BucketError::Transport("injected".to_owned()));
            }
            self.objects
                .lock()
                .unwrap()
                .iter()
                .find(|(info, _)| info.key == key)
                .map(|(_, bytes)| bytes.clone())
                .ok_or_else(|| BucketError::NotFound(key.to_owned()))
        }
    }

    struct MockHook {
        deliveries: Mutex<Vec<(PlayerId, PoNumber)>>,
        online: AtomicBool,
    }

    impl MockHook {
        fn online() -> Self {
            Self {
                deliveries: Mutex::new(Vec::new()),
                online: AtomicBool::new(true),
            }
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        fn deliveries(&self) -> Vec<(PlayerId, PoNumber)> {
            self.deliveries.lock().unwrap().clone()
        }
    }

    impl DeliveryHook for MockHook {
        fn invoice_ready(
            &self,
            player: &PlayerId,
            po: &PoNumber,
            _record: &InvoiceRecord,
        ) -> bool {
            self.deliveries
                .lock()
                .unwrap()
                .push((player.clone(), po.clone()));
            self.online.load(Ordering::SeqCst)
        }
    }

    struct Rig {
        bucket: Arc<MockBucket>,
        store: Arc<InvoiceStore>,
        registry: Arc<ExpectedInvoices>,
        hook: Arc<MockHook>,
        poller: Poller<MockBucket>,
        dir: tempfile::TempDir,
    }

    fn rig(max_retries: MaxRetries) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let bucket = Arc::new(MockBucket::default());
        let store =
            Arc::new(InvoiceStore::open(dir.path().to_path_buf()).unwrap());
        let registry = Arc::new(ExpectedInvoices::new());
        let hook = Arc::new(MockHook::online());
        let poller = Poller::new(
            bucket.clone(),
            store.clone(),
            registry.clone(),
            hook.clone(),
            PollerConfig {
                poll_interval: Duration::from_secs(10),
                max_retries,
            },
        );
        Rig {
            bucket,
            store,
            registry,
            hook,
            poller,
            dir,
        }
    }

    fn register(rig: &Rig, po: &str, player: &str) {
        rig.registry.register(
            PoNumber::from(po),
            PlayerId::from(player),
            OrderMeta::default(),
        );
    }

    #[tokio::test]
    async fn processes_expected_invoice_end_to_end() {
        let rig = rig(MaxRetries::Unlimited);
        register(&rig, "1030", "alice");
        rig.bucket.put("invoice_1030.pdf", b"%PDF-1.4\nhello");

        rig.poller.tick().await;

        let po = PoNumber::from("1030");
        assert!(rig.store.has(&po));
        let record = rig.store.get(&po).unwrap();
        assert_eq!(record.player_id, Some(PlayerId::from("alice")));
        assert_eq!(record.data, b"%PDF-1.4\nhello");
        assert!(record.size_matches());
        assert_eq!(record.s3_metadata.s3_key, "invoice_1030.pdf");

        assert_eq!(
            rig.hook.deliveries(),
            vec![(PlayerId::from("alice"), po.clone())],
        );
        assert!(rig.registry.lookup(&po).is_none());
        assert_eq!(rig.bucket.fetches(), 1);

        // Later ticks have nothing expected and do not even list.
        rig.poller.tick().await;
        assert_eq!(rig.bucket.listings(), 1);
    }

    #[tokio::test]
    async fn empty_registry_gates_the_scan() {
        let rig = rig(MaxRetries::Unlimited);
        rig.bucket.put("invoice_1.pdf", b"x");
        rig.poller.tick().await;
        assert_eq!(rig.bucket.listings(), 0);
    }

    #[tokio::test]
    async fn unsolicited_objects_are_never_touched() {
        let rig = rig(MaxRetries::Unlimited);
        // Something unrelated is expected, so the scan does run.
        register(&rig, "1", "alice");
        rig.bucket.put("invoice_9999.pdf", b"unsolicited");
        rig.bucket.put("not-an-invoice.txt", b"noise");

        for _ in 0..5 {
            rig.poller.tick().await;
        }

        assert_eq!(rig.bucket.fetches(), 0);
        assert!(rig.store.list().is_empty());
        assert!(rig.hook.deliveries().is_empty());
        assert!(rig.registry.lookup(&PoNumber::from("1")).is_some());
    }

    #[tokio::test]
    async fn renotifies_from_disk_without_a_fetch() {
        let rig = rig(MaxRetries::Unlimited);
        let po = PoNumber::from("1030");

        // A previous process run already persisted this artifact.
        let now = Utc::now();
        let record = InvoiceRecord {
            player_id: Some(PlayerId::from("alice")),
            data: b"old bytes".to_vec(),
            filename: "invoice_1030.pdf".to_owned(),
            file_size: 9,
            processed_at: now,
            s3_metadata: S3Metadata {
                s3_key: "invoice_1030.pdf".to_owned(),
                s3_size: 9,
                s3_last_modified: String::new(),
            },
            saved_at: now,
            file_path: String::new(),
            summary: None,
        };
        rig.store.put(&po, &record).unwrap();

        register(&rig, "1030", "alice");
        rig.bucket.put("invoice_1030.pdf", b"old bytes");
        rig.poller.tick().await;

        assert_eq!(rig.bucket.fetches(), 0);
        assert_eq!(
            rig.hook.deliveries(),
            vec![(PlayerId::from("alice"), po.clone())],
        );
        assert!(rig.registry.lookup(&po).is_none());
    }

    #[tokio::test]
    async fn renotify_prefers_the_pid_recorded_on_disk() {
        let rig = rig(MaxRetries::Unlimited);
        let po = PoNumber::from("1030");

        let now = Utc::now();
        let record = InvoiceRecord {
            player_id: Some(PlayerId::from("alice")),
            data: b"x".to_vec(),
            filename: "1030.pdf".to_owned(),
            file_size: 1,
            processed_at: now,
            s3_metadata: S3Metadata {
                s3_key: "1030.pdf".to_owned(),
                s3_size: 1,
                s3_last_modified: String::new(),
            },
            saved_at: now,
            file_path: String::new(),
            summary: None,
        };
        rig.store.put(&po, &record).unwrap();

        // The re-registration after a restart names a different player;
        // the record is the authority on who the artifact belongs to.
        register(&rig, "1030", "bob");
        rig.bucket.put("1030.pdf", b"x");
        rig.poller.tick().await;

        assert_eq!(
            rig.hook.deliveries(),
            vec![(PlayerId::from("alice"), po)],
        );
    }

    #[tokio::test]
    async fn fetch_failure_leaves_the_registration_for_next_tick() {
        let rig = rig(MaxRetries::Unlimited);
        register(&rig, "1030", "alice");
        rig.bucket.put("invoice_1030.pdf", b"x");
        rig.bucket.fail_fetches.store(true, Ordering::SeqCst);

        rig.poller.tick().await;
        let po = PoNumber::from("1030");
        assert!(!rig.store.has(&po));
        assert!(rig.hook.deliveries().is_empty());
        assert!(rig.registry.lookup(&po).is_some());

        rig.bucket.fail_fetches.store(false, Ordering::SeqCst);
        rig.poller.tick().await;
        assert!(rig.store.has(&po));
        assert_eq!(rig.hook.deliveries().len(), 1);
        assert!(rig.registry.lookup(&po).is_none());
    }

    #[tokio::test]
    async fn offline_delivery_still_consumes_the_registration() {
        let rig = rig(MaxRetries::Unlimited);
        rig.hook.set_online(false);
        register(&rig, "2001", "carol");
        rig.bucket.put("invoice_2001.pdf", b"carol's invoice");

        rig.poller.tick().await;

        let po = PoNumber::from("2001");
        // Persisted and consumed; Carol retrieves it herself later.
        assert!(rig.store.has(&po));
        assert!(rig.registry.lookup(&po).is_none());
        assert_eq!(rig.hook.deliveries().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_pn_in_one_listing_is_fetched_once() {
        let rig = rig(MaxRetries::Unlimited);
        register(&rig, "1030", "alice");
        rig.bucket.put("invoice_1030.pdf", b"first");
        rig.bucket.put("1030.pdf", b"second");

        rig.poller.tick().await;

        assert_eq!(rig.bucket.fetches(), 1);
        assert_eq!(rig.hook.deliveries().len(), 1);
        assert_eq!(
            rig.store.get(&PoNumber::from("1030")).unwrap().data,
            b"first",
        );
    }

    #[tokio::test]
    async fn finite_retry_budget_expires_unmatched_registrations() {
        let rig = rig(MaxRetries::Limit(2));
        register(&rig, "404", "dave");

        rig.poller.tick().await;
        rig.poller.tick().await;
        assert!(rig.registry.lookup(&PoNumber::from("404")).is_some());
        rig.poller.tick().await;
        assert!(rig.registry.lookup(&PoNumber::from("404")).is_none());
    }

    #[tokio::test]
    async fn failed_listings_do_not_burn_the_retry_budget() {
        let rig = rig(MaxRetries::Limit(1));
        register(&rig, "404", "dave");
        rig.bucket.fail_listings.store(true, Ordering::SeqCst);

        for _ in 0..10 {
            rig.poller.tick().await;
        }
        assert!(rig.registry.lookup(&PoNumber::from("404")).is_some());
    }

    #[tokio::test]
    async fn persistence_failure_means_no_delivery_and_a_retry() {
        use std::fs;

        let rig = rig(MaxRetries::Unlimited);
        register(&rig, "1030", "alice");
        rig.bucket.put("invoice_1030.pdf", b"x");

        // Squat on the record's destination with a non-empty directory so
        // the rename into place cannot succeed.
        let dest = rig.dir.path().join("invoice_1030.json");
        fs::create_dir(&dest).unwrap();
        fs::write(dest.join("squatter"), b"").unwrap();
        rig.poller.tick().await;

        let po = PoNumber::from("1030");
        assert!(rig.hook.deliveries().is_empty());
        assert!(rig.registry.lookup(&po).is_some());
        assert!(!rig.store.has(&po));

        fs::remove_dir_all(&dest).unwrap();
        rig.poller.tick().await;
        assert!(rig.store.has(&po));
        assert_eq!(rig.hook.deliveries().len(), 1);
    }
}
