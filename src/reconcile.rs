// 🔁 Reconciliation Loop - One polling cycle, repeated
// fetch stubs → filter seen → extract → append ledger → persist ids
//
// Ids are marked processed whether or not a payment came out of the
// message, so a malformed notification is never retried forever.
// The id set is persisted even when the ledger write fails: a payment can
// be lost that way, but nothing is ever appended twice by one instance.

use crate::extractor::PaymentExtractor;
use crate::ledger::{LedgerRecord, LedgerSink};
use crate::payment::Payment;
use crate::processed::{ProcessedIdSet, ProcessedIdStore};
use crate::source::{FilterCriteria, MessageSource, MessageStub};
use crate::timestamp::resolve_timestamp;
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

// ============================================================================
// STATE & REPORTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Fetching,
    Filtering,
    ExtractingBatch,
    Writing,
    Persisting,
    Waiting,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// One cycle, then stop
    Once,
    /// Cycle, wait, repeat until shutdown is signalled
    Continuous,
}

/// What happened during one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Stubs returned by the source
    pub listed: usize,

    /// Stubs not seen before
    pub new_messages: usize,

    /// Payments extracted
    pub extracted: usize,

    /// Messages marked seen without a payment (parse miss or fetch failure)
    pub misses: usize,

    /// Rows the ledger accepted
    pub written: usize,

    /// Set when the ledger append failed; ids were still persisted
    pub ledger_error: Option<String>,
}

impl CycleReport {
    pub fn summary(&self) -> String {
        format!(
            "{} listed, {} new, {} extracted, {} missed, {} written",
            self.listed, self.new_messages, self.extracted, self.misses, self.written
        )
    }
}

/// Totals across all cycles of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cycles: usize,
    pub failed_cycles: usize,
    pub payments_written: usize,

    /// Cycles whose ledger append failed; their payments are not in the ledger
    pub ledger_failures: usize,
}

// ============================================================================
// RECONCILIATION LOOP
// ============================================================================

pub struct ReconciliationLoop<S: MessageSource, L: LedgerSink> {
    source: S,
    ledger: L,
    store: ProcessedIdStore,
    processed: ProcessedIdSet,
    extractor: PaymentExtractor,
    filter: FilterCriteria,
    poll_interval: Duration,
    state: LoopState,
}

impl<S: MessageSource, L: LedgerSink> ReconciliationLoop<S, L> {
    /// Loads the processed id set once; a corrupt store is fatal
    pub fn new(
        source: S,
        ledger: L,
        store: ProcessedIdStore,
        filter: FilterCriteria,
        poll_interval: Duration,
    ) -> Result<Self> {
        let processed = store.load().with_context(|| {
            format!("Failed to load processed ids from {}", store.path().display())
        })?;

        info!(count = processed.len(), "Loaded previously processed message ids");

        Ok(ReconciliationLoop {
            source,
            ledger,
            store,
            processed,
            extractor: PaymentExtractor::new(),
            filter,
            poll_interval,
            state: LoopState::Idle,
        })
    }

    /// Builder pattern: replace the extraction rules
    pub fn with_extractor(mut self, extractor: PaymentExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn processed(&self) -> &ProcessedIdSet {
        &self.processed
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "Loop state change");
        self.state = next;
    }

    /// Run cycles according to `mode`.
    ///
    /// Shutdown is only looked at while waiting between cycles; an
    /// in-flight cycle always reaches its persist step first. On shutdown
    /// the id set is saved one final time.
    pub async fn run(
        &mut self,
        mode: RunMode,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        loop {
            summary.cycles += 1;
            match self.run_cycle().await {
                Ok(report) => {
                    summary.payments_written += report.written;
                    if report.ledger_error.is_some() {
                        summary.ledger_failures += 1;
                    }
                }
                Err(e) if mode == RunMode::Once => {
                    self.transition(LoopState::Stopped);
                    return Err(e);
                }
                Err(e) => {
                    summary.failed_cycles += 1;
                    error!("Cycle aborted, retrying next poll: {:#}", e);
                }
            }

            if mode == RunMode::Once {
                self.transition(LoopState::Stopped);
                return Ok(summary);
            }

            self.transition(LoopState::Waiting);
            if *shutdown.borrow() {
                break;
            }

            debug!(seconds = self.poll_interval.as_secs(), "Sleeping until next poll");
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    // A dropped sender also means nobody can keep us alive
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Stopping, saving processed ids");
        self.transition(LoopState::Persisting);
        self.persist()?;
        self.transition(LoopState::Stopped);
        info!(
            cycles = summary.cycles,
            written = summary.payments_written,
            "Processed ids saved"
        );

        Ok(summary)
    }

    /// One full cycle. Errors only when listing or persisting fails.
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        // 1. Fetching
        self.transition(LoopState::Fetching);
        let stubs = self
            .source
            .list_stubs(&self.filter)
            .await
            .context("Failed to list messages")?;
        report.listed = stubs.len();

        // 2. Filtering
        self.transition(LoopState::Filtering);
        let new_stubs: Vec<MessageStub> = stubs
            .into_iter()
            .filter(|stub| !self.processed.contains(&stub.id))
            .collect();
        report.new_messages = new_stubs.len();

        if new_stubs.is_empty() {
            info!(listed = report.listed, "No new messages to process");
            self.transition(LoopState::Idle);
            return Ok(report);
        }
        info!(count = new_stubs.len(), "Processing new messages");

        // 3. ExtractingBatch
        self.transition(LoopState::ExtractingBatch);
        let mut payments: Vec<Payment> = Vec::new();
        for stub in &new_stubs {
            match self.extract_one(&stub.id).await {
                Some(payment) => {
                    info!(message_id = %stub.id, "Found: {}", payment.summary());
                    payments.push(payment);
                }
                None => report.misses += 1,
            }
            self.processed.add(stub.id.clone());
        }
        report.extracted = payments.len();

        // 4. Writing
        self.transition(LoopState::Writing);
        if payments.is_empty() {
            warn!("No payment information could be extracted from new messages");
        } else {
            let records: Vec<LedgerRecord> = payments.iter().map(LedgerRecord::from).collect();
            match self.ledger.append(&records) {
                Ok(written) => {
                    report.written = written;
                    info!(
                        count = written,
                        ledger = %self.ledger.describe(),
                        "Added payments to ledger"
                    );
                }
                Err(e) => {
                    error!(error = %e, ledger = %self.ledger.describe(), "Failed to update ledger");
                    report.ledger_error = Some(e.to_string());
                }
            }
        }

        // 5. Persisting
        self.transition(LoopState::Persisting);
        self.persist()?;
        self.transition(LoopState::Idle);

        debug!("Cycle complete: {}", report.summary());
        Ok(report)
    }

    /// Fetch + extract a single message. Any failure is a miss.
    async fn extract_one(&self, id: &str) -> Option<Payment> {
        let message = match self.source.fetch_full(id).await {
            Ok(message) => message,
            Err(e) => {
                error!(message_id = %id, error = %e, "Error fetching message");
                return None;
            }
        };

        match self.extractor.extract(message.body_text()) {
            Some(payment) => Some(payment.with_occurred_at(resolve_timestamp(&message))),
            None => {
                warn!(message_id = %id, "Could not parse message");
                None
            }
        }
    }

    fn persist(&self) -> Result<()> {
        self.store.save(&self.processed).with_context(|| {
            format!("Failed to save processed ids to {}", self.store.path().display())
        })?;
        debug!(count = self.processed.len(), "Saved processed ids");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LedgerError, SourceError};
    use crate::extractor::{DirectionRule, MemoRule};
    use crate::ledger::CsvLedger;
    use crate::payment::Direction;
    use crate::source::{BodyPart, FullMessage};
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    #[derive(Default)]
    struct FakeSource {
        stubs: Vec<MessageStub>,
        messages: HashMap<String, FullMessage>,
        fail_listing: bool,
        fetch_failures: HashSet<String>,
        fetched: Mutex<Vec<String>>,
    }

    impl FakeSource {
        fn with_message(mut self, id: &str, body: &str) -> Self {
            self.stubs.push(MessageStub::new(id));
            self.messages.insert(
                id.to_string(),
                FullMessage::new(id)
                    .with_header("Date", "Wed, 20 Mar 2024 14:05:09 +0000")
                    .with_part(BodyPart::new("text/plain", body)),
            );
            self
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSource for FakeSource {
        async fn list_stubs(
            &self,
            _filter: &FilterCriteria,
        ) -> Result<Vec<MessageStub>, SourceError> {
            if self.fail_listing {
                return Err(SourceError::Status {
                    status: 503,
                    endpoint: "messages".to_string(),
                });
            }
            Ok(self.stubs.clone())
        }

        async fn fetch_full(&self, id: &str) -> Result<FullMessage, SourceError> {
            self.fetched.lock().unwrap().push(id.to_string());
            if self.fetch_failures.contains(id) {
                return Err(SourceError::NotFound(id.to_string()));
            }
            self.messages
                .get(id)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(id.to_string()))
        }
    }

    #[derive(Default)]
    struct MemoryLedger {
        rows: Vec<LedgerRecord>,
        appends: usize,
        fail: bool,
    }

    impl LedgerSink for MemoryLedger {
        fn append(&mut self, records: &[LedgerRecord]) -> Result<usize, LedgerError> {
            self.appends += 1;
            if self.fail {
                return Err(LedgerError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )));
            }
            self.rows.extend_from_slice(records);
            Ok(records.len())
        }

        fn describe(&self) -> String {
            "memory".to_string()
        }
    }

    fn store_in(dir: &TempDir) -> ProcessedIdStore {
        ProcessedIdStore::new(dir.path().join("processed.json"))
    }

    fn build<L: LedgerSink>(
        source: FakeSource,
        ledger: L,
        dir: &TempDir,
    ) -> ReconciliationLoop<FakeSource, L> {
        ReconciliationLoop::new(
            source,
            ledger,
            store_in(dir),
            FilterCriteria::new("Venmo", "venmo@venmo.com"),
            Duration::from_secs(300),
        )
        .unwrap()
    }

    fn sample_source() -> FakeSource {
        FakeSource::default()
            .with_message("m1", "Alice Smith paid you $12.50 \"Pizza\"")
            .with_message("m2", "Your weekly summary is ready")
            .with_message("m3", "You paid Bob Lee $7.00")
    }

    // ------------------------------------------------------------------------
    // Tests
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_cycle_extracts_in_listing_order() {
        let dir = tempdir().unwrap();
        let mut lp = build(sample_source(), MemoryLedger::default(), &dir);

        let report = lp.run_cycle().await.unwrap();

        assert_eq!(report.listed, 3);
        assert_eq!(report.new_messages, 3);
        assert_eq!(report.extracted, 2);
        assert_eq!(report.misses, 1);
        assert_eq!(report.written, 2);
        assert_eq!(lp.state(), LoopState::Idle);

        let rows = &lp.ledger().rows;
        assert_eq!(rows[0].name, "Alice Smith");
        assert_eq!(rows[0].amount_in, "12.50");
        assert_eq!(rows[0].note, "Pizza");
        assert_eq!(rows[0].date, "2024-03-20 14:05:09");
        assert_eq!(rows[1].name, "Bob Lee");
        assert_eq!(rows[1].amount_out, "7.00");
        assert_eq!(lp.source().fetched(), vec!["m1", "m2", "m3"]);
    }

    #[tokio::test]
    async fn test_unparseable_message_is_marked_seen() {
        let dir = tempdir().unwrap();
        let mut lp = build(sample_source(), MemoryLedger::default(), &dir);
        lp.run_cycle().await.unwrap();

        let persisted = store_in(&dir).load().unwrap();
        assert!(persisted.contains("m2"), "miss must be persisted as seen");
        assert!(lp.ledger().rows.iter().all(|r| !r.name.contains("summary")));
        assert_eq!(persisted.len(), 3);
    }

    #[tokio::test]
    async fn test_second_cycle_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut lp = build(sample_source(), MemoryLedger::default(), &dir);

        lp.run_cycle().await.unwrap();
        let second = lp.run_cycle().await.unwrap();

        assert_eq!(second.new_messages, 0);
        assert_eq!(second.written, 0);
        assert_eq!(lp.ledger().rows.len(), 2);
        assert_eq!(lp.ledger().appends, 1);
    }

    #[tokio::test]
    async fn test_restart_with_persisted_ids_writes_nothing() {
        let dir = tempdir().unwrap();
        let ledger_path = dir.path().join("payments.csv");

        let mut first = build(sample_source(), CsvLedger::new(&ledger_path), &dir);
        first.run(RunMode::Once, watch::channel(false).1).await.unwrap();
        let after_first = std::fs::read_to_string(&ledger_path).unwrap();
        assert_eq!(after_first.lines().count(), 3, "header + two payments");

        let mut second = build(sample_source(), CsvLedger::new(&ledger_path), &dir);
        let summary = second.run(RunMode::Once, watch::channel(false).1).await.unwrap();

        assert_eq!(summary.payments_written, 0);
        assert_eq!(std::fs::read_to_string(&ledger_path).unwrap(), after_first);
        assert!(second.source().fetched().is_empty());
    }

    #[tokio::test]
    async fn test_listing_failure_leaves_ids_untouched() {
        let dir = tempdir().unwrap();
        let source = FakeSource {
            fail_listing: true,
            ..sample_source()
        };
        let mut lp = build(source, MemoryLedger::default(), &dir);

        assert!(lp.run_cycle().await.is_err());
        assert!(lp.processed().is_empty());
        assert!(!dir.path().join("processed.json").exists());
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_only_that_message() {
        let dir = tempdir().unwrap();
        let mut source = sample_source();
        source.fetch_failures.insert("m1".to_string());
        let mut lp = build(source, MemoryLedger::default(), &dir);

        let report = lp.run_cycle().await.unwrap();

        assert_eq!(report.extracted, 1);
        assert_eq!(report.misses, 2);
        assert!(lp.processed().contains("m1"));
        assert_eq!(lp.ledger().rows[0].name, "Bob Lee");
    }

    #[tokio::test]
    async fn test_ledger_failure_still_persists_ids() {
        let dir = tempdir().unwrap();
        let ledger = MemoryLedger {
            fail: true,
            ..Default::default()
        };
        let mut lp = build(sample_source(), ledger, &dir);

        let report = lp.run_cycle().await.unwrap();

        assert!(report.ledger_error.is_some());
        assert_eq!(report.written, 0);
        assert_eq!(store_in(&dir).load().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_no_payments_means_no_ledger_write() {
        let dir = tempdir().unwrap();
        let source = FakeSource::default().with_message("m9", "Security alert for your account");
        let mut lp = build(source, MemoryLedger::default(), &dir);

        let report = lp.run_cycle().await.unwrap();

        assert_eq!(report.extracted, 0);
        assert_eq!(lp.ledger().appends, 0);
        assert!(store_in(&dir).load().unwrap().contains("m9"));
    }

    #[tokio::test]
    async fn test_shutdown_observed_at_wait_persists_and_stops() {
        let dir = tempdir().unwrap();
        let mut lp = build(sample_source(), MemoryLedger::default(), &dir);

        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();

        let summary = lp.run(RunMode::Continuous, rx).await.unwrap();

        assert_eq!(summary.cycles, 1, "in-flight cycle completes before stopping");
        assert_eq!(summary.payments_written, 2);
        assert_eq!(lp.state(), LoopState::Stopped);
        assert_eq!(store_in(&dir).load().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_continuous_mode_survives_failed_cycle() {
        let dir = tempdir().unwrap();
        let source = FakeSource {
            fail_listing: true,
            ..Default::default()
        };
        let mut lp = build(source, MemoryLedger::default(), &dir);

        let (tx, rx) = watch::channel(true);
        let summary = lp.run(RunMode::Continuous, rx).await.unwrap();
        drop(tx);

        assert_eq!(summary.failed_cycles, 1);
        assert_eq!(lp.state(), LoopState::Stopped);
        assert!(dir.path().join("processed.json").exists(), "final flush always runs");
    }

    #[tokio::test]
    async fn test_once_mode_propagates_listing_failure() {
        let dir = tempdir().unwrap();
        let source = FakeSource {
            fail_listing: true,
            ..Default::default()
        };
        let mut lp = build(source, MemoryLedger::default(), &dir);

        let result = lp.run(RunMode::Once, watch::channel(false).1).await;
        assert!(result.is_err());
        assert_eq!(lp.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_once_mode_counts_ledger_failure() {
        let dir = tempdir().unwrap();
        let ledger = MemoryLedger {
            fail: true,
            ..Default::default()
        };
        let mut lp = build(sample_source(), ledger, &dir);

        let summary = lp.run(RunMode::Once, watch::channel(false).1).await.unwrap();

        assert_eq!(summary.ledger_failures, 1);
        assert_eq!(summary.payments_written, 0);
        assert_eq!(summary.failed_cycles, 0);
    }

    #[tokio::test]
    async fn test_custom_extractor_rules_reach_the_ledger() {
        let dir = tempdir().unwrap();
        let source = FakeSource::default()
            .with_message("r1", "Dana refunded you $3.00 - concert")
            .with_message("r2", "Alice Smith paid you $12.50");
        let extractor = PaymentExtractor::from_rules(
            vec![DirectionRule::new(
                "refund",
                r"([A-Z][a-z]+) refunded you \$(\d+\.\d{2})",
                Direction::Incoming,
            )
            .unwrap()],
            vec![MemoRule::new("dash", r"-\s*(.+)$").unwrap()],
        );
        let mut lp = build(source, MemoryLedger::default(), &dir).with_extractor(extractor);

        let report = lp.run_cycle().await.unwrap();

        assert_eq!(report.extracted, 1);
        assert_eq!(report.misses, 1, "default template no longer applies");
        let rows = &lp.ledger().rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "Dana");
        assert_eq!(rows[0].amount_in, "3.00");
        assert_eq!(rows[0].note, "concert");
    }
}
