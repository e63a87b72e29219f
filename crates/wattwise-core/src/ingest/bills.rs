//! Bill ingestion

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ExtractionConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::extract::{BillExtractor, DocumentRef};
use crate::models::{
    BillIngestionReport, FailedDocument, FailureReason, IngestKind, NewBill, PutBillOutcome,
};

use super::with_timeout;

/// File extensions picked up by directory discovery
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "png", "jpg", "jpeg"];

/// Knobs for a bill ingestion run
#[derive(Debug, Clone)]
pub struct BillIngestOptions {
    /// Upper bound for a single extraction call
    pub timeout: Duration,
    /// Extractions below this confidence need confirmation
    pub confidence_threshold: f64,
    /// Store low-confidence extractions anyway
    pub accept_low_confidence: bool,
}

impl Default for BillIngestOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            confidence_threshold: 0.6,
            accept_low_confidence: false,
        }
    }
}

impl BillIngestOptions {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            timeout: config.timeout,
            confidence_threshold: config.confidence_threshold,
            accept_low_confidence: false,
        }
    }

    pub fn accept_low_confidence(mut self, accept: bool) -> Self {
        self.accept_low_confidence = accept;
        self
    }
}

/// Turns bill documents into stored bills
pub struct BillIngestor<'a, E: BillExtractor> {
    db: &'a Database,
    extractor: &'a E,
    options: BillIngestOptions,
}

/// Why a document was not stored
enum Rejection {
    Failed(FailureReason, String),
    Fatal(Error),
}

impl From<Error> for Rejection {
    fn from(e: Error) -> Self {
        Rejection::Fatal(e)
    }
}

impl<'a, E: BillExtractor> BillIngestor<'a, E> {
    pub fn new(db: &'a Database, extractor: &'a E, options: BillIngestOptions) -> Self {
        Self {
            db,
            extractor,
            options,
        }
    }

    /// Ingest documents, skipping any whose identity is already stored
    ///
    /// Per-document failures land in the report. Store errors abort the run.
    pub async fn ingest(&self, documents: &[DocumentRef]) -> Result<BillIngestionReport> {
        self.run(documents, false).await
    }

    /// Extract documents again and overwrite their stored bills
    pub async fn reextract(&self, documents: &[DocumentRef]) -> Result<BillIngestionReport> {
        self.run(documents, true).await
    }

    async fn run(&self, documents: &[DocumentRef], replace: bool) -> Result<BillIngestionReport> {
        let run_id = self.db.start_ingest_run(IngestKind::Bills)?;
        info!(
            documents = documents.len(),
            replace,
            model = self.extractor.model(),
            "Starting bill ingestion"
        );

        let mut report = BillIngestionReport::default();
        for document in documents {
            let identity = document.identity();

            if !replace && self.db.bill_exists(&identity)? {
                debug!(document = %document.name, "Bill already stored, skipping");
                report.skipped += 1;
                continue;
            }

            match self.process(document, &identity, replace).await {
                Ok(PutBillOutcome::Inserted) => report.new += 1,
                Ok(PutBillOutcome::Replaced) => report.replaced += 1,
                Ok(PutBillOutcome::SkippedDuplicate) => report.skipped += 1,
                Err(Rejection::Failed(reason, detail)) => {
                    warn!(document = %document.name, reason = %reason, "{}", detail);
                    report.failed.push(FailedDocument {
                        source: document.name.clone(),
                        reason,
                        detail,
                    });
                }
                Err(Rejection::Fatal(e)) => return Err(e),
            }
        }

        let detail = serde_json::to_string(&report)?;
        self.db.finish_ingest_run(
            run_id,
            (report.new + report.replaced) as i64,
            report.skipped as i64,
            report.failed_count() as i64,
            Some(&detail),
        )?;

        info!(
            new = report.new,
            replaced = report.replaced,
            skipped = report.skipped,
            failed = report.failed_count(),
            "Bill ingestion complete"
        );
        Ok(report)
    }

    async fn process(
        &self,
        document: &DocumentRef,
        identity: &str,
        replace: bool,
    ) -> std::result::Result<PutBillOutcome, Rejection> {
        let candidate = with_timeout(self.options.timeout, self.extractor.extract(document))
            .await
            .map_err(|e| Rejection::Failed(FailureReason::ExtractionError, e.to_string()))?;

        let confidence = candidate.confidence;
        let bill = candidate
            .into_new_bill(identity, Some(&document.name))
            .map_err(|e| Rejection::Failed(FailureReason::ValidationError, e.to_string()))?;

        self.check_period(&bill)?;

        if !self.options.accept_low_confidence {
            if let Some(confidence) = confidence {
                if confidence < self.options.confidence_threshold {
                    return Err(Rejection::Failed(
                        FailureReason::NeedsConfirmation,
                        format!(
                            "confidence {:.2} below threshold {:.2}",
                            confidence, self.options.confidence_threshold
                        ),
                    ));
                }
            }
        }

        match self.db.put_bill(&bill, replace) {
            Ok(outcome) => Ok(outcome),
            Err(Error::Validation(msg)) => {
                Err(Rejection::Failed(FailureReason::ValidationError, msg))
            }
            Err(e) => Err(Rejection::Fatal(e)),
        }
    }

    /// Reject a bill whose period matches a stored bill with another identity
    fn check_period(&self, bill: &NewBill) -> std::result::Result<(), Rejection> {
        let clashes = self
            .db
            .find_bills_by_period(bill.period_start, bill.period_end)?;
        if let Some(other) = clashes.iter().find(|b| b.identity != bill.identity) {
            return Err(Rejection::Failed(
                FailureReason::PossibleDuplicatePeriod,
                format!(
                    "period {}..{} already stored as {}",
                    bill.period_start,
                    bill.period_end,
                    other.source_name.as_deref().unwrap_or(other.short_identity())
                ),
            ));
        }
        Ok(())
    }
}

/// Collect bill documents from a directory, sorted by file name
///
/// Unreadable files come back as `read_error` failures instead of aborting.
pub fn discover_documents(dir: &Path) -> Result<(Vec<DocumentRef>, Vec<FailedDocument>)> {
    if !dir.is_dir() {
        return Err(Error::NotFound(format!("directory {}", dir.display())));
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
        })
        .collect();
    paths.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));

    let mut documents = Vec::with_capacity(paths.len());
    let mut failed = Vec::new();
    for path in paths {
        match DocumentRef::from_path(&path) {
            Ok(document) => documents.push(document),
            Err(e) => failed.push(FailedDocument {
                source: path.display().to_string(),
                reason: FailureReason::ReadError,
                detail: e.to_string(),
            }),
        }
    }
    Ok((documents, failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{BillCandidate, MockExtractor};
    use crate::models::TariffFlag;
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn candidate(start: NaiveDate, end: NaiveDate, kwh: f64) -> BillCandidate {
        BillCandidate {
            total_cost: Some(kwh * 0.9),
            consumption_kwh: Some(kwh),
            tariff_flag: TariffFlag::Green,
            surcharge: None,
            period_start: Some(start),
            period_end: Some(end),
            due_date: None,
            confidence: Some(0.95),
            next_reading: None,
            reference_month: None,
        }
    }

    fn doc(name: &str) -> DocumentRef {
        DocumentRef::from_bytes(name, name.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_ingest_twice_is_idempotent() {
        let db = Database::in_memory().unwrap();
        let mock = MockExtractor::new().with_response(
            "jan.pdf",
            candidate(date(2024, 1, 1), date(2024, 1, 31), 300.0),
        );
        let ingestor = BillIngestor::new(&db, &mock, BillIngestOptions::default());
        let docs = vec![doc("jan.pdf")];

        let first = ingestor.ingest(&docs).await.unwrap();
        assert_eq!(first.new, 1);

        let second = ingestor.ingest(&docs).await.unwrap();
        assert_eq!(second.new, 0);
        assert_eq!(second.skipped, 1);
        assert_eq!(second.failed_count(), 0);
        // Second run never reaches the extractor
        assert_eq!(mock.calls(), 1);
        assert_eq!(db.bill_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_reported() {
        let db = Database::in_memory().unwrap();
        let mock = MockExtractor::new()
            .with_failure("bad.pdf", "model crashed")
            .with_response(
                "good.pdf",
                candidate(date(2024, 1, 1), date(2024, 1, 31), 300.0),
            );
        let ingestor = BillIngestor::new(&db, &mock, BillIngestOptions::default());

        let report = ingestor
            .ingest(&[doc("bad.pdf"), doc("good.pdf")])
            .await
            .unwrap();

        assert_eq!(report.new, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].source, "bad.pdf");
        assert_eq!(report.failed[0].reason, FailureReason::ExtractionError);
    }

    #[tokio::test]
    async fn test_timeout_is_extraction_error() {
        let db = Database::in_memory().unwrap();
        let mock = MockExtractor::new().with_delay(
            "slow.pdf",
            Duration::from_secs(5),
            candidate(date(2024, 1, 1), date(2024, 1, 31), 300.0),
        );
        let options = BillIngestOptions {
            timeout: Duration::from_millis(20),
            ..BillIngestOptions::default()
        };
        let ingestor = BillIngestor::new(&db, &mock, options);

        let report = ingestor.ingest(&[doc("slow.pdf")]).await.unwrap();
        assert_eq!(report.new, 0);
        assert_eq!(report.failed[0].reason, FailureReason::ExtractionError);
        assert_eq!(db.bill_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalid_candidate_is_validation_error() {
        let db = Database::in_memory().unwrap();
        let mock = MockExtractor::new()
            .with_response(
                "negative.pdf",
                candidate(date(2024, 1, 1), date(2024, 1, 31), -5.0),
            )
            .with_response(
                "missing.pdf",
                BillCandidate {
                    total_cost: Some(100.0),
                    ..BillCandidate::default()
                },
            );
        let ingestor = BillIngestor::new(&db, &mock, BillIngestOptions::default());

        let report = ingestor
            .ingest(&[doc("negative.pdf"), doc("missing.pdf")])
            .await
            .unwrap();

        assert_eq!(report.failed.len(), 2);
        assert!(report
            .failed
            .iter()
            .all(|f| f.reason == FailureReason::ValidationError));
    }

    #[tokio::test]
    async fn test_same_period_other_document_is_possible_duplicate() {
        let db = Database::in_memory().unwrap();
        let jan = candidate(date(2024, 1, 1), date(2024, 1, 31), 300.0);
        let mock = MockExtractor::new()
            .with_response("jan.pdf", jan.clone())
            .with_response("jan-scan.png", jan);
        let ingestor = BillIngestor::new(&db, &mock, BillIngestOptions::default());

        let report = ingestor
            .ingest(&[doc("jan.pdf"), doc("jan-scan.png")])
            .await
            .unwrap();

        assert_eq!(report.new, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            report.failed[0].reason,
            FailureReason::PossibleDuplicatePeriod
        );
    }

    #[tokio::test]
    async fn test_low_confidence_needs_confirmation() {
        let db = Database::in_memory().unwrap();
        let mut unsure = candidate(date(2024, 1, 1), date(2024, 1, 31), 300.0);
        unsure.confidence = Some(0.3);
        let mock = MockExtractor::new().with_response("unsure.pdf", unsure);

        let strict = BillIngestor::new(&db, &mock, BillIngestOptions::default());
        let report = strict.ingest(&[doc("unsure.pdf")]).await.unwrap();
        assert_eq!(report.failed[0].reason, FailureReason::NeedsConfirmation);
        assert_eq!(db.bill_count().unwrap(), 0);

        let confirmed = BillIngestor::new(
            &db,
            &mock,
            BillIngestOptions::default().accept_low_confidence(true),
        );
        let report = confirmed.ingest(&[doc("unsure.pdf")]).await.unwrap();
        assert_eq!(report.new, 1);
    }

    #[tokio::test]
    async fn test_reextract_replaces_stored_bill() {
        let db = Database::in_memory().unwrap();
        let mock = MockExtractor::new().with_response(
            "jan.pdf",
            candidate(date(2024, 1, 1), date(2024, 1, 31), 300.0),
        );
        let ingestor = BillIngestor::new(&db, &mock, BillIngestOptions::default());
        let docs = vec![doc("jan.pdf")];
        ingestor.ingest(&docs).await.unwrap();

        mock.set_response(
            "jan.pdf",
            candidate(date(2024, 1, 1), date(2024, 1, 31), 320.0),
        );
        let report = ingestor.reextract(&docs).await.unwrap();

        assert_eq!(report.replaced, 1);
        assert_eq!(report.new, 0);
        let stored = db.get_bill(&docs[0].identity()).unwrap().unwrap();
        assert_eq!(stored.consumption_kwh, 320.0);
    }

    #[tokio::test]
    async fn test_run_is_recorded() {
        let db = Database::in_memory().unwrap();
        let mock = MockExtractor::new().with_failure("bad.pdf", "nope");
        let ingestor = BillIngestor::new(&db, &mock, BillIngestOptions::default());
        ingestor.ingest(&[doc("bad.pdf")]).await.unwrap();

        let runs = db.list_ingest_runs(Some(IngestKind::Bills), 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].failed_count, 1);
        assert!(runs[0].finished_at.is_some());
        assert!(runs[0].detail.as_deref().unwrap().contains("extraction_error"));
    }

    #[test]
    fn test_discover_documents_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.PDF"), b"b").unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let (docs, failed) = discover_documents(dir.path()).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.jpg", "b.PDF"]);
        assert!(failed.is_empty());
    }

    #[test]
    fn test_discover_documents_missing_dir() {
        let err = discover_documents(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
