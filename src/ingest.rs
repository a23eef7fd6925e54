//! Log file ingestion pipeline
//!
//! New files are discovered in a stable depth-first scan order, parsed on a
//! bounded worker pool, and committed one transaction per file. The
//! checkpoint records the furthest file (in scan order) whose events are
//! durably committed, so it never advances past an uncommitted file.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::db::{ConnState, Database, NewEvent};
use crate::error::{Error, Result};
use crate::parser::{LineParser, ParsedEvent};

/// Outcome of one file
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: String,
    pub events: u64,
    pub lines_skipped: u64,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

/// Outcome of one ingestion run
#[derive(Debug, Default, Clone)]
pub struct ProcessingSummary {
    pub files_processed: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
    pub events_created: u64,
    pub lines_skipped: u64,
    pub duplicates_removed: u64,
    pub reports: Vec<FileReport>,
}

pub struct Pipeline {
    db: Database,
    parser: Arc<LineParser>,
    config: ScanConfig,
}

impl Pipeline {
    pub fn new(db: Database, config: ScanConfig) -> Self {
        Self {
            db,
            parser: Arc::new(LineParser::new()),
            config,
        }
    }

    /// Ingest every log file after the checkpoint. Files run concurrently on
    /// a pool of `config.workers` permits; each commits its events and
    /// advances the checkpoint before its slot frees up. A tripped shutdown
    /// flag stops new files from starting, in-flight files finish cleanly.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<ProcessingSummary> {
        let checkpoint = self.db.get_checkpoint().await?;

        let files = scan_log_files(&self.config.directory, &self.config.suffix);
        let remaining = match &checkpoint {
            Some(checkpoint) => {
                let position = files
                    .iter()
                    .position(|f| f.as_str() == checkpoint.last_file)
                    .ok_or_else(|| Error::CheckpointMismatch {
                        last_file: checkpoint.last_file.clone(),
                    })?;
                &files[position + 1..]
            }
            None => &files[..],
        };

        if remaining.is_empty() {
            info!("Nothing to parse");
            return Ok(ProcessingSummary::default());
        }
        info!("Parsing {} new log files", remaining.len());

        let semaphore = Arc::new(Semaphore::new(self.config.workers));
        // Checkpoint writes are serialized and only move forward in scan order
        let frontier: Arc<Mutex<Option<usize>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(remaining.len());
        for (index, file) in remaining.iter().enumerate() {
            let semaphore = semaphore.clone();
            let shutdown = shutdown.clone();
            let frontier = frontier.clone();
            let db = self.db.clone();
            let parser = self.parser.clone();
            let file = file.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                if *shutdown.borrow() {
                    return None;
                }
                Some(process_file(&db, &parser, &file, index, &frontier).await)
            }));
        }

        let mut summary = ProcessingSummary::default();
        for handle in handles {
            match handle.await {
                Ok(Some(report)) => {
                    if report.error.is_some() {
                        summary.files_failed += 1;
                    } else {
                        summary.files_processed += 1;
                    }
                    summary.events_created += report.events;
                    summary.lines_skipped += report.lines_skipped;
                    summary.reports.push(report);
                }
                Ok(None) => summary.files_skipped += 1,
                Err(e) => {
                    warn!("Ingestion worker panicked: {}", e);
                    summary.files_failed += 1;
                }
            }
        }

        // Same-timestamp duplicates can enter within a file or across
        // reprocessed files; clear them before the store is queried
        summary.duplicates_removed = self.db.deduplicate_events().await?;

        info!(
            "Completed parsing: {} files ok, {} failed, {} skipped, {} events",
            summary.files_processed,
            summary.files_failed,
            summary.files_skipped,
            summary.events_created
        );
        Ok(summary)
    }
}

/// All `.{suffix}` files under `directory`, in depth-first order with each
/// level sorted by file name. The order is what defines "new" files, so it
/// must be stable across runs on an unchanged tree.
pub fn scan_log_files(directory: &str, suffix: &str) -> Vec<String> {
    WalkDir::new(directory)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .map(|ext| ext == suffix)
                .unwrap_or(false)
        })
        .map(|entry| entry.path().display().to_string())
        .collect()
}

async fn process_file(
    db: &Database,
    parser: &LineParser,
    file: &str,
    index: usize,
    frontier: &Mutex<Option<usize>>,
) -> FileReport {
    let start = Instant::now();
    info!("Analyzing log file {}", file);

    let result = ingest_file(db, parser, file).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok((events, lines_skipped)) => {
            // Only the furthest committed file becomes the checkpoint
            let mut highest = frontier.lock().await;
            if highest.map_or(true, |h| index > h) {
                if let Err(e) = db.set_checkpoint(file, Utc::now()).await {
                    warn!("Failed to advance checkpoint to {}: {}", file, e);
                } else {
                    *highest = Some(index);
                }
            }
            drop(highest);

            info!(
                "Finished analyzing file {} in {}ms ({} events)",
                file, elapsed_ms, events
            );
            FileReport {
                path: file.to_string(),
                events,
                lines_skipped,
                elapsed_ms,
                error: None,
            }
        }
        Err(e) => {
            warn!("Failed to ingest {}: {}", file, e);
            FileReport {
                path: file.to_string(),
                events: 0,
                lines_skipped: 0,
                elapsed_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Parse one file and commit its events in a single transaction.
async fn ingest_file(db: &Database, parser: &LineParser, file: &str) -> Result<(u64, u64)> {
    let handle = tokio::fs::File::open(file).await?;
    let mut lines = BufReader::new(handle).lines();

    // Accounts already upserted while reading this file
    let mut known_accounts: HashSet<i64> = HashSet::new();
    let mut events: Vec<NewEvent> = Vec::new();
    let mut lines_skipped: u64 = 0;

    while let Some(line) = lines.next_line().await? {
        match parser.parse(&line) {
            Ok(parsed) => {
                for event in parsed {
                    match event {
                        ParsedEvent::Connect {
                            timestamp,
                            ipaddr,
                            acctid,
                        } => {
                            if known_accounts.insert(acctid) {
                                db.upsert_user(acctid).await?;
                            }
                            events.push(NewEvent {
                                acctid: Some(acctid),
                                state: ConnState::Connect,
                                ipaddr,
                                timestamp,
                            });
                        }
                        ParsedEvent::Disconnect { timestamp, ipaddr } => {
                            events.push(NewEvent {
                                acctid: None,
                                state: ConnState::Disconnect,
                                ipaddr,
                                timestamp,
                            });
                        }
                    }
                }
            }
            Err(e) => {
                warn!("Skipping line in {}: {}", file, e);
                lines_skipped += 1;
            }
        }
    }

    let committed = db.insert_file_events(&events).await?;
    Ok((committed, lines_skipped))
}
