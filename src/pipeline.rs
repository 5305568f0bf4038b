use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::config::{IngestConfig, LISTING_MARKER, MATCH_PATH_PREFIX};
use crate::dedup::{apply_cap, filter_unseen};
use crate::error::{PipelineError, StorageError};
use crate::extract::RecordExtractor;
use crate::fetcher::DocumentSource;
use crate::provenance::{ProvenanceLog, provenance_schema};
use crate::records::{MatchRecord, PlayerStatRecord, match_schema, player_stats_schema};
use crate::storage::{self, Affinity, Column, INGEST_RUNS_TABLE, Row, SqlValue, Storage, TableSchema};

const INGEST_RUN_COLUMNS: &[Column] = &[
    Column::new("source", Affinity::Text),
    Column::new("started_at", Affinity::DateTime),
    Column::new("finished_at", Affinity::DateTime),
    Column::new("matches_processed", Affinity::Integer),
    Column::new("matches_added", Affinity::Integer),
    Column::new("player_stats_processed", Affinity::Integer),
    Column::new("player_stats_added", Affinity::Integer),
    Column::new("provenance_written", Affinity::Integer),
    Column::new("fetch_calls", Affinity::Integer),
    Column::new("errors_json", Affinity::Text),
];

const CATCH_UP_SOURCE: &str = "catch-up";

pub fn ingest_runs_schema() -> TableSchema {
    TableSchema {
        name: INGEST_RUNS_TABLE,
        columns: INGEST_RUN_COLUMNS.to_vec(),
    }
}

/// Counters for one source URL, one catch-up pass, or a whole invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub matches_processed: usize,
    pub matches_added: usize,
    pub player_stats_processed: usize,
    pub player_stats_added: usize,
    pub provenance_written: usize,
    pub fetch_calls: u64,
    /// Units that were abandoned, plus the fatal error if the run stopped.
    pub errors: Vec<String>,
}

impl RunSummary {
    fn for_source(source: &str) -> Self {
        Self {
            source: source.to_string(),
            ..Self::default()
        }
    }

    fn absorb(&mut self, other: &RunSummary) {
        self.matches_processed += other.matches_processed;
        self.matches_added += other.matches_added;
        self.player_stats_processed += other.player_stats_processed;
        self.player_stats_added += other.player_stats_added;
        self.provenance_written += other.provenance_written;
        self.fetch_calls += other.fetch_calls;
        self.errors.extend(other.errors.iter().cloned());
    }

    pub fn log(&self) {
        info!(
            source = %self.source,
            "{}/{} matches added",
            self.matches_added,
            self.matches_processed
        );
        info!(
            source = %self.source,
            "{}/{} player stats added",
            self.player_stats_added,
            self.player_stats_processed
        );
        info!(
            source = %self.source,
            provenance = self.provenance_written,
            errors = self.errors.len(),
            "total fetch calls: {}",
            self.fetch_calls
        );
    }
}

/// Fails before any network call unless `url` looks like a fixtures listing.
pub fn validate_source(url: &str) -> Result<(), PipelineError> {
    let trimmed = url.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(PipelineError::InvalidSource {
            url: url.to_string(),
            reason: "not an http(s) url".to_string(),
        });
    }
    if !trimmed.contains(LISTING_MARKER) {
        return Err(PipelineError::InvalidSource {
            url: url.to_string(),
            reason: format!("there is no '{LISTING_MARKER}' in the url"),
        });
    }
    Ok(())
}

/// Sequential fetch -> extract -> dedup -> persist driver over one store.
pub struct Pipeline<'s, F> {
    source: F,
    store: &'s mut dyn Storage,
    extractor: RecordExtractor,
    base_url: String,
    match_schema: TableSchema,
    stats_schema: TableSchema,
    provenance_schema: TableSchema,
    totals: RunSummary,
}

impl<'s, F: DocumentSource> Pipeline<'s, F> {
    pub fn new(
        source: F,
        store: &'s mut dyn Storage,
        extractor: RecordExtractor,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            source,
            store,
            extractor,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            match_schema: match_schema(),
            stats_schema: player_stats_schema(),
            provenance_schema: provenance_schema(),
            totals: RunSummary::for_source("total"),
        }
    }

    pub fn from_config(source: F, store: &'s mut dyn Storage, config: &IngestConfig) -> Self {
        Self::new(
            source,
            store,
            RecordExtractor::from_config(config),
            config.base_url.clone(),
        )
    }

    pub fn prepare_storage(&mut self, recreate: bool) -> Result<(), PipelineError> {
        storage::prepare(&mut *self.store, recreate)?;
        Ok(())
    }

    pub fn source(&self) -> &F {
        &self.source
    }

    /// Accumulated counters over every run of this pipeline, including runs
    /// that ended in an error.
    pub fn totals(&self) -> &RunSummary {
        &self.totals
    }

    fn match_url(&self, match_id: &str) -> String {
        format!("{}{MATCH_PATH_PREFIX}{match_id}", self.base_url)
    }

    /// Ingests each listing in turn. Stops at the first fatal error.
    pub fn run(&mut self, urls: &[String], max_matches: Option<usize>) -> Result<RunSummary, PipelineError> {
        for url in urls {
            self.ingest_source(url, max_matches)?;
        }
        Ok(self.totals.clone())
    }

    /// One listing URL end to end. Counts are logged and recorded whether or
    /// not the source succeeds.
    #[instrument(skip(self))]
    pub fn ingest_source(
        &mut self,
        url: &str,
        max_matches: Option<usize>,
    ) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        let calls_before = self.source.total_calls();
        let mut summary = RunSummary::for_source(url);

        let result = self.ingest_listing(url, max_matches, &mut summary);
        self.finish_run(&mut summary, calls_before, started_at, result.as_ref().err());
        result.map(|()| summary)
    }

    /// Re-derives stats for persisted matches that have none, without
    /// touching any listing.
    #[instrument(skip(self))]
    pub fn reconcile_missing_stats(&mut self) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        let calls_before = self.source.total_calls();
        let mut summary = RunSummary::for_source(CATCH_UP_SOURCE);

        let result = self.catch_up(&mut summary);
        self.finish_run(&mut summary, calls_before, started_at, result.as_ref().err());
        result.map(|()| summary)
    }

    fn ingest_listing(
        &mut self,
        url: &str,
        max_matches: Option<usize>,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        validate_source(url)?;

        let listing = self.source.fetch(url)?;
        let extraction = self.extractor.extract_matches(&listing)?;
        summary.matches_processed += extraction.records.len();
        self.persist_provenance(&extraction.provenance, summary)?;

        let persisted = self.store.persisted_match_ids()?;
        let unseen = apply_cap(filter_unseen(&extraction.records, &persisted), max_matches);
        info!(
            season = %extraction.season,
            competition = %extraction.competition,
            found = extraction.records.len(),
            unseen = unseen.len(),
            "listing filtered against store"
        );
        if unseen.is_empty() {
            return Ok(());
        }

        let with_stats = self.store.match_ids_with_stats()?;
        for record in &unseen {
            if with_stats.contains(&record.match_id) {
                info!(match_id = %record.match_id, "player stats already stored, adding match row only");
            } else if !self.unit(summary, &record.match_id, |p, s| p.process_player_stats(&record.match_id, s))? {
                continue;
            }
            self.persist_match(record, summary)?;
        }
        Ok(())
    }

    fn catch_up(&mut self, summary: &mut RunSummary) -> Result<(), PipelineError> {
        let missing = self.store.match_ids_missing_stats()?;
        info!(missing = missing.len(), "matches without player stats");
        for match_id in &missing {
            self.unit(summary, match_id, |p, s| p.process_player_stats(match_id, s))?;
        }
        Ok(())
    }

    /// Runs one per-match unit. Fetch and extract failures abandon the unit
    /// and return `Ok(false)`; storage failures propagate.
    fn unit(
        &mut self,
        summary: &mut RunSummary,
        match_id: &str,
        work: impl FnOnce(&mut Self, &mut RunSummary) -> Result<(), PipelineError>,
    ) -> Result<bool, PipelineError> {
        match work(self, summary) {
            Ok(()) => Ok(true),
            Err(PipelineError::Storage(err)) => Err(err.into()),
            Err(err) => {
                warn!(match_id, error = %err, "match skipped");
                summary.errors.push(format!("match {match_id}: {err}"));
                Ok(false)
            }
        }
    }

    fn process_player_stats(
        &mut self,
        match_id: &str,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        let url = self.match_url(match_id);
        let doc = self.source.fetch(&url)?;
        let extraction = self.extractor.extract_player_stats(&doc, match_id);
        summary.player_stats_processed += extraction.records.len();
        self.persist_provenance(&extraction.provenance, summary)?;

        let rows = extraction
            .records
            .iter()
            .map(PlayerStatRecord::to_row)
            .collect::<Vec<_>>();
        summary.player_stats_added += self.store.insert_batch(
            self.stats_schema.name,
            &self.stats_schema.columns,
            &rows,
        )?;
        Ok(())
    }

    fn persist_match(&mut self, record: &MatchRecord, summary: &mut RunSummary) -> Result<(), StorageError> {
        summary.matches_added += self.store.insert_batch(
            self.match_schema.name,
            &self.match_schema.columns,
            &[record.to_row()],
        )?;
        Ok(())
    }

    fn persist_provenance(
        &mut self,
        log: &ProvenanceLog,
        summary: &mut RunSummary,
    ) -> Result<(), StorageError> {
        if log.is_empty() {
            return Ok(());
        }
        summary.provenance_written += self.store.insert_batch(
            self.provenance_schema.name,
            &self.provenance_schema.columns,
            &log.rows(),
        )?;
        Ok(())
    }

    fn finish_run(
        &mut self,
        summary: &mut RunSummary,
        calls_before: u64,
        started_at: DateTime<Utc>,
        error: Option<&PipelineError>,
    ) {
        summary.fetch_calls = self.source.total_calls().saturating_sub(calls_before);
        if let Some(err) = error {
            summary.errors.push(err.to_string());
        }
        summary.log();
        self.totals.absorb(summary);

        if matches!(error, Some(PipelineError::Storage(_))) {
            return;
        }
        if let Err(err) = self.record_run(summary, started_at) {
            warn!(error = %err, "could not record ingest run");
        }
    }

    fn record_run(&mut self, summary: &RunSummary, started_at: DateTime<Utc>) -> Result<(), StorageError> {
        let errors_json = serde_json::to_string(&summary.errors).unwrap_or_else(|_| "[]".to_string());
        let row: Row = vec![
            summary.source.as_str().into(),
            started_at.into(),
            Utc::now().into(),
            count(summary.matches_processed),
            count(summary.matches_added),
            count(summary.player_stats_processed),
            count(summary.player_stats_added),
            count(summary.provenance_written),
            SqlValue::Integer(i64::try_from(summary.fetch_calls).unwrap_or(i64::MAX)),
            errors_json.into(),
        ];
        self.store
            .insert_batch(INGEST_RUNS_TABLE, INGEST_RUN_COLUMNS, &[row])?;
        Ok(())
    }
}

fn count(n: usize) -> SqlValue {
    SqlValue::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}
