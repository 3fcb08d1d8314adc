//! Record filter pipeline.
//!
//! Submissions pulled from the record store go through four ordered stages
//! before anything touches the game server:
//!
//! 1. [`ValidityFilter`] drops records with an empty QQ number or game id.
//! 2. [`GameIdFormatFilter`] drops records whose game id is malformed.
//! 3. [`DedupFilter`] keyed by game id keeps the newest record per game id.
//! 4. [`DedupFilter`] keyed by QQ number keeps the newest record per QQ number.
//!
//! Game ids are collapsed first so that a player who resubmitted the same
//! game id under a corrected QQ number cannot end up with two active entries;
//! the QQ pass then stops one person from claiming several game ids.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::record::Record;

/// A single stage of the pipeline.
pub trait RecordFilter: Send + Sync {
    /// Stage name used in logs and reports.
    fn name(&self) -> &'static str;

    /// Apply the stage, returning the records that survive it.
    fn apply(&self, records: Vec<Record>) -> Vec<Record>;
}

/// Drops records whose QQ number or game id is empty after trimming.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidityFilter;

impl RecordFilter for ValidityFilter {
    fn name(&self) -> &'static str {
        "validity"
    }

    fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        records
            .into_iter()
            .filter(|record| {
                let keep = record.has_identity();
                if !keep {
                    debug!(
                        record_id = %record.external_id,
                        "Dropping record with empty QQ number or game id"
                    );
                }
                keep
            })
            .collect()
    }
}

/// Drops records whose game id does not match the accepted pattern.
#[derive(Debug, Default, Clone, Copy)]
pub struct GameIdFormatFilter;

impl RecordFilter for GameIdFormatFilter {
    fn name(&self) -> &'static str {
        "game_id_format"
    }

    fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        records
            .into_iter()
            .filter(|record| {
                let keep = record.has_wellformed_game_id();
                if !keep {
                    debug!(
                        record_id = %record.external_id,
                        game_id = %record.game_id,
                        "Dropping record with malformed game id"
                    );
                }
                keep
            })
            .collect()
    }
}

/// Key a [`DedupFilter`] groups records by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey {
    GameId,
    QqNumber,
}

impl DedupKey {
    fn of(self, record: &Record) -> &str {
        match self {
            Self::GameId => &record.game_id,
            Self::QqNumber => &record.qq_number,
        }
    }
}

/// Keeps one record per key: the one with the greatest `created_time`.
///
/// On equal `created_time` the record encountered first wins. Output order is
/// the order in which each key was first seen.
#[derive(Debug, Clone, Copy)]
pub struct DedupFilter {
    key: DedupKey,
}

impl DedupFilter {
    pub const fn new(key: DedupKey) -> Self {
        Self { key }
    }
}

impl RecordFilter for DedupFilter {
    fn name(&self) -> &'static str {
        match self.key {
            DedupKey::GameId => "game_id_dedup",
            DedupKey::QqNumber => "qq_number_dedup",
        }
    }

    fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        let mut slots: Vec<Record> = Vec::with_capacity(records.len());
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            let key = self.key.of(&record).to_string();
            match index.get(&key) {
                Some(&slot) => {
                    // Strictly greater: ties keep the earlier record.
                    if record.created_time > slots[slot].created_time {
                        debug!(
                            key = %key,
                            replaced = %slots[slot].external_id,
                            by = %record.external_id,
                            "Newer duplicate replaces earlier record"
                        );
                        slots[slot] = record;
                    }
                }
                None => {
                    index.insert(key, slots.len());
                    slots.push(record);
                }
            }
        }
        slots
    }
}

/// Kept/dropped counts of one executed stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub stage: &'static str,
    pub input: usize,
    pub kept: usize,
}

impl StageReport {
    pub const fn dropped(&self) -> usize {
        self.input - self.kept
    }
}

/// Result of running the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub records: Vec<Record>,
    /// One entry per executed stage; stages after an empty result are skipped.
    pub stages: Vec<StageReport>,
}

/// Ordered list of filter stages.
pub struct FilterPipeline {
    stages: Vec<Box<dyn RecordFilter>>,
}

impl std::fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("FilterPipeline")
            .field("stages", &names)
            .finish()
    }
}

impl Default for FilterPipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl FilterPipeline {
    /// Empty pipeline; add stages with [`FilterPipeline::with_stage`].
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Validity, format, game id dedup, then QQ number dedup.
    pub fn standard() -> Self {
        Self::new()
            .with_stage(ValidityFilter)
            .with_stage(GameIdFormatFilter)
            .with_stage(DedupFilter::new(DedupKey::GameId))
            .with_stage(DedupFilter::new(DedupKey::QqNumber))
    }

    #[must_use]
    pub fn with_stage(mut self, stage: impl RecordFilter + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Run every stage in order. An empty intermediate result ends the run.
    pub fn run(&self, records: Vec<Record>) -> PipelineOutcome {
        info!(count = records.len(), "Applying record filters");
        let mut current = records;
        let mut reports = Vec::with_capacity(self.stages.len());

        for stage in &self.stages {
            if current.is_empty() {
                break;
            }
            let input = current.len();
            current = stage.apply(current);
            let report = StageReport {
                stage: stage.name(),
                input,
                kept: current.len(),
            };
            info!(
                stage = report.stage,
                kept = report.kept,
                dropped = report.dropped(),
                "Filter stage applied"
            );
            reports.push(report);
        }

        info!(count = current.len(), "Record filtering complete");
        PipelineOutcome {
            records: current,
            stages: reports,
        }
    }
}
