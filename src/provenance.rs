use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::storage::{Affinity, Column, PROVENANCE_TABLE, Row, TableSchema};

const PROVENANCE_COLUMNS: &[Column] = &[
    Column::new("match_id", Affinity::Text),
    Column::new("player_id", Affinity::Text),
    Column::new("fetched_at", Affinity::DateTime),
    Column::new("unit", Affinity::Text),
    Column::new("error", Affinity::Text),
];

pub fn provenance_schema() -> TableSchema {
    TableSchema {
        name: PROVENANCE_TABLE,
        columns: PROVENANCE_COLUMNS.to_vec(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseUnit {
    Match,
    Player,
}

impl ParseUnit {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseUnit::Match => "match",
            ParseUnit::Player => "player",
        }
    }
}

/// Outcome of one parse attempt. `error == None` means the unit produced a
/// record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvenanceEntry {
    pub match_id: String,
    pub player_id: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub unit: ParseUnit,
    pub error: Option<String>,
}

impl ProvenanceEntry {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_row(&self) -> Row {
        vec![
            self.match_id.clone().into(),
            self.player_id.clone().into(),
            self.fetched_at.into(),
            self.unit.as_str().into(),
            self.error.clone().into(),
        ]
    }
}

/// Append-only list of parse attempts for one document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceLog {
    fetched_at: DateTime<Utc>,
    entries: Vec<ProvenanceEntry>,
}

impl ProvenanceLog {
    pub fn for_fetch(fetched_at: DateTime<Utc>) -> Self {
        Self {
            fetched_at,
            entries: Vec::new(),
        }
    }

    pub fn accepted(&mut self, unit: ParseUnit, match_id: &str, player_id: Option<&str>) {
        self.push(unit, match_id, player_id, None);
    }

    pub fn rejected(
        &mut self,
        unit: ParseUnit,
        match_id: &str,
        player_id: Option<&str>,
        error: impl ToString,
    ) {
        self.push(unit, match_id, player_id, Some(error.to_string()));
    }

    fn push(
        &mut self,
        unit: ParseUnit,
        match_id: &str,
        player_id: Option<&str>,
        error: Option<String>,
    ) {
        self.entries.push(ProvenanceEntry {
            match_id: match_id.to_string(),
            player_id: player_id.map(str::to_string),
            fetched_at: self.fetched_at,
            unit,
            error,
        });
    }

    pub fn entries(&self) -> &[ProvenanceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProvenanceEntry> {
        self.entries.iter().filter(|e| !e.is_success())
    }

    pub fn rows(&self) -> Vec<Row> {
        self.entries.iter().map(ProvenanceEntry::to_row).collect()
    }
}
