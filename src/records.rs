use std::collections::HashMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::RecordValidationError;
use crate::storage::{
    Affinity, Column, MATCHES_TABLE, PLAYER_STATS_TABLE, Row, SqlValue, TableSchema,
};

const MATCH_COLUMNS: &[Column] = &[
    Column::new("round", Affinity::Text),
    Column::new("date", Affinity::Date),
    Column::new("home", Affinity::Text),
    Column::new("score", Affinity::Text),
    Column::new("away", Affinity::Text),
    Column::new("match_id", Affinity::Text),
    Column::new("season", Affinity::Text),
    Column::new("competition", Affinity::Text),
];

/// Key columns of a player row; the stat columns follow them.
const PLAYER_KEY_COLUMNS: &[Column] = &[
    Column::new("match_id", Affinity::Text),
    Column::new("team", Affinity::Text),
    Column::new("player", Affinity::Text),
    Column::new("player_id", Affinity::Text),
];

pub fn match_schema() -> TableSchema {
    TableSchema {
        name: MATCHES_TABLE,
        columns: MATCH_COLUMNS.to_vec(),
    }
}

pub fn player_stats_schema() -> TableSchema {
    let mut columns = PLAYER_KEY_COLUMNS.to_vec();
    columns.extend(
        STAT_FIELDS
            .iter()
            .map(|field| Column::new(field.name, field.affinity)),
    );
    TableSchema {
        name: PLAYER_STATS_TABLE,
        columns,
    }
}

/// One played fixture from a listing document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    /// League fixtures carry no round.
    pub round: Option<String>,
    pub date: NaiveDate,
    pub home: String,
    pub score: String,
    pub away: String,
    pub match_id: String,
    pub season: String,
    pub competition: String,
}

/// Listing-row fields as read off the page, before validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMatch {
    pub round: Option<String>,
    pub date: Option<String>,
    pub home: Option<String>,
    pub score: Option<String>,
    pub away: Option<String>,
    pub match_id: Option<String>,
    pub season: Option<String>,
    pub competition: Option<String>,
}

impl MatchRecord {
    pub fn from_raw(raw: RawMatch) -> Result<Self, RecordValidationError> {
        let date_raw = required(raw.date, "date")?;
        let date = NaiveDate::parse_from_str(&date_raw, "%Y-%m-%d")
            .map_err(|_| RecordValidationError::invalid("date", &date_raw, "a YYYY-MM-DD date"))?;
        Ok(Self {
            round: raw.round.and_then(non_blank),
            date,
            home: required(raw.home, "home")?,
            score: required(raw.score, "score")?,
            away: required(raw.away, "away")?,
            match_id: required(raw.match_id, "match_id")?,
            season: required(raw.season, "season")?,
            competition: required(raw.competition, "competition")?,
        })
    }

    pub fn to_row(&self) -> Row {
        vec![
            self.round.clone().into(),
            self.date.into(),
            self.home.clone().into(),
            self.score.clone().into(),
            self.away.clone().into(),
            self.match_id.clone().into(),
            self.season.clone().into(),
            self.competition.clone().into(),
        ]
    }
}

/// Numeric types a stat column can hold.
pub trait StatValue: Sized + Copy + Into<SqlValue> {
    const AFFINITY: Affinity;
    const EXPECTED: &'static str;

    fn parse_cell(raw: &str) -> Option<Self>;
}

impl StatValue for i64 {
    const AFFINITY: Affinity = Affinity::Integer;
    const EXPECTED: &'static str = "an integer";

    fn parse_cell(raw: &str) -> Option<Self> {
        strip_thousands(raw).parse::<i64>().ok()
    }
}

impl StatValue for f64 {
    const AFFINITY: Affinity = Affinity::Real;
    const EXPECTED: &'static str = "a number";

    fn parse_cell(raw: &str) -> Option<Self> {
        strip_thousands(raw).parse::<f64>().ok()
    }
}

fn strip_thousands(raw: &str) -> String {
    raw.trim().chars().filter(|ch| *ch != ',').collect()
}

/// Extraction rule for one stat column: cells whose `data-stat` equals
/// `name` are copied into the field of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatField {
    pub name: &'static str,
    pub affinity: Affinity,
}

/// Text fields of a player row that are also filled by name from stat tables.
pub const MAPPED_TEXT_FIELDS: &[&str] = &["player"];

/// Returns the static field name a `data-stat` value maps to, if any.
pub fn mapped_field(data_stat: &str) -> Option<&'static str> {
    MAPPED_TEXT_FIELDS
        .iter()
        .copied()
        .chain(STAT_FIELDS.iter().map(|f| f.name))
        .find(|name| *name == data_stat)
}

/// Working state for one player while the source tables are joined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPlayerRow {
    pub match_id: Option<String>,
    pub team: Option<String>,
    pub player_id: Option<String>,
    values: HashMap<&'static str, String>,
}

impl RawPlayerRow {
    pub fn new(match_id: &str, team: Option<String>, player_id: Option<String>) -> Self {
        Self {
            match_id: Some(match_id.to_string()),
            team,
            player_id,
            values: HashMap::new(),
        }
    }

    /// Records a cell for `field` unless an earlier table already supplied
    /// one. Blank text stays null.
    pub fn offer(&mut self, field: &'static str, text: &str) -> bool {
        let Some(text) = non_blank(text.to_string()) else {
            return false;
        };
        if self.values.contains_key(field) {
            return false;
        }
        self.values.insert(field, text);
        true
    }

    pub fn value(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(|s| s.as_str())
    }

    fn stat<T: StatValue>(&self, field: &'static str) -> Result<Option<T>, RecordValidationError> {
        match self.value(field) {
            None => Ok(None),
            Some(raw) => T::parse_cell(raw)
                .map(Some)
                .ok_or_else(|| RecordValidationError::invalid(field, raw, T::EXPECTED)),
        }
    }
}

macro_rules! player_stat_record {
    ($($field:ident: $ty:ty),* $(,)?) => {
        /// Box-score line for one player in one match. Stat fields absent on
        /// the page are `None`, never zero.
        #[derive(Debug, Clone, PartialEq, Serialize)]
        pub struct PlayerStatRecord {
            pub match_id: String,
            pub team: String,
            pub player: String,
            pub player_id: String,
            $(pub $field: Option<$ty>,)*
        }

        /// Stat columns in table order.
        pub const STAT_FIELDS: &[StatField] = &[
            $(StatField {
                name: stringify!($field),
                affinity: <$ty as StatValue>::AFFINITY,
            },)*
        ];

        impl PlayerStatRecord {
            pub fn from_raw(raw: &RawPlayerRow) -> Result<Self, RecordValidationError> {
                Ok(Self {
                    match_id: required(raw.match_id.clone(), "match_id")?,
                    team: required(raw.team.clone(), "team")?,
                    player: required(raw.value("player").map(str::to_string), "player")?,
                    player_id: required(raw.player_id.clone(), "player_id")?,
                    $($field: raw.stat::<$ty>(stringify!($field))?,)*
                })
            }

            pub fn to_row(&self) -> Row {
                let mut row: Row = vec![
                    self.match_id.clone().into(),
                    self.team.clone().into(),
                    self.player.clone().into(),
                    self.player_id.clone().into(),
                ];
                $(row.push(self.$field.into());)*
                row
            }
        }
    };
}

player_stat_record! {
    minutes: i64,
    goals: i64,
    assists: i64,
    shots: i64,
    shots_on_target: i64,
    cards_yellow: i64,
    cards_red: i64,
    touches: i64,
    tackles: i64,
    interceptions: i64,
    blocks: i64,
    xg: f64,
    xg_assist: f64,
    sca: i64,
    gca: i64,
    passes_completed: i64,
    passes: i64,
    progressive_passes: i64,
    passes_progressive_distance: i64,
    assisted_shots: i64,
    passes_into_final_third: i64,
    passes_into_penalty_area: i64,
    crosses_into_penalty_area: i64,
    carries: i64,
    progressive_carries: i64,
    carries_distance: i64,
    carries_progressive_distance: i64,
    carries_into_final_third: i64,
    carries_into_penalty_area: i64,
    passes_received: i64,
    progressive_passes_received: i64,
    take_ons: i64,
    take_ons_won: i64,
    fouls: i64,
    fouled: i64,
}

fn required(value: Option<String>, field: &'static str) -> Result<String, RecordValidationError> {
    value
        .and_then(non_blank)
        .ok_or_else(|| RecordValidationError::missing(field))
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == value.len() {
        Some(value)
    } else {
        Some(trimmed.to_string())
    }
}
