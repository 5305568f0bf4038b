use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use scraper::{ElementRef, Selector};
use tracing::{debug, instrument, warn};

use crate::config::{IngestConfig, MATCH_PATH_PREFIX};
use crate::document::Document;
use crate::error::ExtractError;
use crate::provenance::{ParseUnit, ProvenanceLog};
use crate::records::{MatchRecord, PlayerStatRecord, RawMatch, RawPlayerRow, mapped_field};

const COMPETITION_SUFFIX: &str = " Scores & Fixtures";
const TEAM_CAPTION_SUFFIX: &str = " Player Stats Table";
const SUMMARY_MARKER: &str = "summary";
const PLAYER_ID_ATTR: &str = "data-append-csv";
const PLAYER_FIELD: &str = "player";

pub const NO_SCORE: &str = "no score yet: fixture not played";
pub const DUPLICATE_MATCH: &str = "duplicate match id in listing";
pub const DUPLICATE_PLAYER: &str = "duplicate player id in match";

static SCHEDULE_BODY: Lazy<Selector> = Lazy::new(|| selector("#all_sched tbody"));
static HEADING: Lazy<Selector> = Lazy::new(|| selector("#meta h1"));
static ROW: Lazy<Selector> = Lazy::new(|| selector("tr"));
static BODY_ROW: Lazy<Selector> = Lazy::new(|| selector("tbody > tr"));
static CELL: Lazy<Selector> = Lazy::new(|| selector("td, th"));
static HEADER_CELL: Lazy<Selector> = Lazy::new(|| selector("th"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a"));
static TABLE_WITH_ID: Lazy<Selector> = Lazy::new(|| selector("table[id]"));
static CAPTION: Lazy<Selector> = Lazy::new(|| selector("caption"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector should parse")
}

#[derive(Debug, Clone)]
pub struct MatchExtraction {
    pub season: String,
    pub competition: String,
    pub records: Vec<MatchRecord>,
    pub provenance: ProvenanceLog,
}

#[derive(Debug, Clone)]
pub struct PlayerStatsExtraction {
    pub records: Vec<PlayerStatRecord>,
    pub provenance: ProvenanceLog,
}

/// Turns listing and detail documents into validated records, logging one
/// provenance entry per attempted row.
#[derive(Debug, Clone)]
pub struct RecordExtractor {
    stat_tables: Vec<String>,
}

impl RecordExtractor {
    pub fn new(stat_tables: Vec<String>) -> Self {
        Self { stat_tables }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(config.stat_tables.clone())
    }

    #[instrument(skip_all, fields(url = %doc.url))]
    pub fn extract_matches(&self, doc: &Document) -> Result<MatchExtraction, ExtractError> {
        let html = doc.parse();
        let body = html
            .select(&SCHEDULE_BODY)
            .next()
            .ok_or_else(|| ExtractError::MissingElement {
                url: doc.url.clone(),
                element: "schedule table (#all_sched tbody)",
            })?;
        let heading = html
            .select(&HEADING)
            .next()
            .map(element_text)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ExtractError::MissingElement {
                url: doc.url.clone(),
                element: "page heading (#meta h1)",
            })?;
        let (season, competition) = split_heading(&heading);

        let mut records = Vec::new();
        let mut provenance = ProvenanceLog::for_fetch(doc.fetched_at);
        let mut seen: HashSet<String> = HashSet::new();

        for row in body.select(&ROW) {
            if row.select(&LINK).next().is_none() {
                continue;
            }
            let (mut raw, has_score) = read_listing_row(row);
            let Some(match_id) = raw.match_id.clone() else {
                debug!(
                    home = raw.home.as_deref().unwrap_or(""),
                    away = raw.away.as_deref().unwrap_or(""),
                    "listing row without match report link"
                );
                continue;
            };

            if !has_score {
                provenance.rejected(ParseUnit::Match, &match_id, None, NO_SCORE);
                continue;
            }
            if !seen.insert(match_id.clone()) {
                provenance.rejected(ParseUnit::Match, &match_id, None, DUPLICATE_MATCH);
                continue;
            }

            raw.season = Some(season.clone());
            raw.competition = Some(competition.clone());
            match MatchRecord::from_raw(raw) {
                Ok(record) => {
                    provenance.accepted(ParseUnit::Match, &match_id, None);
                    records.push(record);
                }
                Err(err) => {
                    warn!(match_id = %match_id, error = %err, "match row failed validation");
                    provenance.rejected(ParseUnit::Match, &match_id, None, err);
                }
            }
        }

        debug!(
            accepted = records.len(),
            attempted = provenance.len(),
            "listing extracted"
        );
        Ok(MatchExtraction {
            season,
            competition,
            records,
            provenance,
        })
    }

    #[instrument(skip_all, fields(url = %doc.url, match_id = %match_id))]
    pub fn extract_player_stats(&self, doc: &Document, match_id: &str) -> PlayerStatsExtraction {
        let html = doc.parse();

        let mut summaries = Vec::new();
        let mut sources = Vec::new();
        for table in html.select(&TABLE_WITH_ID) {
            let id = table.value().attr("id").unwrap_or_default();
            if id.contains(SUMMARY_MARKER) {
                summaries.push(table);
            }
            if self.stat_tables.iter().any(|kind| id.contains(kind.as_str())) {
                sources.push(index_source_table(table));
            }
        }

        let mut records = Vec::new();
        let mut provenance = ProvenanceLog::for_fetch(doc.fetched_at);
        let mut seen: HashSet<String> = HashSet::new();

        for table in summaries {
            let team = table
                .select(&CAPTION)
                .next()
                .map(element_text)
                .map(|caption| strip_suffix(&caption, TEAM_CAPTION_SUFFIX))
                .filter(|s| !s.is_empty());

            for row in table.select(&BODY_ROW) {
                if is_header_row(row) {
                    continue;
                }
                let player_id = row_player_id(row);
                let mut raw = RawPlayerRow::new(match_id, team.clone(), player_id.clone());

                if let Some(pid) = player_id.as_deref()
                    && !seen.insert(pid.to_string())
                {
                    provenance.rejected(ParseUnit::Player, match_id, Some(pid), DUPLICATE_PLAYER);
                    continue;
                }
                // The summary row names its player whatever tables are configured.
                if let Some(name) = row_player_name(row) {
                    raw.offer(PLAYER_FIELD, &name);
                }
                if let Some(pid) = player_id.as_deref() {
                    for source in &sources {
                        if let Some(cells) = source.get(pid) {
                            for (field, text) in cells {
                                raw.offer(*field, text);
                            }
                        }
                    }
                }

                match PlayerStatRecord::from_raw(&raw) {
                    Ok(record) => {
                        provenance.accepted(ParseUnit::Player, match_id, player_id.as_deref());
                        records.push(record);
                    }
                    Err(err) => {
                        warn!(
                            player_id = player_id.as_deref().unwrap_or(""),
                            error = %err,
                            "player row failed validation"
                        );
                        provenance.rejected(ParseUnit::Player, match_id, player_id.as_deref(), err);
                    }
                }
            }
        }

        debug!(
            accepted = records.len(),
            attempted = provenance.len(),
            "player stats extracted"
        );
        PlayerStatsExtraction {
            records,
            provenance,
        }
    }
}

/// Reads the named cells of one listing row. The flag is false when the
/// score cell has no parseable score.
fn read_listing_row(row: ElementRef<'_>) -> (RawMatch, bool) {
    let mut raw = RawMatch::default();
    let mut has_score = true;
    for cell in row.select(&CELL) {
        let stat = cell.value().attr("data-stat");
        match stat {
            Some("round") => raw.round = link_text(cell).or_else(|| cell_text(cell)),
            Some("date") => raw.date = cell_text(cell),
            Some("home_team") => raw.home = link_text(cell).or_else(|| cell_text(cell)),
            Some("away_team") => raw.away = link_text(cell).or_else(|| cell_text(cell)),
            Some("score") => match link_text(cell).filter(|s| is_score(s)) {
                Some(score) => raw.score = Some(score),
                None => has_score = false,
            },
            _ => {}
        }
        let is_report =
            stat == Some("match_report") || element_text(cell) == "Match Report";
        if is_report
            && raw.match_id.is_none()
            && let Some(id) = cell
                .select(&LINK)
                .next()
                .and_then(|a| a.value().attr("href"))
                .and_then(match_id_from_href)
        {
            raw.match_id = Some(id);
        }
    }
    (raw, has_score)
}

/// Player id -> `(field, text)` pairs from one stat table, in row order.
fn index_source_table(table: ElementRef<'_>) -> HashMap<String, Vec<(&'static str, String)>> {
    let mut out: HashMap<String, Vec<(&'static str, String)>> = HashMap::new();
    for row in table.select(&BODY_ROW) {
        let Some(pid) = row_player_id(row) else {
            continue;
        };
        let cells = out.entry(pid).or_default();
        for cell in row.select(&CELL) {
            let Some(field) = cell.value().attr("data-stat").and_then(mapped_field) else {
                continue;
            };
            cells.push((field, element_text(cell)));
        }
    }
    out
}

fn row_player_id(row: ElementRef<'_>) -> Option<String> {
    row.select(&HEADER_CELL)
        .next()
        .and_then(|th| th.value().attr(PLAYER_ID_ATTR))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn row_player_name(row: ElementRef<'_>) -> Option<String> {
    row.select(&CELL)
        .find(|cell| cell.value().attr("data-stat") == Some(PLAYER_FIELD))
        .and_then(cell_text)
}

fn is_header_row(row: ElementRef<'_>) -> bool {
    row.value()
        .classes()
        .any(|class| matches!(class, "thead" | "over_header" | "spacer"))
}

/// `"2023-2024 Premier League Scores & Fixtures"` -> season and competition.
pub fn split_heading(heading: &str) -> (String, String) {
    let heading = heading.trim();
    match heading.split_once(' ') {
        Some((season, rest)) => (
            season.to_string(),
            strip_suffix(rest.trim(), COMPETITION_SUFFIX),
        ),
        None => (heading.to_string(), String::new()),
    }
}

/// Path segment after `/en/matches/`, from a relative or absolute link.
pub fn match_id_from_href(href: &str) -> Option<String> {
    let (_, rest) = href.split_once(MATCH_PATH_PREFIX)?;
    let id = rest.split(['/', '?', '#']).next().unwrap_or_default().trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

fn is_score(text: &str) -> bool {
    text.chars().any(|ch| ch.is_ascii_digit())
}

fn strip_suffix(text: &str, suffix: &str) -> String {
    text.strip_suffix(suffix).unwrap_or(text).trim().to_string()
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn cell_text(cell: ElementRef<'_>) -> Option<String> {
    Some(element_text(cell)).filter(|s| !s.is_empty())
}

fn link_text(cell: ElementRef<'_>) -> Option<String> {
    cell.select(&LINK)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
}
