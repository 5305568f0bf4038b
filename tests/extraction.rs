use std::fs;
use std::path::PathBuf;

use chrono::{NaiveDate, TimeZone, Utc};

use fbref_ingest::config::IngestConfig;
use fbref_ingest::document::Document;
use fbref_ingest::error::ExtractError;
use fbref_ingest::extract::{DUPLICATE_MATCH, DUPLICATE_PLAYER, NO_SCORE, RecordExtractor};
use fbref_ingest::provenance::ParseUnit;

const LISTING_URL: &str =
    "https://fbref.test/en/comps/9/2023-2024/schedule/2023-2024-Premier-League-Scores-and-Fixtures";

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn fixture_doc(url: &str, name: &str) -> Document {
    let fetched_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    Document::new(url, fetched_at, read_fixture(name))
}

fn extractor() -> RecordExtractor {
    RecordExtractor::from_config(&IngestConfig::default())
}

#[test]
fn listing_yields_played_matches_in_page_order() {
    let doc = fixture_doc(LISTING_URL, "schedule.html");
    let out = extractor().extract_matches(&doc).expect("listing should parse");

    assert_eq!(out.season, "2023-2024");
    assert_eq!(out.competition, "Premier League");

    let ids: Vec<&str> = out.records.iter().map(|m| m.match_id.as_str()).collect();
    assert_eq!(ids, vec!["3a6836b4", "e0bd5d5c", "1c3b8e6f"]);

    let first = &out.records[0];
    assert_eq!(first.round.as_deref(), Some("Matchweek 1"));
    assert_eq!(first.date, NaiveDate::from_ymd_opt(2023, 8, 11).unwrap());
    assert_eq!(first.home, "Burnley");
    assert_eq!(first.score, "0–3");
    assert_eq!(first.away, "Manchester City");
    assert_eq!(first.season, "2023-2024");
    assert_eq!(first.competition, "Premier League");

    assert_eq!(out.records[1].round, None);
    assert_eq!(out.records[1].away, "Nott'ham Forest");
}

#[test]
fn listing_logs_every_attempted_row() {
    let doc = fixture_doc(LISTING_URL, "schedule.html");
    let out = extractor().extract_matches(&doc).expect("listing should parse");
    let entries = out.provenance.entries();

    // Three accepted, one duplicate, one bad date, one unplayed. The
    // head-to-head row has no match id and is not logged.
    assert_eq!(entries.len(), 6);
    assert!(entries.iter().all(|e| e.unit == ParseUnit::Match));
    assert!(entries.iter().all(|e| e.fetched_at == doc.fetched_at));
    assert!(entries.iter().all(|e| e.player_id.is_none()));

    let failures: Vec<(&str, &str)> = out
        .provenance
        .failures()
        .map(|e| (e.match_id.as_str(), e.error.as_deref().unwrap_or_default()))
        .collect();
    assert_eq!(failures.len(), 3);
    assert!(failures.contains(&("e0bd5d5c", DUPLICATE_MATCH)));
    assert!(failures.contains(&("0f8a1c2d", NO_SCORE)));

    let (_, bad_date) = failures
        .iter()
        .find(|(id, _)| *id == "b7d2e6a0")
        .expect("bad date row should be logged");
    assert!(bad_date.contains("date"), "{bad_date}");
    assert!(bad_date.contains("August 13"), "{bad_date}");

    let accepted = entries.iter().filter(|e| e.is_success()).count();
    assert_eq!(accepted, out.records.len());
}

#[test]
fn listing_without_schedule_table_is_an_error() {
    let fetched_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let doc = Document::new(
        LISTING_URL,
        fetched_at,
        "<html><body><div id=\"meta\"><h1>2023-2024 Premier League Scores &amp; Fixtures</h1></div></body></html>",
    );
    let err = extractor().extract_matches(&doc).unwrap_err();
    let ExtractError::MissingElement { url, element } = err;
    assert_eq!(url, LISTING_URL);
    assert!(element.contains("#all_sched"));
}

#[test]
fn listing_without_heading_is_an_error() {
    let fetched_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let doc = Document::new(
        LISTING_URL,
        fetched_at,
        "<html><body><div id=\"all_sched\"><table><tbody></tbody></table></div></body></html>",
    );
    assert!(matches!(
        extractor().extract_matches(&doc),
        Err(ExtractError::MissingElement { element, .. }) if element.contains("#meta")
    ));
}

#[test]
fn player_rows_join_every_source_table() {
    let doc = fixture_doc("https://fbref.test/en/matches/3a6836b4", "match_detail.html");
    let out = extractor().extract_player_stats(&doc, "3a6836b4");

    let names: Vec<&str> = out.records.iter().map(|r| r.player.as_str()).collect();
    assert_eq!(
        names,
        vec!["Lyle Foster", "Josh Brownhill", "Erling Haaland", "Rodri", "Jérémy Doku"]
    );
    assert!(out.records.iter().all(|r| r.match_id == "3a6836b4"));

    let foster = &out.records[0];
    assert_eq!(foster.team, "Burnley");
    assert_eq!(foster.player_id, "a1b2c3d4");
    assert_eq!(foster.minutes, Some(90));
    assert_eq!(foster.shots_on_target, Some(1));
    assert_eq!(foster.xg, Some(0.3));
    assert_eq!(foster.passes_completed, Some(12));
    assert_eq!(foster.passes_progressive_distance, Some(1204));
    assert_eq!(foster.carries, Some(10));
    assert_eq!(foster.take_ons_won, Some(1));
    // The page has no defense table.
    assert_eq!(foster.tackles, None);

    let haaland = &out.records[2];
    assert_eq!(haaland.team, "Manchester City");
    assert_eq!(haaland.goals, Some(2));
    assert_eq!(haaland.fouled, Some(3));
}

#[test]
fn first_non_blank_value_wins_across_tables() {
    let doc = fixture_doc("https://fbref.test/en/matches/3a6836b4", "match_detail.html");
    let out = extractor().extract_player_stats(&doc, "3a6836b4");

    let foster = &out.records[0];
    assert_eq!(foster.touches, Some(30));

    let brownhill = &out.records[1];
    assert_eq!(brownhill.touches, Some(55));
    assert_eq!(brownhill.xg, None);
    assert_eq!(brownhill.cards_yellow, Some(1));

    let haaland = &out.records[2];
    assert_eq!(haaland.cards_yellow, Some(0));
}

#[test]
fn missing_values_stay_null() {
    let doc = fixture_doc("https://fbref.test/en/matches/3a6836b4", "match_detail.html");
    let out = extractor().extract_player_stats(&doc, "3a6836b4");

    let doku = &out.records[4];
    assert_eq!(doku.minutes, Some(12));
    assert_eq!(doku.xg, Some(0.0));
    assert_eq!(doku.passes, None);
    assert_eq!(doku.passes_completed, None);
    assert_eq!(doku.fouls, None);
}

#[test]
fn player_provenance_records_duplicates_and_rejects() {
    let doc = fixture_doc("https://fbref.test/en/matches/3a6836b4", "match_detail.html");
    let out = extractor().extract_player_stats(&doc, "3a6836b4");
    let entries = out.provenance.entries();

    assert_eq!(entries.len(), 7);
    assert!(entries.iter().all(|e| e.unit == ParseUnit::Player));
    assert!(entries.iter().all(|e| e.match_id == "3a6836b4"));

    let failures: Vec<_> = out.provenance.failures().collect();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].player_id.as_deref(), Some("1f44ac21"));
    assert_eq!(failures[0].error.as_deref(), Some(DUPLICATE_PLAYER));
    assert_eq!(failures[1].player_id, None);
    assert!(
        failures[1]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("player"))
    );
}

#[test]
fn narrower_table_selection_leaves_other_columns_null() {
    let doc = fixture_doc("https://fbref.test/en/matches/3a6836b4", "match_detail.html");
    let out = RecordExtractor::new(vec!["summary".to_string()]).extract_player_stats(&doc, "3a6836b4");

    assert_eq!(out.records.len(), 5);
    let foster = &out.records[0];
    assert_eq!(foster.goals, Some(0));
    assert_eq!(foster.passes, None);
    assert_eq!(foster.carries, None);
}

#[test]
fn detail_page_without_tables_yields_nothing() {
    let fetched_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let doc = Document::new("https://fbref.test/en/matches/x", fetched_at, "<html></html>");
    let out = extractor().extract_player_stats(&doc, "x");
    assert!(out.records.is_empty());
    assert!(out.provenance.is_empty());
}

#[test]
fn extraction_is_deterministic() {
    let listing = fixture_doc(LISTING_URL, "schedule.html");
    let detail = fixture_doc("https://fbref.test/en/matches/3a6836b4", "match_detail.html");
    let extractor = extractor();

    let a = extractor.extract_matches(&listing).unwrap();
    let b = extractor.extract_matches(&listing).unwrap();
    assert_eq!(a.records, b.records);
    assert_eq!(a.provenance, b.provenance);

    let a = extractor.extract_player_stats(&detail, "3a6836b4");
    let b = extractor.extract_player_stats(&detail, "3a6836b4");
    assert_eq!(a.records, b.records);
    assert_eq!(a.provenance, b.provenance);
}

#[test]
fn summary_row_names_player_without_summary_marker() {
    let fetched_at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
    let body = r#"<html><body>
        <table id="stats_aaaa0001_summary">
          <caption>Arsenal Player Stats Table</caption>
          <tbody>
            <tr>
              <th data-stat="player" data-append-csv="p1"><a href="/en/players/p1/Bukayo-Saka">Bukayo Saka</a></th>
              <td data-stat="minutes">90</td>
            </tr>
          </tbody>
        </table>
    </body></html>"#;
    let doc = Document::new("https://fbref.test/en/matches/m1", fetched_at, body);
    let out = RecordExtractor::new(vec!["passing".to_string()]).extract_player_stats(&doc, "m1");

    assert_eq!(out.records.len(), 1);
    assert_eq!(out.provenance.failures().count(), 0);
    let saka = &out.records[0];
    assert_eq!(saka.player, "Bukayo Saka");
    assert_eq!(saka.player_id, "p1");
    assert_eq!(saka.team, "Arsenal");
    // Stats come only from configured source tables.
    assert_eq!(saka.minutes, None);
    assert_eq!(saka.passes, None);
}
