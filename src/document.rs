use chrono::{DateTime, Utc};
use scraper::Html;

/// A fetched page, kept as text so it can be cloned and re-parsed.
#[derive(Debug, Clone)]
pub struct Document {
    pub url: String,
    pub fetched_at: DateTime<Utc>,
    pub body: String,
}

impl Document {
    pub fn new(url: impl Into<String>, fetched_at: DateTime<Utc>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fetched_at,
            body: body.into(),
        }
    }

    pub fn parse(&self) -> Html {
        Html::parse_document(&self.body)
    }
}
