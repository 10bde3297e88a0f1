//! Classification of the free-text spans on a result card.
//!
//! A card shows its rating, category, address, opening hours, phone and
//! accessibility notes as loose spans. Each span runs through an ordered
//! list of named stages; a stage either claims the span or passes it on.
//! Spans nobody claims are candidates for category and address.

use crate::phone::is_phone_number;
use once_cell::sync::Lazy;
use prospector_core::ClassifierConfig;
use regex::Regex;

#[allow(clippy::expect_used)]
static RATING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\d(\.\d)?\s*(stars?)?\s*(\(\s*[\d,]+\s*\))?$|^\d(\.\d)?\s*stars?")
        .expect("valid rating regex")
});

#[allow(clippy::expect_used)]
static REVIEW_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\s*[\d,.]+k?\s*\)$").expect("valid review regex"));

#[allow(clippy::expect_used)]
static HOURS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d{1,2}(:\d{2})?\s*(am|pm)\b|\b\d{1,2}:\d{2}\b|\b24 hours\b|\bhours\b")
        .expect("valid hours regex")
});

const STOPLIST: [&str; 6] = ["open", "opens", "closed", "closes", "close", "wheelchair"];

const STREET_KEYWORDS: [&str; 22] = [
    "street", "st", "road", "rd", "avenue", "ave", "drive", "dr", "lane", "ln", "way",
    "crescent", "cres", "boulevard", "blvd", "highway", "hwy", "square", "place", "pl",
    "court", "ct",
];

/// What a claimed span turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Rating,
    Hours,
    Phone,
    /// Stoplisted status or accessibility text
    Noise,
}

/// Result of one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Classified(SpanKind),
    Pass,
}

/// One named step of the pipeline.
#[derive(Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    pub run: fn(&str) -> StageOutcome,
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("name", &self.name).finish()
    }
}

fn claim(matched: bool, kind: SpanKind) -> StageOutcome {
    if matched {
        StageOutcome::Classified(kind)
    } else {
        StageOutcome::Pass
    }
}

fn rating_stage(span: &str) -> StageOutcome {
    claim(RATING.is_match(span) || REVIEW_COUNT.is_match(span), SpanKind::Rating)
}

fn hours_stage(span: &str) -> StageOutcome {
    claim(HOURS.is_match(span), SpanKind::Hours)
}

fn phone_stage(span: &str) -> StageOutcome {
    claim(is_phone_number(span), SpanKind::Phone)
}

fn stoplist_stage(span: &str) -> StageOutcome {
    let lower = span.to_lowercase();
    let hit = words(&lower).any(|word| STOPLIST.contains(&word));
    claim(hit, SpanKind::Noise)
}

/// Default pipeline, in evaluation order.
pub const STAGES: [Stage; 4] = [
    Stage { name: "rating", run: rating_stage },
    Stage { name: "hours", run: hours_stage },
    Stage { name: "phone", run: phone_stage },
    Stage { name: "stoplist", run: stoplist_stage },
];

/// Run `span` through the pipeline; `None` means no stage claimed it.
#[must_use]
pub fn classify_span(span: &str) -> Option<SpanKind> {
    STAGES.iter().find_map(|stage| match (stage.run)(span) {
        StageOutcome::Classified(kind) => Some(kind),
        StageOutcome::Pass => None,
    })
}

fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

/// Whether `span` mentions a street type.
#[must_use]
pub fn has_street_keyword(span: &str) -> bool {
    words(&span.to_lowercase()).any(|word| STREET_KEYWORDS.contains(&word))
}

/// Thresholds for category/address selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierThresholds {
    pub max_category_words: usize,
    pub min_address_len: usize,
}

impl From<&ClassifierConfig> for ClassifierThresholds {
    fn from(config: &ClassifierConfig) -> Self {
        Self {
            max_category_words: config.max_category_words,
            min_address_len: config.min_address_len,
        }
    }
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self::from(&ClassifierConfig::default())
    }
}

/// Fields recovered from a card's spans.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CardFields {
    pub category: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

/// Split raw span texts on the `·` separator into trimmed, unique pieces.
#[must_use]
pub fn split_spans<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    for text in raw {
        for piece in text.split('·') {
            let piece = piece.trim();
            if !piece.is_empty() && !pieces.iter().any(|p| p == piece) {
                pieces.push(piece.to_string());
            }
        }
    }
    pieces
}

/// Pick category, address and phone out of a card's spans.
///
/// The first unclaimed span of at most `max_category_words` words without a
/// street keyword is the category. The first other unclaimed span with a
/// street keyword, or longer than `min_address_len`, is the address.
#[must_use]
pub fn classify_spans(spans: &[String], thresholds: ClassifierThresholds) -> CardFields {
    let mut fields = CardFields::default();

    for span in spans {
        match classify_span(span) {
            Some(SpanKind::Phone) => {
                if fields.phone.is_none() {
                    fields.phone = Some(span.clone());
                }
            }
            Some(_) => {}
            None => {
                let street = has_street_keyword(span);
                let word_count = span.split_whitespace().count();
                if fields.category.is_none() && !street && word_count <= thresholds.max_category_words {
                    fields.category = Some(span.clone());
                } else if fields.address.is_none()
                    && (street || span.chars().count() > thresholds.min_address_len)
                {
                    fields.address = Some(span.clone());
                }
            }
        }
    }

    fields
}
