//! Phone number detection on a business detail page.
//!
//! Strategies run in order and the first plausible number wins:
//! attributes (`tel:` links, phone data attributes, `aria-label`), button
//! text, then every text node of the document.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// Fewest digits a phone number can have.
pub const MIN_PHONE_DIGITS: usize = 9;
/// Most digits a phone number can have.
pub const MAX_PHONE_DIGITS: usize = 15;

#[allow(clippy::expect_used)]
static CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\(?\d[\d\s().-]{6,}\d").expect("valid phone regex"));

#[allow(clippy::expect_used)]
static WHOLE_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[\d\s().-]+$").expect("valid phone regex"));

#[allow(clippy::expect_used)]
static TEL_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"a[href^="tel:"]"#).expect("valid selector"));

#[allow(clippy::expect_used)]
static DATA_PHONE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-phone], [data-item-id^="phone"]"#).expect("valid selector")
});

#[allow(clippy::expect_used)]
static ARIA_LABEL: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[aria-label]").expect("valid selector"));

#[allow(clippy::expect_used)]
static BUTTON: Lazy<Selector> = Lazy::new(|| Selector::parse("button").expect("valid selector"));

/// Which strategy found the number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhoneStrategy {
    Attribute,
    ButtonText,
    DocumentText,
}

/// Outcome of the fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneMatch {
    Found {
        number: String,
        strategy: PhoneStrategy,
    },
    NotFound,
}

impl PhoneMatch {
    /// The number, or an empty string when nothing was found.
    #[must_use]
    pub fn into_number(self) -> String {
        match self {
            Self::Found { number, .. } => number,
            Self::NotFound => String::new(),
        }
    }
}

type Strategy = fn(&Html) -> Option<String>;

const STRATEGIES: [(PhoneStrategy, Strategy); 3] = [
    (PhoneStrategy::Attribute, from_attributes),
    (PhoneStrategy::ButtonText, from_buttons),
    (PhoneStrategy::DocumentText, from_document_text),
];

/// Run the fallback chain over a parsed document.
#[must_use]
pub fn find_phone(document: &Html) -> PhoneMatch {
    for (strategy, run) in STRATEGIES {
        if let Some(number) = run(document) {
            tracing::trace!(?strategy, "phone number found");
            return PhoneMatch::Found { number, strategy };
        }
    }
    PhoneMatch::NotFound
}

fn digit_count(text: &str) -> usize {
    text.chars().filter(char::is_ascii_digit).count()
}

/// Whether `text` as a whole reads as a phone number.
#[must_use]
pub fn is_phone_number(text: &str) -> bool {
    let text = text.trim();
    WHOLE_NUMBER.is_match(text)
        && (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digit_count(text))
}

/// First plausible phone number inside free text.
#[must_use]
pub fn extract_phone(text: &str) -> Option<String> {
    CANDIDATE
        .find_iter(text)
        .map(|m| m.as_str().trim())
        .find(|candidate| (MIN_PHONE_DIGITS..=MAX_PHONE_DIGITS).contains(&digit_count(candidate)))
        .map(str::to_string)
}

fn from_attributes(document: &Html) -> Option<String> {
    let tel = document
        .select(&TEL_LINK)
        .filter_map(|el| el.value().attr("href"))
        .find_map(|href| extract_phone(href.trim_start_matches("tel:")));
    if tel.is_some() {
        return tel;
    }

    let data = document.select(&DATA_PHONE).find_map(|el| {
        let value = el.value();
        value
            .attr("data-phone")
            .and_then(extract_phone)
            // data-item-id="phone:tel:0115550100"
            .or_else(|| value.attr("data-item-id").and_then(|id| extract_phone(id.rsplit(':').next()?)))
    });
    if data.is_some() {
        return data;
    }

    document
        .select(&ARIA_LABEL)
        .filter_map(|el| el.value().attr("aria-label"))
        .find_map(extract_phone)
}

fn from_buttons(document: &Html) -> Option<String> {
    document.select(&BUTTON).find_map(|button| {
        let text: String = button.text().collect::<Vec<_>>().join(" ");
        extract_phone(&text)
    })
}

fn from_document_text(document: &Html) -> Option<String> {
    document.root_element().text().find_map(extract_phone)
}
