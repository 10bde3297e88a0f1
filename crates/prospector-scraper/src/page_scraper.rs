//! Extraction of business records from one maps page.
//!
//! A scrape walks `navigate -> detect mode -> extract -> (scroll -> extract)*`.
//! DOM work happens on HTML snapshots taken with [`PageHandle::content`], so
//! the parsing functions here are plain synchronous code over strings.

use crate::classify::{classify_spans, split_spans, ClassifierThresholds};
use crate::error::{Result, ScrapeError};
use crate::error_log::{ErrorCategory, ErrorContext, ErrorLogger};
use crate::phone::{find_phone, PhoneMatch};
use crate::url_builder::{build_search_url, resolve_listing_url, search_query};
use prospector_browser::actions::{scroll_to_bottom_script, wait_for_any};
use prospector_browser::PageHandle;
use prospector_core::{BusinessRecord, ClassifierConfig, ScrapingConfig, SiteConfig};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Consecutive scrolls without new results before the feed is considered exhausted.
pub const MAX_STALE_SCROLLS: u32 = 3;

const READY_POLL_MS: u64 = 250;

/// What to scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeTarget {
    /// Every listing for an industry in a town
    Industry { town: String, industry: String },
    /// A single business looked up by name or phrase
    Lookup { query: String },
}

impl ScrapeTarget {
    #[must_use]
    pub fn industry(town: &str, industry: &str) -> Self {
        Self::Industry {
            town: town.to_string(),
            industry: industry.to_string(),
        }
    }

    #[must_use]
    pub fn lookup(query: &str) -> Self {
        Self::Lookup {
            query: query.to_string(),
        }
    }

    /// The search phrase sent to the maps site.
    #[must_use]
    pub fn query(&self) -> String {
        match self {
            Self::Industry { town, industry } => search_query(industry, town),
            Self::Lookup { query } => query.trim().to_string(),
        }
    }

    fn town(&self) -> &str {
        match self {
            Self::Industry { town, .. } => town,
            Self::Lookup { .. } => "",
        }
    }

    fn industry_name(&self) -> &str {
        match self {
            Self::Industry { industry, .. } => industry,
            Self::Lookup { .. } => "",
        }
    }

    fn new_record(&self, name: &str, map_url: &str) -> BusinessRecord {
        let mut record = BusinessRecord::new(name.trim(), map_url, self.town(), self.industry_name());
        if let Self::Lookup { query } = self {
            record.notes = format!("lookup: {}", query.trim());
        }
        record
    }

    fn context(&self) -> ErrorContext {
        match self {
            Self::Industry { town, industry } => ErrorContext::new().town(town).industry(industry),
            Self::Lookup { query } => ErrorContext::new().with("query", query),
        }
    }
}

/// Layout of a loaded page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageMode {
    /// Scrollable list of result cards
    List,
    /// A single business panel
    Details,
    /// Neither marker appeared
    Unknown,
}

/// Compiled selectors for the maps site.
#[derive(Debug)]
pub struct SelectorSet {
    site: SiteConfig,
    result_card: Selector,
    card_link: Selector,
    card_name: Selector,
    card_detail_spans: Selector,
    end_of_list: Selector,
    detail_name: Selector,
    detail_address: Selector,
    detail_category: Selector,
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| ScrapeError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl SelectorSet {
    /// Parse every selector of `site`.
    pub fn compile(site: &SiteConfig) -> Result<Self> {
        // Selectors only probed through the page are still checked here
        compile(&site.results_feed)?;
        compile(&site.detail_panel)?;

        Ok(Self {
            site: site.clone(),
            result_card: compile(&site.result_card)?,
            card_link: compile(&site.card_link)?,
            card_name: compile(&site.card_name)?,
            card_detail_spans: compile(&site.card_detail_spans)?,
            end_of_list: compile(&site.end_of_list)?,
            detail_name: compile(&site.detail_name)?,
            detail_address: compile(&site.detail_address)?,
            detail_category: compile(&site.detail_category)?,
        })
    }

    #[must_use]
    pub fn site(&self) -> &SiteConfig {
        &self.site
    }
}

/// A card that could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardFailure {
    /// Position of the card in the snapshot
    pub index: usize,
    pub reason: String,
    /// Start of the card's text, used to recognise it across snapshots
    pub snippet: String,
}

/// Everything read from one snapshot of a results feed.
#[derive(Debug, Clone, Default)]
pub struct CardBatch {
    pub records: Vec<BusinessRecord>,
    pub failures: Vec<CardFailure>,
    /// Cards dropped for having no name
    pub unnamed: usize,
    /// The end-of-list marker is present
    pub end_of_list: bool,
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(scope: &ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .map(|el| element_text(&el))
        .find(|text| !text.is_empty())
}

enum CardOutcome {
    Record(BusinessRecord),
    Unnamed,
}

fn parse_card(
    card: &ElementRef<'_>,
    selectors: &SelectorSet,
    target: &ScrapeTarget,
    thresholds: ClassifierThresholds,
) -> std::result::Result<CardOutcome, String> {
    let link = card
        .select(&selectors.card_link)
        .next()
        .ok_or_else(|| "card has no listing link".to_string())?;
    let href = link
        .value()
        .attr("href")
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| "listing link has no href".to_string())?;
    let map_url = resolve_listing_url(&selectors.site.search_url, href.trim())
        .map_err(|e| format!("bad listing link {href}: {e}"))?;

    let name = first_text(card, &selectors.card_name)
        .or_else(|| link.value().attr("aria-label").map(str::to_string))
        .unwrap_or_default();
    if name.trim().is_empty() {
        return Ok(CardOutcome::Unnamed);
    }

    let texts: Vec<String> = card
        .select(&selectors.card_detail_spans)
        .map(|el| element_text(&el))
        .collect();
    let spans: Vec<String> = split_spans(texts.iter().map(String::as_str))
        .into_iter()
        .filter(|span| span != name.trim())
        .collect();
    let fields = classify_spans(&spans, thresholds);

    let mut record = target.new_record(&name, &map_url);
    record.phone = fields.phone.unwrap_or_default();
    record.address = fields.address;
    record.category = fields.category;
    Ok(CardOutcome::Record(record))
}

/// Parse every result card in a feed snapshot.
///
/// Cards are independent: a card that fails is reported in `failures` and
/// the rest still produce records. Cards without a name are dropped.
#[must_use]
pub fn parse_cards(
    html: &str,
    selectors: &SelectorSet,
    target: &ScrapeTarget,
    thresholds: ClassifierThresholds,
) -> CardBatch {
    let document = Html::parse_document(html);
    let mut batch = CardBatch {
        end_of_list: document.select(&selectors.end_of_list).next().is_some(),
        ..CardBatch::default()
    };

    for (index, card) in document.select(&selectors.result_card).enumerate() {
        match parse_card(&card, selectors, target, thresholds) {
            Ok(CardOutcome::Record(record)) => batch.records.push(record),
            Ok(CardOutcome::Unnamed) => batch.unnamed += 1,
            Err(reason) => {
                let snippet: String = element_text(&card).chars().take(80).collect();
                batch.failures.push(CardFailure {
                    index,
                    reason,
                    snippet,
                });
            }
        }
    }

    batch
}

/// Read a single-business panel. `None` when it has no name.
#[must_use]
pub fn parse_details(
    html: &str,
    selectors: &SelectorSet,
    target: &ScrapeTarget,
    page_url: &str,
) -> Option<(BusinessRecord, PhoneMatch)> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let name = first_text(&root, &selectors.detail_name)?;
    if name.trim().is_empty() {
        return None;
    }

    let phone = find_phone(&document);
    let mut record = target.new_record(&name, page_url);
    record.phone = phone.clone().into_number();
    record.address = first_text(&root, &selectors.detail_address);
    record.category = first_text(&root, &selectors.detail_category);
    Some((record, phone))
}

/// Drives one page through a scrape.
#[derive(Debug)]
pub struct PageScraper {
    selectors: SelectorSet,
    thresholds: ClassifierThresholds,
    navigation_timeout: Duration,
    scroll_wait: Duration,
    max_scrolls: u32,
    max_lookup_results: usize,
    errors: Arc<ErrorLogger>,
}

impl PageScraper {
    pub fn new(
        site: &SiteConfig,
        classifier: &ClassifierConfig,
        scraping: &ScrapingConfig,
        errors: Arc<ErrorLogger>,
    ) -> Result<Self> {
        Ok(Self {
            selectors: SelectorSet::compile(site)?,
            thresholds: ClassifierThresholds::from(classifier),
            navigation_timeout: Duration::from_millis(scraping.navigation_timeout_ms),
            scroll_wait: Duration::from_millis(scraping.scroll_wait_ms),
            max_scrolls: scraping.max_scrolls,
            max_lookup_results: scraping.max_lookup_results,
            errors,
        })
    }

    /// Scrape `target` on `page`.
    ///
    /// Navigation failures and a missing results feed (industry mode) are
    /// errors; individual cards that fail are logged and skipped.
    pub async fn scrape(
        &self,
        page: &dyn PageHandle,
        target: &ScrapeTarget,
    ) -> Result<Vec<BusinessRecord>> {
        let query = target.query();
        let url = build_search_url(&self.selectors.site.search_url, &query)?;

        page.goto(&url, self.navigation_timeout)
            .await
            .map_err(|e| ScrapeError::Navigation {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let mode = self.detect_mode(page).await?;
        tracing::debug!(%query, ?mode, "page loaded");

        match (target, mode) {
            (ScrapeTarget::Industry { .. }, PageMode::List) => {
                self.extract_list(page, target, None).await
            }
            (ScrapeTarget::Industry { .. }, _) => Err(ScrapeError::FeedNotFound { query }),
            (ScrapeTarget::Lookup { .. }, PageMode::List) => {
                self.extract_list(page, target, Some(self.max_lookup_results))
                    .await
            }
            (ScrapeTarget::Lookup { .. }, PageMode::Details) => {
                Ok(self.extract_details(page, target, &url).await?.into_iter().collect())
            }
            (ScrapeTarget::Lookup { .. }, PageMode::Unknown) => {
                self.errors.log_warning(
                    ErrorCategory::Extraction,
                    &format!("No results or details panel for \"{query}\""),
                    target.context().operation("detect_mode"),
                );
                Ok(Vec::new())
            }
        }
    }

    async fn detect_mode(&self, page: &dyn PageHandle) -> Result<PageMode> {
        let site = &self.selectors.site;
        let ready = [site.results_feed.as_str(), site.detail_panel.as_str()];
        let found = wait_for_any(
            page,
            &ready,
            self.navigation_timeout,
            Duration::from_millis(READY_POLL_MS),
        )
        .await?;

        Ok(match found {
            Some(0) => PageMode::List,
            Some(_) => PageMode::Details,
            None => PageMode::Unknown,
        })
    }

    async fn extract_list(
        &self,
        page: &dyn PageHandle,
        target: &ScrapeTarget,
        limit: Option<usize>,
    ) -> Result<Vec<BusinessRecord>> {
        let mut records = Vec::new();
        let mut seen_urls = HashSet::new();
        let mut reported = HashSet::new();
        let mut scrolls = 0;
        let mut stale = 0;
        let scroll_script = scroll_to_bottom_script(&self.selectors.site.results_feed);

        loop {
            let html = page.content().await?;
            let batch = parse_cards(&html, &self.selectors, target, self.thresholds);

            for failure in batch.failures {
                if reported.insert((failure.index, failure.snippet.clone())) {
                    self.errors.log_extraction_error(
                        "Failed to parse result card",
                        failure.reason,
                        target
                            .context()
                            .operation("parse_card")
                            .with("card_index", failure.index),
                    );
                }
            }

            let mut fresh = 0;
            for record in batch.records {
                if seen_urls.insert(record.map_url.clone()) {
                    records.push(record);
                    fresh += 1;
                }
            }

            if let Some(limit) = limit {
                if records.len() >= limit {
                    records.truncate(limit);
                    break;
                }
            }
            if batch.end_of_list || scrolls >= self.max_scrolls {
                break;
            }
            if fresh == 0 {
                stale += 1;
                if stale >= MAX_STALE_SCROLLS {
                    break;
                }
            } else {
                stale = 0;
            }

            if let Err(e) = page.evaluate(&scroll_script).await {
                self.errors.log_warning(
                    ErrorCategory::Browser,
                    &format!("Scrolling the results feed failed: {e}"),
                    target.context().operation("scroll"),
                );
                break;
            }
            scrolls += 1;
            tokio::time::sleep(self.scroll_wait).await;
        }

        tracing::debug!(query = %target.query(), count = records.len(), scrolls, "feed extracted");
        Ok(records)
    }

    async fn extract_details(
        &self,
        page: &dyn PageHandle,
        target: &ScrapeTarget,
        url: &str,
    ) -> Result<Option<BusinessRecord>> {
        let html = page.content().await?;
        let Some((record, phone)) = parse_details(&html, &self.selectors, target, url) else {
            tracing::debug!(query = %target.query(), "details panel without a name, discarded");
            return Ok(None);
        };

        if phone == PhoneMatch::NotFound {
            self.errors.log_warning(
                ErrorCategory::Extraction,
                &format!("No phone number found for {}", record.name),
                target.context().operation("extract_phone"),
            );
        }
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> SelectorSet {
        SelectorSet::compile(&SiteConfig::default()).unwrap()
    }

    fn card(name: &str, href: &str, spans: &str) -> String {
        format!(
            r#"<div role="article"><a href="{href}" aria-label="{name}"></a><div class="card-name">{name}</div>{spans}</div>"#
        )
    }

    fn feed(cards: &[String], end: bool) -> String {
        let marker = if end { r#"<p class="end-of-list">You've reached the end of the list.</p>"# } else { "" };
        format!(
            r#"<html><body><div role="feed">{}</div>{marker}</body></html>"#,
            cards.join("")
        )
    }

    fn target() -> ScrapeTarget {
        ScrapeTarget::industry("Springs", "plumbers")
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let site = SiteConfig {
            result_card: "div[[".to_string(),
            ..SiteConfig::default()
        };
        assert!(matches!(
            SelectorSet::compile(&site),
            Err(ScrapeError::Selector { .. })
        ));
    }

    #[test]
    fn test_parse_cards_fields() {
        let html = feed(
            &[card(
                "Acme Plumbing",
                "/maps/place/acme",
                "<span>4.7(31)</span><span>Plumber · 12 Main Road</span><span>Open · Closes 5 pm</span><span>011 555 0100</span>",
            )],
            true,
        );
        let batch = parse_cards(&html, &selectors(), &target(), ClassifierThresholds::default());

        assert!(batch.end_of_list);
        assert!(batch.failures.is_empty());
        let record = &batch.records[0];
        assert_eq!(record.name, "Acme Plumbing");
        assert_eq!(record.map_url, "https://www.google.com/maps/place/acme");
        assert_eq!(record.category.as_deref(), Some("Plumber"));
        assert_eq!(record.address.as_deref(), Some("12 Main Road"));
        assert_eq!(record.phone, "011 555 0100");
        assert_eq!(record.town, "Springs");
        assert_eq!(record.industry, "plumbers");
        assert!(record.provider.is_none());
    }

    #[test]
    fn test_unnamed_cards_dropped() {
        let html = feed(
            &[
                card("   ", "/maps/place/blank", ""),
                card("Best Drains", "/maps/place/best", ""),
            ],
            false,
        );
        let batch = parse_cards(&html, &selectors(), &target(), ClassifierThresholds::default());

        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.unnamed, 1);
        assert!(batch.failures.is_empty());
        assert!(batch.records.iter().all(BusinessRecord::has_name));
    }

    #[test]
    fn test_card_failures_isolated() {
        let broken = r#"<div role="article"><div class="card-name">No Link Co</div></div>"#.to_string();
        let html = feed(
            &[
                card("One", "/maps/place/1", ""),
                broken.clone(),
                card("Two", "/maps/place/2", ""),
                broken,
                card("Three", "/maps/place/3", ""),
            ],
            false,
        );
        let batch = parse_cards(&html, &selectors(), &target(), ClassifierThresholds::default());

        assert_eq!(batch.records.len(), 3);
        assert_eq!(batch.failures.len(), 2);
        assert_eq!(batch.failures[0].index, 1);
        assert_eq!(batch.failures[0].reason, "card has no listing link");
    }

    #[test]
    fn test_parse_details() {
        let html = r#"<div role="main"><h1>Acme Plumbing</h1>
            <button data-item-id="address">12 Main Road, Springs</button>
            <button jsaction="pane.category">Plumber</button>
            <a href="tel:0115550100">Call</a></div>"#;
        let (record, phone) = parse_details(
            html,
            &selectors(),
            &ScrapeTarget::lookup("Acme Plumbing Springs"),
            "https://maps.example/search?query=acme",
        )
        .unwrap();

        assert_eq!(record.name, "Acme Plumbing");
        assert_eq!(record.phone, "0115550100");
        assert_eq!(record.address.as_deref(), Some("12 Main Road, Springs"));
        assert_eq!(record.category.as_deref(), Some("Plumber"));
        assert_eq!(record.notes, "lookup: Acme Plumbing Springs");
        assert!(matches!(phone, PhoneMatch::Found { .. }));
    }

    #[test]
    fn test_parse_details_without_name() {
        let html = r#"<div role="main"><h1>  </h1></div>"#;
        assert!(parse_details(html, &selectors(), &ScrapeTarget::lookup("x"), "u").is_none());
    }

    #[test]
    fn test_target_query() {
        assert_eq!(target().query(), "plumbers in Springs");
        assert_eq!(ScrapeTarget::lookup(" Acme ").query(), "Acme");
    }
}
