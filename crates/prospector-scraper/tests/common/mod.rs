//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use prospector_browser::ReplayDriver;
use prospector_core::ScrapingConfig;
use prospector_scraper::{LookupError, LookupResult, ProviderLookup, ScrapeEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

pub fn card(name: &str, href: &str, phone: &str) -> String {
    format!(
        r#"<div role="article"><a href="{href}"></a><div class="card-name">{name}</div><span>Plumber · 12 Main Road</span><span>{phone}</span></div>"#
    )
}

pub fn feed(cards: &[String]) -> String {
    format!(
        r#"<html><body><div role="feed">{}</div><p class="end-of-list">You've reached the end of the list.</p></body></html>"#,
        cards.concat()
    )
}

/// Phone number of listing `n` in `town`/`industry`, unique per listing.
pub fn phone_for(town_idx: usize, industry_idx: usize, n: usize) -> String {
    format!("011 5{town_idx}{industry_idx} 01{n:02}")
}

/// A driver with `per_industry` listings for every town/industry pair.
pub fn replay_grid(towns: &[&str], industries: &[&str], per_industry: usize) -> ReplayDriver {
    let mut driver = ReplayDriver::new();
    for (t, town) in towns.iter().enumerate() {
        for (i, industry) in industries.iter().enumerate() {
            let cards: Vec<String> = (0..per_industry)
                .map(|n| {
                    card(
                        &format!("{town} {industry} {n}"),
                        &format!("/maps/place/{t}-{i}-{n}"),
                        &phone_for(t, i, n),
                    )
                })
                .collect();
            driver = driver.route(&format!("{industry} in {town}"), vec![feed(&cards)]);
        }
    }
    driver
}

pub fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Settings that keep the replayed runs fast.
pub fn fast_config() -> ScrapingConfig {
    ScrapingConfig {
        simultaneous_towns: 2,
        simultaneous_industries: 2,
        retry_attempts: 2,
        retry_delay_ms: 5,
        navigation_timeout_ms: 200,
        scroll_wait_ms: 5,
        stop_timeout_secs: 5,
        ..ScrapingConfig::default()
    }
}

/// Provider backend answering from a fixed table; unknown numbers are `NotFound`.
#[derive(Default)]
pub struct TableLookup {
    providers: HashMap<String, String>,
    pub calls: AtomicUsize,
    pub closes: AtomicUsize,
}

impl TableLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(entries: Vec<(String, String)>) -> Self {
        Self {
            providers: entries.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderLookup for TableLookup {
    async fn lookup(&self, phone: &str) -> LookupResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.providers
            .get(phone)
            .cloned()
            .ok_or_else(|| LookupError::NotFound(phone.to_string()))
    }

    async fn close(&self) -> LookupResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Everything currently queued on the receiver.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<ScrapeEvent>) -> Vec<ScrapeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
