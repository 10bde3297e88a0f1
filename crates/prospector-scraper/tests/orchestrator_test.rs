mod common;

use async_trait::async_trait;
use common::{card, drain, fast_config, feed, names, phone_for, replay_grid, TableLookup};
use prospector_browser::{BrowserDriver, BrowserHandle, LaunchOptions, ReplayDriver};
use prospector_core::{ScrapingConfig, UNKNOWN_PROVIDER};
use prospector_db::{businesses, session_logs, sessions, Database, SessionStatus};
use prospector_scraper::{
    ChannelEventSink, ErrorCategory, LookupError, LookupResult, NullEventSink, OrchestratorError,
    ProviderLookup, RunStatus, ScrapeEvent, ScrapingOrchestrator, Severity, TownStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const TOWNS: [&str; 3] = ["Springs", "Benoni", "Brakpan"];
const INDUSTRIES: [&str; 2] = ["plumbers", "bakeries"];

fn orchestrator(driver: ReplayDriver, lookup: Arc<TableLookup>) -> ScrapingOrchestrator {
    ScrapingOrchestrator::new(Arc::new(driver), lookup, Arc::new(NullEventSink))
}

fn urls(records: &[prospector_core::BusinessRecord]) -> HashSet<String> {
    records.iter().map(|r| r.map_url.clone()).collect()
}

/// Provider backend that is down, either at `prepare` or on every number.
struct OfflineLookup {
    fail_prepare: bool,
}

#[async_trait]
impl ProviderLookup for OfflineLookup {
    async fn prepare(&self) -> LookupResult<()> {
        if self.fail_prepare {
            return Err(LookupError::Unavailable("lookup site unreachable".to_string()));
        }
        Ok(())
    }

    async fn lookup(&self, _phone: &str) -> LookupResult<String> {
        Err(LookupError::Unavailable("lookup site unreachable".to_string()))
    }
}

/// Driver whose launch panics, taking its worker task down.
struct CrashingDriver;

#[async_trait]
impl BrowserDriver for CrashingDriver {
    async fn launch(
        &self,
        _options: &LaunchOptions,
    ) -> prospector_browser::Result<Box<dyn BrowserHandle>> {
        panic!("browser driver crashed");
    }
}

#[tokio::test]
async fn test_full_run_collects_every_town() {
    let driver = replay_grid(&TOWNS, &INDUSTRIES, 5);
    let stats = driver.stats();
    let lookup = Arc::new(TableLookup::new());
    let orchestrator = orchestrator(driver, Arc::clone(&lookup));

    let outcome = orchestrator
        .run(names(&TOWNS), names(&INDUSTRIES), fast_config())
        .await
        .expect("run");

    assert_eq!(outcome.records.len(), 30);
    assert_eq!(urls(&outcome.records).len(), 30);
    assert!(!outcome.stopped);
    assert_eq!(outcome.summary.total_towns, 3);
    assert_eq!(outcome.summary.completed_towns, 3);
    assert_eq!(outcome.summary.total_businesses, 30);
    assert_eq!(outcome.summary.total_errors, 0);

    assert_eq!(orchestrator.status(), RunStatus::Idle);
    assert_eq!(stats.open_browsers(), 0);
    assert_eq!(stats.open_pages(), 0);
    // One browser per town, closed once the town is done
    assert_eq!(stats.launches(), 3);

    let progress = orchestrator.progress().expect("progress");
    assert_eq!(progress.completed_towns, 3);
    assert!((progress.percentage - 100.0).abs() < f64::EPSILON);
    assert_eq!(progress.records_scraped, 30);
}

#[tokio::test]
async fn test_town_failure_does_not_abort_run() {
    let driver = replay_grid(&TOWNS, &INDUSTRIES, 5).fail_launches(1);
    let (sink, mut rx) = ChannelEventSink::new();
    let orchestrator = ScrapingOrchestrator::new(
        Arc::new(driver),
        Arc::new(TableLookup::new()),
        Arc::new(sink),
    );
    let config = ScrapingConfig {
        simultaneous_towns: 1,
        ..fast_config()
    };

    let outcome = orchestrator
        .run(names(&TOWNS), names(&INDUSTRIES), config)
        .await
        .expect("run");

    // The first town's launch was refused
    assert_eq!(outcome.records.len(), 20);
    assert!(outcome.records.iter().all(|r| r.town != "Springs"));
    assert_eq!(outcome.summary.completed_towns, 2);
    assert!(outcome.summary.total_errors >= 1);
    assert!(!orchestrator.errors().is_empty());

    let failed = orchestrator.logging().town_log("Springs").expect("town log");
    assert_eq!(failed.status, TownStatus::Error);

    let events = drain(&mut rx);
    let last_progress = events
        .iter()
        .filter_map(|e| match e {
            ScrapeEvent::Progress(p) => Some(p.clone()),
            _ => None,
        })
        .last()
        .expect("progress events");
    assert_eq!(last_progress.completed_towns, 3);
    assert!((last_progress.percentage - 100.0).abs() < f64::EPSILON);
    assert!(events.iter().any(|e| matches!(e, ScrapeEvent::Complete(c) if !c.stopped)));
}

#[tokio::test]
async fn test_providers_applied_after_scrape() {
    let driver = ReplayDriver::new().route(
        "plumbers in Springs",
        vec![feed(&[
            card("Acme Plumbing", "/maps/place/acme", "011 555 0100"),
            card("Acme Plumbing East", "/maps/place/acme-east", "011 555 0100"),
            card("Best Drains", "/maps/place/best", "011 555 0199"),
            card("Quiet Pipes", "/maps/place/quiet", ""),
        ])],
    );
    let lookup = Arc::new(TableLookup::with(vec![(
        "011 555 0100".to_string(),
        "Acme Telco".to_string(),
    )]));
    let orchestrator = orchestrator(driver, Arc::clone(&lookup));

    let outcome = orchestrator
        .run(names(&["Springs"]), names(&["plumbers"]), fast_config())
        .await
        .expect("run");

    let by_name = |name: &str| {
        outcome
            .records
            .iter()
            .find(|r| r.name == name)
            .expect("record")
            .clone()
    };
    assert_eq!(by_name("Acme Plumbing").provider.as_deref(), Some("Acme Telco"));
    assert_eq!(by_name("Acme Plumbing East").provider.as_deref(), Some("Acme Telco"));
    // Absent from the lookup results
    assert_eq!(by_name("Best Drains").provider.as_deref(), Some(UNKNOWN_PROVIDER));
    let quiet = by_name("Quiet Pipes");
    assert!(quiet.phone.is_empty());
    assert!(quiet.provider.is_none());

    // One call per distinct phone number
    assert_eq!(lookup.calls(), 2);
    assert_eq!(lookup.closes.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stop_keeps_completed_towns_and_skips_lookup() {
    let towns = ["Springs", "Benoni", "Brakpan", "Boksburg", "Germiston"];
    let gate = Arc::new(Semaphore::new(0));
    let driver = replay_grid(&towns, &INDUSTRIES, 3)
        .gate("plumbers in Brakpan", Arc::clone(&gate))
        .gate("bakeries in Brakpan", Arc::clone(&gate));
    let stats = driver.stats();
    let lookup = Arc::new(TableLookup::new());
    let (sink, mut rx) = ChannelEventSink::new();
    let backend: Arc<dyn ProviderLookup> = lookup.clone();
    let orchestrator = ScrapingOrchestrator::new(Arc::new(driver), backend, Arc::new(sink));
    let config = ScrapingConfig {
        simultaneous_towns: 1,
        ..fast_config()
    };

    let handle = orchestrator
        .start(names(&towns), names(&INDUSTRIES), config)
        .await
        .expect("start");

    // Two towns reported and the third one underway
    let (mut reported, mut underway) = (false, false);
    while !(reported && underway) {
        match rx.recv().await.expect("event stream") {
            ScrapeEvent::Progress(p) if p.completed_towns == 2 => reported = true,
            ScrapeEvent::Log(entry) if entry.message == "Starting Brakpan" => underway = true,
            _ => {}
        }
    }

    let stopper = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.stop().await })
    };
    while orchestrator.status() != RunStatus::Stopped {
        tokio::task::yield_now().await;
    }
    gate.add_permits(2);

    assert!(stopper.await.expect("stop task"));
    let outcome = handle.join().await.expect("run");

    assert!(outcome.stopped);
    assert_eq!(outcome.records.len(), 12);
    let towns_seen: HashSet<_> = outcome.records.iter().map(|r| r.town.as_str()).collect();
    assert_eq!(towns_seen, HashSet::from(["Springs", "Benoni"]));
    assert!(outcome.records.iter().all(|r| r.provider.is_none()));
    assert_eq!(lookup.calls(), 0);

    let interrupted = orchestrator.logging().town_log("Brakpan").expect("town log");
    assert_eq!(interrupted.status, TownStatus::Interrupted);
    assert!(orchestrator.logging().town_log("Germiston").is_none());

    assert_eq!(orchestrator.status(), RunStatus::Stopped);
    assert_eq!(stats.open_browsers(), 0);

    let completes = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, ScrapeEvent::Complete(c) if c.stopped))
        .count();
    assert_eq!(completes, 1);
}

#[tokio::test]
async fn test_unavailable_lookup_leaves_providers_unknown() {
    for fail_prepare in [false, true] {
        let (sink, mut rx) = ChannelEventSink::new();
        let orchestrator = ScrapingOrchestrator::new(
            Arc::new(replay_grid(&["Springs"], &["plumbers"], 3)),
            Arc::new(OfflineLookup { fail_prepare }),
            Arc::new(sink),
        );

        let outcome = orchestrator
            .run(names(&["Springs"]), names(&["plumbers"]), fast_config())
            .await
            .expect("run");

        assert_eq!(outcome.records.len(), 3);
        assert!(outcome
            .records
            .iter()
            .all(|r| r.provider.as_deref() == Some(UNKNOWN_PROVIDER)));
        assert!(!outcome.stopped);
        assert_eq!(orchestrator.status(), RunStatus::Idle);
        assert!(!orchestrator.errors().by_category(ErrorCategory::Lookup).is_empty());

        let completes: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ScrapeEvent::Complete(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(completes.len(), 1);
        assert!(completes[0]
            .records
            .iter()
            .all(|r| r.provider.as_deref() == Some(UNKNOWN_PROVIDER)));
    }
}

#[tokio::test]
async fn test_worker_panic_fails_run_and_resets_status() {
    let (sink, mut rx) = ChannelEventSink::new();
    let orchestrator = ScrapingOrchestrator::new(
        Arc::new(CrashingDriver),
        Arc::new(TableLookup::new()),
        Arc::new(sink),
    );

    let err = orchestrator
        .run(names(&["Springs"]), names(&["plumbers"]), fast_config())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestratorError::WorkerFailed { worker_id: 0, .. }));
    assert_eq!(orchestrator.status(), RunStatus::Idle);
    assert_eq!(orchestrator.errors().by_severity(Severity::Critical).len(), 1);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, ScrapeEvent::Error(_))));
    assert!(!events.iter().any(|e| matches!(e, ScrapeEvent::Complete(_))));

    // The orchestrator accepts a new run afterwards
    let handle = orchestrator
        .start(names(&["Springs"]), names(&["plumbers"]), fast_config())
        .await
        .expect("restart");
    assert!(handle.join().await.is_err());
}

#[tokio::test]
async fn test_stop_during_setup_waits_for_run() {
    let towns = ["Springs", "Benoni", "Brakpan", "Boksburg", "Germiston"];
    let db = Arc::new(Database::open(":memory:").await.expect("db"));
    let driver = replay_grid(&towns, &INDUSTRIES, 2);
    let stats = driver.stats();
    let orchestrator =
        orchestrator(driver, Arc::new(TableLookup::new())).with_store(Arc::clone(&db));
    let config = ScrapingConfig {
        simultaneous_towns: 1,
        ..fast_config()
    };

    // The stop lands as soon as the run leaves Idle, while the session row
    // may still be being created
    let (started, stopped) = tokio::join!(
        orchestrator.start(names(&towns), names(&INDUSTRIES), config),
        async {
            while orchestrator.status() == RunStatus::Idle {
                tokio::task::yield_now().await;
            }
            orchestrator.stop().await
        }
    );
    let handle = started.expect("start");
    assert!(stopped);

    // Everything settled before stop returned
    assert_eq!(stats.open_browsers(), 0);
    let session_id = orchestrator.session_id().expect("session id");
    let session = sessions::get_session(db.pool(), &session_id)
        .await
        .expect("query")
        .expect("session row");
    assert_eq!(session.status, SessionStatus::Stopped);

    let outcome = handle.join().await.expect("run");
    assert!(outcome.stopped);
    assert!(outcome.records.len() < towns.len() * INDUSTRIES.len() * 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_timeout_abandons_stuck_town() {
    let gate = Arc::new(Semaphore::new(0));
    let driver = replay_grid(&["Springs"], &["plumbers"], 2).gate("plumbers in Springs", gate);
    let (sink, mut rx) = ChannelEventSink::new();
    let orchestrator = ScrapingOrchestrator::new(
        Arc::new(driver),
        Arc::new(TableLookup::new()),
        Arc::new(sink),
    );
    let config = ScrapingConfig {
        stop_timeout_secs: 2,
        ..fast_config()
    };

    let handle = orchestrator
        .start(names(&["Springs"]), names(&["plumbers"]), config)
        .await
        .expect("start");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(orchestrator.stop().await);
    let outcome = handle.join().await.expect("fallback outcome");
    assert!(outcome.stopped);
    assert!(outcome.records.is_empty());

    let completes: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ScrapeEvent::Complete(c) => Some(c),
            _ => None,
        })
        .collect();
    assert_eq!(completes.len(), 1);
    assert!(completes[0].stopped);
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let towns = ["Springs", "Benoni", "Brakpan", "Boksburg"];
    let (sink, mut rx) = ChannelEventSink::new();
    let orchestrator = ScrapingOrchestrator::new(
        Arc::new(replay_grid(&towns, &INDUSTRIES, 2)),
        Arc::new(TableLookup::new()),
        Arc::new(sink),
    );

    orchestrator
        .run(names(&towns), names(&INDUSTRIES), fast_config())
        .await
        .expect("run");

    let progress: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ScrapeEvent::Progress(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 4);
    assert!(progress
        .windows(2)
        .all(|w| w[0].percentage <= w[1].percentage && w[0].completed_towns < w[1].completed_towns));
    let last = progress.last().expect("last progress");
    assert!((last.percentage - 100.0).abs() < f64::EPSILON);
    assert_eq!(last.towns_remaining, 0);
    assert_eq!(last.estimated_time_ms, 0);
}

#[tokio::test]
async fn test_pause_and_resume_yield_same_records() {
    let lookup = Arc::new(TableLookup::new());
    let baseline = orchestrator(replay_grid(&TOWNS, &INDUSTRIES, 4), Arc::clone(&lookup))
        .run(names(&TOWNS), names(&INDUSTRIES), fast_config())
        .await
        .expect("baseline run");

    let orchestrator = orchestrator(replay_grid(&TOWNS, &INDUSTRIES, 4), lookup);
    let config = ScrapingConfig {
        simultaneous_towns: 1,
        ..fast_config()
    };
    let handle = orchestrator
        .start(names(&TOWNS), names(&INDUSTRIES), config)
        .await
        .expect("start");

    assert!(orchestrator.pause().await);
    assert_eq!(orchestrator.status(), RunStatus::Paused);
    assert!(!orchestrator.pause().await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!handle.is_finished());

    assert!(orchestrator.resume().await);
    let outcome = handle.join().await.expect("run");

    assert_eq!(urls(&outcome.records), urls(&baseline.records));
    assert!(!outcome.stopped);
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let driver = replay_grid(&["Springs"], &["plumbers"], 1).gate("plumbers in Springs", Arc::clone(&gate));
    let orchestrator = orchestrator(driver, Arc::new(TableLookup::new()));

    let handle = orchestrator
        .start(names(&["Springs"]), names(&["plumbers"]), fast_config())
        .await
        .expect("first start");

    let err = orchestrator
        .start(names(&["Benoni"]), names(&["plumbers"]), fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AlreadyRunning));

    gate.add_permits(1);
    let outcome = handle.join().await.expect("run");
    assert_eq!(outcome.records.len(), 1);
    assert_eq!(orchestrator.status(), RunStatus::Idle);
}

#[tokio::test]
async fn test_invalid_input_rejected() {
    let orchestrator = orchestrator(ReplayDriver::new(), Arc::new(TableLookup::new()));

    let err = orchestrator
        .start(names(&["  ", ""]), names(&["plumbers"]), fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));

    let err = orchestrator
        .start(
            names(&["Springs"]),
            names(&["plumbers"]),
            ScrapingConfig {
                simultaneous_towns: 0,
                ..fast_config()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(msg) if msg.contains("simultaneous_towns")));
    assert_eq!(orchestrator.status(), RunStatus::Idle);
}

#[tokio::test]
async fn test_run_is_recorded_in_store() {
    let db = Arc::new(Database::open(":memory:").await.expect("db"));
    let lookup = Arc::new(TableLookup::with(vec![(
        phone_for(0, 0, 0),
        "Acme Telco".to_string(),
    )]));
    let orchestrator = orchestrator(replay_grid(&TOWNS, &INDUSTRIES, 2), lookup)
        .with_store(Arc::clone(&db));

    let outcome = orchestrator
        .run(names(&TOWNS), names(&INDUSTRIES), fast_config())
        .await
        .expect("run");
    let session_id = orchestrator.session_id().expect("session id");

    let session = sessions::get_session(db.pool(), &session_id)
        .await
        .expect("query")
        .expect("session row");
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.towns, names(&TOWNS));
    assert!((session.progress - 100.0).abs() < f64::EPSILON);
    assert_eq!(session.businesses_count, 12);

    let stored = businesses::list_by_session(db.pool(), &session_id)
        .await
        .expect("businesses");
    assert_eq!(stored.len(), outcome.records.len());
    assert!(stored
        .iter()
        .any(|r| r.provider.as_deref() == Some("Acme Telco")));

    let logs = session_logs::list_recent(db.pool(), &session_id, 500)
        .await
        .expect("logs");
    assert!(!logs.is_empty());
    assert!(logs.iter().any(|l| l.message.starts_with("Starting run")));
}

#[tokio::test]
async fn test_lookup_business_reads_details_panel() {
    let details = r#"<html><body><div role="main"><h1>Acme Plumbing</h1>
        <button data-item-id="address">12 Main Road, Springs</button>
        <a href="tel:0115550100">Call</a></div></body></html>"#;
    let driver = ReplayDriver::new().route("Acme Plumbing Springs", vec![details]);
    let stats = driver.stats();
    let orchestrator = orchestrator(driver, Arc::new(TableLookup::new()));

    let records = orchestrator
        .lookup_business("Acme Plumbing Springs", &fast_config())
        .await
        .expect("lookup");

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].name, "Acme Plumbing");
    assert_eq!(records[0].phone, "0115550100");
    assert_eq!(stats.open_browsers(), 0);
    assert_eq!(stats.open_pages(), 0);

    let err = orchestrator
        .lookup_business("   ", &fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
}
