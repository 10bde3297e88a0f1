//! Browser automation for JavaScript-heavy maps listings.
//!
//! Defines the driver contract the scraper talks to and a headless
//! chromium implementation of it.

pub mod actions;
pub mod engine;
pub mod error;
#[cfg(feature = "replay")]
pub mod replay;

pub use actions::{BrowserDriver, BrowserHandle, LaunchOptions, PageHandle};
pub use engine::ChromiumDriver;
pub use error::{BrowserError, Result};
#[cfg(feature = "replay")]
pub use replay::{ReplayDriver, ReplayStats};
