//! Browser drivers for proving sessions.
//!
//! - [`browser::driver::WebDriverBrowser`]: a WebDriver session implementing
//!   the engine's `BrowserContext`
//! - [`browser::watch`]: turns the session's URL into navigation events
pub mod browser;

pub use browser::driver::WebDriverBrowser;
