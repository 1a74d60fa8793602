//! Browser automation for detail pages.
//!
//! - [`BrowserSession`] / [`SessionFactory`]: the narrow surface everything else drives
//! - [`ChromeSession`]: the chromiumoxide implementation
//! - [`Stabilizer`]: the load, expand and poll protocol run on each detail page

pub mod chrome;
pub mod session;
pub mod stabilizer;

pub use chrome::{ChromeSession, ChromeSessionFactory};
pub use session::{BrowserSession, ElementSnapshot, Locator, SessionFactory};
pub use stabilizer::{Phase, StabilizationState, StabilizedPage, Stabilizer};
