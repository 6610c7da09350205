//! Chromium over the Chrome DevTools Protocol as an orbit [`Target`].
//!
//! [`Target`]: orbit_engine::target::Target

pub mod cdp;
pub mod command;
pub mod reattach;
pub mod target;

pub use cdp::ChromiumLauncher;
pub use target::ChromiumTarget;
