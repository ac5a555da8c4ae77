//! Storage infrastructure: configuration file persistence and the
//! preference store built on it.
//!
//! - **`config`** – reads and writes the TOML configuration file, with
//!   defaults when it does not exist yet (first run).
//! - **`preferences`** – per-app notification options seeded from the
//!   `[notifications]` section.

pub mod config;
pub mod preferences;
