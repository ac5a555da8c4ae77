//! Local media session adapters.
//!
//! The platform session manager lives outside this crate; what ships here
//! is a scriptable controller used by tests and demos.

pub mod fake;

pub use fake::FakeMediaController;
