//! Embedded HTML served by the web UI.
//!
//! Kept as `&'static str` so it is bundled directly inside the binary without
//! filesystem lookups.

pub mod index;
