//! Cross-cutting helpers: configuration and small data structures.

pub mod config;
pub mod recent_set;

pub use recent_set::RecentSet;
