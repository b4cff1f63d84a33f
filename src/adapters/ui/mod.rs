//! Terminal interaction. Only used during login.

pub mod prompt;

pub use prompt::InquirePrompt;
