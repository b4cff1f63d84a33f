//! Application use cases. Orchestrate domain logic via ports.

pub mod attachments;
pub mod auth_service;
pub mod delivery;
pub mod edit_guard;
pub mod error_reporter;
pub mod formatter;
pub mod matcher;
pub mod relay_service;
pub mod renderer;

pub use auth_service::AuthService;
pub use delivery::DeliveryService;
pub use edit_guard::EditGuard;
pub use error_reporter::{ErrorReport, ErrorReporter};
pub use formatter::Formatter;
pub use matcher::ListenerMatcher;
pub use relay_service::RelayService;
