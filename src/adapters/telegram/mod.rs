//! Telegram adapter: grammers client, session, auth, mapping, update loop.

pub mod auth_adapter;
pub mod client;
pub mod mapper;
pub mod session;
pub mod updates;

pub use auth_adapter::GrammersAuthAdapter;
pub use client::GrammersTgGateway;
pub use updates::run_update_loop;
