//! Botgate Engine library.
//!
//! Server side of the gateway between bot agents and the simulation.
//!
//! ## Structure
//!
//! - `use_cases/` - event intake, per-agent delivery and command routing
//! - `infrastructure/` - configuration, metrics and the simulation client
//! - `api/` - HTTP and WebSocket entry points
//! - `app` - Application composition

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod use_cases;

pub use app::App;
