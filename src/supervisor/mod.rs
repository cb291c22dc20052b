//! Supervisor module for the server lifecycle and state management.

mod error;
mod events;
mod runner;
mod state;

pub use error::*;
pub use events::*;
pub use runner::*;
pub use state::*;
