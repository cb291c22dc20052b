//! Server Console - supervise a local game server and bridge its console.

pub mod config;
pub mod console;
pub mod display;
pub mod supervisor;
