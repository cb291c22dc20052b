//! Console bridge: process spawning, output pumping, classification and
//! command input.

mod classify;
mod command;
mod decode;
mod launch;
mod process;
mod pump;

pub use classify::*;
pub use command::*;
pub use decode::*;
pub use launch::*;
pub use process::*;
pub use pump::*;
