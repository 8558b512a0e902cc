//! Menagerie Admin
//!
//! Command surface over the companion registry: listing, summoning and
//! backup management. Every command takes the shared `AdminState` and
//! returns a status a chat or console front end can print directly.

pub mod commands;
pub mod state;

pub use state::AdminState;
