//! Process-level helpers for the daemon

pub mod health;
