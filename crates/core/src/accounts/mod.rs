//! Accounts and credential lifecycle

pub mod ports;
pub mod token;

pub use ports::*;
pub use token::TokenLifecycleManager;
