//! Microsoft Graph adapters: mailbox delta queries and the OAuth identity
//! provider

pub mod identity;
pub mod mailbox;
mod types;

pub use identity::GraphIdentity;
pub use mailbox::GraphMailbox;
