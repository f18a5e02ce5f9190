//! convo-sync - cross-context conversation sync and processing
//!
//! An Observer watches a conversation document, a Coordinator relays what it
//! sees, and a Controller decides when a conversation is sent to the
//! similarity service. The three talk only through the message bus; the
//! Controller keeps one durable processing record per conversation.

pub mod actors;
pub mod api;
pub mod config;
pub mod debounce;
pub mod document;
pub mod fingerprint;
pub mod runtime;
pub mod similarity;
