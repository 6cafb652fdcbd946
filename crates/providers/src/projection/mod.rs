//! Mapping between internal messages and each provider's wire format.
//!
//! Every function here is pure. The adapters call the outbound direction
//! when building requests; the inbound direction rebuilds internal history
//! from stored or replayed wire payloads.

pub mod anthropic;
pub mod document;
pub mod openai;
