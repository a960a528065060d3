//! Call-dialogue engine for a stateless telephony webhook.
//!
//! The carrier posts one request per turn; [`dialogue::DialogueController`]
//! rebuilds the call's state from the [`session_store::SessionStore`], moves
//! it one step and answers with carrier markup.

pub mod address;
pub mod collaborators;
pub mod composer;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod intent;
pub mod memory;
pub mod prompts;
pub mod records;
pub mod session;
pub mod session_store;
pub mod tiers;
pub mod twiml;
