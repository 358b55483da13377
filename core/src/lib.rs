//! Pure domain for Tally: everything needed to turn a question into prompts
//! and to carry results and history between the API and its clients.
//! Nothing in this crate performs I/O.

pub mod ask;
pub mod conversation;
pub mod error;
pub mod guard;
pub mod prompt;
pub mod provisioning;
pub mod result;
