//! Host integration surface: a versioned newline-delimited JSON command
//! bridge in front of the search engine.

pub mod channel;
pub mod contract;
pub mod handler;
pub mod stdio;
