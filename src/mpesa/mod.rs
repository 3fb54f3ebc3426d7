//! Mobile-money provider integration, `spec.md` §4.5.

pub mod client;
pub mod payloads;
pub mod security_credential;
pub mod token_cache;

pub use client::{MpesaClient, SubmissionOutcome};
