//! Core library for the DotPay mobile-money bridge: crypto-funded onramp,
//! offramp, paybill and buygoods payments over the Safaricom Daraja API.
//!
//! # Modules
//!
//! - [`domain`] — the `Transaction` aggregate and its lifecycle states.
//! - [`quote`] — pricing engine (`spec.md` §4.1).
//! - [`auth`] — PIN hashing and wallet-signature verification (§4.3).
//! - [`treasury`] / [`funding`] — on-chain provider connection and ERC-20
//!   transfer verification (§4.4).
//! - [`mpesa`] — the Daraja HTTP client (§4.5).
//! - [`orchestrator`] — the transaction initiation pipeline (§4.6).
//! - [`webhooks`] — provider callback demultiplexing (§4.7).
//! - [`refund`] / [`credit_settler`] — on-chain settlement of failed and
//!   successful flows (§4.8, §4.9).
//! - [`reconciler`] — the stuck-transaction sweep (§4.10).
//! - [`repo`] — persistence (in-memory and MongoDB).
//! - [`handlers`] — the Axum HTTP surface (§6).

pub mod app_state;
pub mod auth;
pub mod config;
pub mod credit_settler;
pub mod domain;
pub mod errors;
pub mod funding;
pub mod handlers;
pub mod idempotency;
pub mod jwt;
pub mod mpesa;
pub mod orchestrator;
pub mod quote;
pub mod reconciler;
pub mod refund;
pub mod repo;
pub mod sig_down;
pub mod state_machine;
pub mod telemetry;
pub mod treasury;
pub mod trace_id;
pub mod validation;
pub mod webhooks;

pub use trace_id::TraceId;
