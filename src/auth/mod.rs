//! PIN and wallet-signature authorization, `spec.md` §4.3.

pub mod pin;
pub mod signature;

pub use pin::{hash_pin, verify_pin};
pub use signature::{authorization_message, recover_signer, verify_authorization};
