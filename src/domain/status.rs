use serde::{Deserialize, Serialize};
use std::fmt;

/// The authoritative transaction lifecycle states, per `spec.md` §3/§4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Created,
    Quoted,
    AwaitingUserAuthorization,
    AwaitingOnchainFunding,
    MpesaSubmitted,
    MpesaProcessing,
    Succeeded,
    Failed,
    RefundPending,
    Refunded,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Created => "created",
            Status::Quoted => "quoted",
            Status::AwaitingUserAuthorization => "awaiting_user_authorization",
            Status::AwaitingOnchainFunding => "awaiting_onchain_funding",
            Status::MpesaSubmitted => "mpesa_submitted",
            Status::MpesaProcessing => "mpesa_processing",
            Status::Succeeded => "succeeded",
            Status::Failed => "failed",
            Status::RefundPending => "refund_pending",
            Status::Refunded => "refunded",
        };
        write!(f, "{s}")
    }
}

impl Status {
    /// Terminal states admit no outbound transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Succeeded | Status::Refunded)
    }

    /// The allowed `(from, to)` transition table from `spec.md` §4.2.
    pub fn allowed_targets(self) -> &'static [Status] {
        use Status::*;
        match self {
            Created => &[Quoted, AwaitingUserAuthorization, Failed],
            Quoted => &[AwaitingUserAuthorization, MpesaSubmitted, Failed],
            AwaitingUserAuthorization => &[AwaitingOnchainFunding, MpesaSubmitted, Failed],
            AwaitingOnchainFunding => &[MpesaSubmitted, Failed],
            MpesaSubmitted => &[MpesaProcessing, Succeeded, Failed],
            MpesaProcessing => &[Succeeded, Failed],
            Failed => &[RefundPending, Refunded],
            RefundPending => &[Refunded, Failed],
            Succeeded | Refunded => &[],
        }
    }

    pub fn can_transition_to(self, to: Status) -> bool {
        self == to || self.allowed_targets().contains(&to)
    }
}
