use serde::{Deserialize, Serialize};
use std::fmt;

/// The four payment flows the bridge coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    Onramp,
    Offramp,
    Paybill,
    Buygoods,
}

impl FlowType {
    /// Funded flows require on-chain stablecoin funding before mobile-money
    /// submission; onramp is the only unfunded flow (it credits the chain
    /// *after* the mobile-money leg succeeds).
    pub fn is_funded(self) -> bool {
        !matches!(self, FlowType::Onramp)
    }

    /// Fee basis points per `spec.md` §4.1.
    pub fn fee_bps(self) -> u32 {
        match self {
            FlowType::Onramp => 130,
            FlowType::Offramp => 180,
            FlowType::Paybill => 120,
            FlowType::Buygoods => 120,
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlowType::Onramp => "onramp",
            FlowType::Offramp => "offramp",
            FlowType::Paybill => "paybill",
            FlowType::Buygoods => "buygoods",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    KES,
    USD,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::KES => write!(f, "KES"),
            Currency::USD => write!(f, "USD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_onramp_is_unfunded() {
        assert!(!FlowType::Onramp.is_funded());
        assert!(FlowType::Offramp.is_funded());
        assert!(FlowType::Paybill.is_funded());
        assert!(FlowType::Buygoods.is_funded());
    }

    #[test]
    fn fee_bps_matches_flow_schedule() {
        assert_eq!(FlowType::Onramp.fee_bps(), 130);
        assert_eq!(FlowType::Offramp.fee_bps(), 180);
        assert_eq!(FlowType::Paybill.fee_bps(), 120);
        assert_eq!(FlowType::Buygoods.fee_bps(), 120);
    }

    #[test]
    fn display_is_lowercase_snake_variant() {
        assert_eq!(FlowType::Buygoods.to_string(), "buygoods");
        assert_eq!(Currency::KES.to_string(), "KES");
    }
}
