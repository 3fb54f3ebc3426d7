//! Configuration for the DotPay mobile-money bridge.
//!
//! Every setting in `spec.md` §6 "Configuration" is read here, with typed
//! defaults. `Config::load` fails fast (`ConfigError`) in strict mode when a
//! feature's prerequisites are incomplete (e.g. on-chain funding required but
//! no treasury RPC configured), grounded in the teacher's env-var-with-
//! fallback style (`config_defaults::default_port`).

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use crate::errors::CoreError;

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_string(key).as_deref() {
        Some("true") | Some("1") | Some("yes") => true,
        Some("false") | Some("0") | Some("no") => false,
        _ => default,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpesaEnv {
    Sandbox,
    Production,
}

impl MpesaEnv {
    pub fn base_url(self) -> &'static str {
        match self {
            MpesaEnv::Sandbox => "https://sandbox.safaricom.co.ke",
            MpesaEnv::Production => "https://api.safaricom.co.ke",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub env: MpesaEnv,
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub passkey: String,
    pub shortcode: String,
    pub stk_shortcode: String,
    pub b2c_shortcode: String,
    pub b2b_shortcode: String,
    pub initiator_name: String,
    pub security_credential: Option<String>,
    pub initiator_password: Option<String>,
    pub cert_path: Option<String>,
    pub result_base_url: String,
    pub timeout_base_url: String,
    pub webhook_secret: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TreasuryConfig {
    pub rpc_url: Option<String>,
    pub chain_id: Option<u64>,
    pub usdc_contract: Option<String>,
    pub usdc_decimals: u32,
    pub platform_address: Option<String>,
    pub private_key: Option<String>,
    pub refund_enabled: bool,
    pub wait_confirmations: u64,
}

impl TreasuryConfig {
    /// Fully configured to *send* on-chain transfers (refunds, onramp
    /// credit settlement): rpc + key + token all present.
    pub fn can_send(&self) -> bool {
        self.rpc_url.is_some() && self.private_key.is_some() && self.usdc_contract.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Limits {
    pub max_txn_kes: Decimal,
    pub max_daily_kes: Decimal,
    pub pin_min_length: usize,
    pub signature_max_age_secs: i64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: IpAddr,
    pub base_url: String,
    pub mpesa: MpesaConfig,
    pub treasury: TreasuryConfig,
    pub limits: Limits,
    pub quote_ttl_secs: i64,
    pub kes_per_usd: Decimal,
    pub auto_refund: bool,
    pub require_onchain_funding: bool,
    pub min_funding_confirmations: u64,
    pub jwt_secret: String,
    pub internal_api_key: Option<String>,
    pub mongo_uri: Option<String>,
}

impl Config {
    /// Loads configuration from the process environment. Returns
    /// `ConfigError` if on-chain funding is required but the treasury isn't
    /// fully specified, or the JWT secret is missing ("strict mode" startup
    /// validation from `spec.md` §7).
    pub fn load() -> Result<Self, CoreError> {
        let env = match env_string("MPESA_ENV").as_deref() {
            Some("production") => MpesaEnv::Production,
            _ => MpesaEnv::Sandbox,
        };
        let base_url =
            env_string("MPESA_BASE_URL").unwrap_or_else(|| env.base_url().to_string());
        let shortcode = env_string("MPESA_SHORTCODE").unwrap_or_default();

        let mpesa = MpesaConfig {
            env,
            base_url,
            consumer_key: env_string("MPESA_CONSUMER_KEY").unwrap_or_default(),
            consumer_secret: env_string("MPESA_CONSUMER_SECRET").unwrap_or_default(),
            passkey: env_string("MPESA_PASSKEY").unwrap_or_default(),
            stk_shortcode: env_string("MPESA_STK_SHORTCODE").unwrap_or_else(|| shortcode.clone()),
            b2c_shortcode: env_string("MPESA_B2C_SHORTCODE").unwrap_or_else(|| shortcode.clone()),
            b2b_shortcode: env_string("MPESA_B2B_SHORTCODE").unwrap_or_else(|| shortcode.clone()),
            shortcode,
            initiator_name: env_string("MPESA_INITIATOR_NAME").unwrap_or_default(),
            security_credential: env_string("MPESA_SECURITY_CREDENTIAL"),
            initiator_password: env_string("MPESA_INITIATOR_PASSWORD"),
            cert_path: env_string("MPESA_CERT_PATH"),
            result_base_url: env_string("MPESA_RESULT_BASE_URL").unwrap_or_default(),
            timeout_base_url: env_string("MPESA_TIMEOUT_BASE_URL").unwrap_or_default(),
            webhook_secret: env_string("MPESA_WEBHOOK_SECRET"),
            request_timeout_secs: env_parsed("MPESA_TIMEOUT_SECS", 30),
        };

        let require_onchain_funding = env_bool("MPESA_REQUIRE_ONCHAIN_FUNDING", true);

        let treasury = TreasuryConfig {
            rpc_url: env_string("TREASURY_RPC_URL"),
            chain_id: env_string("TREASURY_CHAIN_ID").and_then(|v| v.parse().ok()),
            usdc_contract: env_string("TREASURY_USDC_CONTRACT"),
            usdc_decimals: env_parsed("TREASURY_USDC_DECIMALS", 6).min(18),
            platform_address: env_string("TREASURY_PLATFORM_ADDRESS"),
            private_key: env_string("TREASURY_PRIVATE_KEY"),
            refund_enabled: env_bool("TREASURY_REFUND_ENABLED", true),
            wait_confirmations: env_parsed("TREASURY_WAIT_CONFIRMATIONS", 1),
        };

        if require_onchain_funding
            && (treasury.rpc_url.is_none()
                || treasury.chain_id.is_none()
                || treasury.usdc_contract.is_none())
        {
            return Err(CoreError::config(
                "MPESA_REQUIRE_ONCHAIN_FUNDING is true but TREASURY_RPC_URL / TREASURY_CHAIN_ID / TREASURY_USDC_CONTRACT are not fully configured",
            ));
        }

        let jwt_secret = env_string("DOTPAY_BACKEND_JWT_SECRET")
            .ok_or_else(|| CoreError::config("DOTPAY_BACKEND_JWT_SECRET is required"))?;

        let kes_per_usd = env_string("KES_PER_USD")
            .and_then(|v| Decimal::from_str(&v).ok())
            .unwrap_or_else(|| Decimal::from_i32(130).unwrap());

        let limits = Limits {
            max_txn_kes: env_string("MPESA_MAX_TXN_KES")
                .and_then(|v| Decimal::from_str(&v).ok())
                .unwrap_or_else(|| Decimal::from_i32(150_000).unwrap()),
            max_daily_kes: env_string("MPESA_MAX_DAILY_KES")
                .and_then(|v| Decimal::from_str(&v).ok())
                .unwrap_or_else(|| Decimal::from_i32(500_000).unwrap()),
            pin_min_length: env_parsed("MPESA_PIN_MIN_LENGTH", 6),
            signature_max_age_secs: env_parsed("MPESA_SIGNATURE_MAX_AGE_SECONDS", 600),
        };

        Ok(Config {
            port: env_parsed("PORT", 8080),
            host: env_string("HOST")
                .and_then(|v| v.parse().ok())
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            base_url: env_string("DOTPAY_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            mpesa,
            treasury,
            limits,
            quote_ttl_secs: env_parsed("MPESA_QUOTE_TTL_SECONDS", 300),
            kes_per_usd,
            auto_refund: env_bool("MPESA_AUTO_REFUND", true),
            require_onchain_funding,
            min_funding_confirmations: env_parsed("MPESA_MIN_FUNDING_CONFIRMATIONS", 1),
            jwt_secret,
            internal_api_key: env_string("DOTPAY_INTERNAL_API_KEY"),
            mongo_uri: env_string("MONGO_URI"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mpesa_env_selects_correct_base_url() {
        assert_eq!(
            MpesaEnv::Sandbox.base_url(),
            "https://sandbox.safaricom.co.ke"
        );
        assert_eq!(MpesaEnv::Production.base_url(), "https://api.safaricom.co.ke");
    }
}
