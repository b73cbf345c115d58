//! Layered runtime configuration (C14).
//!
//! Three layers, lowest to highest precedence: compiled-in defaults,
//! `LATENTSPEED_*` environment variables, and CLI flags. This mirrors the
//! teacher binary crate's `CommonArgs` — a `clap::Parser` struct with
//! `#[arg(long, env = "...")]` fields — generalized from one strategy's
//! tuning knobs to per-venue credential blocks plus every numeric
//! tunable named across the adapters.
//!
//! Per-venue credentials are resolved by venue name
//! (`LATENTSPEED_<VENUE>_API_KEY` etc.); Hyperliquid additionally accepts
//! the `_USER_ADDRESS`/`_PRIVATE_KEY` aliases. `GatewayConfig::load`
//! performs this resolution once at startup and returns a validation
//! error (mapped by `main` to exit code 1) before any adapter is
//! constructed.

use crate::core::errors::GatewayError;
use clap::Parser;
use std::time::Duration;

/// Env var naming helper: `LATENTSPEED_<VENUE>_<SUFFIX>`, venue
/// uppercased.
fn venue_env(venue: &str, suffix: &str) -> String {
    format!("LATENTSPEED_{}_{}", venue.to_uppercase(), suffix)
}

fn env_bool(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// CLI surface (§6): `--exchange` is the only required flag; everything
/// else overrides an environment-resolved default.
#[derive(Debug, Parser)]
#[command(name = "execution-gateway", about = "Multi-venue execution gateway")]
pub struct CliArgs {
    /// Venue to connect to for this process (e.g. "bybit", "hyperliquid").
    #[arg(long)]
    pub exchange: String,

    /// Overrides the resolved API key for `--exchange`.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Overrides the resolved API secret for `--exchange`.
    #[arg(long)]
    pub api_secret: Option<String>,

    /// Trade on the venue's live/mainnet endpoints.
    #[arg(long, conflicts_with = "demo")]
    pub live_trade: bool,

    /// Trade on the venue's demo/testnet endpoints (default).
    #[arg(long, conflicts_with = "live_trade")]
    pub demo: bool,

    /// Overrides `LATENTSPEED_METRICS_ADDR`.
    #[arg(long)]
    pub metrics_addr: Option<String>,
}

/// Resolved credentials for the one venue this process will connect to.
#[derive(Debug, Clone)]
pub struct VenueCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub testnet: bool,
}

/// Hyperliquid-specific tunables, all overridable via `LATENTSPEED_HL_*`
/// (§6).
#[derive(Debug, Clone)]
pub struct HyperliquidConfig {
    pub disable_ws_post: bool,
    pub disable_private_ws: bool,
    pub ws_post_timeout: Duration,
    pub enable_batching: bool,
    pub batch_cadence: Duration,
    pub on_429_backoff: Duration,
    pub reserve_weight_on_429: bool,
    pub reserve_weight_amount: u64,
    pub reserve_weight_limit: u64,
    pub ioc_market_slippage_bps: u64,
    pub signer_python: String,
    pub signer_script: String,
}

impl HyperliquidConfig {
    fn from_env() -> Self {
        Self {
            disable_ws_post: env_bool("LATENTSPEED_HL_DISABLE_WS_POST"),
            disable_private_ws: env_bool("LATENTSPEED_HL_DISABLE_PRIVATE_WS"),
            ws_post_timeout: Duration::from_millis(env_u64("LATENTSPEED_HL_WS_POST_TIMEOUT_MS", 1_500)),
            enable_batching: env_bool("LATENTSPEED_HL_ENABLE_BATCHING"),
            batch_cadence: Duration::from_millis(env_u64("LATENTSPEED_HL_BATCH_CADENCE_MS", 100)),
            on_429_backoff: Duration::from_millis(env_u64("LATENTSPEED_HL_ON_429_BACKOFF_MS", 10_000)),
            reserve_weight_on_429: env_bool("LATENTSPEED_HL_RESERVE_WEIGHT_ON_429"),
            reserve_weight_amount: env_u64("LATENTSPEED_HL_RESERVE_WEIGHT_AMOUNT", 0),
            reserve_weight_limit: env_u64("LATENTSPEED_HL_RESERVE_WEIGHT_LIMIT", 0),
            ioc_market_slippage_bps: env_u64("LATENTSPEED_HL_IOC_MARKET_SLIPPAGE_BPS", 10),
            signer_python: env_string("LATENTSPEED_HL_SIGNER_PYTHON", ""),
            signer_script: env_string("LATENTSPEED_HL_SIGNER_SCRIPT", ""),
        }
    }
}

/// Bus endpoint configuration (§6).
#[derive(Debug, Clone)]
pub struct BusConfig {
    pub orders_in_endpoint: String,
    pub reports_out_endpoint: String,
}

impl BusConfig {
    fn from_env() -> Self {
        Self {
            orders_in_endpoint: env_string(
                "LATENTSPEED_BUS_ORDERS_IN",
                crate::bus::DEFAULT_ORDERS_IN_ENDPOINT,
            ),
            reports_out_endpoint: env_string(
                "LATENTSPEED_BUS_REPORTS_OUT",
                crate::bus::DEFAULT_REPORTS_OUT_ENDPOINT,
            ),
        }
    }
}

/// Fully resolved, validated configuration for one `execution-gateway`
/// process.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub exchange: String,
    pub credentials: VenueCredentials,
    pub bus: BusConfig,
    pub hyperliquid: HyperliquidConfig,
    pub metrics_addr: String,
    pub log_level: String,
}

/// Default Prometheus listen address, overridable via
/// `LATENTSPEED_METRICS_ADDR` (§6). Distinct from `monitoring::server`'s
/// struct-level default, which exists for library callers that bypass
/// this config layer entirely.
pub const DEFAULT_METRICS_ADDR: &str = "127.0.0.1:9898";

impl GatewayConfig {
    /// Assemble from parsed CLI args, resolving env-layered defaults and
    /// validating required credentials. Returns `Config` errors for
    /// anything unresolvable, which `main` maps to exit code 1.
    pub fn load(cli: CliArgs) -> Result<Self, GatewayError> {
        let venue = cli.exchange.to_lowercase();
        if venue.is_empty() {
            return Err(GatewayError::Config("--exchange must not be empty".to_string()));
        }

        let testnet = if cli.live_trade {
            false
        } else {
            // `--demo` or the unspecified default both mean testnet.
            true
        };

        let (api_key, api_secret) = Self::resolve_credentials(&venue, &cli)?;

        Ok(Self {
            exchange: venue,
            credentials: VenueCredentials {
                api_key,
                api_secret,
                testnet,
            },
            bus: BusConfig::from_env(),
            hyperliquid: HyperliquidConfig::from_env(),
            metrics_addr: cli
                .metrics_addr
                .unwrap_or_else(|| env_string("LATENTSPEED_METRICS_ADDR", DEFAULT_METRICS_ADDR)),
            log_level: env_string("RUST_LOG", "info"),
        })
    }

    fn resolve_credentials(venue: &str, cli: &CliArgs) -> Result<(String, String), GatewayError> {
        if let (Some(key), Some(secret)) = (&cli.api_key, &cli.api_secret) {
            return Ok((key.clone(), secret.clone()));
        }

        // Hyperliquid's DEX-shaped credentials have venue-specific aliases
        // on top of the generic `_API_KEY`/`_API_SECRET` pair.
        let (key_env, secret_env) = if venue == "hyperliquid" {
            (
                vec![venue_env(venue, "API_KEY"), "LATENTSPEED_HYPERLIQUID_USER_ADDRESS".to_string()],
                vec![venue_env(venue, "API_SECRET"), "LATENTSPEED_HYPERLIQUID_PRIVATE_KEY".to_string()],
            )
        } else {
            (vec![venue_env(venue, "API_KEY")], vec![venue_env(venue, "API_SECRET")])
        };

        let api_key = cli
            .api_key
            .clone()
            .or_else(|| key_env.iter().find_map(|e| std::env::var(e).ok()))
            .ok_or_else(|| {
                GatewayError::Config(format!(
                    "no API key for venue '{venue}': set --api-key or one of {key_env:?}"
                ))
            })?;

        let api_secret = cli
            .api_secret
            .clone()
            .or_else(|| secret_env.iter().find_map(|e| std::env::var(e).ok()))
            .ok_or_else(|| {
                GatewayError::Config(format!(
                    "no API secret for venue '{venue}': set --api-secret or one of {secret_env:?}"
                ))
            })?;

        Ok((api_key, api_secret))
    }

    /// Whether `venue`'s testnet flag is set, resolved purely from env
    /// (used when a process needs to check a venue other than its own
    /// `--exchange` target, e.g. during integration tests).
    pub fn venue_use_testnet(venue: &str) -> bool {
        env_bool(&venue_env(venue, "USE_TESTNET"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(exchange: &str) -> CliArgs {
        CliArgs {
            exchange: exchange.to_string(),
            api_key: Some("key".to_string()),
            api_secret: Some("secret".to_string()),
            live_trade: false,
            demo: true,
            metrics_addr: None,
        }
    }

    #[test]
    fn bool_parsing_accepts_common_truthy_spellings() {
        std::env::set_var("LATENTSPEED_TEST_BOOL_1", "TRUE");
        std::env::set_var("LATENTSPEED_TEST_BOOL_2", "yes");
        std::env::set_var("LATENTSPEED_TEST_BOOL_3", "0");
        assert!(env_bool("LATENTSPEED_TEST_BOOL_1"));
        assert!(env_bool("LATENTSPEED_TEST_BOOL_2"));
        assert!(!env_bool("LATENTSPEED_TEST_BOOL_3"));
        assert!(!env_bool("LATENTSPEED_TEST_BOOL_UNSET"));
        std::env::remove_var("LATENTSPEED_TEST_BOOL_1");
        std::env::remove_var("LATENTSPEED_TEST_BOOL_2");
        std::env::remove_var("LATENTSPEED_TEST_BOOL_3");
    }

    #[test]
    fn cli_credentials_take_precedence_over_env() {
        std::env::set_var("LATENTSPEED_BYBIT_API_KEY", "env-key");
        let config = GatewayConfig::load(cli("bybit")).unwrap();
        assert_eq!(config.credentials.api_key, "key");
        std::env::remove_var("LATENTSPEED_BYBIT_API_KEY");
    }

    #[test]
    fn demo_is_the_default_network() {
        let mut args = cli("bybit");
        args.demo = false;
        args.live_trade = false;
        let config = GatewayConfig::load(args).unwrap();
        assert!(config.credentials.testnet);
    }

    #[test]
    fn live_trade_disables_testnet() {
        let mut args = cli("bybit");
        args.live_trade = true;
        args.demo = false;
        let config = GatewayConfig::load(args).unwrap();
        assert!(!config.credentials.testnet);
    }

    #[test]
    fn missing_credentials_is_a_config_error() {
        let args = CliArgs {
            exchange: "bybit".to_string(),
            api_key: None,
            api_secret: None,
            live_trade: false,
            demo: true,
            metrics_addr: None,
        };
        std::env::remove_var("LATENTSPEED_BYBIT_API_KEY");
        std::env::remove_var("LATENTSPEED_BYBIT_API_SECRET");
        let result = GatewayConfig::load(args);
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[test]
    fn hyperliquid_accepts_user_address_and_private_key_aliases() {
        std::env::remove_var("LATENTSPEED_HYPERLIQUID_API_KEY");
        std::env::remove_var("LATENTSPEED_HYPERLIQUID_API_SECRET");
        std::env::set_var("LATENTSPEED_HYPERLIQUID_USER_ADDRESS", "0xabc");
        std::env::set_var("LATENTSPEED_HYPERLIQUID_PRIVATE_KEY", "0xdef");
        let args = CliArgs {
            exchange: "hyperliquid".to_string(),
            api_key: None,
            api_secret: None,
            live_trade: false,
            demo: true,
            metrics_addr: None,
        };
        let config = GatewayConfig::load(args).unwrap();
        assert_eq!(config.credentials.api_key, "0xabc");
        assert_eq!(config.credentials.api_secret, "0xdef");
        std::env::remove_var("LATENTSPEED_HYPERLIQUID_USER_ADDRESS");
        std::env::remove_var("LATENTSPEED_HYPERLIQUID_PRIVATE_KEY");
    }

    #[test]
    fn metrics_addr_defaults_match_spec() {
        assert_eq!(DEFAULT_METRICS_ADDR, "127.0.0.1:9898");
    }
}
