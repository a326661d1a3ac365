// =============================================================================
// Config Provider — environment-driven startup configuration
// =============================================================================
//
// Every credential has three possible sources, consulted in order:
//   1. sandbox-specific:  {VENUE}_TESTNET_API_KEY / {VENUE}_TESTNET_SECRET_KEY
//   2. exchange-specific: {VENUE}_API_KEY / {VENUE}_API_SECRET
//   3. generic:           API_KEY / SECRET_KEY
//
// `is_sandbox` follows from which tier resolved, or from an explicit
// `IS_TESTNET=true`. Missing credentials are never a load-time error — they
// surface later as an `ERROR` engine status once `Initialize` asks the
// exchange to validate them.
// =============================================================================

use tracing::warn;

const DEFAULT_PORT: u16 = 3001;
const DEFAULT_EXCHANGE: &str = "binance";

/// Which credential tier resolved, kept only for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Sandbox,
    ExchangeSpecific,
    Generic,
    Unresolved,
}

/// Fully-resolved startup configuration.
#[derive(Clone)]
pub struct EnvConfig {
    pub port: u16,
    pub exchange_id: String,
    pub api_key: String,
    pub api_secret: String,
    pub is_sandbox: bool,
    pub env: CredentialSource,
}

/// Safe-to-log view of [`EnvConfig`] — keys/secrets are truncated.
#[derive(Debug, Clone)]
pub struct RedactedConfig {
    pub port: u16,
    pub exchange_id: String,
    pub api_key: String,
    pub api_secret: String,
    pub is_sandbox: bool,
}

impl EnvConfig {
    /// Load configuration from the process environment (after `dotenv`
    /// has populated it, see `main.rs`). Never fails: absent credentials
    /// are logged as a warning and surface later via the engine's security
    /// gate instead of aborting startup.
    pub fn load() -> Self {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let exchange_id = std::env::var("EXCHANGE").unwrap_or_else(|_| DEFAULT_EXCHANGE.to_string());
        let venue = exchange_id.to_uppercase();

        let testnet_key = std::env::var(format!("{venue}_TESTNET_API_KEY")).ok();
        let testnet_secret = std::env::var(format!("{venue}_TESTNET_SECRET_KEY")).ok();
        let exchange_key = std::env::var(format!("{venue}_API_KEY")).ok();
        let exchange_secret = std::env::var(format!("{venue}_API_SECRET")).ok();
        let generic_key = std::env::var("API_KEY").ok();
        let generic_secret = std::env::var("SECRET_KEY").ok();

        let (api_key, api_secret, source) = match (testnet_key, testnet_secret) {
            (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => (k, s, CredentialSource::Sandbox),
            _ => match (exchange_key, exchange_secret) {
                (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => {
                    (k, s, CredentialSource::ExchangeSpecific)
                }
                _ => match (generic_key, generic_secret) {
                    (Some(k), Some(s)) if !k.is_empty() && !s.is_empty() => {
                        (k, s, CredentialSource::Generic)
                    }
                    _ => (String::new(), String::new(), CredentialSource::Unresolved),
                },
            },
        };

        let explicit_testnet = std::env::var("IS_TESTNET")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let is_sandbox = explicit_testnet || source == CredentialSource::Sandbox;

        if source == CredentialSource::Unresolved {
            warn!(exchange_id = %exchange_id, "no API credentials resolved from environment — engine will fail permission validation on start");
        }

        Self { port, exchange_id, api_key, api_secret, is_sandbox, env: source }
    }

    /// A copy safe to log: full fields except truncated credentials.
    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig {
            port: self.port,
            exchange_id: self.exchange_id.clone(),
            api_key: truncate(&self.api_key),
            api_secret: truncate(&self.api_secret),
            is_sandbox: self.is_sandbox,
        }
    }
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = self.redacted();
        f.debug_struct("EnvConfig")
            .field("port", &r.port)
            .field("exchange_id", &r.exchange_id)
            .field("api_key", &r.api_key)
            .field("api_secret", &r.api_secret)
            .field("is_sandbox", &r.is_sandbox)
            .field("env", &self.env)
            .finish()
    }
}

fn truncate(value: &str) -> String {
    if value.is_empty() {
        return "<none>".to_string();
    }
    let head: String = value.chars().take(4).collect();
    format!("{head}***")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for var in [
            "PORT",
            "EXCHANGE",
            "IS_TESTNET",
            "BINANCE_TESTNET_API_KEY",
            "BINANCE_TESTNET_SECRET_KEY",
            "BINANCE_API_KEY",
            "BINANCE_API_SECRET",
            "API_KEY",
            "SECRET_KEY",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn missing_credentials_resolve_unresolved_but_do_not_panic() {
        clear_env();
        let cfg = EnvConfig::load();
        assert_eq!(cfg.env, CredentialSource::Unresolved);
        assert!(cfg.api_key.is_empty());
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.exchange_id, DEFAULT_EXCHANGE);
    }

    #[test]
    fn generic_credentials_resolve_when_no_exchange_specific_set() {
        clear_env();
        std::env::set_var("API_KEY", "generic-key");
        std::env::set_var("SECRET_KEY", "generic-secret");
        let cfg = EnvConfig::load();
        assert_eq!(cfg.env, CredentialSource::Generic);
        assert_eq!(cfg.api_key, "generic-key");
        clear_env();
    }

    #[test]
    fn sandbox_credentials_take_priority_and_force_is_sandbox() {
        clear_env();
        std::env::set_var("BINANCE_TESTNET_API_KEY", "tn-key");
        std::env::set_var("BINANCE_TESTNET_SECRET_KEY", "tn-secret");
        std::env::set_var("BINANCE_API_KEY", "live-key");
        std::env::set_var("BINANCE_API_SECRET", "live-secret");
        let cfg = EnvConfig::load();
        assert_eq!(cfg.env, CredentialSource::Sandbox);
        assert_eq!(cfg.api_key, "tn-key");
        assert!(cfg.is_sandbox);
        clear_env();
    }

    #[test]
    fn redacted_never_exposes_full_secret() {
        clear_env();
        std::env::set_var("API_KEY", "abcdefghijklmnop");
        std::env::set_var("SECRET_KEY", "zzzsecretvalue");
        let cfg = EnvConfig::load();
        let r = cfg.redacted();
        assert_eq!(r.api_key, "abcd***");
        assert_eq!(r.api_secret, "zzzs***");
        assert!(!format!("{cfg:?}").contains("zzzsecretvalue"));
        clear_env();
    }
}
