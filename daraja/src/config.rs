//! Gateway configuration.
//!
//! [`DarajaConfig`] is an explicit value handed to [`crate::Mpesa::new`]. It
//! holds global Lipa Na M-Pesa settings, callback URLs and one
//! [`AccountConfig`] per paybill. It can be built in code or loaded from a
//! TOML file in which `$VAR` / `${VAR}` references are expanded from the
//! process environment.
//!
//! # Example Configuration
//!
//! ```toml
//! environment = "sandbox"
//! lipa_na_mpesa = "174379"
//! lipa_na_mpesa_passkey = "$LNMO_PASSKEY"
//! lnmocallback = "https://example.com/callbacks/lnmo"
//! test_msisdn = "254708374149"
//! c2b_validate_callback = "https://example.com/callbacks/validate"
//! c2b_confirm_callback = "https://example.com/callbacks/confirm"
//!
//! [accounts.staging]
//! sandbox = true
//! key = "$CONSUMER_KEY"
//! secret = "$CONSUMER_SECRET"
//! initiator = "testapi"
//! password = "${INITIATOR_PASSWORD}"
//! b2c_timeout = "https://example.com/callbacks/b2c/timeout"
//! b2c_result = "https://example.com/callbacks/b2c/result"
//!
//! [accounts.staging.lnmo]
//! paybill = "600000"
//! ```
//!
//! # Environment Variables
//!
//! - `DARAJA_CONFIG` - Path to the configuration file (default: `daraja.toml`)
//! - Any variable referenced by `$VAR` in the file

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Gateway host used by sandbox accounts.
pub const SANDBOX_BASE_URL: &str = "https://sandbox.safaricom.co.ke";

/// Gateway host used by live accounts.
pub const PRODUCTION_BASE_URL: &str = "https://api.safaricom.co.ke";

/// Which gateway certificate signs security credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Safaricom sandbox.
    #[default]
    Sandbox,
    /// Live gateway.
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sandbox => f.write_str("sandbox"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// Locations of the gateway's public certificates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificatePaths {
    /// Sandbox certificate (default: `certs/sandbox.cer`).
    #[serde(default = "default_sandbox_cert")]
    pub sandbox: PathBuf,
    /// Production certificate (default: `certs/production.cer`).
    #[serde(default = "default_production_cert")]
    pub production: PathBuf,
}

impl CertificatePaths {
    /// Returns the certificate path for `environment`.
    #[must_use]
    pub fn for_environment(&self, environment: Environment) -> &Path {
        match environment {
            Environment::Sandbox => &self.sandbox,
            Environment::Production => &self.production,
        }
    }
}

impl Default for CertificatePaths {
    fn default() -> Self {
        Self {
            sandbox: default_sandbox_cert(),
            production: default_production_cert(),
        }
    }
}

fn default_sandbox_cert() -> PathBuf {
    PathBuf::from("certs/sandbox.cer")
}

fn default_production_cert() -> PathBuf {
    PathBuf::from("certs/production.cer")
}

/// Global gateway settings shared by every account.
#[derive(Clone, Serialize, Deserialize)]
pub struct DarajaConfig {
    /// Selects the certificate used for security credentials.
    #[serde(default)]
    pub environment: Environment,

    /// Lipa Na M-Pesa Online shortcode.
    pub lipa_na_mpesa: String,

    /// Lipa Na M-Pesa Online passkey.
    pub lipa_na_mpesa_passkey: String,

    /// STK push result callback.
    pub lnmocallback: Url,

    /// Test MSISDN issued by Safaricom for the sandbox.
    pub test_msisdn: String,

    /// C2B validation callback.
    pub c2b_validate_callback: Url,

    /// C2B confirmation callback.
    pub c2b_confirm_callback: Url,

    /// Public certificate locations.
    #[serde(default)]
    pub certificates: CertificatePaths,

    /// Optional per-request HTTP timeout, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Paybill accounts keyed by name.
    #[serde(default)]
    pub accounts: HashMap<String, AccountConfig>,
}

/// Settings of a single paybill account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Use the sandbox host for this account.
    #[serde(default)]
    pub sandbox: bool,

    /// Consumer key.
    pub key: String,

    /// Consumer secret.
    pub secret: String,

    /// Portal initiator username.
    pub initiator: String,

    /// Portal initiator password, encrypted into the security credential.
    pub password: String,

    /// Lipa Na M-Pesa settings of this account.
    pub lnmo: LnmoAccount,

    /// B2C queue timeout callback.
    pub b2c_timeout: Url,

    /// B2C result callback.
    pub b2c_result: Url,

    /// B2B queue timeout callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b2b_timeout: Option<Url>,

    /// B2B result callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b2b_result: Option<Url>,

    /// Account balance queue timeout callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_timeout: Option<Url>,

    /// Account balance result callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance_result: Option<Url>,

    /// Transaction status queue timeout callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_timeout: Option<Url>,

    /// Transaction status result callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_result: Option<Url>,

    /// Reversal queue timeout callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_timeout: Option<Url>,

    /// Reversal result callback.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reversal_result: Option<Url>,
}

/// Nested `lnmo` table of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LnmoAccount {
    /// Shortcode the account transacts from.
    pub paybill: String,
}

impl AccountConfig {
    /// The shortcode used as `PartyA` / `ShortCode` in account commands.
    #[must_use]
    pub fn paybill(&self) -> &str {
        &self.lnmo.paybill
    }

    /// The gateway host this account talks to.
    #[must_use]
    pub const fn base_url(&self) -> &'static str {
        if self.sandbox {
            SANDBOX_BASE_URL
        } else {
            PRODUCTION_BASE_URL
        }
    }
}

impl fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountConfig")
            .field("sandbox", &self.sandbox)
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("initiator", &self.initiator)
            .field("password", &"<redacted>")
            .field("lnmo", &self.lnmo)
            .field("b2c_timeout", &self.b2c_timeout.as_str())
            .field("b2c_result", &self.b2c_result.as_str())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for DarajaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DarajaConfig")
            .field("environment", &self.environment)
            .field("lipa_na_mpesa", &self.lipa_na_mpesa)
            .field("lipa_na_mpesa_passkey", &"<redacted>")
            .field("lnmocallback", &self.lnmocallback.as_str())
            .field("test_msisdn", &self.test_msisdn)
            .field("certificates", &self.certificates)
            .field("timeout_secs", &self.timeout_secs)
            .field("accounts", &self.accounts)
            .finish_non_exhaustive()
    }
}

impl DarajaConfig {
    /// Looks up a named account.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownAccount`] if no such account exists.
    pub fn account(&self, name: &str) -> Result<&AccountConfig, ConfigError> {
        self.accounts
            .get(name)
            .ok_or_else(|| ConfigError::UnknownAccount(name.to_owned()))
    }

    /// Certificate for the configured environment.
    #[must_use]
    pub fn certificate_path(&self) -> &Path {
        self.certificates.for_environment(self.environment)
    }

    /// Loads configuration from the path given by the `DARAJA_CONFIG`
    /// environment variable, falling back to `daraja.toml` in the current
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("DARAJA_CONFIG").unwrap_or_else(|_| "daraja.toml".to_owned());
        Self::load_from(path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a TOML document after expanding environment references.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when a required field is missing or a
    /// value has the wrong shape.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content);
        Ok(toml::from_str(&expanded)?)
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        match std::env::var(&name) {
            Ok(value) if !name.is_empty() => result.push_str(&value),
            _ => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if braced && !name.is_empty() {
                    result.push('}');
                }
            }
        }
    }

    result
}
