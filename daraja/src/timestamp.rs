//! Gateway timestamps and the Lipa Na M-Pesa password.
//!
//! STK push and STK query requests carry a `Timestamp` in the gateway's local
//! time (East Africa Time, UTC+3) formatted as `YYYYMMDDHHMMSS`, and a
//! `Password` derived from the shortcode, the passkey and that same timestamp.

use std::fmt::{Display, Formatter};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use chrono::{DateTime, FixedOffset, Offset, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Offset of East Africa Time from UTC, in seconds.
const EAT_OFFSET_SECS: i32 = 3 * 3600;

const FORMAT: &str = "%Y%m%d%H%M%S";

/// A `YYYYMMDDHHMMSS` timestamp as expected by the gateway.
///
/// # Serialization
///
/// Serialized as a string of 14 digits:
///
/// ```json
/// "20240131235959"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GatewayTimestamp(String);

impl GatewayTimestamp {
    /// The current time in East Africa Time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Formats an instant in East Africa Time.
    #[must_use]
    pub fn from_datetime<Tz: TimeZone>(at: DateTime<Tz>) -> Self {
        let eat = FixedOffset::east_opt(EAT_OFFSET_SECS).unwrap_or_else(|| Utc.fix());
        Self(at.with_timezone(&eat).format(FORMAT).to_string())
    }

    /// Returns the formatted timestamp.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for GatewayTimestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for GatewayTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for GatewayTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.len() != 14 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(serde::de::Error::custom(
                "timestamp must be 14 digits (YYYYMMDDHHMMSS)",
            ));
        }
        Ok(Self(s))
    }
}

/// Lipa Na M-Pesa password: `base64(shortcode + passkey + timestamp)`.
#[must_use]
pub fn lnmo_password(shortcode: &str, passkey: &str, timestamp: &GatewayTimestamp) -> String {
    b64.encode(format!("{shortcode}{passkey}{timestamp}"))
}
