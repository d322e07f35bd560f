//! Signed payment callbacks.
//!
//! The sender signs the concatenation, without separators, of the virtual
//! account number, the paid amount in plain decimal notation, the payment
//! timestamp and the payment reference. The receiver recomputes the same
//! message from the fields it parsed and compares signatures in constant time.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::constants::CALLBACK_MAX_SKEW_MINUTES;
use crate::error::{CallbackError, CallbackRejection};
use crate::hmac::{compute_hmac, verify_hmac};
use crate::security::mask_signature;

/// Exponents beyond this are refused rather than expanded.
const MAX_AMOUNT_EXPONENT: i64 = 64;

/// A non-negative decimal amount held in canonical plain notation: no
/// exponent, no leading zeros in the integer part, fractional digits kept as
/// written.
///
/// Deserializes from the raw text of a JSON number or from a JSON string,
/// never through a binary float: `50000.00` and `5.000000E+4` both become
/// `50000.00`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Amount(String);

impl Amount {
    pub fn parse(text: &str) -> Result<Self, CallbackError> {
        let s = text.trim();
        let invalid = || CallbackError::Build(format!("invalid amount: {text:?}"));

        if s.starts_with('-') {
            return Err(CallbackError::Build("amount must not be negative".to_string()));
        }

        let (mantissa, exponent) = match s.find(['e', 'E']) {
            Some(i) => (
                &s[..i],
                s[i + 1..].parse::<i64>().map_err(|_| invalid())?,
            ),
            None => (s, 0),
        };
        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((int_part, frac_part)) if !frac_part.is_empty() => (int_part, frac_part),
            Some(_) => return Err(invalid()),
            None => (mantissa, ""),
        };
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if int_part.is_empty() || !all_digits(int_part) || !all_digits(frac_part) {
            return Err(invalid());
        }
        if exponent.abs() > MAX_AMOUNT_EXPONENT {
            return Err(CallbackError::Build(format!(
                "amount exponent out of range: {text:?}"
            )));
        }

        let digits = format!("{int_part}{frac_part}");
        let point = int_part.len() as i64 + exponent;
        let plain = if point <= 0 {
            format!("0.{}{}", "0".repeat(point.unsigned_abs() as usize), digits)
        } else if point as usize >= digits.len() {
            format!("{digits}{}", "0".repeat(point as usize - digits.len()))
        } else {
            let (int_digits, frac_digits) = digits.split_at(point as usize);
            format!("{int_digits}.{frac_digits}")
        };

        Ok(Self(strip_leading_zeros(&plain)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn strip_leading_zeros(plain: &str) -> String {
    let (int_part, frac_part) = match plain.split_once('.') {
        Some((int_part, frac_part)) => (int_part, Some(frac_part)),
        None => (plain, None),
    };
    let trimmed = int_part.trim_start_matches('0');
    let int_part = if trimmed.is_empty() { "0" } else { trimmed };
    match frac_part {
        Some(frac) => format!("{int_part}.{frac}"),
        None => int_part.to_string(),
    }
}

impl std::fmt::Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Amount {
    type Err = CallbackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw = RawValue::from_string(self.0.clone()).map_err(ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Box<RawValue> = Deserialize::deserialize(deserializer)?;
        let text = raw.get().trim();
        let literal = if text.starts_with('"') {
            serde_json::from_str::<String>(text).map_err(de::Error::custom)?
        } else {
            text.to_string()
        };
        Amount::parse(&literal).map_err(de::Error::custom)
    }
}

/// A payment the simulator has been asked to report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub va_number: String,
    pub amount: Amount,
}

/// Body of the callback request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub va_number: String,
    pub paid_amount: Amount,
    pub payment_timestamp: String,
    pub payment_reference: String,
}

impl CallbackPayload {
    pub fn new(
        event: &PaymentEvent,
        payment_reference: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Self, CallbackError> {
        if event.va_number.trim().is_empty() {
            return Err(CallbackError::Build("va_number must not be empty".to_string()));
        }
        Ok(Self {
            va_number: event.va_number.clone(),
            paid_amount: event.amount.clone(),
            payment_timestamp: format_timestamp(at),
            payment_reference: payment_reference.into(),
        })
    }

    /// The exact byte sequence that is signed.
    pub fn canonical_message(&self) -> String {
        format!(
            "{}{}{}{}",
            self.va_number,
            self.paid_amount.as_str(),
            self.payment_timestamp,
            self.payment_reference
        )
    }

    pub fn sign(&self, secret: &[u8]) -> String {
        compute_hmac(secret, self.canonical_message().as_bytes())
    }
}

/// RFC 3339 in UTC with a `Z` suffix; fractional seconds only when non-zero,
/// with trailing zeros removed.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    let rendered = at.to_rfc3339_opts(SecondsFormat::AutoSi, true);
    let trimmed = rendered
        .strip_suffix('Z')
        .and_then(|body| body.split_once('.'))
        .map(|(seconds, fraction)| match fraction.trim_end_matches('0') {
            "" => format!("{seconds}Z"),
            fraction => format!("{seconds}.{fraction}Z"),
        });
    trimmed.unwrap_or(rendered)
}

/// Receiver-side check of an incoming callback.
///
/// The timestamp must lie within a few minutes of `now` and the signature
/// must match the recomputed one.
pub fn verify_callback(
    payload: &CallbackPayload,
    signature: Option<&str>,
    secret: &[u8],
    now: DateTime<Utc>,
) -> Result<(), CallbackRejection> {
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(CallbackRejection::MissingSignature)?;

    let sent_at = DateTime::parse_from_rfc3339(&payload.payment_timestamp)
        .map_err(|e| CallbackRejection::InvalidTimestamp(e.to_string()))?
        .with_timezone(&Utc);
    let drift = (now - sent_at).num_minutes().abs();
    if drift > CALLBACK_MAX_SKEW_MINUTES {
        return Err(CallbackRejection::InvalidTimestamp(format!(
            "{} is {drift} minutes away from now",
            payload.payment_timestamp
        )));
    }

    if !verify_hmac(secret, payload.canonical_message().as_bytes(), signature) {
        tracing::warn!(
            reference = %payload.payment_reference,
            signature = %mask_signature(signature),
            "Callback signature mismatch"
        );
        return Err(CallbackRejection::InvalidSignature);
    }
    Ok(())
}
