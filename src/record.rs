//! Product records and the eligibility policy that decides which of them get
//! expiry fields.
//!
//! Records are kept as raw JSON objects so that fields this job does not own
//! survive a rewrite untouched and in their original order.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Status value of a sold product.
pub const STATUS_SOLD: &str = "sold";

pub const FIELD_STATUS: &str = "status";
pub const FIELD_SOLD_AT: &str = "soldAt";

/// Tier document / tier cache mirror field names.
pub const FIELD_EXPIRES_AT: &str = "expiresAt";
pub const FIELD_EXPIRES_DATE: &str = "expiresDate";

/// Client-key cache field names. The casing differs from the tier mirror on purpose.
pub const FIELD_CLIENT_EXPIRES_AT: &str = "expires_at";
pub const FIELD_CLIENT_EXPIRES_DATE: &str = "expires_date";

/// How records without a usable sale time are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum EligibilityPolicy {
    /// Sold records whose `soldAt` is not the sentinel get expiry fields.
    /// Records whose `soldAt` is the sentinel or absent get them cleared.
    #[serde(rename = "sentinel_aware")]
    SentinelAware,
    /// Records with no `soldAt` are left exactly as they are. Sold records with
    /// a `soldAt` get expiry fields. Nothing is ever cleared.
    #[default]
    #[serde(rename = "null_preserving")]
    NullPreserving,
}

/// What to do with one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    /// Derive expiry fields from this `soldAt` value (may still fail to parse).
    Compute(Option<&'a str>),
    /// Remove or null the expiry fields.
    Clear,
    /// Leave the record alone.
    Skip,
}

impl EligibilityPolicy {
    /// Decide the action for a record with the given `status` and `soldAt`.
    pub fn decide<'a>(
        &self,
        status: Option<&str>,
        sold_at: Option<&'a str>,
        sentinel: &str,
    ) -> Action<'a> {
        let sold = status == Some(STATUS_SOLD);
        match self {
            EligibilityPolicy::SentinelAware => {
                let is_sentinel = sold_at == Some(sentinel);
                if sold && !is_sentinel {
                    Action::Compute(sold_at)
                } else if is_sentinel || sold_at.is_none() {
                    Action::Clear
                } else {
                    Action::Skip
                }
            }
            EligibilityPolicy::NullPreserving => match sold_at {
                None => Action::Skip,
                Some(_) if sold => Action::Compute(sold_at),
                Some(_) => Action::Skip,
            },
        }
    }
}

/// Borrowed view of a product record stored as a JSON object.
#[derive(Debug, Clone, Copy)]
pub struct ProductRecord<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> ProductRecord<'a> {
    pub fn new(fields: &'a Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn status(&self) -> Option<&'a str> {
        self.fields.get(FIELD_STATUS).and_then(Value::as_str)
    }

    /// The raw `soldAt`: `None` when absent or JSON null.
    pub fn sold_at(&self) -> Option<SoldAt<'a>> {
        match self.fields.get(FIELD_SOLD_AT)? {
            Value::Null => None,
            Value::String(s) => Some(SoldAt::Text(s.as_str())),
            other => Some(SoldAt::Other(other)),
        }
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.fields.get(FIELD_EXPIRES_AT).and_then(Value::as_i64)
    }

    pub fn expires_date(&self) -> Option<&'a str> {
        self.fields.get(FIELD_EXPIRES_DATE).and_then(Value::as_str)
    }
}

/// A `soldAt` value that is present in a JSON record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SoldAt<'a> {
    Text(&'a str),
    /// Not a string: a number, bool, object or array. Never parseable.
    Other(&'a Value),
}

impl<'a> SoldAt<'a> {
    /// Text to hand to the time resolver. Non-string values become a
    /// placeholder that always fails the format check.
    pub fn as_text(&self) -> &'a str {
        match self {
            SoldAt::Text(s) => s,
            SoldAt::Other(_) => "<non-string soldAt>",
        }
    }
}

/// Set `expiresAt`/`expiresDate` on a JSON record.
pub fn set_expiry(fields: &mut Map<String, Value>, epoch_ms: i64, date: &str) {
    fields.insert(FIELD_EXPIRES_AT.to_string(), Value::from(epoch_ms));
    fields.insert(FIELD_EXPIRES_DATE.to_string(), Value::from(date));
}

/// Null `expiresAt`/`expiresDate` on a JSON record.
pub fn clear_expiry(fields: &mut Map<String, Value>) {
    fields.insert(FIELD_EXPIRES_AT.to_string(), Value::Null);
    fields.insert(FIELD_EXPIRES_DATE.to_string(), Value::Null);
}

/// Truncated license key for log lines.
pub fn key_prefix(key: &str) -> String {
    const MAX_CHARS: usize = 20;
    if key.chars().count() <= MAX_CHARS {
        key.to_string()
    } else {
        let head: String = key.chars().take(MAX_CHARS).collect();
        format!("{head}...")
    }
}
