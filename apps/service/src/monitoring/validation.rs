//! Normalization and validation of raw check records.
//!
//! A record read from the store is untrusted: any writer may have left it
//! half-populated or mistyped. Only records that pass `validate_check` are
//! ever probed.

use std::collections::BTreeSet;

use chrono::DateTime;
use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::database::models::{CHECK_ID_LEN, CheckDefinition, Method, OWNER_ID_LEN, Protocol};
use crate::monitoring::types::CheckState;

pub const MIN_TIMEOUT_SECONDS: u64 = 1;
pub const MAX_TIMEOUT_SECONDS: u64 = 5;

const KNOWN_FIELDS: [&str; 9] = [
    "id",
    "userPhone",
    "protocol",
    "url",
    "method",
    "successCodes",
    "timeoutSeconds",
    "state",
    "lastChecked",
];

/// A record that is not eligible for probing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "check {} is malformed (invalid fields: {})",
    .check_id.as_deref().unwrap_or("<unknown>"),
    .fields.join(", ")
)]
pub struct ValidationFailure {
    /// Id of the record, when one could be read
    pub check_id: Option<String>,
    /// Wire names of the offending fields
    pub fields: Vec<&'static str>,
}

/// Validate a raw record and normalize it into a `CheckDefinition`.
///
/// `state` and `lastChecked` never cause a rejection: they default to `down`
/// and "never observed".
pub fn validate_check(raw: &Value) -> Result<CheckDefinition, ValidationFailure> {
    let Some(record) = raw.as_object() else {
        return Err(ValidationFailure { check_id: None, fields: vec!["<document>"] });
    };

    let mut invalid = Vec::new();

    let id = trimmed_with_len(record.get("id"), CHECK_ID_LEN);
    if id.is_none() {
        invalid.push("id");
    }

    let owner_id = trimmed_with_len(record.get("userPhone"), OWNER_ID_LEN);
    if owner_id.is_none() {
        invalid.push("userPhone");
    }

    let protocol = trimmed(record.get("protocol")).and_then(Protocol::parse);
    if protocol.is_none() {
        invalid.push("protocol");
    }

    let target = trimmed(record.get("url"))
        .filter(|target| is_reachable_target(protocol.unwrap_or(Protocol::Http), target));
    if target.is_none() {
        invalid.push("url");
    }

    let method = trimmed(record.get("method")).and_then(Method::parse);
    if method.is_none() {
        invalid.push("method");
    }

    let success_codes = record.get("successCodes").and_then(success_codes);
    if success_codes.is_none() {
        invalid.push("successCodes");
    }

    let timeout_seconds = record
        .get("timeoutSeconds")
        .and_then(as_integer)
        .and_then(|seconds| u64::try_from(seconds).ok())
        .filter(|seconds| (MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(seconds));
    if timeout_seconds.is_none() {
        invalid.push("timeoutSeconds");
    }

    let (
        Some(id),
        Some(owner_id),
        Some(protocol),
        Some(target),
        Some(method),
        Some(success_codes),
        Some(timeout_seconds),
    ) = (id, owner_id, protocol, target, method, success_codes, timeout_seconds)
    else {
        let check_id = id
            .or_else(|| trimmed(record.get("id")))
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        return Err(ValidationFailure { check_id, fields: invalid });
    };

    let state = match trimmed(record.get("state")) {
        Some("up") => CheckState::Up,
        _ => CheckState::Down,
    };

    let last_checked_at = record
        .get("lastChecked")
        .and_then(as_integer)
        .filter(|millis| *millis > 0)
        .and_then(DateTime::from_timestamp_millis);

    Ok(CheckDefinition {
        id: id.to_string(),
        owner_id: owner_id.to_string(),
        protocol,
        target: target.to_string(),
        method,
        success_codes,
        timeout_seconds,
        state,
        last_checked_at,
        extra: extra_fields(record),
    })
}

fn trimmed(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).map(str::trim)
}

fn trimmed_with_len(value: Option<&Value>, len: usize) -> Option<&str> {
    trimmed(value).filter(|s| s.chars().count() == len)
}

/// Integral JSON number, accepting `3.0` the way JSON producers often emit it
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn success_codes(value: &Value) -> Option<BTreeSet<u16>> {
    let items = value.as_array().filter(|items| !items.is_empty())?;
    items
        .iter()
        .map(|item| {
            as_integer(item)
                .and_then(|code| u16::try_from(code).ok())
                .filter(|code| (100..=599).contains(code))
        })
        .collect()
}

fn is_reachable_target(protocol: Protocol, target: &str) -> bool {
    if target.is_empty() {
        return false;
    }
    Url::parse(&format!("{protocol}://{target}"))
        .map(|url| url.host_str().is_some_and(|host| !host.is_empty()))
        .unwrap_or(false)
}

fn extra_fields(record: &Map<String, Value>) -> Map<String, Value> {
    record
        .iter()
        .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
