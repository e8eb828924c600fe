use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::monitoring::types::CheckState;

/// Collection that holds check records in the record store
pub const CHECKS_COLLECTION: &str = "checks";

/// Exact length of a check identifier
pub const CHECK_ID_LEN: usize = 20;

/// Exact length of an owner key (a phone number without country code)
pub const OWNER_ID_LEN: usize = 10;

/// Transport used to reach a check's target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP method a probe is issued with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "get" => Some(Self::Get),
            "post" => Some(Self::Post),
            "put" => Some(Self::Put),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Lowercase form, as stored in the record
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Delete => "delete",
        }
    }

    /// Uppercase form, as sent on the wire
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// A validated check record, eligible for probing
#[derive(Debug, Clone, PartialEq)]
pub struct CheckDefinition {
    pub id: String,
    /// Phone-style key of the owning user; alerts are delivered here
    pub owner_id: String,
    pub protocol: Protocol,
    /// Hostname, path and optional query, without the scheme
    pub target: String,
    pub method: Method,
    pub success_codes: BTreeSet<u16>,
    pub timeout_seconds: u64,
    pub state: CheckState,
    /// `None` until the engine has evaluated the check once
    pub last_checked_at: Option<DateTime<Utc>>,
    /// Fields written by other owners of the record, carried through untouched
    pub extra: Map<String, Value>,
}

impl CheckDefinition {
    /// Full URL the probe is sent to
    pub fn url(&self) -> String {
        format!("{}://{}", self.protocol, self.target)
    }

    pub fn has_been_observed(&self) -> bool {
        self.last_checked_at.is_some()
    }

    /// Copy of this check after an evaluation at `checked_at`
    pub fn observed(&self, state: CheckState, checked_at: DateTime<Utc>) -> Self {
        Self { state, last_checked_at: Some(checked_at), ..self.clone() }
    }

    /// Render the record as the JSON document kept in the record store
    pub fn to_document(&self) -> Value {
        let mut doc = self.extra.clone();
        doc.insert("id".into(), Value::from(self.id.clone()));
        doc.insert("userPhone".into(), Value::from(self.owner_id.clone()));
        doc.insert("protocol".into(), Value::from(self.protocol.as_str()));
        doc.insert("url".into(), Value::from(self.target.clone()));
        doc.insert("method".into(), Value::from(self.method.as_str()));
        doc.insert(
            "successCodes".into(),
            Value::Array(self.success_codes.iter().map(|code| Value::from(*code)).collect()),
        );
        doc.insert("timeoutSeconds".into(), Value::from(self.timeout_seconds));
        doc.insert("state".into(), Value::from(self.state.as_str()));
        if let Some(checked_at) = self.last_checked_at {
            doc.insert("lastChecked".into(), Value::from(checked_at.timestamp_millis()));
        }
        Value::Object(doc)
    }
}
