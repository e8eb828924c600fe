use serde::{Deserialize, Serialize};

/// Last-known classification of a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Up,
    #[default]
    Down,
}

impl CheckState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckState::Up => "up",
            CheckState::Down => "down",
        }
    }
}

impl std::fmt::Display for CheckState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a probe produced no status code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeErrorCause {
    /// Connection or transport failure
    Network,
    /// No response within the check's deadline
    Timeout,
}

impl std::fmt::Display for ProbeErrorCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeErrorCause::Network => write!(f, "network"),
            ProbeErrorCause::Timeout => write!(f, "timeout"),
        }
    }
}

/// Terminal result of a single probe.
///
/// Serialized without a tag, so a log line carries either
/// `{"responseCode":200}` or `{"error":"timeout"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProbeOutcome {
    Response {
        #[serde(rename = "responseCode")]
        response_code: u16,
    },
    Error {
        error: ProbeErrorCause,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl ProbeOutcome {
    pub fn response(response_code: u16) -> Self {
        Self::Response { response_code }
    }

    pub fn network(detail: impl Into<String>) -> Self {
        Self::Error { error: ProbeErrorCause::Network, detail: Some(detail.into()) }
    }

    pub fn timeout() -> Self {
        Self::Error { error: ProbeErrorCause::Timeout, detail: None }
    }

    pub fn response_code(&self) -> Option<u16> {
        match self {
            Self::Response { response_code } => Some(*response_code),
            Self::Error { .. } => None,
        }
    }

    pub fn error(&self) -> Option<ProbeErrorCause> {
        match self {
            Self::Response { .. } => None,
            Self::Error { error, .. } => Some(*error),
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Response { response_code } => write!(f, "status {response_code}"),
            Self::Error { error, detail: Some(detail) } => write!(f, "{error} error: {detail}"),
            Self::Error { error, detail: None } => write!(f, "{error} error"),
        }
    }
}
