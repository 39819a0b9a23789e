use chrono::{DateTime, Utc};

use crate::ProtocolError;

/// Server instruction independent of any manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateDirective {
    /// Nothing newer than what the client reported.
    NoUpdateAvailable,
    /// Abandon stored updates newer than `commit_time` and launch the
    /// payload embedded in the binary.
    RollBackToEmbedded { commit_time: DateTime<Utc> },
}

impl UpdateDirective {
    pub fn parse(value: &serde_json::Value) -> Result<Self, ProtocolError> {
        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ProtocolError::MalformedDirective("missing type field".into()))?;

        match kind {
            "noUpdateAvailable" => Ok(Self::NoUpdateAvailable),
            "rollBackToEmbedded" => {
                let raw = value
                    .pointer("/parameters/commitTime")
                    .and_then(serde_json::Value::as_str)
                    .ok_or_else(|| {
                        ProtocolError::MalformedDirective("rollback without commitTime".into())
                    })?;
                let commit_time = raw
                    .parse::<DateTime<Utc>>()
                    .map_err(|e| ProtocolError::MalformedDirective(e.to_string()))?;
                Ok(Self::RollBackToEmbedded { commit_time })
            }
            other => Err(ProtocolError::MalformedDirective(format!(
                "unknown directive type: {other}"
            ))),
        }
    }
}
