use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageConfigError {
    #[error("unknown stage kind '{kind}'")]
    UnknownKind { kind: String },
    #[error("stage '{stage}' requires parameter '{param}'")]
    MissingParam { stage: String, param: String },
    #[error("stage '{stage}' parameter '{param}' {reason}")]
    InvalidParam {
        stage: String,
        param: String,
        reason: String,
    },
    #[error("stage '{stage}' does not accept parameter '{param}'")]
    UnknownParam { stage: String, param: String },
    #[error("stage '{stage}' keeps frame history and cannot follow '{dropper}', which drops frames")]
    HistoryAfterDrop { stage: String, dropper: String },
}

/// Typed, validating view over a stage config's raw JSON parameters.
pub struct StageParams<'a> {
    kind: &'a str,
    raw: &'a BTreeMap<String, Value>,
}

impl<'a> StageParams<'a> {
    pub fn new(kind: &'a str, raw: &'a BTreeMap<String, Value>) -> Self {
        Self { kind, raw }
    }

    pub fn kind(&self) -> &str {
        self.kind
    }

    /// Rejects any parameter name outside `allowed`.
    pub fn expect_only(&self, allowed: &[&str]) -> Result<(), StageConfigError> {
        match self.raw.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(unknown) => Err(StageConfigError::UnknownParam {
                stage: self.kind.to_string(),
                param: unknown.clone(),
            }),
            None => Ok(()),
        }
    }

    pub fn u32(&self, name: &str) -> Result<Option<u32>, StageConfigError> {
        let Some(value) = self.raw.get(name) else {
            return Ok(None);
        };
        value
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(Some)
            .ok_or_else(|| self.invalid(name, "must be a non-negative integer"))
    }

    pub fn f64(&self, name: &str) -> Result<Option<f64>, StageConfigError> {
        let Some(value) = self.raw.get(name) else {
            return Ok(None);
        };
        value
            .as_f64()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| self.invalid(name, "must be a number"))
    }

    pub fn str(&self, name: &str) -> Result<Option<&'a str>, StageConfigError> {
        let Some(value) = self.raw.get(name) else {
            return Ok(None);
        };
        value
            .as_str()
            .map(Some)
            .ok_or_else(|| self.invalid(name, "must be a string"))
    }

    pub fn required_u32(&self, name: &str) -> Result<u32, StageConfigError> {
        self.u32(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn required_str(&self, name: &str) -> Result<&'a str, StageConfigError> {
        self.str(name)?.ok_or_else(|| self.missing(name))
    }

    pub fn invalid(&self, name: &str, reason: impl Into<String>) -> StageConfigError {
        StageConfigError::InvalidParam {
            stage: self.kind.to_string(),
            param: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn missing(&self, name: &str) -> StageConfigError {
        StageConfigError::MissingParam {
            stage: self.kind.to_string(),
            param: name.to_string(),
        }
    }
}
