use serde::{Deserialize, Serialize};

use crate::domain::{ParamId, ParamRange};

/// Static description of one host parameter, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<f64>,
}

impl ParameterInfo {
    pub fn new(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            name: None,
            default_value: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_default(mut self, default_value: f64) -> Self {
        self.default_value = Some(default_value);
        self
    }

    pub fn range(&self) -> ParamRange {
        ParamRange::new(self.min, self.max)
    }
}

/// Notifications pushed by the host at any time, in any order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum BridgeEvent {
    ParamChanged { id: ParamId, value: f64 },
}
