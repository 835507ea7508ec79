use std::collections::{BTreeMap, HashMap};

use shared::{
    domain::{ParamId, ParamRange},
    protocol::ParameterInfo,
};
use thiserror::Error;

use crate::bridge::Bridge;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("parameter {id} has a non-finite bound (min {min}, max {max})")]
    NonFiniteBound { id: ParamId, min: f64, max: f64 },
    #[error("parameter {id} has min {min} above max {max}")]
    InvertedRange { id: ParamId, min: f64, max: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDescriptor {
    pub id: ParamId,
    pub min: f64,
    pub max: f64,
    pub name: Option<String>,
    pub default_value: Option<f64>,
}

impl ParameterDescriptor {
    pub fn range(&self) -> ParamRange {
        ParamRange::new(self.min, self.max)
    }
}

/// Immutable id -> range table describing every parameter the host knows.
#[derive(Debug, Clone, Default)]
pub struct ParameterRegistry {
    descriptors: BTreeMap<ParamId, ParameterDescriptor>,
}

impl ParameterRegistry {
    pub fn new(info: HashMap<ParamId, ParameterInfo>) -> Result<Self, RegistryError> {
        let mut descriptors = BTreeMap::new();
        for (id, info) in info {
            if !info.min.is_finite() || !info.max.is_finite() {
                return Err(RegistryError::NonFiniteBound {
                    id,
                    min: info.min,
                    max: info.max,
                });
            }
            if info.min > info.max {
                return Err(RegistryError::InvertedRange {
                    id,
                    min: info.min,
                    max: info.max,
                });
            }
            descriptors.insert(
                id.clone(),
                ParameterDescriptor {
                    id,
                    min: info.min,
                    max: info.max,
                    name: info.name,
                    default_value: info.default_value,
                },
            );
        }
        Ok(Self { descriptors })
    }

    pub fn from_bridge(bridge: &dyn Bridge) -> Result<Self, RegistryError> {
        Self::new(bridge.parameter_info())
    }

    pub fn descriptor(&self, id: &ParamId) -> Option<&ParameterDescriptor> {
        self.descriptors.get(id)
    }

    pub fn range(&self, id: &ParamId) -> Option<ParamRange> {
        self.descriptors.get(id).map(ParameterDescriptor::range)
    }

    /// Clamps `value` into the parameter's range. Unknown ids pass through.
    pub fn clamp(&self, id: &ParamId, value: f64) -> f64 {
        match self.range(id) {
            Some(range) => range.clamp(value),
            None => value,
        }
    }

    pub fn contains(&self, id: &ParamId) -> bool {
        self.descriptors.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ParamId> {
        self.descriptors.keys()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
