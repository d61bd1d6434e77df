use crate::error::InputErr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The circuit every deployment starts with.
pub const HASH_PREIMAGE_V1: &str = "hash_preimage_v1";

/// Shape of a registered circuit. Bump the id whenever anything here, or the
/// hash function, changes: proofs are bound to the keys generated for an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSpec {
    pub id: String,
    pub arity: usize,
    /// 1..=64
    pub width: u32,
}

impl CircuitSpec {
    /// An empty preimage has no circuit, and elements are `u64`.
    pub fn new(id: impl Into<String>, arity: usize, width: u32) -> Result<Self, InputErr> {
        let id = id.into();
        if arity == 0 {
            return Err(InputErr::InvalidCircuit(format!("{} has arity 0", id)));
        }
        if width == 0 || width > 64 {
            return Err(InputErr::InvalidCircuit(format!(
                "{} has width {}, expected 1..=64",
                id, width
            )));
        }
        Ok(Self { id, arity, width })
    }
}

#[derive(Clone, Debug)]
pub struct CircuitRegistry {
    circuits: HashMap<String, CircuitSpec>,
}

impl Default for CircuitRegistry {
    fn default() -> Self {
        Self::empty().with(CircuitSpec {
            id: HASH_PREIMAGE_V1.to_string(),
            arity: 2,
            width: 64,
        })
    }
}

impl CircuitRegistry {
    pub fn empty() -> Self {
        Self {
            circuits: HashMap::new(),
        }
    }

    pub fn with(mut self, spec: CircuitSpec) -> Self {
        self.circuits.insert(spec.id.clone(), spec);
        self
    }

    pub fn get(&self, circuit_id: &str) -> Result<&CircuitSpec, InputErr> {
        self.circuits
            .get(circuit_id)
            .ok_or_else(|| InputErr::UnknownCircuit(circuit_id.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_default_registry() {
        let r = CircuitRegistry::default();
        assert_eq!(
            r.get(HASH_PREIMAGE_V1),
            Ok(&CircuitSpec::new(HASH_PREIMAGE_V1, 2, 64).unwrap())
        );
        assert_eq!(
            r.get("hash_preimage_v0"),
            Err(InputErr::UnknownCircuit("hash_preimage_v0".to_string()))
        );
    }

    #[test]
    fn test_invalid_shape_rejected() {
        for (arity, width) in [(0, 64), (2, 0), (2, 65), (1, 128)] {
            assert_matches!(
                CircuitSpec::new("x", arity, width),
                Err(InputErr::InvalidCircuit(_))
            );
        }
        assert_eq!(CircuitSpec::new("x", 1, 64).unwrap().width, 64);
    }
}
