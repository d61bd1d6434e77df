use crate::error::InputErr;
use crate::hash::HashFunction;
use crate::registry::CircuitSpec;
use bls12_381::Scalar;
use serde::Deserialize;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Secret input. `Debug` never prints the values, dropping wipes them.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Preimage(Vec<u64>);

impl Preimage {
    pub fn new(values: Vec<u64>) -> Self {
        Self(values)
    }
    pub fn values(&self) -> &[u64] {
        &self.0
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn to_scalars(&self) -> Zeroizing<Vec<Scalar>> {
        Zeroizing::new(self.0.iter().map(|x| Scalar::from(*x)).collect())
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage(<{} redacted>)", self.0.len())
    }
}

impl From<Vec<u64>> for Preimage {
    fn from(v: Vec<u64>) -> Self {
        Self::new(v)
    }
}

/// Request as read from stdin, `{"preimage": [3, 7]}`.
#[derive(Deserialize)]
pub struct ProofRequest {
    pub preimage: Option<Vec<u64>>,
}

impl ProofRequest {
    pub fn parse(input: &str) -> Result<Preimage, InputErr> {
        let r: ProofRequest =
            serde_json::from_str(input).map_err(|e| InputErr::Malformed(e.to_string()))?;
        r.preimage
            .map(Preimage::new)
            .ok_or_else(|| InputErr::Malformed("missing preimage".to_string()))
    }
}

/// Assignment handed to the prover. Lives for one request only.
#[derive(Debug)]
pub struct Witness {
    pub private: Preimage,
    pub public: Scalar,
}

pub struct WitnessBuilder<'a, H> {
    spec: &'a CircuitSpec,
    hasher: &'a H,
}

impl<'a, H: HashFunction> WitnessBuilder<'a, H> {
    pub fn new(spec: &'a CircuitSpec, hasher: &'a H) -> Self {
        Self { spec, hasher }
    }

    /// Checks `preimage` against the circuit shape, then hashes it.
    pub fn build(&self, preimage: Preimage) -> Result<Witness, InputErr> {
        if preimage.len() != self.spec.arity {
            return Err(InputErr::WrongArity {
                expected: self.spec.arity,
                got: preimage.len(),
            });
        }
        if self.spec.width < 64 {
            if let Some(index) = preimage
                .values()
                .iter()
                .position(|x| x >> self.spec.width != 0)
            {
                return Err(InputErr::TooWide {
                    index,
                    width: self.spec.width,
                });
            }
        }
        let public = self.hasher.hash(&preimage.to_scalars());
        Ok(Witness {
            private: preimage,
            public,
        })
    }
}
