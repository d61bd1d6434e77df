//! Constraint systems used outside of groth16 itself: counting the shape of a
//! circuit, and computing the full assignment while checking every constraint.

use bellman::{Circuit, ConstraintSystem, Index, LinearCombination, SynthesisError, Variable};
use bls12_381::Scalar;
use ff::Field;
use zeroize::Zeroize;

/// Counts variables and constraints without evaluating any assignment.
#[derive(Default, Debug)]
pub struct ShapeCounter {
    /// includes the constant one
    pub num_inputs: usize,
    pub num_aux: usize,
    pub num_constraints: usize,
}

impl ShapeCounter {
    pub fn run<C: Circuit<Scalar>>(circuit: C) -> Result<Self, SynthesisError> {
        let mut cs = ShapeCounter {
            num_inputs: 1,
            ..Default::default()
        };
        circuit.synthesize(&mut cs)?;
        Ok(cs)
    }
}

impl ConstraintSystem<Scalar> for ShapeCounter {
    type Root = Self;

    fn alloc<F, A, AR>(&mut self, _: A, _: F) -> Result<Variable, SynthesisError>
    where
        F: FnOnce() -> Result<Scalar, SynthesisError>,
        A: FnOnce() -> AR,
        AR: Into<String>,
    {
        self.num_aux += 1;
        Ok(Variable::new_unchecked(Index::Aux(self.num_aux - 1)))
    }

    fn alloc_input<F, A, AR>(&mut self, _: A, _: F) -> Result<Variable, SynthesisError>
    where
        F: FnOnce() -> Result<Scalar, SynthesisError>,
        A: FnOnce() -> AR,
        AR: Into<String>,
    {
        self.num_inputs += 1;
        Ok(Variable::new_unchecked(Index::Input(self.num_inputs - 1)))
    }

    fn enforce<A, AR, LA, LB, LC>(&mut self, _: A, _: LA, _: LB, _: LC)
    where
        A: FnOnce() -> AR,
        AR: Into<String>,
        LA: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
        LB: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
        LC: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
    {
        self.num_constraints += 1;
    }

    fn push_namespace<NR, N>(&mut self, _: N)
    where
        NR: Into<String>,
        N: FnOnce() -> NR,
    {
    }

    fn pop_namespace(&mut self) {}

    fn get_root(&mut self) -> &mut Self::Root {
        self
    }
}

/// Full variable assignment of a circuit.
///
/// Synthesis does not stop at the first unsatisfied constraint, the namespace
/// path of the first one is kept in `unsatisfied`. The assignment is wiped on
/// drop.
pub struct TraceAssembly {
    /// `inputs[0]` is the constant one
    pub inputs: Vec<Scalar>,
    pub aux: Vec<Scalar>,
    pub num_constraints: usize,
    pub unsatisfied: Option<String>,
    path: Vec<String>,
}

impl std::fmt::Debug for TraceAssembly {
    // the assignment embeds the private preimage
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceAssembly")
            .field("inputs", &self.inputs.len())
            .field("aux", &self.aux.len())
            .field("num_constraints", &self.num_constraints)
            .field("unsatisfied", &self.unsatisfied)
            .finish()
    }
}

impl Drop for TraceAssembly {
    fn drop(&mut self) {
        self.inputs.zeroize();
        self.aux.zeroize();
    }
}

impl TraceAssembly {
    pub fn run<C: Circuit<Scalar>>(circuit: C) -> Result<Self, SynthesisError> {
        let mut cs = TraceAssembly {
            inputs: vec![Scalar::ONE],
            aux: vec![],
            num_constraints: 0,
            unsatisfied: None,
            path: vec![],
        };
        circuit.synthesize(&mut cs)?;
        Ok(cs)
    }

    /// public inputs in `inputize` order, without the constant one
    pub fn public_inputs(&self) -> &[Scalar] {
        &self.inputs[1..]
    }

    fn eval(&self, lc: &LinearCombination<Scalar>) -> Scalar {
        lc.as_ref().iter().fold(Scalar::ZERO, |acc, (var, coeff)| {
            let value = match var.get_unchecked() {
                Index::Input(i) => self.inputs[i],
                Index::Aux(i) => self.aux[i],
            };
            acc + value * coeff
        })
    }
}

impl ConstraintSystem<Scalar> for TraceAssembly {
    type Root = Self;

    fn alloc<F, A, AR>(&mut self, _: A, f: F) -> Result<Variable, SynthesisError>
    where
        F: FnOnce() -> Result<Scalar, SynthesisError>,
        A: FnOnce() -> AR,
        AR: Into<String>,
    {
        self.aux.push(f()?);
        Ok(Variable::new_unchecked(Index::Aux(self.aux.len() - 1)))
    }

    fn alloc_input<F, A, AR>(&mut self, _: A, f: F) -> Result<Variable, SynthesisError>
    where
        F: FnOnce() -> Result<Scalar, SynthesisError>,
        A: FnOnce() -> AR,
        AR: Into<String>,
    {
        self.inputs.push(f()?);
        Ok(Variable::new_unchecked(Index::Input(self.inputs.len() - 1)))
    }

    fn enforce<A, AR, LA, LB, LC>(&mut self, annotation: A, a: LA, b: LB, c: LC)
    where
        A: FnOnce() -> AR,
        AR: Into<String>,
        LA: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
        LB: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
        LC: FnOnce(LinearCombination<Scalar>) -> LinearCombination<Scalar>,
    {
        self.num_constraints += 1;
        if self.unsatisfied.is_some() {
            return;
        }
        let a = self.eval(&a(LinearCombination::zero()));
        let b = self.eval(&b(LinearCombination::zero()));
        let c = self.eval(&c(LinearCombination::zero()));
        if a * b != c {
            let mut path = self.path.clone();
            path.push(annotation().into());
            self.unsatisfied = Some(path.join("/"));
        }
    }

    fn push_namespace<NR, N>(&mut self, name_fn: N)
    where
        NR: Into<String>,
        N: FnOnce() -> NR,
    {
        self.path.push(name_fn().into());
    }

    fn pop_namespace(&mut self) {
        self.path.pop();
    }

    fn get_root(&mut self) -> &mut Self::Root {
        self
    }
}
