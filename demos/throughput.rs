//! Proving throughput of the full pipeline on this machine.
//!
//! ```shell
//! cargo run --release --example throughput -- 32
//! ```

use hashproof::registry::HASH_PREIMAGE_V1;
use hashproof::{Pipeline, ProverConfig};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ProofMetrics {
    pub proofs_per_second: f64,
    pub core_seconds_per_proof: f64,
    pub cost_per_proof: f64, // $
}

impl fmt::Display for ProofMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Proof Metrics ===")?;
        writeln!(f, "proofs/sec            : {:>10.2}", self.proofs_per_second)?;
        writeln!(
            f,
            "core-sec / proof      : {:>10.4}",
            self.core_seconds_per_proof
        )?;
        writeln!(f, "cost / proof (USD)    : ${:>10.8}", self.cost_per_proof)?;
        Ok(())
    }
}

pub fn compute_metrics(
    n_proofs: usize,
    wall: Duration,
    cpu_cores_used: usize,
    cpu_core_cost_per_hour: f64, // $ per core-hour
) -> ProofMetrics {
    let t_sec = wall.as_secs_f64();
    let n = n_proofs as f64;
    let cores = cpu_cores_used as f64;

    let core_seconds_per_proof = t_sec * cores / n;
    let cost_per_proof = core_seconds_per_proof / 3600.0 * cpu_core_cost_per_hour;

    ProofMetrics {
        proofs_per_second: n / t_sec,
        core_seconds_per_proof,
        cost_per_proof,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let n: usize = match std::env::args().nth(1) {
        Some(s) => s.parse()?,
        None => 16,
    };
    let dir = tempfile::tempdir()?;
    let pipeline = Arc::new(Pipeline::groth16(&ProverConfig::new(dir.path())));

    let k = Instant::now();
    pipeline.setup(HASH_PREIMAGE_V1, false).await?;
    println!("setup {:?}", k.elapsed());

    let k = Instant::now();
    let mut jobs = Vec::with_capacity(n);
    for i in 0..n as u64 {
        let p = pipeline.clone();
        jobs.push(tokio::spawn(async move {
            p.run(HASH_PREIMAGE_V1, vec![i, i * 7 + 1]).await
        }));
    }
    for j in jobs {
        j.await??;
    }
    println!("{} proofs {:?}", n, k.elapsed());
    println!("{}", compute_metrics(n, k.elapsed(), num_cpus::get(), 0.05));
    Ok(())
}
