//! Reads a proof request on stdin and writes the encoded result to stdout.
//!
//! ```shell
//! echo '{"preimage": [123, 456]}' | RUST_LOG=info hashproof prove > result.bin
//! hashproof verify < result.bin
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use hashproof::encode::VerificationKeyJson;
use hashproof::registry::HASH_PREIMAGE_V1;
use hashproof::witness::ProofRequest;
use hashproof::{Pipeline, ProofError, ProverConfig};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

/// The arguments for the command.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(long, env = "HASHPROOF_ARTIFACT_DIR", default_value = "build/circuits")]
    artifact_dir: PathBuf,

    #[arg(long, env = "HASHPROOF_CIRCUIT", default_value = HASH_PREIMAGE_V1)]
    circuit: String,

    /// seeds parameter generation, e.g. a powers-of-tau file
    #[arg(long, env = "HASHPROOF_CEREMONY")]
    ceremony: Option<PathBuf>,

    #[arg(long, env = "HASHPROOF_PROVE_TIMEOUT_SECS", default_value_t = 120)]
    prove_timeout_secs: u64,

    #[arg(long, env = "HASHPROOF_SETUP_TIMEOUT_SECS", default_value_t = 600)]
    setup_timeout_secs: u64,

    /// deterministic proof blinding, never in production
    #[arg(long, env = "HASHPROOF_PROVING_SEED")]
    proving_seed: Option<u64>,

    #[arg(long, env = "HASHPROOF_NO_VERIFY_AFTER_PROVE")]
    no_verify_after_prove: bool,

    /// skip the cross-process setup lock
    #[arg(long, env = "HASHPROOF_NO_LOCK_FILE")]
    no_lock_file: bool,

    #[command(subcommand)]
    cmd: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// `{"preimage": [..]}` on stdin, abi encoded `(bytes32, bytes)` on stdout
    Prove {
        #[arg(long = "hex")]
        as_hex: bool,
    },
    /// generate keys unless they exist
    Setup {
        /// regenerate; invalidates every proof issued under the circuit id
        #[arg(long)]
        force: bool,
    },
    /// encoded result on stdin, exits non zero unless it verifies; needs a
    /// prior setup
    Verify {
        #[arg(long = "hex")]
        as_hex: bool,
    },
    /// verification key in contract constructor form, needs a prior setup
    ExportVk,
}

impl Args {
    fn config(&self) -> ProverConfig {
        let mut c = ProverConfig::new(&self.artifact_dir)
            .prove_timeout(Duration::from_secs(self.prove_timeout_secs))
            .setup_timeout(Duration::from_secs(self.setup_timeout_secs))
            .verify_after_prove(!self.no_verify_after_prove)
            .lock_file(!self.no_lock_file);
        if let Some(p) = &self.ceremony {
            c = c.ceremony(p);
        }
        if let Some(seed) = self.proving_seed {
            c = c.proving_seed(seed);
        }
        c
    }
}

fn exit_code(e: &ProofError) -> u8 {
    match e {
        ProofError::InvalidInput(_) => 2,
        ProofError::SetupFailure { .. } => 3,
        ProofError::ConstraintViolation(_) => 4,
        // EX_TEMPFAIL, callers may retry
        ProofError::ProverUnavailable(_) | ProofError::ProverTimeout(_) => 75,
        ProofError::EncodingFailure(_) => 70,
    }
}

fn read_stdin() -> anyhow::Result<Vec<u8>> {
    let mut buf = vec![];
    std::io::stdin()
        .read_to_end(&mut buf)
        .context("reading stdin")?;
    Ok(buf)
}

async fn run(args: Args) -> anyhow::Result<ExitCode> {
    let pipeline = Pipeline::groth16(&args.config());
    let mut stdout = std::io::stdout().lock();

    match args.cmd.unwrap_or(Cmd::Prove { as_hex: false }) {
        Cmd::Prove { as_hex } => {
            let input =
                Zeroizing::new(String::from_utf8(read_stdin()?).context("stdin is not utf-8")?);
            let preimage = ProofRequest::parse(input.trim()).map_err(ProofError::from)?;
            let out = pipeline.run(&args.circuit, preimage).await?;
            match as_hex {
                true => writeln!(stdout, "0x{}", hex::encode(out.as_bytes()))?,
                false => stdout.write_all(out.as_bytes())?,
            }
        }
        Cmd::Setup { force } => {
            let a = pipeline.setup(&args.circuit, force).await?;
            writeln!(stdout, "{}", a.dir.display())?;
        }
        Cmd::Verify { as_hex } => {
            let mut input = read_stdin()?;
            if as_hex {
                let s = String::from_utf8(input).context("stdin is not utf-8")?;
                input = hex::decode(s.trim().trim_start_matches("0x")).context("bad hex")?;
            }
            let ok = pipeline.verify(&args.circuit, &input).await?;
            writeln!(stdout, "{}", ok)?;
            if !ok {
                return Ok(ExitCode::from(1));
            }
        }
        Cmd::ExportVk => {
            let a = pipeline.artifacts(&args.circuit).await?;
            let json = serde_json::to_string_pretty(&VerificationKeyJson::from_vk(a.vk()))?;
            writeln!(stdout, "{}", json)?;
        }
    }
    stdout.flush()?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    // stdout carries the payload, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            let code = e.downcast_ref::<ProofError>().map(exit_code).unwrap_or(1);
            eprintln!("error: {:#}", e);
            ExitCode::from(code)
        }
    }
}
