use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use hashguard::{Config, ValidationContext, Validator};

mod cmd;
mod hash;
mod verify;

/// Component name the CLI registers its validators under.
const OWNER: &str = "cli";

#[derive(Parser)]
#[command(
    name = "hashguard",
    version,
    about = "Hash-based file and command output validator"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log debug details to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Show project information
    #[arg(long)]
    about: bool,
}

/// Digest algorithm selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl From<AlgorithmArg> for hashguard::Algorithm {
    fn from(a: AlgorithmArg) -> Self {
        match a {
            AlgorithmArg::Sha224 => hashguard::Algorithm::Sha224,
            AlgorithmArg::Sha256 => hashguard::Algorithm::Sha256,
            AlgorithmArg::Sha384 => hashguard::Algorithm::Sha384,
            AlgorithmArg::Sha512 => hashguard::Algorithm::Sha512,
        }
    }
}

#[derive(Subcommand)]
#[command(next_display_order = None)]
enum Commands {
    /// Print the digest of a file
    Hash {
        /// File to hash
        file: PathBuf,
        /// Digest algorithm [default: from config, else sha256]
        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,
        /// Also write the digest to this file
        #[arg(long)]
        hash_file: Option<PathBuf>,
        /// Read size in bytes
        #[arg(long)]
        block_size: Option<usize>,
    },
    /// Check a file against a digest or a hash file
    Verify {
        /// File to check
        file: PathBuf,
        /// Expected hex digest
        #[arg(long)]
        digest: Option<String>,
        /// File whose first line is the expected digest
        #[arg(long)]
        hash_file: Option<PathBuf>,
        /// Digest algorithm [default: from config, else sha256]
        #[arg(long, value_enum)]
        algorithm: Option<AlgorithmArg>,
        /// Read size in bytes
        #[arg(long)]
        block_size: Option<usize>,
    },
    /// Run a shell command and search its output
    Cmd {
        /// Command line, run through the shell
        command: String,
        /// Substring the output must contain
        #[arg(long)]
        search: Option<String>,
        /// Pattern the output must match
        #[arg(long)]
        regex: Option<String>,
        /// Seconds before the command is killed [default: from config, else 2]
        #[arg(long)]
        timeout: Option<f64>,
        /// Accepted return code (repeatable; any code when omitted)
        #[arg(long = "allow-code")]
        allow_codes: Vec<i32>,
        /// Charset of the command output
        #[arg(long, default_value = "utf-8")]
        decode: String,
    },
}

pub fn run(cli: Cli) {
    init_logging(cli.verbose);

    if cli.about {
        print_about();
        return;
    }

    let config = cli.config.as_deref();
    match cli.command {
        Some(Commands::Hash {
            file,
            algorithm,
            hash_file,
            block_size,
        }) => hash::run(config, file, algorithm, hash_file, block_size),
        Some(Commands::Verify {
            file,
            digest,
            hash_file,
            algorithm,
            block_size,
        }) => verify::run(config, file, digest, hash_file, algorithm, block_size),
        Some(Commands::Cmd {
            command,
            search,
            regex,
            timeout,
            allow_codes,
            decode,
        }) => cmd::run(config, command, search, regex, timeout, allow_codes, decode),
        None => {
            eprintln!("Usage: hashguard <command> [args]");
            eprintln!("Run `hashguard --help` for details.");
            std::process::exit(2);
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp(None)
        .init();
}

fn print_about() {
    println!(
        "hashguard: hash-based integrity validators\n\
         ├─ version:    {}\n\
         └─ licence:    {} https://www.apache.org/licenses/LICENSE-2.0",
        env!("CARGO_PKG_VERSION"),
        env!("CARGO_PKG_LICENSE"),
    );
}

/// Build the context from `--config`, exiting with status 2 on failure.
fn load_context(config: Option<&Path>, subcommand: &str) -> ValidationContext {
    let loaded = match config {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    };
    match loaded.and_then(ValidationContext::new) {
        Ok(ctx) => ctx,
        Err(e) => fail(subcommand, e),
    }
}

/// Explicit validator for `--algorithm`, or `None` for the component default.
fn algorithm_validator(algorithm: Option<AlgorithmArg>) -> Option<Arc<Validator>> {
    algorithm.map(|a| {
        let algorithm: hashguard::Algorithm = a.into();
        Arc::new(
            Validator::new(
                format!("{OWNER}_{algorithm}"),
                format!("{algorithm} file validator"),
            )
            .with_algorithm(algorithm)
            .with_owner(OWNER),
        )
    })
}

fn fail(subcommand: &str, e: hashguard::HashguardError) -> ! {
    eprintln!("hashguard {subcommand}: {e}");
    std::process::exit(2);
}
