use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use yvm::asm;
use yvm::config::RuntimeConfig;
use yvm::package::{self, MANIFEST_FILE, ProjectManifest};
use yvm::runner::{self, RunStats};
use yvm::vm::StdHost;
use yvm::vm::bytecode;
use yvm::vm::verifier::Verifier;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum StatsFormatArg {
    #[default]
    Human,
    Json,
}

#[derive(Parser)]
#[command(name = "yvm")]
#[command(about = "A minimal register-based virtual machine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new yvm project
    Init {
        /// Project name (defaults to directory name)
        name: Option<String>,
    },
    /// Run an assembly listing or a binary image
    Run {
        /// The program to run (defaults to yvm.toml entry if in a project)
        file: Option<PathBuf>,

        /// Runtime configuration file (defaults to ./yvm.toml when present)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Log every dispatched instruction to stderr
        #[arg(long)]
        trace: bool,

        /// Trap after this many instructions
        #[arg(long, value_name = "N")]
        max_cycles: Option<u64>,

        /// Stack size in bytes
        #[arg(long, value_name = "BYTES")]
        stack_size: Option<usize>,

        /// Skip bytecode verification before running
        #[arg(long)]
        no_verify: bool,

        /// Print execution statistics to stderr (human or json format)
        #[arg(long, value_enum, require_equals = true, num_args = 0..=1, default_missing_value = "human")]
        stats: Option<StatsFormatArg>,

        /// Print `exit(<status>)` to stdout when the program exits normally
        #[arg(long)]
        print_exit: bool,
    },
    /// Assemble a listing into a binary image
    Asm {
        /// The assembly listing
        input: PathBuf,

        /// Output image (defaults to the input with a .yvm extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a program as an assembly listing
    Disasm {
        /// The program to disassemble (listing or image)
        file: PathBuf,
    },
    /// Verify a program without running it
    Check {
        /// The program to check (defaults to yvm.toml entry if in a project)
        file: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let trace = matches!(cli.command, Commands::Run { trace: true, .. });
    init_tracing(trace);

    match cli.command {
        Commands::Init { name } => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            match package::init_project(&cwd, name.as_deref()) {
                Ok(name) => println!("Created yvm project '{}'", name),
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Commands::Run {
            file,
            config,
            trace,
            max_cycles,
            stack_size,
            no_verify,
            stats,
            print_exit,
        } => {
            let path = match file.map_or_else(project_entry, Ok) {
                Ok(path) => path,
                Err(e) => {
                    eprintln!("error: {}", e);
                    eprintln!("usage: yvm run <file> or run from a yvm project directory");
                    return ExitCode::FAILURE;
                }
            };

            let mut runtime = match load_config(config.as_deref()) {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if trace {
                runtime.trace = true;
            }
            if max_cycles.is_some() {
                runtime.max_cycles = max_cycles;
            }
            if let Some(bytes) = stack_size {
                runtime.stack_bytes = bytes;
            }
            if no_verify {
                runtime.verify = false;
            }
            if let Err(e) = runtime.validate() {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }

            let outcome = match runner::load_file(&path)
                .and_then(|program| runner::run_program(&program, &runtime, StdHost::new()))
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            match &outcome.trap {
                Some(trap) => eprintln!("error: {}", trap),
                None if print_exit => println!("exit({})", outcome.status),
                None => {}
            }
            if let Some(format) = stats {
                print_stats(&outcome.stats, format);
            }
            return ExitCode::from(runner::exit_code(outcome.status));
        }
        Commands::Asm { input, output } => {
            let output = output.unwrap_or_else(|| input.with_extension("yvm"));
            let result = fs::read_to_string(&input)
                .map_err(|e| format!("failed to read {}: {}", input.display(), e))
                .and_then(|source| {
                    asm::assemble(&source).map_err(|e| format!("{}:{}", input.display(), e))
                })
                .and_then(|program| bytecode::serialize(&program).map_err(|e| e.to_string()))
                .and_then(|bytes| {
                    fs::write(&output, bytes)
                        .map_err(|e| format!("failed to write {}: {}", output.display(), e))
                });
            if let Err(e) = result {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        }
        Commands::Disasm { file } => match runner::load_file(&file) {
            Ok(program) => print!("{}", asm::format_program(&program)),
            Err(e) => {
                eprintln!("error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        Commands::Check { file } => {
            let path = match file.map_or_else(project_entry, Ok) {
                Ok(path) => path,
                Err(e) => {
                    eprintln!("error: {}", e);
                    eprintln!("usage: yvm check <file> or run from a yvm project directory");
                    return ExitCode::FAILURE;
                }
            };

            let program = match runner::load_file(&path) {
                Ok(program) => program,
                Err(e) => {
                    eprintln!("error: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            let errors = Verifier::new().verify_all(&program);
            if !errors.is_empty() {
                for e in &errors {
                    eprintln!("error: {}", e);
                }
                eprintln!("{} error(s) found", errors.len());
                return ExitCode::FAILURE;
            }
            println!("Verification passed.");
        }
    }

    ExitCode::SUCCESS
}

/// `--trace` forces instruction tracing; otherwise `RUST_LOG` wins over the
/// warnings-only default.
fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("yvm=trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("yvm=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn project_entry() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    ProjectManifest::load(&cwd)
        .map(|manifest| manifest.entry_path(&cwd))
        .map_err(|_| format!("no file specified and no {} found", MANIFEST_FILE))
}

/// `--config` if given, else `./yvm.toml` if present, else defaults.
fn load_config(explicit: Option<&Path>) -> Result<RuntimeConfig, String> {
    if let Some(path) = explicit {
        return RuntimeConfig::load(path).map_err(|e| e.to_string());
    }
    let local = Path::new(MANIFEST_FILE);
    if local.exists() {
        return RuntimeConfig::load(local).map_err(|e| e.to_string());
    }
    Ok(RuntimeConfig::default())
}

fn print_stats(stats: &RunStats, format: StatsFormatArg) {
    match format {
        StatsFormatArg::Human => eprint!("{}", stats.to_human()),
        StatsFormatArg::Json => match serde_json::to_string(stats) {
            Ok(json) => eprintln!("{}", json),
            Err(e) => eprintln!("error: failed to serialize stats: {}", e),
        },
    }
}
