//! Command-line front-end: `jsesi compile` / `jsesi decompile`.
//!
//! Exit codes: 0 on success, 100 plus the error count when a run fails
//! with accumulated diagnostics, 1 for argument, I/O, and structural
//! errors.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::compile::{compile_str, decompile_str, parse_esi_source, parse_js_source, CompileOptions};
use crate::error::{CompileError, Reporter};
use crate::{esi, js};

#[derive(Parser)]
#[command(name = "jsesi")]
#[command(about = "Translates between a restricted JavaScript dialect and ESI", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile JS-dialect source into ESI
    Compile(CompileArgs),
    /// Decompile ESI into JS-dialect source
    Decompile(DecompileArgs),
}

#[derive(Args)]
pub struct CompileArgs {
    /// Increase log verbosity (multiple invocations increase verbosity)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Quiet
    #[arg(short, long)]
    quiet: bool,

    /// Disable the generated-ESI warning comment
    #[arg(short = 'w', long = "no-warning")]
    no_warning: bool,

    /// Display lexical tokens instead of parsing
    #[arg(short = 'l', long = "lex")]
    lex: bool,

    /// Display the resulting syntax tree instead of the generated ESI
    #[arg(short = 'n', long = "node")]
    node: bool,

    /// Add a directory to the JSLIB lookup path
    #[arg(short = 'L', long = "library", value_name = "DIR")]
    library: Vec<PathBuf>,

    /// Optimization level (range: 0 to 9; level 9 should only be used for
    /// completely independent ESI scripts)
    #[arg(short = 'O', long = "optimize", value_name = "LEVEL", default_value_t = 7)]
    optimize: u32,

    /// Output file (defaults to stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Input file
    filename: PathBuf,
}

#[derive(Args)]
pub struct DecompileArgs {
    /// Increase log verbosity (multiple invocations increase verbosity)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,

    /// Quiet
    #[arg(short, long)]
    quiet: bool,

    /// Display lexical tokens instead of parsing
    #[arg(short = 'l', long = "lex")]
    lex: bool,

    /// Display the resulting syntax tree instead of the generated source
    #[arg(short = 'n', long = "node")]
    node: bool,

    /// Output file (defaults to stdout)
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    output: Option<PathBuf>,

    /// Input file
    filename: PathBuf,
}

pub fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return code;
        }
    };
    match cli.command {
        Commands::Compile(args) => run_compile(args),
        Commands::Decompile(args) => run_decompile(args),
    }
}

fn run_compile(args: CompileArgs) -> i32 {
    let filename = args.filename.display().to_string();
    let source = match fs::read_to_string(&args.filename) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}: ERROR: {}", filename, err);
            return 1;
        }
    };

    let verbose = if args.quiet { 0 } else { args.verbose };
    let mut lib: Vec<PathBuf> = env::var("JSLIB")
        .unwrap_or_default()
        .split(':')
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect();
    lib.extend(args.library.iter().cloned());

    if verbose >= 1 {
        eprintln!("[  ] compiling \"{}\"...", filename);
        if lib.is_empty() {
            eprintln!("[  ] library include path is empty");
        } else {
            eprintln!("[  ] library include path (in order of precedence):");
            for entry in &lib {
                eprintln!("[  ]   {}", entry.display());
            }
        }
    }

    if args.lex {
        let mut reporter = Reporter::new(&filename);
        let tokens = js::lexer::Lexer::new(&source, &mut reporter).tokenize();
        let mut out = String::new();
        for token in &tokens {
            out.push_str(&format!(
                "[{},{}] {}: {:?}\n",
                token.pos.line,
                token.pos.col,
                token.kind.name(),
                token.kind.describe()
            ));
        }
        reporter.flush_to_stderr();
        return write_output(args.output.as_deref(), &out, &filename);
    }

    if args.node {
        return match parse_js_source(&source, &filename) {
            Ok(tree) => {
                let rendered = serde_json::to_string_pretty(&tree)
                    .unwrap_or_else(|err| format!("serialization failed: {}", err));
                write_output(args.output.as_deref(), &rendered, &filename)
            }
            Err(err) => exit_code(err, &filename),
        };
    }

    let opts = CompileOptions {
        optimize_level: args.optimize.min(9),
        warn: !args.no_warning,
        debug: false,
        lib,
        verbose,
    };
    match compile_str(&source, &filename, &opts) {
        Ok(output) => write_output(args.output.as_deref(), &output, &filename),
        Err(err) => exit_code(err, &filename),
    }
}

fn run_decompile(args: DecompileArgs) -> i32 {
    let filename = args.filename.display().to_string();
    let source = match fs::read_to_string(&args.filename) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}: ERROR: {}", filename, err);
            return 1;
        }
    };

    let verbose = if args.quiet { 0 } else { args.verbose };
    if verbose >= 1 {
        eprintln!("[  ] decompiling \"{}\"...", filename);
    }

    if args.lex {
        let mut reporter = Reporter::new(&filename);
        let tokens = esi::lexer::Lexer::new(&source, &mut reporter).tokenize_with_modes();
        let mut out = String::new();
        let mut state = "initial";
        for (token, next_state) in &tokens {
            out.push_str(&format!(
                "[{},{}] {}: {:?}",
                token.pos.line,
                token.pos.col,
                token.kind.name(),
                token.kind.describe()
            ));
            if *next_state != state {
                out.push_str(&format!(" (next state: {})", next_state));
                state = *next_state;
            }
            out.push('\n');
        }
        reporter.flush_to_stderr();
        return write_output(args.output.as_deref(), &out, &filename);
    }

    if args.node {
        return match parse_esi_source(&source, &filename) {
            Ok(tree) => {
                let rendered = serde_json::to_string_pretty(&tree)
                    .unwrap_or_else(|err| format!("serialization failed: {}", err));
                write_output(args.output.as_deref(), &rendered, &filename)
            }
            Err(err) => exit_code(err, &filename),
        };
    }

    match decompile_str(&source, &filename) {
        Ok(output) => write_output(args.output.as_deref(), &output, &filename),
        Err(err) => exit_code(err, &filename),
    }
}

fn write_output(target: Option<&std::path::Path>, content: &str, filename: &str) -> i32 {
    let result = match target {
        Some(path) => fs::write(path, content),
        None => io::stdout().write_all(content.as_bytes()),
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{}: ERROR: {}", filename, err);
            1
        }
    }
}

/// Accumulated diagnostics map to 100 + count (already on stderr);
/// anything fatal prints once and exits 1.
fn exit_code(err: CompileError, filename: &str) -> i32 {
    match err {
        CompileError::Errors { count, .. } => (100 + count).min(i32::MAX as usize) as i32,
        CompileError::Fatal(e) => {
            match e.pos {
                Some(pos) => eprintln!("{}@{}: ERROR: {}", filename, pos, e),
                None => eprintln!("{}: ERROR: {}", filename, e),
            }
            1
        }
        CompileError::Io(e) => {
            eprintln!("{}: ERROR: {}", filename, e);
            1
        }
    }
}
