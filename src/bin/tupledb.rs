//! # tupledb CLI Entry Point
//!
//! Interactive shell over the query facade.
//!
//! ```bash
//! # trees live as file pairs under the given directory
//! tupledb ./data
//!
//! tupledb> CREATE users 'INT' 'STRING<16> BOOL'
//! OK
//! tupledb> INSERT users '7' 'alice 1'
//! OK
//! tupledb> GET users '7'
//! alice 1
//! ```
//!
//! `.quit` or Ctrl-D exits. Errors print and do not terminate the loop.

use std::env;
use std::path::PathBuf;

use eyre::{bail, Result, WrapErr};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tupledb::QueryEngine;

const PROMPT: &str = "tupledb> ";

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let mut base_dir: Option<PathBuf> = None;
    for arg in &args[1..] {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                return Ok(());
            }
            "--version" | "-v" => {
                println!("tupledb {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            flag if flag.starts_with('-') => {
                bail!("unknown option: {}", flag);
            }
            path => {
                if base_dir.is_some() {
                    bail!("multiple directories specified");
                }
                base_dir = Some(PathBuf::from(path));
            }
        }
    }

    let base_dir = base_dir.unwrap_or_else(|| PathBuf::from("."));
    if !base_dir.is_dir() {
        std::fs::create_dir_all(&base_dir)
            .wrap_err_with(|| format!("failed to create '{}'", base_dir.display()))?;
    }

    let engine = QueryEngine::new(&base_dir);
    let mut editor = DefaultEditor::new().wrap_err("failed to initialize line editor")?;

    println!("tupledb {} (trees in {})", env!("CARGO_PKG_VERSION"), base_dir.display());
    println!("Commands: CREATE, INSERT, GET. Type .quit to exit.");

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);

                if line == ".quit" || line == ".exit" {
                    break;
                }

                match engine.execute(line) {
                    Ok(output) => println!("{}", output),
                    Err(err) => eprintln!("Error: {:#}", err),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Input error: {}", err);
                break;
            }
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Usage: tupledb [DIRECTORY]");
    println!();
    println!("Starts an interactive shell whose trees live under DIRECTORY");
    println!("(default: current directory).");
    println!();
    println!("Options:");
    println!("  -h, --help      Show this help");
    println!("  -v, --version   Show version");
}
