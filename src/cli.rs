//! CLI: config (validate) | compile (generate project) | schema (export)
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rayon::prelude::*;
use serde_json::Value;

use crate::error::Error;
use crate::loader::RunContext;
use crate::pipeline::{self, Compiled};
use crate::settings::Settings;

// ———————————————————————————————————————————————————————————————————————————— //
// TYPES
// ———————————————————————————————————————————————————————————————————————————— //

/// validate device configurations and generate firmware projects from them
#[derive(Parser, Debug)]
#[command(name = "nodegen", version)]
pub struct CommandLineInterface {
    /// more output; repeat for more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON settings file (build root, log filter, platformio defaults)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// validate and print the canonical configuration as JSON
    Config(ConfigOut),
    /// validate, generate code and write one project per input
    Compile(CompileOut),
    /// print the JSON-Schema of every known component
    Schema(SchemaOut),
}

#[derive(Args, Debug, Clone)]
struct InputSettings {
    /// JSON Pointer to select the config inside each document (e.g. /devices/0)
    #[arg(long)]
    json_pointer: Option<String>,

    /// jq pre-process filter for each document; every output is one config
    #[arg(long)]
    jq_expr: Option<String>,

    /// One or more inputs. May be literal paths or quoted glob patterns
    #[arg(long, short, num_args = 1.., required = true)]
    input: Vec<String>,
}

#[derive(clap::Parser, Debug)]
struct ConfigOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// output .json file (stdout if omitted); with several inputs a JSON array is written
    #[arg(short, long)]
    out: Option<PathBuf>,
}

#[derive(clap::Parser, Debug)]
struct CompileOut {
    #[command(flatten)]
    input_settings: InputSettings,

    /// build root; each device gets `<out-dir>/<name>` (defaults to the settings' build root)
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// generate but do not write anything
    #[arg(long)]
    dry_run: bool,
}

#[derive(clap::Parser, Debug)]
struct SchemaOut {
    /// output .json file (stdout if omitted)
    #[arg(short, long)]
    out: Option<PathBuf>,
}

/// One config document and where it came from.
#[derive(Debug, Clone)]
struct Document {
    label: String,
    value: Value,
}

// ———————————————————————————————————————————————————————————————————————————— //
// IMPLEMENTATION
// ———————————————————————————————————————————————————————————————————————————— //

impl InputSettings {
    fn load(&self) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        for source_path in resolve_file_path_patterns(&self.input)? {
            let label = source_path.to_string_lossy().to_string();
            let source = std::fs::read_to_string(&source_path)
                .with_context(|| format!("failed to read source file {label}"))?;
            let mut value = serde_json::from_str::<Value>(&source)
                .with_context(|| format!("failed to parse JSON source file {label}"))?;
            if let Some(pointer) = self.json_pointer.as_deref() {
                value = value
                    .pointer(pointer)
                    .cloned()
                    .ok_or_else(|| anyhow!("JSON pointer {pointer} matches nothing in {label}"))?;
            }
            match self.jq_expr.as_deref() {
                None => out.push(Document { label, value }),
                Some(jq_expr) => {
                    let results = crate::jq_exec::run_jaq(jq_expr, &value)
                        .with_context(|| format!("failed to apply jq expression to {label}"))?;
                    if results.is_empty() {
                        tracing::warn!(source = %label, "jq expression produced no documents");
                    }
                    let many = results.len() > 1;
                    for (i, value) in results.into_iter().enumerate() {
                        let label = if many { format!("{label}#{i}") } else { label.clone() };
                        out.push(Document { label, value });
                    }
                }
            }
        }
        Ok(out)
    }
}

impl CommandLineInterface {
    pub fn load() -> Self {
        Self::parse()
    }

    pub fn run(&self) -> Result<ExitCode> {
        let settings = Settings::load_or_default(self.settings.as_deref())?;
        crate::logging::init(self.verbose, settings.log_filter.as_deref())?;
        match &self.cmd {
            Command::Config(target) => run_config(target),
            Command::Compile(target) => run_compile(target, &settings),
            Command::Schema(target) => {
                let schema = crate::json_schema::export(&RunContext::builtin()?);
                emit(target.out.as_deref(), &serde_json::to_string_pretty(&schema)?)?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn run_config(target: &ConfigOut) -> Result<ExitCode> {
    let documents = target.input_settings.load()?;
    let results: Vec<(String, Result<Value, Error>)> =
        documents.par_iter().map(|doc| (doc.label.clone(), pipeline::canonical(&doc.value))).collect();
    let mut valid = Vec::new();
    let mut failed = false;
    for (label, result) in results {
        match result {
            Ok(value) => valid.push(value),
            Err(error) => {
                failed = true;
                report_failure(&label, &error);
            }
        }
    }
    let text = match valid.as_slice() {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    if !valid.is_empty() {
        emit(target.out.as_deref(), &text)?;
    }
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn run_compile(target: &CompileOut, settings: &Settings) -> Result<ExitCode> {
    let documents = target.input_settings.load()?;
    let build_root = target.out_dir.clone().unwrap_or_else(|| settings.build_root.clone());
    let results: Vec<(String, Result<Compiled, Error>)> = documents
        .par_iter()
        .map(|doc| (doc.label.clone(), pipeline::compile(&doc.value, settings)))
        .collect();

    let mut failed = false;
    for (label, result) in results {
        let compiled = match result {
            Ok(compiled) => compiled,
            Err(error) => {
                failed = true;
                report_failure(&label, &error);
                continue;
            }
        };
        let dir = build_root.join(compiled.name());
        if target.dry_run {
            eprintln!("{} {label} → {} (dry run)", "✔".green(), dir.display());
            continue;
        }
        match crate::writer::write_project(&compiled.project, &dir, settings.write_manifest) {
            Ok(files) => eprintln!("{} {label} → {} ({} files)", "✔".green(), dir.display(), files.len()),
            Err(error) => {
                failed = true;
                report_failure(&label, &Error::from(error));
            }
        }
    }
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

fn report_failure(label: &str, error: &Error) {
    eprintln!("{} {}", "✘".red(), label.bold());
    for line in error.to_string().lines() {
        eprintln!("  {}", line.red());
    }
}

// ———————————————————————————————————————————————————————————————————————————— //
// INTERNAL HELPERS
// ———————————————————————————————————————————————————————————————————————————— //

fn emit(out: Option<&Path>, text: &str) -> Result<()> {
    let Some(out) = out else {
        println!("{text}");
        return Ok(());
    };
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(out, text).with_context(|| format!("failed to write {}", out.display()))
}

fn resolve_file_path_patterns<I>(patterns: I) -> Result<Vec<PathBuf>>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    fn has_glob_chars(s: &str) -> bool {
        s.bytes().any(|b| matches!(b, b'*' | b'?' | b'['))
    }

    let mut out = Vec::<PathBuf>::new();
    for raw in patterns {
        let pattern = raw.as_ref();
        if !has_glob_chars(pattern) {
            out.push(PathBuf::from(pattern));
            continue;
        }
        let before = out.len();
        for entry in glob::glob(pattern)? {
            out.push(entry?);
        }
        if out.len() == before {
            return Err(anyhow!("glob pattern matched no files: {pattern}"));
        }
    }
    Ok(out)
}
