//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::fs_script_adapter::FsScriptAdapter;
use crate::domain::ast::ScriptKind;
use crate::domain::converter::{
    Analysis, ConversionOutcome, NamedScript, Rejection, RuleBasedConverter,
};
use crate::domain::error::PinecastError;
use crate::domain::registry::{Mapping, registry};
use crate::domain::settings::Settings;
use crate::ports::script_port::ScriptPort;

#[derive(Parser, Debug)]
#[command(name = "pinecast", version, about = "Convert Pine-style indicator scripts to Rust")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Convert a script, or every .pine file in a directory
    Convert {
        path: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory for generated modules (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Report complexity and routing without converting
    Analyze {
        path: PathBuf,
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List the supported `ta.*` indicators
    Indicators {
        #[arg(long)]
        json: bool,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Convert {
            path,
            config,
            output,
        } => run_convert(&path, config.as_deref(), output.as_deref()),
        Command::Analyze { path, config, json } => run_analyze(&path, config.as_deref(), json),
        Command::Indicators { json } => run_indicators(json),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

/// Settings from `path`, or the defaults when no config file is given.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, PinecastError> {
    match path {
        Some(path) => {
            let adapter = FileConfigAdapter::from_file(path)?;
            Settings::from_config(&adapter)
        }
        None => Ok(Settings::default()),
    }
}

fn run_convert(path: &Path, config: Option<&Path>, output: Option<&Path>) -> Result<(), PinecastError> {
    let settings = load_settings(config)?;
    let port = FsScriptAdapter::new(path.to_path_buf());
    let summary = convert_from(&port, &settings, output)?;
    if output.is_none() {
        print!("{}", summary.stdout);
    }
    eprintln!(
        "{} converted, {} rejected",
        summary.converted.len(),
        summary.rejected.len()
    );
    if summary.rejected.is_empty() {
        Ok(())
    } else {
        Err(PinecastError::Rejected {
            rejected: summary.rejected.len(),
            total: summary.converted.len() + summary.rejected.len(),
        })
    }
}

/// What a convert run produced.
#[derive(Debug, Default)]
pub struct ConvertSummary {
    /// Script name and the file written (None when printed).
    pub converted: Vec<(String, Option<PathBuf>)>,
    /// Script name and why it was refused.
    pub rejected: Vec<(String, Rejection)>,
    /// Generated modules when no output directory is set.
    pub stdout: String,
}

/// Convert everything `port` yields, writing modules into `output` when given.
///
/// Rejections are collected, never fatal. Warnings and rejection details go
/// to stderr.
pub fn convert_from(
    port: &dyn ScriptPort,
    settings: &Settings,
    output: Option<&Path>,
) -> Result<ConvertSummary, PinecastError> {
    let scripts = port.load_scripts()?;
    let converter = RuleBasedConverter::new(settings.converter.clone());
    if let Some(dir) = output {
        fs::create_dir_all(dir)?;
    }

    let mut summary = ConvertSummary::default();
    let many = scripts.len() > 1;
    for (script, item) in scripts.iter().zip(converter.convert_batch(&scripts)) {
        match item.outcome? {
            ConversionOutcome::Converted(conversion) => {
                for w in &conversion.warnings {
                    eprintln!("warning: {}:{}:{}: {}", script.name, w.line, w.column, w.message);
                }
                let written = match output {
                    Some(dir) => {
                        let file = dir.join(format!("{}.{}", script.name, settings.extension));
                        fs::write(&file, &conversion.source_text)?;
                        eprintln!("{} -> {}", script.name, file.display());
                        Some(file)
                    }
                    None => {
                        if many {
                            let _ = writeln!(summary.stdout, "// ---- {} ----", script.name);
                        }
                        summary.stdout.push_str(&conversion.source_text);
                        None
                    }
                };
                summary.converted.push((item.name, written));
            }
            ConversionOutcome::Rejected(rejection) => {
                report_rejection(script, &rejection);
                summary.rejected.push((item.name, rejection));
            }
        }
    }
    Ok(summary)
}

fn report_rejection(script: &NamedScript, rejection: &Rejection) {
    match rejection {
        Rejection::Syntax(e) => {
            eprintln!("rejected: {}:\n{}", script.name, e.display_with_context(&script.source));
        }
        other => eprintln!("rejected: {}: {}", script.name, other),
    }
}

#[derive(Debug, Serialize)]
pub struct FileAnalysis {
    pub file: String,
    #[serde(flatten)]
    pub analysis: Analysis,
}

/// Analyze every script `port` yields. The first syntax error stops the run.
pub fn analyze_from(port: &dyn ScriptPort, settings: &Settings) -> Result<Vec<FileAnalysis>, PinecastError> {
    let converter = RuleBasedConverter::new(settings.converter.clone());
    let mut reports = Vec::new();
    for script in port.load_scripts()? {
        let analysis = converter.analyze(&script.source).map_err(|e| {
            eprintln!("{}:\n{}", script.name, e.display_with_context(&script.source));
            PinecastError::from(e)
        })?;
        reports.push(FileAnalysis {
            file: script.name,
            analysis,
        });
    }
    Ok(reports)
}

fn run_analyze(path: &Path, config: Option<&Path>, json: bool) -> Result<(), PinecastError> {
    let settings = load_settings(config)?;
    let reports = analyze_from(&FsScriptAdapter::new(path.to_path_buf()), &settings)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print!("{}", format_analysis(report));
        }
    }
    Ok(())
}

pub fn format_analysis(report: &FileAnalysis) -> String {
    let a = &report.analysis;
    let kind = match a.kind {
        ScriptKind::Indicator => "indicator",
        ScriptKind::Strategy => "strategy",
    };
    let mut out = String::new();
    let _ = writeln!(out, "{}: {:?} ({}, version {})", report.file, a.name, kind, a.version);
    let _ = writeln!(out, "  score  {:.3} -> {}", a.score, a.route);
    for (name, value) in a.factors.named() {
        let _ = writeln!(out, "  {:<13}{:.3}", name, value);
    }
    let c = &a.counts;
    let _ = writeln!(
        out,
        "  lines {} ({} code), inputs {}, variables {}, functions {}, conditions {}, nesting {}",
        c.total_lines, c.code_lines, c.inputs, c.variables, c.functions, c.conditions, c.max_nesting_depth
    );
    if !a.indicators_used.is_empty() {
        let _ = writeln!(out, "  indicators: {}", a.indicators_used.join(", "));
    }
    out
}

fn signature(mapping: &Mapping) -> String {
    let params: Vec<String> = mapping
        .params
        .iter()
        .map(|p| match p.default {
            Some(d) => format!("{}={}", p.name, d),
            None => p.name.to_string(),
        })
        .collect();
    format!("{}({})", mapping.qualified_name, params.join(", "))
}

/// Registry listing grouped by category.
pub fn format_indicators() -> String {
    let mut mappings: Vec<&Mapping> = registry().iter().collect();
    mappings.sort_by_key(|m| (m.category, m.qualified_name));
    let mut out = String::new();
    let mut current = None;
    for m in mappings {
        if current != Some(m.category) {
            let _ = writeln!(out, "{}:", m.category);
            current = Some(m.category);
        }
        let outputs = if m.outputs > 1 {
            format!(" -> {} series", m.outputs)
        } else {
            String::new()
        };
        let _ = writeln!(out, "  {:<44} {}{}", signature(m), m.description, outputs);
    }
    out
}

fn run_indicators(json: bool) -> Result<(), PinecastError> {
    if json {
        let mappings: Vec<&Mapping> = registry().iter().collect();
        println!("{}", serde_json::to_string_pretty(&mappings)?);
    } else {
        print!("{}", format_indicators());
    }
    Ok(())
}
