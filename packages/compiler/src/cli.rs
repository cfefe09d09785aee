//! Command-line interface for the pit compiler.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use walkdir::WalkDir;

use crate::compiler::{Compiled, PitCompiler};
use crate::config::CompileOptions;
use crate::defines::{parse_assignment, parse_defines_file, Defines};
use crate::error::{CompileError, Result};
use crate::expression::SimpleEvaluator;
use crate::render::render_model;

/// PIT compiler - Check and compile Peach pit files.
#[derive(Parser)]
#[command(name = "pitc")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check pit files against the schema.
    Validate {
        /// Pit files, or directories searched for `.xml` files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Run every compile pass, not only the structural check
        #[arg(long)]
        full: bool,

        #[command(flatten)]
        defines: DefineArgs,
    },

    /// Compile a pit and print the resulting model.
    Parse {
        /// Pit file to compile
        pit: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Json)]
        format: Format,

        #[command(flatten)]
        defines: DefineArgs,
    },

    /// Print the default bytes of a data model as hex.
    Render {
        /// Pit file to compile
        pit: PathBuf,

        /// Data model to render (`Name` or `ns:Name`)
        #[arg(short, long)]
        model: String,

        /// Write the raw bytes to this file instead
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        defines: DefineArgs,
    },
}

/// Output format for `pitc parse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Yaml,
}

/// Define options shared by every subcommand.
#[derive(Debug, Args)]
pub struct DefineArgs {
    /// Replace `##KEY##` with VALUE (repeatable)
    #[arg(short = 'D', long = "define", value_name = "KEY=VALUE", value_parser = parse_assignment)]
    pub values: Vec<(String, String)>,

    /// PitDefines file to read defines from; `-D` values override it
    #[arg(long = "defines", value_name = "FILE")]
    pub file: Option<PathBuf>,
}

impl DefineArgs {
    fn load(&self) -> Result<Defines> {
        let mut defines = match &self.file {
            Some(path) => parse_defines_file(path)?,
            None => Defines::new(),
        };
        for (key, value) in &self.values {
            defines.insert(key.as_str(), value.as_str());
        }
        Ok(defines)
    }
}

/// Run the CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            paths,
            full,
            defines,
        } => validate_command(&paths, full, &defines.load()?),
        Commands::Parse {
            pit,
            format,
            defines,
        } => parse_command(&pit, format, &defines.load()?),
        Commands::Render {
            pit,
            model,
            output,
            defines,
        } => render_command(&pit, &model, output.as_deref(), &defines.load()?),
    }
}

/// Compiler rooted at the pit's directory, so includes and data files resolve.
fn compiler_for(pit: &Path) -> PitCompiler {
    let base_dir = pit
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    PitCompiler::new().options(CompileOptions::new().with_base_dir(base_dir))
}

fn read_pit(pit: &Path) -> Result<String> {
    std::fs::read_to_string(pit).map_err(|source| CompileError::Io {
        path: pit.to_path_buf(),
        source,
    })
}

fn compile_file(pit: &Path, defines: &Defines) -> Result<Compiled> {
    let text = read_pit(pit)?;
    let source = pit.display().to_string();
    let compiled = compiler_for(pit).compile(&text, defines, Some(&source))?;
    for diagnostic in &compiled.diagnostics {
        eprintln!("{} {diagnostic}", style("warning:").yellow().bold());
    }
    Ok(compiled)
}

/// Expand directories into the `.xml` files below them, sorted.
fn collect_pits(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut pits = Vec::new();
    for path in paths {
        if !path.is_dir() {
            pits.push(path.clone());
            continue;
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(path) {
            let entry = entry.map_err(|e| CompileError::Io {
                path: path.clone(),
                source: e.into(),
            })?;
            let is_xml = entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"));
            if entry.file_type().is_file() && is_xml {
                found.push(entry.into_path());
            }
        }
        found.sort();
        pits.extend(found);
    }
    Ok(pits)
}

/// Execute the validate command.
fn validate_command(paths: &[PathBuf], full: bool, defines: &Defines) -> Result<()> {
    let pits = collect_pits(paths)?;
    let mut failed = 0;

    for pit in &pits {
        let outcome = if full {
            compile_file(pit, defines).map(drop)
        } else {
            read_pit(pit).and_then(|text| {
                let source = pit.display().to_string();
                compiler_for(pit).validate(&text, defines, Some(&source))
            })
        };
        match outcome {
            Ok(()) => println!("{} {}", style("valid").green().bold(), pit.display()),
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {e}", style("invalid").red().bold(), pit.display());
            }
        }
    }

    if failed > 0 {
        return Err(CompileError::ValidationFailed {
            failed,
            total: pits.len(),
        });
    }
    Ok(())
}

/// Execute the parse command.
fn parse_command(pit: &Path, format: Format, defines: &Defines) -> Result<()> {
    let compiled = compile_file(pit, defines)?;
    let output = match format {
        Format::Json => serde_json::to_string_pretty(&compiled)?,
        Format::Yaml => serde_yaml_ng::to_string(&compiled)?,
    };
    println!("{output}");
    Ok(())
}

/// Execute the render command.
fn render_command(
    pit: &Path,
    model: &str,
    output: Option<&Path>,
    defines: &Defines,
) -> Result<()> {
    let compiled = compile_file(pit, defines)?;
    let data_model = compiled
        .dom
        .find_data_model(model)
        .ok_or_else(|| CompileError::unresolved("DataModel", model, None))?;
    let bytes = render_model(data_model, &SimpleEvaluator)?;

    match output {
        Some(path) => {
            std::fs::write(path, &bytes).map_err(|source| CompileError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            println!(
                "{} {} bytes to {}",
                style("Wrote").green().bold(),
                bytes.len(),
                path.display()
            );
        }
        None => println!("{}", hex::encode(&bytes)),
    }
    Ok(())
}
