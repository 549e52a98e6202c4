//! CfgSight CLI
//!
//! Command-line front-end for the configuration-enumerating preprocessor.

use anyhow::Result;
use cfgsight_core::{CollectSink, Settings};
use cfgsight_preprocessor::{ParallelPreprocessor, Preprocessor};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cfgsight")]
#[command(author, version, about = "Preprocessor configuration analysis for C code", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the preprocessor configurations a file can realize
    Configs {
        /// Source file to analyze
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Header search paths
        #[arg(short = 'I', value_name = "DIR")]
        include_paths: Vec<PathBuf>,
    },

    /// Print the preprocessed text of one configuration
    Expand {
        /// Source file to preprocess
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Configuration to select, e.g. "A;B=2" (default: the empty one)
        #[arg(short, long, default_value = "")]
        config: String,

        /// User defines, NAME or NAME=VALUE
        #[arg(short = 'D', value_name = "DEF")]
        defines: Vec<String>,

        /// User undefs
        #[arg(short = 'U', value_name = "NAME")]
        undefs: Vec<String>,

        /// Header search paths
        #[arg(short = 'I', value_name = "DIR")]
        include_paths: Vec<PathBuf>,
    },

    /// Preprocess every source file under a directory
    Scan {
        /// Directory to scan
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Header search paths
        #[arg(short = 'I', value_name = "DIR")]
        include_paths: Vec<PathBuf>,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Configs {
            file,
            include_paths,
        } => {
            cmd_configs(&file, include_paths)?;
        }
        Commands::Expand {
            file,
            config,
            defines,
            undefs,
            include_paths,
        } => {
            cmd_expand(&file, &config, defines, undefs, include_paths)?;
        }
        Commands::Scan {
            dir,
            include_paths,
            format,
        } => {
            cmd_scan(&dir, include_paths, &format)?;
        }
    }

    Ok(())
}

fn settings_with(include_paths: Vec<PathBuf>) -> Settings {
    Settings {
        include_paths,
        ..Default::default()
    }
}

fn cmd_configs(file: &PathBuf, include_paths: Vec<PathBuf>) -> Result<()> {
    let source = std::fs::read_to_string(file)?;
    let sink = Arc::new(CollectSink::new());
    let mut preprocessor = Preprocessor::new(settings_with(include_paths), sink.clone());

    let (_, configurations) = preprocessor.scan(&source, &file.to_string_lossy());

    for cfg in &configurations {
        if cfg.is_empty() {
            println!("(default)");
        } else {
            println!("{}", cfg);
        }
    }
    print_diagnostics(&sink);
    Ok(())
}

fn cmd_expand(
    file: &PathBuf,
    config: &str,
    defines: Vec<String>,
    undefs: Vec<String>,
    include_paths: Vec<PathBuf>,
) -> Result<()> {
    let source = std::fs::read_to_string(file)?;
    let sink = Arc::new(CollectSink::new());
    let settings = Settings {
        include_paths,
        defines,
        undefs: undefs.into_iter().collect(),
        ..Default::default()
    };
    let has_defines = settings.has_defines();
    let mut preprocessor = Preprocessor::new(settings, sink.clone());

    let filename = file.to_string_lossy();
    let (data, _) = preprocessor.scan(&source, &filename);
    let output = if has_defines {
        preprocessor.get_code(&data, "", &filename)
    } else {
        preprocessor.get_code(&data, config, &filename)
    };

    print!("{}", output);
    print_diagnostics(&sink);
    Ok(())
}

fn cmd_scan(dir: &PathBuf, include_paths: Vec<PathBuf>, format: &str) -> Result<()> {
    let driver = ParallelPreprocessor::new(settings_with(include_paths)).with_progress(|event| {
        eprintln!("[{:?}] {}", event.phase, event.message);
    });
    let results = driver.preprocess_directory(dir, &["c", "cpp", "cc", "cxx"]);

    if format == "json" {
        let summary: Vec<_> = results
            .iter()
            .map(|(path, result)| match result {
                Ok(report) => serde_json::json!({
                    "file": path.to_string_lossy(),
                    "configurations": report.unit.configurations.keys().collect::<Vec<_>>(),
                    "missing_include": report.unit.missing_include,
                    "diagnostics": report.diagnostics.len(),
                }),
                Err(err) => serde_json::json!({
                    "file": path.to_string_lossy(),
                    "error": err.to_string(),
                }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let mut missing = 0usize;
    for (path, result) in &results {
        match result {
            Ok(report) => {
                println!(
                    "{}: {} configuration(s)",
                    path.display(),
                    report.unit.configurations.len()
                );
                for cfg in report.unit.configurations.keys() {
                    if !cfg.is_empty() {
                        println!("    {}", cfg);
                    }
                }
                if report.unit.missing_include {
                    missing += 1;
                }
            }
            Err(err) => println!("{}: error: {}", path.display(), err),
        }
    }
    println!();
    println!(
        "{} file(s), {} with unresolved includes",
        results.len(),
        missing
    );
    Ok(())
}

fn print_diagnostics(sink: &CollectSink) {
    for diagnostic in sink.diagnostics() {
        eprintln!("{}", diagnostic);
    }
}
