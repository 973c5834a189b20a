//! Hallmark - identify binary file formats by byte-pattern signature
//!
//! CLI entry point: loads the signature database, fans identification out
//! across worker threads, and reports hits per file.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hallmark::cli::{AnchorArg, Cli, Commands, OutputFormat};
use hallmark::config::Config;
use hallmark::engine::{Identifier, IdentifyOptions, IdentifyProgress};
use hallmark::signature::{store, Reference};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::from_default_env().add_directive("hallmark=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Identify(args) => {
            let signature_path = args
                .signatures
                .clone()
                .or_else(|| config.signatures.path.clone())
                .context("No signature database given; pass --signatures or set signatures.path in the config")?;
            let signature_file = store::load_signature_file(&signature_path)
                .with_context(|| format!("Failed to load signatures: {}", signature_path.display()))?;

            let max_bytes = args.max_bytes.or_else(|| {
                (config.scan.max_bytes_to_scan > 0).then_some(config.scan.max_bytes_to_scan)
            });
            let workers = args
                .workers
                .unwrap_or_else(|| {
                    if config.scan.workers > 0 { config.scan.workers } else { num_cpus::get() }
                });
            let options = IdentifyOptions {
                source: args.source.clone(),
                max_bytes_to_scan: max_bytes,
                workers,
                recursive: !args.no_recurse && config.scan.recursive,
                extension_fallback: !args.no_extension_fallback && config.scan.extension_fallback,
            };

            let identifier = Identifier::new(signature_file, options);

            let progress = if config.general.show_progress && !matches!(cli.output, Some(OutputFormat::Json)) {
                let bar = ProgressBar::new(0);
                bar.set_style(
                    ProgressStyle::with_template("{spinner} {pos}/{len} files {wide_bar}")
                        .expect("static template"),
                );
                Some(bar)
            } else {
                None
            };

            let bar = progress.clone();
            let (results, summary) = identifier
                .identify_with_progress(move |update| {
                    if let (Some(bar), IdentifyProgress::Scanning { files_done, total_files }) =
                        (&bar, &update)
                    {
                        bar.set_length(*total_files as u64);
                        bar.set_position(*files_done as u64);
                    }
                })
                .await?;
            if let Some(bar) = progress {
                bar.finish_and_clear();
            }

            match cli.output {
                Some(OutputFormat::Json) => {
                    let report = serde_json::json!({ "files": results, "summary": summary });
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                _ => {
                    for file in &results {
                        if file.formats.is_empty() {
                            println!(
                                "{}  {}",
                                file.path.display(),
                                console::style("(unidentified)").dim()
                            );
                            continue;
                        }
                        for hit in &file.formats {
                            let via = match hit.signature_id {
                                Some(id) => format!("signature {id}"),
                                None => "extension".to_string(),
                            };
                            println!(
                                "{}  {}  {}  [{}]",
                                file.path.display(),
                                console::style(&hit.puid).green(),
                                hit.name,
                                via
                            );
                        }
                    }
                    println!();
                    println!(
                        "{} files, {} identified, {} tentative, {} unknown, {} failed ({} in {}ms)",
                        summary.files_scanned,
                        console::style(summary.files_identified).green(),
                        summary.files_tentative,
                        summary.files_unidentified,
                        summary.files_failed,
                        humansize::format_size(summary.total_bytes, humansize::BINARY),
                        summary.duration_ms,
                    );
                }
            }
        }
        Commands::Compile(args) => {
            let reference = match args.anchor {
                AnchorArg::Bof => Reference::BofOffset,
                AnchorArg::Eof => Reference::EofOffset,
                AnchorArg::Variable => Reference::Variable,
            };
            let sequence = hallmark::signature::ByteSequenceBuilder::from_expression(
                reference,
                &args.expression,
            )
            .prepare()
            .with_context(|| format!("Failed to compile [{}]", args.expression))?;
            println!("reference:    {}", reference);
            println!("sort order:   {}", sequence.sort_order());
            println!("subsequences: {}", sequence.number_of_subsequences());
            println!("compiled:     {}", sequence.to_expression());
        }
        Commands::Config(args) => {
            if args.init {
                Config::ensure_exists()?;
            }
            if args.path || !args.init {
                println!("{}", Config::default_path().display());
                if !Config::exists() {
                    println!("(not created yet - run `hallmark config --init`)");
                }
            }
        }
    }

    Ok(())
}
