//! Index command implementation.

use anyhow::{Context, Result};
use clap::Subcommand;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use walkdir::WalkDir;

use super::delete::{handle_delete, handle_drop};
use super::load_engine;
use crate::cli::output::{IndexStats, get_formatter};
use crate::models::{Document, OutputFormat};
use crate::readers::ReaderKind;

#[derive(Debug, Subcommand)]
pub enum IndexCommand {
    /// Add a file or directory to a knowledge base
    Add {
        /// Knowledge base id
        kb: i64,

        /// Path to directory or file to index
        #[arg(required = true)]
        path: PathBuf,

        /// Document id for a single file (derived from the path by default)
        #[arg(long)]
        document_id: Option<String>,

        /// File patterns to exclude (can be specified multiple times)
        #[arg(long, short = 'e')]
        exclude: Vec<String>,

        /// Show what would be indexed without actually indexing
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete one document's chunks and summary
    Delete {
        kb: i64,

        document_id: String,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },

    /// Delete a whole knowledge base
    Drop {
        kb: i64,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        force: bool,
    },
}

pub async fn handle_index(cmd: IndexCommand, format: OutputFormat, verbose: bool) -> Result<()> {
    match cmd {
        IndexCommand::Add {
            kb,
            path,
            document_id,
            exclude,
            dry_run,
        } => handle_add(kb, path, document_id, exclude, dry_run, format, verbose).await,
        IndexCommand::Delete {
            kb,
            document_id,
            force,
        } => handle_delete(kb, &document_id, force, format).await,
        IndexCommand::Drop { kb, force } => handle_drop(kb, force, format).await,
    }
}

async fn handle_add(
    kb: i64,
    path: PathBuf,
    document_id: Option<String>,
    exclude: Vec<String>,
    dry_run: bool,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let (config, engine) = load_engine()?;
    let formatter = get_formatter(format);
    let start_time = Instant::now();

    let path = path.canonicalize().context("invalid path")?;
    if document_id.is_some() && !path.is_file() {
        anyhow::bail!("--document-id can only be used with a single file");
    }

    let files = collect_files(&path, &exclude, &config.indexing.exclude_patterns)?;
    let (files, unsupported): (Vec<PathBuf>, Vec<PathBuf>) = files
        .into_iter()
        .partition(|f| is_supported(f, config.indexing.enhanced_parsing));

    if files.is_empty() {
        println!("{}", formatter.format_message("No supported files found to index."));
        return Ok(());
    }

    if verbose {
        println!("Found {} files to process", files.len());
    }

    if dry_run {
        println!(
            "{}",
            formatter.format_message(&format!("Dry run: Would index {} files into knowledge base {}", files.len(), kb))
        );
        for file in &files {
            println!("  {}", file.display());
        }
        return Ok(());
    }

    let source = engine.data_source(kb).await?;

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
            )
            .context("invalid progress template")?
            .progress_chars("#>-"),
    );

    let mut stats = IndexStats {
        files_scanned: (files.len() + unsupported.len()) as u64,
        files_skipped: unsupported.len() as u64,
        ..Default::default()
    };

    for file_path in &files {
        pb.inc(1);

        let id = document_id
            .clone()
            .unwrap_or_else(|| Document::generate_id(file_path));
        let document = Document::new(id, kb, file_path);

        match source.index_file(&document).await {
            Ok(report) => {
                if let Some(secrets) = report.secret_types {
                    pb.println(format!(
                        "Blocked {}: contains secrets ({})",
                        file_path.display(),
                        secrets.into_iter().collect::<Vec<_>>().join(", ")
                    ));
                    stats.files_blocked += 1;
                    continue;
                }
                if report.chunks == 0 {
                    stats.files_skipped += 1;
                    continue;
                }
                stats.files_indexed += 1;
                stats.chunks_created += report.chunks as u64;
                if report.pii_found {
                    stats.files_with_pii += 1;
                }
                if verbose {
                    pb.println(format!("Indexed {} ({} chunks)", file_path.display(), report.chunks));
                }
            }
            Err(e) => {
                pb.println(format!("Skipping {}: {}", file_path.display(), e));
                stats.files_skipped += 1;
            }
        }
    }

    pb.finish_and_clear();
    stats.duration_ms = start_time.elapsed().as_millis() as u64;
    print!("{}", formatter.format_index_stats(&stats));

    Ok(())
}

fn is_supported(path: &Path, enhanced_parsing: bool) -> bool {
    let extension = crate::models::file_extension(path);
    ReaderKind::for_extension(&extension, enhanced_parsing).is_ok()
}

fn collect_files(path: &Path, exclude: &[String], default_exclude: &[String]) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let patterns: Vec<glob::Pattern> = exclude
        .iter()
        .chain(default_exclude.iter())
        .filter_map(|p| glob::Pattern::new(p).ok())
        .collect();

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.context("failed to read directory entry")?;
        let entry_path = entry.path();

        if !entry_path.is_file() {
            continue;
        }

        let path_str = entry_path.to_string_lossy();
        if !patterns.iter().any(|p| p.matches(&path_str)) {
            files.push(entry_path.to_path_buf());
        }
    }

    files.sort();
    Ok(files)
}
