//! `stencil render`: run the render pipeline from the command line.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use stencil_renderer::{EngineConfig, MissingKeyPolicy};
use stencil_sync::{
    dir_sink, dir_source, file_sink, file_source, glob_file_names, glob_required, reader_source,
    writer_sink, Renderer, WriteLog, WriteOptions, WriteResult,
};

/// Item name given to a template read from stdin.
pub const STDIN_NAME: &str = "stdin.tpl";

/// Suffixes removed from template names by the directory sink.
pub const TEMPLATE_SUFFIXES: [&str; 4] = [".j2", ".jinja", ".tpl", ".tmpl"];

/// Arguments for `stencil render`.
#[derive(Args, Debug)]
pub struct RenderArgs {
    /// Template files (glob patterns). Read from stdin when omitted.
    #[arg(short = 'i', long = "in", value_name = "GLOB", num_args = 1..)]
    pub inputs: Vec<String>,

    /// Output file, or directory (existing, or ending in `/`). Stdout when omitted.
    #[arg(short = 'o', long = "out", value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Reference templates callable by name (glob patterns).
    #[arg(short = 'r', long = "refs", value_name = "GLOB", num_args = 1..)]
    pub refs: Vec<String>,

    /// Values files (glob patterns), later files override earlier ones.
    #[arg(short = 'v', long = "values", value_name = "GLOB", num_args = 1..)]
    pub values: Vec<String>,

    /// Directories exposed to templates as `Files`.
    #[arg(short = 'f', long = "files", value_name = "DIR", num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// Abort rendering on a missing key.
    #[arg(short = 's', long, conflicts_with = "missing_key")]
    pub strict: bool,

    /// Missing key policy: error, zero or lenient (default zero).
    #[arg(long, value_name = "POLICY")]
    pub missing_key: Option<MissingKeyPolicy>,

    /// Show what would be written without actually writing any files.
    #[arg(long)]
    pub dry_run: bool,

    /// Render at most this many templates at once.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(usize))]
    pub max_concurrency: Option<usize>,
}

impl RenderArgs {
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("could not start the async runtime")?;
        runtime.block_on(self.execute())
    }

    /// Policy from the flags: `--strict` wins, then `--missing-key`, else zero.
    pub fn policy(&self) -> MissingKeyPolicy {
        if self.strict {
            MissingKeyPolicy::Error
        } else {
            self.missing_key.unwrap_or(MissingKeyPolicy::Zero)
        }
    }

    async fn execute(self) -> Result<()> {
        let options = WriteOptions {
            dry_run: self.dry_run,
            log: WriteLog::new(),
        };

        let inputs = if self.inputs.is_empty() {
            reader_source(STDIN_NAME, std::io::stdin())
        } else {
            file_source(glob_required(&self.inputs).context("could not resolve input templates")?)
        };
        let references =
            glob_file_names(&self.refs).context("could not resolve reference templates")?;
        let values = glob_file_names(&self.values).context("could not resolve values files")?;

        let sink = match &self.out {
            None => writer_sink("stdout", std::io::stdout()),
            Some(out) if is_dir_target(out) => {
                let suffixes = TEMPLATE_SUFFIXES.iter().map(|s| s.to_string()).collect();
                dir_sink(out, suffixes, options.clone())
            }
            Some(out) => file_sink(out, options.clone()),
        };

        let mut renderer = Renderer::new()
            .with_config(EngineConfig {
                missing_key: self.policy(),
                ..EngineConfig::default()
            })
            .with_reference_templates(file_source(references))
            .with_values(file_source(values))
            .from(inputs)
            .to(sink)
            .with_max_concurrency(self.max_concurrency);
        for dir in &self.files {
            renderer = renderer.with_files(dir_source(dir));
        }

        let outcome = renderer.render().await;
        if self.out.is_some() {
            print_results(&options.log.entries(), self.dry_run);
        }
        let summary = outcome.context("render failed")?;
        tracing::debug!(templates = summary.rendered().len(), "render complete");
        Ok(())
    }
}

/// An existing directory, or a path spelled with a trailing separator.
pub fn is_dir_target(path: &Path) -> bool {
    let spelled = path.to_string_lossy();
    spelled.ends_with('/') || spelled.ends_with(std::path::MAIN_SEPARATOR) || path.is_dir()
}

fn print_results(writes: &[WriteResult], dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    let changed = writes
        .iter()
        .filter(|r| !matches!(r, WriteResult::Unchanged { .. }))
        .count();
    let unchanged = writes.len() - changed;

    if writes.is_empty() {
        println!("{prefix}{} nothing written", "·".dimmed());
        return;
    }

    println!(
        "{prefix}{} {} written, {} unchanged",
        "✓".green().bold(),
        changed,
        unchanged
    );
    for r in writes {
        match r {
            WriteResult::Written { path } => println!("  {}  {}", "✎".green(), path.display()),
            WriteResult::WouldWrite { path, diff } => {
                println!("  {}  {}", "~".yellow(), path.display());
                print!("{diff}");
            }
            WriteResult::Unchanged { path } => println!("  {}  {}", "·".dimmed(), path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use tempfile::TempDir;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: RenderArgs,
    }

    fn parse(argv: &[&str]) -> RenderArgs {
        let mut full = vec!["render"];
        full.extend_from_slice(argv);
        Harness::try_parse_from(full).expect("parse").args
    }

    #[test]
    fn policy_defaults_to_zero() {
        assert_eq!(parse(&[]).policy(), MissingKeyPolicy::Zero);
        assert_eq!(parse(&["-s"]).policy(), MissingKeyPolicy::Error);
        assert_eq!(parse(&["--missing-key", "lenient"]).policy(), MissingKeyPolicy::Lenient);
    }

    #[test]
    fn strict_conflicts_with_explicit_policy() {
        let argv = ["render", "--strict", "--missing-key", "zero"];
        assert!(Harness::try_parse_from(argv).is_err());
    }

    #[test]
    fn globs_accept_several_values() {
        let args = parse(&["-i", "a.tpl", "b.tpl", "-v", "x.yaml", "-v", "y.toml"]);
        assert_eq!(args.inputs, vec!["a.tpl", "b.tpl"]);
        assert_eq!(args.values, vec!["x.yaml", "y.toml"]);
    }

    #[test]
    fn directory_targets() {
        let dir = TempDir::new().expect("tmp");
        assert!(is_dir_target(dir.path()));
        assert!(is_dir_target(Path::new("not/yet/created/")));
        assert!(!is_dir_target(&dir.path().join("app.conf")));
    }
}
