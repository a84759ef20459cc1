//! Command-line interface for unpacking archives.
//!
//! One command for every format: the format of each input is detected from
//! its content, layered files are unpacked in one go, and every input gets a
//! one line summary. The exit code reflects the worst outcome of the batch.

use clap::{Parser, ValueEnum};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use unpacker::{
    CollisionPolicy, Destination, ExtractOptions, ExtractionReport, FormatRegistry,
    ProgressCallback, UnpackError, DEFAULT_DEPTH_LIMIT,
};

/// Everything went fine, possibly with skipped or failed entries.
const EXIT_OK: i32 = 0;
/// At least one input failed as a whole.
const EXIT_FAILURE: i32 = 1;
/// Invalid invocation, or nothing that was given is an archive.
const EXIT_USAGE: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "unpack")]
#[command(version, about = "Unpack any archive; formats are detected from content", long_about = None)]
struct Cli {
    /// Files to unpack
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Extract into exactly this directory (default: a directory named
    /// after each input, under the current directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Also unpack archives found inside archives
    #[arg(long, overrides_with = "no_recursive")]
    recursive: bool,

    /// Leave archives found inside archives as they are (default)
    #[arg(long, overrides_with = "recursive")]
    no_recursive: bool,

    /// What to do when a destination file already exists
    #[arg(long, value_enum, default_value_t = CollisionArg::Skip)]
    collision: CollisionArg,

    /// Maximum number of nested layers
    #[arg(long, default_value_t = DEFAULT_DEPTH_LIMIT)]
    depth_limit: usize,

    /// Strip leading path components
    #[arg(long, default_value = "0")]
    strip_components: u32,

    /// Size limit in bytes, per input
    #[arg(long)]
    size_limit: Option<u64>,

    /// Password for encrypted archives
    #[arg(long)]
    password: Option<String>,

    /// Give up on an input after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Number of inputs unpacked in parallel
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Only list layers and entries; nothing is written
    #[arg(long)]
    list: bool,

    /// Print reports as JSON
    #[arg(long)]
    json: bool,

    /// No progress or summaries
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CollisionArg {
    /// Keep existing files
    Skip,
    /// Replace existing files
    Overwrite,
    /// Write under a new name: "name (1).ext"
    Rename,
}

impl From<CollisionArg> for CollisionPolicy {
    fn from(arg: CollisionArg) -> Self {
        match arg {
            CollisionArg::Skip => CollisionPolicy::Skip,
            CollisionArg::Overwrite => CollisionPolicy::Overwrite,
            CollisionArg::Rename => CollisionPolicy::Rename,
        }
    }
}

impl Cli {
    /// Build the extraction options, rejecting invalid combinations.
    fn extract_options(&self) -> Result<ExtractOptions, UnpackError> {
        if self.depth_limit == 0 {
            return Err(UnpackError::Configuration(
                "--depth-limit must be at least 1".to_string(),
            ));
        }
        if self.jobs == 0 {
            return Err(UnpackError::Configuration(
                "--jobs must be at least 1".to_string(),
            ));
        }
        if self.jobs > 1 && self.output_dir.is_some() && self.inputs.len() > 1 {
            return Err(UnpackError::Configuration(
                "--jobs > 1 needs a separate target per input; drop --output-dir".to_string(),
            ));
        }

        let defaults = ExtractOptions::default();
        Ok(ExtractOptions {
            collision: self.collision.into(),
            recursive: self.recursive,
            depth_limit: self.depth_limit,
            size_limit_bytes: self.size_limit.or(defaults.size_limit_bytes),
            strip_components: self.strip_components,
            password: self.password.clone(),
            timeout: self.timeout.map(Duration::from_secs),
            ..defaults
        })
    }

    fn destination(&self) -> Result<Destination, UnpackError> {
        Ok(match &self.output_dir {
            Some(dir) => Destination::Exact(dir.clone()),
            None => Destination::Derived(std::env::current_dir()?),
        })
    }
}

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_USAGE
        }
    };
    process::exit(code);
}

/// Run the whole batch. Errors returned here are invocation errors.
fn run(cli: Cli) -> Result<i32, UnpackError> {
    let options = cli.extract_options()?;
    let registry = Arc::new(FormatRegistry::builtin()?);

    let cancel_flag = Arc::new(AtomicBool::new(false));
    let handler_flag = cancel_flag.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.store(true, Ordering::Relaxed)) {
        tracing::warn!(error = %e, "Ctrl-C will not cancel cleanly");
    }

    if cli.list {
        return Ok(handle_list(&cli, &registry, &options, &cancel_flag));
    }

    let destination = cli.destination()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let results = runtime.block_on(handle_extract(
        &cli,
        destination,
        registry,
        options,
        cancel_flag,
    ));

    report_results(&cli, &results);
    Ok(exit_code(&results))
}

/// Unpack every input, at most `--jobs` at a time.
async fn handle_extract(
    cli: &Cli,
    destination: Destination,
    registry: Arc<FormatRegistry>,
    options: ExtractOptions,
    cancel_flag: Arc<AtomicBool>,
) -> Vec<(PathBuf, Result<ExtractionReport, UnpackError>)> {
    let semaphore = Arc::new(Semaphore::new(cli.jobs));
    let bars = MultiProgress::new();
    let show_progress = !cli.quiet && !cli.json;

    let mut tasks = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let semaphore = semaphore.clone();
        let registry = registry.clone();
        let options = options.clone();
        let destination = destination.clone();
        let cancel_flag = cancel_flag.clone();
        let input = input.clone();
        let bar = show_progress.then(|| bars.add(spinner(&input)));

        tasks.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| UnpackError::Io(std::io::Error::other(e)))?;

            let progress_bar = bar.clone();
            let progress_cb: Arc<ProgressCallback> =
                Arc::new(move |entry: &str, _bytes: u64, _size: Option<u64>| {
                    if let Some(bar) = &progress_bar {
                        bar.set_message(entry.to_string());
                        bar.tick();
                    }
                    true // Continue extraction
                });

            let result = unpacker::unpack_async(
                input,
                destination,
                registry,
                options,
                progress_cb,
                cancel_flag,
            )
            .await;
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            result
        }));
    }

    let mut results = Vec::with_capacity(tasks.len());
    for (input, task) in cli.inputs.iter().zip(tasks) {
        let result = task
            .await
            .unwrap_or_else(|e| Err(UnpackError::Io(std::io::Error::other(e))));
        results.push((input.clone(), result));
    }
    results
}

fn spinner(input: &Path) -> ProgressBar {
    let style = ProgressStyle::with_template("{spinner:.blue} {prefix:.cyan.bold} {wide_msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let bar = ProgressBar::new_spinner().with_style(style);
    bar.set_prefix(input.display().to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Probe every input and print its layers and entries.
fn handle_list(
    cli: &Cli,
    registry: &FormatRegistry,
    options: &ExtractOptions,
    cancel_flag: &Arc<AtomicBool>,
) -> i32 {
    let results: Vec<_> = cli
        .inputs
        .iter()
        .map(|input| {
            let info = unpacker::probe(input, registry, options, cancel_flag.clone());
            (input.clone(), info)
        })
        .collect();

    if cli.json {
        print_json(&results);
    } else if !cli.quiet {
        for (input, result) in &results {
            match result {
                Ok(info) => {
                    println!("{}: {}", input.display(), info.layers.join(" > "));
                    for entry in &info.entry_list {
                        let marker = if entry.is_directory { "/" } else { "" };
                        println!("  {:>12}  {}{}", entry.size, entry.path, marker);
                    }
                }
                Err(e) => eprintln!("{}: {}", input.display(), e),
            }
        }
    }
    exit_code(&results)
}

fn report_results(cli: &Cli, results: &[(PathBuf, Result<ExtractionReport, UnpackError>)]) {
    if cli.json {
        print_json(results);
        return;
    }
    for (input, result) in results {
        match result {
            Ok(report) if !cli.quiet => println!(
                "{}: {} -> {}: {}",
                input.display(),
                report.plan.join(" > "),
                report.target_dir.display(),
                report.summary()
            ),
            Ok(_) => {}
            // Errors are shown even when quiet.
            Err(e) => eprintln!("{}: {}", input.display(), e),
        }
    }
}

#[derive(Serialize)]
struct JsonOutcome<'a, T: Serialize> {
    input: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn print_json<T: Serialize>(results: &[(PathBuf, Result<T, UnpackError>)]) {
    let outcomes: Vec<_> = results
        .iter()
        .map(|(input, result)| JsonOutcome {
            input,
            report: result.as_ref().ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
        })
        .collect();
    match serde_json::to_string_pretty(&outcomes) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: {}", e),
    }
}

/// Worst outcome across the batch.
///
/// Any input that failed as a whole gives 1. Inputs that are simply not
/// archives only count when nothing in the batch was one: then it is 2.
fn exit_code<T>(results: &[(PathBuf, Result<T, UnpackError>)]) -> i32 {
    let fatal = results
        .iter()
        .any(|(_, r)| matches!(r, Err(e) if !matches!(e, UnpackError::UnrecognizedFormat(_))));
    if fatal {
        return EXIT_FAILURE;
    }
    let recognized = results.iter().any(|(_, r)| r.is_ok());
    if recognized || results.is_empty() {
        EXIT_OK
    } else {
        EXIT_USAGE
    }
}
