// ============================================================================
// ChromaFE CLI: headless batch processing via command-line arguments
// ============================================================================
//
// Usage examples:
//   ChromaFE -i scan.png --op clahe=3 --op gamma=1.8 -o result.png
//   ChromaFE -i "xray/*.png" --op pseudocolor=viridis --output-dir out/ --format jpg
//   ChromaFE -i old.jpg --op colorize --model-dir models/ --onnx-runtime /opt/ort/libonnxruntime.so
//   ChromaFE -i a.png --op sharpen --op undo --op ace=3 --compare -o cmp.png
//
// Every input runs through the same command surface the interactive front
// end uses; colorization goes through the background gate and the CLI waits
// for it before continuing.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;

use crate::app::{ApplyOutcome, JobEvent, Pipeline};
use crate::io::{EncodeOptions, FileCodec, ImageCodec, SaveFormat, TiffCompression};
use crate::ops::ai::probe_onnx_runtime;
use crate::ops::{Operator, Palette};
use crate::settings::AppSettings;

const JOB_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// ChromaFE headless image processor.
#[derive(Parser, Debug)]
#[command(
    name = "ChromaFE",
    version,
    about = "Pseudocolor, enhancement and colorization for grayscale images",
    long_about = "Apply a sequence of operators to image files without a GUI.\n\n\
                  Operators: ace[=strength], clahe[=clip], gamma[=g], sharpen,\n\
                  saturation[=factor], pseudocolor[=palette], colorize,\n\
                  plus the history steps undo, redo and reset.\n\
                  Palettes: jet, viridis, plasma, hot, cool, rainbow, turbo.\n\n\
                  Example:\n  \
                  ChromaFE -i scan.png --op clahe=3 --op pseudocolor=turbo -o out.png"
)]
pub struct CliArgs {
    /// Input file(s). Glob patterns accepted (e.g. "*.png", "scans/*.jpg").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Operator or history step, applied in order. Repeatable.
    #[arg(long = "op", value_name = "SPEC")]
    pub ops: Vec<String>,

    /// Output file path. Only valid for single-file input.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output directory for batch processing.
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Output format: png, jpeg, webp, bmp, tga, tiff.
    /// When omitted, the format is inferred from --output's extension, defaulting to png.
    #[arg(short, long, value_name = "FORMAT")]
    pub format: Option<String>,

    /// JPEG quality (1–100). Defaults to the saved setting.
    #[arg(short, long, value_name = "1-100")]
    pub quality: Option<u8>,

    /// TIFF compression mode: none, lzw, deflate.
    #[arg(long, default_value = "none", value_name = "MODE")]
    pub tiff_compression: String,

    /// Save the original and the result side by side instead of the result alone.
    #[arg(long)]
    pub compare: bool,

    /// Directory holding the colorization model resources.
    #[arg(long, value_name = "DIR")]
    pub model_dir: Option<PathBuf>,

    /// Path to the ONNX Runtime shared library.
    #[arg(long, value_name = "LIB")]
    pub onnx_runtime: Option<String>,

    /// Maximum number of history entries kept per image.
    #[arg(long, value_name = "N")]
    pub history_depth: Option<usize>,

    /// Persist the effective settings (including the overrides above).
    #[arg(long)]
    pub save_settings: bool,

    /// Print per-step details and mirror info-level log lines to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

/// One `--op` entry after parsing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Step {
    Apply(Operator),
    Undo,
    Redo,
    Reset,
}

/// Parse an `--op` spec. An operator given without a value takes the saved
/// slider value (or palette) from `settings`.
pub fn parse_step(spec: &str, settings: &AppSettings) -> Result<Step, String> {
    match spec.trim().to_ascii_lowercase().as_str() {
        "undo" => return Ok(Step::Undo),
        "redo" => return Ok(Step::Redo),
        "reset" => return Ok(Step::Reset),
        _ => {}
    }
    let op: Operator = spec.parse().map_err(|e| format!("--op '{}': {}", spec, e))?;
    let bare = spec.split_once(['=', ':']).is_none_or(|(_, v)| v.trim().is_empty());
    Ok(Step::Apply(if bare { settings.default_operator(op.id()) } else { op }))
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run all CLI processing and return an OS exit code.
/// `0` = all files succeeded, `1` = one or more files failed.
pub fn run(args: CliArgs) -> ExitCode {
    let mut settings = AppSettings::load();
    apply_overrides(&mut settings, &args);
    if args.save_settings {
        settings.save();
    }

    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    if inputs.len() > 1 && args.output.is_some() && args.output_dir.is_none() {
        eprintln!(
            "error: {} input files given but --output only accepts a single file path.\n\
             Use --output-dir to specify a destination directory for batch processing.",
            inputs.len()
        );
        return ExitCode::FAILURE;
    }

    let steps = match args
        .ops
        .iter()
        .map(|s| parse_step(s, &settings))
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(steps) => steps,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let save_format = match parse_format(args.format.as_deref(), args.output.as_deref()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let tiff_compression = match parse_tiff_compression(&args.tiff_compression) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let options = EncodeOptions {
        quality: settings.jpeg_quality,
        tiff_compression,
    };

    if let Some(dir) = &args.output_dir
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("error: could not create output directory '{}': {}", dir.display(), e);
        return ExitCode::FAILURE;
    }

    let mut pipeline = Pipeline::from_settings(&settings).with_encode_options(options);
    if steps.contains(&Step::Apply(Operator::Colorize)) && !pipeline.initialize_model() {
        eprintln!("note: colorization model unavailable, colorize will use {} pseudocolor", Palette::Jet);
        if let Some(runtime) = settings.runtime_path() {
            match probe_onnx_runtime(&runtime) {
                Ok(version) => eprintln!("      ONNX Runtime {} loads; check --model-dir", version),
                Err(e) => eprintln!("      {}", e),
            }
        }
    }

    let total = inputs.len();
    let multi = total > 1;
    let mut any_failure = false;

    for (idx, input_path) in inputs.iter().enumerate() {
        if multi || args.verbose {
            println!("[{}/{}] {}", idx + 1, total, input_path.display());
        }
        let file_start = Instant::now();

        let Some(output_path) = build_output_path(
            input_path,
            args.output.as_deref(),
            args.output_dir.as_deref(),
            save_format,
        ) else {
            eprintln!("  error: cannot determine output path for '{}'.", input_path.display());
            any_failure = true;
            continue;
        };

        let job = FileJob {
            input: input_path,
            output: &output_path,
            steps: &steps,
            format: save_format,
            options,
            compare: args.compare,
            verbose: args.verbose,
        };
        match run_one(&mut pipeline, &job) {
            Ok(()) => {
                if args.verbose || multi {
                    println!(
                        "  → {} ({:.0}ms)",
                        output_path.display(),
                        file_start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
            Err(e) => {
                log::error!("{}: {}", input_path.display(), e);
                eprintln!("  error: {}", e);
                any_failure = true;
            }
        }
    }

    if any_failure { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn apply_overrides(settings: &mut AppSettings, args: &CliArgs) {
    if let Some(dir) = &args.model_dir {
        settings.model_dir = dir.to_string_lossy().into_owned();
    }
    if let Some(lib) = &args.onnx_runtime {
        settings.onnx_runtime_path = lib.clone();
    }
    if let Some(depth) = args.history_depth {
        settings.max_history_depth = depth.max(1);
    }
    if let Some(q) = args.quality {
        settings.jpeg_quality = q.clamp(1, 100);
    }
}

// ============================================================================
// Per-file processing pipeline
// ============================================================================

struct FileJob<'a> {
    input: &'a Path,
    output: &'a Path,
    steps: &'a [Step],
    format: SaveFormat,
    options: EncodeOptions,
    compare: bool,
    verbose: bool,
}

fn run_one(pipeline: &mut Pipeline, job: &FileJob<'_>) -> Result<(), String> {
    // -- Step 1: Load ----------------------------------------------------
    pipeline
        .load(job.input)
        .map_err(|e| format!("load failed: {}", e))?;

    // -- Step 2: Operators and history steps -----------------------------
    for step in job.steps {
        let result = match *step {
            Step::Apply(op) => match pipeline.apply(op, true) {
                Ok(ApplyOutcome::Submitted(_)) => {
                    wait_for_job(pipeline, job.verbose)?;
                    Ok(())
                }
                other => other.map(|_| ()),
            },
            Step::Undo => pipeline.undo(),
            Step::Redo => pipeline.redo(),
            Step::Reset => pipeline.reset(),
        };
        match result {
            Ok(()) => {
                if job.verbose
                    && let Some(summary) = pipeline.summary()
                {
                    println!("  {:?}: {}", step, summary);
                }
            }
            // Undo/redo at the ends of history are not fatal for a batch run.
            Err(e) if e.is_precondition() && !matches!(step, Step::Apply(_)) => {
                log::warn!("{:?} skipped: {}", step, e);
                if job.verbose {
                    println!("  {:?} skipped: {}", step, e);
                }
            }
            Err(e) => return Err(format!("{:?} failed: {}", step, e)),
        }
    }

    if job.verbose
        && let Some(summary) = pipeline.summary()
    {
        println!(
            "  history: {} ({} KiB)",
            summary.steps.join(" > "),
            summary.history_bytes.div_ceil(1024)
        );
    }

    // -- Step 3: Save ----------------------------------------------------
    if job.compare {
        let cmp = pipeline.compare().map_err(|e| e.to_string())?;
        FileCodec
            .encode(&cmp, job.output, job.format, job.options)
            .map_err(|e| format!("save failed: {}", e))?;
    } else {
        pipeline
            .save(job.output, Some(job.format))
            .map_err(|e| format!("save failed: {}", e))?;
    }
    Ok(())
}

/// Block until the pending colorization is handed off. A failed job fails the file.
fn wait_for_job(pipeline: &mut Pipeline, verbose: bool) -> Result<(), String> {
    while pipeline.is_colorizing() {
        if let Some(event) = pipeline.wait_for_colorization(JOB_POLL_INTERVAL) {
            report_job_event(&event, verbose)?;
        }
    }
    Ok(())
}

fn report_job_event(event: &JobEvent, verbose: bool) -> Result<(), String> {
    match event {
        JobEvent::Committed { fallback, elapsed, .. } => {
            if verbose {
                match fallback {
                    Some(reason) => println!("  colorize: fallback ({:?}) in {:.2?}", reason, elapsed),
                    None => println!("  colorize: model in {:.2?}", elapsed),
                }
            }
            Ok(())
        }
        JobEvent::Failed { message, .. } => Err(format!("colorize failed: {}", message)),
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Existing paths are taken literally, anything else is expanded as a glob.
/// Duplicates are dropped; first-seen order is kept.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut inputs: Vec<PathBuf> = Vec::new();
    for pattern in patterns {
        let literal = PathBuf::from(pattern);
        let matches: Vec<PathBuf> = if literal.exists() {
            vec![literal]
        } else {
            match glob::glob(pattern) {
                Ok(paths) => paths.filter_map(Result::ok).collect(),
                Err(e) => {
                    eprintln!("warning: '{}' is not a valid pattern: {}", pattern, e);
                    continue;
                }
            }
        };
        if matches.is_empty() {
            eprintln!("warning: '{}' matched no files.", pattern);
        }
        for path in matches {
            if !inputs.contains(&path) {
                inputs.push(path);
            }
        }
    }
    inputs
}

/// Choose the [`SaveFormat`] from the `--format` string or infer it from the
/// output file extension. Defaults to PNG when neither is given.
fn parse_format(format_arg: Option<&str>, output: Option<&Path>) -> Result<SaveFormat, String> {
    if let Some(f) = format_arg {
        return f.parse().map_err(|e| format!("--format: {}", e));
    }
    match output {
        Some(out) => SaveFormat::infer(out).map_err(|e| format!("--output: {}", e)),
        None => Ok(SaveFormat::Png),
    }
}

fn parse_tiff_compression(mode: &str) -> Result<TiffCompression, String> {
    mode.parse().map_err(|e| format!("--tiff-compression: {}", e))
}

/// `--output` wins; otherwise the result is named `<stem>_chromafe.<ext>`
/// inside `--output-dir`, or next to the input when no directory is given.
fn build_output_path(
    input: &Path,
    output: Option<&Path>,
    output_dir: Option<&Path>,
    format: SaveFormat,
) -> Option<PathBuf> {
    if let Some(explicit) = output {
        return Some(explicit.to_path_buf());
    }
    let stem = input.file_stem()?.to_string_lossy();
    let name = format!("{}_chromafe.{}", stem, format.extension());
    let dir = match output_dir {
        Some(dir) => dir,
        None => input.parent().unwrap_or(Path::new(".")),
    };
    Some(dir.join(name))
}
