use std::{
    fs,
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use colored::Colorize;
use handcontact::{
    AnnotationError, BatchClient, DatasetLayout, EpisodeManifest, ImageDetail, PipelineOptions,
    ProgressCallback, ProgressInfo, Reconciler, RequestOptions, RequestSummary, SampleOptions,
    StripOptions, WatchOptions,
    batch::{BatchJob, load_batch_id, save_batch_id},
    configuration::DEFAULT_MODEL,
    episode::MANIFEST_FILE_NAME,
    fetch_results, read_work_units, sample_dataset, watch, write_annotations, write_batch,
};
use indicatif::{ProgressBar, ProgressStyle};

const CLI_AFTER_HELP: &str = "Examples:\n  handcontact sample data/g1_pick_place --out frames --every 10 --progress\n  handcontact prepare --manifest frames/episodes_meta.json --out batch/batch_input.jsonl\n  handcontact inspect batch/batch_input.jsonl --limit 3\n  handcontact submit --input batch/batch_input.jsonl\n  handcontact watch --interval 60\n  handcontact process --out annotations\n  handcontact completions zsh > _handcontact";

#[derive(Debug, Parser)]
#[command(
    name = "handcontact",
    version,
    about = "Prepare and reconcile hand-object contact annotation batches",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a progress bar where supported.
    #[arg(long, global = true)]
    progress: bool,

    /// Allow overwriting existing output files.
    #[arg(long, global = true)]
    overwrite: bool,

    /// Desired worker thread count for the parallel request builder.
    #[arg(long, global = true)]
    threads: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sample frames from every episode video of a dataset.
    #[command(
        about = "Sample episode frames",
        after_help = "Examples:\n  handcontact sample data/g1_pick_place --out frames --every 10\n  handcontact sample data/g1_pick_place --max-episodes 2 --progress"
    )]
    Sample {
        /// Dataset root (contains meta/ and videos/).
        dataset: PathBuf,
        /// Output directory for frames and the episode manifest.
        #[arg(long, default_value = "frames")]
        out: PathBuf,
        /// Keep every Nth decoded frame.
        #[arg(long, default_value_t = 10)]
        every: u64,
        /// Only sample the first N episodes.
        #[arg(long)]
        max_episodes: Option<usize>,
        /// Camera stream directory under each video chunk.
        #[arg(long)]
        camera: Option<String>,
        /// JPEG quality of the saved frames (1-100).
        #[arg(long, default_value_t = 90)]
        quality: u8,
    },

    /// Build the batch input JSONL from an episode manifest.
    #[command(
        about = "Build batch requests",
        after_help = "Examples:\n  handcontact prepare\n  handcontact prepare --strip-size 5 --scale 0.5 --detail low"
    )]
    Prepare {
        /// Episode manifest written by `sample`.
        #[arg(long, default_value = "frames/episodes_meta.json")]
        manifest: PathBuf,
        /// Output JSONL path.
        #[arg(long, default_value = "batch/batch_input.jsonl")]
        out: PathBuf,
        /// Model identifier written into every request.
        #[arg(long, default_value = DEFAULT_MODEL)]
        model: String,
        /// Frames per strip.
        #[arg(long, default_value_t = 3)]
        strip_size: usize,
        /// Downscale every frame before compositing (0 < scale <= 1).
        #[arg(long)]
        scale: Option<f32>,
        /// Image detail hint.
        #[arg(long, value_enum, ignore_case = true, default_value = "high")]
        detail: DetailArg,
        /// Robot description appended to the system prompt.
        #[arg(long)]
        robot_description: Option<String>,
    },

    /// Print readable summaries of a batch input file.
    #[command(
        about = "Inspect batch requests",
        after_help = "Examples:\n  handcontact inspect batch/batch_input.jsonl\n  handcontact inspect batch/batch_input.jsonl --limit 0 --images strips"
    )]
    Inspect {
        /// Batch input JSONL.
        input: PathBuf,
        /// Print at most N requests (0 prints all).
        #[arg(long, default_value_t = 5)]
        limit: usize,
        /// Write each decoded strip image into this directory.
        #[arg(long)]
        images: Option<PathBuf>,
    },

    /// Upload the batch input and create a batch job.
    #[command(about = "Submit a batch job")]
    Submit {
        /// Batch input JSONL.
        #[arg(long, default_value = "batch/batch_input.jsonl")]
        input: PathBuf,
        /// Directory where the batch id is remembered.
        #[arg(long, default_value = "batch")]
        batch_dir: PathBuf,
    },

    /// Poll a batch job until it finishes.
    #[command(about = "Watch batch status")]
    Watch {
        /// Batch id (defaults to the last submitted one).
        batch_id: Option<String>,
        /// Directory where the batch id is remembered.
        #[arg(long, default_value = "batch")]
        batch_dir: PathBuf,
        /// Seconds between polls.
        #[arg(long, default_value_t = 60)]
        interval: u64,
        /// Stop after N polls.
        #[arg(long)]
        max_polls: Option<u32>,
    },

    /// Download or read batch results and write the annotation files.
    #[command(
        about = "Reconcile batch results",
        after_help = "Examples:\n  handcontact process --out annotations\n  handcontact process --results batch/batch_output.jsonl --errors batch/batch_errors.jsonl"
    )]
    Process {
        /// Batch id (defaults to the last submitted one).
        batch_id: Option<String>,
        /// Directory where the batch id and raw results are kept.
        #[arg(long, default_value = "batch")]
        batch_dir: PathBuf,
        /// Reconcile a local output JSONL instead of downloading.
        #[arg(long)]
        results: Option<PathBuf>,
        /// Local error JSONL to reconcile after the output records.
        #[arg(long)]
        errors: Option<PathBuf>,
        /// Output directory for the annotation files.
        #[arg(long, default_value = "annotations")]
        out: PathBuf,
    },

    /// Generate shell completion scripts.
    #[command(about = "Generate shell completions")]
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Repair list written next to the batch input when units were skipped.
const SKIPPED_UNITS_FILE: &str = "skipped_units.json";

/// `--detail` values, mirrored onto [`ImageDetail`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DetailArg {
    Low,
    High,
    Auto,
}

impl From<DetailArg> for ImageDetail {
    fn from(value: DetailArg) -> Self {
        match value {
            DetailArg::Low => ImageDetail::Low,
            DetailArg::High => ImageDetail::High,
            DetailArg::Auto => ImageDetail::Auto,
        }
    }
}

fn init_logging(global: &GlobalOptions) {
    let default_filter = if global.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn apply_global_options(global: &GlobalOptions) {
    if let Some(threads) = global.threads {
        if threads > 0 {
            unsafe {
                std::env::set_var("RAYON_NUM_THREADS", threads.to_string());
            }
        }
    }

    #[cfg(not(feature = "rayon"))]
    if global.threads.is_some() {
        eprintln!(
            "{} {}",
            "warning:".yellow().bold(),
            "--threads requires building with the `rayon` feature".yellow()
        );
    }
}

fn ensure_writable_path(path: &Path, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        if overwrite {
            eprintln!(
                "{} {}",
                "warning:".yellow().bold(),
                format!("overwriting {}", path.display()).yellow()
            );
        } else {
            return Err(format!(
                "output already exists: {} (use --overwrite to replace)",
                path.display()
            )
            .into());
        }
    }
    Ok(())
}

fn resolve_batch_id(
    batch_id: Option<String>,
    batch_dir: &Path,
) -> Result<String, AnnotationError> {
    match batch_id {
        Some(batch_id) => Ok(batch_id),
        None => load_batch_id(batch_dir),
    }
}

struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        let style =
            ProgressStyle::with_template("{spinner:.green} {bar:40.cyan/blue} {pos}/{len} {msg}")?;
        bar.set_style(style.progress_chars("##-"));
        Ok(Self { bar })
    }
}

impl ProgressCallback for BarProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        if let Some(total) = info.total {
            self.bar.set_length(total);
        }
        self.bar.set_position(info.current);
        if let Some(episode) = info.current_episode {
            self.bar.set_message(format!("episode {episode}"));
        }
    }
}

fn pipeline_options(
    global: &GlobalOptions,
) -> Result<(PipelineOptions, Option<ProgressBar>), Box<dyn std::error::Error>> {
    if !global.progress {
        return Ok((PipelineOptions::new(), None));
    }
    let progress = BarProgress::new()?;
    let bar = progress.bar.clone();
    Ok((
        PipelineOptions::new().with_progress(Arc::new(progress)),
        Some(bar),
    ))
}

fn describe_job(job: &BatchJob) -> String {
    match job.request_counts {
        Some(counts) => format!(
            "{} {} ({}/{} completed, {} failed)",
            job.id, job.status, counts.completed, counts.total, counts.failed
        ),
        None => format!("{} {}", job.id, job.status),
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.global);
    apply_global_options(&cli.global);

    match cli.command {
        Commands::Sample {
            dataset,
            out,
            every,
            max_episodes,
            camera,
            quality,
        } => {
            if every == 0 {
                return Err("--every must be greater than 0".into());
            }

            let mut layout = DatasetLayout::new(&dataset);
            if let Some(camera) = camera {
                layout = layout.with_camera_key(camera);
            }
            let options = SampleOptions::new(every)
                .with_jpeg_quality(quality)
                .with_overwrite(cli.global.overwrite)
                .with_max_episodes(max_episodes);
            let (pipeline, progress_bar) = pipeline_options(&cli.global)?;

            let report = sample_dataset(&layout, &out, &options, &pipeline)?;

            if let Some(pb) = progress_bar {
                pb.finish_with_message("done");
            }
            for failed in &report.failed {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("skipped episode {}: {}", failed.episode_index, failed.error).yellow()
                );
            }
            println!(
                "{} {}",
                "success:".green().bold(),
                format!(
                    "Sampled {} frame(s) from {} episode(s) into {}",
                    report.manifest.frame_count(),
                    report.manifest.episodes.len(),
                    out.display()
                )
                .green()
            );
            println!("{} {}", "saved".green().bold(), report.manifest_path.display());
        }
        Commands::Prepare {
            manifest,
            out,
            model,
            strip_size,
            scale,
            detail,
            robot_description,
        } => {
            let mut strip = StripOptions::new(strip_size);
            if let Some(scale) = scale {
                strip = strip.with_scale(scale);
            }
            strip.validate()?;

            let mut options = RequestOptions::new(model)
                .with_strip(strip)
                .with_detail(detail.into());
            if let Some(description) = robot_description {
                options = options.with_robot_description(description);
            }

            let manifest_path = if manifest.is_dir() {
                manifest.join(MANIFEST_FILE_NAME)
            } else {
                manifest
            };
            let manifest = EpisodeManifest::load(&manifest_path)?;

            ensure_writable_path(&out, cli.global.overwrite)?;
            if let Some(parent) = out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }

            let (pipeline, progress_bar) = pipeline_options(&cli.global)?;
            let mut writer = BufWriter::new(File::create(&out)?);
            let report = write_batch(&manifest, &options, &pipeline, &mut writer)?;

            if let Some(pb) = progress_bar {
                pb.finish_with_message("done");
            }
            for skipped in &report.skipped {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("skipped {}: {} missing frame(s)", skipped.id, skipped.missing.len())
                        .yellow()
                );
            }
            if !report.skipped.is_empty() {
                let skipped_path = out.with_file_name(SKIPPED_UNITS_FILE);
                fs::write(&skipped_path, serde_json::to_string_pretty(&report.skipped)?)?;
                println!("{} {}", "saved".green().bold(), skipped_path.display());
            }
            println!(
                "{} {}",
                "success:".green().bold(),
                format!(
                    "Wrote {} request(s) for {} episode(s) to {}",
                    report.written,
                    report.episodes,
                    out.display()
                )
                .green()
            );
        }
        Commands::Inspect {
            input,
            limit,
            images,
        } => {
            let units = read_work_units(&input)?;
            println!("{} request(s) in {}", units.len(), input.display());

            if let Some(dir) = &images {
                fs::create_dir_all(dir)?;
            }

            let shown = if limit == 0 { units.len() } else { limit };
            for unit in units.iter().take(shown) {
                let summary = RequestSummary::from_work_unit(unit)?;
                println!();
                println!("{} {}", "request".cyan().bold(), summary.custom_id);
                println!("  model: {}", summary.model);
                if let Some(id) = summary.id {
                    println!(
                        "  episode {} frame {}",
                        id.episode_index(),
                        id.frame_index()
                    );
                }
                println!(
                    "  image: {} ({} bytes)",
                    summary.image_mime.as_deref().unwrap_or("none"),
                    summary.image_len()
                );
                if cli.global.verbose {
                    println!("  system:\n{}", summary.system_text);
                }
                println!("  user:\n{}", summary.user_text);

                if let (Some(dir), Some(bytes)) = (&images, &summary.image_bytes) {
                    let path = dir.join(format!("{}.jpg", summary.custom_id));
                    fs::write(&path, bytes)?;
                    println!("{} {}", "saved".green().bold(), path.display());
                }
            }
        }
        Commands::Submit { input, batch_dir } => {
            let client = BatchClient::from_env()?;
            let file_id = client.upload_file(&input)?;
            println!("{} {}", "uploaded".green().bold(), file_id);

            let job = client.create_batch(&file_id)?;
            save_batch_id(&batch_dir, &job.id)?;
            println!(
                "{} {}",
                "success:".green().bold(),
                format!("Created batch {} ({})", job.id, job.status).green()
            );
        }
        Commands::Watch {
            batch_id,
            batch_dir,
            interval,
            max_polls,
        } => {
            let batch_id = resolve_batch_id(batch_id, &batch_dir)?;
            let client = BatchClient::from_env()?;
            let options =
                WatchOptions::new(Duration::from_secs(interval)).with_max_polls(max_polls);

            let job = watch(&client, &batch_id, &options, |job| {
                println!("{} {}", "status".cyan().bold(), describe_job(job));
            })?;

            if job.status.is_terminal() {
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!("Batch {} finished: {}", job.id, job.status).green()
                );
            } else {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("Batch {} still {} after polling limit", job.id, job.status).yellow()
                );
            }
        }
        Commands::Process {
            batch_id,
            batch_dir,
            results,
            errors,
            out,
        } => {
            let (output_text, error_text) = match results {
                Some(results) => {
                    let errors = match errors {
                        Some(path) => fs::read_to_string(path)?,
                        None => String::new(),
                    };
                    (fs::read_to_string(results)?, errors)
                }
                None => {
                    let batch_id = resolve_batch_id(batch_id, &batch_dir)?;
                    let client = BatchClient::from_env()?;
                    let fetched = fetch_results(&client, &batch_id)?;

                    fs::create_dir_all(&batch_dir)?;
                    fs::write(batch_dir.join("batch_output.jsonl"), &fetched.output)?;
                    if !fetched.errors.is_empty() {
                        fs::write(batch_dir.join("batch_errors.jsonl"), &fetched.errors)?;
                    }
                    (fetched.output, fetched.errors)
                }
            };

            let mut reconciler = Reconciler::new();
            reconciler.push_jsonl(&output_text);
            reconciler.push_jsonl(&error_text);
            let result = reconciler.finish();

            let paths = write_annotations(&result.annotations, &out)?;
            let report = &result.report;

            println!(
                "Records: {} | parsed: {} | placeholders: {} | undecodable ids: {} | malformed lines: {} | duplicates: {}",
                report.records,
                report.parsed,
                report.placeholders,
                report.undecodable.len(),
                report.malformed_lines,
                report.duplicates
            );
            if report.failed() > 0 {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    format!("{} record(s) did not yield a parsed label", report.failed()).yellow()
                );
            }
            println!(
                "{} {}",
                "success:".green().bold(),
                format!(
                    "Wrote {} label(s) for {} episode(s) to {}",
                    result.annotations.len(),
                    result.annotations.episode_count(),
                    out.display()
                )
                .green()
            );
            println!("{} {}", "saved".green().bold(), paths.combined.display());
            println!("{} {}", "saved".green().bold(), paths.summary.display());
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "handcontact", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("{} {error}", "error:".red().bold());
        std::process::exit(1);
    }
}
