use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use stepwise_core::jobs::domain::pipeline_job::{JobId, JobStatus, PipelineJob};
use stepwise_core::jobs::domain::job_tracker::JobTracker;
use stepwise_core::pipeline::infrastructure::executor_factory::create_executor;
use stepwise_core::pipeline::pipeline_executor::PipelineExecutor;
use stepwise_core::pipeline::pipeline_logger::{PipelineLogger, StdoutPipelineLogger};
use stepwise_core::pipeline::pipeline_service::{
    LoggerFactory, PipelineService, SinkFactory, SourceFactory,
};
use stepwise_core::shared::settings::{ExecutorKind, Settings};
use stepwise_core::shared::stage_config::StageConfig;
use stepwise_core::stages::infrastructure::stage_factory::StageKind;
use stepwise_core::video::domain::frame_sink::FrameSink;
use stepwise_core::video::domain::frame_source::FrameSource;
use stepwise_core::video::infrastructure::ffmpeg_sink::FfmpegSink;
use stepwise_core::video::infrastructure::ffmpeg_source::FfmpegSource;
use stepwise_core::video::infrastructure::image_file_writer::ImageFileWriter;
use stepwise_core::video::infrastructure::keyframe_sink::{keyframe_dir, KeyframeCapturingSink};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stepwise video processing: decode, run a chain of stages, re-encode.
#[derive(Parser)]
#[command(name = "stepwise", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a video through a chain of stages.
    Process(ProcessArgs),
    /// List the available stage kinds and their parameters.
    Stages,
}

#[derive(Args)]
struct ProcessArgs {
    /// Input video file.
    input: PathBuf,

    /// Output video file.
    output: PathBuf,

    /// Stage as `kind:key=value,...`. Repeat in pipeline order.
    #[arg(long = "stage", value_name = "SPEC")]
    stages: Vec<String>,

    /// JSON file holding an array of `{"kind": ..., "params": {...}}`.
    #[arg(long, conflicts_with = "stages")]
    stages_file: Option<PathBuf>,

    /// Settings file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Executor: sequential or threaded.
    #[arg(long)]
    executor: Option<ExecutorKind>,

    /// Skip saving keyframe stills next to the output.
    #[arg(long)]
    no_keyframes: bool,
}

fn main() {
    env_logger::init();

    match run() {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}

/// Returns whether the command succeeded.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    match Cli::parse().command {
        Command::Stages => {
            for kind in StageKind::ALL {
                println!("{:22} {}", kind.as_str(), kind.usage());
            }
            Ok(true)
        }
        Command::Process(args) => run_process(args),
    }
}

fn run_process(args: ProcessArgs) -> Result<bool, Box<dyn std::error::Error>> {
    validate(&args)?;

    let settings = match &args.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    }
    .with_env_overrides()?;

    let stages = match &args.stages_file {
        Some(path) => load_stages_file(path)?,
        None => args
            .stages
            .iter()
            .map(|spec| parse_stage_spec(spec))
            .collect::<Result<Vec<_>, _>>()?,
    };

    let executor_kind = args.executor.unwrap_or(settings.executor);
    let executor: Arc<dyn PipelineExecutor> =
        Arc::from(create_executor(executor_kind, settings.channel_capacity));

    let sources: SourceFactory = Arc::new(|| Box::new(FfmpegSource::new()) as Box<dyn FrameSource>);

    let keyframes = settings.keyframes.clone();
    let capture_keyframes = keyframes.enabled && !args.no_keyframes;
    let sinks: SinkFactory = Arc::new(move |output: &Path| -> Box<dyn FrameSink> {
        let sink: Box<dyn FrameSink> = Box::new(FfmpegSink::new());
        if capture_keyframes {
            Box::new(KeyframeCapturingSink::new(
                sink,
                Box::new(ImageFileWriter::new()),
                keyframes.clone(),
                keyframe_dir(output),
            ))
        } else {
            sink
        }
    });

    let throttle = settings.progress_throttle;
    let loggers: LoggerFactory =
        Arc::new(move || Box::new(StdoutPipelineLogger::new(throttle)) as Box<dyn PipelineLogger>);

    let service = PipelineService::new(Arc::new(JobTracker::new()), executor, sources, sinks)
        .with_media_policy(settings.media_policy.clone())
        .with_logger_factory(loggers);

    let id = service.submit(&args.input, &args.output, stages)?;
    watch_progress(&service, id);
    let job = service.wait(id)?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    report(&job);
    Ok(job.status == JobStatus::Succeeded)
}

/// Prints a progress line to stderr until the job reaches a terminal status.
fn watch_progress(service: &PipelineService, id: JobId) {
    let mut last = None;
    while let Ok(job) = service.status(id) {
        if job.status.is_terminal() {
            break;
        }
        let current = job.progress.frames_processed;
        if last != Some(current) {
            let total = job
                .input_descriptor
                .as_ref()
                .and_then(|d| d.total_frames);
            match total {
                Some(total) => eprint!("\rProcessing frame {current}/{total}"),
                None => eprint!("\rProcessing frame {current}"),
            }
            last = Some(current);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    if last.is_some() {
        eprintln!();
    }
}

fn report(job: &PipelineJob) {
    match (&job.result, &job.failure) {
        (Some(result), _) => log::info!(
            "Output written to {} ({} frames)",
            result.output.path.display(),
            result.frames_written
        ),
        (None, Some(failure)) => eprintln!("Job {} {}: {failure}", job.id, job.status),
        (None, None) => {}
    }
}

fn validate(args: &ProcessArgs) -> Result<(), Box<dyn std::error::Error>> {
    if !args.input.exists() {
        return Err(format!("Input file not found: {}", args.input.display()).into());
    }
    if args.input == args.output {
        return Err("Output must differ from input".into());
    }
    if let Some(path) = &args.stages_file {
        if !path.exists() {
            return Err(format!("Stages file not found: {}", path.display()).into());
        }
    }
    Ok(())
}

fn load_stages_file(path: &Path) -> Result<Vec<StageConfig>, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json)
        .map_err(|e| format!("Invalid stages file {}: {e}", path.display()).into())
}

/// Parses `kind` or `kind:key=value,key=value`.
///
/// Values are read as JSON when they parse (`640`, `0.5`, `true`) and as
/// plain strings otherwise.
fn parse_stage_spec(spec: &str) -> Result<StageConfig, String> {
    let (kind, params) = match spec.split_once(':') {
        Some((kind, params)) => (kind.trim(), params.trim()),
        None => (spec.trim(), ""),
    };
    if kind.is_empty() {
        return Err(format!("Stage spec '{spec}' has no kind"));
    }

    let mut config = StageConfig::new(kind);
    for pair in params.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected key=value in stage '{kind}', got '{pair}'"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Empty parameter name in stage '{kind}'"));
        }
        let value = value.trim();
        let value = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        config = config.with_param(key, value);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_kind_only() {
        let config = parse_stage_spec("grayscale").unwrap();
        assert_eq!(config, StageConfig::new("grayscale"));
    }

    #[test]
    fn test_parse_typed_values() {
        let config = parse_stage_spec("resize:width=640, filter=lanczos3").unwrap();
        assert_eq!(
            config,
            StageConfig::new("resize")
                .with_param("width", json!(640))
                .with_param("filter", json!("lanczos3"))
        );

        let config = parse_stage_spec("watermark:image=logo.png,opacity=0.25").unwrap();
        assert_eq!(config.params["opacity"], json!(0.25));
        assert_eq!(config.params["image"], json!("logo.png"));
    }

    #[test]
    fn test_parse_rejects_malformed_specs() {
        assert!(parse_stage_spec("").is_err());
        assert!(parse_stage_spec(":width=2").is_err());
        assert!(parse_stage_spec("resize:width").is_err());
        assert!(parse_stage_spec("resize:=640").is_err());
    }

    #[test]
    fn test_load_stages_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stages.json");
        std::fs::write(
            &path,
            r#"[{"kind": "grayscale"}, {"kind": "crop", "params": {"width": 8, "height": 8}}]"#,
        )
        .unwrap();

        let stages = load_stages_file(&path).unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].params["width"], json!(8));
    }

    #[test]
    fn test_cli_parses_process_command() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "process",
            "in.mp4",
            "out.mp4",
            "--stage",
            "grayscale",
            "--stage",
            "resize:width=320",
            "--executor",
            "sequential",
        ])
        .unwrap();

        let Command::Process(args) = cli.command else {
            panic!("expected process command");
        };
        assert_eq!(args.stages, vec!["grayscale", "resize:width=320"]);
        assert_eq!(args.executor, Some(ExecutorKind::Sequential));
        assert!(!args.no_keyframes);
    }
}
