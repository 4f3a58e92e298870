use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ams::cancel::CancellationToken;
use ams::error::PipelineError;
use ams::manifest::{InputInfo, Manifest};
use ams::media::{FfmpegTool, MediaTool};
use ams::model::alignment::WindowAlignment;
use ams::model::anchor::AnchorArtifact;
use ams::model::book::BookIndex;
use ams::model::chunk::ChunkIndex;
use ams::model::collation::RoomtoneSource;
use ams::model::plan::WindowPlan;
use ams::model::report::{ComparisonReport, GateThresholds};
use ams::model::sentence::{RefineParams, RefinedSentences};
use ams::model::silence::{SilenceDetectParams, SilenceTimeline};
use ams::model::transcript::MergedTranscript;
use ams::model::windows::{WindowsArtifact, WindowsParams};
use ams::model::{AnchorParams, CollationParams, PlanParams, RepairPlan};
use ams::runner::{StageOutcome, STAGE_ORDER};
use ams::services::{AlignerClient, AlignerConfig, AsrClient, AsrConfig};
use ams::stages::collate::CollateInputs;
use ams::stages::script_compare::ComparisonParams;
use ams::stages::{anchors, chunks, collate, plan, refine, script_compare, silence, transcribe, validate, window_align, windows};
use ams::workdir::WorkDir;

#[derive(Parser)]
#[command(name = "ams")]
#[command(author, version, about = "Book-manuscript-to-audio alignment pipeline", long_about = None)]
struct Cli {
    /// Chapter audio input file. Determines the default working directory
    /// (`<in>.ams/`) and is required by every stage subcommand below.
    #[arg(long = "in", global = true)]
    input: Option<PathBuf>,

    /// Working directory override; defaults to `<in>.ams/`.
    #[arg(long, global = true)]
    work: Option<PathBuf>,

    /// First stage (inclusive) of the closed `[from, to]` range the
    /// orchestrator will run; a stage command outside the range is
    /// reported as skipped without doing any work (spec §4.1, §6.5).
    /// Defaults to the first stage in `STAGE_ORDER`.
    #[arg(long, global = true)]
    from: Option<String>,

    /// Last stage (inclusive) of the closed `[from, to]` range; defaults
    /// to the last stage in `STAGE_ORDER`. Each `ams <subcommand>`
    /// invocation only ever names one stage, so this mostly matters when
    /// a driving script invokes every subcommand in sequence and relies
    /// on `--from`/`--to` to narrow which ones actually run.
    #[arg(long, global = true)]
    to: Option<String>,

    /// Resume from the manifest's recorded progress. Every stage already
    /// skips on a matching fingerprint regardless of this flag; it exists
    /// for CLI surface compatibility.
    #[arg(long, global = true)]
    resume: bool,

    /// Invalidate this stage and everything after it in the pipeline
    /// before running, forcing a full recompute.
    #[arg(long, global = true)]
    force: bool,

    /// Bounded parallelism for the transcription and window-align stages:
    /// at most this many chunks/windows in flight at once. Defaults to
    /// `min(units, logical_cores / 2)` per spec §5.
    #[arg(long, global = true)]
    jobs: Option<usize>,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a book index from a manuscript. Out of scope for this
    /// pipeline; see `book verify`.
    BuildIndex,
    /// Book-index operations owned by the document-parsing collaborator.
    Book {
        #[command(subcommand)]
        action: BookAction,
    },
    /// ASR pipeline stages: silence detection, window planning, chunking,
    /// and transcription.
    Asr {
        #[command(subcommand)]
        stage: AsrStage,
    },
    /// Mine book/ASR anchor correspondences.
    Anchors(AnchorArgs),
    /// Build anchor-bounded alignment windows.
    Windows(WindowsArgs),
    /// Force-align each window's sentences against its audio slice.
    WindowAlign(WindowAlignArgs),
    /// Snap sentence boundaries to silence under anchor/overlap constraints.
    Refine(RefineArgs),
    /// Render the final master, tightening gaps into room tone.
    Collate(CollateArgs),
    /// Compare the collated result against the book text.
    ScriptCompare(ScriptCompareArgs),
    /// Evaluate QA gates and emit a repair plan on failure.
    Validate(ValidateArgs),
    /// Print the current repair plan, if the last validate run failed.
    Repair,
}

#[derive(Subcommand)]
enum BookAction {
    /// Verify a book index's structural invariants.
    Verify,
    /// Populate per-word phoneme hints.
    PopulatePhonemes,
}

#[derive(Subcommand)]
enum AsrStage {
    DetectSilence(DetectSilenceArgs),
    PlanWindows(PlanWindowsArgs),
    Chunks,
    Transcribe(TranscribeArgs),
}

#[derive(Args)]
struct DetectSilenceArgs {
    #[arg(long)]
    db_floor: Option<f64>,
    #[arg(long)]
    min_silence_dur: Option<f64>,
}

#[derive(Args)]
struct PlanWindowsArgs {
    #[arg(long)]
    min: Option<f64>,
    #[arg(long)]
    max: Option<f64>,
    #[arg(long)]
    target: Option<f64>,
    #[arg(long)]
    strict_tail: bool,
}

#[derive(Args)]
struct TranscribeArgs {
    #[arg(long)]
    asr_url: Option<String>,
    #[arg(long)]
    language: Option<String>,
}

#[derive(Args)]
struct AnchorArgs {
    #[arg(long)]
    ngram: Option<usize>,
    #[arg(long)]
    relax_down_to: Option<usize>,
    #[arg(long)]
    target_per_tokens: Option<f64>,
    #[arg(long)]
    min_separation: Option<usize>,
}

#[derive(Args)]
struct WindowsArgs {
    #[arg(long)]
    pre_pad_sec: Option<f64>,
    #[arg(long)]
    pad_sec: Option<f64>,
}

#[derive(Args)]
struct WindowAlignArgs {
    #[arg(long)]
    aligner_url: Option<String>,
    #[arg(long)]
    language: Option<String>,
}

#[derive(Args)]
struct RefineArgs {
    #[arg(long)]
    silence_threshold_db: Option<f64>,
    #[arg(long)]
    min_silence_dur_sec: Option<f64>,
    #[arg(long)]
    min_word_ms: Option<f64>,
    #[arg(long)]
    short_phrase_guard_s: Option<f64>,
}

#[derive(Args)]
struct CollateArgs {
    #[arg(long)]
    roomtone_level_db: Option<f64>,
    #[arg(long)]
    min_gap_ms: Option<f64>,
    #[arg(long)]
    max_gap_ms: Option<f64>,
    #[arg(long)]
    bridge_max_ms: Option<f64>,
    #[arg(long)]
    roomtone_file: Option<String>,
}

#[derive(Args)]
struct ScriptCompareArgs {
    #[arg(long)]
    fold_spelling: Option<bool>,
}

#[derive(Args)]
struct ValidateArgs {
    #[arg(long)]
    wer_max: Option<f64>,
    #[arg(long)]
    cer_max: Option<f64>,
}

fn setup_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}

fn require_input(cli: &Cli) -> Result<&Path, PipelineError> {
    cli.input
        .as_deref()
        .ok_or_else(|| PipelineError::InvalidInput("--in <audio file> is required".to_string()))
}

fn resolve_work_dir(cli: &Cli) -> Result<WorkDir, PipelineError> {
    if let Some(work) = &cli.work {
        return Ok(WorkDir::explicit(work.clone()));
    }
    Ok(WorkDir::for_input(require_input(cli)?))
}

fn compute_input_info(media: &dyn MediaTool, path: &Path) -> Result<InputInfo, PipelineError> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let sha256 = hex::encode(hasher.finalize());

    let metadata = std::fs::metadata(path)?;
    let mtime_utc = metadata
        .modified()
        .map(chrono::DateTime::<chrono::Utc>::from)
        .unwrap_or_else(|_| chrono::Utc::now());
    let duration_sec = media.probe_duration(&path.to_string_lossy())?;

    Ok(InputInfo {
        path: path.to_string_lossy().into_owned(),
        sha256,
        duration_sec,
        size_bytes: metadata.len(),
        mtime_utc,
    })
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::InvalidInput(format!("reading {}: {e}", path.display())))?;
    serde_json::from_str(&text).map_err(|e| PipelineError::ArtifactCorruption(format!("{}: {e}", path.display())))
}

/// Open the manifest for `cli`'s input, optionally invalidating `stage`
/// onward first when `--force` is set.
fn open_manifest(cli: &Cli, work_dir: &WorkDir, input_info: &InputInfo, stage: &str) -> Result<Manifest, PipelineError> {
    let mut manifest = Manifest::load_or_init(&work_dir.manifest_path(), input_info.clone())?;
    if cli.force {
        manifest.invalidate_from(stage, STAGE_ORDER);
    }
    Ok(manifest)
}

/// Resolves a `--from`/`--to` stage name to its position in `STAGE_ORDER`.
fn resolve_stage_bound(name: &str, flag: &str) -> Result<usize, PipelineError> {
    ams::runner::stage_index(name)
        .ok_or_else(|| PipelineError::InvalidInput(format!("{flag}: unknown stage name {name:?}; expected one of {STAGE_ORDER:?}")))
}

/// True iff `stage` falls inside the closed `[--from, --to]` interval
/// (spec §4.1: "the orchestrator skips stages outside the closed
/// interval"). Unset bounds default to the first/last entries of
/// `STAGE_ORDER`.
fn stage_in_range(cli: &Cli, stage: &str) -> Result<bool, PipelineError> {
    let idx = ams::runner::stage_index(stage)
        .ok_or_else(|| PipelineError::InvalidInput(format!("internal error: unknown stage name {stage:?}")))?;
    let from_idx = match &cli.from {
        Some(name) => resolve_stage_bound(name, "--from")?,
        None => 0,
    };
    let to_idx = match &cli.to {
        Some(name) => resolve_stage_bound(name, "--to")?,
        None => STAGE_ORDER.len() - 1,
    };
    Ok(idx >= from_idx && idx <= to_idx)
}

/// Guard called at the top of every stage subcommand: if `stage` falls
/// outside `--from`/`--to`, report it as skipped and return `true` so the
/// caller returns early without touching the manifest or doing any work.
fn skip_outside_range(cli: &Cli, stage: &str) -> Result<bool, PipelineError> {
    if stage_in_range(cli, stage)? {
        Ok(false)
    } else {
        info!(stage, "outside --from/--to range, skipped");
        Ok(true)
    }
}

/// Bounded parallelism for per-unit stages (spec §5): an explicit `--jobs`
/// wins, otherwise `min(units, logical_cores / 2)`, floored at 1.
fn resolve_jobs(cli: &Cli, units: usize) -> usize {
    if let Some(jobs) = cli.jobs {
        return jobs.max(1);
    }
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    units.min((cores / 2).max(1)).max(1)
}

fn report_outcome(stage: &str, outcome: &StageOutcome) {
    match outcome {
        StageOutcome::Skipped => info!(stage, "already up to date, skipped"),
        StageOutcome::Completed { artifacts } => info!(stage, artifact_count = artifacts.len(), "completed"),
        StageOutcome::GateFailed(_) => {}
    }
}

fn book_stub(command: &str) -> PipelineError {
    PipelineError::InvalidInput(format!(
        "`{command}` parses the source manuscript into a book index; that step runs upstream of this pipeline and its output is read from book-index.json"
    ))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested, finishing in-flight units and stopping");
            ctrl_c_cancel.cancel();
        }
    });

    if let Err(err) = dispatch(cli, &cancel).await {
        error!("{err}");
        std::process::exit(err.exit_code());
    }
}

async fn dispatch(cli: Cli, cancel: &CancellationToken) -> Result<(), PipelineError> {
    match &cli.command {
        Commands::BuildIndex => Err(book_stub("build-index")),
        Commands::Book { action } => match action {
            BookAction::Verify => Err(book_stub("book verify")),
            BookAction::PopulatePhonemes => Err(book_stub("book populate-phonemes")),
        },
        Commands::Asr { stage } => match stage {
            AsrStage::DetectSilence(args) => cmd_detect_silence(&cli, args),
            AsrStage::PlanWindows(args) => cmd_plan_windows(&cli, args),
            AsrStage::Chunks => cmd_chunks(&cli),
            AsrStage::Transcribe(args) => cmd_transcribe(&cli, args, cancel).await,
        },
        Commands::Anchors(args) => cmd_anchors(&cli, args),
        Commands::Windows(args) => cmd_windows(&cli, args),
        Commands::WindowAlign(args) => cmd_window_align(&cli, args, cancel).await,
        Commands::Refine(args) => cmd_refine(&cli, args),
        Commands::Collate(args) => cmd_collate(&cli, args),
        Commands::ScriptCompare(args) => cmd_script_compare(&cli, args),
        Commands::Validate(args) => cmd_validate(&cli, args),
        Commands::Repair => cmd_repair(&cli),
    }
}

fn cmd_detect_silence(cli: &Cli, args: &DetectSilenceArgs) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "timeline")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "timeline")?;

    let params = SilenceDetectParams {
        db_floor: args.db_floor.unwrap_or(-35.0),
        min_silence_dur: args.min_silence_dur.unwrap_or(0.3),
    };
    let outcome = silence::run(&work_dir, &mut manifest, &input_info.path, &input_info.sha256, params, &media)?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("timeline", &outcome);
    Ok(())
}

fn cmd_plan_windows(cli: &Cli, args: &PlanWindowsArgs) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "plan")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "plan")?;

    let timeline: SilenceTimeline = load_json(&work_dir.stage_dir("timeline").join("silence.json"))?;
    let params = PlanParams {
        min: args.min.unwrap_or(20.0),
        max: args.max.unwrap_or(45.0),
        target: args.target.unwrap_or(30.0),
        strict_tail: args.strict_tail,
    };
    let outcome = plan::run(&work_dir, &mut manifest, input_info.duration_sec, &timeline, params)?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("plan", &outcome);
    Ok(())
}

fn cmd_chunks(cli: &Cli) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "chunks")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "chunks")?;

    let plan: WindowPlan = load_json(&work_dir.stage_dir("plan").join("windows.json"))?;
    let outcome = chunks::run(&work_dir, &mut manifest, &input_info.path, &input_info.sha256, &plan, &media)?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("chunks", &outcome);
    Ok(())
}

async fn cmd_transcribe(cli: &Cli, args: &TranscribeArgs, cancel: &CancellationToken) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "transcripts")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "transcripts")?;

    let index: ChunkIndex = load_json(&work_dir.stage_dir("chunks").join("index.json"))?;

    let mut asr_config = AsrConfig::default();
    if let Some(url) = &args.asr_url {
        asr_config.base_url = url.clone();
    }
    if let Some(lang) = &args.language {
        asr_config.language = lang.clone();
    }
    let client = AsrClient::new(asr_config).map_err(|e| PipelineError::ServiceUnavailable(e.to_string()))?;
    let wav_dir = work_dir.stage_dir("chunks");
    let jobs = resolve_jobs(cli, index.chunks.len());

    let outcome = transcribe::run(&work_dir, &mut manifest, &index, &client, &wav_dir, jobs, cancel).await?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("transcripts", &outcome);
    Ok(())
}

fn cmd_anchors(cli: &Cli, args: &AnchorArgs) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "anchors")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "anchors")?;

    let book: BookIndex = load_json(&work_dir.book_index_path())?;
    let asr: MergedTranscript = load_json(&work_dir.stage_dir("transcripts").join("merged.json"))?;

    let mut params = AnchorParams::default();
    if let Some(v) = args.ngram {
        params.ngram = v;
    }
    if let Some(v) = args.relax_down_to {
        params.relax_down_to = v;
    }
    if let Some(v) = args.target_per_tokens {
        params.target_per_tokens = v;
    }
    if let Some(v) = args.min_separation {
        params.min_separation = v;
    }

    let outcome = anchors::run(&work_dir, &mut manifest, &book, &asr, params)?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("anchors", &outcome);
    Ok(())
}

fn cmd_windows(cli: &Cli, args: &WindowsArgs) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "windows")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "windows")?;

    let book: BookIndex = load_json(&work_dir.book_index_path())?;
    let anchors_artifact: AnchorArtifact = load_json(&work_dir.stage_dir("anchors").join("anchors.json"))?;

    let mut params = WindowsParams::default();
    if let Some(v) = args.pre_pad_sec {
        params.pre_pad_sec = v;
    }
    if let Some(v) = args.pad_sec {
        params.pad_sec = v;
    }

    let outcome = windows::run(&work_dir, &mut manifest, &book, &anchors_artifact, params)?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("windows", &outcome);
    Ok(())
}

async fn cmd_window_align(cli: &Cli, args: &WindowAlignArgs, cancel: &CancellationToken) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "window-align")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "window-align")?;

    let book: BookIndex = load_json(&work_dir.book_index_path())?;
    let windows_artifact: WindowsArtifact = load_json(&work_dir.stage_dir("windows").join("windows.json"))?;

    let language = args.language.clone().unwrap_or_else(|| "en".to_string());
    let mut aligner_config = AlignerConfig::default();
    if let Some(url) = &args.aligner_url {
        aligner_config.base_url = url.clone();
    }
    aligner_config.language = language.clone();
    let client = AlignerClient::new(aligner_config).map_err(|e| PipelineError::ServiceUnavailable(e.to_string()))?;
    let jobs = resolve_jobs(cli, windows_artifact.windows.len());
    let media: Arc<dyn MediaTool> = Arc::new(media);

    let outcome = window_align::run(
        &work_dir,
        &mut manifest,
        &book,
        &windows_artifact,
        &input_info.path,
        &client,
        media,
        &language,
        jobs,
        cancel,
    )
    .await?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("window-align", &outcome);
    Ok(())
}

fn cmd_refine(cli: &Cli, args: &RefineArgs) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "refine")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "refine")?;

    let windows_artifact: WindowsArtifact = load_json(&work_dir.stage_dir("windows").join("windows.json"))?;
    let window_align_dir = work_dir.stage_dir("window-align");

    let mut raw = Vec::new();
    for w in &windows_artifact.windows {
        let alignment: WindowAlignment = load_json(&window_align_dir.join(format!("{}.aeneas.json", w.id)))?;
        let chapter_fragments = alignment.chapter_fragments();
        for (fragment, range) in chapter_fragments.into_iter().zip(alignment.fragment_word_ranges.iter()) {
            raw.push(refine::RawSentence {
                fragment,
                start_word_idx: Some(range.start_word_idx),
                end_word_idx: Some(range.end_word_idx),
            });
        }
    }

    let timeline: SilenceTimeline = load_json(&work_dir.stage_dir("timeline").join("silence.json"))?;
    let anchors_artifact: AnchorArtifact = load_json(&work_dir.stage_dir("anchors").join("anchors.json"))?;
    let asr: MergedTranscript = load_json(&work_dir.stage_dir("transcripts").join("merged.json"))?;
    let anchor_times = anchors::anchor_asr_times(&anchors_artifact, &asr);
    let asr_word_times: Vec<(f64, f64)> = asr.words.iter().map(|w| (w.start, w.end)).collect();

    let mut params = RefineParams::default();
    if let Some(v) = args.silence_threshold_db {
        params.silence_threshold_db = v;
    }
    if let Some(v) = args.min_silence_dur_sec {
        params.min_silence_dur_sec = v;
    }
    if let Some(v) = args.min_word_ms {
        params.min_word_ms = v;
    }
    if let Some(v) = args.short_phrase_guard_s {
        params.short_phrase_guard_s = v;
    }

    let outcome = refine::run(&work_dir, &mut manifest, &raw, &timeline.events, &anchor_times, &asr_word_times, params)?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("refine", &outcome);
    Ok(())
}

fn cmd_collate(cli: &Cli, args: &CollateArgs) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "collate")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "collate")?;

    let refined: RefinedSentences = load_json(&work_dir.stage_dir("refine").join("sentences.json"))?;
    let plan: WindowPlan = load_json(&work_dir.stage_dir("plan").join("windows.json"))?;

    let mut params = CollationParams::default();
    if let Some(v) = args.roomtone_level_db {
        params.roomtone_level_db = v;
    }
    if let Some(v) = args.min_gap_ms {
        params.min_gap_ms = v;
    }
    if let Some(v) = args.max_gap_ms {
        params.max_gap_ms = v;
    }
    if let Some(v) = args.bridge_max_ms {
        params.bridge_max_ms = v;
    }
    if let Some(path) = &args.roomtone_file {
        params.roomtone_source = RoomtoneSource::File;
        params.roomtone_file_path = Some(path.clone());
    }

    let inputs = CollateInputs {
        sentences: &refined.sentences,
        plan: &plan,
        audio_path: &input_info.path,
        audio_sha256: &input_info.sha256,
        total_duration: input_info.duration_sec,
    };
    let outcome = collate::run(&work_dir, &mut manifest, &inputs, params, &media)?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("collate", &outcome);
    Ok(())
}

fn cmd_script_compare(cli: &Cli, args: &ScriptCompareArgs) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "script-compare")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "script-compare")?;

    let book: BookIndex = load_json(&work_dir.book_index_path())?;
    let asr: MergedTranscript = load_json(&work_dir.stage_dir("transcripts").join("merged.json"))?;
    let refined: RefinedSentences = load_json(&work_dir.stage_dir("refine").join("sentences.json"))?;
    let windows_artifact: WindowsArtifact = load_json(&work_dir.stage_dir("windows").join("windows.json"))?;
    let anchors_artifact: AnchorArtifact = load_json(&work_dir.stage_dir("anchors").join("anchors.json"))?;

    let mut params = ComparisonParams::default();
    if let Some(v) = args.fold_spelling {
        params.fold_spelling = v;
    }

    let outcome = script_compare::run(
        &work_dir,
        &mut manifest,
        &book,
        &asr,
        &refined.sentences,
        &windows_artifact,
        &anchors_artifact,
        params,
    )?;
    manifest.save(&work_dir.manifest_path())?;
    report_outcome("script-compare", &outcome);
    Ok(())
}

fn cmd_validate(cli: &Cli, args: &ValidateArgs) -> Result<(), PipelineError> {
    if skip_outside_range(cli, "validate")? {
        return Ok(());
    }
    let media = FfmpegTool::default();
    let input = require_input(cli)?;
    let work_dir = resolve_work_dir(cli)?;
    let input_info = compute_input_info(&media, input)?;
    let mut manifest = open_manifest(cli, &work_dir, &input_info, "validate")?;

    let report: ComparisonReport = load_json(&work_dir.stage_dir("script-compare").join("report.json"))?;

    let mut thresholds = GateThresholds::default();
    if let Some(v) = args.wer_max {
        thresholds.wer_max = v;
    }
    if let Some(v) = args.cer_max {
        thresholds.cer_max = v;
    }

    let outcome = validate::run(&work_dir, &mut manifest, &report, thresholds)?;
    manifest.save(&work_dir.manifest_path())?;

    match outcome {
        StageOutcome::GateFailed(plan) => {
            eprintln!("validation failed: {} window(s) need repair", plan.windows.len());
            for w in &plan.windows {
                eprintln!("  {} -> {}", w.window_id, w.suggestions.join(", "));
            }
            std::process::exit(2);
        }
        StageOutcome::Completed { .. } => info!("all gates passed"),
        StageOutcome::Skipped => info!("validate up to date, skipped"),
    }
    Ok(())
}

fn cmd_repair(cli: &Cli) -> Result<(), PipelineError> {
    let work_dir = resolve_work_dir(cli)?;
    let path = work_dir.stage_dir("validate").join("repair").join("repair.plan.json");
    if !path.exists() {
        info!("no repair plan on file: the last validate run passed, or validate has not run yet");
        return Ok(());
    }

    let plan: RepairPlan = load_json(&path)?;
    for w in &plan.windows {
        println!("{} -> {}", w.window_id, w.suggestions.join(", "));
    }
    if !plan.windows.is_empty() {
        std::process::exit(2);
    }
    Ok(())
}
