use clap::{Parser, Subcommand};
use label_scan::config::ScannerConfig;
use label_scan::detector::{DetectionMode, DocumentQuadDetector};
use label_scan::error::ScanError;
use label_scan::matcher::{MatchStrategy, TemplateCandidate, TemplateMatcher, feature_store};
use label_scan::pipeline::TemplateSource;
use label_scan::regions::RegionProjector;
use label_scan::tools::{load_manifest, load_probability_map};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(name = "labeltool", version, about = "label_scan CLI tools")]
struct Cli {
    /// JSON config file; LABEL_SCAN_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect the document quad in a saved probability map (grayscale PNG)
    Detect {
        #[arg(long)]
        map: PathBuf,
        /// Run the exhaustive offline search
        #[arg(long)]
        offline: bool,
    },
    /// Summarize a persisted feature blob
    Inspect {
        #[arg(long)]
        features: PathBuf,
    },
    /// Match a frame's feature blob against a template manifest
    Match {
        #[arg(long)]
        features: PathBuf,
        #[arg(long)]
        manifest: PathBuf,
        /// Frame width in pixels
        #[arg(long)]
        width: u32,
        /// Frame height in pixels
        #[arg(long)]
        height: u32,
        /// Treat the features as coming from a rectified label
        #[arg(long)]
        rectified: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Command::Detect { map, offline } => detect_cmd(&config, &map, offline),
        Command::Inspect { features } => inspect_cmd(&features),
        Command::Match {
            features,
            manifest,
            width,
            height,
            rectified,
        } => match_cmd(&config, &features, &manifest, (width, height), rectified),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<ScannerConfig, ScanError> {
    let config = match path {
        Some(path) => ScannerConfig::load(path)?,
        None => ScannerConfig::default(),
    }
    .with_env_overrides();
    config.validate()?;
    Ok(config)
}

fn detect_cmd(config: &ScannerConfig, map: &Path, offline: bool) -> Result<(), ScanError> {
    let map = load_probability_map(map)?;
    let mode = if offline {
        DetectionMode::Offline
    } else {
        DetectionMode::Live
    };
    let detector = DocumentQuadDetector::new(config.detector.clone());

    let start = Instant::now();
    let (result, telemetry) = detector.detect_with_telemetry(&map, mode);
    info!(
        elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
        fallback = telemetry.used_fallback(),
        "detection finished"
    );

    let report = serde_json::json!({
        "result": result,
        "telemetry": telemetry,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn inspect_cmd(path: &Path) -> Result<(), ScanError> {
    let features = feature_store::load(path)?;
    println!("File: {}", path.display());
    println!("Keypoints: {}", features.len());
    println!(
        "Descriptors: {:?} {}x{} ({} bytes)",
        features.descriptors.kind(),
        features.descriptors.rows(),
        features.descriptors.cols(),
        features.descriptors.byte_len()
    );
    if let Some(first) = features.keypoints.first() {
        println!(
            "First keypoint: ({:.1}, {:.1}) size={:.1} response={:.3}",
            first.x, first.y, first.size, first.response
        );
    }
    Ok(())
}

fn match_cmd(
    config: &ScannerConfig,
    features: &Path,
    manifest: &Path,
    frame_size: (u32, u32),
    rectified: bool,
) -> Result<(), ScanError> {
    let frame = feature_store::load(features)?;
    let source = load_manifest(manifest)?;

    let templates = source.templates();
    let mut loaded = Vec::with_capacity(templates.len());
    for template in &templates {
        if let Some(features) = source.features(template.id)? {
            loaded.push((template, features));
        }
    }
    let candidates: Vec<TemplateCandidate<'_>> = loaded
        .iter()
        .map(|(template, features)| TemplateCandidate {
            template,
            features: features.as_ref(),
        })
        .collect();

    let matcher = TemplateMatcher::new(config.matcher.clone());
    let strategy = if rectified {
        MatchStrategy::LabelDetectionRectified
    } else {
        MatchStrategy::coarse(&config.matcher, frame_size.0, frame_size.1)
    };
    let mut outcome = matcher.match_best(&frame, &candidates, &strategy);

    if outcome.success
        && let Some(template) = outcome.template.as_ref()
    {
        let regions: Vec<_> = template.sorted_regions().into_iter().cloned().collect();
        let projector = RegionProjector::new(config.projector.clone());
        outcome.transformed_regions = projector.project(&regions, outcome.transform.as_ref(), frame_size);
    }

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
