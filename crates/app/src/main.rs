use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use audio_haptics_core::{
    AnalysisObserver, AppConfig, BeatTracking, FeatureKind, FeatureMatrix, OnsetDetection,
    PipelineOrchestrator, Stream,
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> audio_haptics_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::default(),
    };

    let input = match cli.input {
        Some(input) => input,
        None => prompt_for_input()?,
    };

    let mut pipeline = PipelineOrchestrator::new(&config)?;
    if let Some(dir) = cli.dump_features {
        fs::create_dir_all(&dir)?;
        pipeline = pipeline.with_observer(Arc::new(FeatureDump { dir }));
    }

    let output = cli.output.unwrap_or_else(|| pipeline.output_path(&input));
    tracing::info!(?input, ?output, "converting audio to haptic pattern");

    let result = pipeline.run_to(&input, &output)?;
    tracing::info!(
        ?output,
        events = result.document.len(),
        tempo = result.tempo_bpm,
        "done"
    );
    Ok(())
}

fn prompt_for_input() -> audio_haptics_core::Result<PathBuf> {
    print!("Enter the path to the audio file: ");
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err("no input file given".into());
    }
    Ok(PathBuf::from(trimmed))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Writes every intermediate result as a JSON file into `dir`.
struct FeatureDump {
    dir: PathBuf,
}

impl FeatureDump {
    fn write(&self, name: &str, value: &impl serde::Serialize) {
        let path = self.dir.join(format!("{name}.json"));
        if let Err(err) = write_json(&path, value) {
            tracing::warn!(?path, %err, "could not dump analysis data");
        }
    }
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> audio_haptics_core::Result<()> {
    let file = io::BufWriter::new(fs::File::create(path)?);
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

impl AnalysisObserver for FeatureDump {
    fn on_features(&self, stream: Stream, kind: FeatureKind, matrix: &FeatureMatrix) {
        self.write(&format!("{stream}_{kind}"), matrix);
    }

    fn on_onsets(&self, onsets: &OnsetDetection) {
        self.write("onsets", onsets);
    }

    fn on_beats(&self, beats: &BeatTracking) {
        self.write(
            "beats",
            &serde_json::json!({
                "tempo_bpm": beats.tempo_bpm,
                "times": beats.beats.times(),
            }),
        );
    }

    fn on_synced(&self, stream: Stream, kind: FeatureKind, matrix: &FeatureMatrix) {
        self.write(&format!("{stream}_{kind}_synced"), matrix);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Convert audio files into haptic patterns", long_about = None)]
struct Cli {
    /// Audio file to convert. Prompted for on stdin when omitted.
    input: Option<PathBuf>,
    /// Where to write the pattern. Defaults to the input path with its
    /// extension replaced.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// JSON configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory that receives every intermediate feature matrix as JSON.
    #[arg(long)]
    dump_features: Option<PathBuf>,
}
