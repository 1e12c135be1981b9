use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use earshot::audio::{AudioSource, CpalOpener, samples_to_wav};
use earshot::detect::DetectionRules;
use earshot::health::{AudioStatus, HealthReporter};
use earshot::signal::rms;
use earshot::{Config, Daemon};

/// Earshot - sound awareness for deaf and hard-of-hearing users
#[derive(Parser)]
#[command(name = "earshot", version, about)]
struct Cli {
    /// Configuration file (defaults to the standard location)
    #[arg(short, long, env = "EARSHOT_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Stop after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the configuration and print the label table
    CheckConfig,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the captured audio as a WAV file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the pipeline on a WAV file instead of the microphone
    Simulate {
        /// Mono or multi-channel WAV at the configured sample rate
        wav: PathBuf,
        /// Feed samples at recording speed
        #[arg(long)]
        realtime: bool,
    },
    /// Send a synthetic alert for a label to every channel
    TestAlert {
        /// Label to alert for
        label: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,earshot=info",
        1 => "info,earshot=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::CheckConfig => {
                check_config(&config, cli.config.as_deref());
                Ok(())
            }
            Command::TestMic { duration, output } => test_mic(&config, duration, output.as_deref()).await,
            Command::Simulate { wav, realtime } => simulate(config, cli.config, &wav, realtime).await,
            Command::TestAlert { label } => test_alert(config, &label).await,
        };
    }

    tracing::info!(labels = config.labels.len(), "starting earshot");

    let daemon = Daemon::new(config, cli.config);
    let stats = daemon.run(cli.timeout.map(Duration::from_secs)).await?;

    tracing::info!(
        events = stats.events_created,
        alerts = stats.alerts_presented,
        dropped_frames = stats.frames_dropped,
        "earshot stopped"
    );
    Ok(())
}

/// Print the effective configuration
fn check_config(config: &Config, path: Option<&Path>) {
    let source = path
        .map(Path::to_path_buf)
        .or_else(earshot::config::file::config_file_path)
        .filter(|p| p.exists())
        .map_or_else(|| "built-in defaults".to_string(), |p| p.display().to_string());
    let rules = DetectionRules::from_config(config);

    println!("Configuration OK ({source})\n");
    println!(
        "{:<16} {:<20} {:<7} {:>5}  {:<13} {:<13} {:<8} keywords",
        "label", "name", "tier", "conf", "haptic", "visual", "color"
    );
    for (label, rule) in &config.labels {
        println!(
            "{label:<16} {:<20} {:<7} {:>5.2}  {:<13} {:<13} {:<8} {}",
            rule.display_name,
            rule.tier,
            rules.min_confidence(label),
            rule.haptic_pattern,
            rule.visual_pattern,
            rule.color.as_deref().unwrap_or("-"),
            rule.keywords.join(", ")
        );
    }

    println!(
        "\nspeech: {} (tier {}, {})",
        on_off(config.speech.enabled),
        config.speech.tier,
        config.speech.visual_pattern
    );
    println!(
        "channels: haptic {} ({}), visual {}, smart-home {}",
        on_off(config.channels.haptic.enabled),
        config.channels.haptic.address,
        on_off(config.channels.visual_enabled),
        config
            .channels
            .smart_home
            .broker
            .as_deref()
            .filter(|_| config.channels.smart_home.enabled)
            .unwrap_or("off")
    );
}

const fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

/// Test microphone input
async fn test_mic(config: &Config, duration: u64, output: Option<&Path>) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Make some noise!\n");

    let (health, health_rx) = HealthReporter::channel();
    let source = AudioSource::spawn(Box::new(CpalOpener::new(&config.audio)), &config.audio, health)?;
    let queue = source.queue();

    println!("Sample rate: {} Hz", config.audio.sample_rate);
    println!("---");

    let mut recorded: Vec<i16> = Vec::new();
    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples: Vec<i16> = queue
            .drain()
            .into_iter()
            .flat_map(|frame| frame.samples.into_vec())
            .collect();
        let scaled: Vec<f32> = samples.iter().map(|&s| f32::from(s) / 32768.0).collect();
        let energy = rms(&scaled);
        let peak = scaled.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);

        if let AudioStatus::NoAudio { attempts, reason } = &health_rx.borrow().audio {
            println!("      no audio ({attempts} attempts): {reason}");
        }

        if output.is_some() {
            recorded.extend_from_slice(&samples);
        }
    }

    let dropped = source.frames_dropped();
    tokio::task::spawn_blocking(move || source.join()).await?;

    println!("\n---");
    println!("Frames dropped: {dropped}");

    if let Some(path) = output {
        let wav = samples_to_wav(&recorded, config.audio.sample_rate)?;
        std::fs::write(path, wav)?;
        println!("Saved {} samples to {}", recorded.len(), path.display());
    }

    println!("If RMS stayed near 0, check that the right input device is selected");
    Ok(())
}

/// Run the pipeline on a recording
async fn simulate(config: Config, path: Option<PathBuf>, wav: &Path, realtime: bool) -> anyhow::Result<()> {
    let stats = Daemon::new(config, path).simulate(wav, realtime).await?;

    println!("frames processed: {}", stats.frames_processed);
    println!("frames gated:     {}", stats.frames_gated);
    println!("events confirmed: {}", stats.events_created);
    println!("events resolved:  {}", stats.events_resolved);
    println!("alerts presented: {}", stats.alerts_presented);
    println!("alerts dropped:   {}", stats.alerts_dropped);
    Ok(())
}

/// Send a test alert
async fn test_alert(config: Config, label: &str) -> anyhow::Result<()> {
    let records = Daemon::new(config, None).test_alert(label).await;

    if records.is_empty() {
        anyhow::bail!("no channel accepted the alert for `{label}`");
    }
    for record in records {
        println!("{:<11} {:?}", record.channel.as_str(), record.outcome);
    }
    Ok(())
}
