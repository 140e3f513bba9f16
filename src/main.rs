use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use url::Url;

use tars_speech::Config;
use tars_speech::config::file::config_file_path;
use tars_speech::voice::{
    AudioFormat, AudioRenderer, Backend, CpalOutputDevice, Dispatcher, RemoteStreamingBackend,
    SpeechQueue, SynthesisOutcome, http_client,
};

/// TARS speech - text-to-speech dispatch and playback
#[derive(Parser)]
#[command(name = "tars-speech", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Speak the given text
    Say {
        /// Text to speak
        #[arg(required = true)]
        text: Vec<String>,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Speak each line read from stdin, one after another
    Listen {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Test speaker output with a sine wave
    TestSpeaker,
    /// Push generation settings to the streaming server
    PushSettings {
        /// Server base URL (defaults to the configured one)
        #[arg(long)]
        endpoint: Option<Url>,
    },
    /// Print the config file location
    ConfigPath,
}

/// Per-invocation overrides on top of env and the config file
#[derive(Args)]
struct Overrides {
    /// Backend (cloud, local, xttsv2, alltalk, piper)
    #[arg(short, long)]
    backend: Option<Backend>,

    /// Voice or speaker identifier
    #[arg(long)]
    voice: Option<String>,

    /// TTS server base URL
    #[arg(long)]
    endpoint: Option<Url>,

    /// Output gain multiplier
    #[arg(long)]
    gain: Option<f32>,

    /// Peak-normalize each chunk before applying gain
    #[arg(long)]
    normalize: bool,
}

impl Overrides {
    fn apply(self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(voice) = self.voice {
            config.voice = Some(voice);
        }
        if let Some(endpoint) = self.endpoint {
            config.server_endpoint = Some(endpoint);
        }
        if let Some(gain) = self.gain {
            anyhow::ensure!(
                gain.is_finite() && gain >= 0.0,
                "gain must be a non-negative number, got {gain}"
            );
            config.playback.gain = gain;
        }
        if self.normalize {
            config.playback.normalize = true;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,tars_speech=info",
        1 => "info,tars_speech=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Say { text, overrides } => say(&text.join(" "), overrides).await,
        Command::Listen { overrides } => listen(overrides).await,
        Command::TestSpeaker => test_speaker().await,
        Command::PushSettings { endpoint } => push_settings(endpoint).await,
        Command::ConfigPath => {
            let path = config_file_path().context("no home directory found")?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Load config with overrides applied and warm up the selected backend
async fn prepare(overrides: Overrides) -> anyhow::Result<(Config, Dispatcher)> {
    let mut config = Config::load().context("failed to load configuration")?;
    overrides.apply(&mut config)?;
    tracing::debug!(?config, "loaded configuration");

    let dispatcher = Dispatcher::from_config(&config)?;

    if config.backend == Backend::RemoteStreaming
        && let Some(endpoint) = &config.server_endpoint
    {
        RemoteStreamingBackend::new(http_client()?, config.stream_format)
            .update_settings(endpoint, &config.streaming_settings)
            .await;
    }

    Ok((config, dispatcher))
}

/// Speak a single utterance
async fn say(text: &str, overrides: Overrides) -> anyhow::Result<()> {
    let (config, dispatcher) = prepare(overrides).await?;

    let outcome = dispatcher.synthesize(&config.request(text)).await?;
    match outcome {
        SynthesisOutcome::Rendered(stats) => tracing::info!(
            backend = %config.backend,
            chunks = stats.chunks,
            samples = stats.samples,
            "speech played"
        ),
        SynthesisOutcome::PlayedByBackend => {
            tracing::info!(backend = %config.backend, "speech played by backend");
        }
    }

    Ok(())
}

/// Queue stdin lines for speech until EOF or Ctrl-C
async fn listen(overrides: Overrides) -> anyhow::Result<()> {
    let (config, dispatcher) = prepare(overrides).await?;
    let (queue, worker) = SpeechQueue::spawn(Arc::new(dispatcher));

    tracing::info!(backend = %config.backend, "reading lines from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                queue.enqueue(config.request(line)).await?;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, cancelling queued speech");
                queue.cancel();
                break;
            }
        }
    }

    drop(queue);
    worker.await?;
    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let config = Config::load()?;
    let device = config
        .output_device
        .clone()
        .map_or_else(CpalOutputDevice::new, CpalOutputDevice::named);
    let renderer = AudioRenderer::new(Arc::new(device));

    // 2 seconds of 440Hz at 24kHz
    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    let samples: Vec<i16> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            // 30% volume
            ((2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 * f32::from(i16::MAX)) as i16
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    renderer
        .play_samples(samples, AudioFormat::mono(sample_rate), &config.playback)
        .await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Push the configured streaming settings to the server
async fn push_settings(endpoint: Option<Url>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let endpoint = endpoint
        .or_else(|| config.server_endpoint.clone())
        .context("no streaming server configured (set TARS_TTS_URL or pass --endpoint)")?;

    RemoteStreamingBackend::new(http_client()?, config.stream_format)
        .update_settings(&endpoint, &config.streaming_settings)
        .await;

    println!("Sent settings to {endpoint}");
    Ok(())
}
