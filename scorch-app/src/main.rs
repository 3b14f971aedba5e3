//! Scorch command-line host.
//!
//! # Commands
//!
//! - `scorch roast <text>` - Generate a roast from text, then speak it
//! - `scorch battle <taunt>` - Fire a spoken roast-battle comeback
//! - `scorch say <text>` - Stream speech for a prompt without the roast step
//! - `scorch stats` - Show local usage counters
//! - `scorch voices` - List available voices
//! - `scorch config` - Show or update saved settings
//!
//! While audio is playing, transport commands are read from stdin:
//! `p` toggles play/pause, `m` toggles mute, `q` resets and quits.
//!
//! # Runtime note
//!
//! The playback engine owns a cpal output stream, which is bound to its
//! creation thread on Windows/macOS. Everything therefore runs on a
//! current-thread Tokio runtime: the network read loop suspends per
//! chunk, and engine mutation stays on this one thread.

mod settings;
mod stats;

use std::io::{BufRead, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, Receiver};
use tracing::{info, warn};

use scorch_core::{
    PlaybackEngine, PlaybackState, RoastClient, RoastIntensity, RoastResponse, TtsRequest,
    TtsStream, Voice, SAMPLE_RATE,
};
use settings::{default_settings_path, load_settings, AppSettings};
use stats::{UsageKind, UsageStore};

#[derive(Parser)]
#[command(name = "scorch", version, about = "AI roasts, spoken aloud")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a roast from text or a selfie, then speak it
    Roast {
        /// What to get roasted about
        #[arg(required_unless_present = "selfie")]
        text: Option<String>,
        /// Roast a selfie (JPEG) instead of text
        #[arg(long, value_name = "FILE", conflicts_with = "text")]
        selfie: Option<PathBuf>,
        #[arg(long)]
        voice: Option<Voice>,
        #[arg(long)]
        intensity: Option<RoastIntensity>,
        #[arg(long)]
        persona: Option<String>,
        /// Start muted
        #[arg(long)]
        mute: bool,
        /// Write the spoken audio to a WAV file
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
        /// Decode the stream without opening an audio device
        #[arg(long)]
        no_play: bool,
    },
    /// Fire a spoken roast-battle comeback at a taunt
    Battle {
        taunt: String,
        #[arg(long)]
        voice: Option<Voice>,
        #[arg(long)]
        mute: bool,
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
        #[arg(long)]
        no_play: bool,
    },
    /// Stream speech for a prompt without the roast step
    Say {
        text: String,
        #[arg(long)]
        voice: Option<Voice>,
        #[arg(long)]
        mute: bool,
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,
        #[arg(long)]
        no_play: bool,
    },
    /// Show local usage counters
    Stats {
        #[arg(long, default_value_t = 7)]
        days: usize,
    },
    /// List available voices
    Voices,
    /// Show or update saved settings
    Config {
        #[arg(long)]
        voice: Option<Voice>,
        #[arg(long)]
        intensity: Option<RoastIntensity>,
        #[arg(long)]
        persona: Option<String>,
        #[arg(long)]
        text_api_url: Option<String>,
        #[arg(long)]
        tts_api_url: Option<String>,
        /// Backend access code; pass an empty string to clear
        #[arg(long)]
        access_code: Option<String>,
        /// Preferred output device name; pass an empty string to clear
        #[arg(long)]
        output_device: Option<String>,
    },
}

fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scorch=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(&default_settings_path());
    let http = reqwest::Client::new();
    let store = open_usage_store();

    match cli.command {
        Command::Roast {
            text,
            selfie,
            voice,
            intensity,
            persona,
            mute,
            save,
            no_play,
        } => {
            let roast_client = RoastClient::new(http.clone(), &settings.text_api_url)
                .with_access_code(settings.access_code.clone());
            let intensity = intensity.unwrap_or_else(|| settings.intensity());
            let persona = persona.as_deref().unwrap_or(&settings.persona);

            let response = if let Some(path) = selfie {
                let image = std::fs::read(&path)
                    .with_context(|| format!("reading selfie {}", path.display()))?;
                roast_client
                    .generate_image_roast(&BASE64.encode(&image), intensity, persona)
                    .await?
            } else {
                let text = text.context("text or --selfie required")?;
                roast_client
                    .generate_text_roast(&text, intensity, persona)
                    .await?
            };
            record(&store, UsageKind::TextRoast);
            print_roast(&response);

            let spoken = format!(
                "{} And for the final burn: {}",
                response.roast, response.final_burn
            );
            speak(&http, &settings, &spoken, voice, mute, save, no_play).await?;
            record(&store, UsageKind::AudioRoast);
        }

        Command::Battle {
            taunt,
            voice,
            mute,
            save,
            no_play,
        } => {
            let prompt = format!(
                "You're in a roast battle. Respond to this with the most savage comeback: {taunt}"
            );
            speak(&http, &settings, &prompt, voice, mute, save, no_play).await?;
            record(&store, UsageKind::AudioRoast);
        }

        Command::Say {
            text,
            voice,
            mute,
            save,
            no_play,
        } => {
            speak(&http, &settings, &text, voice, mute, save, no_play).await?;
            record(&store, UsageKind::AudioRoast);
        }

        Command::Stats { days } => {
            if let Some(store) = store {
                let totals = store.totals()?;
                println!("text roasts:  {}", totals.text_roasts);
                println!("audio roasts: {}", totals.audio_roasts);
                let buckets = store.recent_days(days)?;
                if !buckets.is_empty() {
                    println!();
                    for bucket in buckets {
                        println!(
                            "{}  text {:>4}  audio {:>4}",
                            bucket.day, bucket.text_roasts, bucket.audio_roasts
                        );
                    }
                }
            }
        }

        Command::Voices => {
            for voice in Voice::ALL {
                let marker = if voice == Voice::default() { "*" } else { " " };
                println!("{marker} {:<8} {}", voice.id(), voice.label());
            }
        }

        Command::Config {
            voice,
            intensity,
            persona,
            text_api_url,
            tts_api_url,
            access_code,
            output_device,
        } => {
            let mut settings = settings;
            if let Some(voice) = voice {
                settings.voice = voice.id().into();
            }
            if let Some(intensity) = intensity {
                settings.intensity = intensity.id().into();
            }
            if let Some(persona) = persona {
                settings.persona = persona;
            }
            if let Some(url) = text_api_url {
                settings.text_api_url = url;
            }
            if let Some(url) = tts_api_url {
                settings.tts_api_url = url;
            }
            if let Some(code) = access_code {
                settings.access_code = Some(code);
            }
            if let Some(device) = output_device {
                settings.preferred_output_device = Some(device);
            }
            settings.normalize();
            let path = default_settings_path();
            settings::save_settings(&path, &settings)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

/// Stream one utterance: decode, print the transcript as it arrives, and
/// play it gaplessly unless `no_play`.
async fn speak(
    http: &reqwest::Client,
    settings: &AppSettings,
    prompt: &str,
    voice: Option<Voice>,
    mute: bool,
    save: Option<PathBuf>,
    no_play: bool,
) -> Result<()> {
    let request =
        TtsRequest::new(prompt).with_voice(voice.unwrap_or_else(|| settings.voice()));

    if no_play {
        return speak_silently(http, settings, &request, save).await;
    }

    let mut stream = TtsStream::open(http, &settings.tts_api_url, &request).await?;

    let mut engine =
        PlaybackEngine::open_with_preference(settings.preferred_output_device.as_deref())?;
    engine.set_muted(mute);
    // Start before the first chunk arrives so audio is audible with
    // streaming latency, not utterance latency.
    engine.start_playback();

    let mut status_rx = engine.subscribe_status();
    let commands = spawn_transport_thread();

    let mut poll = tokio::time::interval(Duration::from_millis(50));
    let mut transcript_len = 0usize;
    let mut saved_samples: Vec<i16> = Vec::new();
    let mut quit = false;

    loop {
        tokio::select! {
            frames = stream.next_frames() => {
                let Some(frames) = frames? else { break };
                for frame in frames {
                    if let Some(delta) = frame.text_delta {
                        print!("{delta}");
                        let _ = std::io::stdout().flush();
                        transcript_len += delta.len();
                    }
                    if let Some(chunk) = frame.audio {
                        if save.is_some() {
                            saved_samples.extend_from_slice(chunk.samples());
                        }
                        engine.add_chunk(chunk);
                    }
                }
            }
            _ = poll.tick() => {
                if handle_transport(&commands, &mut engine) {
                    quit = true;
                    break;
                }
                report_transitions(&mut status_rx);
            }
        }
    }
    if transcript_len > 0 {
        println!();
    }

    // The stream is done but scheduled audio may still be rendering;
    // transport stays live until the session drains.
    while !quit && !(engine.is_drained() && engine.pending_chunks() == 0) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if handle_transport(&commands, &mut engine) {
            quit = true;
        }
        report_transitions(&mut status_rx);
    }
    // Teardown releases the device; reset is the cancellation point for
    // anything still buffered.
    engine.reset();

    if let Some(path) = save {
        write_wav(&path, &saved_samples)?;
        println!("saved audio to {}", path.display());
    }

    Ok(())
}

/// Decode-only path: no audio device, callback-driven stream consumption.
async fn speak_silently(
    http: &reqwest::Client,
    settings: &AppSettings,
    request: &TtsRequest,
    save: Option<PathBuf>,
) -> Result<()> {
    let mut printed = 0usize;
    let mut saved_samples: Vec<i16> = Vec::new();

    let transcript = scorch_core::stream_speech(
        http,
        &settings.tts_api_url,
        request,
        |cumulative| {
            print!("{}", &cumulative[printed..]);
            let _ = std::io::stdout().flush();
            printed = cumulative.len();
        },
        |chunk| {
            if save.is_some() {
                saved_samples.extend_from_slice(chunk.samples());
            }
        },
    )
    .await?;

    if !transcript.is_empty() {
        println!();
    }
    if let Some(path) = save {
        write_wav(&path, &saved_samples)?;
        println!("saved audio to {}", path.display());
    }
    Ok(())
}

enum TransportCommand {
    Toggle,
    Mute,
    Quit,
}

/// Read transport commands from stdin on a plain thread; the event loop
/// polls the channel between network reads.
fn spawn_transport_thread() -> Receiver<TransportCommand> {
    let (tx, rx) = unbounded();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let command = match line.trim() {
                "" => continue,
                "p" => TransportCommand::Toggle,
                "m" => TransportCommand::Mute,
                "q" => TransportCommand::Quit,
                other => {
                    eprintln!("unknown command '{other}' (p=play/pause, m=mute, q=quit)");
                    continue;
                }
            };
            if tx.send(command).is_err() {
                break;
            }
        }
    });
    rx
}

/// Apply any pending transport commands. Returns true on quit.
fn handle_transport(commands: &Receiver<TransportCommand>, engine: &mut PlaybackEngine) -> bool {
    while let Ok(command) = commands.try_recv() {
        match command {
            TransportCommand::Toggle => engine.toggle_playback(),
            TransportCommand::Mute => {
                let muted = !engine.is_muted();
                engine.set_muted(muted);
                eprintln!("[{}]", if muted { "muted" } else { "unmuted" });
            }
            TransportCommand::Quit => {
                engine.reset();
                return true;
            }
        }
    }
    false
}

fn report_transitions(
    status_rx: &mut tokio::sync::broadcast::Receiver<scorch_core::PlaybackStatusEvent>,
) {
    while let Ok(event) = status_rx.try_recv() {
        if event.state != PlaybackState::Idle {
            eprintln!("[{}]", if event.playing { "playing" } else { "paused" });
        }
    }
}

fn print_roast(response: &RoastResponse) {
    println!("{}", response.roast);
    println!();
    println!("FINAL BURN: {}", response.final_burn);
    println!();
    for (category, score) in &response.ratings {
        let bar = "#".repeat((*score as usize).min(40) / 2);
        println!("{category:<16} {score:>3}% {bar}");
    }
    println!();
}

fn write_wav(path: &Path, samples: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("creating {}", path.display()))?;
    for &sample in samples {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    info!(path = %path.display(), samples = samples.len(), "utterance saved");
    Ok(())
}

fn open_usage_store() -> Option<UsageStore> {
    match UsageStore::new(UsageStore::default_db_path()) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!("usage counters unavailable: {e}");
            None
        }
    }
}

fn record(store: &Option<UsageStore>, kind: UsageKind) {
    if let Some(store) = store {
        if let Err(e) = store.record(kind) {
            warn!("failed to record usage: {e}");
        }
    }
}
