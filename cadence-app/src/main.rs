//! Cadence - command-line player and analysis tools

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_audio::{
    analyze, find_trailing_silence, EngineConfig, EngineEvent, PlaybackEngine, PlaybackState,
};

#[derive(Parser, Debug)]
#[command(name = "cadence", about = "Audio playback engine with live DSP and analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play files in order, gapless or crossfaded
    Play {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Pitch shift in semitones (-12 to 12)
        #[arg(long, allow_hyphen_values = true)]
        pitch: Option<f32>,

        /// Playback speed (0.5 - 2.0)
        #[arg(long)]
        speed: Option<f32>,

        /// Crossfade length in milliseconds (enables crossfading)
        #[arg(long)]
        crossfade: Option<u64>,

        /// Disable gapless switching between tracks
        #[arg(long)]
        no_gapless: bool,

        /// EQ band gain as BAND=DB, bands 0-4 (60, 230, 910, 3600, 14000 Hz)
        #[arg(long, value_parser = parse_eq_band, allow_hyphen_values = true)]
        eq: Vec<(usize, f32)>,

        /// Reverb wet/dry mix (0.0 - 1.0, enables reverb)
        #[arg(long)]
        reverb: Option<f32>,

        /// Print live spectral pulse (bass/mid/treble, BPM)
        #[arg(long)]
        pulse: bool,

        /// Keep these settings as the defaults for later runs
        #[arg(long)]
        save: bool,
    },
    /// Print an EBU R128 style loudness report
    Loudness { file: PathBuf },
    /// Locate the trailing silence of a file
    Silence {
        file: PathBuf,

        /// Seconds scanned at the end of the file
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,

        /// RMS level in dBFS below which audio counts as silent
        #[arg(long, default_value_t = -50.0, allow_hyphen_values = true)]
        threshold_db: f64,
    },
}

fn parse_eq_band(value: &str) -> Result<(usize, f32), String> {
    let (band, gain) = value
        .split_once('=')
        .ok_or_else(|| format!("expected BAND=DB, got '{}'", value))?;
    let band = band.trim().parse::<usize>().map_err(|e| e.to_string())?;
    let gain = gain.trim().parse::<f32>().map_err(|e| e.to_string())?;
    Ok((band, gain))
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_audio=info,cadence_app=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play {
            files,
            pitch,
            speed,
            crossfade,
            no_gapless,
            eq,
            reverb,
            pulse,
            save,
        } => {
            let mut config = EngineConfig::load();
            if let Some(semitones) = pitch {
                config.pitch_enabled = true;
                config.set_pitch_semitones(semitones);
            }
            if let Some(speed) = speed {
                config.set_speed(speed);
            }
            if let Some(ms) = crossfade {
                config.crossfade_enabled = true;
                config.set_crossfade_ms(ms);
            }
            if no_gapless {
                config.gapless_enabled = false;
            }
            if !eq.is_empty() {
                config.eq_enabled = true;
                for (band, gain) in eq {
                    config.set_eq_band_gain(band, gain);
                }
            }
            if let Some(mix) = reverb {
                config.reverb_enabled = true;
                config.set_reverb_mix(mix);
            }
            config.pulse_enabled = pulse;
            if save {
                match config.save() {
                    Ok(()) => info!("Saved settings to {}", EngineConfig::config_path().display()),
                    Err(e) => warn!("Could not save settings: {}", e),
                }
            }
            play(files, config)
        }
        Commands::Loudness { file } => {
            let report = analyze(&file).with_context(|| format!("analyzing {}", file.display()))?;
            println!("File:            {}", file.display());
            println!("Duration:        {:.1} s", report.duration_ms as f64 / 1000.0);
            println!("Integrated:      {:.1} LUFS", report.integrated_lufs);
            println!("Loudness range:  {:.1} LU", report.loudness_range_lu);
            println!("Short-term max:  {:.1} LUFS", report.short_term_max_lufs);
            println!(
                "True peak:       {:.4} ({:.1} dBFS)",
                report.true_peak, report.true_peak_dbfs
            );
            Ok(())
        }
        Commands::Silence {
            file,
            seconds,
            threshold_db,
        } => {
            match find_trailing_silence(&file, seconds, threshold_db)
                .with_context(|| format!("scanning {}", file.display()))?
            {
                Some(info) => println!("Trailing silence from {:.2} s", info.onset_ms as f64 / 1000.0),
                None => println!("No trailing silence"),
            }
            Ok(())
        }
    }
}

fn play(files: Vec<PathBuf>, config: EngineConfig) -> Result<()> {
    let engine = PlaybackEngine::new(config);
    let events = engine.events();

    let mut queue = files.into_iter();
    let Some(first) = queue.next() else {
        bail!("no files to play");
    };

    let prepared = engine.prepare(&first);
    if !prepared.success {
        bail!("could not open {}", first.display());
    }
    info!("Playing {} ({} ms)", first.display(), prepared.duration_ms);

    let mut upcoming = queue.next();
    if let Some(next) = upcoming.as_ref() {
        if !engine.prepare_next_track(next) {
            warn!("Could not pre-open {}", next.display());
        }
    }
    engine.play()?;

    loop {
        let Ok(event) = events.recv_timeout(Duration::from_secs(1)) else {
            if matches!(engine.state(), PlaybackState::Stopped | PlaybackState::Error) {
                break;
            }
            continue;
        };

        match event {
            EngineEvent::TrackChanged { path, duration_ms, .. } => {
                info!("Playing {} ({} ms)", path.display(), duration_ms);
                upcoming = queue.next();
                if let Some(next) = upcoming.as_ref() {
                    if !engine.prepare_next_track(next) {
                        warn!("Could not pre-open {}", next.display());
                    }
                }
            }
            EngineEvent::Position {
                position_ms,
                duration_ms,
            } => {
                eprint!(
                    "\r{:>4}:{:02} / {:>4}:{:02}",
                    position_ms / 60_000,
                    position_ms / 1000 % 60,
                    duration_ms / 60_000,
                    duration_ms / 1000 % 60
                );
            }
            EngineEvent::Pulse(snapshot) => {
                eprint!(
                    "\r  bass {:.2} mid {:.2} treble {:.2} bpm {:>5.1} {}",
                    snapshot.bass,
                    snapshot.mid,
                    snapshot.treble,
                    snapshot.bpm,
                    if snapshot.on_beat { "*" } else { " " }
                );
            }
            EngineEvent::Completed => {
                eprintln!();
                info!("Playback completed");
                break;
            }
            EngineEvent::Error { message } => {
                eprintln!();
                bail!("playback failed: {}", message);
            }
            EngineEvent::StateChanged { .. } => {}
        }
    }

    Ok(())
}
