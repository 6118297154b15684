mod recorder;
mod settings;
mod workers;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use narrator_core::audio::device::list_output_devices;
use narrator_core::{
    AudioEngine, AudioSink, BackendHandle, ChatCompletionBackend, ChatCompletionConfig,
    Commentator, LiveModelBackend, LiveModelConfig, LoopSignal, StubNarrator, WebSocketTransport,
};
use recorder::WavTap;
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use workers::{spawn_workers, WorkerConfig};

#[derive(Debug, Default)]
struct Args {
    settings_path: Option<PathBuf>,
    headless: bool,
    record: Option<PathBuf>,
    workers: Option<usize>,
    list_devices: bool,
    save_settings: bool,
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Args, String> {
    let mut args = Args::default();
    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--settings" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --settings".into());
                };
                args.settings_path = Some(PathBuf::from(v));
            }
            "--record" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --record".into());
                };
                args.record = Some(PathBuf::from(v));
            }
            "--workers" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --workers".into());
                };
                let n = v
                    .parse::<usize>()
                    .map_err(|_| "invalid value for --workers".to_string())?;
                args.workers = Some(n.clamp(1, 32));
            }
            "--headless" => args.headless = true,
            "--list-devices" => args.list_devices = true,
            "--save-settings" => args.save_settings = true,
            "--help" | "-h" => {
                println!(
                    "Usage: narrator [--settings <file.json>] [--headless] [--record <out.wav>] \\
  [--workers <n>] [--list-devices] [--save-settings]"
                );
                std::process::exit(0);
            }
            other => {
                return Err(format!("unknown argument: {other}"));
            }
        }
    }
    Ok(args)
}

/// Primary is the live model when a Gemini key is configured, otherwise the
/// local stub; the chat-completion backend joins as fallback when an OpenAI
/// key is configured.
fn build_backends(settings: &AppSettings) -> (BackendHandle, Option<BackendHandle>) {
    let primary = match &settings.gemini_api_key {
        Some(key) => BackendHandle::new(LiveModelBackend::new(
            LiveModelConfig {
                model: settings.live_model.clone(),
                voice: settings.live_voice.clone(),
                ..LiveModelConfig::new(key.clone())
            },
            WebSocketTransport::connect,
        )),
        None => BackendHandle::new(StubNarrator::new(settings.sample_rate)),
    };
    let fallback = settings.openai_api_key.as_ref().map(|key| {
        BackendHandle::new(ChatCompletionBackend::new(ChatCompletionConfig {
            base_url: settings.openai_base_url.clone(),
            model: settings.fallback_model.clone(),
            ..ChatCompletionConfig::new(key.clone())
        }))
    });
    if fallback.is_none() {
        warn!("no API key configured, running without a fallback narrator");
    }
    (primary, fallback)
}

fn log_signal(signal: &LoopSignal) {
    match signal {
        LoopSignal::Heartbeat { seq, state } => {
            info!(seq, state = ?state, "waiting for agent activity");
        }
        LoopSignal::Commentary(c) => {
            info!(
                event_number = c.event_number,
                style = c.style.as_str(),
                source = ?c.source,
                backend = c.backend.as_str(),
                audio_chunks = c.audio_chunks,
                "commentary: {}",
                c.text
            );
        }
        LoopSignal::Terminated {
            reason,
            events_processed,
        } => {
            info!(reason = ?reason, events_processed, "narration ended");
        }
    }
}

/// File settings, then CLI overrides (saved when `--save-settings` is
/// given), then environment overrides.
fn resolve_settings(args: &Args, settings_path: &Path) -> anyhow::Result<AppSettings> {
    let mut settings = load_settings(settings_path);
    if args.headless {
        settings.headless = true;
    }
    if let Some(n) = args.workers {
        settings.workers = n;
    }
    // Env-provided values are never persisted.
    if args.save_settings {
        save_settings(settings_path, &settings)
            .with_context(|| format!("failed to save settings to {}", settings_path.display()))?;
        info!(settings_path = ?settings_path, "settings saved");
    }
    settings.apply_env_overrides();
    Ok(settings)
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.list_devices {
        for device in list_output_devices() {
            println!(
                "{}{}{}",
                device.name,
                if device.is_default { "  (default)" } else { "" },
                if device.is_virtual { "  (virtual)" } else { "" },
            );
        }
        return Ok(());
    }

    let settings_path = args.settings_path.clone().unwrap_or_else(default_settings_path);
    let settings = resolve_settings(&args, &settings_path)?;
    info!(
        settings_path = ?settings_path,
        headless = settings.headless,
        output_device = ?settings.output_device,
        sample_rate = settings.sample_rate,
        workers = settings.workers,
        "runtime settings loaded"
    );

    let engine = Arc::new(
        AudioEngine::new(settings.audio_engine_config()).context("invalid audio settings")?,
    );
    let tap = match &args.record {
        Some(path) => Some(Arc::new(WavTap::create(
            path,
            settings.sample_rate,
            Arc::clone(&engine) as Arc<dyn AudioSink>,
        )?)),
        None => None,
    };

    let (primary, fallback) = build_backends(&settings);
    let mut commentator = Commentator::new(settings.commentator_config(), primary, fallback)
        .context("invalid commentator settings")?
        .with_audio_engine(Arc::clone(&engine));
    if let Some(tap) = &tap {
        commentator = commentator.with_audio_sink(Arc::clone(tap) as Arc<dyn AudioSink>);
    }

    let mut signals = commentator.subscribe_signals();
    let signal_logger = tokio::spawn(async move {
        loop {
            match signals.recv().await {
                Ok(signal) => {
                    log_signal(&signal);
                    if matches!(signal, LoopSignal::Terminated { .. }) {
                        break;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "signal logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    commentator.start().context("failed to start commentator")?;
    if let Some(opened) = engine.opened_output() {
        info!(
            device = opened.device.as_str(),
            sample_rate = opened.sample_rate,
            channels = opened.channels,
            "audio output opened"
        );
    }

    let running = Arc::new(AtomicBool::new(true));
    let worker_config = WorkerConfig {
        workers: settings.workers,
        ..WorkerConfig::default()
    };
    let worker_handles = spawn_workers(&worker_config, commentator.event_sink(), Arc::clone(&running));

    let join = commentator.join();
    tokio::pin!(join);
    let finished = tokio::select! {
        reason = &mut join => Some(reason),
        _ = tokio::signal::ctrl_c() => None,
    };
    let reason = match finished {
        Some(reason) => reason,
        None => {
            info!("interrupt received, shutting down");
            commentator.stop();
            join.await
        }
    };
    commentator.stop();
    running.store(false, Ordering::Relaxed);

    let mut calls = 0;
    for handle in worker_handles {
        match handle.await {
            Ok(n) => calls += n,
            Err(e) => warn!(error = %e, "worker task failed"),
        }
    }
    let _ = signal_logger.await;

    if let Some(tap) = &tap {
        tap.finalize()?;
    }

    let narration = commentator.diagnostics();
    let playback = engine.diagnostics();
    info!(
        reason = ?reason,
        tool_calls = calls,
        events = narration.events,
        commentaries = narration.commentaries,
        fallback_activations = narration.fallback_activations,
        total_failures = narration.total_failures,
        frames_rendered = playback.frames_rendered,
        padded_frames = playback.padded,
        underruns = playback.underruns,
        overflow_evictions = playback.overflow_evictions,
        "narrator finished"
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("narrator=info,narrator_core=info")),
        )
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    info!("Narrator starting");
    if let Err(e) = run(args).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
