// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Command implementations for the relay binary

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::args::{AskArgs, MediaArgs, ModelsArgs, ModelsCommands, OutputFormat};
use crate::config::{ConfigSnapshot, CredentialStore, Settings};
use crate::error::{RelayError, Result, ServiceFailure};
use crate::fallback::{ModalityRequest, Payload};
use crate::llm::factory::BackendFactory;
use crate::models::{DownloadPhase, ModelLifecycleManager};
use crate::progress::{ProgressEvent, ProgressHub};
use crate::registry::{self, Modality};
use crate::request::{Attachment, Request};
use crate::router::{Reply, RouterDispatcher};

/// Load settings from `path`, or the default location
pub fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
}

/// Apply `--provider` / `--model` to the defaults of a settings copy
pub fn apply_overrides(settings: &mut Settings, provider: Option<&str>, model: Option<&str>) -> Result<()> {
    if let Some(provider) = provider {
        let info = registry::find(provider)
            .ok_or_else(|| RelayError::Configuration(format!("Unknown provider: {}", provider)))?;
        if !info.supports(Modality::Chat) {
            return Err(RelayError::Configuration(format!(
                "{} does not provide chat completions",
                info.display_name
            )));
        }
        if provider != settings.defaults.provider {
            settings.defaults.provider = provider.to_string();
            settings.defaults.model = settings
                .provider(provider)
                .and_then(|p| p.default_model.clone())
                .or_else(|| registry::default_model(provider, Modality::Chat).map(str::to_string))
                .unwrap_or_else(|| settings.defaults.model.clone());
        }
    }
    if let Some(model) = model {
        settings.defaults.model = model.to_string();
    }
    Ok(())
}

/// Build a request from CLI input
pub fn build_request(prompt: &str, files: &[PathBuf], audio: bool) -> Result<Request> {
    let mut request = Request::new(prompt).with_audio_mode(audio);
    for file in files {
        request = request.with_attachment(Attachment::from_file(file)?);
    }
    Ok(request)
}

/// Part of `text` not yet printed, or `None` when the output was replaced
/// by a different service and must be printed again from the start
pub fn unprinted_suffix<'a>(printed: &str, text: &'a str) -> Option<&'a str> {
    text.strip_prefix(printed)
}

/// File extension for a payload mime type
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "audio/mpeg" => "mp3",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "video/mp4" => "mp4",
        _ => "bin",
    }
}

fn lifecycle(settings: &Settings, hub: &ProgressHub) -> Arc<ModelLifecycleManager> {
    Arc::new(ModelLifecycleManager::from_settings(settings, Arc::new(hub.clone())))
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:20} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Render model download progress until the hub closes
fn spawn_progress_renderer(hub: &ProgressHub) -> JoinHandle<()> {
    let mut events = hub.subscribe();
    tokio::spawn(async move {
        let mut bars: HashMap<String, ProgressBar> = HashMap::new();
        loop {
            let state = match events.recv().await {
                Ok(ProgressEvent::Model(state)) => state,
                Ok(ProgressEvent::Generation { .. }) => continue,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            match state.phase {
                DownloadPhase::Starting | DownloadPhase::Downloading => {
                    let bar = bars.entry(state.model_id.clone()).or_insert_with(|| {
                        let bar = ProgressBar::new(0);
                        bar.set_style(progress_style());
                        bar.set_message(state.model_id.clone());
                        bar
                    });
                    if let Some(total) = state.bytes_total {
                        bar.set_length(total);
                    }
                    bar.set_position(state.bytes_downloaded);
                }
                DownloadPhase::Verifying => {
                    if let Some(bar) = bars.get(&state.model_id) {
                        bar.set_message(format!("{} (verifying)", state.model_id));
                    }
                }
                DownloadPhase::Completed => {
                    if let Some(bar) = bars.remove(&state.model_id) {
                        bar.finish_with_message(format!("{} ready", state.model_id));
                    }
                }
                DownloadPhase::Error => {
                    if let Some(bar) = bars.remove(&state.model_id) {
                        bar.abandon_with_message(format!("{} failed", state.model_id));
                    }
                }
                DownloadPhase::Idle | DownloadPhase::Checking => {}
            }
        }
    })
}

/// Cancel the router's request on Ctrl-C
fn spawn_interrupt_handler(router: &Arc<RouterDispatcher>) -> JoinHandle<()> {
    let router = Arc::clone(router);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            router.cancel();
        }
    })
}

fn print_failures(failures: &[ServiceFailure]) {
    for failure in failures {
        eprintln!("  skipped {}: {}", failure.service_id, failure.reason);
    }
}

fn failures_json(failures: &[ServiceFailure]) -> serde_json::Value {
    serde_json::Value::Array(
        failures
            .iter()
            .map(|f| {
                serde_json::json!({
                    "service": f.service_id,
                    "reason": f.reason,
                    "transient": f.transient,
                })
            })
            .collect(),
    )
}

fn router(settings: &Settings, hub: &ProgressHub) -> Arc<RouterDispatcher> {
    let credentials: Arc<dyn CredentialStore> = Arc::new(settings.clone());
    Arc::new(RouterDispatcher::new(credentials, lifecycle(settings, hub)).with_sink(Arc::new(hub.clone())))
}

/// `relay ask`
pub async fn run_ask(args: AskArgs, mut settings: Settings, format: OutputFormat) -> Result<()> {
    apply_overrides(&mut settings, args.provider.as_deref(), args.model.as_deref())?;
    let request = build_request(&args.prompt, &args.file, args.audio)?;

    let hub = ProgressHub::new();
    let renderer = spawn_progress_renderer(&hub);
    let router = router(&settings, &hub);
    let interrupt = spawn_interrupt_handler(&router);
    let snapshot: ConfigSnapshot = Arc::new(settings);

    let printed = Arc::new(Mutex::new(String::new()));
    let stream = format == OutputFormat::Text;
    let sink = Arc::clone(&printed);
    let result = router
        .dispatch_streaming(snapshot, request, move |text| {
            if !stream {
                return;
            }
            let mut printed = match sink.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let mut stdout = io::stdout();
            match unprinted_suffix(&printed, text) {
                Some(suffix) => {
                    let _ = write!(stdout, "{}", suffix);
                }
                None => {
                    let _ = write!(stdout, "\n---\n{}", text);
                }
            }
            let _ = stdout.flush();
            *printed = text.to_string();
        })
        .await;
    interrupt.abort();
    renderer.abort();

    let outcome = result?;
    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "route": format!("{:?}", outcome.route),
                "agent": outcome.analysis.suggested_agent,
                "complexity": outcome.analysis.complexity,
                "confidence": outcome.analysis.confidence,
                "reply": outcome.reply.text(),
                "cancelled": outcome.reply == Reply::Cancelled,
                "service": outcome.service_id,
                "simulation": outcome.is_simulation,
                "failures": failures_json(&outcome.failures),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            match &outcome.reply {
                Reply::Text(_) => println!(),
                Reply::Empty => eprintln!("(no response)"),
                Reply::Cancelled => eprintln!("\n(cancelled)"),
            }
            if outcome.is_simulation {
                eprintln!("Note: no provider was available; this is an approximate result.");
                print_failures(&outcome.failures);
            }
        }
    }
    Ok(())
}

/// `relay speak|image|video`
pub async fn run_media(modality: Modality, args: MediaArgs, settings: Settings, format: OutputFormat) -> Result<()> {
    let hub = ProgressHub::new();
    let renderer = spawn_progress_renderer(&hub);
    let router = router(&settings, &hub);
    let interrupt = spawn_interrupt_handler(&router);

    let mut request = ModalityRequest::text(modality, args.prompt.clone());
    for (key, value) in args.options {
        request = request.with_option(key, value);
    }
    let result = router.dispatch_modality(Arc::new(settings), request).await;
    interrupt.abort();
    renderer.abort();
    let outcome = result?;

    let (location, text) = match &outcome.output.payload {
        Payload::Binary { mime_type, data } => {
            let path = args.output.clone().unwrap_or_else(|| {
                PathBuf::from(format!("relay-{}.{}", modality, extension_for(mime_type)))
            });
            std::fs::write(&path, data)?;
            (Some(path.display().to_string()), None)
        }
        Payload::Url { url, .. } => (Some(url.clone()), None),
        Payload::Text(text) => (None, Some(text.clone())),
        Payload::Empty => (None, None),
    };

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "modality": modality,
                "service": outcome.service_id,
                "mime_type": outcome.output.payload.mime_type(),
                "location": location,
                "text": text,
                "simulation": outcome.output.is_simulation,
                "metadata": outcome.output.metadata,
                "failures": failures_json(&outcome.failures),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if let Some(location) = location {
                println!("{}", location);
            }
            if let Some(text) = text {
                println!("{}", text);
            }
            eprintln!("via {}", outcome.service_id);
            if outcome.output.is_simulation {
                eprintln!("Note: no provider was available; this is a simulated result.");
                print_failures(&outcome.failures);
            }
        }
    }
    Ok(())
}

/// `relay models ...`
pub async fn run_models(
    args: ModelsArgs,
    mut settings: Settings,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let hub = ProgressHub::new();
    let renderer = spawn_progress_renderer(&hub);
    let manager = lifecycle(&settings, &hub);

    let result = match args.command {
        ModelsCommands::List => {
            let installed = manager.list_installed().await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&installed)?),
                OutputFormat::Text if installed.is_empty() => println!("No models installed."),
                OutputFormat::Text => {
                    for id in installed {
                        let marker = if settings.models.enabled.contains(&id) { "*" } else { " " };
                        println!("{} {}", marker, id);
                    }
                }
            }
            Ok(())
        }
        ModelsCommands::Pull { id } => manager.ensure_available(&id).await,
        ModelsCommands::Use { id } => {
            manager.switch_active(&id).await?;
            if settings.artifact(&id).is_none() {
                settings.defaults.provider = "ollama".to_string();
                settings.defaults.model = id.clone();
            }
            if !settings.models.enabled.contains(&id) {
                settings.models.enabled.push(id.clone());
            }
            match config_path {
                Some(path) => settings.save_to(path)?,
                None => settings.save()?,
            }
            println!("Active model: {}", id);
            Ok(())
        }
    };
    // Let the final state reach the renderer before stopping it.
    tokio::task::yield_now().await;
    renderer.abort();
    result
}

/// `relay providers`
pub fn run_providers(settings: &Settings, format: OutputFormat) -> Result<()> {
    let rows: Vec<serde_json::Value> = registry::all()
        .iter()
        .map(|info| {
            serde_json::json!({
                "id": info.id,
                "name": info.display_name,
                "hosting": format!("{:?}", info.hosting),
                "capabilities": info.capabilities.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
                "configured": BackendFactory::is_configured(info.id, settings),
                "credential_env": settings.credential_env_for(info.id),
            })
        })
        .collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Text => {
            for info in registry::all() {
                let configured = if BackendFactory::is_configured(info.id, settings) {
                    "ready"
                } else {
                    "no key"
                };
                let capabilities: Vec<&str> = info.capabilities.iter().map(|m| m.as_str()).collect();
                println!(
                    "{:<16} {:<26} {:<8} {}",
                    info.id,
                    info.display_name,
                    configured,
                    capabilities.join(", ")
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_provider_override_picks_provider_model() {
        let mut settings = Settings::default();
        apply_overrides(&mut settings, Some("anthropic"), None).unwrap();
        assert_eq!(settings.defaults.provider, "anthropic");
        assert_eq!(settings.defaults.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_apply_model_override_keeps_provider() {
        let mut settings = Settings::default();
        apply_overrides(&mut settings, None, Some("gpt-4o")).unwrap();
        assert_eq!(settings.defaults.provider, "openai");
        assert_eq!(settings.defaults.model, "gpt-4o");
    }

    #[test]
    fn test_apply_override_rejects_non_chat_provider() {
        let mut settings = Settings::default();
        let err = apply_overrides(&mut settings, Some("fal"), None).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
        assert!(apply_overrides(&mut settings, Some("nope"), None).is_err());
    }

    #[test]
    fn test_build_request_reads_attachments() {
        let mut file = tempfile::Builder::new().suffix(".txt").tempfile().unwrap();
        write!(file, "notes").unwrap();
        let request = build_request("summarize", &[file.path().to_path_buf()], true).unwrap();
        assert!(request.audio_mode_active);
        assert_eq!(request.attachments.len(), 1);
        assert_eq!(request.attachments[0].data, b"notes");
    }

    #[test]
    fn test_build_request_missing_file_is_io_error() {
        let err = build_request("x", &[PathBuf::from("/definitely/not/here.txt")], false).unwrap_err();
        assert!(matches!(err, RelayError::Io(_)));
    }

    #[test]
    fn test_unprinted_suffix() {
        assert_eq!(unprinted_suffix("", "Hello"), Some("Hello"));
        assert_eq!(unprinted_suffix("Hello", "Hello, world"), Some(", world"));
        assert_eq!(unprinted_suffix("Hello", "Bonjour"), None);
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("audio/mpeg"), "mp3");
        assert_eq!(extension_for("image/svg+xml"), "svg");
        assert_eq!(extension_for("application/x-unknown"), "bin");
    }
}
