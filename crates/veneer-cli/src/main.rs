mod logging;
mod popup;

use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use veneer_contracts::console::{parse_command, ConsoleCommand, CONSOLE_HELP_COMMANDS};
use veneer_contracts::events::ActivityJournal;
use veneer_contracts::messages::{action_of, BackgroundRequest, ContentRequest};
use veneer_contracts::prompts::{build_personalized_prompt, build_prompt};
use veneer_contracts::settings::{OverlaySettings, SettingsStore, Style};
use veneer_contracts::storage::JsonFileStore;
use veneer_engine::{
    BackgroundCoordinator, EngineConfig, HuggingFaceClient, MemoryPage, OverlayController,
};

#[derive(Debug, Parser)]
#[command(name = "veneer", version, about = "Replace page images with AI-generated ones")]
struct Cli {
    /// Verbose logging; honors RUST_LOG.
    #[arg(long, global = true)]
    debug: bool,
    /// Settings store file (overrides VENEER_STORE).
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Image generation endpoint (overrides VENEER_API_URL).
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Session(SessionArgs),
    Prompt(PromptArgs),
    Send(SendArgs),
}

#[derive(Debug, Parser)]
struct SessionArgs {
    /// JSON page snapshot to overlay.
    #[arg(long)]
    page: PathBuf,
    /// Where the page snapshot is written on exit.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct PromptArgs {
    #[arg(long, default_value = "artistic")]
    style: Style,
    #[arg(long, default_value_t = 5)]
    intensity: i64,
    #[arg(long)]
    personalized: bool,
}

#[derive(Debug, Parser)]
struct SendArgs {
    /// A JSON message, e.g. '{"action": "getApiStatus"}'.
    message: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("veneer error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let mut config = EngineConfig::from_env();
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(api_url) = cli.api_url {
        config.endpoint = api_url.trim().trim_end_matches('/').to_string();
    }

    match cli.command {
        Command::Session(args) => {
            run_session(&config, args)?;
            Ok(0)
        }
        Command::Prompt(args) => {
            let settings = OverlaySettings::new(args.style, args.intensity);
            if args.personalized {
                println!("{}", build_personalized_prompt(&settings));
            } else {
                println!("{}", build_prompt(&settings));
            }
            Ok(0)
        }
        Command::Send(args) => run_send(&config, &args.message),
    }
}

fn build_coordinator(config: &EngineConfig) -> BackgroundCoordinator {
    tracing::debug!(
        store = %config.store_path.display(),
        endpoint = %config.endpoint,
        "building background coordinator"
    );
    let store = JsonFileStore::new(config.store_path.clone());
    let client = HuggingFaceClient::new(config.endpoint.clone(), config.retry);
    BackgroundCoordinator::new(SettingsStore::new(Arc::new(store)), Arc::new(client))
}

fn run_send(config: &EngineConfig, raw: &str) -> Result<i32> {
    let message: Value = serde_json::from_str(raw).context("message is not valid JSON")?;
    let coordinator = build_coordinator(config);
    let response = coordinator.handle_message(&message);
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(if response.get("error").is_some() { 2 } else { 0 })
}

fn load_page(path: &Path) -> Result<MemoryPage> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read page snapshot {}", path.display()))?;
    MemoryPage::from_json(&raw)
        .with_context(|| format!("failed to parse page snapshot {}", path.display()))
}

fn save_page(page: &MemoryPage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, page.to_json()?)
        .with_context(|| format!("failed to write page snapshot {}", path.display()))
}

fn store_settings(coordinator: &BackgroundCoordinator, settings: &OverlaySettings) {
    if let Err(err) = coordinator.settings().save_overlay_settings(settings) {
        tracing::warn!(error = %err, "could not save overlay settings");
    }
}

/// What the popup shows when it opens: credential mode, the stored face image
/// and any overlay already on the page.
fn opening_status(
    controller: &OverlayController,
    coordinator: &BackgroundCoordinator,
    page: &mut MemoryPage,
) -> Vec<popup::StatusLine> {
    let api_status = coordinator.handle_message(&BackgroundRequest::GetApiStatus.to_value());
    let face = coordinator.handle_message(&BackgroundRequest::GetUserFaceImage.to_value());
    let overlay =
        controller.handle_message(page, coordinator, &ContentRequest::GetOverlayStatus.to_value());

    let mut lines = vec![popup::api_status(&api_status)];
    lines.extend(popup::stored_face(&face));
    lines.extend(popup::overlay_status(&overlay));
    lines
}

fn run_session(config: &EngineConfig, args: SessionArgs) -> Result<()> {
    let mut page = load_page(&args.page)?;
    let coordinator = build_coordinator(config);
    let controller = match &args.events {
        Some(path) => {
            let journal = ActivityJournal::new(path, uuid::Uuid::new_v4().to_string());
            tracing::info!(session_id = journal.session_id(), "journaling overlay activity");
            OverlayController::with_journal(journal)
        }
        None => OverlayController::new(),
    };
    let mut settings = coordinator.settings().overlay_settings();

    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "Veneer session started on {} ({} images). Type /help for commands.",
        args.page.display(),
        page.images.len()
    );
    for status in opening_status(&controller, &coordinator, &mut page) {
        println!("{status}");
    }

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        match parse_command(input) {
            ConsoleCommand::Noop => continue,
            ConsoleCommand::Help => {
                println!("Commands: {}", CONSOLE_HELP_COMMANDS.join(" "));
                println!("Any JSON object with an \"action\" field is sent as a message.");
            }
            ConsoleCommand::Quit => break,
            ConsoleCommand::Run { style, intensity } => {
                if let Some(style) = style {
                    settings.style = style;
                }
                if let Some(intensity) = intensity {
                    settings = OverlaySettings::new(settings.style, intensity);
                }
                store_settings(&coordinator, &settings);
                println!("{}", popup::run_started());
                let request = ContentRequest::RunOverlay { settings };
                let response =
                    controller.handle_message(&mut page, &coordinator, &request.to_value());
                println!("{}", popup::run_finished(&response));
            }
            ConsoleCommand::Reset => {
                println!("{}", popup::reset_started());
                let response = controller.handle_message(
                    &mut page,
                    &coordinator,
                    &ContentRequest::ResetImages.to_value(),
                );
                println!("{}", popup::reset_finished(&response));
            }
            ConsoleCommand::Status => {
                let response = controller.handle_message(
                    &mut page,
                    &coordinator,
                    &ContentRequest::GetOverlayStatus.to_value(),
                );
                match popup::overlay_status(&response) {
                    Some(status) => println!("{status}"),
                    None => println!("No images overlaid"),
                }
                println!("Style: {} Intensity: {}", settings.style, settings.intensity);
            }
            ConsoleCommand::SetStyle(style) => {
                settings.style = style;
                store_settings(&coordinator, &settings);
                println!("Style set to {style}");
            }
            ConsoleCommand::SetIntensity(intensity) => {
                settings = OverlaySettings::new(settings.style, intensity);
                store_settings(&coordinator, &settings);
                println!("Intensity set to {}", settings.intensity);
            }
            ConsoleCommand::SetApiKey(api_key) => {
                let request = BackgroundRequest::SetApiKey {
                    api_key: api_key.clone(),
                };
                let response = coordinator.handle_message(&request.to_value());
                println!("{}", popup::api_key_saved(&api_key, &response));
            }
            ConsoleCommand::UploadFace(path) => {
                println!("Processing face image...");
                let data_url = match popup::face_image_data_url(&path) {
                    Ok(data_url) => data_url,
                    Err(err) => {
                        tracing::warn!(error = %format!("{err:#}"), "face image rejected");
                        println!("{}", popup::face_upload_failed());
                        continue;
                    }
                };
                let request = BackgroundRequest::SetUserFaceImage {
                    image_data_url: Some(data_url),
                };
                let response = coordinator.handle_message(&request.to_value());
                println!("{}", popup::face_uploaded(&response));
            }
            ConsoleCommand::ClearFace => {
                let request = BackgroundRequest::SetUserFaceImage {
                    image_data_url: None,
                };
                let response = coordinator.handle_message(&request.to_value());
                println!("{}", popup::face_removed(&response));
            }
            ConsoleCommand::ApiStatus => {
                let response =
                    coordinator.handle_message(&BackgroundRequest::GetApiStatus.to_value());
                println!("{}", popup::api_status(&response));
                if let Some(api_url) = response.get("apiUrl").and_then(Value::as_str) {
                    println!("Endpoint: {api_url}");
                }
            }
            ConsoleCommand::Save(path) => {
                let target = path
                    .or_else(|| args.out.clone())
                    .unwrap_or_else(|| args.page.clone());
                save_page(&page, &target)?;
                println!("Page saved to {}", target.display());
            }
            ConsoleCommand::Message(message) => {
                let is_content = action_of(&message)
                    .is_some_and(|action| ContentRequest::ACTIONS.contains(&action));
                let response = if is_content {
                    controller.handle_message(&mut page, &coordinator, &message)
                } else {
                    coordinator.handle_message(&message)
                };
                println!("{}", serde_json::to_string(&response)?);
            }
            ConsoleCommand::Invalid { command, reason } => {
                if command.is_empty() {
                    println!("{reason}");
                } else {
                    println!("/{command}: {reason}");
                }
            }
        }
    }

    if let Some(out) = &args.out {
        save_page(&page, out)?;
        println!("Page saved to {}", out.display());
    }
    Ok(())
}
