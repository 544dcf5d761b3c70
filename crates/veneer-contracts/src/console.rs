use std::path::PathBuf;

use serde_json::Value;

use crate::settings::Style;

pub const CONSOLE_HELP_COMMANDS: &[&str] = &[
    "/run [style] [intensity]",
    "/reset",
    "/status",
    "/style <artistic|realistic|cartoon|vintage|modern>",
    "/intensity <0-10>",
    "/key <api key>",
    "/face <image path>",
    "/face-clear",
    "/api",
    "/save [path]",
    "/help",
    "/quit",
];

/// One line typed into the overlay console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Noop,
    Help,
    Quit,
    Run {
        style: Option<Style>,
        intensity: Option<i64>,
    },
    Reset,
    Status,
    SetStyle(Style),
    SetIntensity(i64),
    SetApiKey(String),
    UploadFace(PathBuf),
    ClearFace,
    ApiStatus,
    Save(Option<PathBuf>),
    /// A raw JSON message, dispatched as-is.
    Message(Value),
    Invalid { command: String, reason: String },
}

fn invalid(command: &str, reason: impl Into<String>) -> ConsoleCommand {
    ConsoleCommand::Invalid {
        command: command.to_string(),
        reason: reason.into(),
    }
}

fn parse_run_args(arg: &str) -> ConsoleCommand {
    let mut style = None;
    let mut intensity = None;
    for part in arg.split_whitespace() {
        if let Ok(value) = part.parse::<i64>() {
            intensity = Some(value);
            continue;
        }
        match part.parse::<Style>() {
            Ok(parsed) => style = Some(parsed),
            Err(reason) => return invalid("run", reason),
        }
    }
    ConsoleCommand::Run { style, intensity }
}

fn optional_path(arg: &str) -> Option<PathBuf> {
    let trimmed = arg.trim().trim_matches('"');
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

pub fn parse_command(text: &str) -> ConsoleCommand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ConsoleCommand::Noop;
    }

    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return match serde_json::from_str::<Value>(trimmed) {
            Ok(message) if message.is_object() => ConsoleCommand::Message(message),
            _ => invalid("", "expected a /command or a JSON message object"),
        };
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-')
        .count();
    let command = slash_tail[..command_len].to_ascii_lowercase().replace('-', "_");
    let arg = slash_tail[command_len..].trim();

    match command.as_str() {
        "help" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        "run" => parse_run_args(arg),
        "reset" => ConsoleCommand::Reset,
        "status" => ConsoleCommand::Status,
        "style" => match arg.parse::<Style>() {
            Ok(style) => ConsoleCommand::SetStyle(style),
            Err(reason) => invalid(&command, reason),
        },
        "intensity" => match arg.parse::<i64>() {
            Ok(value) => ConsoleCommand::SetIntensity(value),
            Err(_) => invalid(&command, "intensity must be a number from 0 to 10"),
        },
        "key" => ConsoleCommand::SetApiKey(arg.to_string()),
        "face" => match optional_path(arg) {
            Some(path) => ConsoleCommand::UploadFace(path),
            None => invalid(&command, "/face requires an image path"),
        },
        "face_clear" => ConsoleCommand::ClearFace,
        "api" => ConsoleCommand::ApiStatus,
        "save" => ConsoleCommand::Save(optional_path(arg)),
        _ => invalid(&command, "unknown command"),
    }
}
