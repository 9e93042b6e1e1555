use std::{fs, path::Path};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use shared::{domain::UserId, protocol::User};
use storage::DEFAULT_HISTORY_LIMIT;
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are 'Workigom AI', a chat assistant embedded in a modern chat room.
Identity: You are a helpful, smart, and friendly robot assistant.
Style: Be concise. Use modern Turkish (or English based on user input, but default to Turkish if not specified).
Role: Help the user, answer questions, and keep the conversation flowing.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantSettings {
    pub user_id: String,
    pub display_name: String,
    pub avatar: Option<String>,
    pub color: Option<String>,
}

impl AssistantSettings {
    pub fn as_user(&self) -> User {
        User {
            id: UserId(self.user_id.clone()),
            display_name: self.display_name.clone(),
            avatar: self.avatar.clone(),
            is_online: true,
            is_automated: true,
            color: self.color.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSettings {
    pub api_base_url: String,
    pub model: String,
    /// No key means every completion resolves to the missing-credentials notice.
    pub api_key: Option<String>,
    pub system_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    pub history_page_size: u32,
    pub max_cached_messages: usize,
    pub allow_direct_messages: bool,
    pub assistant: AssistantSettings,
    pub completion: CompletionSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            history_page_size: DEFAULT_HISTORY_LIMIT,
            max_cached_messages: 500,
            allow_direct_messages: true,
            assistant: AssistantSettings {
                user_id: "bot".into(),
                display_name: "Workigom AI".into(),
                avatar: None,
                color: Some("bg-indigo-100 text-indigo-600".into()),
            },
            completion: CompletionSettings {
                api_base_url: "https://api.x.ai/v1".into(),
                model: "grok-3-mini".into(),
                api_key: None,
                system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            },
        }
    }
}

/// Defaults, then `client.toml` from the working directory if present, then
/// environment overrides.
pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();

    let path = Path::new(DEFAULT_SETTINGS_FILE);
    if path.exists() {
        match read_settings_file(path) {
            Ok(table) => {
                if let Err(err) = apply_table(&mut settings, &table) {
                    warn!(error = %err, "ignoring invalid settings file");
                }
            }
            Err(err) => warn!(error = %err, "ignoring unreadable settings file"),
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Defaults overlaid with an explicit settings file. Errors on a missing or
/// malformed file.
pub fn load_settings_from(path: &Path) -> Result<ClientSettings> {
    let mut settings = ClientSettings::default();
    let table = read_settings_file(path)?;
    apply_table(&mut settings, &table)
        .with_context(|| format!("invalid settings in '{}'", path.display()))?;
    Ok(settings)
}

fn read_settings_file(path: &Path) -> Result<toml::Table> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str::<toml::Table>(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

fn apply_table(settings: &mut ClientSettings, table: &toml::Table) -> Result<()> {
    for (key, value) in table {
        let raw = match value {
            toml::Value::String(v) => v.clone(),
            toml::Value::Integer(v) => v.to_string(),
            toml::Value::Boolean(v) => v.to_string(),
            other => return Err(anyhow!("unsupported value for '{key}': {other}")),
        };
        if !apply_key(settings, key, &raw)? {
            warn!(key = %key, "unknown settings key");
        }
    }
    Ok(())
}

/// Returns false for keys this client does not know.
fn apply_key(settings: &mut ClientSettings, key: &str, raw: &str) -> Result<bool> {
    match key {
        "history_page_size" => {
            settings.history_page_size = raw
                .parse()
                .with_context(|| format!("history_page_size must be a number, got '{raw}'"))?;
        }
        "max_cached_messages" => {
            settings.max_cached_messages = raw
                .parse()
                .with_context(|| format!("max_cached_messages must be a number, got '{raw}'"))?;
        }
        "allow_direct_messages" => {
            settings.allow_direct_messages = raw
                .parse()
                .with_context(|| format!("allow_direct_messages must be true/false, got '{raw}'"))?;
        }
        "assistant_user_id" => settings.assistant.user_id = raw.to_owned(),
        "assistant_display_name" => settings.assistant.display_name = raw.to_owned(),
        "assistant_avatar" => settings.assistant.avatar = Some(raw.to_owned()),
        "assistant_color" => settings.assistant.color = non_empty(raw),
        "completion_base_url" => settings.completion.api_base_url = raw.to_owned(),
        "completion_model" => settings.completion.model = raw.to_owned(),
        "completion_api_key" => settings.completion.api_key = non_empty(raw),
        "system_prompt" => settings.completion.system_prompt = raw.to_owned(),
        _ => return Ok(false),
    }
    Ok(true)
}

pub(crate) fn apply_env_overrides(
    settings: &mut ClientSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    const ENV_KEYS: &[(&str, &str)] = &[
        ("APP__HISTORY_PAGE_SIZE", "history_page_size"),
        ("APP__MAX_CACHED_MESSAGES", "max_cached_messages"),
        ("APP__ALLOW_DIRECT_MESSAGES", "allow_direct_messages"),
        ("APP__ASSISTANT_USER_ID", "assistant_user_id"),
        ("APP__ASSISTANT_DISPLAY_NAME", "assistant_display_name"),
        ("APP__ASSISTANT_COLOR", "assistant_color"),
        ("APP__COMPLETION_BASE_URL", "completion_base_url"),
        ("APP__COMPLETION_MODEL", "completion_model"),
        ("API_KEY", "completion_api_key"),
        ("APP__COMPLETION_API_KEY", "completion_api_key"),
    ];

    for (env_key, key) in ENV_KEYS {
        let Some(raw) = lookup(env_key) else {
            continue;
        };
        if let Err(err) = apply_key(settings, key, &raw) {
            warn!(env = %env_key, error = %err, "ignoring invalid environment override");
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
