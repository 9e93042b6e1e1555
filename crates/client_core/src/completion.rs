use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{domain::MessageKind, protocol::Message};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CompletionSettings;

/// Shown in place of a reply when the service returns nothing.
pub const EMPTY_REPLY_NOTICE: &str = "Hmm, sesim kesildi. (Boş cevap döndü)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("completion service rate limited the request")]
    RateLimited,
    #[error("completion service rejected the credentials")]
    Unauthorized,
    #[error("completion service unavailable")]
    Unavailable,
    #[error("completion service failed")]
    Unknown,
    #[error("completion credentials are not configured")]
    MissingCredentials,
}

impl CompletionError {
    /// Text written into the room in place of a reply.
    pub fn user_notice(self) -> &'static str {
        match self {
            CompletionError::RateLimited => {
                "Sistem: Çok fazla istek gönderildi. Lütfen biraz bekleyip tekrar deneyin."
            }
            CompletionError::Unauthorized => {
                "Bağlantı Hatası: API Anahtarı geçersiz veya yetkisiz erişim."
            }
            CompletionError::Unavailable => {
                "Hata: Asistan şu an yanıt veremiyor. Lütfen bağlantınızı kontrol edin."
            }
            CompletionError::Unknown => "Bir bağlantı hatası oluştu.",
            CompletionError::MissingCredentials => {
                "Sistem: API Anahtarı bulunamadı. Simülasyon modundayım; asistan bağlantısı için anahtarı yapılandırın."
            }
        }
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generates a reply to `history` (oldest first).
    async fn complete(&self, history: &[Message]) -> Result<String, CompletionError>;
}

pub struct MissingCompletionService;

#[async_trait]
impl CompletionService for MissingCompletionService {
    async fn complete(&self, _history: &[Message]) -> Result<String, CompletionError> {
        Err(CompletionError::MissingCredentials)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatTurn>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible `chat/completions` endpoint.
pub struct HttpCompletionService {
    http: Client,
    settings: CompletionSettings,
}

impl HttpCompletionService {
    pub fn new(settings: CompletionSettings) -> Self {
        Self {
            http: Client::new(),
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.api_base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn complete(&self, history: &[Message]) -> Result<String, CompletionError> {
        let Some(api_key) = self.settings.api_key.as_deref() else {
            return Err(CompletionError::MissingCredentials);
        };

        let request = ChatCompletionRequest {
            model: self.settings.model.clone(),
            messages: build_turns(&self.settings.system_prompt, history),
        };
        debug!(
            model = %request.model,
            turns = request.messages.len(),
            "requesting completion"
        );

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                warn!(error = %err, "completion request failed");
                CompletionError::Unavailable
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "completion service returned an error");
            return Err(classify_status(status));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|err| {
            warn!(error = %err, "malformed completion response");
            CompletionError::Unknown
        })?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

/// System prompt first; system-kind and blank history entries are dropped.
pub(crate) fn build_turns(system_prompt: &str, history: &[Message]) -> Vec<ChatTurn> {
    let mut turns = Vec::with_capacity(history.len() + 1);
    if !system_prompt.trim().is_empty() {
        turns.push(ChatTurn {
            role: "system".into(),
            content: system_prompt.to_owned(),
        });
    }
    turns.extend(
        history
            .iter()
            .filter(|m| m.kind != MessageKind::System && !m.body.trim().is_empty())
            .map(|m| ChatTurn {
                role: match m.kind {
                    MessageKind::Assistant => "assistant".into(),
                    _ => "user".into(),
                },
                content: m.body.clone(),
            }),
    );
    turns
}

pub(crate) fn classify_status(status: StatusCode) -> CompletionError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => CompletionError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CompletionError::Unauthorized,
        s if s.is_server_error() => CompletionError::Unavailable,
        _ => CompletionError::Unknown,
    }
}

#[cfg(test)]
#[path = "tests/completion_tests.rs"]
mod tests;
