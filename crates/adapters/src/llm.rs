use std::time::Duration;

use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use bookgen_core::config::{Config, LlmConfig};
use bookgen_core::{LanguageModel, LanguageModelError, Prompt, Role};

use crate::base_url::resolve_base_url;
use crate::error::AdapterError;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Services the factory knows how to talk to, keyed by `interface_format`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Preset {
    OpenAi,
    LmStudio,
    Ollama,
    DeepSeek,
    Grok,
    Compatible,
    Gemini,
}

impl Preset {
    fn from_format(format: &str) -> Option<Self> {
        let preset = match format.trim().to_lowercase().as_str() {
            "openai" => Self::OpenAi,
            "lm studio" | "lmstudio" => Self::LmStudio,
            "ollama" => Self::Ollama,
            "deepseek" => Self::DeepSeek,
            "grok" => Self::Grok,
            "openai compatible" | "custom" => Self::Compatible,
            "gemini" => Self::Gemini,
            _ => return None,
        };
        Some(preset)
    }

    fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::LmStudio => "http://localhost:1234/v1",
            Self::Ollama => "http://localhost:11434/v1",
            Self::DeepSeek => "https://api.deepseek.com/v1",
            Self::Grok => "https://api.x.ai/v1",
            Self::Compatible => "",
            Self::Gemini => GEMINI_BASE_URL,
        }
    }
}

pub fn create_llm_adapter(
    config: &Config,
    profile_name: &str,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let profile = config.get_llm_profile(profile_name).ok_or_else(|| {
        AdapterError::InvalidConfig(format!("no LLM profile named `{profile_name}`"))
    })?;
    create_llm_adapter_from_profile(profile)
}

/// Builds the client for a profile. Every OpenAI-style service shares one
/// adapter and differs only in its default base URL.
pub fn create_llm_adapter_from_profile(
    profile: &LlmConfig,
) -> Result<Box<dyn LanguageModel>, AdapterError> {
    let preset = Preset::from_format(&profile.interface_format).ok_or_else(|| {
        AdapterError::InvalidConfig(format!(
            "unsupported interface_format `{}`",
            profile.interface_format.trim()
        ))
    })?;

    let model = profile.model_name.trim();
    if model.is_empty() {
        return Err(AdapterError::InvalidConfig(
            "the profile has no model_name".to_string(),
        ));
    }

    let adapter: Box<dyn LanguageModel> = match preset {
        Preset::Gemini => Box::new(GeminiAdapter::new(profile, model)?),
        other => Box::new(ChatCompletionsAdapter::new(
            &resolve_base_url(&profile.base_url, other.default_base_url()),
            profile,
            model,
        )?),
    };
    Ok(adapter)
}

/// A JSON endpoint plus the headers every request to it carries.
struct Endpoint {
    client: Client,
    url: String,
    headers: HeaderMap,
}

impl Endpoint {
    fn new(url: String, timeout_secs: u64, headers: HeaderMap) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            url,
            headers,
        })
    }

    /// POSTs `body` and decodes the reply. Non-2xx statuses keep the body
    /// text so the error shows what the service complained about.
    fn post<T: DeserializeOwned>(&self, body: &Value) -> Result<T, AdapterError> {
        debug!("POST {}", self.url);
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(body)
            .send()?;

        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(AdapterError::HttpStatus { status, body: text });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// `/chat/completions` as served by OpenAI, LM Studio, Ollama, DeepSeek,
/// Grok and compatible servers.
struct ChatCompletionsAdapter {
    endpoint: Endpoint,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ChatCompletionsAdapter {
    fn new(base_url: &str, profile: &LlmConfig, model: &str) -> Result<Self, AdapterError> {
        if base_url.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "an OpenAI compatible profile needs a base_url".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        let key = profile.api_key.trim();
        if !key.is_empty() {
            headers.insert(AUTHORIZATION, header_value(&format!("Bearer {key}"))?);
        }

        Ok(Self {
            endpoint: Endpoint::new(
                format!("{}/chat/completions", base_url.trim_end_matches('/')),
                profile.timeout,
                headers,
            )?,
            model: model.to_string(),
            temperature: profile.temperature,
            max_tokens: (profile.max_tokens > 0).then_some(profile.max_tokens),
        })
    }

    fn body(&self, prompt: &Prompt) -> Value {
        let messages: Vec<Value> = prompt
            .messages()
            .iter()
            .map(|message| json!({ "role": message.role.as_str(), "content": message.content }))
            .collect();

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });
        if let Some(limit) = self.max_tokens {
            body["max_tokens"] = json!(limit);
        }
        body
    }
}

impl LanguageModel for ChatCompletionsAdapter {
    fn complete(&self, prompt: &Prompt) -> Result<String, LanguageModelError> {
        self.endpoint
            .post::<ChatReply>(&self.body(prompt))
            .and_then(|reply| reply.into_text().ok_or(AdapterError::EmptyResponse))
            .map_err(|err| {
                warn!("chat completion at {} failed: {err}", self.endpoint.url);
                err.into()
            })
    }
}

/// Google `generateContent`. System messages are sent as `systemInstruction`
/// and the key travels in the `x-goog-api-key` header.
struct GeminiAdapter {
    endpoint: Endpoint,
    temperature: f32,
    max_tokens: u32,
}

impl GeminiAdapter {
    fn new(profile: &LlmConfig, model: &str) -> Result<Self, AdapterError> {
        let key = profile.api_key.trim();
        if key.is_empty() {
            return Err(AdapterError::InvalidConfig(
                "a Gemini profile needs an api_key".to_string(),
            ));
        }

        let base = match profile.base_url.trim().trim_end_matches('/') {
            "" => GEMINI_BASE_URL,
            custom => custom,
        };
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-goog-api-key"), header_value(key)?);

        Ok(Self {
            endpoint: Endpoint::new(
                format!("{base}/models/{model}:generateContent"),
                profile.timeout,
                headers,
            )?,
            temperature: profile.temperature,
            max_tokens: profile.max_tokens,
        })
    }

    fn body(&self, prompt: &Prompt) -> Value {
        let (system, turns): (Vec<_>, Vec<_>) = prompt
            .messages()
            .iter()
            .partition(|message| message.role == Role::System);

        let contents: Vec<Value> = turns
            .iter()
            .map(|message| {
                let role = if message.role == Role::Assistant { "model" } else { "user" };
                json!({ "role": role, "parts": [{ "text": message.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_tokens,
            },
        });
        if !system.is_empty() {
            let parts: Vec<Value> = system
                .iter()
                .map(|message| json!({ "text": message.content }))
                .collect();
            body["systemInstruction"] = json!({ "parts": parts });
        }
        body
    }
}

impl LanguageModel for GeminiAdapter {
    fn complete(&self, prompt: &Prompt) -> Result<String, LanguageModelError> {
        self.endpoint
            .post::<GeminiReply>(&self.body(prompt))
            .and_then(GeminiReply::into_text)
            .map_err(|err| {
                warn!("Gemini request to {} failed: {err}", self.endpoint.url);
                err.into()
            })
    }
}

fn header_value(raw: &str) -> Result<HeaderValue, AdapterError> {
    let mut value = HeaderValue::from_str(raw).map_err(|_| {
        AdapterError::InvalidConfig("api_key contains characters not allowed in a header".into())
    })?;
    value.set_sensitive(true);
    Ok(value)
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    choices: Vec<ChatReplyChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatReplyChoice {
    #[serde(default)]
    message: Option<ChatReplyMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatReply {
    /// Content of the first choice that has any. An empty string counts as an
    /// answer; only a missing field does not.
    fn into_text(self) -> Option<String> {
        self.choices.into_iter().find_map(|choice| {
            choice
                .message
                .and_then(|message| message.content)
                .or(choice.text)
        })
    }
}

#[derive(Debug, Deserialize)]
struct GeminiReply {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiCandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<Value>,
}

impl GeminiReply {
    /// Joins the text parts of the first candidate that has any.
    fn into_text(self) -> Result<String, AdapterError> {
        for candidate in self.candidates {
            match candidate.finish_reason.as_deref() {
                Some("MAX_TOKENS") => warn!("Gemini stopped at the max_tokens limit"),
                Some(reason @ ("SAFETY" | "RECITATION")) => {
                    warn!("Gemini withheld the answer ({reason})")
                }
                _ => {}
            }

            let texts: Vec<&str> = candidate
                .content
                .iter()
                .flat_map(|content| content.parts.iter())
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect();
            if !texts.is_empty() {
                return Ok(texts.concat());
            }
        }
        Err(AdapterError::EmptyResponse)
    }
}
