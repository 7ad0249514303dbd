//! AI Client Module
//!
//! Handles communication with the generative model, either over the Gemini
//! REST API or through a local model CLI.

use log::{debug, warn};
use serde_json::{json, Value};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{AiConfig, AiProvider};

/// Errors that can occur during AI operations
#[derive(Error, Debug)]
pub enum AiError {
    #[error("AI integration not available")]
    NotAvailable,

    #[error("AI client failed to initialize: {0}")]
    ClientInit(String),

    #[error("Model command failed: {0}")]
    CommandFailed(String),

    #[error("API request failed: {0}")]
    RequestFailed(String),

    #[error("Model did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Invalid response from AI: {0}")]
    InvalidResponse(String),
}

/// Shape the caller expects the model to answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Text,
}

/// Anything that can answer a prompt
pub trait ModelClient: Send + Sync {
    /// False when the client could not be initialised
    fn is_available(&self) -> bool;

    /// Sends one prompt and returns the raw textual answer
    fn invoke(&self, prompt: &str, format: OutputFormat) -> Result<String, AiError>;

    /// Human readable description of the backing model
    fn describe(&self) -> String {
        "model".to_string()
    }
}

/// AI operation mode
#[derive(Debug, Clone)]
pub enum AiMode {
    /// Gemini generateContent REST API
    Gemini {
        api_key: String,
        model: String,
        endpoint: String,
    },
    /// Local CLI; the prompt is appended as the last argument
    Command { program: PathBuf, args: Vec<String> },
    /// AI features disabled
    Disabled,
}

impl Default for AiMode {
    fn default() -> Self {
        AiMode::Disabled
    }
}

/// AI Client for the configured model
#[derive(Debug, Clone)]
pub struct AiClient {
    mode: AiMode,
    timeout: Duration,
    http: Option<reqwest::blocking::Client>,
}

impl Default for AiClient {
    fn default() -> Self {
        Self::with_mode(AiMode::Disabled, Duration::from_secs(60))
    }
}

impl AiClient {
    /// Create a client with a specific mode.
    ///
    /// If the HTTP client cannot be built the client degrades to
    /// [`AiMode::Disabled`].
    pub fn with_mode(mode: AiMode, timeout: Duration) -> Self {
        let mut http = None;
        let mut mode = mode;

        if let AiMode::Gemini { .. } = mode {
            match reqwest::blocking::Client::builder().timeout(timeout).build() {
                Ok(client) => http = Some(client),
                Err(e) => {
                    warn!("{}", AiError::ClientInit(e.to_string()));
                    mode = AiMode::Disabled;
                }
            }
        }

        Self {
            mode,
            timeout,
            http,
        }
    }

    /// Create a client from configuration, reading the API key from the
    /// configured environment variable
    pub fn from_config(config: &AiConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_secs.max(1));

        let mode = match config.provider {
            AiProvider::Gemini => match std::env::var(&config.api_key_env) {
                Ok(api_key) if !api_key.trim().is_empty() => AiMode::Gemini {
                    api_key,
                    model: config.model.clone(),
                    endpoint: config.endpoint.clone(),
                },
                _ => {
                    warn!(
                        "{} not set, generation will use fallback test cases",
                        config.api_key_env
                    );
                    AiMode::Disabled
                }
            },
            AiProvider::Command => match config.command.split_first() {
                Some((program, args)) => AiMode::Command {
                    program: PathBuf::from(program),
                    args: args.to_vec(),
                },
                None => {
                    warn!("ai.command is empty, generation will use fallback test cases");
                    AiMode::Disabled
                }
            },
            AiProvider::Disabled => AiMode::Disabled,
        };

        Self::with_mode(mode, timeout)
    }

    /// Get the current mode
    pub fn mode(&self) -> &AiMode {
        &self.mode
    }

    /// Get a description of the current mode
    pub fn mode_description(&self) -> String {
        match &self.mode {
            AiMode::Gemini { model, .. } => format!("Gemini ({})", model),
            AiMode::Command { program, .. } => format!("Command ({})", program.display()),
            AiMode::Disabled => "Disabled".to_string(),
        }
    }

    /// Send request to the Gemini API
    fn send_gemini_request(
        &self,
        api_key: &str,
        model: &str,
        endpoint: &str,
        prompt: &str,
        format: OutputFormat,
    ) -> Result<String, AiError> {
        let http = self.http.as_ref().ok_or(AiError::NotAvailable)?;
        let url = format!(
            "{}/models/{}:generateContent",
            endpoint.trim_end_matches('/'),
            model
        );

        let mut body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        if format == OutputFormat::Json {
            body["generationConfig"] = json!({ "responseMimeType": "application/json" });
        }

        // Key travels in a header so it never appears in a request URL
        let response = http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    AiError::Timeout(self.timeout)
                } else {
                    AiError::RequestFailed(e.without_url().to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(AiError::RateLimited);
        }
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(AiError::RequestFailed(format!(
                "HTTP {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let payload: Value = response
            .json()
            .map_err(|e| AiError::InvalidResponse(e.without_url().to_string()))?;
        extract_candidate_text(&payload)
    }

    /// Send request via a local CLI, killing it once the timeout elapses
    fn send_command_request(
        &self,
        program: &PathBuf,
        args: &[String],
        prompt: &str,
    ) -> Result<String, AiError> {
        let mut child = Command::new(program)
            .args(args)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AiError::CommandFailed(format!("{}: {}", program.display(), e)))?;

        // Drain the pipes on their own threads so a chatty model cannot
        // block on a full pipe while we poll
        let stdout_reader = child.stdout.take().map(spawn_reader);
        let stderr_reader = child.stderr.take().map(spawn_reader);

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() > self.timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(AiError::Timeout(self.timeout));
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(AiError::CommandFailed(e.to_string())),
            }
        };

        let stdout = stdout_reader.map(join_reader).unwrap_or_default();
        let stderr = stderr_reader.map(join_reader).unwrap_or_default();

        if !status.success() {
            return Err(AiError::CommandFailed(format!(
                "Exit code: {:?}, stderr: {}",
                status.code(),
                stderr.trim()
            )));
        }

        if stdout.trim().is_empty() {
            return Err(AiError::InvalidResponse(
                "Empty response from model command".to_string(),
            ));
        }

        Ok(stdout)
    }
}

impl ModelClient for AiClient {
    fn is_available(&self) -> bool {
        match &self.mode {
            AiMode::Gemini { api_key, .. } => !api_key.is_empty() && self.http.is_some(),
            AiMode::Command { program, .. } => !program.as_os_str().is_empty(),
            AiMode::Disabled => false,
        }
    }

    fn invoke(&self, prompt: &str, format: OutputFormat) -> Result<String, AiError> {
        debug!(
            "Invoking {} with a {} character prompt",
            self.mode_description(),
            prompt.len()
        );
        match &self.mode {
            AiMode::Gemini {
                api_key,
                model,
                endpoint,
            } => self.send_gemini_request(api_key, model, endpoint, prompt, format),
            AiMode::Command { program, args } => self.send_command_request(program, args, prompt),
            AiMode::Disabled => Err(AiError::NotAvailable),
        }
    }

    fn describe(&self) -> String {
        self.mode_description()
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Pulls the concatenated text parts of the first candidate out of a
/// generateContent response
fn extract_candidate_text(payload: &Value) -> Result<String, AiError> {
    let parts = payload
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let reason = payload
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .unwrap_or("no candidates in response");
            AiError::InvalidResponse(reason.to_string())
        })?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(AiError::InvalidResponse("Empty response from API".to_string()));
    }
    Ok(text)
}
