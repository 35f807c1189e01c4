//! HTTP transport for the generator.
//!
//! Two wire modes share one streaming path: the backend proxy
//! (`POST {api_url}/{operation}` with a bare `messages` body) and a direct
//! OpenAI-compatible endpoint (`POST {base_url}/v1/chat/completions` with
//! `stream: true` and a bearer key). Step requests absorb transient failures
//! with linearly growing pauses before the error surfaces.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use super::prompts::{action_prompt, check_prompt, coordinate_prompt, help_prompt};
use super::sse::{Dialect, StreamDecoder};
use super::types::{ChatMessage, CompletionRequest, ContentPart, ProxyRequest};
use super::{
    CheckRequest, HelpRequest, InstructionSource, LocateRequest, SourceError, StepRequest,
};
use crate::config::Settings;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Retries for `step` after the first failed attempt.
const STEP_RETRIES: u64 = 3;

/// [`InstructionSource`] over HTTP.
pub struct HttpSource {
    client: reqwest::Client,
    transport: Transport,
}

enum Transport {
    /// The backend proxy holds the prompts' model choice and API key.
    Proxy { api_url: String },
    /// Straight to an OpenAI-compatible completions endpoint.
    Direct {
        base_url: String,
        model: String,
        api_key: Option<String>,
    },
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Step,
    Help,
    Check,
    Coordinates,
}

impl Operation {
    fn endpoint(self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::Help => "help",
            Self::Check => "check",
            Self::Coordinates => "coordinates",
        }
    }
}

impl HttpSource {
    /// Build a source from settings. A configured provider selects the
    /// direct transport, otherwise requests go through the proxy.
    pub fn new(settings: &Settings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let transport = if let Some(provider) = &settings.provider
            && let Some(base_url) = provider.resolved_base_url()
        {
            Transport::Direct {
                base_url,
                model: provider.model.clone(),
                api_key: provider.api_key.clone(),
            }
        } else {
            Transport::Proxy {
                api_url: settings.backend.api_url.trim_end_matches('/').to_string(),
            }
        };
        Ok(Self { client, transport })
    }

    fn dialect(&self) -> Dialect {
        match &self.transport {
            Transport::Proxy { .. } => Dialect::Backend,
            Transport::Direct { .. } => Dialect::OpenAi,
        }
    }

    /// POST `messages` for `operation` and decode the event stream,
    /// handing each full-answer-so-far to `emit`.
    async fn send(
        &self,
        operation: Operation,
        messages: &[ChatMessage],
        emit: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, SourceError> {
        let request = match &self.transport {
            Transport::Proxy { api_url } => self
                .client
                .post(format!("{api_url}/{}", operation.endpoint()))
                .json(&ProxyRequest { messages }),
            Transport::Direct {
                base_url,
                model,
                api_key,
            } => {
                let mut request = self
                    .client
                    .post(format!("{base_url}/v1/chat/completions"))
                    .json(&CompletionRequest {
                        messages,
                        model,
                        stream: true,
                    });
                if let Some(key) = api_key {
                    request = request.bearer_auth(key);
                }
                request
            }
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status(status));
        }

        let mut decoder = StreamDecoder::new(self.dialect());
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            decoder.push(&chunk?, emit);
        }
        Ok(decoder.finish())
    }
}

/// Run a step attempt up to [`STEP_RETRIES`] extra times, pausing a second
/// longer after each failure, before letting the last error surface. Only
/// `step` gets this treatment; the other operations fail fast.
async fn with_step_retries<F, Fut>(mut attempt: F) -> Result<String, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<String, SourceError>>,
{
    for pause in 1..=STEP_RETRIES {
        match attempt().await {
            Ok(text) => return Ok(text),
            Err(err) => {
                warn!(attempt = pause, %err, "step generation failed, retrying");
                tokio::time::sleep(Duration::from_secs(pause)).await;
            }
        }
    }
    attempt().await
}

#[async_trait]
impl InstructionSource for HttpSource {
    async fn step(&self, request: StepRequest) -> Result<String, SourceError> {
        let messages = step_messages(&request)?;
        with_step_retries(|| async { self.send(Operation::Step, &messages, &mut |_| {}).await })
            .await
    }

    async fn help(
        &self,
        request: HelpRequest,
        updates: mpsc::UnboundedSender<String>,
    ) -> Result<String, SourceError> {
        let messages = help_messages(&request)?;
        self.send(Operation::Help, &messages, &mut |text| {
            // The receiver hanging up just means nobody is watching anymore.
            let _ = updates.send(text.to_string());
        })
        .await
    }

    async fn check(&self, request: CheckRequest) -> Result<bool, SourceError> {
        let messages = check_messages(&request)?;
        let text = self.send(Operation::Check, &messages, &mut |_| {}).await?;
        Ok(is_affirmative(&text))
    }

    async fn locate(&self, request: LocateRequest) -> Result<String, SourceError> {
        let messages = locate_messages(&request)?;
        let text = self
            .send(Operation::Coordinates, &messages, &mut |_| {})
            .await?;
        Ok(text.trim().to_string())
    }
}

fn step_messages(request: &StepRequest) -> Result<Vec<ChatMessage>, SourceError> {
    let system = ChatMessage::system(action_prompt(
        &request.goal,
        &request.os_name,
        &request.completed_steps,
    ));
    let frame_url = request.frame.to_data_url()?;
    let messages = if let Some(follow_up) = &request.follow_up {
        // The earlier screenshot is represented by a placeholder; only the
        // current frame goes over the wire.
        vec![
            system,
            ChatMessage::user(vec![ContentPart::text("[Previous Screenshot]")]),
            ChatMessage::assistant(follow_up.previous_instruction.clone()),
            ChatMessage::user(vec![
                ContentPart::text(follow_up.message.clone()),
                ContentPart::image(frame_url),
            ]),
        ]
    } else {
        vec![system, ChatMessage::user(vec![ContentPart::image(frame_url)])]
    };
    Ok(messages)
}

fn help_messages(request: &HelpRequest) -> Result<Vec<ChatMessage>, SourceError> {
    Ok(vec![
        ChatMessage::system(help_prompt(&request.goal, &request.instruction)),
        ChatMessage::user(vec![
            ContentPart::text(request.question.clone()),
            ContentPart::image(request.frame.to_data_url()?),
        ]),
    ])
}

fn check_messages(request: &CheckRequest) -> Result<Vec<ChatMessage>, SourceError> {
    Ok(vec![
        ChatMessage::system(check_prompt(&request.description)),
        ChatMessage::user(vec![
            ContentPart::text("Before:"),
            ContentPart::image(request.before.to_data_url()?),
            ContentPart::text("After:"),
            ContentPart::image(request.after.to_data_url()?),
        ]),
    ])
}

fn locate_messages(request: &LocateRequest) -> Result<Vec<ChatMessage>, SourceError> {
    Ok(vec![
        ChatMessage::system(coordinate_prompt(&request.instruction)),
        ChatMessage::user(vec![ContentPart::image(request.frame.to_data_url()?)]),
    ])
}

/// A completion check counts as "yes" even when the model wraps the word in
/// a fenced block or a full sentence.
fn is_affirmative(text: &str) -> bool {
    text.replace("```json\n", "")
        .replace("\n```", "")
        .trim()
        .to_lowercase()
        .contains("yes")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::generator::FollowUpContext;
    use crate::generator::types::MessageContent;
    use image::DynamicImage;

    fn frame() -> Frame {
        Frame::new(DynamicImage::new_rgba8(2, 2))
    }

    fn text_of(message: &ChatMessage) -> Option<&str> {
        match &message.content {
            MessageContent::Text(text) => Some(text),
            MessageContent::Parts(_) => None,
        }
    }

    #[test]
    fn plain_step_is_system_plus_screenshot() {
        let messages = step_messages(&StepRequest {
            goal: "book a flight".to_string(),
            os_name: "Linux".to_string(),
            frame: frame(),
            completed_steps: vec![],
            follow_up: None,
        })
        .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].role, "user");
        let json = serde_json::to_value(&messages[1]).unwrap();
        assert!(
            json["content"][0]["image_url"]["url"]
                .as_str()
                .unwrap()
                .starts_with("data:image/png;base64,")
        );
    }

    #[test]
    fn follow_up_step_replays_the_exchange() {
        let messages = step_messages(&StepRequest {
            goal: "book a flight".to_string(),
            os_name: "Linux".to_string(),
            frame: frame(),
            completed_steps: vec!["Откройте браузер".to_string()],
            follow_up: Some(FollowUpContext {
                previous_frame: frame(),
                previous_instruction: "Нажмите «Войти»".to_string(),
                message: "Я не вижу эту кнопку".to_string(),
            }),
        })
        .unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, ["system", "user", "assistant", "user"]);
        assert_eq!(text_of(&messages[2]), Some("Нажмите «Войти»"));
        let placeholder = serde_json::to_value(&messages[1]).unwrap();
        assert_eq!(placeholder["content"][0]["text"], "[Previous Screenshot]");
        let last = serde_json::to_value(&messages[3]).unwrap();
        assert_eq!(last["content"][0]["text"], "Я не вижу эту кнопку");
        assert_eq!(last["content"][1]["type"], "image_url");
    }

    #[test]
    fn check_messages_label_both_frames() {
        let messages = check_messages(&CheckRequest {
            description: "Нажмите «Войти»".to_string(),
            before: frame(),
            after: frame(),
        })
        .unwrap();
        assert_eq!(messages.len(), 2);
        let json = serde_json::to_value(&messages[1]).unwrap();
        assert_eq!(json["content"][0]["text"], "Before:");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(json["content"][2]["text"], "After:");
        assert_eq!(json["content"][3]["type"], "image_url");
    }

    #[test]
    fn affirmative_survives_fences_and_sentences() {
        assert!(is_affirmative("yes"));
        assert!(is_affirmative("YES."));
        assert!(is_affirmative("```json\nyes\n```"));
        assert!(is_affirmative("Yes, the address bar now shows the site."));
        assert!(!is_affirmative("No"));
        assert!(!is_affirmative("no, nothing changed"));
        assert!(!is_affirmative(""));
    }

    #[tokio::test(start_paused = true)]
    async fn step_retries_with_growing_pauses_before_the_error_surfaces() {
        let calls = std::cell::Cell::new(0u64);
        let start = tokio::time::Instant::now();
        let result = with_step_retries(|| async {
            calls.set(calls.get() + 1);
            Err::<String, _>(SourceError::Status(reqwest::StatusCode::BAD_GATEWAY))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), STEP_RETRIES + 1);
        // Linear backoff: 1s + 2s + 3s between the four attempts.
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn step_retry_stops_at_the_first_success() {
        let calls = std::cell::Cell::new(0u64);
        let result = with_step_retries(|| async {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(SourceError::Status(reqwest::StatusCode::BAD_GATEWAY))
            } else {
                Ok("Click Save".to_string())
            }
        })
        .await;
        assert_eq!(result.unwrap(), "Click Save");
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn provider_settings_select_the_direct_transport() {
        let mut settings = Settings::default();
        let source = HttpSource::new(&settings).unwrap();
        assert!(matches!(source.dialect(), Dialect::Backend));

        settings.provider = Some(crate::config::ProviderConfig {
            name: Some("ollama".to_string()),
            base_url: None,
            model: "qwen2.5-vl".to_string(),
            api_key: None,
        });
        let source = HttpSource::new(&settings).unwrap();
        assert!(matches!(source.dialect(), Dialect::OpenAi));
    }
}
