//! Gemini `generateContent` client.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{
    AudioRequest, AudioResult, BackendError, GenerationBackend, HistoryTurn, ImageRequest,
    ImageResult, TextRequest, TextResult, TokenUsage, TurnRole,
};
use crate::config::BackendConfig;

/// Number of trailing history turns forwarded to the model.
const HISTORY_WINDOW: usize = 8;

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl GeminiClient {
    pub fn new(http: reqwest::Client, config: &BackendConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    async fn generate_content(&self, model: &str, payload: Value) -> Result<Value, BackendError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let call = async {
            let response = self
                .http
                .post(&url)
                .query(&[("key", self.api_key.as_str())])
                .json(&payload)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(BackendError::Api {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(response.json::<Value>().await?)
        };

        match tokio::time::timeout(Duration::from_secs(self.timeout_secs), call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                timeout_secs: self.timeout_secs,
            }),
        }
    }
}

fn to_contents(history: &[HistoryTurn], message: &str) -> Value {
    let mut contents: Vec<Value> = history
        .iter()
        .rev()
        .take(HISTORY_WINDOW)
        .rev()
        .filter(|turn| !turn.content.trim().is_empty())
        .map(|turn| {
            let role = match turn.role {
                TurnRole::Assistant => "model",
                TurnRole::User => "user",
            };
            json!({ "role": role, "parts": [{ "text": turn.content.trim() }] })
        })
        .collect();

    contents.push(json!({ "role": "user", "parts": [{ "text": message.trim() }] }));
    Value::Array(contents)
}

fn extract_usage(body: &Value) -> TokenUsage {
    let usage = &body["usageMetadata"];
    let tokens_in = usage["promptTokenCount"].as_i64().unwrap_or(0);
    let tokens_out = usage["candidatesTokenCount"].as_i64().unwrap_or(0);
    let total_tokens = usage["totalTokenCount"]
        .as_i64()
        .unwrap_or(tokens_in + tokens_out);
    TokenUsage {
        tokens_in,
        tokens_out,
        total_tokens,
    }
}

fn candidate_parts(body: &Value) -> &[Value] {
    body["candidates"][0]["content"]["parts"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// First part carrying inline binary data, as `(mime_type, base64)`.
fn find_inline_data(body: &Value) -> Option<(Option<&str>, &str)> {
    candidate_parts(body).iter().find_map(|part| {
        let inline = &part["inlineData"];
        let data = inline["data"].as_str()?;
        Some((inline["mimeType"].as_str(), data))
    })
}

#[async_trait]
impl GenerationBackend for GeminiClient {
    async fn generate_text(&self, request: TextRequest) -> Result<TextResult, BackendError> {
        let mut payload = json!({
            "contents": to_contents(&request.history, &request.message),
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "generationConfig": { "temperature": 0.65, "maxOutputTokens": 1100 },
        });
        if request.use_search {
            payload["tools"] = json!([{ "googleSearch": {} }]);
        }

        let body = self.generate_content(&request.model, payload).await?;

        let text = candidate_parts(&body)
            .iter()
            .filter_map(|part| part["text"].as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string();

        let grounding = &body["candidates"][0]["groundingMetadata"];
        let sources = grounding["groundingChunks"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[])
            .iter()
            .filter_map(|chunk| {
                let web = &chunk["web"];
                let uri = web["uri"].as_str()?;
                if uri.is_empty() {
                    return None;
                }
                Some(super::GroundingSource {
                    title: web["title"].as_str().unwrap_or("Source").to_string(),
                    uri: uri.to_string(),
                })
            })
            .collect();
        let grounded_queries = grounding["webSearchQueries"]
            .as_array()
            .map(|queries| queries.len() as i64)
            .unwrap_or(0);

        Ok(TextResult {
            text,
            sources,
            grounded_queries,
            usage: extract_usage(&body),
        })
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageResult, BackendError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.prompt.trim() }] }],
            "generationConfig": { "responseModalities": ["TEXT", "IMAGE"] },
        });

        let body = self.generate_content(&request.model, payload).await?;

        let (mime_type, data) =
            find_inline_data(&body).ok_or(BackendError::MissingData("inline image data"))?;
        let mime_type = mime_type.unwrap_or("image/png");

        Ok(ImageResult {
            image_data_url: format!("data:{mime_type};base64,{data}"),
            usage: extract_usage(&body),
        })
    }

    async fn generate_audio(&self, request: AudioRequest) -> Result<AudioResult, BackendError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": request.text.trim() }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": request.voice }
                    }
                }
            },
        });

        let body = self.generate_content(&request.model, payload).await?;

        let (mime_type, data) =
            find_inline_data(&body).ok_or(BackendError::MissingData("inline audio data"))?;

        Ok(AudioResult {
            audio_base64: data.to_string(),
            mime_type: mime_type.unwrap_or("audio/pcm;rate=24000").to_string(),
            usage: extract_usage(&body),
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    use super::*;

    fn client_for(server: &MockServer) -> GeminiClient {
        let config = BackendConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            timeout_secs: 5,
            ..BackendConfig::default()
        };
        GeminiClient::new(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn text_response_is_parsed_with_sources_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-2.5-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "part one" }, { "text": "part two" }] },
                    "groundingMetadata": {
                        "groundingChunks": [
                            { "web": { "title": "Study", "uri": "https://example.com/a" } },
                            { "web": { "uri": "" } }
                        ],
                        "webSearchQueries": ["q1", "q2"]
                    }
                }],
                "usageMetadata": {
                    "promptTokenCount": 42,
                    "candidatesTokenCount": 10,
                    "totalTokenCount": 52
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = client_for(&server)
            .generate_text(TextRequest {
                model: "gemini-2.5-flash".to_string(),
                system_instruction: "be brief".to_string(),
                history: vec![],
                message: "hello".to_string(),
                use_search: true,
            })
            .await
            .expect("text generation should succeed");

        assert_eq!(result.text, "part one\npart two");
        assert_eq!(result.sources.len(), 1);
        assert_eq!(result.sources[0].uri, "https://example.com/a");
        assert_eq!(result.grounded_queries, 2);
        assert_eq!(result.usage.tokens_in, 42);
        assert_eq!(result.usage.tokens_out, 10);
        assert_eq!(result.usage.total_tokens, 52);
    }

    #[tokio::test]
    async fn upstream_error_status_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_text(TextRequest {
                model: "gemini-2.5-flash".to_string(),
                system_instruction: String::new(),
                history: vec![],
                message: "hello".to_string(),
                use_search: false,
            })
            .await
            .unwrap_err();

        match err {
            BackendError::Api { status, body } => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_without_inline_data_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": "no image here" }] } }]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate_image(ImageRequest {
                model: "gemini-2.0-flash-preview-image-generation".to_string(),
                prompt: "a diagram".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BackendError::MissingData(_)));
    }

    #[tokio::test]
    async fn audio_inline_data_and_mime_are_returned() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": { "parts": [{
                        "inlineData": { "mimeType": "audio/pcm;rate=24000", "data": "QUJD" }
                    }] }
                }],
                "usageMetadata": { "promptTokenCount": 7, "candidatesTokenCount": 0 }
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .generate_audio(AudioRequest {
                model: "gemini-2.5-flash-preview-tts".to_string(),
                text: "read this".to_string(),
                voice: "Kore".to_string(),
            })
            .await
            .expect("audio generation should succeed");

        assert_eq!(result.audio_base64, "QUJD");
        assert_eq!(result.mime_type, "audio/pcm;rate=24000");
        assert_eq!(result.usage.total_tokens, 7);
    }

    #[test]
    fn history_is_windowed_and_blank_turns_dropped() {
        let history: Vec<HistoryTurn> = (0..12)
            .map(|i| HistoryTurn {
                role: if i % 2 == 0 {
                    TurnRole::User
                } else {
                    TurnRole::Assistant
                },
                content: if i == 11 { "  ".to_string() } else { format!("turn {i}") },
            })
            .collect();

        let contents = to_contents(&history, "latest");
        let contents = contents.as_array().unwrap();
        // 8-turn window, minus the blank one, plus the new message.
        assert_eq!(contents.len(), 8);
        assert_eq!(contents[0]["parts"][0]["text"], "turn 4");
        assert_eq!(contents.last().unwrap()["parts"][0]["text"], "latest");
    }
}
