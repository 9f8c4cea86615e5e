//! Blocking client for the OpenAI Responses API.
//!
//! One request shape covers both call sites: the structured agent turn
//! (schema-constrained JSON) and the plain-text condensation summary.

use forebrain_core::{API_KEY_ENV, UserSettings};
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

/// Schema enforced server-side for agent turns. Every field is required so a
/// missing key fails at the API boundary rather than in our parser.
pub const RESPONSE_SCHEMA: &str = r#"{
  "type": "object",
  "additionalProperties": false,
  "properties": {
    "read": { "type": "array", "items": { "type": "string" } },
    "patches": { "type": "array", "items": {
      "type": "object",
      "additionalProperties": false,
      "properties": {
        "path": { "type": "string" },
        "diff": { "type": "string" }
      },
      "required": ["path", "diff"]
    }},
    "writes": { "type": "array", "items": {
      "type": "object",
      "additionalProperties": false,
      "properties": {
        "path": { "type": "string" },
        "content": { "type": "string" }
      },
      "required": ["path", "content"]
    }},
    "deletes": { "type": "array", "items": { "type": "string" } },
    "message": { "type": "string" }
  },
  "required": ["read", "patches", "writes", "deletes", "message"]
}"#;

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("OPENAI_API_KEY is required; export it or save it with the config command")]
    MissingApiKey,
    #[error("request failed: {0}")]
    Transport(String),
    #[error(
        "OpenAI API quota/billing issue: your API key's project has no remaining quota or billing is not enabled"
    )]
    Quota,
    #[error("OpenAI API error: {0}")]
    Api(String),
    #[error("stream read error: {0}")]
    Stream(String),
    #[error("no output text found in response")]
    EmptyOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    PlainText,
    StructuredJson,
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub instructions: String,
    pub input: String,
    pub format: OutputFormat,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
}

pub type StreamCallback = Arc<dyn Fn(StreamEvent) + Send + Sync>;

pub trait LlmClient: Send + Sync {
    fn complete(&self, req: &CompletionRequest) -> Result<String, LlmError>;

    /// Streaming variant: `cb` sees each text delta as it arrives and exactly
    /// one `Done` at the end. Returns the fully assembled text.
    fn complete_streaming(
        &self,
        req: &CompletionRequest,
        cb: StreamCallback,
    ) -> Result<String, LlmError>;
}

pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl OpenAiClient {
    /// Key resolution order: environment, then the persisted user settings.
    pub fn new(timeout_seconds: u64) -> Result<Self, LlmError> {
        let api_key = resolve_api_key()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds.max(1)))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: RESPONSES_URL.to_string(),
            api_key,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn send(&self, payload: &Value) -> Result<reqwest::blocking::Response, LlmError> {
        self.client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(payload)
            .send()
            .map_err(|e| LlmError::Transport(e.to_string()))
    }
}

impl LlmClient for OpenAiClient {
    fn complete(&self, req: &CompletionRequest) -> Result<String, LlmError> {
        let payload = build_payload(req, false);
        let resp = self.send(&payload)?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| LlmError::Transport(e.to_string()))?;
        if !status.is_success() {
            return Err(api_error_from_body(&body));
        }
        let value: Value =
            serde_json::from_str(&body).map_err(|e| LlmError::Api(e.to_string()))?;
        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return Err(structured_api_error(err));
        }
        extract_output_text(&value).ok_or(LlmError::EmptyOutput)
    }

    fn complete_streaming(
        &self,
        req: &CompletionRequest,
        cb: StreamCallback,
    ) -> Result<String, LlmError> {
        let payload = build_payload(req, true);
        let resp = self.send(&payload)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(api_error_from_body(&body));
        }

        let mut out = String::new();
        let reader = std::io::BufReader::new(resp);
        for line_result in reader.lines() {
            let line = line_result.map_err(|e| LlmError::Stream(e.to_string()))?;
            let Some(data) = line.strip_prefix("data: ").map(str::trim) else {
                continue;
            };
            if data.is_empty() {
                continue;
            }
            if data == "[DONE]" {
                break;
            }
            let value: Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Some(err) = stream_error(&value) {
                return Err(err);
            }
            if let Some(delta) = extract_stream_delta(&value) {
                if !delta.is_empty() {
                    out.push_str(delta);
                    cb(StreamEvent::Delta(delta.to_string()));
                }
            }
        }
        cb(StreamEvent::Done);
        Ok(out)
    }
}

fn resolve_api_key() -> Result<String, LlmError> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        let trimmed = key.trim();
        if !trimmed.is_empty() {
            return Ok(trimmed.to_string());
        }
    }
    let settings = UserSettings::load().map_err(|_| LlmError::MissingApiKey)?;
    let key = settings.openai_api_key.trim().to_string();
    if key.is_empty() {
        return Err(LlmError::MissingApiKey);
    }
    Ok(key)
}

fn build_payload(req: &CompletionRequest, stream: bool) -> Value {
    let mut payload = json!({
        "model": req.model,
        "instructions": req.instructions,
        "input": req.input,
    });
    if stream {
        payload["stream"] = json!(true);
    }
    if let Some(temperature) = req.temperature {
        payload["temperature"] = json!(temperature);
    }
    if req.format == OutputFormat::StructuredJson {
        let schema: Value = serde_json::from_str(RESPONSE_SCHEMA).unwrap_or(json!({}));
        payload["text"] = json!({
            "format": {
                "type": "json_schema",
                "name": "forebrain_response",
                "strict": true,
                "schema": schema,
            }
        });
    }
    payload
}

fn extract_output_text(value: &Value) -> Option<String> {
    for item in value.get("output")?.as_array()? {
        let Some(contents) = item.get("content").and_then(|c| c.as_array()) else {
            continue;
        };
        for c in contents {
            if c.get("type").and_then(|t| t.as_str()) == Some("output_text") {
                if let Some(text) = c.get("text").and_then(|t| t.as_str()) {
                    if !text.trim().is_empty() {
                        return Some(text.to_string());
                    }
                }
            }
        }
    }
    None
}

fn api_error_from_body(body: &str) -> LlmError {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(err) = value.get("error").filter(|e| !e.is_null()) {
            return structured_api_error(err);
        }
    }
    LlmError::Api(body.trim().to_string())
}

fn structured_api_error(err: &Value) -> LlmError {
    let code = err.get("code").and_then(|v| v.as_str()).unwrap_or("");
    if code == "insufficient_quota" {
        return LlmError::Quota;
    }
    let message = err.get("message").and_then(|v| v.as_str()).unwrap_or("");
    if !message.is_empty() {
        return LlmError::Api(message.to_string());
    }
    if !code.is_empty() {
        return LlmError::Api(code.to_string());
    }
    let typ = err.get("type").and_then(|v| v.as_str()).unwrap_or("");
    if !typ.is_empty() {
        return LlmError::Api(typ.to_string());
    }
    LlmError::Api("unknown error".to_string())
}

fn stream_error(value: &Value) -> Option<LlmError> {
    let err = value.get("error").filter(|e| !e.is_null())?;
    Some(structured_api_error(err))
}

/// Responses stream events carry the delta either as a bare string or as an
/// object with a `text` field, depending on the event type.
fn extract_stream_delta(value: &Value) -> Option<&str> {
    match value.get("delta")? {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => obj.get("text").and_then(|t| t.as_str()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn client_for(addr: std::net::SocketAddr) -> OpenAiClient {
        OpenAiClient {
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("client"),
            endpoint: format!("http://{addr}/v1/responses"),
            api_key: "sk-test".to_string(),
        }
    }

    fn serve_once(body: &'static str) -> (std::net::SocketAddr, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buf = vec![0_u8; 65536];
            let n = stream.read(&mut buf).expect("read request");
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
            request
        });
        (addr, handle)
    }

    fn plain_request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4.1".to_string(),
            instructions: "dev".to_string(),
            input: "user".to_string(),
            format: OutputFormat::PlainText,
            temperature: None,
        }
    }

    #[test]
    fn structured_payload_includes_schema_format() {
        let req = CompletionRequest {
            format: OutputFormat::StructuredJson,
            temperature: Some(0.2),
            ..plain_request()
        };
        let payload = build_payload(&req, false);
        assert_eq!(payload["text"]["format"]["type"], "json_schema");
        assert_eq!(payload["text"]["format"]["name"], "forebrain_response");
        assert_eq!(payload["text"]["format"]["strict"], true);
        assert_eq!(
            payload["text"]["format"]["schema"]["required"][4],
            "message"
        );
        assert_eq!(payload["temperature"], 0.2);
        assert!(payload.get("stream").is_none());
    }

    #[test]
    fn plain_payload_omits_format_block() {
        let payload = build_payload(&plain_request(), true);
        assert!(payload.get("text").is_none());
        assert_eq!(payload["stream"], true);
    }

    #[test]
    fn complete_extracts_first_output_text() {
        let (addr, server) = serve_once(
            r#"{"output":[{"type":"reasoning","content":[]},{"type":"message","content":[{"type":"output_text","text":"hello"}]}]}"#,
        );
        let client = client_for(addr);
        let text = client.complete(&plain_request()).expect("complete");
        assert_eq!(text, "hello");
        let request = server.join().expect("join");
        assert!(request.contains("POST /v1/responses"));
        assert!(request.contains("Bearer sk-test"));
    }

    #[test]
    fn quota_code_maps_to_quota_error() {
        let (addr, server) = serve_once(
            r#"{"output":[],"error":{"message":"billing","type":"x","code":"insufficient_quota"}}"#,
        );
        let client = client_for(addr);
        let err = client.complete(&plain_request()).unwrap_err();
        assert!(matches!(err, LlmError::Quota));
        server.join().expect("join");
    }

    #[test]
    fn empty_output_is_an_error() {
        let (addr, server) = serve_once(r#"{"output":[]}"#);
        let client = client_for(addr);
        let err = client.complete(&plain_request()).unwrap_err();
        assert!(matches!(err, LlmError::EmptyOutput));
        server.join().expect("join");
    }

    #[test]
    fn streaming_assembles_deltas_and_signals_done() {
        let body = concat!(
            "data: {\"delta\":\"hel\"}\n\n",
            "data: {\"delta\":{\"text\":\"lo\"}}\n\n",
            "data: not-json\n\n",
            "data: [DONE]\n\n",
        );
        let (addr, server) = serve_once(body);
        let client = client_for(addr);

        let events = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        let cb: StreamCallback = Arc::new(move |event| {
            sink.lock().expect("lock").push(event);
        });

        let text = client
            .complete_streaming(&plain_request(), cb)
            .expect("stream");
        assert_eq!(text, "hello");
        let events = events.lock().expect("lock");
        assert_eq!(
            *events,
            vec![
                StreamEvent::Delta("hel".to_string()),
                StreamEvent::Delta("lo".to_string()),
                StreamEvent::Done,
            ]
        );
        server.join().expect("join");
    }

    #[test]
    fn stream_error_event_aborts() {
        let body = "data: {\"error\":{\"message\":\"bad model\"}}\n\ndata: [DONE]\n\n";
        let (addr, server) = serve_once(body);
        let client = client_for(addr);
        let cb: StreamCallback = Arc::new(|_| {});
        let err = client
            .complete_streaming(&plain_request(), cb)
            .unwrap_err();
        assert!(matches!(err, LlmError::Api(msg) if msg == "bad model"));
        server.join().expect("join");
    }
}
