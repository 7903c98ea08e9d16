use super::{LlmError, TextGenerator};
use crate::config::LlmConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Request body for a non-streaming `/api/generate` call.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Response body (partial: only `response` is read).
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

/// Blocking client for an Ollama-style generate endpoint.
pub struct OllamaClient {
    agent: ureq::Agent,
    api_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Self {
        Self::with_timeout(
            &config.api_url,
            &config.model_name,
            Duration::from_secs(config.timeout_secs.max(1)),
        )
    }

    pub fn with_timeout(api_url: &str, model: &str, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self {
            agent,
            api_url: api_url.to_string(),
            model: model.to_string(),
        }
    }
}

impl TextGenerator for OllamaClient {
    fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };
        log::debug!("POST {} (model {})", self.api_url, self.model);

        let mut response = self
            .agent
            .post(&self.api_url)
            .send_json(&body)
            .map_err(|e| match e {
                ureq::Error::StatusCode(code) => LlmError::Status(code),
                other => LlmError::Transport(other.to_string()),
            })?;

        let parsed: GenerateResponse = response
            .body_mut()
            .read_json()
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        parsed
            .response
            .ok_or_else(|| LlmError::Parse("missing `response` field".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    /// Serve one canned HTTP response on a local port.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 8192];
                let _ = stream.read(&mut buf);
                let reply = format!(
                    "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        format!("http://{addr}/api/generate")
    }

    #[test]
    fn test_request_serialization() {
        let body = GenerateRequest { model: "qwen2.5", prompt: "Verdict?", stream: false };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({"model": "qwen2.5", "prompt": "Verdict?", "stream": false}));
    }

    #[test]
    fn test_response_deserialize() {
        let r: GenerateResponse =
            serde_json::from_str(r#"{"model":"qwen2.5","response":"Clean master.","done":true}"#).unwrap();
        assert_eq!(r.response.as_deref(), Some("Clean master."));
    }

    #[test]
    fn test_generate_reads_response_field() {
        let url = serve_once("HTTP/1.1 200 OK", r#"{"response":"Probably a transcode.","done":true}"#);
        let client = OllamaClient::with_timeout(&url, "qwen2.5", Duration::from_secs(5));
        assert_eq!(client.generate("x").unwrap(), "Probably a transcode.");
    }

    #[test]
    fn test_non_2xx_is_status_error() {
        let url = serve_once("HTTP/1.1 500 Internal Server Error", r#"{"error":"boom"}"#);
        let client = OllamaClient::with_timeout(&url, "qwen2.5", Duration::from_secs(5));
        assert!(matches!(client.generate("x"), Err(LlmError::Status(500))));
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        let url = serve_once("HTTP/1.1 200 OK", "not json");
        let client = OllamaClient::with_timeout(&url, "qwen2.5", Duration::from_secs(5));
        assert!(matches!(client.generate("x"), Err(LlmError::Parse(_))));
    }

    #[test]
    fn test_silent_endpoint_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/api/generate", listener.local_addr().unwrap());
        // Accept and hold the connection without answering
        let holder = std::thread::spawn(move || {
            let conn = listener.accept();
            std::thread::sleep(Duration::from_secs(3));
            drop(conn);
        });

        let client = OllamaClient::with_timeout(&url, "qwen2.5", Duration::from_millis(500));
        let started = Instant::now();
        let result = client.generate("x");
        assert!(matches!(result, Err(LlmError::Transport(_))), "got {result:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
        holder.join().unwrap();
    }
}
