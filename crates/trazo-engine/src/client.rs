use std::env;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use trazo_contracts::keyring::SharedKeyRing;

use crate::error::ApiError;

/// Environment override for the generation service base URL.
pub const API_BASE_ENV: &str = "TRAZO_API_BASE";

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Raw upstream reply before any protocol interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub body: String,
}

/// Sends one generation request with one credential and reports the raw
/// outcome. The retry protocol lives above this seam, so it can be driven
/// by a scripted transport in tests.
pub trait Transport: Send + Sync {
    fn dispatch(
        &self,
        model: &str,
        credential: &str,
        payload: &Value,
    ) -> Result<WireResponse, String>;
}

/// Production transport: blocking HTTP POST with the credential passed as
/// a query parameter, the way the upstream service expects it.
pub struct HttpTransport {
    api_base: String,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            api_base: env::var(API_BASE_ENV)
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn dispatch(
        &self,
        model: &str,
        credential: &str,
        payload: &Value,
    ) -> Result<WireResponse, String> {
        let endpoint = self.endpoint_for_model(model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", credential)])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(payload)
            .send()
            .map_err(|err| format!("request failed ({endpoint}): {err}"))?;
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        Ok(WireResponse { status, body })
    }
}

/// Client for the generation service, layering credential rotation over a
/// [`Transport`].
///
/// Per logical call: a 429 burns the current credential and rotates to the
/// next one, each credential is tried at most once, and any other failure
/// is fatal immediately. Rotation state persists across calls so a later
/// call starts from whichever credential last worked.
pub struct GenerativeClient<T: Transport> {
    transport: T,
    ring: SharedKeyRing,
}

impl<T: Transport> GenerativeClient<T> {
    pub fn new(transport: T, ring: SharedKeyRing) -> Self {
        Self { transport, ring }
    }

    pub fn ring(&self) -> &SharedKeyRing {
        &self.ring
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// One logical non-structured call. The reply text is reduced to its
    /// first embedded `<svg>...</svg>` block when one is present; text
    /// without markup passes through unchanged.
    pub fn call_text(&self, model: &str, prompt: &str) -> Result<String, ApiError> {
        let text = self.call(model, prompt, false)?;
        Ok(extract_vector_markup(&text))
    }

    /// One logical structured call: the reply is fence-stripped and parsed
    /// as JSON; a parse failure is fatal, never retried.
    pub fn call_structured(&self, model: &str, prompt: &str) -> Result<Value, ApiError> {
        let text = self.call(model, prompt, true)?;
        parse_structured_reply(&text)
    }

    fn call(&self, model: &str, prompt: &str, structured: bool) -> Result<String, ApiError> {
        let total = self.ring.count();
        if total == 0 {
            return Err(ApiError::NoCredentials);
        }
        let payload = build_payload(prompt, structured);
        let mut attempts = 0usize;
        loop {
            let credential = self.ring.current().ok_or(ApiError::NoCredentials)?;
            let response = self
                .transport
                .dispatch(model, &credential, &payload)
                .map_err(ApiError::Transport)?;
            if (200..300).contains(&response.status) {
                return extract_reply_text(&response.body);
            }
            if response.status == 429 {
                attempts += 1;
                if attempts >= total {
                    return Err(ApiError::AllCredentialsExhausted { attempts });
                }
                self.ring.rotate();
                continue;
            }
            return Err(ApiError::Upstream {
                status: response.status,
                body: response.body,
            });
        }
    }
}

fn build_payload(prompt: &str, structured: bool) -> Value {
    let mut payload = json!({
        "contents": [{ "parts": [{ "text": prompt }] }],
    });
    if structured {
        payload["generationConfig"] = json!({ "responseMimeType": "application/json" });
    }
    payload
}

/// Pulls the reply text out of the service envelope.
fn extract_reply_text(body: &str) -> Result<String, ApiError> {
    let envelope: Value = serde_json::from_str(body)
        .map_err(|err| ApiError::MalformedResponse(format!("invalid envelope: {err}")))?;
    envelope
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ApiError::MalformedResponse("envelope carries no reply text".to_string()))
}

/// Strips an optional surrounding code fence and parses the remainder.
fn parse_structured_reply(text: &str) -> Result<Value, ApiError> {
    let stripped = strip_code_fence(text);
    serde_json::from_str(stripped)
        .map_err(|err| ApiError::MalformedResponse(format!("structured parse failed: {err}")))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open
        .trim_start()
        .strip_suffix("```")
        .unwrap_or(without_open)
        .trim()
}

/// Tag-bounded scan for the first `<svg ...>...</svg>` block. Falls back
/// to the trimmed text when it already starts with the opening tag, and to
/// the raw text unchanged otherwise.
pub fn extract_vector_markup(text: &str) -> String {
    if let Some(start) = text.find("<svg") {
        if let Some(end) = text[start..].find("</svg>") {
            return text[start..start + end + "</svg>".len()].to_string();
        }
    }
    let trimmed = text.trim();
    if trimmed.starts_with("<svg") {
        return trimmed.to_string();
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::{json, Value};
    use trazo_contracts::keyring::SharedKeyRing;

    use super::{
        extract_vector_markup, GenerativeClient, Transport, WireResponse,
    };
    use crate::error::ApiError;

    /// Replays a fixed list of outcomes and records which credential each
    /// attempt used.
    struct ScriptedTransport {
        script: Mutex<Vec<Result<WireResponse, String>>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<WireResponse, String>>) -> Self {
            Self {
                script: Mutex::new(script),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn credentials_seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn dispatch(
            &self,
            _model: &str,
            credential: &str,
            _payload: &Value,
        ) -> Result<WireResponse, String> {
            self.seen.lock().unwrap().push(credential.to_string());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                panic!("transport called more often than scripted");
            }
            script.remove(0)
        }
    }

    fn ok_reply(text: &str) -> Result<WireResponse, String> {
        Ok(WireResponse {
            status: 200,
            body: json!({
                "candidates": [{ "content": { "parts": [{ "text": text }] } }]
            })
            .to_string(),
        })
    }

    fn rate_limited() -> Result<WireResponse, String> {
        Ok(WireResponse {
            status: 429,
            body: "quota".to_string(),
        })
    }

    fn client(
        script: Vec<Result<WireResponse, String>>,
        keys: &str,
    ) -> GenerativeClient<ScriptedTransport> {
        GenerativeClient::new(ScriptedTransport::new(script), SharedKeyRing::from_raw(keys))
    }

    #[test]
    fn empty_ring_fails_without_touching_the_transport() {
        let client = client(vec![], "");
        match client.call_text("m", "p") {
            Err(ApiError::NoCredentials) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(client.transport().credentials_seen().is_empty());
    }

    #[test]
    fn immediate_success_uses_one_credential() {
        let client = client(vec![ok_reply("hello")], "k1,k2,k3");
        assert_eq!(client.call_text("m", "p").unwrap(), "hello");
        assert_eq!(client.transport().credentials_seen(), ["k1"]);
    }

    #[test]
    fn rate_limits_rotate_until_one_credential_succeeds() {
        let client = client(
            vec![rate_limited(), rate_limited(), ok_reply("third time")],
            "k1,k2,k3",
        );
        assert_eq!(client.call_text("m", "p").unwrap(), "third time");
        assert_eq!(client.transport().credentials_seen(), ["k1", "k2", "k3"]);
    }

    #[test]
    fn sustained_rate_limiting_exhausts_after_exactly_credential_count_attempts() {
        let client = client(
            vec![rate_limited(), rate_limited(), rate_limited()],
            "k1,k2,k3",
        );
        match client.call_text("m", "p") {
            Err(ApiError::AllCredentialsExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // Each credential used at most once for the logical call.
        assert_eq!(client.transport().credentials_seen(), ["k1", "k2", "k3"]);
    }

    #[test]
    fn rotation_persists_into_the_next_call() {
        let client = client(
            vec![rate_limited(), ok_reply("first"), ok_reply("second")],
            "k1,k2",
        );
        client.call_text("m", "p").unwrap();
        client.call_text("m", "p").unwrap();
        assert_eq!(client.transport().credentials_seen(), ["k1", "k2", "k2"]);
    }

    #[test]
    fn non_rate_limit_status_is_fatal_without_rotation() {
        let client = client(
            vec![Ok(WireResponse {
                status: 403,
                body: "forbidden".to_string(),
            })],
            "k1,k2,k3",
        );
        match client.call_text("m", "p") {
            Err(ApiError::Upstream { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.transport().credentials_seen(), ["k1"]);
        assert_eq!(client.ring().current().as_deref(), Some("k1"));
    }

    #[test]
    fn transport_failure_is_fatal_without_rotation() {
        let client = client(vec![Err("connection refused".to_string())], "k1,k2");
        match client.call_text("m", "p") {
            Err(ApiError::Transport(message)) => assert!(message.contains("refused")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.ring().current().as_deref(), Some("k1"));
    }

    #[test]
    fn structured_reply_strips_code_fences() {
        let client = client(
            vec![ok_reply("```json\n{ \"objects\": [] }\n```")],
            "k1",
        );
        let value = client.call_structured("m", "p").unwrap();
        assert_eq!(value, json!({ "objects": [] }));
    }

    #[test]
    fn structured_parse_failure_is_fatal_not_retried() {
        let client = client(vec![ok_reply("this is not json")], "k1,k2");
        match client.call_structured("m", "p") {
            Err(ApiError::MalformedResponse(_)) => {}
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(client.transport().credentials_seen(), ["k1"]);
    }

    #[test]
    fn missing_envelope_text_is_malformed() {
        let client = client(
            vec![Ok(WireResponse {
                status: 200,
                body: json!({ "candidates": [] }).to_string(),
            })],
            "k1",
        );
        assert!(matches!(
            client.call_text("m", "p"),
            Err(ApiError::MalformedResponse(_))
        ));
    }

    #[test]
    fn structured_request_declares_its_mime_type() {
        let payload = super::build_payload("draw", true);
        assert_eq!(
            payload["generationConfig"]["responseMimeType"],
            json!("application/json")
        );
        assert_eq!(payload["contents"][0]["parts"][0]["text"], json!("draw"));
        let plain = super::build_payload("draw", false);
        assert!(plain.get("generationConfig").is_none());
    }

    #[test]
    fn vector_markup_is_scanned_out_of_chatter() {
        let text = "Here you go:\n<svg viewBox=\"0 0 10 10\"><rect/></svg>\nEnjoy!";
        assert_eq!(
            extract_vector_markup(text),
            "<svg viewBox=\"0 0 10 10\"><rect/></svg>"
        );
    }

    #[test]
    fn unterminated_markup_falls_back_to_trimmed_text() {
        let text = "  <svg viewBox=\"0 0 10 10\"><rect/>  ";
        assert_eq!(
            extract_vector_markup(text),
            "<svg viewBox=\"0 0 10 10\"><rect/>"
        );
    }

    #[test]
    fn text_without_markup_passes_through_unchanged() {
        assert_eq!(extract_vector_markup("plain answer"), "plain answer");
    }
}
