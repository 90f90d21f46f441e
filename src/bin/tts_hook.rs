//! tts-hook: Claude Code hook binary for spoken notifications.
//!
//! Reads event JSON from stdin and forwards it to the code-speaker API.
//! Logs all events to ~/.tts-hook-history/YYYY-MM-DD.jsonl.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_API: &str = "http://127.0.0.1:20202";

// --- Event JSON from Claude Code ---

#[derive(Deserialize)]
#[allow(clippy::struct_field_names)]
struct HookEvent {
    hook_event_name: Option<String>,
    source: Option<String>,
    transcript_path: Option<String>,
    tool_name: Option<String>,
    tool_input: Option<Value>,
    notification_type: Option<String>,
}

// --- History record ---

#[derive(Serialize)]
struct HistoryRecord {
    timestamp: String,
    event: String,
    action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_chars: Option<usize>,
    duration_ms: u64,
    api_up: bool,
}

/// What the hook did, for the history record.
struct Outcome {
    action: &'static str,
    detail: Option<String>,
    text: Option<String>,
}

impl Outcome {
    fn skipped(detail: impl Into<String>) -> Self {
        Self {
            action: "skipped",
            detail: Some(detail.into()),
            text: None,
        }
    }
}

fn api_base() -> String {
    std::env::var("CODE_SPEAKER_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API.to_string())
        .trim_end_matches('/')
        .to_string()
}

fn history_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tts-hook-history")
}

fn save_record(record: &HistoryRecord) {
    let dir = history_dir();
    let _ = fs::create_dir_all(&dir);

    // Date from timestamp (first 10 chars: YYYY-MM-DD)
    let date = &record.timestamp[..10];
    let path = dir.join(format!("{date}.jsonl"));

    if let Ok(json) = serde_json::to_string(record) {
        if let Ok(mut file) = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            let _ = writeln!(file, "{json}");
        }
    }
}

fn now_timestamp() -> String {
    chrono::Local::now()
        .format("%Y-%m-%dT%H:%M:%S%.3f")
        .to_string()
}

fn elapsed_ms(t0: Instant) -> u64 {
    u64::try_from(t0.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let t0 = Instant::now();

    // Read stdin
    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        return;
    }

    // Parse event
    let event: HookEvent = match serde_json::from_str(&input) {
        Ok(e) => e,
        Err(_) => return,
    };

    let Some(event_name) = event.hook_event_name.clone() else {
        return;
    };

    let api = api_base();

    // Build HTTP client with short timeouts
    let client = Client::builder()
        .connect_timeout(Duration::from_millis(300))
        .timeout(Duration::from_secs(3))
        .build()
        .unwrap_or_else(|_| Client::new());

    // Quick connectivity check; exit cleanly if the server is down
    let api_up = client
        .get(format!("{api}/health"))
        .send()
        .await
        .is_ok_and(|r| r.status().is_success());

    if !api_up {
        save_record(&HistoryRecord {
            timestamp: now_timestamp(),
            event: event_name,
            action: "skipped".into(),
            detail: Some("API unreachable".into()),
            text: None,
            text_chars: None,
            duration_ms: elapsed_ms(t0),
            api_up: false,
        });
        return;
    }

    let hook = Hook { client, api };
    let outcome = match event_name.as_str() {
        "SessionStart" => hook.session_start(&event).await,
        "Stop" => hook.stop(&event).await,
        "PermissionRequest" => hook.permission(&event).await,
        "Notification" => hook.notification(&event).await,
        "UserPromptSubmit" => hook.user_prompt_submit().await,
        _ => Outcome {
            action: "ignored",
            detail: Some("unknown event".into()),
            text: None,
        },
    };

    let text_chars = outcome.text.as_ref().map(|t| t.chars().count());
    save_record(&HistoryRecord {
        timestamp: now_timestamp(),
        event: event_name,
        action: outcome.action.into(),
        detail: outcome.detail,
        text: outcome.text,
        text_chars,
        duration_ms: elapsed_ms(t0),
        api_up: true,
    });
}

struct Hook {
    client: Client,
    api: String,
}

impl Hook {
    /// POST `body` to `path`; `Err` carries a short reason for the history.
    async fn post(&self, path: &str, body: &Value) -> Result<Value, String> {
        let resp = self
            .client
            .post(format!("{}{path}", self.api))
            .json(body)
            .send()
            .await
            .map_err(|e| format!("{path} request failed: {e}"))?;
        let status = resp.status();
        let json: Value = resp.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            Ok(json)
        } else {
            let detail = json.get("detail").and_then(Value::as_str).unwrap_or("");
            Err(format!("{path} returned {status}: {detail}"))
        }
    }

    async fn speak(&self, text: &str) -> Outcome {
        match self.post("/speak", &json!({ "text": text })).await {
            Ok(_) => Outcome {
                action: "queued",
                detail: None,
                text: Some(text.into()),
            },
            Err(e) => Outcome::skipped(e),
        }
    }

    async fn session_start(&self, event: &HookEvent) -> Outcome {
        // Skip resume and compaction restarts
        if let Some(source) = event.source.as_deref() {
            if source == "resume" || source == "compact" {
                return Outcome::skipped(format!("source={source}"));
            }
        }
        self.speak("Claude Code is ready.").await
    }

    async fn stop(&self, event: &HookEvent) -> Outcome {
        let transcript_path = match event.transcript_path.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => return Outcome::skipped("no transcript path"),
        };
        let transcript = match fs::read_to_string(transcript_path) {
            Ok(t) => t,
            Err(e) => return Outcome::skipped(format!("failed to read transcript: {e}")),
        };

        match self
            .post("/summarize", &json!({ "transcript_content": transcript }))
            .await
        {
            Ok(_) => Outcome {
                action: "queued",
                detail: Some(format!("{} transcript chars", transcript.chars().count())),
                text: None,
            },
            Err(e) => Outcome::skipped(e),
        }
    }

    async fn permission(&self, event: &HookEvent) -> Outcome {
        let tool = event.tool_name.as_deref().unwrap_or("unknown tool");
        let tool_input = match &event.tool_input {
            Some(Value::Object(map)) => Value::Object(map.clone()),
            _ => json!({}),
        };

        match self
            .post("/permission", &json!({ "tool_name": tool, "tool_input": tool_input }))
            .await
        {
            Ok(_) => Outcome {
                action: "queued",
                detail: Some(tool.into()),
                text: None,
            },
            Err(e) => Outcome::skipped(e),
        }
    }

    async fn notification(&self, event: &HookEvent) -> Outcome {
        let text = match event.notification_type.as_deref() {
            Some("idle_prompt") => "Claude is waiting for your input.",
            Some("permission_prompt") => "Permission needed.",
            Some(other) => return Outcome::skipped(format!("unknown notification: {other}")),
            None => return Outcome::skipped("no notification_type"),
        };
        let mut outcome = self.speak(text).await;
        if outcome.detail.is_none() {
            outcome.detail = event.notification_type.clone();
        }
        outcome
    }

    /// The user is back: whatever is queued or playing is stale.
    async fn user_prompt_submit(&self) -> Outcome {
        let skipped = self.post("/queue/skip", &json!({})).await;
        let cleared = self.post("/queue/clear", &json!({})).await;

        let skipped = skipped
            .ok()
            .and_then(|v| v.get("skipped").and_then(Value::as_bool))
            .unwrap_or(false);
        let cleared = cleared
            .ok()
            .and_then(|v| v.get("cleared").and_then(Value::as_u64))
            .unwrap_or(0);

        Outcome {
            action: "silenced",
            detail: Some(format!("skipped={skipped} cleared={cleared}")),
            text: None,
        }
    }
}
