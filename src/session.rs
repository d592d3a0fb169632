use serde::Deserialize;

pub const UNKNOWN_SESSION: &str = "unknown_session";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Part {
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Content {
    pub role: Option<String>,
    pub parts: Option<Vec<Part>>,
}

impl Content {
    pub fn text(role: &str, text: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            parts: Some(vec![Part {
                text: Some(text.to_string()),
            }]),
        }
    }

    pub fn first_text(&self) -> Option<&str> {
        self.parts
            .as_deref()
            .and_then(|parts| parts.first())
            .and_then(|p| p.text.as_deref())
    }
}

/// One turn as produced by the agent runner. Every level may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Turn {
    pub content: Option<Content>,
    /// Seconds since the epoch, as reported by the runner.
    pub timestamp: Option<f64>,
}

impl Turn {
    pub fn new(content: Content) -> Self {
        Self {
            content: Some(content),
            timestamp: Some(now_epoch_secs()),
        }
    }

    pub fn role(&self) -> Option<&str> {
        self.content.as_ref().and_then(|c| c.role.as_deref())
    }

    pub fn text(&self) -> Option<&str> {
        self.content.as_ref().and_then(Content::first_text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Session {
    pub id: Option<String>,
    pub events: Vec<Turn>,
}

impl Session {
    pub fn new(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            events: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(UNKNOWN_SESSION)
    }
}

fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_without_content_has_no_role_or_text() {
        let turn = Turn::default();
        assert_eq!(turn.role(), None);
        assert_eq!(turn.text(), None);
    }

    #[test]
    fn empty_or_textless_parts_yield_no_text() {
        let empty = Turn {
            content: Some(Content {
                role: Some("model".into()),
                parts: Some(vec![]),
            }),
            timestamp: None,
        };
        assert_eq!(empty.role(), Some("model"));
        assert_eq!(empty.text(), None);

        let function_call = Turn {
            content: Some(Content {
                role: Some("model".into()),
                parts: Some(vec![Part { text: None }, Part { text: Some("later".into()) }]),
            }),
            timestamp: None,
        };
        assert_eq!(function_call.text(), None);
    }

    #[test]
    fn partial_json_turns_decode() {
        let turns: Vec<Turn> = serde_json::from_str(
            r#"[{}, {"content": {"role": "user"}}, {"content": {"parts": [{"text": "hi"}]}, "timestamp": 12.5}]"#,
        )
        .unwrap();
        assert_eq!(turns[0], Turn::default());
        assert_eq!(turns[1].role(), Some("user"));
        assert_eq!(turns[2].text(), Some("hi"));
        assert_eq!(turns[2].timestamp, Some(12.5));
    }

    #[test]
    fn session_id_falls_back_when_absent_or_empty() {
        assert_eq!(Session::default().session_id(), UNKNOWN_SESSION);
        assert_eq!(Session::new("").session_id(), UNKNOWN_SESSION);
        assert_eq!(Session::new("s1").session_id(), "s1");
    }
}
