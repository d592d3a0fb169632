use crate::cards::Card;
use crate::event_log::EventLog;
use crate::runner::{AgentRunner, RunnerEvent};
use crate::session::Content;
use crate::utils::truncate_chars;
use anyhow::Result;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const EXIT_WORDS: [&str; 2] = ["exit", "quit"];
const NO_FINAL_RESPONSE: &str = "(No final response)";
const PREVIEW_CHARS: usize = 200;
const MISSING_ROLE: &str = "None";

/// Per-session counters, owned by the loop that updates them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatStats {
    pub turns: usize,
    pub saved_events: usize,
    pub errors: usize,
}

fn is_exit(text: &str) -> bool {
    EXIT_WORDS.iter().any(|w| text.eq_ignore_ascii_case(w))
}

/// Reads user lines until EOF or an exit word. Per-turn failures are printed
/// inline and never end the loop.
pub async fn run_chat_loop<R, W>(
    runner: &dyn AgentRunner,
    log: &EventLog,
    session_id: &str,
    input: R,
    out: &mut W,
) -> Result<ChatStats>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut stats = ChatStats::default();
    let mut lines = input.lines();

    writeln!(out, "Interactive chat (type 'exit' or 'quit' to stop).")?;

    loop {
        write!(out, "\nYou: ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let user_text = line.trim();
        if is_exit(user_text) {
            writeln!(out, "Exiting chat.")?;
            break;
        }
        if user_text.is_empty() {
            continue;
        }
        stats.turns += 1;

        let response = match ask(runner, session_id, user_text).await {
            Ok(text) => text,
            Err(e) => {
                stats.errors += 1;
                warn!("Agent run failed: {:#}", e);
                writeln!(out, "[Error while running agent] {}", e)?;
                continue;
            }
        };

        match Card::detect(&response) {
            Some(card) => writeln!(out, "\nAgent:\n{}", card)?,
            None => writeln!(out, "\nAgent: {}", response)?,
        }

        let session = match runner.get_session(session_id).await {
            Ok(session) => session,
            Err(e) => {
                stats.errors += 1;
                warn!("Failed to fetch session {}: {:#}", session_id, e);
                writeln!(out, "[Error fetching session] {}", e)?;
                continue;
            }
        };

        match log.save_session(&session).await {
            Ok(0) => writeln!(out, "(No new events to save)")?,
            Ok(n) => {
                stats.saved_events += n;
                writeln!(
                    out,
                    "(Saved {} new event(s) to {})",
                    n,
                    log.path().display()
                )?;
            }
            Err(e) => {
                stats.errors += 1;
                warn!("Failed to save session {}: {}", session_id, e);
                writeln!(out, "[Error saving to DB] {}", e)?;
            }
        }
    }

    info!(
        "Chat ended: {} turn(s), {} event(s) saved, {} error(s)",
        stats.turns, stats.saved_events, stats.errors
    );
    Ok(stats)
}

/// Sends one message and drains the event stream, keeping the final text.
async fn ask(runner: &dyn AgentRunner, session_id: &str, text: &str) -> Result<String> {
    let (tx, mut rx) = mpsc::channel(64);

    let consume = async move {
        let mut final_text = None;
        while let Some(event) = rx.recv().await {
            match event {
                RunnerEvent::Final(text) => final_text = Some(text),
                RunnerEvent::Error(e) => debug!("Runner reported: {}", e),
                RunnerEvent::TextDelta(_) => {}
            }
        }
        final_text
    };

    let (result, final_text) = tokio::join!(
        runner.run(session_id, Content::text("user", text), tx),
        consume
    );
    result?;

    Ok(final_text.unwrap_or_else(|| NO_FINAL_RESPONSE.to_string()))
}

pub async fn print_saved_events<W: Write>(
    log: &EventLog,
    session_id: &str,
    out: &mut W,
) -> Result<()> {
    let events = log.session_events(session_id).await?;

    writeln!(out, "\nSaved session events (DB):")?;
    for event in &events {
        writeln!(
            out,
            "[{}] {}: {} (saved at {})",
            event.event_index,
            event.role.as_deref().unwrap_or(MISSING_ROLE),
            truncate_chars(event.text.as_deref().unwrap_or_default(), PREVIEW_CHARS),
            event.timestamp
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, Turn};
    use anyhow::bail;
    use async_trait::async_trait;
    use sea_orm::ConnectionTrait;
    use std::collections::HashMap;
    use tempfile::{TempDir, tempdir};
    use tokio::io::BufReader;
    use tokio::sync::Mutex;

    const TRIAGE_JSON: &str = r#"{"patient_details": {"name": "Ravi"}, "possible_conditions": [],
        "final_recommendation": {"urgency": "high"}}"#;

    /// Echoes user text back. A few magic inputs exercise failure paths.
    #[derive(Default)]
    struct EchoRunner {
        sessions: Mutex<HashMap<String, Session>>,
    }

    #[async_trait]
    impl AgentRunner for EchoRunner {
        async fn create_session(&self, session_id: &str) -> Result<()> {
            self.sessions
                .lock()
                .await
                .entry(session_id.to_string())
                .or_insert_with(|| Session::new(session_id));
            Ok(())
        }

        async fn run(
            &self,
            session_id: &str,
            message: Content,
            tx: mpsc::Sender<RunnerEvent>,
        ) -> Result<()> {
            let text = message.first_text().unwrap_or_default().to_string();
            match text.as_str() {
                "fail" => bail!("model unavailable"),
                "mute" => return Ok(()),
                _ => {}
            }

            let reply = if text == "report" {
                TRIAGE_JSON.to_string()
            } else {
                format!("echo: {}", text)
            };

            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| Session::new(session_id));
            session.events.push(Turn::new(message));
            session
                .events
                .push(Turn::new(Content::text("assistant", &reply)));
            drop(sessions);

            tx.send(RunnerEvent::TextDelta(reply.clone())).await?;
            tx.send(RunnerEvent::Final(reply)).await?;
            Ok(())
        }

        async fn get_session(&self, session_id: &str) -> Result<Session> {
            if session_id == "lost" {
                bail!("session store offline");
            }
            Ok(self
                .sessions
                .lock()
                .await
                .get(session_id)
                .cloned()
                .unwrap_or_else(|| Session::new(session_id)))
        }
    }

    async fn open_log() -> (TempDir, EventLog) {
        let dir = tempdir().unwrap();
        let log = EventLog::open(&dir.path().join("chat.db")).await.unwrap();
        (dir, log)
    }

    async fn chat(
        runner: &EchoRunner,
        log: &EventLog,
        session_id: &str,
        input: &str,
    ) -> (ChatStats, String) {
        let mut out = Vec::new();
        let stats = run_chat_loop(
            runner,
            log,
            session_id,
            BufReader::new(input.as_bytes()),
            &mut out,
        )
        .await
        .unwrap();
        (stats, String::from_utf8(out).unwrap())
    }

    #[test]
    fn exit_words_are_case_insensitive() {
        assert!(is_exit("exit"));
        assert!(is_exit("QUIT"));
        assert!(is_exit("Exit"));
        assert!(!is_exit("exiting"));
        assert!(!is_exit(""));
    }

    #[tokio::test]
    async fn conversation_is_delta_written_each_turn() {
        let (_dir, log) = open_log().await;
        let runner = EchoRunner::default();

        let (stats, out) = chat(&runner, &log, "s1", "hi\n\n  hello  \nQuit\nnever read\n").await;

        assert_eq!(
            stats,
            ChatStats {
                turns: 2,
                saved_events: 4,
                errors: 0
            }
        );
        assert!(out.contains("Agent: echo: hi"));
        assert!(out.contains("Agent: echo: hello"));
        assert_eq!(out.matches("(Saved 2 new event(s) to ").count(), 2);
        assert!(out.contains("Exiting chat."));
        assert!(!out.contains("never read"));

        let events = log.session_events("s1").await.unwrap();
        let texts: Vec<_> = events.iter().map(|e| e.text.as_deref()).collect();
        assert_eq!(
            texts,
            vec![Some("hi"), Some("echo: hi"), Some("hello"), Some("echo: hello")]
        );
    }

    #[tokio::test]
    async fn runner_failure_is_reported_and_the_loop_continues() {
        let (_dir, log) = open_log().await;
        let runner = EchoRunner::default();

        let (stats, out) = chat(&runner, &log, "s1", "fail\nhi\n").await;

        assert!(out.contains("[Error while running agent] model unavailable"));
        assert!(out.contains("Agent: echo: hi"));
        assert_eq!(stats.errors, 1);
        assert_eq!(log.max_saved_index("s1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_final_response_saves_nothing_new() {
        let (_dir, log) = open_log().await;
        let runner = EchoRunner::default();

        let (_, out) = chat(&runner, &log, "s1", "mute\n").await;

        assert!(out.contains("Agent: (No final response)"));
        assert!(out.contains("(No new events to save)"));
    }

    #[tokio::test]
    async fn fetch_failure_skips_the_write() {
        let (_dir, log) = open_log().await;
        let runner = EchoRunner::default();

        let (stats, out) = chat(&runner, &log, "lost", "hi\nexit\n").await;

        assert!(out.contains("[Error fetching session] session store offline"));
        assert_eq!(stats.errors, 1);
        assert_eq!(log.max_saved_index("lost").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn save_failure_is_reported_and_the_loop_continues() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat.db");
        let log = EventLog::open(&path).await.unwrap();
        let runner = EchoRunner::default();

        let db_url = format!("sqlite:{}?mode=rwc", path.display());
        let db = sea_orm::Database::connect(&db_url).unwrap();
        db.execute_unprepared("DROP TABLE messages").unwrap();
        drop(db);

        let (stats, out) = chat(&runner, &log, "s1", "hi\nhello\nexit\n").await;

        assert_eq!(out.matches("[Error saving to DB] ").count(), 2);
        assert!(out.contains("Agent: echo: hi"));
        assert!(out.contains("Agent: echo: hello"));
        assert!(out.contains("Exiting chat."));
        assert_eq!(
            stats,
            ChatStats {
                turns: 2,
                saved_events: 0,
                errors: 2
            }
        );
    }

    #[tokio::test]
    async fn structured_replies_render_as_cards() {
        let (_dir, log) = open_log().await;
        let runner = EchoRunner::default();

        let (_, out) = chat(&runner, &log, "s1", "report\n").await;

        assert!(out.contains("== Triage Report =="));
        assert!(out.contains("Patient: Ravi"));
        assert!(out.contains("Urgency: high"));
    }

    #[tokio::test]
    async fn saved_events_dump_truncates_long_text() {
        let (_dir, log) = open_log().await;
        let long = "a".repeat(250);
        let session = Session {
            id: Some("s1".into()),
            events: vec![Turn::new(Content::text("user", &long)), Turn::default()],
        };
        log.save_session(&session).await.unwrap();

        let mut out = Vec::new();
        print_saved_events(&log, "s1", &mut out).await.unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains(&format!("[0] user: {} (saved at ", "a".repeat(200))));
        assert!(!out.contains(&"a".repeat(201)));
        assert!(out.contains("[1] None:  (saved at "));
    }
}
