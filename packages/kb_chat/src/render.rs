//! Plain-text rendering of the panes.
//!
//! Streaming output is line based: every complete line of a pane's answer is
//! printed as soon as it arrives, tagged with the pane. When a pane has been
//! quiet for the flush interval its trailing partial line, sources and
//! metrics follow.

use std::collections::HashMap;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use stream_session::protocol::UNSCORED;
use stream_session::{Answer, MessageEntry, SessionId, SessionRegistry, Source, StreamingSession};

/// `[2 granite]`, or `[2]` when the pane has no model.
pub fn pane_label(position: usize, model: &str) -> String {
    if model.is_empty() {
        format!("[{}]", position + 1)
    } else {
        format!("[{} {}]", position + 1, model)
    }
}

fn format_score(score: f64) -> String {
    if score >= UNSCORED {
        "unscored".to_string()
    } else {
        format!("{score:.2}")
    }
}

fn format_sources(sources: &[&Source]) -> String {
    sources
        .iter()
        .map(|s| format!("{} ({})", s.identity, format_score(s.score)))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Default)]
struct Cursor {
    /// Bytes of the in-flight answer already printed.
    printed: usize,
    last_activity: Option<Instant>,
    pending: bool,
}

pub struct Renderer<W> {
    out: W,
    flush_interval: Duration,
    cursors: HashMap<SessionId, Cursor>,
}

impl<W: Write> Renderer<W> {
    pub fn new(out: W, flush_interval: Duration) -> Self {
        Self {
            out,
            flush_interval,
            cursors: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    /// The session's in-flight answer was replaced; start printing it afresh.
    pub fn begin_turn(&mut self, id: SessionId) {
        self.cursors.insert(id, Cursor::default());
    }

    pub fn forget(&mut self, id: SessionId) {
        self.cursors.remove(&id);
    }

    /// Free-form line, not tied to a pane.
    pub fn line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }

    /// A locally generated answer shown in one pane, such as the greeting.
    pub fn pane_message(&mut self, position: usize, model: &str, text: &str) -> io::Result<()> {
        let label = pane_label(position, model);
        for line in text.lines() {
            writeln!(self.out, "{label} {line}")?;
        }
        self.out.flush()
    }

    /// Print the complete lines that arrived since the last call.
    pub fn stream(
        &mut self,
        position: usize,
        session: &StreamingSession,
        now: Instant,
    ) -> io::Result<()> {
        let text = session.answer().text();
        let cursor = self.cursors.entry(session.id()).or_default();
        let fresh = match text.get(cursor.printed..) {
            Some(fresh) => fresh,
            None => {
                cursor.printed = 0;
                text.as_str()
            }
        };

        if let Some(end) = fresh.rfind('\n') {
            let label = pane_label(position, session.model());
            for line in fresh[..end].split('\n') {
                writeln!(self.out, "{label} {line}")?;
            }
            cursor.printed += end + 1;
        }
        cursor.last_activity = Some(now);
        cursor.pending = true;
        self.out.flush()
    }

    /// Finish every pane that has been quiet for the flush interval.
    pub fn flush_quiet(&mut self, registry: &SessionRegistry, now: Instant) -> io::Result<()> {
        for (position, session) in registry.iter().enumerate() {
            let Some(cursor) = self.cursors.get_mut(&session.id()) else {
                continue;
            };
            let quiet = cursor
                .last_activity
                .is_some_and(|at| now.saturating_duration_since(at) >= self.flush_interval);
            if !cursor.pending || !quiet {
                continue;
            }

            let label = pane_label(position, session.model());
            let text = session.answer().text();
            if let Some(rest) = text.get(cursor.printed..) {
                if !rest.is_empty() {
                    writeln!(self.out, "{label} {rest}")?;
                }
            }
            cursor.printed = text.len();
            cursor.pending = false;

            let sources = session.answer().sources_by_score();
            if !sources.is_empty() {
                writeln!(self.out, "{label} sources: {}", format_sources(&sources))?;
            }
            if let Some(summary) = session.metrics().snapshot().summary() {
                writeln!(self.out, "{label} {summary}")?;
            }
        }
        self.out.flush()
    }

    /// Full transcript of one pane.
    pub fn transcript(&mut self, position: usize, session: &StreamingSession) -> io::Result<()> {
        let label = pane_label(position, session.model());
        writeln!(self.out, "=== {label} {} ===", session.state())?;
        for entry in session.history() {
            match entry {
                MessageEntry::Query(query) => {
                    let at = query.timestamp.with_timezone(&chrono::Local);
                    writeln!(self.out, "you ({}): {}", at.format("%H:%M:%S"), query.content)?;
                }
                MessageEntry::Answer(answer) => self.write_answer("bot", answer)?,
            }
        }
        if !session.answer().is_empty() {
            self.write_answer("bot (in progress)", session.answer())?;
        }
        if let Some(notice) = session.notice() {
            writeln!(self.out, "note: {}", notice.text())?;
        }
        if let Some(summary) = session.metrics().snapshot().summary() {
            writeln!(self.out, "metrics: {summary}")?;
        }
        self.out.flush()
    }

    fn write_answer(&mut self, who: &str, answer: &Answer) -> io::Result<()> {
        writeln!(self.out, "{who}: {}", answer.text())?;
        let sources = answer.sources_by_score();
        if !sources.is_empty() {
            writeln!(self.out, "  sources: {}", format_sources(&sources))?;
        }
        Ok(())
    }
}
