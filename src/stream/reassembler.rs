//! Incremental separation of visible content from reasoning.

use std::fmt::Display;
use std::time::Duration;

use serde::Serialize;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::chunk::StreamChunk;
use super::markers::{CLOSE, OPEN, normalize_markers, partial_marker_start};
use crate::telemetry;
use crate::{Result, TollgateError};

/// Final buffers of a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reassembled {
    pub content: String,
    pub reasoning: String,
}

/// Text appended to each buffer by a single fragment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FragmentDelta {
    pub content: String,
    pub reasoning: String,
}

impl FragmentDelta {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty()
    }

    fn append(&mut self, other: FragmentDelta) {
        self.content.push_str(&other.content);
        self.reasoning.push_str(&other.reasoning);
    }
}

/// An error observed while a stream was being reassembled.
///
/// The buffer snapshots are copied when the error is recorded, so the
/// record stays meaningful after the reassembler is reset or dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamErrorRecord {
    pub message: String,
    pub context: String,
    /// Unix epoch milliseconds.
    pub timestamp_ms: i64,
    pub content_snapshot: String,
    pub reasoning_snapshot: String,
    pub fragment_count: u64,
    pub in_reasoning: bool,
}

/// Handle for a callback registered with [`StreamReassembler::register_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeoutId(u64);

/// Mutable per-stream state.
#[derive(Debug, Default)]
struct StreamState {
    content: String,
    reasoning: String,
    in_reasoning: bool,
    fragment_count: u64,
    /// Trailing text that may be the start of a marker split across fragments.
    carryover: String,
    errors: Vec<StreamErrorRecord>,
}

/// Splits a live response into visible content and reasoning.
///
/// Owned by exactly one in-flight stream. A fresh reassembler is active;
/// [`finish`](Self::finish) and [`cleanup`](Self::cleanup) deactivate it
/// and [`reset`](Self::reset) must be called before it is fed again.
///
/// ```rust
/// # use tollgate::StreamReassembler;
/// let mut r = StreamReassembler::new();
/// r.feed("<thi").unwrap();
/// r.feed("nking>hello</thinking>world").unwrap();
/// let out = r.finish();
/// assert_eq!(out.content, "world");
/// assert_eq!(out.reasoning, "hello");
/// ```
#[derive(Debug)]
pub struct StreamReassembler {
    state: StreamState,
    active: bool,
    timeouts: Vec<(TimeoutId, AbortHandle)>,
    next_timeout: u64,
}

impl Default for StreamReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamReassembler {
    /// Create an empty, active reassembler.
    pub fn new() -> Self {
        Self {
            state: StreamState::default(),
            active: true,
            timeouts: Vec::new(),
            next_timeout: 0,
        }
    }

    /// Clear buffers, flags and errors, cancel registered timeouts and
    /// mark the reassembler active.
    pub fn reset(&mut self) {
        self.cancel_timeouts();
        self.state = StreamState::default();
        self.active = true;
        debug!("stream reassembler reset");
    }

    /// Classify one fragment.
    pub fn feed(&mut self, fragment: &str) -> Result<()> {
        self.feed_delta(fragment).map(|_| ())
    }

    /// Classify one fragment and return what it added to each buffer.
    pub fn feed_delta(&mut self, fragment: &str) -> Result<FragmentDelta> {
        self.ensure_active()?;
        self.state.fragment_count += 1;
        Ok(self.ingest(fragment))
    }

    /// Feed a provider chunk whose fields were already resolved.
    ///
    /// Reasoning carried in a dedicated field goes straight to the
    /// reasoning buffer; content still goes through marker classification.
    pub fn feed_chunk(&mut self, chunk: &StreamChunk) -> Result<FragmentDelta> {
        self.ensure_active()?;
        self.state.fragment_count += 1;
        let mut delta = FragmentDelta::default();
        if let Some(reasoning) = chunk.reasoning.as_deref() {
            self.state.reasoning.push_str(reasoning);
            delta.reasoning.push_str(reasoning);
        }
        if let Some(content) = chunk.content.as_deref() {
            delta.append(self.ingest(content));
        }
        Ok(delta)
    }

    /// End the stream and return both buffers.
    ///
    /// Held-back partial marker text is flushed as literal text. An
    /// unterminated reasoning span is not an error: everything after its
    /// opening marker stays reasoning.
    pub fn finish(&mut self) -> Reassembled {
        self.flush_carryover();
        self.cancel_timeouts();
        self.active = false;
        debug!(
            fragments = self.state.fragment_count,
            content_len = self.state.content.len(),
            reasoning_len = self.state.reasoning.len(),
            unterminated = self.state.in_reasoning,
            "stream finished"
        );
        Reassembled {
            content: self.state.content.clone(),
            reasoning: self.state.reasoning.clone(),
        }
    }

    /// Record a failure together with a snapshot of the buffers.
    pub fn record_error(&mut self, error: impl Display, context: impl Into<String>) {
        let record = StreamErrorRecord {
            message: error.to_string(),
            context: context.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            content_snapshot: self.state.content.clone(),
            reasoning_snapshot: self.state.reasoning.clone(),
            fragment_count: self.state.fragment_count,
            in_reasoning: self.state.in_reasoning,
        };
        metrics::counter!(telemetry::STREAM_ERRORS_TOTAL).increment(1);
        warn!(
            context = %record.context,
            error = %record.message,
            fragments = record.fragment_count,
            "stream error recorded"
        );
        self.state.errors.push(record);
    }

    /// Human-readable summary of recorded errors.
    pub fn error_summary(&self) -> String {
        summarize_errors(&self.state.errors)
    }

    pub fn errors(&self) -> &[StreamErrorRecord] {
        &self.state.errors
    }

    /// Move the recorded errors out of the reassembler.
    pub fn take_errors(&mut self) -> Vec<StreamErrorRecord> {
        std::mem::take(&mut self.state.errors)
    }

    /// Run `callback` after `delay` unless the stream is cleaned up,
    /// finished or reset first. Must be called within a tokio runtime.
    pub fn register_timeout<F>(&mut self, delay: Duration, callback: F) -> TimeoutId
    where
        F: FnOnce() + Send + 'static,
    {
        self.timeouts.retain(|(_, handle)| !handle.is_finished());
        let id = TimeoutId(self.next_timeout);
        self.next_timeout += 1;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
        self.timeouts.push((id, task.abort_handle()));
        id
    }

    /// Cancel one registered timeout. Returns false if it was unknown.
    pub fn cancel_timeout(&mut self, id: TimeoutId) -> bool {
        match self.timeouts.iter().position(|(t, _)| *t == id) {
            Some(pos) => {
                let (_, handle) = self.timeouts.swap_remove(pos);
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Timeouts registered and not yet fired or cancelled.
    pub fn pending_timeouts(&self) -> usize {
        self.timeouts
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Tear down scheduled work (e.g. on client disconnect) and deactivate.
    ///
    /// Buffers and errors are kept so they can still be read.
    pub fn cleanup(&mut self) {
        self.cancel_timeouts();
        self.active = false;
    }

    pub fn content(&self) -> &str {
        &self.state.content
    }

    pub fn reasoning(&self) -> &str {
        &self.state.reasoning
    }

    pub fn in_reasoning(&self) -> bool {
        self.state.in_reasoning
    }

    pub fn fragment_count(&self) -> u64 {
        self.state.fragment_count
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Classify held-back text as literal and return what it added.
    pub(crate) fn flush_carryover(&mut self) -> FragmentDelta {
        let held = std::mem::take(&mut self.state.carryover);
        self.classify(&held)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(TollgateError::StreamInactive)
        }
    }

    fn ingest(&mut self, fragment: &str) -> FragmentDelta {
        let mut pending = std::mem::take(&mut self.state.carryover);
        pending.push_str(fragment);

        let ready = partial_marker_start(&pending).unwrap_or(pending.len());
        self.state.carryover = pending.split_off(ready);

        let normalized = normalize_markers(&pending);
        self.classify(&normalized)
    }

    fn classify(&mut self, text: &str) -> FragmentDelta {
        let mut delta = FragmentDelta::default();
        let mut rest = text;
        while let Some(c) = rest.chars().next() {
            if let Some(after) = rest.strip_prefix(OPEN) {
                self.state.in_reasoning = true;
                rest = after;
                continue;
            }
            if let Some(after) = rest.strip_prefix(CLOSE) {
                self.state.in_reasoning = false;
                rest = after;
                continue;
            }
            if self.state.in_reasoning {
                delta.reasoning.push(c);
            } else {
                delta.content.push(c);
            }
            rest = &rest[c.len_utf8()..];
        }
        self.state.content.push_str(&delta.content);
        self.state.reasoning.push_str(&delta.reasoning);
        delta
    }

    fn cancel_timeouts(&mut self) {
        for (_, handle) in self.timeouts.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for StreamReassembler {
    fn drop(&mut self) {
        self.cancel_timeouts();
    }
}

/// Render error records as one line each, oldest first.
pub fn summarize_errors(errors: &[StreamErrorRecord]) -> String {
    if errors.is_empty() {
        return "no stream errors".to_owned();
    }
    let mut out = format!("{} stream error(s)", errors.len());
    for (i, e) in errors.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] {}: {} (after {} fragment(s); content {} chars, reasoning {} chars{})",
            i + 1,
            e.context,
            e.message,
            e.fragment_count,
            e.content_snapshot.chars().count(),
            e.reasoning_snapshot.chars().count(),
            if e.in_reasoning { ", inside reasoning" } else { "" },
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn run(fragments: &[&str]) -> Reassembled {
        let mut r = StreamReassembler::new();
        for f in fragments {
            r.feed(f).unwrap();
        }
        r.finish()
    }

    #[test]
    fn plain_text_is_content() {
        let out = run(&["hello ", "world"]);
        assert_eq!(out.content, "hello world");
        assert_eq!(out.reasoning, "");
    }

    #[test]
    fn marker_split_across_fragments() {
        let out = run(&["<thi", "nking>hello</thinking>world"]);
        assert_eq!(out.content, "world");
        assert_eq!(out.reasoning, "hello");
    }

    #[test]
    fn close_marker_split_across_fragments() {
        let out = run(&["<thinking>abc</thi", "nking>def"]);
        assert_eq!(out.reasoning, "abc");
        assert_eq!(out.content, "def");
    }

    #[test]
    fn marker_split_one_char_at_a_time() {
        let text = "pre<thinking>deep</thinking>post";
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let refs: Vec<&str> = chars.iter().map(String::as_str).collect();
        let out = run(&refs);
        assert_eq!(out.content, "prepost");
        assert_eq!(out.reasoning, "deep");
    }

    #[test]
    fn variant_split_across_fragments() {
        let out = run(&["a[THINK", "ING]b[/THIN", "KING]c"]);
        assert_eq!(out.content, "ac");
        assert_eq!(out.reasoning, "b");

        let out = run(&["<|begin_of_", "thought|>x<|end_of_thought|>y"]);
        assert_eq!(out.content, "y");
        assert_eq!(out.reasoning, "x");
    }

    #[test]
    fn unterminated_reasoning_swallows_rest() {
        let out = run(&["visible<think>", "still thinking", " and more"]);
        assert_eq!(out.content, "visible");
        assert_eq!(out.reasoning, "still thinking and more");
    }

    #[test]
    fn dangling_partial_marker_is_flushed_as_text() {
        let out = run(&["a < b", " and c <thi"]);
        assert_eq!(out.content, "a < b and c <thi");
        assert_eq!(out.reasoning, "");
    }

    #[test]
    fn false_start_is_released_on_next_fragment() {
        let mut r = StreamReassembler::new();
        let d1 = r.feed_delta("x <").unwrap();
        assert_eq!(d1.content, "x ");
        let d2 = r.feed_delta("= y").unwrap();
        assert_eq!(d2.content, "<= y");
        assert_eq!(r.content(), "x <= y");
    }

    #[test]
    fn every_char_lands_in_exactly_one_buffer() {
        let out = run(&["ab<think>cd</think>ef", "<thinking>gh", "</thinking>ij"]);
        let total = out.content.len() + out.reasoning.len();
        assert_eq!(total, "abcdefghij".len());
        assert_eq!(out.content, "abefij");
        assert_eq!(out.reasoning, "cdgh");
    }

    #[test]
    fn multibyte_text_is_preserved() {
        let out = run(&["héllo <thi", "nking>日本</thinking>wörld"]);
        assert_eq!(out.content, "héllo wörld");
        assert_eq!(out.reasoning, "日本");
    }

    #[test]
    fn feeding_after_finish_requires_reset() {
        let mut r = StreamReassembler::new();
        r.feed("a").unwrap();
        r.finish();
        assert!(matches!(r.feed("b"), Err(TollgateError::StreamInactive)));
        r.reset();
        r.feed("b").unwrap();
        assert_eq!(r.finish().content, "b");
    }

    #[test]
    fn reset_prevents_leaks_between_streams() {
        let mut r = StreamReassembler::new();
        r.feed("old<thinking>secret <thi").unwrap();
        r.record_error("boom", "first stream");
        r.reset();
        assert_eq!(r.fragment_count(), 0);
        assert!(!r.in_reasoning());
        assert!(r.errors().is_empty());
        r.feed("nking>new").unwrap();
        let out = r.finish();
        assert_eq!(out.content, "nking>new");
        assert_eq!(out.reasoning, "");
    }

    #[test]
    fn error_snapshot_is_taken_eagerly() {
        let mut r = StreamReassembler::new();
        r.feed("partial <think>because").unwrap();
        r.record_error("connection reset", "upstream read");
        let records = r.take_errors();
        r.reset();
        r.feed("something else").unwrap();

        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.message, "connection reset");
        assert_eq!(rec.context, "upstream read");
        assert_eq!(rec.content_snapshot, "partial ");
        assert_eq!(rec.reasoning_snapshot, "because");
        assert_eq!(rec.fragment_count, 1);
        assert!(rec.in_reasoning);
        assert!(rec.timestamp_ms > 0);
    }

    #[test]
    fn partial_content_survives_an_error() {
        let mut r = StreamReassembler::new();
        r.feed("<thinking>plan</thinking>ans").unwrap();
        r.record_error("stream aborted", "upstream");
        let out = r.finish();
        assert_eq!(out.content, "ans");
        assert_eq!(out.reasoning, "plan");
        assert_eq!(r.errors().len(), 1);
    }

    #[test]
    fn error_summary_lists_records() {
        let mut r = StreamReassembler::new();
        assert_eq!(r.error_summary(), "no stream errors");
        r.feed("abc").unwrap();
        r.record_error("timeout", "idle");
        r.record_error("eof", "read");
        let summary = r.error_summary();
        assert!(summary.starts_with("2 stream error(s)"));
        assert!(summary.contains("[1] idle: timeout (after 1 fragment(s); content 3 chars"));
        assert!(summary.contains("[2] read: eof"));
    }

    #[test]
    fn chunk_with_dedicated_reasoning_field() {
        let mut r = StreamReassembler::new();
        let chunk = StreamChunk {
            content: Some("answer".into()),
            reasoning: Some("why".into()),
            finish_reason: None,
        };
        let delta = r.feed_chunk(&chunk).unwrap();
        assert_eq!(delta.content, "answer");
        assert_eq!(delta.reasoning, "why");
        assert_eq!(r.fragment_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_when_left_alone() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let mut r = StreamReassembler::new();
        r.register_timeout(Duration::from_secs(5), move || flag.store(true, Ordering::SeqCst));
        assert_eq!(r.pending_timeouts(), 1);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_cancels_timeouts() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let mut r = StreamReassembler::new();
        r.register_timeout(Duration::from_secs(5), move || flag.store(true, Ordering::SeqCst));
        r.cleanup();
        assert!(!r.is_active());
        assert_eq!(r.pending_timeouts(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_and_drop_cancel_timeouts() {
        let fired = Arc::new(AtomicBool::new(false));

        let mut r = StreamReassembler::new();
        let flag = fired.clone();
        r.register_timeout(Duration::from_secs(1), move || flag.store(true, Ordering::SeqCst));
        r.reset();

        let mut dropped = StreamReassembler::new();
        let flag = fired.clone();
        dropped.register_timeout(Duration::from_secs(1), move || flag.store(true, Ordering::SeqCst));
        drop(dropped);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_single_timeout() {
        let mut r = StreamReassembler::new();
        let a = r.register_timeout(Duration::from_secs(1), || {});
        let _b = r.register_timeout(Duration::from_secs(1), || {});
        assert!(r.cancel_timeout(a));
        assert!(!r.cancel_timeout(a));
        assert_eq!(r.pending_timeouts(), 1);
    }
}
