//! Request coalescing and prompt compression.
//!
//! `RequestCoalescer` collapses concurrent callers asking for the same
//! work into a single in-flight future. `PromptOptimizer` shrinks prompt
//! text before it's sent to a model, backing off to the original text if
//! the measured reduction looks unsafe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

/// Deduplicates concurrent requests that hash to the same key within a
/// time window, so only one of them actually does the work.
pub struct RequestCoalescer {
    window: Duration,
    max_coalesced: usize,
    in_flight: DashMap<String, InFlight>,
}

struct InFlight {
    started_at: Instant,
    waiters: usize,
    sender: broadcast::Sender<Arc<CoalescedOutcome>>,
}

/// The shared terminal state of a coalesced call: either Ok with a JSON
/// payload, or an error message string. Stored behind `Arc` so every
/// waiter sees the identical bytes.
#[derive(Debug, Clone)]
pub enum CoalescedOutcome {
    Ok(serde_json::Value),
    Err(String),
}

/// A stable SHA-256 hex digest over the request's canonical JSON
/// representation, used as the coalescing key.
pub fn request_hash(value: &serde_json::Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Serializes `value` with object keys sorted, so two semantically equal
/// requests produce the same hash regardless of field order.
fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{:?}:{}", k, canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", entries.join(","))
        }
        serde_json::Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", entries.join(","))
        }
        other => other.to_string(),
    }
}

impl RequestCoalescer {
    pub fn new(window: Duration, max_coalesced: usize) -> Self {
        Self {
            window,
            max_coalesced,
            in_flight: DashMap::new(),
        }
    }

    /// Runs `work` for `key`, or joins an existing in-flight call for the
    /// same key if one started within the window and hasn't absorbed
    /// `max_coalesced` callers yet. Every joiner observes the same
    /// outcome; the record is removed once it completes.
    pub async fn run<F, Fut>(&self, key: &str, work: F) -> CoalescedOutcome
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = CoalescedOutcome>,
    {
        let (receiver, is_leader) = {
            use dashmap::mapref::entry::Entry;
            match self.in_flight.entry(key.to_string()) {
                Entry::Occupied(mut occupied) => {
                    let existing = occupied.get_mut();
                    if existing.started_at.elapsed() < self.window
                        && existing.waiters < self.max_coalesced
                    {
                        existing.waiters += 1;
                        (existing.sender.subscribe(), false)
                    } else {
                        let (sender, receiver) = broadcast::channel(1);
                        *existing = InFlight {
                            started_at: Instant::now(),
                            waiters: 1,
                            sender,
                        };
                        (receiver, true)
                    }
                }
                Entry::Vacant(vacant) => {
                    let (sender, receiver) = broadcast::channel(1);
                    vacant.insert(InFlight {
                        started_at: Instant::now(),
                        waiters: 1,
                        sender,
                    });
                    (receiver, true)
                }
            }
        };

        if is_leader {
            let outcome = Arc::new(work().await);
            if let Some((_, entry)) = self.in_flight.remove(key) {
                let _ = entry.sender.send(outcome.clone());
            }
            (*outcome).clone()
        } else {
            let mut receiver = receiver;
            match receiver.recv().await {
                Ok(outcome) => (*outcome).clone(),
                Err(_) => CoalescedOutcome::Err("coalesced request's leader vanished".to_string()),
            }
        }
    }
}

/// Text-compression pipeline applied to outgoing prompts, with a safety
/// floor that aborts and returns the original text if compression looks
/// aggressive enough to risk changing meaning.
pub struct PromptOptimizer {
    max_compression: f64,
    phrase_replacements: Vec<(&'static str, &'static str)>,
}

impl Default for PromptOptimizer {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl PromptOptimizer {
    pub fn new(max_compression: f64) -> Self {
        Self {
            max_compression,
            phrase_replacements: vec![
                ("please make sure to", "ensure"),
                ("in order to", "to"),
                ("it is important that", ""),
                ("at this point in time", "now"),
                ("due to the fact that", "because"),
                ("for the purpose of", "for"),
            ],
        }
    }

    /// Runs the full pipeline and returns the compressed prompt, or the
    /// original if the measured token reduction exceeds `max_compression`.
    pub fn optimize(&self, prompt: &str) -> String {
        let mut text = prompt.to_string();
        text = normalize_whitespace(&text);
        text = self.compress_instructions(&text);
        text = collapse_punctuation(&text);
        text = number_words_to_digits(&text);
        text = collapse_empty_lines(&text);

        let original_tokens = estimate_tokens(prompt) as f64;
        let compressed_tokens = estimate_tokens(&text) as f64;
        if original_tokens == 0.0 {
            return text;
        }
        let reduction = (original_tokens - compressed_tokens) / original_tokens;
        if reduction > self.max_compression {
            prompt.to_string()
        } else {
            text
        }
    }

    fn compress_instructions(&self, text: &str) -> String {
        let mut result = text.to_string();
        for (phrase, replacement) in &self.phrase_replacements {
            result = replace_case_insensitive(&result, phrase, replacement);
        }
        result
    }
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_was_space = false;
    for ch in text.chars() {
        if ch == ' ' || ch == '\t' {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = ch == '\n';
        }
    }
    out
}

fn replace_case_insensitive(text: &str, from: &str, to: &str) -> String {
    if from.is_empty() {
        return text.to_string();
    }
    let lower_text = text.to_lowercase();
    let lower_from = from.to_lowercase();
    let mut result = String::with_capacity(text.len());
    let mut cursor = 0;
    while let Some(offset) = lower_text[cursor..].find(&lower_from) {
        let start = cursor + offset;
        let end = start + from.len();
        result.push_str(&text[cursor..start]);
        result.push_str(to);
        cursor = end;
    }
    result.push_str(&text[cursor..]);
    result
}

fn collapse_punctuation(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        out.push(ch);
        if matches!(ch, '.' | '!' | '?' | ',') {
            while chars.peek() == Some(&ch) {
                chars.next();
            }
        }
    }
    out
}

fn number_words_to_digits(text: &str) -> String {
    const WORDS: [(&str, &str); 10] = [
        ("zero", "0"),
        ("one", "1"),
        ("two", "2"),
        ("three", "3"),
        ("four", "4"),
        ("five", "5"),
        ("six", "6"),
        ("seven", "7"),
        ("eight", "8"),
        ("nine", "9"),
    ];
    let mut result = text.to_string();
    for (word, digit) in WORDS {
        result = replace_whole_word_case_insensitive(&result, word, digit);
    }
    result
}

fn replace_whole_word_case_insensitive(text: &str, word: &str, replacement: &str) -> String {
    let mut result = String::with_capacity(text.len());
    for (i, token) in split_preserving_delimiters(text).into_iter().enumerate() {
        if i > 0 {
            // delimiters already carried inside tokens by split_preserving_delimiters
        }
        if token.eq_ignore_ascii_case(word) {
            result.push_str(replacement);
        } else {
            result.push_str(&token);
        }
    }
    result
}

/// Splits on word boundaries while keeping non-alphanumeric runs attached
/// to the following token, so punctuation and spacing survive untouched.
fn split_preserving_delimiters(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_is_alnum = false;
    for ch in text.chars() {
        let is_alnum = ch.is_alphanumeric();
        if current.is_empty() || is_alnum == current_is_alnum {
            current.push(ch);
        } else {
            tokens.push(std::mem::take(&mut current));
            current.push(ch);
        }
        current_is_alnum = is_alnum;
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn collapse_empty_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut last_blank = false;
    for line in text.lines() {
        let blank = line.trim().is_empty();
        if blank && last_blank {
            continue;
        }
        out.push(line);
        last_blank = blank;
    }
    out.join("\n")
}

/// Rough BPE-style estimate: ~4 characters per token, the same fallback
/// ratio used when a real tokenizer isn't available.
fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() as f64 / 4.0).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn coalescer_runs_work_once_for_concurrent_callers() {
        let coalescer = Arc::new(RequestCoalescer::new(StdDuration::from_millis(200), 10));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let coalescer = coalescer.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                coalescer
                    .run("key-a", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(StdDuration::from_millis(30)).await;
                        CoalescedOutcome::Ok(serde_json::json!({"result": 1}))
                    })
                    .await
            }));
        }

        for handle in handles {
            let outcome = handle.await.unwrap();
            assert!(matches!(outcome, CoalescedOutcome::Ok(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn coalescer_runs_work_again_after_the_window_expires() {
        let coalescer = RequestCoalescer::new(StdDuration::from_millis(10), 10);
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let calls = calls.clone();
            coalescer
                .run("key-b", || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    CoalescedOutcome::Ok(serde_json::Value::Null)
                })
                .await;
            tokio::time::sleep(StdDuration::from_millis(20)).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn request_hash_is_stable_regardless_of_key_order() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(request_hash(&a), request_hash(&b));
    }

    #[test]
    fn optimizer_compresses_redundant_instructions() {
        let optimizer = PromptOptimizer::default();
        let input = "Please make sure to  validate the input in order to avoid errors.";
        let output = optimizer.optimize(input);
        assert!(output.to_lowercase().contains("ensure"));
        assert!(!output.to_lowercase().contains("please make sure to"));
    }

    #[test]
    fn optimizer_falls_back_to_original_when_compression_exceeds_floor() {
        let optimizer = PromptOptimizer::new(0.01);
        let input = "please make sure to validate the input in order to avoid errors";
        let output = optimizer.optimize(input);
        assert_eq!(output, input);
    }

    #[test]
    fn optimizer_converts_small_number_words() {
        let optimizer = PromptOptimizer::new(1.0);
        let output = optimizer.optimize("I need three examples and two tests");
        assert!(output.contains('3'));
        assert!(output.contains('2'));
    }

    #[test]
    fn optimizer_collapses_blank_lines_and_repeated_punctuation() {
        let optimizer = PromptOptimizer::new(1.0);
        let output = optimizer.optimize("Hello!!!\n\n\n\nWorld...");
        assert!(!output.contains("!!!"));
        assert!(!output.contains("\n\n\n"));
    }
}
