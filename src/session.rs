//! Session identity: who is talking and which thread the messages belong to

use rand::Rng;
use std::collections::VecDeque;
use tracing::debug;

/// Prefix of every generated thread id
pub const THREAD_PREFIX: &str = "thread_";

/// Generated ids draw their number uniformly from `0..THREAD_ID_SPACE`
pub const THREAD_ID_SPACE: u32 = 10_000;

/// Format a thread number the way the agent expects it
pub fn format_thread_id(n: u32) -> String {
    format!("{THREAD_PREFIX}{n}")
}

/// Whether `value` looks like a generated thread id (`thread_<digits>`)
pub fn is_generated_thread_id(value: &str) -> bool {
    value
        .strip_prefix(THREAD_PREFIX)
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Source of fresh thread ids.
///
/// Collisions are possible and accepted; nothing here promises uniqueness.
pub trait ThreadIdSource: Send {
    fn next_thread_id(&mut self) -> String;
}

/// Production source backed by the thread-local RNG
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomThreadIds;

impl ThreadIdSource for RandomThreadIds {
    fn next_thread_id(&mut self) -> String {
        format_thread_id(rand::thread_rng().gen_range(0..THREAD_ID_SPACE))
    }
}

/// Deterministic source that hands out the given numbers in order, then
/// starts over. Meant for tests and demos.
#[derive(Debug, Clone)]
pub struct SequenceThreadIds {
    numbers: VecDeque<u32>,
}

impl SequenceThreadIds {
    pub fn new(numbers: impl IntoIterator<Item = u32>) -> Self {
        let numbers: VecDeque<u32> = numbers.into_iter().collect();
        Self {
            numbers: if numbers.is_empty() { VecDeque::from([0]) } else { numbers },
        }
    }
}

impl ThreadIdSource for SequenceThreadIds {
    fn next_thread_id(&mut self) -> String {
        // never empty: `new` guarantees at least one element
        let n = self.numbers.pop_front().unwrap_or_default();
        self.numbers.push_back(n);
        format_thread_id(n % THREAD_ID_SPACE)
    }
}

/// Sender and thread identity for the lifetime of one widget
pub struct Session {
    sender: String,
    thread_id: String,
    ids: Box<dyn ThreadIdSource>,
}

impl Session {
    /// Create a session. An empty `thread_id` is allowed here and gets
    /// filled in by [`Session::ensure_thread_id`].
    pub fn new(
        sender: impl Into<String>,
        thread_id: impl Into<String>,
        ids: Box<dyn ThreadIdSource>,
    ) -> Self {
        Self {
            sender: sender.into(),
            thread_id: thread_id.into(),
            ids,
        }
    }

    /// Session with the random id source
    pub fn with_random_ids(sender: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self::new(sender, thread_id, Box::new(RandomThreadIds))
    }

    /// Assign a thread id if there is none yet. Called once at startup.
    pub fn ensure_thread_id(&mut self) -> &str {
        if self.thread_id.trim().is_empty() {
            self.thread_id = self.ids.next_thread_id();
            debug!(thread_id = %self.thread_id, "generated initial thread id");
        }
        &self.thread_id
    }

    /// Unconditionally replace the thread id with a fresh one
    pub fn regenerate_thread_id(&mut self) -> &str {
        self.thread_id = self.ids.next_thread_id();
        debug!(thread_id = %self.thread_id, "regenerated thread id");
        &self.thread_id
    }

    /// Use `value` as the thread id; an empty value regenerates instead
    pub fn set_thread_id(&mut self, value: &str) -> &str {
        let value = value.trim();
        if value.is_empty() {
            return self.regenerate_thread_id();
        }
        self.thread_id = value.to_string();
        &self.thread_id
    }

    pub fn set_sender(&mut self, sender: &str) {
        self.sender = sender.trim().to_string();
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("sender", &self.sender)
            .field("thread_id", &self.thread_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_fills_only_empty_ids() {
        let mut session = Session::new("a@b.c", "", Box::new(SequenceThreadIds::new([42])));
        assert_eq!(session.ensure_thread_id(), "thread_42");

        let mut session = Session::new("a@b.c", "thread_7", Box::new(SequenceThreadIds::new([42])));
        assert_eq!(session.ensure_thread_id(), "thread_7");
    }

    #[test]
    fn regenerate_always_replaces() {
        let mut session = Session::new("", "thread_7", Box::new(SequenceThreadIds::new([1, 2])));
        assert_eq!(session.regenerate_thread_id(), "thread_1");
        assert_eq!(session.regenerate_thread_id(), "thread_2");
        assert_eq!(session.regenerate_thread_id(), "thread_1");
    }

    #[test]
    fn random_ids_stay_in_range() {
        let mut ids = RandomThreadIds;
        for _ in 0..500 {
            let id = ids.next_thread_id();
            assert!(is_generated_thread_id(&id), "{id}");
            let n: u32 = id[THREAD_PREFIX.len()..].parse().unwrap();
            assert!(n < THREAD_ID_SPACE);
        }
    }

    #[test]
    fn blank_thread_override_regenerates() {
        let mut session = Session::new("", "thread_7", Box::new(SequenceThreadIds::new([9])));
        assert_eq!(session.set_thread_id("  "), "thread_9");
        assert_eq!(session.set_thread_id(" vendor-123 "), "vendor-123");
    }

    #[test]
    fn thread_id_pattern() {
        assert!(is_generated_thread_id("thread_0"));
        assert!(is_generated_thread_id("thread_9999"));
        assert!(!is_generated_thread_id("thread_"));
        assert!(!is_generated_thread_id("thread_12a"));
        assert!(!is_generated_thread_id("session_12"));
    }
}
