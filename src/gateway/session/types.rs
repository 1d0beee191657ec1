use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use crate::common::{errors::GatewayError, types::SessionId};

/// Outcome of a single WS session. Tells the outer loop what to do next.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Transient disconnect: reconnect and resume.
    Resume,
    /// Session invalid: start over with a fresh Identify.
    Identify,
    /// The remote refused us for good.
    Fatal(GatewayError),
    /// `close` was requested.
    Shutdown,
}

/// What a Resume needs besides the sequence cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub resume_url: Option<String>,
}

/// Last sequence number seen on the socket, shared read-only with the
/// heartbeat task. `-1` means nothing seen yet.
#[derive(Debug, Clone)]
pub struct SequenceCursor(Arc<AtomicI64>);

impl SequenceCursor {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(-1)))
    }

    pub fn get(&self) -> Option<u64> {
        let seq = self.0.load(Ordering::Acquire);
        (seq >= 0).then_some(seq as u64)
    }

    /// Moves the cursor forward. Returns `false` for stale or repeated
    /// sequence numbers, which leave the cursor untouched.
    pub fn advance(&self, seq: u64) -> bool {
        let current = self.0.load(Ordering::Acquire);
        if current >= 0 && seq <= current as u64 {
            return false;
        }
        self.0.store(seq as i64, Ordering::Release);
        true
    }

    pub fn reset(&self) {
        self.0.store(-1, Ordering::Release);
    }
}

impl Default for SequenceCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Close codes after which the session cannot be resumed.
///
/// - `4007`: Invalid seq
/// - `4009`: Session timed out
pub fn is_reidentify_close(code: u16) -> bool {
    matches!(code, 4007 | 4009)
}

/// Close codes that mean reconnecting would be refused again.
///
/// - `4004`: Authentication failed
/// - `4010`: Invalid shard
/// - `4011`: Sharding required
/// - `4012`: Invalid API version
/// - `4013`: Invalid intent(s)
/// - `4014`: Disallowed intent(s)
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_only_moves_forward() {
        let cursor = SequenceCursor::new();
        assert_eq!(cursor.get(), None);
        assert!(cursor.advance(1));
        assert!(cursor.advance(2));
        assert!(!cursor.advance(2));
        assert!(!cursor.advance(1));
        assert_eq!(cursor.get(), Some(2));

        cursor.reset();
        assert_eq!(cursor.get(), None);
        assert!(cursor.advance(1));
    }

    #[test]
    fn close_code_classes() {
        assert!(is_fatal_close(4004));
        assert!(is_fatal_close(4013));
        assert!(!is_fatal_close(4000));
        assert!(is_reidentify_close(4009));
        assert!(!is_reidentify_close(4004));
        assert!(!is_fatal_close(1001) && !is_reidentify_close(1001));
    }
}
