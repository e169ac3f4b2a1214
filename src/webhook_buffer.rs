//! Delivery bookkeeping for the webhook handler, kept free of I/O so that
//! every transition can be driven with explicit instants.

use crate::embed::WebhookEntry;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub(crate) struct DeliveryBuffer {
    pending: VecDeque<WebhookEntry>,
    /// Pending length that triggers a flush.
    capacity: usize,
    /// Hard bound on retained entries while deliveries fail or are deferred.
    max_pending: usize,
    flush_interval: Duration,
    throttle_limit: Duration,
    last_flush: Instant,
    last_request: Option<Instant>,
    /// Set from a rate-limit response.
    blocked_until: Option<Instant>,
    urgent: bool,
    /// A due flush was postponed by the throttle.
    deferred: bool,
    dropped_in_episode: u64,
    episode_reported: bool,
}

impl DeliveryBuffer {
    pub fn new(
        capacity: usize,
        max_pending: usize,
        flush_interval: Duration,
        throttle_limit: Duration,
        now: Instant,
    ) -> Self {
        let capacity = capacity.max(1);
        DeliveryBuffer {
            pending: VecDeque::with_capacity(capacity),
            capacity,
            max_pending: max_pending.max(capacity),
            flush_interval,
            throttle_limit,
            last_flush: now,
            last_request: None,
            blocked_until: None,
            urgent: false,
            deferred: false,
            dropped_in_episode: 0,
            episode_reported: false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &VecDeque<WebhookEntry> {
        &self.pending
    }

    /// Append an entry, evicting the oldest one when the retention bound is
    /// reached. Returns `true` if an entry was evicted.
    pub fn push(&mut self, entry: WebhookEntry, urgent: bool) -> bool {
        let evicted = if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            self.dropped_in_episode += 1;
            true
        } else {
            false
        };
        self.pending.push_back(entry);
        self.urgent |= urgent;
        evicted
    }

    /// Whether a flush should be attempted now, ignoring the throttle.
    pub fn flush_due(&self, now: Instant) -> bool {
        !self.pending.is_empty()
            && (self.pending.len() >= self.capacity
                || self.urgent
                || now.saturating_duration_since(self.last_flush) >= self.flush_interval)
    }

    /// Time left before another request may be sent.
    pub fn throttle_remaining(&self, now: Instant) -> Duration {
        let spacing = self
            .last_request
            .map(|last| match last.checked_add(self.throttle_limit) {
                Some(ready) => ready.saturating_duration_since(now),
                None => self.throttle_limit,
            })
            .unwrap_or_default();
        let blocked = self
            .blocked_until
            .map(|until| until.saturating_duration_since(now))
            .unwrap_or_default();
        spacing.max(blocked)
    }

    /// Mark a due flush as postponed until the throttle lifts.
    pub fn defer(&mut self) {
        self.deferred = true;
    }

    /// `delivered` entries from the front reached the remote side.
    pub fn record_success(&mut self, delivered: usize, now: Instant) {
        let delivered = delivered.min(self.pending.len());
        self.pending.drain(..delivered);
        self.last_request = Some(now);
        self.blocked_until = None;
        self.deferred = false;
        if self.pending.is_empty() {
            self.last_flush = now;
            self.urgent = false;
            self.dropped_in_episode = 0;
            self.episode_reported = false;
        }
    }

    /// A request failed. Entries stay queued; the next attempt waits for the
    /// next emit or for the flush interval to elapse again.
    pub fn record_failure(&mut self, now: Instant, retry_after: Option<Duration>) {
        self.last_request = Some(now);
        self.last_flush = now;
        self.deferred = false;
        self.blocked_until = retry_after.and_then(|wait| now.checked_add(wait));
    }

    /// Number of entries evicted in the current failure episode, returned
    /// only once per episode.
    pub fn take_drop_notice(&mut self) -> Option<u64> {
        if self.dropped_in_episode == 0 || self.episode_reported {
            return None;
        }
        self.episode_reported = true;
        Some(self.dropped_in_episode)
    }

    /// When the worker should next look at the buffer without new input.
    /// `None` also covers deadlines too far out to represent.
    pub fn next_wakeup(&self, now: Instant) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        let unthrottled = now.checked_add(self.throttle_remaining(now))?;
        if self.deferred {
            return Some(unthrottled);
        }
        let interval_due = self.last_flush.checked_add(self.flush_interval)?;
        Some(interval_due.max(unthrottled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(text: &str) -> WebhookEntry {
        WebhookEntry::Text(text.to_string())
    }

    fn buffer(capacity: usize, now: Instant) -> DeliveryBuffer {
        DeliveryBuffer::new(
            capacity,
            capacity * 2,
            Duration::from_secs(30),
            Duration::from_secs(1),
            now,
        )
    }

    #[test]
    fn due_at_capacity() {
        let now = Instant::now();
        let mut buf = buffer(3, now);
        buf.push(entry("a"), false);
        buf.push(entry("b"), false);
        assert!(!buf.flush_due(now));
        buf.push(entry("c"), false);
        assert!(buf.flush_due(now));
    }

    #[test]
    fn due_after_interval() {
        let start = Instant::now();
        let mut buf = buffer(10, start);
        buf.push(entry("a"), false);
        assert!(!buf.flush_due(start + Duration::from_secs(29)));
        assert!(buf.flush_due(start + Duration::from_secs(30)));
    }

    #[test]
    fn urgent_entry_makes_flush_due() {
        let now = Instant::now();
        let mut buf = buffer(10, now);
        buf.push(entry("a"), true);
        assert!(buf.flush_due(now));
    }

    #[test]
    fn throttle_spacing_after_request() {
        let start = Instant::now();
        let mut buf = buffer(1, start);
        assert_eq!(buf.throttle_remaining(start), Duration::ZERO);

        buf.push(entry("a"), false);
        buf.record_success(1, start);
        let later = start + Duration::from_millis(400);
        assert_eq!(buf.throttle_remaining(later), Duration::from_millis(600));
        assert_eq!(buf.throttle_remaining(start + Duration::from_secs(2)), Duration::ZERO);
    }

    #[test]
    fn failure_keeps_entries_and_honours_retry_after() {
        let start = Instant::now();
        let mut buf = buffer(2, start);
        buf.push(entry("a"), false);
        buf.push(entry("b"), false);

        buf.record_failure(start, Some(Duration::from_secs(5)));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.throttle_remaining(start + Duration::from_secs(1)), Duration::from_secs(4));

        // Still due by size, but the worker waits for the interval or a new
        // entry rather than retrying at once.
        assert_eq!(
            buf.next_wakeup(start),
            Some(start + Duration::from_secs(30))
        );

        buf.record_success(2, start + Duration::from_secs(6));
        assert!(buf.is_empty());
        assert_eq!(buf.next_wakeup(start + Duration::from_secs(6)), None);
    }

    #[test]
    fn huge_waits_do_not_overflow() {
        let start = Instant::now();
        let mut buf = DeliveryBuffer::new(1, 2, Duration::MAX, Duration::MAX, start);
        buf.push(entry("a"), false);
        buf.record_failure(start, Some(Duration::MAX));

        assert_eq!(buf.len(), 1);
        assert_eq!(buf.throttle_remaining(start), Duration::MAX);
        assert_eq!(buf.next_wakeup(start), None);
    }

    #[test]
    fn partial_success_keeps_the_tail() {
        let now = Instant::now();
        let mut buf = buffer(3, now);
        for text in ["a", "b", "c"] {
            buf.push(entry(text), false);
        }
        buf.record_success(2, now);
        assert_eq!(buf.pending().front(), Some(&entry("c")));
    }

    #[test]
    fn eviction_drops_oldest_and_reports_once() {
        let now = Instant::now();
        let mut buf = buffer(2, now);
        for text in ["a", "b", "c", "d"] {
            assert!(!buf.push(entry(text), false));
        }
        assert!(buf.push(entry("e"), false));
        assert!(buf.push(entry("f"), false));

        assert_eq!(buf.len(), 4);
        assert_eq!(buf.pending().front(), Some(&entry("c")));
        assert_eq!(buf.take_drop_notice(), Some(2));
        assert_eq!(buf.take_drop_notice(), None);

        buf.push(entry("g"), false);
        assert_eq!(buf.take_drop_notice(), None);

        // A drained buffer starts a new episode.
        buf.record_success(4, now);
        for text in ["h", "i", "j", "k", "l"] {
            buf.push(entry(text), false);
        }
        assert_eq!(buf.take_drop_notice(), Some(1));
    }

    #[test]
    fn deferred_flush_wakes_when_throttle_lifts() {
        let start = Instant::now();
        let mut buf = buffer(1, start);
        buf.push(entry("a"), false);
        buf.record_success(1, start);

        let now = start + Duration::from_millis(200);
        buf.push(entry("b"), false);
        assert!(buf.flush_due(now));
        buf.defer();
        assert_eq!(buf.next_wakeup(now), Some(start + Duration::from_secs(1)));
    }

    #[test]
    fn max_pending_never_below_capacity() {
        let now = Instant::now();
        let mut buf = DeliveryBuffer::new(4, 1, Duration::from_secs(1), Duration::ZERO, now);
        for text in ["a", "b", "c", "d"] {
            assert!(!buf.push(entry(text), false));
        }
    }
}
