//! In-memory request log.
//!
//! Every handled request is appended with the response sent and the
//! mapping (full or partial) that produced it. The log is always bounded by
//! count and optionally by age. New entries are published to subscribers as
//! they are added.

use crate::matchers::{RequestMatchResult, RequestMatcher};
use crate::message::{RequestMessage, ResponseMessage};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

const SUBSCRIBER_CAPACITY: usize = 256;

/// Entries kept when no count limit is configured.
pub const DEFAULT_MAX_ENTRIES: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub guid: Uuid,
    pub request: RequestMessage,
    pub response: ResponseMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_guid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_result: Option<RequestMatchResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_mapping_guid: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_match_result: Option<RequestMatchResult>,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(request: RequestMessage, response: ResponseMessage) -> Self {
        Self {
            guid: Uuid::new_v4(),
            request,
            response,
            mapping_guid: None,
            mapping_title: None,
            match_result: None,
            partial_mapping_guid: None,
            partial_match_result: None,
            timestamp: Utc::now(),
        }
    }
}

pub struct RequestLog {
    entries: Mutex<VecDeque<LogEntry>>,
    max_count: usize,
    max_age: Option<Duration>,
    events: broadcast::Sender<LogEntry>,
}

impl RequestLog {
    pub fn new(max_count: usize, expiration_secs: Option<u64>) -> Self {
        let (events, _) = broadcast::channel(SUBSCRIBER_CAPACITY);
        Self {
            entries: Mutex::new(VecDeque::new()),
            max_count,
            max_age: expiration_secs.and_then(|secs| Duration::try_seconds(secs as i64)),
            events,
        }
    }

    pub fn add(&self, entry: LogEntry) {
        {
            let mut entries = self.entries.lock();
            entries.push_back(entry.clone());

            if let Some(max_age) = self.max_age {
                let cutoff = Utc::now() - max_age;
                // Appended in arrival order, so expired entries sit at the front
                let mut expired = 0;
                while entries.front().is_some_and(|e| e.timestamp < cutoff) {
                    entries.pop_front();
                    expired += 1;
                }
                if expired > 0 {
                    debug!("Expired {} request log entries", expired);
                }
            }
            while entries.len() > self.max_count {
                entries.pop_front();
            }
        }

        // No subscribers is not an error
        let _ = self.events.send(entry);
    }

    /// Entries oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Entries whose request fully matches `matcher`.
    pub fn find(&self, matcher: &RequestMatcher) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| matcher.score(&e.request).is_perfect_match())
            .cloned()
            .collect()
    }

    pub fn get(&self, guid: Uuid) -> Option<LogEntry> {
        self.entries.lock().iter().find(|e| e.guid == guid).cloned()
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Receive every entry added from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.events.subscribe()
    }
}

impl Default for RequestLog {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES, None)
    }
}
