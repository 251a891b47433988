use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::model::AccessLogEntry;
use crate::types::{DoorId, GroupId, UserId};

/// Default number of retained access log entries.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Default number of entries returned by a query.
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Filters for reading the access log. Supplied filters are combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogQuery {
    pub door_id: Option<DoorId>,
    pub user_id: Option<UserId>,
    pub group_id: Option<GroupId>,
    /// Maximum entries returned; defaults to 100.
    pub limit: Option<usize>,
}

impl LogQuery {
    /// Creates a query without filters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts results to a door.
    pub fn door(mut self, door_id: DoorId) -> Self {
        self.door_id = Some(door_id);
        self
    }

    /// Restricts results to a user.
    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Restricts results to a group.
    pub fn group(mut self, group_id: GroupId) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Sets the maximum number of entries returned.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &AccessLogEntry) -> bool {
        if let Some(door_id) = &self.door_id
            && entry.door_id.as_ref() != Some(door_id)
        {
            return false;
        }
        if let Some(user_id) = &self.user_id
            && entry.user_id.as_ref() != Some(user_id)
        {
            return false;
        }
        if let Some(group_id) = &self.group_id
            && entry.group_id.as_ref() != Some(group_id)
        {
            return false;
        }
        true
    }
}

/// Append-only access log retaining the most recent entries.
#[derive(Debug, Clone)]
pub struct AccessLog {
    entries: VecDeque<AccessLogEntry>,
    capacity: usize,
}

impl AccessLog {
    /// Creates an empty log with the given retention cap.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Rebuilds a log from stored entries, keeping the newest `capacity`.
    pub fn from_entries(entries: Vec<AccessLogEntry>, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        log.entries.extend(entries);
        log.truncate();
        log
    }

    /// Returns the retention cap.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no entries are retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends an entry, evicting the oldest beyond capacity.
    pub fn push(&mut self, entry: AccessLogEntry) {
        self.entries.push_back(entry);
        self.truncate();
    }

    /// Iterates entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AccessLogEntry> {
        self.entries.iter()
    }

    /// Returns matching entries, newest first, truncated to the query limit.
    pub fn query(&self, query: &LogQuery) -> Vec<AccessLogEntry> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_QUERY_LIMIT)
            .clamp(1, self.capacity);
        let mut matched: Vec<&AccessLogEntry> =
            self.entries.iter().filter(|entry| query.matches(entry)).collect();
        // Stable sort keeps insertion order between equal timestamps; reversing
        // afterwards puts the later append first.
        matched.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        matched.into_iter().rev().take(limit).cloned().collect()
    }

    fn truncate(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
