//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::Cell;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sim::SimTime;

/// Generation tag carried by every scheduled timer.
///
/// Tags are allocated in increasing order and are never reused, so a firing
/// whose tag doesn't match the tag stored by the owning object is stale.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct TimerTag(u64);

/// Allocator of timer generation tags.
#[derive(Debug, Default)]
pub struct TimerTags {
    next: Cell<u64>,
}

/// A handle to a one-shot timer created by [`TimeoutTask::new`].
///
/// Dropping this handle cancels the timer.
#[derive(Debug)]
pub struct TimeoutTask {
    tag: TimerTag,
    timeout: Duration,
    deadline: SimTime,
}

/// A handle to a periodic timer created by [`IntervalTask::new`].
///
/// Dropping this handle cancels the timer.
#[derive(Debug)]
pub struct IntervalTask {
    tag: TimerTag,
    interval: Duration,
    next: SimTime,
}

// ===== impl TimerTag =====

impl TimerTag {
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TimerTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ===== impl TimerTags =====

impl TimerTags {
    /// Returns a fresh generation tag.
    pub fn next(&self) -> TimerTag {
        let tag = self.next.get() + 1;
        self.next.set(tag);
        TimerTag(tag)
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Creates a handle for a timer that expires `timeout` after `now`.
    ///
    /// The caller is responsible for scheduling the timer with the same tag.
    pub fn new(tag: TimerTag, now: SimTime, timeout: Duration) -> TimeoutTask {
        TimeoutTask {
            tag,
            timeout,
            deadline: now + timeout,
        }
    }

    /// Returns the generation tag of the timer.
    pub fn tag(&self) -> TimerTag {
        self.tag
    }

    /// Returns whether a firing carrying `tag` belongs to this timer.
    pub fn is_current(&self, tag: TimerTag) -> bool {
        self.tag == tag
    }

    /// Returns the timeout the timer was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the time remaining before the timer expires.
    pub fn remaining(&self, now: SimTime) -> Duration {
        self.deadline.saturating_duration_since(now)
    }

    /// Re-arms the timer under a new generation tag, optionally updating its
    /// timeout. Firings carrying the old tag become stale.
    pub fn reset(
        &mut self,
        tag: TimerTag,
        now: SimTime,
        timeout: Option<Duration>,
    ) {
        if let Some(timeout) = timeout {
            self.timeout = timeout;
        }
        self.tag = tag;
        self.deadline = now + self.timeout;
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Creates a handle for a timer that fires every `interval`, the first
    /// time `interval` after `now`.
    ///
    /// The caller is responsible for scheduling the first firing with the
    /// same tag.
    pub fn new(
        tag: TimerTag,
        now: SimTime,
        interval: Duration,
    ) -> IntervalTask {
        IntervalTask {
            tag,
            interval,
            next: now + interval,
        }
    }

    /// Returns the generation tag of the pending firing.
    pub fn tag(&self) -> TimerTag {
        self.tag
    }

    /// Returns whether a firing carrying `tag` belongs to this timer.
    pub fn is_current(&self, tag: TimerTag) -> bool {
        self.tag == tag
    }

    /// Returns the timer interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the time remaining before the next firing.
    pub fn remaining(&self, now: SimTime) -> Duration {
        self.next.saturating_duration_since(now)
    }

    /// Records the scheduling of the next firing under a new tag.
    pub fn rearm(&mut self, tag: TimerTag, now: SimTime) {
        self.tag = tag;
        self.next = now + self.interval;
    }
}

// ===== unit tests =====
