use std::collections::VecDeque;

use crate::prelude::*;

/// A query reissued at least every `interval_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollEntry {
    pub command: Command,
    pub interval_ms: u64,
    /// `None` until first sent; a never-run entry is always due.
    pub last_run_ms: Option<u64>,
}

impl PollEntry {
    pub fn new(command: Command, interval_ms: u64) -> Self {
        Self {
            command,
            interval_ms,
            last_run_ms: None,
        }
    }

    fn is_due(&self, now_ms: u64) -> bool {
        match self.last_run_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        }
    }
}

/// Picks the next command to send. Ad hoc commands queued with
/// `enqueue_priority` always go first, in the order they were queued;
/// otherwise the poll table is walked round-robin from where the last
/// call left off.
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    priority: VecDeque<Command>,
    poll: Vec<PollEntry>,
    cursor: usize,
}

impl Scheduler {
    pub fn new(poll: Vec<PollEntry>) -> Self {
        Self {
            priority: VecDeque::new(),
            poll,
            cursor: 0,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut scheduler = Self::new(
            config
                .poll()
                .iter()
                .map(|p| PollEntry::new(Command::new(p.command.as_str()), p.interval_ms))
                .collect(),
        );
        for command in config.startup_commands() {
            scheduler.enqueue_priority(Command::new(command.as_str()));
        }
        scheduler
    }

    /// No validation and no de-duplication.
    pub fn enqueue_priority(&mut self, command: Command) {
        debug!("queued priority command {}", command);
        self.priority.push_back(command);
    }

    pub fn priority_len(&self) -> usize {
        self.priority.len()
    }

    pub fn poll_entries(&self) -> &[PollEntry] {
        &self.poll
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Choose the command to send now, if any. The cursor moves on by one
    /// for every poll slot looked at, whether or not it was picked.
    pub fn next(&mut self, now_ms: u64) -> Option<Command> {
        if let Some(command) = self.priority.pop_front() {
            return Some(command);
        }

        let len = self.poll.len();
        for _ in 0..len {
            let entry = &mut self.poll[self.cursor];
            self.cursor = (self.cursor + 1) % len;

            if entry.is_due(now_ms) {
                entry.last_run_ms = Some(now_ms);
                return Some(entry.command.clone());
            }
        }

        None
    }
}
