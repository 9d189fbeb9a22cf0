//! Ordered registry of idle objects

use std::collections::VecDeque;

use crate::object::ObjectId;

pub(crate) struct IdleEntry<T> {
    pub id: ObjectId,
    pub object: T,
    seq: u64,
}

/// Idle objects ordered by the time they entered the registry.
///
/// Borrowing always pops the front. With LIFO the front holds the most
/// recently returned object, with FIFO the oldest one. Either way the
/// entries stay sorted by `seq`, which lets eviction walk them oldest first.
pub(crate) struct IdleRegistry<T> {
    entries: VecDeque<IdleEntry<T>>,
    lifo: bool,
    next_seq: u64,
    eviction_cursor: u64,
}

impl<T> IdleRegistry<T> {
    pub fn new(lifo: bool) -> Self {
        Self {
            entries: VecDeque::new(),
            lifo,
            next_seq: 0,
            eviction_cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, id: ObjectId, object: T) {
        self.next_seq += 1;
        let entry = IdleEntry {
            id,
            object,
            seq: self.next_seq,
        };
        if self.lifo {
            self.entries.push_front(entry);
        } else {
            self.entries.push_back(entry);
        }
    }

    pub fn pop(&mut self) -> Option<IdleEntry<T>> {
        self.entries.pop_front()
    }

    pub fn drain(&mut self) -> Vec<IdleEntry<T>> {
        self.entries.drain(..).collect()
    }

    /// Remove up to `count` entries for an eviction test.
    ///
    /// Entries are taken oldest first, resuming after the last entry claimed
    /// by the previous call and wrapping around once the newest is reached.
    pub fn claim_for_eviction(&mut self, count: usize) -> Vec<IdleEntry<T>> {
        let len = self.entries.len();
        let count = count.min(len);
        if count == 0 {
            return Vec::new();
        }

        // positions in oldest-first order
        let oldest_first: Vec<usize> = if self.lifo {
            (0..len).rev().collect()
        } else {
            (0..len).collect()
        };
        let start = oldest_first
            .iter()
            .position(|&i| self.entries[i].seq > self.eviction_cursor)
            .unwrap_or(0);

        let mut picked: Vec<usize> = oldest_first
            .iter()
            .cycle()
            .skip(start)
            .take(count)
            .copied()
            .collect();
        if let Some(&last) = picked.last() {
            self.eviction_cursor = self.entries[last].seq;
        }

        picked.sort_unstable_by(|a, b| b.cmp(a));
        let mut claimed: Vec<IdleEntry<T>> = picked
            .into_iter()
            .filter_map(|i| self.entries.remove(i))
            .collect();
        claimed.sort_unstable_by_key(|entry| entry.seq);
        claimed
    }

    /// Put entries that survived an eviction test back in their original position
    pub fn restore(&mut self, entry: IdleEntry<T>) {
        let pos = if self.lifo {
            self.entries.partition_point(|e| e.seq > entry.seq)
        } else {
            self.entries.partition_point(|e| e.seq < entry.seq)
        };
        self.entries.insert(pos, entry);
    }
}
