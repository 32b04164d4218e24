//! Bounded processed-message-id tracker (§4.6): keeps the last 500 ids,
//! trimming back down to 500 whenever the set would otherwise grow past
//! 1000. Exclusive to one poller task, no cross-component sharing (§5).

use std::collections::{HashSet, VecDeque};

const KEEP: usize = 500;
const CAP: usize = 1000;

#[derive(Debug, Default)]
pub struct ProcessedLru {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl ProcessedLru {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `id` as processed. Returns `true` if it had not been seen
    /// before (i.e. the caller should dispatch it). Must be called *before*
    /// dispatch so a crash mid-dispatch does not cause a re-send.
    pub fn mark_if_new(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        self.set.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > CAP {
            while self.order.len() > KEEP {
                if let Some(oldest) = self.order.pop_front() {
                    self.set.remove(&oldest);
                }
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_new_repeat_is_not() {
        let mut lru = ProcessedLru::new();
        assert!(lru.mark_if_new("1"));
        assert!(!lru.mark_if_new("1"));
    }

    #[test]
    fn trims_back_to_keep_once_cap_exceeded() {
        let mut lru = ProcessedLru::new();
        for i in 0..CAP {
            assert!(lru.mark_if_new(&i.to_string()));
        }
        assert_eq!(lru.len(), CAP);
        assert!(lru.mark_if_new(&CAP.to_string()));
        assert_eq!(lru.len(), KEEP);
        // the oldest entries were evicted
        assert!(lru.mark_if_new("0"));
    }
}
