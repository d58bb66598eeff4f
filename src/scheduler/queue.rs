use std::collections::BTreeMap;
use std::time::Instant;
use uuid::Uuid;

/// Identifier of a scheduled task
pub type TaskId = Uuid;

/// Position of a task in the queue
///
/// Ordered by due instant, then by insertion sequence so equal instants
/// keep their insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QueueKey {
    at: Instant,
    seq: u64,
}

impl QueueKey {
    pub(crate) fn at(&self) -> Instant {
        self.at
    }
}

/// Tasks ordered by next run instant
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    entries: BTreeMap<QueueKey, TaskId>,
    next_seq: u64,
}

impl TaskQueue {
    pub(crate) fn insert(&mut self, at: Instant, id: TaskId) -> QueueKey {
        let key = QueueKey {
            at,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, id);
        key
    }

    pub(crate) fn remove(&mut self, key: &QueueKey) -> Option<TaskId> {
        self.entries.remove(key)
    }

    pub(crate) fn peek(&self) -> Option<(QueueKey, TaskId)> {
        self.entries.first_key_value().map(|(key, id)| (*key, *id))
    }

    /// Remove the head if it is due at or before `deadline`
    pub(crate) fn pop_due(&mut self, deadline: Instant) -> Option<(QueueKey, TaskId)> {
        match self.peek() {
            Some((key, _)) if key.at <= deadline => self.entries.pop_first(),
            _ => None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_head_is_earliest() {
        let t0 = Instant::now();
        let mut queue = TaskQueue::default();
        let late = Uuid::new_v4();
        let early = Uuid::new_v4();
        queue.insert(t0 + Duration::from_millis(20), late);
        queue.insert(t0 + Duration::from_millis(5), early);

        assert_eq!(queue.peek().map(|(_, id)| id), Some(early));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let t0 = Instant::now();
        let mut queue = TaskQueue::default();
        let ids: Vec<TaskId> = (0..4).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.insert(t0, *id);
        }

        let mut popped = Vec::new();
        while let Some((_, id)) = queue.pop_due(t0) {
            popped.push(id);
        }
        assert_eq!(popped, ids);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_due_respects_deadline() {
        let t0 = Instant::now();
        let mut queue = TaskQueue::default();
        let id = Uuid::new_v4();
        let key = queue.insert(t0 + Duration::from_millis(10), id);

        assert!(queue.pop_due(t0).is_none());
        assert_eq!(queue.pop_due(key.at()), Some((key, id)));
    }

    #[test]
    fn test_remove_by_key() {
        let t0 = Instant::now();
        let mut queue = TaskQueue::default();
        let first = queue.insert(t0, Uuid::new_v4());
        let second_id = Uuid::new_v4();
        queue.insert(t0, second_id);

        assert!(queue.remove(&first).is_some());
        assert!(queue.remove(&first).is_none());
        assert_eq!(queue.peek().map(|(_, id)| id), Some(second_id));

        queue.clear();
        assert!(queue.is_empty());
    }
}
