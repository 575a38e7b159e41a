//! Bounded history buffers for trend sparklines.

use std::collections::VecDeque;

pub const DEFAULT_HISTORY_SIZE: usize = 20;

/// Fixed-capacity sequence; the oldest value is evicted first.
#[derive(Debug, Clone)]
pub struct RollingHistory {
    capacity: usize,
    values: VecDeque<f32>,
}

impl RollingHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            values: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, value: f32) {
        if self.values.len() >= self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = f32> + '_ {
        self.values.iter().copied()
    }

    pub fn average(&self) -> Option<f32> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f32>() / self.values.len() as f32)
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_exactly_the_oldest() {
        let mut history = RollingHistory::new();
        for i in 0..20 {
            history.push(i as f32);
        }
        assert_eq!(history.len(), 20);

        history.push(20.0);
        assert_eq!(history.len(), 20);
        let values: Vec<f32> = history.iter().collect();
        let expected: Vec<f32> = (1..=20).map(|i| i as f32).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn average_of_empty_is_none() {
        let mut history = RollingHistory::with_capacity(3);
        assert_eq!(history.average(), None);
        history.push(10.0);
        history.push(20.0);
        assert_eq!(history.average(), Some(15.0));
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn zero_capacity_is_treated_as_one() {
        let mut history = RollingHistory::with_capacity(0);
        history.push(1.0);
        history.push(2.0);
        assert_eq!(history.capacity, 1);
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![2.0]);
    }
}
