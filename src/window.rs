use std::collections::VecDeque;

use crate::error::{Result, TrackError};

/// Fixed capacity sliding window over the most recent items.
///
/// Items are addressed by recency: `at(0)` is the newest, `at(len() - 1)` the oldest.
/// Pushing into a full window evicts the oldest item first, so memory is bounded
/// no matter how long the stream runs.
#[derive(Debug)]
pub struct FrameWindow<T> {
    // newest at the front
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> FrameWindow<T> {
    /// The smallest capacity that still allows pairing two adjacent frames
    pub const MIN_CAPACITY: usize = 2;

    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < Self::MIN_CAPACITY {
            return Err(TrackError::InvalidCapacity(capacity));
        }

        Ok(Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Insert `item` as the newest element, returning the evicted oldest element
    /// when the window was already full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_back()
        } else {
            None
        };

        self.items.push_front(item);
        evicted
    }

    /// The `k`-th most recent item
    pub fn at(&self, k: usize) -> Result<&T> {
        let len = self.items.len();
        self.items
            .get(k)
            .ok_or(TrackError::OutOfRange { index: k, len })
    }

    pub fn at_mut(&mut self, k: usize) -> Result<&mut T> {
        let len = self.items.len();
        self.items
            .get_mut(k)
            .ok_or(TrackError::OutOfRange { index: k, len })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest first
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_capacity_below_two() {
        assert_eq!(
            FrameWindow::<u32>::new(0).unwrap_err(),
            TrackError::InvalidCapacity(0)
        );
        assert_eq!(
            FrameWindow::<u32>::new(1).unwrap_err(),
            TrackError::InvalidCapacity(1)
        );
        assert!(FrameWindow::<u32>::new(2).is_ok());
    }

    #[test]
    fn size_never_exceeds_capacity() {
        for capacity in 2..6 {
            let mut window = FrameWindow::new(capacity).unwrap();
            for i in 0..20 {
                window.push(i);
                assert!(window.len() <= capacity);
                assert_eq!(*window.at(0).unwrap(), i);
            }
            assert_eq!(window.len(), capacity);
        }
    }

    #[test]
    fn keeps_last_items_in_recency_order() {
        let capacity = 3;
        let mut window = FrameWindow::new(capacity).unwrap();
        for k in 0..4 {
            let pushed = capacity + k;
            for i in 0..pushed {
                window.push(i);
            }
            let resident: Vec<_> = window.iter().copied().collect();
            let expected: Vec<_> = (pushed - capacity..pushed).rev().collect();
            assert_eq!(resident, expected);
            window = FrameWindow::new(capacity).unwrap();
        }
    }

    #[test]
    fn push_returns_evicted_oldest() {
        let mut window = FrameWindow::new(2).unwrap();
        assert_eq!(window.push("a"), None);
        assert_eq!(window.push("b"), None);
        assert_eq!(window.push("c"), Some("a"));
        assert_eq!(*window.at(0).unwrap(), "c");
        assert_eq!(*window.at(1).unwrap(), "b");
    }

    #[test]
    fn out_of_range_is_reported_not_clamped() {
        let mut window = FrameWindow::new(2).unwrap();
        assert_eq!(
            window.at(0).unwrap_err(),
            TrackError::OutOfRange { index: 0, len: 0 }
        );
        window.push(1);
        assert_eq!(
            window.at(1).unwrap_err(),
            TrackError::OutOfRange { index: 1, len: 1 }
        );
        assert!(window.at_mut(5).is_err());
    }
}
