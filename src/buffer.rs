//! Bounded, keyframe-aware frame buffer
//!
//! Keyframes and ordinary frames live in two queues tagged with an arrival
//! sequence number. Overflow evicts the oldest ordinary frame; only when no
//! ordinary frame is left does the oldest keyframe go. Both appends and
//! evictions are O(1); [`FrameBuffer::snapshot`] merges the queues back into
//! arrival order in O(n).

use std::collections::VecDeque;
use std::sync::Arc;

use crate::types::Frame;

/// Default bound on retained frames
pub const DEFAULT_MAX_FRAMES: usize = 1000;

#[derive(Debug, Clone)]
struct Slot {
    seq: u64,
    frame: Arc<Frame>,
}

/// What an append or capacity change pushed out of the buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evicted {
    /// Ordinary frames removed
    pub ordinary: usize,
    /// Keyframes removed because keyframes alone exceeded the bound
    pub keyframes: usize,
}

impl Evicted {
    pub fn is_empty(&self) -> bool {
        self.ordinary == 0 && self.keyframes == 0
    }
}

/// Bounded buffer preserving arrival order and keyframes
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    capacity: usize,
    keyframes: VecDeque<Slot>,
    ordinary: VecDeque<Slot>,
    next_seq: u64,
}

impl FrameBuffer {
    /// Create a buffer holding at most `capacity` frames (minimum 1)
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            keyframes: VecDeque::new(),
            ordinary: VecDeque::new(),
            next_seq: 0,
        }
    }

    /// Append a frame, evicting if the bound is exceeded
    pub fn push(&mut self, frame: Arc<Frame>) -> Evicted {
        let slot = Slot { seq: self.next_seq, frame };
        self.next_seq += 1;

        if slot.frame.is_keyframe {
            self.keyframes.push_back(slot);
        } else {
            self.ordinary.push_back(slot);
        }

        if self.len() > self.capacity { self.evict_to_capacity() } else { Evicted::default() }
    }

    /// Change the bound, evicting immediately if it shrank
    pub fn set_capacity(&mut self, capacity: usize) -> Evicted {
        self.capacity = capacity.max(1);
        self.evict_to_capacity()
    }

    fn evict_to_capacity(&mut self) -> Evicted {
        let mut evicted = Evicted::default();
        while self.len() > self.capacity {
            if self.ordinary.pop_front().is_some() {
                evicted.ordinary += 1;
            } else if self.keyframes.pop_front().is_some() {
                evicted.keyframes += 1;
            } else {
                break;
            }
        }
        evicted
    }

    /// Retained frames in arrival order
    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        let mut out = Vec::with_capacity(self.len());
        let mut keys = self.keyframes.iter().peekable();
        let mut plain = self.ordinary.iter().peekable();

        loop {
            let take_keyframe = match (keys.peek(), plain.peek()) {
                (Some(k), Some(p)) => k.seq < p.seq,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_keyframe { keys.next() } else { plain.next() };
            if let Some(slot) = next {
                out.push(Arc::clone(&slot.frame));
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.keyframes.clear();
        self.ordinary.clear();
    }

    pub fn len(&self) -> usize {
        self.keyframes.len() + self.ordinary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Keyframes currently held
    pub fn keyframe_len(&self) -> usize {
        self.keyframes.len()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAMES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::data_frame;
    use proptest::prelude::*;

    fn steps(frames: &[Arc<Frame>]) -> Vec<u64> {
        frames.iter().filter_map(|f| f.sequence.timestep).collect()
    }

    #[test]
    fn keeps_most_recent_ordinary_frames() {
        let mut buffer = FrameBuffer::new(3);
        let mut dropped = 0;
        for step in 1..=5 {
            dropped += buffer.push(Arc::new(data_frame(step, false))).ordinary;
        }
        assert_eq!(steps(&buffer.snapshot()), vec![3, 4, 5]);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn keyframe_survives_long_run_of_ordinary_frames() {
        let mut buffer = FrameBuffer::new(10);
        buffer.push(Arc::new(data_frame(1, true)));
        for step in 2..=1000 {
            buffer.push(Arc::new(data_frame(step, false)));
        }
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 10);
        assert_eq!(buffer.keyframe_len(), 1);
        assert!(snapshot[0].is_keyframe);
        assert_eq!(steps(&snapshot), vec![1, 992, 993, 994, 995, 996, 997, 998, 999, 1000]);
    }

    #[test]
    fn snapshot_interleaves_in_arrival_order() {
        let mut buffer = FrameBuffer::new(6);
        for step in 1..=6 {
            buffer.push(Arc::new(data_frame(step, step % 2 == 0)));
        }
        assert_eq!(steps(&buffer.snapshot()), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn keyframe_overload_trims_oldest_keyframes() {
        let mut buffer = FrameBuffer::new(2);
        let evicted: Vec<Evicted> =
            (1..=4).map(|step| buffer.push(Arc::new(data_frame(step, true)))).collect();
        assert_eq!(steps(&buffer.snapshot()), vec![3, 4]);
        assert_eq!(evicted.iter().map(|e| e.keyframes).sum::<usize>(), 2);
        assert!(evicted.iter().all(|e| e.ordinary == 0));
    }

    #[test]
    fn shrinking_capacity_evicts_immediately() {
        let mut buffer = FrameBuffer::new(5);
        for step in 1..=5 {
            buffer.push(Arc::new(data_frame(step, step == 1)));
        }
        let evicted = buffer.set_capacity(2);
        assert_eq!(evicted, Evicted { ordinary: 3, keyframes: 0 });
        assert_eq!(steps(&buffer.snapshot()), vec![1, 5]);
    }

    #[test]
    fn frames_are_shared_not_copied() {
        let mut buffer = FrameBuffer::new(4);
        let frame = Arc::new(data_frame(1, true));
        buffer.push(Arc::clone(&frame));
        assert!(Arc::ptr_eq(&buffer.snapshot()[0], &frame));
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut buffer = FrameBuffer::new(0);
        buffer.push(Arc::new(data_frame(1, false)));
        buffer.push(Arc::new(data_frame(2, false)));
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(steps(&buffer.snapshot()), vec![2]);
    }

    #[test]
    fn clear_empties_buffer() {
        let mut buffer = FrameBuffer::new(4);
        buffer.push(Arc::new(data_frame(1, true)));
        buffer.push(Arc::new(data_frame(2, false)));
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.snapshot().is_empty());
    }

    proptest! {
        #[test]
        fn length_never_exceeds_bound(
            capacity in 1usize..50,
            flags in prop::collection::vec(any::<bool>(), 0..300)
        ) {
            let mut buffer = FrameBuffer::new(capacity);
            for (step, is_key) in flags.iter().enumerate() {
                buffer.push(Arc::new(data_frame(step as u64, *is_key)));
                prop_assert!(buffer.len() <= capacity);
            }
        }

        #[test]
        fn keyframes_retained_while_they_fit(
            capacity in 1usize..50,
            flags in prop::collection::vec(any::<bool>(), 0..300)
        ) {
            let keyframe_steps: Vec<u64> = flags
                .iter()
                .enumerate()
                .filter(|(_, is_key)| **is_key)
                .map(|(step, _)| step as u64)
                .collect();
            prop_assume!(keyframe_steps.len() <= capacity);

            let mut buffer = FrameBuffer::new(capacity);
            for (step, is_key) in flags.iter().enumerate() {
                buffer.push(Arc::new(data_frame(step as u64, *is_key)));
            }

            let snapshot = buffer.snapshot();
            let retained: Vec<u64> =
                snapshot.iter().filter(|f| f.is_keyframe).filter_map(|f| f.sequence.timestep).collect();
            prop_assert_eq!(retained, keyframe_steps);

            let all = steps(&snapshot);
            let mut sorted = all.clone();
            sorted.sort_unstable();
            prop_assert_eq!(all, sorted);
        }
    }
}
