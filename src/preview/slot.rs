use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::preview::render::{RenderedImage, RenderedImagePair};

/// Latest rendered image pair, shared between the acquisition loop and
/// observers on other threads.
///
/// Publishing swaps a whole `Arc<RenderedImagePair>`; readers clone the
/// `Arc` and never see a pair that is half old, half new.
pub struct ImageSlot {
    current: Mutex<Option<Arc<RenderedImagePair>>>,
    /// Incremented on each publish, independent of frame sequence numbers
    /// which restart with every device session.
    generation: AtomicU64,
}

impl ImageSlot {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    /// Replace the current pair.
    pub fn publish(&self, pair: RenderedImagePair) {
        let pair = Arc::new(pair);
        *self.current.lock() = Some(pair);
        self.generation.fetch_add(1, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// The most recently published pair, if any.
    pub fn latest(&self) -> Option<Arc<RenderedImagePair>> {
        self.current.lock().clone()
    }

    pub fn color(&self) -> Option<Arc<RenderedImage>> {
        self.latest().map(|pair| Arc::clone(&pair.color))
    }

    pub fn depth(&self) -> Option<Arc<RenderedImage>> {
        self.latest().map(|pair| Arc::clone(&pair.depth))
    }
}

impl Default for ImageSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_pair(value: u8, sequence: u64) -> RenderedImagePair {
        RenderedImagePair {
            sequence,
            timestamp_us: sequence * 10,
            color: Arc::new(RenderedImage::rgb8(1, 1, vec![value; 3])),
            depth: Arc::new(RenderedImage::rgb8(1, 1, vec![value; 3])),
            depth_valid: None,
        }
    }

    #[test]
    fn slot_is_empty_until_published() {
        let slot = ImageSlot::new();
        assert!(slot.latest().is_none());
        assert!(slot.color().is_none());
        assert!(slot.depth().is_none());
        assert_eq!(slot.generation(), 0);
    }

    #[test]
    fn publish_replaces_whole_pair() {
        let slot = ImageSlot::new();
        slot.publish(make_pair(1, 0));
        slot.publish(make_pair(2, 1));

        let pair = slot.latest().unwrap();
        assert_eq!(pair.sequence, 1);
        assert_eq!(pair.color.data[0], 2);
        assert_eq!(pair.depth.data[0], 2);
        assert_eq!(slot.generation(), 2);
    }

    #[test]
    fn readers_keep_their_pair_after_publish() {
        let slot = ImageSlot::new();
        slot.publish(make_pair(1, 0));
        let held = slot.color().unwrap();

        slot.publish(make_pair(9, 1));

        assert_eq!(held.data[0], 1);
        assert_eq!(slot.color().unwrap().data[0], 9);
    }

    #[test]
    fn latest_returns_arc_not_clone() {
        let slot = ImageSlot::new();
        slot.publish(make_pair(42, 0));

        let a = slot.latest().unwrap();
        let b = slot.latest().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn concurrent_readers_see_matching_pairs() {
        let slot = Arc::new(ImageSlot::new());
        slot.publish(make_pair(0, 0));

        let writer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || {
                for i in 1..200u64 {
                    slot.publish(make_pair((i % 256) as u8, i));
                }
            })
        };

        for _ in 0..200 {
            let pair = slot.latest().unwrap();
            assert_eq!(pair.color.data[0], pair.depth.data[0]);
        }
        writer.join().unwrap();
    }

    #[test]
    fn image_slot_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ImageSlot>();
    }
}
