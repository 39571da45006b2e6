// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt::Formatter;
use core::ops::Range;

use lock_api::Mutex;

use crate::Frame;

/// Number of 64-bit bitmap words a [`FramePool`] uses by default. Enough for 32MiB of memory.
pub const DEFAULT_BITMAP_WORDS: usize = 128;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocError;

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str("physical memory allocation failed")
    }
}

impl core::error::Error for AllocError {}

/// An implementation of `FrameAllocator` hands out page sized, page aligned physical [`Frame`]s.
///
/// `FrameAllocator` is designed to be implemented on ZSTs, references, or smart pointers.
///
/// # Safety
///
/// Frames that are currently allocated by an allocator must refer to valid physical memory and
/// must not be handed out a second time until they are deallocated.
///
/// Copying, cloning, or moving the allocator must not invalidate frames returned from it.
/// A copied or cloned allocator must behave like the original allocator.
pub unsafe trait FrameAllocator {
    /// Attempts to allocate a single frame.
    ///
    /// The contents of the returned frame are unspecified.
    ///
    /// # Errors
    ///
    /// Returning `Err` indicates that the allocator is exhausted.
    fn allocate_frame(&self) -> Result<Frame, AllocError>;

    /// Returns `frame` to the allocator.
    ///
    /// # Safety
    ///
    /// `frame` must denote a frame *currently allocated* via this allocator and nothing may
    /// access it after this call.
    unsafe fn deallocate_frame(&self, frame: Frame);

    /// Creates a "by reference" adapter for this instance of `FrameAllocator`.
    ///
    /// The returned adapter also implements `FrameAllocator` and will simply borrow this.
    #[inline(always)]
    fn by_ref(&self) -> &Self
    where
        Self: Sized,
    {
        self
    }
}

// Safety: we just forward to the inner implementation
unsafe impl<F> FrameAllocator for &F
where
    F: FrameAllocator + ?Sized,
{
    fn allocate_frame(&self) -> Result<Frame, AllocError> {
        (**self).allocate_frame()
    }

    unsafe fn deallocate_frame(&self, frame: Frame) {
        // Safety: ensured by caller
        unsafe { (**self).deallocate_frame(frame) }
    }
}

/// A frame allocator managing the contiguous frames `[base, base + count)`.
///
/// Each frame is tracked by one bit, allocation always returns the lowest free frame. The pool
/// can track at most `WORDS * 64` frames.
pub struct FramePool<R: lock_api::RawMutex, const WORDS: usize = DEFAULT_BITMAP_WORDS>(
    Mutex<R, FramePoolInner<WORDS>>,
);

struct FramePoolInner<const WORDS: usize> {
    base: Frame,
    count: u32,
    free: u32,
    // a set bit means the frame is in use (or doesn't exist)
    used: [u64; WORDS],
}

impl<R: lock_api::RawMutex, const WORDS: usize> FramePool<R, WORDS> {
    /// Creates a pool of `count` free frames starting at `base`.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the bitmap capacity or the frames extend past [`Frame::MAX`].
    pub fn new(base: Frame, count: usize) -> Self {
        assert!(
            count <= WORDS * 64,
            "{count} frames exceed the bitmap capacity of {} frames",
            WORDS * 64
        );
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        assert!(
            base.number()
                .checked_add(count)
                .is_some_and(|end| end <= Frame::MAX.number() + 1),
            "frames extend past the physical address space"
        );

        let mut used = [u64::MAX; WORDS];
        for index in 0..count as usize {
            used[index / 64] &= !(1 << (index % 64));
        }

        log::trace!("new frame pool {base}..+{count}");

        Self(Mutex::new(FramePoolInner {
            base,
            count,
            free: count,
            used,
        }))
    }

    /// Returns the numbers of the frames managed by this pool.
    ///
    /// The end is exclusive and may be one past [`Frame::MAX`].
    pub fn frames(&self) -> Range<u32> {
        let inner = self.0.lock();
        let start = inner.base.number();
        start..start + inner.count
    }

    /// Returns the number of frames currently available for allocation.
    pub fn free_frames(&self) -> usize {
        self.0.lock().free as usize
    }

    /// Returns `true` if `frame` is managed by this pool, regardless of whether it is allocated.
    pub fn contains(&self, frame: Frame) -> bool {
        self.0.lock().index_of(frame).is_some()
    }

    /// Marks the frames numbered `range` as used, so they are never handed out.
    ///
    /// Frames in `range` that are already allocated stay allocated.
    ///
    /// # Panics
    ///
    /// Panics if `range` is not fully contained in this pool.
    pub fn reserve(&self, range: Range<u32>) {
        let mut inner = self.0.lock();

        let start = range.start.checked_sub(inner.base.number());
        let end = range.end.checked_sub(inner.base.number());
        let (Some(start), Some(end)) = (start, end) else {
            panic!("reserved range {range:?} is outside of the pool");
        };
        assert!(
            start <= end && end <= inner.count,
            "reserved range {range:?} is outside of the pool"
        );

        log::trace!("reserving frames {range:?}");

        for index in start as usize..end as usize {
            if !inner.is_used(index) {
                inner.set_used(index, true);
                inner.free -= 1;
            }
        }
    }
}

impl<R: lock_api::RawMutex, const WORDS: usize> core::fmt::Debug for FramePool<R, WORDS> {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let inner = self.0.lock();
        f.debug_struct("FramePool")
            .field("base", &inner.base)
            .field("count", &inner.count)
            .field("free", &inner.free)
            .finish_non_exhaustive()
    }
}

// Safety: the pool manages raw physical frames, they remain valid theoretically forever we merely
// hand out "land claims" to them. The bitmap ensures no frame is handed out twice.
unsafe impl<R: lock_api::RawMutex, const WORDS: usize> FrameAllocator for FramePool<R, WORDS> {
    fn allocate_frame(&self) -> Result<Frame, AllocError> {
        let frame = self.0.lock().allocate()?;
        log::trace!("allocated frame {frame}");
        Ok(frame)
    }

    unsafe fn deallocate_frame(&self, frame: Frame) {
        log::trace!("deallocating frame {frame}");
        self.0.lock().deallocate(frame);
    }
}

impl<const WORDS: usize> FramePoolInner<WORDS> {
    fn index_of(&self, frame: Frame) -> Option<usize> {
        let index = frame.number().checked_sub(self.base.number())?;
        (index < self.count).then_some(index as usize)
    }

    fn is_used(&self, index: usize) -> bool {
        self.used[index / 64] & (1 << (index % 64)) != 0
    }

    fn set_used(&mut self, index: usize, used: bool) {
        if used {
            self.used[index / 64] |= 1 << (index % 64);
        } else {
            self.used[index / 64] &= !(1 << (index % 64));
        }
    }

    fn allocate(&mut self) -> Result<Frame, AllocError> {
        let (word_index, word) = self
            .used
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)
            .ok_or(AllocError)?;

        let index = word_index * 64 + word.trailing_ones() as usize;
        self.set_used(index, true);
        self.free -= 1;

        #[expect(
            clippy::cast_possible_truncation,
            reason = "index < count which fits into u32"
        )]
        Ok(self.base.add(index as u32))
    }

    fn deallocate(&mut self, frame: Frame) {
        let Some(index) = self.index_of(frame) else {
            panic!("frame {frame} is not managed by this pool");
        };
        assert!(self.is_used(index), "frame {frame} is not allocated");

        self.set_used(index, false);
        self.free += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;

    type Pool = FramePool<parking_lot::RawMutex>;

    #[test_log::test]
    fn lowest_free_first() {
        let pool = Pool::new(Frame::new(16), 16);
        assert_eq!(pool.frames(), 16..32);
        assert_eq!(pool.free_frames(), 16);

        assert_eq!(pool.allocate_frame(), Ok(Frame::new(16)));
        assert_eq!(pool.allocate_frame(), Ok(Frame::new(17)));
        assert_eq!(pool.allocate_frame(), Ok(Frame::new(18)));

        // Safety: frame 17 was allocated above and is never used
        unsafe { pool.deallocate_frame(Frame::new(17)) };
        assert_eq!(pool.allocate_frame(), Ok(Frame::new(17)));
        assert_eq!(pool.allocate_frame(), Ok(Frame::new(19)));
        assert_eq!(pool.free_frames(), 12);
    }

    #[test_log::test]
    fn exhaustion() {
        let pool = Pool::new(Frame::new(0), 2);

        assert!(pool.allocate_frame().is_ok());
        assert!(pool.allocate_frame().is_ok());
        assert_eq!(pool.allocate_frame(), Err(AllocError));
        assert_eq!(pool.free_frames(), 0);
    }

    #[test_log::test]
    fn empty_pool() {
        let pool = Pool::new(Frame::new(0), 0);
        assert_eq!(pool.allocate_frame(), Err(AllocError));
    }

    #[test_log::test]
    fn spans_multiple_words() {
        let pool: FramePool<parking_lot::RawMutex, 2> = FramePool::new(Frame::new(100), 100);

        for n in 0..100 {
            assert_eq!(pool.allocate_frame(), Ok(Frame::new(100 + n)));
        }
        assert_eq!(pool.allocate_frame(), Err(AllocError));
    }

    #[test_log::test]
    fn reserve() {
        let pool = Pool::new(Frame::new(0), 8);

        pool.reserve(0..3);
        assert_eq!(pool.free_frames(), 5);
        assert_eq!(pool.allocate_frame(), Ok(Frame::new(3)));

        // overlapping an allocated frame doesn't double count
        pool.reserve(3..5);
        assert_eq!(pool.free_frames(), 3);
        assert_eq!(pool.allocate_frame(), Ok(Frame::new(5)));
    }

    #[test]
    fn contains() {
        let pool = Pool::new(Frame::new(16), 16);

        assert!(pool.contains(Frame::new(16)));
        assert!(pool.contains(Frame::new(31)));
        assert!(!pool.contains(Frame::new(15)));
        assert!(!pool.contains(Frame::new(32)));
    }

    #[test]
    fn by_ref() {
        let pool = Pool::new(Frame::new(0), 4);
        let alloc = pool.by_ref();

        assert_eq!(alloc.allocate_frame(), Ok(Frame::new(0)));
        assert_eq!(pool.free_frames(), 3);
    }

    #[test]
    #[should_panic(expected = "is not allocated")]
    fn double_free() {
        let pool = Pool::new(Frame::new(0), 4);
        let frame = pool.allocate_frame().unwrap();

        // Safety: this is expected to panic
        unsafe {
            pool.deallocate_frame(frame);
            pool.deallocate_frame(frame);
        }
    }

    #[test]
    #[should_panic(expected = "is not managed by this pool")]
    fn foreign_frame() {
        let pool = Pool::new(Frame::new(0), 4);

        // Safety: this is expected to panic
        unsafe { pool.deallocate_frame(Frame::new(4)) };
    }

    #[test_log::test]
    fn pool_at_the_top_of_physical_memory() {
        let pool = Pool::new(Frame::new(0xF_FFF0), 16);
        assert_eq!(pool.frames(), 0xF_FFF0..0x10_0000);
        assert!(pool.contains(Frame::MAX));

        pool.reserve(0xF_FFF0..0xF_FFFF);
        assert_eq!(pool.allocate_frame(), Ok(Frame::MAX));
        assert_eq!(Frame::MAX.start_address().get(), 0xFFFF_F000);
        assert_eq!(pool.allocate_frame(), Err(AllocError));

        // Safety: the frame was allocated above and is never used
        unsafe { pool.deallocate_frame(Frame::MAX) };
        assert_eq!(pool.free_frames(), 1);
    }

    #[test]
    #[should_panic(expected = "frames extend past the physical address space")]
    fn pool_past_the_top_of_physical_memory() {
        let _ = Pool::new(Frame::new(0xF_FFF0), 17);
    }

    #[test]
    #[should_panic(expected = "is outside of the pool")]
    fn reserve_outside_of_pool() {
        let pool = Pool::new(Frame::new(16), 16);
        pool.reserve(30..33);
    }

    #[test]
    #[should_panic(expected = "exceed the bitmap capacity")]
    fn too_many_frames() {
        let _: FramePool<parking_lot::RawMutex, 1> = FramePool::new(Frame::new(0), 65);
    }

    proptest! {
        #[test]
        fn frames_are_unique_and_in_range(base in 0u32..1024, count in 0usize..300) {
            let pool = Pool::new(Frame::new(base), count);
            let range = pool.frames();

            let mut seen = BTreeSet::new();
            while let Ok(frame) = pool.allocate_frame() {
                prop_assert!(range.contains(&frame.number()));
                prop_assert!(seen.insert(frame));
            }

            prop_assert_eq!(seen.len(), count);
            prop_assert_eq!(pool.free_frames(), 0);
        }
    }
}
