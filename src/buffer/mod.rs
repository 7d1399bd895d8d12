//! The [self] module exposes the [ByteBuffer], a fixed capacity byte window tracked by a
//! `position`, a `limit` and a `capacity`, with `0 <= position <= limit <= capacity` holding
//! after every operation.
//!
//! A [ByteBuffer] is backed by one of two kinds of storage, selected at construction:
//! - heap storage via [ByteBuffer::allocate], a plain boxed slice owned by the buffer.
//! - direct storage via [ByteBuffer::allocate_direct], native memory allocated outside the rust
//! allocator and released exactly once on [ByteBuffer::close]. These are what the
//! [crate::net] channels hand to the kernel without an intermediate copy.
//!
//! Buffers never grow, callers needing more room allocate a new buffer.

mod native;

use std::fmt;

use crate::error::{Error, Result};

use native::NativeMemory;

enum Storage {
    Heap(Box<[u8]>),
    Direct(NativeMemory),
}

/// A bounded byte buffer, see the [module level](self) documentation for details.
pub struct ByteBuffer {
    capacity: usize,
    limit: usize,
    position: usize,
    storage: Storage,
}

impl ByteBuffer {
    /// Allocate a new heap backed buffer of the given capacity.
    ///
    /// # Panics
    ///
    /// Like [Vec], this panics if `capacity` exceeds `isize::MAX` bytes. Use
    /// [ByteBuffer::allocate_direct] for a fallible allocation.
    pub fn allocate(capacity: usize) -> ByteBuffer {
        ByteBuffer::with_storage(capacity, Storage::Heap(vec![0u8; capacity].into_boxed_slice()))
    }

    /// Allocate a new direct buffer of the given capacity using native memory. Fails with a
    /// [Error::Argument] if the capacity can not be represented as a native allocation.
    pub fn allocate_direct(capacity: usize) -> Result<ByteBuffer> {
        let memory = NativeMemory::allocate(capacity)?;
        Ok(ByteBuffer::with_storage(capacity, Storage::Direct(memory)))
    }

    fn with_storage(capacity: usize, storage: Storage) -> ByteBuffer {
        ByteBuffer {
            capacity,
            limit: capacity,
            position: 0,
            storage,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.limit > self.position
    }

    /// Whether this buffer is backed by native memory.
    pub fn is_direct(&self) -> bool {
        matches!(self.storage, Storage::Direct(..))
    }

    /// Whether this buffer is backed by an accessible heap array, see [ByteBuffer::array].
    pub fn has_array(&self) -> bool {
        !self.is_direct()
    }

    pub fn is_read_only(&self) -> bool {
        false
    }

    /// Whether [ByteBuffer::close] has released a direct buffer's native memory.
    pub fn is_closed(&self) -> bool {
        match self.storage {
            Storage::Heap(..) => false,
            Storage::Direct(ref memory) => memory.is_released(),
        }
    }

    /// Set a new limit, clamping the position down to it if needed. Fails with a
    /// [Error::Argument] if the limit exceeds the capacity.
    pub fn set_limit(&mut self, n: usize) -> Result<&mut ByteBuffer> {
        if n > self.capacity {
            return Err(Error::argument(format!(
                "limit is out of bounds: {}, capacity = {}",
                n, self.capacity
            )));
        }

        self.limit = n;
        if self.position > n {
            self.position = n;
        }
        Ok(self)
    }

    /// Set a new position, which must be strictly less than the current limit.
    pub fn set_position(&mut self, n: usize) -> Result<&mut ByteBuffer> {
        if n >= self.limit {
            return Err(Error::argument(format!(
                "position is out of bounds: {}, limit = {}",
                n, self.limit
            )));
        }

        self.position = n;
        Ok(self)
    }

    /// Reset to the empty state ready for filling, position zero and limit at capacity.
    pub fn clear(&mut self) -> &mut ByteBuffer {
        self.position = 0;
        self.limit = self.capacity;
        self
    }

    /// Prepare a just filled buffer for draining, the limit becomes the current position and the
    /// position goes back to zero.
    pub fn flip(&mut self) -> &mut ByteBuffer {
        self.limit = self.position;
        self.position = 0;
        self
    }

    /// Move the position back to zero leaving the limit untouched.
    pub fn rewind(&mut self) -> &mut ByteBuffer {
        self.position = 0;
        self
    }

    /// Read the byte at the current position and advance.
    pub fn get(&mut self) -> Result<u8> {
        if self.position >= self.limit {
            return Err(Error::State("no bytes remaining"));
        }

        let b = self.as_slice()?[self.position];
        self.position += 1;
        Ok(b)
    }

    /// Write a byte at the current position and advance.
    pub fn put(&mut self, b: u8) -> Result<()> {
        if self.position >= self.limit {
            return Err(Error::State("no space remaining"));
        }

        let position = self.position;
        self.as_mut_slice()?[position] = b;
        self.position += 1;
        Ok(())
    }

    /// Copy all of `other`'s remaining bytes into this buffer, advancing both positions. Fails
    /// with a [Error::Argument] if this buffer does not have room for them.
    pub fn put_buffer(&mut self, other: &mut ByteBuffer) -> Result<()> {
        let size = other.remaining();
        if size > self.remaining() {
            return Err(Error::argument(format!(
                "not enough space: {} bytes needed, {} remaining",
                size,
                self.remaining()
            )));
        }

        let src = other.remaining_slice()?;
        self.remaining_slice_mut()?[..size].copy_from_slice(src);

        other.position += size;
        self.position += size;
        Ok(())
    }

    /// Copy the given bytes into this buffer, advancing the position.
    pub fn put_slice(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.remaining() {
            return Err(Error::argument(format!(
                "not enough space: {} bytes needed, {} remaining",
                src.len(),
                self.remaining()
            )));
        }

        self.remaining_slice_mut()?[..src.len()].copy_from_slice(src);
        self.position += src.len();
        Ok(())
    }

    /// Fill `dst` from this buffer's remaining bytes, advancing the position.
    pub fn get_slice(&mut self, dst: &mut [u8]) -> Result<()> {
        if dst.len() > self.remaining() {
            return Err(Error::argument(format!(
                "not enough data: {} bytes requested, {} remaining",
                dst.len(),
                self.remaining()
            )));
        }

        dst.copy_from_slice(&self.remaining_slice()?[..dst.len()]);
        self.position += dst.len();
        Ok(())
    }

    /// The bytes between position and limit.
    pub fn remaining_slice(&self) -> Result<&[u8]> {
        let (position, limit) = (self.position, self.limit);
        Ok(&self.as_slice()?[position..limit])
    }

    /// The bytes between position and limit, mutably.
    pub fn remaining_slice_mut(&mut self) -> Result<&mut [u8]> {
        let (position, limit) = (self.position, self.limit);
        Ok(&mut self.as_mut_slice()?[position..limit])
    }

    /// The entire backing heap array, irrespective of position and limit. Direct buffers have no
    /// accessible array and fail with [Error::State].
    pub fn array(&self) -> Result<&[u8]> {
        match self.storage {
            Storage::Heap(ref array) => Ok(array),
            Storage::Direct(..) => Err(Error::State("direct buffers have no backing array")),
        }
    }

    /// Mutable version of [ByteBuffer::array].
    pub fn array_mut(&mut self) -> Result<&mut [u8]> {
        match self.storage {
            Storage::Heap(ref mut array) => Ok(array),
            Storage::Direct(..) => Err(Error::State("direct buffers have no backing array")),
        }
    }

    /// Move the position forward after an external write into or read from
    /// [ByteBuffer::remaining_slice_mut] or [ByteBuffer::remaining_slice].
    pub(crate) fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.position += n;
    }

    /// Release a direct buffer's native memory, any further access fails with [Error::State].
    /// This is a no-op for heap buffers and for direct buffers that are already closed.
    pub fn close(&mut self) {
        if let Storage::Direct(ref mut memory) = self.storage {
            memory.release();
        }
    }

    fn as_slice(&self) -> Result<&[u8]> {
        match self.storage {
            Storage::Heap(ref array) => Ok(array),
            Storage::Direct(ref memory) => memory.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        match self.storage {
            Storage::Heap(ref mut array) => Ok(array),
            Storage::Direct(ref mut memory) => memory.as_mut_slice(),
        }
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("direct", &self.is_direct())
            .field("capacity", &self.capacity)
            .field("limit", &self.limit)
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(buf: &ByteBuffer) {
        assert!(buf.position() <= buf.limit());
        assert!(buf.limit() <= buf.capacity());
        assert_eq!(buf.remaining(), buf.limit() - buf.position());
    }

    fn both(capacity: usize) -> [ByteBuffer; 2] {
        [
            ByteBuffer::allocate(capacity),
            ByteBuffer::allocate_direct(capacity).unwrap(),
        ]
    }

    #[test]
    fn new_buffers_are_empty_consumed() {
        for buf in both(16) {
            assert_eq!(buf.capacity(), 16);
            assert_eq!(buf.limit(), 16);
            assert_eq!(buf.position(), 0);
            assert!(buf.has_remaining());
        }
    }

    #[test]
    fn fill_flip_drain_clear() {
        for mut buf in both(8) {
            for b in 0..5u8 {
                buf.put(b).unwrap();
            }
            buf.flip();
            assert_eq!(buf.limit(), 5);
            assert_eq!(buf.position(), 0);

            let mut drained = Vec::new();
            while buf.has_remaining() {
                drained.push(buf.get().unwrap());
            }
            assert_eq!(drained, vec![0, 1, 2, 3, 4]);
            assert!(matches!(buf.get(), Err(Error::State(..))));

            buf.clear();
            assert_eq!(buf.position(), 0);
            assert_eq!(buf.limit(), buf.capacity());
        }
    }

    #[test]
    fn limit_clamps_position_and_rejects_out_of_bounds() {
        for mut buf in both(10) {
            for _ in 0..6 {
                buf.put(1).unwrap();
            }
            buf.set_limit(4).unwrap();
            assert_eq!(buf.position(), 4);
            assert!(matches!(buf.set_limit(11), Err(Error::Argument(..))));
            assert_eq!(buf.limit(), 4);
        }
    }

    #[test]
    fn position_must_stay_below_limit() {
        let mut buf = ByteBuffer::allocate(10);
        buf.set_position(9).unwrap();
        assert!(matches!(buf.set_position(10), Err(Error::Argument(..))));

        buf.set_limit(3).unwrap();
        assert_eq!(buf.position(), 3);
        assert!(matches!(buf.set_position(3), Err(Error::Argument(..))));
        buf.set_position(2).unwrap();
        assert_eq!(buf.remaining(), 1);
    }

    #[test]
    fn rewind_keeps_limit() {
        let mut buf = ByteBuffer::allocate(4);
        buf.put_slice(b"abc").unwrap();
        buf.flip();
        buf.get().unwrap();
        buf.rewind();
        assert_eq!(buf.position(), 0);
        assert_eq!(buf.limit(), 3);
    }

    #[test]
    fn put_full_buffer_fails() {
        for mut buf in both(2) {
            buf.put(1).unwrap();
            buf.put(2).unwrap();
            assert!(matches!(buf.put(3), Err(Error::State(..))));
        }
    }

    #[test]
    fn bulk_put_between_kinds() {
        for (mut src, mut dst) in [
            (ByteBuffer::allocate(8), ByteBuffer::allocate_direct(8).unwrap()),
            (ByteBuffer::allocate_direct(8).unwrap(), ByteBuffer::allocate(8)),
            (ByteBuffer::allocate_direct(8).unwrap(), ByteBuffer::allocate_direct(8).unwrap()),
            (ByteBuffer::allocate(8), ByteBuffer::allocate(8)),
        ] {
            src.put_slice(b"hello").unwrap();
            src.flip();
            src.get().unwrap();

            dst.put(b'>').unwrap();
            dst.put_buffer(&mut src).unwrap();

            assert_eq!(src.position(), 5);
            assert!(!src.has_remaining());
            assert_eq!(dst.position(), 5);

            dst.flip();
            let mut out = [0u8; 5];
            dst.get_slice(&mut out).unwrap();
            assert_eq!(&out, b">ello");
        }
    }

    #[test]
    fn bulk_put_without_room_fails_untouched() {
        let mut src = ByteBuffer::allocate(8);
        let mut dst = ByteBuffer::allocate_direct(4).unwrap();

        let err = dst.put_buffer(&mut src);
        assert!(matches!(err, Err(Error::Argument(..))));
        assert_eq!(src.position(), 0);
        assert_eq!(dst.position(), 0);

        assert!(matches!(dst.put_slice(&[0u8; 5]), Err(Error::Argument(..))));
        let mut too_big = [0u8; 5];
        assert!(matches!(dst.get_slice(&mut too_big), Err(Error::Argument(..))));
    }

    #[test]
    fn direct_buffer_access_after_close_fails() {
        let mut buf = ByteBuffer::allocate_direct(4).unwrap();
        buf.put(1).unwrap();
        buf.close();
        buf.close();
        assert!(buf.is_closed());
        assert!(matches!(buf.put(2), Err(Error::State(..))));
        buf.flip();
        assert!(matches!(buf.get(), Err(Error::State(..))));
        assert!(buf.remaining_slice().is_err());
    }

    #[test]
    fn heap_close_is_noop() {
        let mut buf = ByteBuffer::allocate(4);
        buf.close();
        assert!(!buf.is_closed());
        buf.put(9).unwrap();
        assert_eq!(buf.array().unwrap()[0], 9);
    }

    #[test]
    fn array_only_for_heap_buffers() {
        let heap = ByteBuffer::allocate(3);
        let direct = ByteBuffer::allocate_direct(3).unwrap();
        assert!(heap.has_array());
        assert_eq!(heap.array().unwrap().len(), 3);
        assert!(!direct.has_array());
        assert!(matches!(direct.array(), Err(Error::State(..))));
        assert!(direct.is_direct());
        assert!(!heap.is_read_only());
    }

    #[test]
    fn zero_capacity_buffers() {
        for mut buf in both(0) {
            assert!(!buf.has_remaining());
            assert!(buf.put(1).is_err());
            assert!(buf.set_position(0).is_err());
            buf.set_limit(0).unwrap();
            buf.close();
        }
    }

    #[test]
    #[should_panic(expected = "capacity overflow")]
    fn heap_allocation_panics_on_huge_capacity() {
        ByteBuffer::allocate(usize::MAX);
    }

    #[test]
    fn direct_allocation_rejects_huge_capacity() {
        let err = ByteBuffer::allocate_direct(usize::MAX);
        assert!(matches!(err, Err(Error::Argument(..))));
    }

    #[test]
    fn invariant_holds_under_operation_sequences() {
        // Small LCG so the sequence is deterministic across runs.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = move |bound: usize| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((seed >> 33) as usize) % bound.max(1)
        };

        for mut buf in both(32) {
            for _ in 0..2000 {
                match next(8) {
                    0 => {
                        let _ = buf.set_limit(next(40));
                    }
                    1 => {
                        let _ = buf.set_position(next(40));
                    }
                    2 => {
                        buf.clear();
                    }
                    3 => {
                        buf.flip();
                    }
                    4 => {
                        buf.rewind();
                    }
                    5 => {
                        let _ = buf.put(next(256) as u8);
                    }
                    6 => {
                        let _ = buf.get();
                    }
                    _ => {
                        let len = next(8);
                        let _ = buf.put_slice(&vec![0xAB; len]);
                    }
                }
                assert_invariant(&buf);
            }
        }
    }
}
