//! Growable fixed-stride byte buffer.
//!
//! Holds values of a single component as contiguous bytes, used to stage
//! caller data for bulk spawns. Growth doubles capacity (at least 4
//! elements) and reports allocation failure instead of aborting.

use std::fmt;

use crate::error::{EcsError, EcsResult};

/// Untyped growable array of `stride`-byte elements.
#[derive(Clone, Default)]
pub struct ComponentBuffer {
    data: Vec<u8>,
    stride: usize,
}

impl ComponentBuffer {
    /// Create an empty buffer of `stride`-byte elements.
    #[must_use]
    pub const fn new(stride: usize) -> Self {
        Self {
            data: Vec::new(),
            stride,
        }
    }

    /// Create a buffer sized for values of `T`.
    #[must_use]
    pub const fn of<T: bytemuck::Pod>() -> Self {
        Self::new(size_of::<T>())
    }

    /// Element size in bytes.
    #[must_use]
    pub const fn stride(&self) -> usize {
        self.stride
    }

    /// Number of elements stored.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capacity in elements.
    #[must_use]
    pub fn capacity(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.capacity() / self.stride
        }
    }

    /// Reserve room for at least `additional` more elements.
    pub fn reserve(&mut self, additional: usize) -> EcsResult<()> {
        let required = self
            .len()
            .checked_add(additional)
            .ok_or(EcsError::OutOfMemory)?;
        if required <= self.capacity() {
            return Ok(());
        }
        let new_capacity = self.capacity().saturating_mul(2).max(required).max(4);
        let bytes = new_capacity
            .checked_mul(self.stride)
            .ok_or(EcsError::OutOfMemory)?;
        self.data
            .try_reserve_exact(bytes - self.data.len())
            .map_err(|_| EcsError::OutOfMemory)
    }

    /// Append one element copied from `value`.
    pub fn push_raw(&mut self, value: &[u8]) -> EcsResult<()> {
        if value.len() != self.stride {
            return Err(EcsError::InvalidArgument("value does not match buffer stride"));
        }
        self.reserve(1)?;
        self.data.extend_from_slice(value);
        Ok(())
    }

    /// Append a typed value.
    pub fn push<T: bytemuck::Pod>(&mut self, value: &T) -> EcsResult<()> {
        self.push_raw(bytemuck::bytes_of(value))
    }

    /// Append `count` zeroed elements.
    pub fn push_zeroed(&mut self, count: usize) -> EcsResult<()> {
        self.reserve(count)?;
        self.data.resize(self.data.len() + count * self.stride, 0);
        Ok(())
    }

    /// Bytes of element `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(self.stride)?;
        self.data.get(start..start + self.stride)
    }

    #[must_use]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut [u8]> {
        let start = index.checked_mul(self.stride)?;
        self.data.get_mut(start..start + self.stride)
    }

    /// All elements as one contiguous byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Remove all elements, keeping the allocation.
    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl fmt::Debug for ComponentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentBuffer")
            .field("stride", &self.stride)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    #[repr(C)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn test_buffer_push_get() {
        let mut buf = ComponentBuffer::of::<Position>();

        buf.push(&Position { x: 1.0, y: 2.0 }).unwrap();
        buf.push(&Position { x: 3.0, y: 4.0 }).unwrap();

        assert_eq!(buf.len(), 2);
        assert!(buf.capacity() >= 4);
        let second: Position = bytemuck::pod_read_unaligned(buf.get(1).unwrap());
        assert_eq!(second, Position { x: 3.0, y: 4.0 });
        assert!(buf.get(2).is_none());
    }

    #[test]
    fn test_buffer_growth_doubles() {
        let mut buf = ComponentBuffer::new(4);
        for i in 0..5u32 {
            buf.push(&i).unwrap();
        }
        assert_eq!(buf.len(), 5);
        assert!(buf.capacity() >= 8);
        assert_eq!(buf.as_bytes().len(), 20);
    }

    #[test]
    fn test_stride_mismatch() {
        let mut buf = ComponentBuffer::new(8);
        assert!(matches!(
            buf.push_raw(&[0u8; 4]),
            Err(EcsError::InvalidArgument(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_push_zeroed_and_clear() {
        let mut buf = ComponentBuffer::new(2);
        buf.push_zeroed(3).unwrap();
        assert_eq!(buf.len(), 3);
        buf.get_mut(1).unwrap().copy_from_slice(&[7, 7]);
        assert_eq!(buf.as_bytes(), &[0, 0, 7, 7, 0, 0]);
        buf.clear();
        assert!(buf.is_empty());
    }
}
