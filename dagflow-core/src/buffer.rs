use std::cell::{Ref, RefCell, RefMut};
use std::fmt::Debug;
use std::rc::Rc;

use crate::error::DagError;

/// Reference-counted flat storage shared by node values, gradients and
/// optimizer vectors.
///
/// Cloning a `SharedBuffer` clones the handle, not the data: every clone and
/// every [`BufferView`] carved out of it observes the same elements. The storage
/// lives as long as the last handle or view referencing it.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<f64>>>);

impl SharedBuffer {
    /// Wraps `data` into a new shared buffer.
    pub fn new(data: Vec<f64>) -> Self {
        SharedBuffer(Rc::new(RefCell::new(data)))
    }

    /// Creates a zero-filled buffer of `len` elements.
    pub fn zeros(len: usize) -> Self {
        Self::new(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Immutable access to the whole buffer.
    ///
    /// Panics if a mutable borrow (through this handle or any view) is alive.
    pub fn read(&self) -> Ref<'_, [f64]> {
        Ref::map(self.0.borrow(), |v| v.as_slice())
    }

    /// Mutable access to the whole buffer.
    ///
    /// Panics if any other borrow (through this handle or any view) is alive.
    pub fn write(&self) -> RefMut<'_, [f64]> {
        RefMut::map(self.0.borrow_mut(), |v| v.as_mut_slice())
    }

    /// Copies the buffer contents out.
    pub fn to_vec(&self) -> Vec<f64> {
        self.0.borrow().clone()
    }

    /// Returns true if both handles point to the same storage.
    pub fn ptr_eq(&self, other: &SharedBuffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Number of live handles and views on this storage.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Carves a `len`-element window starting at `offset`.
    ///
    /// # Errors
    /// Returns `DagError::BufferTooSmall` if the window does not fit.
    pub fn view(&self, offset: usize, len: usize) -> Result<BufferView, DagError> {
        let actual = self.len();
        if offset + len > actual {
            return Err(DagError::BufferTooSmall {
                required: len,
                offset,
                actual,
            });
        }
        Ok(BufferView {
            buffer: self.clone(),
            offset,
            len,
        })
    }
}

/// A window `[offset, offset + len)` into a [`SharedBuffer`].
///
/// Node values and gradients are stored as views. A freshly created node owns a
/// private buffer; `NodeArray::make_shared_value` re-points the views into one
/// external buffer so that writes through either side are mutually visible.
#[derive(Debug, Clone)]
pub struct BufferView {
    buffer: SharedBuffer,
    offset: usize,
    len: usize,
}

impl BufferView {
    /// Creates a view spanning a new private buffer holding `data`.
    pub fn owned(data: Vec<f64>) -> Self {
        let len = data.len();
        BufferView {
            buffer: SharedBuffer::new(data),
            offset: 0,
            len,
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self::owned(vec![0.0; len])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The storage this view points into.
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    pub fn is_view_of(&self, buffer: &SharedBuffer) -> bool {
        self.buffer.ptr_eq(buffer)
    }

    pub fn read(&self) -> Ref<'_, [f64]> {
        let (start, end) = (self.offset, self.offset + self.len);
        Ref::map(self.buffer.0.borrow(), |v| &v[start..end])
    }

    pub fn write(&self) -> RefMut<'_, [f64]> {
        let (start, end) = (self.offset, self.offset + self.len);
        RefMut::map(self.buffer.0.borrow_mut(), |v| &mut v[start..end])
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.read().to_vec()
    }

    /// Overwrites the viewed elements with `src`.
    ///
    /// # Errors
    /// Returns `DagError::LengthMismatch` if `src` does not have exactly `len` elements.
    pub fn copy_from_slice(&self, src: &[f64]) -> Result<(), DagError> {
        if src.len() != self.len {
            return Err(DagError::LengthMismatch {
                expected: self.len,
                actual: src.len(),
                operation: "BufferView::copy_from_slice".to_string(),
            });
        }
        self.write().copy_from_slice(src);
        Ok(())
    }

    /// Adds `src` elementwise into the viewed elements.
    pub fn add_from_slice(&self, src: &[f64]) -> Result<(), DagError> {
        if src.len() != self.len {
            return Err(DagError::LengthMismatch {
                expected: self.len,
                actual: src.len(),
                operation: "BufferView::add_from_slice".to_string(),
            });
        }
        let mut dst = self.write();
        for (d, s) in dst.iter_mut().zip(src) {
            *d += *s;
        }
        Ok(())
    }

    pub fn fill(&self, value: f64) {
        self.write().fill(value);
    }
}

#[cfg(test)]
#[path = "buffer_test.rs"]
mod tests;
