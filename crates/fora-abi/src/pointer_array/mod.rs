//! Owning, resizable array of raw pointers.
//!
//! # Memory Layout
//!
//! ```text
//! PointerArray<T>  (#[repr(C)], identical for every T)
//!   +0   slots:    *mut *mut T   contiguous slot storage
//!   +8   count:    usize         logical size
//!   +16  capacity: usize         allocated slots
//! ```
//!
//! Generated code addresses these fields directly, so the layout is part of
//! the ABI.
//!
//! # Ownership
//!
//! Every non-null slot owns its pointee as if it were a `Box<T>`. The pointee
//! is released exactly once: when the slot is overwritten with a different
//! pointer, when a shrink truncates the slot, or when the array is dropped.

#[cfg(test)]
mod tests;

mod codegen;

use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem::{self, offset_of};
use std::ptr;
use std::slice;

use fora_core::{AbiError, Result};
use tracing::{debug, trace};

pub use codegen::ArrayOp;

const _: () = assert!(
    mem::size_of::<usize>() == 8,
    "the native ABI assumes 64-bit words"
);

pub const SLOTS_OFFSET: i32 = offset_of!(PointerArray<u8>, slots) as i32;
pub const COUNT_OFFSET: i32 = offset_of!(PointerArray<u8>, count) as i32;
pub const CAPACITY_OFFSET: i32 = offset_of!(PointerArray<u8>, capacity) as i32;

/// Smallest non-zero capacity.
const MIN_CAPACITY: usize = 4;

/// An owning array of pointers to `T`.
///
/// Not internally synchronized: concurrent mutation of one instance needs an
/// external lock, as for any `&mut` container.
#[repr(C)]
pub struct PointerArray<T> {
    slots: *mut *mut T,
    count: usize,
    capacity: usize,
    _owns: PhantomData<Box<T>>,
}

// SAFETY: the array uniquely owns its storage and every non-null pointee,
// exactly like Vec<Option<Box<T>>>.
unsafe impl<T: Send> Send for PointerArray<T> {}
unsafe impl<T: Sync> Sync for PointerArray<T> {}

impl<T> PointerArray<T> {
    /// Creates an empty array without allocating.
    pub const fn new() -> Self {
        Self {
            slots: ptr::null_mut(),
            count: 0,
            capacity: 0,
            _owns: PhantomData,
        }
    }

    /// Creates an array of `n` null slots.
    pub fn with_count(n: usize) -> Result<Self> {
        let mut array = Self::new();
        array.resize(n)?;
        Ok(array)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Sets the logical size to `n`.
    ///
    /// New slots are null. Truncated non-null slots are released.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `n` slots cannot be addressed, `OutOfMemory` if
    /// the allocation fails. On error the array is unchanged.
    pub fn resize(&mut self, n: usize) -> Result<()> {
        if n > self.count {
            self.reserve(n)?;
            for i in self.count..n {
                // SAFETY: i < n <= capacity.
                unsafe { self.slots.add(i).write(ptr::null_mut()) };
            }
            self.count = n;
        } else if n < self.count {
            let old_count = self.count;
            self.count = n;
            let mut released = 0u64;
            for i in n..old_count {
                // SAFETY: i < old_count <= capacity, and the slot is no longer
                // addressable, so it is released exactly once here.
                let p = unsafe { *self.slots.add(i) };
                if !p.is_null() {
                    unsafe { release(p) };
                    released += 1;
                }
            }
            trace!(event = "pointer_array_shrink", released = released);
        }
        Ok(())
    }

    /// Ensures capacity for at least `n` slots without changing the count.
    ///
    /// Grows to `max(n, 2 * capacity, 4)`, falling back to exactly `n` when
    /// the amortized size cannot be laid out or allocated.
    pub(crate) fn reserve(&mut self, n: usize) -> Result<()> {
        if n <= self.capacity {
            return Ok(());
        }
        let exact = Layout::array::<*mut T>(n).map_err(|_| unrepresentable_size(n))?;
        let amortized = n
            .max(self.capacity.saturating_mul(2))
            .max(MIN_CAPACITY);

        let mut new_capacity = n;
        let mut new_slots = ptr::null_mut();
        if amortized > n {
            if let Ok(layout) = Layout::array::<*mut T>(amortized) {
                // SAFETY: layout is non-zero sized.
                new_slots = unsafe { self.reallocate(layout) };
                new_capacity = amortized;
            }
        }
        if new_slots.is_null() {
            // SAFETY: exact is non-zero sized since n > capacity >= 0.
            new_slots = unsafe { self.reallocate(exact) };
            new_capacity = n;
        }
        if new_slots.is_null() {
            return Err(AbiError::OutOfMemory { requested: n });
        }

        debug!(
            event = "pointer_array_grow",
            old_capacity = self.capacity as u64,
            new_capacity = new_capacity as u64,
        );
        self.slots = new_slots.cast();
        self.capacity = new_capacity;
        Ok(())
    }

    /// Allocates or grows the slot storage to `layout`. Returns null on
    /// failure, leaving the current storage intact.
    unsafe fn reallocate(&self, layout: Layout) -> *mut u8 {
        if self.capacity == 0 {
            alloc::alloc(layout)
        } else {
            alloc::realloc(self.slots.cast(), self.current_layout(), layout.size())
        }
    }

    fn current_layout(&self) -> Layout {
        // SAFETY: this exact layout was validated when the storage was allocated.
        unsafe {
            Layout::from_size_align_unchecked(
                self.capacity * mem::size_of::<*mut T>(),
                mem::align_of::<*mut T>(),
            )
        }
    }

    /// Returns the pointer stored at `index` (null if unassigned).
    pub fn at(&self, index: usize) -> Result<*mut T> {
        self.check_index(index)?;
        // SAFETY: index < count <= capacity.
        Ok(unsafe { *self.slots.add(index) })
    }

    /// Borrows the pointee at `index`, if any.
    pub fn get(&self, index: usize) -> Result<Option<&T>> {
        // SAFETY: non-null slots point to live, owned values.
        Ok(unsafe { self.at(index)?.as_ref() })
    }

    /// Stores `p` at `index`, taking ownership of it.
    ///
    /// The previous non-null occupant is released first, unless it is `p`
    /// itself, in which case nothing changes. Storing null takes no ownership.
    ///
    /// # Safety
    ///
    /// A non-null `p` must either come from `Box::<T>::into_raw` and not be
    /// owned elsewhere, or be retracted with [`forget`](Self::forget) before
    /// the array would release it.
    pub unsafe fn set(&mut self, index: usize, p: *mut T) -> Result<()> {
        let slot = self.slot_mut(index)?;
        let old = mem::replace(slot, p);
        if !old.is_null() && old != p {
            release(old);
        }
        Ok(())
    }

    /// Moves `value` into the slot at `index`, releasing the previous occupant.
    pub fn put(&mut self, index: usize, value: Box<T>) -> Result<()> {
        self.check_index(index)?;
        // SAFETY: the pointer comes straight from Box::into_raw.
        unsafe { self.set(index, Box::into_raw(value)) }
    }

    /// Moves the occupant of `index` out, leaving the slot null.
    pub fn take(&mut self, index: usize) -> Result<Option<Box<T>>> {
        let p = mem::replace(self.slot_mut(index)?, ptr::null_mut());
        // SAFETY: non-null slots own their pointee.
        Ok((!p.is_null()).then(|| unsafe { Box::from_raw(p) }))
    }

    /// Releases the occupant of `index` and nulls the slot.
    pub fn clear(&mut self, index: usize) -> Result<()> {
        // SAFETY: storing null takes no ownership.
        unsafe { self.set(index, ptr::null_mut()) }
    }

    /// Nulls the slot at `index` without releasing its occupant.
    ///
    /// This is how a pointer the array must not free is retracted.
    pub fn forget(&mut self, index: usize) -> Result<*mut T> {
        Ok(mem::replace(self.slot_mut(index)?, ptr::null_mut()))
    }

    /// The addressable slots.
    pub fn as_slice(&self) -> &[*mut T] {
        if self.count == 0 {
            return &[];
        }
        // SAFETY: count slots starting at slots are initialized.
        unsafe { slice::from_raw_parts(self.slots, self.count) }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.count {
            return Err(out_of_range(index as i64, self.count));
        }
        Ok(())
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut *mut T> {
        self.check_index(index)?;
        // SAFETY: index < count <= capacity, and &mut self is unique.
        Ok(unsafe { &mut *self.slots.add(index) })
    }
}

impl<T> Default for PointerArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for PointerArray<T> {
    fn drop(&mut self) {
        for &p in self.as_slice() {
            if !p.is_null() {
                // SAFETY: each non-null slot owns a distinct pointee.
                unsafe { release(p) };
            }
        }
        if self.capacity > 0 {
            // SAFETY: storage was allocated with current_layout().
            unsafe { alloc::dealloc(self.slots.cast(), self.current_layout()) };
        }
    }
}

impl<T> fmt::Debug for PointerArray<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PointerArray")
            .field("count", &self.count)
            .field("capacity", &self.capacity)
            .field("slots", &self.as_slice())
            .finish()
    }
}

/// Releases an owned pointee.
///
/// # Safety
///
/// `p` must be non-null, come from `Box::<T>::into_raw`, and not be released
/// again.
pub(crate) unsafe fn release<T>(p: *mut T) {
    drop(Box::from_raw(p));
}

// Errors shared by the direct path and error reconstruction for generated
// code, so both produce identical values.

pub(crate) fn size_arg(n: i64) -> Result<usize> {
    usize::try_from(n).map_err(|_| size_error(n))
}

pub(crate) fn index_arg(index: i64) -> Result<usize> {
    usize::try_from(index).map_err(|_| negative_index(index))
}

pub(crate) fn size_error(n: i64) -> AbiError {
    if n < 0 {
        AbiError::InvalidArgument(format!("size {n} is negative"))
    } else {
        unrepresentable_size(n as usize)
    }
}

fn unrepresentable_size(n: usize) -> AbiError {
    AbiError::InvalidArgument(format!("size {n} is not representable"))
}

pub(crate) fn negative_index(index: i64) -> AbiError {
    AbiError::InvalidArgument(format!("index {index} is negative"))
}

pub(crate) fn out_of_range(index: i64, count: usize) -> AbiError {
    AbiError::IndexOutOfRange { index, count }
}
