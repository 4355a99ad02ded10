//! Raw native memory access
//!
//! All pointer arithmetic of the crate funnels through these helpers. Native
//! memory is addressed by `usize` so that addresses can be stored in maps and
//! compared without provenance games.
//!
//! # Safety
//!
//! Every function taking an address requires that the range it touches is
//! valid for the access. Reads and writes are unaligned.

use crate::error::{BridgeError, BridgeResult};
use std::alloc::{self, Layout};
use std::ptr;

pub(crate) const WORD: usize = std::mem::size_of::<usize>();

/// View `len` bytes at `addr`
///
/// # Safety
///
/// `addr..addr + len` must be readable and not mutated while the slice lives.
pub(crate) unsafe fn bytes<'a>(addr: usize, len: usize) -> &'a [u8] {
    if len == 0 {
        return &[];
    }
    std::slice::from_raw_parts(addr as *const u8, len)
}

/// Mutable view of `len` bytes at `addr`
///
/// # Safety
///
/// `addr..addr + len` must be writable and not aliased while the slice lives.
pub(crate) unsafe fn bytes_mut<'a>(addr: usize, len: usize) -> &'a mut [u8] {
    if len == 0 {
        return &mut [];
    }
    std::slice::from_raw_parts_mut(addr as *mut u8, len)
}

/// # Safety
///
/// `addr` must be readable for a machine word.
pub(crate) unsafe fn read_word(addr: usize) -> usize {
    ptr::read_unaligned(addr as *const usize)
}

/// # Safety
///
/// `addr` must be writable for a machine word.
pub(crate) unsafe fn write_word(addr: usize, value: usize) {
    ptr::write_unaligned(addr as *mut usize, value)
}

/// Copy `len` bytes; the ranges may overlap
///
/// # Safety
///
/// Both ranges must be valid for `len` bytes.
pub(crate) unsafe fn copy(dst: usize, src: usize, len: usize) {
    if len > 0 && dst != src {
        ptr::copy(src as *const u8, dst as *mut u8, len)
    }
}

/// # Safety
///
/// `addr..addr + len` must be writable.
pub(crate) unsafe fn zero(addr: usize, len: usize) {
    if len > 0 {
        ptr::write_bytes(addr as *mut u8, 0, len)
    }
}

/// Allocate a zero-filled block; empty requests still get a unique address
pub(crate) fn allocate_zeroed(size: usize, align: usize) -> BridgeResult<(usize, Layout)> {
    let layout = Layout::from_size_align(size.max(1), align.max(WORD).next_power_of_two())
        .map_err(|e| BridgeError::InvalidArguments(format!("cannot allocate {} bytes: {}", size, e)))?;
    // SAFETY: the layout has a non-zero size
    let ptr = unsafe { alloc::alloc_zeroed(layout) };
    if ptr.is_null() {
        return Err(BridgeError::OutOfMemory(size));
    }
    Ok((ptr as usize, layout))
}

/// # Safety
///
/// `addr` must come from [`allocate_zeroed`] with the same `layout`, and must
/// not be used afterwards.
pub(crate) unsafe fn deallocate(addr: usize, layout: Layout) {
    alloc::dealloc(addr as *mut u8, layout)
}

#[derive(Clone, Copy)]
#[repr(C, align(16))]
struct Chunk([u8; 16]);

/// 16-byte aligned scratch storage for marshaled values
pub(crate) struct Scratch {
    buf: Vec<Chunk>,
}

impl Scratch {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            buf: vec![Chunk([0; 16]); size.div_ceil(16).max(1)],
        }
    }

    pub(crate) fn address(&mut self) -> usize {
        self.buf.as_mut_ptr() as usize
    }
}

/// Round `offset` up to a multiple of `align`
pub(crate) fn align_up(offset: usize, align: usize) -> usize {
    let align = align.max(1);
    offset.div_ceil(align) * align
}
