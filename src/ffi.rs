// Copyright 2020-2022 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! C ABI surface: `tm_create`, `tm_destroy`, `tm_start`, `tm_size`,
//! `tm_align`, `tm_begin`, `tm_end`, `tm_read`, `tm_write`, `tm_alloc`,
//! `tm_free`. Region and transaction handles are opaque pointers; a null
//! pointer is the *invalid* sentinel for both.
//!
//! A transaction handle borrows its region for as long as it is alive, but
//! that borrow cannot survive a trip through `*mut c_void`. Callers on the
//! C side are responsible for what the Rust borrow checker would otherwise
//! enforce: never call `tm_destroy` while a transaction begun against that
//! region is still outstanding.

use std::ffi::c_void;
use std::ptr;

use crate::region::Region;
use crate::transaction::{AllocOutcome, Transaction};

/// Result of [`tm_alloc`]: mirrors the three-way outcome the allocator can
/// produce.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocStatus {
    Success = 0,
    NoMem = 1,
    Abort = 2,
}

/// Creates a region of `size` bytes aligned to `align`. Returns null on
/// invalid arguments or allocation failure.
#[no_mangle]
pub extern "C" fn tm_create(size: usize, align: usize) -> *mut Region {
    match Region::create(size, align) {
        Ok(region) => Box::into_raw(Box::new(region)),
        Err(_) => ptr::null_mut(),
    }
}

/// Destroys a region created by [`tm_create`]. The caller must guarantee no
/// transaction begun against `shared` is still outstanding.
///
/// # Safety
///
/// `shared` must be a pointer returned by `tm_create` and not yet destroyed.
#[no_mangle]
pub unsafe extern "C" fn tm_destroy(shared: *mut Region) {
    if shared.is_null() {
        return;
    }
    drop(Box::from_raw(shared));
}

/// Start address of the region's base segment.
///
/// # Safety
///
/// `shared` must be a live pointer returned by `tm_create`.
#[no_mangle]
pub unsafe extern "C" fn tm_start(shared: *const Region) -> *mut u8 {
    (*shared).start()
}

/// Size in bytes of the region's base segment.
///
/// # Safety
///
/// `shared` must be a live pointer returned by `tm_create`.
#[no_mangle]
pub unsafe extern "C" fn tm_size(shared: *const Region) -> usize {
    (*shared).size()
}

/// Alignment, in bytes, shared by every word in the region.
///
/// # Safety
///
/// `shared` must be a live pointer returned by `tm_create`.
#[no_mangle]
pub unsafe extern "C" fn tm_align(shared: *const Region) -> usize {
    (*shared).align()
}

/// Begins a transaction against `shared`. Returns null only if `shared` is
/// null; starting a transaction itself cannot fail.
///
/// # Safety
///
/// `shared` must be a live pointer returned by `tm_create`, and must outlive
/// the returned transaction handle.
#[no_mangle]
pub unsafe extern "C" fn tm_begin(shared: *const Region, is_ro: bool) -> *mut c_void {
    if shared.is_null() {
        return ptr::null_mut();
    }
    let tx = (*shared).begin(is_ro);
    // SAFETY: erases the borrow tying `tx` to `shared` so it can cross the
    // FFI boundary as an opaque pointer. The region-outlives-transaction
    // invariant this relies on is documented above and on `tm_destroy`.
    let tx: Transaction<'static> = std::mem::transmute(tx);
    Box::into_raw(Box::new(tx)) as *mut c_void
}

/// Ends (commits or releases) a transaction begun with [`tm_begin`]. Returns
/// whether it committed. Consumes `tx`; it must not be used again.
///
/// # Safety
///
/// `tx` must be a live pointer returned by `tm_begin` and not yet ended.
#[no_mangle]
pub unsafe extern "C" fn tm_end(tx: *mut c_void) -> bool {
    if tx.is_null() {
        return false;
    }
    let tx = Box::from_raw(tx as *mut Transaction<'static>);
    tx.end()
}

/// Reads `size` bytes starting at `source` into `target`. Returns `false` if
/// the transaction must stop (it has been destroyed).
///
/// # Safety
///
/// `tx` must be a live pointer from `tm_begin`. `source` must designate
/// `size` readable, aligned bytes of the region `tx` was begun against, and
/// `target` must designate `size` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn tm_read(
    tx: *mut c_void,
    source: *const c_void,
    size: usize,
    target: *mut c_void,
) -> bool {
    if tx.is_null() {
        return false;
    }
    let tx = &mut *(tx as *mut Transaction<'static>);
    tx.read(source as *const u8, size, target as *mut u8).is_ok()
}

/// Buffers `size` bytes from `source` to be written to `target` at commit.
/// Returns `false` if the transaction must stop.
///
/// # Safety
///
/// `tx` must be a live pointer from `tm_begin`. `source` must designate
/// `size` readable bytes, and `target` must designate `size` writable,
/// aligned bytes of the region `tx` was begun against.
#[no_mangle]
pub unsafe extern "C" fn tm_write(
    tx: *mut c_void,
    source: *const c_void,
    size: usize,
    target: *mut c_void,
) -> bool {
    if tx.is_null() {
        return false;
    }
    let tx = &mut *(tx as *mut Transaction<'static>);
    tx.write(source as *const u8, size, target as *mut u8).is_ok()
}

/// Allocates a segment of `size` bytes, writing its address through `target`
/// on success.
///
/// # Safety
///
/// `tx` must be a live pointer from `tm_begin`, and `target` must designate
/// one writable pointer-sized slot.
#[no_mangle]
pub unsafe extern "C" fn tm_alloc(tx: *mut c_void, size: usize, target: *mut *mut c_void) -> AllocStatus {
    if tx.is_null() {
        return AllocStatus::Abort;
    }
    let tx = &mut *(tx as *mut Transaction<'static>);
    match tx.alloc(size) {
        Ok(AllocOutcome::Success(ptr)) => {
            *target = ptr as *mut c_void;
            AllocStatus::Success
        }
        Ok(AllocOutcome::NoMem) => AllocStatus::NoMem,
        Err(_) => AllocStatus::Abort,
    }
}

/// Schedules `target` for removal from the region. Returns `false` if the
/// transaction must stop.
///
/// # Safety
///
/// `tx` must be a live pointer from `tm_begin`, and `target` must be an
/// address previously returned by `tm_alloc` against the same region.
#[no_mangle]
pub unsafe extern "C" fn tm_free(tx: *mut c_void, target: *mut c_void) -> bool {
    if tx.is_null() {
        return false;
    }
    let tx = &mut *(tx as *mut Transaction<'static>);
    tx.free(target as *mut u8).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_the_c_abi() {
        let shared = tm_create(64, 8);
        assert!(!shared.is_null());

        unsafe {
            let dst = tm_start(shared) as *mut c_void;
            let tx = tm_begin(shared, false);
            assert!(!tx.is_null());

            let value: u64 = 99;
            assert!(tm_write(tx, &value as *const u64 as *const c_void, 8, dst));
            assert!(tm_end(tx));

            let tx = tm_begin(shared, true);
            let mut out: u64 = 0;
            assert!(tm_read(tx, dst, 8, &mut out as *mut u64 as *mut c_void));
            assert!(tm_end(tx));
            assert_eq!(out, 99);

            tm_destroy(shared);
        }
    }

    #[test]
    fn null_region_yields_null_transaction() {
        unsafe {
            assert!(tm_begin(ptr::null(), false).is_null());
        }
    }

    #[test]
    fn alloc_and_free_round_trip() {
        let shared = tm_create(64, 8);
        unsafe {
            let tx = tm_begin(shared, false);
            let mut out: *mut c_void = ptr::null_mut();
            assert_eq!(tm_alloc(tx, 16, &mut out), AllocStatus::Success);
            assert!(!out.is_null());
            assert!(tm_end(tx));

            let tx = tm_begin(shared, false);
            assert!(tm_free(tx, out));
            assert!(tm_end(tx));

            tm_destroy(shared);
        }
    }
}
