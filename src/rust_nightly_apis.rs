//! Polyfills for `MaybeUninit` helpers that are nightly-only, so the rest of
//! the crate can call one name regardless of the `nightly` feature.
//!
//! Mirrors the teacher crate's own `rust_nightly_apis` shim module.

use std::mem::MaybeUninit;

/// Create an uninitialized array of `MaybeUninit<T>`.
#[cfg(not(feature = "nightly"))]
pub fn maybe_uninit_uninit_array<T, const N: usize>() -> [MaybeUninit<T>; N] {
    // SAFETY: An uninitialized `[MaybeUninit<T>; N]` is itself valid, since
    // `MaybeUninit` imposes no initialization requirement.
    unsafe { MaybeUninit::<[MaybeUninit<T>; N]>::uninit().assume_init() }
}

/// Create an uninitialized array of `MaybeUninit<T>`.
#[cfg(feature = "nightly")]
pub fn maybe_uninit_uninit_array<T, const N: usize>() -> [MaybeUninit<T>; N] {
    MaybeUninit::uninit_array()
}

/// Assume the given slice of `MaybeUninit<T>` is fully initialized.
///
/// # Safety
///
/// Every element of `slice` must be initialized.
#[cfg(not(feature = "nightly"))]
pub unsafe fn maybe_uninit_slice_assume_init_ref<T>(slice: &[MaybeUninit<T>]) -> &[T] {
    // SAFETY: Covered by the caller's obligations; `MaybeUninit<T>` and `T`
    // share layout, and the pointer/length are unchanged.
    unsafe { &*(slice as *const [MaybeUninit<T>] as *const [T]) }
}

/// Assume the given slice of `MaybeUninit<T>` is fully initialized.
///
/// # Safety
///
/// Every element of `slice` must be initialized.
#[cfg(feature = "nightly")]
pub unsafe fn maybe_uninit_slice_assume_init_ref<T>(slice: &[MaybeUninit<T>]) -> &[T] {
    unsafe { MaybeUninit::slice_assume_init_ref(slice) }
}

/// Assume the given mutable slice of `MaybeUninit<T>` is fully initialized.
///
/// # Safety
///
/// Every element of `slice` must be initialized.
#[cfg(not(feature = "nightly"))]
pub unsafe fn maybe_uninit_slice_assume_init_mut<T>(slice: &mut [MaybeUninit<T>]) -> &mut [T] {
    // SAFETY: Covered by the caller's obligations; see the shared-ref variant.
    unsafe { &mut *(slice as *mut [MaybeUninit<T>] as *mut [T]) }
}

/// Assume the given mutable slice of `MaybeUninit<T>` is fully initialized.
///
/// # Safety
///
/// Every element of `slice` must be initialized.
#[cfg(feature = "nightly")]
pub unsafe fn maybe_uninit_slice_assume_init_mut<T>(slice: &mut [MaybeUninit<T>]) -> &mut [T] {
    unsafe { MaybeUninit::slice_assume_init_mut(slice) }
}

/// Tell the optimizer that `cond` holds, without verifying it in release
/// builds. Debug builds assert it.
///
/// # Safety
///
/// `cond` must actually hold; telling the optimizer otherwise is undefined
/// behavior.
#[inline(always)]
pub unsafe fn assume(cond: bool) {
    debug_assert!(cond, "assume() called with false condition");
    if !cond {
        // SAFETY: the caller guarantees `cond` holds.
        unsafe { std::hint::unreachable_unchecked() }
    }
}
