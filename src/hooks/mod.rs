//! Interception layer: export detours and COM vtable patches.
//!
//! Everything here assumes the substrate contract "given a target entry
//! point and a replacement, yield a callable original, idempotently":
//! `retour` detours provide it for flat exports, guarded vtable writes
//! provide it for COM methods. When an installation fails the affected
//! capability silently degrades to pass-through; it is logged once and
//! never retried in a loop.

pub mod dx8;
pub mod dx9;
pub mod dxgi;
pub mod wndproc;

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};

use windows::Win32::System::LibraryLoader::GetModuleHandleA;
use windows::Win32::System::Memory::{
    VirtualProtect, PAGE_EXECUTE_READWRITE, PAGE_PROTECTION_FLAGS,
};
use windows::core::s;

use crate::state::{ApiFamily, STATE};

/// Temporarily lifts write protection from a patched region; the previous
/// protection is restored on drop, on every exit path.
struct ProtectionGuard {
    address: *const c_void,
    size: usize,
    old_protect: PAGE_PROTECTION_FLAGS,
}

impl ProtectionGuard {
    unsafe fn new(address: *const c_void, size: usize) -> Option<Self> {
        let mut old_protect = PAGE_PROTECTION_FLAGS(0);
        if VirtualProtect(address, size, PAGE_EXECUTE_READWRITE, &mut old_protect).is_err() {
            return None;
        }
        Some(ProtectionGuard {
            address,
            size,
            old_protect,
        })
    }
}

impl Drop for ProtectionGuard {
    fn drop(&mut self) {
        let mut dummy = PAGE_PROTECTION_FLAGS(0);
        let _ = unsafe { VirtualProtect(self.address, self.size, self.old_protect, &mut dummy) };
    }
}

pub(crate) unsafe fn vtable_of(object: *mut c_void) -> *mut *mut c_void {
    *(object as *mut *mut *mut c_void)
}

/// Replaces one vtable slot, storing the original pointer exactly once so
/// repeated patching (a host creating several devices) stays idempotent.
pub(crate) unsafe fn patch_vtable_slot(
    vtable: *mut *mut c_void,
    index: usize,
    original: &AtomicPtr<c_void>,
    replacement: *mut c_void,
) -> bool {
    let slot = vtable.add(index);
    let current = *slot;
    if current == replacement {
        return true;
    }

    let _ = original.compare_exchange(
        std::ptr::null_mut(),
        current,
        Ordering::SeqCst,
        Ordering::SeqCst,
    );

    let Some(_guard) = ProtectionGuard::new(slot as *const c_void, std::mem::size_of::<*mut c_void>())
    else {
        return false;
    };
    *slot = replacement;
    true
}

/// Calls a stored original through its function-pointer type.
macro_rules! original_fn {
    ($storage:expr, $ty:ty) => {{
        let ptr = $storage.load(std::sync::atomic::Ordering::SeqCst);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { std::mem::transmute::<*mut std::ffi::c_void, $ty>(ptr) })
        }
    }};
}
pub(crate) use original_fn;

/// Picks the backend family when the bootstrap hint was `Auto`, by probing
/// which graphics module the host already pulled in. Newest wins when
/// several are present (wrappers like d3d8-to-9 load both).
fn detect_api_family() -> ApiFamily {
    let loaded = |name| unsafe { GetModuleHandleA(name) }.is_ok();
    if loaded(s!("dxgi.dll")) {
        ApiFamily::Dxgi
    } else if loaded(s!("d3d9.dll")) {
        ApiFamily::Dx9
    } else if loaded(s!("d3d8.dll")) {
        ApiFamily::Dx8
    } else {
        log::warn!("no known graphics module loaded yet; assuming DXGI");
        ApiFamily::Dxgi
    }
}

/// Installs the interception for the active backend family. Failures leave
/// the host untouched.
pub fn install() {
    let family = match STATE.api_family() {
        ApiFamily::Auto => {
            let detected = detect_api_family();
            STATE.set_api_family(detected);
            detected
        }
        hinted => hinted,
    };
    log::info!("installing {family:?} interception");

    let result = match family {
        ApiFamily::Dx8 => dx8::install(),
        ApiFamily::Dx9 => dx9::install(),
        ApiFamily::Dxgi | ApiFamily::Auto => dxgi::install(),
    };
    if let Err(err) = result {
        log::warn!("{family:?} interception unavailable, running pass-through: {err}");
    }
}

/// Tears interception down at detach. Vtable patches on host-owned objects
/// are left in place when the originals cannot be restored safely; the
/// detours are disabled so everything degrades to pass-through.
pub fn uninstall() {
    wndproc::detach(&STATE);
    dxgi::uninstall();
    dx9::uninstall();
    dx8::uninstall();
}
