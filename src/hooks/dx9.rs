//! Direct3D 9 adapter.
//!
//! `Direct3DCreate9` is detoured to reach the interface object; from there
//! `CreateDevice` and the device methods that matter (`TestCooperativeLevel`,
//! `Reset`, `Present`) are vtable-patched. Resolution and windowed-state
//! overrides are applied by value on a copy of the host's present
//! parameters; the host's structure is never written to.

use std::ffi::c_void;
use std::sync::atomic::AtomicPtr;

use retour::static_detour;
use windows::Win32::Foundation::{E_FAIL, HWND, RECT};
use windows::Win32::Graphics::Direct3D9::D3DPRESENT_PARAMETERS;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryA};
use windows::core::{s, HRESULT};

use crate::fullscreen::{self, hresult, FAKE_RESET};
use crate::geometry;
use crate::hooks::{original_fn, patch_vtable_slot, vtable_of, wndproc};
use crate::lifecycle::{self, CreateParams};
use crate::state::STATE;

// IDirect3D9 / IDirect3DDevice9 vtable layout (COM order after IUnknown).
const VTBL_CREATE_DEVICE: usize = 16;
const VTBL_TEST_COOPERATIVE_LEVEL: usize = 3;
const VTBL_RESET: usize = 16;
const VTBL_PRESENT: usize = 17;

static_detour! {
    static Direct3DCreate9Hook: unsafe extern "system" fn(u32) -> *mut c_void;
}

type CreateDeviceFn = unsafe extern "system" fn(
    *mut c_void,
    u32,
    i32,
    HWND,
    u32,
    *mut D3DPRESENT_PARAMETERS,
    *mut *mut c_void,
) -> HRESULT;
type TestCooperativeLevelFn = unsafe extern "system" fn(*mut c_void) -> HRESULT;
type ResetFn = unsafe extern "system" fn(*mut c_void, *mut D3DPRESENT_PARAMETERS) -> HRESULT;
type PresentFn = unsafe extern "system" fn(
    *mut c_void,
    *const RECT,
    *const RECT,
    HWND,
    *const c_void,
) -> HRESULT;

static ORIG_CREATE_DEVICE: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static ORIG_TEST_COOPERATIVE_LEVEL: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static ORIG_RESET: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());
static ORIG_PRESENT: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

pub fn install() -> windows::core::Result<()> {
    unsafe {
        let module = LoadLibraryA(s!("d3d9.dll"))?;
        let create = GetProcAddress(module, s!("Direct3DCreate9"))
            .ok_or_else(windows::core::Error::from_win32)?;
        let target: unsafe extern "system" fn(u32) -> *mut c_void = std::mem::transmute(create);
        Direct3DCreate9Hook
            .initialize(target, hooked_direct3d_create9)
            .map_err(|e| windows::core::Error::new(E_FAIL, format!("detour init failed: {e}")))?
            .enable()
            .map_err(|e| windows::core::Error::new(E_FAIL, format!("detour enable failed: {e}")))?;
    }
    Ok(())
}

pub fn uninstall() {
    unsafe {
        let _ = Direct3DCreate9Hook.disable();
    }
}

fn hooked_direct3d_create9(sdk_version: u32) -> *mut c_void {
    let d3d9 = unsafe { Direct3DCreate9Hook.call(sdk_version) };
    if d3d9.is_null() {
        return d3d9;
    }
    unsafe {
        let vtable = vtable_of(d3d9);
        if !patch_vtable_slot(
            vtable,
            VTBL_CREATE_DEVICE,
            &ORIG_CREATE_DEVICE,
            hooked_create_device as *mut c_void,
        ) {
            log::warn!("IDirect3D9::CreateDevice patch failed; running pass-through");
        }
    }
    d3d9
}

fn params_of(pp: &D3DPRESENT_PARAMETERS) -> CreateParams {
    CreateParams {
        width: pp.BackBufferWidth,
        height: pp.BackBufferHeight,
        windowed: pp.Windowed.as_bool(),
        refresh_rate: pp.FullScreen_RefreshRateInHz,
        buffer_count: pp.BackBufferCount,
        flip_model: false,
    }
}

fn write_params(pp: &mut D3DPRESENT_PARAMETERS, effective: CreateParams) {
    pp.BackBufferWidth = effective.width;
    pp.BackBufferHeight = effective.height;
    pp.Windowed = effective.windowed.into();
    pp.FullScreen_RefreshRateInHz = effective.refresh_rate;
    pp.BackBufferCount = effective.buffer_count;
}

unsafe extern "system" fn hooked_create_device(
    this: *mut c_void,
    adapter: u32,
    device_type: i32,
    focus_window: HWND,
    behavior_flags: u32,
    presentation_parameters: *mut D3DPRESENT_PARAMETERS,
    returned_device: *mut *mut c_void,
) -> HRESULT {
    let Some(original) = original_fn!(ORIG_CREATE_DEVICE, CreateDeviceFn) else {
        return HRESULT(hresult::D3DERR_DEVICELOST);
    };
    if presentation_parameters.is_null() {
        return original(
            this,
            adapter,
            device_type,
            focus_window,
            behavior_flags,
            presentation_parameters,
            returned_device,
        );
    }

    STATE.check_and_apply_pending_mode();
    let snap = STATE.snapshot();
    let mut local = *presentation_parameters;
    write_params(
        &mut local,
        lifecycle::override_create_params(&snap, params_of(&local)),
    );

    let window = if !local.hDeviceWindow.is_invalid() {
        local.hDeviceWindow
    } else {
        focus_window
    };
    wndproc::attach(&STATE, window);

    let hr = original(
        this,
        adapter,
        device_type,
        focus_window,
        behavior_flags,
        &mut local,
        returned_device,
    );
    if hr.is_ok() && !returned_device.is_null() && !(*returned_device).is_null() {
        let vtable = vtable_of(*returned_device);
        let ok = patch_vtable_slot(
            vtable,
            VTBL_TEST_COOPERATIVE_LEVEL,
            &ORIG_TEST_COOPERATIVE_LEVEL,
            hooked_test_cooperative_level as *mut c_void,
        ) && patch_vtable_slot(vtable, VTBL_RESET, &ORIG_RESET, hooked_reset as *mut c_void)
            && patch_vtable_slot(
                vtable,
                VTBL_PRESENT,
                &ORIG_PRESENT,
                hooked_present as *mut c_void,
            );
        if !ok {
            log::warn!("IDirect3DDevice9 patch incomplete; some events pass through");
        }

        lifecycle::notify_resolution_change(
            &STATE,
            local.BackBufferWidth as i32,
            local.BackBufferHeight as i32,
        );
        geometry::apply(&STATE, window);
    }
    hr
}

unsafe extern "system" fn hooked_test_cooperative_level(this: *mut c_void) -> HRESULT {
    if let Some(code) = FAKE_RESET.on_status_query() {
        return HRESULT(code);
    }
    match original_fn!(ORIG_TEST_COOPERATIVE_LEVEL, TestCooperativeLevelFn) {
        Some(original) => original(this),
        None => HRESULT(hresult::D3D_OK),
    }
}

unsafe extern "system" fn hooked_reset(
    this: *mut c_void,
    presentation_parameters: *mut D3DPRESENT_PARAMETERS,
) -> HRESULT {
    let Some(original) = original_fn!(ORIG_RESET, ResetFn) else {
        return HRESULT(hresult::D3DERR_DEVICELOST);
    };
    if presentation_parameters.is_null() {
        return original(this, presentation_parameters);
    }

    STATE.check_and_apply_pending_mode();
    let snap = STATE.snapshot();
    let mut local = *presentation_parameters;
    write_params(
        &mut local,
        lifecycle::override_create_params(&snap, params_of(&local)),
    );

    let hr = original(this, &mut local);
    if hr.is_ok() {
        // The fake-loss sequence, if one drove this reset, is complete.
        FAKE_RESET.on_reset();
        if lifecycle::notify_resolution_change(
            &STATE,
            local.BackBufferWidth as i32,
            local.BackBufferHeight as i32,
        ) {
            let hwnd = HWND(STATE.main_window() as *mut c_void);
            geometry::apply(&STATE, hwnd);
        }
    }
    hr
}

unsafe extern "system" fn hooked_present(
    this: *mut c_void,
    source_rect: *const RECT,
    dest_rect: *const RECT,
    dest_window_override: HWND,
    dirty_region: *const c_void,
) -> HRESULT {
    let Some(original) = original_fn!(ORIG_PRESENT, PresentFn) else {
        return HRESULT(hresult::D3D_OK);
    };

    STATE.begin_frame();
    let hr = present_frame(
        this,
        original,
        source_rect,
        dest_rect,
        dest_window_override,
        dirty_region,
    );
    STATE.end_frame();
    hr
}

unsafe fn present_frame(
    this: *mut c_void,
    original: PresentFn,
    source_rect: *const RECT,
    dest_rect: *const RECT,
    dest_window_override: HWND,
    dirty_region: *const c_void,
) -> HRESULT {
    fullscreen::tick_dx9_state(&STATE, &FAKE_RESET);
    if let Some(code) = FAKE_RESET.on_present() {
        // Refusing presents keeps the host inside its recovery loop until
        // it calls Reset.
        return HRESULT(code);
    }

    let hwnd = HWND(STATE.main_window() as *mut c_void);
    geometry::apply(&STATE, hwnd);

    original(
        this,
        source_rect,
        dest_rect,
        dest_window_override,
        dirty_region,
    )
}
