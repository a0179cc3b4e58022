//! DXGI adapter (D3D10/11/12-era swap chains).
//!
//! Method addresses are harvested from a short-lived probe device/swap-chain
//! pair; the functions themselves are detoured, so every swap chain the host
//! creates afterwards is covered, whichever factory produced it.
//!
//! There is no safe on-demand reset in this generation, so the exclusive
//! story is: lie consistently. The state query answers what the configured
//! mode implies, host-initiated exclusive entry is swallowed, and a per-frame
//! tick restores real exclusive mode through the original entry point,
//! rate-limited, when the OS silently dropped it.

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use retour::static_detour;
use windows::Win32::Foundation::{E_FAIL, BOOL, HMODULE, HWND, S_OK};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDeviceAndSwapChain, ID3D11Device, ID3D11RenderTargetView, ID3D11Texture2D,
    D3D11_CREATE_DEVICE_FLAG, D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_MODE_DESC, DXGI_RATIONAL, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    CreateDXGIFactory1, IDXGIFactory1, IDXGIFactory2, IDXGISwapChain,
    DXGI_SWAP_CHAIN_DESC, DXGI_SWAP_CHAIN_DESC1, DXGI_SWAP_CHAIN_FULLSCREEN_DESC,
    DXGI_SWAP_EFFECT_DISCARD, DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL, DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::UI::WindowsAndMessaging::{GetDesktopWindow, GetForegroundWindow};
use windows::core::{HRESULT, Interface};

use crate::fullscreen::{self, RestoreGate};
use crate::geometry;
use crate::hooks::{vtable_of, wndproc};
use crate::lifecycle::{self, CreateParams};
use crate::state::{DetectedFullscreen, DisplayMode, STATE};

// IDXGISwapChain vtable (after IUnknown/IDXGIObject/IDXGIDeviceSubObject).
const VTBL_PRESENT: usize = 8;
const VTBL_SET_FULLSCREEN_STATE: usize = 10;
const VTBL_GET_FULLSCREEN_STATE: usize = 11;
const VTBL_RESIZE_BUFFERS: usize = 13;
const VTBL_RESIZE_TARGET: usize = 14;
// IDXGIFactory / IDXGIFactory2.
const VTBL_CREATE_SWAP_CHAIN: usize = 10;
const VTBL_CREATE_SWAP_CHAIN_FOR_HWND: usize = 15;

static_detour! {
    static PresentHook: unsafe extern "system" fn(*mut c_void, u32, u32) -> HRESULT;
    static SetFullscreenStateHook:
        unsafe extern "system" fn(*mut c_void, BOOL, *mut c_void) -> HRESULT;
    static GetFullscreenStateHook:
        unsafe extern "system" fn(*mut c_void, *mut BOOL, *mut *mut c_void) -> HRESULT;
    static ResizeBuffersHook:
        unsafe extern "system" fn(*mut c_void, u32, u32, u32, DXGI_FORMAT, u32) -> HRESULT;
    static ResizeTargetHook:
        unsafe extern "system" fn(*mut c_void, *const DXGI_MODE_DESC) -> HRESULT;
    static CreateSwapChainHook: unsafe extern "system" fn(
        *mut c_void,
        *mut c_void,
        *mut DXGI_SWAP_CHAIN_DESC,
        *mut *mut c_void
    ) -> HRESULT;
    static CreateSwapChainForHwndHook: unsafe extern "system" fn(
        *mut c_void,
        *mut c_void,
        HWND,
        *const DXGI_SWAP_CHAIN_DESC1,
        *const DXGI_SWAP_CHAIN_FULLSCREEN_DESC,
        *mut c_void,
        *mut *mut c_void
    ) -> HRESULT;
}

/// Rate limiter for the tick's exclusive-mode restore attempts.
static RESTORE_GATE: Mutex<RestoreGate> = Mutex::new(RestoreGate::new());

/// Render target view over the presenting swap chain's backbuffer, stored
/// raw so the static carries no interface type. Torn down and rebuilt around
/// every `ResizeBuffers`.
static RENDER_TARGET: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

struct SwapChainFns {
    present: *mut c_void,
    set_fullscreen_state: *mut c_void,
    get_fullscreen_state: *mut c_void,
    resize_buffers: *mut c_void,
    resize_target: *mut c_void,
}

/// Creates a throwaway device + swap chain against the desktop window and
/// reads the method addresses out of the shared vtable.
unsafe fn probe_swapchain_fns() -> windows::core::Result<SwapChainFns> {
    let desc = DXGI_SWAP_CHAIN_DESC {
        BufferDesc: DXGI_MODE_DESC {
            Width: 2,
            Height: 2,
            RefreshRate: DXGI_RATIONAL {
                Numerator: 60,
                Denominator: 1,
            },
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ..Default::default()
        },
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 1,
        OutputWindow: GetDesktopWindow(),
        Windowed: true.into(),
        SwapEffect: DXGI_SWAP_EFFECT_DISCARD,
        Flags: 0,
    };

    let mut swapchain: Option<IDXGISwapChain> = None;
    let mut device: Option<ID3D11Device> = None;
    let mut feature_level = D3D_FEATURE_LEVEL::default();
    D3D11CreateDeviceAndSwapChain(
        None,
        D3D_DRIVER_TYPE_HARDWARE,
        HMODULE::default(),
        D3D11_CREATE_DEVICE_FLAG(0),
        None,
        D3D11_SDK_VERSION,
        Some(&desc),
        Some(&mut swapchain),
        Some(&mut device),
        Some(&mut feature_level),
        None,
    )?;
    let swapchain = swapchain.ok_or_else(|| windows::core::Error::from(E_FAIL))?;

    let vtable = vtable_of(swapchain.as_raw());
    Ok(SwapChainFns {
        present: *vtable.add(VTBL_PRESENT),
        set_fullscreen_state: *vtable.add(VTBL_SET_FULLSCREEN_STATE),
        get_fullscreen_state: *vtable.add(VTBL_GET_FULLSCREEN_STATE),
        resize_buffers: *vtable.add(VTBL_RESIZE_BUFFERS),
        resize_target: *vtable.add(VTBL_RESIZE_TARGET),
    })
}

macro_rules! enable_detour {
    ($detour:ident, $ty:ty, $addr:expr, $hook:expr) => {{
        let target: $ty = std::mem::transmute($addr);
        $detour
            .initialize(target, $hook)
            .map_err(|e| windows::core::Error::new(E_FAIL, format!("detour init failed: {e}")))?
            .enable()
            .map_err(|e| windows::core::Error::new(E_FAIL, format!("detour enable failed: {e}")))?;
    }};
}

pub fn install() -> windows::core::Result<()> {
    let result = install_detours();
    if result.is_err() {
        // A partially-installed set would let an enabled hook call an
        // uninitialized sibling; roll everything back.
        uninstall();
    }
    result
}

fn install_detours() -> windows::core::Result<()> {
    unsafe {
        let fns = probe_swapchain_fns()?;
        enable_detour!(
            PresentHook,
            unsafe extern "system" fn(*mut c_void, u32, u32) -> HRESULT,
            fns.present,
            hooked_present
        );
        enable_detour!(
            SetFullscreenStateHook,
            unsafe extern "system" fn(*mut c_void, BOOL, *mut c_void) -> HRESULT,
            fns.set_fullscreen_state,
            hooked_set_fullscreen_state
        );
        enable_detour!(
            GetFullscreenStateHook,
            unsafe extern "system" fn(*mut c_void, *mut BOOL, *mut *mut c_void) -> HRESULT,
            fns.get_fullscreen_state,
            hooked_get_fullscreen_state
        );
        enable_detour!(
            ResizeBuffersHook,
            unsafe extern "system" fn(*mut c_void, u32, u32, u32, DXGI_FORMAT, u32) -> HRESULT,
            fns.resize_buffers,
            hooked_resize_buffers
        );
        enable_detour!(
            ResizeTargetHook,
            unsafe extern "system" fn(*mut c_void, *const DXGI_MODE_DESC) -> HRESULT,
            fns.resize_target,
            hooked_resize_target
        );

        let factory: IDXGIFactory1 = CreateDXGIFactory1()?;
        let factory_vtable = vtable_of(factory.as_raw());
        enable_detour!(
            CreateSwapChainHook,
            unsafe extern "system" fn(
                *mut c_void,
                *mut c_void,
                *mut DXGI_SWAP_CHAIN_DESC,
                *mut *mut c_void,
            ) -> HRESULT,
            *factory_vtable.add(VTBL_CREATE_SWAP_CHAIN),
            hooked_create_swap_chain
        );
        // The flip-model creation path only exists on factory generations
        // that expose IDXGIFactory2; older systems simply skip it.
        if let Ok(factory2) = factory.cast::<IDXGIFactory2>() {
            let factory2_vtable = vtable_of(factory2.as_raw());
            enable_detour!(
                CreateSwapChainForHwndHook,
                unsafe extern "system" fn(
                    *mut c_void,
                    *mut c_void,
                    HWND,
                    *const DXGI_SWAP_CHAIN_DESC1,
                    *const DXGI_SWAP_CHAIN_FULLSCREEN_DESC,
                    *mut c_void,
                    *mut *mut c_void,
                ) -> HRESULT,
                *factory2_vtable.add(VTBL_CREATE_SWAP_CHAIN_FOR_HWND),
                hooked_create_swap_chain_for_hwnd
            );
        }
    }
    Ok(())
}

pub fn uninstall() {
    unsafe {
        let _ = PresentHook.disable();
        let _ = SetFullscreenStateHook.disable();
        let _ = GetFullscreenStateHook.disable();
        let _ = ResizeBuffersHook.disable();
        let _ = ResizeTargetHook.disable();
        let _ = CreateSwapChainHook.disable();
        let _ = CreateSwapChainForHwndHook.disable();
    }
    drop_render_target();
}

fn drop_render_target() {
    let ptr = RENDER_TARGET.swap(std::ptr::null_mut(), Ordering::SeqCst);
    if !ptr.is_null() {
        let _ = unsafe { ID3D11RenderTargetView::from_raw(ptr) };
    }
}

fn create_render_target(swapchain: *mut c_void) {
    let result: windows::core::Result<()> = (|| unsafe {
        let Some(swapchain) = IDXGISwapChain::from_raw_borrowed(&swapchain) else {
            return Ok(());
        };
        let backbuffer: ID3D11Texture2D = swapchain.GetBuffer(0)?;
        let device: ID3D11Device = swapchain.GetDevice()?;
        let mut view: Option<ID3D11RenderTargetView> = None;
        device.CreateRenderTargetView(&backbuffer, None, Some(&mut view))?;
        if let Some(view) = view {
            drop_render_target();
            RENDER_TARGET.store(view.into_raw(), Ordering::SeqCst);
        }
        Ok(())
    })();
    if let Err(err) = result {
        // Skipped for this frame; the next present retries.
        log::debug!("render target recreation failed: {err}");
    }
}

/// Per-frame drift detection and exclusive-mode restoration. Talks to the
/// swap chain strictly through the original entry points so the engine's own
/// calls never re-enter the interception policy.
fn tick_dxgi_state(swapchain: *mut c_void) {
    let mut actual = BOOL(0);
    let mut target: *mut c_void = std::ptr::null_mut();
    let hr = unsafe { GetFullscreenStateHook.call(swapchain, &mut actual, &mut target) };
    if hr.is_ok() {
        if !target.is_null() {
            // The query returns the output with a reference we must drop.
            let _ = unsafe { windows::core::IUnknown::from_raw(target) };
        }
        STATE.set_detected_fullscreen(if actual.as_bool() {
            DetectedFullscreen::Exclusive
        } else {
            DetectedFullscreen::NotExclusive
        });
    }

    let focused =
        unsafe { GetForegroundWindow() }.0 as isize == STATE.main_window();
    let due = match RESTORE_GATE.lock() {
        Ok(mut gate) => fullscreen::dxgi_restore_due(&STATE, &mut gate, Instant::now(), focused),
        Err(_) => false,
    };
    if due {
        log::info!("re-requesting exclusive fullscreen");
        let hr = unsafe {
            SetFullscreenStateHook.call(swapchain, true.into(), std::ptr::null_mut())
        };
        if hr.is_err() {
            log::debug!("exclusive restore refused: {hr:?}");
        }
    }
}

/// Swap chains that predate the injection never pass through a create hook,
/// so the first present adopts their output window and backbuffer size.
fn adopt_existing_swapchain(swapchain: *mut c_void) {
    let desc = unsafe {
        let Some(swapchain) = IDXGISwapChain::from_raw_borrowed(&swapchain) else {
            return;
        };
        match swapchain.GetDesc() {
            Ok(desc) => desc,
            Err(_) => return,
        }
    };
    if desc.OutputWindow.is_invalid() {
        return;
    }
    log::info!(
        "adopting pre-existing swap chain, window {:#x}",
        desc.OutputWindow.0 as isize
    );
    wndproc::attach(&STATE, desc.OutputWindow);
    lifecycle::notify_resolution_change(
        &STATE,
        desc.BufferDesc.Width as i32,
        desc.BufferDesc.Height as i32,
    );
}

fn hooked_present(swapchain: *mut c_void, sync_interval: u32, flags: u32) -> HRESULT {
    STATE.begin_frame();
    if STATE.main_window() == 0 {
        adopt_existing_swapchain(swapchain);
    }
    tick_dxgi_state(swapchain);

    let hwnd = HWND(STATE.main_window() as *mut c_void);
    geometry::apply(&STATE, hwnd);

    if RENDER_TARGET.load(Ordering::SeqCst).is_null() {
        create_render_target(swapchain);
    }

    let hr = unsafe { PresentHook.call(swapchain, sync_interval, flags) };
    STATE.end_frame();
    hr
}

fn hooked_set_fullscreen_state(
    swapchain: *mut c_void,
    fullscreen: BOOL,
    target: *mut c_void,
) -> HRESULT {
    if fullscreen.as_bool() {
        // Host-initiated exclusive entry (including the Alt+Enter /
        // focus-regain reflex) is always swallowed; the tick is the only
        // path that really enters exclusive mode, and only when configured.
        log::debug!("host exclusive-mode request swallowed");
        return S_OK;
    }
    unsafe { SetFullscreenStateHook.call(swapchain, fullscreen, target) }
}

fn hooked_get_fullscreen_state(
    swapchain: *mut c_void,
    fullscreen: *mut BOOL,
    target: *mut *mut c_void,
) -> HRESULT {
    let hr = unsafe { GetFullscreenStateHook.call(swapchain, fullscreen, target) };
    if hr.is_ok() && !fullscreen.is_null() {
        let actual = unsafe { *fullscreen }.as_bool();
        STATE.set_detected_fullscreen(if actual {
            DetectedFullscreen::Exclusive
        } else {
            DetectedFullscreen::NotExclusive
        });
        // Answer what the configured mode implies, so the host's own logic
        // believes it got what it asked for.
        let claimed = matches!(
            STATE.active_mode(),
            DisplayMode::ExclusiveFullscreen | DisplayMode::BorderlessFullscreen
        );
        unsafe { *fullscreen = claimed.into() };
    }
    hr
}

fn hooked_resize_buffers(
    swapchain: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: DXGI_FORMAT,
    flags: u32,
) -> HRESULT {
    STATE.check_and_apply_pending_mode();
    let snap = STATE.snapshot();
    let (width, height) = match snap.override_resolution() {
        Some((w, h)) => (w as u32, h as u32),
        None => (width, height),
    };

    // The engine's view over the old backbuffer must be gone before the
    // resize, and rebuilt from the new one after.
    drop_render_target();
    let hr =
        unsafe { ResizeBuffersHook.call(swapchain, buffer_count, width, height, format, flags) };
    if hr.is_ok() {
        create_render_target(swapchain);
        let (w, h) = backbuffer_size(swapchain).unwrap_or((width as i32, height as i32));
        if lifecycle::notify_resolution_change(&STATE, w, h) {
            let hwnd = HWND(STATE.main_window() as *mut c_void);
            geometry::apply(&STATE, hwnd);
        }
    }
    hr
}

/// Actual post-resize backbuffer size; `width = 0` requests are resolved by
/// the runtime to the client size, so the description is the only truth.
fn backbuffer_size(swapchain: *mut c_void) -> Option<(i32, i32)> {
    unsafe {
        let swapchain = IDXGISwapChain::from_raw_borrowed(&swapchain)?;
        let desc = swapchain.GetDesc().ok()?;
        Some((desc.BufferDesc.Width as i32, desc.BufferDesc.Height as i32))
    }
}

fn hooked_resize_target(swapchain: *mut c_void, mode: *const DXGI_MODE_DESC) -> HRESULT {
    if mode.is_null() {
        return unsafe { ResizeTargetHook.call(swapchain, mode) };
    }
    let requested = unsafe { *mode };
    match lifecycle::resize_target_action(&STATE.snapshot(), requested.Width, requested.Height) {
        lifecycle::ResizeTargetAction::Swallow { width, height } => {
            if lifecycle::notify_resolution_change(&STATE, width as i32, height as i32) {
                let hwnd = HWND(STATE.main_window() as *mut c_void);
                geometry::apply(&STATE, hwnd);
            }
            S_OK
        }
        lifecycle::ResizeTargetAction::ForwardAdjusted { width, height } => {
            let mut adjusted = requested;
            adjusted.Width = width;
            adjusted.Height = height;
            unsafe { ResizeTargetHook.call(swapchain, &adjusted) }
        }
        lifecycle::ResizeTargetAction::Forward => unsafe {
            ResizeTargetHook.call(swapchain, mode)
        },
    }
}

fn swap_chain_params(desc: &DXGI_SWAP_CHAIN_DESC) -> CreateParams {
    let rate = &desc.BufferDesc.RefreshRate;
    CreateParams {
        width: desc.BufferDesc.Width,
        height: desc.BufferDesc.Height,
        windowed: desc.Windowed.as_bool(),
        refresh_rate: if rate.Denominator > 0 {
            rate.Numerator / rate.Denominator
        } else {
            0
        },
        buffer_count: desc.BufferCount,
        flip_model: desc.SwapEffect.0 >= DXGI_SWAP_EFFECT_FLIP_SEQUENTIAL.0,
    }
}

fn hooked_create_swap_chain(
    factory: *mut c_void,
    device: *mut c_void,
    desc: *mut DXGI_SWAP_CHAIN_DESC,
    swapchain_out: *mut *mut c_void,
) -> HRESULT {
    if desc.is_null() {
        return unsafe { CreateSwapChainHook.call(factory, device, desc, swapchain_out) };
    }

    STATE.check_and_apply_pending_mode();
    let snap = STATE.snapshot();
    let mut local = unsafe { *desc };
    let effective = lifecycle::override_create_params(&snap, swap_chain_params(&local));
    local.BufferDesc.Width = effective.width;
    local.BufferDesc.Height = effective.height;
    local.Windowed = effective.windowed.into();
    if effective.windowed {
        local.BufferDesc.RefreshRate = DXGI_RATIONAL::default();
    }
    local.BufferCount = effective.buffer_count;

    wndproc::attach(&STATE, local.OutputWindow);

    let hr = unsafe { CreateSwapChainHook.call(factory, device, &mut local, swapchain_out) };
    if hr.is_ok() && !swapchain_out.is_null() && !unsafe { *swapchain_out }.is_null() {
        let created = unsafe { *swapchain_out };
        let (w, h) =
            backbuffer_size(created).unwrap_or((effective.width as i32, effective.height as i32));
        lifecycle::notify_resolution_change(&STATE, w, h);
        geometry::apply(&STATE, local.OutputWindow);
    }
    hr
}

fn hooked_create_swap_chain_for_hwnd(
    factory: *mut c_void,
    device: *mut c_void,
    hwnd: HWND,
    desc: *const DXGI_SWAP_CHAIN_DESC1,
    fullscreen_desc: *const DXGI_SWAP_CHAIN_FULLSCREEN_DESC,
    restrict_to_output: *mut c_void,
    swapchain_out: *mut *mut c_void,
) -> HRESULT {
    if desc.is_null() {
        return unsafe {
            CreateSwapChainForHwndHook.call(
                factory,
                device,
                hwnd,
                desc,
                fullscreen_desc,
                restrict_to_output,
                swapchain_out,
            )
        };
    }

    STATE.check_and_apply_pending_mode();
    let snap = STATE.snapshot();
    let mut local = unsafe { *desc };
    let windowed = unsafe { fullscreen_desc.as_ref() }
        .map(|fs| fs.Windowed.as_bool())
        .unwrap_or(true);
    let requested = CreateParams {
        width: local.Width,
        height: local.Height,
        windowed,
        refresh_rate: 0,
        buffer_count: local.BufferCount,
        // This creation path is flip-model in practice; the buffer floor
        // applies regardless of the exact effect.
        flip_model: true,
    };
    let effective = lifecycle::override_create_params(&snap, requested);
    local.Width = effective.width;
    local.Height = effective.height;
    local.BufferCount = effective.buffer_count;

    let mut local_fs = unsafe { fullscreen_desc.as_ref() }.copied();
    if let Some(fs) = local_fs.as_mut() {
        fs.Windowed = effective.windowed.into();
        if effective.windowed {
            fs.RefreshRate = DXGI_RATIONAL::default();
        }
    }

    wndproc::attach(&STATE, hwnd);

    let hr = unsafe {
        CreateSwapChainForHwndHook.call(
            factory,
            device,
            hwnd,
            &local,
            local_fs
                .as_ref()
                .map(|fs| fs as *const DXGI_SWAP_CHAIN_FULLSCREEN_DESC)
                .unwrap_or(std::ptr::null()),
            restrict_to_output,
            swapchain_out,
        )
    };
    if hr.is_ok() && !swapchain_out.is_null() && !unsafe { *swapchain_out }.is_null() {
        // Width/height 0 means "size to the window" and is resolved by the
        // runtime; only the created chain knows the real backbuffer size.
        let created = unsafe { *swapchain_out };
        let (w, h) =
            backbuffer_size(created).unwrap_or((effective.width as i32, effective.height as i32));
        lifecycle::notify_resolution_change(&STATE, w, h);
        geometry::apply(&STATE, hwnd);
    }
    hr
}
