/*!
# Display & window virtualization for injected Direct3D hosts

This library builds as a DLL meant to be injected into a Direct3D 8, 9 or
DXGI-era application. Once inside, it takes ownership of the relationship
between the host's rendering resolution and its on-screen window: the host
keeps rendering at whatever resolution it believes it negotiated, while the
engine decides how that output maps onto a real window (bordered, borderless,
borderless-fullscreen on a chosen monitor, or genuine exclusive fullscreen).

## Layout

The decision logic is platform-independent and lives in plain modules:

- [`state`]: the process-wide virtual display state, all per-field atomics.
- [`transform`]: physical/virtual coordinate mapping.
- [`geometry`]: window style/rect planning per display mode.
- [`lifecycle`]: create/reset/resize parameter override policy.
- [`fullscreen`]: the fake device-loss machine and the exclusive-mode
  restore rate limiter.
- [`monitors`], [`viewport`]: monitor cache and secondary-window
  reconciliation.

The OS-facing half (`hooks`, plus the `os` submodules above) is compiled on
Windows only. `hooks` detours the graphics entry points and patches COM
vtables; every hook funnels into the platform-independent planners and then
executes their output.

## Entry points

Injected use: `DllMain` installs the interception on attach. Embedded use
(a launcher that configures before the first frame): call [`early_init`]
once, then [`set_settings`] from a UI thread whenever the user changes
something.
*/

pub mod fullscreen;
pub mod geometry;
pub mod lifecycle;
pub mod monitors;
pub mod state;
pub mod transform;
pub mod viewport;

#[cfg(windows)]
pub mod hooks;
#[cfg(windows)]
mod logger;

pub use lifecycle::notify_resolution_change;
pub use state::{
    ApiFamily, CursorClip, DisplayMode, ResizeBehavior, WindowSettings, STATE,
};
pub use transform::{Point, Rect};
pub use viewport::{SecondaryWindow, VIEWPORTS};

use crate::monitors::MonitorInfo;

/// Seeds the display state before any window or device exists. Later calls
/// are ignored.
pub fn early_init(settings: &WindowSettings, api_hint: ApiFamily) {
    STATE.early_init(settings, api_hint);
}

/// Live settings update from the UI thread. Applies immediately when no
/// drag/resize is in progress; otherwise the apply is deferred to the end of
/// the drag.
pub fn set_settings(settings: &WindowSettings) {
    let apply_now = STATE.set_settings(settings);
    #[cfg(windows)]
    if apply_now {
        apply_to_main_window();
    }
    #[cfg(not(windows))]
    let _ = apply_now;
}

/// Resolution the host believes it renders at.
pub fn virtual_resolution() -> (i32, i32) {
    STATE.virtual_resolution()
}

/// Size of the on-screen window as last applied.
pub fn window_resolution() -> (i32, i32) {
    STATE.window_resolution()
}

/// Monitor list for a settings UI, sorted left to right.
pub fn monitors() -> Vec<MonitorInfo> {
    #[cfg(windows)]
    {
        monitors::enumerate_monitors(STATE.take_monitors_dirty())
    }
    #[cfg(not(windows))]
    {
        Vec::new()
    }
}

pub fn primary_monitor_index() -> Option<usize> {
    monitors::primary_index(&monitors())
}

#[cfg(windows)]
mod os {
    use windows::Win32::Foundation::{HWND, RECT};
    use windows::Win32::UI::WindowsAndMessaging::{GetClientRect, GetWindowRect};

    use crate::state::STATE;
    use crate::transform::{self, Point, Rect};
    use crate::viewport::VIEWPORTS;
    use crate::{geometry, monitors};

    pub(crate) fn apply_to_main_window() {
        let hwnd = HWND(STATE.main_window() as *mut core::ffi::c_void);
        if !hwnd.is_invalid() {
            geometry::apply(&STATE, hwnd);
        }
    }

    fn main_client_rect() -> Option<Rect> {
        let hwnd = HWND(STATE.main_window() as *mut core::ffi::c_void);
        if hwnd.is_invalid() {
            return None;
        }
        let mut client = RECT::default();
        unsafe { GetClientRect(hwnd, &mut client) }.ok()?;
        Some(Rect::from(client))
    }

    fn known_window(window: isize) -> bool {
        window == STATE.main_window() || VIEWPORTS.is_registered(window)
    }

    /// Maps a client-area point of a recognized window into virtual
    /// coordinates; used by input-message translation.
    pub fn physical_client_to_virtual(window: isize, p: Point) -> Option<Point> {
        if !known_window(window) {
            return None;
        }
        let client = main_client_rect()?;
        let (vw, vh) = STATE.virtual_resolution();
        transform::physical_to_virtual(vw, vh, client, p)
    }

    /// Inverse of [`physical_client_to_virtual`].
    pub fn virtual_client_to_physical(window: isize, p: Point) -> Option<Point> {
        if !known_window(window) {
            return None;
        }
        let client = main_client_rect()?;
        let (vw, vh) = STATE.virtual_resolution();
        transform::virtual_to_physical(vw, vh, client, p)
    }

    /// Index of the monitor currently containing the main window's center.
    pub fn current_monitor_index() -> Option<usize> {
        let hwnd = HWND(STATE.main_window() as *mut core::ffi::c_void);
        if hwnd.is_invalid() {
            return None;
        }
        let mut rect = RECT::default();
        unsafe { GetWindowRect(hwnd, &mut rect) }.ok()?;
        let list = crate::monitors();
        monitors::index_containing(&list, Rect::from(rect).center())
    }
}

#[cfg(windows)]
pub use os::{current_monitor_index, physical_client_to_virtual, virtual_client_to_physical};
#[cfg(windows)]
use os::apply_to_main_window;

#[cfg(windows)]
mod dll {
    use std::time::{Duration, Instant};

    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

    use crate::state::STATE;
    use crate::{hooks, logger};

    /// Bounded wait for an in-flight frame before teardown; elapsing the
    /// deadline proceeds anyway rather than hanging the unloader.
    const DETACH_TIMEOUT: Duration = Duration::from_secs(1);

    fn attach() {
        logger::init();
        log::info!("attached, pid {}", std::process::id());
        // Hook installation touches the loader (LoadLibrary) and must not
        // run under the loader lock held during DllMain.
        std::thread::spawn(hooks::install);
    }

    fn detach() {
        let deadline = Instant::now() + DETACH_TIMEOUT;
        while STATE.frame_in_flight() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if STATE.frame_in_flight() {
            log::warn!("frame still in flight at detach deadline; tearing down anyway");
        }
        hooks::uninstall();
        log::info!("detached");
    }

    #[no_mangle]
    pub extern "system" fn DllMain(
        _module: HMODULE,
        reason: u32,
        _reserved: *mut core::ffi::c_void,
    ) -> bool {
        match reason {
            DLL_PROCESS_ATTACH => attach(),
            DLL_PROCESS_DETACH => detach(),
            _ => {}
        }
        true
    }
}
