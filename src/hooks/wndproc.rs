//! Main-window subclass.
//!
//! The engine listens to the host window's message stream for the events the
//! render-thread tick cannot observe on its own: monitor topology changes,
//! drag/resize brackets and focus regain. Everything else is forwarded
//! untouched through `CallWindowProcW`.

use std::sync::atomic::{AtomicIsize, Ordering};

use windows::Win32::Foundation::{HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::UI::WindowsAndMessaging::{
    CallWindowProcW, GetWindowRect, SetWindowLongPtrW, GWLP_WNDPROC, SC_MAXIMIZE,
    WM_DISPLAYCHANGE, WM_ENTERSIZEMOVE, WM_EXITSIZEMOVE, WM_SETFOCUS, WM_SYSCOMMAND, WNDPROC,
};

use crate::geometry;
use crate::state::{DisplayMode, DisplayState, STATE};

static ORIGINAL_WNDPROC: AtomicIsize = AtomicIsize::new(0);

/// Routes the subclass to `hwnd`, detaching from a previously tracked window
/// first. Safe to call with the already-tracked handle.
pub fn attach(state: &DisplayState, hwnd: HWND) {
    if hwnd.is_invalid() {
        return;
    }
    let handle = hwnd.0 as isize;
    let previous = state.track_main_window(handle);
    if previous == handle {
        return;
    }
    if previous != 0 {
        restore(previous);
    }

    let original =
        unsafe { SetWindowLongPtrW(hwnd, GWLP_WNDPROC, subclass_wndproc as usize as isize) };
    if original == 0 {
        log::warn!("window subclass failed for {handle:#x}; message events unavailable");
        return;
    }
    ORIGINAL_WNDPROC.store(original, Ordering::SeqCst);
    log::debug!("main window tracked: {handle:#x}");
}

pub fn detach(state: &DisplayState) {
    let handle = state.track_main_window(0);
    if handle != 0 {
        restore(handle);
    }
}

fn restore(handle: isize) {
    let original = ORIGINAL_WNDPROC.swap(0, Ordering::SeqCst);
    if original != 0 {
        let hwnd = HWND(handle as *mut core::ffi::c_void);
        unsafe { SetWindowLongPtrW(hwnd, GWLP_WNDPROC, original) };
    }
}

unsafe extern "system" fn subclass_wndproc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_DISPLAYCHANGE => {
            STATE.mark_monitors_dirty();
        }
        WM_ENTERSIZEMOVE => {
            STATE.set_drag_in_progress(true);
        }
        WM_EXITSIZEMOVE => {
            STATE.set_drag_in_progress(false);
            // The dragged origin becomes the configured position in the
            // user-placeable modes; otherwise the next apply would move
            // the window straight back.
            if matches!(
                STATE.active_mode(),
                DisplayMode::Bordered | DisplayMode::Borderless
            ) {
                let mut rect = RECT::default();
                if GetWindowRect(hwnd, &mut rect).is_ok() {
                    STATE.adopt_window_position(rect.left, rect.top);
                }
            }
            // A settings change may have arrived mid-drag; promote it now
            // that the modal loop is over.
            if STATE.take_pending_apply() {
                STATE.check_and_apply_pending_mode();
            }
            geometry::apply(&STATE, hwnd);
        }
        WM_SETFOCUS => {
            STATE.set_focus_regained();
        }
        WM_SYSCOMMAND => {
            // Maximize would fight the engine's own placement; swallow it
            // unless the engine itself is moving the window.
            let command = (wparam.0 & 0xFFF0) as u32;
            if command == SC_MAXIMIZE
                && STATE.active_mode().engine_owns_placement()
                && !STATE.in_internal_change()
            {
                return LRESULT(0);
            }
        }
        _ => {}
    }

    let original = ORIGINAL_WNDPROC.load(Ordering::SeqCst);
    if original == 0 {
        return LRESULT(0);
    }
    let original: WNDPROC = std::mem::transmute(original);
    CallWindowProcW(original, hwnd, msg, wparam, lparam)
}
