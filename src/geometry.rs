//! Window geometry control.
//!
//! `desired_window` computes what style and rectangle the on-screen window
//! should have for the current state; `plan_window` diffs that against the
//! window's true current style/rect and yields `None` when nothing changed.
//! That makes the OS-side [`apply`] safe to call unconditionally on every
//! frame tick and every resize/reset event: a no-op plan touches nothing.

use crate::monitors::MonitorInfo;
use crate::state::{DisplayMode, ResizeBehavior, StateSnapshot};
use crate::transform::Rect;

/// OS-agnostic window style. The OS layer maps this onto the real style
/// bits; keeping it abstract keeps the planner testable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStyle {
    /// Undecorated popup window (no caption/frame) vs. overlapped window.
    pub popup: bool,
    pub topmost: bool,
}

/// Frame sizes an overlapped window adds around its client area. Zero for
/// popup styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BorderMetrics {
    pub frame_x: i32,
    pub frame_y: i32,
    pub caption: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    pub style: WindowStyle,
    pub rect: Rect,
    pub style_changed: bool,
    pub rect_changed: bool,
}

/// Client-area size the window should present for the current state.
fn desired_size(snap: &StateSnapshot, monitor: &MonitorInfo) -> (i32, i32) {
    let configured = (snap.width, snap.height);
    let virtual_res = (snap.virtual_width, snap.virtual_height);
    let pick = |primary: (i32, i32), secondary: (i32, i32)| {
        if primary.0 > 0 && primary.1 > 0 {
            primary
        } else if secondary.0 > 0 && secondary.1 > 0 {
            secondary
        } else {
            (monitor.rect.width(), monitor.rect.height())
        }
    };
    match snap.resize_behavior {
        ResizeBehavior::ScaleToFixedWindow => pick(configured, virtual_res),
        ResizeBehavior::MatchHostResolution => pick(virtual_res, configured),
    }
}

/// Both `0` and `-1` act as a "center on the target monitor" sentinel.
fn is_center_sentinel(v: i32) -> bool {
    v == 0 || v == -1
}

fn position(snap: &StateSnapshot, bounds: Rect, width: i32, height: i32) -> (i32, i32) {
    let x = if is_center_sentinel(snap.x) {
        bounds.left + (bounds.width() - width) / 2
    } else {
        snap.x
    };
    let y = if is_center_sentinel(snap.y) {
        bounds.top + (bounds.height() - height) / 2
    } else {
        snap.y
    };
    (x, y)
}

/// Target style and outer rectangle for the main window.
pub fn desired_window(
    snap: &StateSnapshot,
    monitor: &MonitorInfo,
    border: BorderMetrics,
) -> (WindowStyle, Rect) {
    match snap.mode {
        DisplayMode::ExclusiveFullscreen => {
            // The output covers the monitor at the mode the device sets; the
            // window itself sits at the monitor origin sized to the virtual
            // resolution so a silent fall-back to windowed stays aligned.
            let (w, h) = if snap.virtual_width > 0 && snap.virtual_height > 0 {
                (snap.virtual_width, snap.virtual_height)
            } else {
                (monitor.rect.width(), monitor.rect.height())
            };
            (
                WindowStyle {
                    popup: true,
                    topmost: snap.always_on_top,
                },
                Rect::from_size(monitor.rect.left, monitor.rect.top, w, h),
            )
        }
        DisplayMode::BorderlessFullscreen => (
            WindowStyle {
                popup: true,
                topmost: snap.always_on_top,
            },
            monitor.rect,
        ),
        DisplayMode::Borderless => {
            let (w, h) = desired_size(snap, monitor);
            let (x, y) = position(snap, monitor.rect, w, h);
            (
                WindowStyle {
                    popup: true,
                    topmost: snap.always_on_top,
                },
                Rect::from_size(x, y, w, h),
            )
        }
        DisplayMode::Bordered => {
            let (client_w, client_h) = desired_size(snap, monitor);
            let outer_w = client_w + 2 * border.frame_x;
            let outer_h = client_h + 2 * border.frame_y + border.caption;
            // Bordered windows center against the work area so the frame
            // does not hide behind the taskbar.
            let (x, y) = position(snap, monitor.work, outer_w, outer_h);
            (
                WindowStyle {
                    popup: false,
                    topmost: snap.always_on_top,
                },
                Rect::from_size(x, y, outer_w, outer_h),
            )
        }
    }
}

/// Client-area size inside an outer rectangle for the given frame metrics.
/// Undecorated styles carry zero metrics, so outer and client coincide.
pub fn client_size(rect: Rect, border: BorderMetrics) -> (i32, i32) {
    (
        rect.width() - 2 * border.frame_x,
        rect.height() - 2 * border.frame_y - border.caption,
    )
}

/// Diffs the desired window against the current one. `None` means the
/// window already matches and the caller must not touch it.
pub fn plan_window(
    desired_style: WindowStyle,
    desired_rect: Rect,
    current_style: WindowStyle,
    current_rect: Rect,
) -> Option<WindowPlan> {
    let style_changed = desired_style != current_style;
    let rect_changed = desired_rect != current_rect;
    if !style_changed && !rect_changed {
        return None;
    }
    Some(WindowPlan {
        style: desired_style,
        rect: desired_rect,
        style_changed,
        rect_changed,
    })
}

#[cfg(windows)]
mod os {
    use super::{desired_window, plan_window, BorderMetrics, WindowStyle};
    use crate::monitors::{enumerate_monitors, resolve_monitor, MonitorInfo};
    use crate::state::{CursorClip, DisplayState};
    use crate::transform::Rect;
    use std::sync::atomic::{AtomicBool, Ordering};
    use windows::Win32::Foundation::{HWND, POINT, RECT};
    use windows::Win32::Graphics::Gdi::{
        ClientToScreen, GetMonitorInfoW, MonitorFromWindow, MONITORINFO,
        MONITOR_DEFAULTTOPRIMARY,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        AdjustWindowRectEx, ClipCursor, GetClientRect, GetForegroundWindow,
        GetWindowLongPtrW, GetWindowRect, SetWindowLongPtrW, SetWindowPos, GWL_EXSTYLE,
        GWL_STYLE, HWND_NOTOPMOST, HWND_TOPMOST, SWP_FRAMECHANGED, SWP_NOACTIVATE,
        SWP_SHOWWINDOW, WINDOW_EX_STYLE, WINDOW_STYLE, WS_EX_TOPMOST, WS_OVERLAPPEDWINDOW,
        WS_POPUP, WS_VISIBLE,
    };

    static CURSOR_CLIPPED: AtomicBool = AtomicBool::new(false);

    fn border_metrics(style: WINDOW_STYLE) -> BorderMetrics {
        let mut probe = RECT::default();
        if unsafe { AdjustWindowRectEx(&mut probe, style, false, WINDOW_EX_STYLE(0)) }.is_err() {
            return BorderMetrics::default();
        }
        BorderMetrics {
            frame_x: -probe.left,
            frame_y: probe.bottom,
            caption: -probe.top - probe.bottom,
        }
    }

    /// Monitor the window currently sits on, as a fallback when the cached
    /// list cannot resolve the configured index.
    fn monitor_of_window(hwnd: HWND) -> MonitorInfo {
        let handle = unsafe { MonitorFromWindow(hwnd, MONITOR_DEFAULTTOPRIMARY) };
        let mut info = MONITORINFO {
            cbSize: std::mem::size_of::<MONITORINFO>() as u32,
            ..Default::default()
        };
        if unsafe { GetMonitorInfoW(handle, &mut info) }.as_bool() {
            MonitorInfo {
                handle: handle.0 as isize,
                rect: Rect::from(info.rcMonitor),
                work: Rect::from(info.rcWork),
                name: String::new(),
                primary: true,
            }
        } else {
            // Last resort: a generic primary-screen assumption beats failing
            // the caller.
            MonitorInfo {
                handle: 0,
                rect: Rect::from_size(0, 0, 1920, 1080),
                work: Rect::from_size(0, 0, 1920, 1080),
                name: String::new(),
                primary: true,
            }
        }
    }

    /// Reconciles the real window with the configured state. Idempotent;
    /// runs under the re-entrancy guard so the WM_* traffic our own
    /// SetWindowPos generates is recognized and not reprocessed.
    pub fn apply(state: &DisplayState, hwnd: HWND) {
        if hwnd.is_invalid() {
            return;
        }
        // The user owns the window for the duration of a drag/resize;
        // reconciliation resumes once WM_EXITSIZEMOVE has adopted the
        // dragged origin.
        if state.drag_in_progress() {
            return;
        }
        let Some(_guard) = state.begin_internal_change() else {
            return;
        };

        let snap = state.snapshot();
        let refresh = state.take_monitors_dirty();
        let monitors = enumerate_monitors(refresh);
        let monitor = resolve_monitor(&monitors, snap.monitor)
            .cloned()
            .unwrap_or_else(|| monitor_of_window(hwnd));

        // Always read the true style/rect through the plain accessors; the
        // hook chain never intercepts these, so the diff cannot be fooled.
        let raw_style = unsafe { GetWindowLongPtrW(hwnd, GWL_STYLE) } as u32;
        let raw_ex = unsafe { GetWindowLongPtrW(hwnd, GWL_EXSTYLE) } as u32;
        let mut current_rect = RECT::default();
        if unsafe { GetWindowRect(hwnd, &mut current_rect) }.is_err() {
            return;
        }
        let current_style = WindowStyle {
            popup: raw_style & WS_POPUP.0 != 0,
            topmost: raw_ex & WS_EX_TOPMOST.0 != 0,
        };

        let border = if snap.mode == crate::state::DisplayMode::Bordered {
            border_metrics(WS_OVERLAPPEDWINDOW)
        } else {
            BorderMetrics::default()
        };
        let (want_style, want_rect) = desired_window(&snap, &monitor, border);

        if let Some(plan) =
            plan_window(want_style, want_rect, current_style, Rect::from(current_rect))
        {
            if plan.style_changed {
                let bits = if plan.style.popup {
                    WS_POPUP | WS_VISIBLE
                } else {
                    WS_OVERLAPPEDWINDOW | WS_VISIBLE
                };
                unsafe { SetWindowLongPtrW(hwnd, GWL_STYLE, bits.0 as isize) };
            }
            let insert_after = if plan.style.topmost {
                HWND_TOPMOST
            } else {
                HWND_NOTOPMOST
            };
            let r = plan.rect;
            if unsafe {
                SetWindowPos(
                    hwnd,
                    Some(insert_after),
                    r.left,
                    r.top,
                    r.width(),
                    r.height(),
                    SWP_FRAMECHANGED | SWP_NOACTIVATE | SWP_SHOWWINDOW,
                )
            }
            .is_err()
            {
                log::warn!("SetWindowPos failed; keeping previous window geometry");
                return;
            }
            let (client_w, client_h) = super::client_size(r, border);
            state.record_applied_size(client_w, client_h);
            log::debug!(
                "window geometry applied: {:?} at ({}, {}) {}x{}",
                plan.style,
                r.left,
                r.top,
                r.width(),
                r.height()
            );
            if plan.style_changed {
                crate::viewport::refresh_secondary_windows(state);
            }
        }

        apply_cursor_clip(snap.cursor_clip, hwnd);
    }

    fn apply_cursor_clip(clip: CursorClip, hwnd: HWND) {
        let focused = unsafe { GetForegroundWindow() } == hwnd;
        if clip == CursorClip::ConfineToWindow && focused {
            let mut client = RECT::default();
            if unsafe { GetClientRect(hwnd, &mut client) }.is_err() {
                return;
            }
            let mut origin = POINT::default();
            let _ = unsafe { ClientToScreen(hwnd, &mut origin) };
            let bounds = RECT {
                left: client.left + origin.x,
                top: client.top + origin.y,
                right: client.right + origin.x,
                bottom: client.bottom + origin.y,
            };
            if unsafe { ClipCursor(Some(&bounds)) }.is_ok() {
                CURSOR_CLIPPED.store(true, Ordering::SeqCst);
            }
        } else if CURSOR_CLIPPED.swap(false, Ordering::SeqCst) {
            let _ = unsafe { ClipCursor(None) };
        }
    }
}

#[cfg(windows)]
pub use os::apply;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CursorClip, DetectedFullscreen};

    fn monitor(x: i32, y: i32, w: i32, h: i32) -> MonitorInfo {
        MonitorInfo {
            handle: 0,
            rect: Rect::from_size(x, y, w, h),
            work: Rect::from_size(x, y, w, h - 40),
            name: String::new(),
            primary: x == 0 && y == 0,
        }
    }

    fn snapshot(mode: DisplayMode) -> StateSnapshot {
        StateSnapshot {
            mode,
            resize_behavior: ResizeBehavior::MatchHostResolution,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            monitor: -1,
            cursor_clip: CursorClip::Free,
            override_width: 0,
            override_height: 0,
            always_on_top: false,
            virtual_width: 1280,
            virtual_height: 720,
            detected: DetectedFullscreen::Unknown,
        }
    }

    #[test]
    fn borderless_fullscreen_covers_secondary_monitor() {
        let second = monitor(1920, 0, 2560, 1440);
        let snap = snapshot(DisplayMode::BorderlessFullscreen);
        let (style, rect) = desired_window(&snap, &second, BorderMetrics::default());
        assert!(style.popup);
        assert_eq!(rect, Rect::new(1920, 0, 4480, 1440));
        // The virtual resolution is untouched by geometry planning.
        assert_eq!((snap.virtual_width, snap.virtual_height), (1280, 720));
    }

    #[test]
    fn borderless_centers_on_sentinel_position() {
        let primary = monitor(0, 0, 1920, 1080);
        let mut snap = snapshot(DisplayMode::Borderless);
        snap.x = -1;
        snap.y = 0;
        let (_, rect) = desired_window(&snap, &primary, BorderMetrics::default());
        assert_eq!(rect, Rect::from_size(320, 180, 1280, 720));
    }

    #[test]
    fn borderless_honors_explicit_position() {
        let primary = monitor(0, 0, 1920, 1080);
        let mut snap = snapshot(DisplayMode::Borderless);
        snap.x = 50;
        snap.y = 60;
        let (_, rect) = desired_window(&snap, &primary, BorderMetrics::default());
        assert_eq!(rect.origin(), crate::transform::Point::new(50, 60));
    }

    #[test]
    fn fixed_window_keeps_configured_size_across_resolution_changes() {
        let primary = monitor(0, 0, 1920, 1080);
        let mut snap = snapshot(DisplayMode::Borderless);
        snap.resize_behavior = ResizeBehavior::ScaleToFixedWindow;
        snap.width = 1600;
        snap.height = 900;
        snap.virtual_width = 640;
        snap.virtual_height = 480;
        let (_, rect) = desired_window(&snap, &primary, BorderMetrics::default());
        assert_eq!((rect.width(), rect.height()), (1600, 900));
    }

    #[test]
    fn bordered_accounts_for_frame_and_centers_in_work_area() {
        let primary = monitor(0, 0, 1920, 1080);
        let mut snap = snapshot(DisplayMode::Bordered);
        snap.width = 800;
        snap.height = 600;
        snap.resize_behavior = ResizeBehavior::ScaleToFixedWindow;
        let border = BorderMetrics {
            frame_x: 8,
            frame_y: 8,
            caption: 23,
        };
        let (style, rect) = desired_window(&snap, &primary, border);
        assert!(!style.popup);
        assert_eq!((rect.width(), rect.height()), (816, 639));
        // Centered within the 1040-high work area, not the full monitor.
        assert_eq!(rect.top, (1040 - 639) / 2);
    }

    #[test]
    fn dragged_position_is_adopted_instead_of_fought() {
        use crate::state::{ApiFamily, DisplayState, WindowSettings};
        let primary = monitor(0, 0, 1920, 1080);
        let state = DisplayState::new();
        let settings = WindowSettings {
            mode: DisplayMode::Borderless,
            resize_behavior: ResizeBehavior::ScaleToFixedWindow,
            x: 50,
            y: 60,
            width: 800,
            height: 600,
            ..WindowSettings::default()
        };
        state.early_init(&settings, ApiFamily::Auto);

        // The user drags the window to (400, 400); the end-of-drag handler
        // adopts that origin as the configured position.
        state.set_drag_in_progress(true);
        state.adopt_window_position(400, 400);
        state.set_drag_in_progress(false);

        let snap = state.snapshot();
        let (style, rect) = desired_window(&snap, &primary, BorderMetrics::default());
        assert_eq!(rect.origin(), crate::transform::Point::new(400, 400));
        // The window already sits there, so the reconciliation is a no-op
        // rather than a snap back to (50, 60).
        assert!(plan_window(style, rect, style, rect).is_none());
    }

    #[test]
    fn applied_size_reports_client_area_not_outer_rect() {
        let primary = monitor(0, 0, 1920, 1080);
        let mut snap = snapshot(DisplayMode::Bordered);
        snap.width = 800;
        snap.height = 600;
        snap.resize_behavior = ResizeBehavior::ScaleToFixedWindow;
        let border = BorderMetrics {
            frame_x: 8,
            frame_y: 8,
            caption: 23,
        };
        let (_, rect) = desired_window(&snap, &primary, border);
        assert_eq!(client_size(rect, border), (800, 600));

        let full = monitor(0, 0, 1920, 1080).rect;
        assert_eq!(
            client_size(full, BorderMetrics::default()),
            (full.width(), full.height())
        );
    }

    #[test]
    fn plan_is_idempotent() {
        let m = monitor(0, 0, 1920, 1080);
        let snap = snapshot(DisplayMode::BorderlessFullscreen);
        let (style, rect) = desired_window(&snap, &m, BorderMetrics::default());

        let stale_style = WindowStyle {
            popup: false,
            topmost: false,
        };
        let first = plan_window(style, rect, stale_style, Rect::from_size(10, 10, 640, 480));
        assert!(first.is_some());

        // After executing the first plan the window matches; the second call
        // must be a true no-op.
        let second = plan_window(style, rect, style, rect);
        assert!(second.is_none());
    }

    #[test]
    fn topmost_flag_alone_produces_a_plan() {
        let m = monitor(0, 0, 1920, 1080);
        let mut snap = snapshot(DisplayMode::BorderlessFullscreen);
        snap.always_on_top = true;
        let (style, rect) = desired_window(&snap, &m, BorderMetrics::default());
        let current = WindowStyle {
            popup: true,
            topmost: false,
        };
        let plan = plan_window(style, rect, current, rect).unwrap();
        assert!(plan.style_changed);
        assert!(!plan.rect_changed);
    }
}
