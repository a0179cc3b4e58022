//! Secondary overlay windows (detached panels).
//!
//! A secondary window has a home in *virtual* coordinates. When the main
//! window changes, one of two reconciliation policies applies:
//!
//! * the virtual-to-physical scale changed (resize, resolution change):
//!   re-scale the physical rect so the panel keeps its virtual position;
//! * only the main window moved (scale unchanged): keep the physical rect
//!   and reproject it into updated virtual coordinates.
//!
//! Picking the wrong policy makes panels visibly drift, so the choice is
//! keyed strictly on whether the scale ratio changed since the last pass.

use std::sync::Mutex;

use crate::transform::{self, Point, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecondaryWindow {
    /// Opaque OS handle (HWND); 0 in synthetic/test data.
    pub handle: isize,
    pub virtual_rect: Rect,
    pub physical_rect: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryPolicy {
    /// Scale changed: recompute physical from virtual.
    Rescale,
    /// Scale unchanged: recompute virtual from physical.
    Reproject,
}

pub fn choose_policy(previous: Option<(f64, f64)>, current: (f64, f64)) -> SecondaryPolicy {
    match previous {
        Some((px, py))
            if (px - current.0).abs() < 1e-6 && (py - current.1).abs() < 1e-6 =>
        {
            SecondaryPolicy::Reproject
        }
        _ => SecondaryPolicy::Rescale,
    }
}

/// Applies one policy step to a window. Returns the new physical rect when
/// the OS window must move; `None` when only bookkeeping changed.
pub fn reconcile(
    window: &mut SecondaryWindow,
    policy: SecondaryPolicy,
    virtual_width: i32,
    virtual_height: i32,
    client: Rect,
    screen_offset: Point,
) -> Option<Rect> {
    match policy {
        SecondaryPolicy::Rescale => {
            let physical = transform::virtual_rect_to_physical(
                virtual_width,
                virtual_height,
                client,
                screen_offset,
                window.virtual_rect,
            )?;
            window.physical_rect = physical;
            Some(physical)
        }
        SecondaryPolicy::Reproject => {
            let virtual_rect = transform::physical_rect_to_virtual(
                virtual_width,
                virtual_height,
                client,
                screen_offset,
                window.physical_rect,
            )?;
            window.virtual_rect = virtual_rect;
            None
        }
    }
}

#[derive(Default)]
pub struct ViewportManager {
    windows: Mutex<Vec<SecondaryWindow>>,
    last_scale: Mutex<Option<(f64, f64)>>,
}

impl ViewportManager {
    pub const fn new() -> Self {
        ViewportManager {
            windows: Mutex::new(Vec::new()),
            last_scale: Mutex::new(None),
        }
    }

    pub fn register(&self, window: SecondaryWindow) {
        let mut windows = lock(&self.windows);
        windows.retain(|w| w.handle != window.handle);
        windows.push(window);
    }

    pub fn unregister(&self, handle: isize) {
        lock(&self.windows).retain(|w| w.handle != handle);
    }

    pub fn is_registered(&self, handle: isize) -> bool {
        lock(&self.windows).iter().any(|w| w.handle == handle)
    }

    /// Runs one reconciliation pass against the main window's current
    /// client rect. Returns the `(handle, rect)` moves the OS layer must
    /// perform.
    pub fn on_main_window_change(
        &self,
        virtual_width: i32,
        virtual_height: i32,
        client: Rect,
        screen_offset: Point,
    ) -> Vec<(isize, Rect)> {
        let Some(scale) = transform::scale_ratio(virtual_width, virtual_height, client) else {
            return Vec::new();
        };
        let policy = {
            let mut last = lock(&self.last_scale);
            let policy = choose_policy(*last, scale);
            *last = Some(scale);
            policy
        };

        let mut moves = Vec::new();
        for window in lock(&self.windows).iter_mut() {
            if let Some(rect) = reconcile(
                window,
                policy,
                virtual_width,
                virtual_height,
                client,
                screen_offset,
            ) {
                moves.push((window.handle, rect));
            }
        }
        moves
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub static VIEWPORTS: ViewportManager = ViewportManager::new();

#[cfg(windows)]
mod os {
    use super::VIEWPORTS;
    use crate::state::DisplayState;
    use crate::transform::{Point, Rect};
    use windows::Win32::Foundation::{HWND, POINT, RECT};
    use windows::Win32::Graphics::Gdi::ClientToScreen;
    use windows::Win32::UI::WindowsAndMessaging::{GetClientRect, MoveWindow};

    /// Repositions registered secondary windows after the main window's
    /// geometry changed.
    pub fn refresh_secondary_windows(state: &DisplayState) {
        let hwnd = HWND(state.main_window() as *mut core::ffi::c_void);
        if hwnd.is_invalid() {
            return;
        }
        let mut client = RECT::default();
        if unsafe { GetClientRect(hwnd, &mut client) }.is_err() {
            return;
        }
        let mut origin = POINT::default();
        let _ = unsafe { ClientToScreen(hwnd, &mut origin) };

        let (vw, vh) = state.virtual_resolution();
        let moves = VIEWPORTS.on_main_window_change(
            vw,
            vh,
            Rect::from(client),
            Point::new(origin.x, origin.y),
        );
        for (handle, rect) in moves {
            let secondary = HWND(handle as *mut core::ffi::c_void);
            if unsafe {
                MoveWindow(
                    secondary,
                    rect.left,
                    rect.top,
                    rect.width(),
                    rect.height(),
                    true,
                )
            }
            .is_err()
            {
                log::debug!("secondary window {handle:#x} could not be moved");
            }
        }
    }
}

#[cfg(windows)]
pub use os::refresh_secondary_windows;

#[cfg(not(windows))]
pub fn refresh_secondary_windows(_state: &crate::state::DisplayState) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_change_picks_rescale() {
        assert_eq!(choose_policy(None, (1.0, 1.0)), SecondaryPolicy::Rescale);
        assert_eq!(
            choose_policy(Some((1.0, 1.0)), (1.5, 1.5)),
            SecondaryPolicy::Rescale
        );
        assert_eq!(
            choose_policy(Some((1.5, 1.5)), (1.5, 1.5)),
            SecondaryPolicy::Reproject
        );
    }

    #[test]
    fn rescale_preserves_virtual_position() {
        let mut window = SecondaryWindow {
            handle: 1,
            virtual_rect: Rect::from_size(100, 100, 200, 150),
            physical_rect: Rect::from_size(100, 100, 200, 150),
        };
        // Window grew from 1:1 to 2:1.
        let client = Rect::from_size(0, 0, 2560, 1440);
        let moved = reconcile(
            &mut window,
            SecondaryPolicy::Rescale,
            1280,
            720,
            client,
            Point::new(0, 0),
        )
        .unwrap();
        assert_eq!(moved, Rect::from_size(200, 200, 400, 300));
        assert_eq!(window.virtual_rect, Rect::from_size(100, 100, 200, 150));
    }

    #[test]
    fn reproject_updates_virtual_after_pure_move() {
        let mut window = SecondaryWindow {
            handle: 1,
            virtual_rect: Rect::from_size(100, 100, 200, 150),
            physical_rect: Rect::from_size(300, 100, 200, 150),
        };
        let client = Rect::from_size(0, 0, 1280, 720);
        // Main window moved 200 px to the left: the panel's physical rect
        // stays put, its virtual home shifts.
        let result = reconcile(
            &mut window,
            SecondaryPolicy::Reproject,
            1280,
            720,
            client,
            Point::new(-200, 0),
        );
        assert!(result.is_none());
        assert_eq!(window.virtual_rect, Rect::from_size(500, 100, 200, 150));
    }

    #[test]
    fn manager_moves_windows_only_on_scale_change() {
        let manager = ViewportManager::new();
        manager.register(SecondaryWindow {
            handle: 7,
            virtual_rect: Rect::from_size(0, 0, 100, 100),
            physical_rect: Rect::from_size(0, 0, 100, 100),
        });

        let client = Rect::from_size(0, 0, 1280, 720);
        // First pass establishes the scale baseline and rescales.
        let moves = manager.on_main_window_change(1280, 720, client, Point::new(0, 0));
        assert_eq!(moves.len(), 1);

        // Same scale, window only moved: no OS moves, reprojection only.
        let moves = manager.on_main_window_change(1280, 720, client, Point::new(50, 50));
        assert!(moves.is_empty());

        // Scale changed: physical rects are recomputed again.
        let bigger = Rect::from_size(0, 0, 2560, 1440);
        let moves = manager.on_main_window_change(1280, 720, bigger, Point::new(50, 50));
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].0, 7);
    }

    #[test]
    fn register_replaces_existing_handle() {
        let manager = ViewportManager::new();
        let first = SecondaryWindow {
            handle: 3,
            virtual_rect: Rect::from_size(0, 0, 10, 10),
            physical_rect: Rect::from_size(0, 0, 10, 10),
        };
        let second = SecondaryWindow {
            handle: 3,
            virtual_rect: Rect::from_size(5, 5, 10, 10),
            physical_rect: Rect::from_size(5, 5, 10, 10),
        };
        manager.register(first);
        manager.register(second);
        assert!(manager.is_registered(3));
        let client = Rect::from_size(0, 0, 100, 100);
        let moves = manager.on_main_window_change(100, 100, client, Point::new(0, 0));
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].1.origin(), Point::new(5, 5));

        manager.unregister(3);
        assert!(!manager.is_registered(3));
    }
}
