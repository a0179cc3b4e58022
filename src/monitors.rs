//! Monitor enumeration and placement lookup.
//!
//! Enumeration results are cached and only refreshed after a display-change
//! notification flagged the cache dirty; the settings UI and the geometry
//! controller both query through the same cache so they agree on indices.
//! Monitors are sorted left-to-right (ties broken top-to-bottom) so the
//! index a user picked stays stable across enumeration order changes.

use crate::transform::{Point, Rect};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorInfo {
    /// Opaque OS handle (HMONITOR); 0 in synthetic/test data.
    pub handle: isize,
    pub rect: Rect,
    pub work: Rect,
    pub name: String,
    pub primary: bool,
}

pub fn sort_monitors(mut monitors: Vec<MonitorInfo>) -> Vec<MonitorInfo> {
    monitors.sort_by_key(|m| (m.rect.left, m.rect.top));
    monitors
}

pub fn primary_index(monitors: &[MonitorInfo]) -> Option<usize> {
    monitors.iter().position(|m| m.primary)
}

/// Resolves a configured monitor index, falling back to the primary monitor
/// (and from there to the first entry) when the index is out of range.
pub fn resolve_monitor(monitors: &[MonitorInfo], index: i32) -> Option<&MonitorInfo> {
    if index >= 0 {
        if let Some(m) = monitors.get(index as usize) {
            return Some(m);
        }
    }
    primary_index(monitors)
        .and_then(|i| monitors.get(i))
        .or_else(|| monitors.first())
}

/// Index of the monitor whose rect contains the given point (typically the
/// main window's center), falling back to the primary monitor.
pub fn index_containing(monitors: &[MonitorInfo], p: Point) -> Option<usize> {
    monitors
        .iter()
        .position(|m| m.rect.contains(p))
        .or_else(|| primary_index(monitors))
}

#[cfg(windows)]
mod os {
    use super::MonitorInfo;
    use crate::transform::Rect;
    use std::sync::Mutex;
    use windows::Win32::Foundation::{BOOL, LPARAM, RECT, TRUE};
    use windows::Win32::Graphics::Gdi::{
        EnumDisplayMonitors, GetMonitorInfoW, HDC, HMONITOR, MONITORINFOEXW,
        MONITORINFOF_PRIMARY,
    };

    static CACHE: Mutex<Vec<MonitorInfo>> = Mutex::new(Vec::new());

    unsafe extern "system" fn enum_proc(
        handle: HMONITOR,
        _hdc: HDC,
        _rect: *mut RECT,
        out: LPARAM,
    ) -> BOOL {
        let monitors = &mut *(out.0 as *mut Vec<MonitorInfo>);

        let mut info = MONITORINFOEXW::default();
        info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;
        if GetMonitorInfoW(handle, &mut info.monitorInfo).as_bool() {
            let name_len = info
                .szDevice
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(info.szDevice.len());
            monitors.push(MonitorInfo {
                handle: handle.0 as isize,
                rect: Rect::from(info.monitorInfo.rcMonitor),
                work: Rect::from(info.monitorInfo.rcWork),
                name: String::from_utf16_lossy(&info.szDevice[..name_len]),
                primary: (info.monitorInfo.dwFlags & MONITORINFOF_PRIMARY) != 0,
            });
        }
        TRUE
    }

    fn enumerate() -> Vec<MonitorInfo> {
        let mut monitors: Vec<MonitorInfo> = Vec::new();
        let ok = unsafe {
            EnumDisplayMonitors(
                None,
                None,
                Some(enum_proc),
                LPARAM(&mut monitors as *mut _ as isize),
            )
        };
        if !ok.as_bool() {
            log::warn!("EnumDisplayMonitors failed, keeping previous monitor list");
        }
        super::sort_monitors(monitors)
    }

    /// Snapshot of the monitor list, re-enumerating when `refresh` is set.
    pub fn monitors(refresh: bool) -> Vec<MonitorInfo> {
        let mut cache = match CACHE.lock() {
            Ok(c) => c,
            Err(poisoned) => poisoned.into_inner(),
        };
        if refresh || cache.is_empty() {
            let fresh = enumerate();
            if !fresh.is_empty() {
                *cache = fresh;
            }
        }
        cache.clone()
    }
}

#[cfg(windows)]
pub use os::monitors as enumerate_monitors;

#[cfg(test)]
mod tests {
    use super::*;

    fn two_monitors() -> Vec<MonitorInfo> {
        vec![
            MonitorInfo {
                handle: 0,
                rect: Rect::from_size(1920, 0, 2560, 1440),
                work: Rect::from_size(1920, 0, 2560, 1400),
                name: "\\\\.\\DISPLAY2".into(),
                primary: false,
            },
            MonitorInfo {
                handle: 0,
                rect: Rect::from_size(0, 0, 1920, 1080),
                work: Rect::from_size(0, 0, 1920, 1040),
                name: "\\\\.\\DISPLAY1".into(),
                primary: true,
            },
        ]
    }

    #[test]
    fn sorted_left_to_right() {
        let sorted = sort_monitors(two_monitors());
        assert_eq!(sorted[0].rect.left, 0);
        assert_eq!(sorted[1].rect.left, 1920);
        assert_eq!(primary_index(&sorted), Some(0));
    }

    #[test]
    fn out_of_range_index_falls_back_to_primary() {
        let sorted = sort_monitors(two_monitors());
        assert!(resolve_monitor(&sorted, 1).unwrap().rect.left == 1920);
        assert!(resolve_monitor(&sorted, 7).unwrap().primary);
        assert!(resolve_monitor(&sorted, -1).unwrap().primary);
    }

    #[test]
    fn index_containing_window_center() {
        let sorted = sort_monitors(two_monitors());
        assert_eq!(index_containing(&sorted, Point::new(2000, 500)), Some(1));
        assert_eq!(index_containing(&sorted, Point::new(10, 10)), Some(0));
        // Off-screen point falls back to primary.
        assert_eq!(index_containing(&sorted, Point::new(-500, -500)), Some(0));
    }

    #[test]
    fn empty_list_resolves_to_none() {
        assert!(resolve_monitor(&[], 0).is_none());
    }
}
