//! Process-wide virtual display state.
//!
//! One instance of [`DisplayState`] is shared by the graphics hooks (render
//! thread), the window procedure (message thread) and the settings UI. Every
//! field is an independent atomic: each one is meaningful on its own, so no
//! multi-field transaction is ever needed and a reader that sees two stale
//! but untorn flags is corrected by the next frame tick. See the field
//! comments for which side writes what.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicIsize, AtomicU8, Ordering};

/// How the on-screen window presents the host's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DisplayMode {
    ExclusiveFullscreen = 0,
    BorderlessFullscreen = 1,
    Borderless = 2,
    Bordered = 3,
}

impl DisplayMode {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => DisplayMode::ExclusiveFullscreen,
            1 => DisplayMode::BorderlessFullscreen,
            2 => DisplayMode::Borderless,
            _ => DisplayMode::Bordered,
        }
    }

    /// Whether the engine, not the host, decides window placement.
    pub fn engine_owns_placement(self) -> bool {
        self != DisplayMode::ExclusiveFullscreen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResizeBehavior {
    /// The window tracks whatever resolution the host renders at.
    MatchHostResolution = 0,
    /// The window keeps its configured size; content is scaled into it.
    ScaleToFixedWindow = 1,
}

impl ResizeBehavior {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ResizeBehavior::MatchHostResolution,
            _ => ResizeBehavior::ScaleToFixedWindow,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CursorClip {
    Free = 0,
    ConfineToWindow = 1,
}

impl CursorClip {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CursorClip::ConfineToWindow,
            _ => CursorClip::Free,
        }
    }
}

/// Observed (not configured) exclusive-fullscreen state, refreshed by the
/// per-frame tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DetectedFullscreen {
    Unknown = 0,
    Exclusive = 1,
    NotExclusive = 2,
}

impl DetectedFullscreen {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => DetectedFullscreen::Exclusive,
            2 => DetectedFullscreen::NotExclusive,
            _ => DetectedFullscreen::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApiFamily {
    Auto = 0,
    Dx8 = 1,
    Dx9 = 2,
    Dxgi = 3,
}

impl ApiFamily {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => ApiFamily::Dx8,
            2 => ApiFamily::Dx9,
            3 => ApiFamily::Dxgi,
            _ => ApiFamily::Auto,
        }
    }
}

/// User-facing configuration, passed in as plain values; persistence is the
/// caller's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSettings {
    pub mode: DisplayMode,
    pub resize_behavior: ResizeBehavior,
    /// Window position; `0` and `-1` both mean "center on the target
    /// monitor".
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub monitor: i32,
    pub cursor_clip: CursorClip,
    /// Backbuffer override; `0` disables the override.
    pub override_width: i32,
    pub override_height: i32,
    pub always_on_top: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            mode: DisplayMode::Bordered,
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
        }
    }
}

/// Plain-value copy of the configured state, taken once per operation so the
/// geometry and lifecycle planners work on a consistent view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub mode: DisplayMode,
    pub resize_behavior: ResizeBehavior,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub monitor: i32,
    pub cursor_clip: CursorClip,
    pub override_width: i32,
    pub override_height: i32,
    pub always_on_top: bool,
    pub virtual_width: i32,
    pub virtual_height: i32,
    pub detected: DetectedFullscreen,
}

impl StateSnapshot {
    pub fn override_resolution(&self) -> Option<(i32, i32)> {
        if self.override_width > 0 && self.override_height > 0 {
            Some((self.override_width, self.override_height))
        } else {
            None
        }
    }
}

pub struct DisplayState {
    // Mode machine: the UI writes `queued_mode`, the render thread promotes
    // it to `active_mode` at safe points only.
    active_mode: AtomicU8,
    queued_mode: AtomicU8,
    resize_behavior: AtomicU8,

    // Authoritative host resolution. Written only through
    // `set_virtual_resolution`, which only `lifecycle::notify_resolution_change`
    // calls.
    virtual_width: AtomicI32,
    virtual_height: AtomicI32,

    // User-configured geometry/policy (UI thread writes, render thread reads).
    window_x: AtomicI32,
    window_y: AtomicI32,
    window_width: AtomicI32,
    window_height: AtomicI32,
    target_monitor: AtomicI32,
    always_on_top: AtomicBool,
    cursor_clip: AtomicU8,
    override_width: AtomicI32,
    override_height: AtomicI32,

    // Last geometry actually applied to the window (render thread writes).
    applied_width: AtomicI32,
    applied_height: AtomicI32,

    // Observed state and transient guards.
    detected_fullscreen: AtomicU8,
    in_internal_change: AtomicBool,
    pending_apply: AtomicBool,
    monitors_dirty: AtomicBool,
    drag_in_progress: AtomicBool,
    focus_regained: AtomicBool,
    frame_in_flight: AtomicBool,
    device_reset_needed: AtomicBool,

    main_window: AtomicIsize,
    api_family: AtomicU8,
    initialized: AtomicBool,
}

impl DisplayState {
    pub const fn new() -> Self {
        DisplayState {
            active_mode: AtomicU8::new(DisplayMode::Bordered as u8),
            queued_mode: AtomicU8::new(DisplayMode::Bordered as u8),
            resize_behavior: AtomicU8::new(ResizeBehavior::MatchHostResolution as u8),
            virtual_width: AtomicI32::new(0),
            virtual_height: AtomicI32::new(0),
            window_x: AtomicI32::new(0),
            window_y: AtomicI32::new(0),
            window_width: AtomicI32::new(0),
            window_height: AtomicI32::new(0),
            target_monitor: AtomicI32::new(-1),
            always_on_top: AtomicBool::new(false),
            cursor_clip: AtomicU8::new(CursorClip::Free as u8),
            override_width: AtomicI32::new(0),
            override_height: AtomicI32::new(0),
            applied_width: AtomicI32::new(0),
            applied_height: AtomicI32::new(0),
            detected_fullscreen: AtomicU8::new(DetectedFullscreen::Unknown as u8),
            in_internal_change: AtomicBool::new(false),
            pending_apply: AtomicBool::new(false),
            monitors_dirty: AtomicBool::new(true),
            drag_in_progress: AtomicBool::new(false),
            focus_regained: AtomicBool::new(false),
            frame_in_flight: AtomicBool::new(false),
            device_reset_needed: AtomicBool::new(false),
            main_window: AtomicIsize::new(0),
            api_family: AtomicU8::new(ApiFamily::Auto as u8),
            initialized: AtomicBool::new(false),
        }
    }

    /// One-time bootstrap, before any window or device exists. Later calls
    /// are ignored; use [`DisplayState::set_settings`] for live changes.
    pub fn early_init(&self, settings: &WindowSettings, api_hint: ApiFamily) {
        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.store_settings(settings);
        // No device exists yet, so the queued mode is safe to promote now.
        self.active_mode
            .store(settings.mode as u8, Ordering::SeqCst);
        self.api_family.store(api_hint as u8, Ordering::SeqCst);
        log::info!(
            "display state seeded: mode {:?}, behavior {:?}, api hint {:?}",
            settings.mode,
            settings.resize_behavior,
            api_hint
        );
    }

    /// Live settings update from the UI thread. Returns `true` when the
    /// change is safe to apply immediately; `false` when a drag/resize is in
    /// progress and the apply was deferred.
    pub fn set_settings(&self, settings: &WindowSettings) -> bool {
        let before = self.snapshot();
        self.store_settings(settings);

        let exclusive_flip = (before.mode == DisplayMode::ExclusiveFullscreen)
            != (settings.mode == DisplayMode::ExclusiveFullscreen);
        let override_changed = (before.override_width, before.override_height)
            != (settings.override_width, settings.override_height);
        if exclusive_flip || override_changed {
            self.device_reset_needed.store(true, Ordering::SeqCst);
        }

        if self.drag_in_progress.load(Ordering::SeqCst) {
            self.pending_apply.store(true, Ordering::SeqCst);
            return false;
        }
        self.check_and_apply_pending_mode();
        true
    }

    fn store_settings(&self, settings: &WindowSettings) {
        let behavior = if settings.mode == DisplayMode::BorderlessFullscreen {
            // The window is pinned to the monitor; only content scales.
            ResizeBehavior::ScaleToFixedWindow
        } else {
            settings.resize_behavior
        };
        self.queued_mode.store(settings.mode as u8, Ordering::SeqCst);
        self.resize_behavior.store(behavior as u8, Ordering::SeqCst);
        self.window_x.store(settings.x, Ordering::SeqCst);
        self.window_y.store(settings.y, Ordering::SeqCst);
        self.window_width.store(settings.width, Ordering::SeqCst);
        self.window_height.store(settings.height, Ordering::SeqCst);
        self.target_monitor.store(settings.monitor, Ordering::SeqCst);
        self.always_on_top
            .store(settings.always_on_top, Ordering::SeqCst);
        self.cursor_clip
            .store(settings.cursor_clip as u8, Ordering::SeqCst);
        self.override_width
            .store(settings.override_width.max(0), Ordering::SeqCst);
        self.override_height
            .store(settings.override_height.max(0), Ordering::SeqCst);
    }

    /// Promotes `queued_mode` to `active_mode`. Called immediately before
    /// every device/window creation, reset and resize entry point so the
    /// host never observes a mode flip interleaved with its own transition.
    pub fn check_and_apply_pending_mode(&self) {
        let queued = self.queued_mode.load(Ordering::SeqCst);
        let previous = self.active_mode.swap(queued, Ordering::SeqCst);
        if previous != queued {
            log::debug!(
                "mode promoted: {:?} -> {:?}",
                DisplayMode::from_u8(previous),
                DisplayMode::from_u8(queued)
            );
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            mode: self.active_mode(),
            resize_behavior: ResizeBehavior::from_u8(self.resize_behavior.load(Ordering::SeqCst)),
            x: self.window_x.load(Ordering::SeqCst),
            y: self.window_y.load(Ordering::SeqCst),
            width: self.window_width.load(Ordering::SeqCst),
            height: self.window_height.load(Ordering::SeqCst),
            monitor: self.target_monitor.load(Ordering::SeqCst),
            cursor_clip: CursorClip::from_u8(self.cursor_clip.load(Ordering::SeqCst)),
            override_width: self.override_width.load(Ordering::SeqCst),
            override_height: self.override_height.load(Ordering::SeqCst),
            always_on_top: self.always_on_top.load(Ordering::SeqCst),
            virtual_width: self.virtual_width.load(Ordering::SeqCst),
            virtual_height: self.virtual_height.load(Ordering::SeqCst),
            detected: self.detected_fullscreen(),
        }
    }

    pub fn active_mode(&self) -> DisplayMode {
        DisplayMode::from_u8(self.active_mode.load(Ordering::SeqCst))
    }

    pub fn queued_mode(&self) -> DisplayMode {
        DisplayMode::from_u8(self.queued_mode.load(Ordering::SeqCst))
    }

    /// Resolution the host believes it renders at.
    pub fn virtual_resolution(&self) -> (i32, i32) {
        (
            self.virtual_width.load(Ordering::SeqCst),
            self.virtual_height.load(Ordering::SeqCst),
        )
    }

    /// Size last applied to the on-screen window; falls back to the virtual
    /// resolution before the first apply.
    pub fn window_resolution(&self) -> (i32, i32) {
        let w = self.applied_width.load(Ordering::SeqCst);
        let h = self.applied_height.load(Ordering::SeqCst);
        if w > 0 && h > 0 {
            (w, h)
        } else {
            self.virtual_resolution()
        }
    }

    /// Sole mutation path for the virtual resolution; only
    /// `lifecycle::notify_resolution_change` may call this.
    pub(crate) fn set_virtual_resolution(&self, width: i32, height: i32) {
        self.virtual_width.store(width, Ordering::SeqCst);
        self.virtual_height.store(height, Ordering::SeqCst);
    }

    pub(crate) fn record_applied_size(&self, width: i32, height: i32) {
        self.applied_width.store(width, Ordering::SeqCst);
        self.applied_height.store(height, Ordering::SeqCst);
    }

    pub fn detected_fullscreen(&self) -> DetectedFullscreen {
        DetectedFullscreen::from_u8(self.detected_fullscreen.load(Ordering::SeqCst))
    }

    pub fn set_detected_fullscreen(&self, detected: DetectedFullscreen) {
        self.detected_fullscreen
            .store(detected as u8, Ordering::SeqCst);
    }

    /// Tries to enter an internal OS change; returns `None` when one is
    /// already in flight (a re-entrant callback) and the caller must bail.
    pub fn begin_internal_change(&self) -> Option<ReentryGuard<'_>> {
        ReentryGuard::acquire(&self.in_internal_change)
    }

    pub fn in_internal_change(&self) -> bool {
        self.in_internal_change.load(Ordering::SeqCst)
    }

    /// Adopts a user-dragged window origin as the configured position, so
    /// the next reconciliation keeps the window where the user left it.
    pub fn adopt_window_position(&self, x: i32, y: i32) {
        self.window_x.store(x, Ordering::SeqCst);
        self.window_y.store(y, Ordering::SeqCst);
    }

    pub fn set_drag_in_progress(&self, dragging: bool) {
        self.drag_in_progress.store(dragging, Ordering::SeqCst);
    }

    pub fn drag_in_progress(&self) -> bool {
        self.drag_in_progress.load(Ordering::SeqCst)
    }

    pub fn take_pending_apply(&self) -> bool {
        self.pending_apply.swap(false, Ordering::SeqCst)
    }

    pub fn set_focus_regained(&self) {
        self.focus_regained.store(true, Ordering::SeqCst);
    }

    pub fn take_focus_regained(&self) -> bool {
        self.focus_regained.swap(false, Ordering::SeqCst)
    }

    pub fn mark_monitors_dirty(&self) {
        self.monitors_dirty.store(true, Ordering::SeqCst);
    }

    pub fn take_monitors_dirty(&self) -> bool {
        self.monitors_dirty.swap(false, Ordering::SeqCst)
    }

    pub fn take_device_reset_needed(&self) -> bool {
        self.device_reset_needed.swap(false, Ordering::SeqCst)
    }

    pub fn begin_frame(&self) {
        self.frame_in_flight.store(true, Ordering::SeqCst);
    }

    pub fn end_frame(&self) {
        self.frame_in_flight.store(false, Ordering::SeqCst);
    }

    pub fn frame_in_flight(&self) -> bool {
        self.frame_in_flight.load(Ordering::SeqCst)
    }

    /// Tracked main window; returns the previous handle so callers can tell
    /// whether wndproc interception must be re-routed.
    pub fn track_main_window(&self, hwnd: isize) -> isize {
        self.main_window.swap(hwnd, Ordering::SeqCst)
    }

    pub fn main_window(&self) -> isize {
        self.main_window.load(Ordering::SeqCst)
    }

    pub fn api_family(&self) -> ApiFamily {
        ApiFamily::from_u8(self.api_family.load(Ordering::SeqCst))
    }

    pub fn set_api_family(&self, api: ApiFamily) {
        self.api_family.store(api as u8, Ordering::SeqCst);
    }
}

impl Default for DisplayState {
    fn default() -> Self {
        DisplayState::new()
    }
}

/// The process-wide state instance shared by hooks, wndproc and the UI.
pub static STATE: DisplayState = DisplayState::new();

/// RAII guard around `in_internal_change`. Acquisition fails when the flag
/// is already set; the flag is cleared on every exit path, including early
/// returns and unwinds.
pub struct ReentryGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ReentryGuard<'a> {
    pub fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| ReentryGuard { flag })
    }
}

impl Drop for ReentryGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mode: DisplayMode) -> WindowSettings {
        WindowSettings {
            mode,
            ..WindowSettings::default()
        }
    }

    #[test]
    fn early_init_runs_once() {
        let state = DisplayState::new();
        state.early_init(&settings(DisplayMode::Borderless), ApiFamily::Dx9);
        state.early_init(&settings(DisplayMode::Bordered), ApiFamily::Dxgi);
        assert_eq!(state.active_mode(), DisplayMode::Borderless);
        assert_eq!(state.api_family(), ApiFamily::Dx9);
    }

    #[test]
    fn mode_changes_are_two_phase() {
        let state = DisplayState::new();
        state.early_init(&settings(DisplayMode::Bordered), ApiFamily::Auto);

        // Simulate a drag so the change is deferred.
        state.set_drag_in_progress(true);
        assert!(!state.set_settings(&settings(DisplayMode::BorderlessFullscreen)));
        assert_eq!(state.active_mode(), DisplayMode::Bordered);
        assert_eq!(state.queued_mode(), DisplayMode::BorderlessFullscreen);
        assert!(state.take_pending_apply());

        state.set_drag_in_progress(false);
        state.check_and_apply_pending_mode();
        assert_eq!(state.active_mode(), DisplayMode::BorderlessFullscreen);
        assert_eq!(state.queued_mode(), state.active_mode());
    }

    #[test]
    fn mode_is_always_one_of_four() {
        let state = DisplayState::new();
        state.early_init(&settings(DisplayMode::Bordered), ApiFamily::Auto);
        let sequence = [
            DisplayMode::ExclusiveFullscreen,
            DisplayMode::Borderless,
            DisplayMode::BorderlessFullscreen,
            DisplayMode::Bordered,
            DisplayMode::ExclusiveFullscreen,
        ];
        for mode in sequence {
            state.set_settings(&settings(mode));
            let active = state.active_mode();
            assert!(matches!(
                active,
                DisplayMode::ExclusiveFullscreen
                    | DisplayMode::BorderlessFullscreen
                    | DisplayMode::Borderless
                    | DisplayMode::Bordered
            ));
            assert_eq!(active, state.queued_mode());
        }
    }

    #[test]
    fn borderless_fullscreen_forces_fixed_window() {
        let state = DisplayState::new();
        let mut s = settings(DisplayMode::BorderlessFullscreen);
        s.resize_behavior = ResizeBehavior::MatchHostResolution;
        state.early_init(&s, ApiFamily::Auto);
        assert_eq!(
            state.snapshot().resize_behavior,
            ResizeBehavior::ScaleToFixedWindow
        );
    }

    #[test]
    fn exclusive_flip_flags_device_reset() {
        let state = DisplayState::new();
        state.early_init(&settings(DisplayMode::Bordered), ApiFamily::Auto);
        assert!(!state.take_device_reset_needed());

        state.set_settings(&settings(DisplayMode::ExclusiveFullscreen));
        assert!(state.take_device_reset_needed());

        // Windowed-to-windowed change does not need a device cycle.
        state.set_settings(&settings(DisplayMode::ExclusiveFullscreen));
        assert!(!state.take_device_reset_needed());

        let mut with_override = settings(DisplayMode::ExclusiveFullscreen);
        with_override.override_width = 2560;
        with_override.override_height = 1440;
        state.set_settings(&with_override);
        assert!(state.take_device_reset_needed());
    }

    #[test]
    fn reentry_guard_blocks_nested_acquire_and_releases_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = ReentryGuard::acquire(&flag).unwrap();
            assert!(ReentryGuard::acquire(&flag).is_none());
        }
        assert!(ReentryGuard::acquire(&flag).is_some());
    }

    #[test]
    fn untracked_window_invites_adoption_exactly_once() {
        let state = DisplayState::new();
        // No create hook has fired yet; the first present must see 0 and
        // adopt the presenting chain's output window.
        assert_eq!(state.main_window(), 0);
        assert_eq!(state.track_main_window(0x1a2b), 0);
        assert_eq!(state.main_window(), 0x1a2b);
        // Re-tracking the same handle signals "already adopted".
        assert_eq!(state.track_main_window(0x1a2b), 0x1a2b);
    }

    #[test]
    fn virtual_resolution_only_changes_through_designated_setter() {
        let state = DisplayState::new();
        state.early_init(&settings(DisplayMode::Bordered), ApiFamily::Auto);
        assert_eq!(state.virtual_resolution(), (0, 0));

        // Settings updates must not touch the virtual resolution.
        let mut s = settings(DisplayMode::Borderless);
        s.width = 1600;
        s.height = 900;
        state.set_settings(&s);
        assert_eq!(state.virtual_resolution(), (0, 0));

        state.set_virtual_resolution(1280, 720);
        assert_eq!(state.virtual_resolution(), (1280, 720));
    }
}
