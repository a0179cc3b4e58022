//! Shared device/swap-chain lifecycle policy.
//!
//! The three backend adapters (`hooks::dx8`, `hooks::dx9`, `hooks::dxgi`)
//! translate their API-specific parameter shapes into the calls here. The
//! host's parameter structure is always copied and overridden by value; the
//! host's own pointer is never mutated, since some hosts reuse that
//! structure across later calls.

use crate::state::{DisplayMode, DisplayState, ResizeBehavior, StateSnapshot};

/// API-neutral view of the parameters a backend passes to its create/reset
/// entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateParams {
    pub width: u32,
    pub height: u32,
    pub windowed: bool,
    pub refresh_rate: u32,
    pub buffer_count: u32,
    /// Flip-model swap effects require a minimum of two buffers.
    pub flip_model: bool,
}

/// Minimum buffer count for flip-model swap effects.
pub const FLIP_MODEL_MIN_BUFFERS: u32 = 2;

/// Overrides requested creation parameters per the configured state.
pub fn override_create_params(snap: &StateSnapshot, requested: CreateParams) -> CreateParams {
    let mut effective = requested;

    // The host's windowed flag is replaced outright; exclusive fullscreen is
    // the only mode that really owns the output.
    effective.windowed = snap.mode != DisplayMode::ExclusiveFullscreen;

    // A windowed swap chain must not pin a refresh rate.
    if effective.windowed {
        effective.refresh_rate = 0;
    }

    if let Some((w, h)) = snap.override_resolution() {
        effective.width = w as u32;
        effective.height = h as u32;
    }

    if effective.flip_model && effective.buffer_count < FLIP_MODEL_MIN_BUFFERS {
        effective.buffer_count = FLIP_MODEL_MIN_BUFFERS;
    }

    effective
}

/// What to do with a host-driven resize-target / display-mode request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeTargetAction {
    /// The engine owns window placement: drop the request, but record the
    /// requested size as the host's new resolution.
    Swallow { width: u32, height: u32 },
    /// Exclusive mode with an override: forward, but at the override size.
    ForwardAdjusted { width: u32, height: u32 },
    /// Nothing configured that concerns this request.
    Forward,
}

pub fn resize_target_action(snap: &StateSnapshot, width: u32, height: u32) -> ResizeTargetAction {
    if snap.mode.engine_owns_placement() {
        // Forwarding would let the host fight the engine over the window
        // rect every time it changes resolution.
        return ResizeTargetAction::Swallow { width, height };
    }
    if let Some((w, h)) = snap.override_resolution() {
        return ResizeTargetAction::ForwardAdjusted {
            width: w as u32,
            height: h as u32,
        };
    }
    ResizeTargetAction::Forward
}

/// Authoritative virtual-resolution update; the single code path that may
/// change `virtual_width/height`. Returns `true` when the on-screen window
/// size should change as a consequence, i.e. the caller must run a geometry
/// apply.
pub fn notify_resolution_change(state: &DisplayState, width: i32, height: i32) -> bool {
    if width <= 0 || height <= 0 {
        // Failed or degenerate backbuffer query; keep the previous
        // known-good resolution and retry on the next successful one.
        return false;
    }
    let previous = state.virtual_resolution();
    state.set_virtual_resolution(width, height);
    if previous == (width, height) {
        return false;
    }
    log::info!(
        "virtual resolution {}x{} -> {}x{}",
        previous.0,
        previous.1,
        width,
        height
    );

    let snap = state.snapshot();
    // Only a tracking window follows the host's resolution; fixed-size and
    // monitor-pinned windows scale the content instead.
    snap.resize_behavior == ResizeBehavior::MatchHostResolution
        && snap.mode != DisplayMode::BorderlessFullscreen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ApiFamily, WindowSettings};

    fn snap_for(mode: DisplayMode, override_res: Option<(i32, i32)>) -> StateSnapshot {
        let state = DisplayState::new();
        let mut settings = WindowSettings {
            mode,
            ..WindowSettings::default()
        };
        if let Some((w, h)) = override_res {
            settings.override_width = w;
            settings.override_height = h;
        }
        state.early_init(&settings, ApiFamily::Auto);
        state.snapshot()
    }

    fn request(w: u32, h: u32) -> CreateParams {
        CreateParams {
            width: w,
            height: h,
            windowed: false,
            refresh_rate: 60,
            buffer_count: 1,
            flip_model: false,
        }
    }

    #[test]
    fn windowed_flag_follows_mode_not_host() {
        let snap = snap_for(DisplayMode::Borderless, None);
        let effective = override_create_params(&snap, request(1280, 720));
        assert!(effective.windowed);
        assert_eq!(effective.refresh_rate, 0);

        let snap = snap_for(DisplayMode::ExclusiveFullscreen, None);
        let effective = override_create_params(&snap, request(1280, 720));
        assert!(!effective.windowed);
        assert_eq!(effective.refresh_rate, 60);
    }

    #[test]
    fn override_resolution_wins_over_host_request() {
        let snap = snap_for(DisplayMode::Borderless, Some((2560, 1440)));
        let effective = override_create_params(&snap, request(1280, 720));
        assert_eq!((effective.width, effective.height), (2560, 1440));
    }

    #[test]
    fn flip_model_bumps_buffer_count() {
        let snap = snap_for(DisplayMode::Borderless, None);
        let mut req = request(1280, 720);
        req.flip_model = true;
        assert_eq!(override_create_params(&snap, req).buffer_count, 2);

        req.buffer_count = 3;
        assert_eq!(override_create_params(&snap, req).buffer_count, 3);
    }

    #[test]
    fn resize_target_swallowed_when_engine_owns_placement() {
        let snap = snap_for(DisplayMode::BorderlessFullscreen, None);
        assert_eq!(
            resize_target_action(&snap, 1024, 768),
            ResizeTargetAction::Swallow {
                width: 1024,
                height: 768
            }
        );
    }

    #[test]
    fn resize_target_adjusted_under_exclusive_override() {
        let snap = snap_for(DisplayMode::ExclusiveFullscreen, Some((2560, 1440)));
        assert_eq!(
            resize_target_action(&snap, 1024, 768),
            ResizeTargetAction::ForwardAdjusted {
                width: 2560,
                height: 1440
            }
        );

        let snap = snap_for(DisplayMode::ExclusiveFullscreen, None);
        assert_eq!(
            resize_target_action(&snap, 1024, 768),
            ResizeTargetAction::Forward
        );
    }

    #[test]
    fn notify_updates_resolution_and_requests_apply_once() {
        let state = DisplayState::new();
        state.early_init(&WindowSettings::default(), ApiFamily::Auto);

        assert!(notify_resolution_change(&state, 2560, 1440));
        assert_eq!(state.virtual_resolution(), (2560, 1440));

        // Same resolution again: no window change requested.
        assert!(!notify_resolution_change(&state, 2560, 1440));
    }

    #[test]
    fn notify_skips_degenerate_sizes() {
        let state = DisplayState::new();
        state.early_init(&WindowSettings::default(), ApiFamily::Auto);
        state.set_virtual_resolution(800, 600);
        assert!(!notify_resolution_change(&state, 0, 720));
        assert_eq!(state.virtual_resolution(), (800, 600));
    }

    #[test]
    fn auto_sized_creation_adopts_queried_backbuffer_not_request() {
        let state = DisplayState::new();
        state.early_init(&WindowSettings::default(), ApiFamily::Auto);

        // An auto-sized swap-chain request carries 0x0; reporting it
        // verbatim would leave the transforms dead until the first resize.
        assert!(!notify_resolution_change(&state, 0, 0));
        assert_eq!(state.virtual_resolution(), (0, 0));

        // The size queried from the created chain is the one adopted.
        assert!(notify_resolution_change(&state, 1536, 864));
        assert_eq!(state.virtual_resolution(), (1536, 864));
    }

    #[test]
    fn notify_does_not_resize_pinned_window() {
        let state = DisplayState::new();
        state.early_init(
            &WindowSettings {
                mode: DisplayMode::BorderlessFullscreen,
                ..WindowSettings::default()
            },
            ApiFamily::Auto,
        );
        assert!(!notify_resolution_change(&state, 1920, 1080));
        assert_eq!(state.virtual_resolution(), (1920, 1080));
    }
}
