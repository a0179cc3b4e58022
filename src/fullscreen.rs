//! Exclusive-fullscreen emulation.
//!
//! Fixed-function devices cannot change resolution or windowed state without
//! a device reset, and an unsolicited reset would corrupt the host's own
//! bookkeeping. Instead the engine answers the host's device-status queries
//! as if the device had been lost, rides the host's *own* recovery path to
//! the `Reset` call, and applies the configured parameters inside that real
//! reset. The DXGI side has no reset protocol; drift is detected by a
//! per-frame tick that re-requests exclusive mode through a rate limiter.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::state::{DetectedFullscreen, DisplayMode, DisplayState};

/// D3D status codes shared by the two fixed-function generations.
pub mod hresult {
    pub const D3D_OK: i32 = 0;
    pub const D3DERR_DEVICELOST: i32 = 0x8876_0868_u32 as i32;
    pub const D3DERR_DEVICENOTRESET: i32 = 0x8876_0869_u32 as i32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FakeResetPhase {
    /// Nothing in flight; all calls pass through.
    Clear = 0,
    /// Status queries and presents answer "device lost".
    Initiate = 1,
    /// Status queries answer "lost, ready for reset"; waiting for the
    /// host's `Reset`.
    Respond = 2,
}

impl FakeResetPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => FakeResetPhase::Initiate,
            2 => FakeResetPhase::Respond,
            _ => FakeResetPhase::Clear,
        }
    }
}

/// Fake device-loss sequence: `Clear -> Initiate -> Respond -> Clear`.
///
/// Hosts are assumed to follow "lost -> query -> not-reset -> Reset". A host
/// that presents between queries is answered "device lost" again without
/// advancing the machine, so a non-conforming host converges over a longer
/// but still terminating sequence.
pub struct FakeReset {
    phase: AtomicU8,
}

impl FakeReset {
    pub const fn new() -> Self {
        FakeReset {
            phase: AtomicU8::new(FakeResetPhase::Clear as u8),
        }
    }

    pub fn phase(&self) -> FakeResetPhase {
        FakeResetPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn in_flight(&self) -> bool {
        self.phase() != FakeResetPhase::Clear
    }

    /// Starts a sequence; no-op (returning `false`) when one is in flight.
    pub fn arm(&self) -> bool {
        self.phase
            .compare_exchange(
                FakeResetPhase::Clear as u8,
                FakeResetPhase::Initiate as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Answer for a device-status query (`TestCooperativeLevel`), or `None`
    /// to forward the query to the real device.
    pub fn on_status_query(&self) -> Option<i32> {
        match self.phase() {
            FakeResetPhase::Clear => None,
            FakeResetPhase::Initiate => {
                self.phase
                    .store(FakeResetPhase::Respond as u8, Ordering::SeqCst);
                Some(hresult::D3DERR_DEVICELOST)
            }
            // One more host-driven retry cycle, matching real driver
            // behavior on an actual mode change.
            FakeResetPhase::Respond => Some(hresult::D3DERR_DEVICENOTRESET),
        }
    }

    /// Answer for a present call while a sequence is in flight, or `None`
    /// to let the present through.
    pub fn on_present(&self) -> Option<i32> {
        if self.in_flight() {
            Some(hresult::D3DERR_DEVICELOST)
        } else {
            None
        }
    }

    /// The host called `Reset`; the hook applies the configured parameters
    /// inside that call and the sequence completes.
    pub fn on_reset(&self) {
        self.phase
            .store(FakeResetPhase::Clear as u8, Ordering::SeqCst);
    }
}

impl Default for FakeReset {
    fn default() -> Self {
        FakeReset::new()
    }
}

/// Shared sequence for whichever fixed-function backend is active; only one
/// device family runs per process.
pub static FAKE_RESET: FakeReset = FakeReset::new();

/// Per-frame tick for the fixed-function backends: arms a fake device-loss
/// sequence when a settings change requires a real parameter re-apply.
pub fn tick_dx9_state(state: &DisplayState, fake: &FakeReset) {
    if fake.in_flight() {
        return;
    }
    if state.take_device_reset_needed() && fake.arm() {
        log::info!("device parameter change pending; initiating fake device loss");
    }
}

/// Steady-state interval between exclusive-mode restore attempts.
pub const RESTORE_INTERVAL: Duration = Duration::from_millis(750);

/// Rate limiter for exclusive-mode restoration. A focus-regain event opens
/// the gate immediately; otherwise attempts are spaced by
/// [`RESTORE_INTERVAL`] to avoid oscillating against a stubborn compositor.
#[derive(Debug, Default)]
pub struct RestoreGate {
    last_attempt: Option<Instant>,
}

impl RestoreGate {
    pub const fn new() -> Self {
        RestoreGate { last_attempt: None }
    }

    pub fn should_restore(&mut self, now: Instant, focus_regained: bool) -> bool {
        if focus_regained {
            self.last_attempt = Some(now);
            return true;
        }
        match self.last_attempt {
            Some(last) if now.duration_since(last) < RESTORE_INTERVAL => false,
            _ => {
                self.last_attempt = Some(now);
                true
            }
        }
    }
}

/// Per-frame decision for the DXGI tick: whether to re-request exclusive
/// mode right now. Consumes the focus-regain event only when the window is
/// focused, so the 0 ms gate is not wasted on a background frame.
pub fn dxgi_restore_due(
    state: &DisplayState,
    gate: &mut RestoreGate,
    now: Instant,
    focused: bool,
) -> bool {
    let snap = state.snapshot();
    if snap.mode != DisplayMode::ExclusiveFullscreen {
        return false;
    }
    if snap.detected != DetectedFullscreen::NotExclusive {
        return false;
    }
    if !focused {
        return false;
    }
    gate.should_restore(now, state.take_focus_regained())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ApiFamily, WindowSettings};

    /// Host stub modelling the usual recovery loop: query the device each
    /// frame, call `Reset` once the driver reports reset-ready.
    struct HostStub<'a> {
        fake: &'a FakeReset,
        resets: u32,
    }

    impl HostStub<'_> {
        fn run_frame(&mut self) -> i32 {
            match self.fake.on_status_query() {
                Some(hresult::D3DERR_DEVICELOST) => hresult::D3DERR_DEVICELOST,
                Some(hresult::D3DERR_DEVICENOTRESET) => {
                    self.fake.on_reset();
                    self.resets += 1;
                    hresult::D3D_OK
                }
                _ => hresult::D3D_OK,
            }
        }
    }

    #[test]
    fn fake_reset_terminates_within_two_host_cycles() {
        let fake = FakeReset::new();
        assert!(fake.arm());
        let mut host = HostStub {
            fake: &fake,
            resets: 0,
        };

        let mut cycles = 0;
        while fake.in_flight() {
            host.run_frame();
            cycles += 1;
            assert!(cycles <= 2, "machine did not settle in two cycles");
        }
        assert_eq!(host.resets, 1);
        assert_eq!(fake.phase(), FakeResetPhase::Clear);
    }

    #[test]
    fn presents_are_refused_while_in_flight() {
        let fake = FakeReset::new();
        assert!(fake.on_present().is_none());

        fake.arm();
        assert_eq!(fake.on_present(), Some(hresult::D3DERR_DEVICELOST));

        // A present between the two queries answers lost again without
        // advancing the machine.
        assert_eq!(fake.on_status_query(), Some(hresult::D3DERR_DEVICELOST));
        assert_eq!(fake.on_present(), Some(hresult::D3DERR_DEVICELOST));
        assert_eq!(fake.phase(), FakeResetPhase::Respond);

        fake.on_reset();
        assert!(fake.on_present().is_none());
    }

    #[test]
    fn arm_is_rejected_while_in_flight() {
        let fake = FakeReset::new();
        assert!(fake.arm());
        assert!(!fake.arm());
        fake.on_reset();
        assert!(fake.arm());
    }

    #[test]
    fn tick_arms_only_on_pending_device_change() {
        let state = DisplayState::new();
        state.early_init(&WindowSettings::default(), ApiFamily::Dx9);
        let fake = FakeReset::new();

        tick_dx9_state(&state, &fake);
        assert!(!fake.in_flight());

        state.set_settings(&WindowSettings {
            mode: DisplayMode::ExclusiveFullscreen,
            ..WindowSettings::default()
        });
        tick_dx9_state(&state, &fake);
        assert!(fake.in_flight());

        // The pending flag was consumed; a second tick does not re-arm
        // after the sequence completes.
        fake.on_status_query();
        fake.on_status_query();
        fake.on_reset();
        tick_dx9_state(&state, &fake);
        assert!(!fake.in_flight());
    }

    #[test]
    fn restore_gate_rate_limits_absent_focus_event() {
        let mut gate = RestoreGate::new();
        let t0 = Instant::now();
        assert!(gate.should_restore(t0, false));
        assert!(!gate.should_restore(t0 + Duration::from_millis(100), false));
        assert!(!gate.should_restore(t0 + Duration::from_millis(749), false));
        assert!(gate.should_restore(t0 + Duration::from_millis(750), false));
    }

    #[test]
    fn focus_regain_opens_gate_immediately() {
        let mut gate = RestoreGate::new();
        let t0 = Instant::now();
        assert!(gate.should_restore(t0, false));
        // 0 ms gate on an explicit focus-regain event.
        assert!(gate.should_restore(t0, true));
        // And the attempt still counts against the steady-state interval.
        assert!(!gate.should_restore(t0 + Duration::from_millis(10), false));
    }

    #[test]
    fn restore_only_when_exclusive_configured_but_not_active() {
        let state = DisplayState::new();
        state.early_init(
            &WindowSettings {
                mode: DisplayMode::ExclusiveFullscreen,
                ..WindowSettings::default()
            },
            ApiFamily::Dxgi,
        );
        let mut gate = RestoreGate::new();
        let now = Instant::now();

        // Detected state unknown: no restore yet.
        assert!(!dxgi_restore_due(&state, &mut gate, now, true));

        state.set_detected_fullscreen(DetectedFullscreen::NotExclusive);
        assert!(!dxgi_restore_due(&state, &mut gate, now, false));
        assert!(dxgi_restore_due(&state, &mut gate, now, true));

        state.set_detected_fullscreen(DetectedFullscreen::Exclusive);
        assert!(!dxgi_restore_due(
            &state,
            &mut gate,
            now + RESTORE_INTERVAL,
            true
        ));
    }

    #[test]
    fn at_most_one_restore_per_interval_without_focus_event() {
        let state = DisplayState::new();
        state.early_init(
            &WindowSettings {
                mode: DisplayMode::ExclusiveFullscreen,
                ..WindowSettings::default()
            },
            ApiFamily::Dxgi,
        );
        state.set_detected_fullscreen(DetectedFullscreen::NotExclusive);
        let mut gate = RestoreGate::new();
        let t0 = Instant::now();

        let mut granted = 0;
        for frame in 0..45 {
            // ~16 ms frames over ~720 ms.
            let now = t0 + Duration::from_millis(frame * 16);
            if dxgi_restore_due(&state, &mut gate, now, true) {
                granted += 1;
            }
        }
        assert_eq!(granted, 1);

        // An explicit focus regain bypasses the interval.
        state.set_focus_regained();
        assert!(dxgi_restore_due(
            &state,
            &mut gate,
            t0 + Duration::from_millis(730),
            true
        ));
    }
}
