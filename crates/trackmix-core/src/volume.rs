//! Volume ramps in two numeric domains
//!
//! Every gain is tracked both as fixed point (U4.12 target, U4.28 running value
//! and increment) and as float. Kernels fed by 16-bit input read the integer
//! domain; float kernels read the float domain. Whichever domain a kernel used,
//! [`VolumeState::adjust_volume_ramp`] resynchronizes the other one, so a later
//! switch of mixer format never observes a stale ramp.
//!
//! ## Target sanitizing
//!
//! | Requested value     | Applied value |
//! |---------------------|---------------|
//! | negative            | 0             |
//! | NaN, subnormal      | 0             |
//! | +infinity           | unity         |
//! | normal above unity  | unity         |

use crate::types::{MAX_NUM_VOLUMES, UNITY_GAIN_FLOAT, UNITY_GAIN_INT};

/// Convert a non-negative float gain to U4.28
#[inline]
pub fn u4_28_from_float(f: f32) -> u32 {
    const SCALE: f32 = (1u32 << 28) as f32;
    const LIMIT: f32 = u32::MAX as f32 / SCALE;
    if f <= 0.0 {
        0
    } else if f >= LIMIT {
        u32::MAX
    } else {
        (f * SCALE + 0.5) as u32
    }
}

/// Convert a U4.28 gain to float
#[inline]
pub fn float_from_u4_28(v: u32) -> f32 {
    v as f32 * (1.0 / (1u32 << 28) as f32)
}

/// A single gain with its ramp state, in both domains
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RampedGain {
    /// Target gain, U4.12
    pub target: i16,
    /// Gain applied to the last processed frame, U4.28
    pub prev: i32,
    /// Per-frame increment, U4.28 (0 when not ramping)
    pub inc: i32,
    /// Target gain, float
    pub target_f: f32,
    /// Gain applied to the last processed frame, float
    pub prev_f: f32,
    /// Per-frame increment, float
    pub inc_f: f32,
}

impl RampedGain {
    /// Unity gain, not ramping
    pub fn unity() -> Self {
        Self {
            target: UNITY_GAIN_INT as i16,
            prev: UNITY_GAIN_INT << 16,
            inc: 0,
            target_f: UNITY_GAIN_FLOAT,
            prev_f: UNITY_GAIN_FLOAT,
            inc_f: 0.0,
        }
    }

    /// Zero gain, not ramping
    pub fn silent() -> Self {
        Self {
            target: 0,
            prev: 0,
            inc: 0,
            target_f: 0.0,
            prev_f: 0.0,
            inc_f: 0.0,
        }
    }

    /// Whether an integer-domain ramp is in flight
    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.inc != 0
    }

    /// Request a new target gain, ramped over `ramp` frames (0 = immediate)
    ///
    /// Returns false when `volume` equals the current float target, in which
    /// case nothing is touched. A ramp too small to represent in either domain
    /// degrades to an immediate set.
    pub fn set_target(&mut self, volume: f32, ramp: usize) -> bool {
        if volume == self.target_f {
            return false;
        }
        let volume = sanitize_gain(volume);
        let mut ramp = ramp;

        if ramp != 0 {
            if self.prev_f != self.target_f {
                log::debug!(
                    "set_target: previous float ramp unfinished, prev {} target {}",
                    self.prev_f,
                    self.target_f
                );
            }
            let inc = (volume - self.prev_f) / ramp as f32;
            let maxv = volume.max(self.prev_f);
            if inc.is_normal() && maxv + inc != maxv {
                self.inc_f = inc;
            } else {
                ramp = 0;
            }
        }

        // Integer volume never exceeds unity so U4.28 cannot wrap
        let scaled = volume * UNITY_GAIN_INT as f32;
        let int_volume = if scaled >= UNITY_GAIN_INT as f32 {
            UNITY_GAIN_INT
        } else {
            scaled as i32
        };

        if ramp != 0 {
            let inc = ((int_volume << 16) - self.prev) / ramp as i32;
            if inc != 0 {
                self.inc = inc;
            } else {
                ramp = 0;
            }
        }

        if ramp == 0 {
            self.inc_f = 0.0;
            self.prev_f = volume;
            self.inc = 0;
            self.prev = int_volume << 16;
        }
        self.target_f = volume;
        self.target = int_volume as i16;
        true
    }

    /// Finish the ramp: running value = target, no increment, in both domains
    fn snap(&mut self) {
        self.inc = 0;
        self.prev = (self.target as i32) << 16;
        self.inc_f = 0.0;
        self.prev_f = self.target_f;
    }

    /// Integer-domain completion test
    fn int_step_reaches_target(&self) -> bool {
        let next = self.prev.wrapping_add(self.inc) >> 16;
        (self.inc > 0 && next >= self.target as i32) || (self.inc < 0 && next <= self.target as i32)
    }

    /// Float-domain completion test
    fn float_step_reaches_target(&self) -> bool {
        let next = self.prev_f + self.inc_f;
        (self.inc_f > 0.0 && next >= self.target_f) || (self.inc_f < 0.0 && next <= self.target_f)
    }
}

/// Clamp a requested gain into [0, unity], mapping non-finite values safely
fn sanitize_gain(volume: f32) -> f32 {
    if volume < 0.0 {
        return 0.0;
    }
    if volume.is_nan() || volume.is_subnormal() {
        0.0
    } else if volume.is_infinite() {
        UNITY_GAIN_FLOAT
    } else {
        volume.min(UNITY_GAIN_FLOAT)
    }
}

/// Main stereo gain pair plus the aux send level of one track
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeState {
    pub main: [RampedGain; MAX_NUM_VOLUMES],
    pub aux: RampedGain,
}

impl Default for VolumeState {
    fn default() -> Self {
        Self {
            main: [RampedGain::unity(); MAX_NUM_VOLUMES],
            aux: RampedGain::silent(),
        }
    }
}

impl VolumeState {
    /// Unity main gain, no aux send
    pub fn new() -> Self {
        Self::default()
    }

    /// Any main channel ramping
    #[inline]
    pub fn main_ramping(&self) -> bool {
        self.main.iter().any(RampedGain::is_ramping)
    }

    /// Any main channel or the aux level ramping
    #[inline]
    pub fn needs_ramp(&self) -> bool {
        self.main_ramping() || self.aux.is_ramping()
    }

    /// Both integer main targets are zero
    #[inline]
    pub fn is_silent_target(&self) -> bool {
        self.main.iter().all(|g| g.target == 0)
    }

    /// Integer main targets, used by steady-gain kernels
    #[inline]
    pub fn int_gains(&self) -> [i16; MAX_NUM_VOLUMES] {
        [self.main[0].target, self.main[1].target]
    }

    /// Float main targets, used by steady-gain kernels
    #[inline]
    pub fn float_gains(&self) -> [f32; MAX_NUM_VOLUMES] {
        [self.main[0].target_f, self.main[1].target_f]
    }

    /// Complete ramps whose next step would reach the target
    ///
    /// `use_float` names the domain the kernel advanced; the other domain is
    /// resynchronized from it. The aux level always ramps in the integer domain.
    pub fn adjust_volume_ramp(&mut self, aux: bool, use_float: bool) {
        for gain in self.main.iter_mut() {
            if use_float {
                if gain.float_step_reaches_target() {
                    gain.snap();
                } else {
                    gain.prev = u4_28_from_float(gain.prev_f) as i32;
                }
            } else if gain.int_step_reaches_target() {
                gain.snap();
            } else {
                gain.prev_f = float_from_u4_28(gain.prev as u32);
            }
        }
        if aux && self.aux.int_step_reaches_target() {
            self.aux.snap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let v = VolumeState::new();
        assert_eq!(v.main[0].target, 0x1000);
        assert_eq!(v.main[0].prev, 0x1000 << 16);
        assert_eq!(v.aux, RampedGain::silent());
        assert!(!v.needs_ramp());
        assert!(!v.is_silent_target());
    }

    #[test]
    fn test_identical_target_is_noop() {
        let mut g = RampedGain::unity();
        g.set_target(0.5, 64);
        let before = g;
        assert!(!g.set_target(0.5, 64));
        assert_eq!(g, before);
    }

    #[test]
    fn test_immediate_set() {
        let mut g = RampedGain::unity();
        assert!(g.set_target(0.5, 0));
        assert_eq!(g.target, 0x800);
        assert_eq!(g.prev, 0x800 << 16);
        assert_eq!(g.inc, 0);
        assert_eq!(g.prev_f, 0.5);
        assert_eq!(g.inc_f, 0.0);
    }

    #[test]
    fn test_ramp_sets_both_increments() {
        let mut g = RampedGain::silent();
        assert!(g.set_target(1.0, 4));
        assert_eq!(g.target, 0x1000);
        assert_eq!(g.inc, (0x1000 << 16) / 4);
        assert!((g.inc_f - 0.25).abs() < 1e-6);
        assert_eq!(g.prev, 0);
        assert_eq!(g.prev_f, 0.0);
    }

    #[test]
    fn test_sanitizing() {
        let mut g = RampedGain::unity();
        g.set_target(-0.5, 0);
        assert_eq!(g.target_f, 0.0);

        let mut g = RampedGain::unity();
        g.set_target(f32::NAN, 0);
        assert_eq!(g.target_f, 0.0);
        assert_eq!(g.target, 0);

        let mut g = RampedGain::silent();
        g.set_target(f32::INFINITY, 0);
        assert_eq!(g.target_f, 1.0);
        assert_eq!(g.target, 0x1000);

        let mut g = RampedGain::unity();
        g.set_target(f32::MIN_POSITIVE / 2.0, 0);
        assert_eq!(g.target_f, 0.0);

        let mut g = RampedGain::silent();
        g.set_target(3.0, 0);
        assert_eq!(g.target_f, 1.0);
        assert_eq!(g.target, 0x1000);
    }

    #[test]
    fn test_unrepresentable_ramp_is_immediate() {
        // 1e-6 over 1M frames cannot make progress in U4.28
        let mut g = RampedGain::silent();
        assert!(g.set_target(1e-6, 1_000_000));
        assert_eq!(g.inc, 0);
        assert_eq!(g.inc_f, 0.0);
        assert_eq!(g.prev_f, 1e-6);
    }

    #[test]
    fn test_adjust_snaps_when_crossing() {
        let mut v = VolumeState::new();
        v.main[0].set_target(0.0, 4);
        v.main[1].set_target(0.0, 4);
        // Simulate a kernel advancing 4 frames in float
        for g in v.main.iter_mut() {
            g.prev_f += 4.0 * g.inc_f;
        }
        v.adjust_volume_ramp(false, true);
        for g in v.main.iter() {
            assert_eq!(g.inc, 0);
            assert_eq!(g.inc_f, 0.0);
            assert_eq!(g.prev, 0);
            assert_eq!(g.prev_f, 0.0);
        }
        assert!(v.is_silent_target());
        assert!(!v.needs_ramp());
    }

    #[test]
    fn test_adjust_midway_syncs_shadow_domain() {
        let mut v = VolumeState::new();
        v.main[0].set_target(0.0, 8);
        v.main[0].prev += 2 * v.main[0].inc;
        v.adjust_volume_ramp(false, false);
        assert!(v.main[0].is_ramping());
        assert!((v.main[0].prev_f - 0.75).abs() < 1e-4);
    }

    #[test]
    fn test_aux_ramp_is_integer_only() {
        let mut v = VolumeState::new();
        v.aux.set_target(1.0, 2);
        v.aux.prev += 2 * v.aux.inc;
        v.adjust_volume_ramp(true, true);
        assert_eq!(v.aux.inc, 0);
        assert_eq!(v.aux.prev, 0x1000 << 16);
        assert_eq!(v.aux.prev_f, 1.0);
    }

    #[test]
    fn test_u4_28_conversions() {
        assert_eq!(u4_28_from_float(1.0), 1 << 28);
        assert_eq!(u4_28_from_float(-1.0), 0);
        assert_eq!(u4_28_from_float(100.0), u32::MAX);
        assert!((float_from_u4_28(1 << 27) - 0.5).abs() < 1e-7);
    }
}
