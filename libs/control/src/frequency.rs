//! Encoder ticks to a clamped LED frequency.

use crate::device::EncoderSource;

/// Quadrature edges per mechanical detent.
pub const TICKS_PER_DETENT: i32 = 4;
/// Frequency selected with the knob at its power-on position.
pub const BASE_OFFSET_HZ: i32 = 10;
pub const MIN_HZ: u32 = 0;
pub const MAX_HZ: u32 = 500;

/// Count that re-derives to exactly `MIN_HZ`.
pub const FLOOR_ANCHOR_TICKS: i32 = (MIN_HZ as i32 - BASE_OFFSET_HZ) * TICKS_PER_DETENT;
/// Count that re-derives to exactly `MAX_HZ`.
pub const CEILING_ANCHOR_TICKS: i32 = (MAX_HZ as i32 - BASE_OFFSET_HZ) * TICKS_PER_DETENT;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClampEdge {
    /// Knob turned below 0 Hz.
    Floor,
    /// Knob turned to or past 500 Hz.
    Ceiling,
}

impl ClampEdge {
    pub const fn anchor_ticks(self) -> i32 {
        match self {
            ClampEdge::Floor => FLOOR_ANCHOR_TICKS,
            ClampEdge::Ceiling => CEILING_ANCHOR_TICKS,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Derivation {
    pub target_hz: u32,
    /// Set when the raw request fell outside `[MIN_HZ, MAX_HZ)` and the
    /// count must be moved to the edge's anchor.
    pub clamp: Option<ClampEdge>,
}

/// Pure mapping from a raw tick count to the target frequency.
///
/// Detents truncate toward zero, so partial detents never change the rate.
pub fn derive_target(ticks: i32) -> Derivation {
    let detents = ticks / TICKS_PER_DETENT;
    let raw = BASE_OFFSET_HZ.saturating_add(detents);

    if raw < MIN_HZ as i32 {
        Derivation {
            target_hz: MIN_HZ,
            clamp: Some(ClampEdge::Floor),
        }
    } else if raw >= MAX_HZ as i32 {
        Derivation {
            target_hz: MAX_HZ,
            clamp: Some(ClampEdge::Ceiling),
        }
    } else {
        Derivation {
            target_hz: raw as u32,
            clamp: None,
        }
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrequencyUpdate {
    pub target_hz: u32,
    pub clamped: Option<ClampEdge>,
    /// The blink driver must drop to Soft/off before anything else this cycle.
    pub force_soft_off: bool,
}

/// Reads the encoder and pins it to the clamp anchors when it runs past them.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrequencyController {
    last_target_hz: Option<u32>,
}

impl FrequencyController {
    pub const fn new() -> Self {
        Self {
            last_target_hz: None,
        }
    }

    pub const fn last_target_hz(&self) -> Option<u32> {
        self.last_target_hz
    }

    pub fn update<E: EncoderSource>(&mut self, encoder: &E) -> FrequencyUpdate {
        loop {
            let ticks = encoder.count();
            let derived = derive_target(ticks);
            // Already sitting on the anchor: nothing to rewrite.
            let clamped = derived.clamp.filter(|edge| edge.anchor_ticks() != ticks);

            if let Some(edge) = clamped {
                // A tick from the encoder thread between the read and the
                // rewrite makes the swap fail; derive again from the new value.
                if !encoder.compare_and_reset(ticks, edge.anchor_ticks()) {
                    continue;
                }
            }

            self.last_target_hz = Some(derived.target_hz);
            return FrequencyUpdate {
                target_hz: derived.target_hz,
                clamped,
                force_soft_off: clamped == Some(ClampEdge::Floor),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RotationCount;
    use core::cell::Cell;

    #[test]
    fn knob_at_rest_selects_base_offset() {
        let count = RotationCount::new(0);
        let mut ctl = FrequencyController::new();
        let update = ctl.update(&count);
        assert_eq!(update.target_hz, 10);
        assert_eq!(update.clamped, None);
        assert!(!update.force_soft_off);
        assert_eq!(count.count(), 0);
    }

    #[test]
    fn below_zero_pins_count_to_floor_anchor() {
        let count = RotationCount::new(-44);
        let mut ctl = FrequencyController::new();
        let update = ctl.update(&count);
        assert_eq!(update.target_hz, 0);
        assert_eq!(update.clamped, Some(ClampEdge::Floor));
        assert!(update.force_soft_off);
        assert_eq!(count.count(), -40);
    }

    #[test]
    fn partial_detent_below_zero_is_not_clamped() {
        // -41 / 4 truncates to -10, which is exactly 0 Hz.
        let d = derive_target(-41);
        assert_eq!(d.target_hz, 0);
        assert_eq!(d.clamp, None);
    }

    #[test]
    fn ceiling_discards_residue() {
        let count = RotationCount::new(CEILING_ANCHOR_TICKS + 3);
        let mut ctl = FrequencyController::new();
        let update = ctl.update(&count);
        assert_eq!(update.target_hz, 500);
        assert_eq!(update.clamped, Some(ClampEdge::Ceiling));
        assert!(!update.force_soft_off);
        assert_eq!(count.count(), 1960);
    }

    #[test]
    fn resting_on_ceiling_anchor_reports_no_clamp() {
        let count = RotationCount::new(2_000);
        let mut ctl = FrequencyController::new();
        assert_eq!(ctl.update(&count).clamped, Some(ClampEdge::Ceiling));
        for _ in 0..3 {
            let update = ctl.update(&count);
            assert_eq!(update.target_hz, 500);
            assert_eq!(update.clamped, None);
            assert!(!update.force_soft_off);
            assert_eq!(count.count(), CEILING_ANCHOR_TICKS);
        }
    }

    #[test]
    fn target_stays_in_range_and_clamp_is_idempotent() {
        let probe = |t: i32| {
            let count = RotationCount::new(t);
            let mut ctl = FrequencyController::new();
            let first = ctl.update(&count);
            assert!(first.target_hz <= MAX_HZ, "ticks={t}");

            let settled = count.count();
            let again = derive_target(settled);
            assert_eq!(again.target_hz, first.target_hz, "ticks={t}");
            if let Some(edge) = again.clamp {
                // Only the ceiling anchor itself re-clamps, and onto itself.
                assert_eq!(edge, ClampEdge::Ceiling, "ticks={t}");
                assert_eq!(edge.anchor_ticks(), settled, "ticks={t}");
            }
        };

        for t in -3_000..3_000 {
            probe(t);
        }
        let stride = 7_919_000;
        let mut ticks = i32::MIN;
        while ticks <= i32::MAX - stride {
            probe(ticks);
            ticks += stride;
        }
        probe(i32::MAX);
    }

    /// Encoder whose first compare-and-reset loses a race against one tick.
    struct RacingEncoder {
        ticks: Cell<i32>,
        raced: Cell<bool>,
    }

    impl EncoderSource for RacingEncoder {
        fn count(&self) -> i32 {
            self.ticks.get()
        }

        fn reset_count(&self, value: i32) {
            self.ticks.set(value);
        }

        fn compare_and_reset(&self, expected: i32, new: i32) -> bool {
            if !self.raced.get() {
                self.raced.set(true);
                self.ticks.set(self.ticks.get() - 1);
                return false;
            }
            if self.ticks.get() != expected {
                return false;
            }
            self.ticks.set(new);
            true
        }
    }

    #[test]
    fn clamp_retries_when_encoder_ticks_concurrently() {
        let enc = RacingEncoder {
            ticks: Cell::new(-48),
            raced: Cell::new(false),
        };
        let mut ctl = FrequencyController::new();
        let update = ctl.update(&enc);
        assert_eq!(update.target_hz, 0);
        assert_eq!(enc.count(), FLOOR_ANCHOR_TICKS);
        assert_eq!(derive_target(enc.count()).clamp, None);
    }
}
