//! Parameter model: data, ranges, and value coercion.

use serde::{Deserialize, Serialize};

/// Parameter hint bits.
pub mod hints {
    pub const BOOLEAN: u32 = 1 << 0;
    pub const INTEGER: u32 = 1 << 1;
    pub const LOGARITHMIC: u32 = 1 << 2;
    pub const AUTOMABLE: u32 = 1 << 3;
    pub const USES_SAMPLERATE: u32 = 1 << 4;
    pub const USES_SCALEPOINTS: u32 = 1 << 5;
    pub const ENABLED: u32 = 1 << 6;
}

/// Internal pseudo-parameter indices, addressable wherever a parameter index
/// is accepted. Negative on purpose; real parameters count up from zero.
/// This layout is part of the UI pipe protocol (`PARAMVAL_<id>:<idx>`
/// frames carry these indices for the built-in controls).
pub const PARAMETER_ACTIVE: i32 = -1;
pub const PARAMETER_DRYWET: i32 = -2;
pub const PARAMETER_VOLUME: i32 = -3;
pub const PARAMETER_BALANCE_LEFT: i32 = -4;
pub const PARAMETER_BALANCE_RIGHT: i32 = -5;
pub const PARAMETER_PANNING: i32 = -6;
pub const PARAMETER_CTRL_CHANNEL: i32 = -7;
pub const PARAMETER_MAX: i32 = -8;

/// MIDI CC used for the built-in dry/wet control (breath).
pub const MIDI_CC_DRYWET: u8 = 0x02;
/// MIDI CC used for the built-in volume control.
pub const MIDI_CC_VOLUME: u8 = 0x07;
/// MIDI CCs used for the built-in balance control.
pub const MIDI_CC_BALANCE: u8 = 0x08;
pub const MIDI_CC_PAN: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParameterKind {
    #[default]
    Input,
    Output,
    Special,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterData {
    pub kind: ParameterKind,
    pub hints: u32,
    /// Dense index into the plugin's parameter table.
    pub index: i32,
    /// Stable index into the backing plugin's own parameter space.
    pub rindex: i32,
    /// MIDI channel bound to this parameter, 0..15.
    pub midi_channel: u8,
    /// Bound MIDI CC, or -1 for none. Valid CCs are 0..119.
    pub midi_cc: i16,
}

impl ParameterData {
    pub fn is_enabled(&self) -> bool {
        self.hints & hints::ENABLED != 0
    }

    pub fn is_boolean(&self) -> bool {
        self.hints & hints::BOOLEAN != 0
    }

    pub fn is_integer(&self) -> bool {
        self.hints & hints::INTEGER != 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ParameterRanges {
    pub def: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub step_small: f32,
    pub step_large: f32,
}

impl Default for ParameterRanges {
    fn default() -> Self {
        Self {
            def: 0.0,
            min: 0.0,
            max: 1.0,
            step: 0.01,
            step_small: 0.0001,
            step_large: 0.1,
        }
    }
}

impl ParameterRanges {
    /// Coerce `value` into this range under the parameter's hints.
    ///
    /// Boolean parameters snap to min or max around the midpoint (the max
    /// side wins at exactly the midpoint). Integer parameters round before
    /// clamping. Everything else clamps.
    pub fn fixed_value(&self, hints: u32, value: f32) -> f32 {
        if hints & hints::BOOLEAN != 0 {
            let mid = (self.min + self.max) / 2.0;
            return if value >= mid { self.max } else { self.min };
        }
        let value = if hints & hints::INTEGER != 0 {
            value.round()
        } else {
            value
        };
        value.clamp(self.min, self.max)
    }

    pub fn fixed_default(&self, hints: u32) -> f32 {
        self.fixed_value(hints, self.def)
    }

    /// Map a value in `[min, max]` to `[0, 1]`.
    pub fn normalized(&self, value: f32) -> f32 {
        if self.max <= self.min {
            return 0.0;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    /// Map a value in `[0, 1]` back to `[min, max]`.
    pub fn unnormalized(&self, value: f32) -> f32 {
        self.min + value.clamp(0.0, 1.0) * (self.max - self.min)
    }
}

/// Derive the per-channel balance pair from a single control value.
///
/// `v < 0` pans left: right channel fades down. `v > 0` pans right: left
/// channel fades down. Zero is the neutral `(-1, +1)` pair.
pub fn balance_pair(value: f32) -> (f32, f32) {
    if value < 0.0 {
        (-1.0, 2.0 * value + 1.0)
    } else if value > 0.0 {
        (2.0 * value - 1.0, 1.0)
    } else {
        (-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn unit_ranges() -> ParameterRanges {
        ParameterRanges {
            def: 0.0,
            min: 0.0,
            max: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn boolean_snaps_around_midpoint() {
        let r = unit_ranges();
        assert_eq!(r.fixed_value(hints::BOOLEAN, 0.49), 0.0);
        assert_eq!(r.fixed_value(hints::BOOLEAN, 0.5), 1.0);
        assert_eq!(r.fixed_value(hints::BOOLEAN, -4.0), 0.0);
        assert_eq!(r.fixed_value(hints::BOOLEAN, 4.0), 1.0);
    }

    #[test]
    fn integer_rounds_then_clamps() {
        let r = ParameterRanges {
            def: 0.0,
            min: -3.0,
            max: 3.0,
            ..Default::default()
        };
        assert_eq!(r.fixed_value(hints::INTEGER, 1.4), 1.0);
        assert_eq!(r.fixed_value(hints::INTEGER, 1.6), 2.0);
        assert_eq!(r.fixed_value(hints::INTEGER, 9.6), 3.0);
        assert_eq!(r.fixed_value(hints::INTEGER, -9.6), -3.0);
    }

    #[test]
    fn balance_split_law() {
        assert_eq!(balance_pair(0.0), (-1.0, 1.0));
        assert_eq!(balance_pair(-1.0), (-1.0, -1.0));
        assert_eq!(balance_pair(1.0), (1.0, 1.0));
        assert_eq!(balance_pair(-0.5), (-1.0, 0.0));
        assert_eq!(balance_pair(0.5), (0.0, 1.0));
    }

    #[test]
    fn pseudo_parameter_layout() {
        // The public layout contract: all negative, densely packed, with
        // volume at -3 as the UI protocol expects.
        let indices = [
            PARAMETER_ACTIVE,
            PARAMETER_DRYWET,
            PARAMETER_VOLUME,
            PARAMETER_BALANCE_LEFT,
            PARAMETER_BALANCE_RIGHT,
            PARAMETER_PANNING,
            PARAMETER_CTRL_CHANNEL,
        ];
        for (i, idx) in indices.iter().enumerate() {
            assert_eq!(*idx, -(i as i32) - 1);
        }
        assert_eq!(PARAMETER_VOLUME, -3);
        assert_eq!(PARAMETER_MAX, -8);
    }

    proptest! {
        #[test]
        fn coercion_is_idempotent(
            hints in prop::sample::select(vec![0u32, hints::BOOLEAN, hints::INTEGER]),
            min in -100.0f32..0.0,
            span in 0.001f32..200.0,
            value in -500.0f32..500.0,
        ) {
            let r = ParameterRanges { def: min, min, max: min + span, ..Default::default() };
            let once = r.fixed_value(hints, value);
            let twice = r.fixed_value(hints, once);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn boolean_result_is_always_an_endpoint(
            min in -10.0f32..10.0,
            span in 0.001f32..20.0,
            value in -50.0f32..50.0,
        ) {
            let r = ParameterRanges { def: min, min, max: min + span, ..Default::default() };
            let fixed = r.fixed_value(hints::BOOLEAN, value);
            prop_assert!(fixed == r.min || fixed == r.max);
            let mid = (r.min + r.max) / 2.0;
            prop_assert_eq!(fixed == r.max, value >= mid);
        }

        #[test]
        fn balance_endpoints_match_law(v in -1.0f32..=1.0) {
            let (l, r) = balance_pair(v);
            if v < 0.0 {
                prop_assert_eq!(l, -1.0);
                prop_assert_eq!(r, 2.0 * v + 1.0);
            } else if v > 0.0 {
                prop_assert_eq!(l, 2.0 * v - 1.0);
                prop_assert_eq!(r, 1.0);
            } else {
                prop_assert_eq!((l, r), (-1.0, 1.0));
            }
        }
    }
}
