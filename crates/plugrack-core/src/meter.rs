//! Per-plugin peak meters, written by the RT path and read by the idle pump.

use crate::lockfree::AtomicFloat;

#[derive(Debug, Default)]
pub struct PeakMeter {
    pub in_left: AtomicFloat,
    pub in_right: AtomicFloat,
    pub out_left: AtomicFloat,
    pub out_right: AtomicFloat,
}

fn block_peak(samples: &[f32]) -> f32 {
    let mut peak = 0.0f32;
    for &s in samples {
        let abs = s.abs();
        if abs > peak {
            peak = abs;
        }
    }
    peak
}

impl PeakMeter {
    /// Store the absolute peak of each input channel pair slot.
    pub fn update_inputs(&self, channels: &[&[f32]]) {
        self.in_left
            .set(channels.first().map(|c| block_peak(c)).unwrap_or(0.0));
        self.in_right
            .set(channels.get(1).map(|c| block_peak(c)).unwrap_or(0.0));
    }

    pub fn update_outputs(&self, left: &[f32], right: Option<&[f32]>) {
        self.out_left.set(block_peak(left));
        self.out_right.set(right.map(block_peak).unwrap_or(0.0));
    }

    pub fn clear(&self) {
        self.in_left.set(0.0);
        self.in_right.set(0.0);
        self.out_left.set(0.0);
        self.out_right.set(0.0);
    }

    /// `(in_l, in_r, out_l, out_r)` for the UI peaks frame.
    pub fn snapshot(&self) -> (f32, f32, f32, f32) {
        (
            self.in_left.get(),
            self.in_right.get(),
            self.out_left.get(),
            self.out_right.get(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_tracks_absolute_maximum() {
        let meter = PeakMeter::default();
        let left = [0.1f32, -0.8, 0.3];
        let right = [0.0f32, 0.2, -0.1];
        meter.update_inputs(&[&left, &right]);
        let (il, ir, _, _) = meter.snapshot();
        assert_eq!(il, 0.8);
        assert_eq!(ir, 0.2);
    }

    #[test]
    fn missing_channels_read_zero() {
        let meter = PeakMeter::default();
        let mono = [0.5f32];
        meter.update_outputs(&mono, None);
        let (_, _, ol, or) = meter.snapshot();
        assert_eq!(ol, 0.5);
        assert_eq!(or, 0.0);
    }
}
