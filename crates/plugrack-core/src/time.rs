//! Transport and time state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineTimeInfoBbt {
    pub bar: i32,
    pub beat: i32,
    pub tick: i32,
    pub bar_start_tick: f64,
    pub beats_per_bar: f32,
    pub beat_type: f32,
    pub ticks_per_beat: f64,
    pub beats_per_minute: f64,
}

impl Default for EngineTimeInfoBbt {
    fn default() -> Self {
        Self {
            bar: 1,
            beat: 1,
            tick: 0,
            bar_start_tick: 0.0,
            beats_per_bar: 4.0,
            beat_type: 4.0,
            ticks_per_beat: 960.0,
            beats_per_minute: 120.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineTimeInfo {
    pub playing: bool,
    pub frame: u64,
    pub usecs: u64,
    pub bbt: Option<EngineTimeInfoBbt>,
}

impl EngineTimeInfo {
    /// Advance by one processed block. BBT subfields follow the frame
    /// counter when present.
    pub fn advance(&mut self, frames: u32, sample_rate: f64) {
        if !self.playing {
            return;
        }
        self.frame += u64::from(frames);
        if sample_rate > 0.0 {
            self.usecs = (self.frame as f64 / sample_rate * 1_000_000.0) as u64;
        }
        if let Some(bbt) = &mut self.bbt {
            let beats =
                self.frame as f64 / sample_rate * bbt.beats_per_minute / 60.0;
            let beats_per_bar = f64::from(bbt.beats_per_bar.max(1.0));
            bbt.bar = (beats / beats_per_bar) as i32 + 1;
            bbt.beat = (beats % beats_per_bar) as i32 + 1;
            bbt.tick = ((beats % 1.0) * bbt.ticks_per_beat) as i32;
            bbt.bar_start_tick =
                f64::from(bbt.bar - 1) * beats_per_bar * bbt.ticks_per_beat;
        }
    }

    pub fn relocate(&mut self, frame: u64, sample_rate: f64) {
        self.frame = frame;
        if sample_rate > 0.0 {
            self.usecs = (frame as f64 / sample_rate * 1_000_000.0) as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_transport_does_not_advance() {
        let mut info = EngineTimeInfo::default();
        info.advance(512, 48000.0);
        assert_eq!(info.frame, 0);
    }

    #[test]
    fn playing_transport_advances_frames_and_bbt() {
        let mut info = EngineTimeInfo {
            playing: true,
            bbt: Some(EngineTimeInfoBbt::default()),
            ..Default::default()
        };
        // One second at 120 BPM = two beats.
        info.advance(48000, 48000.0);
        assert_eq!(info.frame, 48000);
        assert_eq!(info.usecs, 1_000_000);
        let bbt = info.bbt.unwrap();
        assert_eq!(bbt.bar, 1);
        assert_eq!(bbt.beat, 3);
    }

    #[test]
    fn relocate_moves_the_frame_counter() {
        let mut info = EngineTimeInfo::default();
        info.relocate(96000, 48000.0);
        assert_eq!(info.frame, 96000);
        assert_eq!(info.usecs, 2_000_000);
    }
}
