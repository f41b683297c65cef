use rodio::Source;
use std::f32::consts::PI;
use std::time::Duration;

const FREQUENCY_HZ: f32 = 800.0;
const START_GAIN: f32 = 0.3;
const END_GAIN: f32 = 0.01;

/// One-second 800 Hz sine with an exponential fade, the completion chime.
pub struct Beep {
    sample_rate: u32,
    total_samples: u32,
    sample_index: u32,
}

impl Beep {
    pub fn new() -> Self {
        let sample_rate = 44100;
        Self {
            sample_rate,
            total_samples: sample_rate,
            sample_index: 0,
        }
    }
}

impl Iterator for Beep {
    type Item = f32;

    fn next(&mut self) -> Option<Self::Item> {
        if self.sample_index >= self.total_samples {
            return None;
        }

        let progress = self.sample_index as f32 / self.total_samples as f32;
        let gain = START_GAIN * (END_GAIN / START_GAIN).powf(progress);
        let t = self.sample_index as f32 / self.sample_rate as f32;
        self.sample_index += 1;

        Some((2.0 * PI * FREQUENCY_HZ * t).sin() * gain)
    }
}

impl Source for Beep {
    fn current_frame_len(&self) -> Option<usize> {
        Some((self.total_samples - self.sample_index) as usize)
    }

    fn channels(&self) -> u16 {
        1
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        Some(Duration::from_secs(1))
    }
}
