//! Time-bounded, splittable sequences of measurements.

use serde::{Deserialize, Serialize};

use crate::measurement::Measurement;
use crate::ticks::Ticks;

/// A time-bounded sequence of samples taken at a fixed rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub samples: Vec<Measurement>,
    pub sample_rate: Measurement,
    duration: Ticks,
}

impl Chunk {
    pub fn new(samples: Vec<Measurement>, sample_rate: Measurement, duration: Ticks) -> Chunk {
        Chunk {
            samples,
            sample_rate,
            duration,
        }
    }

    /// Builds a chunk from samples and a sample rate in Hz, deriving its
    /// duration from `samples.len() / rate_hz`.
    pub fn from_samples_at_rate(samples: Vec<Measurement>, rate_hz: f64) -> Chunk {
        let duration = Ticks::from_seconds(samples.len() as f64 / rate_hz);
        Chunk {
            samples,
            sample_rate: Measurement::new(rate_hz, "Hz"),
            duration,
        }
    }

    pub fn duration(&self) -> Ticks {
        self.duration
    }

    pub fn is_empty(&self) -> bool {
        self.duration.is_zero()
    }

    /// Splits the chunk at `at`, clamped to `self.duration()`. Returns
    /// `(head, rest)` where `head.duration() == min(at, self.duration())`
    /// and `rest.duration() == self.duration() - head.duration()`.
    ///
    /// Sample counts are split proportionally to duration: the chunk's
    /// sample rate is constant, so `head` gets the first
    /// `round(samples.len() * head.duration / self.duration)` samples.
    pub fn split(&self, at: Ticks) -> (Chunk, Chunk) {
        let clamped = if at.0 < 0 {
            Ticks::ZERO
        } else if at.0 > self.duration.0 {
            self.duration
        } else {
            at
        };

        let head_samples = if self.duration.is_zero() {
            0
        } else {
            ((self.samples.len() as i128 * clamped.0 as i128) / self.duration.0 as i128) as usize
        };

        let (head, rest) = self.samples.split_at(head_samples);
        let head_chunk = Chunk {
            samples: head.to_vec(),
            sample_rate: self.sample_rate.clone(),
            duration: clamped,
        };
        let rest_chunk = Chunk {
            samples: rest.to_vec(),
            sample_rate: self.sample_rate.clone(),
            duration: self.duration - clamped,
        };
        (head_chunk, rest_chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Measurement> {
        (0..n).map(|i| Measurement::new(i as f64, "V")).collect()
    }

    #[test]
    fn split_preserves_total_duration_and_samples() {
        let chunk = Chunk::new(samples(1000), Measurement::new(1000.0, "Hz"), Ticks(10_000_000));
        let (head, rest) = chunk.split(Ticks(4_000_000));
        assert_eq!(head.duration(), Ticks(4_000_000));
        assert_eq!(rest.duration(), Ticks(6_000_000));
        assert_eq!(head.samples.len() + rest.samples.len(), chunk.samples.len());
        let mut combined = head.samples.clone();
        combined.extend(rest.samples.clone());
        assert_eq!(combined, chunk.samples);
    }

    #[test]
    fn split_clamps_to_chunk_duration() {
        let chunk = Chunk::new(samples(100), Measurement::new(100.0, "Hz"), Ticks(1_000_000));
        let (head, rest) = chunk.split(Ticks(5_000_000));
        assert_eq!(head.duration(), chunk.duration());
        assert_eq!(rest.duration(), Ticks::ZERO);
        assert!(rest.samples.is_empty());
    }

    #[test]
    fn split_at_zero_yields_empty_head() {
        let chunk = Chunk::new(samples(100), Measurement::new(100.0, "Hz"), Ticks(1_000_000));
        let (head, rest) = chunk.split(Ticks::ZERO);
        assert!(head.is_empty());
        assert_eq!(rest.duration(), chunk.duration());
    }
}
