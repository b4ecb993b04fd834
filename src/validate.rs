//! Epoch-shape validation: the checks that must pass before an Epoch is
//! allowed onto the queue or run.

use crate::epoch::Epoch;
use crate::error::ShapeError;

/// Rejects an indefinite Epoch with at least one response, and any stimulus
/// whose duration does not exactly equal the Epoch's duration (both the
/// definite/indefinite flag and the tick count must match).
pub fn validate_epoch_shape(epoch: &Epoch) -> Result<(), ShapeError> {
    if epoch.duration().is_indefinite() && !epoch.responses().is_empty() {
        return Err(ShapeError::IndefiniteEpochWithResponses(epoch.responses().len()));
    }

    for (device, stimulus) in epoch.stimuli() {
        if stimulus.duration() != epoch.duration() {
            return Err(ShapeError::StimulusDurationMismatch {
                device: device.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::epoch::Stimulus;
    use crate::measurement::Measurement;
    use crate::ticks::{EpochDuration, Ticks};

    fn samples(n: usize) -> Vec<Measurement> {
        (0..n).map(|i| Measurement::new(i as f64, "V")).collect()
    }

    #[test]
    fn rejects_indefinite_epoch_with_responses() {
        let mut epoch = Epoch::new("proto", EpochDuration::Indefinite);
        epoch.add_response("dev-a");
        assert!(matches!(
            validate_epoch_shape(&epoch),
            Err(ShapeError::IndefiniteEpochWithResponses(1))
        ));
    }

    #[test]
    fn rejects_stimulus_duration_mismatch() {
        let mut epoch = Epoch::new("proto", EpochDuration::Definite(Ticks(1_000_000)));
        let chunk = Chunk::new(samples(10), Measurement::new(100.0, "Hz"), Ticks(100_000));
        epoch.add_stimulus("dev-a", Stimulus::from_samples(chunk));
        assert!(matches!(
            validate_epoch_shape(&epoch),
            Err(ShapeError::StimulusDurationMismatch { .. })
        ));
    }

    #[test]
    fn accepts_matching_stimulus_duration() {
        let mut epoch = Epoch::new("proto", EpochDuration::Definite(Ticks(1_000_000)));
        let chunk = Chunk::new(samples(100), Measurement::new(100.0, "Hz"), Ticks(1_000_000));
        epoch.add_stimulus("dev-a", Stimulus::from_samples(chunk));
        assert!(validate_epoch_shape(&epoch).is_ok());
    }
}
