//! The per-trial container: stimuli (outgoing), responses (incoming
//! buffers), backgrounds, protocol parameters, keywords, and timing.

use std::collections::{BTreeSet, HashMap};

use uuid::Uuid;

use crate::chunk::Chunk;
use crate::measurement::Measurement;
use crate::scalar::Scalar;
use crate::ticks::{DateTimeOffset, EpochDuration, Ticks};

/// A contiguous interval of constant pipeline-node configuration within a
/// Stimulus or Response (spec §4.3, "Configuration spans").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigurationSpan {
    pub start_time: Ticks,
    pub duration: Ticks,
    /// Node name -> that node's configuration key/value map.
    pub nodes: Vec<(String, HashMap<String, Scalar>)>,
}

/// The source of a stimulus's outgoing samples.
#[derive(Debug, Clone)]
pub enum StimulusSource {
    /// A fully preloaded, finite sample sequence. Its duration must equal
    /// the owning Epoch's duration (spec §3 invariant).
    Samples(Chunk),
    /// An unbounded constant output, usable only when the owning Epoch (and
    /// this Stimulus) is indefinite.
    Constant { value: Measurement, rate_hz: f64 },
}

#[derive(Debug, Clone)]
pub struct Stimulus {
    source: StimulusSource,
    cursor: Ticks,
    pub spans: Vec<ConfigurationSpan>,
}

impl Stimulus {
    pub fn from_samples(chunk: Chunk) -> Stimulus {
        Stimulus {
            source: StimulusSource::Samples(chunk),
            cursor: Ticks::ZERO,
            spans: Vec::new(),
        }
    }

    pub fn constant(value: Measurement, rate_hz: f64) -> Stimulus {
        Stimulus {
            source: StimulusSource::Constant { value, rate_hz },
            cursor: Ticks::ZERO,
            spans: Vec::new(),
        }
    }

    pub fn duration(&self) -> EpochDuration {
        match &self.source {
            StimulusSource::Samples(c) => EpochDuration::Definite(c.duration()),
            StimulusSource::Constant { .. } => EpochDuration::Indefinite,
        }
    }

    /// Returns up to `requested` worth of output, advancing the internal
    /// cursor. Returns `None` once a finite stimulus is exhausted.
    fn pull(&mut self, requested: Ticks) -> Option<Chunk> {
        match &self.source {
            StimulusSource::Samples(full) => {
                if self.cursor >= full.duration() {
                    return None;
                }
                let (_, remaining) = full.split(self.cursor);
                let (head, _) = remaining.split(requested);
                if head.is_empty() {
                    return None;
                }
                self.cursor = self.cursor + head.duration();
                Some(head)
            }
            StimulusSource::Constant { value, rate_hz } => {
                if requested.is_zero() {
                    return None;
                }
                let n = ((requested.as_seconds()) * rate_hz).round() as usize;
                let samples = vec![value.clone(); n];
                self.cursor = self.cursor + requested;
                Some(Chunk::from_samples_at_rate(samples, *rate_hz))
            }
        }
    }

    fn record_output(&mut self, start_time: Ticks, duration: Ticks, configs: Vec<(String, HashMap<String, Scalar>)>) {
        self.spans.push(ConfigurationSpan {
            start_time,
            duration,
            nodes: configs,
        });
    }
}

#[derive(Debug, Clone, Default)]
pub struct Response {
    pub samples: Vec<Measurement>,
    duration: Ticks,
    pub spans: Vec<ConfigurationSpan>,
}

impl Response {
    pub fn new() -> Response {
        Response::default()
    }

    pub fn duration(&self) -> Ticks {
        self.duration
    }

    /// Appends `head`'s samples and grows `duration` by `head.duration()`.
    /// The controller is responsible for ensuring `head` never pushes the
    /// response's duration past the owning Epoch's duration (spec §4.2).
    pub fn append(&mut self, head: &Chunk) {
        self.samples.extend(head.samples.iter().cloned());
        self.duration = self.duration + head.duration();
    }
}

#[derive(Debug, Clone)]
pub struct Background {
    pub value: Measurement,
}

#[derive(Clone)]
pub struct Epoch {
    id: Uuid,
    pub protocol_id: String,
    pub start_time: Option<DateTimeOffset>,
    duration: EpochDuration,
    stimuli: HashMap<String, Stimulus>,
    responses: HashMap<String, Response>,
    backgrounds: HashMap<String, Background>,
    pub protocol_parameters: HashMap<String, Scalar>,
    pub keywords: BTreeSet<String>,
    /// Set once `is_complete` is first observed true, so the controller can
    /// tell a first-time completion from a re-entrant one.
    completed_once: bool,
}

impl Epoch {
    pub fn new(protocol_id: impl Into<String>, duration: EpochDuration) -> Epoch {
        Epoch {
            id: Uuid::new_v4(),
            protocol_id: protocol_id.into(),
            start_time: None,
            duration,
            stimuli: HashMap::new(),
            responses: HashMap::new(),
            backgrounds: HashMap::new(),
            protocol_parameters: HashMap::new(),
            keywords: BTreeSet::new(),
            completed_once: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn duration(&self) -> EpochDuration {
        self.duration
    }

    pub fn add_stimulus(&mut self, device: impl Into<String>, stimulus: Stimulus) {
        self.stimuli.insert(device.into(), stimulus);
    }

    pub fn add_response(&mut self, device: impl Into<String>) {
        self.responses.insert(device.into(), Response::new());
    }

    pub fn add_background(&mut self, device: impl Into<String>, background: Background) {
        self.backgrounds.insert(device.into(), background);
    }

    pub fn stimuli(&self) -> &HashMap<String, Stimulus> {
        &self.stimuli
    }

    pub fn responses(&self) -> &HashMap<String, Response> {
        &self.responses
    }

    pub fn response(&self, device: &str) -> Option<&Response> {
        self.responses.get(device)
    }

    pub fn backgrounds(&self) -> &HashMap<String, Background> {
        &self.backgrounds
    }

    pub fn has_response(&self, device: &str) -> bool {
        self.responses.contains_key(device)
    }

    /// Consumes up to `requested` from the device's stimulus. `None` if no
    /// stimulus is registered for `device`.
    pub fn pull_output_data(&mut self, device: &str, requested: Ticks) -> Option<Chunk> {
        self.stimuli.get_mut(device)?.pull(requested)
    }

    /// Appends `head` to the device's response buffer. Panics (an
    /// invariant violation, not a recoverable error) if no response is
    /// registered for `device` — callers must check `has_response` first.
    pub fn append_response_data(&mut self, device: &str, head: &Chunk) {
        let response = self
            .responses
            .get_mut(device)
            .expect("append_response_data called for a device with no registered response");
        response.append(head);
    }

    /// Appends a stimulus-output configuration span. No-op once the Epoch
    /// has already completed (spec §4.1).
    pub fn did_output_data(
        &mut self,
        device: &str,
        output_time: Ticks,
        duration: Ticks,
        configs: Vec<(String, HashMap<String, Scalar>)>,
    ) {
        if self.completed_once {
            return;
        }
        if let Some(stimulus) = self.stimuli.get_mut(device) {
            stimulus.record_output(output_time, duration, configs);
        }
    }

    /// Conjunction over registered response devices of
    /// `response.duration() >= epoch.duration()`. An indefinite Epoch is
    /// never complete.
    pub fn is_complete(&self) -> bool {
        match self.duration {
            EpochDuration::Indefinite => false,
            EpochDuration::Definite(target) => self
                .responses
                .values()
                .all(|r| r.duration() >= target),
        }
    }

    /// Marks the Epoch as having reached a terminal state (completed or
    /// discarded); returns `true` the first time it is called, `false` on
    /// any subsequent call. Used as a race guard so completion and discard
    /// can never both fire for the same Epoch.
    pub fn mark_terminal_if_first(&mut self) -> bool {
        if self.completed_once {
            false
        } else {
            self.completed_once = true;
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(n: usize) -> Vec<Measurement> {
        (0..n).map(|i| Measurement::new(i as f64, "V")).collect()
    }

    #[test]
    fn indefinite_epoch_is_never_complete() {
        let epoch = Epoch::new("proto", EpochDuration::Indefinite);
        assert!(!epoch.is_complete());
    }

    #[test]
    fn complete_once_response_reaches_duration() {
        let mut epoch = Epoch::new("proto", EpochDuration::Definite(Ticks(1_000_000)));
        epoch.add_response("dev-a");
        assert!(!epoch.is_complete());
        let chunk = Chunk::new(samples(100), Measurement::new(100.0, "Hz"), Ticks(1_000_000));
        epoch.append_response_data("dev-a", &chunk);
        assert!(epoch.is_complete());
    }

    #[test]
    fn mark_terminal_if_first_is_true_exactly_once() {
        let mut epoch = Epoch::new("proto", EpochDuration::Definite(Ticks(1)));
        assert!(epoch.mark_terminal_if_first());
        assert!(!epoch.mark_terminal_if_first());
        assert!(!epoch.mark_terminal_if_first());
    }

    #[test]
    fn pull_output_data_returns_none_without_stimulus() {
        let mut epoch = Epoch::new("proto", EpochDuration::Definite(Ticks(1_000_000)));
        assert!(epoch.pull_output_data("dev-a", Ticks(100)).is_none());
    }

    #[test]
    fn pull_output_data_is_bounded_by_remaining_stimulus() {
        let mut epoch = Epoch::new("proto", EpochDuration::Definite(Ticks(1_000_000)));
        let chunk = Chunk::new(samples(100), Measurement::new(100.0, "Hz"), Ticks(1_000_000));
        epoch.add_stimulus("dev-a", Stimulus::from_samples(chunk));
        let first = epoch.pull_output_data("dev-a", Ticks(400_000)).unwrap();
        assert_eq!(first.duration(), Ticks(400_000));
        let second = epoch.pull_output_data("dev-a", Ticks(1_000_000)).unwrap();
        assert_eq!(second.duration(), Ticks(600_000));
        assert!(epoch.pull_output_data("dev-a", Ticks(1)).is_none());
    }
}
