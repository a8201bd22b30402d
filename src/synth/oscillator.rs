#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::audio::{ConnectTarget, FilterKind, NodeId, ParamKind, SharedContext, Waveform};
use crate::synth::envelope::{schedule_gain_envelope, Envelope, EnvelopeKind};
use crate::synth::STOP_RAMP_TIME;

/// Sound source shapes, periodic or noise.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OscillatorType {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
    WhiteNoise,
}

/// A low-pass or high-pass stage on one oscillator. The stage is only
/// built when `frequency` is set.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilterOptions {
    pub frequency: Option<f32>,
    pub q: Option<f32>,
    /// Scales the cutoff with played pitch; 1 means no tracking.
    pub frequency_pitch_tracking_multiplier: Option<f32>,
}

/// Configuration for one oscillator in a patch.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OscillatorOptions {
    pub kind: OscillatorType,
    /// Overrides the played frequency when set (drums, clicks).
    pub fixed_frequency: Option<f32>,
    pub freq_multiplier: Option<f32>,
    /// Constant pitch offset in cents.
    pub detune: Option<f32>,
    /// Static volume. Setting it (or either envelope) adds a gain stage.
    pub volume: Option<f32>,
    /// Scales volume with played pitch; 1 means no tracking.
    pub volume_pitch_tracking_multiplier: Option<f32>,
    pub attack_envelope: Envelope,
    pub release_envelope: Envelope,
    pub lowpass: Option<FilterOptions>,
    pub highpass: Option<FilterOptions>,
    /// Index of another oscillator in the same patch to frequency-modulate.
    /// A modulating oscillator is never routed to the shared output.
    pub modulate_oscillator: Option<usize>,
}

/// Pitch tracking law: how much a multiplier applies at frequency `freq`.
/// `perceptual` uses a flatter, more logarithmic-like mapping (volume);
/// the linear mapping suits filter cutoffs. A multiplier of 1 always
/// evaluates to exactly 1.
pub(crate) fn pitch_tracked_multiplier(multiplier: f32, freq: f32, perceptual: bool) -> f32 {
    let d = multiplier - 1.0;
    let f = freq / 5000.0;
    let diff = if perceptual { d * f.sqrt().sqrt() } else { d * f };
    1.0 + diff
}

/// One sound source realized as a connectable chain of graph stages:
/// `[lowpass] -> [highpass] -> [pitch-tracking gain] -> [gain] -> source`.
/// Stages absent from the options are skipped; the chain has no gaps.
pub struct Oscillator {
    ctx: SharedContext,
    pub(crate) options: OscillatorOptions,
    source: NodeId,
    is_noise: bool,
    gain: Option<NodeId>,
    vol_tracking: Option<NodeId>,
    lowpass: Option<NodeId>,
    highpass: Option<NodeId>,
    pub(crate) modulates: Option<usize>,
}

impl Oscillator {
    /// Build the stages and, when a destination is given, connect the
    /// chain immediately.
    pub fn new(
        ctx: SharedContext,
        options: OscillatorOptions,
        destination: Option<ConnectTarget>,
    ) -> Self {
        let modulates = options.modulate_oscillator;
        let is_noise = options.kind == OscillatorType::WhiteNoise;

        let (source, gain, vol_tracking, lowpass, highpass) = {
            let mut graph = ctx.borrow_mut();

            let source = if is_noise {
                graph.create_noise_buffer()
            } else {
                let waveform = match options.kind {
                    OscillatorType::Sine => Waveform::Sine,
                    OscillatorType::Square => Waveform::Square,
                    OscillatorType::Sawtooth => Waveform::Sawtooth,
                    OscillatorType::Triangle => Waveform::Triangle,
                    OscillatorType::WhiteNoise => unreachable!(),
                };
                let frequency = options.fixed_frequency.unwrap_or(0.0)
                    * options.freq_multiplier.unwrap_or(1.0);
                graph.create_oscillator(waveform, frequency, options.detune.unwrap_or(0.0))
            };

            let needs_gain = options.volume.is_some()
                || !options.attack_envelope.is_empty()
                || !options.release_envelope.is_empty();
            let gain = needs_gain.then(|| graph.create_gain(options.volume.unwrap_or(1.0)));

            let vol_tracking = options
                .volume_pitch_tracking_multiplier
                .filter(|&m| m != 1.0)
                .map(|_| graph.create_gain(1.0));

            let lowpass = options.lowpass.and_then(|f| f.frequency).map(|freq| {
                let q = options.lowpass.and_then(|f| f.q).unwrap_or(1.0);
                graph.create_filter(FilterKind::Lowpass, freq, q)
            });
            let highpass = options.highpass.and_then(|f| f.frequency).map(|freq| {
                let q = options.highpass.and_then(|f| f.q).unwrap_or(1.0);
                graph.create_filter(FilterKind::Highpass, freq, q)
            });

            (source, gain, vol_tracking, lowpass, highpass)
        };

        let osc = Self {
            ctx,
            options,
            source,
            is_noise,
            gain,
            vol_tracking,
            lowpass,
            highpass,
            modulates,
        };
        if let Some(destination) = destination {
            osc.connect(destination);
        }
        osc
    }

    /// Wire the present stages into one chain ending at `destination`.
    pub fn connect(&self, destination: ConnectTarget) {
        let stages = [
            self.lowpass,
            self.highpass,
            self.vol_tracking,
            self.gain,
            Some(self.source),
        ];
        let mut graph = self.ctx.borrow_mut();
        let mut target = destination;
        for node in stages.into_iter().flatten() {
            graph.connect(node, target);
            target = ConnectTarget::Node(node);
        }
    }

    pub fn start(&self) {
        self.ctx.borrow_mut().start_source(self.source);
    }

    /// Terminal: the source cannot be restarted afterwards.
    pub fn stop_at_time(&self, time: f64) {
        self.ctx.borrow_mut().stop_source_at(self.source, time);
    }

    /// Retune instantly at `time`, cancelling pending frequency automation
    /// from that point on, and re-aim the tracking stages.
    pub fn set_freq_at_time(&self, time: f64, frequency: f32) {
        let f = self.effective_frequency(frequency);
        if !self.is_noise {
            let mut graph = self.ctx.borrow_mut();
            if let Some(param) = graph.param_mut(self.source, ParamKind::Frequency) {
                param.cancel_scheduled_values(time);
                param.set_value_at_time(f, time);
            }
        }
        self.schedule_vol_tracking_change(f, time);
        self.schedule_filter_tracking_change(f, time);
    }

    /// Glide toward the target over `glide_ms`: exponential approach with
    /// a third of the glide as time constant, then an exact snap.
    pub fn glide_to_freq_at_time(&self, time: f64, frequency: f32, glide_ms: f32) {
        let f = self.effective_frequency(frequency);
        if !self.is_noise {
            let mut graph = self.ctx.borrow_mut();
            if let Some(param) = graph.param_mut(self.source, ParamKind::Frequency) {
                param.cancel_scheduled_values(time);
                param.set_target_at_time(f, time, glide_ms as f64 / 1000.0 / 3.0);
                param.set_value_at_time(f, time + glide_ms as f64 / 1000.0);
            }
        }
        self.schedule_vol_tracking_change(f, time);
        self.schedule_filter_tracking_change(f, time);
    }

    /// The detune input another oscillator can modulate for FM.
    pub fn fm_target(&self) -> Option<ConnectTarget> {
        Some(ConnectTarget::Param(self.source, ParamKind::Detune))
    }

    /// Run the attack or release envelope on the gain stage at `time`.
    /// No-op when the oscillator has no gain stage.
    pub fn run_envelope_at_time(&self, kind: EnvelopeKind, time: f64) {
        let Some(gain) = self.gain else {
            return;
        };
        let envelope = match kind {
            EnvelopeKind::Attack => &self.options.attack_envelope,
            EnvelopeKind::Release => &self.options.release_envelope,
        };
        let volume = self.options.volume.unwrap_or(1.0);
        let mut graph = self.ctx.borrow_mut();
        if let Some(param) = graph.param_mut(gain, ParamKind::Gain) {
            schedule_gain_envelope(envelope, kind, time, param, volume);
        }
    }

    /// Drop any envelope automation not yet reached.
    pub fn cancel_scheduled_envelopes(&self) {
        if let Some(gain) = self.gain {
            let mut graph = self.ctx.borrow_mut();
            let now = graph.current_time();
            if let Some(param) = graph.param_mut(gain, ParamKind::Gain) {
                param.cancel_scheduled_values(now);
            }
        }
    }

    fn effective_frequency(&self, frequency: f32) -> f32 {
        self.options.fixed_frequency.unwrap_or(frequency)
            * self.options.freq_multiplier.unwrap_or(1.0)
    }

    fn schedule_vol_tracking_change(&self, frequency: f32, time: f64) {
        let Some(node) = self.vol_tracking else {
            return;
        };
        let v = pitch_tracked_multiplier(
            self.options.volume_pitch_tracking_multiplier.unwrap_or(1.0),
            frequency,
            true,
        );
        let mut graph = self.ctx.borrow_mut();
        if let Some(param) = graph.param_mut(node, ParamKind::Gain) {
            param.cancel_scheduled_values(time);
            param.set_target_at_time(v, time, STOP_RAMP_TIME / 6.0);
            param.set_value_at_time(v, time + STOP_RAMP_TIME);
        }
    }

    fn schedule_filter_tracking_change(&self, frequency: f32, time: f64) {
        let stages = [
            (self.lowpass, self.options.lowpass),
            (self.highpass, self.options.highpass),
        ];
        let mut graph = self.ctx.borrow_mut();
        for (node, opts) in stages {
            let (Some(node), Some(opts)) = (node, opts) else {
                continue;
            };
            let multiplier = pitch_tracked_multiplier(
                opts.frequency_pitch_tracking_multiplier.unwrap_or(1.0),
                frequency,
                false,
            );
            let cutoff = opts.frequency.unwrap_or(20_000.0) * multiplier;
            if let Some(param) = graph.param_mut(node, ParamKind::Frequency) {
                param.cancel_scheduled_values(time);
                param.set_value_at_time(cutoff, time);
            }
        }
    }

    pub(crate) fn node_ids(&self) -> Vec<NodeId> {
        [
            Some(self.source),
            self.gain,
            self.vol_tracking,
            self.lowpass,
            self.highpass,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::shared_context;

    fn ctx() -> SharedContext {
        shared_context(48_000.0)
    }

    #[test]
    fn unity_multiplier_never_tracks() {
        for freq in [1.0, 100.0, 440.0, 5_000.0, 20_000.0] {
            assert_eq!(pitch_tracked_multiplier(1.0, freq, false), 1.0);
            assert_eq!(pitch_tracked_multiplier(1.0, freq, true), 1.0);
        }
    }

    #[test]
    fn linear_tracking_is_monotonic_in_frequency() {
        let freqs = [50.0, 200.0, 1_000.0, 4_000.0, 12_000.0];
        for pair in freqs.windows(2) {
            let up_lo = pitch_tracked_multiplier(2.0, pair[0], false);
            let up_hi = pitch_tracked_multiplier(2.0, pair[1], false);
            assert!(up_hi >= up_lo, "multiplier > 1 must be non-decreasing");

            let down_lo = pitch_tracked_multiplier(0.5, pair[0], false);
            let down_hi = pitch_tracked_multiplier(0.5, pair[1], false);
            assert!(down_hi <= down_lo, "multiplier < 1 must be non-increasing");
        }
    }

    #[test]
    fn plain_oscillator_connects_source_directly() {
        let ctx = ctx();
        let dest = ctx.borrow().destination();
        let osc = Oscillator::new(
            ctx.clone(),
            OscillatorOptions::default(),
            Some(ConnectTarget::Node(dest)),
        );

        // No volume, envelopes, tracking, or filters: only the source node.
        assert_eq!(osc.node_ids().len(), 1);
        assert_eq!(
            ctx.borrow().connection_of(osc.source),
            Some(ConnectTarget::Node(dest))
        );
    }

    #[test]
    fn chain_skips_missing_stages() {
        let ctx = ctx();
        let dest = ctx.borrow().destination();
        let options = OscillatorOptions {
            volume: Some(0.5),
            lowpass: Some(FilterOptions {
                frequency: Some(2_000.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let osc = Oscillator::new(ctx.clone(), options, Some(ConnectTarget::Node(dest)));

        // source -> gain -> lowpass -> destination, no highpass/tracking.
        let graph = ctx.borrow();
        let gain = osc.gain.expect("volume configures a gain stage");
        let lowpass = osc.lowpass.expect("lowpass frequency configures a filter");
        assert!(osc.highpass.is_none());
        assert!(osc.vol_tracking.is_none());
        assert_eq!(
            graph.connection_of(osc.source),
            Some(ConnectTarget::Node(gain))
        );
        assert_eq!(graph.connection_of(gain), Some(ConnectTarget::Node(lowpass)));
        assert_eq!(graph.connection_of(lowpass), Some(ConnectTarget::Node(dest)));
    }

    #[test]
    fn filter_without_frequency_is_not_built() {
        let ctx = ctx();
        let options = OscillatorOptions {
            highpass: Some(FilterOptions {
                q: Some(4.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let osc = Oscillator::new(ctx, options, None);
        assert!(osc.highpass.is_none());
    }

    #[test]
    fn fixed_frequency_overrides_played_pitch() {
        let ctx = ctx();
        let options = OscillatorOptions {
            fixed_frequency: Some(220.0),
            freq_multiplier: Some(2.0),
            ..Default::default()
        };
        let osc = Oscillator::new(ctx.clone(), options, None);
        osc.set_freq_at_time(0.0, 880.0);

        let graph = ctx.borrow();
        let param = graph.param(osc.source, ParamKind::Frequency).unwrap();
        assert_eq!(param.value_at(0.0), 440.0);
    }

    #[test]
    fn glide_snaps_exactly_at_end() {
        let ctx = ctx();
        let osc = Oscillator::new(ctx.clone(), OscillatorOptions::default(), None);
        osc.set_freq_at_time(0.0, 100.0);
        osc.glide_to_freq_at_time(1.0, 400.0, 200.0);

        let graph = ctx.borrow();
        let param = graph.param(osc.source, ParamKind::Frequency).unwrap();
        assert!(param.value_at(1.1) < 400.0, "still gliding");
        assert_eq!(param.value_at(1.2), 400.0, "snapped at glide end");
    }

    #[test]
    fn volume_tracking_stage_follows_retune() {
        let ctx = ctx();
        let options = OscillatorOptions {
            volume_pitch_tracking_multiplier: Some(2.0),
            ..Default::default()
        };
        let osc = Oscillator::new(ctx.clone(), options, None);
        osc.set_freq_at_time(0.0, 5_000.0);

        let graph = ctx.borrow();
        let node = osc.vol_tracking.expect("tracking stage present");
        let param = graph.param(node, ParamKind::Gain).unwrap();
        // At the reference frequency the full multiplier applies.
        assert!((param.value_at(1.0) - 2.0).abs() < 1e-3);
    }

    #[test]
    fn fm_target_is_source_detune() {
        let ctx = ctx();
        let osc = Oscillator::new(ctx, OscillatorOptions::default(), None);
        assert_eq!(
            osc.fm_target(),
            Some(ConnectTarget::Param(osc.source, ParamKind::Detune))
        );
    }
}
