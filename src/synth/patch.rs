#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::audio::{ConnectTarget, NodeId, ParamKind, SharedContext};
use crate::synth::envelope::{
    mini_ramp_to_vol_at_time, schedule_gain_envelope, Envelope, EnvelopeKind,
};
use crate::synth::oscillator::{Oscillator, OscillatorOptions};
use crate::synth::STOP_RAMP_TIME;

/// Configuration for a complete instrument voice.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthPatchOptions {
    pub oscillators: Vec<OscillatorOptions>,
    pub master_attack_envelope: Envelope,
    pub master_release_envelope: Envelope,
    pub master_volume: Option<f32>,
}

/// A composed instrument: one or more oscillators behind a master output
/// gain. Oscillators configured to modulate another oscillator are wired
/// to that oscillator's FM input instead of the shared output.
///
/// Lifecycle: construct, `start_silently` once, any number of
/// `play_freq_at_time` / `silence_at_time` calls, then a terminal `stop`.
/// After `stop`, every method is a no-op.
pub struct SynthPatch {
    ctx: SharedContext,
    options: SynthPatchOptions,
    output: NodeId,
    oscillators: Vec<Oscillator>,
    stopped: bool,
}

impl SynthPatch {
    /// Ramp time to zero when stopping sound, in seconds.
    pub const STOP_RAMP_TIME: f64 = STOP_RAMP_TIME;

    pub fn new(ctx: SharedContext, options: SynthPatchOptions) -> Self {
        let output = ctx.borrow_mut().create_gain(1.0);
        let oscillators: Vec<Oscillator> = options
            .oscillators
            .iter()
            .map(|osc_options| {
                let destination = osc_options
                    .modulate_oscillator
                    .is_none()
                    .then_some(ConnectTarget::Node(output));
                Oscillator::new(ctx.clone(), osc_options.clone(), destination)
            })
            .collect();

        // With all oscillators built, route the modulating ones into their
        // target's FM input. Self-modulation and bad indices are no-ops.
        for ix in 0..oscillators.len() {
            let Some(target_ix) = oscillators[ix].modulates else {
                continue;
            };
            if target_ix == ix {
                continue;
            }
            if let Some(fm) = oscillators.get(target_ix).and_then(|o| o.fm_target()) {
                oscillators[ix].connect(fm);
            }
        }

        Self {
            ctx,
            options,
            output,
            oscillators,
            stopped: false,
        }
    }

    /// Start every oscillator with the output muted. Required once before
    /// any sound, since sources can only be started once.
    pub fn start_silently(&self) {
        if self.stopped {
            return;
        }
        {
            let mut graph = self.ctx.borrow_mut();
            let now = graph.current_time();
            if let Some(gain) = graph.param_mut(self.output, ParamKind::Gain) {
                gain.set_value_at_time(0.0, now);
            }
        }
        for osc in &self.oscillators {
            osc.start();
        }
    }

    /// Terminal stop: ramp the output to silence and schedule every
    /// oscillator's stop just after the ramp. The patch cannot be reused.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        let end_time = {
            let mut graph = self.ctx.borrow_mut();
            let now = graph.current_time();
            if let Some(gain) = graph.param_mut(self.output, ParamKind::Gain) {
                mini_ramp_to_vol_at_time(gain, now, 0.0);
            }
            now + STOP_RAMP_TIME
        };
        for osc in &self.oscillators {
            osc.stop_at_time(end_time);
        }
    }

    /// Mute at `time` (or now), running the release envelopes. When no
    /// time is given and the output is already near zero, snaps straight
    /// to silence instead. Note: scheduling this several times in quick
    /// succession re-runs the release envelope, which can itself be
    /// audible.
    pub fn silence_at_time(&self, time: Option<f64>) {
        if self.stopped {
            return;
        }
        let now = self.ctx.borrow().current_time();
        if time.is_none() {
            let current = self
                .ctx
                .borrow()
                .param(self.output, ParamKind::Gain)
                .map(|gain| gain.value_at(now))
                .unwrap_or(0.0);
            if current < 0.01 {
                let mut graph = self.ctx.borrow_mut();
                if let Some(gain) = graph.param_mut(self.output, ParamKind::Gain) {
                    gain.set_value_at_time(0.0, now);
                }
                return;
            }
        }
        self.release_at_time(time.unwrap_or(now));
    }

    /// Play `frequency` starting at `time` (or now). The attack ramp or
    /// glide starts at `time`; durations are milliseconds. Without a note
    /// duration the note sustains until silenced; without a glide the
    /// pitch jumps straight to the target.
    pub fn play_freq_at_time(
        &self,
        time: Option<f64>,
        frequency: f32,
        note_duration_ms: Option<f32>,
        glide_ms: Option<f32>,
    ) {
        if self.stopped {
            return;
        }
        let t = time.unwrap_or_else(|| self.ctx.borrow().current_time());
        for osc in &self.oscillators {
            match glide_ms {
                Some(glide) if glide > 0.0 => osc.glide_to_freq_at_time(t, frequency, glide),
                _ => osc.set_freq_at_time(t, frequency),
            }
            osc.run_envelope_at_time(EnvelopeKind::Attack, t);
        }
        {
            let mut graph = self.ctx.borrow_mut();
            if let Some(gain) = graph.param_mut(self.output, ParamKind::Gain) {
                schedule_gain_envelope(
                    &self.options.master_attack_envelope,
                    EnvelopeKind::Attack,
                    t,
                    gain,
                    self.options.master_volume.unwrap_or(1.0),
                );
            }
        }
        if let Some(duration) = note_duration_ms {
            self.release_at_time(t + duration as f64 / 1000.0);
        }
    }

    /// Drop pending automation on the output and on every oscillator's
    /// gain stage.
    pub fn cancel_scheduled(&self) {
        if self.stopped {
            return;
        }
        for osc in &self.oscillators {
            osc.cancel_scheduled_envelopes();
        }
        let mut graph = self.ctx.borrow_mut();
        let now = graph.current_time();
        if let Some(gain) = graph.param_mut(self.output, ParamKind::Gain) {
            gain.cancel_scheduled_values(now);
        }
    }

    /// Route the patch output into the graph.
    pub fn connect(&self, destination: ConnectTarget) {
        if self.stopped {
            return;
        }
        self.ctx.borrow_mut().connect(self.output, destination);
    }

    /// Stop and remove every node this patch created. Used by owners that
    /// build transient patches and want the graph cleaned up.
    pub fn dispose(&mut self) {
        self.stop();
        let mut graph = self.ctx.borrow_mut();
        for osc in &self.oscillators {
            for node in osc.node_ids() {
                graph.remove_node(node);
            }
        }
        graph.remove_node(self.output);
    }

    /// Fade everything out via the release envelopes, then ramp the
    /// output to exactly zero once the longest release has finished.
    fn release_at_time(&self, time: f64) {
        let mut max_release_ms = 0.0f32;
        for osc in &self.oscillators {
            let envelope = &osc.options.release_envelope;
            if let Some(last) = envelope.last() {
                max_release_ms = max_release_ms.max(last.t);
                osc.run_envelope_at_time(EnvelopeKind::Release, time);
            }
        }

        let master = &self.options.master_release_envelope;
        {
            let mut graph = self.ctx.borrow_mut();
            if let Some(gain) = graph.param_mut(self.output, ParamKind::Gain) {
                schedule_gain_envelope(
                    master,
                    EnvelopeKind::Release,
                    time,
                    gain,
                    self.options.master_volume.unwrap_or(1.0),
                );
            }
        }
        if let Some(last) = master.last() {
            max_release_ms = max_release_ms.max(last.t);
        }

        let mut graph = self.ctx.borrow_mut();
        if let Some(gain) = graph.param_mut(self.output, ParamKind::Gain) {
            mini_ramp_to_vol_at_time(gain, time + max_release_ms as f64 / 1000.0, 0.0);
        }
    }

    fn output_gain_at(&self, time: f64) -> f32 {
        self.ctx
            .borrow()
            .param(self.output, ParamKind::Gain)
            .map(|gain| gain.value_at(time))
            .unwrap_or(0.0)
    }
}
