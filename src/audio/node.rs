use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};
use rand::Rng;

use crate::audio::param::AutomationParam;

/// Identifies a node inside one [`Context`](crate::audio::Context).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(pub(crate) usize);

/// Periodic waveform shapes for oscillator sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// Two-pole filter responses available as graph stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
}

/// Automatable parameters addressable on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Gain,
    Frequency,
    /// Pitch offset in cents. This is the FM input: audio connected to it
    /// adds to the scheduled detune value.
    Detune,
}

/// Where a node's output goes: another node's input, or one of its
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    Node(NodeId),
    Param(NodeId, ParamKind),
}

/// Length of the looping noise buffer, in seconds.
const NOISE_BUFFER_SECONDS: usize = 2;

pub(crate) enum NodeKind {
    Destination,
    Gain {
        gain: AutomationParam,
    },
    Oscillator {
        waveform: Waveform,
        frequency: AutomationParam,
        detune: AutomationParam,
        phase: f64,
        started: bool,
        stop_time: Option<f64>,
    },
    Noise {
        detune: AutomationParam,
        buffer: Vec<f32>,
        position: f64,
        started: bool,
        stop_time: Option<f64>,
    },
    Filter {
        kind: FilterKind,
        frequency: AutomationParam,
        q: f32,
        state: DirectForm2Transposed<f32>,
    },
}

impl NodeKind {
    pub(crate) fn oscillator(waveform: Waveform, frequency: f32, detune_cents: f32) -> Self {
        NodeKind::Oscillator {
            waveform,
            frequency: AutomationParam::new(frequency),
            detune: AutomationParam::new(detune_cents),
            phase: 0.0,
            started: false,
            stop_time: None,
        }
    }

    pub(crate) fn noise(sample_rate: f32) -> Self {
        let mut rng = rand::thread_rng();
        let len = sample_rate as usize * NOISE_BUFFER_SECONDS;
        let buffer = (0..len).map(|_| rng.gen::<f32>() * 1.2 - 0.6).collect();
        NodeKind::Noise {
            detune: AutomationParam::new(0.0),
            buffer,
            position: 0.0,
            started: false,
            stop_time: None,
        }
    }

    pub(crate) fn filter(kind: FilterKind, frequency: f32, q: f32, sample_rate: f32) -> Self {
        let coeffs = filter_coefficients(kind, frequency, q, sample_rate);
        NodeKind::Filter {
            kind,
            frequency: AutomationParam::new(frequency),
            q,
            state: DirectForm2Transposed::<f32>::new(coeffs),
        }
    }

    pub(crate) fn param(&self, kind: ParamKind) -> Option<&AutomationParam> {
        match (self, kind) {
            (NodeKind::Gain { gain }, ParamKind::Gain) => Some(gain),
            (NodeKind::Oscillator { frequency, .. }, ParamKind::Frequency) => Some(frequency),
            (NodeKind::Oscillator { detune, .. }, ParamKind::Detune) => Some(detune),
            (NodeKind::Noise { detune, .. }, ParamKind::Detune) => Some(detune),
            (NodeKind::Filter { frequency, .. }, ParamKind::Frequency) => Some(frequency),
            _ => None,
        }
    }

    pub(crate) fn param_mut(&mut self, kind: ParamKind) -> Option<&mut AutomationParam> {
        match (self, kind) {
            (NodeKind::Gain { gain }, ParamKind::Gain) => Some(gain),
            (NodeKind::Oscillator { frequency, .. }, ParamKind::Frequency) => Some(frequency),
            (NodeKind::Oscillator { detune, .. }, ParamKind::Detune) => Some(detune),
            (NodeKind::Noise { detune, .. }, ParamKind::Detune) => Some(detune),
            (NodeKind::Filter { frequency, .. }, ParamKind::Frequency) => Some(frequency),
            _ => None,
        }
    }

    pub(crate) fn start(&mut self) {
        match self {
            NodeKind::Oscillator { started, .. } | NodeKind::Noise { started, .. } => {
                *started = true;
            }
            _ => {}
        }
    }

    pub(crate) fn stop_at(&mut self, time: f64) {
        match self {
            NodeKind::Oscillator { stop_time, .. } | NodeKind::Noise { stop_time, .. } => {
                // First stop wins; a source cannot be restarted.
                if stop_time.is_none() {
                    *stop_time = Some(time);
                }
            }
            _ => {}
        }
    }

    /// Render one block. `input` is the summed output of every node feeding
    /// this one; `detune_mod` is the summed audio connected to the detune
    /// parameter (sources only).
    pub(crate) fn process(
        &mut self,
        input: &[f32],
        detune_mod: Option<&[f32]>,
        out: &mut [f32],
        block_start: f64,
        sample_rate: f32,
    ) {
        let dt = 1.0 / sample_rate as f64;
        match self {
            NodeKind::Destination => out.copy_from_slice(input),
            NodeKind::Gain { gain } => {
                for (i, sample) in out.iter_mut().enumerate() {
                    let t = block_start + i as f64 * dt;
                    *sample = input[i] * gain.value_at(t);
                }
            }
            NodeKind::Filter {
                kind,
                frequency,
                q,
                state,
            } => {
                // Coefficients follow the block-start cutoff; per-sample
                // recomputation is not worth it at these modulation rates.
                let cutoff = frequency.value_at(block_start);
                state.update_coefficients(filter_coefficients(*kind, cutoff, *q, sample_rate));
                for (i, sample) in out.iter_mut().enumerate() {
                    *sample = state.run(input[i]);
                }
            }
            NodeKind::Oscillator {
                waveform,
                frequency,
                detune,
                phase,
                started,
                stop_time,
            } => {
                for (i, sample) in out.iter_mut().enumerate() {
                    let t = block_start + i as f64 * dt;
                    if !*started || stop_time.map_or(false, |st| t >= st) {
                        *sample = 0.0;
                        continue;
                    }
                    let mut cents = detune.value_at(t);
                    if let Some(m) = detune_mod {
                        cents += m[i];
                    }
                    let freq = frequency.value_at(t) * cents_ratio(cents);
                    *sample = waveform_sample(*waveform, *phase);
                    *phase = (*phase + freq as f64 * dt).rem_euclid(1.0);
                }
            }
            NodeKind::Noise {
                detune,
                buffer,
                position,
                started,
                stop_time,
            } => {
                let len = buffer.len() as f64;
                for (i, sample) in out.iter_mut().enumerate() {
                    let t = block_start + i as f64 * dt;
                    if !*started || stop_time.map_or(false, |st| t >= st) {
                        *sample = 0.0;
                        continue;
                    }
                    let mut cents = detune.value_at(t);
                    if let Some(m) = detune_mod {
                        cents += m[i];
                    }
                    *sample = buffer[*position as usize];
                    *position = (*position + cents_ratio(cents) as f64).rem_euclid(len);
                }
            }
        }
    }
}

fn filter_coefficients(
    kind: FilterKind,
    frequency: f32,
    q: f32,
    sample_rate: f32,
) -> Coefficients<f32> {
    let response = match kind {
        FilterKind::Lowpass => Type::LowPass,
        FilterKind::Highpass => Type::HighPass,
    };
    // Keep cutoff inside the valid range for the sample rate.
    let cutoff = frequency.clamp(1.0, sample_rate * 0.49);
    let q = q.max(0.001);
    Coefficients::<f32>::from_params(response, sample_rate.hz(), cutoff.hz(), q)
        .unwrap_or_else(|_| {
            Coefficients::<f32>::from_params(response, sample_rate.hz(), 1_000.0.hz(), 1.0)
                .expect("fallback filter coefficients are valid")
        })
}

fn cents_ratio(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}

fn waveform_sample(waveform: Waveform, phase: f64) -> f32 {
    let phase = phase as f32;
    match waveform {
        Waveform::Sine => (std::f32::consts::TAU * phase).sin(),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Sawtooth => 2.0 * phase - 1.0,
        Waveform::Triangle => {
            if phase < 0.5 {
                4.0 * phase - 1.0
            } else {
                3.0 - 4.0 * phase
            }
        }
    }
}
