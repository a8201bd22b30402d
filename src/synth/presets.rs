//! Ready-made instrument configurations.
//!
//! These are plain [`SynthPatchOptions`] values; callers are free to
//! tweak a preset before handing it to [`SynthPatch::new`].
//!
//! [`SynthPatch::new`]: crate::synth::SynthPatch::new

use crate::synth::envelope::EnvelopePoint;
use crate::synth::oscillator::{FilterOptions, OscillatorOptions, OscillatorType};
use crate::synth::patch::SynthPatchOptions;

fn pt(t: f32, vol: f32) -> EnvelopePoint {
    EnvelopePoint { t, vol }
}

/// Plain sine voice, the default instrument for data playback.
pub fn sine() -> SynthPatchOptions {
    SynthPatchOptions {
        oscillators: vec![OscillatorOptions {
            kind: OscillatorType::Sine,
            volume: Some(1.0),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// Short percussive tick whose pitch ignores the played frequency. Used
/// for navigation feedback, so it must read the same regardless of where
/// in the data range it fires.
pub fn step() -> SynthPatchOptions {
    SynthPatchOptions {
        oscillators: vec![
            OscillatorOptions {
                kind: OscillatorType::Triangle,
                fixed_frequency: Some(1_600.0),
                volume: Some(0.85),
                attack_envelope: vec![pt(1.0, 1.0)],
                release_envelope: vec![pt(1.0, 1.0), pt(60.0, 0.0)],
                lowpass: Some(FilterOptions {
                    frequency: Some(6_000.0),
                    ..Default::default()
                }),
                ..Default::default()
            },
            OscillatorOptions {
                kind: OscillatorType::WhiteNoise,
                volume: Some(0.2),
                attack_envelope: vec![pt(1.0, 1.0)],
                release_envelope: vec![pt(1.0, 1.0), pt(30.0, 0.0)],
                highpass: Some(FilterOptions {
                    frequency: Some(2_000.0),
                    ..Default::default()
                }),
                ..Default::default()
            },
        ],
        master_volume: Some(0.8),
        ..Default::default()
    }
}

/// Plucked-string flavor: sawtooth through a pitch-tracked lowpass with a
/// fast decay.
pub fn pluck() -> SynthPatchOptions {
    SynthPatchOptions {
        oscillators: vec![OscillatorOptions {
            kind: OscillatorType::Sawtooth,
            volume: Some(0.6),
            attack_envelope: vec![pt(1.0, 1.0)],
            release_envelope: vec![pt(1.0, 1.0), pt(220.0, 0.0)],
            lowpass: Some(FilterOptions {
                frequency: Some(4.5),
                frequency_pitch_tracking_multiplier: Some(1_600.0),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    }
}
