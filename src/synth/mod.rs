//! Instrument voices built from oscillators, filters, and gain envelopes.
//!
//! A [`SynthPatch`] wires one or more [`Oscillator`]s into a master gain
//! and exposes note-level control: play a frequency at a time, glide,
//! silence, stop. All scheduling goes through parameter automation on the
//! shared [`crate::audio::Context`], so behavior is fully deterministic
//! and testable without rendering samples.

/// Breakpoint envelopes and click-free gain ramps.
pub mod envelope;
/// A single configurable voice stage: source, filters, tracking, gain.
pub mod oscillator;
/// The composed instrument.
pub mod patch;
/// Ready-made instrument configurations.
pub mod presets;

pub use envelope::{Envelope, EnvelopeKind, EnvelopePoint};
pub use oscillator::{FilterOptions, Oscillator, OscillatorOptions, OscillatorType};
pub use patch::{SynthPatch, SynthPatchOptions};

/// Ramp time used when snapping gains without clicks, in seconds.
pub(crate) const STOP_RAMP_TIME: f64 = 0.007;
