pub mod audio; // Clock, node graph, and parameter automation
pub mod sonification; // Playback controller: readiness, throttling, transport
pub mod synth; // Envelopes, oscillators, synth patches
pub mod timeline; // Timed event sequences and the builder contract

pub const DEFAULT_SAMPLE_RATE: f32 = 48_000.0;
