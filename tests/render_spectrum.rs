//! Renders a sine voice and verifies the dominant frequency in the
//! output spectrum.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use sonify_dsp::audio::{shared_context, ConnectTarget};
use sonify_dsp::synth::{presets, SynthPatch};

const SAMPLE_RATE: f32 = 48_000.0;
const N: usize = 16_384;

fn dominant_frequency(samples: &[f32]) -> f32 {
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(samples.len());
    let mut buffer: Vec<Complex<f32>> = samples
        .iter()
        .map(|&s| Complex { re: s, im: 0.0 })
        .collect();
    fft.process(&mut buffer);

    let peak_bin = buffer[..samples.len() / 2]
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.norm_sqr().total_cmp(&b.norm_sqr()))
        .map(|(bin, _)| bin)
        .unwrap();
    peak_bin as f32 * SAMPLE_RATE / samples.len() as f32
}

#[test]
fn sine_patch_renders_the_requested_pitch() {
    let ctx = shared_context(SAMPLE_RATE);
    let dest = ctx.borrow().destination();
    let patch = SynthPatch::new(ctx.clone(), presets::sine());
    patch.connect(ConnectTarget::Node(dest));
    patch.start_silently();
    patch.play_freq_at_time(Some(0.0), 440.0, None, None);

    let mut samples = vec![0.0f32; N];
    for block in samples.chunks_mut(256) {
        ctx.borrow_mut().render_block(block);
    }

    let peak = dominant_frequency(&samples);
    let bin_width = SAMPLE_RATE / N as f32;
    assert!(
        (peak - 440.0).abs() <= 2.0 * bin_width,
        "expected peak near 440 Hz, found {peak} Hz"
    );

    let rms = (samples.iter().map(|s| s * s).sum::<f32>() / N as f32).sqrt();
    assert!(rms > 0.1, "output should carry energy, rms {rms}");
}

#[test]
fn suspended_clock_renders_silence() {
    let ctx = shared_context(SAMPLE_RATE);
    let dest = ctx.borrow().destination();
    let patch = SynthPatch::new(ctx.clone(), presets::sine());
    patch.connect(ConnectTarget::Node(dest));
    patch.start_silently();
    patch.play_freq_at_time(Some(0.0), 440.0, None, None);
    ctx.borrow_mut().suspend();

    let mut block = vec![1.0f32; 512];
    ctx.borrow_mut().render_block(&mut block);
    assert!(block.iter().all(|&s| s == 0.0));
}
