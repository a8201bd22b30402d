//! Interactive demo: sonifies a small data series through the default
//! audio output.
//!
//! Keys: space replays the series, left/right step note by note (with
//! the boundary click past either end), n plays an ad-hoc note, Esc or q
//! cancels and quits.

use std::time::{Duration, Instant};

use color_eyre::eyre::{eyre, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal;
use rtrb::RingBuffer;
use tracing::info;

use sonify_dsp::audio::{shared_context, NodeId, SharedContext};
use sonify_dsp::sonification::{NoteOptions, Sonification, SonificationOptions};
use sonify_dsp::synth::presets;
use sonify_dsp::timeline::{
    BasicTimeline, PointId, SeriesId, Timeline, TimelineBuilder, TimelineEvent,
};

/// Frames rendered per fill pass.
const BLOCK: usize = 256;
/// Ring buffer capacity in frames; roughly 170 ms at 48 kHz.
const BUFFER_FRAMES: usize = 8192;

/// Builds a timeline from a fixed data series: values map linearly onto
/// a pitch range, points are spaced evenly in time.
struct SeriesBuilder {
    data: Vec<f32>,
}

impl SeriesBuilder {
    const MIN_FREQ: f32 = 220.0;
    const MAX_FREQ: f32 = 880.0;
    const SPACING_MS: f64 = 300.0;
    const NOTE_MS: f32 = 200.0;
}

impl TimelineBuilder for SeriesBuilder {
    fn build(&mut self, ctx: &SharedContext, destination: NodeId) -> Box<dyn Timeline> {
        let min = self.data.iter().copied().fold(f32::INFINITY, f32::min);
        let max = self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let span = (max - min).max(f32::EPSILON);
        let events = self
            .data
            .iter()
            .enumerate()
            .map(|(ix, &value)| TimelineEvent {
                time_ms: ix as f64 * Self::SPACING_MS,
                frequency: Self::MIN_FREQ
                    + (value - min) / span * (Self::MAX_FREQ - Self::MIN_FREQ),
                note_duration_ms: Some(Self::NOTE_MS),
                related_series: Some(SeriesId(0)),
                related_point: Some(PointId(ix as u64)),
            })
            .collect();
        Box::new(BasicTimeline::new(
            ctx.clone(),
            destination,
            presets::pluck(),
            events,
        ))
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| eyre!("no output device available"))?;
    let config = device.default_output_config()?;
    if config.sample_format() != cpal::SampleFormat::F32 {
        return Err(eyre!("unsupported sample format {}", config.sample_format()));
    }
    let sample_rate = config.sample_rate().0 as f32;
    let channels = config.channels() as usize;
    info!(sample_rate, channels, "output device ready");

    let (mut producer, mut consumer) = RingBuffer::<f32>::new(BUFFER_FRAMES);
    let stream = device.build_output_stream(
        &config.into(),
        move |data: &mut [f32], _| {
            for frame in data.chunks_mut(channels) {
                let sample = consumer.pop().unwrap_or(0.0);
                for out in frame {
                    *out = sample;
                }
            }
        },
        |err| tracing::error!(%err, "stream error"),
        None,
    )?;
    stream.play()?;

    let ctx = shared_context(sample_rate);
    let data = vec![3.0, 5.0, 4.0, 8.0, 7.5, 9.0, 6.0, 2.0, 4.5, 10.0];
    let builder = Box::new(SeriesBuilder { data });
    let mut son = Sonification::with_context(builder, SonificationOptions::default(), ctx.clone());
    son.update();
    // The clock starts suspended; the readiness gate resumes it on the
    // first retry once the event loop starts advancing time.
    son.sonify_chart(true, None);

    terminal::enable_raw_mode()?;
    let result = run(&mut son, &ctx, &mut producer);
    terminal::disable_raw_mode()?;
    son.destroy();
    result
}

fn run(
    son: &mut Sonification,
    ctx: &SharedContext,
    producer: &mut rtrb::Producer<f32>,
) -> Result<()> {
    let mut block = [0.0f32; BLOCK];
    let mut last_tick = Instant::now();

    loop {
        // Keep the ring buffer topped up.
        while producer.slots() >= BLOCK {
            ctx.borrow_mut().render_block(&mut block);
            for &sample in &block {
                let _ = producer.push(sample);
            }
        }

        if event::poll(Duration::from_millis(10))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Esc | KeyCode::Char('q') => {
                        son.cancel();
                        return Ok(());
                    }
                    KeyCode::Char(' ') => son.sonify_chart(true, None),
                    KeyCode::Right => son.play_adjacent(true, None, None),
                    KeyCode::Left => son.play_adjacent(false, None, None),
                    KeyCode::Char('n') => {
                        son.play_note(NoteOptions::freq(440.0), 0);
                    }
                    _ => {}
                }
            }
        }

        let elapsed = last_tick.elapsed();
        last_tick = Instant::now();
        son.advance_time(elapsed.as_millis() as u64);
    }
}
