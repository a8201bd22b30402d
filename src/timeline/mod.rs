//! Timed note sequences and the contract between the playback controller
//! and whatever produces the notes.
//!
//! The controller never builds notes itself. It owns a
//! [`TimelineBuilder`] and asks it for a fresh [`Timeline`] whenever the
//! underlying data changes. [`BasicTimeline`] is a small in-crate
//! implementation that plays one instrument; richer hosts implement the
//! traits themselves.

use std::rc::Rc;

use tracing::debug;

use crate::audio::{ConnectTarget, NodeId, ParamKind, SharedContext};
use crate::synth::{SynthPatch, SynthPatchOptions};

/// Opaque identity of a data series within a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesId(pub u64);

/// Opaque identity of a single data point within a timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointId(pub u64);

/// One scheduled note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineEvent {
    /// Offset from the start of playback, in milliseconds.
    pub time_ms: f64,
    pub frequency: f32,
    pub note_duration_ms: Option<f32>,
    pub related_series: Option<SeriesId>,
    pub related_point: Option<PointId>,
}

/// Predicate selecting which events a `play` call includes. Shared so a
/// retried operation can reuse it.
pub type EventFilter = Rc<dyn Fn(&TimelineEvent) -> bool>;

/// Callback invoked once when a play operation finishes.
pub type OnEnd = Box<dyn FnMut()>;

/// A playable sequence of notes.
pub trait Timeline {
    /// Play all events matching `filter` (all events when `None`). Any
    /// playback already in progress is cancelled first. When
    /// `reset_after` is set, the navigation cursor returns to the start
    /// once playback finishes.
    fn play(&mut self, filter: Option<EventFilter>, reset_after: bool, on_end: Option<OnEnd>);

    /// Play one contiguous segment of the timeline, identified by index.
    fn play_segment(&mut self, segment: usize, on_end: Option<OnEnd>);

    /// Advance the cursor one matching event forward (`next`) or backward
    /// and play it. Returns `true` when the cursor was already at the
    /// boundary and nothing played.
    fn play_adjacent(
        &mut self,
        next: bool,
        filter: Option<EventFilter>,
        on_end: Option<OnEnd>,
    ) -> bool;

    /// Move the navigation cursor back to the start without playing.
    fn reset(&mut self);

    /// Stop playback immediately.
    fn cancel(&mut self);

    fn set_master_volume(&mut self, volume: f32);

    fn is_playing(&self) -> bool;

    /// Standard MIDI serialization of the timeline, for implementations
    /// that support export.
    fn midi_bytes(&self) -> Option<Vec<u8>> {
        None
    }

    /// Tick hook: the controller calls this as time advances so the
    /// timeline can detect end-of-playback and fire callbacks.
    fn poll(&mut self) {}

    /// Release audio resources. The timeline must not be used afterward.
    fn destroy(&mut self);
}

/// Produces a [`Timeline`] from the host's current data. Called again on
/// every controller update.
pub trait TimelineBuilder {
    fn build(&mut self, ctx: &SharedContext, destination: NodeId) -> Box<dyn Timeline>;
}

/// Duration of one `play_segment` bucket, in milliseconds.
const SEGMENT_MS: f64 = 1_000.0;

/// Minimal timeline: every event plays through a single instrument
/// behind a master gain.
pub struct BasicTimeline {
    ctx: SharedContext,
    master: NodeId,
    instrument: SynthPatch,
    events: Vec<TimelineEvent>,
    cursor: Option<usize>,
    playing_until: Option<f64>,
    reset_after_current: bool,
    on_end: Option<OnEnd>,
    destroyed: bool,
}

impl BasicTimeline {
    /// Events are sorted by time on construction.
    pub fn new(
        ctx: SharedContext,
        destination: NodeId,
        instrument: SynthPatchOptions,
        mut events: Vec<TimelineEvent>,
    ) -> Self {
        events.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
        let master = ctx.borrow_mut().create_gain(1.0);
        ctx.borrow_mut().connect(master, ConnectTarget::Node(destination));
        let instrument = SynthPatch::new(ctx.clone(), instrument);
        instrument.connect(ConnectTarget::Node(master));
        instrument.start_silently();
        Self {
            ctx,
            master,
            instrument,
            events,
            cursor: None,
            playing_until: None,
            reset_after_current: false,
            on_end: None,
            destroyed: false,
        }
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    fn schedule(&mut self, indices: &[usize], reset_after: bool, on_end: Option<OnEnd>) {
        self.cancel();
        if indices.is_empty() {
            if let Some(mut cb) = on_end {
                cb();
            }
            return;
        }
        let now = self.ctx.borrow().current_time();
        let first_ms = self.events[indices[0]].time_ms;
        let mut end = now;
        for &ix in indices {
            let event = self.events[ix];
            let at = now + (event.time_ms - first_ms) / 1000.0;
            self.instrument
                .play_freq_at_time(Some(at), event.frequency, event.note_duration_ms, None);
            let duration = event.note_duration_ms.unwrap_or(0.0) as f64 / 1000.0;
            end = end.max(at + duration + SynthPatch::STOP_RAMP_TIME);
        }
        if self.events[indices[0]].note_duration_ms.is_none() && indices.len() == 1 {
            // An undurated single note sustains; treat it as instantaneous
            // for end-of-playback purposes.
            end = now;
        }
        self.cursor = indices.last().copied();
        self.playing_until = Some(end);
        self.reset_after_current = reset_after;
        self.on_end = on_end;
        debug!(notes = indices.len(), "timeline playback scheduled");
    }

    fn finish(&mut self) {
        self.playing_until = None;
        if self.reset_after_current {
            self.reset_after_current = false;
            self.cursor = None;
        }
        if let Some(mut cb) = self.on_end.take() {
            cb();
        }
    }
}

impl Timeline for BasicTimeline {
    fn play(&mut self, filter: Option<EventFilter>, reset_after: bool, on_end: Option<OnEnd>) {
        if self.destroyed {
            return;
        }
        let indices: Vec<usize> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, ev)| filter.as_ref().map_or(true, |f| f(ev)))
            .map(|(ix, _)| ix)
            .collect();
        self.schedule(&indices, reset_after, on_end);
    }

    fn play_segment(&mut self, segment: usize, on_end: Option<OnEnd>) {
        if self.destroyed {
            return;
        }
        let start = segment as f64 * SEGMENT_MS;
        let end = start + SEGMENT_MS;
        let indices: Vec<usize> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, ev)| ev.time_ms >= start && ev.time_ms < end)
            .map(|(ix, _)| ix)
            .collect();
        self.schedule(&indices, false, on_end);
    }

    fn play_adjacent(
        &mut self,
        next: bool,
        filter: Option<EventFilter>,
        on_end: Option<OnEnd>,
    ) -> bool {
        if self.destroyed {
            return false;
        }
        let matches = |ix: usize| filter.as_ref().map_or(true, |f| f(&self.events[ix]));
        let target = if next {
            (self.cursor.map_or(0, |c| c + 1)..self.events.len()).find(|&ix| matches(ix))
        } else {
            match self.cursor {
                None | Some(0) => None,
                Some(c) => (0..c).rev().find(|&ix| matches(ix)),
            }
        };
        match target {
            Some(ix) => {
                self.schedule(&[ix], false, on_end);
                false
            }
            None => true,
        }
    }

    fn reset(&mut self) {
        self.cursor = None;
    }

    fn cancel(&mut self) {
        if self.destroyed {
            return;
        }
        self.instrument.cancel_scheduled();
        self.instrument.silence_at_time(None);
        self.playing_until = None;
        self.reset_after_current = false;
        self.on_end = None;
    }

    fn set_master_volume(&mut self, volume: f32) {
        if self.destroyed {
            return;
        }
        let mut graph = self.ctx.borrow_mut();
        let now = graph.current_time();
        if let Some(gain) = graph.param_mut(self.master, ParamKind::Gain) {
            gain.set_value_at_time(volume, now);
        }
    }

    fn is_playing(&self) -> bool {
        match self.playing_until {
            Some(until) => self.ctx.borrow().current_time() < until,
            None => false,
        }
    }

    fn poll(&mut self) {
        if self.destroyed {
            return;
        }
        if let Some(until) = self.playing_until {
            if self.ctx.borrow().current_time() >= until {
                self.finish();
            }
        }
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.playing_until = None;
        self.on_end = None;
        self.instrument.dispose();
        self.ctx.borrow_mut().remove_node(self.master);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::shared_context;
    use crate::synth::presets;

    fn event(time_ms: f64, series: u64) -> TimelineEvent {
        TimelineEvent {
            time_ms,
            frequency: 440.0,
            note_duration_ms: Some(100.0),
            related_series: Some(SeriesId(series)),
            related_point: None,
        }
    }

    fn timeline(ctx: &SharedContext, events: Vec<TimelineEvent>) -> BasicTimeline {
        let dest = ctx.borrow().destination();
        BasicTimeline::new(ctx.clone(), dest, presets::sine(), events)
    }

    #[test]
    fn play_runs_until_last_note_ends() {
        let ctx = shared_context(48_000.0);
        let mut tl = timeline(&ctx, vec![event(0.0, 0), event(400.0, 0)]);
        tl.play(None, false, None);
        assert!(tl.is_playing());

        ctx.borrow_mut().advance(0.6);
        assert!(!tl.is_playing());
    }

    #[test]
    fn filter_limits_playback_and_on_end_fires() {
        use std::cell::Cell;
        let ctx = shared_context(48_000.0);
        let mut tl = timeline(&ctx, vec![event(0.0, 1), event(2_000.0, 2)]);
        let ended = Rc::new(Cell::new(false));
        let flag = ended.clone();

        let only_first: EventFilter = Rc::new(|ev| ev.related_series == Some(SeriesId(1)));
        tl.play(
            Some(only_first),
            false,
            Some(Box::new(move || flag.set(true))),
        );

        // Only the series-1 note was scheduled, so playback is over well
        // before the series-2 note's offset.
        ctx.borrow_mut().advance(0.2);
        tl.poll();
        assert!(!tl.is_playing());
        assert!(ended.get());
    }

    #[test]
    fn adjacent_walks_forward_then_hits_boundary() {
        let ctx = shared_context(48_000.0);
        let mut tl = timeline(&ctx, vec![event(0.0, 0), event(100.0, 0)]);

        assert!(!tl.play_adjacent(true, None, None));
        assert!(!tl.play_adjacent(true, None, None));
        assert!(tl.play_adjacent(true, None, None), "past the last event");

        assert!(!tl.play_adjacent(false, None, None));
        assert!(tl.play_adjacent(false, None, None), "before the first event");
    }

    #[test]
    fn reset_after_returns_cursor_to_start() {
        let ctx = shared_context(48_000.0);
        let mut tl = timeline(&ctx, vec![event(0.0, 0), event(100.0, 0)]);
        tl.play(None, true, None);
        ctx.borrow_mut().advance(1.0);
        tl.poll();

        // Cursor is back at the start, so adjacent plays the first event
        // and stepping back from it hits the boundary.
        assert!(!tl.play_adjacent(true, None, None));
        assert!(tl.play_adjacent(false, None, None));
    }

    #[test]
    fn segment_selects_time_bucket() {
        let ctx = shared_context(48_000.0);
        let mut tl = timeline(
            &ctx,
            vec![event(100.0, 0), event(1_500.0, 0), event(2_500.0, 0)],
        );
        tl.play_segment(1, None);
        // Exactly one note in [1000, 2000); it plays immediately.
        assert!(tl.is_playing());
        ctx.borrow_mut().advance(0.2);
        assert!(!tl.is_playing());
    }

    #[test]
    fn empty_play_fires_on_end_immediately() {
        use std::cell::Cell;
        let ctx = shared_context(48_000.0);
        let mut tl = timeline(&ctx, vec![]);
        let ended = Rc::new(Cell::new(false));
        let flag = ended.clone();
        tl.play(None, false, Some(Box::new(move || flag.set(true))));
        assert!(ended.get());
        assert!(!tl.is_playing());
    }

    #[test]
    fn destroy_releases_graph_nodes() {
        let ctx = shared_context(48_000.0);
        let before = ctx.borrow().node_count();
        let mut tl = timeline(&ctx, vec![event(0.0, 0)]);
        assert!(ctx.borrow().node_count() > before);
        tl.destroy();
        assert_eq!(ctx.borrow().node_count(), before);
    }
}
