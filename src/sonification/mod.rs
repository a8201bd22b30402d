//! The playback controller.
//!
//! [`Sonification`] sits between a host that owns data and the audio
//! layer: it rebuilds a [`Timeline`] when the data changes (throttled),
//! gates every transport operation on the audio clock being ready
//! (retrying while the clock resumes), and owns the shared boundary
//! click and transient one-off note instruments.
//!
//! All deferred work runs off an internal [`timer::TimerQueue`]; the
//! host drives it by calling [`Sonification::advance_time`].

use tracing::{debug, warn};

use crate::audio::{shared_context, ConnectTarget, ContextState, SharedContext};
use crate::synth::{presets, SynthPatch};
use crate::timeline::{EventFilter, OnEnd, PointId, SeriesId, Timeline, TimelineBuilder};

pub mod options;
pub(crate) mod timer;

pub use options::{Events, NoteOptions, SonificationOptions};
pub use timer::TimerHandle;

use options::{point_filter, series_filter};
use timer::{TimerQueue, TimerTask};

/// Attempts to resume a suspended clock before giving up on an operation.
const MAX_READY_RETRIES: u32 = 20;
/// Delay between readiness retries, in milliseconds.
const RETRY_INTERVAL_MS: u64 = 5;
/// Extra lifetime granted to a one-off note's instrument past its
/// nominal end, covering release tails.
const NOTE_EXPIRY_PAD_MS: u64 = 500;
const DEFAULT_NOTE_DURATION_MS: f32 = 500.0;
/// The boundary click plays louder than data so it cuts through.
const BOUNDARY_MASTER_VOLUME: f32 = 1.3;
const BOUNDARY_BLIP_DURATION_MS: f32 = 300.0;

/// A transport operation held back by the readiness gate, replayed once
/// the clock resumes.
pub(crate) enum PendingOp {
    SonifyChart {
        reset_after: bool,
        on_end: Option<OnEnd>,
    },
    SonifySeries {
        id: SeriesId,
        reset_after: bool,
        on_end: Option<OnEnd>,
    },
    SonifyPoint {
        id: PointId,
        reset_after: bool,
        on_end: Option<OnEnd>,
    },
    PlaySegment {
        segment: usize,
        on_end: Option<OnEnd>,
    },
    PlayAdjacent {
        next: bool,
        filter: Option<EventFilter>,
        on_end: Option<OnEnd>,
    },
    PlayNote {
        note: NoteOptions,
        delay_ms: u64,
    },
}

pub struct Sonification {
    ctx: Option<SharedContext>,
    builder: Box<dyn TimelineBuilder>,
    options: SonificationOptions,
    timeline: Option<Box<dyn Timeline>>,
    timers: TimerQueue,
    retry_counter: u32,
    last_update: Option<u64>,
    scheduled_update: Option<TimerHandle>,
    boundary_instrument: Option<SynthPatch>,
    note_instruments: Vec<(u64, SynthPatch)>,
    next_note_id: u64,
    force_ready: bool,
    destroyed: bool,
}

impl Sonification {
    /// Create a controller with its own audio context. The clock starts
    /// suspended; the first transport operation resumes it through the
    /// readiness gate.
    pub fn new(builder: Box<dyn TimelineBuilder>, options: SonificationOptions) -> Self {
        Self::with_context(builder, options, shared_context(crate::DEFAULT_SAMPLE_RATE))
    }

    /// Create a controller on an existing context, for hosts that render
    /// the graph themselves.
    pub fn with_context(
        builder: Box<dyn TimelineBuilder>,
        options: SonificationOptions,
        ctx: SharedContext,
    ) -> Self {
        ctx.borrow_mut().suspend();
        Self {
            ctx: Some(ctx),
            builder,
            options,
            timeline: None,
            timers: TimerQueue::new(),
            retry_counter: 0,
            last_update: None,
            scheduled_update: None,
            boundary_instrument: None,
            note_instruments: Vec::new(),
            next_note_id: 0,
            force_ready: false,
            destroyed: false,
        }
    }

    /// A controller whose audio setup failed. Every operation is a
    /// silent no-op; hosts keep one object shape either way.
    pub fn disabled(builder: Box<dyn TimelineBuilder>, options: SonificationOptions) -> Self {
        warn!("audio unavailable, sonification disabled");
        Self {
            ctx: None,
            builder,
            options,
            timeline: None,
            timers: TimerQueue::new(),
            retry_counter: 0,
            last_update: None,
            scheduled_update: None,
            boundary_instrument: None,
            note_instruments: Vec::new(),
            next_note_id: 0,
            force_ready: false,
            destroyed: false,
        }
    }

    pub fn context(&self) -> Option<&SharedContext> {
        self.ctx.as_ref()
    }

    /// Rebuild the timeline from the host's current data. Calls landing
    /// within `update_interval_ms` of the last rebuild are deferred; only
    /// the latest deferred call survives.
    pub fn update(&mut self) {
        if self.destroyed || !self.options.enabled {
            return;
        }
        let now = self.timers.now_ms();
        if let Some(last) = self.last_update {
            if now.saturating_sub(last) < self.options.update_interval_ms {
                if let Some(handle) = self.scheduled_update.take() {
                    self.timers.cancel(handle);
                }
                // At least 1 ms, so a tiny interval cannot schedule a
                // zero-delay task that re-defers itself forever.
                let delay = (self.options.update_interval_ms / 2).max(1);
                self.scheduled_update =
                    Some(self.timers.schedule(delay, TimerTask::DeferredUpdate));
                debug!(delay_ms = delay, "update throttled");
                return;
            }
        }
        self.last_update = Some(now);
        if let Some(handle) = self.scheduled_update.take() {
            self.timers.cancel(handle);
        }

        if let Some(hook) = &mut self.options.events.before_update {
            hook();
        }
        if let Some(mut old) = self.timeline.take() {
            old.destroy();
        }
        if let Some(ctx) = &self.ctx {
            let destination = ctx.borrow().destination();
            let mut timeline = self.builder.build(ctx, destination);
            timeline.set_master_volume(self.options.master_volume);
            self.timeline = Some(timeline);
            debug!("timeline rebuilt");
        }
        if let Some(hook) = &mut self.options.events.after_update {
            hook();
        }
    }

    pub fn sonify_chart(&mut self, reset_after: bool, on_end: Option<OnEnd>) {
        self.run(PendingOp::SonifyChart {
            reset_after,
            on_end,
        });
    }

    pub fn sonify_series(&mut self, id: SeriesId, reset_after: bool, on_end: Option<OnEnd>) {
        self.run(PendingOp::SonifySeries {
            id,
            reset_after,
            on_end,
        });
    }

    pub fn sonify_point(&mut self, id: PointId, reset_after: bool, on_end: Option<OnEnd>) {
        self.run(PendingOp::SonifyPoint {
            id,
            reset_after,
            on_end,
        });
    }

    pub fn play_segment(&mut self, segment: usize, on_end: Option<OnEnd>) {
        self.run(PendingOp::PlaySegment { segment, on_end });
    }

    /// Step the timeline cursor one matching event and play it. On a
    /// boundary hit the `on_boundary_hit` hook fires, or the built-in
    /// click when no hook is configured.
    pub fn play_adjacent(
        &mut self,
        next: bool,
        filter: Option<EventFilter>,
        on_end: Option<OnEnd>,
    ) {
        self.run(PendingOp::PlayAdjacent {
            next,
            filter,
            on_end,
        });
    }

    /// Play one ad-hoc note after `delay_ms`, on a transient instrument
    /// that tears itself down once the note has finished.
    pub fn play_note(&mut self, note: NoteOptions, delay_ms: u64) {
        self.run(PendingOp::PlayNote { note, delay_ms });
    }

    /// MIDI serialization of the current timeline, when its
    /// implementation supports export.
    pub fn midi_bytes(&self) -> Option<Vec<u8>> {
        self.timeline.as_ref().and_then(|tl| tl.midi_bytes())
    }

    /// Stop playback now. Not gated: cancelling must work even while the
    /// clock is suspended.
    pub fn cancel(&mut self) {
        if self.destroyed {
            return;
        }
        if let Some(timeline) = &mut self.timeline {
            timeline.cancel();
        }
        if let Some(hook) = &mut self.options.events.on_cancel {
            hook();
        }
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.options.master_volume = volume;
        if let Some(timeline) = &mut self.timeline {
            timeline.set_master_volume(volume);
        }
    }

    pub fn is_playing(&self) -> bool {
        self.timeline.as_ref().is_some_and(|tl| tl.is_playing())
    }

    /// Advance the deferred-work clock by `ms`, dispatching everything
    /// that comes due along the way, then tick the timeline.
    pub fn advance_time(&mut self, ms: u64) {
        if self.destroyed {
            return;
        }
        let target = self.timers.now_ms() + ms;
        loop {
            let step = match self.timers.next_due() {
                Some(due) if due < target => due,
                _ => target,
            };
            for task in self.timers.advance_to(step) {
                self.run_task(task);
            }
            if step >= target {
                break;
            }
        }
        if let Some(timeline) = &mut self.timeline {
            timeline.poll();
        }
    }

    /// Test hook: skip the suspended-clock check in the readiness gate.
    pub fn set_force_ready(&mut self, force: bool) {
        self.force_ready = force;
    }

    /// Tear everything down. Terminal; every later call is a no-op.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.timers = TimerQueue::new();
        self.scheduled_update = None;
        if let Some(mut timeline) = self.timeline.take() {
            timeline.destroy();
        }
        if let Some(mut patch) = self.boundary_instrument.take() {
            patch.dispose();
        }
        for (_, mut patch) in self.note_instruments.drain(..) {
            patch.dispose();
        }
        if let Some(ctx) = self.ctx.take() {
            ctx.borrow_mut().close();
        }
        debug!("sonification destroyed");
    }

    fn run(&mut self, op: PendingOp) {
        if let Some(op) = self.gate(op) {
            self.dispatch(op);
        }
    }

    /// Readiness gate. Disabled or destroyed controllers drop the
    /// operation. A suspended clock defers it for a retry, up to
    /// [`MAX_READY_RETRIES`] attempts; after that it is dropped.
    fn gate(&mut self, op: PendingOp) -> Option<PendingOp> {
        if self.destroyed || !self.options.enabled {
            return None;
        }
        let suspended = match &self.ctx {
            Some(ctx) => ctx.borrow().state() == ContextState::Suspended,
            None => return None,
        };
        if suspended && !self.force_ready {
            if self.retry_counter < MAX_READY_RETRIES {
                self.retry_counter += 1;
                self.timers
                    .schedule(RETRY_INTERVAL_MS, TimerTask::RetryReady(op));
            } else {
                warn!("audio clock failed to resume, dropping operation");
            }
            return None;
        }
        self.retry_counter = 0;
        Some(op)
    }

    fn dispatch(&mut self, op: PendingOp) {
        match op {
            PendingOp::SonifyChart {
                reset_after,
                on_end,
            } => self.play_filtered(None, reset_after, on_end),
            PendingOp::SonifySeries {
                id,
                reset_after,
                on_end,
            } => self.play_filtered(Some(series_filter(id)), reset_after, on_end),
            PendingOp::SonifyPoint {
                id,
                reset_after,
                on_end,
            } => self.play_filtered(Some(point_filter(id)), reset_after, on_end),
            PendingOp::PlaySegment { segment, on_end } => {
                if let Some(timeline) = &mut self.timeline {
                    timeline.play_segment(segment, on_end);
                }
            }
            PendingOp::PlayAdjacent {
                next,
                filter,
                on_end,
            } => self.do_play_adjacent(next, filter, on_end),
            PendingOp::PlayNote { note, delay_ms } => self.do_play_note(note, delay_ms),
        }
    }

    fn run_task(&mut self, task: TimerTask) {
        match task {
            TimerTask::RetryReady(op) => {
                if let Some(ctx) = &self.ctx {
                    if !ctx.borrow_mut().resume() {
                        debug!("audio clock still suspended");
                    }
                }
                self.run(op);
            }
            TimerTask::DeferredUpdate => {
                self.scheduled_update = None;
                self.update();
            }
            TimerTask::ExpireNote(id) => {
                if let Some(pos) = self.note_instruments.iter().position(|(n, _)| *n == id) {
                    let (_, mut patch) = self.note_instruments.remove(pos);
                    patch.dispose();
                }
            }
        }
    }

    fn play_filtered(
        &mut self,
        filter: Option<EventFilter>,
        reset_after: bool,
        on_end: Option<OnEnd>,
    ) {
        match &mut self.timeline {
            Some(timeline) => timeline.play(filter, reset_after, on_end),
            None => debug!("no timeline yet, play request ignored"),
        }
    }

    fn do_play_adjacent(
        &mut self,
        next: bool,
        filter: Option<EventFilter>,
        on_end: Option<OnEnd>,
    ) {
        let Some(mut timeline) = self.timeline.take() else {
            return;
        };
        let boundary = timeline.play_adjacent(next, filter, on_end);
        self.timeline = Some(timeline);
        if boundary {
            self.on_boundary_hit();
        }
    }

    fn on_boundary_hit(&mut self) {
        if let Some(hook) = &mut self.options.events.on_boundary_hit {
            hook();
            return;
        }
        let Some(ctx) = &self.ctx else {
            return;
        };
        if self.boundary_instrument.is_none() {
            let mut preset = presets::step();
            preset.master_volume = Some(BOUNDARY_MASTER_VOLUME);
            let patch = SynthPatch::new(ctx.clone(), preset);
            // Read the destination before connect re-borrows the context.
            let destination = ctx.borrow().destination();
            patch.connect(ConnectTarget::Node(destination));
            patch.start_silently();
            self.boundary_instrument = Some(patch);
        }
        if let Some(patch) = &self.boundary_instrument {
            // The click's pitch comes from the preset's fixed
            // frequencies; the played frequency is irrelevant.
            patch.play_freq_at_time(None, 1.0, Some(BOUNDARY_BLIP_DURATION_MS), None);
        }
    }

    fn do_play_note(&mut self, note: NoteOptions, delay_ms: u64) {
        let Some(ctx) = &self.ctx else {
            return;
        };
        let instrument = note
            .instrument
            .unwrap_or_else(|| self.options.default_instrument.clone());
        let patch = SynthPatch::new(ctx.clone(), instrument);
        let destination = ctx.borrow().destination();
        patch.connect(ConnectTarget::Node(destination));
        patch.start_silently();

        let at = ctx.borrow().current_time() + delay_ms as f64 / 1000.0;
        let duration = note.note_duration_ms.unwrap_or(DEFAULT_NOTE_DURATION_MS);
        patch.play_freq_at_time(Some(at), note.frequency, Some(duration), note.glide_ms);

        let id = self.next_note_id;
        self.next_note_id += 1;
        self.note_instruments.push((id, patch));
        self.timers.schedule(
            delay_ms + duration.ceil() as u64 + NOTE_EXPIRY_PAD_MS,
            TimerTask::ExpireNote(id),
        );
    }
}
