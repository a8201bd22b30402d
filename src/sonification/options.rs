use crate::synth::SynthPatchOptions;
use crate::timeline::TimelineEvent;

/// Host callback invoked with no arguments.
pub type Hook = Box<dyn FnMut()>;

/// Callback slots for controller lifecycle moments. All optional.
#[derive(Default)]
pub struct Events {
    /// Fired just before a timeline rebuild.
    pub before_update: Option<Hook>,
    /// Fired after a successful timeline rebuild.
    pub after_update: Option<Hook>,
    /// Replaces the built-in boundary click when navigation runs off the
    /// end of the timeline.
    pub on_boundary_hit: Option<Hook>,
    /// Fired whenever playback is cancelled.
    pub on_cancel: Option<Hook>,
}

/// Controller configuration.
pub struct SonificationOptions {
    /// Master switch. When `false` every operation is a silent no-op.
    pub enabled: bool,
    /// Minimum time between timeline rebuilds, in milliseconds. Updates
    /// arriving faster than this are deferred, keeping only the latest.
    pub update_interval_ms: u64,
    pub master_volume: f32,
    /// Instrument used for one-off notes without an explicit instrument.
    pub default_instrument: SynthPatchOptions,
    pub events: Events,
}

impl Default for SonificationOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval_ms: 200,
            master_volume: 1.0,
            default_instrument: crate::synth::presets::sine(),
            events: Events::default(),
        }
    }
}

/// A single ad-hoc note, outside any timeline.
#[derive(Clone, Default)]
pub struct NoteOptions {
    pub frequency: f32,
    pub note_duration_ms: Option<f32>,
    pub glide_ms: Option<f32>,
    /// Overrides the controller's default instrument for this note.
    pub instrument: Option<SynthPatchOptions>,
}

impl NoteOptions {
    pub fn freq(frequency: f32) -> Self {
        Self {
            frequency,
            ..Default::default()
        }
    }
}

/// Convenience filter constructors used by the transport methods.
pub(crate) fn series_filter(id: crate::timeline::SeriesId) -> crate::timeline::EventFilter {
    std::rc::Rc::new(move |ev: &TimelineEvent| ev.related_series == Some(id))
}

pub(crate) fn point_filter(id: crate::timeline::PointId) -> crate::timeline::EventFilter {
    std::rc::Rc::new(move |ev: &TimelineEvent| ev.related_point == Some(id))
}
