#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::audio::AutomationParam;
use crate::synth::STOP_RAMP_TIME;

/*
Gain Envelopes
==============

An envelope is an ordered list of breakpoints, each giving a volume at a
time offset (milliseconds from the start of the event). Scheduling one
turns the breakpoints into a series of short exponential approaches on a
gain parameter.

Two details avoid clicks and pops:

  - Every discrete gain change is a small exponential ramp followed by an
    exact snap a fixed offset later, never an instantaneous jump.
  - An envelope whose first breakpoint sits later than 1 ms gets an
    implicit starting point ({t: 0, vol: 0} for attack, {t: 0, vol: 1}
    for release) so the ramp has somewhere to start from.

An empty envelope falls back to a bare mini-ramp: attack jumps to the
target volume, release jumps to zero.
*/

/// One envelope breakpoint: volume `vol` (0..1) at `t` milliseconds from
/// the start of the event.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopePoint {
    pub t: f32,
    pub vol: f32,
}

/// Time-ordered gain breakpoints applied as a ramp.
pub type Envelope = Vec<EnvelopePoint>;

/// Which of the two envelope roles is being scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Attack,
    Release,
}

/// Ramp a gain parameter to `vol` at `time` without an audible step: a
/// fast exponential approach, then an exact snap at `time +
/// STOP_RAMP_TIME`.
pub(crate) fn mini_ramp_to_vol_at_time(param: &mut AutomationParam, time: f64, vol: f32) {
    param.cancel_scheduled_values(time);
    param.set_target_at_time(vol, time, STOP_RAMP_TIME / 4.0);
    param.set_value_at_time(vol, time + STOP_RAMP_TIME);
}

/// Schedule `envelope` on a gain parameter starting at `time` (seconds),
/// with every breakpoint volume scaled by `volume_multiplier`.
pub(crate) fn schedule_gain_envelope(
    envelope: &[EnvelopePoint],
    kind: EnvelopeKind,
    time: f64,
    param: &mut AutomationParam,
    volume_multiplier: f32,
) {
    let is_attack = kind == EnvelopeKind::Attack;
    param.cancel_scheduled_values(time);
    if envelope.is_empty() {
        let vol = if is_attack { volume_multiplier } else { 0.0 };
        mini_ramp_to_vol_at_time(param, time, vol);
        return;
    }

    let implicit_first = if envelope[0].t > 1.0 {
        Some(EnvelopePoint {
            t: 0.0,
            vol: if is_attack { 0.0 } else { 1.0 },
        })
    } else {
        None
    };

    let mut prev: Option<EnvelopePoint> = None;
    for point in implicit_first.iter().chain(envelope.iter()) {
        let (start, delta) = match prev {
            Some(p) => (
                time + p.t as f64 / 1000.0 + STOP_RAMP_TIME,
                (point.t - p.t) as f64 / 1000.0,
            ),
            None => (time, 0.0),
        };
        param.set_target_at_time(
            point.vol * volume_multiplier,
            start,
            delta.max(STOP_RAMP_TIME) / 2.0,
        );
        prev = Some(*point);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AutomationEvent;

    fn pt(t: f32, vol: f32) -> EnvelopePoint {
        EnvelopePoint { t, vol }
    }

    fn ramp_count(param: &AutomationParam) -> usize {
        param
            .events()
            .iter()
            .filter(|ev| matches!(ev, AutomationEvent::SetTarget { .. }))
            .count()
    }

    #[test]
    fn one_ramp_segment_per_breakpoint() {
        let env = vec![pt(0.0, 0.2), pt(50.0, 1.0), pt(120.0, 0.7)];
        let mut param = AutomationParam::new(0.0);
        schedule_gain_envelope(&env, EnvelopeKind::Attack, 1.0, &mut param, 1.0);
        assert_eq!(ramp_count(&param), env.len());
    }

    #[test]
    fn implicit_first_point_adds_one_segment() {
        let env = vec![pt(40.0, 1.0), pt(100.0, 0.5)];
        let mut param = AutomationParam::new(0.0);
        schedule_gain_envelope(&env, EnvelopeKind::Attack, 1.0, &mut param, 1.0);
        assert_eq!(ramp_count(&param), env.len() + 1);
    }

    #[test]
    fn segments_are_time_ascending_and_never_before_start() {
        let env = vec![pt(10.0, 0.4), pt(30.0, 0.9), pt(90.0, 0.1)];
        let mut param = AutomationParam::new(0.0);
        let start = 2.5;
        schedule_gain_envelope(&env, EnvelopeKind::Attack, start, &mut param, 1.0);

        let times: Vec<f64> = param.events().iter().map(|ev| ev.time()).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
        assert!(times.iter().all(|&t| t >= start));
    }

    #[test]
    fn empty_attack_jumps_to_volume() {
        let mut param = AutomationParam::new(0.0);
        schedule_gain_envelope(&[], EnvelopeKind::Attack, 0.0, &mut param, 0.8);
        assert!((param.value_at(STOP_RAMP_TIME) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn empty_release_jumps_to_zero() {
        let mut param = AutomationParam::new(1.0);
        schedule_gain_envelope(&[], EnvelopeKind::Release, 0.5, &mut param, 1.0);
        assert_eq!(param.value_at(0.5 + STOP_RAMP_TIME), 0.0);
    }

    #[test]
    fn breakpoint_volumes_are_scaled() {
        let env = vec![pt(0.0, 1.0)];
        let mut param = AutomationParam::new(0.0);
        schedule_gain_envelope(&env, EnvelopeKind::Attack, 0.0, &mut param, 0.25);
        // Long after the only ramp, the value has settled at vol * scale.
        assert!((param.value_at(1.0) - 0.25).abs() < 1e-3);
    }

    #[test]
    fn reschedule_cancels_pending_segments() {
        let env = vec![pt(0.0, 1.0), pt(500.0, 0.2)];
        let mut param = AutomationParam::new(0.0);
        schedule_gain_envelope(&env, EnvelopeKind::Attack, 0.0, &mut param, 1.0);
        let before = param.events().len();
        schedule_gain_envelope(&env, EnvelopeKind::Attack, 0.0, &mut param, 1.0);
        assert_eq!(param.events().len(), before, "old segments replaced, not stacked");
    }
}
