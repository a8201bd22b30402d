/*
Parameter Automation
====================

Every automatable value in the graph (gain, oscillator frequency, detune,
filter cutoff) is an AutomationParam: a base value plus an ordered list of
scheduled events. Three primitives cover everything the synth layer needs:

  set_value_at_time(v, t)        Hold v from time t onward.
  set_target_at_time(v, t, tc)   Approach v exponentially from time t with
                                 time constant tc. Never quite arrives, so
                                 callers follow it with a set_value snap.
  cancel_scheduled_values(t)     Drop events scheduled at or after t.
                                 Segments committed before t are preserved,
                                 including a target ramp already in flight.

Evaluation walks the events in order, carrying the value reached at each
event boundary so an exponential segment starts exactly where the previous
segment left off. Calls at the same timestamp apply in call order: the last
schedule wins for future time.
*/

/// One scheduled automation event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AutomationEvent {
    /// Hold `value` from `time` onward.
    SetValue { time: f64, value: f32 },
    /// Approach `target` exponentially from `time` with `time_constant`.
    SetTarget {
        time: f64,
        target: f32,
        time_constant: f64,
    },
}

impl AutomationEvent {
    pub fn time(&self) -> f64 {
        match *self {
            AutomationEvent::SetValue { time, .. } => time,
            AutomationEvent::SetTarget { time, .. } => time,
        }
    }
}

/// An automatable numeric value with a schedule of future changes.
#[derive(Debug, Clone)]
pub struct AutomationParam {
    base: f32,
    events: Vec<AutomationEvent>,
}

/// The value curve in effect after some event boundary.
#[derive(Debug, Clone, Copy)]
enum Segment {
    Constant(f32),
    Exponential {
        start_value: f32,
        target: f32,
        time_constant: f64,
    },
}

impl Segment {
    fn eval(&self, start_time: f64, time: f64) -> f32 {
        match *self {
            Segment::Constant(v) => v,
            Segment::Exponential {
                start_value,
                target,
                time_constant,
            } => {
                if time_constant <= 0.0 {
                    return target;
                }
                let decay = (-(time - start_time) / time_constant).exp();
                target + (start_value - target) * decay as f32
            }
        }
    }
}

impl AutomationParam {
    pub fn new(base: f32) -> Self {
        Self {
            base,
            events: Vec::new(),
        }
    }

    /// Schedule an instantaneous assignment at `time`.
    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(AutomationEvent::SetValue { time, value });
    }

    /// Schedule an exponential approach toward `target` starting at `time`.
    pub fn set_target_at_time(&mut self, target: f32, time: f64, time_constant: f64) {
        self.insert(AutomationEvent::SetTarget {
            time,
            target,
            time_constant,
        });
    }

    /// Remove every event scheduled at or after `time`. An exponential
    /// approach started before `time` keeps running.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|ev| ev.time() < time);
    }

    /// Evaluate the parameter at `time`.
    pub fn value_at(&self, time: f64) -> f32 {
        let mut segment = Segment::Constant(self.base);
        let mut segment_start = 0.0;
        for ev in &self.events {
            if ev.time() > time {
                break;
            }
            let reached = segment.eval(segment_start, ev.time());
            segment = match *ev {
                AutomationEvent::SetValue { value, .. } => Segment::Constant(value),
                AutomationEvent::SetTarget {
                    target,
                    time_constant,
                    ..
                } => Segment::Exponential {
                    start_value: reached,
                    target,
                    time_constant,
                },
            };
            segment_start = ev.time();
        }
        segment.eval(segment_start, time)
    }

    /// Scheduled events, time-ascending. Events at equal times keep call
    /// order.
    pub fn events(&self) -> &[AutomationEvent] {
        &self.events
    }

    fn insert(&mut self, event: AutomationEvent) {
        // Stable position: after every event with time <= this one.
        let ix = self
            .events
            .iter()
            .rposition(|ev| ev.time() <= event.time())
            .map(|p| p + 1)
            .unwrap_or(0);
        self.events.insert(ix, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_value_without_events() {
        let param = AutomationParam::new(0.5);
        assert_eq!(param.value_at(0.0), 0.5);
        assert_eq!(param.value_at(100.0), 0.5);
    }

    #[test]
    fn set_value_holds_from_its_time() {
        let mut param = AutomationParam::new(0.0);
        param.set_value_at_time(1.0, 2.0);
        assert_eq!(param.value_at(1.999), 0.0);
        assert_eq!(param.value_at(2.0), 1.0);
        assert_eq!(param.value_at(10.0), 1.0);
    }

    #[test]
    fn target_approaches_exponentially() {
        let mut param = AutomationParam::new(0.0);
        param.set_target_at_time(1.0, 0.0, 0.1);

        let one_tc = param.value_at(0.1);
        assert!((one_tc - 0.632).abs() < 0.01, "got {one_tc}");
        assert!(param.value_at(1.0) > 0.99);
        assert!(param.value_at(1.0) < 1.0, "pure approach never arrives");
    }

    #[test]
    fn snap_after_target_gives_exact_value() {
        let mut param = AutomationParam::new(0.0);
        param.set_target_at_time(1.0, 0.0, 0.002);
        param.set_value_at_time(1.0, 0.007);
        assert_eq!(param.value_at(0.007), 1.0);
        assert_eq!(param.value_at(5.0), 1.0);
    }

    #[test]
    fn cancel_preserves_committed_segments() {
        let mut param = AutomationParam::new(0.0);
        param.set_value_at_time(0.4, 1.0);
        param.set_value_at_time(0.8, 2.0);
        param.cancel_scheduled_values(1.5);

        assert_eq!(param.value_at(1.2), 0.4);
        assert_eq!(param.value_at(3.0), 0.4, "cancelled event must not apply");
    }

    #[test]
    fn cancel_keeps_ramp_in_flight() {
        let mut param = AutomationParam::new(0.0);
        param.set_target_at_time(1.0, 0.0, 0.5);
        param.cancel_scheduled_values(0.1);
        assert!(param.value_at(2.0) > 0.9, "running approach continues");
    }

    #[test]
    fn later_call_wins_at_equal_time() {
        let mut param = AutomationParam::new(0.0);
        param.set_value_at_time(0.3, 1.0);
        param.set_value_at_time(0.9, 1.0);
        assert_eq!(param.value_at(1.0), 0.9);
    }

    #[test]
    fn exponential_starts_from_previous_segment_value() {
        let mut param = AutomationParam::new(0.0);
        param.set_value_at_time(1.0, 0.0);
        param.set_target_at_time(0.0, 1.0, 0.25);
        // At one time constant past the start, ~36.8% remains.
        let v = param.value_at(1.25);
        assert!((v - 0.368).abs() < 0.01, "got {v}");
    }
}
