use std::collections::HashMap;

use crate::audio::node::{ConnectTarget, FilterKind, NodeId, NodeKind, ParamKind, Waveform};
use crate::audio::param::AutomationParam;

/// Lifecycle state of the clock. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Suspended,
    Closed,
}

struct NodeEntry {
    kind: NodeKind,
    output: Option<ConnectTarget>,
}

/// The real-time clock and sink: owns the node graph, advances time as
/// audio is rendered, and hands out automatable parameters.
///
/// New contexts start `Running`. Rendering while suspended produces
/// silence and does not advance the clock.
pub struct Context {
    sample_rate: f32,
    state: ContextState,
    time: f64,
    nodes: Vec<Option<NodeEntry>>,
    free_slots: Vec<usize>,
    destination: NodeId,
    resume_blocked: bool,
}

impl Context {
    pub fn new(sample_rate: f32) -> Self {
        let mut ctx = Self {
            sample_rate,
            state: ContextState::Running,
            time: 0.0,
            nodes: Vec::new(),
            free_slots: Vec::new(),
            destination: NodeId(0),
            resume_blocked: false,
        };
        ctx.destination = ctx.add_node(NodeKind::Destination);
        ctx
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// The shared output sink every audible chain ends at.
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Seconds since creation, counting only rendered (or advanced) time.
    pub fn current_time(&self) -> f64 {
        self.time
    }

    pub fn suspend(&mut self) {
        if self.state == ContextState::Running {
            self.state = ContextState::Suspended;
        }
    }

    /// Attempt to restart a suspended clock. Returns whether the context is
    /// running afterwards.
    pub fn resume(&mut self) -> bool {
        if self.state == ContextState::Suspended && !self.resume_blocked {
            self.state = ContextState::Running;
        }
        self.state == ContextState::Running
    }

    pub fn close(&mut self) {
        self.state = ContextState::Closed;
    }

    /// Test hook: make `resume` fail, simulating a platform that refuses to
    /// unsuspend the clock.
    pub fn set_resume_blocked(&mut self, blocked: bool) {
        self.resume_blocked = blocked;
    }

    /// Advance the clock without rendering. No-op unless running.
    pub fn advance(&mut self, seconds: f64) {
        if self.state == ContextState::Running {
            self.time += seconds;
        }
    }

    pub fn create_gain(&mut self, gain: f32) -> NodeId {
        self.add_node(NodeKind::Gain {
            gain: AutomationParam::new(gain),
        })
    }

    pub fn create_oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f32,
        detune_cents: f32,
    ) -> NodeId {
        self.add_node(NodeKind::oscillator(waveform, frequency, detune_cents))
    }

    /// A looping buffer of uniform noise in [-0.6, 0.6], two seconds long.
    pub fn create_noise_buffer(&mut self) -> NodeId {
        let sample_rate = self.sample_rate;
        self.add_node(NodeKind::noise(sample_rate))
    }

    pub fn create_filter(&mut self, kind: FilterKind, frequency: f32, q: f32) -> NodeId {
        let sample_rate = self.sample_rate;
        self.add_node(NodeKind::filter(kind, frequency, q, sample_rate))
    }

    /// Route `node`'s output. Each node has at most one output; connecting
    /// again replaces the previous route. Fan-in is unlimited.
    pub fn connect(&mut self, node: NodeId, target: ConnectTarget) {
        if let Some(entry) = self.entry_mut(node) {
            entry.output = Some(target);
        }
    }

    pub fn disconnect(&mut self, node: NodeId) {
        if let Some(entry) = self.entry_mut(node) {
            entry.output = None;
        }
    }

    pub fn connection_of(&self, node: NodeId) -> Option<ConnectTarget> {
        self.entry(node).and_then(|e| e.output)
    }

    pub fn param(&self, node: NodeId, kind: ParamKind) -> Option<&AutomationParam> {
        self.entry(node).and_then(|e| e.kind.param(kind))
    }

    pub fn param_mut(&mut self, node: NodeId, kind: ParamKind) -> Option<&mut AutomationParam> {
        self.entry_mut(node).and_then(|e| e.kind.param_mut(kind))
    }

    /// Start a source node. Sources start once; repeated calls are no-ops.
    pub fn start_source(&mut self, node: NodeId) {
        if let Some(entry) = self.entry_mut(node) {
            entry.kind.start();
        }
    }

    /// Schedule a source to go silent at `time`. Terminal: the first stop
    /// wins and the source cannot be restarted.
    pub fn stop_source_at(&mut self, node: NodeId, time: f64) {
        if let Some(entry) = self.entry_mut(node) {
            entry.kind.stop_at(time);
        }
    }

    /// Remove a node from the graph. Anything still routed at it renders
    /// into the void.
    pub fn remove_node(&mut self, node: NodeId) {
        if node == self.destination {
            return;
        }
        if let Some(slot) = self.nodes.get_mut(node.0) {
            if slot.take().is_some() {
                self.free_slots.push(node.0);
            }
        }
    }

    /// Number of live nodes, including the destination.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Render one block of mono audio from the graph into `out`, advancing
    /// the clock by `out.len()` frames. A suspended or closed context
    /// renders silence and keeps the clock still.
    pub fn render_block(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        if self.state != ContextState::Running || out.is_empty() {
            return;
        }
        let frames = out.len();
        let block_start = self.time;

        let live: Vec<usize> = (0..self.nodes.len())
            .filter(|&ix| self.nodes[ix].is_some())
            .collect();

        // Summed node inputs and per-param modulation inputs.
        let mut inputs: HashMap<usize, Vec<f32>> = HashMap::new();
        let mut param_mods: HashMap<(usize, ParamKind), Vec<f32>> = HashMap::new();
        let mut outputs: HashMap<usize, Vec<f32>> = HashMap::new();

        // Producers feed consumers, so process a node only once everything
        // routed into it (or into its params) has rendered. The graph is
        // acyclic in practice; if a cycle sneaks in, the remaining nodes
        // render with silent inputs rather than hanging.
        let mut pending: Vec<usize> = live.clone();
        while !pending.is_empty() {
            let ready_ix = pending.iter().position(|&ix| {
                !live.iter().any(|&other| {
                    other != ix
                        && outputs.get(&other).is_none()
                        && pending.contains(&other)
                        && self.targets_node(other, ix)
                })
            });
            let ix = match ready_ix {
                Some(p) => pending.remove(p),
                // Cycle: break it by taking the first pending node as-is.
                None => pending.remove(0),
            };
            self.process_node(
                ix,
                frames,
                block_start,
                &mut inputs,
                &mut param_mods,
                &mut outputs,
            );
        }

        if let Some(rendered) = outputs.get(&self.destination.0) {
            out.copy_from_slice(rendered);
        }
        self.time += frames as f64 / self.sample_rate as f64;
    }

    fn process_node(
        &mut self,
        ix: usize,
        frames: usize,
        block_start: f64,
        inputs: &mut HashMap<usize, Vec<f32>>,
        param_mods: &mut HashMap<(usize, ParamKind), Vec<f32>>,
        outputs: &mut HashMap<usize, Vec<f32>>,
    ) {
        let input = inputs.remove(&ix).unwrap_or_else(|| vec![0.0; frames]);
        let detune_mod = param_mods.remove(&(ix, ParamKind::Detune));
        let mut rendered = vec![0.0; frames];
        let output = {
            let entry = match self.nodes[ix].as_mut() {
                Some(entry) => entry,
                None => return,
            };
            entry.kind.process(
                &input,
                detune_mod.as_deref(),
                &mut rendered,
                block_start,
                self.sample_rate,
            );
            entry.output
        };
        match output {
            Some(ConnectTarget::Node(target)) => {
                let sink = inputs.entry(target.0).or_insert_with(|| vec![0.0; frames]);
                for (s, r) in sink.iter_mut().zip(&rendered) {
                    *s += r;
                }
            }
            Some(ConnectTarget::Param(target, kind)) => {
                let sink = param_mods
                    .entry((target.0, kind))
                    .or_insert_with(|| vec![0.0; frames]);
                for (s, r) in sink.iter_mut().zip(&rendered) {
                    *s += r;
                }
            }
            None => {}
        }
        outputs.insert(ix, rendered);
    }

    fn targets_node(&self, producer: usize, consumer: usize) -> bool {
        match self.nodes[producer].as_ref().and_then(|e| e.output) {
            Some(ConnectTarget::Node(n)) => n.0 == consumer,
            Some(ConnectTarget::Param(n, _)) => n.0 == consumer,
            None => false,
        }
    }

    fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let entry = NodeEntry { kind, output: None };
        if let Some(slot) = self.free_slots.pop() {
            self.nodes[slot] = Some(entry);
            NodeId(slot)
        } else {
            self.nodes.push(Some(entry));
            NodeId(self.nodes.len() - 1)
        }
    }

    fn entry(&self, node: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(node.0).and_then(|slot| slot.as_ref())
    }

    fn entry_mut(&mut self, node: NodeId) -> Option<&mut NodeEntry> {
        self.nodes.get_mut(node.0).and_then(|slot| slot.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_context() -> Context {
        Context::new(48_000.0)
    }

    #[test]
    fn lifecycle_suspend_resume_close() {
        let mut ctx = running_context();
        assert_eq!(ctx.state(), ContextState::Running);

        ctx.suspend();
        assert_eq!(ctx.state(), ContextState::Suspended);
        assert!(ctx.resume());
        assert_eq!(ctx.state(), ContextState::Running);

        ctx.close();
        assert_eq!(ctx.state(), ContextState::Closed);
        assert!(!ctx.resume(), "closed is terminal");
    }

    #[test]
    fn blocked_resume_stays_suspended() {
        let mut ctx = running_context();
        ctx.suspend();
        ctx.set_resume_blocked(true);
        assert!(!ctx.resume());
        assert_eq!(ctx.state(), ContextState::Suspended);

        ctx.set_resume_blocked(false);
        assert!(ctx.resume());
    }

    #[test]
    fn suspended_render_is_silent_and_freezes_time() {
        let mut ctx = running_context();
        let osc = ctx.create_oscillator(Waveform::Sine, 440.0, 0.0);
        ctx.connect(osc, ConnectTarget::Node(ctx.destination()));
        ctx.start_source(osc);
        ctx.suspend();

        let mut out = vec![0.0; 128];
        ctx.render_block(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(ctx.current_time(), 0.0);
    }

    #[test]
    fn oscillator_reaches_destination_through_gain() {
        let mut ctx = running_context();
        let osc = ctx.create_oscillator(Waveform::Sine, 440.0, 0.0);
        let gain = ctx.create_gain(0.5);
        ctx.connect(osc, ConnectTarget::Node(gain));
        ctx.connect(gain, ConnectTarget::Node(ctx.destination()));
        ctx.start_source(osc);

        let mut out = vec![0.0; 256];
        ctx.render_block(&mut out);
        let peak = out.iter().fold(0.0f32, |a, &s| a.max(s.abs()));
        assert!(peak > 0.3 && peak <= 0.5, "gain should scale output, peak {peak}");
        assert!((ctx.current_time() - 256.0 / 48_000.0).abs() < 1e-9);
    }

    #[test]
    fn param_connection_modulates_detune() {
        let mut ctx = running_context();
        let carrier = ctx.create_oscillator(Waveform::Sine, 440.0, 0.0);
        let modulator = ctx.create_oscillator(Waveform::Sine, 5.0, 0.0);
        ctx.connect(carrier, ConnectTarget::Node(ctx.destination()));
        ctx.connect(modulator, ConnectTarget::Param(carrier, ParamKind::Detune));
        ctx.start_source(carrier);
        ctx.start_source(modulator);

        let mut plain = vec![0.0; 512];
        let mut ctx2 = running_context();
        let osc2 = ctx2.create_oscillator(Waveform::Sine, 440.0, 0.0);
        ctx2.connect(osc2, ConnectTarget::Node(ctx2.destination()));
        ctx2.start_source(osc2);
        ctx2.render_block(&mut plain);

        let mut modulated = vec![0.0; 512];
        ctx.render_block(&mut modulated);
        assert_ne!(plain, modulated, "modulated signal should differ");
    }

    #[test]
    fn removed_node_frees_slot_for_reuse() {
        let mut ctx = running_context();
        let gain = ctx.create_gain(1.0);
        assert_eq!(ctx.node_count(), 2);

        ctx.remove_node(gain);
        assert_eq!(ctx.node_count(), 1);

        let again = ctx.create_gain(1.0);
        assert_eq!(again, gain, "slot should be reused");
    }

    #[test]
    fn destination_cannot_be_removed() {
        let mut ctx = running_context();
        ctx.remove_node(ctx.destination());
        assert_eq!(ctx.node_count(), 1);
    }

    #[test]
    fn stopped_source_goes_silent_at_its_time() {
        let mut ctx = running_context();
        let osc = ctx.create_oscillator(Waveform::Square, 100.0, 0.0);
        ctx.connect(osc, ConnectTarget::Node(ctx.destination()));
        ctx.start_source(osc);
        ctx.stop_source_at(osc, 128.0 / 48_000.0);

        let mut out = vec![0.0; 256];
        ctx.render_block(&mut out);
        assert!(out[..128].iter().any(|&s| s != 0.0));
        assert!(out[128..].iter().all(|&s| s == 0.0));
    }
}
