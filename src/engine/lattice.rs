//! Word lattices produced by decoding engines.
//!
//! A lattice is an acyclic weighted graph whose states are numbered in
//! topological order (every arc leads to a higher-numbered state) and whose
//! arcs carry one word each. Every state sits at a single frame offset, so
//! each arc spans a well-defined `[start, end)` frame interval no matter
//! which path reaches it.

use crate::error::{Result, VoxgateError};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// Index into a symbol table. `EPSILON` marks arcs that emit no word.
pub type WordId = u32;

/// Index of a lattice state. State 0 is the start state.
pub type StateId = usize;

/// Word id of non-word arcs (silence, noise, structural epsilons).
pub const EPSILON: WordId = 0;

/// Upper bound on search-queue pops in n-best extraction.
const MAX_NBEST_EXPANSIONS: usize = 200_000;

/// Two-component arc cost: graph (language model) and acoustic.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatticeWeight {
    pub graph: f32,
    pub acoustic: f32,
}

impl LatticeWeight {
    pub fn new(graph: f32, acoustic: f32) -> Self {
        Self { graph, acoustic }
    }

    /// Combined cost under the given scaling.
    pub fn cost(&self, scale: ScoreScale) -> f64 {
        scale.lm as f64 * self.graph as f64 + scale.acoustic as f64 * self.acoustic as f64
    }

    fn times(self, other: LatticeWeight) -> LatticeWeight {
        LatticeWeight::new(self.graph + other.graph, self.acoustic + other.acoustic)
    }
}

/// Scaling factors applied to the two weight components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreScale {
    pub lm: f32,
    pub acoustic: f32,
}

impl Default for ScoreScale {
    fn default() -> Self {
        Self {
            lm: 1.0,
            acoustic: 1.0,
        }
    }
}

/// Outgoing arc of a lattice state.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticeArc {
    pub word: WordId,
    pub weight: LatticeWeight,
    /// Duration of the arc in frames.
    pub frames: u32,
    pub next: StateId,
}

impl LatticeArc {
    pub fn new(word: WordId, weight: LatticeWeight, frames: u32, next: StateId) -> Self {
        Self {
            word,
            weight,
            frames,
            next,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct LatticeState {
    arcs: Vec<LatticeArc>,
    final_weight: Option<LatticeWeight>,
}

/// Incrementally assembles a [`Lattice`] and validates it on `build`.
#[derive(Debug, Default)]
pub struct LatticeBuilder {
    states: Vec<LatticeState>,
}

impl LatticeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_state(&mut self) -> StateId {
        self.states.push(LatticeState::default());
        self.states.len() - 1
    }

    pub fn add_arc(&mut self, from: StateId, arc: LatticeArc) -> &mut Self {
        if let Some(state) = self.states.get_mut(from) {
            state.arcs.push(arc);
        } else {
            // Recorded so that build() reports it.
            self.states.resize_with(from + 1, LatticeState::default);
            self.states[from].arcs.push(arc);
        }
        self
    }

    pub fn set_final(&mut self, state: StateId, weight: LatticeWeight) -> &mut Self {
        if state >= self.states.len() {
            self.states.resize_with(state + 1, LatticeState::default);
        }
        self.states[state].final_weight = Some(weight);
        self
    }

    /// Validate topology and frame consistency.
    pub fn build(self) -> Result<Lattice> {
        let n = self.states.len();
        let mut times: Vec<Option<u32>> = vec![None; n];
        if n > 0 {
            times[0] = Some(0);
        }

        for (from, state) in self.states.iter().enumerate() {
            for arc in &state.arcs {
                if arc.next <= from || arc.next >= n {
                    return Err(VoxgateError::Lattice {
                        message: format!(
                            "arc {} -> {} breaks topological state order",
                            from, arc.next
                        ),
                    });
                }
                let Some(start) = times[from] else {
                    continue;
                };
                let end = start + arc.frames;
                match times[arc.next] {
                    None => times[arc.next] = Some(end),
                    Some(existing) if existing != end => {
                        return Err(VoxgateError::Lattice {
                            message: format!(
                                "state {} reached at frames {} and {}",
                                arc.next, existing, end
                            ),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Lattice {
            states: self.states,
            times: times.into_iter().map(|t| t.unwrap_or(0)).collect(),
        })
    }
}

/// Weighted word lattice for one utterance.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lattice {
    states: Vec<LatticeState>,
    times: Vec<u32>,
}

/// One arc of an extracted path, with its time span.
#[derive(Debug, Clone, PartialEq)]
pub struct PathArc {
    pub word: WordId,
    pub weight: LatticeWeight,
    pub start_frame: u32,
    pub end_frame: u32,
}

/// A complete start-to-final path through a lattice.
#[derive(Debug, Clone, PartialEq)]
pub struct LatticePath {
    pub arcs: Vec<PathArc>,
    /// Sum of arc weights plus the final weight.
    pub weight: LatticeWeight,
    /// Scaled cost the path was ranked by.
    pub cost: f64,
}

impl LatticePath {
    /// Word ids along the path, epsilons removed.
    pub fn words(&self) -> Vec<WordId> {
        self.arcs
            .iter()
            .filter(|a| a.word != EPSILON)
            .map(|a| a.word)
            .collect()
    }
}

impl Lattice {
    /// A lattice with no states (no hypothesis at all).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Straight-line lattice: one arc per `(word, weight, frames)` triple.
    pub fn linear(arcs: &[(WordId, LatticeWeight, u32)]) -> Self {
        let mut builder = LatticeBuilder::new();
        let mut current = builder.add_state();
        for &(word, weight, frames) in arcs {
            let next = builder.add_state();
            builder.add_arc(current, LatticeArc::new(word, weight, frames, next));
            current = next;
        }
        builder.set_final(current, LatticeWeight::default());
        // A chain is topologically ordered and frame-consistent by construction.
        builder.build().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// Frame offset of a state.
    pub fn state_time(&self, state: StateId) -> Option<u32> {
        self.times.get(state).copied()
    }

    pub fn arcs(&self, state: StateId) -> &[LatticeArc] {
        self.states
            .get(state)
            .map(|s| s.arcs.as_slice())
            .unwrap_or(&[])
    }

    pub fn final_weight(&self, state: StateId) -> Option<LatticeWeight> {
        self.states.get(state).and_then(|s| s.final_weight)
    }

    /// Lowest-cost path. Ties keep the first path found in state/arc order.
    pub fn shortest_path(&self, scale: ScoreScale) -> Option<LatticePath> {
        let n = self.states.len();
        if n == 0 {
            return None;
        }

        let mut best = vec![f64::INFINITY; n];
        let mut back: Vec<Option<(StateId, usize)>> = vec![None; n];
        best[0] = 0.0;

        for s in 0..n {
            if best[s].is_infinite() {
                continue;
            }
            for (i, arc) in self.states[s].arcs.iter().enumerate() {
                let cost = best[s] + arc.weight.cost(scale);
                if cost < best[arc.next] {
                    best[arc.next] = cost;
                    back[arc.next] = Some((s, i));
                }
            }
        }

        let mut end: Option<(StateId, f64)> = None;
        for (s, state) in self.states.iter().enumerate() {
            if let Some(fw) = state.final_weight
                && best[s].is_finite()
            {
                let total = best[s] + fw.cost(scale);
                if end.is_none_or(|(_, c)| total < c) {
                    end = Some((s, total));
                }
            }
        }
        let (last, cost) = end?;

        let mut trace = Vec::new();
        let mut s = last;
        while let Some((prev, i)) = back[s] {
            trace.push((prev, i));
            s = prev;
        }
        trace.reverse();

        Some(self.make_path(&trace, last, cost))
    }

    /// Up to `n` lowest-cost paths, best first.
    ///
    /// Paths are distinct arc sequences; two paths may carry the same words.
    /// Equal-cost paths come out in the order the search discovers them.
    pub fn n_best(&self, n: usize, scale: ScoreScale) -> Vec<LatticePath> {
        if n == 0 || self.states.is_empty() {
            return Vec::new();
        }
        if n == 1 {
            return self.shortest_path(scale).into_iter().collect();
        }

        let to_end = self.best_cost_to_end(scale);
        if to_end[0].is_infinite() {
            return Vec::new();
        }

        let mut heap = BinaryHeap::new();
        let mut seq = 0u64;
        heap.push(Candidate {
            estimate: to_end[0],
            seq,
            cost: 0.0,
            state: 0,
            complete: false,
            trace: Vec::new(),
        });

        let mut paths = Vec::with_capacity(n);
        let mut expansions = 0usize;
        while let Some(candidate) = heap.pop() {
            if candidate.complete {
                paths.push(self.make_path(&candidate.trace, candidate.state, candidate.cost));
                if paths.len() == n {
                    break;
                }
                continue;
            }

            expansions += 1;
            if expansions > MAX_NBEST_EXPANSIONS {
                break;
            }

            let s = candidate.state;
            if let Some(fw) = self.states[s].final_weight {
                let cost = candidate.cost + fw.cost(scale);
                seq += 1;
                heap.push(Candidate {
                    estimate: cost,
                    seq,
                    cost,
                    state: s,
                    complete: true,
                    trace: candidate.trace.clone(),
                });
            }
            for (i, arc) in self.states[s].arcs.iter().enumerate() {
                if to_end[arc.next].is_infinite() {
                    continue;
                }
                let cost = candidate.cost + arc.weight.cost(scale);
                let mut trace = candidate.trace.clone();
                trace.push((s, i));
                seq += 1;
                heap.push(Candidate {
                    estimate: cost + to_end[arc.next],
                    seq,
                    cost,
                    state: arc.next,
                    complete: false,
                    trace,
                });
            }
        }

        paths
    }

    /// Forward-backward arc posteriors. `None` when no path reaches a final state.
    pub fn posteriors(&self, scale: ScoreScale) -> Option<Posteriors> {
        let n = self.states.len();
        if n == 0 {
            return None;
        }

        let mut alpha = vec![f64::NEG_INFINITY; n];
        alpha[0] = 0.0;
        for s in 0..n {
            if alpha[s] == f64::NEG_INFINITY {
                continue;
            }
            for arc in &self.states[s].arcs {
                alpha[arc.next] = log_add(alpha[arc.next], alpha[s] - arc.weight.cost(scale));
            }
        }

        let mut beta = vec![f64::NEG_INFINITY; n];
        for s in (0..n).rev() {
            let mut acc = self.states[s]
                .final_weight
                .map(|fw| -fw.cost(scale))
                .unwrap_or(f64::NEG_INFINITY);
            for arc in &self.states[s].arcs {
                acc = log_add(acc, beta[arc.next] - arc.weight.cost(scale));
            }
            beta[s] = acc;
        }

        let total = beta[0];
        if total == f64::NEG_INFINITY {
            return None;
        }

        let mut spans = Vec::new();
        for (s, state) in self.states.iter().enumerate() {
            if alpha[s] == f64::NEG_INFINITY {
                continue;
            }
            for arc in &state.arcs {
                let log_post = alpha[s] - arc.weight.cost(scale) + beta[arc.next] - total;
                let posterior = log_post.exp().min(1.0);
                if posterior > 0.0 {
                    spans.push(ArcSpan {
                        word: arc.word,
                        start_frame: self.times[s],
                        end_frame: self.times[arc.next],
                        posterior,
                    });
                }
            }
        }

        Some(Posteriors {
            log_total: total,
            spans,
        })
    }

    fn best_cost_to_end(&self, scale: ScoreScale) -> Vec<f64> {
        let n = self.states.len();
        let mut to_end = vec![f64::INFINITY; n];
        for s in (0..n).rev() {
            let mut best = self.states[s]
                .final_weight
                .map(|fw| fw.cost(scale))
                .unwrap_or(f64::INFINITY);
            for arc in &self.states[s].arcs {
                best = best.min(arc.weight.cost(scale) + to_end[arc.next]);
            }
            to_end[s] = best;
        }
        to_end
    }

    fn make_path(&self, trace: &[(StateId, usize)], last: StateId, cost: f64) -> LatticePath {
        let mut weight = LatticeWeight::default();
        let mut arcs = Vec::with_capacity(trace.len());
        for &(s, i) in trace {
            let arc = &self.states[s].arcs[i];
            weight = weight.times(arc.weight);
            arcs.push(PathArc {
                word: arc.word,
                weight: arc.weight,
                start_frame: self.times[s],
                end_frame: self.times[arc.next],
            });
        }
        if let Some(fw) = self.states[last].final_weight {
            weight = weight.times(fw);
        }
        LatticePath {
            arcs,
            weight,
            cost,
        }
    }
}

/// Arc posteriors of a lattice, with arc time spans.
#[derive(Debug, Clone)]
pub struct Posteriors {
    /// Log of the summed probability of all complete paths.
    log_total: f64,
    spans: Vec<ArcSpan>,
}

#[derive(Debug, Clone, Copy)]
struct ArcSpan {
    word: WordId,
    start_frame: u32,
    end_frame: u32,
    posterior: f64,
}

impl Posteriors {
    /// Posterior probability of a single path.
    pub fn path_posterior(&self, path: &LatticePath) -> f64 {
        (-path.cost - self.log_total).exp().clamp(0.0, 1.0)
    }

    /// Posterior mass of every word whose arcs cover `frame`.
    ///
    /// Mass not covered by any arc (paths that already ended) is reported
    /// under `EPSILON` together with the epsilon arcs. Words come out in id
    /// order.
    pub fn words_at(&self, frame: u32) -> BTreeMap<WordId, f64> {
        let mut mass: BTreeMap<WordId, f64> = BTreeMap::new();
        let mut covered = 0.0;
        for span in &self.spans {
            if span.start_frame <= frame && frame < span.end_frame {
                *mass.entry(span.word).or_insert(0.0) += span.posterior;
                covered += span.posterior;
            }
        }
        let rest = (1.0 - covered).max(0.0);
        if rest > 0.0 {
            *mass.entry(EPSILON).or_insert(0.0) += rest;
        }
        mass
    }
}

#[derive(Debug)]
struct Candidate {
    estimate: f64,
    seq: u64,
    cost: f64,
    state: StateId,
    complete: bool,
    trace: Vec<(StateId, usize)>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    // BinaryHeap is a max-heap: invert so the cheapest, earliest candidate pops first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .estimate
            .total_cmp(&self.estimate)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

fn log_add(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    hi + (lo - hi).exp().ln_1p()
}
