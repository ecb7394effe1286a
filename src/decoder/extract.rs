//! Turning lattices into ranked, scored transcripts.

use crate::engine::lattice::{EPSILON, Lattice, LatticePath, PathArc, Posteriors, ScoreScale, WordId};
use crate::engine::symbols::SymbolTable;
use crate::response::{RecognitionResult, WordInfo};
use tracing::warn;

/// Per-word confidences below `threshold` are replaced by `default`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceFloor {
    pub threshold: f32,
    pub default: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractOptions {
    pub scale: ScoreScale,
    /// Report per-word timing and confidence for n-best results.
    pub word_alignment: bool,
    pub confidence_floor: Option<ConfidenceFloor>,
    /// Seconds per lattice frame.
    pub frame_shift_secs: f32,
}

/// Shortest-path snapshot used for intermediate replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub words: Vec<WordId>,
    pub text: String,
}

/// Extracts results from lattices using a shared symbol table.
pub struct ResultExtractor<'a> {
    symbols: &'a SymbolTable,
    options: ExtractOptions,
}

impl<'a> ResultExtractor<'a> {
    pub fn new(symbols: &'a SymbolTable, options: ExtractOptions) -> Self {
        Self { symbols, options }
    }

    /// Best path as plain text, or `None` when the lattice has no path.
    pub fn intermediate(&self, lattice: &Lattice) -> Option<Snapshot> {
        let path = lattice.shortest_path(self.options.scale)?;
        let words = path.words();
        let text = self.join(&words);
        Some(Snapshot { words, text })
    }

    /// Final results, best first. Empty when the lattice has no path.
    pub fn final_results(&self, lattice: &Lattice, nbest: u32) -> Vec<RecognitionResult> {
        if nbest <= 1 {
            self.minimum_risk(lattice).into_iter().collect()
        } else {
            self.n_best(lattice, nbest as usize)
        }
    }

    /// Single best result with per-word posterior confidences.
    fn minimum_risk(&self, lattice: &Lattice) -> Option<RecognitionResult> {
        let best = lattice.shortest_path(self.options.scale)?;
        let Some(posteriors) = lattice.posteriors(self.options.scale) else {
            return Some(self.unscored(&best));
        };

        let mut words = Vec::new();
        for arc in best.arcs.iter().filter(|a| a.word != EPSILON) {
            let mass = posteriors.words_at(midpoint(arc));
            let mut chosen = arc.word;
            let mut confidence = mass.get(&arc.word).copied().unwrap_or(0.0);
            for (&word, &m) in &mass {
                if m > confidence {
                    chosen = word;
                    confidence = m;
                }
            }
            if chosen == EPSILON {
                continue;
            }
            if let Some(info) = self.word_info(chosen, arc, confidence as f32) {
                words.push(info);
            }
        }

        Some(self.assemble(words, None))
    }

    fn n_best(&self, lattice: &Lattice, n: usize) -> Vec<RecognitionResult> {
        let paths = lattice.n_best(n, self.options.scale);
        let posteriors = lattice.posteriors(self.options.scale);

        paths
            .iter()
            .map(|path| {
                let likelihood = Some(-path.cost);
                match (&posteriors, self.options.word_alignment) {
                    (Some(posteriors), true) => {
                        let words = self.aligned_words(path, posteriors);
                        self.assemble(words, likelihood)
                    }
                    (Some(posteriors), false) => RecognitionResult {
                        text: self.join(&path.words()),
                        confidence: posteriors.path_posterior(path) as f32,
                        likelihood,
                        words: Vec::new(),
                    },
                    (None, _) => RecognitionResult {
                        likelihood,
                        ..self.unscored(path)
                    },
                }
            })
            .collect()
    }

    fn aligned_words(&self, path: &LatticePath, posteriors: &Posteriors) -> Vec<WordInfo> {
        path.arcs
            .iter()
            .filter(|a| a.word != EPSILON)
            .filter_map(|arc| {
                let mass = posteriors.words_at(midpoint(arc));
                let confidence = mass.get(&arc.word).copied().unwrap_or(0.0);
                self.word_info(arc.word, arc, confidence as f32)
            })
            .collect()
    }

    fn word_info(&self, word: WordId, arc: &PathArc, confidence: f32) -> Option<WordInfo> {
        let Some(spelling) = self.symbols.find(word) else {
            warn!("Word id {} missing from symbol table", word);
            return None;
        };
        let confidence = match self.options.confidence_floor {
            Some(floor) if confidence < floor.threshold => floor.default,
            _ => confidence,
        };
        let shift = self.options.frame_shift_secs;
        Some(WordInfo {
            word: spelling.to_string(),
            start: arc.start_frame as f32 * shift,
            end: arc.end_frame as f32 * shift,
            confidence,
        })
    }

    fn assemble(&self, words: Vec<WordInfo>, likelihood: Option<f64>) -> RecognitionResult {
        let text = words
            .iter()
            .map(|w| w.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        RecognitionResult {
            text,
            confidence: geometric_mean(words.iter().map(|w| w.confidence)),
            likelihood,
            words,
        }
    }

    fn unscored(&self, path: &LatticePath) -> RecognitionResult {
        RecognitionResult {
            text: self.join(&path.words()),
            confidence: 0.0,
            likelihood: None,
            words: Vec::new(),
        }
    }

    fn join(&self, words: &[WordId]) -> String {
        let mut text = String::new();
        for &id in words {
            match self.symbols.find(id) {
                Some(word) => {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(word);
                }
                None => warn!("Word id {} missing from symbol table", id),
            }
        }
        text
    }
}

fn midpoint(arc: &PathArc) -> u32 {
    arc.start_frame + arc.end_frame.saturating_sub(arc.start_frame) / 2
}

/// `exp(mean(ln c))`, or 0 for an empty sequence.
pub fn geometric_mean(values: impl Iterator<Item = f32>) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;
    for value in values {
        sum += (value.max(f32::MIN_POSITIVE) as f64).ln();
        count += 1;
    }
    if count == 0 {
        0.0
    } else {
        (sum / count as f64).exp() as f32
    }
}
