// Detection Module
// Provenance detection core logic organized into specialized submodules:
// - lexical_patterns: Counts lexicon category triggers per 1k words
// - fingerprint: Scores generator phrase fingerprints and attributes a generator
// - statistics: Burstiness, lexical diversity, passive voice and rare-word profile
// - document_scorer: Heuristic battery shared by document, sentence and section scoring
// - sentence_classifier: Per-sentence scoring and flagged fraction
// - section_aggregator: Per-section scoring and attribution
// - baseline: Document-type baseline correction
// - consensus: Combines signals into the reported result
// - pipeline: Runs detectors concurrently, sequentially or in batches

pub mod lexical_patterns;
pub mod fingerprint;
pub mod statistics;
pub mod document_scorer;
pub mod sentence_classifier;
pub mod section_aggregator;
pub mod baseline;
pub mod consensus;
pub mod pipeline;

// Re-export commonly used functions
pub use lexical_patterns::{count_patterns, density_score, lexical_signal};
pub use fingerprint::{attribute, fingerprint_report, fingerprint_signal, score_generators};
pub use statistics::{moving_average_ttr, profile_text, statistical_signal};
pub use document_scorer::{document_signal, score_text, score_with_evidence, BatteryScore};
pub use sentence_classifier::{classify_sentences, sentence_signal};
pub use section_aggregator::{aggregate_sections, section_signal, SectionSettings};
pub use baseline::{compute_adjustment, resolve_document_type};
pub use consensus::{confidence_tier, verdict_for, ConsensusBuilder, ConsensusContext, ConsensusState};
pub use pipeline::{summarize_batch, Analyzer, BatchInput};
