// CheekAI Provenance Data Models
// Every result type here is produced fresh per analysis run and never mutated afterwards.

use crate::services::text_processor::{detect_section_boundaries, normalize_punctuation, word_count};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============ Document ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Legislation,
    Budget,
    Policy,
    General,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Legislation,
        DocumentType::Budget,
        DocumentType::Policy,
        DocumentType::General,
    ];

    /// Parse a document-type hint. Unknown hints yield `None`.
    pub fn parse(val: &str) -> Option<Self> {
        match val.trim().to_lowercase().as_str() {
            "legislation" | "bill" | "statute" | "act" => Some(Self::Legislation),
            "budget" | "appropriations" | "fiscal" => Some(Self::Budget),
            "policy" | "regulation" | "guidance" => Some(Self::Policy),
            "general" | "" => Some(Self::General),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Legislation => "legislation",
            DocumentType::Budget => "budget",
            DocumentType::Policy => "policy",
            DocumentType::General => "general",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionBoundary {
    pub index: usize,
    /// Heading line text; `None` for the preamble before the first heading.
    pub heading: Option<String>,
    /// UTF-8 byte offset of the heading line.
    pub start: usize,
    /// UTF-8 byte offset of the first byte after the heading line.
    pub body_start: usize,
    /// UTF-8 byte offset, end-exclusive.
    pub end: usize,
}

/// Immutable input document: normalized text, optional declared type and
/// structural section boundaries derived once at construction.
#[derive(Debug, Clone)]
pub struct Document {
    text: String,
    declared_type: Option<DocumentType>,
    sections: Vec<SectionBoundary>,
    word_count: usize,
}

impl Document {
    pub fn new(text: &str, declared_type: Option<DocumentType>) -> Self {
        let text = normalize_punctuation(text);
        let sections = detect_section_boundaries(&text);
        let word_count = word_count(&text);
        Self {
            text,
            declared_type,
            sections,
            word_count,
        }
    }

    /// Build a document from a free-form type hint. Unrecognized hints are
    /// treated as absent so the type is detected from the text instead.
    pub fn with_hint(text: &str, hint: Option<&str>) -> Self {
        let declared = hint.and_then(|h| {
            let parsed = DocumentType::parse(h);
            if parsed.is_none() {
                tracing::warn!("[DOCUMENT] Unknown document type hint {:?}; detecting from text", h);
            }
            parsed
        });
        Self::new(text, declared)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn declared_type(&self) -> Option<DocumentType> {
        self.declared_type
    }

    pub fn sections(&self) -> &[SectionBoundary] {
        &self.sections
    }

    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn section_text(&self, section: &SectionBoundary) -> &str {
        self.text.get(section.body_start..section.end).unwrap_or("")
    }
}

// ============ Signals ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodId {
    LexicalPattern,
    Fingerprint,
    Statistical,
    DocumentLevel,
    SentenceLevel,
    SectionAggregate,
}

impl MethodId {
    pub const ALL: [MethodId; 6] = [
        MethodId::LexicalPattern,
        MethodId::Fingerprint,
        MethodId::Statistical,
        MethodId::DocumentLevel,
        MethodId::SentenceLevel,
        MethodId::SectionAggregate,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MethodId::LexicalPattern => "lexical_pattern",
            MethodId::Fingerprint => "fingerprint",
            MethodId::Statistical => "statistical",
            MethodId::DocumentLevel => "document_level",
            MethodId::SentenceLevel => "sentence_level",
            MethodId::SectionAggregate => "section_aggregate",
        }
    }
}

/// One method's independent AI-likelihood estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSignal {
    pub method: MethodId,
    pub score: f64,
    pub confidence: f64,
    pub evidence: String,
}

impl DetectionSignal {
    /// Scores and confidences are clamped into [0,1]; NaN becomes 0.
    pub fn new(method: MethodId, score: f64, confidence: f64, evidence: impl Into<String>) -> Self {
        Self {
            method,
            score: unit(score),
            confidence: unit(confidence),
            evidence: evidence.into(),
        }
    }
}

pub(crate) fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub(crate) fn round4(value: f64) -> f64 {
    (value * 10000.0).round() / 10000.0
}

// ============ Lexical Patterns ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryCount {
    pub name: String,
    pub count: usize,
    pub weight: f64,
    pub per_1k_words: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LexicalCounts {
    pub word_count: usize,
    /// Categories in declared order.
    pub categories: Vec<CategoryCount>,
    pub total: usize,
    /// Σ weight × count per 1,000 words.
    pub weighted_per_1k: f64,
}

impl LexicalCounts {
    pub fn category(&self, name: &str) -> Option<&CategoryCount> {
        self.categories.iter().find(|c| c.name == name)
    }
}

// ============ Fingerprints & Attribution ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseHit {
    pub phrase: String,
    pub tier: PhraseTier,
    pub occurrences: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorScore {
    pub generator: String,
    pub display_name: String,
    pub score: f64,
    pub matches: usize,
    /// Σ phrase_weight × tier_multiplier × occurrences, before normalization.
    pub weighted_hits: f64,
    pub matched_phrases: Vec<PhraseHit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionCandidate {
    pub generator: String,
    pub score: f64,
}

/// Which generator produced the text. Decided by a single margin rule:
/// the top score wins unless the runner-up is within the margin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratorAttribution {
    Single { generator: String, confidence: f64 },
    Mixed { candidates: Vec<AttributionCandidate> },
    Unknown { reason: String },
}

impl GeneratorAttribution {
    pub fn name(&self) -> &str {
        match self {
            GeneratorAttribution::Single { generator, .. } => generator,
            GeneratorAttribution::Mixed { .. } => "mixed/uncertain",
            GeneratorAttribution::Unknown { .. } => "unknown",
        }
    }

    /// Confidence in *which* generator, never whether AI was used at all.
    pub fn confidence(&self) -> f64 {
        match self {
            GeneratorAttribution::Single { confidence, .. } => *confidence,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributionSummary {
    pub name: String,
    pub confidence: f64,
    pub margin: f64,
    pub verdict: GeneratorAttribution,
}

impl AttributionSummary {
    pub fn from_verdict(verdict: GeneratorAttribution, margin: f64) -> Self {
        Self {
            name: verdict.name().to_string(),
            confidence: verdict.confidence(),
            margin,
            verdict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintReport {
    pub word_count: usize,
    /// Generators in declared profile order.
    pub generators: Vec<GeneratorScore>,
    pub attribution: GeneratorAttribution,
}

// ============ Statistical Profile ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Measured,
    InsufficientData,
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricReading {
    pub value: Option<f64>,
    pub status: MetricStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl MetricReading {
    pub fn measured(value: f64) -> Self {
        Self {
            value: Some(unit(value)),
            status: MetricStatus::Measured,
            note: None,
        }
    }

    pub fn insufficient(note: impl Into<String>) -> Self {
        Self {
            value: None,
            status: MetricStatus::InsufficientData,
            note: Some(note.into()),
        }
    }

    pub fn undefined(note: impl Into<String>) -> Self {
        Self {
            value: None,
            status: MetricStatus::Undefined,
            note: Some(note.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalProfile {
    pub word_count: usize,
    pub sentence_count: usize,
    pub diversity_window: usize,
    pub burstiness: MetricReading,
    pub lexical_diversity: MetricReading,
    pub passive_voice_ratio: MetricReading,
    pub rare_word_frequency: MetricReading,
}

impl StatisticalProfile {
    pub fn measured_count(&self) -> usize {
        [
            &self.burstiness,
            &self.lexical_diversity,
            &self.passive_voice_ratio,
            &self.rare_word_frequency,
        ]
        .iter()
        .filter(|m| m.status == MetricStatus::Measured)
        .count()
    }
}

// ============ Sentence & Section Reports ============

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceReport {
    pub sentence_count: usize,
    pub flagged_count: usize,
    /// `None` when the text has no sentences.
    pub flagged_fraction: Option<f64>,
    pub flagged_indices: Vec<usize>,
    pub sentence_scores: Vec<f64>,
    pub threshold: f64,
    pub boundary_rule: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Analyzed,
    TooShort,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionSkipReason {
    NoStructuralBoundaries,
    AllSectionsTooShort,
}

impl SectionSkipReason {
    pub fn code(self) -> &'static str {
        match self {
            SectionSkipReason::NoStructuralBoundaries => "no_structural_boundaries",
            SectionSkipReason::AllSectionsTooShort => "all_sections_too_short",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionScore {
    pub index: usize,
    pub heading: Option<String>,
    pub start: usize,
    pub end: usize,
    pub word_count: usize,
    pub status: SectionStatus,
    pub score: Option<f64>,
    pub confidence: Option<f64>,
    pub attribution: Option<AttributionSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectionReport {
    pub sections_detected: usize,
    pub sections_analyzed: usize,
    /// Set whenever `sections_analyzed` is 0.
    pub reason: Option<SectionSkipReason>,
    pub mean_score: Option<f64>,
    pub sections: Vec<SectionScore>,
}

// ============ Baseline Adjustment ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSource {
    Declared,
    Detected,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDeviation {
    pub category: String,
    pub observed_per_1k: f64,
    pub expected_per_1k: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineAdjustment {
    pub applied: bool,
    pub delta: f64,
    pub rationale: String,
    pub document_type: DocumentType,
    pub type_source: TypeSource,
    pub reliance: f64,
    pub confidence_penalty: f64,
    pub max_adjustment: f64,
    pub category_deviations: Vec<CategoryDeviation>,
}

impl BaselineAdjustment {
    pub fn not_applied(document_type: DocumentType, type_source: TypeSource, rationale: impl Into<String>) -> Self {
        Self {
            applied: false,
            delta: 0.0,
            rationale: rationale.into(),
            document_type,
            type_source,
            reliance: 0.0,
            confidence_penalty: 0.0,
            max_adjustment: 0.0,
            category_deviations: Vec::new(),
        }
    }
}

// ============ Consensus ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Assessed,
    InsufficientData,
    InsufficientSignals,
    CannotAssess,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    LowInconclusive,
    NotAssessed,
}

impl ConfidenceTier {
    pub fn requires_manual_review(self) -> bool {
        matches!(self, ConfidenceTier::LowInconclusive | ConfidenceTier::NotAssessed)
    }

    pub fn label(self) -> &'static str {
        match self {
            ConfidenceTier::High => "High confidence: detection methods broadly agree",
            ConfidenceTier::Medium => "Medium confidence: detection methods partially disagree",
            ConfidenceTier::LowInconclusive => {
                "Low / inconclusive: detection methods disagree, manual review required"
            }
            ConfidenceTier::NotAssessed => "Not assessed: too little evidence, manual review required",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    LikelyHuman,
    LikelyMachineGenerated,
    Inconclusive,
    CannotDetermine,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalReport {
    pub method: MethodId,
    pub score: f64,
    pub confidence: f64,
    pub evidence: String,
    /// False for zero-confidence signals, which carry no weight.
    pub used: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedSignal {
    pub method: MethodId,
    pub reason_code: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdsUsed {
    pub tier_high_max_spread: f64,
    pub tier_medium_max_spread: f64,
    pub attribution_margin: f64,
    pub attribution_min_score: f64,
    pub sentence_threshold: f64,
    pub likely_human_max: f64,
    pub likely_machine_min: f64,
    pub min_words: usize,
    pub min_signals: usize,
}

/// The sole externally reported answer of an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub analysis_id: Uuid,
    pub rubric_version: String,
    pub status: AnalysisStatus,
    pub verdict: Verdict,
    /// Confidence-weighted mean after baseline adjustment; `None` when not assessable.
    pub aggregate_probability: Option<f64>,
    /// Confidence-weighted mean before baseline adjustment.
    pub raw_probability: Option<f64>,
    /// Whether AI was used at all; distinct from attribution confidence.
    pub detection_confidence: f64,
    pub confidence_tier: ConfidenceTier,
    pub tier_label: String,
    pub requires_manual_review: bool,
    pub disagreement_spread: Option<f64>,
    pub generator_attribution: AttributionSummary,
    pub signals: Vec<SignalReport>,
    pub dropped_signals: Vec<DroppedSignal>,
    pub reduced_confidence_flags: Vec<String>,
    pub statistics: Option<StatisticalProfile>,
    pub sentences: Option<SentenceReport>,
    pub sections: Option<SectionReport>,
    pub baseline_adjustment: BaselineAdjustment,
    pub thresholds: ThresholdsUsed,
    pub word_count: usize,
}

// ============ Batch ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchItemOutcome {
    Completed {
        id: String,
        result: Box<ConsensusResult>,
    },
    NotDispatched {
        id: String,
    },
    Failed {
        id: String,
        error: String,
    },
}

impl BatchItemOutcome {
    pub fn id(&self) -> &str {
        match self {
            BatchItemOutcome::Completed { id, .. }
            | BatchItemOutcome::NotDispatched { id }
            | BatchItemOutcome::Failed { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub count: usize,
    pub assessed: usize,
    pub cannot_assess: usize,
    pub not_dispatched: usize,
    pub failed: usize,
    pub avg_probability: Option<f64>,
    pub p95_probability: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: String,
    pub items: Vec<BatchItemOutcome>,
    pub summary: BatchSummary,
}
