// Consensus Builder
// Combines detection signals into the single reported probability, with an
// explicit disagreement spread, confidence tier and baseline audit trail.

use crate::models::{
    round4, unit, AnalysisStatus, AttributionSummary, BaselineAdjustment, ConfidenceTier,
    ConsensusResult, DetectionSignal, DocumentType, DroppedSignal, GeneratorAttribution,
    LexicalCounts, MethodId, SectionReport, SentenceReport, SignalReport, StatisticalProfile,
    ThresholdsUsed, TypeSource, Verdict,
};
use crate::services::config_store::{AnalyzerConfig, MIN_SIGNALS};
use crate::services::errors::DetectorError;
use crate::services::lexicon::Lexicon;
use tracing::{info, warn};
use uuid::Uuid;

use super::baseline::{compute_adjustment, resolve_document_type};

pub const RUBRIC_VERSION: &str = "consensus-rubric-v1";

/// Detection confidence lost per dropped signal.
const DROP_PENALTY: f64 = 0.05;
/// Tolerance for spreads computed exactly at a tier bound.
const BOUND_EPSILON: f64 = 1e-9;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConsensusState {
    Collecting,
    Scoring,
    Done,
    InsufficientSignals,
    CannotAssess,
}

/// Everything besides the signals that the result reports.
#[derive(Debug, Clone)]
pub struct ConsensusContext {
    pub analysis_id: Uuid,
    pub word_count: usize,
    pub declared_type: Option<DocumentType>,
    pub attribution: GeneratorAttribution,
    pub lexical: Option<LexicalCounts>,
    pub statistics: Option<StatisticalProfile>,
    pub sentences: Option<SentenceReport>,
    pub sections: Option<SectionReport>,
}

pub fn confidence_tier(spread: f64, thresholds: &ThresholdsUsed) -> ConfidenceTier {
    if spread <= thresholds.tier_high_max_spread + BOUND_EPSILON {
        ConfidenceTier::High
    } else if spread <= thresholds.tier_medium_max_spread + BOUND_EPSILON {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::LowInconclusive
    }
}

pub fn verdict_for(probability: f64, tier: ConfidenceTier, thresholds: &ThresholdsUsed) -> Verdict {
    match tier {
        ConfidenceTier::NotAssessed => Verdict::CannotDetermine,
        ConfidenceTier::LowInconclusive => Verdict::Inconclusive,
        ConfidenceTier::High | ConfidenceTier::Medium => {
            if probability <= thresholds.likely_human_max {
                Verdict::LikelyHuman
            } else if probability >= thresholds.likely_machine_min {
                Verdict::LikelyMachineGenerated
            } else {
                Verdict::Inconclusive
            }
        }
    }
}

pub fn drop_flag(method: MethodId, code: &str) -> String {
    format!("signal_dropped:{}:{}", method.as_str(), code)
}

pub struct ConsensusBuilder<'a> {
    state: ConsensusState,
    config: &'a AnalyzerConfig,
    lexicon: &'a Lexicon,
    signals: Vec<DetectionSignal>,
    dropped: Vec<DroppedSignal>,
}

impl<'a> ConsensusBuilder<'a> {
    pub fn new(config: &'a AnalyzerConfig, lexicon: &'a Lexicon) -> Self {
        Self {
            state: ConsensusState::Collecting,
            config,
            lexicon,
            signals: Vec::new(),
            dropped: Vec::new(),
        }
    }

    pub fn state(&self) -> ConsensusState {
        self.state
    }

    pub fn add_signal(&mut self, signal: DetectionSignal) {
        self.signals.push(signal);
    }

    pub fn record_failure(&mut self, method: MethodId, error: &DetectorError) {
        warn!("[CONSENSUS] Dropping {} signal: {}", method.as_str(), error);
        self.dropped.push(DroppedSignal {
            method,
            reason_code: error.code().to_string(),
            detail: error.to_string(),
        });
    }

    pub fn add_outcome(&mut self, method: MethodId, outcome: Result<DetectionSignal, DetectorError>) {
        match outcome {
            Ok(signal) => self.add_signal(signal),
            Err(e) => self.record_failure(method, &e),
        }
    }

    pub fn finish(mut self, ctx: ConsensusContext) -> ConsensusResult {
        self.state = ConsensusState::Scoring;
        let thresholds = self.config.thresholds();

        let mut signals = std::mem::take(&mut self.signals);
        signals.sort_by_key(|s| s.method);
        let mut dropped = std::mem::take(&mut self.dropped);
        dropped.sort_by_key(|d| d.method);

        let mut flags: Vec<String> = dropped
            .iter()
            .map(|d| drop_flag(d.method, &d.reason_code))
            .collect();

        let reports: Vec<SignalReport> = signals
            .iter()
            .map(|s| SignalReport {
                method: s.method,
                score: round4(s.score),
                confidence: round4(s.confidence),
                evidence: s.evidence.clone(),
                used: s.confidence > 0.0,
            })
            .collect();
        for report in reports.iter().filter(|r| !r.used) {
            flags.push(format!("signal_zero_confidence:{}", report.method.as_str()));
        }

        let used: Vec<&DetectionSignal> = signals.iter().filter(|s| s.confidence > 0.0).collect();

        let (document_type, type_source) = match ctx.lexical.as_ref() {
            Some(counts) => resolve_document_type(ctx.declared_type, counts, self.lexicon),
            None => match ctx.declared_type {
                Some(t) => (t, TypeSource::Declared),
                None => (DocumentType::General, TypeSource::Default),
            },
        };

        self.state = if used.is_empty() {
            ConsensusState::CannotAssess
        } else if used.len() < MIN_SIGNALS {
            ConsensusState::InsufficientSignals
        } else {
            ConsensusState::Done
        };

        let attribution = AttributionSummary::from_verdict(ctx.attribution, self.config.attribution_margin);

        if self.state != ConsensusState::Done {
            let status = if self.state == ConsensusState::CannotAssess {
                AnalysisStatus::CannotAssess
            } else {
                AnalysisStatus::InsufficientSignals
            };
            info!(
                "[CONSENSUS] {:?}: {} usable signals, {} dropped",
                status,
                used.len(),
                dropped.len()
            );
            let tier = ConfidenceTier::NotAssessed;
            return ConsensusResult {
                analysis_id: ctx.analysis_id,
                rubric_version: rubric_version(self.lexicon),
                status,
                verdict: Verdict::CannotDetermine,
                aggregate_probability: None,
                raw_probability: None,
                detection_confidence: 0.0,
                confidence_tier: tier,
                tier_label: tier.label().to_string(),
                requires_manual_review: tier.requires_manual_review(),
                disagreement_spread: None,
                generator_attribution: attribution,
                signals: reports,
                dropped_signals: dropped,
                reduced_confidence_flags: flags,
                statistics: ctx.statistics,
                sentences: ctx.sentences,
                sections: ctx.sections,
                baseline_adjustment: BaselineAdjustment::not_applied(
                    document_type,
                    type_source,
                    format!("not assessed: {} usable signals", used.len()),
                ),
                thresholds,
                word_count: ctx.word_count,
            };
        }

        let total_weight: f64 = used.iter().map(|s| s.confidence).sum();
        let raw = used.iter().map(|s| s.score * s.confidence).sum::<f64>() / total_weight;
        let max = used.iter().map(|s| s.score).fold(f64::MIN, f64::max);
        let min = used.iter().map(|s| s.score).fold(f64::MAX, f64::min);
        let spread = (max - min).clamp(0.0, 1.0);
        let tier = confidence_tier(spread, &thresholds);

        let baseline = match ctx.lexical.as_ref() {
            Some(counts) => compute_adjustment(raw, counts, self.lexicon, document_type, type_source),
            None => BaselineAdjustment::not_applied(
                document_type,
                type_source,
                "lexical counts unavailable; baseline not evaluated",
            ),
        };
        let aggregate = if baseline.applied {
            unit(raw + baseline.delta)
        } else {
            raw
        };
        if baseline.applied {
            flags.push(format!("baseline_adjusted:{}", document_type.as_str()));
        }

        let mean_confidence = total_weight / used.len() as f64;
        let detection_confidence = unit(
            mean_confidence * (1.0 - spread)
                - baseline.confidence_penalty
                - DROP_PENALTY * dropped.len() as f64,
        );

        let verdict = verdict_for(aggregate, tier, &thresholds);
        if tier == ConfidenceTier::LowInconclusive {
            flags.push("methods_disagree:manual_review_required".to_string());
        }

        info!(
            "[CONSENSUS] aggregate={:.3} raw={:.3} spread={:.3} tier={:?} verdict={:?} signals={} dropped={}",
            aggregate,
            raw,
            spread,
            tier,
            verdict,
            used.len(),
            dropped.len()
        );
        self.state = ConsensusState::Done;

        ConsensusResult {
            analysis_id: ctx.analysis_id,
            rubric_version: rubric_version(self.lexicon),
            status: AnalysisStatus::Assessed,
            verdict,
            aggregate_probability: Some(round4(aggregate)),
            raw_probability: Some(round4(raw)),
            detection_confidence: round4(detection_confidence),
            confidence_tier: tier,
            tier_label: tier.label().to_string(),
            requires_manual_review: tier.requires_manual_review(),
            disagreement_spread: Some(round4(spread)),
            generator_attribution: attribution,
            signals: reports,
            dropped_signals: dropped,
            reduced_confidence_flags: flags,
            statistics: ctx.statistics,
            sentences: ctx.sentences,
            sections: ctx.sections,
            baseline_adjustment: baseline,
            thresholds,
            word_count: ctx.word_count,
        }
    }
}

fn rubric_version(lexicon: &Lexicon) -> String {
    format!("{}+{}", RUBRIC_VERSION, lexicon.version)
}

/// Result for documents too short to analyze. No detector runs.
pub fn insufficient_data_result(
    config: &AnalyzerConfig,
    lexicon: &Lexicon,
    ctx: ConsensusContext,
) -> ConsensusResult {
    let tier = ConfidenceTier::NotAssessed;
    let (document_type, type_source) = match ctx.declared_type {
        Some(t) => (t, TypeSource::Declared),
        None => (DocumentType::General, TypeSource::Default),
    };
    ConsensusResult {
        analysis_id: ctx.analysis_id,
        rubric_version: rubric_version(lexicon),
        status: AnalysisStatus::InsufficientData,
        verdict: Verdict::CannotDetermine,
        aggregate_probability: None,
        raw_probability: None,
        detection_confidence: 0.0,
        confidence_tier: tier,
        tier_label: tier.label().to_string(),
        requires_manual_review: tier.requires_manual_review(),
        disagreement_spread: None,
        generator_attribution: AttributionSummary::from_verdict(ctx.attribution, config.attribution_margin),
        signals: Vec::new(),
        dropped_signals: Vec::new(),
        reduced_confidence_flags: vec![format!(
            "insufficient_data:{}_words_below_{}",
            ctx.word_count, config.min_words
        )],
        statistics: ctx.statistics,
        sentences: ctx.sentences,
        sections: ctx.sections,
        baseline_adjustment: BaselineAdjustment::not_applied(
            document_type,
            type_source,
            "document too short to assess",
        ),
        thresholds: config.thresholds(),
        word_count: ctx.word_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> Lexicon {
        Lexicon::from_json_str(r#"{"version":"t"}"#).unwrap()
    }

    fn ctx() -> ConsensusContext {
        ConsensusContext {
            analysis_id: Uuid::nil(),
            word_count: 500,
            declared_type: None,
            attribution: GeneratorAttribution::Unknown {
                reason: "none".to_string(),
            },
            lexical: None,
            statistics: None,
            sentences: None,
            sections: None,
        }
    }

    fn signal(method: MethodId, score: f64, confidence: f64) -> DetectionSignal {
        DetectionSignal::new(method, score, confidence, "test")
    }

    #[test]
    fn test_wide_spread_is_low_inconclusive() {
        let config = AnalyzerConfig::default();
        let lex = lexicon();
        let mut builder = ConsensusBuilder::new(&config, &lex);
        builder.add_signal(signal(MethodId::LexicalPattern, 0.10, 0.8));
        builder.add_signal(signal(MethodId::Fingerprint, 0.85, 0.8));
        let result = builder.finish(ctx());
        assert_eq!(result.status, AnalysisStatus::Assessed);
        assert_eq!(result.confidence_tier, ConfidenceTier::LowInconclusive);
        assert_eq!(result.verdict, Verdict::Inconclusive);
        assert!(result.requires_manual_review);
        assert!(!result.tier_label.contains("High"));
        assert_eq!(result.disagreement_spread, Some(0.75));
    }

    #[test]
    fn test_tier_bounds() {
        let t = AnalyzerConfig::default().thresholds();
        assert_eq!(confidence_tier(0.0, &t), ConfidenceTier::High);
        assert_eq!(confidence_tier(0.20, &t), ConfidenceTier::High);
        assert_eq!(confidence_tier(0.21, &t), ConfidenceTier::Medium);
        assert_eq!(confidence_tier(0.50, &t), ConfidenceTier::Medium);
        assert_eq!(confidence_tier(0.51, &t), ConfidenceTier::LowInconclusive);
    }

    #[test]
    fn test_confidence_weighted_mean_and_spread() {
        let config = AnalyzerConfig::default();
        let lex = lexicon();
        let mut builder = ConsensusBuilder::new(&config, &lex);
        builder.add_signal(signal(MethodId::DocumentLevel, 0.8, 0.9));
        builder.add_signal(signal(MethodId::SentenceLevel, 0.7, 0.3));
        builder.add_signal(signal(MethodId::Statistical, 0.75, 0.6));
        let result = builder.finish(ctx());
        let expected = (0.8 * 0.9 + 0.7 * 0.3 + 0.75 * 0.6) / (0.9 + 0.3 + 0.6);
        assert!((result.raw_probability.unwrap() - round4(expected)).abs() < 1e-9);
        assert_eq!(result.aggregate_probability, result.raw_probability);
        assert_eq!(result.disagreement_spread, Some(0.1));
        assert_eq!(result.confidence_tier, ConfidenceTier::High);
        assert_eq!(result.verdict, Verdict::LikelyMachineGenerated);
    }

    #[test]
    fn test_zero_confidence_signal_is_reported_not_used() {
        let config = AnalyzerConfig::default();
        let lex = lexicon();
        let mut builder = ConsensusBuilder::new(&config, &lex);
        builder.add_signal(signal(MethodId::DocumentLevel, 0.2, 0.8));
        builder.add_signal(signal(MethodId::Fingerprint, 0.25, 0.7));
        builder.add_signal(signal(MethodId::Statistical, 1.0, 0.0));
        let result = builder.finish(ctx());
        assert_eq!(result.signals.len(), 3);
        let stat = result.signals.iter().find(|s| s.method == MethodId::Statistical).unwrap();
        assert!(!stat.used);
        // Spread ignores the unused signal
        assert_eq!(result.disagreement_spread, Some(0.05));
        assert_eq!(result.verdict, Verdict::LikelyHuman);
    }

    #[test]
    fn test_failures_drop_signals_and_lower_confidence() {
        let config = AnalyzerConfig::default();
        let lex = lexicon();

        let mut clean = ConsensusBuilder::new(&config, &lex);
        clean.add_signal(signal(MethodId::DocumentLevel, 0.6, 0.8));
        clean.add_signal(signal(MethodId::LexicalPattern, 0.6, 0.8));
        let clean = clean.finish(ctx());

        let mut degraded = ConsensusBuilder::new(&config, &lex);
        degraded.add_signal(signal(MethodId::DocumentLevel, 0.6, 0.8));
        degraded.add_signal(signal(MethodId::LexicalPattern, 0.6, 0.8));
        degraded.add_outcome(MethodId::Statistical, Err(DetectorError::TimedOut { ms: 30_000 }));
        let degraded = degraded.finish(ctx());

        assert_eq!(degraded.status, AnalysisStatus::Assessed);
        assert!(degraded
            .reduced_confidence_flags
            .contains(&"signal_dropped:statistical:timeout".to_string()));
        assert!(degraded.detection_confidence < clean.detection_confidence);
        assert_eq!(degraded.aggregate_probability, clean.aggregate_probability);
    }

    #[test]
    fn test_single_signal_is_insufficient() {
        let config = AnalyzerConfig::default();
        let lex = lexicon();
        let mut builder = ConsensusBuilder::new(&config, &lex);
        builder.add_signal(signal(MethodId::DocumentLevel, 0.9, 0.9));
        let result = builder.finish(ctx());
        assert_eq!(result.status, AnalysisStatus::InsufficientSignals);
        assert_eq!(result.aggregate_probability, None);
        assert_eq!(result.verdict, Verdict::CannotDetermine);
    }

    #[test]
    fn test_zero_signals_cannot_assess() {
        let config = AnalyzerConfig::default();
        let lex = lexicon();
        let mut builder = ConsensusBuilder::new(&config, &lex);
        assert_eq!(builder.state(), ConsensusState::Collecting);
        builder.record_failure(MethodId::Fingerprint, &DetectorError::Panicked("boom".to_string()));
        let result = builder.finish(ctx());
        assert_eq!(result.status, AnalysisStatus::CannotAssess);
        assert_eq!(result.raw_probability, None);
        assert_eq!(result.disagreement_spread, None);
        assert_eq!(result.dropped_signals.len(), 1);
        assert_eq!(result.confidence_tier, ConfidenceTier::NotAssessed);
    }

    #[test]
    fn test_attribution_confidence_independent_of_detection() {
        let config = AnalyzerConfig::default();
        let lex = lexicon();
        let mut builder = ConsensusBuilder::new(&config, &lex);
        builder.add_signal(signal(MethodId::Fingerprint, 0.95, 0.9));
        builder.add_signal(signal(MethodId::Statistical, 0.05, 0.9));
        let mut context = ctx();
        context.attribution = GeneratorAttribution::Single {
            generator: "gpt-4".to_string(),
            confidence: 0.9,
        };
        let result = builder.finish(context);
        assert_eq!(result.generator_attribution.name, "gpt-4");
        assert_eq!(result.generator_attribution.confidence, 0.9);
        assert!(result.detection_confidence < 0.2);
        assert_eq!(result.verdict, Verdict::Inconclusive);
    }
}
