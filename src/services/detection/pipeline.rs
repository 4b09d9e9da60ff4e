// Analysis Pipeline
// Runs the six detectors over one immutable document and hands their
// outputs to the consensus builder.
// - analyze: detectors run concurrently as blocking tasks, each under a timeout
// - analyze_sync: same detectors in sequence, identical results
// - analyze_batch: bounded concurrency across documents with cancellation

use crate::models::{
    AnalysisStatus, BatchItemOutcome, BatchReport, BatchSummary, ConsensusResult, DetectionSignal,
    Document, FingerprintReport, GeneratorAttribution, LexicalCounts, MethodId, SectionReport,
    SentenceReport, StatisticalProfile,
};
use crate::services::config_store::AnalyzerConfig;
use crate::services::errors::{ConfigError, DetectorError};
use crate::services::lexicon::Lexicon;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::consensus::{insufficient_data_result, ConsensusBuilder, ConsensusContext};
use super::document_scorer::{document_signal, score_with_evidence, BatteryScore};
use super::fingerprint::{fingerprint_report, fingerprint_signal};
use super::lexical_patterns::{count_patterns, lexical_signal};
use super::section_aggregator::{aggregate_sections, section_signal, SectionSettings};
use super::sentence_classifier::{classify_sentences, sentence_signal};
use super::statistics::{profile_text, statistical_signal};

const ANALYSIS_NAMESPACE: Uuid = Uuid::from_u128(0x6c1f_2a8e_93d4_4b7a_a0c5_1e2f_3d4c_5b6a);

/// Raw output of one detector, before it is reduced to a signal.
#[derive(Debug, Clone)]
enum DetectorOutput {
    Lexical(LexicalCounts),
    Fingerprint(FingerprintReport),
    Statistical(StatisticalProfile),
    Document(BatteryScore),
    Sentence(SentenceReport),
    Section(SectionReport),
}

fn run_detector(method: MethodId, doc: &Document, lexicon: &Lexicon, config: &AnalyzerConfig) -> DetectorOutput {
    let text = doc.text();
    let words = doc.word_count();
    match method {
        MethodId::LexicalPattern => DetectorOutput::Lexical(count_patterns(text, words, &lexicon.categories)),
        MethodId::Fingerprint => DetectorOutput::Fingerprint(fingerprint_report(
            text,
            words,
            &lexicon.generators,
            config.attribution_margin,
            config.attribution_min_score,
        )),
        MethodId::Statistical => {
            DetectorOutput::Statistical(profile_text(text, config.min_words, config.diversity_window))
        }
        MethodId::DocumentLevel => {
            let counts = count_patterns(text, words, &lexicon.categories);
            let fingerprint = fingerprint_report(
                text,
                words,
                &lexicon.generators,
                config.attribution_margin,
                config.attribution_min_score,
            );
            let best = fingerprint.generators.iter().map(|g| g.score).fold(0.0_f64, f64::max);
            DetectorOutput::Document(score_with_evidence(text, words, &counts, best))
        }
        MethodId::SentenceLevel => {
            DetectorOutput::Sentence(classify_sentences(text, lexicon, config.sentence_threshold))
        }
        MethodId::SectionAggregate => DetectorOutput::Section(aggregate_sections(
            doc,
            lexicon,
            SectionSettings {
                min_words: config.section_min_words,
                attribution_margin: config.attribution_margin,
                attribution_min_score: config.attribution_min_score,
            },
        )),
    }
}

/// Failure injected into one detector by tests.
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
enum DetectorFault {
    Panic,
    /// Block the detector thread for this many milliseconds.
    Stall(u64),
}

#[cfg(test)]
impl DetectorFault {
    fn trigger(self, method: MethodId) {
        match self {
            DetectorFault::Panic => panic!("{} detector fault", method.as_str()),
            DetectorFault::Stall(ms) => std::thread::sleep(Duration::from_millis(ms)),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Clone)]
pub struct Analyzer {
    lexicon: Arc<Lexicon>,
    config: Arc<AnalyzerConfig>,
    #[cfg(test)]
    fault: Option<(MethodId, DetectorFault)>,
}

#[derive(Debug, Clone)]
pub struct BatchInput {
    pub id: String,
    pub document: Document,
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig, lexicon: Arc<Lexicon>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            lexicon,
            config: Arc::new(config),
            #[cfg(test)]
            fault: None,
        })
    }

    #[cfg(test)]
    fn with_fault(mut self, method: MethodId, fault: DetectorFault) -> Self {
        self.fault = Some((method, fault));
        self
    }

    #[cfg(test)]
    fn fault_for(&self, method: MethodId) -> Option<DetectorFault> {
        self.fault.filter(|(m, _)| *m == method).map(|(_, f)| f)
    }

    /// Validate `config` and load the lexicon it names, or the built-in one.
    pub fn from_config(config: AnalyzerConfig) -> Result<Self, ConfigError> {
        let lexicon = Lexicon::load_or_builtin(config.lexicon_path.as_deref())?;
        Self::new(config, lexicon)
    }

    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::from_config(AnalyzerConfig::default())
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Deterministic id over text, declared type, configuration and lexicon version.
    pub fn analysis_id(&self, doc: &Document) -> Uuid {
        let config_json = serde_json::to_string(self.config.as_ref()).unwrap_or_default();
        let declared = doc.declared_type().map(|t| t.as_str()).unwrap_or("");
        let mut name = Vec::with_capacity(doc.text().len() + config_json.len() + 64);
        name.extend_from_slice(doc.text().as_bytes());
        name.push(0);
        name.extend_from_slice(declared.as_bytes());
        name.push(0);
        name.extend_from_slice(config_json.as_bytes());
        name.push(0);
        name.extend_from_slice(self.lexicon.version.as_bytes());
        Uuid::new_v5(&ANALYSIS_NAMESPACE, &name)
    }

    fn too_short(&self, doc: &Document) -> Option<ConsensusResult> {
        if doc.word_count() >= self.config.min_words {
            return None;
        }
        info!(
            "[PIPELINE] Document has {} words (< {}); insufficient data",
            doc.word_count(),
            self.config.min_words
        );
        let ctx = ConsensusContext {
            analysis_id: self.analysis_id(doc),
            word_count: doc.word_count(),
            declared_type: doc.declared_type(),
            attribution: GeneratorAttribution::Unknown {
                reason: "document too short".to_string(),
            },
            lexical: None,
            statistics: Some(profile_text(doc.text(), self.config.min_words, self.config.diversity_window)),
            sentences: None,
            sections: None,
        };
        Some(insufficient_data_result(&self.config, &self.lexicon, ctx))
    }

    /// Analyze one document, detectors in sequence. Panics in a detector are
    /// caught and drop its signal; there is no timeout on this path.
    pub fn analyze_sync(&self, doc: &Document) -> ConsensusResult {
        if let Some(result) = self.too_short(doc) {
            return result;
        }
        let outputs = MethodId::ALL
            .iter()
            .map(|&method| {
                #[cfg(test)]
                let fault = self.fault_for(method);
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    #[cfg(test)]
                    if let Some(fault) = fault {
                        fault.trigger(method);
                    }
                    run_detector(method, doc, &self.lexicon, &self.config)
                }))
                .map_err(|payload| DetectorError::Panicked(panic_message(payload)));
                (method, outcome)
            })
            .collect();
        self.assemble(doc, outputs)
    }

    /// Analyze one document with all detectors running concurrently.
    pub async fn analyze(&self, doc: Arc<Document>) -> ConsensusResult {
        if let Some(result) = self.too_short(&doc) {
            return result;
        }
        info!(
            "[PIPELINE] Starting analysis: {} words, {} sections",
            doc.word_count(),
            doc.sections().len()
        );

        let timeout_ms = self.config.detector_timeout_ms;
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        let handles: Vec<_> = MethodId::ALL
            .iter()
            .map(|&method| {
                let doc = Arc::clone(&doc);
                let lexicon = Arc::clone(&self.lexicon);
                let config = Arc::clone(&self.config);
                #[cfg(test)]
                let fault = self.fault_for(method);
                let handle = tokio::task::spawn_blocking(move || {
                    #[cfg(test)]
                    if let Some(fault) = fault {
                        fault.trigger(method);
                    }
                    run_detector(method, &doc, &lexicon, &config)
                });
                (method, handle)
            })
            .collect();

        let mut outputs = Vec::with_capacity(handles.len());
        for (method, handle) in handles {
            let outcome = match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(join_err)) if join_err.is_panic() => {
                    Err(DetectorError::Panicked(panic_message(join_err.into_panic())))
                }
                Ok(Err(join_err)) => Err(DetectorError::Internal(join_err.to_string())),
                // The blocking task cannot be aborted; its output is discarded.
                Err(_) => Err(DetectorError::TimedOut { ms: timeout_ms }),
            };
            debug!("[PIPELINE] {} detector finished (ok={})", method.as_str(), outcome.is_ok());
            outputs.push((method, outcome));
        }

        self.assemble(&doc, outputs)
    }

    fn assemble(
        &self,
        doc: &Document,
        outputs: Vec<(MethodId, Result<DetectorOutput, DetectorError>)>,
    ) -> ConsensusResult {
        let mut builder = ConsensusBuilder::new(&self.config, &self.lexicon);
        let mut ctx = ConsensusContext {
            analysis_id: self.analysis_id(doc),
            word_count: doc.word_count(),
            declared_type: doc.declared_type(),
            attribution: GeneratorAttribution::Unknown {
                reason: "fingerprint detector unavailable".to_string(),
            },
            lexical: None,
            statistics: None,
            sentences: None,
            sections: None,
        };

        for (method, outcome) in outputs {
            let output = match outcome {
                Ok(output) => output,
                Err(e) => {
                    builder.record_failure(method, &e);
                    continue;
                }
            };
            let signal: Result<DetectionSignal, DetectorError> = match output {
                DetectorOutput::Lexical(counts) => {
                    let signal = lexical_signal(&counts);
                    ctx.lexical = Some(counts);
                    signal
                }
                DetectorOutput::Fingerprint(report) => {
                    let signal = fingerprint_signal(&report);
                    ctx.attribution = report.attribution;
                    signal
                }
                DetectorOutput::Statistical(profile) => {
                    let signal = statistical_signal(&profile);
                    ctx.statistics = Some(profile);
                    signal
                }
                DetectorOutput::Document(score) => document_signal(&score),
                DetectorOutput::Sentence(report) => {
                    let signal = sentence_signal(&report);
                    ctx.sentences = Some(report);
                    signal
                }
                DetectorOutput::Section(report) => {
                    let signal = section_signal(&report);
                    ctx.sections = Some(report);
                    signal
                }
            };
            builder.add_outcome(method, signal);
        }

        builder.finish(ctx)
    }

    /// Analyze many documents, at most `batch_parallelism` at a time. Once
    /// `cancel` is set no further document is dispatched; in-flight ones finish.
    pub async fn analyze_batch(&self, items: Vec<BatchInput>, cancel: Arc<AtomicBool>) -> BatchReport {
        let started_at = chrono::Utc::now().to_rfc3339();
        let batch_id = Uuid::new_v4();
        let total = items.len();
        info!(
            "[BATCH] {} starting: {} documents, parallelism {}",
            batch_id, total, self.config.batch_parallelism
        );

        let semaphore = Arc::new(Semaphore::new(self.config.batch_parallelism));
        let mut outcomes: Vec<Option<BatchItemOutcome>> = (0..total).map(|_| None).collect();
        let mut handles = Vec::new();

        for (index, item) in items.into_iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                outcomes[index] = Some(BatchItemOutcome::NotDispatched { id: item.id });
                continue;
            }
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    outcomes[index] = Some(BatchItemOutcome::NotDispatched { id: item.id });
                    continue;
                }
            };
            // Cancellation may arrive while waiting for a slot
            if cancel.load(Ordering::SeqCst) {
                drop(permit);
                outcomes[index] = Some(BatchItemOutcome::NotDispatched { id: item.id });
                continue;
            }

            let analyzer = self.clone();
            let id = item.id.clone();
            let document = Arc::new(item.document);
            let handle = tokio::spawn(async move {
                let _permit = permit;
                analyzer.analyze(document).await
            });
            handles.push((index, id, handle));
        }

        for (index, id, handle) in handles {
            outcomes[index] = Some(match handle.await {
                Ok(result) => BatchItemOutcome::Completed {
                    id,
                    result: Box::new(result),
                },
                Err(e) => {
                    warn!("[BATCH] Document {} failed: {}", id, e);
                    BatchItemOutcome::Failed {
                        id,
                        error: e.to_string(),
                    }
                }
            });
        }

        let items: Vec<BatchItemOutcome> = outcomes.into_iter().flatten().collect();
        let summary = summarize_batch(&items);
        info!(
            "[BATCH] {} done: {} assessed, {} not assessed, {} not dispatched, {} failed",
            batch_id, summary.assessed, summary.cannot_assess, summary.not_dispatched, summary.failed
        );

        BatchReport {
            batch_id,
            started_at,
            items,
            summary,
        }
    }
}

pub fn summarize_batch(items: &[BatchItemOutcome]) -> BatchSummary {
    let mut assessed = 0usize;
    let mut cannot_assess = 0usize;
    let mut not_dispatched = 0usize;
    let mut failed = 0usize;
    let mut probabilities: Vec<f64> = Vec::new();

    for item in items {
        match item {
            BatchItemOutcome::Completed { result, .. } => {
                if result.status == AnalysisStatus::Assessed {
                    assessed += 1;
                    if let Some(p) = result.aggregate_probability {
                        probabilities.push(p);
                    }
                } else {
                    cannot_assess += 1;
                }
            }
            BatchItemOutcome::NotDispatched { .. } => not_dispatched += 1,
            BatchItemOutcome::Failed { .. } => failed += 1,
        }
    }

    let avg_probability = if probabilities.is_empty() {
        None
    } else {
        Some(crate::models::round4(
            probabilities.iter().sum::<f64>() / probabilities.len() as f64,
        ))
    };
    let p95_probability = if probabilities.is_empty() {
        None
    } else {
        probabilities.sort_by(|a, b| a.total_cmp(b));
        let rank = ((probabilities.len() as f64) * 0.95).ceil() as usize;
        Some(probabilities[rank.saturating_sub(1).min(probabilities.len() - 1)])
    };

    BatchSummary {
        count: items.len(),
        assessed,
        cannot_assess,
        not_dispatched,
        failed,
        avg_probability,
        p95_probability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisStatus, ConfidenceTier, DocumentType, SectionSkipReason, Verdict};

    const NEUTRAL_WORDS: [&str; 24] = [
        "harbour", "crane", "ledger", "timber", "quarry", "meadow", "lantern", "orchard", "ferry",
        "barley", "granite", "wagon", "millstone", "pasture", "copper", "saddle", "thimble",
        "kettle", "hedgerow", "furnace", "rafter", "cobble", "tannery", "spindle",
    ];

    /// Neutral prose: varied sentence lengths, no trigger vocabulary.
    fn neutral_text(words: usize) -> String {
        let lengths = [7usize, 15, 4, 22, 11, 9, 18, 5];
        let mut out = Vec::new();
        let mut produced = 0usize;
        let mut i = 0usize;
        while produced < words {
            let len = lengths[i % lengths.len()].min(words - produced);
            let sentence: Vec<&str> = (0..len)
                .map(|k| NEUTRAL_WORDS[(produced + k * 7 + i) % NEUTRAL_WORDS.len()])
                .collect();
            let mut s = sentence.join(" ");
            if let Some(first) = s.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            out.push(format!("{}.", s));
            produced += len;
            i += 1;
        }
        out.join(" ")
    }

    fn test_lexicon() -> Arc<Lexicon> {
        Arc::new(
            Lexicon::from_json_str(
                r#"{"version":"test",
                    "categories":[{"name":"vocab","weight":1.0,"triggers":["delve","tapestry"]}],
                    "generators":[
                        {"id":"G","displayName":"Generator G","tiers":[
                            {"tier":"high","multiplier":1.5,"phrases":[{"phrase":"comprehensive approach","weight":0.05}]}]},
                        {"id":"H","tiers":[
                            {"tier":"high","multiplier":1.5,"phrases":[{"phrase":"rich tapestry","weight":0.05}]}]}
                    ]}"#,
            )
            .unwrap(),
        )
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(AnalyzerConfig::default(), test_lexicon()).unwrap()
    }

    #[test]
    fn test_end_to_end_fingerprint_attribution() {
        let mut text = neutral_text(2000);
        let chunk = text.len() / 20;
        let mut with_phrases = String::new();
        let mut rest = text.as_str();
        for _ in 0..20 {
            let cut = rest[..chunk.min(rest.len())].rfind(". ").map(|p| p + 2).unwrap_or(0);
            with_phrases.push_str(&rest[..cut]);
            with_phrases.push_str("A comprehensive approach. ");
            rest = &rest[cut..];
        }
        with_phrases.push_str(rest);
        text = with_phrases;

        let doc = Document::new(&text, None);
        let result = analyzer().analyze_sync(&doc);

        let fp = result
            .signals
            .iter()
            .find(|s| s.method == MethodId::Fingerprint)
            .unwrap();
        assert!(fp.score > 0.5, "fingerprint score {}", fp.score);
        assert_eq!(result.generator_attribution.name, "G");
        assert!(matches!(
            result.generator_attribution.verdict,
            GeneratorAttribution::Single { .. }
        ));
    }

    #[test]
    fn test_identical_input_is_deterministic() {
        let analyzer = analyzer();
        let doc = Document::new(&neutral_text(400), None);
        let a = analyzer.analyze_sync(&doc);
        let b = analyzer.analyze_sync(&doc);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[tokio::test]
    async fn test_async_matches_sync() {
        let analyzer = analyzer();
        let doc = Document::new(&neutral_text(600), Some(DocumentType::Policy));
        let sync = analyzer.analyze_sync(&doc);
        let concurrent = analyzer.analyze(Arc::new(doc)).await;
        assert_eq!(sync, concurrent);
    }

    #[test]
    fn test_results_are_bounded() {
        let analyzer = analyzer();
        let doc = Document::new(&neutral_text(800), None);
        let result = analyzer.analyze_sync(&doc);
        for signal in &result.signals {
            assert!((0.0..=1.0).contains(&signal.score));
            assert!((0.0..=1.0).contains(&signal.confidence));
        }
        for p in [result.aggregate_probability, result.raw_probability, result.disagreement_spread]
            .into_iter()
            .flatten()
        {
            assert!((0.0..=1.0).contains(&p));
        }
        assert!((0.0..=1.0).contains(&result.detection_confidence));
    }

    #[test]
    fn test_short_document_is_insufficient_data() {
        let result = analyzer().analyze_sync(&Document::new("Too short to judge.", None));
        assert_eq!(result.status, AnalysisStatus::InsufficientData);
        assert_eq!(result.verdict, Verdict::CannotDetermine);
        assert_eq!(result.aggregate_probability, None);
        assert_eq!(result.confidence_tier, ConfidenceTier::NotAssessed);

        let empty = analyzer().analyze_sync(&Document::new("", None));
        assert_eq!(empty.status, AnalysisStatus::InsufficientData);
    }

    #[test]
    fn test_unstructured_document_reports_zero_sections() {
        let result = analyzer().analyze_sync(&Document::new(&neutral_text(300), None));
        let sections = result.sections.as_ref().unwrap();
        assert_eq!(sections.sections_analyzed, 0);
        assert_eq!(sections.reason, Some(SectionSkipReason::NoStructuralBoundaries));
        assert!(result
            .reduced_confidence_flags
            .iter()
            .any(|f| f == "signal_dropped:section_aggregate:insufficient_data"));
        assert!(result.signals.iter().all(|s| s.method != MethodId::SectionAggregate));
    }

    #[test]
    fn test_analysis_id_depends_on_inputs() {
        let analyzer = analyzer();
        let text = neutral_text(100);
        let a = analyzer.analysis_id(&Document::new(&text, None));
        let b = analyzer.analysis_id(&Document::new(&text, None));
        let c = analyzer.analysis_id(&Document::new(&text, Some(DocumentType::Budget)));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.get_version_num(), 5);
    }

    #[test]
    fn test_legislation_baseline_keeps_raw_score() {
        let lexicon = Lexicon::load_or_builtin(None).unwrap();
        let analyzer = Analyzer::new(AnalyzerConfig::default(), lexicon).unwrap();
        let clause = "The Secretary shall, pursuant to this section and notwithstanding any other \
                      provision of law, issue rules in accordance with subsection (b). ";
        let text = format!("{}{}", clause.repeat(12), neutral_text(300));
        let result = analyzer.analyze_sync(&Document::new(&text, None));
        let adj = &result.baseline_adjustment;
        assert_eq!(adj.document_type, DocumentType::Legislation);
        assert!(result.raw_probability.is_some());
        if adj.applied {
            let raw = result.raw_probability.unwrap();
            let aggregate = result.aggregate_probability.unwrap();
            assert!((aggregate - crate::models::unit(raw + adj.delta)).abs() < 1e-3);
            assert!(!adj.rationale.is_empty());
            assert!(!adj.category_deviations.is_empty());
        } else {
            assert_eq!(result.aggregate_probability, result.raw_probability);
        }
    }

    #[tokio::test]
    async fn test_batch_runs_all_documents() {
        let analyzer = analyzer();
        let items: Vec<BatchInput> = (0..5)
            .map(|i| BatchInput {
                id: format!("doc-{}", i),
                document: Document::new(&neutral_text(200 + i * 50), None),
            })
            .collect();
        let report = analyzer.analyze_batch(items, Arc::new(AtomicBool::new(false))).await;
        assert_eq!(report.items.len(), 5);
        assert_eq!(report.summary.count, 5);
        assert_eq!(report.summary.not_dispatched, 0);
        assert_eq!(report.items[3].id(), "doc-3");
        assert_eq!(report.summary.assessed + report.summary.cannot_assess, 5);
    }

    #[tokio::test]
    async fn test_cancelled_batch_dispatches_nothing() {
        let analyzer = analyzer();
        let items: Vec<BatchInput> = (0..3)
            .map(|i| BatchInput {
                id: format!("doc-{}", i),
                document: Document::new(&neutral_text(200), None),
            })
            .collect();
        let report = analyzer.analyze_batch(items, Arc::new(AtomicBool::new(true))).await;
        assert_eq!(report.summary.not_dispatched, 3);
        assert!(report
            .items
            .iter()
            .all(|i| matches!(i, BatchItemOutcome::NotDispatched { .. })));
        assert_eq!(report.summary.avg_probability, None);
    }

    fn dropped_codes(result: &ConsensusResult) -> Vec<(MethodId, String)> {
        result
            .dropped_signals
            .iter()
            .map(|d| (d.method, d.reason_code.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_stalled_detector_times_out_and_is_dropped() {
        let config = AnalyzerConfig {
            detector_timeout_ms: 200,
            ..AnalyzerConfig::default()
        };
        let analyzer = Analyzer::new(config, test_lexicon())
            .unwrap()
            .with_fault(MethodId::SentenceLevel, DetectorFault::Stall(1000));
        let result = analyzer.analyze(Arc::new(Document::new(&neutral_text(400), None))).await;

        assert!(dropped_codes(&result).contains(&(MethodId::SentenceLevel, "timeout".to_string())));
        assert!(result
            .reduced_confidence_flags
            .iter()
            .any(|f| f == "signal_dropped:sentence_level:timeout"));
        assert!(result.sentences.is_none());
        assert!(result.signals.iter().all(|s| s.method != MethodId::SentenceLevel));
    }

    #[test]
    fn test_panicking_detector_is_dropped_in_sequential_run() {
        let analyzer = analyzer().with_fault(MethodId::Statistical, DetectorFault::Panic);
        let result = analyzer.analyze_sync(&Document::new(&neutral_text(400), None));

        assert_eq!(dropped_codes(&result), vec![
            (MethodId::Statistical, "panicked".to_string()),
            (MethodId::SectionAggregate, "insufficient_data".to_string()),
        ]);
        let dropped = &result.dropped_signals[0];
        assert!(dropped.detail.contains("statistical detector fault"), "{}", dropped.detail);
        assert!(result.statistics.is_none());
        assert_eq!(result.status, AnalysisStatus::Assessed);
    }

    #[tokio::test]
    async fn test_panicking_detector_is_dropped_in_concurrent_run() {
        let analyzer = analyzer().with_fault(MethodId::DocumentLevel, DetectorFault::Panic);
        let doc = Document::new(&neutral_text(400), None);
        let concurrent = analyzer.analyze(Arc::new(doc.clone())).await;

        assert!(dropped_codes(&concurrent).contains(&(MethodId::DocumentLevel, "panicked".to_string())));
        assert!(concurrent
            .reduced_confidence_flags
            .iter()
            .any(|f| f == "signal_dropped:document_level:panicked"));
        assert_eq!(concurrent, analyzer.analyze_sync(&doc));
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_finishes_in_flight_document() {
        let config = AnalyzerConfig {
            batch_parallelism: 1,
            ..AnalyzerConfig::default()
        };
        let analyzer = Analyzer::new(config, test_lexicon())
            .unwrap()
            .with_fault(MethodId::Statistical, DetectorFault::Stall(300));
        let items: Vec<BatchInput> = (0..3)
            .map(|i| BatchInput {
                id: format!("doc-{}", i),
                document: Document::new(&neutral_text(200), None),
            })
            .collect();

        let cancel = Arc::new(AtomicBool::new(false));
        let trigger = Arc::clone(&cancel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.store(true, Ordering::SeqCst);
        });

        let report = analyzer.analyze_batch(items, cancel).await;
        assert_eq!(report.items.len(), 3);
        assert!(matches!(report.items[0], BatchItemOutcome::Completed { .. }));
        assert!(matches!(report.items[1], BatchItemOutcome::NotDispatched { .. }));
        assert!(matches!(report.items[2], BatchItemOutcome::NotDispatched { .. }));
        assert_eq!(report.summary.not_dispatched, 2);
        assert_eq!(report.summary.failed, 0);
    }

    #[test]
    fn test_batch_summary_percentiles() {
        let analyzer = analyzer();
        let result = analyzer.analyze_sync(&Document::new(&neutral_text(300), None));
        let items: Vec<BatchItemOutcome> = vec![
            BatchItemOutcome::Completed {
                id: "a".to_string(),
                result: Box::new(result),
            },
            BatchItemOutcome::Failed {
                id: "b".to_string(),
                error: "join error".to_string(),
            },
        ];
        let summary = summarize_batch(&items);
        assert_eq!(summary.count, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.avg_probability, summary.p95_probability);
    }
}
