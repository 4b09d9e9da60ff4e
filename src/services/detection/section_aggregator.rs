// Section-Level Aggregator
// Reruns document-level scoring and attribution per structural section

use crate::models::{
    round4, AttributionSummary, DetectionSignal, Document, MethodId, SectionReport, SectionScore,
    SectionSkipReason, SectionStatus,
};
use crate::services::errors::DetectorError;
use crate::services::lexicon::Lexicon;
use crate::services::text_processor::word_count;

use super::document_scorer::score_with_evidence;
use super::fingerprint::fingerprint_report;
use super::lexical_patterns::count_patterns;

#[derive(Debug, Clone, Copy)]
pub struct SectionSettings {
    pub min_words: usize,
    pub attribution_margin: f64,
    pub attribution_min_score: f64,
}

pub fn aggregate_sections(doc: &Document, lexicon: &Lexicon, settings: SectionSettings) -> SectionReport {
    let boundaries = doc.sections();
    let mut sections = Vec::with_capacity(boundaries.len());

    for boundary in boundaries {
        let body = doc.section_text(boundary);
        let words = word_count(body);
        let mut entry = SectionScore {
            index: boundary.index,
            heading: boundary.heading.clone(),
            start: boundary.start,
            end: boundary.end,
            word_count: words,
            status: SectionStatus::TooShort,
            score: None,
            confidence: None,
            attribution: None,
        };

        if words >= settings.min_words {
            let counts = count_patterns(body, words, &lexicon.categories);
            let fingerprints = fingerprint_report(
                body,
                words,
                &lexicon.generators,
                settings.attribution_margin,
                settings.attribution_min_score,
            );
            let best = fingerprints
                .generators
                .iter()
                .map(|g| g.score)
                .fold(0.0_f64, f64::max);
            let battery = score_with_evidence(body, words, &counts, best);

            entry.status = SectionStatus::Analyzed;
            entry.score = Some(round4(battery.probability));
            entry.confidence = Some(round4(battery.confidence));
            entry.attribution = Some(AttributionSummary::from_verdict(
                fingerprints.attribution,
                settings.attribution_margin,
            ));
        }
        sections.push(entry);
    }

    let analyzed: Vec<f64> = sections.iter().filter_map(|s| s.score).collect();
    let reason = if sections.is_empty() {
        Some(SectionSkipReason::NoStructuralBoundaries)
    } else if analyzed.is_empty() {
        Some(SectionSkipReason::AllSectionsTooShort)
    } else {
        None
    };
    let mean_score = if analyzed.is_empty() {
        None
    } else {
        Some(round4(analyzed.iter().sum::<f64>() / analyzed.len() as f64))
    };

    tracing::debug!(
        "[SECTION] {} sections detected, {} analyzed",
        sections.len(),
        analyzed.len()
    );

    SectionReport {
        sections_detected: sections.len(),
        sections_analyzed: analyzed.len(),
        reason,
        mean_score,
        sections,
    }
}

pub fn section_signal(report: &SectionReport) -> Result<DetectionSignal, DetectorError> {
    let Some(mean) = report.mean_score else {
        let code = report
            .reason
            .map(|r| r.code())
            .unwrap_or("no_sections_analyzed");
        return Err(DetectorError::InsufficientData(code.to_string()));
    };

    let confidences: Vec<f64> = report.sections.iter().filter_map(|s| s.confidence).collect();
    let avg_confidence = confidences.iter().sum::<f64>() / confidences.len().max(1) as f64;
    let coverage = (report.sections_analyzed as f64 / 4.0).min(1.0);
    let confidence = avg_confidence * (0.5 + 0.5 * coverage);

    Ok(DetectionSignal::new(
        MethodId::SectionAggregate,
        mean,
        confidence,
        format!(
            "mean of {} analyzed sections ({} detected)",
            report.sections_analyzed, report.sections_detected
        ),
    ))
}
