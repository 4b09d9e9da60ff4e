// Domain Baseline Corrector
// Explains away lexical evidence that a document type produces by convention
// (statutory boilerplate, fiscal vocabulary) and reports how much it did so.

use crate::models::{
    round4, unit, BaselineAdjustment, CategoryDeviation, DocumentType, LexicalCounts, TypeSource,
};
use crate::services::lexicon::Lexicon;

/// Effects smaller than this are reported as not applied.
pub const MIN_EFFECT: f64 = 0.005;

/// Declared type wins; otherwise the baseline whose detection category
/// exceeds its threshold by the largest ratio; otherwise `general`.
pub fn resolve_document_type(
    declared: Option<DocumentType>,
    counts: &LexicalCounts,
    lexicon: &Lexicon,
) -> (DocumentType, TypeSource) {
    if let Some(t) = declared {
        return (t, TypeSource::Declared);
    }

    let mut best: Option<(DocumentType, f64)> = None;
    for baseline in &lexicon.baselines {
        let Some(rule) = baseline.detect.as_ref() else {
            continue;
        };
        let observed = counts
            .category(&rule.category)
            .map(|c| c.per_1k_words)
            .unwrap_or(0.0);
        let ratio = observed / rule.min_per_1k;
        if ratio >= 1.0 && best.map_or(true, |(_, r)| ratio > r) {
            best = Some((baseline.document_type, ratio));
        }
    }

    match best {
        Some((t, _)) => (t, TypeSource::Detected),
        None => (DocumentType::General, TypeSource::Default),
    }
}

/// Compute the baseline adjustment for `raw`.
///
/// reliance = share of weighted lexical evidence from expected categories;
/// coverage = min(1, Σ w·observed / Σ w·expected);
/// x = Σ w·(observed − expected) / Σ w·expected;
/// adjustment = clamp(−max × reliance × coverage × clamp(1 − x, −0.5, 1), ±max).
/// Conventional density lowers the estimate in proportion to how much of it
/// is present; evidence far beyond the norm (x > 1) raises it.
pub fn compute_adjustment(
    raw: f64,
    counts: &LexicalCounts,
    lexicon: &Lexicon,
    document_type: DocumentType,
    type_source: TypeSource,
) -> BaselineAdjustment {
    let Some(baseline) = lexicon.baseline(document_type) else {
        return BaselineAdjustment::not_applied(
            document_type,
            type_source,
            format!("no baseline defined for {} documents", document_type.as_str()),
        );
    };

    let total_weighted: f64 = counts
        .categories
        .iter()
        .map(|c| c.weight * c.per_1k_words)
        .sum();

    let mut expected_weighted = 0.0;
    let mut observed_weighted = 0.0;
    let mut excess_weighted = 0.0;
    let mut deviations = Vec::with_capacity(baseline.expected.len());
    for expected in &baseline.expected {
        let (weight, observed) = counts
            .category(&expected.category)
            .map(|c| (c.weight, c.per_1k_words))
            .unwrap_or((0.0, 0.0));
        expected_weighted += weight * expected.per_1k;
        observed_weighted += weight * observed;
        excess_weighted += weight * (observed - expected.per_1k);
        deviations.push(CategoryDeviation {
            category: expected.category.clone(),
            observed_per_1k: round4(observed),
            expected_per_1k: expected.per_1k,
        });
    }

    let mut result = BaselineAdjustment::not_applied(document_type, type_source, String::new());
    result.max_adjustment = baseline.max_adjustment;
    result.category_deviations = deviations;

    if total_weighted <= 0.0 || observed_weighted <= 0.0 {
        result.rationale = format!(
            "{} baseline: no lexical evidence from expected categories to correct",
            document_type.as_str()
        );
        return result;
    }
    if expected_weighted <= 0.0 {
        result.rationale = format!(
            "{} baseline expects no lexical evidence; nothing to correct",
            document_type.as_str()
        );
        return result;
    }

    let reliance = (observed_weighted / total_weighted).clamp(0.0, 1.0);
    let coverage = (observed_weighted / expected_weighted).min(1.0);
    let excess = excess_weighted / expected_weighted;
    let max = baseline.max_adjustment;
    let adjustment = (-max * reliance * coverage * (1.0 - excess).clamp(-0.5, 1.0)).clamp(-max, max);
    let delta = unit(raw + adjustment) - raw;

    result.reliance = round4(reliance);
    result.confidence_penalty = round4(baseline.penalty_rate * reliance);

    if delta.abs() < MIN_EFFECT {
        result.rationale = format!(
            "{} baseline: effect {:+.4} below {:.3}; not applied (reliance {:.0}%, coverage {:.0}%, relative excess {:.2})",
            document_type.as_str(),
            delta,
            MIN_EFFECT,
            reliance * 100.0,
            coverage * 100.0,
            excess
        );
        return result;
    }

    result.applied = true;
    result.delta = round4(delta);
    result.rationale = format!(
        "{} baseline ({}): {:.0}% of lexical evidence comes from categories this document type \
         uses by convention, observed at {:.0}% of the expected density; relative excess {:.2}; \
         adjusted {:+.3}",
        document_type.as_str(),
        type_source_label(type_source),
        reliance * 100.0,
        coverage * 100.0,
        excess,
        delta
    );
    result
}

fn type_source_label(source: TypeSource) -> &'static str {
    match source {
        TypeSource::Declared => "declared",
        TypeSource::Detected => "detected",
        TypeSource::Default => "default",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::detection::lexical_patterns::count_patterns;
    use crate::services::text_processor::word_count;

    fn lexicon() -> Lexicon {
        Lexicon::from_json_str(
            r#"{"version":"t",
                "categories":[
                    {"name":"legal","weight":0.5,"triggers":["shall","pursuant to"]},
                    {"name":"vocab","weight":1.0,"triggers":["delve"]}
                ],
                "baselines":[{"documentType":"legislation","maxAdjustment":0.15,"penaltyRate":0.3,
                    "expected":[{"category":"legal","per1k":20.0}],
                    "detect":{"category":"legal","minPer1k":10.0}}]}"#,
        )
        .unwrap()
    }

    fn counts_for(text: &str, lex: &Lexicon) -> LexicalCounts {
        count_patterns(text, word_count(text), &lex.categories)
    }

    fn statute(hits: usize, filler: usize) -> String {
        let mut text = "The agency shall act pursuant to this part. ".repeat(hits);
        text.push_str(&"records ".repeat(filler));
        text
    }

    #[test]
    fn test_detects_type_from_density() {
        let lex = lexicon();
        let counts = counts_for(&statute(5, 100), &lex);
        assert_eq!(
            resolve_document_type(None, &counts, &lex),
            (DocumentType::Legislation, TypeSource::Detected)
        );
        assert_eq!(
            resolve_document_type(Some(DocumentType::Budget), &counts, &lex),
            (DocumentType::Budget, TypeSource::Declared)
        );
        let plain = counts_for(&"records ".repeat(100), &lex);
        assert_eq!(
            resolve_document_type(None, &plain, &lex),
            (DocumentType::General, TypeSource::Default)
        );
    }

    #[test]
    fn test_boilerplate_lowers_estimate_and_is_audited() {
        let lex = lexicon();
        // 10 hits over ~1000 words: below the expected density
        let counts = counts_for(&statute(5, 960), &lex);
        let adj = compute_adjustment(0.7, &counts, &lex, DocumentType::Legislation, TypeSource::Declared);
        assert!(adj.applied);
        assert!(adj.delta < 0.0 && adj.delta >= -0.15);
        assert_eq!(adj.reliance, 1.0);
        assert!((adj.confidence_penalty - 0.3).abs() < 1e-9);
        assert_eq!(adj.category_deviations.len(), 1);
        assert!(!adj.rationale.is_empty());
    }

    #[test]
    fn test_general_documents_are_not_adjusted() {
        let lex = lexicon();
        let counts = counts_for(&statute(5, 100), &lex);
        let adj = compute_adjustment(0.7, &counts, &lex, DocumentType::General, TypeSource::Default);
        assert!(!adj.applied);
        assert_eq!(adj.delta, 0.0);
    }

    #[test]
    fn test_tiny_effect_is_not_applied() {
        let lex = lexicon();
        // Mostly unexpected-category evidence: reliance is small
        let mut text = "delve ".repeat(200);
        text.push_str("The agency shall act. ");
        text.push_str(&"records ".repeat(800));
        let counts = counts_for(&text, &lex);
        let adj = compute_adjustment(0.5, &counts, &lex, DocumentType::Legislation, TypeSource::Declared);
        assert!(!adj.applied);
        assert_eq!(adj.delta, 0.0);
        assert!(adj.reliance > 0.0 && adj.reliance < 0.01);
    }

    #[test]
    fn test_sparse_boilerplate_barely_adjusts() {
        let lex = lexicon();
        // 2 hits over 1200 words: about 1/12 of the expected 20 per 1k
        let counts = counts_for(&statute(1, 1192), &lex);
        let adj = compute_adjustment(0.75, &counts, &lex, DocumentType::Legislation, TypeSource::Declared);
        assert_eq!(adj.reliance, 1.0);
        assert!(adj.delta <= 0.0);
        assert!(adj.delta.abs() < 0.15 / 4.0, "delta {}", adj.delta);

        // Full expected density gets the full correction
        let dense = counts_for(&statute(10, 920), &lex);
        let full = compute_adjustment(0.75, &dense, &lex, DocumentType::Legislation, TypeSource::Declared);
        assert!(full.delta < adj.delta);
        assert!((full.delta + 0.15).abs() < 1e-3, "delta {}", full.delta);
    }

    #[test]
    fn test_single_builtin_boilerplate_hit_is_not_a_full_correction() {
        let lex = Lexicon::load_or_builtin(None).unwrap();
        let mut text = "records ".repeat(1000);
        text.push_str("The agency shall act.");
        let counts = counts_for(&text, &lex);
        let adj = compute_adjustment(0.8, &counts, &lex, DocumentType::Legislation, TypeSource::Declared);
        assert!(adj.delta.abs() < 0.02, "delta {}", adj.delta);
        assert!(0.8 + adj.delta > 0.65);
    }

    #[test]
    fn test_adjusted_value_stays_in_unit_interval() {
        let lex = lexicon();
        let counts = counts_for(&statute(5, 960), &lex);
        let adj = compute_adjustment(0.01, &counts, &lex, DocumentType::Legislation, TypeSource::Declared);
        assert!(0.01 + adj.delta >= 0.0);
    }
}
