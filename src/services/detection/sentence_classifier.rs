// Sentence-Level Classifier
// Reapplies the heuristic battery per sentence and reports the flagged fraction

use crate::models::{round4, DetectionSignal, MethodId, SentenceReport};
use crate::services::errors::DetectorError;
use crate::services::lexicon::Lexicon;
use crate::services::text_processor::split_sentences_advanced;

use super::document_scorer::score_text;

pub const BOUNDARY_RULE: &str = "terminal . ! ? (or CJK forms), optional closing quotes/brackets, \
then whitespace or end of text; blank lines always break; no break after decimals, known \
abbreviations, single-letter initials, or before a lowercase word";

pub fn classify_sentences(text: &str, lexicon: &Lexicon, threshold: f64) -> SentenceReport {
    let sentences = split_sentences_advanced(text);
    let mut sentence_scores = Vec::with_capacity(sentences.len());
    let mut flagged_indices = Vec::new();

    for sentence in &sentences {
        let score = score_text(&sentence.text, lexicon).probability;
        if score >= threshold {
            flagged_indices.push(sentence.index);
        }
        sentence_scores.push(round4(score));
    }

    let sentence_count = sentences.len();
    let flagged_count = flagged_indices.len();
    let flagged_fraction = if sentence_count == 0 {
        None
    } else {
        Some(round4(flagged_count as f64 / sentence_count as f64))
    };

    tracing::debug!(
        "[SENTENCE] {} sentences, {} flagged at threshold {:.2}",
        sentence_count,
        flagged_count,
        threshold
    );

    SentenceReport {
        sentence_count,
        flagged_count,
        flagged_fraction,
        flagged_indices,
        sentence_scores,
        threshold,
        boundary_rule: BOUNDARY_RULE.to_string(),
    }
}

pub fn sentence_signal(report: &SentenceReport) -> Result<DetectionSignal, DetectorError> {
    let Some(fraction) = report.flagged_fraction else {
        return Err(DetectorError::InsufficientData("zero sentences".to_string()));
    };
    let confidence = 0.1 + 0.8 * (report.sentence_count as f64 / 20.0).min(1.0);
    Ok(DetectionSignal::new(
        MethodId::SentenceLevel,
        fraction,
        confidence,
        format!(
            "{} of {} sentences at or above {:.2}",
            report.flagged_count, report.sentence_count, report.threshold
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> Lexicon {
        Lexicon::from_json_str(
            r#"{"version":"t","categories":[{"name":"vocab","weight":1.0,"triggers":["delve","tapestry","pivotal"]}]}"#,
        )
        .unwrap()
    }

    const TEXT: &str = "The ferry left at noon. We delve into a pivotal tapestry. \
                        Gulls followed it out. Let us delve into the pivotal tapestry again.";

    #[test]
    fn test_flags_trigger_sentences() {
        let report = classify_sentences(TEXT, &lexicon(), 0.6);
        assert_eq!(report.sentence_count, 4);
        assert_eq!(report.flagged_indices, vec![1, 3]);
        assert_eq!(report.flagged_fraction, Some(0.5));
        assert_eq!(report.sentence_scores.len(), 4);
    }

    #[test]
    fn test_indices_are_idempotent() {
        let lex = lexicon();
        let first = classify_sentences(TEXT, &lex, 0.6);
        for _ in 0..5 {
            assert_eq!(classify_sentences(TEXT, &lex, 0.6), first);
        }
    }

    #[test]
    fn test_no_sentences_drops_signal() {
        let report = classify_sentences("   ", &lexicon(), 0.6);
        assert_eq!(report.sentence_count, 0);
        assert_eq!(report.flagged_fraction, None);
        assert!(sentence_signal(&report).is_err());
    }

    #[test]
    fn test_signal_confidence_grows_with_sentences() {
        let lex = lexicon();
        let short = sentence_signal(&classify_sentences(TEXT, &lex, 0.6)).unwrap();
        let long_text = vec![TEXT; 6].join(" ");
        let long = sentence_signal(&classify_sentences(&long_text, &lex, 0.6)).unwrap();
        assert!(long.confidence > short.confidence);
        assert!((short.score - 0.5).abs() < 1e-9);
    }
}
