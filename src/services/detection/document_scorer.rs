// Document Scorer
// Heuristic battery shared by the document, section and sentence detectors.
//
// Uses soft thresholds (sigmoid) and logit-space accumulation so the output
// is continuous rather than bucketed.

use crate::models::{DetectionSignal, LexicalCounts, MethodId};
use crate::services::errors::DetectorError;
use crate::services::lexicon::Lexicon;
use crate::services::text_processor::{compute_stylometry, estimate_perplexity, lowercase_words, word_count};

use super::fingerprint::score_generators;
use super::lexical_patterns::count_patterns;
use super::statistics::moving_average_ttr;

/// Stylometric features are noise below this many words.
pub const STYLOMETRY_MIN_WORDS: usize = 30;

// ============================================================================
// Soft threshold functions for continuous scoring
// ============================================================================

/// Sigmoid function: smooth transition around center
/// k controls steepness (smaller = steeper)
#[inline]
pub(crate) fn sigmoid(x: f64, center: f64, k: f64) -> f64 {
    1.0 / (1.0 + ((x - center) / k).exp())
}

/// Inverse sigmoid: 1 - sigmoid (for "greater than" thresholds)
#[inline]
pub(crate) fn sigmoid_inv(x: f64, center: f64, k: f64) -> f64 {
    1.0 - sigmoid(x, center, k)
}

/// Convert logit back to probability
#[inline]
pub(crate) fn from_logit(logit: f64) -> f64 {
    1.0 / (1.0 + (-logit).exp())
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatteryScore {
    pub probability: f64,
    pub confidence: f64,
    pub word_count: usize,
    pub explanations: Vec<String>,
}

/// Score a span of text with the full battery.
pub fn score_text(text: &str, lexicon: &Lexicon) -> BatteryScore {
    let words = word_count(text);
    let counts = count_patterns(text, words, &lexicon.categories);
    let fingerprint = score_generators(text, words, &lexicon.generators)
        .iter()
        .map(|g| g.score)
        .fold(0.0_f64, f64::max);
    score_with_evidence(text, words, &counts, fingerprint)
}

/// Score with precomputed lexical counts and best fingerprint score.
pub fn score_with_evidence(text: &str, words: usize, counts: &LexicalCounts, fingerprint: f64) -> BatteryScore {
    let mut explanations: Vec<String> = Vec::new();
    if words == 0 {
        return BatteryScore {
            probability: 0.5,
            confidence: 0.0,
            word_count: 0,
            explanations,
        };
    }

    // Slight prior toward human-written
    let mut logit: f64 = -0.4;

    // 1. Lexical trigger density
    let density = counts.weighted_per_1k;
    let lex_contrib = sigmoid_inv(density, 8.0, 3.0) * 1.6;
    logit += lex_contrib;
    if lex_contrib > 0.3 {
        explanations.push(format!("lexical_density={:.1} contrib={:.2}", density, lex_contrib));
    }

    // 2. Generator fingerprints
    let fp_contrib = fingerprint * 1.4;
    logit += fp_contrib;
    if fp_contrib > 0.2 {
        explanations.push(format!("fingerprint={:.2} contrib={:.2}", fingerprint, fp_contrib));
    }

    if words >= STYLOMETRY_MIN_WORDS {
        logit += stylometric_logit(text, &mut explanations);
    }

    let probability = from_logit(logit).clamp(0.02, 0.98);

    // Confidence grows with length, capped below certainty
    let confidence = (0.3 + (words as f64 / 400.0).min(1.0) * 0.55).min(0.85);

    BatteryScore {
        probability,
        confidence,
        word_count: words,
        explanations,
    }
}

fn stylometric_logit(text: &str, explanations: &mut Vec<String>) -> f64 {
    let metrics = compute_stylometry(text);
    let tokens = lowercase_words(text);
    // Windowed diversity so long documents are not read as repetitive
    let ttr = moving_average_ttr(&tokens, 50).unwrap_or(metrics.ttr);
    let rep = metrics.repeat_ratio;
    let ngram = metrics.ngram_repeat_rate;
    let avg_len = metrics.avg_sentence_words;
    let ppl = estimate_perplexity(text);
    let mut logit = 0.0;

    // Low diversity suggests template-like generation
    let ttr_contrib = sigmoid(ttr, 0.62, 0.05) * 1.0 - sigmoid_inv(ttr, 0.80, 0.05) * 0.8;
    logit += ttr_contrib;
    if ttr_contrib.abs() > 0.3 {
        explanations.push(format!("mattr={:.3} contrib={:.2}", ttr, ttr_contrib));
    }

    let rep_contrib = sigmoid_inv(rep, 0.22, 0.06) * 0.6;
    logit += rep_contrib;
    if rep_contrib > 0.3 {
        explanations.push(format!("repeat={:.3} contrib={:.2}", rep, rep_contrib));
    }

    let ngram_contrib = sigmoid_inv(ngram, 0.10, 0.04) * 1.1;
    logit += ngram_contrib;
    if ngram_contrib > 0.3 {
        explanations.push(format!("ngram={:.3} contrib={:.2}", ngram, ngram_contrib));
    }

    // U-shaped: very short or very long sentences
    let len_contrib = sigmoid(avg_len, 8.0, 3.0) * 0.3 + sigmoid_inv(avg_len, 35.0, 6.0) * 0.4;
    logit += len_contrib;
    if len_contrib > 0.15 {
        explanations.push(format!("avg_len={:.1} contrib={:.2}", avg_len, len_contrib));
    }

    // Low perplexity suggests predictable wording
    let ppl_contrib = sigmoid(ppl, 85.0, 20.0) * 1.0 - sigmoid_inv(ppl, 200.0, 30.0) * 0.6;
    logit += ppl_contrib;
    if ppl_contrib.abs() > 0.2 {
        explanations.push(format!("ppl={:.1} contrib={:.2}", ppl, ppl_contrib));
    }

    logit
}

pub fn document_signal(score: &BatteryScore) -> Result<DetectionSignal, DetectorError> {
    if score.word_count == 0 {
        return Err(DetectorError::InsufficientData("no words to score".to_string()));
    }
    let evidence = if score.explanations.is_empty() {
        "no salient features".to_string()
    } else {
        score.explanations.join("; ")
    };
    Ok(DetectionSignal::new(
        MethodId::DocumentLevel,
        score.probability,
        score.confidence,
        evidence,
    ))
}
