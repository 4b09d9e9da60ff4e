// Phrase Fingerprint Matcher
// Per-generator phrase scores and the margin-rule attribution verdict

use crate::models::{
    round4, AttributionCandidate, DetectionSignal, FingerprintReport, GeneratorAttribution,
    GeneratorScore, MethodId, PhraseHit,
};
use crate::services::errors::DetectorError;
use crate::services::lexicon::GeneratorProfile;

/// Surrounding prose never counts as fewer words than this.
pub const MIN_PROSE_WORDS: usize = 50;

/// Score one generator: Σ weight × tier multiplier × occurrences per 1,000
/// words of surrounding prose, saturating at 1.0.
///
/// Surrounding prose is the text's words minus the words this generator's
/// own matches consumed, so inserting another matched phrase can only raise
/// the score.
pub fn score_generator(text: &str, word_count: usize, profile: &GeneratorProfile) -> GeneratorScore {
    let scan = profile.scan(text);
    let mut weighted_hits = 0.0;
    let mut matches = 0usize;
    let mut matched_phrases = Vec::new();

    for (phrase, &occurrences) in profile.phrases.iter().zip(scan.occurrences.iter()) {
        if occurrences == 0 {
            continue;
        }
        matches += occurrences;
        weighted_hits += phrase.weight * phrase.multiplier * occurrences as f64;
        matched_phrases.push(PhraseHit {
            phrase: phrase.phrase.clone(),
            tier: phrase.tier,
            occurrences,
        });
    }

    let prose = word_count.saturating_sub(scan.matched_words).max(MIN_PROSE_WORDS);
    let score = (weighted_hits * 1000.0 / prose as f64).min(1.0);

    GeneratorScore {
        generator: profile.id.clone(),
        display_name: profile.display_name.clone(),
        score: round4(score),
        matches,
        weighted_hits: round4(weighted_hits),
        matched_phrases,
    }
}

pub fn score_generators(text: &str, word_count: usize, profiles: &[GeneratorProfile]) -> Vec<GeneratorScore> {
    profiles
        .iter()
        .map(|p| score_generator(text, word_count, p))
        .collect()
}

/// Margin rule: the top generator wins only when the runner-up trails it by
/// more than `margin`; otherwise every generator within the margin of the top
/// is a candidate. A top score below `min_score` is not evidence of any
/// generator, and neither is a lone score that cannot clear the margin.
pub fn attribute(scores: &[GeneratorScore], margin: f64, min_score: f64) -> GeneratorAttribution {
    let mut ranked: Vec<&GeneratorScore> = scores.iter().collect();
    // Stable: equal scores keep declared profile order.
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let Some(top) = ranked.first() else {
        return GeneratorAttribution::Unknown {
            reason: "no generator profiles loaded".to_string(),
        };
    };
    if top.score < min_score {
        return GeneratorAttribution::Unknown {
            reason: format!(
                "top fingerprint score {:.3} below evidence floor {:.2}",
                top.score, min_score
            ),
        };
    }

    let runner_up = ranked.get(1).map(|s| s.score).unwrap_or(0.0);
    let gap = top.score - runner_up;
    if gap <= margin {
        let candidates: Vec<AttributionCandidate> = ranked
            .iter()
            .filter(|s| s.score > 0.0 && top.score - s.score <= margin)
            .map(|s| AttributionCandidate {
                generator: s.generator.clone(),
                score: s.score,
            })
            .collect();
        if candidates.len() < 2 {
            return GeneratorAttribution::Unknown {
                reason: format!(
                    "weak evidence: only {} has fingerprint hits and its score {:.3} does not clear margin {:.2}",
                    top.generator, top.score, margin
                ),
            };
        }
        return GeneratorAttribution::Mixed { candidates };
    }

    let confidence = top.score * (gap / (2.0 * margin.max(1e-9))).min(1.0);
    GeneratorAttribution::Single {
        generator: top.generator.clone(),
        confidence: round4(confidence.clamp(0.0, 1.0)),
    }
}

pub fn fingerprint_report(
    text: &str,
    word_count: usize,
    profiles: &[GeneratorProfile],
    margin: f64,
    min_score: f64,
) -> FingerprintReport {
    let generators = score_generators(text, word_count, profiles);
    let attribution = attribute(&generators, margin, min_score);
    FingerprintReport {
        word_count,
        generators,
        attribution,
    }
}

pub fn fingerprint_signal(report: &FingerprintReport) -> Result<DetectionSignal, DetectorError> {
    if report.generators.is_empty() {
        return Err(DetectorError::InsufficientData("no generator profiles loaded".to_string()));
    }
    if report.word_count == 0 {
        return Err(DetectorError::InsufficientData("no words to scan".to_string()));
    }

    let best = report
        .generators
        .iter()
        .max_by(|a, b| a.score.total_cmp(&b.score))
        .map(|g| g.score)
        .unwrap_or(0.0);
    let length_factor = (report.word_count as f64 / 500.0).min(1.0);
    // Absence of fingerprints is weaker evidence than their presence.
    let confidence = if best > 0.0 {
        0.3 + 0.5 * length_factor
    } else {
        0.15 + 0.25 * length_factor
    };

    let evidence = match &report.attribution {
        GeneratorAttribution::Single { generator, .. } => {
            format!("fingerprint {:.2} points to {}", best, generator)
        }
        GeneratorAttribution::Mixed { candidates } => format!(
            "fingerprint {:.2} shared by {} generators",
            best,
            candidates.len()
        ),
        GeneratorAttribution::Unknown { reason } => reason.clone(),
    };

    Ok(DetectionSignal::new(MethodId::Fingerprint, best, confidence, evidence))
}
