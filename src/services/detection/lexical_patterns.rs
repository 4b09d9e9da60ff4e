// Lexical Pattern Counter
// Counts category-tagged trigger patterns and maps weighted density to a signal

use crate::models::{round4, CategoryCount, DetectionSignal, LexicalCounts, MethodId};
use crate::services::errors::DetectorError;
use crate::services::lexicon::PatternCategory;

/// Weighted hits per 1,000 words at which the lexical score reaches ~0.63.
const DENSITY_SCALE: f64 = 6.0;

fn per_1k(count: f64, word_count: usize) -> f64 {
    if word_count == 0 {
        0.0
    } else {
        count * 1000.0 / word_count as f64
    }
}

/// Count every category over `text`, keeping declared category order.
pub fn count_patterns(text: &str, word_count: usize, categories: &[PatternCategory]) -> LexicalCounts {
    let mut total = 0usize;
    let mut weighted = 0.0;
    let counts: Vec<CategoryCount> = categories
        .iter()
        .map(|category| {
            let count = category.count(text);
            total += count;
            weighted += category.weight * count as f64;
            CategoryCount {
                name: category.name.clone(),
                count,
                weight: category.weight,
                per_1k_words: round4(per_1k(count as f64, word_count)),
            }
        })
        .collect();

    LexicalCounts {
        word_count,
        categories: counts,
        total,
        weighted_per_1k: per_1k(weighted, word_count),
    }
}

/// Saturating map from weighted density to [0, 1).
pub fn density_score(weighted_per_1k: f64) -> f64 {
    1.0 - (-weighted_per_1k.max(0.0) / DENSITY_SCALE).exp()
}

pub fn lexical_signal(counts: &LexicalCounts) -> Result<DetectionSignal, DetectorError> {
    if counts.word_count == 0 {
        return Err(DetectorError::InsufficientData("no words to scan".to_string()));
    }
    if counts.categories.is_empty() {
        return Err(DetectorError::InsufficientData("no pattern categories loaded".to_string()));
    }

    let score = density_score(counts.weighted_per_1k);
    let length_factor = (counts.word_count as f64 / 400.0).min(1.0);
    let confidence = 0.2 + 0.6 * length_factor;

    let mut top: Vec<&CategoryCount> = counts.categories.iter().filter(|c| c.count > 0).collect();
    top.sort_by(|a, b| b.count.cmp(&a.count));
    let evidence = if top.is_empty() {
        format!("no trigger patterns in {} words", counts.word_count)
    } else {
        let listed = top
            .iter()
            .take(3)
            .map(|c| format!("{}={}", c.name, c.count))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} hits, weighted density {:.1}/1k words ({})",
            counts.total, counts.weighted_per_1k, listed
        )
    };

    Ok(DetectionSignal::new(MethodId::LexicalPattern, score, confidence, evidence))
}
