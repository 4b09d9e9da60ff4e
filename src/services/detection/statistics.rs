// Statistical Linguistic Profiler
// Burstiness, moving-average lexical diversity, passive voice and rare-word use.
// Every metric is bounded [0, 1] or carries an explicit null with a status.

use crate::models::{round4, DetectionSignal, MethodId, MetricReading, MetricStatus, StatisticalProfile};
use crate::services::errors::DetectorError;
use crate::services::text_processor::{lowercase_words, split_sentences_advanced, word_count};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::document_scorer::{from_logit, sigmoid, sigmoid_inv};

fn common_words() -> &'static HashSet<&'static str> {
    static WORDS: OnceLock<HashSet<&'static str>> = OnceLock::new();
    WORDS.get_or_init(|| {
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/common_words.txt"))
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .collect()
    })
}

fn passive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:am|is|are|was|were|be|been|being|get|gets|got|gotten|getting)\s+(?:\w+ly\s+)?(?:\w{2,}ed|born|brought|built|bought|caught|chosen|done|drawn|driven|found|given|gone|held|kept|known|laid|led|left|lost|made|meant|met|paid|put|read|run|said|seen|sent|set|shown|sold|spent|taken|taught|thought|told|understood|won|written)\b",
        )
        .expect("passive voice regex")
    })
}

/// Moving-average type/token ratio. Texts shorter than the window fall back
/// to plain TTR over all tokens.
pub fn moving_average_ttr(tokens: &[String], window: usize) -> Option<f64> {
    if tokens.is_empty() || window == 0 {
        return None;
    }
    if tokens.len() <= window {
        let unique: HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
        return Some(unique.len() as f64 / tokens.len() as f64);
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for t in &tokens[..window] {
        *counts.entry(t.as_str()).or_insert(0) += 1;
    }
    let mut sum = counts.len() as f64 / window as f64;
    let mut windows = 1usize;

    for i in window..tokens.len() {
        let outgoing = tokens[i - window].as_str();
        if let Some(c) = counts.get_mut(outgoing) {
            *c -= 1;
            if *c == 0 {
                counts.remove(outgoing);
            }
        }
        *counts.entry(tokens[i].as_str()).or_insert(0) += 1;
        sum += counts.len() as f64 / window as f64;
        windows += 1;
    }

    Some(sum / windows as f64)
}

fn burstiness(lengths: &[usize]) -> MetricReading {
    match lengths.len() {
        0 => MetricReading::undefined("zero sentences"),
        1 => MetricReading::insufficient("needs at least 2 sentences"),
        n => {
            let mean = lengths.iter().sum::<usize>() as f64 / n as f64;
            if mean == 0.0 {
                return MetricReading::undefined("mean sentence length is zero");
            }
            let variance = lengths
                .iter()
                .map(|&l| (l as f64 - mean).powi(2))
                .sum::<f64>()
                / n as f64;
            MetricReading::measured(round4((variance.sqrt() / mean).min(1.0)))
        }
    }
}

fn rare_word_frequency(tokens: &[String]) -> MetricReading {
    let common = common_words();
    let alphabetic: Vec<&str> = tokens
        .iter()
        .map(|t| t.split('\'').next().unwrap_or(""))
        .filter(|t| !t.is_empty() && t.chars().all(|c| c.is_ascii_alphabetic()))
        .collect();
    if alphabetic.is_empty() {
        return MetricReading::undefined("no alphabetic tokens");
    }
    let rare = alphabetic.iter().filter(|t| !common.contains(*t)).count();
    MetricReading::measured(round4(rare as f64 / alphabetic.len() as f64))
}

/// Profile `text`. Below `min_words` every metric reports insufficient data.
pub fn profile_text(text: &str, min_words: usize, diversity_window: usize) -> StatisticalProfile {
    let tokens = lowercase_words(text);
    let sentences = split_sentences_advanced(text);
    let words = tokens.len();

    if words < min_words {
        let note = format!("{} words; at least {} required", words, min_words);
        return StatisticalProfile {
            word_count: words,
            sentence_count: sentences.len(),
            diversity_window,
            burstiness: MetricReading::insufficient(note.clone()),
            lexical_diversity: MetricReading::insufficient(note.clone()),
            passive_voice_ratio: MetricReading::insufficient(note.clone()),
            rare_word_frequency: MetricReading::insufficient(note),
        };
    }

    let lengths: Vec<usize> = sentences
        .iter()
        .map(|s| word_count(&s.text))
        .filter(|&n| n > 0)
        .collect();

    let lexical_diversity = match moving_average_ttr(&tokens, diversity_window) {
        Some(v) => MetricReading::measured(round4(v)),
        None => MetricReading::undefined("no tokens"),
    };

    let passive_voice_ratio = if sentences.is_empty() {
        MetricReading::undefined("zero sentences")
    } else {
        let passive = sentences.iter().filter(|s| passive_re().is_match(&s.text)).count();
        MetricReading::measured(round4(passive as f64 / sentences.len() as f64))
    };

    StatisticalProfile {
        word_count: words,
        sentence_count: sentences.len(),
        diversity_window,
        burstiness: burstiness(&lengths),
        lexical_diversity,
        passive_voice_ratio,
        rare_word_frequency: rare_word_frequency(&tokens),
    }
}

fn measured(reading: &MetricReading) -> Option<f64> {
    match reading.status {
        MetricStatus::Measured => reading.value,
        _ => None,
    }
}

/// Composite over the measured metrics: uniform sentence lengths, low
/// diversity and common vocabulary push toward machine-generated.
pub fn statistical_signal(profile: &StatisticalProfile) -> Result<DetectionSignal, DetectorError> {
    let measured_count = profile.measured_count();
    if measured_count == 0 {
        let note = profile
            .burstiness
            .note
            .clone()
            .unwrap_or_else(|| "no metric measured".to_string());
        return Err(DetectorError::InsufficientData(note));
    }

    let mut logit: f64 = -0.2;
    let mut parts: Vec<String> = Vec::new();

    if let Some(b) = measured(&profile.burstiness) {
        let contrib = sigmoid(b, 0.35, 0.08) * 1.2 - sigmoid_inv(b, 0.60, 0.08) * 0.8;
        logit += contrib;
        parts.push(format!("burstiness={:.2}", b));
    }
    if let Some(d) = measured(&profile.lexical_diversity) {
        let contrib = sigmoid(d, 0.68, 0.04) * 1.0 - sigmoid_inv(d, 0.80, 0.04) * 0.8;
        logit += contrib;
        parts.push(format!("mattr={:.2}", d));
    }
    if let Some(p) = measured(&profile.passive_voice_ratio) {
        logit += sigmoid_inv(p, 0.35, 0.08) * 0.4;
        parts.push(format!("passive={:.2}", p));
    }
    if let Some(r) = measured(&profile.rare_word_frequency) {
        let contrib = sigmoid(r, 0.25, 0.06) * 0.6 - sigmoid_inv(r, 0.45, 0.06) * 0.6;
        logit += contrib;
        parts.push(format!("rare={:.2}", r));
    }

    let length_factor = (profile.word_count as f64 / 1000.0).min(1.0);
    let confidence = (measured_count as f64 / 4.0) * (0.35 + 0.45 * length_factor);

    Ok(DetectionSignal::new(
        MethodId::Statistical,
        from_logit(logit),
        confidence,
        parts.join(", "),
    ))
}
