// Lexicon
// Pattern categories, generator phrase profiles and domain baselines.
// Parsed and compiled once, then shared read-only behind an Arc.

use crate::models::{DocumentType, PhraseTier};
use crate::services::errors::ConfigError;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};

// ============ File format ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LexiconFile {
    version: String,
    #[serde(default)]
    categories: Vec<CategoryDef>,
    #[serde(default)]
    generators: Vec<ProfileDef>,
    #[serde(default)]
    baselines: Vec<BaselineDef>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TriggerKind {
    Literal,
    Regex,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CategoryDef {
    name: String,
    weight: f64,
    #[serde(default = "default_kind")]
    kind: TriggerKind,
    #[serde(default)]
    triggers: Vec<String>,
}

fn default_kind() -> TriggerKind {
    TriggerKind::Literal
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileDef {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    tiers: Vec<TierDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TierDef {
    tier: PhraseTier,
    multiplier: f64,
    #[serde(default)]
    phrases: Vec<PhraseDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PhraseDef {
    phrase: String,
    weight: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BaselineDef {
    document_type: DocumentType,
    max_adjustment: f64,
    penalty_rate: f64,
    #[serde(default)]
    expected: Vec<ExpectedDef>,
    #[serde(default)]
    detect: Option<DetectDef>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpectedDef {
    category: String,
    per1k: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetectDef {
    category: String,
    min_per1k: f64,
}

// ============ Compiled lexicon ============

/// A trigger category compiled into one case-insensitive alternation.
#[derive(Debug, Clone)]
pub struct PatternCategory {
    pub name: String,
    pub weight: f64,
    matcher: Option<Regex>,
}

impl PatternCategory {
    /// Leftmost-first, non-overlapping match count. Empty categories count 0.
    pub fn count(&self, text: &str) -> usize {
        self.matcher
            .as_ref()
            .map(|re| re.find_iter(text).count())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct ProfilePhrase {
    pub phrase: String,
    pub tier: PhraseTier,
    pub weight: f64,
    pub multiplier: f64,
}

/// A generator's phrase profile. All phrases share one alternation with a
/// capture group per phrase, longest phrase first, then declared order.
#[derive(Debug, Clone)]
pub struct GeneratorProfile {
    pub id: String,
    pub display_name: String,
    /// Phrases in declared order.
    pub phrases: Vec<ProfilePhrase>,
    /// Capture group `g` (1-based) matches `phrases[group_order[g - 1]]`.
    group_order: Vec<usize>,
    matcher: Option<Regex>,
}

/// Occurrences per phrase plus the words consumed by all matches.
#[derive(Debug, Clone, Default)]
pub struct ProfileMatches {
    pub occurrences: Vec<usize>,
    pub matched_words: usize,
}

impl GeneratorProfile {
    pub fn scan(&self, text: &str) -> ProfileMatches {
        let mut out = ProfileMatches {
            occurrences: vec![0; self.phrases.len()],
            matched_words: 0,
        };
        let Some(re) = self.matcher.as_ref() else {
            return out;
        };
        for caps in re.captures_iter(text) {
            let hit = (1..caps.len()).find_map(|g| caps.get(g).map(|m| (g, m)));
            if let Some((group, m)) = hit {
                let idx = self.group_order[group - 1];
                out.occurrences[idx] += 1;
                out.matched_words += crate::services::text_processor::word_count(m.as_str());
            }
        }
        out
    }
}

#[derive(Debug, Clone)]
pub struct ExpectedFrequency {
    pub category: String,
    pub per_1k: f64,
}

#[derive(Debug, Clone)]
pub struct DetectionRule {
    pub category: String,
    pub min_per_1k: f64,
}

/// Expected category densities for one document type.
#[derive(Debug, Clone)]
pub struct DomainBaseline {
    pub document_type: DocumentType,
    pub max_adjustment: f64,
    pub penalty_rate: f64,
    pub expected: Vec<ExpectedFrequency>,
    pub detect: Option<DetectionRule>,
}

#[derive(Debug, Clone)]
pub struct Lexicon {
    pub version: String,
    pub categories: Vec<PatternCategory>,
    pub generators: Vec<GeneratorProfile>,
    pub baselines: Vec<DomainBaseline>,
}

impl Lexicon {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let parsed: LexiconFile = serde_json::from_str(raw)?;
        compile(parsed)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let lexicon = Self::from_json_str(&raw)?;
        tracing::info!(
            "[LEXICON] Loaded {} ({}): {} categories, {} generators, {} baselines",
            path.display(),
            lexicon.version,
            lexicon.categories.len(),
            lexicon.generators.len(),
            lexicon.baselines.len()
        );
        Ok(lexicon)
    }

    /// Load from `path` when given, otherwise share the embedded lexicon.
    pub fn load_or_builtin(path: Option<&Path>) -> Result<Arc<Self>, ConfigError> {
        match path {
            Some(p) => Ok(Arc::new(Self::load(p)?)),
            None => builtin(),
        }
    }

    pub fn baseline(&self, document_type: DocumentType) -> Option<&DomainBaseline> {
        self.baselines.iter().find(|b| b.document_type == document_type)
    }

    pub fn category(&self, name: &str) -> Option<&PatternCategory> {
        self.categories.iter().find(|c| c.name == name)
    }
}

static BUILTIN: OnceLock<Arc<Lexicon>> = OnceLock::new();

/// The embedded default lexicon, compiled on first use.
pub fn builtin() -> Result<Arc<Lexicon>, ConfigError> {
    if let Some(lexicon) = BUILTIN.get() {
        return Ok(Arc::clone(lexicon));
    }
    let raw = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/lexicon.json"));
    let compiled = Arc::new(Lexicon::from_json_str(raw)?);
    Ok(Arc::clone(BUILTIN.get_or_init(|| compiled)))
}

// ============ Compilation ============

fn compile(file: LexiconFile) -> Result<Lexicon, ConfigError> {
    let mut seen = HashSet::new();
    let mut categories = Vec::with_capacity(file.categories.len());
    for def in file.categories {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(ConfigError::invalid("category.name", "must not be empty"));
        }
        if !seen.insert(name.clone()) {
            return Err(ConfigError::DuplicateName { kind: "category", name });
        }
        if !def.weight.is_finite() || def.weight <= 0.0 {
            return Err(ConfigError::invalid(
                format!("category {}.weight", name),
                format!("must be a positive number, got {}", def.weight),
            ));
        }
        let matcher = compile_category(&name, def.kind, &def.triggers)?;
        categories.push(PatternCategory {
            name,
            weight: def.weight,
            matcher,
        });
    }

    let mut seen = HashSet::new();
    let mut generators = Vec::with_capacity(file.generators.len());
    for def in file.generators {
        let id = def.id.trim().to_string();
        if id.is_empty() {
            return Err(ConfigError::invalid("generator.id", "must not be empty"));
        }
        if !seen.insert(id.clone()) {
            return Err(ConfigError::DuplicateName { kind: "generator", name: id });
        }
        generators.push(compile_profile(id, def.display_name, def.tiers)?);
    }

    let mut seen = HashSet::new();
    let mut baselines = Vec::with_capacity(file.baselines.len());
    for def in file.baselines {
        let type_name = def.document_type.as_str();
        if !seen.insert(def.document_type) {
            return Err(ConfigError::DuplicateName {
                kind: "baseline",
                name: type_name.to_string(),
            });
        }
        if !(0.0..=0.5).contains(&def.max_adjustment) {
            return Err(ConfigError::invalid(
                format!("baseline {}.maxAdjustment", type_name),
                "must lie in [0, 0.5]",
            ));
        }
        if !(0.0..=1.0).contains(&def.penalty_rate) {
            return Err(ConfigError::invalid(
                format!("baseline {}.penaltyRate", type_name),
                "must lie in [0, 1]",
            ));
        }
        let known = |category: &str| categories.iter().any(|c| c.name == category);
        let mut expected = Vec::with_capacity(def.expected.len());
        for e in def.expected {
            if !known(&e.category) {
                return Err(ConfigError::UnknownCategory {
                    document_type: type_name.to_string(),
                    category: e.category,
                });
            }
            if !e.per1k.is_finite() || e.per1k < 0.0 {
                return Err(ConfigError::invalid(
                    format!("baseline {}.expected.{}", type_name, e.category),
                    "per1k must be a non-negative number",
                ));
            }
            expected.push(ExpectedFrequency {
                category: e.category,
                per_1k: e.per1k,
            });
        }
        let detect = match def.detect {
            Some(d) if !known(&d.category) => {
                return Err(ConfigError::UnknownCategory {
                    document_type: type_name.to_string(),
                    category: d.category,
                })
            }
            Some(d) if !d.min_per1k.is_finite() || d.min_per1k <= 0.0 => {
                return Err(ConfigError::invalid(
                    format!("baseline {}.detect.minPer1k", type_name),
                    "must be a positive number",
                ))
            }
            Some(d) => Some(DetectionRule {
                category: d.category,
                min_per_1k: d.min_per1k,
            }),
            None => None,
        };
        baselines.push(DomainBaseline {
            document_type: def.document_type,
            max_adjustment: def.max_adjustment,
            penalty_rate: def.penalty_rate,
            expected,
            detect,
        });
    }

    Ok(Lexicon {
        version: file.version,
        categories,
        generators,
        baselines,
    })
}

/// Literal phrase as a regex: escaped, whitespace-tolerant, with word
/// boundaries only on edges that are word characters.
fn literal_pattern(phrase: &str) -> String {
    let body = phrase
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let lead = if phrase.trim().chars().next().is_some_and(is_word) { r"\b" } else { "" };
    let trail = if phrase.trim().chars().last().is_some_and(is_word) { r"\b" } else { "" };
    format!("{}{}{}", lead, body, trail)
}

fn compile_category(name: &str, kind: TriggerKind, triggers: &[String]) -> Result<Option<Regex>, ConfigError> {
    if triggers.is_empty() {
        return Ok(None);
    }
    let mut parts = Vec::with_capacity(triggers.len());
    for trigger in triggers {
        if trigger.trim().is_empty() {
            return Err(ConfigError::invalid(
                format!("category {}.triggers", name),
                "triggers must not be empty",
            ));
        }
        let part = match kind {
            TriggerKind::Literal => literal_pattern(trigger),
            TriggerKind::Regex => {
                Regex::new(trigger).map_err(|source| ConfigError::BadPattern {
                    owner: name.to_string(),
                    pattern: trigger.clone(),
                    source,
                })?;
                trigger.clone()
            }
        };
        parts.push(format!("(?:{})", part));
    }
    let pattern = format!("(?i){}", parts.join("|"));
    Regex::new(&pattern)
        .map(Some)
        .map_err(|source| ConfigError::BadPattern {
            owner: name.to_string(),
            pattern,
            source,
        })
}

fn compile_profile(id: String, display_name: Option<String>, tiers: Vec<TierDef>) -> Result<GeneratorProfile, ConfigError> {
    let mut phrases = Vec::new();
    for tier in tiers {
        if !tier.multiplier.is_finite() || tier.multiplier <= 0.0 {
            return Err(ConfigError::invalid(
                format!("generator {}.tiers.multiplier", id),
                "must be a positive number",
            ));
        }
        for p in tier.phrases {
            let phrase = p.phrase.trim().to_string();
            if phrase.is_empty() {
                return Err(ConfigError::invalid(format!("generator {}.phrase", id), "must not be empty"));
            }
            if !(p.weight > 0.0 && p.weight <= 1.0) {
                return Err(ConfigError::invalid(
                    format!("generator {}.phrase '{}'.weight", id, phrase),
                    "must lie in (0, 1]",
                ));
            }
            phrases.push(ProfilePhrase {
                phrase,
                tier: tier.tier,
                weight: p.weight,
                multiplier: tier.multiplier,
            });
        }
    }

    let mut group_order: Vec<usize> = (0..phrases.len()).collect();
    // Stable sort keeps declared order among equal lengths.
    group_order.sort_by(|&a, &b| phrases[b].phrase.len().cmp(&phrases[a].phrase.len()));

    let matcher = if phrases.is_empty() {
        None
    } else {
        let alternation = group_order
            .iter()
            .map(|&i| format!("({})", literal_pattern(&phrases[i].phrase)))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = format!("(?i){}", alternation);
        Some(Regex::new(&pattern).map_err(|source| ConfigError::BadPattern {
            owner: id.clone(),
            pattern,
            source,
        })?)
    };

    Ok(GeneratorProfile {
        display_name: display_name.unwrap_or_else(|| id.clone()),
        id,
        phrases,
        group_order,
        matcher,
    })
}
