//! # Language Quality Metrics
//!
//! Scores the *content* of an answer: readability, vocabulary, clarity,
//! conciseness, and a small set of mechanical grammar checks. Everything is
//! computed from the transcript text alone.

use crate::analysis::count_syllables;
use crate::analysis::speech::count_fillers;
use serde::{Deserialize, Serialize};

/// Phrases that pad an answer without adding content.
const WORDY_PHRASES: &[&str] = &[
    "in order to",
    "due to the fact that",
    "at this point in time",
    "in the event that",
    "for the purpose of",
    "in spite of the fact",
];

/// One detected grammar issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrammarIssue {
    /// What is wrong
    pub error: String,

    /// Excerpt around the issue
    pub text: String,

    /// Suggested correction
    pub suggestion: String,

    /// Issue category ("capitalization", "repetition")
    #[serde(rename = "type")]
    pub kind: String,
}

/// Content-quality metrics for one question's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageMetrics {
    /// Detected issues, capped at the ten most relevant
    pub grammar_errors: Vec<GrammarIssue>,

    /// 0-5 score from error density
    pub grammar_score: f64,

    /// "basic", "intermediate", "advanced", or "unknown"
    pub vocabulary_level: String,

    /// Distinct words / total words
    pub unique_word_ratio: f64,

    pub avg_sentence_length: f64,

    pub readability_flesch: f64,
    pub readability_flesch_grade: f64,
    pub readability_gunning_fog: f64,

    /// 0-5: readability adjusted for grammar errors
    pub clarity_score: f64,

    /// 0-5: penalized for fillers and wordy phrases
    pub conciseness_score: f64,
}

impl LanguageMetrics {
    /// Zero-valued metrics for empty or unusable text.
    pub fn zeroed() -> Self {
        Self {
            grammar_errors: Vec::new(),
            grammar_score: 0.0,
            vocabulary_level: "unknown".to_string(),
            unique_word_ratio: 0.0,
            avg_sentence_length: 0.0,
            readability_flesch: 0.0,
            readability_flesch_grade: 0.0,
            readability_gunning_fog: 0.0,
            clarity_score: 0.0,
            conciseness_score: 0.0,
        }
    }
}

/// Analyze language quality of a transcript.
///
/// ## Returns:
/// Fully-populated metrics; empty text yields [`LanguageMetrics::zeroed`],
/// never an error.
pub fn analyze_language(text: &str) -> LanguageMetrics {
    if text.trim().is_empty() {
        return LanguageMetrics::zeroed();
    }

    let mut grammar_errors = check_grammar(text);
    let grammar_score = grammar_score(&grammar_errors, text);
    grammar_errors.truncate(10);

    let (vocabulary_level, unique_word_ratio) = analyze_vocabulary(text);
    let avg_sentence_length = avg_sentence_length(text);

    let flesch = flesch_reading_ease(text);
    let flesch_grade = flesch_kincaid_grade(text);
    let gunning_fog = gunning_fog(text);

    let clarity_score = clarity_score(&grammar_errors, flesch);
    let conciseness_score = conciseness_score(text);

    LanguageMetrics {
        grammar_errors,
        grammar_score: round2(grammar_score),
        vocabulary_level,
        unique_word_ratio: round2(unique_word_ratio),
        avg_sentence_length: round1(avg_sentence_length),
        readability_flesch: round1(flesch),
        readability_flesch_grade: round1(flesch_grade),
        readability_gunning_fog: round1(gunning_fog),
        clarity_score: round2(clarity_score),
        conciseness_score: round2(conciseness_score),
    }
}

/// Mechanical grammar checks: sentence capitalization and doubled words.
fn check_grammar(text: &str) -> Vec<GrammarIssue> {
    let mut errors = Vec::new();

    for sentence in sentences(text) {
        // Sentences should start with a capital letter
        if let Some(first) = sentence.chars().next() {
            if first.is_ascii_lowercase() {
                let mut suggestion = sentence.clone();
                suggestion.replace_range(0..1, &first.to_uppercase().to_string());
                errors.push(GrammarIssue {
                    error: "Sentence should start with capital letter".to_string(),
                    text: sentence.chars().take(50).collect(),
                    suggestion,
                    kind: "capitalization".to_string(),
                });
            }
        }

        // Doubled words ("the the")
        let words: Vec<&str> = sentence.split_whitespace().collect();
        for pair in words.windows(2) {
            if pair[0].eq_ignore_ascii_case(pair[1])
                && pair[0].chars().all(|c| c.is_ascii_alphabetic())
            {
                errors.push(GrammarIssue {
                    error: format!("Repeated word: '{}'", pair[0]),
                    text: format!("...{} {}...", pair[0], pair[1]),
                    suggestion: pair[0].to_string(),
                    kind: "repetition".to_string(),
                });
            }
        }
    }

    errors
}

/// 0-5 grammar score from error density (errors per 100 words).
fn grammar_score(errors: &[GrammarIssue], text: &str) -> f64 {
    let word_count = text.split_whitespace().count();
    if word_count == 0 {
        return 0.0;
    }

    let error_rate = (errors.len() as f64 / word_count as f64) * 100.0;
    if error_rate == 0.0 {
        5.0
    } else if error_rate < 1.0 {
        4.5
    } else if error_rate < 2.0 {
        4.0
    } else if error_rate < 5.0 {
        3.0
    } else if error_rate < 10.0 {
        2.0
    } else {
        1.0
    }
}

/// Vocabulary level from word length and syllable density, plus uniqueness.
fn analyze_vocabulary(text: &str) -> (String, f64) {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_ascii_alphabetic())
                .collect::<String>()
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    if words.is_empty() {
        return ("unknown".to_string(), 0.0);
    }

    let unique: std::collections::HashSet<&String> = words.iter().collect();
    let unique_ratio = unique.len() as f64 / words.len() as f64;

    let avg_word_length =
        words.iter().map(|w| w.len()).sum::<usize>() as f64 / words.len() as f64;
    let avg_syllables =
        words.iter().map(|w| count_syllables(w)).sum::<usize>() as f64 / words.len() as f64;

    let level = if avg_syllables > 2.5 && avg_word_length > 7.0 {
        "advanced"
    } else if avg_syllables > 1.8 && avg_word_length > 5.0 {
        "intermediate"
    } else {
        "basic"
    };

    (level.to_string(), unique_ratio)
}

fn avg_sentence_length(text: &str) -> f64 {
    let sentences = sentences(text);
    if sentences.is_empty() {
        return 0.0;
    }

    let total_words: usize = sentences.iter().map(|s| s.split_whitespace().count()).sum();
    total_words as f64 / sentences.len() as f64
}

fn sentences(text: &str) -> Vec<String> {
    text.split(['.', '!', '?'])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn text_counts(text: &str) -> (f64, f64, f64, f64) {
    let sentence_count = sentences(text).len().max(1) as f64;
    let words: Vec<&str> = text.split_whitespace().collect();
    let word_count = words.len().max(1) as f64;
    let syllable_count: usize = words.iter().map(|w| count_syllables(w)).sum();
    let complex_words = words.iter().filter(|w| count_syllables(w) >= 3).count() as f64;
    (sentence_count, word_count, syllable_count as f64, complex_words)
}

fn flesch_reading_ease(text: &str) -> f64 {
    let (sentences, words, syllables, _) = text_counts(text);
    206.835 - 1.015 * (words / sentences) - 84.6 * (syllables / words)
}

fn flesch_kincaid_grade(text: &str) -> f64 {
    let (sentences, words, syllables, _) = text_counts(text);
    0.39 * (words / sentences) + 11.8 * (syllables / words) - 15.59
}

fn gunning_fog(text: &str) -> f64 {
    let (sentences, words, _, complex) = text_counts(text);
    0.4 * ((words / sentences) + 100.0 * (complex / words))
}

/// 0-5 clarity: readability band minus a small penalty per grammar error.
fn clarity_score(errors: &[GrammarIssue], flesch: f64) -> f64 {
    let base = if flesch >= 80.0 {
        5.0
    } else if flesch >= 60.0 {
        4.0
    } else if flesch >= 40.0 {
        3.0
    } else if flesch >= 20.0 {
        2.0
    } else {
        1.0
    };

    let penalty = (errors.len() as f64 * 0.1).min(1.0);
    (base - penalty).max(0.0)
}

/// 0-5 conciseness: penalized for filler density and wordy phrases.
fn conciseness_score(text: &str) -> f64 {
    let word_count = text.split_whitespace().count();
    if word_count == 0 {
        return 0.0;
    }

    let (filler_count, _) = count_fillers(text);
    let filler_ratio = filler_count as f64 / word_count as f64;

    let text_lower = text.to_lowercase();
    let wordy_count: usize = WORDY_PHRASES
        .iter()
        .map(|p| text_lower.matches(p).count())
        .sum();

    let score = 5.0 - filler_ratio * 10.0 - wordy_count as f64 * 0.5;
    score.clamp(0.0, 5.0)
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_text_yields_zeroed_metrics() {
        assert_eq!(analyze_language(""), LanguageMetrics::zeroed());
        assert_eq!(analyze_language("   "), LanguageMetrics::zeroed());
    }

    #[test]
    fn test_clean_text_scores_well() {
        let metrics = analyze_language("I designed the cache layer. It cut latency in half.");
        assert!(metrics.grammar_errors.is_empty());
        assert_eq!(metrics.grammar_score, 5.0);
        assert!(metrics.clarity_score >= 4.0);
        assert!(metrics.conciseness_score > 4.0);
    }

    #[test]
    fn test_repeated_word_detected() {
        let metrics = analyze_language("We shipped the the feature on time.");
        assert!(metrics
            .grammar_errors
            .iter()
            .any(|e| e.kind == "repetition"));
        assert!(metrics.grammar_score < 5.0);
    }

    #[test]
    fn test_lowercase_sentence_start_detected() {
        let metrics = analyze_language("the system scaled fine. We were happy.");
        let issue = metrics
            .grammar_errors
            .iter()
            .find(|e| e.kind == "capitalization")
            .expect("capitalization issue expected");
        assert!(issue.suggestion.starts_with('T'));
    }

    #[test]
    fn test_simple_text_reads_easier_than_dense_text() {
        let easy = analyze_language("I built a cache. It was fast. We shipped it.");
        let dense = analyze_language(
            "Architectural considerations necessitated comprehensive re-evaluation of \
             interdependent microservice communication topologies throughout the organization.",
        );
        assert!(easy.readability_flesch > dense.readability_flesch);
        assert!(easy.readability_flesch_grade < dense.readability_flesch_grade);
        assert!(easy.readability_gunning_fog < dense.readability_gunning_fog);
    }

    #[test]
    fn test_filler_heavy_text_loses_conciseness() {
        let concise = analyze_language("We reduced the error rate by tuning retries.");
        let padded = analyze_language(
            "Um, so, like, basically we, um, you know, sort of reduced the, uh, error rate.",
        );
        assert!(padded.conciseness_score < concise.conciseness_score);
    }

    #[test]
    fn test_unique_word_ratio() {
        let metrics = analyze_language("test test test test");
        assert_eq!(metrics.unique_word_ratio, 0.25);
    }

    #[test]
    fn test_metrics_serialization_round_trip() {
        let metrics = analyze_language("A short answer about databases.");
        let json = serde_json::to_string(&metrics).unwrap();
        let back: LanguageMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(metrics, back);
    }
}
