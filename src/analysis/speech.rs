//! # Speech Metrics
//!
//! Computes delivery metrics from a finalized transcript: speaking pace,
//! filler-word usage, and pause behavior derived from segment timings.

use crate::transcription::TranscriptSegment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pauses shorter than this are normal speech cadence, not hesitation.
const PAUSE_THRESHOLD_MS: f64 = 500.0;

/// Single-word fillers detected per token.
const SINGLE_FILLERS: &[&str] = &[
    "um", "uh", "er", "ah", "like", "so", "well", "right", "okay", "actually", "basically",
    "literally",
];

/// Multi-word fillers detected as substrings of the lowercased transcript.
const PHRASE_FILLERS: &[&str] = &[
    "you know", "i mean", "kind of", "sort of", "i think", "i guess", "i suppose",
];

/// Delivery metrics for one question's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechMetrics {
    pub words_per_minute: f64,
    pub total_words: usize,
    pub total_duration_seconds: f64,
    pub filler_word_count: usize,
    pub filler_word_percentage: f64,
    /// Top fillers formatted as "word (count)", most frequent first
    pub filler_words_found: Vec<String>,
    pub pause_count: usize,
    pub avg_pause_duration_ms: f64,
    pub longest_pause_ms: f64,
    /// "slow" (< 100 wpm), "normal" (100-150 wpm), or "fast" (> 150 wpm)
    pub speaking_rate_category: String,
}

impl SpeechMetrics {
    /// Zero-valued metrics, used when finalization failed and no usable
    /// transcript exists.
    pub fn zeroed() -> Self {
        Self {
            words_per_minute: 0.0,
            total_words: 0,
            total_duration_seconds: 0.0,
            filler_word_count: 0,
            filler_word_percentage: 0.0,
            filler_words_found: Vec::new(),
            pause_count: 0,
            avg_pause_duration_ms: 0.0,
            longest_pause_ms: 0.0,
            speaking_rate_category: "unknown".to_string(),
        }
    }
}

/// Analyze delivery metrics from transcript text plus timing.
///
/// ## Parameters:
/// - **text**: The finalized transcript
/// - **duration_seconds**: Length of the answer's audio
/// - **segments**: Time-aligned transcript spans (pause detection source)
pub fn analyze_speech(
    text: &str,
    duration_seconds: f64,
    segments: &[TranscriptSegment],
) -> SpeechMetrics {
    let words: Vec<&str> = text.split_whitespace().collect();
    let total_words = words.len();

    let wpm = if duration_seconds > 0.0 {
        (total_words as f64 / duration_seconds) * 60.0
    } else {
        0.0
    };

    let (filler_count, fillers_found) = count_fillers(text);
    let filler_percentage = if total_words > 0 {
        (filler_count as f64 / total_words as f64) * 100.0
    } else {
        0.0
    };

    let (pause_count, avg_pause_ms, longest_pause_ms) = analyze_pauses(segments);

    let rate_category = if wpm < 100.0 {
        "slow"
    } else if wpm < 150.0 {
        "normal"
    } else {
        "fast"
    };

    SpeechMetrics {
        words_per_minute: round1(wpm),
        total_words,
        total_duration_seconds: round2(duration_seconds),
        filler_word_count: filler_count,
        filler_word_percentage: round2(filler_percentage),
        filler_words_found: fillers_found,
        pause_count,
        avg_pause_duration_ms: avg_pause_ms.round(),
        longest_pause_ms: longest_pause_ms.round(),
        speaking_rate_category: rate_category.to_string(),
    }
}

/// Count filler words and collect the top offenders.
///
/// Shared with the conciseness scoring in the language metrics.
pub(crate) fn count_fillers(text: &str) -> (usize, Vec<String>) {
    let text_lower = text.to_lowercase();
    let mut count = 0;
    let mut found: Vec<String> = Vec::new();

    // Single-word fillers, punctuation stripped per token
    for word in text_lower.split_whitespace() {
        let clean: String = word.chars().filter(|c| c.is_ascii_alphabetic()).collect();
        if SINGLE_FILLERS.contains(&clean.as_str()) {
            count += 1;
            found.push(clean);
        }
    }

    // Multi-word fillers as substring occurrences
    for phrase in PHRASE_FILLERS {
        let occurrences = text_lower.matches(phrase).count();
        if occurrences > 0 {
            count += occurrences;
            for _ in 0..occurrences {
                found.push((*phrase).to_string());
            }
        }
    }

    // Top five fillers with their counts, most frequent first
    let mut tallies: HashMap<String, usize> = HashMap::new();
    for f in &found {
        *tallies.entry(f.clone()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, usize)> = tallies.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    let top = ranked
        .into_iter()
        .take(5)
        .map(|(word, n)| format!("{} ({})", word, n))
        .collect();

    (count, top)
}

/// Extract pause statistics from gaps between consecutive segments.
fn analyze_pauses(segments: &[TranscriptSegment]) -> (usize, f64, f64) {
    if segments.len() < 2 {
        return (0, 0.0, 0.0);
    }

    let mut pauses = Vec::new();
    for window in segments.windows(2) {
        let gap_ms = (window[1].start - window[0].end) * 1000.0;
        if gap_ms > PAUSE_THRESHOLD_MS {
            pauses.push(gap_ms);
        }
    }

    if pauses.is_empty() {
        return (0, 0.0, 0.0);
    }

    let sum: f64 = pauses.iter().sum();
    let max = pauses.iter().cloned().fold(0.0, f64::max);
    (pauses.len(), sum / pauses.len() as f64, max)
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

    fn seg(start: f64, end: f64) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: String::new(),
        }
    }

    #[test]
    fn test_words_per_minute() {
        // 30 words over 15 seconds = 120 wpm
        let text = (0..30).map(|_| "word").collect::<Vec<_>>().join(" ");
        let metrics = analyze_speech(&text, 15.0, &[]);
        assert_eq!(metrics.words_per_minute, 120.0);
        assert_eq!(metrics.total_words, 30);
        assert_eq!(metrics.speaking_rate_category, "normal");
    }

    #[test]
    fn test_rate_categories() {
        let slow = (0..10).map(|_| "word").collect::<Vec<_>>().join(" ");
        assert_eq!(analyze_speech(&slow, 60.0, &[]).speaking_rate_category, "slow");

        let fast = (0..40).map(|_| "word").collect::<Vec<_>>().join(" ");
        assert_eq!(analyze_speech(&fast, 10.0, &[]).speaking_rate_category, "fast");
    }

    #[test]
    fn test_filler_detection() {
        let text = "Um, I think the, um, main thing is, like, scalability you know";
        let metrics = analyze_speech(text, 10.0, &[]);

        // um x2, like x1, "i think" x1, "you know" x1
        assert_eq!(metrics.filler_word_count, 5);
        assert!(metrics
            .filler_words_found
            .iter()
            .any(|f| f.starts_with("um (2)")));
    }

    #[test]
    fn test_pause_analysis() {
        // Gaps: 0.3s (ignored), 1.2s, 2.0s
        let segments = vec![seg(0.0, 1.0), seg(1.3, 2.0), seg(3.2, 4.0), seg(6.0, 7.0)];
        let metrics = analyze_speech("some answer text here", 7.0, &segments);

        assert_eq!(metrics.pause_count, 2);
        assert_eq!(metrics.longest_pause_ms, 2000.0);
        assert_eq!(metrics.avg_pause_duration_ms, 1600.0);
    }

    #[test]
    fn test_empty_text() {
        let metrics = analyze_speech("", 0.0, &[]);
        assert_eq!(metrics.total_words, 0);
        assert_eq!(metrics.words_per_minute, 0.0);
        assert_eq!(metrics.filler_word_count, 0);
        assert_eq!(metrics.pause_count, 0);
    }

    #[test]
    fn test_zeroed_metrics_are_serializable() {
        let json = serde_json::to_string(&SpeechMetrics::zeroed()).unwrap();
        let back: SpeechMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SpeechMetrics::zeroed());
    }
}
