//! Multi-turn address collection.
//!
//! Callers rarely say a whole address in one breath, so fragments are merged
//! into a single accumulator across turns and the result is checked for
//! completeness after every turn.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::collaborators::AddressValidator;
use crate::error::CollaboratorError;
use crate::tiers::{TierOutcome, resolve_tiers};

/// Separator placed between fragments that neither contains the other.
pub const FRAGMENT_SEPARATOR: &str = ", ";

static STREET_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:street|avenue|road|drive|lane|court|boulevard|place|way|parkway|circle|terrace|trail|highway|st|ave|rd|dr|ln|ct|blvd|pl|pkwy|cir|ter|wy|trl|hwy)\b",
    )
    .expect("valid street type regex")
});
static CITY_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*[A-Za-z ]+").expect("valid city segment regex"));
static STATE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:new york|new jersey|connecticut|pennsylvania|california|texas|florida|illinois|ohio|michigan|georgia|north carolina|virginia|washington|colorado|arizona|tennessee|indiana|massachusetts|wisconsin|missouri|maryland|minnesota|louisiana|alabama|south carolina|kentucky|oregon|oklahoma|iowa|arkansas|mississippi|kansas|utah|nevada|new mexico|west virginia|nebraska|idaho|hawaii|new hampshire|maine|montana|rhode island|delaware|south dakota|north dakota|alaska|vermont|wyoming)\b",
    )
    .expect("valid state name regex")
});
// Upper-case only: "in", "or", "me" are ordinary words in lower case.
static STATE_ABBREVIATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:AL|AK|AZ|AR|CA|CO|CT|DE|DC|FL|GA|HI|ID|IL|IN|IA|KS|KY|LA|ME|MD|MA|MI|MN|MS|MO|MT|NE|NV|NH|NJ|NM|NY|NC|ND|OH|OK|OR|PA|RI|SC|SD|TN|TX|UT|VT|VA|WA|WV|WI|WY)\b",
    )
    .expect("valid state abbreviation regex")
});
static ZIP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{4,5}(?:-\d{4})?\b").expect("valid zip regex"));
static FIVE_DIGIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{5}\b").expect("valid five digit regex"));

/// Fold a new fragment into what has been collected so far.
///
/// Repeats are absorbed, fuller restatements replace, everything else is
/// appended in arrival order.
pub fn merge(previous: Option<&str>, fragment: &str) -> String {
    let fragment = fragment.trim();
    let previous = previous.map(str::trim).filter(|p| !p.is_empty());

    let Some(previous) = previous else {
        return fragment.to_string();
    };
    if fragment.is_empty() || previous.contains(fragment) {
        return previous.to_string();
    }
    if fragment.contains(previous) {
        return fragment.to_string();
    }
    format!("{previous}{FRAGMENT_SEPARATOR}{fragment}")
}

pub fn has_number(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

pub fn has_street_type(text: &str) -> bool {
    STREET_TYPE_RE.is_match(text)
}

pub fn has_city_state(text: &str) -> bool {
    CITY_SEGMENT_RE.is_match(text)
        || STATE_NAME_RE.is_match(text)
        || STATE_ABBREVIATION_RE.is_match(text)
}

pub fn has_zip(text: &str) -> bool {
    ZIP_RE.is_match(text)
}

/// The four structural checks of the local completeness rule, kept apart for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AddressSignals {
    pub has_number: bool,
    pub has_street_type: bool,
    pub has_city_state: bool,
    pub has_zip: bool,
}

impl AddressSignals {
    pub fn of(text: &str) -> Self {
        Self {
            has_number: has_number(text),
            has_street_type: has_street_type(text),
            has_city_state: has_city_state(text),
            has_zip: has_zip(text),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.has_number && self.has_street_type && self.has_city_state && self.has_zip
    }

    /// Share of signals present, in `[0, 1]`.
    pub fn confidence(&self) -> f64 {
        let present = [
            self.has_number,
            self.has_street_type,
            self.has_city_state,
            self.has_zip,
        ]
        .into_iter()
        .filter(|present| *present)
        .count();
        present as f64 / 4.0
    }
}

/// Pick the one address to store from an accumulator that may hold several
/// comma-joined attempts: the first segment with a number, a street type and
/// a five-digit zip, otherwise the last segment.
pub fn extract_final_address(accumulator: &str) -> String {
    let segments: Vec<&str> = accumulator
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect();

    segments
        .iter()
        .find(|segment| {
            has_number(segment) && has_street_type(segment) && FIVE_DIGIT_RE.is_match(segment)
        })
        .or_else(|| segments.last())
        .map(|segment| segment.to_string())
        .unwrap_or_default()
}

/// Completeness verdict for the current accumulator value. Derived each turn,
/// never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AddressCandidate {
    pub text: String,
    pub is_complete: bool,
    pub confidence: f64,
    /// "validator" or "heuristic"
    pub source: &'static str,
}

/// Checks accumulated addresses with the external validator and falls back
/// to [`AddressSignals`] when it cannot answer.
#[derive(Clone)]
pub struct AddressAccumulator {
    validator: Arc<dyn AddressValidator>,
    min_confidence: f64,
    timeout: Duration,
}

impl AddressAccumulator {
    pub fn new(validator: Arc<dyn AddressValidator>, min_confidence: f64, timeout: Duration) -> Self {
        Self {
            validator,
            min_confidence,
            timeout,
        }
    }

    pub async fn assess(&self, candidate: &str) -> AddressCandidate {
        let text = candidate.trim();
        if text.is_empty() {
            return AddressCandidate {
                text: String::new(),
                is_complete: false,
                confidence: 0.0,
                source: "heuristic",
            };
        }

        let min_confidence = self.min_confidence;
        let primary = async {
            let validation = self.validator.validate(text).await?;
            Ok::<_, CollaboratorError>(AddressCandidate {
                text: text.to_string(),
                is_complete: validation.is_valid && validation.confidence >= min_confidence,
                confidence: validation.confidence.clamp(0.0, 1.0),
                source: "validator",
            })
        };
        let heuristic = || {
            let signals = AddressSignals::of(text);
            tracing::debug!(?signals, "Address checked with local heuristic");
            Some(AddressCandidate {
                text: text.to_string(),
                is_complete: signals.is_complete(),
                confidence: signals.confidence(),
                source: "heuristic",
            })
        };

        match resolve_tiers("address_validator", self.timeout, primary, |_| true, heuristic).await {
            TierOutcome::Primary(candidate) | TierOutcome::Fallback(candidate) => candidate,
            TierOutcome::Unavailable => AddressCandidate {
                text: text.to_string(),
                is_complete: AddressSignals::of(text).is_complete(),
                confidence: AddressSignals::of(text).confidence(),
                source: "heuristic",
            },
        }
    }

    pub async fn is_complete(&self, candidate: &str) -> bool {
        self.assess(candidate).await.is_complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AddressComponents, AddressValidation, Unconfigured};
    use async_trait::async_trait;

    struct FixedValidator {
        is_valid: bool,
        confidence: f64,
    }

    #[async_trait]
    impl AddressValidator for FixedValidator {
        async fn validate(&self, _text: &str) -> Result<AddressValidation, CollaboratorError> {
            Ok(AddressValidation {
                is_valid: self.is_valid,
                confidence: self.confidence,
                normalized: None,
                components: AddressComponents::default(),
            })
        }
    }

    fn accumulator(validator: impl AddressValidator + 'static) -> AddressAccumulator {
        AddressAccumulator::new(Arc::new(validator), 0.5, Duration::from_secs(1))
    }

    #[test]
    fn merge_starts_from_first_fragment() {
        assert_eq!(merge(None, "123 Main Street"), "123 Main Street");
    }

    #[test]
    fn merge_ignores_empty_fragment() {
        assert_eq!(merge(Some("123 Main Street"), ""), "123 Main Street");
        assert_eq!(merge(Some("123 Main Street"), "   "), "123 Main Street");
    }

    #[test]
    fn merge_absorbs_repeated_fragment() {
        assert_eq!(
            merge(Some("123 Main Street, Springfield"), "Springfield"),
            "123 Main Street, Springfield"
        );
    }

    #[test]
    fn merge_prefers_fuller_restatement() {
        assert_eq!(
            merge(Some("123 Main Street"), "123 Main Street Springfield IL 62704"),
            "123 Main Street Springfield IL 62704"
        );
    }

    #[test]
    fn merge_appends_new_information_in_order() {
        assert_eq!(
            merge(Some("123 Main Street"), "Springfield IL 62704"),
            "123 Main Street, Springfield IL 62704"
        );
    }

    #[test]
    fn merge_is_case_sensitive() {
        assert_eq!(
            merge(Some("123 Main Street"), "main street"),
            "123 Main Street, main street"
        );
    }

    #[test]
    fn merge_is_idempotent() {
        let cases = [
            (None, "123 Main Street"),
            (Some("123 Main Street"), "Springfield IL 62704"),
            (Some("123 Main Street"), "123 Main Street Springfield"),
            (Some("123 Main Street, Springfield"), "Main Street"),
            (Some("123 Main Street"), ""),
        ];
        for (previous, fragment) in cases {
            let once = merge(previous, fragment);
            let twice = merge(Some(&once), fragment);
            assert_eq!(once, twice, "merge({previous:?}, {fragment:?}) is not idempotent");
        }
    }

    #[test]
    fn full_address_with_commas_is_complete() {
        let signals = AddressSignals::of("123 Main Street, Springfield, IL 62704");
        assert!(signals.is_complete(), "{signals:?}");
    }

    #[test]
    fn spoken_address_without_commas_is_complete() {
        assert!(AddressSignals::of("123 Main Street Springfield IL 62704").is_complete());
        assert!(AddressSignals::of("45 Oak Avenue Columbus Ohio 43004").is_complete());
    }

    #[test]
    fn street_only_is_incomplete() {
        let signals = AddressSignals::of("123 Main Street");
        assert!(!signals.is_complete());
        assert!(signals.has_number);
        assert!(signals.has_street_type);
        assert!(!signals.has_city_state);
        assert!(!signals.has_zip);
    }

    #[test]
    fn street_type_abbreviations_are_recognised() {
        assert!(has_street_type("12 Elm St."));
        assert!(has_street_type("9 Sunset BLVD"));
        assert!(has_street_type("400 Lakeview Pkwy"));
        assert!(!has_street_type("12 Elmwood"));
    }

    #[test]
    fn lower_case_state_abbreviation_is_not_a_state() {
        assert!(!has_city_state("i live in the house"));
        assert!(has_city_state("Springfield IL"));
    }

    #[test]
    fn signal_confidence_counts_present_checks() {
        assert_eq!(AddressSignals::of("123 Main Street").confidence(), 0.5);
        assert_eq!(AddressSignals::of("hello").confidence(), 0.0);
    }

    #[test]
    fn final_address_picks_the_complete_attempt() {
        let accumulated = "Main Street, 123 Main Street Springfield 62704, Springfield";
        assert_eq!(
            extract_final_address(accumulated),
            "123 Main Street Springfield 62704"
        );
    }

    #[test]
    fn final_address_falls_back_to_last_segment() {
        assert_eq!(
            extract_final_address("123 Main Street, Springfield IL"),
            "Springfield IL"
        );
    }

    #[test]
    fn final_address_keeps_single_attempt() {
        assert_eq!(
            extract_final_address("123 Main Street Springfield IL 62704"),
            "123 Main Street Springfield IL 62704"
        );
    }

    #[tokio::test]
    async fn validator_verdict_is_authoritative() {
        let accumulator = accumulator(FixedValidator {
            is_valid: false,
            confidence: 0.9,
        });
        let candidate = accumulator
            .assess("123 Main Street, Springfield, IL 62704")
            .await;
        assert!(!candidate.is_complete);
        assert_eq!(candidate.source, "validator");
    }

    #[tokio::test]
    async fn low_validator_confidence_is_incomplete() {
        let accumulator = accumulator(FixedValidator {
            is_valid: true,
            confidence: 0.4,
        });
        assert!(!accumulator.is_complete("123 Main Street Springfield IL 62704").await);
    }

    #[tokio::test]
    async fn confident_validator_marks_complete() {
        let accumulator = accumulator(FixedValidator {
            is_valid: true,
            confidence: 0.5,
        });
        assert!(accumulator.is_complete("123 Main Street Springfield IL 62704").await);
    }

    #[tokio::test]
    async fn unavailable_validator_uses_heuristic() {
        let accumulator = accumulator(Unconfigured("geocoder"));
        let complete = accumulator
            .assess("123 Main Street, Springfield, IL 62704")
            .await;
        assert!(complete.is_complete);
        assert_eq!(complete.source, "heuristic");
        assert!(!accumulator.is_complete("123 Main Street").await);
    }

    #[tokio::test]
    async fn empty_candidate_is_never_complete() {
        let accumulator = accumulator(FixedValidator {
            is_valid: true,
            confidence: 1.0,
        });
        assert!(!accumulator.is_complete("  ").await);
    }
}
