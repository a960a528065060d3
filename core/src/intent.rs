use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use crate::collaborators::{Entities, IntentClassifier};
use crate::error::CollaboratorError;
use crate::session::Intent;
use crate::tiers::{TierOutcome, resolve_tiers};

/// Method tag for results produced by the keyword tier.
pub const RULE_BASED_METHOD: &str = "rule_based";

/// A keyword-tier winner must score strictly above this.
const MIN_KEYWORD_SCORE: f64 = 0.15;

const START_KEYWORDS: &[&str] = &[
    "start",
    "begin",
    "new",
    "subscribe",
    "sign up",
    "get started",
    "want to start",
    "need to start",
    "would like to start",
];
const MISSED_KEYWORDS: &[&str] = &[
    "missed",
    "missing",
    "didn't get",
    "didn't receive",
    "not delivered",
    "haven't received",
    "where is my",
    "delivery problem",
];
const STOP_KEYWORDS: &[&str] = &[
    "stop",
    "cancel",
    "end",
    "unsubscribe",
    "discontinue",
    "quit",
    "want to stop",
    "need to cancel",
    "would like to stop",
];
const LIVE_AGENT_KEYWORDS: &[&str] = &[
    "speak to someone",
    "talk to person",
    "human",
    "representative",
    "agent",
    "help me",
    "customer service",
    "support",
];

fn keywords_for(intent: Intent) -> &'static [&'static str] {
    match intent {
        Intent::Start => START_KEYWORDS,
        Intent::Missed => MISSED_KEYWORDS,
        Intent::Stop => STOP_KEYWORDS,
        Intent::LiveAgent => LIVE_AGENT_KEYWORDS,
        Intent::Unknown => &[],
    }
}

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\+?1?[-.\s]?)?\(?([0-9]{3})\)?[-.\s]?([0-9]{3})[-.\s]?([0-9]{4})")
        .expect("valid phone regex")
});
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").expect("valid email regex")
});
static ADDRESS_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{1,5}\b").expect("valid address number regex"));
static ZIP_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{5}(?:-\d{4})?\b").expect("valid zip code regex"));

/// Result of resolving a transcript. Consumed immediately, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f64,
    pub entities: Entities,
    /// Which tier produced the intent ("rule_based", "openai", "rasa", ...).
    pub method: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub matched_keywords: Vec<String>,
}

impl IntentClassification {
    /// `unknown` and `live_agent` both leave the automated flow.
    pub fn is_serviceable(&self) -> bool {
        self.intent.is_service_intent()
    }
}

/// Score of one category: `min(matched / total * 2, 1.0)`.
pub fn keyword_score(intent: Intent, lowered: &str) -> (f64, Vec<&'static str>) {
    let keywords = keywords_for(intent);
    if keywords.is_empty() {
        return (0.0, Vec::new());
    }
    let matched: Vec<&'static str> = keywords
        .iter()
        .copied()
        .filter(|keyword| lowered.contains(keyword))
        .collect();
    let score = (matched.len() as f64 / keywords.len() as f64 * 2.0).min(1.0);
    (score, matched)
}

/// Deterministic keyword tier. Total: always returns a classification.
pub fn classify_by_keywords(text: &str) -> IntentClassification {
    let lowered = text.to_lowercase();

    let mut best: Option<(Intent, f64, Vec<&'static str>)> = None;
    for intent in Intent::CATEGORIES {
        let (score, matched) = keyword_score(intent, &lowered);
        let improves = match &best {
            Some((_, best_score, _)) => score > *best_score,
            None => score > 0.0,
        };
        if improves {
            best = Some((intent, score, matched));
        }
    }

    let (intent, confidence, matched) = match best {
        Some((intent, score, matched)) if score > MIN_KEYWORD_SCORE => (intent, score, matched),
        Some((_, score, _)) => (Intent::Unknown, score, Vec::new()),
        None => (Intent::Unknown, 0.0, Vec::new()),
    };

    IntentClassification {
        intent,
        confidence,
        entities: extract_entities(text),
        method: RULE_BASED_METHOD.to_string(),
        matched_keywords: matched.into_iter().map(str::to_string).collect(),
    }
}

/// Pattern-based entities: phone numbers, emails, bare digit runs and zip codes.
pub fn extract_entities(text: &str) -> Entities {
    let patterns: [(&str, &Regex); 4] = [
        ("phone", &PHONE_RE),
        ("email", &EMAIL_RE),
        ("address_number", &ADDRESS_NUMBER_RE),
        ("zip_code", &ZIP_CODE_RE),
    ];

    let mut entities = Entities::new();
    for (kind, pattern) in patterns {
        let values: Vec<String> = pattern
            .find_iter(text)
            .map(|m| m.as_str().trim().to_string())
            .collect();
        if !values.is_empty() {
            entities.insert(kind.to_string(), values);
        }
    }
    entities
}

fn merge_entities(into: &mut Entities, from: Entities) {
    for (kind, values) in from {
        let slot = into.entry(kind).or_default();
        for value in values {
            if !slot.contains(&value) {
                slot.push(value);
            }
        }
    }
}

/// Two-tier intent resolution: external classifier, then keywords.
#[derive(Clone)]
pub struct IntentResolver {
    classifier: Arc<dyn IntentClassifier>,
    threshold: f64,
    timeout: Duration,
}

impl IntentResolver {
    pub fn new(classifier: Arc<dyn IntentClassifier>, threshold: f64, timeout: Duration) -> Self {
        Self {
            classifier,
            threshold,
            timeout,
        }
    }

    pub async fn resolve(&self, transcript: &str) -> IntentClassification {
        let threshold = self.threshold;
        let method = self.classifier.method();
        let primary = async {
            let verdict = self.classifier.classify(transcript).await?;
            Ok::<_, CollaboratorError>(IntentClassification {
                intent: verdict.intent,
                confidence: verdict.confidence.clamp(0.0, 1.0),
                entities: verdict.entities,
                method: method.to_string(),
                matched_keywords: Vec::new(),
            })
        };

        let outcome = resolve_tiers(
            "intent_classifier",
            self.timeout,
            primary,
            |classification: &IntentClassification| classification.confidence >= threshold,
            || Some(classify_by_keywords(transcript)),
        )
        .await;

        let tier = outcome.tier();
        let mut classification = match outcome {
            TierOutcome::Primary(classification) | TierOutcome::Fallback(classification) => {
                classification
            }
            TierOutcome::Unavailable => classify_by_keywords(transcript),
        };

        merge_entities(&mut classification.entities, extract_entities(transcript));

        tracing::debug!(
            intent = %classification.intent,
            confidence = classification.confidence,
            method = %classification.method,
            tier,
            "Intent resolved"
        );
        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ClassifierVerdict, Unconfigured};
    use async_trait::async_trait;

    struct FixedClassifier(Result<ClassifierVerdict, &'static str>);

    #[async_trait]
    impl IntentClassifier for FixedClassifier {
        fn method(&self) -> &'static str {
            "fixed"
        }

        async fn classify(&self, _text: &str) -> Result<ClassifierVerdict, CollaboratorError> {
            self.0
                .clone()
                .map_err(|msg| CollaboratorError::Malformed(msg.to_string()))
        }
    }

    fn verdict(intent: Intent, confidence: f64) -> ClassifierVerdict {
        ClassifierVerdict {
            intent,
            confidence,
            entities: Entities::new(),
        }
    }

    fn resolver(classifier: impl IntentClassifier + 'static) -> IntentResolver {
        IntentResolver::new(Arc::new(classifier), 0.7, Duration::from_secs(1))
    }

    #[test]
    fn start_request_is_recognised() {
        let result = classify_by_keywords("I want to start delivery");
        assert_eq!(result.intent, Intent::Start);
        assert!(result.confidence > MIN_KEYWORD_SCORE);
        assert_eq!(result.method, RULE_BASED_METHOD);
        assert!(result.matched_keywords.contains(&"want to start".to_string()));
    }

    #[test]
    fn greeting_small_talk_is_unknown() {
        let result = classify_by_keywords("hello there");
        assert_eq!(result.intent, Intent::Unknown);
        assert!(result.confidence <= MIN_KEYWORD_SCORE);
    }

    #[test]
    fn gibberish_is_unknown_with_zero_confidence() {
        let result = classify_by_keywords("asdkjfh");
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn score_grows_with_matched_keywords() {
        let (one, _) = keyword_score(Intent::Stop, "please stop");
        let (two, _) = keyword_score(Intent::Stop, "please stop and cancel");
        let (three, _) = keyword_score(Intent::Stop, "please stop and cancel, i quit");
        assert!(one < two && two < three);
    }

    #[test]
    fn score_is_capped_at_one() {
        let text = START_KEYWORDS.join(" ");
        let (score, matched) = keyword_score(Intent::Start, &text);
        assert_eq!(score, 1.0);
        assert_eq!(matched.len(), START_KEYWORDS.len());
    }

    #[test]
    fn ties_resolve_to_first_declared_category() {
        // one of nine start keywords vs one of nine stop keywords
        let result = classify_by_keywords("start or quit");
        let (start, _) = keyword_score(Intent::Start, "start or quit");
        let (stop, _) = keyword_score(Intent::Stop, "start or quit");
        assert_eq!(start, stop);
        assert_eq!(result.intent, Intent::Start);
    }

    #[test]
    fn live_agent_request_is_recognised() {
        let result = classify_by_keywords("Can I talk to a representative, I need a human");
        assert_eq!(result.intent, Intent::LiveAgent);
    }

    #[test]
    fn entities_extract_phone_email_and_zip() {
        let entities = extract_entities("Call me at 555-123-4567 or jane@example.com, zip 62704");
        assert_eq!(entities["phone"], vec!["555-123-4567".to_string()]);
        assert_eq!(entities["email"], vec!["jane@example.com".to_string()]);
        assert_eq!(entities["zip_code"], vec!["62704".to_string()]);
        assert!(entities["address_number"].contains(&"62704".to_string()));
    }

    #[test]
    fn no_entities_for_plain_text() {
        assert!(extract_entities("no numbers here").is_empty());
    }

    #[tokio::test]
    async fn confident_classifier_wins() {
        let resolver = resolver(FixedClassifier(Ok(verdict(Intent::Missed, 0.92))));
        let result = resolver.resolve("my paper never came").await;
        assert_eq!(result.intent, Intent::Missed);
        assert_eq!(result.method, "fixed");
    }

    #[tokio::test]
    async fn low_confidence_classifier_falls_back_to_keywords() {
        let resolver = resolver(FixedClassifier(Ok(verdict(Intent::Missed, 0.4))));
        let result = resolver.resolve("I want to stop my delivery").await;
        assert_eq!(result.intent, Intent::Stop);
        assert_eq!(result.method, RULE_BASED_METHOD);
    }

    #[tokio::test]
    async fn malformed_classifier_output_falls_back() {
        let resolver = resolver(FixedClassifier(Err("not json")));
        let result = resolver.resolve("I want to start delivery").await;
        assert_eq!(result.intent, Intent::Start);
        assert_eq!(result.method, RULE_BASED_METHOD);
    }

    #[tokio::test]
    async fn entities_are_attached_regardless_of_tier() {
        let resolver = resolver(FixedClassifier(Ok(verdict(Intent::Start, 0.95))));
        let result = resolver.resolve("start at 123 Main Street 62704").await;
        assert_eq!(result.entities["zip_code"], vec!["62704".to_string()]);
    }

    #[tokio::test]
    async fn unavailable_classifier_leaves_gibberish_unknown() {
        let resolver = resolver(Unconfigured("openai"));
        let result = resolver.resolve("asdkjfh").await;
        assert_eq!(result.intent, Intent::Unknown);
        assert!(!result.is_serviceable());
    }
}
