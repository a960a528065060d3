//! Rasa NLU server as intent classifier.

use async_trait::async_trait;
use callflow_core::collaborators::{ClassifierVerdict, Entities, IntentClassifier};
use callflow_core::error::CollaboratorError;
use callflow_core::session::Intent;
use serde::Deserialize;

use super::{ensure_success, malformed, transport};

pub const METHOD: &str = "rasa";

pub struct Rasa {
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    intent: Option<RasaIntent>,
    #[serde(default)]
    entities: Vec<RasaEntity>,
}

#[derive(Debug, Deserialize)]
struct RasaIntent {
    name: Option<String>,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct RasaEntity {
    entity: String,
    value: serde_json::Value,
}

impl Rasa {
    pub fn new(endpoint: String, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            http,
        }
    }
}

fn into_verdict(parsed: ParseResponse) -> Result<ClassifierVerdict, CollaboratorError> {
    let intent = parsed
        .intent
        .ok_or_else(|| CollaboratorError::Malformed("parse result has no intent".to_string()))?;

    let mut entities = Entities::new();
    for entity in parsed.entities {
        let value = match entity.value {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        entities.entry(entity.entity).or_default().push(value);
    }

    Ok(ClassifierVerdict {
        intent: intent
            .name
            .as_deref()
            .map(Intent::parse)
            .unwrap_or(Intent::Unknown),
        confidence: intent.confidence.clamp(0.0, 1.0),
        entities,
    })
}

#[async_trait]
impl IntentClassifier for Rasa {
    fn method(&self) -> &'static str {
        METHOD
    }

    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, CollaboratorError> {
        let response = self
            .http
            .post(format!("{}/model/parse", self.endpoint))
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(transport)?;
        let parsed: ParseResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(malformed)?;
        into_verdict(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_result_maps_to_verdict() {
        let parsed: ParseResponse = serde_json::from_str(
            r#"{
                "text": "stop my paper at 62704",
                "intent": {"name": "stop", "confidence": 0.81},
                "entities": [
                    {"entity": "zip_code", "value": "62704", "start": 17, "end": 22},
                    {"entity": "zip_code", "value": 60601}
                ]
            }"#,
        )
        .expect("rasa payload");
        let verdict = into_verdict(parsed).expect("verdict");
        assert_eq!(verdict.intent, Intent::Stop);
        assert!((verdict.confidence - 0.81).abs() < f64::EPSILON);
        assert_eq!(
            verdict.entities["zip_code"],
            vec!["62704".to_string(), "60601".to_string()]
        );
    }

    #[test]
    fn null_intent_name_is_unknown() {
        let parsed: ParseResponse =
            serde_json::from_str(r#"{"intent": {"name": null, "confidence": 0.0}}"#)
                .expect("rasa payload");
        assert_eq!(into_verdict(parsed).expect("verdict").intent, Intent::Unknown);
    }

    #[test]
    fn missing_intent_is_malformed() {
        let parsed: ParseResponse = serde_json::from_str(r#"{"entities": []}"#).expect("payload");
        assert!(matches!(
            into_verdict(parsed),
            Err(CollaboratorError::Malformed(_))
        ));
    }
}
