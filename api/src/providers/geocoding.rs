//! Google Geocoding API as address validator.

use async_trait::async_trait;
use callflow_core::collaborators::{AddressComponents, AddressValidation, AddressValidator};
use callflow_core::error::CollaboratorError;
use serde::Deserialize;

use super::{ensure_success, malformed, transport};

const GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

pub struct GoogleGeocoder {
    api_key: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    address_components: Vec<Component>,
}

#[derive(Debug, Deserialize)]
struct Component {
    long_name: String,
    short_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl GoogleGeocoder {
    pub fn new(api_key: String, http: reqwest::Client) -> Self {
        Self { api_key, http }
    }
}

fn component(result: &GeocodeResult, kind: &str, short: bool) -> Option<String> {
    result
        .address_components
        .iter()
        .find(|c| c.types.iter().any(|t| t == kind))
        .map(|c| if short { &c.short_name } else { &c.long_name })
        .filter(|value| !value.is_empty())
        .cloned()
}

fn confidence(components: &AddressComponents) -> f64 {
    let mut score: f64 = 0.5;
    if components.street_number.is_some() && components.street_name.is_some() {
        score += 0.2;
    }
    if components.city.is_some() {
        score += 0.1;
    }
    if components.state.is_some() {
        score += 0.1;
    }
    if components.zipcode.is_some() {
        score += 0.1;
    }
    score.min(1.0)
}

fn into_validation(response: GeocodeResponse) -> Result<AddressValidation, CollaboratorError> {
    match response.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => {
            return Ok(AddressValidation {
                is_valid: false,
                confidence: 0.0,
                normalized: None,
                components: AddressComponents::default(),
            });
        }
        other => {
            return Err(CollaboratorError::Rejected(format!(
                "{other}: {}",
                response.error_message.unwrap_or_default()
            )));
        }
    }

    let result = response
        .results
        .first()
        .ok_or_else(|| CollaboratorError::Malformed("OK status without results".to_string()))?;

    let components = AddressComponents {
        street_number: component(result, "street_number", false),
        street_name: component(result, "route", false),
        city: component(result, "locality", false)
            .or_else(|| component(result, "postal_town", false)),
        state: component(result, "administrative_area_level_1", true),
        zipcode: component(result, "postal_code", false),
        country: component(result, "country", true),
    };
    let is_valid = components.street_number.is_some()
        && components.street_name.is_some()
        && components.city.is_some()
        && components.state.is_some()
        && components.zipcode.is_some();

    Ok(AddressValidation {
        is_valid,
        confidence: confidence(&components),
        normalized: result.formatted_address.clone(),
        components,
    })
}

#[async_trait]
impl AddressValidator for GoogleGeocoder {
    async fn validate(&self, text: &str) -> Result<AddressValidation, CollaboratorError> {
        let response = self
            .http
            .get(GEOCODE_URL)
            .query(&[("address", text), ("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(transport)?;
        let parsed: GeocodeResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(malformed)?;
        let validation = into_validation(parsed)?;
        tracing::debug!(
            is_valid = validation.is_valid,
            confidence = validation.confidence,
            normalized = validation.normalized.as_deref().unwrap_or("<none>"),
            "Geocoded address"
        );
        Ok(validation)
    }
}
