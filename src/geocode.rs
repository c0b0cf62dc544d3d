use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::GeocodeConfig;
use crate::exif::Coordinates;

#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Geocoding request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Geocoding service returned status {status}: {info}")]
    Rejected { status: String, info: String },
}

/// Turns GPS coordinates into a human-readable place name.
///
/// Without an API key, or when the lookup fails, the coordinates themselves
/// are used as the place name.
#[derive(Clone)]
pub struct Geocoder {
    http_client: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
}

impl Geocoder {
    pub fn new(config: &GeocodeConfig) -> Result<Self, GeocodeError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(GeocodeError::Client)?;

        Ok(Self {
            http_client,
            api_key: config.amap_api_key.clone().filter(|k| !k.is_empty()),
            endpoint: config.endpoint.clone(),
        })
    }

    /// A geocoder that never calls out and always yields formatted coordinates.
    pub fn offline() -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: None,
            endpoint: String::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.api_key.is_some()
    }

    /// Place name for `coords`, falling back to [`Coordinates::formatted`].
    pub async fn describe(&self, coords: Coordinates) -> String {
        match self.lookup(coords).await {
            Ok(Some(name)) => name,
            Ok(None) => coords.formatted(),
            Err(e) => {
                warn!("Reverse geocoding failed, using coordinates: {}", e);
                coords.formatted()
            }
        }
    }

    async fn lookup(&self, coords: Coordinates) -> Result<Option<String>, GeocodeError> {
        let Some(key) = &self.api_key else {
            return Ok(None);
        };

        // Longitude first
        let location = format!("{},{}", coords.longitude, coords.latitude);
        debug!("Reverse geocoding {}", location);

        let body: Value = self
            .http_client
            .get(&self.endpoint)
            .query(&[("key", key.as_str()), ("location", location.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        parse_regeo_response(&body)
    }
}

/// Extract `province + city + district` from a regeo response body.
///
/// `city` comes back as an empty array for municipalities; empty parts are
/// skipped and an all-empty address yields `Ok(None)`.
pub fn parse_regeo_response(body: &Value) -> Result<Option<String>, GeocodeError> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("");
    if status != "1" {
        return Err(GeocodeError::Rejected {
            status: status.to_string(),
            info: body
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
        });
    }

    let component = &body["regeocode"]["addressComponent"];
    let name: String = ["province", "city", "district"]
        .iter()
        .filter_map(|field| component.get(*field).and_then(Value::as_str))
        .filter(|part| !part.is_empty())
        .collect();

    Ok(if name.is_empty() { None } else { Some(name) })
}
