use crate::error::PositionError;
use crate::model::{ConnHandle, Position};
use serde::Deserialize;

/// Connect-time parameters taken from the upgrade request's query string.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ConnectParams {
    #[serde(default)]
    pub lat: Option<String>,
    #[serde(default)]
    pub lng: Option<String>,
    #[serde(default)]
    pub identity: Option<String>,
}

impl ConnectParams {
    pub fn new(lat: Option<&str>, lng: Option<&str>, identity: Option<&str>) -> Self {
        Self {
            lat: lat.map(str::to_string),
            lng: lng.map(str::to_string),
            identity: identity.map(str::to_string),
        }
    }

    /// Builds params from raw query pairs. The first occurrence of a key
    /// wins and unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "lat" => &mut params.lat,
                "lng" => &mut params.lng,
                "identity" => &mut params.identity,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }
        params
    }

    pub fn position(&self, identity: &str) -> Result<Position, PositionError> {
        let lat = parse_coordinate("lat", self.lat.as_deref(), 90.0)?;
        let lng = parse_coordinate("lng", self.lng.as_deref(), 180.0)?;
        Ok(Position {
            lat,
            lng,
            id: identity.to_string(),
        })
    }
}

/// Explicit identity wins verbatim; otherwise the identity is scoped to the
/// connection and does not survive a reconnect.
pub fn resolve_identity(params: &ConnectParams, handle: ConnHandle) -> String {
    match params.identity.as_deref() {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => fallback_identity(handle),
    }
}

fn fallback_identity(handle: ConnHandle) -> String {
    format!("anon-{handle}")
}

fn parse_coordinate(
    field: &'static str,
    raw: Option<&str>,
    limit: f64,
) -> Result<f64, PositionError> {
    let raw = match raw.map(str::trim) {
        Some(value) if !value.is_empty() => value,
        _ => return Err(PositionError::Missing(field)),
    };
    let value = raw.parse::<f64>().map_err(|_| PositionError::Invalid {
        field,
        value: raw.to_string(),
    })?;
    if !value.is_finite() {
        return Err(PositionError::Invalid {
            field,
            value: raw.to_string(),
        });
    }
    if value.abs() > limit {
        return Err(PositionError::OutOfRange { field, value });
    }
    Ok(value)
}
