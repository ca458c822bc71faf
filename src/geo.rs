use std::{net::IpAddr, time::Duration};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoJsonKind {
    Point,
}

/// GeoJSON point, coordinates always `[longitude, latitude]`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    kind: GeoJsonKind,
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(longitude: f64, latitude: f64) -> Self {
        Self {
            kind: GeoJsonKind::Point,
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

impl Default for GeoPoint {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GeoLookupError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("lookup failed for {0}")]
    Lookup(IpAddr),
}

/// Client for an ip-api.com style IP geolocation endpoint.
#[derive(Clone)]
pub struct GeoLocator {
    client: reqwest::Client,
    base_url: String,
}

impl GeoLocator {
    pub fn new(base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub async fn locate(&self, ip: IpAddr) -> Result<GeoPoint, GeoLookupError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), ip);

        let response = self.client.get(&url).send().await?.error_for_status()?;
        let lookup: IpLookupResponse = response.json().await?;

        match lookup {
            IpLookupResponse {
                status,
                lat: Some(lat),
                lon: Some(lon),
            } if status == "success" => Ok(GeoPoint::new(lon, lat)),
            _ => Err(GeoLookupError::Lookup(ip)),
        }
    }
}

#[derive(Deserialize)]
struct IpLookupResponse {
    status: String,
    lat: Option<f64>,
    lon: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_coordinate_order() {
        let point = GeoPoint::new(106.8, -6.2);

        assert_eq!(point.longitude(), 106.8);
        assert_eq!(point.latitude(), -6.2);
        assert_eq!(point.coordinates, [106.8, -6.2]);
    }

    #[test]
    fn test_point_json_shape() {
        let point = GeoPoint::new(1.0, 2.0);

        let json = serde_json::to_value(point).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "Point", "coordinates": [1.0, 2.0] })
        );
    }

    #[tokio::test]
    async fn test_locate_unreachable_endpoint() {
        let locator = GeoLocator::new("http://127.0.0.1:9/json").unwrap();

        locator
            .locate("10.0.0.1".parse().unwrap())
            .await
            .expect_err("lookup against an unreachable endpoint should fail");
    }
}
