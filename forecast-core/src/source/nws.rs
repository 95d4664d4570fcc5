use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{Client, header};
use serde::Deserialize;
use tracing::debug;

use crate::{config::SourceConfig, error::truncate_body, model::ForecastPeriod};

use super::{ForecastSource, PeriodCount, SourceError};

/// Client for the api.weather.gov gridpoint forecast.
#[derive(Debug, Clone)]
pub struct NwsClient {
    base_url: String,
    http: Client,
}

impl NwsClient {
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout)
            .build()
            .context("Failed to build forecast source HTTP client")?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn forecast_url(&self, location: &str) -> String {
        format!("{}/gridpoints/{location}/forecast", self.base_url)
    }

    async fn fetch_forecast(&self, location: &str) -> Result<NwsForecastResponse, SourceError> {
        let url = self.forecast_url(location);
        debug!(%url, "getting forecast");

        let res = self
            .http
            .get(&url)
            .header(header::ACCEPT, "application/geo+json")
            .send()
            .await
            .map_err(|source| SourceError::Request { url: url.clone(), source })?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|source| SourceError::Request { url: url.clone(), source })?;

        if !status.is_success() {
            return Err(SourceError::Status {
                url,
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        serde_json::from_str(&body).map_err(|source| SourceError::Decode { url, source })
    }
}

#[derive(Debug, Deserialize)]
struct NwsForecastResponse {
    properties: NwsProperties,
}

#[derive(Debug, Deserialize)]
struct NwsProperties {
    periods: Vec<NwsPeriod>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NwsPeriod {
    name: String,
    start_time: DateTime<FixedOffset>,
    end_time: DateTime<FixedOffset>,
    is_daytime: bool,
    temperature: i32,
    #[serde(default)]
    wind_speed: String,
    #[serde(default)]
    wind_direction: String,
    #[serde(default)]
    short_forecast: String,
    #[serde(default)]
    detailed_forecast: String,
}

impl From<NwsPeriod> for ForecastPeriod {
    fn from(p: NwsPeriod) -> Self {
        ForecastPeriod {
            name: p.name,
            start_time: p.start_time,
            end_time: p.end_time,
            temperature: p.temperature,
            wind_speed: p.wind_speed,
            wind_direction: p.wind_direction,
            short_forecast: p.short_forecast,
            detailed_forecast: p.detailed_forecast,
            is_daytime: p.is_daytime,
        }
    }
}

#[async_trait]
impl ForecastSource for NwsClient {
    async fn fetch_periods(
        &self,
        location: &str,
        count: PeriodCount,
    ) -> Result<Vec<ForecastPeriod>, SourceError> {
        let forecast = self.fetch_forecast(location).await?;
        let available = forecast.properties.periods.len();

        let periods = count.apply(
            forecast
                .properties
                .periods
                .into_iter()
                .map(ForecastPeriod::from)
                .collect(),
        );

        debug!(available, kept = periods.len(), %count, "normalized forecast periods");
        Ok(periods)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{num::NonZeroUsize, time::Duration};
    use wiremock::matchers::{header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> NwsClient {
        NwsClient::new(&SourceConfig {
            base_url: server.uri(),
            timeout: Duration::from_secs(2),
            ..SourceConfig::default()
        })
        .unwrap()
    }

    /// `start` and `end` are local Pacific times without seconds.
    fn period_json(name: &str, start: &str, end: &str, temp: i32, day: bool) -> serde_json::Value {
        serde_json::json!({
            "number": 1,
            "name": name,
            "startTime": format!("{start}:00-07:00"),
            "endTime": format!("{end}:00-07:00"),
            "isDaytime": day,
            "temperature": temp,
            "temperatureUnit": "F",
            "temperatureTrend": "",
            "probabilityOfPrecipitation": {"unitCode": "wmoUnit:percent", "value": 20},
            "windSpeed": "2 to 6 mph",
            "windDirection": "SW",
            "icon": "https://api.weather.gov/icons/land/night/bkn?size=medium",
            "shortForecast": "Mostly Cloudy",
            "detailedForecast": format!("{name}: mostly cloudy.")
        })
    }

    fn forecast_body() -> serde_json::Value {
        serde_json::json!({
            "@context": [],
            "type": "Feature",
            "geometry": {"type": "Polygon", "coordinates": []},
            "properties": {
                "units": "us",
                "generatedAt": "2024-06-08T19:40:00+00:00",
                "periods": [
                    period_json("Tonight", "2024-06-08T20:00", "2024-06-09T06:00", 54, false),
                    period_json("Sunday", "2024-06-09T06:00", "2024-06-09T18:00", 74, true),
                    period_json("Sunday Night", "2024-06-09T18:00", "2024-06-10T06:00", 51, false),
                    period_json("Monday", "2024-06-10T06:00", "2024-06-10T18:00", 70, true),
                ]
            }
        })
    }

    #[tokio::test]
    async fn fetches_and_normalizes_periods_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gridpoints/SEW/127,75/forecast"))
            .and(header_eq("accept", "application/geo+json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .expect(1)
            .mount(&server)
            .await;

        let periods = client_for(&server)
            .fetch_periods("SEW/127,75", PeriodCount::All)
            .await
            .unwrap();

        let names: Vec<_> = periods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Tonight", "Sunday", "Sunday Night", "Monday"]);
        assert_eq!(periods[1].temperature, 74);
        assert!(periods[1].is_daytime);
        assert_eq!(periods[0].wind_direction, "SW");
        assert_eq!(periods[0].start_time.to_rfc3339(), "2024-06-08T20:00:00-07:00");
    }

    #[tokio::test]
    async fn keeps_first_n_and_clamps_large_counts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
            .mount(&server)
            .await;
        let client = client_for(&server);

        let three = PeriodCount::first(NonZeroUsize::new(3).unwrap());
        let periods = client.fetch_periods("SEW/127,75", three).await.unwrap();
        assert_eq!(periods.len(), 3);
        assert_eq!(periods[2].name, "Sunday Night");

        let many = PeriodCount::first(NonZeroUsize::new(50).unwrap());
        let periods = client.fetch_periods("SEW/127,75", many).await.unwrap();
        assert_eq!(periods.len(), 4);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream busy"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_periods("SEW/127,75", PeriodCount::All)
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Status { status: 503, .. }));
        assert!(err.to_string().contains("upstream busy"));
    }

    #[tokio::test]
    async fn malformed_body_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"properties": {}})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .fetch_periods("SEW/127,75", PeriodCount::All)
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Decode { .. }));
    }
}
