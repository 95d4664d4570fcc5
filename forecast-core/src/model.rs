use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// One named, time-bounded forecast period as reported by the upstream source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastPeriod {
    pub name: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: DateTime<FixedOffset>,
    pub temperature: i32,
    pub wind_speed: String,
    pub wind_direction: String,
    pub short_forecast: String,
    pub detailed_forecast: String,
    pub is_daytime: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Day,
    Night,
}

/// Icon vocabulary shared by the prompts and the reply parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Icon {
    Cloud,
    CloudDrizzle,
    CloudFog,
    CloudHail,
    CloudLightning,
    CloudMoon,
    CloudMoonRain,
    CloudRain,
    CloudRainWind,
    CloudSnow,
    CloudSun,
    CloudSunRain,
    Cloudy,
    Snowflake,
    Sun,
    SunSnow,
    ThermometerSnowflake,
    ThermometerSun,
    Wind,
}

impl Icon {
    pub const fn all() -> &'static [Icon] {
        &[
            Icon::Cloud,
            Icon::CloudDrizzle,
            Icon::CloudFog,
            Icon::CloudHail,
            Icon::CloudLightning,
            Icon::CloudMoon,
            Icon::CloudMoonRain,
            Icon::CloudRain,
            Icon::CloudRainWind,
            Icon::CloudSnow,
            Icon::CloudSun,
            Icon::CloudSunRain,
            Icon::Cloudy,
            Icon::Snowflake,
            Icon::Sun,
            Icon::SunSnow,
            Icon::ThermometerSnowflake,
            Icon::ThermometerSun,
            Icon::Wind,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Icon::Cloud => "cloud",
            Icon::CloudDrizzle => "cloud-drizzle",
            Icon::CloudFog => "cloud-fog",
            Icon::CloudHail => "cloud-hail",
            Icon::CloudLightning => "cloud-lightning",
            Icon::CloudMoon => "cloud-moon",
            Icon::CloudMoonRain => "cloud-moon-rain",
            Icon::CloudRain => "cloud-rain",
            Icon::CloudRainWind => "cloud-rain-wind",
            Icon::CloudSnow => "cloud-snow",
            Icon::CloudSun => "cloud-sun",
            Icon::CloudSunRain => "cloud-sun-rain",
            Icon::Cloudy => "cloudy",
            Icon::Snowflake => "snowflake",
            Icon::Sun => "sun",
            Icon::SunSnow => "sun-snow",
            Icon::ThermometerSnowflake => "thermometer-snowflake",
            Icon::ThermometerSun => "thermometer-sun",
            Icon::Wind => "wind",
        }
    }
}

impl std::fmt::Display for Icon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Beaufort wind force, ordered from calm to hurricane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Beaufort {
    Calm,
    #[serde(rename = "Light air")]
    LightAir,
    #[serde(rename = "Light breeze")]
    LightBreeze,
    #[serde(rename = "Gentle breeze")]
    GentleBreeze,
    #[serde(rename = "Moderate breeze")]
    ModerateBreeze,
    #[serde(rename = "Fresh breeze")]
    FreshBreeze,
    #[serde(rename = "Strong breeze")]
    StrongBreeze,
    #[serde(rename = "Near gale")]
    NearGale,
    Gale,
    #[serde(rename = "Strong gale")]
    StrongGale,
    Storm,
    #[serde(rename = "Violent storm")]
    ViolentStorm,
    #[serde(rename = "Hurricane force")]
    HurricaneForce,
}

/// Per-period classification produced by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeriodAnnotation {
    pub name: String,
    pub time_of_day: TimeOfDay,
    pub icon: Icon,
    pub beaufort: Beaufort,
}

/// Shape the model must reply with for the summary product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SummaryReply {
    pub summary: String,
    #[serde(default)]
    pub icon: Option<Icon>,
}

/// A source period with its annotation attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinedPeriod {
    #[serde(flatten)]
    pub period: ForecastPeriod,
    pub time_of_day: TimeOfDay,
    pub icon: Icon,
    pub beaufort: Beaufort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryProduct {
    pub summary: String,
    pub icon: Option<Icon>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownProduct {
    pub periods: Vec<JoinedPeriod>,
    pub last_updated: DateTime<Utc>,
}
