//! Joining model annotations onto source periods.

use std::collections::HashMap;

use crate::model::{ForecastPeriod, JoinedPeriod, PeriodAnnotation};

/// Attach annotations to periods by exact name.
///
/// Output follows `periods` order. A period with no annotation is dropped. When
/// several annotations share a name, the first one in `annotations` is used.
pub fn join_periods(
    periods: &[ForecastPeriod],
    annotations: &[PeriodAnnotation],
) -> Vec<JoinedPeriod> {
    let mut by_name: HashMap<&str, &PeriodAnnotation> =
        HashMap::with_capacity(annotations.len());
    for annotation in annotations {
        by_name.entry(annotation.name.as_str()).or_insert(annotation);
    }

    periods
        .iter()
        .filter_map(|period| {
            by_name
                .get(period.name.as_str())
                .map(|annotation| join_period(period, annotation))
        })
        .collect()
}

pub fn join_period(period: &ForecastPeriod, annotation: &PeriodAnnotation) -> JoinedPeriod {
    JoinedPeriod {
        period: period.clone(),
        time_of_day: annotation.time_of_day,
        icon: annotation.icon,
        beaufort: annotation.beaufort,
    }
}
