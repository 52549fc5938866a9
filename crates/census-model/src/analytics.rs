//! Reports over one import: birthday presents and age percentiles.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::citizen::{Citizen, CitizenId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentCount {
    pub citizen_id: CitizenId,
    pub presents: u64,
}

/// Presents bought per calendar month (keys `1..=12`, always all present).
///
/// For every citizen born in month M, each of their relatives buys one
/// present in M.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BirthdaysReport {
    months: BTreeMap<u32, Vec<PresentCount>>,
}

impl BirthdaysReport {
    pub fn month(&self, month: u32) -> &[PresentCount] {
        self.months.get(&month).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub fn birthdays(citizens: &[Citizen]) -> BirthdaysReport {
    let mut counts: BTreeMap<u32, BTreeMap<CitizenId, u64>> = BTreeMap::new();
    for citizen in citizens {
        let month = citizen.birth_date.month();
        for &relative_id in &citizen.relatives {
            *counts
                .entry(month)
                .or_default()
                .entry(relative_id)
                .or_default() += 1;
        }
    }

    let months = (1..=12)
        .map(|month| {
            let entries = counts
                .remove(&month)
                .unwrap_or_default()
                .into_iter()
                .map(|(citizen_id, presents)| PresentCount {
                    citizen_id,
                    presents,
                })
                .collect();
            (month, entries)
        })
        .collect();
    BirthdaysReport { months }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TownAgePercentiles {
    pub town: String,
    pub p50: f64,
    pub p75: f64,
    pub p99: f64,
}

/// Full years between `birth_date` and `today` (0 for future dates).
pub fn age_in_years(birth_date: NaiveDate, today: NaiveDate) -> u32 {
    let mut years = today.year() - birth_date.year();
    if (today.month(), today.day()) < (birth_date.month(), birth_date.day()) {
        years -= 1;
    }
    u32::try_from(years).unwrap_or(0)
}

/// Linear interpolation between closest ranks over an ascending slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted {
        [] => 0.0,
        [only] => *only,
        _ => {
            let rank = (p / 100.0) * (sorted.len() - 1) as f64;
            let lower = rank.floor() as usize;
            let upper = rank.ceil() as usize;
            let weight = rank - lower as f64;
            sorted[lower] + (sorted[upper] - sorted[lower]) * weight
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// p50/p75/p99 of citizen ages per town, towns in name order.
pub fn age_percentiles(citizens: &[Citizen], today: NaiveDate) -> Vec<TownAgePercentiles> {
    let mut by_town: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for citizen in citizens {
        by_town
            .entry(citizen.town.as_str())
            .or_default()
            .push(f64::from(age_in_years(citizen.birth_date, today)));
    }

    by_town
        .into_iter()
        .map(|(town, mut ages)| {
            ages.sort_by(f64::total_cmp);
            TownAgePercentiles {
                town: town.to_string(),
                p50: round2(percentile(&ages, 50.0)),
                p75: round2(percentile(&ages, 75.0)),
                p99: round2(percentile(&ages, 99.0)),
            }
        })
        .collect()
}
