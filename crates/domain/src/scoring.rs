//! Compatibility scoring between a user and a candidate.
//!
//! `total = 0.6 * interest + 0.3 * proximity + 0.1 * activity`, where each
//! sub-score lies in `[0, 1]`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::users::UserProfile;
use crate::util::MS_PER_HOUR;

pub const INTEREST_WEIGHT: f64 = 0.6;
pub const PROXIMITY_WEIGHT: f64 = 0.3;
pub const ACTIVITY_WEIGHT: f64 = 0.1;

pub const EARTH_RADIUS_KM: f64 = 6371.0;
pub const MAX_DISTANCE_KM: f64 = 100.0;

const SAME_STATE_SCORE: f64 = 0.5;
const SAME_COUNTRY_SCORE: f64 = 0.2;

/// `(max hours since last active, score)`; first matching step wins.
const ACTIVITY_STEPS: &[(f64, f64)] = &[(24.0, 1.0), (72.0, 0.8), (168.0, 0.5), (720.0, 0.2)];

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreBreakdown {
    pub interest: u8,
    pub proximity: u8,
    pub activity: u8,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct MatchScore {
    pub total: f64,
    pub breakdown: ScoreBreakdown,
}

pub fn haversine_km(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

/// Jaccard similarity of the two interest sets.
pub fn interest_score(left: &[String], right: &[String]) -> f64 {
    let left: HashSet<&str> = left.iter().map(String::as_str).collect();
    let right: HashSet<&str> = right.iter().map(String::as_str).collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f64 / union as f64
}

pub fn proximity_score(user: &UserProfile, candidate: &UserProfile) -> f64 {
    if let (Some(a), Some(b)) = (user.city.as_deref(), candidate.city.as_deref()) {
        if a.to_lowercase() == b.to_lowercase() {
            return 1.0;
        }
    }

    if let (Some(a), Some(b)) = (user.location, candidate.location) {
        let distance = haversine_km(a.lat, a.lng, b.lat, b.lng);
        if distance >= MAX_DISTANCE_KM {
            return 0.0;
        }
        return 1.0 - distance / MAX_DISTANCE_KM;
    }

    if same_region(user.state.as_deref(), candidate.state.as_deref()) {
        return SAME_STATE_SCORE;
    }

    if same_region(user.country.as_deref(), candidate.country.as_deref()) {
        return SAME_COUNTRY_SCORE;
    }

    0.0
}

fn same_region(left: Option<&str>, right: Option<&str>) -> bool {
    matches!((left, right), (Some(a), Some(b)) if !a.is_empty() && a == b)
}

pub fn activity_score(last_active_at_ms: Option<i64>, now_ms: i64) -> f64 {
    let Some(last_active_at_ms) = last_active_at_ms else {
        return 0.0;
    };
    let hours_ago = (now_ms - last_active_at_ms) as f64 / MS_PER_HOUR as f64;
    ACTIVITY_STEPS
        .iter()
        .find(|(max_hours, _)| hours_ago <= *max_hours)
        .map(|(_, score)| *score)
        .unwrap_or(0.0)
}

pub fn score(user: &UserProfile, candidate: &UserProfile, now_ms: i64) -> MatchScore {
    let interest = interest_score(&user.interest_ids, &candidate.interest_ids);
    let proximity = proximity_score(user, candidate);
    let activity = activity_score(candidate.last_active_at_ms, now_ms);

    let total =
        interest * INTEREST_WEIGHT + proximity * PROXIMITY_WEIGHT + activity * ACTIVITY_WEIGHT;

    MatchScore {
        total: round_to_hundredths(total),
        breakdown: ScoreBreakdown {
            interest: as_percentage(interest),
            proximity: as_percentage(proximity),
            activity: as_percentage(activity),
        },
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn as_percentage(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 100.0).round() as u8
}
