//! Scoring primitives shared by cluster matching and duplicate ranking.
//!
//! Pure functions only: distance, tag overlap, recency and the fixed-weight
//! composite score.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::types::GeoPoint;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

pub const DISTANCE_WEIGHT: f64 = 0.60;
pub const TAG_OVERLAP_WEIGHT: f64 = 0.25;
pub const RECENCY_WEIGHT: f64 = 0.15;

const MILLIS_PER_DAY: f64 = 86_400_000.0;

pub fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

/// Haversine great-circle distance between two points in meters.
pub fn distance_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().asin();
    EARTH_RADIUS_METERS * c
}

/// Linear distance score: 1 at the point itself, 0 at (and beyond) `radius_m`.
pub fn distance_score(distance_m: f64, radius_m: f64) -> f64 {
    if radius_m <= 0.0 {
        return 0.0;
    }
    clamp01(1.0 - distance_m / radius_m)
}

/// Jaccard similarity of two tag sets. Two empty sets score 0, not NaN.
pub fn tag_overlap<S: AsRef<str>>(a: &[S], b: &[S]) -> f64 {
    let a: HashSet<&str> = a.iter().map(AsRef::as_ref).collect();
    let b: HashSet<&str> = b.iter().map(AsRef::as_ref).collect();

    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = a.intersection(&b).count();
    intersection as f64 / union as f64
}

pub fn has_shared_tags<S: AsRef<str>>(a: &[S], b: &[S]) -> bool {
    let b: HashSet<&str> = b.iter().map(AsRef::as_ref).collect();
    a.iter().any(|tag| b.contains(tag.as_ref()))
}

/// Fractional age in days. Negative when `created_at` lies after `now`.
pub fn age_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - created_at).num_milliseconds() as f64 / MILLIS_PER_DAY
}

/// `clamp01(1 - age/lookback)`: decays linearly to 0 at the lookback horizon.
pub fn recency(created_at: DateTime<Utc>, now: DateTime<Utc>, lookback_days: i64) -> f64 {
    if lookback_days <= 0 {
        return 0.0;
    }
    clamp01(1.0 - age_days(created_at, now) / lookback_days as f64)
}

/// Weighted composite of the three component scores, rounded to 4 places.
pub fn composite_score(distance_score: f64, tag_score: f64, recency_score: f64) -> f64 {
    let score = distance_score * DISTANCE_WEIGHT
        + tag_score * TAG_OVERLAP_WEIGHT
        + recency_score * RECENCY_WEIGHT;
    round_to(score, 4)
}

pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Latitude/longitude rectangle used to prefilter candidates before the
/// exact haversine check.
///
/// A box that crosses the antimeridian has `min_lng > max_lng`: it covers
/// `[min_lng, 180]` and `[-180, max_lng]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl GeoBounds {
    /// Smallest rectangle containing every point within `radius_m` of `center`.
    pub fn around(center: GeoPoint, radius_m: f64) -> Self {
        let d_lat = (radius_m / EARTH_RADIUS_METERS).to_degrees();
        let min_lat = (center.lat - d_lat).max(-90.0);
        let max_lat = (center.lat + d_lat).min(90.0);

        // Widest longitude span occurs at the latitude closest to a pole.
        let polar_lat = min_lat.abs().max(max_lat.abs()).to_radians();
        let cos = polar_lat.cos();
        let d_lng = if cos <= f64::EPSILON {
            180.0
        } else {
            d_lat / cos
        };

        let (min_lng, max_lng) = if d_lng >= 180.0 {
            (-180.0, 180.0)
        } else {
            (wrap_lng(center.lng - d_lng), wrap_lng(center.lng + d_lng))
        };

        Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        }
    }

    pub fn wraps_antimeridian(&self) -> bool {
        self.min_lng > self.max_lng
    }

    /// The longitude intervals covered, as two inclusive ranges. A box that
    /// does not wrap repeats its single range.
    pub fn lng_ranges(&self) -> [(f64, f64); 2] {
        if self.wraps_antimeridian() {
            [(self.min_lng, 180.0), (-180.0, self.max_lng)]
        } else {
            [(self.min_lng, self.max_lng); 2]
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        (self.min_lat..=self.max_lat).contains(&point.lat)
            && self
                .lng_ranges()
                .iter()
                .any(|(lo, hi)| (*lo..=*hi).contains(&point.lng))
    }
}

/// Normalise a longitude into `[-180, 180]`.
fn wrap_lng(lng: f64) -> f64 {
    if lng > 180.0 {
        lng - 360.0
    } else if lng < -180.0 {
        lng + 360.0
    } else {
        lng
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn amsterdam() -> GeoPoint {
        GeoPoint::new(52.3676, 4.9041)
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn distance_to_self_is_zero() {
        assert_eq!(distance_meters(amsterdam(), amsterdam()), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = amsterdam();
        let b = GeoPoint::new(52.0907, 5.1214); // Utrecht
        let ab = distance_meters(a, b);
        let ba = distance_meters(b, a);
        assert!((ab - ba).abs() < 1e-9, "{ab} vs {ba}");
        assert!((ab - 35_000.0).abs() < 2_000.0, "Amsterdam-Utrecht ~35km, got {ab}m");
    }

    #[test]
    fn distance_small_offsets_are_metre_scale() {
        // ~0.0001 deg latitude is ~11m
        let d = distance_meters(amsterdam(), GeoPoint::new(52.3677, 4.9041));
        assert!((d - 11.1).abs() < 0.2, "got {d}m");
    }

    #[test]
    fn tag_overlap_empty_sets_score_zero() {
        let empty: Vec<String> = vec![];
        assert_eq!(tag_overlap(&empty, &empty), 0.0);
    }

    #[test]
    fn tag_overlap_identical_sets_score_one() {
        let s = tags(&["flat_tires", "rusty"]);
        assert_eq!(tag_overlap(&s, &s), 1.0);
    }

    #[test]
    fn tag_overlap_is_jaccard() {
        let a = tags(&["flat_tires", "rusty"]);
        let b = tags(&["rusty", "no_chain", "no_saddle"]);
        assert!((tag_overlap(&a, &b) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn tag_overlap_ignores_duplicate_entries() {
        let a = tags(&["rusty", "rusty"]);
        let b = tags(&["rusty"]);
        assert_eq!(tag_overlap(&a, &b), 1.0);
    }

    #[test]
    fn shared_tags() {
        assert!(has_shared_tags(&tags(&["a", "b"]), &tags(&["b"])));
        assert!(!has_shared_tags(&tags(&["a"]), &tags(&["b"])));
    }

    #[test]
    fn recency_is_monotonic_and_clamped() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut previous = f64::INFINITY;
        for days in [-3, 0, 1, 10, 29, 30, 31, 400] {
            let score = recency(now - Duration::days(days), now, 30);
            assert!((0.0..=1.0).contains(&score), "{days}d -> {score}");
            assert!(score <= previous, "{days}d -> {score} > {previous}");
            previous = score;
        }
        assert_eq!(recency(now, now, 30), 1.0);
        assert_eq!(recency(now - Duration::days(30), now, 30), 0.0);
        assert_eq!(recency(now - Duration::days(90), now, 30), 0.0);
    }

    #[test]
    fn recency_halfway() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!((recency(now - Duration::days(90), now, 180) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn composite_uses_fixed_weights_and_rounds() {
        assert_eq!(composite_score(1.0, 1.0, 1.0), 1.0);
        assert_eq!(composite_score(1.0, 0.0, 0.0), 0.6);
        assert_eq!(composite_score(0.0, 1.0, 0.0), 0.25);
        assert_eq!(composite_score(0.0, 0.0, 1.0), 0.15);
        assert_eq!(composite_score(0.123456, 0.0, 0.0), 0.0741);
    }

    #[test]
    fn bounds_contain_every_point_inside_radius() {
        let center = amsterdam();
        let bounds = GeoBounds::around(center, 15.0);
        for (d_lat, d_lng) in [
            (0.0001, 0.0),
            (-0.0001, 0.0),
            (0.0, 0.0002),
            (0.0, -0.0002),
            (0.00009, 0.00013),
        ] {
            let p = GeoPoint::new(center.lat + d_lat, center.lng + d_lng);
            if distance_meters(center, p) <= 15.0 {
                assert!(bounds.contains(p), "{p:?} within 15m but outside {bounds:?}");
            }
        }
        assert!(!bounds.contains(GeoPoint::new(center.lat + 0.001, center.lng)));
    }

    #[test]
    fn bounds_wrap_across_antimeridian() {
        let east = GeoPoint::new(0.0, 179.99997);
        let west = GeoPoint::new(0.0, -179.99997);
        assert!(distance_meters(east, west) < 10.0);

        let bounds = GeoBounds::around(east, 10.0);
        assert!(bounds.wraps_antimeridian());
        assert!(bounds.contains(east));
        assert!(bounds.contains(west));
        assert!(!bounds.contains(GeoPoint::new(0.0, -179.9)));
        assert!(!bounds.contains(GeoPoint::new(0.0, 179.9)));

        let from_west = GeoBounds::around(west, 10.0);
        assert!(from_west.contains(east));

        let inland = GeoBounds::around(amsterdam(), 10.0);
        assert!(!inland.wraps_antimeridian());
        assert_eq!(inland.lng_ranges()[0], inland.lng_ranges()[1]);
    }

    #[test]
    fn distance_score_is_clamped() {
        assert_eq!(distance_score(0.0, 10.0), 1.0);
        assert_eq!(distance_score(5.0, 10.0), 0.5);
        assert_eq!(distance_score(12.0, 10.0), 0.0);
        assert_eq!(distance_score(1.0, 0.0), 0.0);
    }
}
