//! History normalization
//!
//! Turns a [`HistoryData`] into the [`RoutePath`] the playback clock walks
//! over: all groups flattened in order, points without finite coordinates
//! dropped, and consecutive duplicate coordinates collapsed so playback never
//! stalls on a parked vehicle.

use crate::model::{HistoryData, RoutePath, RoutePoint};
use serde::{Deserialize, Serialize};

/// Whether an exact `(0, 0)` coordinate counts as a real position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroCoordinatePolicy {
    #[default]
    Accept,
    Reject,
}

impl ZeroCoordinatePolicy {
    /// True when the coordinates are finite and allowed by this policy
    pub fn admits(&self, latitude: f64, longitude: f64) -> bool {
        if !latitude.is_finite() || !longitude.is_finite() {
            return false;
        }
        match self {
            ZeroCoordinatePolicy::Accept => true,
            ZeroCoordinatePolicy::Reject => !(latitude == 0.0 && longitude == 0.0),
        }
    }
}

/// Build the playback route with the default policy (zero coordinates kept)
pub fn build_route_path(history: &HistoryData) -> RoutePath {
    build_route_path_with(history, ZeroCoordinatePolicy::Accept)
}

pub fn build_route_path_with(history: &HistoryData, policy: ZeroCoordinatePolicy) -> RoutePath {
    let mut points: Vec<RoutePoint> = Vec::with_capacity(history.point_count());

    for point in history.items.iter().flat_map(|group| group.items.iter()) {
        if !policy.admits(point.latitude, point.longitude) {
            continue;
        }

        // Compare against the last point we kept, not the last one we saw
        if let Some(last) = points.last() {
            if last.latitude == point.latitude && last.longitude == point.longitude {
                continue;
            }
        }

        points.push(RoutePoint {
            latitude: point.latitude,
            longitude: point.longitude,
        });
    }

    RoutePath::new(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GroupStatus, TripPoint, TripPointGroup};

    fn group(status: GroupStatus, points: &[(f64, f64)]) -> TripPointGroup {
        TripPointGroup {
            status,
            raw_timestamp: String::new(),
            items: points
                .iter()
                .map(|&(lat, lng)| TripPoint::new(lat, lng, "", 0.0))
                .collect(),
        }
    }

    fn history(groups: Vec<TripPointGroup>) -> HistoryData {
        HistoryData {
            items: groups,
            ..Default::default()
        }
    }

    fn coords(path: &RoutePath) -> Vec<(f64, f64)> {
        path.points().iter().map(|p| (p.latitude, p.longitude)).collect()
    }

    #[test]
    fn test_consecutive_duplicate_is_dropped_and_next_retained() {
        let h = history(vec![group(
            GroupStatus::Drive,
            &[(10.0, 20.0), (10.0, 20.0), (10.1, 20.0)],
        )]);
        assert_eq!(coords(&build_route_path(&h)), vec![(10.0, 20.0), (10.1, 20.0)]);
    }

    #[test]
    fn test_non_consecutive_repeat_is_kept() {
        let h = history(vec![group(
            GroupStatus::Drive,
            &[(1.0, 1.0), (2.0, 2.0), (1.0, 1.0)],
        )]);
        assert_eq!(build_route_path(&h).len(), 3);
    }

    #[test]
    fn test_dedup_spans_group_boundaries() {
        let h = history(vec![
            group(GroupStatus::Drive, &[(1.0, 1.0), (2.0, 2.0)]),
            group(GroupStatus::Stop, &[(2.0, 2.0)]),
            group(GroupStatus::Drive, &[(2.0, 2.0), (3.0, 3.0)]),
        ]);
        assert_eq!(coords(&build_route_path(&h)), vec![(1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
    }

    #[test]
    fn test_non_finite_points_are_excluded() {
        let h = history(vec![group(
            GroupStatus::Drive,
            &[(f64::NAN, 1.0), (1.0, f64::INFINITY), (5.0, 5.0)],
        )]);
        assert_eq!(coords(&build_route_path(&h)), vec![(5.0, 5.0)]);
    }

    #[test]
    fn test_duplicate_after_dropped_point_compares_with_retained() {
        let h = history(vec![group(
            GroupStatus::Drive,
            &[(4.0, 4.0), (f64::NAN, f64::NAN), (4.0, 4.0)],
        )]);
        assert_eq!(build_route_path(&h).len(), 1);
    }

    #[test]
    fn test_empty_groups_are_skipped() {
        let h = history(vec![
            group(GroupStatus::Stop, &[]),
            group(GroupStatus::Drive, &[(1.0, 2.0)]),
            group(GroupStatus::End, &[]),
        ]);
        assert_eq!(coords(&build_route_path(&h)), vec![(1.0, 2.0)]);
    }

    #[test]
    fn test_empty_history_gives_empty_route() {
        assert!(build_route_path(&HistoryData::default()).is_empty());
    }

    #[test]
    fn test_zero_coordinates_follow_policy() {
        let h = history(vec![group(GroupStatus::Drive, &[(0.0, 0.0), (1.0, 1.0)])]);
        assert_eq!(build_route_path(&h).len(), 2);
        assert_eq!(build_route_path_with(&h, ZeroCoordinatePolicy::Reject).len(), 1);
    }

    #[test]
    fn test_string_coordinates_from_wire_are_normalized() {
        let json = r#"{"items":[{"status":1,"items":[
            {"lat":"10.0","lng":"20.0"},
            {"latitude":10.0,"longitude":20.0},
            {"lat":"bad","lng":"20.0"},
            {"lat":10.1,"lng":"20.0"}
        ]}]}"#;
        let h: HistoryData = serde_json::from_str(json).unwrap();
        assert_eq!(coords(&build_route_path(&h)), vec![(10.0, 20.0), (10.1, 20.0)]);
    }

    #[test]
    fn test_output_never_has_consecutive_duplicates() {
        // Deterministic pseudo-random walk with lots of repeats
        let mut seed: u64 = 0x2545F4914F6CDD1D;
        let mut pts = Vec::new();
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let lat = (seed % 4) as f64;
            let lng = ((seed >> 8) % 3) as f64;
            pts.push((lat, lng));
        }
        let route = build_route_path(&history(vec![group(GroupStatus::Drive, &pts)]));
        for w in route.points().windows(2) {
            assert!(
                w[0] != w[1],
                "consecutive duplicates at {:?}",
                w[0]
            );
        }
    }
}
