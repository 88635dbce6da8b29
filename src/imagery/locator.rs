//! Imagery locator: the scene nearest in time to a report.
//!
//! Searches start with a narrow window around the report date and widen
//! (doubling) until a candidate turns up or the maximum window has been
//! searched. Among candidates the smallest time delta wins; exact ties go
//! to the lower cloud cover, then to archive order.

use std::cmp::Ordering;

use jiff::{SignedDuration, Span, Timestamp, civil::Date, tz::TimeZone};
use serde::Deserialize;

use crate::model::{BoundingBox, FiringPosition, ImageryMatch, Scene};

use super::{ArchiveError, ImageryArchive, Result, SceneQuery};

/// Search window and area policy.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LocatorPolicy {
    /// Half-width of the first search window, in days.
    pub initial_window_days: i32,

    /// Half-width of the widest window searched, in days.
    pub max_window_days: i32,

    /// Half-width of the search area around the report, in kilometres.
    pub buffer_km: f64,

    /// Scenes cloudier than this (percent) are not considered.
    pub max_cloud_cover: Option<f64>,
}

impl Default for LocatorPolicy {
    fn default() -> Self {
        Self {
            initial_window_days: 7,
            max_window_days: 30,
            buffer_km: 0.3,
            max_cloud_cover: Some(30.0),
        }
    }
}

impl LocatorPolicy {
    /// The window half-widths to try, narrowest first.
    ///
    /// Doubles from the initial window and always ends on the maximum.
    pub fn windows(&self) -> Vec<i32> {
        let max = self.max_window_days.max(0);
        let mut window = self.initial_window_days.clamp(0, max);
        let mut windows = vec![window];
        while window < max {
            window = window.saturating_mul(2).max(window + 1).min(max);
            windows.push(window);
        }
        windows
    }
}

/// Finds the best scene for a position.
pub struct Locator<'a> {
    archive: &'a dyn ImageryArchive,
    policy: LocatorPolicy,
}

impl<'a> Locator<'a> {
    pub fn new(archive: &'a dyn ImageryArchive, policy: LocatorPolicy) -> Self {
        Self { archive, policy }
    }

    /// The scene nearest in time to the report, if any lies within the
    /// maximum window.
    ///
    /// `Ok(None)` means the archive had nothing; errors mean it could
    /// not be asked.
    pub fn locate(&self, position: &FiringPosition) -> Result<Option<ImageryMatch>> {
        let area = BoundingBox::around(
            position.longitude,
            position.latitude,
            self.policy.buffer_km,
        );
        let anchor = report_anchor(position.date)?;

        for window_days in self.policy.windows() {
            let query = SceneQuery {
                area,
                from: shift(position.date, -window_days)?,
                to: shift(position.date, window_days)?,
                max_cloud_cover: self.policy.max_cloud_cover,
            };
            let candidates: Vec<Scene> = self
                .archive
                .search(&query)?
                .into_iter()
                .filter(|s| s.footprint.intersects(&area))
                .collect();

            tracing::debug!(
                position = %position.id,
                window_days,
                candidates = candidates.len(),
                "searched imagery catalog"
            );

            if let Some((scene, delta)) = pick_nearest(&candidates, anchor) {
                return Ok(Some(ImageryMatch {
                    scene: scene.clone(),
                    area,
                    delta,
                    window_days,
                }));
            }
        }

        Ok(None)
    }
}

/// The candidate nearest to `anchor`, with its absolute delta.
///
/// Exact ties prefer lower cloud cover (known beats unknown), then the
/// earliest candidate in `candidates`.
pub fn pick_nearest(candidates: &[Scene], anchor: Timestamp) -> Option<(&Scene, SignedDuration)> {
    candidates
        .iter()
        .map(|s| (s, s.acquired_at.duration_since(anchor).abs()))
        .min_by(|(a, da), (b, db)| {
            da.cmp(db)
                .then_with(|| cloud_order(a.cloud_cover, b.cloud_cover))
        })
}

fn cloud_order(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Reports carry only a date; deltas are measured from midday UTC.
fn report_anchor(date: Date) -> Result<Timestamp> {
    date.at(12, 0, 0, 0)
        .to_zoned(TimeZone::UTC)
        .map(|zoned| zoned.timestamp())
        .map_err(|e| ArchiveError::InvalidQuery(format!("report date {date}: {e}")))
}

fn shift(date: Date, days: i32) -> Result<Date> {
    Span::new()
        .try_days(days)
        .and_then(|span| date.checked_add(span))
        .map_err(|e| ArchiveError::InvalidQuery(format!("window around {date}: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use std::cell::RefCell;

    use jiff::civil::date;

    use crate::imagery::TileSize;
    use crate::model::PositionDetails;

    /// Archive holding a fixed scene list; answers searches by date range.
    pub struct FakeArchive {
        pub scenes: Vec<Scene>,
        pub queries: RefCell<Vec<SceneQuery>>,
    }

    impl FakeArchive {
        pub fn with(scenes: Vec<Scene>) -> Self {
            Self {
                scenes,
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl ImageryArchive for FakeArchive {
        fn search(&self, query: &SceneQuery) -> Result<Vec<Scene>> {
            self.queries.borrow_mut().push(query.clone());
            Ok(self
                .scenes
                .iter()
                .filter(|s| {
                    let day = s.acquired_at.to_zoned(TimeZone::UTC).date();
                    day >= query.from && day <= query.to
                })
                .cloned()
                .collect())
        }

        fn download(&self, _: &Scene, _: &BoundingBox, _: TileSize) -> Result<Vec<u8>> {
            Ok(vec![0x89, b'P', b'N', b'G'])
        }
    }

    pub fn sample_position(id: &str, d: Date) -> FiringPosition {
        FiringPosition {
            id: id.into(),
            date: d,
            category: Some("Military".into()),
            categories: vec!["Russian Firing Positions".into()],
            description: Some("Artillery position".into()),
            source: "CIR".into(),
            longitude: 37.8,
            latitude: 48.1,
            url: Some(format!("https://example.org/{id}")),
            details: PositionDetails::default(),
        }
    }

    /// A scene covering the sample position, acquired at `at`.
    pub fn sample_scene(id: &str, at: &str, cloud_cover: Option<f64>) -> Scene {
        Scene {
            id: id.into(),
            acquired_at: at.parse().unwrap(),
            footprint: BoundingBox::from_wsen(37.0, 47.5, 38.5, 48.5),
            cloud_cover,
        }
    }

    fn noon(d: Date) -> Timestamp {
        report_anchor(d).unwrap()
    }

    #[test]
    fn windows_double_and_end_at_max() {
        let policy = LocatorPolicy::default();
        assert_eq!(policy.windows(), vec![7, 14, 28, 30]);
    }

    #[test]
    fn windows_with_initial_above_max_collapse() {
        let policy = LocatorPolicy {
            initial_window_days: 40,
            max_window_days: 10,
            ..LocatorPolicy::default()
        };
        assert_eq!(policy.windows(), vec![10]);
    }

    #[test]
    fn windows_from_zero_still_progress() {
        let policy = LocatorPolicy {
            initial_window_days: 0,
            max_window_days: 3,
            ..LocatorPolicy::default()
        };
        assert_eq!(policy.windows(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn oversized_window_is_an_error_not_a_panic() {
        let err = shift(date(2023, 4, 12), 10_000_000).unwrap_err();
        assert!(matches!(err, ArchiveError::InvalidQuery(_)));
        assert_eq!(shift(date(2023, 4, 12), -30).unwrap(), date(2023, 3, 13));
    }

    #[test]
    fn nearest_candidate_wins() {
        let scenes = vec![
            sample_scene("far", "2023-04-02T08:30:00Z", Some(1.0)),
            sample_scene("near", "2023-04-11T08:30:00Z", Some(20.0)),
            sample_scene("after", "2023-04-14T08:30:00Z", Some(0.0)),
        ];

        let (scene, delta) = pick_nearest(&scenes, noon(date(2023, 4, 12))).unwrap();
        assert_eq!(scene.id, "near");
        assert_eq!(delta, SignedDuration::from_mins(27 * 60 + 30));
    }

    #[test]
    fn delta_is_absolute() {
        let scenes = vec![
            sample_scene("before", "2023-04-12T09:00:00Z", None),
            sample_scene("later", "2023-04-12T14:00:00Z", None),
        ];

        let (scene, delta) = pick_nearest(&scenes, noon(date(2023, 4, 12))).unwrap();
        assert_eq!(scene.id, "later");
        assert_eq!(delta, SignedDuration::from_hours(2));
    }

    #[test]
    fn exact_tie_prefers_lower_cloud_cover() {
        let scenes = vec![
            sample_scene("cloudy", "2023-04-12T08:30:00Z", Some(25.0)),
            sample_scene("clear", "2023-04-12T08:30:00Z", Some(3.0)),
            sample_scene("unknown", "2023-04-12T08:30:00Z", None),
        ];

        let (scene, _) = pick_nearest(&scenes, noon(date(2023, 4, 12))).unwrap();
        assert_eq!(scene.id, "clear");
    }

    #[test]
    fn full_tie_keeps_archive_order() {
        let scenes = vec![
            sample_scene("first", "2023-04-12T08:30:00Z", None),
            sample_scene("second", "2023-04-12T08:30:00Z", None),
        ];

        let (scene, _) = pick_nearest(&scenes, noon(date(2023, 4, 12))).unwrap();
        assert_eq!(scene.id, "first");
    }

    #[test]
    fn no_candidates_no_pick() {
        assert!(pick_nearest(&[], noon(date(2023, 4, 12))).is_none());
    }

    #[test]
    fn locate_stops_at_first_window_with_candidates() {
        let archive = FakeArchive::with(vec![sample_scene(
            "s1",
            "2023-04-20T08:30:00Z",
            Some(5.0),
        )]);
        let locator = Locator::new(&archive, LocatorPolicy::default());

        let found = locator
            .locate(&sample_position("p1", date(2023, 4, 1)))
            .unwrap()
            .unwrap();

        assert_eq!(found.scene.id, "s1");
        assert_eq!(found.window_days, 28);
        // 7 and 14 day windows came back empty first.
        let queries = archive.queries.borrow();
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].from, date(2023, 3, 25));
        assert_eq!(queries[0].to, date(2023, 4, 8));
    }

    #[test]
    fn locate_without_candidates_is_none_after_max_window() {
        let archive = FakeArchive::with(vec![sample_scene(
            "too-late",
            "2023-06-01T08:30:00Z",
            Some(5.0),
        )]);
        let locator = Locator::new(&archive, LocatorPolicy::default());

        let found = locator
            .locate(&sample_position("p1", date(2023, 4, 1)))
            .unwrap();

        assert!(found.is_none());
        assert_eq!(archive.queries.borrow().len(), 4);
    }

    #[test]
    fn locate_ignores_scenes_not_covering_the_point() {
        let mut elsewhere = sample_scene("elsewhere", "2023-04-01T08:30:00Z", Some(0.0));
        elsewhere.footprint = BoundingBox::from_wsen(10.0, 10.0, 11.0, 11.0);
        let archive = FakeArchive::with(vec![
            elsewhere,
            sample_scene("covering", "2023-04-03T08:30:00Z", Some(9.0)),
        ]);
        let locator = Locator::new(&archive, LocatorPolicy::default());

        let found = locator
            .locate(&sample_position("p1", date(2023, 4, 1)))
            .unwrap()
            .unwrap();

        assert_eq!(found.scene.id, "covering");
    }

    #[test]
    fn locate_passes_cloud_limit_and_area() {
        let archive = FakeArchive::with(vec![]);
        let policy = LocatorPolicy {
            max_cloud_cover: Some(12.5),
            ..LocatorPolicy::default()
        };
        Locator::new(&archive, policy)
            .locate(&sample_position("p1", date(2023, 4, 1)))
            .unwrap();

        let queries = archive.queries.borrow();
        assert_eq!(queries[0].max_cloud_cover, Some(12.5));
        let (lon, lat) = queries[0].area.center();
        assert!((lon - 37.8).abs() < 1e-9 && (lat - 48.1).abs() < 1e-9);
    }
}
