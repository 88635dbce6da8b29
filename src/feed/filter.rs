//! Position filter: one year's firing positions out of the whole feed.

use crate::model::FiringPosition;

use super::{Feature, Feed};

/// Category label that marks a feature as a firing position.
///
/// Compared case-insensitively against every entry in `categories`.
pub const FIRING_POSITION_CATEGORY: &str = "russian firing positions";

/// Firing positions reported in `year`, in feed order.
///
/// Lazy and side-effect free. The returned iterator is `Clone`, and
/// calling this again yields the same sequence.
pub fn firing_positions(
    feed: &Feed,
    year: i16,
) -> impl Iterator<Item = FiringPosition> + Clone + '_ {
    feed.features
        .iter()
        .filter(move |f| is_firing_position(f) && f.date().is_some_and(|d| d.year() == year))
        .filter_map(Feature::to_position)
}

fn is_firing_position(feature: &Feature) -> bool {
    feature
        .categories()
        .iter()
        .any(|c| c.trim().eq_ignore_ascii_case(FIRING_POSITION_CATEGORY))
}
