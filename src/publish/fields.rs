//! Field mapping from harvest records to store rows.

use serde_json::{Map, Value};

use crate::model::HarvestRecord;

/// Attachment field holding the imagery tiles.
pub const ATTACHMENT_FIELD: &str = "Satellite Imagery";

/// Review status given to records the feed carries no status for.
pub const DEFAULT_STATUS: &str = "Pending Review";

/// The row to create for `record`, minus attachments.
///
/// Optional feed fields are left out entirely when absent.
pub fn record_fields(record: &HarvestRecord) -> Map<String, Value> {
    let position = &record.position;
    let details = &position.details;
    let mut fields = Map::new();

    let mut set = |name: &str, value: Option<String>| {
        if let Some(value) = value {
            fields.insert(name.to_string(), Value::String(value));
        }
    };

    set("Date", Some(position.date.to_string()));
    set("ID", Some(position.id.clone()));
    set("Type", position.category.clone());
    set("Description", position.description.clone());
    set("Source", Some(position.source.clone()));
    set("Longitude", Some(position.longitude.to_string()));
    set("Latitude", Some(position.latitude.to_string()));
    set("Original URL", position.url.clone());
    set("Geolocation URL", details.geolocation_url.clone());
    set(
        "Status",
        Some(
            details
                .status
                .clone()
                .unwrap_or_else(|| DEFAULT_STATUS.to_string()),
        ),
    );
    set("Country", details.country.clone());
    set("Province", details.province.clone());
    set("City", details.city.clone());
    set(
        "Categories",
        (!position.categories.is_empty()).then(|| position.categories.join(", ")),
    );
    set("Violence Level", details.violence_level.clone());
    set(
        "Civilian Casualties",
        details
            .civilian_casualties
            .map(|c| if c { "Yes" } else { "No" }.to_string()),
    );
    set("Sentinel Data", Some(imagery_summary(record)));

    fields
}

/// Human-readable summary of the matched imagery.
pub fn imagery_summary(record: &HarvestRecord) -> String {
    let imagery = &record.imagery;
    let scene = &imagery.scene;

    let cloud = scene
        .cloud_cover
        .map_or_else(|| "unknown".to_string(), |c| format!("{c:.1}%"));
    #[allow(clippy::cast_precision_loss)]
    let hours = imagery.delta.as_secs() as f64 / 3600.0;

    let mut lines = vec![
        format!("Scene: {}", scene.id),
        format!("Acquired: {}", scene.acquired_at),
        format!("Cloud Coverage: {cloud}"),
        format!("Time From Report: {hours:.1} h"),
        format!("Search Window: ±{} days", imagery.window_days),
    ];
    for (i, tile) in record.tiles.iter().enumerate() {
        let name = tile
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        lines.push(format!("Tile {}: {name}", i + 1));
    }
    lines.join("\n")
}
