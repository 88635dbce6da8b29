//! Copernicus Data Space: Sentinel-2 catalog search and tile rendering.
//!
//! Authentication is an OAuth password grant against the public client.
//! The access token is cached and refreshed once when a request comes
//! back 401 or 403.

use std::cell::RefCell;

use jiff::{SignedDuration, Timestamp};
use reqwest::{
    StatusCode,
    blocking::{Client, RequestBuilder, Response},
    header::CONTENT_TYPE,
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::model::{BoundingBox, Scene};

use super::{ArchiveError, ImageryArchive, Result, SceneQuery, TileSize};

const TOKEN_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";
const CATALOG_URL: &str = "https://sh.dataspace.copernicus.eu/api/v1/catalog/1.0.0/search";
const PROCESS_URL: &str = "https://sh.dataspace.copernicus.eu/api/v1/process";
const CLIENT_ID: &str = "cdse-public";
const COLLECTION: &str = "sentinel-2-l2a";
const CRS84: &str = "http://www.opengis.net/def/crs/OGC/1.3/CRS84";

/// Catalog page size and the most pages read for one search.
const PAGE_LIMIT: usize = 100;
const MAX_PAGES: usize = 10;

/// Half-width of the render time range around a scene's acquisition.
const SCENE_SLACK: SignedDuration = SignedDuration::from_secs(60);

/// True-colour rendering with a flat gain, alpha from the data mask.
const TRUE_COLOR_EVALSCRIPT: &str = r#"//VERSION=3
function setup() {
  return {
    input: ["B04", "B03", "B02", "dataMask"],
    output: { bands: 4 }
  };
}

function evaluatePixel(s) {
  return [2.5 * s.B04, 2.5 * s.B03, 2.5 * s.B02, s.dataMask];
}"#;

/// Client for the Copernicus Data Space APIs.
pub struct Copernicus {
    client: Client,
    username: String,
    password: String,
    token: RefCell<Option<String>>,
}

impl Copernicus {
    pub fn new(client: Client, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client,
            username: username.into(),
            password: password.into(),
            token: RefCell::new(None),
        }
    }

    /// Send a request built with the current token, refreshing it once
    /// if the archive rejects it.
    fn send_authorized(&self, build: impl Fn(&str) -> RequestBuilder) -> Result<Response> {
        let cached = self.token.borrow().clone();
        send_with_token(
            cached,
            || self.refresh_token(),
            |token| Ok(build(token).send()?),
            Response::status,
        )
    }

    fn refresh_token(&self) -> Result<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
        }

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("client_id", CLIENT_ID),
            ])
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ArchiveError::Auth(format!("token endpoint answered {status}: {body}")));
        }

        let token = response.json::<TokenResponse>()?.access_token;
        *self.token.borrow_mut() = Some(token.clone());
        tracing::debug!("refreshed archive access token");
        Ok(token)
    }
}

impl ImageryArchive for Copernicus {
    fn search(&self, query: &SceneQuery) -> Result<Vec<Scene>> {
        let mut body = json!({
            "bbox": query.area.to_array(),
            "datetime": format!("{}T00:00:00Z/{}T23:59:59Z", query.from, query.to),
            "collections": [COLLECTION],
            "limit": PAGE_LIMIT,
        });
        if let Some(max) = query.max_cloud_cover {
            body["filter"] = json!(format!("eo:cloud_cover < {max}"));
            body["filter-lang"] = json!("cql2-text");
        }

        let mut scenes = Vec::new();
        for _ in 0..MAX_PAGES {
            let response = self.send_authorized(|token| {
                self.client.post(CATALOG_URL).bearer_auth(token).json(&body)
            })?;
            let page: StacPage = check(response)?.json()?;

            scenes.extend(page.features.into_iter().filter_map(StacItem::into_scene));

            match page.context.and_then(|c| c.next) {
                Some(next) => body["next"] = next,
                None => break,
            }
        }
        Ok(scenes)
    }

    fn download(&self, scene: &Scene, area: &BoundingBox, size: TileSize) -> Result<Vec<u8>> {
        let from = scene
            .acquired_at
            .checked_sub(SCENE_SLACK)
            .map_err(|e| ArchiveError::InvalidQuery(e.to_string()))?;
        let to = scene
            .acquired_at
            .checked_add(SCENE_SLACK)
            .map_err(|e| ArchiveError::InvalidQuery(e.to_string()))?;

        let body = process_request(area, from, to, size);
        let response = self.send_authorized(|token| {
            self.client
                .post(PROCESS_URL)
                .bearer_auth(token)
                .header("Accept", "image/png")
                .json(&body)
        })?;
        let response = check(response)?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("image/png") {
            let body = response.text().unwrap_or_default();
            return Err(ArchiveError::UnexpectedContent(format!(
                "expected image/png, got '{content_type}': {}",
                truncate(&body, 300)
            )));
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Send with `cached` (or a fresh token when there is none). A 401 or 403
/// gets exactly one new token and one resend; that answer is final.
fn send_with_token<T>(
    cached: Option<String>,
    mut refresh: impl FnMut() -> Result<String>,
    mut send: impl FnMut(&str) -> Result<T>,
    status: impl Fn(&T) -> StatusCode,
) -> Result<T> {
    let token = match cached {
        Some(token) => token,
        None => refresh()?,
    };

    let reply = send(&token)?;
    let code = status(&reply);
    if matches!(code, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        tracing::debug!(status = %code, "archive rejected token, refreshing");
        let token = refresh()?;
        return send(&token);
    }
    Ok(reply)
}

/// Process API request rendering `area` between `from` and `to`.
fn process_request(area: &BoundingBox, from: Timestamp, to: Timestamp, size: TileSize) -> Value {
    json!({
        "input": {
            "bounds": {
                "bbox": area.to_array(),
                "properties": { "crs": CRS84 },
            },
            "data": [{
                "type": COLLECTION,
                "dataFilter": {
                    "timeRange": { "from": from.to_string(), "to": to.to_string() },
                    "mosaickingOrder": "leastCC",
                },
                "processing": { "upsampling": "BICUBIC", "downsampling": "NEAREST" },
            }],
        },
        "output": {
            "width": size.width,
            "height": size.height,
            "responses": [{ "identifier": "default", "format": { "type": "image/png" } }],
        },
        "evalscript": TRUE_COLOR_EVALSCRIPT,
    })
}

/// Turn non-success responses into errors, keeping the body for context.
fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().unwrap_or_default();
    Err(ArchiveError::Status {
        status: status.as_u16(),
        message: truncate(&message, 300).to_string(),
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

// ── STAC response shapes ──

#[derive(Deserialize)]
struct StacPage {
    #[serde(default)]
    features: Vec<StacItem>,
    context: Option<StacContext>,
}

#[derive(Deserialize)]
struct StacContext {
    next: Option<Value>,
}

#[derive(Deserialize)]
struct StacItem {
    id: String,
    bbox: Option<Vec<f64>>,
    geometry: Option<Value>,
    properties: StacProperties,
}

#[derive(Deserialize)]
struct StacProperties {
    datetime: Timestamp,
    #[serde(rename = "eo:cloud_cover")]
    cloud_cover: Option<f64>,
}

impl StacItem {
    /// Items without a usable footprint are dropped.
    fn into_scene(self) -> Option<Scene> {
        let footprint = match self.bbox.as_deref() {
            Some(&[west, south, east, north]) => BoundingBox::from_wsen(west, south, east, north),
            _ => {
                let geometry = geojson::Geometry::try_from(self.geometry?).ok()?;
                BoundingBox::enclosing(&geo::Geometry::try_from(geometry).ok()?)?
            }
        };

        Some(Scene {
            id: self.id,
            acquired_at: self.properties.datetime,
            footprint,
            cloud_cover: self.properties.cloud_cover,
        })
    }
}
