//! Airtable as the record store.
//!
//! Rows go through the REST API; attachments go through the content API,
//! which accepts the file inline as base64.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::STANDARD};
use reqwest::{
    StatusCode, Url,
    blocking::{Client, RequestBuilder, Response},
    header::RETRY_AFTER,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use super::{Attachment, RecordStore, StoreError};

const API_URL: &str = "https://api.airtable.com/v0/";
const CONTENT_URL: &str = "https://content.airtable.com/v0/";

/// Airtable asks clients to back off this long after a 429.
const RATE_LIMIT_PAUSE: Duration = Duration::from_secs(30);

/// One table in one Airtable base.
pub struct Airtable {
    client: Client,
    api_key: String,
    base_id: String,
    table: String,
}

impl Airtable {
    pub fn new(
        client: Client,
        api_key: impl Into<String>,
        base_id: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            base_id: base_id.into(),
            table: table.into(),
        }
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = request.bearer_auth(&self.api_key).send()?;
        classify(response)
    }
}

impl RecordStore for Airtable {
    fn create(&self, fields: &Map<String, Value>) -> Result<String, StoreError> {
        #[derive(Deserialize)]
        struct Created {
            id: String,
        }

        let url = endpoint(API_URL, &[self.base_id.as_str(), self.table.as_str()])?;
        let body = json!({ "fields": fields, "typecast": true });
        let created: Created = self
            .send(self.client.post(url).json(&body))?
            .json()
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(created.id)
    }

    fn attach(
        &self,
        record_id: &str,
        field: &str,
        attachment: &Attachment,
    ) -> Result<(), StoreError> {
        let url = endpoint(
            CONTENT_URL,
            &[self.base_id.as_str(), record_id, field, "uploadAttachment"],
        )?;
        let body = json!({
            "contentType": attachment.content_type,
            "file": STANDARD.encode(&attachment.bytes),
            "filename": attachment.filename,
        });
        self.send(self.client.post(url).json(&body))?;
        Ok(())
    }

    fn delete(&self, record_id: &str) -> Result<(), StoreError> {
        let url = endpoint(API_URL, &[self.base_id.as_str(), self.table.as_str(), record_id])?;
        self.send(self.client.delete(url))?;
        Ok(())
    }
}

/// `base` with each segment appended, percent-encoded.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, StoreError> {
    let mut url = Url::parse(base).map_err(|e| StoreError::InvalidRequest(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| StoreError::InvalidRequest(format!("{base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Map HTTP failures onto retryable and permanent store errors.
fn classify(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(RATE_LIMIT_PAUSE, Duration::from_secs);
        return Err(StoreError::RateLimited {
            retry_after: Some(retry_after),
        });
    }

    let message = response.text().unwrap_or_default();
    if status.is_server_error() {
        Err(StoreError::Unavailable {
            status: status.as_u16(),
            message,
        })
    } else {
        Err(StoreError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
