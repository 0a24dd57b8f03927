//! Response envelope assembly.
//!
//! Wraps processed rows and record counts into the grid's expected JSON
//! shape, merges caller-registered extra keys, and renders over HTTP
//! via axum.

use axum::Json;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

/// Instrumentation entry for one executed backend query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTrace {
    pub sql: String,
    pub bindings: Vec<String>,
    pub duration_ms: u64,
}

/// The JSON envelope returned to the grid.
#[derive(Debug, Clone)]
pub struct DataTableResponse {
    pub draw: u64,
    pub records_total: u64,
    pub records_filtered: u64,
    pub data: Vec<Value>,
    pub error: Option<String>,
    /// Extra top-level keys merged last; collisions overwrite reserved
    /// keys (last write wins).
    pub extra: Map<String, Value>,
    /// Extra headers applied when rendered over HTTP.
    pub headers: Vec<(String, String)>,
    /// Status used for error envelopes (deployment-configurable).
    pub error_status: u16,
}

impl DataTableResponse {
    /// Build the envelope as an ordered JSON object.
    pub fn to_value(&self) -> Value {
        let mut output = Map::new();
        output.insert("draw".to_string(), Value::from(self.draw));
        output.insert("recordsTotal".to_string(), Value::from(self.records_total));
        output.insert(
            "recordsFiltered".to_string(),
            Value::from(self.records_filtered),
        );
        output.insert("data".to_string(), Value::Array(self.data.clone()));
        if let Some(error) = &self.error {
            output.insert("error".to_string(), Value::String(error.clone()));
        }
        for (key, value) in &self.extra {
            output.insert(key.clone(), value.clone());
        }
        Value::Object(output)
    }

    fn status(&self) -> StatusCode {
        if self.error.is_some() {
            StatusCode::from_u16(self.error_status).unwrap_or(StatusCode::OK)
        } else {
            StatusCode::OK
        }
    }
}

impl Serialize for DataTableResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl IntoResponse for DataTableResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        let headers = self.headers.clone();
        let mut response = (status, Json(self.to_value())).into_response();

        for (name, value) in headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().insert(name, value);
                }
                _ => {
                    tracing::warn!(header = %name, "skipping invalid configured response header");
                }
            }
        }

        response
    }
}
