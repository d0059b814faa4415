//! Dataset serving — turn tabular data into a served URL.
//!
//! [`DataServer`] sits on top of a [`Provider`]: it asks a [`Serializer`] for
//! the dataset's text and fingerprint, serves the text as a content resource
//! with `.json`/`.csv` extension and a permissive CORS header, and hands back
//! a [`DataUrl`]. Identical datasets map to the same URL for the life of the
//! server.
//!
//! ```rust,no_run
//! use rttp_provide::data::{DataServer, Format, JsonRecords};
//! use serde_json::json;
//!
//! let server = DataServer::new(JsonRecords);
//! let rows = json!([{"x": 1, "y": "A"}, {"x": 2, "y": "B"}]);
//! let served_url = server.serve_data(&rows, Format::Csv, None)?;
//! println!("{}", serde_json::to_string(&served_url)?); // {"url":"http://localhost:…/….csv"}
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::provider::{NewResource, Provider, ProviderError};
use crate::resource::{Resource, fingerprint};

#[derive(Debug, Error)]
pub enum DataError {
    #[error("unrecognized format: '{0}'")]
    UnrecognizedFormat(String),

    #[error("dataset cannot be written as {format}: {reason}")]
    Shape { format: Format, reason: String },

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Wire format of a served dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Csv,
}

impl Format {
    /// Extension appended to the dataset's route.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Format {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(DataError::UnrecognizedFormat(s.to_owned())),
        }
    }
}

/// Serialized dataset text and the fingerprint it is deduplicated by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serialized {
    pub content: String,
    pub fingerprint: String,
}

/// Turns a dataset into text. The server treats both outputs as opaque.
pub trait Serializer<D: ?Sized>: Send + Sync {
    fn serialize(&self, data: &D, format: Format) -> Result<Serialized, DataError>;
}

/// Serializer for JSON record lists: an array of flat objects, one per row.
///
/// CSV output takes its columns from the first record (in key order), writes
/// missing fields and `null` as empty cells, and quotes cells containing
/// commas, quotes, or line breaks.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRecords;

impl Serializer<Value> for JsonRecords {
    fn serialize(&self, data: &Value, format: Format) -> Result<Serialized, DataError> {
        let content = match format {
            Format::Json => serde_json::to_string(data)?,
            Format::Csv => records_to_csv(data)?,
        };
        let fingerprint = fingerprint(content.as_bytes());
        Ok(Serialized {
            content,
            fingerprint,
        })
    }
}

fn records_to_csv(data: &Value) -> Result<String, DataError> {
    let shape = |reason: &str| DataError::Shape {
        format: Format::Csv,
        reason: reason.to_owned(),
    };

    let rows = data.as_array().ok_or_else(|| shape("expected an array of records"))?;
    let columns: Vec<&String> = match rows.first() {
        Some(Value::Object(first)) => first.keys().collect(),
        Some(_) => return Err(shape("records must be objects")),
        None => Vec::new(),
    };

    let mut out = String::new();
    push_row(&mut out, columns.iter().map(|c| c.to_string()));
    for row in rows {
        let record = row.as_object().ok_or_else(|| shape("records must be objects"))?;
        push_row(
            &mut out,
            columns.iter().map(|c| match record.get(c.as_str()) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }),
        );
    }
    Ok(out)
}

fn push_row(out: &mut String, cells: impl Iterator<Item = String>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&cell);
        }
    }
    out.push('\n');
}

/// Where a served dataset can be fetched.
///
/// Serializes to `{"url": "..."}`. The port and route are kept alongside so a
/// proxy layer can rebuild the URL without parsing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataUrl {
    pub url: String,
    #[serde(skip)]
    pub port: u16,
    #[serde(skip)]
    pub route: String,
}

/// Serves datasets through a [`Provider`], one resource per distinct fingerprint.
///
/// Served resources are held strongly here, so their URLs stay valid until
/// [`reset`](Self::reset).
pub struct DataServer<S> {
    provider: Provider,
    serializer: S,
    served: Mutex<HashMap<String, Arc<Resource>>>,
}

impl<S> DataServer<S> {
    pub fn new(serializer: S) -> Self {
        Self::with_provider(Provider::new(), serializer)
    }

    pub fn with_provider(provider: Provider, serializer: S) -> Self {
        Self {
            provider,
            serializer,
            served: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Serves `data` in `format` and returns its URL.
    ///
    /// With `Some(port)`, the server is moved to that port first if it is
    /// bound elsewhere; URLs of earlier datasets follow it.
    ///
    /// # Errors
    ///
    /// - Any [`DataError`] the serializer reports.
    /// - [`DataError::Provider`] if the server cannot be started.
    pub fn serve_data<D>(&self, data: &D, format: Format, port: Option<u16>) -> Result<DataUrl, DataError>
    where
        D: ?Sized,
        S: Serializer<D>,
    {
        let Serialized {
            content,
            fingerprint,
        } = self.serializer.serialize(data, format)?;
        let port = self.provider.start(port)?;

        let mut served = self.served.lock();
        let resource = match served.get(&fingerprint) {
            Some(resource) => Arc::clone(resource),
            None => {
                let resource = self.provider.create(
                    NewResource::new()
                        .content(content)
                        .extension(format.extension())
                        .header("Access-Control-Allow-Origin", "*"),
                )?;
                debug!(%fingerprint, route = resource.route(), "dataset served");
                served.insert(fingerprint, Arc::clone(&resource));
                resource
            }
        };

        Ok(DataUrl {
            url: format!("http://localhost:{port}/{}", resource.route()),
            port,
            route: resource.route().to_owned(),
        })
    }

    /// Stops the server and forgets every served dataset.
    pub fn reset(&self) {
        self.served.lock().clear();
        self.provider.reset();
    }
}
