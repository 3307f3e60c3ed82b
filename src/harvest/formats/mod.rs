//! Response shapes.
//!
//! A [`ResponseShape`] turns a decoded JSON payload into a
//! [`PageResult`] of raw JSON items. Paginated APIs disagree on where they
//! put their items and page count, so the location of both is configurable.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::model::PageResult;
use crate::traits::FetchError;

/// Custom payload extractor.
pub type ExtractFn = Arc<dyn Fn(Value) -> Result<PageResult<Value>, FetchError> + Send + Sync>;

/// Where a payload keeps its items and its total page count.
///
/// Field locations are either a top-level key (`"items"`) or a JSON pointer
/// (`"/data/results"`).
#[derive(Clone)]
pub enum ResponseShape {
    Fields {
        items: String,
        total_pages: Option<String>,
    },
    Custom(ExtractFn),
}

impl Default for ResponseShape {
    /// `{"items": [...], "totalPages": n}`
    fn default() -> Self {
        Self::Fields {
            items: "items".to_string(),
            total_pages: Some("totalPages".to_string()),
        }
    }
}

impl fmt::Debug for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fields { items, total_pages } => f
                .debug_struct("Fields")
                .field("items", items)
                .field("total_pages", total_pages)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl ResponseShape {
    pub fn fields(items: impl Into<String>, total_pages: Option<&str>) -> Self {
        Self::Fields {
            items: items.into(),
            total_pages: total_pages.map(str::to_string),
        }
    }

    pub fn custom<F>(extract: F) -> Self
    where
        F: Fn(Value) -> Result<PageResult<Value>, FetchError> + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(extract))
    }

    /// Extracts a page from `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Malformed`] if the items field is missing or is
    /// not an array. A missing or unusable page count is not an error; it
    /// yields `total_pages: None`.
    pub fn extract(&self, mut payload: Value) -> Result<PageResult<Value>, FetchError> {
        match self {
            Self::Custom(extract) => extract(payload),
            Self::Fields { items, total_pages } => {
                let total_pages = total_pages
                    .as_deref()
                    .and_then(|location| lookup(&payload, location))
                    .and_then(page_count);

                let items = match lookup_mut(&mut payload, items).map(Value::take) {
                    Some(Value::Array(values)) => values,
                    Some(other) => {
                        return Err(FetchError::Malformed(format!(
                            "field '{}' is {}, expected an array",
                            items,
                            kind(&other)
                        )))
                    }
                    None => {
                        return Err(FetchError::Malformed(format!(
                            "field '{}' is missing",
                            items
                        )))
                    }
                };

                Ok(PageResult { items, total_pages })
            }
        }
    }
}

fn lookup<'a>(payload: &'a Value, location: &str) -> Option<&'a Value> {
    if location.starts_with('/') {
        payload.pointer(location)
    } else {
        payload.get(location)
    }
}

fn lookup_mut<'a>(payload: &'a mut Value, location: &str) -> Option<&'a mut Value> {
    if location.starts_with('/') {
        payload.pointer_mut(location)
    } else {
        payload.get_mut(location)
    }
}

/// Positive page count from a number or numeric string.
fn page_count(value: &Value) -> Option<u32> {
    let count = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    u32::try_from(count).ok().filter(|count| *count > 0)
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
