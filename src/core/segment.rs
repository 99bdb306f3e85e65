use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::core::xpath;

#[derive(Debug, Error)]
pub enum SegmentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid segments document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Segments document must be a JSON array, found {found}")]
    NotAnArray { found: String },
}

/// One captured rectangular region of a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tag: String,
    pub xpath: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub html: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default)]
    pub index: i64,
    #[serde(default)]
    pub screenshot: String,
    /// Fields the capture step attached that this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_visible() -> bool {
    true
}

impl Segment {
    pub fn new(tag: impl Into<String>, xpath: impl Into<String>, index: i64) -> Self {
        Self {
            id: None,
            tag: tag.into(),
            xpath: xpath.into(),
            text: String::new(),
            html: String::new(),
            x: 0.0,
            y: 0.0,
            width: 0.0,
            height: 0.0,
            visible: true,
            index,
            screenshot: String::new(),
            extra: Map::new(),
        }
    }

    pub fn with_screenshot(mut self, screenshot: impl Into<String>) -> Self {
        self.screenshot = screenshot.into();
        self
    }

    pub fn with_box(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.x = x;
        self.y = y;
        self.width = width;
        self.height = height;
        self
    }

    pub fn bounding_box(&self) -> (f64, f64, f64, f64) {
        (self.x, self.y, self.width, self.height)
    }

    /// Number of structural steps in the segment's path.
    pub fn depth(&self) -> usize {
        xpath::path_depth(&self.xpath)
    }

    pub fn has_screenshot(&self) -> bool {
        !self.screenshot.is_empty()
    }
}

/// Read a `segments.json` document written by the capture step.
///
/// A document that is not a JSON array is rejected outright. Individual
/// records that cannot be read as a [`Segment`] are skipped with a warning.
pub fn load_segments(path: &Path) -> Result<Vec<Segment>, SegmentError> {
    let raw = fs::read_to_string(path)?;
    parse_segments(&raw)
}

pub fn parse_segments(raw: &str) -> Result<Vec<Segment>, SegmentError> {
    let document: Value = serde_json::from_str(raw)?;
    let records = match document {
        Value::Array(records) => records,
        other => {
            return Err(SegmentError::NotAnArray {
                found: json_kind(&other).to_string(),
            });
        }
    };

    let total = records.len();
    let mut segments = Vec::with_capacity(total);
    for (position, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<Segment>(record) {
            Ok(segment) => segments.push(segment),
            Err(e) => log::warn!("Skipping malformed segment record {}: {}", position, e),
        }
    }

    log::debug!("Loaded {} of {} segment records", segments.len(), total);
    Ok(segments)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
