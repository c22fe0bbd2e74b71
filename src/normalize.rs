//! Conversion of raw execution results into transport-safe records.
//!
//! Every slot of [`NormalizedResult`] is either plain text or plain JSON.
//! Slots that were absent on the raw result stay absent (and are skipped
//! when serialized) so consumers can tell "no value" from "empty value".

use crate::{engine::RawResult, errors::Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizedResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub png: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jpeg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub javascript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl NormalizedResult {
    /// Image payloads usable for multimodal analysis, as (mime type, payload)
    pub fn images(&self) -> Vec<(&'static str, &str)> {
        let mut images = Vec::new();
        if let Some(png) = &self.png {
            images.push(("image/png", png.as_str()));
        }
        if let Some(svg) = &self.svg {
            images.push(("image/svg+xml", svg.as_str()));
        }
        if let Some(jpeg) = &self.jpeg {
            images.push(("image/jpeg", jpeg.as_str()));
        }
        images
    }
}

/// Normalize one raw result.
///
/// Scalar slots are copied as-is. `chart` and `extra` are re-serialized into
/// plain JSON, which is also the only way this can fail.
pub fn normalize(raw: &RawResult) -> Result<NormalizedResult> {
    Ok(NormalizedResult {
        text: raw.text.clone(),
        html: raw.html.clone(),
        markdown: raw.markdown.clone(),
        svg: raw.svg.clone(),
        png: raw.png.clone(),
        jpeg: raw.jpeg.clone(),
        pdf: raw.pdf.clone(),
        latex: raw.latex.clone(),
        json: raw.json.clone(),
        javascript: raw.javascript.clone(),
        raw: raw.raw.clone(),
        data: raw.data.clone(),
        chart: raw.chart.as_ref().map(serde_json::to_value).transpose()?,
        extra: raw.extra.as_ref().map(serde_json::to_value).transpose()?,
    })
}

/// Normalize a sequence of results, preserving order
pub fn normalize_all(raw: &[RawResult]) -> Result<Vec<NormalizedResult>> {
    raw.iter().map(normalize).collect()
}
