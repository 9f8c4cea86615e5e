//! The structured response contract with the model.
//!
//! Exactly one JSON object with all five fields present. Unknown fields are
//! ignored; a missing field is a parse error, never defaulted.

use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum ProtocolError {
    #[error("empty model output")]
    Empty,
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("patch for {path} is not a unified diff")]
    PatchFormat { path: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ResponsePatch {
    pub path: String,
    pub diff: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ResponseWrite {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StructuredResponse {
    pub read: Vec<String>,
    pub patches: Vec<ResponsePatch>,
    pub writes: Vec<ResponseWrite>,
    pub deletes: Vec<String>,
    pub message: String,
}

impl StructuredResponse {
    /// Requested read paths, trimmed, de-duplicated, empties dropped.
    pub fn read_paths(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for raw in &self.read {
            let p = raw.trim();
            if p.is_empty() {
                continue;
            }
            if !out.iter().any(|q| q == p) {
                out.push(p.to_string());
            }
        }
        out
    }

    pub fn has_changes(&self) -> bool {
        !self.patches.is_empty() || !self.writes.is_empty() || !self.deletes.is_empty()
    }

    /// Paths of patches that fail the structural well-formedness check: a
    /// diff without a single hunk header can never apply and warrants a
    /// reformulation request instead of an apply attempt.
    pub fn malformed_patch_paths(&self) -> Vec<String> {
        self.patches
            .iter()
            .filter(|p| !forebrain_diff::looks_like_unified_diff(&p.diff))
            .map(|p| p.path.clone())
            .collect()
    }
}

pub fn parse_response(raw: &str) -> Result<StructuredResponse, ProtocolError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Malformed(e.to_string()))
}
