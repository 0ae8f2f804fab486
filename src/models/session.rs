use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type SessionId = i64;

/// Optional deliverables a caller can ask for on top of the summary.
/// Accepted on the wire either by name ("PDF", "PODCAST") or by the legacy
/// numeric codes (1 = PDF, 3 = PODCAST).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "OutputKindRepr")]
pub enum OutputKind {
    Pdf,
    Podcast,
}

impl OutputKind {
    pub fn code(self) -> i16 {
        match self {
            OutputKind::Pdf => 1,
            OutputKind::Podcast => 3,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(OutputKind::Pdf),
            3 => Some(OutputKind::Podcast),
            _ => None,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Pdf => f.write_str("PDF"),
            OutputKind::Podcast => f.write_str("PODCAST"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OutputKindRepr {
    Code(i64),
    Name(String),
}

impl TryFrom<OutputKindRepr> for OutputKind {
    type Error = String;

    fn try_from(repr: OutputKindRepr) -> Result<Self, Self::Error> {
        match repr {
            OutputKindRepr::Code(code) => {
                OutputKind::from_code(code).ok_or_else(|| format!("unknown output code: {}", code))
            }
            OutputKindRepr::Name(name) => match name.trim().to_ascii_uppercase().as_str() {
                "PDF" => Ok(OutputKind::Pdf),
                "PODCAST" => Ok(OutputKind::Podcast),
                other => Err(format!("unknown output kind: {}", other)),
            },
        }
    }
}

/// Unknown output codes or names are skipped, matching the upstream API,
/// which only acts on the kinds it knows.
fn deserialize_outputs<'de, D>(deserializer: D) -> Result<Vec<OutputKind>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<OutputKindRepr>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|repr| match OutputKind::try_from(repr) {
            Ok(kind) => Some(kind),
            Err(e) => {
                tracing::warn!("Ignoring requested output: {}", e);
                None
            }
        })
        .collect())
}

fn default_label() -> String {
    "Default session".to_string()
}

fn default_user() -> String {
    "System".to_string()
}

/// One pipeline input as submitted by callers. Field names on the wire keep
/// the upstream API's spelling; the short aliases are accepted too.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRequest {
    #[serde(rename = "IdPEspecifico", alias = "specific_id", default)]
    pub specific_id: i64,
    #[serde(rename = "IdPEspecificoSesion", alias = "specific_session_id", default)]
    pub specific_session_id: Option<i64>,
    #[serde(rename = "Sesion", alias = "label", default = "default_label")]
    pub label: String,
    #[serde(rename = "UrlVideo", alias = "url")]
    pub source_url: String,
    #[serde(rename = "Usuario", alias = "user", default = "default_user")]
    pub user: String,
    #[serde(
        rename = "TipoResumenGrabacionOnline",
        alias = "outputs",
        default,
        deserialize_with = "deserialize_outputs"
    )]
    pub outputs: Vec<OutputKind>,
}

impl PipelineRequest {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            specific_id: 0,
            specific_session_id: None,
            label: default_label(),
            source_url: source_url.into(),
            user: default_user(),
            outputs: Vec::new(),
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<OutputKind>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn wants(&self, kind: OutputKind) -> bool {
        self.outputs.contains(&kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub specific_id: i64,
    pub specific_session_id: Option<i64>,
    pub label: String,
    pub source_url: String,
    pub user: String,
    pub outputs: Vec<OutputKind>,
    pub created_at: DateTime<Utc>,
}

/// A published artifact URL registered against a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deliverable {
    pub session_id: SessionId,
    pub kind: OutputKind,
    pub url: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_accepts_upstream_field_names_and_codes() {
        let request: PipelineRequest = serde_json::from_value(json!({
            "IdPEspecifico": 42,
            "IdPEspecificoSesion": 7,
            "Sesion": "Week 3",
            "UrlVideo": "https://vimeo.com/123456",
            "Usuario": "jdoe",
            "TipoResumenGrabacionOnline": [1, 3]
        }))
        .unwrap();

        assert_eq!(request.specific_id, 42);
        assert_eq!(request.specific_session_id, Some(7));
        assert_eq!(request.outputs, vec![OutputKind::Pdf, OutputKind::Podcast]);
    }

    #[test]
    fn test_request_accepts_short_aliases_and_names() {
        let request: PipelineRequest = serde_json::from_value(json!({
            "url": "http://example/v.mp4",
            "outputs": ["pdf"]
        }))
        .unwrap();

        assert_eq!(request.source_url, "http://example/v.mp4");
        assert_eq!(request.user, "System");
        assert!(request.wants(OutputKind::Pdf));
        assert!(!request.wants(OutputKind::Podcast));
    }

    #[test]
    fn test_unknown_output_codes_are_skipped() {
        let request: PipelineRequest = serde_json::from_value(json!({
            "UrlVideo": "http://example/v.mp4",
            "TipoResumenGrabacionOnline": [1, 2, 3, "MINDMAP"]
        }))
        .unwrap();
        assert_eq!(request.outputs, vec![OutputKind::Pdf, OutputKind::Podcast]);

        // A bare value still has to be a known kind
        assert!(serde_json::from_value::<OutputKind>(json!(2)).is_err());
    }

    #[test]
    fn test_output_kind_serializes_by_name() {
        assert_eq!(serde_json::to_value(OutputKind::Podcast).unwrap(), json!("PODCAST"));
    }
}
