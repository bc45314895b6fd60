use serde::{ Deserialize, Serialize };
use serde_json::{ Map, Value as JsonValue };
use std::collections::{ BTreeMap, HashMap };
use std::fmt;
use std::fs;
use std::str::FromStr;
use std::sync::Arc;
use log::info;
use thiserror::Error;

use crate::models::media::MediaKind;

const BUILTIN_TOOLS: &str = include_str!("../../json/tools.json");

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool '{0}'")]
    UnknownTool(String),

    #[error("Tool '{0}' is not configured")]
    MissingTool(ToolKind),

    #[error("Tool '{tool}' is invalid: {reason}")]
    Invalid { tool: ToolKind, reason: String },

    #[error("Failed to read tools file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tools JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    XrayScanner,
    ReportAnalyzer,
    VideoTranscriber,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::XrayScanner,
        ToolKind::ReportAnalyzer,
        ToolKind::VideoTranscriber,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::XrayScanner => "xray-scanner",
            ToolKind::ReportAnalyzer => "report-analyzer",
            ToolKind::VideoTranscriber => "video-transcriber",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL.into_iter()
            .find(|k| k.as_str() == s.to_lowercase())
            .ok_or_else(|| ToolError::UnknownTool(s.to_string()))
    }
}

/// One labelled piece of a result, addressed by a JSON pointer into the result object.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SectionSpec {
    pub label: String,
    pub pointer: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FollowUpConfig {
    pub model: String,
    pub template: String,
}

impl FollowUpConfig {
    /// Fills `{field}` placeholders from the prior result and `{question}` from the user.
    /// Unknown placeholders are kept verbatim. Substituted text is never re-scanned.
    pub fn render(&self, fields: &Map<String, JsonValue>, question: &str) -> String {
        let template = self.template.as_str();
        let mut out = String::with_capacity(template.len() + question.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let Some(close) = after.find('}') else {
                out.push_str(&rest[open..]);
                return out;
            };
            let name = &after[..close];
            let is_identifier =
                !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

            match (is_identifier, name) {
                (true, "question") => out.push_str(question),
                (true, _) if fields.contains_key(name) => {
                    out.push_str(&display_value(&fields[name]));
                }
                _ => {
                    out.push('{');
                    rest = after;
                    continue;
                }
            }
            rest = &after[close + 1..];
        }
        out.push_str(rest);
        out
    }
}

pub fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    #[serde(skip_deserializing, default = "placeholder_kind")]
    pub kind: ToolKind,
    pub title: String,
    pub media_kind: MediaKind,
    pub model: String,
    pub instruction: String,
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub sections: Vec<SectionSpec>,
    #[serde(default)]
    pub follow_up: Option<FollowUpConfig>,
}

fn placeholder_kind() -> ToolKind {
    ToolKind::XrayScanner
}

impl ToolConfig {
    fn validate(&self) -> Result<(), ToolError> {
        let invalid = |reason: &str| ToolError::Invalid {
            tool: self.kind,
            reason: reason.to_string(),
        };
        if self.instruction.trim().is_empty() {
            return Err(invalid("instruction is empty"));
        }
        if self.model.trim().is_empty() {
            return Err(invalid("model is empty"));
        }
        if self.required_fields.is_empty() {
            return Err(invalid("requiredFields is empty"));
        }
        if let Some(section) = self.sections.iter().find(|s| !s.pointer.starts_with('/')) {
            return Err(invalid(&format!("section '{}' pointer must start with '/'", section.label)));
        }
        if let Some(follow_up) = &self.follow_up {
            if follow_up.template.trim().is_empty() || follow_up.model.trim().is_empty() {
                return Err(invalid("followUp needs both a model and a template"));
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ToolsFile {
    tools: BTreeMap<String, ToolConfig>,
}

fn parse_tools(json: &str) -> Result<HashMap<ToolKind, ToolConfig>, ToolError> {
    let file: ToolsFile = serde_json::from_str(json)?;
    let mut tools = HashMap::new();
    for (name, mut config) in file.tools {
        let kind = ToolKind::from_str(&name)?;
        config.kind = kind;
        tools.insert(kind, config);
    }
    Ok(tools)
}

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: HashMap<ToolKind, Arc<ToolConfig>>,
}

impl ToolRegistry {
    pub fn builtin() -> Result<Self, ToolError> {
        Self::from_parts(parse_tools(BUILTIN_TOOLS)?)
    }

    /// Built-in tools, with any tool defined in `json` replacing its built-in entry.
    pub fn with_overrides(json: &str) -> Result<Self, ToolError> {
        let mut tools = parse_tools(BUILTIN_TOOLS)?;
        for (kind, config) in parse_tools(json)? {
            info!("Tool '{}' overridden from tools file", kind);
            tools.insert(kind, config);
        }
        Self::from_parts(tools)
    }

    fn from_parts(tools: HashMap<ToolKind, ToolConfig>) -> Result<Self, ToolError> {
        for kind in ToolKind::ALL {
            tools.get(&kind).ok_or(ToolError::MissingTool(kind))?.validate()?;
        }
        Ok(Self {
            tools: tools
                .into_iter()
                .map(|(k, v)| (k, Arc::new(v)))
                .collect(),
        })
    }

    pub fn get(&self, kind: ToolKind) -> Result<Arc<ToolConfig>, ToolError> {
        self.tools.get(&kind).cloned().ok_or(ToolError::MissingTool(kind))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ToolConfig>> {
        ToolKind::ALL.iter().filter_map(|k| self.tools.get(k))
    }
}

pub fn load_tools(path: Option<&str>) -> Result<Arc<ToolRegistry>, ToolError> {
    let registry = match path.filter(|p| !p.trim().is_empty()) {
        Some(path) => {
            info!("Loading tool overrides from: {}", path);
            let json = fs::read_to_string(path).map_err(|source| ToolError::Io {
                path: path.to_string(),
                source,
            })?;
            ToolRegistry::with_overrides(&json)?
        }
        None => ToolRegistry::builtin()?,
    };
    Ok(Arc::new(registry))
}
