use serde::{ Deserialize, Serialize };
use serde_json::{ Map, Value as JsonValue };
use uuid::Uuid;

use crate::config::tools::{ display_value, SectionSpec, ToolKind };

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    Idle,
    Verifying,
    Success,
    Failure,
}

/// The validated JSON object returned for one submission. `fields` is the parsed
/// response as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub id: Uuid,
    pub tool: ToolKind,
    pub fields: Map<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedSection {
    pub label: String,
    pub text: String,
}

impl AnalysisResult {
    pub fn new(tool: ToolKind, fields: Map<String, JsonValue>) -> Self {
        Self { id: Uuid::new_v4(), tool, fields }
    }

    pub fn sections(&self, specs: &[SectionSpec]) -> Vec<RenderedSection> {
        let root = JsonValue::Object(self.fields.clone());
        specs
            .iter()
            .filter_map(|spec| {
                root.pointer(&spec.pointer).map(|value| RenderedSection {
                    label: spec.label.clone(),
                    text: display_value(value),
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryExchange {
    pub question: String,
    pub answer: String,
}

/// Question/answer log tied to one analysis. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpExchange {
    pub analysis_id: Uuid,
    entries: Vec<QueryExchange>,
}

impl FollowUpExchange {
    pub fn new(analysis_id: Uuid) -> Self {
        Self { analysis_id, entries: Vec::new() }
    }

    pub fn push(&mut self, question: String, answer: String) {
        self.entries.push(QueryExchange { question, answer });
    }

    pub fn entries(&self) -> &[QueryExchange] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn sections_follow_pointers_and_skip_absent_ones() {
        let result = AnalysisResult::new(
            ToolKind::ReportAnalyzer,
            fields(
                json!({
                "extractedText": "Amoxicillin 500mg",
                "summary": { "diagnosis": "Sinusitis", "medications": [] }
            })
            )
        );
        let specs = vec![
            SectionSpec { label: "Extracted text".into(), pointer: "/extractedText".into() },
            SectionSpec { label: "Explanation".into(), pointer: "/explanation".into() },
            SectionSpec { label: "Diagnosis".into(), pointer: "/summary/diagnosis".into() },
            SectionSpec { label: "Medications".into(), pointer: "/summary/medications".into() }
        ];

        let sections = result.sections(&specs);
        assert_eq!(
            sections,
            vec![
                RenderedSection { label: "Extracted text".into(), text: "Amoxicillin 500mg".into() },
                RenderedSection { label: "Diagnosis".into(), text: "Sinusitis".into() },
                RenderedSection { label: "Medications".into(), text: "[]".into() }
            ]
        );
    }

    #[test]
    fn exchange_keeps_insertion_order() {
        let mut exchange = FollowUpExchange::new(Uuid::new_v4());
        exchange.push("first?".into(), "one".into());
        exchange.push("second?".into(), "two".into());
        assert_eq!(exchange.len(), 2);
        assert_eq!(exchange.entries()[0].question, "first?");
        assert_eq!(exchange.entries()[1].answer, "two");
    }

    #[test]
    fn status_serializes_as_lowercase_labels() {
        assert_eq!(serde_json::to_string(&AnalysisStatus::Verifying).unwrap(), "\"verifying\"");
        assert_eq!(AnalysisStatus::default(), AnalysisStatus::Idle);
    }
}
