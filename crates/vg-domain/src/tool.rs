use serde::{Deserialize, Serialize};

/// Name of the mandatory tool the LLM must call to deliver a spoken answer.
pub const FINAL_ANSWER_TOOL: &str = "final_answer";

/// A tool call issued by the assistant, carrying its raw (unparsed) argument string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Serialized JSON object, exactly as the LLM emitted it.
    pub arguments: String,
}

impl ToolCall {
    /// Parse `arguments` as a JSON object. Malformed JSON is the caller's problem
    /// to report (`Error: Invalid JSON arguments for tool "<name>"`), not this one's.
    pub fn parsed_arguments(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.arguments)
    }
}

/// A tool schema exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// The mandatory `final_answer(answer: string)` schema every turn loop carries
    /// whenever any tool is available.
    pub fn final_answer() -> Self {
        Self {
            name: FINAL_ANSWER_TOOL.into(),
            description: "Deliver the final spoken answer to the user. Always call this \
                to end the turn, even if no other tools were used."
                .into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "answer": { "type": "string" }
                },
                "required": ["answer"]
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_arguments() {
        let call = ToolCall {
            id: "c1".into(),
            name: "get_weather".into(),
            arguments: r#"{"city":"NYC"}"#.into(),
        };
        let parsed = call.parsed_arguments().unwrap();
        assert_eq!(parsed["city"], "NYC");
    }

    #[test]
    fn rejects_malformed_arguments() {
        let call = ToolCall {
            id: "c1".into(),
            name: "get_weather".into(),
            arguments: "{not json".into(),
        };
        assert!(call.parsed_arguments().is_err());
    }

    #[test]
    fn final_answer_schema_requires_answer() {
        let def = ToolDefinition::final_answer();
        assert_eq!(def.name, FINAL_ANSWER_TOOL);
        assert_eq!(def.parameters["required"][0], "answer");
    }
}
