// Prompt input/output shaping
//
// Workers hand the capability a single request string and get text back.
// This module decides what that string is for a given task, and turns the
// reply into structured data when it carries JSON.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::messages::TaskPayload;

/// Prompt template structure
pub struct PromptTemplate {
    pub name: String,
    pub version: String,
    pub user_template: String,
}

impl PromptTemplate {
    /// Render the user template, replacing every `{{key}}` with its value.
    /// Placeholders without a value are left as they are.
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        let mut rendered = self.user_template.clone();
        for (key, value) in variables {
            rendered = rendered.replace(&format!("{{{{{key}}}}}"), value);
        }
        rendered
    }
}

pub mod library {
    use super::PromptTemplate;

    /// Fallback request for tasks that carry neither a description nor the
    /// user's own words
    pub fn delegated_task() -> PromptTemplate {
        PromptTemplate {
            name: "delegated_task".to_string(),
            version: "1.0.0".to_string(),
            user_template: "Task: {{task_name}}\n\n\
                            Parameters:\n\
                            {{parameters}}"
                .to_string(),
        }
    }
}

/// Request text handed to the capability for `task`.
///
/// Uses `task_description` when present, then `user_request`, and
/// otherwise renders [`library::delegated_task`].
pub fn task_input(task: &TaskPayload) -> String {
    if let Some(description) = task.parameter_str("task_description") {
        return description.to_string();
    }
    if let Some(request) = task.parameter_str("user_request") {
        return request.to_string();
    }

    let parameters = serde_json::to_string_pretty(&Value::Object(task.parameters.clone()))
        .unwrap_or_else(|_| "{}".to_string());
    let mut variables = HashMap::new();
    variables.insert("task_name".to_string(), task.task_name.clone());
    variables.insert("parameters".to_string(), parameters);
    library::delegated_task().render(&variables)
}

/// Decode a capability reply.
///
/// A fenced ```` ```json ```` block or a bare JSON object/array becomes
/// structured data; any other reply is kept as a string.
pub fn decode_response(response: &str) -> Value {
    let trimmed = response.trim();
    let candidate = strip_fence(trimmed).unwrap_or(trimmed);

    if candidate.starts_with('{') || candidate.starts_with('[') {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return value;
        }
    }
    Value::String(trimmed.to_string())
}

fn strip_fence(text: &str) -> Option<&str> {
    let body = text.strip_prefix("```")?.strip_suffix("```")?;
    let body = body.strip_prefix("json").unwrap_or(body);
    Some(body.trim())
}

/// Data of a RESULT answering `task`: the decoded response plus the plan
/// identity copied from the task, so downstream consumers can route it
pub fn result_data(task: &TaskPayload, response: &str) -> Value {
    let mut data = Map::new();
    data.insert("response".to_string(), decode_response(response));
    for key in ["user_id", "plan_id", "itinerary_id"] {
        if let Some(value) = task.parameters.get(key) {
            data.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(data)
}
