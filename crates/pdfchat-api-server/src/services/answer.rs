use serde::Deserialize;
use serde_json::Value;

/// The generator is asked to answer either as plain text, as a JSON object
/// with an `answer` string, or as a structured step list. Whatever comes
/// back is classified into one of these variants and rendered
/// deterministically; generation never influences the rendering rules.
#[derive(Debug, Clone, PartialEq)]
pub enum Answer {
    PlainText(String),
    StepList {
        steps: Vec<Step>,
        note: Option<String>,
    },
    Opaque(Value),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Step {
    #[serde(rename = "step")]
    pub title: Option<String>,
    pub description: Option<String>,
    pub code: Option<String>,
}

impl Answer {
    /// Classify the accumulated raw text. Anything that is not valid JSON is
    /// plain text; valid JSON falls through answer → steps → note → opaque.
    pub fn parse(raw: &str) -> Answer {
        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return Answer::PlainText(raw.to_string());
        };

        match &value {
            Value::String(s) => Answer::PlainText(s.clone()),
            Value::Object(obj) => {
                if let Some(answer) = obj.get("answer").and_then(Value::as_str) {
                    return Answer::PlainText(answer.to_string());
                }

                if let Some(steps) = obj.get("steps").and_then(Value::as_array) {
                    let steps = steps
                        .iter()
                        .map(|s| {
                            serde_json::from_value::<Step>(s.clone()).unwrap_or(Step {
                                title: None,
                                description: None,
                                code: None,
                            })
                        })
                        .collect();
                    let note = obj
                        .get("note")
                        .and_then(Value::as_str)
                        .map(|n| n.to_string());
                    return Answer::StepList { steps, note };
                }

                if let Some(note) = obj.get("note").and_then(Value::as_str) {
                    return Answer::PlainText(note.to_string());
                }

                Answer::Opaque(value)
            }
            _ => Answer::Opaque(value),
        }
    }

    /// Render the variant to display text. Steps become numbered sections
    /// with optional code fences and a trailing note.
    pub fn render(&self) -> String {
        match self {
            Answer::PlainText(text) => text.clone(),
            Answer::StepList { steps, note } => {
                let md_steps: Vec<String> = steps
                    .iter()
                    .enumerate()
                    .map(|(i, step)| {
                        let title = step
                            .title
                            .clone()
                            .unwrap_or_else(|| format!("Step {}", i + 1));
                        let description = match &step.description {
                            Some(d) => format!("\n\n{}\n\n", d),
                            None => "\n\n".to_string(),
                        };
                        let code = match &step.code {
                            Some(c) => format!("```javascript\n{}\n```\n\n", c),
                            None => String::new(),
                        };
                        format!("### {}. {}\n\n{}{}", i + 1, title, description, code)
                    })
                    .collect();

                let note_block = note
                    .as_ref()
                    .map(|n| format!("---\n\n{}\n", n))
                    .unwrap_or_default();

                format!("{}\n{}", md_steps.join("\n"), note_block)
                    .trim()
                    .to_string()
            }
            Answer::Opaque(value) => {
                let pretty = serde_json::to_string_pretty(value)
                    .unwrap_or_else(|_| value.to_string());
                format!("```\n{}\n```", pretty)
            }
        }
    }
}
