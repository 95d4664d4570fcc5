//! Prompt assembly for the inference call.
//!
//! A prompt is the product's instruction, then its worked examples wrapped in
//! `<examples>` tags, then the serialized forecast labelled `input:`. Assembly
//! is a pure function of its arguments so identical forecasts yield identical
//! prompts.

use serde::{Deserialize, Serialize};

use crate::model::Icon;

/// Placeholder in a system prompt that expands to the icon vocabulary.
pub const ICONS_PLACEHOLDER: &str = "{icons}";

/// One worked input/output pair shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    pub input: String,
    pub output: String,
}

/// Instruction, examples and optional system context for one product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub instruction: String,
    #[serde(default)]
    pub examples: Vec<Example>,
}

/// The two strings sent to the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: Option<String>,
    pub user: String,
}

impl PromptTemplate {
    pub fn render(&self, payload: &str) -> RenderedPrompt {
        RenderedPrompt {
            system: self
                .system
                .as_deref()
                .map(|s| s.replace(ICONS_PLACEHOLDER, &icon_list())),
            user: build_prompt(&self.instruction, &self.examples, payload),
        }
    }

    pub fn default_summary() -> Self {
        Self {
            system: Some(SUMMARY_SYSTEM.to_string()),
            instruction: SUMMARY_INSTRUCTION.to_string(),
            examples: vec![Example {
                input: EXAMPLE_PERIODS.to_string(),
                output: SUMMARY_EXAMPLE_OUTPUT.to_string(),
            }],
        }
    }

    pub fn default_breakdown() -> Self {
        Self {
            system: Some(BREAKDOWN_SYSTEM.to_string()),
            instruction: BREAKDOWN_INSTRUCTION.to_string(),
            examples: vec![Example {
                input: EXAMPLE_PERIODS.to_string(),
                output: BREAKDOWN_EXAMPLE_OUTPUT.to_string(),
            }],
        }
    }
}

pub fn build_prompt(instruction: &str, examples: &[Example], payload: &str) -> String {
    format!(
        "{instruction}\n\n{}\n\ninput: {payload}",
        wrap_examples(examples)
    )
}

fn wrap_examples(examples: &[Example]) -> String {
    let mut out = String::from("<examples>");
    for example in examples {
        out.push_str("<example>input: ");
        out.push_str(&example.input);
        out.push_str("\noutput: ");
        out.push_str(&example.output);
        out.push_str("</example>");
    }
    out.push_str("</examples>");
    out
}

fn icon_list() -> String {
    Icon::all()
        .iter()
        .map(Icon::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}

const SUMMARY_SYSTEM: &str = concat!(
    "You are a tool that can provide concise summaries of weather forecasts.\n",
    r#"You have access to the following list of icons:
"""
{icons}
""""#,
);

const SUMMARY_INSTRUCTION: &str = concat!(
    "Input is a JSON array with one entry per forecast period.", "\n",
    r#"Output is a JSON object with the key "summary" containing the overall forecast in "#,
    r#"at most four sentences and "icon" containing the icon that best fits the soonest "#,
    "weather for this summary.", "\n",
    "Each entry contains relevant weather information including a detailed text forecast.", "\n",
    "Do not include any information that is not present in the input.", "\n",
    "Do not comment twice on the same weather condition.", "\n",
    "Focus mainly on the daytime periods.", "\n",
    "Avoid editorializing or making assumptions.", "\n",
    r#"Avoid referring to "periods" in the output."#, "\n",
    "Make the output sound like a human wrote it, with concise but friendly language and ",
    "complete sentences.", "\n",
    "Only include the JSON, do not include outside text.",
);

const BREAKDOWN_SYSTEM: &str = concat!(
    "You are a tool that can provide concise weather forecast breakdowns.\n",
    r#"You have access to the following list of icons:
"""
{icons}
""""#,
);

const BREAKDOWN_INSTRUCTION: &str = concat!(
    "Input is a JSON array with one entry per forecast period.", "\n",
    "Output is a JSON array with one object per forecast period and the following ",
    "key-value pairs:", "\n",
    r#""name": the "name" field on the given forecast period,"#, "\n",
    r#""time_of_day": either day or night based upon the given forecast period,"#, "\n",
    r#""icon": the icon that best fits the "detailed_forecast" for this forecast period,"#, "\n",
    r#""beaufort": the Beaufort scale name (Calm, Light air, Light breeze, Gentle breeze, "#,
    "Moderate breeze, Fresh breeze, Strong breeze, Near gale, Gale, Strong gale, Storm, ",
    r#"Violent storm, Hurricane force) that best fits the "wind_speed" for this period."#, "\n",
    "Do not include any information that is not present in the input.", "\n",
    "Only include the JSON, do not include outside text.", "\n",
    "Remove all whitespace from the output.",
);

const EXAMPLE_PERIODS: &str = concat!(
    r#"[{"name":"Tonight","start_time":"2024-06-08T20:00:00-07:00","#,
    r#""end_time":"2024-06-09T06:00:00-07:00","temperature":54,"wind_speed":"2 mph","#,
    r#""wind_direction":"E","short_forecast":"Mostly Cloudy","detailed_forecast":"Mostly "#,
    r#"cloudy, with a low around 54. East wind around 2 mph.","is_daytime":false},"#,
    r#"{"name":"Sunday","start_time":"2024-06-09T06:00:00-07:00","#,
    r#""end_time":"2024-06-09T18:00:00-07:00","temperature":74,"wind_speed":"1 to 6 mph","#,
    r#""wind_direction":"SW","short_forecast":"Mostly Sunny","detailed_forecast":"Mostly "#,
    "sunny. High near 74, with temperatures falling to around 72 in the afternoon. ",
    r#"Southwest wind 1 to 6 mph.","is_daytime":true},{"name":"Sunday Night","#,
    r#""start_time":"2024-06-09T18:00:00-07:00","end_time":"2024-06-10T06:00:00-07:00","#,
    r#""temperature":51,"wind_speed":"2 to 6 mph","wind_direction":"W","#,
    r#""short_forecast":"Mostly Cloudy","detailed_forecast":"Mostly cloudy, with a low "#,
    r#"around 51. West wind 2 to 6 mph.","is_daytime":false}]"#,
);

const SUMMARY_EXAMPLE_OUTPUT: &str = concat!(
    r#"{"summary":"Tonight, mostly cloudy with a low around 54. Sunday, mostly sunny with "#,
    "a high near 74, temperatures falling to around 72 in the afternoon. Sunday night, ",
    r#"mostly cloudy with a low around 51. Winds light and variable.","icon":"cloud-moon"}"#,
);

const BREAKDOWN_EXAMPLE_OUTPUT: &str = concat!(
    r#"[{"name":"Tonight","time_of_day":"night","icon":"cloud-moon","beaufort":"Light "#,
    r#"air"},{"name":"Sunday","time_of_day":"day","icon":"cloud-sun","beaufort":"Light "#,
    r#"breeze"},{"name":"Sunday Night","time_of_day":"night","icon":"cloud-moon","#,
    r#""beaufort":"Light breeze"}]"#,
);
