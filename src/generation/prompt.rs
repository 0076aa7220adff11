//! Prompt assembly and operator-prompt screening.

use crate::config::MAX_PROMPT_CHARS;
use crate::context::ContextBundle;
use crate::error::PipelineError;

/// Phrases that mark an attempt to steer the model away from its task.
const INJECTION_PHRASES: &[&str] = &[
    "ignore previous",
    "system:",
    "[inst]",
    "<|im_start|>",
    "jailbreak",
    "pretend you are",
    "roleplay as",
];

/// How each context category should be used, followed by the output format.
const CONTEXT_GUIDANCE: &str = "Bruk følgende kontekstdata for å lage nyheter:
- Bedrifter: Bruk bedriftsnavn og aktiviteter fra businesses
- Gater: Bruk gatenavn og beboere fra streets
- Innsjøer: Bruk stedsnavn fra lakes for naturrelaterte nyheter
- Områder: Bruk nærliggende områder fra surroundings
- Sport: Bruk {joke_name} ({real_name}) format fra sports
- Turister: Bruk {joke_name} ({real_name}) format fra tourist_spots
- Steder: Bruk {place} og {description} fra places
Svar kun med gyldig JSON array med objekter som har \"tid\", \"tekst\" og \"score\" felter.";

pub fn validate_operator_prompt(prompt: &str) -> Result<(), PipelineError> {
    if prompt.trim().is_empty() {
        return Err(PipelineError::PromptRejected("prompt is empty".to_string()));
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(PipelineError::PromptRejected(format!(
            "prompt is {} characters, limit is {}",
            chars, MAX_PROMPT_CHARS
        )));
    }
    let lower = prompt.to_lowercase();
    if let Some(phrase) = INJECTION_PHRASES.iter().find(|p| lower.contains(*p)) {
        return Err(PipelineError::PromptRejected(format!(
            "prompt contains '{}'",
            phrase
        )));
    }
    Ok(())
}

/// Operator prompt, usage guidance and the serialized context categories.
pub fn build_prompt(operator_prompt: &str, bundle: &ContextBundle) -> Result<String, PipelineError> {
    validate_operator_prompt(operator_prompt)?;
    let context = serde_json::to_string(&bundle.categories)
        .map_err(|e| PipelineError::Storage(e.into()))?;
    Ok(format!(
        "{}\n\n{}\n\nKontekstdata: {}",
        operator_prompt, CONTEXT_GUIDANCE, context
    ))
}
