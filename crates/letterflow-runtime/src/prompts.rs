//! Prompt assembly for letter generation.
//!
//! The system prompt is fixed per deployment (overridable in config). The
//! user prompt is built from the caller's [`GenerationParams`] and nothing
//! else, so two generations with the same inputs send the same request.

use letterflow_core::GenerationParams;
use std::fmt::Write as _;

use crate::providers::{CompletionConfig, GenerationRequest};

/// Default system prompt for the letter writer.
pub const SYSTEM_PROMPT: &str = r#"
You are a professional correspondence writer.

Write a complete, ready-to-send letter from the facts you are given.

## Rules
1. Use only the facts provided; do not invent names, dates, amounts or events
2. Address the recipient by name and sign off as the sender
3. Keep the tone requested, or a courteous formal tone if none is given
4. Output the letter text only, with no commentary before or after it

## Structure
- Salutation
- Opening paragraph stating the purpose
- Body paragraphs covering every supplied detail
- Closing paragraph with any requested action
- Sign-off with the sender's name
"#;

const DEFAULT_TONE: &str = "formal";

/// User prompt for one letter.
pub fn user_prompt(params: &GenerationParams) -> String {
    let tone = params
        .tone
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TONE);

    let mut prompt = String::with_capacity(params.details.len() + 256);
    let _ = writeln!(prompt, "Write a {} letter.", params.letter_type.trim());
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "From: {}", params.sender_name.trim());
    let _ = writeln!(prompt, "To: {}", params.recipient_name.trim());
    let _ = writeln!(prompt, "Subject: {}", params.subject.trim());
    let _ = writeln!(prompt, "Tone: {}", tone);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Details:");
    prompt.push_str(params.details.trim());
    prompt
}

/// Full request for `params` under `config`.
pub fn build_request(params: &GenerationParams, config: &CompletionConfig) -> GenerationRequest {
    let system = config
        .system_prompt
        .clone()
        .unwrap_or_else(|| SYSTEM_PROMPT.trim().to_string());

    GenerationRequest {
        prompt: user_prompt(params),
        system: Some(system),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        model: config.model.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GenerationParams {
        GenerationParams {
            letter_type: "complaint".to_string(),
            sender_name: "Dana Whitfield".to_string(),
            recipient_name: "Harbor Property Management".to_string(),
            subject: "Unresolved heating repair".to_string(),
            details: "Heating broken since 3 November. Reported twice by phone.".to_string(),
            tone: None,
        }
    }

    #[test]
    fn test_user_prompt_carries_every_field() {
        let prompt = user_prompt(&params());
        assert!(prompt.starts_with("Write a complaint letter."));
        assert!(prompt.contains("From: Dana Whitfield"));
        assert!(prompt.contains("To: Harbor Property Management"));
        assert!(prompt.contains("Subject: Unresolved heating repair"));
        assert!(prompt.contains("Tone: formal"));
        assert!(prompt.ends_with("Reported twice by phone."));
    }

    #[test]
    fn test_blank_tone_falls_back() {
        let mut p = params();
        p.tone = Some("  ".to_string());
        assert!(user_prompt(&p).contains("Tone: formal"));

        p.tone = Some("firm".to_string());
        assert!(user_prompt(&p).contains("Tone: firm"));
    }

    #[test]
    fn test_build_request_uses_config() {
        let config = CompletionConfig {
            model: "claude-haiku-4-5".to_string(),
            max_tokens: 900,
            temperature: 0.2,
            ..Default::default()
        };

        let request = build_request(&params(), &config);
        assert_eq!(request.model, "claude-haiku-4-5");
        assert_eq!(request.max_tokens, 900);
        assert_eq!(request.temperature, 0.2);
        assert!(request
            .system
            .as_deref()
            .is_some_and(|s| s.starts_with("You are a professional correspondence writer.")));
    }

    #[test]
    fn test_system_prompt_override() {
        let config = CompletionConfig {
            system_prompt: Some("Write tersely.".to_string()),
            ..Default::default()
        };
        let request = build_request(&params(), &config);
        assert_eq!(request.system.as_deref(), Some("Write tersely."));
    }
}
