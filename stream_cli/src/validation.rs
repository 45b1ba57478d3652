use crate::error::CliError;

/// Maximum text length for streaming requests
const MAX_TEXT_LENGTH: usize = 5000;

/// Validate a streaming request before a session is started
pub fn validate_stream_request(text: &str, language: &str) -> Result<(), CliError> {
    if text.trim().is_empty() {
        return Err(CliError::InvalidInput("Please enter some text to stream".to_string()));
    }
    if text.chars().count() > MAX_TEXT_LENGTH {
        return Err(CliError::InvalidInput(format!(
            "Text too long (max {} characters)",
            MAX_TEXT_LENGTH
        )));
    }

    if language.is_empty() {
        return Err(CliError::InvalidInput("Please select a language".to_string()));
    }
    if !is_valid_language_code(language) {
        return Err(CliError::InvalidInput(format!(
            "Invalid language code format: {}. Expected format: ll_CC (e.g., en_US, de_DE)",
            language
        )));
    }

    Ok(())
}

/// Validate language code format (e.g., en_US, de_DE)
fn is_valid_language_code(code: &str) -> bool {
    // ll_CC (2 lowercase letters, underscore, 2 uppercase letters) or just ll
    let parts: Vec<&str> = code.split('_').collect();
    match parts.len() {
        1 => parts[0].len() == 2 && parts[0].chars().all(|c| c.is_ascii_lowercase()),
        2 => {
            parts[0].len() == 2
                && parts[0].chars().all(|c| c.is_ascii_lowercase())
                && parts[1].len() == 2
                && parts[1].chars().all(|c| c.is_ascii_uppercase())
        }
        _ => false,
    }
}
