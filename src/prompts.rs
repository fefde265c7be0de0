//! Translation prompt templates.

use offline_types::languages::AUTO_DETECT;

fn source_instruction(source_lang: &str) -> String {
    if source_lang == AUTO_DETECT {
        "auto-detect the source language".to_string()
    } else {
        format!("from {source_lang}")
    }
}

/// Prompt for a streamed, user-visible translation.
pub fn stream_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
    format!(
        "Translate the following {} text into concise {target_lang}: \"{text}\". \n Provide *only* the translated text. Do not include any additional explanations, commentary, or greetings.",
        source_instruction(source_lang)
    )
}

/// Prompt for the silent intermediate pass; asks for accuracy over brevity.
pub fn full_prompt(text: &str, source_lang: &str, target_lang: &str) -> String {
    format!(
        "Translate the following {} text into {target_lang}: \"{text}\". \n Provide *only* the translated text. Do not include any additional explanations, commentary, or greetings.\n Ensure that your translation is accurate and reads naturally in the target language. Pay attention to idiomatic expressions and cultural nuances that may require adaptation and maintain the original text format.",
        source_instruction(source_lang)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_prompt_auto_detect() {
        let prompt = stream_prompt("hola", "auto", "en");
        assert!(prompt.starts_with(
            "Translate the following auto-detect the source language text into concise en: \"hola\"."
        ));
    }

    #[test]
    fn test_full_prompt_names_source() {
        let prompt = full_prompt("こんにちは", "ja", "en");
        assert!(prompt.starts_with("Translate the following from ja text into en: \"こんにちは\"."));
        assert!(prompt.contains("idiomatic expressions"));
        assert!(!prompt.contains("concise"));
    }
}
