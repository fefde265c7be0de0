//! Language codes understood by the translation prompts.

use serde::Serialize;

/// Source code meaning "let the model detect the language".
pub const AUTO_DETECT: &str = "auto";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
    /// Language hint handed to the speech recognizer; `None` lets it detect.
    pub asr_code: Option<&'static str>,
}

pub const LANGUAGES: &[Language] = &[
    Language {
        code: AUTO_DETECT,
        name: "Auto Detect",
        asr_code: None,
    },
    Language {
        code: "en",
        name: "English",
        asr_code: Some("en"),
    },
    Language {
        code: "zh-Hant",
        name: "Chinese (Traditional)",
        asr_code: Some("chinese"),
    },
    Language {
        code: "zh-Hant-HK",
        name: "Chinese (Traditional, Hong Kong)",
        asr_code: Some("chinese"),
    },
    Language {
        code: "zh-Hans",
        name: "Chinese (Simplified)",
        asr_code: Some("chinese"),
    },
    Language {
        code: "es",
        name: "Spanish",
        asr_code: Some("es"),
    },
    Language {
        code: "ja",
        name: "Japanese",
        asr_code: Some("ja"),
    },
    Language {
        code: "fr",
        name: "French",
        asr_code: Some("fr"),
    },
    Language {
        code: "de",
        name: "German",
        asr_code: Some("de"),
    },
    Language {
        code: "ko",
        name: "Korean",
        asr_code: Some("ko"),
    },
    Language {
        code: "ru",
        name: "Russian",
        asr_code: Some("ru"),
    },
];

pub fn find(code: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|lang| lang.code == code)
}

pub fn is_supported(code: &str) -> bool {
    find(code).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_language() {
        assert_eq!(find("ja").map(|l| l.name), Some("Japanese"));
        assert_eq!(find("zh-Hant-HK").and_then(|l| l.asr_code), Some("chinese"));
        assert!(find(AUTO_DETECT).is_some_and(|l| l.asr_code.is_none()));
        assert!(!is_supported("xx"));
    }
}
