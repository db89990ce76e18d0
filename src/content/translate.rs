//! Translation integration and `Accept-Language` negotiation.

use std::collections::HashMap;

/// Translates user-facing text. Implemented outside the engine.
pub trait Translator: Send + Sync {
    fn supports(&self, language: &str) -> bool;

    /// Translate `text`, falling back to the input when no translation
    /// exists.
    fn translate(&self, text: &str, language: &str) -> String;
}

/// In-memory phrase table.
#[derive(Debug, Default, Clone)]
pub struct DictionaryTranslator {
    phrases: HashMap<String, HashMap<String, String>>,
}

impl DictionaryTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a language even without phrases.
    pub fn with_language(mut self, language: &str) -> Self {
        self.phrases.entry(language.to_ascii_lowercase()).or_default();
        self
    }

    pub fn with_phrase(mut self, language: &str, text: &str, translated: &str) -> Self {
        self.phrases
            .entry(language.to_ascii_lowercase())
            .or_default()
            .insert(text.to_string(), translated.to_string());
        self
    }
}

impl Translator for DictionaryTranslator {
    fn supports(&self, language: &str) -> bool {
        self.phrases.contains_key(language)
    }

    fn translate(&self, text: &str, language: &str) -> String {
        self.phrases
            .get(language)
            .and_then(|p| p.get(text))
            .cloned()
            .unwrap_or_else(|| text.to_string())
    }
}

/// Pick the best language of an `Accept-Language` header the translator
/// supports. Tags are compared lowercase, full tag first, then the primary
/// subtag (`de-AT` falls back to `de`).
pub fn negotiate_language(header: &str, translator: &dyn Translator) -> Option<String> {
    let mut ranked: Vec<(f32, usize, String)> = header
        .split(',')
        .enumerate()
        .filter_map(|(position, part)| {
            let mut pieces = part.split(';');
            let tag = pieces.next()?.trim().to_ascii_lowercase();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let q = pieces
                .filter_map(|p| p.trim().strip_prefix("q="))
                .find_map(|q| q.trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (q > 0.0).then_some((q, position, tag))
        })
        .collect();

    ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    ranked.into_iter().find_map(|(_, _, tag)| {
        if translator.supports(&tag) {
            return Some(tag);
        }
        let primary = tag.split('-').next()?;
        translator.supports(primary).then(|| primary.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translator() -> DictionaryTranslator {
        DictionaryTranslator::new()
            .with_language("en")
            .with_phrase("de", "Not found", "Nicht gefunden")
    }

    #[test]
    fn test_quality_ordering() {
        let t = translator();
        assert_eq!(negotiate_language("en;q=0.5, de", &t).as_deref(), Some("de"));
        assert_eq!(negotiate_language("fr, en", &t).as_deref(), Some("en"));
        assert_eq!(negotiate_language("fr", &t), None);
    }

    #[test]
    fn test_primary_subtag_fallback() {
        let t = translator();
        assert_eq!(negotiate_language("de-AT", &t).as_deref(), Some("de"));
    }

    #[test]
    fn test_translate_falls_back_to_input() {
        let t = translator();
        assert_eq!(t.translate("Not found", "de"), "Nicht gefunden");
        assert_eq!(t.translate("Not found", "en"), "Not found");
    }
}
