//! Accept-Encoding parsing and encoder selection.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compression::{CompressionChoice, Encoding, Level};

/// Upper bound on memoized header strings. Beyond it, lookups still work but
/// are no longer remembered, so hostile clients cannot grow the maps.
const MEMO_CAPACITY: usize = 1024;

/// Normalized view of one raw `Accept-Encoding` value.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AcceptedEncodings {
    tokens: HashSet<String>,
    refused: HashSet<String>,
    wildcard: bool,
}

impl AcceptedEncodings {
    pub fn parse(header: &str) -> Self {
        let mut accepted = Self::default();
        for part in header.split(',') {
            let mut pieces = part.split(';');
            let token = pieces.next().unwrap_or("").trim().to_ascii_lowercase();
            if token.is_empty() {
                continue;
            }
            let refused = pieces.any(|param| {
                let param = param.trim();
                param
                    .strip_prefix("q=")
                    .and_then(|q| q.trim().parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            let token = match token.as_str() {
                "x-gzip" => "gzip".to_string(),
                _ => token,
            };
            if refused {
                accepted.refused.insert(token);
            } else if token == "*" {
                accepted.wildcard = true;
            } else {
                accepted.tokens.insert(token);
            }
        }
        accepted
    }

    pub fn accepts(&self, encoding: Encoding) -> bool {
        let token = encoding.as_str();
        if self.refused.contains(token) {
            return false;
        }
        encoding == Encoding::Identity || self.tokens.contains(token) || self.wildcard
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }
}

/// Ordered encoder preferences of one endpoint, with the final choice
/// memoized per raw header.
#[derive(Debug, Default)]
pub struct CompressionPreferences {
    order: Vec<CompressionChoice>,
    chosen: DashMap<String, Option<CompressionChoice>>,
}

impl CompressionPreferences {
    pub fn new(order: Vec<CompressionChoice>) -> Self {
        Self {
            order,
            chosen: DashMap::new(),
        }
    }

    /// gzip then deflate at the fast level.
    pub fn standard() -> Self {
        Self::new(vec![
            CompressionChoice {
                encoding: Encoding::Gzip,
                level: Level::Fast,
            },
            CompressionChoice {
                encoding: Encoding::Deflate,
                level: Level::Fast,
            },
        ])
    }

    /// No runtime compression.
    pub fn none() -> Self {
        Self::new(Vec::new())
    }

    pub fn order(&self) -> &[CompressionChoice] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Parses `Accept-Encoding` once per distinct raw string.
#[derive(Debug, Default)]
pub struct Negotiator {
    parsed: DashMap<String, Arc<AcceptedEncodings>>,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalized token set for a raw header.
    pub fn accepted(&self, header: &str) -> Arc<AcceptedEncodings> {
        if let Some(hit) = self.parsed.get(header) {
            return Arc::clone(hit.value());
        }
        let accepted = Arc::new(AcceptedEncodings::parse(header));
        if self.parsed.len() < MEMO_CAPACITY {
            self.parsed.insert(header.to_string(), Arc::clone(&accepted));
        }
        accepted
    }

    /// First preference the client accepts, or `None` for identity.
    pub fn choose(
        &self,
        preferences: &CompressionPreferences,
        header: &str,
    ) -> Option<CompressionChoice> {
        if preferences.is_empty() || header.is_empty() {
            return None;
        }
        if let Some(hit) = preferences.chosen.get(header) {
            return *hit.value();
        }
        let accepted = self.accepted(header);
        let choice = preferences
            .order
            .iter()
            .copied()
            .find(|c| c.encoding != Encoding::Identity && accepted.accepts(c.encoding));
        if preferences.chosen.len() < MEMO_CAPACITY {
            preferences.chosen.insert(header.to_string(), choice);
        }
        choice
    }

    pub fn memoized_headers(&self) -> usize {
        self.parsed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_tokens() {
        let accepted = AcceptedEncodings::parse(" GZip ;q=0.8, deflate, br");
        assert!(accepted.accepts(Encoding::Gzip));
        assert!(accepted.accepts(Encoding::Deflate));
        assert!(accepted.tokens().any(|t| t == "br"));
    }

    #[test]
    fn test_q_zero_refuses() {
        let accepted = AcceptedEncodings::parse("gzip;q=0, *");
        assert!(!accepted.accepts(Encoding::Gzip));
        assert!(accepted.accepts(Encoding::Deflate));
    }

    #[test]
    fn test_choose_follows_preference_order() {
        let negotiator = Negotiator::new();
        let prefs = CompressionPreferences::standard();

        let choice = negotiator.choose(&prefs, "deflate, gzip").unwrap();
        assert_eq!(choice.encoding, Encoding::Gzip);

        let choice = negotiator.choose(&prefs, "deflate").unwrap();
        assert_eq!(choice.encoding, Encoding::Deflate);

        assert!(negotiator.choose(&prefs, "br").is_none());
        assert!(negotiator.choose(&prefs, "").is_none());
    }

    #[test]
    fn test_choice_is_memoized_per_header() {
        let negotiator = Negotiator::new();
        let prefs = CompressionPreferences::standard();

        negotiator.choose(&prefs, "gzip");
        negotiator.choose(&prefs, "gzip");
        negotiator.choose(&prefs, "deflate");

        assert_eq!(negotiator.memoized_headers(), 2);
        assert_eq!(prefs.chosen.len(), 2);
    }

    #[test]
    fn test_empty_preferences_never_compress() {
        let negotiator = Negotiator::new();
        assert!(negotiator
            .choose(&CompressionPreferences::none(), "gzip")
            .is_none());
    }
}
