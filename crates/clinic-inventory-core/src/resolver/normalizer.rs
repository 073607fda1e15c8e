//! Product name normalizer.
//!
//! Handles:
//! - Case folding and trimming ("  Gato " → "gato")
//! - Diacritic stripping ("Ácaros" → "acaros", "Olivo Europeo Ñ" → "olivoeuropeon")
//! - Whitespace removal for loose matching ("Solución  Evans" → "solucionevans")
//! - Clinic-specific aliases (bacteriana → diluente bacteriano)

use std::collections::HashMap;

/// Normalizer for product names and component references.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    /// Alias map: normalized spoken/short name → canonical catalog name
    aliases: HashMap<String, String>,
}

impl Normalizer {
    /// Create a normalizer with no aliases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a normalizer from `alias → canonical` pairs.
    pub fn with_aliases<I, K, V>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut normalizer = Self::new();
        for (alias, canonical) in aliases {
            normalizer.add_alias(alias.as_ref(), canonical);
        }
        normalizer
    }

    /// Add a custom alias mapping.
    pub fn add_alias(&mut self, alias: &str, canonical: impl Into<String>) {
        self.aliases.insert(normalize_name(alias), canonical.into());
    }

    /// Expand an alias to its canonical catalog name, or return the input unchanged.
    pub fn expand_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases
            .get(&normalize_name(name))
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// Loose matching key for a reference, after alias expansion.
    pub fn key(&self, name: &str) -> String {
        normalize_name(self.expand_alias(name))
    }
}

/// Trimmed, lower-cased name (exact-name matching).
pub fn clean_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Accent-, case- and whitespace-insensitive matching key.
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| !c.is_whitespace())
        .map(strip_diacritic)
        .collect()
}

/// Map an accented Latin letter to its base letter.
fn strip_diacritic(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' | 'ā' => 'a',
        'é' | 'è' | 'ê' | 'ë' | 'ē' | 'ę' => 'e',
        'í' | 'ì' | 'î' | 'ï' | 'ī' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' | 'ø' | 'ō' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'ū' => 'u',
        'ñ' | 'ń' => 'n',
        'ç' | 'ć' | 'č' => 'c',
        'ý' | 'ÿ' => 'y',
        'š' | 'ś' => 's',
        'ž' | 'ź' | 'ż' => 'z',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("  Epitelio de Gato "), "epitelio de gato");
        assert_eq!(clean_name("ÁCAROS"), "ácaros");
    }

    #[test]
    fn test_normalize_strips_accents_and_spaces() {
        assert_eq!(normalize_name("Ácaros"), "acaros");
        assert_eq!(normalize_name("Solución  Evans"), "solucionevans");
        assert_eq!(normalize_name("PÓLEN de Olivo"), "polendeolivo");
        assert_eq!(normalize_name("Piñón"), "pinon");
        assert_eq!(normalize_name("\tGato\n"), "gato");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_name("Diluente Bacteriano Ñ");
        assert_eq!(normalize_name(&once), once);
    }

    #[test]
    fn test_alias_expansion() {
        let normalizer = Normalizer::with_aliases([("bacteriana", "Diluente Bacteriano")]);

        assert_eq!(normalizer.expand_alias("Bacteriana"), "Diluente Bacteriano");
        assert_eq!(normalizer.expand_alias(" BACTERIANA "), "Diluente Bacteriano");
        assert_eq!(normalizer.key("bacteriana"), "diluentebacteriano");

        // Unknown names pass through
        assert_eq!(normalizer.expand_alias("Gato"), "Gato");
        assert_eq!(normalizer.key("Gato"), "gato");
    }
}
