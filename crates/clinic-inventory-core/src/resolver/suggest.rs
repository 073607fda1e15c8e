//! Near-miss suggestions for unresolved product references.

use strsim::{jaro_winkler, normalized_levenshtein};

use crate::models::Product;

/// Number of suggestions attached to a not-found error.
const MAX_SUGGESTIONS: usize = 3;

/// Minimum similarity to be suggested.
const MIN_SIMILARITY: f64 = 0.75;

/// Rank catalog names by similarity to a normalized key.
///
/// Returns display names, best first, without duplicates.
pub fn suggest_names(normalized_key: &str, candidates: &[Product]) -> Vec<String> {
    if normalized_key.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(f64, &Product)> = candidates
        .iter()
        .map(|p| (fuzzy_match(normalized_key, &p.normalized_name), p))
        .filter(|(score, _)| *score >= MIN_SIMILARITY)
        .collect();

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut names: Vec<String> = Vec::new();
    for (_, product) in scored {
        if !names.contains(&product.name) {
            names.push(product.name.clone());
        }
        if names.len() == MAX_SUGGESTIONS {
            break;
        }
    }
    names
}

/// Compute fuzzy string similarity using combined metrics.
fn fuzzy_match(a: &str, b: &str) -> f64 {
    // Jaro-Winkler rewards shared prefixes, Levenshtein overall closeness
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products(names: &[&str]) -> Vec<Product> {
        names.iter().map(|n| Product::new("org-1", *n)).collect()
    }

    #[test]
    fn test_typo_is_suggested_first() {
        let catalog = products(&["Ácaros", "Epitelio de Gato", "Gramíneas"]);
        let suggestions = suggest_names("acaro", &catalog);
        assert_eq!(suggestions, vec!["Ácaros".to_string()]);
    }

    #[test]
    fn test_limit_and_dedup() {
        let catalog = products(&["Gato", "Gato", "Gatos", "Gato A", "Gato B"]);
        let suggestions = suggest_names("gato", &catalog);
        assert_eq!(suggestions.len(), MAX_SUGGESTIONS);
        assert_eq!(suggestions[0], "Gato");
        assert_eq!(suggestions.iter().filter(|s| *s == "Gato").count(), 1);
    }

    #[test]
    fn test_unrelated_names_are_not_suggested() {
        let catalog = products(&["Solución Evans"]);
        assert!(suggest_names("perro", &catalog).is_empty());
        assert!(suggest_names("", &catalog).is_empty());
    }

    #[test]
    fn test_fuzzy_match_bounds() {
        assert!((fuzzy_match("gato", "gato") - 1.0).abs() < f64::EPSILON);
        assert!(fuzzy_match("gato", "xyz") < MIN_SIMILARITY);
    }
}
