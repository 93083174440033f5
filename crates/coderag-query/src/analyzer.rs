//! Query classification and fusion-weight policy.
//!
//! Classification is purely lexical: the shape of the tokens decides whether
//! a query names an identifier, uses pattern syntax, or reads as a
//! natural-language question. The orchestrator may additionally tell the
//! analyzer that a single-token query names a known entity.

use std::sync::LazyLock;

use regex::Regex;

use coderag_core::{FusionWeights, QueryAnalysis, QueryType};

/// Bumped whenever the weight table or the classification rules change.
pub const WEIGHT_POLICY_VERSION: u32 = 1;

/// Classifications below this confidence are reported as `mixed`.
pub const MIXED_THRESHOLD: f32 = 0.6;

const MAX_CONFIDENCE: f32 = 0.95;

pub const IDENTIFIER_WEIGHTS: FusionWeights = FusionWeights::new(0.10, 0.35, 0.35, 0.20);
pub const CONCEPTUAL_WEIGHTS: FusionWeights = FusionWeights::new(0.55, 0.25, 0.05, 0.15);
pub const STRUCTURAL_WEIGHTS: FusionWeights = FusionWeights::new(0.10, 0.20, 0.55, 0.15);
pub const MIXED_WEIGHTS: FusionWeights = FusionWeights::new(0.30, 0.30, 0.20, 0.20);

/// Fusion weights (dense, sparse, pattern, graph) for a query type.
pub fn weights_for(query_type: QueryType) -> FusionWeights {
    match query_type {
        QueryType::Identifier => IDENTIFIER_WEIGHTS,
        QueryType::Conceptual => CONCEPTUAL_WEIGHTS,
        QueryType::Structural => STRUCTURAL_WEIGHTS,
        QueryType::Mixed => MIXED_WEIGHTS,
    }
}

// Identifier shapes. Patterns are constant, so initialization cannot fail in practice.
static DOTTED_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][\w$]*(?:(?:\.|::|#)[A-Za-z_$][\w$]*)+$").ok());
static CAMEL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*[A-Z][A-Za-z0-9]*$").ok());
static PASCAL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-z0-9]+[A-Z][A-Za-z0-9]*$").ok());
static SNAKE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^_*[A-Za-z][A-Za-z0-9]*(?:_[A-Za-z0-9]+)+$").ok());

const STRUCTURAL_SYMBOLS: &[&str] = &[
    "*", "{", "}", "(", ")", "[", "]", "$", "^", "|", "\\", "->", "=>",
];

/// Declaration keywords; only count when they lead the query.
const STRUCTURAL_KEYWORDS: &[&str] = &[
    "fn ", "def ", "class ", "struct ", "impl ", "interface ", "func ", "trait ", "enum ",
];

const CONCEPTUAL_WORDS: &[&str] = &[
    "how", "what", "why", "where", "when", "which", "who", "does", "do", "is", "are", "the",
    "a", "an", "of", "to", "in", "for", "with", "from", "that", "this", "work", "works",
    "handle", "handles", "handled", "explain", "find", "show", "list", "all", "about",
    "between", "used", "called",
];

/// Classify a query without consulting the entity index.
pub fn analyze(query: &str) -> QueryAnalysis {
    analyze_with_index(query, false)
}

/// Classify a query. `known_entity` is true when the query exactly names an
/// entity in the store.
pub fn analyze_with_index(query: &str, known_entity: bool) -> QueryAnalysis {
    let (query_type, confidence, reasoning) = classify(query.trim(), known_entity);

    let (query_type, reasoning) = if confidence < MIXED_THRESHOLD {
        (QueryType::Mixed, format!("below mixed threshold: {}", reasoning))
    } else {
        (query_type, reasoning)
    };

    QueryAnalysis {
        query_type,
        confidence,
        weights: weights_for(query_type),
        reasoning,
    }
}

fn classify(query: &str, known_entity: bool) -> (QueryType, f32, String) {
    if known_entity {
        return (
            QueryType::Identifier,
            1.0,
            "exact match against entity index".to_string(),
        );
    }

    let indicators = structural_indicators(query);
    if !indicators.is_empty() {
        let confidence = (0.6 + 0.1 * (indicators.len() - 1) as f32).min(MAX_CONFIDENCE);
        return (
            QueryType::Structural,
            confidence,
            format!(
                "{} structural indicator(s): {}",
                indicators.len(),
                indicators.join(" ")
            ),
        );
    }

    let words: Vec<&str> = query.split_whitespace().collect();

    if words.len() <= 1 {
        return match identifier_shape(clean_token(query)) {
            Some(shape) => (
                QueryType::Identifier,
                0.9,
                format!("identifier shape ({})", shape),
            ),
            None => (
                QueryType::Identifier,
                0.5,
                "single bare word without identifier shape".to_string(),
            ),
        };
    }

    let mut conceptual = words
        .iter()
        .filter(|w| {
            let lower = w
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            CONCEPTUAL_WORDS.contains(&lower.as_str())
        })
        .count();
    if words.len() >= 3 {
        conceptual += 1;
    }
    let identifiers = words
        .iter()
        .filter(|w| identifier_shape(clean_token(w)).is_some())
        .count();

    let ratio = if conceptual + identifiers == 0 {
        0.0
    } else {
        conceptual as f32 / (conceptual + identifiers) as f32
    };
    let length_factor = 0.5 + 0.5 * (words.len().min(4) as f32 / 4.0);
    let confidence = (0.4 + 0.55 * ratio * length_factor).min(MAX_CONFIDENCE);

    (
        QueryType::Conceptual,
        confidence,
        format!(
            "natural-language phrase: {} conceptual vs {} identifier signals",
            conceptual, identifiers
        ),
    )
}

/// Structural indicators present in the query, in a fixed order.
fn structural_indicators(query: &str) -> Vec<&'static str> {
    let mut found: Vec<&'static str> = Vec::new();

    if query.len() > 2 && query.starts_with('/') && query.ends_with('/') {
        found.push("/regex/");
    }

    for keyword in STRUCTURAL_KEYWORDS {
        if query.starts_with(keyword) {
            found.push(keyword.trim_end());
        }
    }

    for symbol in STRUCTURAL_SYMBOLS {
        if query.contains(symbol) {
            found.push(*symbol);
        }
    }

    // A trailing question mark is punctuation, anywhere else it is a wildcard.
    if query.trim_end_matches('?').trim_end().contains('?') {
        found.push("?");
    }

    found
}

/// Strip surrounding punctuation, keeping identifier characters.
fn clean_token(token: &str) -> &str {
    token.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
}

/// Name of the strong identifier shape a token has, if any.
pub(crate) fn identifier_shape(token: &str) -> Option<&'static str> {
    let matches = |pattern: &LazyLock<Option<Regex>>| {
        pattern.as_ref().is_some_and(|re| re.is_match(token))
    };

    if matches(&DOTTED_PATTERN) {
        Some("dotted")
    } else if matches(&CAMEL_PATTERN) {
        Some("camelCase")
    } else if matches(&PASCAL_PATTERN) {
        Some("PascalCase")
    } else if matches(&SNAKE_PATTERN) {
        Some("snake_case")
    } else {
        None
    }
}

/// Tokens worth resolving against the entity index.
///
/// A single-token query is used as is; otherwise only identifier-shaped
/// words are kept.
pub(crate) fn identifier_tokens(query: &str) -> Vec<String> {
    let words: Vec<&str> = query.split_whitespace().collect();
    let tokens = match words.as_slice() {
        [] => Vec::new(),
        [single] => vec![clean_token(single).to_string()],
        _ => {
            let mut tokens: Vec<String> = Vec::new();
            for word in words {
                let token = clean_token(word);
                if identifier_shape(token).is_some() && !tokens.iter().any(|t| t == token) {
                    tokens.push(token.to_string());
                }
            }
            tokens
        }
    };
    tokens.into_iter().filter(|t| !t.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_one() {
        for query_type in [
            QueryType::Identifier,
            QueryType::Conceptual,
            QueryType::Structural,
            QueryType::Mixed,
        ] {
            let sum = weights_for(query_type).sum();
            assert!((sum - 1.0).abs() < 1e-6, "{:?} sums to {}", query_type, sum);
        }
    }

    #[test]
    fn test_dotted_identifier() {
        let analysis = analyze("UserService.validateCredentials");
        assert_eq!(analysis.query_type, QueryType::Identifier);
        assert!(analysis.confidence >= 0.8);
        assert!(analysis.weights.pattern >= analysis.weights.dense);
        assert!(analysis.weights.sparse >= analysis.weights.dense);
        assert_eq!(analysis.reasoning, "identifier shape (dotted)");
    }

    #[test]
    fn test_conceptual_question() {
        let analysis = analyze("how does streaming response work");
        assert_eq!(analysis.query_type, QueryType::Conceptual);
        assert!(analysis.weights.dense >= 0.4);
        assert!(analysis.confidence >= MIXED_THRESHOLD);
    }

    #[test]
    fn test_trailing_question_mark_is_not_structural() {
        let analysis = analyze("how does streaming response work?");
        assert_eq!(analysis.query_type, QueryType::Conceptual);
    }

    #[test]
    fn test_structural_patterns() {
        let glob = analyze("get*Handler");
        assert_eq!(glob.query_type, QueryType::Structural);
        assert!((glob.confidence - 0.6).abs() < 1e-6);

        let call = analyze("validate(user, pw)");
        assert_eq!(call.query_type, QueryType::Structural);
        assert!((call.confidence - 0.7).abs() < 1e-6);

        let decl = analyze("fn main");
        assert_eq!(decl.query_type, QueryType::Structural);

        let regex = analyze(r"/impl\s+\w+/");
        assert_eq!(regex.query_type, QueryType::Structural);
        assert!(regex.confidence <= MAX_CONFIDENCE);
    }

    #[test]
    fn test_keyword_inside_phrase_is_not_structural() {
        let analysis = analyze("how is the class loader used");
        assert_eq!(analysis.query_type, QueryType::Conceptual);
    }

    #[test]
    fn test_bare_word_is_mixed_unless_known() {
        let bare = analyze("token");
        assert_eq!(bare.query_type, QueryType::Mixed);
        assert!((bare.confidence - 0.5).abs() < 1e-6);
        assert_eq!(bare.weights, MIXED_WEIGHTS);

        let known = analyze_with_index("token", true);
        assert_eq!(known.query_type, QueryType::Identifier);
        assert_eq!(known.confidence, 1.0);
    }

    #[test]
    fn test_short_phrase_without_signals_is_mixed() {
        let analysis = analyze("token refresh");
        assert_eq!(analysis.query_type, QueryType::Mixed);
        assert!(analysis.reasoning.starts_with("below mixed threshold"));
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let a = analyze("where is validate_credentials called");
        let b = analyze("where is validate_credentials called");
        assert_eq!(a, b);
    }

    #[test]
    fn test_identifier_shapes() {
        assert_eq!(identifier_shape("auth::UserService"), Some("dotted"));
        assert_eq!(identifier_shape("validateCredentials"), Some("camelCase"));
        assert_eq!(identifier_shape("UserService"), Some("PascalCase"));
        assert_eq!(identifier_shape("validate_credentials"), Some("snake_case"));
        assert_eq!(identifier_shape("MAX_RETRIES"), Some("snake_case"));
        assert_eq!(identifier_shape("token"), None);
    }

    #[test]
    fn test_identifier_tokens() {
        assert_eq!(identifier_tokens("token"), vec!["token"]);
        assert_eq!(
            identifier_tokens("where is UserService.validateCredentials called?"),
            vec!["UserService.validateCredentials"]
        );
        assert!(identifier_tokens("how does it work").is_empty());
    }
}
