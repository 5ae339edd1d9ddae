//! Query-side text normalization for full-text search.
//!
//! A query is split into lowercased alphanumeric terms, English stopwords are
//! dropped, and duplicates are removed while keeping first-seen order. Every
//! remaining term must be present for a transcript to match. Stemming is left
//! to the store (SQLite's `porter` tokenizer).

/// English stopwords removed from queries before matching.
const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "did", "do", "does", "doing", "don", "down", "during", "each", "few", "for",
    "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "herself",
    "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
    "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once",
    "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own", "s", "same", "she",
    "should", "so", "some", "such", "t", "than", "that", "the", "their", "theirs", "them",
    "themselves", "then", "there", "these", "they", "this", "those", "through", "to", "too",
    "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "whom", "why", "will", "with", "you", "your", "yours", "yourself",
    "yourselves",
];

pub fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(&term)
}

/// Lowercased alphanumeric runs of `text`, stopwords included.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Normalized search terms for a user query.
///
/// Returns an empty vector when the query holds nothing but punctuation and
/// stopwords; such a query matches no transcript.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in tokenize(query) {
        if is_stopword(&token) || terms.contains(&token) {
            continue;
        }
        terms.push(token);
    }
    terms
}

/// Build an FTS5 `MATCH` expression requiring every term.
///
/// Each term is wrapped in double quotes so FTS5 operators and column
/// filters in user input are treated as plain text.
pub fn fts5_match_expr(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}
