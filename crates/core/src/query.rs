//! Graph-query validation seam.
//!
//! The query execution engine is an external collaborator; the registry only
//! needs two things at job-creation time: that the query text is well formed,
//! and the ordered set of variable names it binds. `QueryParser` is that seam.

use crate::error::{QjError, QjResult};
use crate::job::is_valid_identifier;

/// Parses a graph query and reports the fields it binds.
pub trait QueryParser: Send + Sync {
    /// Validate `query` and return its bound variable names in projection
    /// order. Fails with [`QjError::JobQueryInvalid`] on malformed text.
    fn parse_fields(&self, query: &str) -> QjResult<Vec<String>>;
}

/// Parser for the `SELECT ?a ?b ... WHERE { ... }` projection form of
/// SPARQL-style queries.
///
/// `SELECT *` is rejected: the registry persists the field list at creation
/// time and a wildcard projection has no stable field list.
#[derive(Debug, Default, Clone, Copy)]
pub struct SparqlSelectParser;

impl QueryParser for SparqlSelectParser {
    fn parse_fields(&self, query: &str) -> QjResult<Vec<String>> {
        let mut tokens = query.split_whitespace();
        match tokens.next() {
            Some(tok) if tok.eq_ignore_ascii_case("select") => {}
            _ => {
                return Err(QjError::JobQueryInvalid(format!(
                    "Invalid query {query}: expected SELECT"
                )));
            }
        }

        let mut fields = Vec::new();
        let mut saw_where = false;
        for token in tokens {
            let token = token.trim_matches(|c| c == '(' || c == ')');
            if token.eq_ignore_ascii_case("where") || token.starts_with('{') {
                saw_where = true;
                break;
            }
            if token == "*" {
                return Err(QjError::JobQueryInvalid(format!(
                    "Invalid query {query}: SELECT * has no stable field list"
                )));
            }
            if let Some(name) = token.strip_prefix('?') {
                if !is_valid_identifier(name) {
                    return Err(QjError::JobQueryInvalid(format!(
                        "Invalid query {query}: bad variable name ?{name}"
                    )));
                }
                if !fields.iter().any(|f| f == name) {
                    fields.push(name.to_string());
                }
            }
        }

        if !saw_where {
            return Err(QjError::JobQueryInvalid(format!(
                "Invalid query {query}: missing WHERE clause"
            )));
        }
        if fields.is_empty() {
            return Err(QjError::JobQueryInvalid(format!(
                "Invalid query {query}: no projected variables"
            )));
        }
        Ok(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_projection_variables() {
        let fields = SparqlSelectParser
            .parse_fields(
                "select ?s ?p ?account_id where {?s ?p ?account_id} limit 10",
            )
            .unwrap();
        assert_eq!(fields, vec!["s", "p", "account_id"]);
    }

    #[test]
    fn deduplicates_repeated_variables() {
        let fields = SparqlSelectParser
            .parse_fields("SELECT ?a ?a ?b WHERE {?a ?x ?b}")
            .unwrap();
        assert_eq!(fields, vec!["a", "b"]);
    }

    #[test]
    fn rejects_wildcard_projection() {
        let err = SparqlSelectParser
            .parse_fields("select * where {?s ?p ?o}")
            .unwrap_err();
        assert!(matches!(err, QjError::JobQueryInvalid(_)));
    }

    #[test]
    fn rejects_missing_where() {
        let err = SparqlSelectParser.parse_fields("select ?s ?p").unwrap_err();
        assert!(matches!(err, QjError::JobQueryInvalid(_)));
    }

    #[test]
    fn rejects_non_select() {
        let err = SparqlSelectParser
            .parse_fields("construct {?s ?p ?o} where {?s ?p ?o}")
            .unwrap_err();
        assert!(matches!(err, QjError::JobQueryInvalid(_)));
    }

    #[test]
    fn rejects_empty_projection() {
        let err = SparqlSelectParser
            .parse_fields("select where {?s ?p ?o}")
            .unwrap_err();
        assert!(matches!(err, QjError::JobQueryInvalid(_)));
    }
}
