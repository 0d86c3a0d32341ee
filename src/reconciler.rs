use crate::error::ReconcileError;
use indexmap::IndexSet;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Destructive verbs we refuse to wrap. This is a whole-string word check,
/// not a parser: comments, keyword splitting or other obfuscation can evade
/// it, so it only flags obviously mutating statements.
static FORBIDDEN_KEYWORDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(drop|create|insert|delete)\b").expect("valid regex"));

/// Identifier runs (word characters or backticks) sitting directly before a
/// comma or before the FROM keyword, i.e. the SELECT-list items plus the
/// final item before FROM.
static FIELD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([\w`]+)(?:\s*,|\s+(?i:from)\s)").expect("valid regex"));

/// The outcome of reconciling two queries: the shared projection plus the
/// two rewritten queries, ready to hand to an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// Fields appearing in both projections, in first-appearance order of
    /// the first query.
    pub common_fields: Vec<String>,
    pub query1: String,
    pub query2: String,
}

impl Reconciliation {
    /// False when the intersection was empty. The rewritten queries are
    /// still emitted in that case but will fail once actually executed.
    pub fn has_common_fields(&self) -> bool {
        !self.common_fields.is_empty()
    }
}

pub struct QueryReconciler;

impl QueryReconciler {
    /// Collapse a possibly multi-line query into a single line.
    pub fn normalize(text: &str) -> String {
        text.lines().collect::<Vec<_>>().join(" ")
    }

    /// Advisory denylist check. Returns the query unchanged when it contains
    /// none of drop/create/insert/delete as a standalone word, in any
    /// casing; otherwise the query is blocked as a whole. `alias` names the
    /// query in the reported condition.
    pub fn check_forbidden_keywords<'a>(
        query: &'a str,
        alias: &str,
    ) -> Result<&'a str, ReconcileError> {
        if let Some(m) = FORBIDDEN_KEYWORDS.find(query) {
            return Err(ReconcileError::Blocked {
                alias: alias.to_string(),
                keyword: m.as_str().to_lowercase(),
            });
        }
        Ok(query)
    }

    /// Extract the column-like identifiers from a normalized query.
    ///
    /// Duplicates collapse and first-appearance order is kept. Known
    /// limitations of the lexical match: `SELECT *` yields nothing, dotted
    /// qualified names match only their trailing segment, and expressions
    /// or subqueries in the SELECT list produce partial matches.
    pub fn extract_fields(query: &str) -> IndexSet<String> {
        FIELD_PATTERN
            .captures_iter(query)
            .map(|caps| caps[1].to_string())
            .collect()
    }

    /// Run the full pipeline: normalize both queries, screen both for
    /// forbidden keywords, extract both field sets, intersect, and wrap each
    /// query as a subquery projecting only the common fields.
    ///
    /// A forbidden keyword on either side aborts the whole reconciliation;
    /// the error names the first blocked side. An empty intersection is not
    /// an error here, the caller decides whether a degenerate rewrite is
    /// worth reporting before execution.
    pub fn reconcile(query1: &str, query2: &str) -> Result<Reconciliation, ReconcileError> {
        let q1 = Self::normalize(query1);
        let q2 = Self::normalize(query2);

        Self::check_forbidden_keywords(&q1, "q1")?;
        Self::check_forbidden_keywords(&q2, "q2")?;

        let fields1 = Self::extract_fields(&q1);
        let fields2 = Self::extract_fields(&q2);
        debug!("Query 1 fields: {:?}", fields1);
        debug!("Query 2 fields: {:?}", fields2);

        let common_fields: Vec<String> = fields1
            .iter()
            .filter(|f| fields2.contains(f.as_str()))
            .cloned()
            .collect();

        let select_list = common_fields.join(", ");
        Ok(Reconciliation {
            query1: format!("SELECT {} FROM ({}) AS q1", select_list, q1),
            query2: format!("SELECT {} FROM ({}) AS q2", select_list, q2),
            common_fields,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(query: &str) -> Vec<String> {
        QueryReconciler::extract_fields(query).into_iter().collect()
    }

    #[test]
    fn normalize_collapses_line_breaks() {
        let query = "SELECT a,\nb\nFROM t";
        assert_eq!(QueryReconciler::normalize(query), "SELECT a, b FROM t");
    }

    #[test]
    fn normalize_is_idempotent() {
        let query = "SELECT a,\r\n  b\nFROM t\n";
        let once = QueryReconciler::normalize(query);
        assert_eq!(QueryReconciler::normalize(&once), once);
    }

    #[test]
    fn normalize_empty_input() {
        assert_eq!(QueryReconciler::normalize(""), "");
    }

    #[test]
    fn extract_simple_select_list() {
        assert_eq!(fields("SELECT a, b FROM t"), vec!["a", "b"]);
    }

    #[test]
    fn extract_star_yields_nothing() {
        assert!(fields("SELECT * FROM t").is_empty());
    }

    #[test]
    fn extract_collapses_duplicates() {
        assert_eq!(fields("SELECT a, a, b FROM t"), vec!["a", "b"]);
    }

    #[test]
    fn extract_qualified_name_matches_trailing_segment() {
        assert_eq!(fields("SELECT t.a, b FROM t"), vec!["a", "b"]);
    }

    #[test]
    fn extract_backtick_quoted_field() {
        assert_eq!(fields("SELECT `a`, b FROM t"), vec!["`a`", "b"]);
    }

    #[test]
    fn extract_is_order_independent_as_a_set() {
        let left = QueryReconciler::extract_fields("SELECT a, b, c FROM t");
        let right = QueryReconciler::extract_fields("SELECT c, a, b FROM t");
        assert_eq!(
            left.into_iter().collect::<std::collections::BTreeSet<_>>(),
            right.into_iter().collect::<std::collections::BTreeSet<_>>()
        );
    }

    #[test]
    fn clean_query_passes_keyword_check_unchanged() {
        let query = "SELECT a FROM t";
        assert_eq!(
            QueryReconciler::check_forbidden_keywords(query, "q1"),
            Ok(query)
        );
    }

    #[test]
    fn drop_statement_is_blocked() {
        let err = QueryReconciler::check_forbidden_keywords("DROP TABLE t", "q1").unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Blocked {
                alias: "q1".to_string(),
                keyword: "drop".to_string(),
            }
        );
    }

    #[test]
    fn keyword_check_is_case_insensitive() {
        for query in ["Insert into t values (1)", "dElEtE from t", "create table t (a)"] {
            assert!(QueryReconciler::check_forbidden_keywords(query, "q1").is_err());
        }
    }

    #[test]
    fn keyword_inside_identifier_is_not_blocked() {
        let query = "SELECT dropped, created FROM audit";
        assert!(QueryReconciler::check_forbidden_keywords(query, "q1").is_ok());
    }

    #[test]
    fn reconcile_wraps_common_fields() {
        let result =
            QueryReconciler::reconcile("SELECT a, b FROM t1", "SELECT b, c FROM t2").unwrap();
        assert_eq!(result.common_fields, vec!["b"]);
        assert_eq!(result.query1, "SELECT b FROM (SELECT a, b FROM t1) AS q1");
        assert_eq!(result.query2, "SELECT b FROM (SELECT b, c FROM t2) AS q2");
    }

    #[test]
    fn reconcile_joins_multiple_fields_with_commas() {
        let result =
            QueryReconciler::reconcile("SELECT a, b, c FROM t1", "SELECT c, a FROM t2").unwrap();
        assert_eq!(result.common_fields, vec!["a", "c"]);
        assert_eq!(
            result.query1,
            "SELECT a, c FROM (SELECT a, b, c FROM t1) AS q1"
        );
    }

    #[test]
    fn reconcile_normalizes_multi_line_input() {
        let result = QueryReconciler::reconcile("SELECT a,\nb\nFROM t1", "SELECT b FROM t2").unwrap();
        assert_eq!(result.query1, "SELECT b FROM (SELECT a, b FROM t1) AS q1");
    }

    #[test]
    fn reconcile_disjoint_fields_is_degenerate_but_ok() {
        let result =
            QueryReconciler::reconcile("SELECT a FROM t1", "SELECT b FROM t2").unwrap();
        assert!(!result.has_common_fields());
        assert_eq!(result.query1, "SELECT  FROM (SELECT a FROM t1) AS q1");
    }

    #[test]
    fn reconcile_aborts_when_first_query_is_blocked() {
        let err =
            QueryReconciler::reconcile("DROP TABLE t1", "SELECT a FROM t2").unwrap_err();
        assert!(matches!(err, ReconcileError::Blocked { ref alias, .. } if alias == "q1"));
    }

    #[test]
    fn reconcile_aborts_when_second_query_is_blocked() {
        let err =
            QueryReconciler::reconcile("SELECT a FROM t1", "DELETE FROM t2").unwrap_err();
        assert!(matches!(err, ReconcileError::Blocked { ref alias, .. } if alias == "q2"));
    }
}
