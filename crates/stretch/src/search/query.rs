//! 🔍 Query DSL. Match everything, or hand a query string to the cluster and hope.

use serde_json::{Value, json};

use super::filter::Filter;

#[derive(Debug, Clone, PartialEq)]
enum QueryKind {
    MatchAll,
    QueryString { query: String, fields: Vec<String> },
}

/// 🔍 A query, optionally narrowed by a range-style [`Filter`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    kind: QueryKind,
    filter: Option<Filter>,
}

impl Default for Query {
    fn default() -> Self {
        Self::all()
    }
}

impl Query {
    /// Every document. The "I'll know it when I see it" of queries.
    pub fn all() -> Self {
        Self {
            kind: QueryKind::MatchAll,
            filter: None,
        }
    }

    /// 🔍 Lucene query-string search across the default field.
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            kind: QueryKind::QueryString {
                query: text.into(),
                fields: Vec::new(),
            },
            filter: None,
        }
    }

    /// 🎯 Restrict a query-string search to `fields`. Turns a match-all into a `*` search.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.kind = match self.kind {
            QueryKind::QueryString { query, .. } => QueryKind::QueryString { query, fields },
            QueryKind::MatchAll => QueryKind::QueryString {
                query: "*".to_string(),
                fields,
            },
        };
        self
    }

    /// 📏 Narrow the query with a filter, usually a [`Filter::range`].
    pub fn range(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// The query body. With a range attached it becomes a `filtered` query.
    pub fn to_json(&self) -> Value {
        let inner = match &self.kind {
            QueryKind::MatchAll => json!({ "match_all": {} }),
            QueryKind::QueryString { query, fields } if fields.is_empty() => {
                json!({ "query_string": { "query": query } })
            }
            QueryKind::QueryString { query, fields } => {
                json!({ "query_string": { "query": query, "fields": fields } })
            }
        };
        match &self.filter {
            Some(filter) => json!({ "filtered": { "query": inner, "filter": filter.to_json() } }),
            None => inner,
        }
    }
}
