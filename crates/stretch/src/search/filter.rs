//! 🧹 Filter DSL. Terms, ranges, exists, missing, glued together with and/or/not.
//!
//! ```text
//! Filter::new().terms("user", ["kimchy", "elasticsearch"])   → {"terms":{"user":[...]}}
//! Filter::range().field("forks").from("100")               → {"range":{"forks":{"from":"100"}}}
//! Filter::new().not().exists("repository.name")            → {"not":{"exists":{"field":...}}}
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use super::query::Query;

/// 🧹 One filter operation. Several kinds may live in the same op; each becomes its own key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    current_field: Option<String>,
    negated: bool,
    terms: BTreeMap<String, Vec<Value>>,
    range: BTreeMap<String, BTreeMap<String, String>>,
    exists: Option<String>,
    missing: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📏 Start a range filter. Pick the field with [`Filter::field`], then bound it.
    pub fn range() -> Self {
        Self::default()
    }

    /// 📏 Select the field that subsequent `from`/`to` calls bound.
    pub fn field(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.range.entry(field.clone()).or_default();
        self.current_field = Some(field);
        self
    }

    /// Lower bound. Without a selected field this is a no-op, since there is nothing to bound.
    pub fn from(self, from: impl Into<String>) -> Self {
        self.bound("from", from.into())
    }

    pub fn to(self, to: impl Into<String>) -> Self {
        self.bound("to", to.into())
    }

    fn bound(mut self, edge: &str, value: String) -> Self {
        if let Some(field) = self.current_field.as_ref() {
            self.range
                .entry(field.clone())
                .or_default()
                .insert(edge.to_string(), value);
        }
        self
    }

    /// 🎯 Match any of `values` on `field`. Repeated calls for the same field append.
    pub fn terms<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.terms
            .entry(field.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn exists(mut self, field: impl Into<String>) -> Self {
        self.exists = Some(field.into());
        self
    }

    pub fn missing(mut self, field: impl Into<String>) -> Self {
        self.missing = Some(field.into());
        self
    }

    /// 🙃 Negate the whole op when it lands in a [`FilterWrap`].
    pub fn not(mut self) -> Self {
        self.negated = true;
        self
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// The op body, without the `not` wrapper.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        if !self.terms.is_empty() {
            body.insert("terms".to_string(), json!(self.terms));
        }
        if !self.range.is_empty() {
            body.insert("range".to_string(), json!(self.range));
        }
        if let Some(field) = &self.exists {
            body.insert("exists".to_string(), json!({ "field": field }));
        }
        if let Some(field) = &self.missing {
            body.insert("missing".to_string(), json!({ "field": field }));
        }
        Value::Object(body)
    }
}

/// 🔀 The logic operator a group of clauses hangs under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogicClause {
    #[default]
    And,
    Or,
    Not,
}

impl LogicClause {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicClause::And => "and",
            LogicClause::Or => "or",
            LogicClause::Not => "not",
        }
    }
}

/// 🧩 Anything that can be fed to [`FilterWrap::add`]: a logic switch, a filter, or a query.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    Logic(LogicClause),
    Op(Filter),
    Query(Query),
}

impl From<LogicClause> for FilterClause {
    fn from(clause: LogicClause) -> Self {
        FilterClause::Logic(clause)
    }
}

impl From<Filter> for FilterClause {
    fn from(filter: Filter) -> Self {
        FilterClause::Op(filter)
    }
}

impl From<Query> for FilterClause {
    fn from(query: Query) -> Self {
        FilterClause::Query(query)
    }
}

/// 🧩 Filters grouped under logic operators.
///
/// A logic clause switches the group for every clause added after it. The group
/// starts out as `and`. Calling `add` again keeps the current group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterWrap {
    groups: BTreeMap<LogicClause, Vec<Value>>,
    current: LogicClause,
}

impl FilterWrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I, C>(&mut self, clauses: I) -> &mut Self
    where
        I: IntoIterator<Item = C>,
        C: Into<FilterClause>,
    {
        for clause in clauses {
            match clause.into() {
                FilterClause::Logic(logic) => self.current = logic,
                FilterClause::Op(filter) => {
                    let entry = if filter.is_negated() {
                        json!({ "not": filter.to_json() })
                    } else {
                        filter.to_json()
                    };
                    self.groups.entry(self.current).or_default().push(entry);
                }
                FilterClause::Query(query) => {
                    self.groups
                        .entry(self.current)
                        .or_default()
                        .push(json!({ "query": query.to_json() }));
                }
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// A lone `and` group holding a single clause is sent as a bare array; `and` is
    /// the cluster default anyway. Everything else is an object keyed by operator.
    pub fn to_json(&self) -> Value {
        if self.groups.len() == 1 {
            if let Some(and_group) = self.groups.get(&LogicClause::And) {
                if and_group.len() == 1 {
                    return Value::Array(and_group.clone());
                }
            }
        }
        let mut body = Map::new();
        for (logic, entries) in &self.groups {
            body.insert(logic.as_str().to_string(), Value::Array(entries.clone()));
        }
        Value::Object(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_terms_collect_every_value() {
        let filter = Filter::new().terms("user", ["kimchy", "elasticsearch"]);
        assert_eq!(
            filter.to_json(),
            json!({"terms": {"user": ["kimchy", "elasticsearch"]}})
        );
    }

    #[test]
    fn the_one_where_a_range_remembers_its_field() {
        let filter = Filter::range()
            .field("@timestamp")
            .from("2012-12-29T16:52:48+00:00")
            .to("2012-12-29T17:52:48+00:00");
        assert_eq!(
            filter.to_json(),
            json!({"range": {"@timestamp": {
                "from": "2012-12-29T16:52:48+00:00",
                "to": "2012-12-29T17:52:48+00:00"
            }}})
        );
    }

    #[test]
    fn the_one_where_from_without_a_field_does_nothing() {
        assert_eq!(Filter::range().from("1").to_json(), json!({}));
    }

    #[test]
    fn the_one_where_a_single_and_clause_is_a_bare_array() {
        let mut wrap = FilterWrap::new();
        wrap.add([Filter::new().exists("repository.name")]);
        assert_eq!(
            wrap.to_json(),
            json!([{"exists": {"field": "repository.name"}}])
        );
    }

    #[test]
    fn the_one_where_two_filters_default_to_and() {
        let mut wrap = FilterWrap::new();
        wrap.add([
            Filter::new().terms("actor_attributes.location", ["portland"]),
            Filter::new().terms("repository.has_wiki", [true]),
        ]);
        assert_eq!(
            wrap.to_json(),
            json!({"and": [
                {"terms": {"actor_attributes.location": ["portland"]}},
                {"terms": {"repository.has_wiki": [true]}}
            ]})
        );
    }

    #[test]
    fn the_one_where_or_switches_the_group_for_what_follows() {
        let mut wrap = FilterWrap::new();
        wrap.add([
            FilterClause::from(LogicClause::Or),
            Filter::new().terms("actor_attributes.location", ["portland"]).into(),
            Filter::new().missing("repository.name").into(),
        ]);
        assert_eq!(
            wrap.to_json(),
            json!({"or": [
                {"terms": {"actor_attributes.location": ["portland"]}},
                {"missing": {"field": "repository.name"}}
            ]})
        );
    }

    #[test]
    fn the_one_where_not_and_query_clauses_get_wrapped() {
        let mut wrap = FilterWrap::new();
        wrap.add([
            FilterClause::from(Filter::new().terms("actor_attributes.location", ["portland"])),
            Filter::new().not().terms("repository.has_wiki", [true]).into(),
            Query::search("add").into(),
        ]);
        assert_eq!(
            wrap.to_json(),
            json!({"and": [
                {"terms": {"actor_attributes.location": ["portland"]}},
                {"not": {"terms": {"repository.has_wiki": [true]}}},
                {"query": {"query_string": {"query": "add"}}}
            ]})
        );
    }

    #[test]
    fn the_one_where_a_second_add_keeps_piling_on() {
        let mut wrap = FilterWrap::new();
        wrap.add([Filter::new().terms("a", [1])]);
        wrap.add([Filter::new().terms("b", [2])]);
        assert_eq!(
            wrap.to_json(),
            json!({"and": [{"terms": {"a": [1]}}, {"terms": {"b": [2]}}]})
        );
    }
}
