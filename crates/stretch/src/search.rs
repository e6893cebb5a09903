//! 🔎 Search: build a `_search` request, send it through a [`Transport`], decode the hits.
//!
//! ```text
//! Search::new("github")
//!     .size(25)
//!     .filter([Filter::range().field("repository.forks").from("100")])
//!     .result(&transport)
//!     .await?
//! ```

use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value, json};
use tracing::debug;

pub mod filter;
pub mod query;

pub use filter::{Filter, FilterClause, FilterWrap, LogicClause};
pub use query::Query;

use crate::error::{Result, StretchError};
use crate::transport::{Method, Transport, decode_json};

/// 🔎 A search request against one index (and optionally one type).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Search {
    index: String,
    doc_type: Option<String>,
    pretty: bool,
    from: Option<u64>,
    size: Option<u64>,
    query: Option<Query>,
    filter: Option<FilterWrap>,
}

impl Search {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            ..Default::default()
        }
    }

    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// ✨ Ask the cluster to indent its answer. Humans like this. Parsers do not care.
    pub fn pretty(mut self) -> Self {
        self.pretty = true;
        self
    }

    pub fn from(mut self, from: u64) -> Self {
        self.from = Some(from);
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    /// Shorthand for `.query(Query::search(text))`.
    pub fn search(self, text: impl Into<String>) -> Self {
        self.query(Query::search(text))
    }

    /// 🧹 Add filter clauses. Repeated calls keep adding to the same [`FilterWrap`].
    pub fn filter<I, C>(mut self, clauses: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<FilterClause>,
    {
        self.filter.get_or_insert_with(FilterWrap::new).add(clauses);
        self
    }

    /// 🔗 `/<index>[/<type>]/_search[?pretty=1]`
    pub fn path(&self) -> String {
        let mut path = format!("/{}", self.index);
        if let Some(doc_type) = &self.doc_type {
            path.push('/');
            path.push_str(doc_type);
        }
        path.push_str("/_search");
        if self.pretty {
            path.push_str("?pretty=1");
        }
        path
    }

    /// The request body. Unset knobs are left out so the cluster's defaults apply.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        if let Some(from) = self.from {
            body.insert("from".to_string(), json!(from));
        }
        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }
        if let Some(query) = &self.query {
            body.insert("query".to_string(), query.to_json());
        }
        if let Some(filter) = self.filter.as_ref().filter(|wrap| !wrap.is_empty()) {
            body.insert("filter".to_string(), filter.to_json());
        }
        Value::Object(body)
    }

    /// 🚀 Run the search.
    pub async fn result(&self, transport: &dyn Transport) -> Result<SearchResult> {
        let path = self.path();
        let body = serde_json::to_vec(&self.to_json()).map_err(StretchError::Encoding)?;
        debug!("🔎 searching {} with a {} byte body", path, body.len());
        let raw = transport.execute(Method::POST, &path, Some(body)).await?;
        decode_json(&raw)
    }
}

/// 📬 What came back.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchResult {
    pub took: u64,
    pub timed_out: bool,
    pub hits: Hits,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Hits {
    #[serde(deserialize_with = "total_hits")]
    pub total: u64,
    pub max_score: Option<f64>,
    pub hits: Vec<Hit>,
}

impl Hits {
    /// How many hits came back in this page, as opposed to `total` matching overall.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_type")]
    pub doc_type: Option<String>,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: Option<f64>,
    #[serde(rename = "_source")]
    pub source: Option<Value>,
}

// -- 🔢 Old clusters: `"total": 483`. New clusters: `"total": {"value": 483, "relation": "eq"}`.
fn total_hits<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Total {
        Count(u64),
        Tracked { value: u64 },
    }

    Ok(match Total::deserialize(deserializer)? {
        Total::Count(count) => count,
        Total::Tracked { value } => value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ConnectionConfig, HttpTransport};
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn the_one_where_the_path_grows_with_type_and_pretty() {
        assert_eq!(Search::new("github").path(), "/github/_search");
        assert_eq!(
            Search::new("github").doc_type("event").pretty().path(),
            "/github/event/_search?pretty=1"
        );
    }

    #[test]
    fn the_one_where_an_empty_search_has_an_empty_body() {
        assert_eq!(Search::new("github").to_json(), json!({}));
    }

    #[test]
    fn the_one_where_two_filter_calls_share_one_wrap() {
        let search = Search::new("github")
            .filter([Filter::new().terms("actor_attributes.location", ["portland"])])
            .filter([Filter::new().terms("repository.has_wiki", [true])]);
        assert_eq!(
            search.to_json(),
            json!({"filter": {"and": [
                {"terms": {"actor_attributes.location": ["portland"]}},
                {"terms": {"repository.has_wiki": [true]}}
            ]}})
        );
    }

    #[test]
    fn the_one_where_both_total_shapes_decode() {
        let old: SearchResult =
            serde_json::from_str(r#"{"took":3,"hits":{"total":483,"hits":[]}}"#).expect("💀 old");
        let new: SearchResult = serde_json::from_str(
            r#"{"took":3,"hits":{"total":{"value":483,"relation":"eq"},"max_score":1.0,"hits":[]}}"#,
        )
        .expect("💀 new");
        assert_eq!(old.hits.total, 483);
        assert_eq!(new.hits.total, 483);
        assert_eq!(new.hits.max_score, Some(1.0));
    }

    #[tokio::test]
    async fn the_one_where_a_range_filtered_search_round_trips() -> Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/github/_search"))
            .and(query_param("pretty", "1"))
            .and(body_json(json!({
                "size": 25,
                "query": {"match_all": {}},
                "filter": [{"range": {"repository.forks": {"from": "100"}}}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"took":7,"timed_out":false,"hits":{"total":686,"max_score":1.0,
                    "hits":[{"_index":"github","_type":"event","_id":"1","_score":1.0,
                             "_source":{"repository":{"forks":120}}}]}}"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(ConnectionConfig {
            url: server.uri(),
            ..Default::default()
        })?;
        let result = Search::new("github")
            .pretty()
            .size(25)
            .query(Query::all())
            .filter([Filter::range().field("repository.forks").from("100")])
            .result(&transport)
            .await?;

        assert_eq!(result.took, 7);
        assert_eq!(result.hits.total, 686);
        assert_eq!(result.hits.len(), 1);
        let hit = &result.hits.hits[0];
        assert_eq!(hit.id, "1");
        assert_eq!(hit.doc_type.as_deref(), Some("event"));
        assert_eq!(hit.source.as_ref().map(|s| s["repository"]["forks"].clone()), Some(json!(120)));
        Ok(())
    }
}
