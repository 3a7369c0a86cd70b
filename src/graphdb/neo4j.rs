//! Neo4j over its HTTP transactional Cypher endpoint.
//!
//! Every call is one auto-commit transaction posted to
//! `<url>/db/<database>/tx/commit`. Labels, relationship types and property
//! names are validated and back-quoted; all values travel as parameters.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::{Value as Json, json};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::KiraError;
use crate::graph::{Edge, KeyValue, NodeRef, Properties};
use crate::graphdb::{GraphStore, quote_identifier};

#[derive(Clone)]
pub struct Neo4jHttpStore {
    client: Client,
    endpoint: String,
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct Row {
    row: Vec<Json>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

impl Neo4jHttpStore {
    pub fn new(config: &StoreConfig, timeout: Duration) -> Result<Self, KiraError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-bg/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| KiraError::StoreHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|err| KiraError::StoreHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: Self::commit_url(&config.url, &config.database),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    pub fn commit_url(base: &str, database: &str) -> String {
        format!("{}/db/{database}/tx/commit", base.trim_end_matches('/'))
    }

    fn execute(&self, statement: &str, parameters: Json) -> Result<Vec<Vec<Json>>, KiraError> {
        debug!(statement, "cypher");
        let body = json!({
            "statements": [{ "statement": statement, "parameters": parameters }]
        });
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|err| KiraError::StoreHttp(err.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .map_err(|err| KiraError::StoreHttp(err.to_string()))?;
        decode_response(status, &text)
    }

    fn single_count(rows: &[Vec<Json>]) -> usize {
        rows.first()
            .and_then(|row| row.first())
            .and_then(Json::as_u64)
            .unwrap_or(0) as usize
    }
}

pub fn unique_index_statement(node: &NodeRef) -> Result<String, KiraError> {
    Ok(format!(
        "CREATE CONSTRAINT IF NOT EXISTS FOR (n:{}) REQUIRE n.{} IS UNIQUE",
        quote_identifier(&node.label)?,
        quote_identifier(&node.key)?
    ))
}

pub fn merge_nodes_statement(node: &NodeRef) -> Result<String, KiraError> {
    Ok(format!(
        "UNWIND $rows AS row MERGE (n:{} {{{}: row.key}}) SET n += row.props RETURN count(n)",
        quote_identifier(&node.label)?,
        quote_identifier(&node.key)?
    ))
}

pub fn resolve_nodes_statement(node: &NodeRef) -> Result<String, KiraError> {
    let key = quote_identifier(&node.key)?;
    Ok(format!(
        "UNWIND $keys AS key MATCH (n:{} {{{key}: key}}) RETURN DISTINCT n.{key}",
        quote_identifier(&node.label)?
    ))
}

pub fn merge_relationships_statement(
    rel_type: &str,
    start: &NodeRef,
    end: &NodeRef,
) -> Result<String, KiraError> {
    Ok(format!(
        "UNWIND $rows AS row \
         MATCH (a:{} {{{}: row.start}}) \
         MATCH (b:{} {{{}: row.end}}) \
         MERGE (a)-[r:{}]->(b) SET r += row.props RETURN count(r)",
        quote_identifier(&start.label)?,
        quote_identifier(&start.key)?,
        quote_identifier(&end.label)?,
        quote_identifier(&end.key)?,
        quote_identifier(rel_type)?
    ))
}

/// Rows of the first statement, or the first reported error.
fn decode_response(status: u16, body: &str) -> Result<Vec<Vec<Json>>, KiraError> {
    if !(200..300).contains(&status) {
        let message = if body.is_empty() {
            "graph store request failed".to_string()
        } else {
            body.to_string()
        };
        return Err(KiraError::StoreStatus { status, message });
    }
    let parsed: TxResponse =
        serde_json::from_str(body).map_err(|err| KiraError::StoreHttp(err.to_string()))?;
    if let Some(error) = parsed.errors.into_iter().next() {
        return Err(KiraError::StoreStatement {
            code: error.code,
            message: error.message,
        });
    }
    Ok(parsed
        .results
        .into_iter()
        .next()
        .map(|result| result.data.into_iter().map(|row| row.row).collect())
        .unwrap_or_default())
}

fn decode_keys(rows: Vec<Vec<Json>>) -> HashSet<KeyValue> {
    rows.into_iter()
        .filter_map(|mut row| {
            if row.is_empty() {
                return None;
            }
            serde_json::from_value::<KeyValue>(row.swap_remove(0)).ok()
        })
        .collect()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Json, KiraError> {
    serde_json::to_value(value).map_err(|err| KiraError::StoreStatement {
        code: "Client.Serialization".to_string(),
        message: err.to_string(),
    })
}

impl GraphStore for Neo4jHttpStore {
    fn ensure_unique_index(&self, node: &NodeRef) -> Result<(), KiraError> {
        self.execute(&unique_index_statement(node)?, json!({}))?;
        Ok(())
    }

    fn merge_nodes(&self, node: &NodeRef, records: &[Properties]) -> Result<usize, KiraError> {
        let statement = merge_nodes_statement(node)?;
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            for name in record.keys() {
                quote_identifier(name)?;
            }
            let key = record.get(&node.key).ok_or_else(|| KiraError::MissingKey {
                label: node.label.clone(),
                key: node.key.clone(),
            })?;
            rows.push(json!({ "key": to_json(key)?, "props": to_json(record)? }));
        }
        let result = self.execute(&statement, json!({ "rows": rows }))?;
        Ok(Self::single_count(&result))
    }

    fn resolve_nodes(
        &self,
        node: &NodeRef,
        keys: &[KeyValue],
    ) -> Result<HashSet<KeyValue>, KiraError> {
        let result = self.execute(&resolve_nodes_statement(node)?, json!({ "keys": to_json(&keys)? }))?;
        Ok(decode_keys(result))
    }

    fn merge_relationships(
        &self,
        rel_type: &str,
        start: &NodeRef,
        end: &NodeRef,
        edges: &[Edge],
    ) -> Result<usize, KiraError> {
        let statement = merge_relationships_statement(rel_type, start, end)?;
        let mut rows = Vec::with_capacity(edges.len());
        for edge in edges {
            for name in edge.properties.keys() {
                quote_identifier(name)?;
            }
            rows.push(json!({
                "start": to_json(&edge.start)?,
                "end": to_json(&edge.end)?,
                "props": to_json(&edge.properties)?,
            }));
        }
        let result = self.execute(&statement, json!({ "rows": rows }))?;
        Ok(Self::single_count(&result))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use assert_matches::assert_matches;

    use super::*;
    use crate::graphdb::RetryPolicy;

    #[test]
    fn decodes_rows_of_first_statement() {
        let body = r#"{"results":[{"columns":["count(n)"],"data":[{"row":[3],"meta":[null]}]}],"errors":[]}"#;
        let rows = decode_response(200, body).unwrap();
        assert_eq!(Neo4jHttpStore::single_count(&rows), 3);

        let empty = decode_response(200, r#"{"results":[],"errors":[]}"#).unwrap();
        assert_eq!(Neo4jHttpStore::single_count(&empty), 0);
    }

    #[test]
    fn resolved_keys_keep_integer_and_string_forms() {
        let body = r#"{"results":[{"columns":["n.sid"],"data":[
            {"row":[9606]},{"row":["P04637"]},{"row":[]},{"row":[1.5]}
        ]}],"errors":[]}"#;
        let keys = decode_keys(decode_response(200, body).unwrap());
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&KeyValue::Int(9606)));
        assert!(keys.contains(&KeyValue::from("P04637")));
        assert!(!keys.contains(&KeyValue::from("9606")));
    }

    #[test]
    fn deadlock_is_transient_and_retried() {
        let body = r#"{"results":[],"errors":[{"code":"Neo.TransientError.Transaction.DeadlockDetected","message":"deadlock"}]}"#;
        let err = decode_response(200, body).unwrap_err();
        assert_matches!(err, KiraError::StoreStatement { ref code, .. } if code.ends_with("DeadlockDetected"));
        assert!(err.is_transient());

        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let rows = policy
            .run("merge Gene", || {
                calls.set(calls.get() + 1);
                if calls.get() == 1 {
                    decode_response(200, body)
                } else {
                    decode_response(200, r#"{"results":[{"data":[{"row":[1]}]}],"errors":[]}"#)
                }
            })
            .unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(Neo4jHttpStore::single_count(&rows), 1);
    }

    #[test]
    fn syntax_error_is_not_retried() {
        let body = r#"{"results":[],"errors":[{"code":"Neo.ClientError.Statement.SyntaxError","message":"Invalid input"}]}"#;
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let err = policy
            .run("merge Gene", || {
                calls.set(calls.get() + 1);
                decode_response(200, body)
            })
            .unwrap_err();
        assert_matches!(err, KiraError::StoreStatement { ref code, .. } if code == "Neo.ClientError.Statement.SyntaxError");
        assert!(!err.is_transient());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn http_failures_map_to_status_errors() {
        let err = decode_response(503, "").unwrap_err();
        assert_matches!(err, KiraError::StoreStatus { status: 503, .. });
        assert!(err.is_transient());

        let err = decode_response(401, r#"{"errors":[{"code":"Neo.ClientError.Security.Unauthorized"}]}"#)
            .unwrap_err();
        assert_matches!(err, KiraError::StoreStatus { status: 401, .. });
        assert!(!err.is_transient());

        let err = decode_response(200, "<html>").unwrap_err();
        assert_matches!(err, KiraError::StoreHttp(_));
    }

    #[test]
    fn commit_url_strips_trailing_slash() {
        assert_eq!(
            Neo4jHttpStore::commit_url("http://localhost:7474/", "neo4j"),
            "http://localhost:7474/db/neo4j/tx/commit"
        );
    }

    #[test]
    fn statements_quote_identifiers() {
        let gene = NodeRef::new("Gene", "sid");
        assert_eq!(
            unique_index_statement(&gene).unwrap(),
            "CREATE CONSTRAINT IF NOT EXISTS FOR (n:`Gene`) REQUIRE n.`sid` IS UNIQUE"
        );
        assert_eq!(
            merge_nodes_statement(&gene).unwrap(),
            "UNWIND $rows AS row MERGE (n:`Gene` {`sid`: row.key}) SET n += row.props RETURN count(n)"
        );
        let statement =
            merge_relationships_statement("EXPRESSES", &NodeRef::new("GtexDetailedTissue", "name"), &gene)
                .unwrap();
        assert!(statement.contains("MERGE (a)-[r:`EXPRESSES`]->(b)"));
    }

    #[test]
    fn rejects_hostile_label() {
        let node = NodeRef::new("Gene) DETACH DELETE (n", "sid");
        assert!(merge_nodes_statement(&node).is_err());
    }
}
