//! Batched GraphQL query construction and response demultiplexing
//!
//! Every due GitHub entity becomes one aliased field in a single query:
//!
//! ```text
//! query { r0: repository(owner: "o", name: "r") { i0: issue(number: 1) { ... } p0: pullRequest(number: 2) { ... } } }
//! ```
//!
//! Scopes get `r{N}` in first-seen order. Inside a scope issues are
//! numbered `i0, i1, ...` and pulls `p0, p1, ...` independently. The alias
//! map sends each `(r, item)` pair back to the index of the reference that
//! asked for it.

use crate::entity::EntityRef;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

const ISSUE_FIELDS: &str = "state title author { login } updatedAt assignees(first: 10) { nodes { login } }";
const PULL_EXTRA_FIELDS: &str = "reviewDecision statusCheckRollup { state }";

// Issue.state and PullRequest.state are different enums, so inside one
// union selection each fragment has to name its state field differently.
const UNION_ISSUE_FIELDS: &str =
    "issueState: state title author { login } updatedAt assignees(first: 10) { nodes { login } }";
const UNION_PULL_FIELDS: &str =
    "pullState: state title author { login } updatedAt assignees(first: 10) { nodes { login } }";

/// (scope alias, item alias)
pub type AliasKey = (String, String);

/// One combined query plus the map needed to read its response
#[derive(Debug, Clone)]
pub struct BatchQuery {
    text: String,
    aliases: BTreeMap<AliasKey, usize>,
    scope_count: usize,
}

impl BatchQuery {
    /// Build the query for `refs`. References whose scope is not
    /// `owner/repo` are left out and logged.
    pub fn build(refs: &[EntityRef]) -> Self {
        // first-seen scope order, explicit rather than map order
        let mut scopes: Vec<(&str, &str, Vec<usize>)> = Vec::new();
        for (index, entity) in refs.iter().enumerate() {
            let Some((owner, repo)) = entity.scope.split_once('/') else {
                tracing::warn!(scope = %entity.scope, "not an owner/repo scope, skipping");
                continue;
            };
            match scopes.iter_mut().find(|(o, r, _)| *o == owner && *r == repo) {
                Some((_, _, members)) => members.push(index),
                None => scopes.push((owner, repo, vec![index])),
            }
        }

        let mut aliases = BTreeMap::new();
        if scopes.is_empty() {
            return Self {
                text: "query { }".to_string(),
                aliases,
                scope_count: 0,
            };
        }

        let mut text = String::from("query {");
        for (scope_index, (owner, repo, members)) in scopes.iter().enumerate() {
            let scope_alias = format!("r{}", scope_index);
            text.push_str(&format!(
                " {}: repository(owner: {}, name: {}) {{",
                scope_alias,
                quote(owner),
                quote(repo)
            ));

            let mut issues = 0;
            let mut pulls = 0;
            for &index in members {
                let entity = &refs[index];
                let item_alias = match entity.sub_kind.as_str() {
                    "issue" => {
                        let alias = format!("i{}", issues);
                        issues += 1;
                        text.push_str(&format!(
                            " {}: issue(number: {}) {{ {} }}",
                            alias, entity.local_id, ISSUE_FIELDS
                        ));
                        alias
                    }
                    "pull" => {
                        let alias = format!("p{}", pulls);
                        pulls += 1;
                        text.push_str(&format!(
                            " {}: pullRequest(number: {}) {{ {} {} }}",
                            alias, entity.local_id, ISSUE_FIELDS, PULL_EXTRA_FIELDS
                        ));
                        alias
                    }
                    // kind still unknown: ask for whichever it turns out to be
                    _ => {
                        let alias = format!("p{}", pulls);
                        pulls += 1;
                        text.push_str(&format!(
                            " {}: issueOrPullRequest(number: {}) {{ __typename ... on Issue {{ {} }} ... on PullRequest {{ {} {} }} }}",
                            alias, entity.local_id, UNION_ISSUE_FIELDS, UNION_PULL_FIELDS, PULL_EXTRA_FIELDS
                        ));
                        alias
                    }
                };
                aliases.insert((scope_alias.clone(), item_alias), index);
            }
            text.push_str(" }");
        }
        text.push_str(" }");

        Self {
            text,
            aliases,
            scope_count: scopes.len(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn aliases(&self) -> &BTreeMap<AliasKey, usize> {
        &self.aliases
    }

    pub fn scope_count(&self) -> usize {
        self.scope_count
    }

    /// Number of item fields in the query
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Walk `data.<scope>.<item>` and map each leaf back to its reference
    /// index. Unknown aliases are skipped. Every requested alias that did
    /// not come back as a decodable leaf (null leaf, absent leaf, null
    /// scope block, no `data` at all) lands in `missing`. A top-level
    /// `errors` array is reported but never blocks the partial data.
    pub fn decode(&self, response: &Value) -> DecodedBatch {
        let mut decoded = DecodedBatch::default();

        if let Some(errors) = response.get("errors").and_then(Value::as_array) {
            decoded.errors = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map(String::from)
                        .unwrap_or_else(|| e.to_string())
                })
                .collect();
        }

        let data = response.get("data").and_then(Value::as_object);
        for (scope_alias, scope_value) in data.into_iter().flatten() {
            let Some(items) = scope_value.as_object() else {
                continue;
            };
            for (item_alias, item_value) in items {
                let key = (scope_alias.clone(), item_alias.clone());
                let Some(&index) = self.aliases.get(&key) else {
                    tracing::debug!(scope = %scope_alias, item = %item_alias, "unknown alias ignored");
                    continue;
                };
                if item_value.is_null() {
                    decoded.missing.push(index);
                    continue;
                }
                match ItemPayload::deserialize(item_value) {
                    Ok(payload) => decoded.items.push((index, payload)),
                    Err(e) => {
                        tracing::warn!(scope = %scope_alias, item = %item_alias, error = %e, "undecodable item");
                        decoded.missing.push(index);
                    }
                }
            }
        }

        for &index in self.aliases.values() {
            let seen = decoded.items.iter().any(|(i, _)| *i == index) || decoded.missing.contains(&index);
            if !seen {
                decoded.missing.push(index);
            }
        }

        decoded.items.sort_by_key(|(index, _)| *index);
        decoded.missing.sort_unstable();
        decoded
    }
}

/// GraphQL string literal; JSON string escaping is compatible
fn quote(raw: &str) -> String {
    serde_json::to_string(raw).unwrap_or_else(|_| format!("\"{}\"", raw))
}

/// Demultiplexed response
#[derive(Debug, Default)]
pub struct DecodedBatch {
    /// (reference index, payload), ordered by index
    pub items: Vec<(usize, ItemPayload)>,
    /// References that got no decodable leaf back
    pub missing: Vec<usize>,
    /// Messages from the top-level `errors` array
    pub errors: Vec<String>,
}

/// One item leaf as GitHub returns it
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPayload {
    #[serde(rename = "__typename", default)]
    pub typename: Option<String>,
    /// `issueState`/`pullState` when the kind was not known up front
    #[serde(default, alias = "issueState", alias = "pullState")]
    pub state: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<Login>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub assignees: Option<Nodes>,
    #[serde(default)]
    pub review_decision: Option<String>,
    #[serde(default)]
    pub status_check_rollup: Option<Rollup>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Login {
    #[serde(default)]
    pub login: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Nodes {
    #[serde(default)]
    pub nodes: Vec<Option<Login>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Rollup {
    #[serde(default)]
    pub state: Option<String>,
}
