//! Tag filter query language.
//!
//! Filters are JSON objects: `{"tag": "value"}` matches on equality,
//! `{"tag": {"$neq": "v"}}` (or `$gt $gte $lt $lte $like $in`) applies
//! an operator, and `$and $or $not $exist` combine or test presence.
//! Names prefixed with `~` refer to plaintext tags.

use crate::types::EncEntryTag;
use crate::*;
use serde_json::Value;

/// A tag name with its plaintext marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagName {
    /// name without the `~` marker
    pub name: String,
    /// whether this refers to a plaintext tag
    pub plaintext: bool,
}

impl TagName {
    fn parse(name: &str) -> Self {
        match name.strip_prefix('~') {
            Some(name) => Self {
                name: name.to_string(),
                plaintext: true,
            },
            None => Self {
                name: name.to_string(),
                plaintext: false,
            },
        }
    }
}

/// An encrypted tag name as matched by backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncTagName {
    /// encrypted name
    pub name: Vec<u8>,
    /// whether this refers to a plaintext tag
    pub plaintext: bool,
}

/// Comparison operators on a single tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=`, the tag must be present
    Neq,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// SQL `LIKE`
    Like,
}

impl CompareOp {
    /// Whether this operator needs ordered or pattern access to the value.
    pub fn requires_plaintext(&self) -> bool {
        !matches!(self, Self::Eq | Self::Neq)
    }

    /// SQL operator text.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Like => "LIKE",
        }
    }

    fn from_op(op: &str) -> Option<Self> {
        Some(match op {
            "$neq" => Self::Neq,
            "$gt" => Self::Gt,
            "$gte" => Self::Gte,
            "$lt" => Self::Lt,
            "$lte" => Self::Lte,
            "$like" => Self::Like,
            _ => return None,
        })
    }
}

/// Query tree, generic over name and value representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query<K, V> {
    /// all must match; empty matches everything
    And(Vec<Query<K, V>>),
    /// any must match; empty matches nothing
    Or(Vec<Query<K, V>>),
    /// negation
    Not(Box<Query<K, V>>),
    /// single tag comparison
    Compare(CompareOp, K, V),
    /// tag value in a set
    In(K, Vec<V>),
    /// all named tags present
    Exist(Vec<K>),
}

/// A parsed plaintext query.
pub type TagQuery = Query<TagName, String>;

/// A query with encrypted names and values, ready for a backend.
pub type EncTagQuery = Query<EncTagName, Vec<u8>>;

impl<K, V> Query<K, V> {
    /// Rewrite names and values. `value` receives the operator, the
    /// already mapped name and the value.
    pub fn try_map<K2, V2, FK, FV>(
        self,
        key: &mut FK,
        value: &mut FV,
    ) -> AskarResult<Query<K2, V2>>
    where
        FK: FnMut(K) -> AskarResult<K2>,
        FV: FnMut(Option<CompareOp>, &K2, V) -> AskarResult<V2>,
    {
        Ok(match self {
            Self::And(list) => Query::And(
                list.into_iter()
                    .map(|q| q.try_map(key, value))
                    .collect::<AskarResult<_>>()?,
            ),
            Self::Or(list) => Query::Or(
                list.into_iter()
                    .map(|q| q.try_map(key, value))
                    .collect::<AskarResult<_>>()?,
            ),
            Self::Not(q) => Query::Not(Box::new(q.try_map(key, value)?)),
            Self::Compare(op, k, v) => {
                let k = key(k)?;
                let v = value(Some(op), &k, v)?;
                Query::Compare(op, k, v)
            }
            Self::In(k, vs) => {
                let k = key(k)?;
                let vs = vs
                    .into_iter()
                    .map(|v| value(None, &k, v))
                    .collect::<AskarResult<_>>()?;
                Query::In(k, vs)
            }
            Self::Exist(ks) => Query::Exist(
                ks.into_iter()
                    .map(&mut *key)
                    .collect::<AskarResult<_>>()?,
            ),
        })
    }
}

/// A tag filter as accepted by sessions and scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub(crate) query: TagQuery,
}

impl TagFilter {
    /// The underlying query.
    pub fn query(&self) -> &TagQuery {
        &self.query
    }

    /// Consume into the underlying query.
    pub fn into_query(self) -> TagQuery {
        self.query
    }

    /// All of the filters.
    pub fn all_of(filters: Vec<TagFilter>) -> Self {
        Self {
            query: Query::And(filters.into_iter().map(|f| f.query).collect()),
        }
    }

    /// Any of the filters.
    pub fn any_of(filters: Vec<TagFilter>) -> Self {
        Self {
            query: Query::Or(filters.into_iter().map(|f| f.query).collect()),
        }
    }

    /// Negate a filter.
    pub fn negate(filter: TagFilter) -> Self {
        Self {
            query: Query::Not(Box::new(filter.query)),
        }
    }

    /// Compare a tag.
    pub fn compare(op: CompareOp, name: &str, value: impl Into<String>) -> Self {
        Self {
            query: Query::Compare(op, TagName::parse(name), value.into()),
        }
    }

    /// Tag equality.
    pub fn is_eq(name: &str, value: impl Into<String>) -> Self {
        Self::compare(CompareOp::Eq, name, value)
    }

    /// Tag value within a set.
    pub fn is_in(name: &str, values: Vec<String>) -> Self {
        Self {
            query: Query::In(TagName::parse(name), values),
        }
    }

    /// Presence of tags.
    pub fn exist(names: &[&str]) -> Self {
        Self {
            query: Query::Exist(names.iter().map(|n| TagName::parse(n)).collect()),
        }
    }

    /// Parse a JSON value.
    pub fn from_value(value: &Value) -> AskarResult<Self> {
        Ok(Self {
            query: parse_object(value)?,
        })
    }
}

impl std::str::FromStr for TagFilter {
    type Err = OneErr;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| err_input(format!("invalid tag filter JSON: {e}")))?;
        Self::from_value(&value)
    }
}

fn expect_str(value: &Value, ctx: &str) -> AskarResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        _ => Err(err_input(format!("{ctx} expects a string value"))),
    }
}

fn parse_object(value: &Value) -> AskarResult<TagQuery> {
    let map = match value {
        Value::Object(map) => map,
        _ => return Err(err_input("tag filter must be a JSON object")),
    };
    let mut clauses = Vec::with_capacity(map.len());
    for (key, value) in map {
        clauses.push(match key.as_str() {
            "$and" => Query::And(parse_list(value, "$and")?),
            "$or" => Query::Or(parse_list(value, "$or")?),
            "$not" => Query::Not(Box::new(parse_object(value)?)),
            "$exist" => Query::Exist(match value {
                Value::String(s) => vec![TagName::parse(s)],
                Value::Array(list) => list
                    .iter()
                    .map(|v| expect_str(v, "$exist").map(|s| TagName::parse(&s)))
                    .collect::<AskarResult<_>>()?,
                _ => return Err(err_input("$exist expects tag names")),
            }),
            op if op.starts_with('$') => {
                return Err(err_input(format!("unknown tag filter operator {op}")))
            }
            name => parse_tag_clause(TagName::parse(name), value)?,
        });
    }
    Ok(if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Query::And(clauses)
    })
}

fn parse_list(value: &Value, ctx: &str) -> AskarResult<Vec<TagQuery>> {
    match value {
        Value::Array(list) => list.iter().map(parse_object).collect(),
        // `{"$or": {"a": "1", "b": "2"}}` applies to each member
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| parse_tag_clause(TagName::parse(k), v))
            .collect(),
        _ => Err(err_input(format!("{ctx} expects a list of filters"))),
    }
}

fn parse_tag_clause(name: TagName, value: &Value) -> AskarResult<TagQuery> {
    match value {
        Value::String(s) => Ok(Query::Compare(CompareOp::Eq, name, s.clone())),
        Value::Object(ops) if ops.len() == 1 => {
            let (op, arg) = ops.iter().next().ok_or_else(|| err_input("empty operator"))?;
            if op == "$in" {
                let values = match arg {
                    Value::Array(list) => list
                        .iter()
                        .map(|v| expect_str(v, "$in"))
                        .collect::<AskarResult<_>>()?,
                    _ => return Err(err_input("$in expects a list of strings")),
                };
                return Ok(Query::In(name, values));
            }
            let op = CompareOp::from_op(op)
                .ok_or_else(|| err_input(format!("unknown tag operator {op}")))?;
            Ok(Query::Compare(op, name, expect_str(arg, "tag operator")?))
        }
        _ => Err(err_input(format!(
            "invalid filter clause for tag {}",
            name.name
        ))),
    }
}

/// SQL `LIKE` semantics: `%` any run, `_` any single character,
/// ASCII case-insensitive.
pub fn like_match(pattern: &str, value: &str) -> bool {
    let p: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let v: Vec<char> = value.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut pi, mut vi) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while vi < v.len() {
        if pi < p.len() && (p[pi] == '_' || (p[pi] != '%' && p[pi] == v[vi])) {
            pi += 1;
            vi += 1;
        } else if pi < p.len() && p[pi] == '%' {
            star = Some((pi, vi));
            pi += 1;
        } else if let Some((sp, sv)) = star {
            pi = sp + 1;
            vi = sv + 1;
            star = Some((sp, sv + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '%')
}

impl EncTagQuery {
    /// Evaluate against the encrypted tags of one record. Mirrors the
    /// semantics of the SQL translation used by the sqlite backend.
    pub fn matches(&self, tags: &[EncEntryTag]) -> bool {
        fn tag_named<'t>(
            tags: &'t [EncEntryTag],
            name: &'t EncTagName,
        ) -> impl Iterator<Item = &'t EncEntryTag> + 't {
            tags.iter()
                .filter(move |t| t.plaintext == name.plaintext && t.name == name.name)
        }
        match self {
            Query::And(list) => list.iter().all(|q| q.matches(tags)),
            Query::Or(list) => list.iter().any(|q| q.matches(tags)),
            Query::Not(q) => !q.matches(tags),
            Query::Compare(op, name, value) => tag_named(tags, name).any(|t| {
                let tv = &t.value[..];
                let v = &value[..];
                match op {
                    CompareOp::Eq => tv == v,
                    CompareOp::Neq => tv != v,
                    CompareOp::Gt => tv > v,
                    CompareOp::Gte => tv >= v,
                    CompareOp::Lt => tv < v,
                    CompareOp::Lte => tv <= v,
                    CompareOp::Like => like_match(
                        &String::from_utf8_lossy(v),
                        &String::from_utf8_lossy(tv),
                    ),
                }
            }),
            Query::In(name, values) => {
                tag_named(tags, name).any(|t| values.iter().any(|v| *v == t.value))
            }
            Query::Exist(names) => names.iter().all(|n| tag_named(tags, n).next().is_some()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn name(n: &str) -> TagName {
        TagName::parse(n)
    }

    #[test]
    fn parse_filters() {
        let f: TagFilter = r#"{"a": "1"}"#.parse().unwrap();
        assert_eq!(Query::Compare(CompareOp::Eq, name("a"), "1".into()), f.query);

        let f: TagFilter =
            r#"{"~b": {"$gt": "5"}, "$not": {"c": {"$in": ["x", "y"]}}}"#.parse().unwrap();
        assert_eq!(
            Query::And(vec![
                Query::Not(Box::new(Query::In(name("c"), vec!["x".into(), "y".into()]))),
                Query::Compare(
                    CompareOp::Gt,
                    TagName {
                        name: "b".into(),
                        plaintext: true
                    },
                    "5".into()
                ),
            ]),
            f.query
        );

        let f: TagFilter = r#"{"$or": [{"a": "1"}, {"$exist": ["b"]}]}"#.parse().unwrap();
        assert_eq!(
            Query::Or(vec![
                Query::Compare(CompareOp::Eq, name("a"), "1".into()),
                Query::Exist(vec![name("b")]),
            ]),
            f.query
        );

        let f: TagFilter = "{}".parse().unwrap();
        assert_eq!(Query::And(vec![]), f.query);

        for bad in [r#"{"a": 1}"#, r#"{"$foo": []}"#, r#"{"a": {"$nope": "1"}}"#, "[]"] {
            let err = bad.parse::<TagFilter>().unwrap_err();
            assert_eq!(ErrorKind::Input, err.kind(), "{bad}");
        }
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("a%", "abc"));
        assert!(like_match("%B%", "abc"));
        assert!(like_match("a_c", "abc"));
        assert!(!like_match("a_c", "abbc"));
        assert!(like_match("%", ""));
        assert!(!like_match("b%", "abc"));
        assert!(like_match("%c", "abcabc"));
    }

    #[test]
    fn eval_encrypted_query() {
        let tags = vec![
            EncEntryTag {
                name: b"n1".to_vec(),
                value: b"v1".to_vec(),
                plaintext: false,
            },
            EncEntryTag {
                name: b"n2".to_vec(),
                value: b"5".to_vec(),
                plaintext: true,
            },
        ];
        let n1 = EncTagName {
            name: b"n1".to_vec(),
            plaintext: false,
        };
        let n2 = EncTagName {
            name: b"n2".to_vec(),
            plaintext: true,
        };
        let q = EncTagQuery::Compare(CompareOp::Eq, n1.clone(), b"v1".to_vec());
        assert!(q.matches(&tags));
        let q = EncTagQuery::Compare(CompareOp::Neq, n1.clone(), b"v1".to_vec());
        assert!(!q.matches(&tags));
        let q = EncTagQuery::Compare(CompareOp::Gte, n2.clone(), b"4".to_vec());
        assert!(q.matches(&tags));
        // the plaintext marker is part of the name
        let q = EncTagQuery::Exist(vec![EncTagName {
            name: b"n2".to_vec(),
            plaintext: false,
        }]);
        assert!(!q.matches(&tags));
        assert!(EncTagQuery::And(vec![]).matches(&tags));
        assert!(!EncTagQuery::Or(vec![]).matches(&tags));
        let q = EncTagQuery::Not(Box::new(EncTagQuery::In(
            n1,
            vec![b"x".to_vec(), b"v1".to_vec()],
        )));
        assert!(!q.matches(&tags));
    }
}
