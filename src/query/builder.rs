use crate::error::{Result, ViewBaseError};
use crate::key::EmitKey;

use super::{QuerySpec, Shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Argument accepted by [`QueryBuilder::group`]: either a boolean toggle or a
/// numeric group level. Negative numbers are the only invalid input.
#[derive(Debug, Clone, Copy)]
pub enum GroupArg {
    Bool(bool),
    Level(f64),
}

impl From<bool> for GroupArg {
    fn from(b: bool) -> Self {
        GroupArg::Bool(b)
    }
}

impl From<i64> for GroupArg {
    fn from(n: i64) -> Self {
        GroupArg::Level(n as f64)
    }
}

impl From<f64> for GroupArg {
    fn from(n: f64) -> Self {
        GroupArg::Level(n)
    }
}

/// Fluent, consuming builder for a [`QuerySpec`]. Mirrors the "setters return
/// `Self`" shape used throughout the crate's query surface: every call is
/// independent of call order except for the documented shape precedence.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    view_name: String,
    key: Option<EmitKey>,
    keys: Option<Vec<EmitKey>>,
    prefix: Option<EmitKey>,
    range: Option<(EmitKey, EmitKey)>,
    start_doc_id: Option<String>,
    end_doc_id: Option<String>,
    reduce: bool,
    include_docs: bool,
    descending: bool,
    skip: i64,
    limit: i64,
    group_level: Option<usize>,
}

const DEFAULT_LIMIT: i64 = i64::MAX;

impl QueryBuilder {
    pub fn for_view(name: &str) -> Self {
        QueryBuilder {
            view_name: name.to_string(),
            key: None,
            keys: None,
            prefix: None,
            range: None,
            start_doc_id: None,
            end_doc_id: None,
            reduce: false,
            include_docs: false,
            descending: false,
            skip: 0,
            limit: DEFAULT_LIMIT,
            group_level: None,
        }
    }

    pub fn key<K: Into<EmitKey>>(mut self, key: K) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn keys<K: Into<EmitKey>>(mut self, keys: Vec<K>) -> Self {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn prefix<K: Into<EmitKey>>(mut self, prefix: K) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn range<K: Into<EmitKey>>(mut self, start: K, end: K) -> Self {
        self.range = Some((start.into(), end.into()));
        self
    }

    /// Refines the edges of a `range` query within equal emit keys.
    pub fn id_range(mut self, start_doc_id: impl Into<String>, end_doc_id: impl Into<String>) -> Self {
        self.start_doc_id = Some(start_doc_id.into());
        self.end_doc_id = Some(end_doc_id.into());
        self
    }

    pub fn skip(mut self, n: i64) -> Self {
        self.skip = n.max(0);
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = n.max(0);
        self
    }

    /// Enables returning the document snapshot alongside each row.
    pub fn include_docs(mut self) -> Self {
        self.include_docs = true;
        self
    }

    pub fn order(mut self, direction: Direction) -> Self {
        self.descending = direction == Direction::Descending;
        self
    }

    /// Enables reduction using the view's reduce function.
    pub fn reduce(mut self) -> Self {
        self.reduce = true;
        self
    }

    /// `true`/`0` groups by the full emit key; a positive number groups by that
    /// many leading emit-key parts; `false` clears grouping without touching
    /// `reduce`. Anything else (including negative numbers) is rejected.
    pub fn group<A: Into<GroupArg>>(mut self, arg: A) -> Result<Self> {
        match arg.into() {
            GroupArg::Bool(true) => {
                self.reduce = true;
                self.group_level = Some(0);
            }
            GroupArg::Bool(false) => {
                self.group_level = None;
            }
            GroupArg::Level(n) if n >= 0.0 => {
                self.reduce = true;
                self.group_level = Some(n.floor() as usize);
            }
            GroupArg::Level(n) => {
                return Err(ViewBaseError::InvalidGroupLevel(n.to_string()));
            }
        }
        Ok(self)
    }

    /// Materializes the specification, resolving the highest-priority shape
    /// that was set: `key` > `keys` > `prefix` > `range` > `scan`.
    pub fn get_params(&self) -> QuerySpec {
        let shape = if let Some(k) = &self.key {
            Shape::Key(k.clone())
        } else if let Some(ks) = &self.keys {
            Shape::Keys(ks.clone())
        } else if let Some(p) = &self.prefix {
            Shape::Prefix(p.clone())
        } else if let Some((s, e)) = &self.range {
            Shape::Range {
                start: s.clone(),
                end: e.clone(),
                start_doc_id: self.start_doc_id.clone(),
                end_doc_id: self.end_doc_id.clone(),
            }
        } else {
            Shape::Scan
        };

        QuerySpec {
            view_name: self.view_name.clone(),
            shape,
            reduce: self.reduce,
            include_docs: self.include_docs,
            descending: self.descending,
            skip: self.skip as usize,
            limit: if self.limit == DEFAULT_LIMIT {
                usize::MAX
            } else {
                self.limit as usize
            },
            group_level: self.group_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_precedence_key_wins() {
        let params = QueryBuilder::for_view("v")
            .prefix("a")
            .range("a", "z")
            .keys(vec!["a", "b"])
            .key("x")
            .get_params();
        assert_eq!(params.shape_name(), "key");
    }

    #[test]
    fn shape_precedence_falls_back_to_scan() {
        let params = QueryBuilder::for_view("v").get_params();
        assert_eq!(params.shape_name(), "scan");
    }

    #[test]
    fn group_true_sets_level_zero_and_reduce() {
        let params = QueryBuilder::for_view("v").group(true).unwrap().get_params();
        assert!(params.reduce);
        assert_eq!(params.group_level, Some(0));
    }

    #[test]
    fn group_pi_floors_to_three() {
        let params = QueryBuilder::for_view("v")
            .group(std::f64::consts::PI)
            .unwrap()
            .get_params();
        assert_eq!(params.group_level, Some(3));
        assert!(params.reduce);
    }

    #[test]
    fn group_negative_is_invalid() {
        let err = QueryBuilder::for_view("v").group(-1i64);
        assert!(matches!(err, Err(ViewBaseError::InvalidGroupLevel(_))));
    }

    #[test]
    fn group_false_clears_level_but_keeps_reduce() {
        let params = QueryBuilder::for_view("v")
            .reduce()
            .group(false)
            .unwrap()
            .get_params();
        assert!(params.reduce);
        assert_eq!(params.group_level, None);
    }

    #[test]
    fn skip_and_limit_clamp_negative_to_zero() {
        let params = QueryBuilder::for_view("v").skip(-5).limit(-1).get_params();
        assert_eq!(params.skip, 0);
        assert_eq!(params.limit, 0);
    }
}
