//! The query specification produced by [`builder::QueryBuilder`] and consumed by
//! [`crate::executor`].

mod builder;

pub use builder::{Direction, GroupArg, QueryBuilder};

use crate::key::EmitKey;

/// The mutually exclusive key-selection shapes a query can take. Precedence when
/// more than one was set on the builder: `Key` > `Keys` > `Prefix` > `Range` > `Scan`.
#[derive(Debug, Clone)]
pub enum Shape {
    Scan,
    Key(EmitKey),
    Keys(Vec<EmitKey>),
    Prefix(EmitKey),
    Range {
        start: EmitKey,
        end: EmitKey,
        start_doc_id: Option<String>,
        end_doc_id: Option<String>,
    },
}

/// A fully materialized, immutable query, ready for [`crate::executor::execute`].
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub view_name: String,
    pub shape: Shape,
    pub reduce: bool,
    pub include_docs: bool,
    pub descending: bool,
    pub skip: usize,
    pub limit: usize,
    pub group_level: Option<usize>,
}

impl QuerySpec {
    pub fn shape_name(&self) -> &'static str {
        match self.shape {
            Shape::Scan => "scan",
            Shape::Key(_) => "key",
            Shape::Keys(_) => "keys",
            Shape::Prefix(_) => "prefix",
            Shape::Range { .. } => "range",
        }
    }
}
