//! Path expressions over JSON configuration trees.
//!
//! A path is a `/`-separated list of segments. A plain segment descends into
//! a record key (or a sequence index); `*` followed by a `key=value` segment
//! picks the first element of a sequence whose `key` field equals `value`:
//!
//! ```
//! use serde_json::json;
//! use strata_path::ConfigPath;
//!
//! let tree = json!({"items": [{"name": "foo", "value": 1}, {"name": "bar", "value": 2}]});
//! let path = ConfigPath::parse("items/*/name=bar/value").unwrap();
//! assert_eq!(path.resolve(&tree), Some(&json!(2)));
//! ```

mod eval;
mod parser;

pub use eval::{Bindings, ConfigPath, NoBindings};
pub use parser::{parse_path, QueryError, Segment, SEPARATOR, WILDCARD};
