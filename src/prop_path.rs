//! Addressing values inside a nested metadata blob.
//!
//! A [`PropPath`] is an ordered list of [`PropAccess`] accessors. Cached metadata is held as a
//! [`serde_json::Value`], and a prop path selects a slot inside it:
//!
//! ```rust
//! use fieldsync_core::prop_path::{PropAccess, PropPath};
//! use serde_json::json;
//!
//! # fn main() -> Result<(), fieldsync_core::FieldsyncError> {
//! let path = PropPath::from(vec![PropAccess::from("tags"), PropAccess::from(1usize)]);
//! let mut blob = json!({});
//! path.set(&mut blob, json!("rust"))?;
//! assert_eq!(blob, json!({"tags": [null, "rust"]}));
//! assert_eq!(path.to_string(), "tags[1]");
//! # Ok(())
//! # }
//! ```
//!
//! The serialized shape is a plain list mixing strings and integers (`["tags", 1]`), which is
//! what the upstream declaration parser hands over.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::{Display, Formatter};

use crate::error::FieldsyncError;

/// How far past the end of an array [`PropPath::set`] may write. The gap is padded with `null`.
pub const MAX_INDEX_PADDING: usize = 1024;

/// A single step into a nested value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropAccess {
    Index(usize),
    Key(String),
}

impl From<&str> for PropAccess {
    fn from(key: &str) -> Self {
        PropAccess::Key(key.to_string())
    }
}

impl From<String> for PropAccess {
    fn from(key: String) -> Self {
        PropAccess::Key(key)
    }
}

impl From<usize> for PropAccess {
    fn from(index: usize) -> Self {
        PropAccess::Index(index)
    }
}

impl Display for PropAccess {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            PropAccess::Index(idx) => write!(f, "[{idx}]"),
            PropAccess::Key(key) => write!(f, "{key}"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropPath(Vec<PropAccess>);

impl PropPath {
    pub fn root() -> Self {
        PropPath::default()
    }

    /// Build a path of object keys only.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        PropPath(
            keys.into_iter()
                .map(|key| PropAccess::Key(key.into()))
                .collect(),
        )
    }

    pub fn accessors(&self) -> &[PropAccess] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if `prefix` is a (non-strict) prefix of this path.
    pub fn starts_with(&self, prefix: &PropPath) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Concatenate two paths, `self` first.
    pub fn join(&self, rest: &PropPath) -> PropPath {
        let mut accessors = self.0.clone();
        accessors.extend(rest.0.iter().cloned());
        PropPath(accessors)
    }

    pub fn child<A: Into<PropAccess>>(&self, access: A) -> PropPath {
        let mut accessors = self.0.clone();
        accessors.push(access.into());
        PropPath(accessors)
    }

    pub fn parent(&self) -> Option<PropPath> {
        let (_, init) = self.0.split_last()?;
        Some(PropPath(init.to_vec()))
    }

    /// Resolve this path inside `root`. Missing keys, out of range indices and type mismatches
    /// all resolve to `None`.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.0
            .iter()
            .try_fold(root, |current, access| match access {
                PropAccess::Key(key) => current.get(key.as_str()),
                PropAccess::Index(idx) => current.get(*idx),
            })
    }

    /// Write `value` at this path inside `root`.
    ///
    /// Absent intermediate containers are created: an array when the accessor stepping into it
    /// is an index, an object otherwise. A scalar standing where a container is needed is
    /// replaced, and arrays are padded with `null` up to the written index. The empty path
    /// replaces `root` itself.
    ///
    /// Fails without touching `root` if an index lies more than [`MAX_INDEX_PADDING`] slots
    /// past the end of the array it addresses.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<(), FieldsyncError> {
        self.check_padding(root)?;
        let mut current = root;
        for access in self.0.iter() {
            current = match access {
                PropAccess::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(Map::new());
                    }
                    &mut current[key.as_str()]
                }
                PropAccess::Index(idx) => {
                    if !current.is_array() {
                        *current = Value::Array(Vec::new());
                    }
                    if let Value::Array(items) = &mut *current {
                        if items.len() <= *idx {
                            items.resize(*idx + 1, Value::Null);
                        }
                    }
                    &mut current[*idx]
                }
            };
        }
        *current = value;
        Ok(())
    }

    fn check_padding(&self, root: &Value) -> Result<(), FieldsyncError> {
        let mut current = Some(root);
        for access in self.0.iter() {
            current = match access {
                PropAccess::Key(key) => current.and_then(|value| value.get(key.as_str())),
                PropAccess::Index(idx) => {
                    let len = current.and_then(Value::as_array).map_or(0, Vec::len);
                    if idx.saturating_sub(len) > MAX_INDEX_PADDING {
                        return Err(FieldsyncError::InvalidDeclaration(format!(
                            "index {idx} of '{self}' is too far past the end of an array of \
                            length {len}"
                        )));
                    }
                    current.and_then(|value| value.get(*idx))
                }
            };
        }
        Ok(())
    }
}

impl From<Vec<PropAccess>> for PropPath {
    fn from(accessors: Vec<PropAccess>) -> Self {
        PropPath(accessors)
    }
}

impl FromIterator<PropAccess> for PropPath {
    fn from_iter<I: IntoIterator<Item = PropAccess>>(iter: I) -> Self {
        PropPath(iter.into_iter().collect())
    }
}

impl Display for PropPath {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        for (idx, access) in self.0.iter().enumerate() {
            match access {
                PropAccess::Key(key) if idx > 0 => write!(f, ".{key}")?,
                _ => write!(f, "{access}")?,
            }
        }
        Ok(())
    }
}

/// Decide whether a write at `written` is visible to a listener at `listened`.
///
/// Equal paths always overlap. A write to a broader path is visible to every listener below
/// it. A write below a listener's path is only visible when that listener opted into child
/// updates.
pub fn path_overlap(written: &PropPath, listened: &PropPath, listen_to_children: bool) -> bool {
    if written == listened || listened.starts_with(written) {
        return true;
    }
    listen_to_children && written.starts_with(listened)
}
