//! Resolved subscription addresses and the declaration shape they are resolved from.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::{
    error::FieldsyncError,
    prop_path::{path_overlap, PropPath},
};

/// The fully resolved address of one slot inside one source's storage path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BindTarget {
    pub source_id: String,
    pub storage_path: String,
    pub prop_path: PropPath,
    #[serde(default)]
    pub listen_to_children: bool,
}

impl BindTarget {
    pub fn new<S: Into<String>, P: Into<String>>(
        source_id: S,
        storage_path: P,
        prop_path: PropPath,
    ) -> Self {
        BindTarget {
            source_id: source_id.into(),
            storage_path: storage_path.into(),
            prop_path,
            listen_to_children: false,
        }
    }

    pub fn listening_to_children(mut self) -> Self {
        self.listen_to_children = true;
        self
    }

    /// Same source and storage path, i.e. both targets address the same cache item.
    pub fn is_comparable(&self, other: &BindTarget) -> bool {
        self.source_id == other.source_id && self.storage_path == other.storage_path
    }
}

impl Display for BindTarget {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}:{}#{}{}",
            self.source_id,
            self.storage_path,
            self.prop_path,
            if self.listen_to_children { "/**" } else { "" }
        )
    }
}

/// Whether a write to `written` must be delivered to a listener bound to `listener`.
///
/// Only the listener's `listen_to_children` flag is consulted.
pub fn has_overlap(written: &BindTarget, listener: &BindTarget) -> bool {
    written.is_comparable(listener)
        && path_overlap(
            &written.prop_path,
            &listener.prop_path,
            listener.listen_to_children,
        )
}

/// Defaults applied when resolving a [`BindTargetDeclaration`].
#[derive(Debug, Clone)]
pub struct DeclarationDefaults<'a> {
    /// Source used when the declaration names none.
    pub source_id: &'a str,
    /// The document the declaring field lives in.
    pub current_file: &'a str,
}

/// A bind target as produced by the declaration parser, before defaults and local scope are
/// applied.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindTargetDeclaration {
    pub source_id: Option<String>,
    pub storage_path: Option<String>,
    #[serde(default)]
    pub prop_path: PropPath,
    #[serde(default)]
    pub listen_to_children: bool,
    /// The prop path is relative to a scope supplied by the enclosing block.
    #[serde(default)]
    pub local_scope: bool,
}

impl BindTargetDeclaration {
    /// Turn the declaration into an absolute [`BindTarget`].
    ///
    /// A local-scope declaration takes source and storage path from `scope` and is prefixed with
    /// the scope's prop path; it fails without a scope.
    pub fn resolve(
        self,
        defaults: &DeclarationDefaults<'_>,
        scope: Option<&BindTarget>,
    ) -> Result<BindTarget, FieldsyncError> {
        if self.local_scope {
            let Some(scope) = scope else {
                return Err(FieldsyncError::InvalidDeclaration(format!(
                    "'{}' refers to the local scope, but no local scope is available",
                    self.prop_path
                )));
            };
            return Ok(BindTarget {
                source_id: scope.source_id.clone(),
                storage_path: scope.storage_path.clone(),
                prop_path: scope.prop_path.join(&self.prop_path),
                listen_to_children: self.listen_to_children,
            });
        }

        Ok(BindTarget {
            source_id: self
                .source_id
                .unwrap_or_else(|| defaults.source_id.to_string()),
            storage_path: self
                .storage_path
                .unwrap_or_else(|| defaults.current_file.to_string()),
            prop_path: self.prop_path,
            listen_to_children: self.listen_to_children,
        })
    }
}
