//! YAML frontmatter of markdown files as a metadata source.
//!
//! Storage paths are file paths relative to the source root. The initial snapshot of a file is
//! read synchronously when its cache item is first needed; writes go back asynchronously from
//! the maintenance tick, replacing only the frontmatter block and leaving the body untouched.
//! Files that change on disk are fed back in through
//! [`MetadataManager::on_external_update`](crate::manager::MetadataManager::on_external_update),
//! see [`FrontmatterWatcher`](crate::watch::FrontmatterWatcher) (feature `service`).

use futures::FutureExt;
use pulldown_cmark::{Event as MdEvent, MetadataBlockKind, Options, Parser, Tag, TagEnd};
use serde_json::{json, Value};
use std::{
    fs::read_to_string,
    io,
    ops::Range,
    path::{Component, Path, PathBuf},
};

use crate::{
    cache::{CacheItem, CacheItemStore},
    config::ManagerConfig,
    error::FieldsyncError,
};

use super::{MetadataSource, SyncFuture};

pub const FRONTMATTER_SOURCE_ID: &str = "frontmatter";

#[derive(Debug, Clone)]
pub struct FrontmatterSource {
    root: PathBuf,
    items: CacheItemStore,
    write_lock_cycles: u32,
}

impl FrontmatterSource {
    pub fn new<P: Into<PathBuf>>(root: P, config: &ManagerConfig) -> Self {
        FrontmatterSource {
            root: root.into(),
            items: CacheItemStore::default(),
            write_lock_cycles: config.write_lock_cycles,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage path below the root. Absolute paths and `..` components are refused.
    pub fn file_path(&self, storage_path: &str) -> Result<PathBuf, FieldsyncError> {
        let relative = Path::new(storage_path);
        let escapes = relative.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });
        if escapes || storage_path.is_empty() {
            return Err(FieldsyncError::NotFound(format!(
                "storage path '{storage_path}' does not name a file below {:?}",
                self.root
            )));
        }
        Ok(self.root.join(relative))
    }

    /// Inverse of [`FrontmatterSource::file_path`].
    pub fn storage_path(&self, file_path: &Path) -> Option<String> {
        storage_path_below(&self.root, file_path)
    }

    /// Read the current frontmatter of `storage_path` from disk.
    pub fn read_snapshot(&self, storage_path: &str) -> Result<Value, FieldsyncError> {
        let path = self.file_path(storage_path)?;
        match read_to_string(&path) {
            Ok(content) => parse_frontmatter(&content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(json!({})),
            Err(err) => Err(err.into()),
        }
    }
}

impl MetadataSource for FrontmatterSource {
    fn id(&self) -> &str {
        FRONTMATTER_SOURCE_ID
    }

    fn items(&self) -> &CacheItemStore {
        &self.items
    }

    fn items_mut(&mut self) -> &mut CacheItemStore {
        &mut self.items
    }

    fn default_cache_item(&mut self, storage_path: &str) -> CacheItem {
        let data = self.read_snapshot(storage_path).unwrap_or_else(|err| {
            tracing::warn!("Could not read frontmatter of '{storage_path}', starting empty: {err}");
            json!({})
        });
        CacheItem::new(storage_path, data, self.write_lock_cycles)
    }

    fn should_delete(&self, _item: &CacheItem) -> bool {
        true
    }

    fn sync_external(&self, item: &CacheItem) -> SyncFuture {
        let target = self.file_path(&item.storage_path);
        let storage_path = item.storage_path.clone();
        let data = item.data.clone();
        async move {
            let written = match target {
                Ok(path) => write_frontmatter(&path, &data).await,
                Err(err) => Err(err),
            };
            written.map_err(|err| {
                FieldsyncError::Sync(format!("frontmatter of '{storage_path}': {err}"))
            })
        }
        .boxed()
    }
}

async fn write_frontmatter(path: &Path, data: &Value) -> Result<(), FieldsyncError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err.into()),
    };
    let updated = render_frontmatter(&content, data)?;
    if updated != content {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tracing::debug!("Writing frontmatter to {:?}", path);
        tokio::fs::write(path, updated).await?;
    }
    Ok(())
}

/// The storage path of `file_path` relative to `root`, with `/` separators.
pub fn storage_path_below(root: &Path, file_path: &Path) -> Option<String> {
    let relative = file_path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>();
    Some(parts.join("/"))
}

/// Location of a leading YAML metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MetadataBlock {
    /// The whole block, fences included.
    block: Range<usize>,
    /// The YAML text between the fences, if any.
    text: Option<Range<usize>>,
}

fn find_metadata_block(content: &str) -> Option<MetadataBlock> {
    let mut parser =
        Parser::new_ext(content, Options::ENABLE_YAML_STYLE_METADATA_BLOCKS).into_offset_iter();

    let block = match parser.next()? {
        (MdEvent::Start(Tag::MetadataBlock(MetadataBlockKind::YamlStyle)), range) => range,
        _ => return find_fenced_block(content),
    };

    let mut text: Option<Range<usize>> = None;
    for (event, range) in parser {
        match event {
            MdEvent::Text(_) => {
                text = match text {
                    Some(text_range) => Some(text_range.start..range.end),
                    None => Some(range),
                };
            }
            MdEvent::End(TagEnd::MetadataBlock(_)) => break,
            _ => {
                tracing::warn!(
                    "Not expecting any other events than text within a metadata block. \
                    received: {:?}",
                    event
                );
            }
        }
    }
    Some(MetadataBlock { block, text })
}

/// Line based detection of a leading `---` fenced block, closed by `---` or `...`. The markdown
/// parser does not report empty blocks or blocks opening with a blank line.
fn find_fenced_block(content: &str) -> Option<MetadataBlock> {
    let mut lines = content.split_inclusive('\n');
    let opening = lines.next()?;
    if opening.trim_end() != "---" {
        return None;
    }
    let text_start = opening.len();
    let mut offset = text_start;
    for line in lines {
        let line_start = offset;
        offset += line.len();
        if matches!(line.trim_end(), "---" | "...") {
            let text = (line_start > text_start).then_some(text_start..line_start);
            return Some(MetadataBlock {
                block: 0..offset,
                text,
            });
        }
    }
    None
}

/// Parse the leading YAML frontmatter of a markdown document. Documents without one, and empty
/// blocks, yield an empty object.
pub fn parse_frontmatter(content: &str) -> Result<Value, FieldsyncError> {
    let Some(text_range) = find_metadata_block(content).and_then(|block| block.text) else {
        return Ok(json!({}));
    };
    let value: Value = serde_yaml::from_str(&content[text_range])?;
    Ok(match value {
        Value::Null => json!({}),
        value => value,
    })
}

/// Replace (or insert) the frontmatter of `content` with `data`, keeping the body as is.
pub fn render_frontmatter(content: &str, data: &Value) -> Result<String, FieldsyncError> {
    let yaml = serde_yaml::to_string(data)?;
    let mut rendered = String::with_capacity(content.len() + yaml.len() + 8);
    match find_metadata_block(content) {
        Some(MetadataBlock {
            text: Some(text), ..
        }) => {
            let replacement = if content[text.clone()].ends_with('\n') {
                yaml.as_str()
            } else {
                yaml.trim_end_matches('\n')
            };
            rendered.push_str(&content[..text.start]);
            rendered.push_str(replacement);
            rendered.push_str(&content[text.end..]);
        }
        Some(MetadataBlock { block, text: None }) => {
            rendered.push_str(&content[..block.start]);
            rendered.push_str(&format!("---\n{yaml}---\n"));
            rendered.push_str(&content[block.end..]);
        }
        None => {
            rendered.push_str(&format!("---\n{yaml}---\n"));
            if !content.is_empty() {
                if !content.starts_with('\n') {
                    rendered.push('\n');
                }
                rendered.push_str(content);
            }
        }
    }
    Ok(rendered)
}
