//! The in-memory session record and its dotted-path addressing.
//!
//! A path such as `user.profile.name` walks nested JSON objects one segment
//! at a time. Reads never create anything: a missing or non-object
//! intermediate segment means "not found". Writes create missing
//! intermediates and replace non-object ones.

use log::warn;
use serde_json::{Map, Value};

/// Top-level key holding the manager's own bookkeeping.
pub const META_KEY: &str = "__sess";
pub(crate) const LAST_ACTIVE: &str = "last_active";
pub(crate) const LAST_REGENERATE: &str = "last_regenerate";
pub(crate) const FLASH_DATA: &str = "flash_data";

pub fn get_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn get_path_mut<'a>(map: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let mut current = map.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

pub fn has_path(map: &Map<String, Value>, path: &str) -> bool {
    get_path(map, path).is_some()
}

pub fn set_path(map: &mut Map<String, Value>, path: &str, value: Value) {
    let (parents, last) = match path.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, path),
    };
    let mut current = map;
    for segment in parents.into_iter().flat_map(|p| p.split('.')) {
        let entry = current
            .entry(segment)
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry.as_object_mut() {
            Some(next) => current = next,
            None => return,
        }
    }
    current.insert(last.to_owned(), value);
}

/// Removes the value at `path`, returning whether anything was removed.
pub fn forget_path(map: &mut Map<String, Value>, path: &str) -> bool {
    match path.rsplit_once('.') {
        None => map.remove(path).is_some(),
        Some((parent, last)) => get_path_mut(map, parent)
            .and_then(Value::as_object_mut)
            .map(|parent| parent.remove(last).is_some())
            .unwrap_or(false),
    }
}

/// Whether `path` addresses the bookkeeping subtree.
pub fn is_reserved(path: &str) -> bool {
    path == META_KEY
        || path
            .strip_prefix(META_KEY)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Working copy of one session's data, serialized as a JSON object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionRecord {
    data: Map<String, Value>,
}

impl SessionRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a stored blob. Empty or undecodable blobs give an empty record.
    pub fn from_blob(blob: &str) -> Self {
        if blob.trim().is_empty() {
            return Self::new();
        }
        match serde_json::from_str::<Value>(blob) {
            Ok(Value::Object(data)) => Self { data },
            Ok(_) => {
                warn!("Stored session record is not an object; starting empty");
                Self::new()
            }
            Err(e) => {
                warn!("Stored session record is corrupt ({}); starting empty", e);
                Self::new()
            }
        }
    }

    pub fn to_blob(&self) -> String {
        serde_json::to_string(&self.data).unwrap_or_else(|e| {
            warn!("Failed to serialize session record: {}", e);
            String::from("{}")
        })
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.data, path)
    }

    pub fn has(&self, path: &str) -> bool {
        has_path(&self.data, path)
    }

    pub fn set(&mut self, path: &str, value: Value) {
        set_path(&mut self.data, path, value);
    }

    pub fn forget(&mut self, path: &str) -> bool {
        forget_path(&mut self.data, path)
    }

    /// The record without its bookkeeping subtree.
    pub fn public_view(&self) -> Map<String, Value> {
        self.data
            .iter()
            .filter(|(key, _)| key.as_str() != META_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn meta_path(field: &str) -> String {
        format!("{}.{}", META_KEY, field)
    }

    pub fn last_active(&self) -> Option<i64> {
        self.get(&Self::meta_path(LAST_ACTIVE)).and_then(Value::as_i64)
    }

    pub fn set_last_active(&mut self, at: i64) {
        self.set(&Self::meta_path(LAST_ACTIVE), Value::from(at));
    }

    pub fn last_regenerate(&self) -> Option<i64> {
        self.get(&Self::meta_path(LAST_REGENERATE)).and_then(Value::as_i64)
    }

    /// Sets or, with `None`, removes the last-regenerate stamp.
    pub fn set_last_regenerate(&mut self, at: Option<i64>) {
        let path = Self::meta_path(LAST_REGENERATE);
        match at {
            Some(at) => self.set(&path, Value::from(at)),
            None => {
                self.forget(&path);
            }
        }
    }

    /// Removes the staged flash mapping from the record and returns it.
    pub fn take_staged_flash(&mut self) -> Map<String, Value> {
        let path = Self::meta_path(FLASH_DATA);
        let staged = match self.get(&path) {
            Some(Value::Object(staged)) => staged.clone(),
            _ => Map::new(),
        };
        self.forget(&path);
        staged
    }

    pub fn stage_flash(&mut self, key: &str, value: Value) {
        self.set(&format!("{}.{}", Self::meta_path(FLASH_DATA), key), value);
    }
}
