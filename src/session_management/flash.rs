use serde_json::{Map, Value};

use super::record::{get_path, has_path, set_path};

/// Flash values readable during the current request.
///
/// Values staged for the next request live in the session record itself;
/// this is only the generation promoted at start plus whatever was flashed
/// since.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlashData {
    values: Map<String, Value>,
}

impl FlashData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_staged(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        get_path(&self.values, key)
    }

    pub fn has(&self, key: &str) -> bool {
        has_path(&self.values, key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        set_path(&mut self.values, key, value);
    }

    pub fn all(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
