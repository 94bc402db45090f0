use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Session-scoped memory the navigator fills with values read off the screen
/// (ids, keys, confirmation codes) so later steps can reuse them.
///
/// Last write wins; nothing expires until the session is cleared.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Blackboard {
    entries: HashMap<String, String>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn read(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Applies a navigator delta, skipping blank keys.
    pub fn merge(&mut self, delta: HashMap<String, String>) -> usize {
        let mut written = 0;
        for (key, value) in delta {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            self.entries.insert(key.to_string(), value);
            written += 1;
        }
        written
    }

    /// Sorted copy, so prompts render identically for identical contents.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_writes_win() {
        let mut board = Blackboard::new();
        board.write("order_id", "A-1");
        board.write("order_id", "A-2");
        assert_eq!(board.read("order_id"), Some("A-2"));
        assert_eq!(board.len(), 1);
    }

    #[test]
    fn merge_skips_blank_keys() {
        let mut board = Blackboard::new();
        let delta = HashMap::from([
            ("  ".to_string(), "ignored".to_string()),
            ("api_key".to_string(), "sk-123".to_string()),
        ]);
        assert_eq!(board.merge(delta), 1);
        assert_eq!(board.read("api_key"), Some("sk-123"));
    }

    #[test]
    fn snapshot_is_sorted_and_clear_empties() {
        let mut board = Blackboard::new();
        board.write("b", "2");
        board.write("a", "1");
        let keys: Vec<_> = board.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["a", "b"]);

        board.clear();
        assert!(board.is_empty());
        assert_eq!(board.read("a"), None);
    }
}
