use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub mod nav;
pub mod paths;
pub mod protocol;
pub mod render;
pub mod store;
pub mod tab;

pub use nav::{Focus, NavKey};
pub use protocol::{AppStatePatch, ChannelMsg};
pub use render::{render, EditCaret, RenderedRow, RenderedView};
pub use store::{KeyValueStore, MemoryStore, StoreChange, StoreError};
pub use tab::{Broadcast, TabController};

/// One entry of the canonical list. Identity is its position in the list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub text: String,
    #[serde(default)]
    pub done: bool,
}

impl Todo {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: false,
        }
    }

    pub fn completed(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            done: true,
        }
    }

    pub fn group(&self) -> Group {
        if self.done {
            Group::Completed
        } else {
            Group::Active
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Active,
    Completed,
}

impl Group {
    pub fn as_str(self) -> &'static str {
        match self {
            Group::Active => "active",
            Group::Completed => "completed",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical indices split into the active group then the completed group,
/// each kept in canonical order.
pub fn partition(list: &[Todo]) -> (Vec<usize>, Vec<usize>) {
    let mut active = Vec::new();
    let mut completed = Vec::new();
    for (idx, todo) in list.iter().enumerate() {
        match todo.group() {
            Group::Active => active.push(idx),
            Group::Completed => completed.push(idx),
        }
    }
    (active, completed)
}

/// UI state echoed to other tabs when a sender attaches it to an `update`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    #[serde(default)]
    pub editing_id: Option<usize>,
    #[serde(default)]
    pub input_value: String,
}

impl AppState {
    /// Shallow overwrite: only fields present in the patch are replaced.
    pub fn merge(&mut self, patch: &AppStatePatch) {
        if let Some(editing_id) = patch.editing_id {
            self.editing_id = editing_id;
        }
        if let Some(input_value) = &patch.input_value {
            self.input_value = input_value.clone();
        }
    }

    pub fn snapshot(&self) -> AppStatePatch {
        AppStatePatch {
            editing_id: Some(self.editing_id),
            input_value: Some(self.input_value.clone()),
        }
    }
}

/// Per-tab state that never leaves the tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalState {
    pub highlighted_id: Option<usize>,
}

/// Distinguishes an explicit `null` from a missing field.
pub(crate) fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_keeps_relative_order_per_group() {
        let list = vec![
            Todo::completed("c1"),
            Todo::new("a1"),
            Todo::completed("c2"),
            Todo::new("a2"),
        ];
        let (active, completed) = partition(&list);
        assert_eq!(active, vec![1, 3]);
        assert_eq!(completed, vec![0, 2]);
    }

    #[test]
    fn merge_overwrites_only_present_fields() {
        let mut state = AppState {
            editing_id: Some(3),
            input_value: "draft".to_string(),
        };
        state.merge(&AppStatePatch {
            editing_id: None,
            input_value: Some("other".to_string()),
        });
        assert_eq!(state.editing_id, Some(3));
        assert_eq!(state.input_value, "other");

        state.merge(&AppStatePatch {
            editing_id: Some(None),
            input_value: None,
        });
        assert_eq!(state.editing_id, None);
        assert_eq!(state.input_value, "other");
    }

    #[test]
    fn todo_missing_done_defaults_to_active() {
        let todo: Todo = serde_json::from_str(r#"{"text":"x"}"#).expect("parse");
        assert_eq!(todo, Todo::new("x"));
    }
}
