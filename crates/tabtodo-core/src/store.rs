use crate::Todo;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

pub const LOCAL_AREA: &str = "local";
pub const TODOS_KEY: &str = "todos";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("lock error: {0}")]
    Lock(String),
    #[error("watch error: {0}")]
    Watch(String),
}

/// Change notification emitted after a write to an area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    pub area: String,
    pub keys: Vec<String>,
}

/// Durable key-value store scoped to one area.
pub trait KeyValueStore {
    fn area(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Every write from any writer produces one or more notifications.
    fn subscribe(&self) -> Result<Receiver<StoreChange>, StoreError>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<S> {
    fn area(&self) -> &str {
        (**self).area()
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn subscribe(&self) -> Result<Receiver<StoreChange>, StoreError> {
        (**self).subscribe()
    }
}

/// Missing key means "no todos yet".
pub fn load_todos<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<Todo>, StoreError> {
    match store.get(TODOS_KEY)? {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value)
            .map_err(|err| StoreError::Serialization(format!("invalid todos value: {err}"))),
    }
}

pub fn save_todos<S: KeyValueStore + ?Sized>(store: &S, todos: &[Todo]) -> Result<(), StoreError> {
    let value =
        serde_json::to_value(todos).map_err(|err| StoreError::Serialization(err.to_string()))?;
    store.set(TODOS_KEY, value)
}

/// In-process store shared by handles in the same process.
pub struct MemoryStore {
    area: String,
    values: Mutex<HashMap<String, Value>>,
    subscribers: Mutex<Vec<Sender<StoreChange>>>,
}

impl MemoryStore {
    pub fn new(area: impl Into<String>) -> Self {
        Self {
            area: area.into(),
            values: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn local() -> Self {
        Self::new(LOCAL_AREA)
    }

    fn notify(&self, key: &str) {
        let change = StoreChange {
            area: self.area.clone(),
            keys: vec![key.to_string()],
        };
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        debug!(
            event = "store_change",
            area = %self.area,
            key = key,
            subscribers = subscribers.len()
        );
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::local()
    }
}

impl KeyValueStore for MemoryStore {
    fn area(&self) -> &str {
        &self.area
    }

    fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let values = self
            .values
            .lock()
            .map_err(|err| StoreError::Lock(err.to_string()))?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        {
            let mut values = self
                .values
                .lock()
                .map_err(|err| StoreError::Lock(err.to_string()))?;
            values.insert(key.to_string(), value);
        }
        self.notify(key);
        Ok(())
    }

    fn subscribe(&self) -> Result<Receiver<StoreChange>, StoreError> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .map_err(|err| StoreError::Lock(err.to_string()))?
            .push(tx);
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn absent_key_loads_as_empty_list() {
        let store = MemoryStore::local();
        assert!(load_todos(&store).expect("load").is_empty());
    }

    #[test]
    fn malformed_value_is_an_error() {
        let store = MemoryStore::local();
        store.set(TODOS_KEY, json!({"text": "oops"})).expect("set");
        assert!(matches!(
            load_todos(&store),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn writes_notify_every_subscriber() {
        let store = MemoryStore::local();
        let first = store.subscribe().expect("subscribe");
        let second = store.subscribe().expect("subscribe");

        save_todos(&store, &[Todo::new("a")]).expect("save");

        for rx in [first, second] {
            let change = rx.try_recv().expect("change");
            assert_eq!(change.area, LOCAL_AREA);
            assert_eq!(change.keys, vec![TODOS_KEY.to_string()]);
        }
        assert_eq!(load_todos(&store).expect("load"), vec![Todo::new("a")]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let store = MemoryStore::local();
        drop(store.subscribe().expect("subscribe"));
        let live = store.subscribe().expect("subscribe");
        save_todos(&store, &[]).expect("save");
        assert!(live.try_recv().is_ok());
        assert_eq!(store.subscribers.lock().expect("lock").len(), 1);
    }
}
