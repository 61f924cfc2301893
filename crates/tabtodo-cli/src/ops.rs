use anyhow::{bail, Context, Result};
use tabtodo_core::store::{load_todos, save_todos};
use tabtodo_core::{partition, KeyValueStore, Todo};

pub fn list<S: KeyValueStore + ?Sized>(store: &S) -> Result<Vec<Todo>> {
    load_todos(store).context("read todos")
}

/// Active rows first, then completed ones, each line prefixed with its index.
pub fn format_list(todos: &[Todo]) -> String {
    let (active, completed) = partition(todos);
    let mut out = String::new();
    for index in active.into_iter().chain(completed) {
        let todo = &todos[index];
        let mark = if todo.done { "x" } else { " " };
        out.push_str(&format!("{index:>3} [{mark}] {}\n", todo.text));
    }
    out
}

pub fn add<S: KeyValueStore + ?Sized>(store: &S, text: &str) -> Result<usize> {
    let text = text.trim();
    if text.is_empty() {
        bail!("todo text is empty");
    }
    let mut todos = list(store)?;
    todos.push(Todo::new(text));
    save_todos(store, &todos).context("write todos")?;
    Ok(todos.len() - 1)
}

pub fn toggle<S: KeyValueStore + ?Sized>(store: &S, index: usize) -> Result<bool> {
    let mut todos = list(store)?;
    let todo = checked(&mut todos, index)?;
    todo.done = !todo.done;
    let done = todo.done;
    save_todos(store, &todos).context("write todos")?;
    Ok(done)
}

pub fn edit<S: KeyValueStore + ?Sized>(store: &S, index: usize, text: &str) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        bail!("todo text is empty");
    }
    let mut todos = list(store)?;
    checked(&mut todos, index)?.text = text.to_string();
    save_todos(store, &todos).context("write todos")
}

/// Move the todo at `from` so it ends up at position `to` of the stored list.
pub fn move_todo<S: KeyValueStore + ?Sized>(store: &S, from: usize, to: usize) -> Result<()> {
    let mut todos = list(store)?;
    checked(&mut todos, from)?;
    if to >= todos.len() {
        bail!("no todo at index {to} (list has {})", todos.len());
    }
    let todo = todos.remove(from);
    todos.insert(to, todo);
    save_todos(store, &todos).context("write todos")
}

fn checked(todos: &mut [Todo], index: usize) -> Result<&mut Todo> {
    let len = todos.len();
    match todos.get_mut(index) {
        Some(todo) => Ok(todo),
        None => bail!("no todo at index {index} (list has {len})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabtodo_core::MemoryStore;
    use tabtodo_store::FileStore;

    #[test]
    fn add_toggle_edit_move_against_file_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileStore::local(dir.path()).expect("open");

        assert_eq!(add(&store, " milk ").expect("add"), 0);
        assert_eq!(add(&store, "eggs").expect("add"), 1);
        assert!(toggle(&store, 0).expect("toggle"));
        edit(&store, 1, "brown eggs").expect("edit");
        move_todo(&store, 1, 0).expect("move");

        assert_eq!(
            list(&store).expect("list"),
            vec![Todo::new("brown eggs"), Todo::completed("milk")]
        );
    }

    #[test]
    fn rejects_blank_text_and_bad_indices() {
        let store = MemoryStore::local();
        assert!(add(&store, "   ").is_err());
        add(&store, "a").expect("add");
        assert!(toggle(&store, 3).is_err());
        assert!(edit(&store, 1, "x").is_err());
        assert!(edit(&store, 0, "").is_err());
        assert!(edit(&store, 0, "   ").is_err());
        assert!(move_todo(&store, 0, 1).is_err());
        assert_eq!(list(&store).expect("list"), vec![Todo::new("a")]);
    }

    #[test]
    fn listing_shows_active_before_completed() {
        let todos = vec![Todo::completed("done"), Todo::new("open")];
        assert_eq!(format_list(&todos), "  1 [ ] open\n  0 [x] done\n");
    }
}
