use crate::{partition, AppState, Group, LocalState, Todo};

/// Caret position inside a row's text, as a character offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditCaret {
    pub caret: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedRow {
    /// Position in the canonical list.
    pub index: usize,
    pub text: String,
    pub done: bool,
    pub highlighted: bool,
    pub edit: Option<EditCaret>,
}

impl RenderedRow {
    pub fn group(&self) -> Group {
        if self.done {
            Group::Completed
        } else {
            Group::Active
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedView {
    pub input_value: String,
    pub active: Vec<RenderedRow>,
    pub completed: Vec<RenderedRow>,
}

impl RenderedView {
    pub fn rows(&self) -> impl Iterator<Item = &RenderedRow> {
        self.active.iter().chain(self.completed.iter())
    }

    /// Canonical indices in visual order: active rows then completed rows.
    pub fn traversal(&self) -> Vec<usize> {
        self.rows().map(|row| row.index).collect()
    }

    pub fn group_order(&self, group: Group) -> Vec<usize> {
        let rows = match group {
            Group::Active => &self.active,
            Group::Completed => &self.completed,
        };
        rows.iter().map(|row| row.index).collect()
    }

    pub fn row(&self, index: usize) -> Option<&RenderedRow> {
        self.rows().find(|row| row.index == index)
    }

    pub fn highlighted_rows(&self) -> usize {
        self.rows().filter(|row| row.highlighted).count()
    }

    pub fn editing_row(&self) -> Option<&RenderedRow> {
        self.rows().find(|row| row.edit.is_some())
    }
}

/// Full rebuild of the visible list from the canonical list and tab state.
pub fn render(list: &[Todo], app: &AppState, local: &LocalState) -> RenderedView {
    let (active, completed) = partition(list);
    let build = |indices: Vec<usize>| -> Vec<RenderedRow> {
        indices
            .into_iter()
            .map(|index| build_row(index, &list[index], app, local))
            .collect()
    };

    RenderedView {
        input_value: app.input_value.clone(),
        active: build(active),
        completed: build(completed),
    }
}

fn build_row(index: usize, todo: &Todo, app: &AppState, local: &LocalState) -> RenderedRow {
    let highlighted = local.highlighted_id == Some(index);
    let edit = (highlighted && app.editing_id == Some(index)).then(|| EditCaret {
        caret: todo.text.chars().count(),
    });
    RenderedRow {
        index,
        text: todo.text.clone(),
        done: todo.done,
        highlighted,
        edit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Todo> {
        vec![
            Todo::new("a"),
            Todo::completed("b"),
            Todo::new("c"),
            Todo::completed("d"),
            Todo::new("e"),
        ]
    }

    #[test]
    fn groups_active_before_completed_in_canonical_order() {
        let view = render(&sample(), &AppState::default(), &LocalState::default());
        assert_eq!(view.group_order(Group::Active), vec![0, 2, 4]);
        assert_eq!(view.group_order(Group::Completed), vec![1, 3]);
        assert_eq!(view.traversal(), vec![0, 2, 4, 1, 3]);
        let texts: Vec<&str> = view.rows().map(|row| row.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c", "e", "b", "d"]);
    }

    #[test]
    fn highlight_comes_only_from_local_state() {
        let app = AppState {
            editing_id: Some(2),
            input_value: String::new(),
        };
        let view = render(&sample(), &app, &LocalState::default());
        assert_eq!(view.highlighted_rows(), 0);
        assert!(view.editing_row().is_none());

        let local = LocalState {
            highlighted_id: Some(3),
        };
        let view = render(&sample(), &app, &local);
        assert_eq!(view.highlighted_rows(), 1);
        assert!(view.row(3).expect("row").highlighted);
        assert!(view.editing_row().is_none());
    }

    #[test]
    fn edit_mode_needs_highlight_and_editing_on_same_row() {
        let list = vec![Todo::new("héllo"), Todo::new("x")];
        let app = AppState {
            editing_id: Some(0),
            input_value: "draft".to_string(),
        };
        let local = LocalState {
            highlighted_id: Some(0),
        };
        let view = render(&list, &app, &local);
        let row = view.editing_row().expect("editing row");
        assert_eq!(row.index, 0);
        assert_eq!(row.edit, Some(EditCaret { caret: 5 }));
        assert_eq!(view.input_value, "draft");
    }

    #[test]
    fn stale_highlight_renders_nothing() {
        let local = LocalState {
            highlighted_id: Some(42),
        };
        let view = render(&sample(), &AppState::default(), &local);
        assert_eq!(view.highlighted_rows(), 0);
    }
}
