use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseButton, MouseEvent, MouseEventKind};
use ratatui::{layout::Rect, widgets::ListState};
use tabtodo_core::tab::Outbox;
use tabtodo_core::{ChannelMsg, Focus, Group, KeyValueStore, NavKey, TabController};
use tracing::debug;

/// Width of the checkbox column at the left edge of every row.
pub const CHECKBOX_WIDTH: u16 = 4;

/// Screen region holding one group's rows, refreshed on every draw.
/// `offset` is the position of the first visible row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListZone {
    pub group: Group,
    pub area: Rect,
    pub order: Vec<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropTarget {
    pub group: Group,
    pub position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragState {
    pub from: usize,
    pub hover: Option<DropTarget>,
}

enum Hit {
    Row { index: usize, on_checkbox: bool },
    Tail(DropTarget),
}

pub struct App<S: KeyValueStore> {
    pub controller: TabController<S, Outbox>,
    outbox: Outbox,
    edit_buffer: Option<String>,
    drag: Option<DragState>,
    zones: Vec<ListZone>,
    active_list: ListState,
    completed_list: ListState,
    should_quit: bool,
}

impl<S: KeyValueStore> App<S> {
    pub fn new(controller: TabController<S, Outbox>, outbox: Outbox) -> Self {
        Self {
            controller,
            outbox,
            edit_buffer: None,
            drag: None,
            zones: Vec::new(),
            active_list: ListState::default(),
            completed_list: ListState::default(),
            should_quit: false,
        }
    }

    pub fn load(&mut self) {
        self.controller.load();
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn drag(&self) -> Option<DragState> {
        self.drag
    }

    /// Text shown for the row being edited; falls back to the stored text.
    pub fn edit_text(&self, index: usize) -> Option<&str> {
        match self.controller.current_focus() {
            Focus::Text(current) if current == index => self.edit_buffer.as_deref(),
            _ => None,
        }
    }

    pub fn take_outgoing(&self) -> Vec<ChannelMsg> {
        self.outbox.drain()
    }

    pub fn update_layout(&mut self, zones: Vec<ListZone>) {
        self.zones = zones;
    }

    /// Scroll state of one group's list, kept between draws.
    pub fn list_state(&self, group: Group) -> ListState {
        match group {
            Group::Active => self.active_list.clone(),
            Group::Completed => self.completed_list.clone(),
        }
    }

    pub fn set_list_state(&mut self, group: Group, state: ListState) {
        match group {
            Group::Active => self.active_list = state,
            Group::Completed => self.completed_list = state,
        }
    }

    pub fn handle_message(&mut self, msg: &ChannelMsg) {
        self.controller.handle_message(msg);
        self.sync_edit_buffer();
    }

    pub fn handle_focus_lost(&mut self) {
        self.commit_pending_edit();
        self.controller.window_blur();
    }

    pub fn handle_focus_gained(&mut self) {
        self.controller.window_focus();
        self.sync_edit_buffer();
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.should_quit = true;
            return;
        }
        match self.controller.current_focus() {
            Focus::Input => self.handle_input_key(key),
            Focus::Text(index) => self.handle_edit_key(index, key),
            Focus::None | Focus::Row(_) => self.handle_list_key(key),
        }
        self.sync_edit_buffer();
    }

    fn handle_list_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
            }
            KeyCode::Char('i') => {
                self.controller.focus(Focus::Input);
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.controller.move_focus(NavKey::Down);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.controller.move_focus(NavKey::Up);
            }
            KeyCode::Char('J') => {
                self.controller.shift_focused(NavKey::Down);
            }
            KeyCode::Char('K') => {
                self.controller.shift_focused(NavKey::Up);
            }
            KeyCode::Char('e') | KeyCode::Enter => {
                self.controller.enter_edit();
            }
            KeyCode::Char('x') | KeyCode::Char(' ') => {
                if let Some(index) = self.controller.current_focus().row() {
                    self.controller.toggle_done(index);
                }
            }
            KeyCode::Esc => {
                self.controller.focus(Focus::None);
            }
            _ => {}
        }
    }

    fn handle_input_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                self.controller.add_todo();
            }
            KeyCode::Esc => {
                self.controller.focus(Focus::None);
            }
            KeyCode::Down => {
                self.controller.move_focus(NavKey::Down);
            }
            KeyCode::Backspace => {
                let mut value = self.controller.app_state().input_value.clone();
                value.pop();
                self.controller.set_input(value);
            }
            KeyCode::Char(ch) => {
                let mut value = self.controller.app_state().input_value.clone();
                value.push(ch);
                self.controller.set_input(value);
            }
            _ => {}
        }
    }

    fn handle_edit_key(&mut self, index: usize, key: KeyEvent) {
        match key.code {
            KeyCode::Enter => {
                let text = self.edit_buffer.clone().unwrap_or_default();
                self.controller.commit_edit(index, &text);
            }
            KeyCode::Esc => {
                self.commit_pending_edit();
                self.controller.focus(Focus::Row(index));
            }
            KeyCode::Up => {
                self.commit_pending_edit();
                self.controller.move_focus(NavKey::Up);
            }
            KeyCode::Down => {
                self.commit_pending_edit();
                self.controller.move_focus(NavKey::Down);
            }
            KeyCode::Backspace => {
                if let Some(buffer) = self.edit_buffer.as_mut() {
                    buffer.pop();
                }
            }
            KeyCode::Char(ch) => {
                if let Some(buffer) = self.edit_buffer.as_mut() {
                    buffer.push(ch);
                }
            }
            _ => {}
        }
    }

    pub fn handle_mouse(&mut self, event: MouseEvent) {
        match event.kind {
            MouseEventKind::Down(MouseButton::Left) => {
                self.handle_left_click(event.column, event.row);
            }
            MouseEventKind::Drag(MouseButton::Left) => {
                if let Some(drag) = self.drag.as_mut() {
                    let hover = match hit_test(&self.zones, event.column, event.row) {
                        Some(Hit::Row { index, .. }) => target_of(&self.zones, index),
                        Some(Hit::Tail(target)) => Some(target),
                        None => None,
                    };
                    drag.hover = hover;
                }
            }
            MouseEventKind::Up(MouseButton::Left) => {
                if let Some(DragState {
                    from,
                    hover: Some(target),
                }) = self.drag.take()
                {
                    debug!(
                        event = "tab_drop",
                        from = from,
                        group = %target.group,
                        position = target.position
                    );
                    self.controller
                        .drag_move(from, target.group, target.position);
                }
                self.drag = None;
            }
            _ => {}
        }
        self.sync_edit_buffer();
    }

    fn handle_left_click(&mut self, column: u16, row: u16) {
        let Some(Hit::Row { index, on_checkbox }) = hit_test(&self.zones, column, row) else {
            return;
        };
        self.commit_pending_edit();
        if on_checkbox {
            self.controller.toggle_done(index);
            return;
        }
        self.controller.focus(Focus::Row(index));
        self.drag = Some(DragState {
            from: index,
            hover: None,
        });
    }

    /// Save the edit buffer through the commit path when it differs from the store.
    fn commit_pending_edit(&mut self) {
        let Focus::Text(index) = self.controller.current_focus() else {
            return;
        };
        let Some(buffer) = self.edit_buffer.clone() else {
            return;
        };
        let unchanged = self
            .controller
            .todos()
            .get(index)
            .is_some_and(|todo| todo.text == buffer);
        if !unchanged {
            self.controller.commit_edit(index, &buffer);
        }
    }

    fn sync_edit_buffer(&mut self) {
        match self.controller.current_focus() {
            Focus::Text(index) => {
                if self.edit_buffer.is_none() {
                    self.edit_buffer = self
                        .controller
                        .todos()
                        .get(index)
                        .map(|todo| todo.text.clone());
                }
            }
            _ => self.edit_buffer = None,
        }
    }
}

fn hit_test(zones: &[ListZone], column: u16, row: u16) -> Option<Hit> {
    let zone = zones.iter().find(|zone| contains(zone.area, column, row))?;
    let position = usize::from(row - zone.area.y) + zone.offset;
    match zone.order.get(position) {
        Some(index) => Some(Hit::Row {
            index: *index,
            on_checkbox: column < zone.area.x.saturating_add(CHECKBOX_WIDTH),
        }),
        None => Some(Hit::Tail(DropTarget {
            group: zone.group,
            position: zone.order.len(),
        })),
    }
}

fn target_of(zones: &[ListZone], index: usize) -> Option<DropTarget> {
    zones.iter().find_map(|zone| {
        zone.order
            .iter()
            .position(|idx| *idx == index)
            .map(|position| DropTarget {
                group: zone.group,
                position,
            })
    })
}

fn contains(area: Rect, column: u16, row: u16) -> bool {
    column >= area.x
        && column < area.x.saturating_add(area.width)
        && row >= area.y
        && row < area.y.saturating_add(area.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossterm::event::{KeyEventKind, KeyEventState};
    use std::sync::Arc;
    use tabtodo_core::store::{load_todos, save_todos};
    use tabtodo_core::{MemoryStore, Todo};

    fn app_with(todos: &[Todo]) -> App<Arc<MemoryStore>> {
        let store = Arc::new(MemoryStore::local());
        save_todos(&*store, todos).expect("seed");
        let outbox = Outbox::new();
        let controller = TabController::with_id("tab-test", store, outbox.clone());
        let mut app = App::new(controller, outbox);
        app.load();
        app
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent {
            code,
            modifiers: KeyModifiers::NONE,
            kind: KeyEventKind::Press,
            state: KeyEventState::NONE,
        }
    }

    fn type_text(app: &mut App<Arc<MemoryStore>>, text: &str) {
        for ch in text.chars() {
            app.handle_key(key(KeyCode::Char(ch)));
        }
    }

    fn mouse(kind: MouseEventKind, column: u16, row: u16) -> MouseEvent {
        MouseEvent {
            kind,
            column,
            row,
            modifiers: KeyModifiers::NONE,
        }
    }

    fn stored(app: &App<Arc<MemoryStore>>) -> Vec<Todo> {
        load_todos(&**app.controller.store()).expect("load")
    }

    #[test]
    fn typing_into_input_and_enter_adds() {
        let mut app = app_with(&[Todo::new("a")]);
        app.handle_key(key(KeyCode::Char('i')));
        type_text(&mut app, "  milk ");
        app.handle_key(key(KeyCode::Backspace));
        app.handle_key(key(KeyCode::Enter));

        assert_eq!(stored(&app), vec![Todo::new("a"), Todo::new("milk")]);
        assert_eq!(app.controller.app_state().input_value, "");
        assert!(!app.should_quit());
    }

    #[test]
    fn q_in_input_is_text_not_quit() {
        let mut app = app_with(&[]);
        app.handle_key(key(KeyCode::Char('i')));
        app.handle_key(key(KeyCode::Char('q')));
        assert!(!app.should_quit());
        assert_eq!(app.controller.app_state().input_value, "q");

        app.handle_key(key(KeyCode::Esc));
        app.handle_key(key(KeyCode::Char('q')));
        assert!(app.should_quit());
    }

    #[test]
    fn edit_then_enter_commits_and_stays_in_edit() {
        let mut app = app_with(&[Todo::new("bread")]);
        app.handle_key(key(KeyCode::Down));
        app.take_outgoing();
        app.handle_key(key(KeyCode::Char('e')));
        assert_eq!(app.edit_text(0), Some("bread"));

        type_text(&mut app, "s");
        app.handle_key(key(KeyCode::Enter));

        assert_eq!(stored(&app), vec![Todo::new("breads")]);
        assert_eq!(app.controller.current_focus(), Focus::Text(0));
        let row = app.controller.view().row(0).expect("row");
        assert_eq!(row.edit.map(|edit| edit.caret), Some(6));
        assert!(app.take_outgoing().contains(&ChannelMsg::update()));
    }

    #[test]
    fn escape_from_edit_commits_changes_once() {
        let mut app = app_with(&[Todo::new("tea")]);
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Char('e')));
        app.handle_key(key(KeyCode::Backspace));
        app.take_outgoing();
        app.handle_key(key(KeyCode::Esc));

        assert_eq!(stored(&app), vec![Todo::new("te")]);
        assert_eq!(app.controller.current_focus(), Focus::Row(0));
        assert_eq!(app.controller.app_state().editing_id, None);
        assert_eq!(
            app.take_outgoing()
                .iter()
                .filter(|msg| **msg == ChannelMsg::update())
                .count(),
            1
        );
    }

    #[test]
    fn shift_keys_reorder_within_group() {
        let mut app = app_with(&[Todo::new("a"), Todo::new("b"), Todo::completed("c")]);
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Char('J')));

        assert_eq!(
            stored(&app),
            vec![Todo::new("b"), Todo::new("a"), Todo::completed("c")]
        );
        assert_eq!(app.controller.current_focus(), Focus::Row(1));

        app.handle_key(key(KeyCode::Char('J')));
        assert_eq!(stored(&app)[2], Todo::completed("c"));
    }

    #[test]
    fn space_toggles_focused_row() {
        let mut app = app_with(&[Todo::new("a")]);
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Char(' ')));
        assert_eq!(stored(&app), vec![Todo::completed("a")]);
    }

    #[test]
    fn click_checkbox_toggles_and_drag_moves_across_groups() {
        let mut app = app_with(&[Todo::new("a"), Todo::new("b"), Todo::completed("c")]);
        app.update_layout(vec![
            ListZone {
                group: Group::Active,
                area: Rect::new(1, 4, 30, 5),
                order: vec![0, 1],
                offset: 0,
            },
            ListZone {
                group: Group::Completed,
                area: Rect::new(1, 10, 30, 5),
                order: vec![2],
                offset: 0,
            },
        ]);

        app.handle_mouse(mouse(MouseEventKind::Down(MouseButton::Left), 10, 4));
        assert_eq!(app.controller.current_focus(), Focus::Row(0));
        app.handle_mouse(mouse(MouseEventKind::Drag(MouseButton::Left), 10, 11));
        assert_eq!(
            app.drag().and_then(|drag| drag.hover),
            Some(DropTarget {
                group: Group::Completed,
                position: 1
            })
        );
        app.handle_mouse(mouse(MouseEventKind::Up(MouseButton::Left), 10, 11));

        assert_eq!(
            stored(&app),
            vec![Todo::new("b"), Todo::completed("c"), Todo::completed("a")]
        );
        assert!(app.drag().is_none());

        app.handle_mouse(mouse(MouseEventKind::Down(MouseButton::Left), 2, 4));
        assert_eq!(stored(&app)[0], Todo::completed("b"));
    }

    #[test]
    fn clicks_land_on_scrolled_rows() {
        let todos: Vec<Todo> = (0..8).map(|n| Todo::new(format!("t{n}"))).collect();
        let mut app = app_with(&todos);
        app.update_layout(vec![ListZone {
            group: Group::Active,
            area: Rect::new(1, 4, 30, 3),
            order: (0..8).collect(),
            offset: 5,
        }]);

        app.handle_mouse(mouse(MouseEventKind::Down(MouseButton::Left), 10, 4));
        assert_eq!(app.controller.current_focus(), Focus::Row(5));
        app.handle_mouse(mouse(MouseEventKind::Up(MouseButton::Left), 10, 4));

        app.handle_mouse(mouse(MouseEventKind::Down(MouseButton::Left), 2, 6));
        assert_eq!(stored(&app)[7], Todo::completed("t7"));
    }

    #[test]
    fn focus_lost_blurs_and_focus_gained_reclaims() {
        let mut app = app_with(&[Todo::new("a"), Todo::new("b")]);
        app.handle_key(key(KeyCode::Down));
        app.handle_key(key(KeyCode::Down));
        app.take_outgoing();

        app.handle_focus_lost();
        assert_eq!(app.controller.view().highlighted_rows(), 0);

        app.handle_focus_gained();
        assert_eq!(app.controller.local_state().highlighted_id, Some(1));
        assert_eq!(app.take_outgoing(), vec![ChannelMsg::ClearHighlight]);
    }
}
