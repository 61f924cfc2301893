use crate::nav::{self, Focus, NavKey};
use crate::protocol::{AppStatePatch, ChannelMsg};
use crate::render::{render, RenderedView};
use crate::store::{load_todos, save_todos, KeyValueStore};
use crate::{partition, AppState, Group, LocalState, Todo};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

/// Fire-and-forget post onto the shared channel.
pub trait Broadcast {
    fn post(&self, msg: ChannelMsg);
}

impl<B: Broadcast + ?Sized> Broadcast for Arc<B> {
    fn post(&self, msg: ChannelMsg) {
        (**self).post(msg)
    }
}

impl<B: Broadcast + ?Sized> Broadcast for &B {
    fn post(&self, msg: ChannelMsg) {
        (**self).post(msg)
    }
}

impl Broadcast for std::sync::mpsc::Sender<ChannelMsg> {
    fn post(&self, msg: ChannelMsg) {
        if self.send(msg).is_err() {
            debug!(event = "broadcast_dropped", reason = "receiver_gone");
        }
    }
}

/// Queue of posts waiting to be flushed to the channel by the owner.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    queue: Arc<Mutex<VecDeque<ChannelMsg>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<ChannelMsg> {
        match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self.queue.lock() {
            Ok(queue) => queue.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Broadcast for Outbox {
    fn post(&self, msg: ChannelMsg) {
        match self.queue.lock() {
            Ok(mut queue) => queue.push_back(msg),
            Err(poisoned) => poisoned.into_inner().push_back(msg),
        }
    }
}

/// What a committed edit tells the other tabs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommitEcho {
    /// `update` without payload: other tabs reload but keep their own edit state.
    #[default]
    Bare,
    /// `update` carrying this tab's app-state snapshot.
    Snapshot,
}

/// Owns the state of one tab and applies every mutation to it.
///
/// The cached list is a copy of the store's list. Every mutation path re-reads the
/// store or writes the whole list back; nothing treats the cache as authoritative.
pub struct TabController<S, B> {
    tab_id: String,
    store: S,
    outbox: B,
    commit_echo: CommitEcho,
    todos: Vec<Todo>,
    app: AppState,
    local: LocalState,
    focus: Focus,
    view: RenderedView,
}

impl<S: KeyValueStore, B: Broadcast> TabController<S, B> {
    pub fn new(store: S, outbox: B) -> Self {
        Self::with_id(format!("tab-{}", Uuid::new_v4()), store, outbox)
    }

    pub fn with_id(tab_id: impl Into<String>, store: S, outbox: B) -> Self {
        Self {
            tab_id: tab_id.into(),
            store,
            outbox,
            commit_echo: CommitEcho::default(),
            todos: Vec::new(),
            app: AppState::default(),
            local: LocalState::default(),
            focus: Focus::None,
            view: RenderedView::default(),
        }
    }

    pub fn with_commit_echo(mut self, echo: CommitEcho) -> Self {
        self.commit_echo = echo;
        self
    }

    pub fn tab_id(&self) -> &str {
        &self.tab_id
    }

    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    pub fn app_state(&self) -> &AppState {
        &self.app
    }

    pub fn local_state(&self) -> &LocalState {
        &self.local
    }

    pub fn current_focus(&self) -> Focus {
        self.focus
    }

    pub fn view(&self) -> &RenderedView {
        &self.view
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reload the canonical list and redraw.
    pub fn load(&mut self) {
        match load_todos(&self.store) {
            Ok(todos) => self.todos = todos,
            Err(err) => {
                warn!(event = "store_read_failed", tab_id = %self.tab_id, error = %err);
            }
        }
        self.render();
    }

    /// Persist the whole list. Failures are logged and otherwise ignored.
    pub fn save(&self, todos: &[Todo]) {
        if let Err(err) = save_todos(&self.store, todos) {
            warn!(event = "store_write_failed", tab_id = %self.tab_id, error = %err);
        }
    }

    pub fn apply_remote_update(&mut self, patch: Option<&AppStatePatch>) {
        if let Some(patch) = patch {
            self.app.merge(patch);
        }
        self.load();
    }

    pub fn handle_message(&mut self, msg: &ChannelMsg) {
        debug!(event = "channel_message", tab_id = %self.tab_id, kind = msg.kind());
        match msg {
            ChannelMsg::ClearHighlight => {
                self.local.highlighted_id = None;
                self.render();
            }
            ChannelMsg::Update(patch) => self.apply_remote_update(patch.as_ref()),
            ChannelMsg::Signal => self.apply_remote_update(None),
            ChannelMsg::Unknown => {}
        }
    }

    pub fn set_input(&mut self, value: impl Into<String>) {
        self.app.input_value = value.into();
        self.render();
    }

    /// Append the trimmed input as a new active todo. Returns false for blank input.
    pub fn add_todo(&mut self) -> bool {
        let text = self.app.input_value.trim().to_string();
        if text.is_empty() {
            return false;
        }
        let mut todos = self.fresh_todos();
        todos.push(Todo::new(text));
        self.save(&todos);
        self.todos = todos;
        self.app.input_value.clear();
        self.render();
        true
    }

    pub fn toggle_done(&mut self, index: usize) -> bool {
        let mut todos = self.fresh_todos();
        let Some(todo) = todos.get_mut(index) else {
            self.warn_stale("toggle_done", index);
            return false;
        };
        todo.done = !todo.done;
        self.save(&todos);
        self.todos = todos;
        self.outbox.post(ChannelMsg::update());
        self.render();
        true
    }

    /// Move keyboard focus, applying blur rules of the old target and focus rules
    /// of the new one.
    pub fn focus(&mut self, target: Focus) {
        if let Some(index) = target.row() {
            if index >= self.todos.len() {
                self.warn_stale("focus", index);
                return;
            }
        }
        if self.focus == target {
            return;
        }
        let previous = self.focus;
        self.leave(previous, target);
        self.focus = target;
        self.enter(target);
        self.render();
    }

    pub fn move_focus(&mut self, key: NavKey) {
        let traversal = self.view.traversal();
        let Some(next) = nav::step(&traversal, self.focus.row(), key) else {
            return;
        };
        self.local.highlighted_id = None;
        self.focus(Focus::Row(next));
    }

    /// Dedicated edit key: move from the focused row into its text.
    pub fn enter_edit(&mut self) {
        if let Focus::Row(index) = self.focus {
            self.focus(Focus::Text(index));
        }
    }

    /// The single commit path for edited row text.
    pub fn commit_edit(&mut self, index: usize, text: &str) -> bool {
        let mut todos = self.fresh_todos();
        let Some(todo) = todos.get_mut(index) else {
            self.warn_stale("commit_edit", index);
            return false;
        };
        todo.text = text.to_string();
        self.save(&todos);
        self.todos = todos;
        let msg = match self.commit_echo {
            CommitEcho::Bare => ChannelMsg::update(),
            CommitEcho::Snapshot => ChannelMsg::update_with(self.app.snapshot()),
        };
        self.outbox.post(msg);
        self.local.highlighted_id = Some(index);
        self.render();
        true
    }

    /// Window lost focus: the focused element blurs but is remembered.
    pub fn window_blur(&mut self) {
        self.leave(self.focus, Focus::None);
        self.local.highlighted_id = None;
        self.render();
    }

    /// Window regained focus: the remembered element receives focus again.
    pub fn window_focus(&mut self) {
        if let Some(index) = self.focus.row() {
            if index >= self.todos.len() {
                self.focus = Focus::None;
                self.render();
                return;
            }
        }
        self.enter(self.focus);
        self.render();
    }

    /// Persist `active ++ completed` with done flags taken from the group.
    ///
    /// Both orders together must be a permutation of the current indices.
    pub fn reorder(&mut self, active: &[usize], completed: &[usize]) -> bool {
        let len = self.todos.len();
        let mut new_pos = vec![usize::MAX; len];
        for (pos, &old) in active.iter().chain(completed.iter()).enumerate() {
            if old >= len || new_pos[old] != usize::MAX {
                self.warn_stale("reorder", old);
                return false;
            }
            new_pos[old] = pos;
        }
        if active.len() + completed.len() != len {
            warn!(
                event = "stale_reorder",
                tab_id = %self.tab_id,
                expected = len,
                got = active.len() + completed.len()
            );
            return false;
        }

        let next: Vec<Todo> = active
            .iter()
            .map(|&idx| Todo::new(self.todos[idx].text.clone()))
            .chain(
                completed
                    .iter()
                    .map(|&idx| Todo::completed(self.todos[idx].text.clone())),
            )
            .collect();

        self.save(&next);
        self.todos = next;
        let remap = |idx: usize| new_pos.get(idx).copied();
        self.local.highlighted_id = self.local.highlighted_id.and_then(remap);
        self.app.editing_id = self.app.editing_id.and_then(remap);
        self.focus = self.focus.remap(remap);
        self.outbox.post(ChannelMsg::update());
        self.render();
        true
    }

    /// Drop row `from` at `position` inside `group`. Dropping into the other group
    /// flips its done flag.
    pub fn drag_move(&mut self, from: usize, group: Group, position: usize) -> bool {
        let (mut active, mut completed) = partition(&self.todos);
        let before = (active.clone(), completed.clone());
        if let Some(pos) = active.iter().position(|idx| *idx == from) {
            active.remove(pos);
        } else if let Some(pos) = completed.iter().position(|idx| *idx == from) {
            completed.remove(pos);
        } else {
            self.warn_stale("drag_move", from);
            return false;
        }
        let target = match group {
            Group::Active => &mut active,
            Group::Completed => &mut completed,
        };
        target.insert(position.min(target.len()), from);
        if (active.clone(), completed.clone()) == before {
            return false;
        }
        self.reorder(&active, &completed)
    }

    /// Keyboard reorder of the focused row by one place within its group.
    pub fn shift_focused(&mut self, key: NavKey) -> bool {
        let Some(index) = self.focus.row() else {
            return false;
        };
        let Some(todo) = self.todos.get(index) else {
            return false;
        };
        let group = todo.group();
        let order = self.view.group_order(group);
        let Some(pos) = order.iter().position(|idx| *idx == index) else {
            return false;
        };
        let target = match key {
            NavKey::Up => match pos.checked_sub(1) {
                Some(prev) => prev,
                None => return false,
            },
            NavKey::Down => pos + 1,
        };
        if target >= order.len() {
            return false;
        }
        self.drag_move(index, group, target)
    }

    fn enter(&mut self, target: Focus) {
        match target {
            Focus::Row(index) => {
                self.local.highlighted_id = Some(index);
                self.outbox.post(ChannelMsg::ClearHighlight);
            }
            Focus::Text(index) => {
                self.local.highlighted_id = Some(index);
                self.app.editing_id = Some(index);
                self.outbox.post(ChannelMsg::ClearHighlight);
            }
            Focus::None | Focus::Input => {}
        }
    }

    fn leave(&mut self, previous: Focus, next: Focus) {
        if let Focus::Text(_) = previous {
            self.app.editing_id = None;
        }
        if let Some(index) = previous.row() {
            if next.row() != Some(index) {
                self.local.highlighted_id = None;
            }
        }
    }

    fn fresh_todos(&self) -> Vec<Todo> {
        match load_todos(&self.store) {
            Ok(todos) => todos,
            Err(err) => {
                warn!(event = "store_read_failed", tab_id = %self.tab_id, error = %err);
                self.todos.clone()
            }
        }
    }

    fn render(&mut self) {
        self.view = render(&self.todos, &self.app, &self.local);
    }

    fn warn_stale(&self, op: &'static str, index: usize) {
        warn!(
            event = "stale_index",
            tab_id = %self.tab_id,
            op = op,
            index = index,
            len = self.todos.len()
        );
    }
}
