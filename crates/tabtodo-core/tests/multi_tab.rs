use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tabtodo_core::store::{load_todos, save_todos, StoreChange, LOCAL_AREA};
use tabtodo_core::tab::Outbox;
use tabtodo_core::{
    AppStatePatch, ChannelMsg, Focus, KeyValueStore, MemoryStore, TabController, Todo,
};

type Tab = TabController<Arc<MemoryStore>, Outbox>;

/// Tabs sharing one store, with the channel and relay pumped by hand.
struct Browser {
    store: Arc<MemoryStore>,
    changes: Receiver<StoreChange>,
    tabs: Vec<(Tab, Outbox)>,
}

impl Browser {
    fn new(seed: &[Todo], tabs: usize) -> Self {
        let store = Arc::new(MemoryStore::local());
        save_todos(&*store, seed).expect("seed");
        let changes = store.subscribe().expect("subscribe");
        let tabs = (0..tabs)
            .map(|n| {
                let outbox = Outbox::new();
                let mut tab =
                    TabController::with_id(format!("tab-{n}"), store.clone(), outbox.clone());
                tab.load();
                (tab, outbox)
            })
            .collect();
        let browser = Self {
            store,
            changes,
            tabs,
        };
        while browser.changes.try_recv().is_ok() {}
        browser
    }

    fn tab(&mut self, n: usize) -> &mut Tab {
        &mut self.tabs[n].0
    }

    /// Deliver every queued post to every other tab, then every store change to
    /// every tab as a bare signal.
    fn pump(&mut self) {
        loop {
            let mut delivered = false;
            for sender in 0..self.tabs.len() {
                for msg in self.tabs[sender].1.drain() {
                    delivered = true;
                    for receiver in 0..self.tabs.len() {
                        if receiver != sender {
                            self.tabs[receiver].0.handle_message(&msg);
                        }
                    }
                }
            }
            while let Ok(change) = self.changes.try_recv() {
                if change.area != LOCAL_AREA {
                    continue;
                }
                delivered = true;
                for (tab, _) in self.tabs.iter_mut() {
                    tab.handle_message(&ChannelMsg::Signal);
                }
            }
            if !delivered {
                break;
            }
        }
    }
}

#[test]
fn new_todo_reaches_other_tab_through_relay() {
    let mut browser = Browser::new(&[Todo::new("a")], 2);

    browser.tab(0).set_input("b");
    assert!(browser.tab(0).add_todo());
    assert_eq!(browser.tab(0).app_state().input_value, "");
    browser.pump();

    assert_eq!(
        load_todos(&*browser.store).expect("load"),
        vec![Todo::new("a"), Todo::new("b")]
    );
    let other = browser.tab(1).view();
    let texts: Vec<&str> = other.active.iter().map(|row| row.text.as_str()).collect();
    assert_eq!(texts, vec!["a", "b"]);
    assert!(other.completed.is_empty());
}

#[test]
fn claiming_a_row_clears_other_tab_highlight() {
    let mut browser = Browser::new(&[Todo::new("a"), Todo::new("b"), Todo::new("c")], 2);
    browser.tab(1).focus(Focus::Row(2));
    browser.pump();
    assert_eq!(browser.tab(1).view().highlighted_rows(), 1);

    browser.tab(0).focus(Focus::Row(0));
    browser.pump();

    assert_eq!(browser.tab(1).view().highlighted_rows(), 0);
    assert_eq!(browser.tab(1).local_state().highlighted_id, None);
    assert_eq!(browser.tab(0).view().highlighted_rows(), 1);
    assert_eq!(browser.tab(0).local_state().highlighted_id, Some(0));
}

#[test]
fn bare_update_keeps_receiver_edit_state() {
    let mut browser = Browser::new(&[Todo::new("a"), Todo::new("b")], 2);
    browser.tab(1).set_input("half typed");
    browser.tab(1).focus(Focus::Text(1));
    browser.pump();

    browser.tab(0).toggle_done(0);
    browser.pump();

    let receiver = browser.tab(1);
    assert_eq!(receiver.app_state().editing_id, Some(1));
    assert_eq!(receiver.app_state().input_value, "half typed");
    assert_eq!(receiver.todos()[0], Todo::completed("a"));
}

#[test]
fn update_with_payload_merges_shallowly() {
    let mut browser = Browser::new(&[Todo::new("a")], 1);
    browser.tab(0).set_input("mine");
    browser.tab(0).handle_message(&ChannelMsg::update_with(AppStatePatch {
        editing_id: Some(Some(0)),
        input_value: None,
    }));
    assert_eq!(browser.tab(0).app_state().editing_id, Some(0));
    assert_eq!(browser.tab(0).app_state().input_value, "mine");
}

#[test]
fn duplicate_updates_are_idempotent() {
    let mut browser = Browser::new(&[Todo::new("a"), Todo::completed("b")], 1);
    let msg = ChannelMsg::update_with(AppStatePatch {
        editing_id: None,
        input_value: Some("x".to_string()),
    });

    browser.tab(0).handle_message(&msg);
    let once = browser.tab(0).view().clone();
    browser.tab(0).handle_message(&msg);
    assert_eq!(browser.tab(0).view(), &once);

    browser.tab(0).handle_message(&ChannelMsg::Signal);
    browser.tab(0).handle_message(&ChannelMsg::Update(None));
    assert_eq!(browser.tab(0).view(), &once);

    browser.tab(0).handle_message(&ChannelMsg::ClearHighlight);
    browser.tab(0).handle_message(&ChannelMsg::ClearHighlight);
    assert_eq!(browser.tab(0).view().highlighted_rows(), 0);
}

#[test]
fn reorder_round_trips_to_other_tab() {
    let mut browser = Browser::new(
        &[
            Todo::new("a"),
            Todo::completed("b"),
            Todo::new("c"),
            Todo::completed("d"),
        ],
        2,
    );

    assert!(browser.tab(0).reorder(&[2, 0], &[3, 1]));
    browser.pump();

    let expected = vec![
        Todo::new("c"),
        Todo::new("a"),
        Todo::completed("d"),
        Todo::completed("b"),
    ];
    assert_eq!(load_todos(&*browser.store).expect("load"), expected);
    assert_eq!(browser.tab(1).todos(), expected.as_slice());
    assert_eq!(browser.tab(1).view().traversal(), vec![0, 1, 2, 3]);
}

#[test]
fn highlight_is_exclusive_across_many_claims() {
    let mut browser = Browser::new(&[Todo::new("a"), Todo::new("b")], 3);
    for n in 0..3 {
        browser.tab(n).focus(Focus::Row(n % 2));
        browser.pump();
        let lit: usize = (0..3)
            .map(|m| browser.tab(m).view().highlighted_rows())
            .sum();
        assert_eq!(lit, 1, "after tab {n} claimed");
        assert_eq!(browser.tab(n).view().highlighted_rows(), 1);
    }
}

#[test]
fn untyped_object_message_reloads_like_bare_update() {
    let mut browser = Browser::new(&[Todo::new("a")], 1);
    save_todos(&*browser.store, &[Todo::new("a"), Todo::new("from elsewhere")]).expect("write");
    while browser.changes.try_recv().is_ok() {}

    let msg: ChannelMsg = serde_json::from_str(r#"{"foo":1}"#).expect("decode");
    browser.tab(0).handle_message(&msg);

    assert_eq!(browser.tab(0).todos().len(), 2);
    assert_eq!(browser.tab(0).view().active[1].text, "from elsewhere");
}
