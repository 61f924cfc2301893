use crate::app::{App, ListZone, CHECKBOX_WIDTH};
use crate::theme::{self, icons};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};
use tabtodo_core::render::RenderedRow;
use tabtodo_core::{Focus, Group, KeyValueStore};

pub fn render<S: KeyValueStore>(f: &mut Frame, app: &mut App<S>) {
    let area = f.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Percentage(55),
            Constraint::Min(3),
            Constraint::Length(1),
        ])
        .split(area);

    render_input(f, app, chunks[0]);
    let active = render_group(f, app, Group::Active, chunks[1]);
    let completed = render_group(f, app, Group::Completed, chunks[2]);
    render_hints(f, app, chunks[3]);
    app.update_layout(vec![active, completed]);
}

fn render_input<S: KeyValueStore>(f: &mut Frame, app: &App<S>, area: Rect) {
    let focused = app.controller.current_focus() == Focus::Input;
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled("New todo", theme::HEADER_STYLE))
        .border_style(if focused {
            theme::FOCUSED_BORDER
        } else {
            Style::default()
        });
    let inner = block.inner(area);
    f.render_widget(block, area);

    let value = &app.controller.view().input_value;
    f.render_widget(Paragraph::new(value.as_str()), inner);
    if focused {
        let caret = u16::try_from(value.chars().count()).unwrap_or(u16::MAX);
        f.set_cursor(
            inner.x.saturating_add(caret).min(inner.right().saturating_sub(1)),
            inner.y,
        );
    }
}

fn render_group<S: KeyValueStore>(
    f: &mut Frame,
    app: &mut App<S>,
    group: Group,
    area: Rect,
) -> ListZone {
    let view = app.controller.view();
    let rows = match group {
        Group::Active => &view.active,
        Group::Completed => &view.completed,
    };
    let title = match group {
        Group::Active => format!("Active ({})", rows.len()),
        Group::Completed => format!("Completed ({})", rows.len()),
    };
    let focused = app
        .controller
        .current_focus()
        .row()
        .and_then(|index| view.row(index))
        .is_some_and(|row| row.group() == group);
    let block = Block::default()
        .borders(Borders::ALL)
        .title(Span::styled(title, theme::HEADER_STYLE))
        .border_style(if focused {
            theme::FOCUSED_BORDER
        } else {
            Style::default()
        });
    let inner = block.inner(area);
    f.render_widget(block, area);

    let drop_at = app
        .drag()
        .and_then(|drag| drag.hover)
        .filter(|target| target.group == group)
        .map(|target| target.position);

    let focused_position = app
        .controller
        .current_focus()
        .row()
        .and_then(|index| rows.iter().position(|row| row.index == index));

    let mut items: Vec<ListItem> = rows
        .iter()
        .enumerate()
        .map(|(position, row)| {
            ListItem::new(row_line(app, row, position, drop_at == Some(position)))
        })
        .collect();
    if drop_at == Some(rows.len()) {
        items.push(ListItem::new(Line::from(Span::styled(
            icons::DROP,
            theme::DROP_MARKER_STYLE,
        ))));
    }
    if rows.is_empty() && drop_at.is_none() {
        items.push(ListItem::new(Line::from(Span::styled(
            "nothing here",
            theme::HINT_STYLE,
        ))));
    }

    // Selection only drives scrolling; rows carry their own styles.
    let mut state = app.list_state(group);
    state.select(drop_at.or(focused_position));
    f.render_stateful_widget(List::new(items), inner, &mut state);
    let offset = state.offset();

    if let Some((position, row)) = rows.iter().enumerate().find(|(_, row)| row.edit.is_some()) {
        let text_len = app
            .edit_text(row.index)
            .map(|text| text.chars().count())
            .unwrap_or_else(|| row.edit.map(|edit| edit.caret).unwrap_or(0));
        let x = inner
            .x
            .saturating_add(CHECKBOX_WIDTH)
            .saturating_add(u16::try_from(text_len).unwrap_or(u16::MAX));
        let visible = position.checked_sub(offset);
        let y = visible.map(|line| inner.y.saturating_add(u16::try_from(line).unwrap_or(u16::MAX)));
        if let Some(y) = y.filter(|y| *y < inner.bottom()) {
            if app.controller.current_focus() == Focus::Text(row.index) {
                f.set_cursor(x.min(inner.right().saturating_sub(1)), y);
            }
        }
    }

    let order = rows.iter().map(|row| row.index).collect();
    app.set_list_state(group, state);
    ListZone {
        group,
        area: inner,
        order,
        offset,
    }
}

fn row_line<'a, S: KeyValueStore>(
    app: &'a App<S>,
    row: &'a RenderedRow,
    position: usize,
    drop_here: bool,
) -> Line<'a> {
    let checkbox = if drop_here {
        Span::styled(format!("{:<4}", icons::DROP), theme::DROP_MARKER_STYLE)
    } else if row.done {
        Span::raw(format!("{:<4}", icons::CHECKED))
    } else {
        Span::raw(format!("{:<4}", icons::UNCHECKED))
    };

    let base = theme::zebra_row_style(position);
    let (text, style) = match (row.edit, app.edit_text(row.index)) {
        (Some(_), Some(buffer)) => (buffer.to_string(), theme::EDIT_STYLE),
        (Some(_), None) => (row.text.clone(), theme::EDIT_STYLE),
        (None, _) if row.highlighted => (row.text.clone(), theme::HIGHLIGHT_STYLE),
        (None, _) if row.done => (row.text.clone(), base.patch(theme::DONE_STYLE)),
        (None, _) => (row.text.clone(), base),
    };
    Line::from(vec![checkbox, Span::styled(text, style)])
}

fn render_hints<S: KeyValueStore>(f: &mut Frame, app: &App<S>, area: Rect) {
    let hint = match app.controller.current_focus() {
        Focus::Input => "Enter add | Esc leave | Down list",
        Focus::Text(_) => "Enter save | Esc done | Up/Down save and move",
        Focus::Row(_) | Focus::None => {
            "i input | Up/Down move | e edit | x toggle | J/K reorder | q quit"
        }
    };
    let line = Line::from(vec![
        Span::styled(hint, theme::HINT_STYLE),
        Span::styled("  | ", theme::HINT_STYLE),
        Span::styled(app.controller.tab_id(), theme::HINT_STYLE),
    ]);
    f.render_widget(Paragraph::new(line), area);
}
