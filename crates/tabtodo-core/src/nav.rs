/// Keyboard focus inside one tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Focus {
    #[default]
    None,
    /// The new-todo input line.
    Input,
    /// A row as a whole.
    Row(usize),
    /// The editable text of a row.
    Text(usize),
}

impl Focus {
    pub fn row(self) -> Option<usize> {
        match self {
            Focus::Row(idx) | Focus::Text(idx) => Some(idx),
            Focus::None | Focus::Input => None,
        }
    }

    pub(crate) fn remap(self, map: impl Fn(usize) -> Option<usize>) -> Focus {
        match self {
            Focus::Row(idx) => map(idx).map(Focus::Row).unwrap_or(Focus::None),
            Focus::Text(idx) => map(idx).map(Focus::Text).unwrap_or(Focus::None),
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavKey {
    Up,
    Down,
}

/// Next row in `traversal` from `current`.
///
/// Without a current row, `Down` lands on the first row and `Up` stays put.
pub fn step(traversal: &[usize], current: Option<usize>, key: NavKey) -> Option<usize> {
    let position = current.and_then(|idx| traversal.iter().position(|row| *row == idx));
    match (key, position) {
        (NavKey::Down, None) => traversal.first().copied(),
        (NavKey::Up, None) => None,
        (NavKey::Up, Some(pos)) => pos.checked_sub(1).map(|prev| traversal[prev]),
        (NavKey::Down, Some(pos)) => traversal.get(pos + 1).copied(),
    }
}
