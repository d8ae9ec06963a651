//! Operator actions produced by key handling.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CursorUp,
    CursorDown,
    CursorFirst,
    CursorLast,
    /// Jump the cursor back to what the active screen shows.
    CursorToCurrent,
    /// Make the row under the cursor the active screen's selection.
    Pick,
    Refresh,
    NextScreen,
    PrevScreen,
    Quit,
}
