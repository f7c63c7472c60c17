//! User input kinds that count as activity.

use std::fmt;

/// The fixed set of input events the activity detector listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputKind {
    MouseMove,
    MouseDown,
    KeyDown,
    Scroll,
    TouchStart,
    /// The tab became visible or regained focus.
    FocusRegained,
}

impl InputKind {
    pub const ALL: [InputKind; 6] = [
        InputKind::MouseMove,
        InputKind::MouseDown,
        InputKind::KeyDown,
        InputKind::Scroll,
        InputKind::TouchStart,
        InputKind::FocusRegained,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::MouseMove => "mousemove",
            InputKind::MouseDown => "mousedown",
            InputKind::KeyDown => "keydown",
            InputKind::Scroll => "scroll",
            InputKind::TouchStart => "touchstart",
            InputKind::FocusRegained => "focus",
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
