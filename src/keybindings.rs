//! Keybinding definitions shared by the help overlay, the status bar and
//! the key handler.
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub key: &'static str,
    pub description: &'static str,
    pub category: KeyCategory,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyCategory {
    Navigation,
    Actions,
    System,
}

impl KeyCategory {
    pub fn title(&self) -> &'static str {
        match self {
            KeyCategory::Navigation => "Navigation",
            KeyCategory::Actions => "Actions",
            KeyCategory::System => "System",
        }
    }
}

/// What a key press asks the app to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    SelectPrevious,
    SelectNext,
    SelectFirst,
    SelectLast,
    SortByCpu,
    SortByMem,
    SortByPid,
    ToggleAll,
    CycleInterface,
    /// First `d`; a second one in a row kills the selected process
    KillPending,
    ToggleHelp,
    Quit,
}

/// Map a key event to an action
pub fn action_for(key: &KeyEvent) -> Option<Action> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Action::Quit),
            _ => None,
        };
    }

    match key.code {
        KeyCode::Up | KeyCode::Char('k') => Some(Action::SelectPrevious),
        KeyCode::Down | KeyCode::Char('j') => Some(Action::SelectNext),
        KeyCode::Char('g') => Some(Action::SelectFirst),
        KeyCode::Char('G') => Some(Action::SelectLast),
        KeyCode::Char('c') => Some(Action::SortByCpu),
        KeyCode::Char('m') => Some(Action::SortByMem),
        KeyCode::Char('p') => Some(Action::SortByPid),
        KeyCode::Char('a') => Some(Action::ToggleAll),
        KeyCode::Char('n') => Some(Action::CycleInterface),
        KeyCode::Char('d') => Some(Action::KillPending),
        KeyCode::Char('h') | KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::Char('q') | KeyCode::Esc => Some(Action::Quit),
        _ => None,
    }
}

/// Get all keybindings
pub fn get_all_keybindings() -> Vec<KeyBinding> {
    vec![
        // Navigation
        KeyBinding {
            key: "↑/k",
            description: "Move selection up",
            category: KeyCategory::Navigation,
        },
        KeyBinding {
            key: "↓/j",
            description: "Move selection down",
            category: KeyCategory::Navigation,
        },
        KeyBinding {
            key: "g/G",
            description: "Jump to top/bottom",
            category: KeyCategory::Navigation,
        },
        // Actions
        KeyBinding {
            key: "c/m/p",
            description: "Sort by CPU/memory/PID",
            category: KeyCategory::Actions,
        },
        KeyBinding {
            key: "a",
            description: "Toggle all processes",
            category: KeyCategory::Actions,
        },
        KeyBinding {
            key: "n",
            description: "Next network interface",
            category: KeyCategory::Actions,
        },
        KeyBinding {
            key: "dd",
            description: "Kill selected process (SIGTERM)",
            category: KeyCategory::Actions,
        },
        // System
        KeyBinding {
            key: "h/?",
            description: "Toggle this help",
            category: KeyCategory::System,
        },
        KeyBinding {
            key: "q/Esc/Ctrl+C",
            description: "Quit",
            category: KeyCategory::System,
        },
    ]
}

/// Get keybindings for the status bar (most common ones)
pub fn get_status_bar_keybindings() -> Vec<(&'static str, &'static str)> {
    vec![
        ("↑↓", "Navigate"),
        ("c/m/p", "Sort"),
        ("dd", "Kill"),
        ("h", "Help"),
        ("q", "Quit"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_ctrl_c_quits() {
        let event = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(action_for(&event), Some(Action::Quit));
    }

    #[test]
    fn test_plain_c_sorts() {
        assert_eq!(action_for(&key(KeyCode::Char('c'))), Some(Action::SortByCpu));
    }

    #[test]
    fn test_vim_navigation() {
        assert_eq!(action_for(&key(KeyCode::Char('j'))), Some(Action::SelectNext));
        assert_eq!(action_for(&key(KeyCode::Up)), Some(Action::SelectPrevious));
        assert_eq!(action_for(&key(KeyCode::Char('G'))), Some(Action::SelectLast));
        assert_eq!(action_for(&key(KeyCode::Char('x'))), None);
    }

    #[test]
    fn test_every_category_has_bindings() {
        let bindings = get_all_keybindings();
        for category in [
            KeyCategory::Navigation,
            KeyCategory::Actions,
            KeyCategory::System,
        ] {
            assert!(bindings.iter().any(|b| b.category == category));
        }
    }
}
