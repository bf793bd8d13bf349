use crate::app::InputMode;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Quit,
    NextTab,
    PrevTab,
    Down,
    Up,
    PageDown,
    PageUp,
    Top,
    Bottom,
    GPrefix,
    ToggleHelp,
    ToggleDetails,
    EnterResource,
    StartCommand,
    StartFilter,
    Refresh,
    StartTunnelPrompt,
    ToggleTunnels,
    StopSelectedTunnel,
    ToggleRegions,
    ToggleOutput,
    Escape,
    SubmitInput,
    CancelInput,
    Backspace,
    Delete,
    InputChar(char),
}

pub fn map_key(mode: InputMode, key: KeyEvent) -> Option<Action> {
    match mode {
        InputMode::Normal => map_normal_mode_key(key),
        InputMode::Command | InputMode::Filter => map_input_mode_key(key),
    }
}

fn map_normal_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Quit),
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('j') if key.modifiers.is_empty() => Some(Action::Down),
        KeyCode::Down => Some(Action::Down),
        KeyCode::Char('k') if key.modifiers.is_empty() => Some(Action::Up),
        KeyCode::Up => Some(Action::Up),
        KeyCode::Left | KeyCode::Char('h') => Some(Action::PrevTab),
        KeyCode::Right | KeyCode::Char('l') => Some(Action::NextTab),
        KeyCode::Char('g') => Some(Action::GPrefix),
        KeyCode::Char('G') | KeyCode::End => Some(Action::Bottom),
        KeyCode::Home => Some(Action::Top),
        KeyCode::Char('?') => Some(Action::ToggleHelp),
        KeyCode::Char('r') | KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char('/') => Some(Action::StartFilter),
        KeyCode::Char(':') => Some(Action::StartCommand),
        KeyCode::Char(';') if key.modifiers.contains(KeyModifiers::SHIFT) => {
            Some(Action::StartCommand)
        }
        KeyCode::Char('p') => Some(Action::StartTunnelPrompt),
        KeyCode::Char('t') => Some(Action::ToggleTunnels),
        KeyCode::Char('x') => Some(Action::StopSelectedTunnel),
        KeyCode::Char('R') => Some(Action::ToggleRegions),
        KeyCode::Char('o') => Some(Action::ToggleOutput),
        KeyCode::Char('d') if key.modifiers.is_empty() => Some(Action::ToggleDetails),
        KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(Action::PageDown)
        }
        KeyCode::Char('u') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::PageUp),
        KeyCode::PageDown => Some(Action::PageDown),
        KeyCode::PageUp => Some(Action::PageUp),
        KeyCode::Enter => Some(Action::EnterResource),
        KeyCode::Esc => Some(Action::Escape),
        _ => None,
    }
}

fn map_input_mode_key(key: KeyEvent) -> Option<Action> {
    match key.code {
        KeyCode::Esc => Some(Action::CancelInput),
        KeyCode::Enter => Some(Action::SubmitInput),
        KeyCode::Char('m') | KeyCode::Char('j')
            if key.modifiers.contains(KeyModifiers::CONTROL) =>
        {
            Some(Action::SubmitInput)
        }
        KeyCode::Backspace => Some(Action::Backspace),
        KeyCode::Delete => Some(Action::Delete),
        KeyCode::Char('w') if key.modifiers.contains(KeyModifiers::CONTROL) => Some(Action::Delete),
        KeyCode::Char(c) if key.modifiers.is_empty() || key.modifiers == KeyModifiers::SHIFT => {
            Some(Action::InputChar(c))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::{Action, map_key};
    use crate::app::InputMode;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    #[test]
    fn normal_mode_maps_quit() {
        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Normal, key), Some(Action::Quit));
    }

    #[test]
    fn normal_mode_maps_tunnel_keys() {
        let key = |c| KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE);
        assert_eq!(
            map_key(InputMode::Normal, key('p')),
            Some(Action::StartTunnelPrompt)
        );
        assert_eq!(
            map_key(InputMode::Normal, key('t')),
            Some(Action::ToggleTunnels)
        );
        assert_eq!(
            map_key(InputMode::Normal, key('x')),
            Some(Action::StopSelectedTunnel)
        );
    }

    #[test]
    fn shifted_r_opens_regions_while_r_refreshes() {
        let refresh = KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE);
        let regions = KeyEvent::new(KeyCode::Char('R'), KeyModifiers::SHIFT);
        assert_eq!(map_key(InputMode::Normal, refresh), Some(Action::Refresh));
        assert_eq!(map_key(InputMode::Normal, regions), Some(Action::ToggleRegions));
        assert_eq!(
            map_key(InputMode::Command, regions),
            Some(Action::InputChar('R'))
        );
    }

    #[test]
    fn input_mode_maps_char() {
        let key = KeyEvent::new(KeyCode::Char('a'), KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Command, key), Some(Action::InputChar('a')));
    }

    #[test]
    fn input_mode_rejects_ctrl_c() {
        let key = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(map_key(InputMode::Filter, key), None);
    }

    #[test]
    fn input_mode_treats_q_as_text() {
        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Filter, key), Some(Action::InputChar('q')));
    }

    #[test]
    fn esc_differs_by_mode() {
        let key = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        assert_eq!(map_key(InputMode::Normal, key), Some(Action::Escape));
        assert_eq!(map_key(InputMode::Command, key), Some(Action::CancelInput));
    }

    #[test]
    fn input_mode_maps_ctrl_m_and_ctrl_j_to_submit() {
        for c in ['m', 'j'] {
            let key = KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL);
            assert_eq!(map_key(InputMode::Command, key), Some(Action::SubmitInput));
        }
    }
}
