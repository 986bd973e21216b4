use crossterm::event::KeyCode;

pub mod events;

#[derive(Debug)]
pub enum InputEvent {
    Input(KeyCode),
}
