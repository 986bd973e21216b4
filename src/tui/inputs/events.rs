use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use super::InputEvent;

/// Reads crossterm key presses on their own thread and hands them to the
/// UI loop without blocking it.
pub struct Events {
    rx: UnboundedReceiver<InputEvent>,
}

impl Events {
    pub fn new(tick_rate: Duration) -> Events {
        let (tx, rx) = unbounded_channel();

        thread::spawn(move || loop {
            match crossterm::event::poll(tick_rate) {
                Ok(true) => {
                    if let Ok(crossterm::event::Event::Key(key)) = crossterm::event::read() {
                        if tx.send(InputEvent::Input(key.code)).is_err() {
                            break;
                        }
                    }
                }
                Ok(false) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!("Stopped reading terminal input: {err}");
                    break;
                }
            }
        });

        Events { rx }
    }

    pub fn next(&mut self) -> Option<InputEvent> {
        self.rx.try_recv().ok()
    }
}
