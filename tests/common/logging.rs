use std::{
    io,
    sync::{mpsc::Receiver, Once},
    thread,
};

use log::LevelFilter;
use pop_rs::events::Event;

static LOGGER_INIT: Once = Once::new();

// Set up a logger that logs all log messages with level `level` and above.
pub(crate) fn setup_logger(level: LevelFilter) {
    LOGGER_INIT.call_once(|| {
        fern::Dispatch::new()
            .format(|out, message, record| {
                out.finish(format_args!(
                    "[{:?}][{}] {}",
                    thread::current().id(),
                    record.level(),
                    message
                ))
            })
            .level(level)
            .chain(io::stdout())
            .apply()
            .unwrap();
    })
}

// Counts of the events received so far, by kind.
#[derive(Default, Debug)]
pub(crate) struct EventCounts {
    pub(crate) insert_block: usize,
    pub(crate) change_tip: usize,
    pub(crate) apply_block: usize,
    pub(crate) unapply_block: usize,
    pub(crate) add_payloads: usize,
    pub(crate) remove_payloads: usize,
    pub(crate) fork_resolution: usize,
    pub(crate) other: usize,
}

// Drain every event currently queued in `receiver`.
pub(crate) fn drain_events(receiver: &Receiver<Event>) -> EventCounts {
    let mut counts = EventCounts::default();
    while let Ok(event) = receiver.try_recv() {
        match event {
            Event::InsertBlock(_) => counts.insert_block += 1,
            Event::ChangeTip(_) => counts.change_tip += 1,
            Event::ApplyBlock(_) => counts.apply_block += 1,
            Event::UnapplyBlock(_) => counts.unapply_block += 1,
            Event::AddPayloads(_) => counts.add_payloads += 1,
            Event::RemovePayloads(_) => counts.remove_payloads += 1,
            Event::ForkResolution(_) => counts.fork_resolution += 1,
            _ => counts.other += 1,
        }
    }
    counts
}
