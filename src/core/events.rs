//! Ordered event channel between the operation worker and the foreground loop.
//!
//! Producers push through a cloneable [`EventSender`]; the single consumer
//! drains whatever has arrived on its own schedule without blocking.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

use super::OperationState;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A line printed by an external command
    Output(String),
    Status(String),
    Error(String),
    /// Percentage, never lower than the previous one for the same operation
    Progress(u8),
    Finished(OperationState),
}

pub fn channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: UnboundedSender<Event>,
}

impl EventSender {
    /// Pushes an event and writes the matching log record.
    pub fn send(&self, event: Event) {
        match &event {
            Event::Output(line) => debug!("> {}", line),
            Event::Status(message) => info!("{}", message),
            Event::Error(message) => error!("{}", message),
            Event::Progress(_) => {}
            Event::Finished(state) => info!("Operation finished: {:?}", state),
        }
        // Receiver gone means the UI has shut down
        let _ = self.tx.send(event);
    }

    pub fn output(&self, line: impl Into<String>) {
        self.send(Event::Output(line.into()));
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(Event::Status(message.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(Event::Error(message.into()));
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: UnboundedReceiver<Event>,
}

impl EventReceiver {
    /// Takes every event queued so far, in order. Never waits.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Monotonic 0-100 progress for one operation
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    value: Arc<AtomicU8>,
    events: EventSender,
}

impl ProgressReporter {
    pub fn new(value: Arc<AtomicU8>, events: EventSender) -> Self {
        Self { value, events }
    }

    #[cfg(test)]
    pub fn detached(events: EventSender) -> Self {
        Self::new(Arc::new(AtomicU8::new(0)), events)
    }

    pub fn get(&self) -> u8 {
        self.value.load(Ordering::Acquire)
    }

    /// Raises progress to `percent`; lower values are ignored.
    pub fn advance_to(&self, percent: u8) {
        let percent = percent.min(100);
        let previous = self.value.fetch_max(percent, Ordering::AcqRel);
        if percent > previous {
            self.events.send(Event::Progress(percent));
        }
    }

    /// Nudges progress by `step`, capped at `ceiling`.
    pub fn nudge(&self, step: u8, ceiling: u8) {
        let target = self.get().saturating_add(step).min(ceiling);
        self.advance_to(target);
    }

    pub fn fraction(&self, done: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = (done.min(total) * 100 / total) as u8;
        self.advance_to(percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_preserves_order_and_empties_queue() {
        let (tx, mut rx) = channel();
        tx.status("one");
        tx.output("two");
        tx.error("three");

        assert_eq!(
            rx.drain(),
            vec![
                Event::Status("one".into()),
                Event::Output("two".into()),
                Event::Error("three".into()),
            ]
        );
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn progress_never_goes_backwards() {
        let (tx, mut rx) = channel();
        let progress = ProgressReporter::detached(tx);

        progress.advance_to(40);
        progress.advance_to(10);
        progress.advance_to(40);
        progress.advance_to(250);

        assert_eq!(progress.get(), 100);
        assert_eq!(rx.drain(), vec![Event::Progress(40), Event::Progress(100)]);
    }

    #[test]
    fn nudge_respects_ceiling() {
        let (tx, _rx) = channel();
        let progress = ProgressReporter::detached(tx);
        for _ in 0..100 {
            progress.nudge(2, 95);
        }
        assert_eq!(progress.get(), 95);
    }

    #[test]
    fn producer_thread_and_consumer_see_every_event() {
        let (tx, mut rx) = channel();
        let producer = std::thread::spawn(move || {
            for i in 0..1000 {
                tx.output(i.to_string());
            }
        });

        let mut seen = Vec::new();
        loop {
            let finished = producer.is_finished();
            seen.extend(rx.drain());
            if finished {
                seen.extend(rx.drain());
                break;
            }
        }
        producer.join().expect("producer");

        let expected: Vec<Event> = (0..1000).map(|i| Event::Output(i.to_string())).collect();
        assert_eq!(seen, expected);
    }
}
