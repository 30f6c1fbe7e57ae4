use crossbeam_channel::{Receiver, Sender, TryRecvError};

/// How a transition ended. `Interrupted` means it was superseded before it
/// reached its target, which callers treat as cancellation rather than
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Completed,
    Interrupted,
}

/// Resolving half of a completion signal. Consuming `self` guarantees it
/// settles at most once; dropping it unresolved reads as `Interrupted`.
#[derive(Debug)]
pub struct Completer {
    tx: Sender<TransitionOutcome>,
}

impl Completer {
    pub fn complete(self) {
        self.settle(TransitionOutcome::Completed);
    }

    pub fn interrupt(self) {
        self.settle(TransitionOutcome::Interrupted);
    }

    fn settle(self, outcome: TransitionOutcome) {
        // The waiting side may have been dropped; nobody is left to tell.
        let _ = self.tx.send(outcome);
    }
}

#[derive(Debug)]
enum State {
    Ready(TransitionOutcome),
    Pending(Receiver<TransitionOutcome>),
    All(Vec<Completion>),
}

/// Waiting half of a completion signal. Polled from the control loop, never
/// blocks.
#[derive(Debug)]
pub struct Completion {
    state: State,
}

impl Completion {
    pub fn pair() -> (Completer, Completion) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            Completer { tx },
            Completion {
                state: State::Pending(rx),
            },
        )
    }

    pub fn ready(outcome: TransitionOutcome) -> Self {
        Self {
            state: State::Ready(outcome),
        }
    }

    pub fn completed() -> Self {
        Self::ready(TransitionOutcome::Completed)
    }

    pub fn interrupted() -> Self {
        Self::ready(TransitionOutcome::Interrupted)
    }

    /// Settles once every part completes, or as soon as any part is
    /// interrupted.
    pub fn all(parts: impl IntoIterator<Item = Completion>) -> Self {
        let mut composite = Self {
            state: State::All(parts.into_iter().collect()),
        };
        composite.poll();
        composite
    }

    pub fn poll(&mut self) -> Option<TransitionOutcome> {
        let settled = match &mut self.state {
            State::Ready(outcome) => return Some(*outcome),
            State::Pending(rx) => match rx.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Disconnected) => TransitionOutcome::Interrupted,
            },
            State::All(parts) => {
                let mut pending = false;
                let mut interrupted = false;
                for part in parts.iter_mut() {
                    match part.poll() {
                        Some(TransitionOutcome::Interrupted) => interrupted = true,
                        Some(TransitionOutcome::Completed) => {}
                        None => pending = true,
                    }
                }
                if interrupted {
                    TransitionOutcome::Interrupted
                } else if pending {
                    return None;
                } else {
                    TransitionOutcome::Completed
                }
            }
        };
        self.state = State::Ready(settled);
        Some(settled)
    }

    pub fn is_settled(&mut self) -> bool {
        self.poll().is_some()
    }
}
