// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Bridge: relay worker output into the controller's queue

use crate::messages::{ControlSignal, Envelope, Message};
use crate::{Failure, FailureKind};
use crossbeam_channel::{Receiver, Sender};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// Spawn a bridge thread
///
/// The bridge forwards every message from `input` to `output`, preserving
/// order, until it has forwarded [`Message::Done`]. If `input` disconnects
/// first, the bridge inspects the worker thread: a panic is reported as
/// [`FailureKind::RemoteCrash`]. Either way a [`Message::Done`] is
/// synthesized, so the controller always sees exactly one.
///
/// A control endpoint announced by the worker is passed to `endpoint`
/// instead of `output`.
///
/// The bridge stops early (without further output) if `output` is closed.
pub(crate) fn spawn<T: Send + 'static>(
    name: &str,
    input: Receiver<Envelope<T>>,
    worker: JoinHandle<()>,
    output: Sender<Message<T>>,
    endpoint: Option<Sender<Sender<ControlSignal>>>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{name}-bridge"))
        .spawn(move || {
            let mut relay = Relay {
                output,
                endpoint,
                done_sent: false,
            };
            relay.run(input, worker);
        })
}

struct Relay<T> {
    output: Sender<Message<T>>,
    endpoint: Option<Sender<Sender<ControlSignal>>>,
    done_sent: bool,
}

enum Outcome {
    /// Done was forwarded
    Done,
    /// The worker-facing channel disconnected without Done
    Disconnected,
    /// The controller's queue is closed
    Closed,
}

impl<T> Relay<T> {
    fn run(&mut self, input: Receiver<Envelope<T>>, worker: JoinHandle<()>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.relay(&input)));
        // Unblock a worker waiting on a rendezvous hand-off before joining it
        drop(input);

        match outcome {
            Ok(Outcome::Done) => {
                let _ = worker.join();
            }
            Ok(Outcome::Disconnected) => match worker.join() {
                Ok(()) => {
                    log::debug!(target: "bgwork_core::task", "bridge: worker output closed without Done");
                    self.finish(None);
                }
                Err(payload) => {
                    let mut failure = Failure::from_panic(&*payload);
                    failure.kind = FailureKind::RemoteCrash;
                    log::debug!(target: "bgwork_core::task", "bridge: worker crashed: {}", failure.message);
                    self.finish(Some(failure));
                }
            },
            Ok(Outcome::Closed) => {
                log::debug!(target: "bgwork_core::task", "bridge: controller closed");
                let _ = worker.join();
            }
            Err(payload) => {
                let failure = Failure::from_panic(&*payload);
                log::error!(target: "bgwork_core::task", "bridge: relay failed: {}", failure.message);
                self.finish(Some(failure));
            }
        }
    }

    fn relay(&mut self, input: &Receiver<Envelope<T>>) -> Outcome {
        while let Ok(envelope) = input.recv() {
            let msg = match envelope {
                Envelope::Message(msg) => msg,
                Envelope::Endpoint(sender) => {
                    log::trace!(target: "bgwork_core::task", "bridge: received control endpoint");
                    if let Some(endpoint) = self.endpoint.take() {
                        let _ = endpoint.send(sender);
                    }
                    continue;
                }
            };

            let done = msg.is_done();
            if self.output.send(msg).is_err() {
                return Outcome::Closed;
            }
            if done {
                self.done_sent = true;
                return Outcome::Done;
            }
        }

        Outcome::Disconnected
    }

    /// Report an optional failure followed by Done, unless Done was already sent
    fn finish(&mut self, failure: Option<Failure>) {
        if self.done_sent {
            return;
        }
        if let Some(failure) = failure {
            let _ = self.output.send(Message::Error(failure));
        }
        let _ = self.output.send(Message::Done);
        self.done_sent = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crossbeam_channel::{bounded, unbounded};
    use std::time::Duration;

    fn drain(rx: &Receiver<Message<u32>>) -> Vec<Message<u32>> {
        let mut messages = vec![];
        while let Ok(msg) = rx.recv_timeout(Duration::from_secs(5)) {
            let done = msg.is_done();
            messages.push(msg);
            if done {
                break;
            }
        }
        messages
    }

    #[test]
    fn forwards_until_done() {
        let (in_tx, in_rx) = unbounded();
        let (out_tx, out_rx) = unbounded();
        let worker = thread::spawn(move || {
            for i in 0..3 {
                in_tx.send(Message::Result(i).into()).unwrap();
            }
            in_tx.send(Message::Done.into()).unwrap();
        });

        let bridge = spawn("test", in_rx, worker, out_tx, None).unwrap();
        let messages = drain(&out_rx);
        bridge.join().unwrap();

        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[2], Message::Result(2)));
        assert!(messages[3].is_done());
    }

    #[test]
    fn crash_without_done() {
        let (in_tx, in_rx) = unbounded::<Envelope<u32>>();
        let (out_tx, out_rx) = unbounded();
        let worker = thread::spawn(move || {
            in_tx.send(Message::Result(1).into()).unwrap();
            panic!("abrupt exit");
        });

        let bridge = spawn("test", in_rx, worker, out_tx, None).unwrap();
        let messages = drain(&out_rx);
        bridge.join().unwrap();

        assert_eq!(messages.len(), 3);
        match &messages[1] {
            Message::Error(failure) => {
                assert_eq!(failure.kind, FailureKind::RemoteCrash);
                assert_eq!(failure.message, "abrupt exit");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(messages[2].is_done());
        assert!(out_rx.try_recv().is_err());
    }

    #[test]
    fn disconnect_without_done() {
        let (in_tx, in_rx) = unbounded::<Envelope<u32>>();
        let (out_tx, out_rx) = unbounded();
        let worker = thread::spawn(move || drop(in_tx));

        let bridge = spawn("test", in_rx, worker, out_tx, None).unwrap();
        let messages = drain(&out_rx);
        bridge.join().unwrap();

        assert_eq!(messages.len(), 1);
        assert!(messages[0].is_done());
    }

    #[test]
    fn endpoint_is_intercepted() {
        let (in_tx, in_rx) = unbounded::<Envelope<u32>>();
        let (out_tx, out_rx) = unbounded();
        let (ep_tx, ep_rx) = bounded(1);
        let (ctl_tx, ctl_rx) = unbounded();
        let worker = thread::spawn(move || {
            in_tx.send(Envelope::Endpoint(ctl_tx)).unwrap();
            in_tx.send(Message::Done.into()).unwrap();
        });

        let bridge = spawn("test", in_rx, worker, out_tx, Some(ep_tx)).unwrap();
        let messages = drain(&out_rx);
        bridge.join().unwrap();

        assert_eq!(messages.len(), 1);
        let sender = ep_rx.recv().unwrap();
        sender.send(ControlSignal::Stop).unwrap();
        assert!(matches!(ctl_rx.recv().unwrap(), ControlSignal::Stop));
    }

    #[test]
    fn stops_when_output_closes() {
        let (in_tx, in_rx) = bounded::<Envelope<u32>>(0);
        let (out_tx, out_rx) = unbounded();
        drop(out_rx);
        let worker = thread::spawn(move || {
            let mut sent = 0;
            while in_tx.send(Message::Result(sent).into()).is_ok() {
                sent += 1;
            }
            sent
        });

        // The bridge must release the worker's hand-off channel
        let (handle_tx, handle_rx) = bounded(1);
        let wrapper = thread::spawn(move || {
            let _ = handle_tx.send(worker.join().unwrap());
        });
        spawn("test", in_rx, wrapper, out_tx, None).unwrap().join().unwrap();
        assert_eq!(handle_rx.recv_timeout(Duration::from_secs(5)), Ok(1));
    }
}
