// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! The background work controller

mod registry;

pub use registry::{Registry, WorkerId};

use crate::config::{Config, ErrorMode, Options};
use crate::messages::{ControlSignal, Erased, Message};
use crate::runner::Scheduler;
use crate::task::worker::{self, Work};
use crate::task::{Substrate, TaskContext, bridge};
use crate::util::{warn_about_error, warn_about_failure};
use crate::{Error, Failure, Result, TaskError};
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded, unbounded};
use smallvec::SmallVec;
use std::any::Any;
use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::rc::Rc;
use std::thread::JoinHandle;
use std::time::Duration;

bitflags! {
    /// Controller lifecycle state
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    struct State: u8 {
        /// The worker has been spawned
        const STARTED = 1 << 0;
        /// Completion was observed, or the controller was closed
        const DONE = 1 << 1;
        /// Paused by the controller; selects the slower poll interval
        const PAUSED = 1 << 2;
    }
}

type Signals = SmallVec<[ControlSignal; 4]>;

/// Controller end of the control channel
enum ControlLink {
    /// Not started: signals are buffered
    Pending(Signals),
    /// Started on [`Substrate::Port`]: buffering until the worker announces
    /// its control channel
    Awaiting(Signals, Receiver<Sender<ControlSignal>>),
    Ready(Sender<ControlSignal>),
    Closed,
}

struct Handlers<T> {
    progress: Option<Rc<dyn Fn(T)>>,
    done: Option<Rc<dyn Fn()>>,
    message: Option<Rc<dyn Fn(Erased)>>,
}

impl<T> Default for Handlers<T> {
    fn default() -> Self {
        Handlers {
            progress: None,
            done: None,
            message: None,
        }
    }
}

struct Controller<T> {
    id: WorkerId,
    name: String,
    config: Config,
    substrate: Substrate,
    registry: Option<Registry>,
    work: Option<Work<T>>,
    state: State,
    handlers: Handlers<T>,
    link: ControlLink,
    output: Option<Receiver<Message<T>>>,
    bridge: Option<JoinHandle<()>>,
    scheduler: Option<Rc<dyn Scheduler>>,
    dropped: u64,
    choke_warned: bool,
    last_error: Option<Failure>,
}

impl<T: Send + 'static> Controller<T> {
    /// Spawn the worker unit and bridge
    fn launch(&mut self) -> Result<()> {
        let Some(work) = self.work.take() else {
            return Ok(());
        };
        self.state.insert(State::STARTED);

        let buffered = match std::mem::replace(&mut self.link, ControlLink::Closed) {
            ControlLink::Pending(signals) => signals,
            _ => Signals::new(),
        };

        if let Err(error) = self.spawn_threads(work, buffered) {
            log::error!(target: "bgwork_core::work", "{}: failed to spawn worker: {error}", self.name);
            self.finish();
            return Err(error.into());
        }

        log::debug!(target: "bgwork_core::work", "{}: started ({:?})", self.name, self.substrate);
        Ok(())
    }

    fn spawn_threads(&mut self, work: Work<T>, buffered: Signals) -> std::io::Result<()> {
        let (out_tx, out_rx) = unbounded();

        match self.substrate {
            Substrate::Port => {
                let spawned = worker::spawn(&self.name, Substrate::Port, work, None)?;
                let (endpoint_tx, endpoint_rx) = bounded(1);
                let bridge = bridge::spawn(
                    &self.name,
                    spawned.output,
                    spawned.handle,
                    out_tx,
                    Some(endpoint_tx),
                )?;
                self.bridge = Some(bridge);
                self.link = ControlLink::Awaiting(buffered, endpoint_rx);
            }
            substrate => {
                // Flush before spawning so that the worker observes buffered
                // signals before its first emission
                let (control_tx, control_rx) = unbounded();
                for signal in buffered {
                    let _ = control_tx.send(signal);
                }

                let spawned = worker::spawn(&self.name, substrate, work, Some(control_rx))?;
                let bridge = bridge::spawn(&self.name, spawned.output, spawned.handle, out_tx, None)?;
                self.bridge = Some(bridge);
                if let Some(registry) = self.registry.as_ref() {
                    registry.insert(self.id, control_tx.clone());
                }
                self.link = ControlLink::Ready(control_tx);
            }
        }

        self.output = Some(out_rx);
        Ok(())
    }
}

impl<T> Controller<T> {
    /// Complete the port hand-shake if the endpoint has arrived
    fn resolve_endpoint(&mut self) {
        let received = match &self.link {
            ControlLink::Awaiting(_, endpoint) => endpoint.try_recv(),
            _ => return,
        };

        match received {
            Ok(control) => {
                log::trace!(target: "bgwork_core::work", "{}: control endpoint established", self.name);
                if let ControlLink::Awaiting(buffered, _) = std::mem::replace(&mut self.link, ControlLink::Closed) {
                    for signal in buffered {
                        let _ = control.send(signal);
                    }
                }
                if let Some(registry) = self.registry.as_ref() {
                    registry.insert(self.id, control.clone());
                }
                self.link = ControlLink::Ready(control);
            }
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                log::debug!(target: "bgwork_core::work", "{}: worker ended without a control endpoint", self.name);
                self.link = ControlLink::Closed;
            }
        }
    }

    fn send_signal(&mut self, signal: ControlSignal) {
        if self.state.contains(State::DONE) {
            log::trace!(target: "bgwork_core::work", "{}: ignoring {signal:?} after completion", self.name);
            return;
        }

        self.resolve_endpoint();
        match &mut self.link {
            ControlLink::Pending(buffered) | ControlLink::Awaiting(buffered, _) => buffered.push(signal),
            ControlLink::Ready(control) => {
                // The worker may already have exited
                let _ = control.send(signal);
            }
            ControlLink::Closed => (),
        }
    }

    /// Mark as done and release all channels
    ///
    /// Returns the handlers on the first call, none thereafter.
    fn finish(&mut self) -> Handlers<T> {
        if self.state.contains(State::DONE) {
            return Handlers::default();
        }

        self.state.insert(State::DONE);
        self.state.remove(State::PAUSED);
        self.work = None;
        self.link = ControlLink::Closed;
        self.output = None;
        self.scheduler = None;
        if let Some(registry) = self.registry.as_ref() {
            registry.remove(self.id);
        }
        std::mem::take(&mut self.handlers)
    }

    fn poll_delay(&self) -> Option<Duration> {
        if self.state.contains(State::DONE) {
            None
        } else if self.state.contains(State::PAUSED) {
            Some(self.config.paused_poll_interval())
        } else {
            Some(self.config.poll_interval())
        }
    }
}

impl<T> Drop for Controller<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.as_ref() {
            registry.remove(self.id);
        }
    }
}

/// Builder for [`BackgroundWork`]
///
/// Construct with [`BackgroundWork::builder`].
pub struct Builder<T> {
    work: Work<T>,
    config: Option<Config>,
    substrate: Substrate,
    registry: Option<Registry>,
    name: Option<String>,
}

impl<T: Send + 'static> Builder<T> {
    /// Use the given config
    ///
    /// By default, config is read using [`Options::from_env`].
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Select the hand-off strategy (default: [`Substrate::Thread`])
    pub fn substrate(mut self, substrate: Substrate) -> Self {
        self.substrate = substrate;
        self
    }

    /// Register the worker with `registry` while it is live
    pub fn registry(mut self, registry: &Registry) -> Self {
        self.registry = Some(registry.clone());
        self
    }

    /// Set a name, used for thread names and log messages
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the controller
    ///
    /// The worker is not started until [`BackgroundWork::start`] (or a
    /// method which auto-starts) is called.
    pub fn build(self) -> BackgroundWork<T> {
        let config = self.config.unwrap_or_else(|| {
            Options::from_env().read_config().unwrap_or_else(|error| {
                warn_about_error("BackgroundWork: failed to read config", &error);
                Config::default()
            })
        });

        let id = WorkerId::next();
        let name = self.name.unwrap_or_else(|| format!("bgwork{id}"));

        BackgroundWork(Rc::new(RefCell::new(Controller {
            id,
            name,
            config,
            substrate: self.substrate,
            registry: self.registry,
            work: Some(self.work),
            state: State::empty(),
            handlers: Handlers::default(),
            link: ControlLink::Pending(Signals::new()),
            output: None,
            bridge: None,
            scheduler: None,
            dropped: 0,
            choke_warned: false,
            last_error: None,
        })))
    }
}

/// A unit of background work and its controller
///
/// The work closure runs on its own thread. Its results, messages, failures
/// and completion are delivered to handlers on the thread owning this
/// controller, from a poll step run by a [`Scheduler`]. Handlers are never
/// invoked from another thread (this type is `!Send`) and the poll step never
/// blocks.
///
/// Lifecycle: a controller is *inert* until [`Self::start`] (or
/// [`Self::on_progress`] / [`Self::on_done`]) is called, *started* until the
/// worker reports completion, then *done*. [`Self::close`] moves directly to
/// *done* without invoking the done handler. Nothing is delivered after done.
///
/// Clones refer to the same controller.
pub struct BackgroundWork<T>(Rc<RefCell<Controller<T>>>);

impl<T> Clone for BackgroundWork<T> {
    fn clone(&self) -> Self {
        BackgroundWork(self.0.clone())
    }
}

impl<T> Debug for BackgroundWork<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.0.borrow();
        f.debug_struct("BackgroundWork")
            .field("name", &c.name)
            .field("state", &c.state)
            .field("substrate", &c.substrate)
            .field("dropped", &c.dropped)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> BackgroundWork<T> {
    /// Construct with default settings
    ///
    /// The work closure receives a [`TaskContext`] and `data`. It is run on a
    /// new thread once started.
    pub fn new<D, F>(data: D, work: F) -> Self
    where
        D: Send + 'static,
        F: FnOnce(&mut TaskContext<T>, D) -> std::result::Result<(), TaskError> + Send + 'static,
    {
        Self::builder(data, work).build()
    }

    /// Construct a [`Builder`]
    pub fn builder<D, F>(data: D, work: F) -> Builder<T>
    where
        D: Send + 'static,
        F: FnOnce(&mut TaskContext<T>, D) -> std::result::Result<(), TaskError> + Send + 'static,
    {
        Builder {
            work: Box::new(move |cx: &mut TaskContext<T>| work(cx, data)),
            config: None,
            substrate: Substrate::default(),
            registry: None,
            name: None,
        }
    }

    /// Start the worker
    ///
    /// Spawns the worker and bridge threads, flushes buffered control
    /// signals and schedules the first poll step on `scheduler` after the
    /// poll interval. Does nothing if already started or done.
    pub fn start<S: Scheduler + Clone + 'static>(&self, scheduler: &S) -> Result<()> {
        let delay = {
            let mut c = self.0.borrow_mut();
            if c.state.intersects(State::STARTED | State::DONE) {
                return Ok(());
            }
            c.scheduler = Some(Rc::new(scheduler.clone()));
            c.launch()?;
            c.poll_delay()
        };

        if let Some(delay) = delay {
            self.schedule(delay);
        }
        Ok(())
    }

    /// Set the progress handler and start
    ///
    /// `f` is called once per result, in emission order (or, with
    /// [`Config::drop_intermediate`], with the latest result of each poll
    /// step). Replaces any previous progress handler.
    pub fn on_progress<S, F>(&self, scheduler: &S, f: F) -> Result<&Self>
    where
        S: Scheduler + Clone + 'static,
        F: Fn(T) + 'static,
    {
        self.0.borrow_mut().handlers.progress = Some(Rc::new(f));
        self.start(scheduler)?;
        Ok(self)
    }

    /// Set the done handler and start
    ///
    /// `f` is called once, after the last result, when the worker completes
    /// (whether it succeeded, failed or was stopped). It is not called after
    /// [`Self::close`]. Replaces any previous done handler.
    pub fn on_done<S, F>(&self, scheduler: &S, f: F) -> Result<&Self>
    where
        S: Scheduler + Clone + 'static,
        F: Fn() + 'static,
    {
        self.0.borrow_mut().handlers.done = Some(Rc::new(f));
        self.start(scheduler)?;
        Ok(self)
    }
}

impl<T: 'static> BackgroundWork<T> {
    /// Set the message handler
    ///
    /// `f` receives each message sent with [`TaskContext::send_message`].
    /// This does not start the worker.
    pub fn on_message<F: Fn(Erased) + 'static>(&self, f: F) -> &Self {
        self.0.borrow_mut().handlers.message = Some(Rc::new(f));
        self
    }

    /// Send an application-defined message to the worker
    ///
    /// The worker receives [`ControlSignal::Custom`]. Signals sent before the
    /// control channel exists are buffered. Does nothing once done.
    pub fn send_message<M: Any + Send + Debug>(&self, msg: M) {
        self.0.borrow_mut().send_signal(ControlSignal::custom(msg));
    }

    /// Ask the worker to pause
    ///
    /// The worker blocks in its next [`TaskContext::yield_value`] or
    /// [`TaskContext::check_pause`] until resumed. While paused the
    /// controller polls at [`Config::paused_poll_interval_ms`].
    pub fn pause(&self) {
        let mut c = self.0.borrow_mut();
        if !c.state.contains(State::DONE) {
            c.state.insert(State::PAUSED);
        }
        c.send_signal(ControlSignal::Pause);
    }

    /// Ask the worker to resume after [`Self::pause`]
    pub fn resume(&self) {
        let mut c = self.0.borrow_mut();
        c.state.remove(State::PAUSED);
        c.send_signal(ControlSignal::Resume);
    }

    /// Ask the worker to stop
    ///
    /// The worker observes [`TaskError::Stopped`] at its next interaction
    /// with its [`TaskContext`]. Its completion is still reported to the
    /// done handler.
    pub fn stop(&self) {
        self.0.borrow_mut().send_signal(ControlSignal::Stop);
    }

    /// Close the controller
    ///
    /// Marks the work done without invoking the done handler, and drops the
    /// channels so that the worker observes [`TaskError::Closed`] on its
    /// next emission. Calling again has no effect.
    pub fn close(&self) {
        let handlers = self.0.borrow_mut().finish();
        drop(handlers);
        log::debug!(target: "bgwork_core::work", "{}: closed", self.name());
    }

    /// Run one poll step
    ///
    /// Drains the messages available at the start of the step and dispatches
    /// them to the handlers. This is normally called by the scheduled poll
    /// task but hosts may also call it directly; it does not schedule
    /// anything.
    ///
    /// In [`ErrorMode::Fatal`], a failure reported by the worker is returned
    /// as [`Error::Task`]; messages after the failure remain queued.
    pub fn poll(&self) -> Result<()> {
        let (available, drop_intermediate, error_mode) = {
            let mut c = self.0.borrow_mut();
            if c.state.contains(State::DONE) || !c.state.contains(State::STARTED) {
                return Ok(());
            }
            c.resolve_endpoint();
            let available = c.output.as_ref().map(|rx| rx.len()).unwrap_or(0);
            (available, c.config.drop_intermediate, c.config.error_mode)
        };

        let mut latest = None;
        let mut results = 0;

        for _ in 0..available {
            let msg = {
                let c = self.0.borrow();
                match c.output.as_ref().map(|rx| rx.try_recv()) {
                    Some(Ok(msg)) => msg,
                    _ => break,
                }
            };

            match msg {
                Message::Result(value) if drop_intermediate => {
                    results += 1;
                    latest = Some(value);
                }
                Message::Result(value) => self.emit_progress(value),
                Message::Message(msg) => self.emit_message(msg.into_erased()),
                Message::Error(failure) => {
                    let name = self.name();
                    self.0.borrow_mut().last_error = Some(failure.clone());
                    match error_mode {
                        ErrorMode::Warn => warn_about_failure(&name, &failure),
                        ErrorMode::Fatal => {
                            log::error!(target: "bgwork_core::work", "{name}: {failure}");
                            self.flush_latest(latest, results);
                            return Err(Error::Task(failure));
                        }
                    }
                }
                Message::Done => {
                    self.complete(latest, results);
                    return Ok(());
                }
            }

            // A handler may have closed the controller
            if self.is_done() {
                return Ok(());
            }
        }

        self.flush_latest(latest, results);
        Ok(())
    }

    /// Run a poll step, then schedule the next unless done
    fn tick(&self) -> Result<()> {
        let result = self.poll();
        let delay = self.0.borrow().poll_delay();
        if let Some(delay) = delay {
            self.schedule(delay);
        }
        result
    }

    fn schedule(&self, delay: Duration) {
        let scheduler = self.0.borrow().scheduler.clone();
        if let Some(scheduler) = scheduler {
            let this = self.clone();
            scheduler.after(delay, Box::new(move || this.tick()));
        }
    }

    fn emit_progress(&self, value: T) {
        let handler = self.0.borrow().handlers.progress.clone();
        if let Some(handler) = handler {
            handler(value);
        }
    }

    fn emit_message(&self, msg: Erased) {
        let handler = self.0.borrow().handlers.message.clone();
        match handler {
            Some(handler) => handler(msg),
            None => log::debug!(target: "bgwork_core::work", "{}: unhandled message {msg:?}", self.name()),
        }
    }

    /// Deliver the coalesced result of a poll step and count dropped results
    fn flush_latest(&self, latest: Option<T>, results: u64) {
        if results > 1 {
            let mut c = self.0.borrow_mut();
            c.dropped += results - 1;
            if !c.choke_warned {
                c.choke_warned = true;
                log::warn!(
                    target: "bgwork_core::work",
                    "{}: progress is not keeping up with the worker (UI is choking); dropping intermediate results",
                    c.name
                );
            }
        }

        if let Some(value) = latest {
            self.emit_progress(value);
        }
    }

    fn complete(&self, latest: Option<T>, results: u64) {
        self.flush_latest(latest, results);

        let (handlers, name, dropped) = {
            let mut c = self.0.borrow_mut();
            let handlers = c.finish();
            (handlers, c.name.clone(), c.dropped)
        };

        if dropped > 0 {
            log::warn!(target: "bgwork_core::work", "{name}: {dropped} intermediate results were dropped");
        }
        log::debug!(target: "bgwork_core::work", "{name}: done");

        if let Some(done) = handlers.done {
            done();
        }
    }

    /// Name, as used for thread names and logging
    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    /// Process-unique identifier
    pub fn id(&self) -> WorkerId {
        self.0.borrow().id
    }

    /// The configuration in use
    pub fn config(&self) -> Config {
        self.0.borrow().config.clone()
    }

    /// True once started (this remains true after completion)
    pub fn is_started(&self) -> bool {
        self.0.borrow().state.contains(State::STARTED)
    }

    /// True after completion or [`Self::close`]
    pub fn is_done(&self) -> bool {
        self.0.borrow().state.contains(State::DONE)
    }

    /// True between [`Self::pause`] and [`Self::resume`]
    pub fn is_paused(&self) -> bool {
        self.0.borrow().state.contains(State::PAUSED)
    }

    /// True while the bridge thread is alive
    ///
    /// The bridge outlives the worker unit, so once this is false all
    /// threads belonging to this work have finished.
    pub fn is_running(&self) -> bool {
        self.0
            .borrow()
            .bridge
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Number of results discarded under [`Config::drop_intermediate`]
    pub fn dropped_count(&self) -> u64 {
        self.0.borrow().dropped
    }

    /// The last failure reported by the worker, if any
    pub fn last_error(&self) -> Option<Failure> {
        self.0.borrow().last_error.clone()
    }

    /// Number of messages waiting for the next poll step
    pub fn pending_messages(&self) -> usize {
        self.0
            .borrow()
            .output
            .as_ref()
            .map(|rx| rx.len())
            .unwrap_or(0)
    }
}
