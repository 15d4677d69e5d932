// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use bgwork::config::{Config, ErrorMode};
use bgwork::runner::EventLoop;
use bgwork::{BackgroundWork, ControlSignal, Error, FailureKind, Received, Registry, Substrate, TaskContext, TaskError};

#[derive(Debug, PartialEq)]
enum Event {
    Progress(u32),
    Message(String),
    Done,
}

type Events = Rc<RefCell<Vec<Event>>>;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn fast() -> Config {
    Config {
        poll_interval_ms: 1,
        paused_poll_interval_ms: 2,
        ..Config::default()
    }
}

/// Register all handlers, recording into a shared log (starts the work)
fn record(work: &BackgroundWork<u32>, el: &EventLoop) -> Events {
    let events: Events = Default::default();
    let (e1, e2, e3) = (events.clone(), events.clone(), events.clone());
    work.on_message(move |msg| {
        let text = msg.downcast_ref::<String>().cloned().unwrap_or_default();
        e1.borrow_mut().push(Event::Message(text));
    });
    work.on_progress(el, move |v| e2.borrow_mut().push(Event::Progress(v)))
        .unwrap()
        .on_done(el, move || e3.borrow_mut().push(Event::Done))
        .unwrap();
    events
}

fn progress(events: &Events) -> Vec<u32> {
    events
        .borrow()
        .iter()
        .filter_map(|event| match event {
            Event::Progress(v) => Some(*v),
            _ => None,
        })
        .collect()
}

fn done_count(events: &Events) -> usize {
    events.borrow().iter().filter(|event| **event == Event::Done).count()
}

fn counting(cx: &mut TaskContext<u32>, n: u32) -> Result<(), TaskError> {
    for i in 0..n {
        cx.yield_value(i)?;
    }
    Ok(())
}

fn endless(cx: &mut TaskContext<u32>, (): ()) -> Result<(), TaskError> {
    let mut i = 0;
    loop {
        cx.yield_value(i)?;
        i += 1;
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn results_arrive_in_order_then_done() {
    init();
    for substrate in [Substrate::Thread, Substrate::Rendezvous, Substrate::Port] {
        let el = EventLoop::new();
        let work = BackgroundWork::builder(100, counting)
            .config(fast())
            .substrate(substrate)
            .build();
        let events = record(&work, &el);
        el.run_until_idle().unwrap();

        assert_eq!(progress(&events), (0..100).collect::<Vec<_>>(), "{substrate:?}");
        assert_eq!(done_count(&events), 1);
        assert_eq!(events.borrow().last(), Some(&Event::Done));
        assert!(work.is_done());
        assert!(work.last_error().is_none());
    }
}

#[test]
fn messages_interleave_with_results() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder((), |cx: &mut TaskContext<u32>, ()| {
        cx.yield_value(1)?;
        cx.send_message("halfway".to_string())?;
        cx.yield_value(2)
    })
    .config(fast())
    .build();
    let events = record(&work, &el);
    el.run_until_idle().unwrap();

    assert_eq!(*events.borrow(), vec![
        Event::Progress(1),
        Event::Message("halfway".into()),
        Event::Progress(2),
        Event::Done,
    ]);
}

#[test]
fn drop_intermediate_keeps_final_value() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder(1000, counting)
        .config(Config {
            poll_interval_ms: 20,
            drop_intermediate: true,
            ..fast()
        })
        .build();
    let events = record(&work, &el);
    el.run_until_idle().unwrap();

    let delivered = progress(&events);
    assert_eq!(delivered.last(), Some(&999));
    assert!(delivered.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(delivered.len() as u64 + work.dropped_count(), 1000);
    assert_eq!(done_count(&events), 1);
}

#[test]
fn paused_worker_emits_nothing_until_resumed() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder(5, counting).config(fast()).build();
    work.pause();
    assert!(work.is_paused());

    let events = record(&work, &el);
    el.run_for(Duration::from_millis(50)).unwrap();
    assert!(events.borrow().is_empty());
    assert_eq!(work.pending_messages(), 0);
    assert!(!work.is_done());

    work.resume();
    assert!(!work.is_paused());
    el.run_until_idle().unwrap();
    assert_eq!(progress(&events), vec![0, 1, 2, 3, 4]);
    assert_eq!(done_count(&events), 1);
}

#[test]
fn start_is_idempotent() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder(10, counting).config(fast()).build();
    work.start(&el).unwrap();
    work.start(&el).unwrap();
    assert_eq!(el.pending(), 1);

    let events = record(&work, &el);
    assert_eq!(el.pending(), 1);
    el.run_until_idle().unwrap();
    assert_eq!(progress(&events), (0..10).collect::<Vec<_>>());
    assert_eq!(done_count(&events), 1);
}

#[test]
fn nothing_is_delivered_after_done() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder(3, counting).config(fast()).build();
    let events = record(&work, &el);
    el.run_until_idle().unwrap();
    assert_eq!(events.borrow().len(), 4);

    work.pause();
    work.resume();
    work.stop();
    work.send_message(1u8);
    work.start(&el).unwrap();
    work.poll().unwrap();
    assert!(!work.is_paused());
    assert_eq!(el.pending(), 0);

    let late = Rc::new(RefCell::new(0));
    let late2 = late.clone();
    work.on_done(&el, move || *late2.borrow_mut() += 1).unwrap();
    el.run_until_idle().unwrap();
    assert_eq!(*late.borrow(), 0);
    assert_eq!(events.borrow().len(), 4);
}

#[test]
fn failure_is_reported_then_done() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder((), |cx: &mut TaskContext<u32>, ()| {
        cx.yield_value(1)?;
        cx.yield_value(2)?;
        Err("boom".into())
    })
    .config(fast())
    .build();
    let events = record(&work, &el);
    el.run_until_idle().unwrap();

    assert_eq!(progress(&events), vec![1, 2]);
    assert_eq!(done_count(&events), 1);
    let failure = work.last_error().unwrap();
    assert_eq!(failure.kind, FailureKind::Application);
    assert_eq!(failure.message, "boom");
}

#[test]
fn panic_is_contained() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder((), |cx: &mut TaskContext<u32>, ()| {
        cx.yield_value(1)?;
        panic!("worker bug");
    })
    .config(fast())
    .substrate(Substrate::Rendezvous)
    .build();
    let events = record(&work, &el);
    el.run_until_idle().unwrap();

    assert_eq!(progress(&events), vec![1]);
    assert_eq!(done_count(&events), 1);
    let failure = work.last_error().unwrap();
    assert_eq!(failure.kind, FailureKind::Panic);
    assert_eq!(failure.message, "worker bug");
}

#[test]
fn fatal_mode_surfaces_through_event_loop() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder((), |cx: &mut TaskContext<u32>, ()| {
        cx.yield_value(1)?;
        Err("fatal".into())
    })
    .config(Config {
        error_mode: ErrorMode::Fatal,
        ..fast()
    })
    .build();
    let events = record(&work, &el);

    match el.run_until_idle() {
        Err(Error::Task(failure)) => assert_eq!(failure.message, "fatal"),
        other => panic!("unexpected: {other:?}"),
    }
    assert!(!work.is_done());

    el.run_until_idle().unwrap();
    assert_eq!(progress(&events), vec![1]);
    assert_eq!(done_count(&events), 1);
}

#[test]
fn stop_before_first_check() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder((), |cx: &mut TaskContext<u32>, ()| {
        loop {
            cx.check_pause()?;
            thread::sleep(Duration::from_millis(1));
        }
    })
    .config(fast())
    .build();
    work.stop();
    let events = record(&work, &el);
    el.run_until_idle().unwrap();

    assert_eq!(*events.borrow(), vec![Event::Done]);
    assert!(work.last_error().is_none());
}

#[test]
fn stop_from_progress_handler() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder((), endless).config(fast()).build();
    let seen = Rc::new(RefCell::new(vec![]));
    let done = Rc::new(RefCell::new(0));

    let (w, seen2, done2) = (work.clone(), seen.clone(), done.clone());
    work.on_progress(&el, move |v| {
        seen2.borrow_mut().push(v);
        if v == 3 {
            w.stop();
        }
    })
    .unwrap();
    work.on_done(&el, move || *done2.borrow_mut() += 1).unwrap();
    el.run_until_idle().unwrap();

    assert_eq!(seen.borrow()[..4], [0, 1, 2, 3]);
    assert_eq!(*done.borrow(), 1);
}

#[test]
fn close_releases_worker_without_done() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder((), endless).config(fast()).build();
    let events = record(&work, &el);
    work.close();
    el.run_until_idle().unwrap();

    assert!(events.borrow().is_empty());
    assert!(work.is_done());

    let deadline = Instant::now() + Duration::from_secs(5);
    while work.is_running() {
        assert!(Instant::now() < deadline, "worker did not observe closure");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn port_delivers_signals_sent_before_endpoint() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder((), |cx: &mut TaskContext<u32>, ()| {
        loop {
            match cx.wait_message()? {
                Received::Signal(ControlSignal::Custom(msg)) => {
                    let n = msg.downcast::<u32>().map_err(|_| "expected u32")?;
                    if *n == 0 {
                        return Ok(());
                    }
                    cx.yield_value(*n * 10)?;
                }
                Received::Signal(_) => (),
                Received::Closed | Received::Timeout => return Ok(()),
            }
        }
    })
    .config(fast())
    .substrate(Substrate::Port)
    .build();

    // The endpoint is not known until the first poll
    work.send_message(1u32);
    let events = record(&work, &el);
    work.send_message(2u32);
    work.send_message(0u32);
    el.run_until_idle().unwrap();

    assert_eq!(progress(&events), vec![10, 20]);
    assert_eq!(done_count(&events), 1);
    assert!(work.last_error().is_none());
}

#[test]
fn pause_mid_stream_loses_and_repeats_nothing() {
    init();
    let el = EventLoop::new();
    let work = BackgroundWork::builder(200, |cx: &mut TaskContext<u32>, n: u32| {
        for i in 0..n {
            cx.yield_value(i)?;
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    })
    .config(fast())
    .build();

    let seen = Rc::new(RefCell::new(vec![]));
    let done = Rc::new(RefCell::new(0));
    let (w, seen2, done2) = (work.clone(), seen.clone(), done.clone());
    work.on_progress(&el, move |v| {
        seen2.borrow_mut().push(v);
        if v == 20 {
            w.pause();
        }
    })
    .unwrap();
    work.on_done(&el, move || *done2.borrow_mut() += 1).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    assert!(el.run_until(|| work.is_paused(), deadline).unwrap());

    // Results emitted before the worker observed the pause still arrive
    el.run_for(Duration::from_millis(30)).unwrap();
    let frozen = seen.borrow().len();
    assert!((21..200).contains(&frozen), "frozen at {frozen}");

    el.run_for(Duration::from_millis(50)).unwrap();
    assert_eq!(seen.borrow().len(), frozen);
    assert_eq!(*done.borrow(), 0);
    assert!(!work.is_done());

    work.resume();
    el.run_until_idle().unwrap();
    assert_eq!(*seen.borrow(), (0..200).collect::<Vec<_>>());
    assert_eq!(*done.borrow(), 1);
}

#[test]
fn registry_stops_all_live_workers() {
    init();
    let el = EventLoop::new();
    let registry = Registry::new();
    let works: Vec<_> = [Substrate::Thread, Substrate::Rendezvous]
        .into_iter()
        .map(|substrate| {
            BackgroundWork::builder((), endless)
                .config(fast())
                .substrate(substrate)
                .registry(&registry)
                .build()
        })
        .collect();
    let events: Vec<_> = works.iter().map(|work| record(work, &el)).collect();
    assert_eq!(registry.len(), 2);

    el.run_for(Duration::from_millis(20)).unwrap();
    assert_eq!(registry.shutdown_all(), 2);
    assert!(registry.is_empty());
    el.run_until_idle().unwrap();

    for (work, events) in works.iter().zip(&events) {
        assert!(work.is_done());
        assert_eq!(done_count(events), 1);
    }
}
