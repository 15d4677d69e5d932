// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Progress demo
//!
//! Counts primes on a background thread while the event loop reports
//! progress. The search is paused briefly, then a second search is started
//! and both are shut down through a registry. Set `RUST_LOG=debug` (or
//! `trace`) to see the lifecycle, and try `BGWORK_DROP_INTERMEDIATE=1`.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use bgwork::runner::{EventLoop, Scheduler};
use bgwork::{BackgroundWork, Registry, TaskContext, TaskError};

#[derive(Debug)]
struct Milestone(u64);

fn is_prime(n: u64) -> bool {
    n >= 2 && (2..).take_while(|d| d * d <= n).all(|d| n % d != 0)
}

/// Count primes below `limit`, yielding the count every 10 000 numbers
fn count_primes(cx: &mut TaskContext<(u64, u64)>, limit: u64) -> Result<(), TaskError> {
    let mut count = 0;
    for n in 0..limit {
        if is_prime(n) {
            count += 1;
            if count % 10_000 == 0 {
                cx.send_message(Milestone(count))?;
            }
        }
        if n % 10_000 == 0 {
            cx.yield_value((n, count))?;
        }
    }
    cx.yield_value((limit, count))
}

fn main() -> bgwork::Result<()> {
    env_logger::init();

    let el = EventLoop::new();
    let registry = Registry::new();
    let start = Instant::now();

    let search = BackgroundWork::builder(2_000_000, count_primes)
        .name("primes")
        .registry(&registry)
        .build();
    let finished = Rc::new(Cell::new(false));
    let finished2 = finished.clone();

    search.on_message(|msg| {
        if let Some(Milestone(n)) = msg.downcast_ref::<Milestone>() {
            println!("milestone: {n} primes");
        }
    });
    search
        .on_progress(&el, |(n, count)| println!("{n:>9}: {count} primes"))?
        .on_done(&el, move || finished2.set(true))?;

    let s = search.clone();
    el.after(
        Duration::from_millis(100),
        Box::new(move || {
            println!("pausing");
            s.pause();
            Ok(())
        }),
    );
    let s = search.clone();
    el.after(
        Duration::from_millis(600),
        Box::new(move || {
            println!("resuming");
            s.resume();
            Ok(())
        }),
    );

    // A second, endless search which is only stopped by the registry
    let endless = BackgroundWork::builder(u64::MAX, count_primes)
        .name("endless")
        .registry(&registry)
        .build();
    endless.on_done(&el, || println!("endless search stopped"))?;

    let deadline = Instant::now() + Duration::from_secs(30);
    el.run_until(|| finished.get(), deadline)?;
    println!("stopping {} remaining worker(s)", registry.shutdown_all());
    el.run_until_idle()?;

    println!(
        "finished in {:.2?} (dropped {} intermediate results)",
        start.elapsed(),
        search.dropped_count()
    );
    Ok(())
}
