use std::thread;

use tracing::warn;

use crate::dispatch::Dispatcher;

/// First SIGINT/SIGTERM cancels every dispatched job; a second one exits
/// immediately with status 1.
#[cfg(not(windows))]
pub fn signal_handler(dispatcher: &Dispatcher) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(signals) => signals,
        Err(err) => {
            warn!("signal handler setup failed: {}", err);
            return;
        }
    };
    let dispatcher = dispatcher.clone();
    thread::spawn(move || {
        let mut received = signals.forever();
        if received.next().is_some() {
            println!("interrupted; cancelling running jobs");
            dispatcher.cancel_all();
        }
        if received.next().is_some() {
            std::process::exit(1);
        }
    });
}

/// Same contract as the Unix handler. signal-hook has no blocking iterator
/// on Windows, so the flag is checked on a slow tick.
#[cfg(windows)]
pub fn signal_handler(dispatcher: &Dispatcher) {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;

    let received = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        let registered = flag::register_conditional_shutdown(signal, 1, Arc::clone(&received))
            .and_then(|_| flag::register(signal, Arc::clone(&received)));
        if let Err(err) = registered {
            warn!("signal handler setup failed: {}", err);
            return;
        }
    }
    let dispatcher = dispatcher.clone();
    thread::spawn(move || {
        while !received.load(Ordering::SeqCst) {
            thread::park_timeout(Duration::from_millis(250));
        }
        println!("interrupted; cancelling running jobs");
        dispatcher.cancel_all();
    });
}
