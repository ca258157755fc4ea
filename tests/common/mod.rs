#![allow(dead_code)]

use std::sync::mpsc::sync_channel;
use std::thread;
use std::time::Duration;

pub mod bus;
pub mod descriptors;
pub mod device;

/// Run `f` on a worker thread, panicking if it does not finish in time.
/// Keeps a wedged state machine from hanging the whole suite.
pub fn timeout<F, T>(timeout: Duration, f: F)
where
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = sync_channel(0);
    thread::spawn(move || {
        f();
        tx.send(()).unwrap();
    });
    rx.recv_timeout(timeout).expect("timeout");
}
