//! Main-thread dispatch
//!
//! The thread that builds the [`DispatchLoop`] becomes the main thread. After
//! startup it does nothing but drain posted tasks, one at a time, in the
//! order they were posted, until it is told to quit.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::thread::{self, ThreadId};
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Task = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Task(Task),
    Quit(i32),
}

/// Handle for posting work to the main thread. Cheap to clone.
#[derive(Clone)]
pub struct MainThread {
    main_id: ThreadId,
    tx: mpsc::UnboundedSender<Message>,
}

impl MainThread {
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.main_id
    }

    /// Run `task` on the main thread: inline when already there, otherwise
    /// queued behind everything posted before it. Returns `false` if the loop
    /// has already exited and the task was dropped.
    pub fn run_on_main_thread<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_main_thread() {
            task();
            return true;
        }
        self.tx.send(Message::Task(Box::new(task))).is_ok()
    }

    /// Make the loop return `status` once the tasks ahead of this call ran.
    pub fn quit(&self, status: i32) {
        if self.tx.send(Message::Quit(status)).is_err() {
            debug!("dispatch loop already gone, quit({}) ignored", status);
        }
    }
}

impl std::fmt::Debug for MainThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainThread")
            .field("main_id", &self.main_id)
            .finish()
    }
}

pub struct DispatchLoop {
    main_id: ThreadId,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl DispatchLoop {
    /// Create a loop owned by the calling thread.
    pub fn new() -> (MainThread, DispatchLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        let main_id = thread::current().id();
        (MainThread { main_id, tx }, DispatchLoop { main_id, rx })
    }

    /// Drain tasks until a quit arrives. Must be called on the thread that
    /// created the loop, outside any async runtime.
    ///
    /// A panicking task does not end the loop; the panic hook decides what
    /// happens to the process.
    pub fn run(mut self) -> i32 {
        if thread::current().id() != self.main_id {
            warn!("dispatch loop running off the thread that created it");
        }
        while let Some(message) = self.rx.blocking_recv() {
            match message {
                Message::Task(task) => {
                    if catch_unwind(AssertUnwindSafe(task)).is_err() {
                        warn!("main-thread task panicked");
                    }
                }
                Message::Quit(status) => {
                    debug!("dispatch loop quit with status {}", status);
                    return status;
                }
            }
        }
        // Every MainThread handle dropped: nothing can be posted anymore
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn inline_on_main_thread() {
        let (main, _loop) = DispatchLoop::new();
        assert!(main.is_main_thread());
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        assert!(main.run_on_main_thread(move || flag.store(true, Ordering::SeqCst)));
        // No loop iteration needed
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn posted_tasks_run_in_order_on_main_thread() {
        let (main, dispatch) = DispatchLoop::new();
        let main_id = thread::current().id();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let poster = {
            let main = main.clone();
            let seen = seen.clone();
            thread::spawn(move || {
                assert!(!main.is_main_thread());
                for i in 0..100 {
                    let seen = seen.clone();
                    main.run_on_main_thread(move || {
                        assert_eq!(thread::current().id(), main_id);
                        seen.lock().unwrap().push(i);
                    });
                }
                main.quit(7);
            })
        };

        assert_eq!(dispatch.run(), 7);
        poster.join().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn tasks_never_overlap() {
        let (main, dispatch) = DispatchLoop::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let posters: Vec<_> = (0..4)
            .map(|_| {
                let main = main.clone();
                let active = active.clone();
                let overlaps = overlaps.clone();
                thread::spawn(move || {
                    for _ in 0..25 {
                        let active = active.clone();
                        let overlaps = overlaps.clone();
                        main.run_on_main_thread(move || {
                            if active.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlaps.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::yield_now();
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        let quitter = thread::spawn(move || {
            for p in posters {
                p.join().unwrap();
            }
            main.quit(0);
        });

        assert_eq!(dispatch.run(), 0);
        quitter.join().unwrap();
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_task_does_not_stop_the_loop() {
        let (main, dispatch) = DispatchLoop::new();
        let after = Arc::new(AtomicBool::new(false));
        let flag = after.clone();
        let poster = thread::spawn(move || {
            main.run_on_main_thread(|| panic!("task failure"));
            main.run_on_main_thread(move || flag.store(true, Ordering::SeqCst));
            main.quit(3);
        });

        assert_eq!(dispatch.run(), 3);
        poster.join().unwrap();
        assert!(after.load(Ordering::SeqCst));
    }

    #[test]
    fn post_after_loop_exit_reports_drop() {
        let (main, dispatch) = DispatchLoop::new();
        main.quit(0);
        assert_eq!(dispatch.run(), 0);

        let remote = thread::spawn(move || main.run_on_main_thread(|| {}));
        assert!(!remote.join().unwrap());
    }
}
