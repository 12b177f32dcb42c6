//! Ephemeral worker threads.
//!
//! Audio, overlay, fetch and credential work each run on their own short
//! lived thread. A panic inside a worker is caught at the thread boundary
//! and logged; it never reaches the thread that spawned it. Workers are
//! detached, so they never keep the process alive after `main` returns.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// Spawns a named worker thread running `f`.
///
/// Returns `None` (after logging) if the OS refuses to create the thread.
pub fn spawn_worker<F>(name: &str, f: F) -> Option<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let label = name.to_string();
    let spawned = thread::Builder::new()
        .name(format!("worker-{}", name))
        .spawn(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                tracing::error!(
                    worker = %label,
                    "ワーカーでパニックが発生しました: {}",
                    panic_message(payload.as_ref())
                );
            }
        });

    match spawned {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::error!(worker = %name, "ワーカースレッドを起動できません: {}", e);
            None
        }
    }
}

/// Extracts a readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_worker_runs_closure() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let handle = spawn_worker("test", move || flag.store(true, Ordering::SeqCst)).unwrap();
        handle.join().unwrap();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_worker_panic_is_contained() {
        let handle = spawn_worker("panicky", || panic!("boom")).unwrap();
        // The panic is caught inside the thread, so join succeeds
        assert!(handle.join().is_ok());
    }

    #[test]
    fn test_worker_thread_name() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&seen);
        let handle = spawn_worker("named", move || {
            *slot.lock().unwrap() = thread::current().name().map(str::to_string);
        })
        .unwrap();
        handle.join().unwrap();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("worker-named"));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");

        let payload: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
