//! Calendar gateway contract.
//!
//! The gateway is the only component that talks to the calendar service.
//! Every method may block on I/O and must be called off the UI thread.
//!
//! Backends:
//! - [`JsonFileGateway`]: reads events from a local JSON file
//! - [`MockCalendarGateway`]: scripted responses for tests

pub mod error;
mod file;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};

pub use error::GatewayError;
pub use file::{JsonFileGateway, DEFAULT_CREDENTIAL_LIFETIME};

use crate::types::{CalendarEvent, Credential};

/// Source of calendar events.
pub trait CalendarGateway: Send + Sync {
    /// Fetches upcoming events.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationCancelled` when the human declined to sign
    /// in; any other variant is a failure.
    fn fetch_upcoming(&self) -> Result<Vec<CalendarEvent>, GatewayError>;

    /// Asks the service whether the current credential still works.
    ///
    /// # Errors
    ///
    /// Returns an error if validity could not be determined.
    fn is_credential_valid(&self) -> Result<bool, GatewayError>;

    /// Installs a credential obtained from the sign-in prompt.
    fn accept_credential(&self, credential: Credential);
}

// ============================================================================
// MockCalendarGateway
// ============================================================================

/// Scripted gateway for tests.
#[derive(Debug)]
pub struct MockCalendarGateway {
    events: Mutex<Vec<CalendarEvent>>,
    fail_with: Mutex<Option<GatewayError>>,
    should_panic: AtomicBool,
    blocked: Mutex<bool>,
    unblocked: Condvar,
    fetch_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    credential_valid: AtomicBool,
    validity_checks: AtomicUsize,
    accepted: Mutex<Vec<Credential>>,
}

impl Default for MockCalendarGateway {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail_with: Mutex::new(None),
            should_panic: AtomicBool::new(false),
            blocked: Mutex::new(false),
            unblocked: Condvar::new(),
            fetch_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            credential_valid: AtomicBool::new(true),
            validity_checks: AtomicUsize::new(0),
            accepted: Mutex::new(Vec::new()),
        }
    }
}

impl MockCalendarGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        let gateway = Self::default();
        gateway.set_events(events);
        gateway
    }

    pub fn set_events(&self, events: Vec<CalendarEvent>) {
        *self.events.lock().unwrap() = events;
    }

    /// Makes every fetch fail with `error` until cleared with `None`.
    pub fn set_fail_with(&self, error: Option<GatewayError>) {
        *self.fail_with.lock().unwrap() = error;
    }

    /// Makes fetches panic, simulating a worker that dies mid-fetch.
    pub fn set_should_panic(&self, should_panic: bool) {
        self.should_panic.store(should_panic, Ordering::SeqCst);
    }

    /// Holds every fetch inside the gateway until [`release`](Self::release).
    pub fn block(&self) {
        *self.blocked.lock().unwrap() = true;
    }

    pub fn release(&self) {
        *self.blocked.lock().unwrap() = false;
        self.unblocked.notify_all();
    }

    pub fn set_credential_valid(&self, valid: bool) {
        self.credential_valid.store(valid, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Fetches currently inside the gateway.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping fetches observed.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn validity_checks(&self) -> usize {
        self.validity_checks.load(Ordering::SeqCst)
    }

    pub fn accepted(&self) -> Vec<Credential> {
        self.accepted.lock().unwrap().clone()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CalendarGateway for MockCalendarGateway {
    fn fetch_upcoming(&self) -> Result<Vec<CalendarEvent>, GatewayError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        {
            let mut blocked = self.blocked.lock().unwrap();
            while *blocked {
                blocked = self.unblocked.wait(blocked).unwrap();
            }
        }

        if self.should_panic.load(Ordering::SeqCst) {
            panic!("mock gateway crashed");
        }
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.events.lock().unwrap().clone())
    }

    fn is_credential_valid(&self) -> Result<bool, GatewayError> {
        self.validity_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.credential_valid.load(Ordering::SeqCst))
    }

    fn accept_credential(&self, credential: Credential) {
        self.accepted.lock().unwrap().push(credential);
        self.credential_valid.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn event(id: &str) -> CalendarEvent {
        let start = Utc::now().fixed_offset() + ChronoDuration::minutes(10);
        CalendarEvent::new(id, "定例", start, start + ChronoDuration::minutes(30))
    }

    mod mock_tests {
        use super::*;

        #[test]
        fn test_returns_events() {
            let gateway = MockCalendarGateway::with_events(vec![event("a")]);
            assert_eq!(gateway.fetch_upcoming().unwrap().len(), 1);
            assert_eq!(gateway.fetch_calls(), 1);
            assert_eq!(gateway.in_flight(), 0);
        }

        #[test]
        fn test_fail_with() {
            let gateway = MockCalendarGateway::new();
            gateway.set_fail_with(Some(GatewayError::AuthenticationCancelled));
            assert_eq!(
                gateway.fetch_upcoming(),
                Err(GatewayError::AuthenticationCancelled)
            );
        }

        #[test]
        fn test_block_and_release() {
            let gateway = Arc::new(MockCalendarGateway::new());
            gateway.block();

            let worker = {
                let gateway = Arc::clone(&gateway);
                thread::spawn(move || gateway.fetch_upcoming())
            };
            thread::sleep(Duration::from_millis(30));
            assert_eq!(gateway.in_flight(), 1);

            gateway.release();
            assert!(worker.join().unwrap().is_ok());
            assert_eq!(gateway.in_flight(), 0);
            assert_eq!(gateway.max_in_flight(), 1);
        }

        #[test]
        fn test_accept_credential_marks_valid() {
            let gateway = MockCalendarGateway::new();
            gateway.set_credential_valid(false);
            assert_eq!(gateway.is_credential_valid(), Ok(false));

            gateway.accept_credential(Credential::new("tok").unwrap());
            assert_eq!(gateway.is_credential_valid(), Ok(true));
            assert_eq!(gateway.validity_checks(), 2);
            assert_eq!(gateway.accepted().len(), 1);
        }
    }
}
