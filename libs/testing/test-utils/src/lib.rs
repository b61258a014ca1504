//! Shared test utilities for the queue-reactor workspace
//!
//! - `TestDataBuilder`: deterministic ids, names and payloads
//! - `init_test_tracing`: log output captured by the test harness
//! - `eventually` / `wait_until`: poll a condition with a deadline
//! - `Recorder`: thread-safe log of what a test double observed
//!
//! # Usage
//!
//! ```rust,ignore
//! use test_utils::{eventually, Recorder, TestDataBuilder};
//!
//! #[tokio::test]
//! async fn processes_ping() {
//!     let data = TestDataBuilder::from_test_name("processes_ping");
//!     let seen = Recorder::new();
//!     // ... register a processor that pushes into `seen` ...
//!     eventually(|| seen.len() == 1).await;
//!     assert_eq!(seen.snapshot(), vec![data.body("ping")]);
//! }
//! ```

use std::sync::{Arc, Mutex, Once, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Default deadline of [`eventually`].
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

const POLL_STEP: Duration = Duration::from_millis(5);

/// Builder for test data with deterministic randomization
///
/// This ensures tests are reproducible by using seeded data.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    /// Create a new builder with a seed (for deterministic tests)
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_ping_is_claimed");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    fn uuid(&self, salt: u64) -> Uuid {
        let mixed = self.seed ^ salt.rotate_left(17);
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.seed.to_le_bytes());
        bytes[8..].copy_from_slice(&mixed.to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    /// Deterministic user id
    pub fn user_id(&self) -> Uuid {
        self.uuid(0)
    }

    /// Deterministic request id for call contexts
    pub fn request_id(&self) -> String {
        self.uuid(1).to_string()
    }

    /// Deterministic correlation id; `n` distinguishes several per test
    pub fn correlation_id(&self, n: u64) -> String {
        self.uuid(n + 2).to_string()
    }

    /// Unique name for a test resource
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::new(7);
    /// assert_eq!(builder.name("queue", "orders"), "test-queue-7-orders");
    /// ```
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }

    /// Unique physical queue name
    pub fn queue_name(&self, suffix: &str) -> String {
        self.name("queue", suffix).to_uppercase()
    }

    /// Message body tagged with this test's seed
    pub fn body(&self, text: &str) -> String {
        format!("{}#{}", text, self.seed)
    }
}

/// Install a subscriber whose output the test harness captures.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Poll `check` until it holds or `deadline` passes. Returns the final outcome.
pub async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let started = tokio::time::Instant::now();
    loop {
        if check() {
            return true;
        }
        if started.elapsed() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_STEP).await;
    }
}

/// Poll `check` for up to [`DEFAULT_DEADLINE`], panicking if it never holds.
pub async fn eventually(check: impl FnMut() -> bool) {
    if !wait_until(DEFAULT_DEADLINE, check).await {
        panic!("condition not met within {:?}", DEFAULT_DEADLINE);
    }
}

/// Shared, ordered log of observed values.
#[derive(Debug)]
pub struct Recorder<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, value: T) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
    }

    /// Copy of everything recorded so far, in order
    pub fn snapshot(&self) -> Vec<T> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Test assertion helpers
pub mod assertions {
    /// Assert that an optional value is Some
    pub fn assert_some<T>(value: Option<T>, context: &str) -> T {
        value.unwrap_or_else(|| panic!("{}: expected Some, got None", context))
    }

    /// Assert that a result is Ok, showing the error otherwise
    pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>, context: &str) -> T {
        match result {
            Ok(value) => value,
            Err(e) => panic!("{}: expected Ok, got {:?}", context, e),
        }
    }
}
