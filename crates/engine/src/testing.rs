//! Fault injection hooks for tests
//!
//! Lets integration tests force a failure inside the mutation choreography
//! to exercise the compensation path (statement atomicity under partial
//! failure). Production code never arms these.

use std::sync::atomic::{AtomicBool, Ordering};

static FAIL_NEXT_VECTOR_INSERT: AtomicBool = AtomicBool::new(false);

/// Arm a one-shot failure for the next vector-index insert
pub fn fail_next_vector_insert() {
    FAIL_NEXT_VECTOR_INSERT.store(true, Ordering::SeqCst);
}

/// Consume the armed failure, if any
pub(crate) fn take_vector_insert_failure() -> bool {
    FAIL_NEXT_VECTOR_INSERT.swap(false, Ordering::SeqCst)
}
