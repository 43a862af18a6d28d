//! # refstore testkit
//!
//! Test utilities for refstore.
//!
//! This crate provides:
//! - Fixture entity kinds with typical repair policies
//! - Store helpers and ready-made scenarios
//! - Instrumented backends (recording, failing)
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use refstore_testkit::prelude::*;
//!
//! #[test]
//! fn test_cascade() {
//!     let store = scenarios::order_book(1, 2);
//!     store.transaction("drop customer", |txn| txn.delete(&"c0".into())).unwrap();
//!     assert_eq!(store.committed::<Order>("o0_0").customer_id, None);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backends;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backends::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use backends::*;
pub use fixtures::*;
pub use generators::*;
