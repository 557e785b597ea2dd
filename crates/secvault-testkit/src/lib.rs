//! # secvault testkit
//!
//! Testing utilities for secvault.
//!
//! - **Fixtures**: registered parties and an in-memory vault
//! - **Generators**: proptest strategies for predicates, ACLs and documents
//!
//! ```rust
//! use secvault_testkit::fixtures::TestFixture;
//!
//! let fixture = TestFixture::new();
//! let doc = fixture.signed(fixture.builder("patient-7", "rx.dispensation"));
//! assert_eq!(doc.signatures().len(), 1);
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{Party, TestFixture};
pub use generators::{document_from_params, DocumentParams};
