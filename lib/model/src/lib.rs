//! The data model shared by every DataShare crate.
//!
//! Facts are triples of opaque [Constant]s. Queries are built from [TriplePattern]s whose
//! positions are [Term]s, i.e., either a constant or a [Variable]. Matching patterns against a
//! store produces [Binding]s.

mod binding;
mod error;
mod term;
mod triple;
pub mod vocab;

pub use binding::Binding;
pub use error::TermParseError;
pub use term::{Constant, Term, Variable};
pub use triple::{Fact, TriplePattern};
