//! Placeholder references between steps
//!
//! Steps pass data forward by embedding `{{stepId.field}}` in their raw input.
//! [`PlaceholderReference`] is the parsed form, shared by the validator and the
//! graph builder; [`PlaceholderResolver`] substitutes recorded outputs at
//! execution time.

mod error;
mod reference;
mod resolver;

pub use error::{PlaceholderErrorKind, PlaceholderReplacementError};
pub use reference::{
    Placeholder, PlaceholderReference, embedded_placeholders, exact_reference, references_in, scan_str, scan_value,
};
pub use resolver::{ArrayPolicy, FanOut, PlaceholderResolver, ResolvedInput};
