//! Attribute macros shared by the project graders.
extern crate grading_derive;

pub use grading_derive::*;
