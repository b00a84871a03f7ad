//! Version-control side of the pipeline.

mod git;

pub use git::{GitWorkingTree, WorkingTree};
