//! Small, self-contained helpers shared by the planner and executor.

pub mod paths;
