//! Resources the `jobboss` binary ships with.
//!
//! Employees resolve job paths against [`registry`], so anything enqueued
//! through this binary must name one of these actions.

mod math;
mod penguin;
mod sleep;
mod string;

use jobboss_sched::Registry;

/// Registry of every built-in resource.
pub fn registry() -> Registry {
    Registry::new()
        .with_resource("math", math::resource())
        .with_resource("penguin", penguin::resource())
        .with_resource("sleep", sleep::resource())
        .with_resource("string", string::resource())
}
