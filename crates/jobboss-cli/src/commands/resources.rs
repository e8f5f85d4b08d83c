//! Resources command implementation.

use console::style;

use crate::jobs;

/// Execute the resources command.
pub fn execute() {
    println!("{} Available job paths:\n", style("Job Boss").cyan().bold());
    for path in jobs::registry().paths() {
        println!("  {} {}", style("●").green(), style(path).bold());
    }
}
