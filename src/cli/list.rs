//! Handler for the `list` command.

use crate::cli::output;
use crate::pipeline::script_label;
use crate::steps;

/// Execute the list command.
pub fn execute() {
    output::section("Pipeline steps");
    for step in steps::registry() {
        output::step(&script_label(step.as_ref()), step.task());
    }
    println!();
}
