//! # Worklets CLI
//!
//! Command-line host for the worklet runtimes.
//!
//! The `worklets run` command loads a script into the main runtime, starts
//! the UI runtime on its own thread and renders a fixed number of frames,
//! printing every props commit as a JSON line on stdout. Logs go to stderr
//! so the output can be piped straight into `jq`.

pub mod host;

#[cfg(test)]
mod tests;
