//! Command-line interface definitions for the `stratum` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `stratum` binary.
#[derive(Debug, Parser)]
#[command(
    name = "stratum",
    about = "Reconcile storage-orchestration resources from the command line",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List supported resource kinds and their import address formats.
    #[command(name = "kinds", about = "List resource kinds and their import formats")]
    Kinds,
    /// Read an existing resource by address and print its state as JSON.
    #[command(name = "import", about = "Read an existing resource by address")]
    Import(ImportCommand),
    /// Delete a resource by address and wait for the outcome.
    #[command(name = "delete", about = "Delete a resource and wait for it to settle")]
    Delete(DeleteCommand),
}

/// Arguments for the `stratum import` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ImportCommand {
    /// Resource kind, either its tag (`placement_group`) or collection label
    /// (`placement-groups`).
    #[arg(value_name = "KIND")]
    pub(crate) kind: String,
    /// Canonical import address, for example
    /// `/tenants/t1/tenant-spaces/s1/volumes/v1`.
    #[arg(value_name = "ADDRESS")]
    pub(crate) address: String,
}

/// Arguments for the `stratum delete` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeleteCommand {
    /// Resource kind, either its tag or collection label.
    #[arg(value_name = "KIND")]
    pub(crate) kind: String,
    /// Canonical address of the resource to delete.
    #[arg(value_name = "ADDRESS")]
    pub(crate) address: String,
    /// Delete-time flag to send, such as `eradicate_on_delete`. Repeatable.
    ///
    /// Flags the kind does not declare are rejected before any request is
    /// made.
    #[arg(long = "option", value_name = "FLAG")]
    pub(crate) options: Vec<String>,
}
