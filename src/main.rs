//! Binary entry point for the Stratum CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio::sync::watch;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use stratum::{
    BackendError, ConfigError, ProviderConfig, ReconcileError, Reconciler, ResourceDescriptor,
    ResourceHandle, ResourceKind, RestBackend, UnknownKind, address,
};

mod cli;

use cli::{Cli, DeleteCommand, ImportCommand};

const LOG_ENV: &str = "STRATUM_LOG";
const DEFAULT_LOG_FILTER: &str = "stratum=info";

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Kind(#[from] UnknownKind),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("failed to render resource: {0}")]
    Render(#[from] serde_json::Error),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(&cli, &mut io::stdout()).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

async fn dispatch(cli: &Cli, out: &mut impl Write) -> Result<(), CliError> {
    match cli {
        Cli::Kinds => write_kinds(out),
        Cli::Import(command) => import(command, out).await,
        Cli::Delete(command) => delete(command, out).await,
    }
}

fn write_kinds(out: &mut impl Write) -> Result<(), CliError> {
    for kind in ResourceKind::ALL {
        writeln!(out, "{:<20} {}", kind.as_str(), kind.descriptor().import_format())?;
    }
    Ok(())
}

fn descriptor_for(kind: &str) -> Result<&'static ResourceDescriptor, CliError> {
    Ok(kind.parse::<ResourceKind>()?.descriptor())
}

async fn import(command: &ImportCommand, out: &mut impl Write) -> Result<(), CliError> {
    let descriptor = descriptor_for(&command.kind)?;
    address::decode(&command.address, descriptor).map_err(ReconcileError::from)?;

    let engine = connect()?;
    let observed = engine.import(&command.address, descriptor).await?;
    writeln!(out, "{}", serde_json::to_string_pretty(&observed)?)?;
    Ok(())
}

async fn delete(command: &DeleteCommand, out: &mut impl Write) -> Result<(), CliError> {
    let descriptor = descriptor_for(&command.kind)?;
    let target = address::decode(&command.address, descriptor).map_err(ReconcileError::from)?;
    let options = descriptor.parse_delete_options(command.options.iter().map(String::as_str))?;

    let engine = connect()?;
    let handle = ResourceHandle::unresolved(target.name(), target.parent().to_vec());
    let outcome = engine.delete(&handle, descriptor, &options).await?;
    writeln!(
        out,
        "{} {}: {}",
        descriptor.display_name,
        target.path(),
        outcome.state()
    )?;
    Ok(())
}

fn connect() -> Result<Reconciler<RestBackend>, CliError> {
    let config = ProviderConfig::load_without_cli_args()?;
    config.validate()?;
    let backend = RestBackend::new(&config)?;
    Ok(Reconciler::new(backend, config.poll_policy()).with_cancellation(interrupt_channel()))
}

/// Flips to `true` on Ctrl-C so in-flight waits end as cancelled.
fn interrupt_channel() -> watch::Receiver<bool> {
    let (sender, receiver) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; the operation outcome is unknown");
            sender.send(true).ok();
        }
    });
    receiver
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum::test_support::EnvGuard;

    fn import_command(kind: &str, address: &str) -> ImportCommand {
        ImportCommand {
            kind: kind.to_owned(),
            address: address.to_owned(),
        }
    }

    #[tokio::test]
    async fn kinds_lists_every_import_format() {
        let mut out = Vec::new();
        dispatch(&Cli::Kinds, &mut out).await.expect("kinds succeeds");
        let rendered = String::from_utf8(out).expect("utf8");

        assert_eq!(rendered.lines().count(), ResourceKind::ALL.len());
        assert!(
            rendered.contains("/tenants/<tenant>/tenant-spaces/<tenant-space>/volumes/<volume>"),
            "rendered: {rendered}"
        );
    }

    #[tokio::test]
    async fn unknown_kind_is_rejected() {
        let mut out = Vec::new();
        let err = import(&import_command("buckets", "/buckets/b1"), &mut out)
            .await
            .expect_err("kind is unknown");

        assert_eq!(err.to_string(), "unknown resource kind 'buckets'");
    }

    #[tokio::test]
    async fn malformed_address_fails_before_configuration_loads() {
        let _guard = EnvGuard::set_vars(&[("STRATUM_API_HOST", None)]).await;
        let mut out = Vec::new();
        let err = import(&import_command("volume", "/tenants/t1/volumes/v1"), &mut out)
            .await
            .expect_err("address is malformed");

        assert!(
            matches!(
                err,
                CliError::Reconcile(ReconcileError::MalformedAddress(_))
            ),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn undeclared_delete_option_fails_before_configuration_loads() {
        let _guard = EnvGuard::set_vars(&[("STRATUM_API_HOST", None)]).await;
        let command = DeleteCommand {
            kind: String::from("tenant"),
            address: String::from("/tenants/t1"),
            options: vec![String::from("eradicate_on_delete")],
        };
        let mut out = Vec::new();
        let err = delete(&command, &mut out)
            .await
            .expect_err("tenants cannot be eradicated");

        assert_eq!(
            err.to_string(),
            "tenant does not support delete option 'eradicate_on_delete'"
        );
        assert!(out.is_empty());
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Kind(UnknownKind(String::from("x")));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(
            rendered.contains("unknown resource kind 'x'"),
            "rendered: {rendered}"
        );
    }
}
