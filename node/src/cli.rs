//! # CLI Interface
//!
//! Command-line structure for `nova-gateway`, built with `clap` derive.
//! Every flag that tunes the lifecycle or the devnet also reads a
//! `NOVA_GATEWAY_*` environment variable.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use nova_lifecycle::config::{
    DEFAULT_INDEXING_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_JITTER,
};
use nova_lifecycle::sim::DevnetConfig;
use nova_lifecycle::{LifecycleConfig, VerificationKind};

use crate::logging::LogFormat;

/// NOVA transaction lifecycle gateway.
///
/// Verifies the user, submits ledger calls, follows them to finality and
/// waits for the read model, streaming progress as NDJSON.
#[derive(Parser, Debug)]
#[command(
    name = "nova-gateway",
    about = "NOVA transaction lifecycle gateway",
    version,
    propagate_version = true
)]
pub struct NovaGatewayCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the lifecycle API against a simulated devnet.
    Serve(ServeArgs),
    /// Run one lifecycle against a simulated devnet and print its events.
    Simulate(SimulateArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for `serve`.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port for the lifecycle API.
    #[arg(long, env = "NOVA_GATEWAY_PORT", default_value_t = 9751)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "NOVA_GATEWAY_METRICS_PORT", default_value_t = 9752)]
    pub metrics_port: u16,

    /// Log output format.
    #[arg(
        long,
        env = "NOVA_GATEWAY_LOG_FORMAT",
        value_enum,
        ignore_case = true,
        default_value = "pretty"
    )]
    pub log_format: LogFormat,

    #[command(flatten)]
    pub lifecycle: LifecycleArgs,

    #[command(flatten)]
    pub devnet: DevnetArgs,
}

/// Arguments for `simulate`.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Operation kind.
    #[arg(long, default_value = "transfer")]
    pub kind: String,

    /// Ledger step label. Repeat for multi-step operations, in order.
    #[arg(long = "step", default_value = "transfer")]
    pub steps: Vec<String>,

    /// Secret to verify with. Omit to submit without a challenge.
    #[arg(long)]
    pub secret: Option<String>,

    /// Kind of `--secret`.
    #[arg(long, value_enum, default_value_t = SecretKind::Pin)]
    pub secret_kind: SecretKind,

    /// Step label the ledger reverts after accepting.
    #[arg(long)]
    pub revert: Option<String>,

    /// Step label the ledger rejects at submission.
    #[arg(long)]
    pub reject: Option<String>,

    #[command(flatten)]
    pub lifecycle: LifecycleArgs,

    #[command(flatten)]
    pub devnet: DevnetArgs,
}

/// Lifecycle tuning shared by both commands.
#[derive(Args, Debug, Clone)]
pub struct LifecycleArgs {
    /// Deadline for the indexing wait, in milliseconds.
    #[arg(long, env = "NOVA_GATEWAY_INDEXING_TIMEOUT_MS", default_value_t = DEFAULT_INDEXING_TIMEOUT.as_millis() as u64)]
    pub indexing_timeout_ms: u64,

    /// Delay between index polls, in milliseconds.
    #[arg(long, env = "NOVA_GATEWAY_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL.as_millis() as u64)]
    pub poll_interval_ms: u64,

    /// Random extra delay per poll, in milliseconds.
    #[arg(long, env = "NOVA_GATEWAY_POLL_JITTER_MS", default_value_t = DEFAULT_POLL_JITTER.as_millis() as u64)]
    pub poll_jitter_ms: u64,
}

impl LifecycleArgs {
    pub fn to_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            indexing_timeout_ms: self.indexing_timeout_ms,
            poll_interval_ms: self.poll_interval_ms,
            poll_jitter_ms: self.poll_jitter_ms,
        }
    }
}

/// Simulated collaborator behaviour.
#[derive(Args, Debug, Clone)]
pub struct DevnetArgs {
    /// PIN registered with the simulated verifier.
    #[arg(long, env = "NOVA_GATEWAY_DEVNET_PIN", default_value = "123456")]
    pub devnet_pin: String,

    /// One-time codes the simulated verifier accepts.
    #[arg(long = "devnet-otp", env = "NOVA_GATEWAY_DEVNET_OTP", value_delimiter = ',')]
    pub devnet_otp: Vec<String>,

    /// Submission-to-finality time, in milliseconds.
    #[arg(long, env = "NOVA_GATEWAY_CONFIRMATION_DELAY_MS", default_value_t = 200)]
    pub confirmation_delay_ms: u64,

    /// Confirmation-to-index time, in milliseconds.
    #[arg(long, env = "NOVA_GATEWAY_INDEX_LAG_MS", default_value_t = 400)]
    pub index_lag_ms: u64,

    /// Let the ledger accept submissions without a challenge response.
    #[arg(long, env = "NOVA_GATEWAY_NO_CHALLENGE")]
    pub no_challenge: bool,
}

impl DevnetArgs {
    pub fn to_config(&self) -> DevnetConfig {
        DevnetConfig {
            pin: Some(self.devnet_pin.clone()),
            otp_codes: self.devnet_otp.clone(),
            recovery_codes: Vec::new(),
            confirmation_delay: Duration::from_millis(self.confirmation_delay_ms),
            index_lag: Duration::from_millis(self.index_lag_ms),
            require_challenge: !self.no_challenge,
        }
    }
}

/// `--secret-kind` values.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretKind {
    Pin,
    Otp,
    RecoveryCode,
}

impl From<SecretKind> for VerificationKind {
    fn from(kind: SecretKind) -> Self {
        match kind {
            SecretKind::Pin => VerificationKind::Pin,
            SecretKind::Otp => VerificationKind::Otp,
            SecretKind::RecoveryCode => VerificationKind::RecoveryCode,
        }
    }
}
