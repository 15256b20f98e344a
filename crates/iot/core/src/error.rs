//! Typed errors surfaced to callers.
//!
//! Operations return `color_eyre::eyre::Result`; these types travel inside the
//! report and are recovered with [`find_cause`] or [`Error::of`].

use crate::{ConnectionStringError, Provider};

/// Errors callers are expected to branch on.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("integration not found")]
    IntegrationNotFound,
    #[error("integration already exists")]
    IntegrationExists,
    #[error("unknown integration provider")]
    UnknownIntegration,
    #[error("no credentials configured for integration")]
    NoCredentials,
    #[error("no connection string returned for device")]
    NoDeviceConnectionString,
    #[error("device already exists")]
    DeviceAlreadyExists,
    #[error("device not found")]
    DeviceNotFound,
    #[error("device state conflict")]
    DeviceStateConflict,
    #[error("cannot remove integration: devices are still connected to it")]
    CannotRemoveIntegration,
    #[error("invalid credentials")]
    InvalidCredentials(#[from] CredentialError),
}

impl Error {
    /// Find an [`Error`] anywhere in a report's cause chain.
    pub fn of(report: &color_eyre::eyre::Report) -> Option<&Error> {
        find_cause(report)
    }
}

/// Why a set of credentials was refused.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("'{provider}' incompatible with credential type '{credential_type}'")]
    Incompatible {
        provider: Provider,
        credential_type: &'static str,
    },
    #[error("description is too long")]
    DescriptionTooLong,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("failed to lookup host with name '{host}'")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("host '{host}' resolves to a forbidden address {addr}")]
    ForbiddenAddress { host: String, addr: std::net::IpAddr },
    #[error(transparent)]
    ConnectionString(#[from] ConnectionStringError),
}

/// Find the first error of type `T` in a report's cause chain.
pub fn find_cause<T>(report: &color_eyre::eyre::Report) -> Option<&T>
where
    T: std::error::Error + 'static,
{
    report.chain().find_map(|cause| cause.downcast_ref::<T>())
}
