use thiserror::Error;

/// Errors building or configuring the client. Per-call failures are
/// classified into [`remedy_core::api::RemoteError`] instead.
#[derive(Debug, Error)]
pub enum ShopError {
    #[error("missing credential: {0}")]
    MissingCredential(&'static str),

    #[error("invalid shop domain '{0}': expected e.g. my-shop.myshopify.com")]
    InvalidDomain(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
