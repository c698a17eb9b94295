/// Fatal configuration problems. The only error `run_search` surfaces;
/// every other failure degrades the result instead.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    MissingCredential(&'static str),

    #[error("{credential} was rejected: {message}")]
    CredentialRejected {
        credential: &'static str,
        message: String,
    },

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid domain pattern '{pattern}': {source}")]
    DomainPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
