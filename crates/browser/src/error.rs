/// Errors raised while preparing or launching the browser.
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Failed to fetch browser: {0}")]
    Fetch(String),

    #[error("Invalid browser configuration: {0}")]
    Config(String),

    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
