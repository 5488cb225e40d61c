//! External lookups: social-graph wallet resolution and chain reads.

pub mod chain;
pub mod wallet;

use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::Client;

/// Shared HTTP client. The request timeout bounds how long a hung endpoint
/// can stall a queue loop; past it the lookup degrades to a silent failure.
pub(crate) static HTTP: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("building reqwest client")
});
