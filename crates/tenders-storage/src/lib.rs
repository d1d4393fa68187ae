//! HTTP fetch utilities and SQLite tender persistence.

pub mod fetch;
pub mod store;

pub use fetch::{
    classify_reqwest_error, classify_status, parse_retry_after, BackoffPolicy, FetchError,
    FetchedResponse, HttpClientConfig, HttpFetcher, RateLimitPolicy, RetryDisposition,
    KENYAN_ACCEPT_LANGUAGE, MOBILE_USER_AGENT,
};
pub use store::{
    SqliteTenderRepository, StoreError, TenderRepository, TenderStore, UpsertOutcome,
    OPEN_WEEK_DAYS, STATS_CLOSING_SOON_DAYS, TOP_CATEGORY_LIMIT,
};

pub const CRATE_NAME: &str = "tenders-storage";
