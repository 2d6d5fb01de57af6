//! Remote page retrieval and credential supply.

use bytes::Bytes;

use crate::cache::CacheKey;
use crate::error::PageResult;

/// Retrieves one page's raw image bytes from the remote backend.
///
/// Implementations report every transport, status, or body error as
/// [`PageError::Fetch`](crate::error::PageError::Fetch).
pub trait PageFetcher: Send + Sync {
    fn fetch(&self, key: &CacheKey, credential: &str) -> PageResult<Bytes>;
}

/// Supplies the bearer credential for each remote fetch.
///
/// Called once per network call so a session layer can rotate tokens
/// without the engine caring.
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> String;
}

/// A fixed credential.
#[derive(Debug, Clone)]
pub struct StaticCredential(pub String);

impl CredentialProvider for StaticCredential {
    fn credential(&self) -> String {
        self.0.clone()
    }
}

impl<F> CredentialProvider for F
where
    F: Fn() -> String + Send + Sync,
{
    fn credential(&self) -> String {
        self()
    }
}

#[cfg(feature = "http")]
pub use http::HttpPageFetcher;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use bytes::Bytes;
    use reqwest::blocking::Client;
    use reqwest::header::AUTHORIZATION;
    use reqwest::Url;

    use super::PageFetcher;
    use crate::cache::CacheKey;
    use crate::error::{PageError, PageResult};

    /// Fetches pages from `GET {base_url}/chapters/{chapter}/pages/{index}`.
    ///
    /// The chapter id is sent as a single percent-encoded path segment.
    pub struct HttpPageFetcher {
        client: Client,
        base_url: Url,
    }

    impl HttpPageFetcher {
        pub fn new(base_url: &str, timeout: Duration) -> PageResult<Self> {
            let base_url = Url::parse(base_url)
                .map_err(|e| PageError::Config(format!("base URL {base_url}: {e}")))?;
            if base_url.cannot_be_a_base() {
                return Err(PageError::Config(format!(
                    "base URL {base_url}: cannot hold a path"
                )));
            }
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PageError::Config(format!("HTTP client: {e}")))?;
            Ok(Self { client, base_url })
        }

        fn page_url(&self, key: &CacheKey) -> Url {
            let mut url = self.base_url.clone();
            let page = key.page_index.to_string();
            // Checked in new(): the base always accepts path segments
            if let Ok(mut segments) = url.path_segments_mut() {
                segments
                    .pop_if_empty()
                    .extend(["chapters", &*key.chapter_id, "pages", page.as_str()]);
            }
            url
        }
    }

    impl PageFetcher for HttpPageFetcher {
        fn fetch(&self, key: &CacheKey, credential: &str) -> PageResult<Bytes> {
            let response = self
                .client
                .get(self.page_url(key))
                .header(AUTHORIZATION, format!("Bearer {credential}"))
                .send()
                .map_err(|e| PageError::fetch(key, e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Err(PageError::fetch(key, format!("HTTP {status}")));
            }

            response
                .bytes()
                .map_err(|e| PageError::fetch(key, format!("body: {e}")))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        fn fetcher(base_url: &str) -> HttpPageFetcher {
            HttpPageFetcher::new(base_url, Duration::from_secs(5)).unwrap()
        }

        #[test]
        fn test_page_url_strips_trailing_slash() {
            let fetcher = fetcher("https://api.example.com/v1/");
            assert_eq!(
                fetcher.page_url(&CacheKey::new("c9", 4)).as_str(),
                "https://api.example.com/v1/chapters/c9/pages/4"
            );
        }

        #[test]
        fn test_page_url_escapes_chapter_id() {
            let fetcher = fetcher("https://api.example.com/v1");
            assert_eq!(
                fetcher.page_url(&CacheKey::new("a/b", 0)).as_str(),
                "https://api.example.com/v1/chapters/a%2Fb/pages/0"
            );
            assert_eq!(
                fetcher.page_url(&CacheKey::new("x?y#z", 2)).as_str(),
                "https://api.example.com/v1/chapters/x%3Fy%23z/pages/2"
            );
        }

        #[test]
        fn test_rejects_invalid_base_url() {
            let result = HttpPageFetcher::new("not a url", Duration::from_secs(5));
            assert!(matches!(result, Err(PageError::Config(_))));
            let result =
                HttpPageFetcher::new("mailto:pages@example.com", Duration::from_secs(5));
            assert!(matches!(result, Err(PageError::Config(_))));
        }
    }
}
