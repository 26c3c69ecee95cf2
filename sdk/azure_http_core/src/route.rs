//! Declarative description of a service operation.
//!
//! Each client declares its operations as `const` [`Route`] values and sends
//! them through [`crate::client::ServiceClient::send`], which takes care of
//! path expansion, `api-version`, status checking and error mapping.

use reqwest::Method;
use url::Url;

use crate::error::{Error, HttpErrorKind, Result};

/// A single REST operation.
#[derive(Debug, Clone)]
pub struct Route {
    /// Short name used in log events, e.g. `"keys.get"`.
    pub name: &'static str,
    pub method: Method,
    /// Path template relative to the endpoint, e.g. `/keys/{name}/{version}`.
    pub path: &'static str,
    /// Statuses treated as success.
    pub expected: &'static [u16],
    /// Per-route overrides of the default status classification.
    pub errors: &'static [(u16, HttpErrorKind)],
}

impl Route {
    pub fn is_expected(&self, status: u16) -> bool {
        self.expected.contains(&status)
    }

    /// Classify an unexpected status, preferring the route's own mapping.
    pub fn error_kind(&self, status: u16) -> HttpErrorKind {
        self.errors
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, kind)| *kind)
            .unwrap_or_else(|| HttpErrorKind::from_status(status))
    }

    /// Expand the path template onto `endpoint`.
    ///
    /// Each `{param}` segment is replaced by its percent-encoded value. A
    /// parameter bound to an empty string drops its segment, which is how
    /// optional trailing segments such as a key version are expressed.
    pub fn url(&self, endpoint: &Url, params: &[(&str, &str)]) -> Result<Url> {
        let mut url = endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| Error::InvalidEndpoint {
                message: format!("endpoint cannot be a base URL: {endpoint}"),
                source: None,
            })?;
            segments.pop_if_empty();

            for segment in self.path.split('/').filter(|s| !s.is_empty()) {
                match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                    Some(name) => {
                        let value = params
                            .iter()
                            .find(|(k, _)| *k == name)
                            .map(|(_, v)| *v)
                            .ok_or_else(|| {
                                Error::InvalidArgument(format!(
                                    "missing path parameter '{name}' for {}",
                                    self.name
                                ))
                            })?;
                        if !value.is_empty() {
                            segments.push(value);
                        }
                    }
                    None => {
                        segments.push(segment);
                    }
                }
            }
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GET_KEY: Route = Route {
        name: "keys.get",
        method: Method::GET,
        path: "/keys/{name}/{version}",
        expected: &[200],
        errors: &[(403, HttpErrorKind::ResourceNotFound)],
    };

    fn endpoint() -> Url {
        Url::parse("https://myvault.vault.azure.net").unwrap()
    }

    #[test]
    fn expands_path_parameters() {
        let url = GET_KEY
            .url(&endpoint(), &[("name", "k1"), ("version", "abc")])
            .unwrap();
        assert_eq!(url.as_str(), "https://myvault.vault.azure.net/keys/k1/abc");
    }

    #[test]
    fn empty_parameter_drops_segment() {
        let url = GET_KEY
            .url(&endpoint(), &[("name", "k1"), ("version", "")])
            .unwrap();
        assert_eq!(url.path(), "/keys/k1");
    }

    #[test]
    fn parameters_are_percent_encoded() {
        let url = GET_KEY
            .url(&endpoint(), &[("name", "a b/c"), ("version", "")])
            .unwrap();
        assert_eq!(url.path(), "/keys/a%20b%2Fc");
    }

    #[test]
    fn endpoint_path_prefix_is_kept() {
        let endpoint = Url::parse("https://proxy.example.net/vault/").unwrap();
        let url = GET_KEY
            .url(&endpoint, &[("name", "k1"), ("version", "")])
            .unwrap();
        assert_eq!(url.path(), "/vault/keys/k1");
    }

    #[test]
    fn missing_parameter_is_invalid_argument() {
        let err = GET_KEY.url(&endpoint(), &[("name", "k1")]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("version")));
    }

    #[test]
    fn route_error_mapping_overrides_default() {
        assert_eq!(GET_KEY.error_kind(403), HttpErrorKind::ResourceNotFound);
        assert_eq!(GET_KEY.error_kind(404), HttpErrorKind::ResourceNotFound);
        assert_eq!(GET_KEY.error_kind(409), HttpErrorKind::ResourceModified);
        assert!(GET_KEY.is_expected(200));
        assert!(!GET_KEY.is_expected(204));
    }
}
