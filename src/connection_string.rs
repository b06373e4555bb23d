use crate::channel::DEFAULT_ENDPOINT;
use http::Uri;
use std::str::FromStr;

const TRACK_PATH: &str = "v2/track";

/// What a connection string tells the client: whose telemetry it is and where to post it.
#[derive(Debug)]
pub(crate) struct ConnectionString {
    pub(crate) instrumentation_key: String,
    /// The collector URI batches are posted to, `v2/track` included.
    pub(crate) track_endpoint: Uri,
}

/// Reasons a connection string is rejected.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ParseError {
    /// A field is not a `key=value` pair.
    #[error("invalid format")]
    InvalidFormat,
    /// There is no `InstrumentationKey` field.
    #[error("missing instrumentation key")]
    MissingInstrumentationKey,
    /// The `Authorization` field names something other than `ikey`.
    #[error("unsupported authorization; only \"ikey\" is supported")]
    UnsupportedAuthorization,
    /// The ingestion endpoint uses a scheme other than `http` or `https`.
    #[error("unsupported endpoint scheme; only http and https are supported")]
    UnsupportedScheme,
    /// The ingestion endpoint is not a valid URI.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(http::uri::InvalidUri),
}

/// The fields this crate understands. Keys match case-insensitively and unknown keys are
/// skipped; a repeated key keeps its last value.
#[derive(Debug, Default)]
struct Fields<'a> {
    authorization: Option<&'a str>,
    instrumentation_key: Option<&'a str>,
    ingestion_endpoint: Option<&'a str>,
    endpoint_suffix: Option<&'a str>,
    location: Option<&'a str>,
}

impl<'a> Fields<'a> {
    fn parse(s: &'a str) -> Result<Self, ParseError> {
        let mut fields = Fields::default();
        for field in s.split(';').filter(|field| !field.trim().is_empty()) {
            let (key, value) = match field.split_once('=') {
                Some((key, value)) if !value.contains('=') => (key, value.trim()),
                _ => return Err(ParseError::InvalidFormat),
            };
            let slot = match key.trim().to_ascii_lowercase().as_str() {
                "authorization" => &mut fields.authorization,
                "instrumentationkey" => &mut fields.instrumentation_key,
                "ingestionendpoint" => &mut fields.ingestion_endpoint,
                "endpointsuffix" => &mut fields.endpoint_suffix,
                "location" => &mut fields.location,
                _ => continue,
            };
            *slot = Some(value);
        }
        Ok(fields)
    }

    /// An explicit `IngestionEndpoint` wins over `EndpointSuffix` (with optional `Location`).
    fn track_endpoint(&self) -> Result<Uri, ParseError> {
        let host = match (self.ingestion_endpoint, self.endpoint_suffix, self.location) {
            (Some(endpoint), _, _) => endpoint.to_string(),
            (None, Some(suffix), Some(location)) => format!("{}.dc.{}", location, suffix),
            (None, Some(suffix), None) => format!("dc.{}", suffix),
            (None, None, _) => return Ok(Uri::from_static(DEFAULT_ENDPOINT)),
        };
        let host = host
            .strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(host.as_str())
            .trim_end_matches('/');
        if host.contains("://") {
            return Err(ParseError::UnsupportedScheme);
        }
        format!("https://{}/{}", host, TRACK_PATH)
            .parse()
            .map_err(ParseError::InvalidEndpoint)
    }
}

impl FromStr for ConnectionString {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = Fields::parse(s)?;
        if matches!(fields.authorization, Some(auth) if !auth.eq_ignore_ascii_case("ikey")) {
            return Err(ParseError::UnsupportedAuthorization);
        }
        let instrumentation_key = fields
            .instrumentation_key
            .filter(|key| !key.is_empty())
            .ok_or(ParseError::MissingInstrumentationKey)?;
        Ok(ConnectionString {
            instrumentation_key: instrumentation_key.to_string(),
            track_endpoint: fields.track_endpoint()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("InstrumentationKey=ikey",
                "https://dc.services.visualstudio.com/v2/track" ; "default collector")]
    #[test_case("InstrumentationKey=ikey;IngestionEndpoint=https://westeurope-1.in.applicationinsights.azure.com/",
                "https://westeurope-1.in.applicationinsights.azure.com/v2/track" ; "regional endpoint")]
    #[test_case("InstrumentationKey=ikey;IngestionEndpoint= http://collector.local  ",
                "https://collector.local/v2/track" ; "upgraded to https")]
    #[test_case("InstrumentationKey=ikey;IngestionEndpoint=collector.local:8443",
                "https://collector.local:8443/v2/track" ; "scheme is optional")]
    #[test_case("InstrumentationKey=ikey;IngestionEndpoint=https://proxy.local/ai/",
                "https://proxy.local/ai/v2/track" ; "endpoint with path")]
    #[test_case("InstrumentationKey=ikey;EndpointSuffix=ai.contoso.com",
                "https://dc.ai.contoso.com/v2/track" ; "suffix")]
    #[test_case("EndpointSuffix=ai.contoso.com;Location=westus2;InstrumentationKey=ikey",
                "https://westus2.dc.ai.contoso.com/v2/track" ; "suffix and location")]
    #[test_case("InstrumentationKey=ikey;Location=westus2",
                "https://dc.services.visualstudio.com/v2/track" ; "location alone is ignored")]
    #[test_case("EndpointSuffix=ai.contoso.com;IngestionEndpoint=https://collector.local;InstrumentationKey=ikey",
                "https://collector.local/v2/track" ; "endpoint beats suffix")]
    fn track_endpoint(connection_string: &'static str, expected: &'static str) {
        let parsed: ConnectionString = connection_string.parse().unwrap();
        assert_eq!(expected, parsed.track_endpoint.to_string());
        assert_eq!("ikey", parsed.instrumentation_key);
    }

    #[test_case("instrumentationkey=ikey" ; "lowercase key")]
    #[test_case(" InstrumentationKey = ikey ;" ; "padding and trailing separator")]
    #[test_case("Authorization=IKEY;Region=eu;InstrumentationKey=ikey" ; "ikey authorization and unknown field")]
    #[test_case("InstrumentationKey=old;InstrumentationKey=ikey" ; "last value wins")]
    fn instrumentation_key(connection_string: &'static str) {
        let parsed: ConnectionString = connection_string.parse().unwrap();
        assert_eq!("ikey", parsed.instrumentation_key);
    }

    #[test_case("Authorization=aad;InstrumentationKey=ikey",
                "unsupported authorization; only \"ikey\" is supported" ; "aad authorization")]
    #[test_case("InstrumentationKey=ikey;NoValue", "invalid format" ; "field without value")]
    #[test_case("InstrumentationKey=ikey;Key=a=b", "invalid format" ; "two equals signs")]
    #[test_case("IngestionEndpoint=https://collector.local", "missing instrumentation key" ; "no key")]
    #[test_case("InstrumentationKey=", "missing instrumentation key" ; "empty key")]
    #[test_case("InstrumentationKey=ikey;IngestionEndpoint=ftp://collector.local",
                "unsupported endpoint scheme; only http and https are supported" ; "ftp endpoint")]
    fn rejected(connection_string: &'static str, expected: &'static str) {
        let err = connection_string.parse::<ConnectionString>().unwrap_err();
        assert_eq!(expected, err.to_string());
    }

    #[test]
    fn invalid_endpoint_uri() {
        let err = "InstrumentationKey=ikey;IngestionEndpoint=https://collector local"
            .parse::<ConnectionString>()
            .unwrap_err();
        assert!(matches!(err, ParseError::InvalidEndpoint(_)));
    }
}
