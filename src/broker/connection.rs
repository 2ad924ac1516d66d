use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::RetryExponential;
use crate::error::BrokerError;

/// A parsed broker connection string.
///
/// Format: `Endpoint=sb://host/;SharedAccessKeyName=name;SharedAccessKey=key`.
/// Only `Endpoint` is required; it identifies the namespace.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    raw: String,
    endpoint: String,
    entries: Vec<(String, String)>,
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, BrokerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BrokerError::InvalidConnectionString {
                reason: "empty connection string".into(),
            });
        }

        let mut entries = Vec::new();
        for part in trimmed.split(';').filter(|p| !p.trim().is_empty()) {
            let (key, value) =
                part.split_once('=')
                    .ok_or_else(|| BrokerError::InvalidConnectionString {
                        reason: format!("segment without '=': {}", part.trim()),
                    })?;
            entries.push((key.trim().to_string(), value.trim().to_string()));
        }

        let endpoint = entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("Endpoint"))
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| BrokerError::InvalidConnectionString {
                reason: "missing Endpoint".into(),
            })?;

        Ok(Self {
            raw: trimmed.to_string(),
            endpoint,
            entries,
        })
    }

    /// Namespace identifier (the endpoint URI).
    pub fn namespace(&self) -> &str {
        &self.endpoint
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for ConnectionString {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Keys stay out of logs.
impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint)
    }
}

/// Parse the standby connection to pair with `active`.
///
/// The error describes why there is no usable standby: none configured,
/// unparseable, or the same as `active`.
pub fn passive_connection(
    active: &ConnectionString,
    passive: Option<&str>,
) -> Result<ConnectionString, String> {
    let raw = passive
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| "no passive connection configured".to_string())?;
    let conn = ConnectionString::parse(raw).map_err(|e| e.to_string())?;
    if conn == *active {
        return Err("passive connection is the same as the active one".to_string());
    }
    Ok(conn)
}

/// Transport options handed to broker clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    pub operation_timeout: Duration,
    pub retry: RetryExponential,
}

impl ClientOptions {
    pub fn new(operation_timeout: Duration, retry: RetryExponential) -> Self {
        Self {
            operation_timeout,
            retry,
        }
    }

    /// Run one broker operation under the retry policy and operation timeout.
    pub fn execute<T, F>(&self, op: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Result<T, BrokerError>,
    {
        self.retry.run(Instant::now() + self.operation_timeout, op)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(45),
            RetryExponential::new(Duration::from_secs(2), Duration::from_secs(10), 10),
        )
    }
}
