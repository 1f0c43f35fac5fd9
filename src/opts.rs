//! Connection options.

use url::Url;

use crate::error::Error;

/// SSL connection mode, as understood by libpq.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SslMode {
    /// Don't use SSL
    Disable,
    /// Try unencrypted first, fall back to SSL
    Allow,
    /// Try SSL, fall back to unencrypted if not supported
    #[default]
    Prefer,
    /// Require SSL connection
    Require,
    /// Require SSL and verify the server certificate
    VerifyCa,
    /// Require SSL, verify the certificate and the host name
    VerifyFull,
}

impl SslMode {
    const NAMES: [&'static str; 6] = [
        "disable",
        "allow",
        "prefer",
        "require",
        "verify-ca",
        "verify-full",
    ];

    /// Name used in connection strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            SslMode::Disable => "disable",
            SslMode::Allow => "allow",
            SslMode::Prefer => "prefer",
            SslMode::Require => "require",
            SslMode::VerifyCa => "verify-ca",
            SslMode::VerifyFull => "verify-full",
        }
    }
}

impl TryFrom<&str> for SslMode {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "disable" => Ok(SslMode::Disable),
            "allow" => Ok(SslMode::Allow),
            "prefer" => Ok(SslMode::Prefer),
            "require" => Ok(SslMode::Require),
            "verify-ca" => Ok(SslMode::VerifyCa),
            "verify-full" => Ok(SslMode::VerifyFull),
            _ => Err(Error::InvalidUsage(format!(
                "Invalid SSL mode, must be one of: {}",
                Self::NAMES.join(", ")
            ))),
        }
    }
}

/// Connection options for PostgreSQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opts {
    /// Hostname or IP address.
    ///
    /// Default: `""`
    pub host: String,

    /// Port number for the PostgreSQL server.
    ///
    /// Default: `5432`
    pub port: u16,

    /// Unix socket directory, passed to the driver as `host`.
    ///
    /// Default: `None`
    pub socket: Option<String>,

    /// Username for authentication.
    ///
    /// Default: `""`
    pub user: String,

    /// Database name to use.
    ///
    /// Default: `None`
    pub database: Option<String>,

    /// Password for authentication.
    ///
    /// Default: `None`
    pub password: Option<String>,

    /// Application name to report to the server.
    ///
    /// Default: `None`
    pub application_name: Option<String>,

    /// SSL connection mode.
    ///
    /// Default: `SslMode::Prefer`
    pub ssl_mode: SslMode,

    /// Additional connection parameters.
    ///
    /// Default: `[]`
    pub params: Vec<(String, String)>,

    /// Buffer each result set in memory instead of streaming rows on demand.
    ///
    /// Default: `false`
    pub buffer_results: bool,

    /// Maximum number of idle connections kept by a [`Pool`](crate::Pool).
    ///
    /// Default: `100`
    pub pool_max_idle_conn: usize,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            socket: None,
            user: String::new(),
            database: None,
            password: None,
            application_name: None,
            ssl_mode: SslMode::Prefer,
            params: Vec::new(),
            buffer_results: false,
            pool_max_idle_conn: 100,
        }
    }
}

impl Opts {
    /// Render the libpq key/value connection string handed to a driver.
    pub fn conninfo(&self) -> String {
        let host = self.socket.as_deref().unwrap_or(&self.host);
        let mut chunks = vec![format!("host={}", host), format!("port={}", self.port)];

        if !self.user.is_empty() {
            chunks.push(format!("user={}", self.user));
        }
        if let Some(password) = &self.password {
            chunks.push(format!("password={}", password));
        }
        if let Some(database) = &self.database {
            chunks.push(format!("dbname={}", database));
        }
        chunks.push(format!("sslmode={}", self.ssl_mode.as_str()));
        if let Some(name) = &self.application_name {
            chunks.push(format!("application_name='{}'", escape_quoted(name)));
        }
        for (key, value) in &self.params {
            chunks.push(format!("{}={}", key, value));
        }

        chunks.join(" ")
    }

    /// Parse a libpq key/value string such as `host=localhost user=postgres`.
    ///
    /// Pairs are separated by `;` when one is present, otherwise by whitespace.
    fn from_key_values(s: &str) -> Result<Self, Error> {
        let pairs: Vec<&str> = if s.contains(';') {
            s.split(';').collect()
        } else {
            s.split_whitespace().collect()
        };

        let mut opts = Opts::default();
        let mut host = None;

        for pair in pairs.into_iter().map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return Err(Error::InvalidUsage(format!(
                    "Invalid connection string parameter: {}",
                    pair
                )));
            };
            let key = key.trim();
            let value = value.trim().trim_matches('\'');

            match key {
                "host" => host = Some(value.to_string()),
                "port" => {
                    opts.port = value
                        .parse()
                        .map_err(|e| Error::InvalidUsage(format!("Invalid port {}: {}", value, e)))?;
                }
                "user" | "username" => opts.user = value.to_string(),
                "password" | "pass" => opts.password = Some(value.to_string()),
                "dbname" | "db" | "database" => opts.database = Some(value.to_string()),
                "sslmode" => opts.ssl_mode = SslMode::try_from(value)?,
                "application_name" => opts.application_name = Some(value.to_string()),
                _ => opts.params.push((key.to_string(), value.to_string())),
            }
        }

        opts.host = host.ok_or_else(|| {
            Error::InvalidUsage("Host must be provided in connection string".into())
        })?;
        Ok(opts)
    }
}

fn escape_quoted(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn parse_bool(key: &str, value: &str) -> Result<bool, Error> {
    match value {
        "true" | "True" | "1" | "yes" | "on" => Ok(true),
        "false" | "False" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidUsage(format!("Invalid {}: {}", key, value))),
    }
}

impl TryFrom<&Url> for Opts {
    type Error = Error;

    /// Parse a PostgreSQL connection URL.
    ///
    /// Format: `postgres://[user[:password]@]host[:port][/database][?param1=value1&param2=value2&..]`
    ///
    /// Supported query parameters:
    /// - `sslmode`: disable, allow, prefer, require, verify-ca, verify-full
    /// - `application_name`: application name
    /// - `buffer_results`: true/True/1/yes/on or false/False/0/no/off
    /// - `pool_max_idle_conn`: maximum idle connections (positive integer)
    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        if !["postgres", "postgresql", "pg"].contains(&url.scheme()) {
            return Err(Error::InvalidUsage(format!(
                "Invalid scheme: expected 'postgres://' or 'pg://', got '{}://'",
                url.scheme()
            )));
        }

        let mut opts = Opts {
            host: url.host_str().unwrap_or("localhost").to_string(),
            port: url.port().unwrap_or(5432),
            user: url.username().to_string(),
            password: url.password().map(|s| s.to_string()),
            database: url
                .path()
                .strip_prefix('/')
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            ..Opts::default()
        };

        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "sslmode" => opts.ssl_mode = SslMode::try_from(value.as_ref())?,
                "application_name" => opts.application_name = Some(value.to_string()),
                "buffer_results" => opts.buffer_results = parse_bool(&key, &value)?,
                "pool_max_idle_conn" => {
                    opts.pool_max_idle_conn = value.parse().map_err(|e| {
                        Error::InvalidUsage(format!("Invalid pool_max_idle_conn {}: {}", value, e))
                    })?;
                }
                _ => opts.params.push((key.to_string(), value.to_string())),
            }
        }

        Ok(opts)
    }
}

impl TryFrom<&str> for Opts {
    type Error = Error;

    /// Parse either a connection URL or a libpq key/value string.
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        if s.contains("://") {
            let url =
                Url::parse(s).map_err(|e| Error::InvalidUsage(format!("Invalid URL: {}", e)))?;
            Self::try_from(&url)
        } else {
            Self::from_key_values(s)
        }
    }
}
