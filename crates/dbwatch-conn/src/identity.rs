//! Connection identity: the cache key for the connection manager.
//!
//! A target is either the name of a configured session or a literal address:
//!
//! ```text
//! [user[:password]@]tcp(host[:port])/[database]
//! [user[:password]@]unix(/path/to/mysqld.sock)/[database]
//! tcp://[user[:password]@]host[:port][/database]
//! unix:///path/to/mysqld.sock
//! ```
//!
//! Identities compare by value: two identities are equal iff their canonical
//! connection strings are equal, however they were produced.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use sha2::{Digest, Sha512};

use crate::config::PluginOptions;
use crate::error::{ConnError, ConnResult};

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Network transport used to reach the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Unix,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "tcp"),
            Transport::Unix => write!(f, "unix"),
        }
    }
}

/// An address string broken into its parts. Credentials and database are
/// present only when the string carried them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedAddress {
    pub transport: Transport,
    /// `host:port` for TCP, socket path for Unix.
    pub address: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

/// Canonical, immutable identity of a logical database target.
#[derive(Clone)]
pub struct ConnectionIdentity {
    transport: Transport,
    address: String,
    user: String,
    password: String,
    database: Option<String>,
    connect_timeout: Duration,
    read_timeout: Duration,
    canonical: String,
}

impl ConnectionIdentity {
    pub fn new(
        transport: Transport,
        address: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        database: Option<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        let address = address.into();
        let user = user.into();
        let password = password.into();
        let database = database.filter(|db| !db.is_empty());
        let canonical = format!(
            "{}:{}@{}({})/{}?timeout={}ms&readTimeout={}ms",
            escape(&user),
            escape(&password),
            transport,
            address,
            database.as_deref().map(escape).unwrap_or_default(),
            connect_timeout.as_millis(),
            read_timeout.as_millis(),
        );
        Self {
            transport,
            address,
            user,
            password,
            database,
            connect_timeout,
            read_timeout,
            canonical,
        }
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Host and port of a TCP address. `None` for Unix sockets.
    pub fn host_port(&self) -> Option<(&str, u16)> {
        if self.transport != Transport::Tcp {
            return None;
        }
        let (host, port) = split_host_port(&self.address)?;
        Some((host, port))
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// The canonical connection string. Contains the password.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Short SHA-512 fingerprint of the canonical string, safe for logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha512::digest(self.canonical.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl PartialEq for ConnectionIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for ConnectionIdentity {}

impl Hash for ConnectionIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

/// Redacted form: `user@tcp(host:port)/database`.
impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}({})/{}",
            self.user,
            self.transport,
            self.address,
            self.database.as_deref().unwrap_or_default()
        )
    }
}

impl fmt::Debug for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionIdentity")
            .field("transport", &self.transport)
            .field("address", &self.address)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

/// Resolve a target against the plugin options using their credentials.
pub fn resolve(target: &str, options: &PluginOptions) -> ConnResult<ConnectionIdentity> {
    IdentityResolver::new(options).resolve(target)
}

/// Turns session names and address strings into identities.
#[derive(Clone, Copy, Debug)]
pub struct IdentityResolver<'a> {
    options: &'a PluginOptions,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(options: &'a PluginOptions) -> Self {
        Self { options }
    }

    pub fn resolve(&self, target: &str) -> ConnResult<ConnectionIdentity> {
        self.resolve_with(target, None, None)
    }

    /// Resolve with explicit credentials. Non-empty explicit values win over
    /// credentials embedded in the address, which win over the session's,
    /// which win over the plugin defaults.
    pub fn resolve_with(
        &self,
        target: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> ConnResult<ConnectionIdentity> {
        let options = self.options;
        let target = target.trim();

        let (uri, fallback_user, fallback_password) = match options.sessions.get(target) {
            Some(session) => (
                non_empty_or(&session.uri, &options.uri),
                non_empty_or(&session.user, &options.user),
                non_empty_or(&session.password, &options.password),
            ),
            None if target.is_empty() => (
                options.uri.as_str(),
                options.user.as_str(),
                options.password.as_str(),
            ),
            None => (target, options.user.as_str(), options.password.as_str()),
        };

        let parsed = parse_address(uri)?;

        let user = pick(user, parsed.user.as_deref(), fallback_user);
        let password = pick(password, parsed.password.as_deref(), fallback_password);
        let link_timeout = options.link_timeout();

        Ok(ConnectionIdentity::new(
            parsed.transport,
            parsed.address,
            user,
            password,
            parsed.database,
            link_timeout,
            link_timeout,
        ))
    }
}

fn non_empty_or<'s>(value: &'s str, fallback: &'s str) -> &'s str {
    if value.is_empty() { fallback } else { value }
}

fn pick<'s>(explicit: Option<&'s str>, embedded: Option<&'s str>, fallback: &'s str) -> &'s str {
    explicit
        .filter(|v| !v.is_empty())
        .or(embedded.filter(|v| !v.is_empty()))
        .unwrap_or(fallback)
}

/// Parse an address string into transport, address, credentials and database.
pub fn parse_address(raw: &str) -> ConnResult<ParsedAddress> {
    let raw = raw.trim();
    if let Some(open) = find_scheme_paren(raw) {
        parse_dsn_form(raw, open)
    } else if raw.contains("://") {
        parse_url_form(raw)
    } else {
        Err(ConnError::InvalidAddress(raw.to_string()))
    }
}

/// Position of the `(` that opens `scheme(`. The scheme must start the string
/// or directly follow the credentials' `@`.
fn find_scheme_paren(raw: &str) -> Option<usize> {
    raw.match_indices('(').map(|(i, _)| i).find(|&open| {
        let head = &raw[..open];
        let scheme_start = head
            .char_indices()
            .rev()
            .find(|(_, c)| !c.is_ascii_alphabetic())
            .map_or(0, |(i, c)| i + c.len_utf8());
        scheme_start < open && (scheme_start == 0 || head[..scheme_start].ends_with('@'))
    })
}

fn parse_dsn_form(raw: &str, open: usize) -> ConnResult<ParsedAddress> {
    let invalid = || ConnError::InvalidAddress(raw.to_string());

    let head = &raw[..open];
    let (credentials, scheme) = match head.rfind('@') {
        Some(at) => (Some(&head[..at]), &head[at + 1..]),
        None => (None, head),
    };

    let close = raw.rfind(')').filter(|&close| close > open).ok_or_else(invalid)?;
    let address = &raw[open + 1..close];
    let tail = &raw[close + 1..];
    let database = match tail {
        "" => None,
        _ => {
            let rest = tail.strip_prefix('/').ok_or_else(invalid)?;
            let db = rest.split('?').next().unwrap_or_default();
            (!db.is_empty()).then(|| db.to_string())
        }
    };

    let (transport, address) = validate_address(scheme, address).ok_or_else(invalid)?;
    let (user, password) = split_credentials(credentials);

    Ok(ParsedAddress {
        transport,
        address,
        user,
        password,
        database,
    })
}

fn parse_url_form(raw: &str) -> ConnResult<ParsedAddress> {
    let invalid = || ConnError::InvalidAddress(raw.to_string());
    let (scheme, rest) = raw.split_once("://").ok_or_else(invalid)?;

    let (credentials, address, database) = match scheme {
        "unix" => match rest.split_once('/') {
            Some((auth, _)) => {
                let credentials = auth.rsplit_once('@').map(|(c, _)| c);
                let path = &rest[auth.len()..];
                (credentials, path.to_string(), None)
            }
            None => return Err(invalid()),
        },
        _ => {
            let (authority, path) = match rest.split_once('/') {
                Some((authority, path)) => (authority, path),
                None => (rest, ""),
            };
            let (credentials, host) = match authority.rsplit_once('@') {
                Some((credentials, host)) => (Some(credentials), host),
                None => (None, authority),
            };
            let db = path.split('?').next().unwrap_or_default();
            (credentials, host.to_string(), (!db.is_empty()).then(|| db.to_string()))
        }
    };

    let (transport, address) = validate_address(scheme, &address).ok_or_else(invalid)?;
    let (user, password) = split_credentials(credentials);

    Ok(ParsedAddress {
        transport,
        address,
        user,
        password,
        database,
    })
}

/// Check scheme and address. TCP addresses without a port get 3306.
fn validate_address(scheme: &str, address: &str) -> Option<(Transport, String)> {
    match scheme {
        "tcp" => {
            if address.is_empty() || address.starts_with(':') {
                return None;
            }
            if split_host_port(address).is_some() {
                Some((Transport::Tcp, address.to_string()))
            } else if address.contains(':') && !address.starts_with('[') {
                // A colon without a numeric port.
                None
            } else {
                Some((Transport::Tcp, format!("{address}:{DEFAULT_MYSQL_PORT}")))
            }
        }
        "unix" if !address.is_empty() => Some((Transport::Unix, address.to_string())),
        _ => None,
    }
}

fn split_host_port(address: &str) -> Option<(&str, u16)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    (!host.is_empty()).then_some((host, port))
}

fn split_credentials(credentials: Option<&str>) -> (Option<String>, Option<String>) {
    match credentials {
        None => (None, None),
        Some(c) => match c.split_once(':') {
            Some((user, password)) => (Some(user.to_string()), Some(password.to_string())),
            None => (Some(c.to_string()), None),
        },
    }
}

/// Escape separators so distinct component values never produce the same
/// canonical string.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '@' => out.push_str("%40"),
            '/' => out.push_str("%2F"),
            '?' => out.push_str("%3F"),
            _ => out.push(c),
        }
    }
    out
}
