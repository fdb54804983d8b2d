//! Fail-fast connectivity probes for git servers.
//!
//! Probes use their own short timeout rather than the caller's deadline.
//! The timeout bounds each connection attempt; resolving a host name goes
//! through the system resolver first and is not covered by it.

use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use errors::{GitError, GitResult};

/// Opens (and immediately closes) a TCP connection to `host:port`.
///
/// IPv6 literals may be given with or without brackets.
pub fn check_tcp(host: &str, port: u16, timeout: Duration) -> GitResult<()> {
    let host = host
        .strip_prefix('[')
        .and_then(|inner| inner.strip_suffix(']'))
        .unwrap_or(host);
    let operation = format!("connect {host}:{port}");
    let addrs = (host, port).to_socket_addrs().map_err(|e| GitError::Network {
        operation: operation.clone(),
        reason: e.to_string()
    })?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => {
                tracing::debug!(%addr, "git server reachable");
                return Ok(());
            }
            Err(e) => last_error = Some(e)
        }
    }

    Err(GitError::Network {
        operation,
        reason: last_error.map_or_else(|| "host resolved to no addresses".to_string(), |e| e.to_string())
    })
}

/// Probes a git server base URL.
///
/// `file://` URLs are checked on the filesystem; `ssh://`, `http://` and
/// `https://` URLs by TCP connect to their authority (default ports 22, 80
/// and 443).
pub fn check_url(url: &str, timeout: Duration) -> GitResult<()> {
    if let Some(path) = url.strip_prefix("file://") {
        if Path::new(path).exists() {
            return Ok(());
        }
        return Err(GitError::Network {
            operation: format!("probe {url}"),
            reason: "path does not exist".to_string()
        });
    }

    let (scheme, rest) = url.split_once("://").ok_or_else(|| GitError::InvalidReference {
        reference: url.to_string(),
        reason: "URL has no scheme".to_string()
    })?;
    let default_port = match scheme {
        "ssh" => 22,
        "http" => 80,
        "https" => 443,
        other => {
            return Err(GitError::InvalidReference {
                reference: url.to_string(),
                reason: format!("unsupported scheme {other}")
            });
        }
    };

    let authority = rest.split('/').next().unwrap_or_default();
    let (host, port) = split_authority(authority, default_port).map_err(|reason| GitError::InvalidReference {
        reference: url.to_string(),
        reason
    })?;
    check_tcp(host, port, timeout)
}

/// Splits `[user@]host[:port]`, where host may be a bracketed IPv6
/// literal.
fn split_authority(authority: &str, default_port: u16) -> Result<(&str, u16), String> {
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);

    let (host, port) = if let Some(bracketed) = host_port.strip_prefix('[') {
        let (host, rest) = bracketed
            .split_once(']')
            .ok_or_else(|| format!("unterminated IPv6 literal in {authority}"))?;
        match rest {
            "" => (host, None),
            _ => {
                let port = rest
                    .strip_prefix(':')
                    .ok_or_else(|| format!("unexpected '{rest}' after IPv6 literal"))?;
                (host, Some(port))
            }
        }
    } else {
        match host_port.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (host_port, None)
        }
    };

    if host.is_empty() {
        return Err("URL has no host".to_string());
    }
    let port = match port {
        Some(port) => port.parse().map_err(|_| format!("invalid port {port}"))?,
        None => default_port
    };
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_probe_against_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(check_tcp("127.0.0.1", port, Duration::from_secs(1)).is_ok());
        assert!(check_url(&format!("ssh://git@127.0.0.1:{port}/team/app"), Duration::from_secs(1)).is_ok());

        drop(listener);
        assert!(matches!(
            check_tcp("127.0.0.1", port, Duration::from_millis(500)),
            Err(GitError::Network { .. })
        ));
    }

    #[test]
    fn test_ipv6_probe() {
        let Ok(listener) = TcpListener::bind("[::1]:0") else {
            // No IPv6 loopback on this host.
            return;
        };
        let port = listener.local_addr().unwrap().port();

        assert!(check_tcp("::1", port, Duration::from_secs(1)).is_ok());
        assert!(check_tcp("[::1]", port, Duration::from_secs(1)).is_ok());
        assert!(check_url(&format!("ssh://git@[::1]:{port}/team/app"), Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_split_authority() {
        assert_eq!(split_authority("git@[::1]:2222", 22), Ok(("::1", 2222)));
        assert_eq!(split_authority("[fe80::1]", 443), Ok(("fe80::1", 443)));
        assert_eq!(split_authority("git@example.com", 22), Ok(("example.com", 22)));
        assert_eq!(split_authority("example.com:8443", 443), Ok(("example.com", 8443)));
        assert!(split_authority("[::1", 22).is_err());
        assert!(split_authority("[::1]x", 22).is_err());
        assert!(split_authority("example.com:ssh", 22).is_err());
        assert!(split_authority("", 22).is_err());
    }

    #[test]
    fn test_file_url_probe() {
        let dir = tempfile::TempDir::new().unwrap();
        let url = format!("file://{}", dir.path().display());
        assert!(check_url(&url, Duration::from_secs(1)).is_ok());
        assert!(check_url(&format!("{url}/missing"), Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_unsupported_url() {
        assert!(matches!(
            check_url("git.example.com/app", Duration::from_secs(1)),
            Err(GitError::InvalidReference { .. })
        ));
        assert!(matches!(
            check_url("ftp://git.example.com/app", Duration::from_secs(1)),
            Err(GitError::InvalidReference { .. })
        ));
    }
}
