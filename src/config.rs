use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Listen protocol
// ---------------------------------------------------------------------------

/// Address family the HTTP listener binds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ListenProtocol {
    /// Either family; a host-less bind uses the IPv6 wildcard.
    Tcp,
    /// IPv4 only.
    #[default]
    Tcp4,
    /// IPv6 addresses; the wildcard follows the OS dual-stack default.
    Tcp6,
}

impl ListenProtocol {
    fn unspecified(self) -> IpAddr {
        match self {
            Self::Tcp4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Self::Tcp | Self::Tcp6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    fn accepts(self, addr: &SocketAddr) -> bool {
        match self {
            Self::Tcp => true,
            Self::Tcp4 => addr.is_ipv4(),
            Self::Tcp6 => addr.is_ipv6(),
        }
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory holding one bare mirror per repository URL.  May get
    /// quite large; nothing is ever evicted.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Listen address, either `host:port` or a host-less `:port`.
    #[serde(default = "default_web_bind")]
    pub web_bind: String,
    #[serde(default)]
    pub protocol: ListenProtocol,
    /// Name or path of the `git` executable.
    #[serde(default = "default_git_binary")]
    pub git_binary: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            web_bind: default_web_bind(),
            protocol: ListenProtocol::default(),
            git_binary: default_git_binary(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("~/.gitcache")
}

fn default_web_bind() -> String {
    ":9091".to_string()
}

fn default_git_binary() -> String {
    "git".to_string()
}

/// Values supplied on the command line or through the environment.  Any
/// field that is set wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub cache_dir: Option<PathBuf>,
    pub web_bind: Option<String>,
    pub protocol: Option<ListenProtocol>,
    pub git_binary: Option<String>,
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Build the effective [`Config`]: defaults, then the optional YAML file at
/// `path`, then `overrides`.  The cache directory is home-expanded.
pub fn load_config(path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path.display()))?;
            serde_yaml::from_str::<Config>(&contents)
                .with_context(|| format!("failed to parse config file: {}", path.display()))?
        }
        None => Config::default(),
    };

    if let Some(cache_dir) = overrides.cache_dir {
        config.cache_dir = cache_dir;
    }
    if let Some(web_bind) = overrides.web_bind {
        config.web_bind = web_bind;
    }
    if let Some(protocol) = overrides.protocol {
        config.protocol = protocol;
    }
    if let Some(git_binary) = overrides.git_binary {
        config.git_binary = git_binary;
    }

    config.cache_dir = expand_home(&config.cache_dir)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    anyhow::ensure!(
        !config.cache_dir.as_os_str().is_empty(),
        "cache_dir must not be empty"
    );
    anyhow::ensure!(
        !config.git_binary.is_empty(),
        "git_binary must not be empty"
    );
    split_bind(&config.web_bind)?;
    Ok(())
}

/// Expand a leading `~` to the current user's home directory.
///
/// `~user/...` forms are rejected rather than guessed at.
pub fn expand_home(path: &Path) -> Result<PathBuf> {
    let Some(raw) = path.to_str() else {
        return Ok(path.to_path_buf());
    };
    if !raw.starts_with('~') {
        return Ok(path.to_path_buf());
    }

    let rest = &raw[1..];
    if !rest.is_empty() && !rest.starts_with('/') {
        bail!("cannot expand user-specific home dir: {raw}");
    }

    let home = dirs::home_dir().context("cannot determine home directory")?;
    Ok(home.join(rest.trim_start_matches('/')))
}

// ---------------------------------------------------------------------------
// Listen address
// ---------------------------------------------------------------------------

/// Split a bind string into its (optional) host and port.
///
/// Accepts `:9091`, `127.0.0.1:9091`, `[::1]:9091` and `localhost:9091`.
pub fn split_bind(bind: &str) -> Result<(Option<&str>, u16)> {
    let (host, port) = bind
        .rsplit_once(':')
        .with_context(|| format!("listen address {bind:?} has no port"))?;
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in listen address {bind:?}"))?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        Ok((None, port))
    } else {
        Ok((Some(host), port))
    }
}

impl Config {
    /// Resolve [`Config::web_bind`] to a socket address of the configured
    /// family.
    pub async fn listen_addr(&self) -> Result<SocketAddr> {
        let (host, port) = split_bind(&self.web_bind)?;
        let Some(host) = host else {
            return Ok(SocketAddr::new(self.protocol.unspecified(), port));
        };

        let protocol = self.protocol;
        tokio::net::lookup_host((host, port))
            .await
            .with_context(|| format!("failed to resolve listen host {host:?}"))?
            .find(|addr| protocol.accepts(addr))
            .with_context(|| {
                format!("no {protocol:?} address found for listen host {host:?}")
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_bind_hostless() {
        assert_eq!(split_bind(":9091").unwrap(), (None, 9091));
    }

    #[test]
    fn split_bind_with_hosts() {
        assert_eq!(
            split_bind("127.0.0.1:8080").unwrap(),
            (Some("127.0.0.1"), 8080)
        );
        assert_eq!(split_bind("[::1]:8080").unwrap(), (Some("::1"), 8080));
    }

    #[test]
    fn split_bind_rejects_missing_port() {
        assert!(split_bind("localhost").is_err());
        assert!(split_bind("localhost:http").is_err());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        let p = expand_home(Path::new("/var/cache/gitcache")).unwrap();
        assert_eq!(p, PathBuf::from("/var/cache/gitcache"));
    }

    #[test]
    fn expand_home_rejects_other_users() {
        assert!(expand_home(Path::new("~bob/cache")).is_err());
    }

    #[test]
    fn expand_home_joins_home() {
        if let Some(home) = dirs::home_dir() {
            let p = expand_home(Path::new("~/.gitcache")).unwrap();
            assert_eq!(p, home.join(".gitcache"));
        }
    }

    #[test]
    fn overrides_win_over_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("config.yaml");
        std::fs::write(
            &file,
            "cache_dir: /srv/gitcache\nweb_bind: \":8000\"\nprotocol: tcp\n",
        )
        .unwrap();

        let config = load_config(
            Some(&file),
            Overrides {
                web_bind: Some("127.0.0.1:9999".into()),
                ..Overrides::default()
            },
        )
        .unwrap();

        assert_eq!(config.cache_dir, PathBuf::from("/srv/gitcache"));
        assert_eq!(config.web_bind, "127.0.0.1:9999");
        assert_eq!(config.protocol, ListenProtocol::Tcp);
        assert_eq!(config.git_binary, "git");
    }

    #[test]
    fn invalid_bind_is_rejected() {
        let result = load_config(
            None,
            Overrides {
                cache_dir: Some("/tmp/gitcache".into()),
                web_bind: Some("nowhere".into()),
                ..Overrides::default()
            },
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn hostless_bind_uses_family_wildcard() {
        let config = Config {
            cache_dir: "/tmp/gitcache".into(),
            web_bind: ":9091".into(),
            protocol: ListenProtocol::Tcp4,
            git_binary: "git".into(),
        };
        let addr = config.listen_addr().await.unwrap();
        assert_eq!(addr, "0.0.0.0:9091".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn literal_bind_respects_family() {
        let config = Config {
            cache_dir: "/tmp/gitcache".into(),
            web_bind: "[::1]:9091".into(),
            protocol: ListenProtocol::Tcp4,
            git_binary: "git".into(),
        };
        assert!(config.listen_addr().await.is_err());
    }
}
