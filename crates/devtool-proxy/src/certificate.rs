//! Installing the proxy's CA certificate into the local trust store.
//!
//! ## Steps
//!
//! 1. Download `GET /proxy/cert` from the control plane
//! 2. Write it to `<temp>/devtool-cert/DevTool-Proxy-Cert.cer`, clearing any
//!    earlier copy first
//! 3. Add it as a trusted root for the current user
//!
//! Step 3 changes system trust and may prompt for credentials. Callers must
//! obtain explicit user consent before calling [`CertificateInstaller::install`].
//!
//! | Platform | Command |
//! |---|---|
//! | macOS | `security add-trusted-cert -d -r trustRoot -k ~/Library/Keychains/login.keychain-db` |
//! | Linux | copy a PEM conversion into the distro anchor directory, then refresh (via `pkexec` or `sudo`) |
//! | Windows | `certutil -addstore -user Root` |

use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use tokio::process::Command;

use crate::control::{base_url, DEFAULT_REQUEST_TIMEOUT};
use crate::error::CertificateError;

/// Name of the temporary directory holding the downloaded certificate.
pub const CERT_DIR_NAME: &str = "devtool-cert";

/// File name of the downloaded certificate.
pub const CERT_FILE_NAME: &str = "DevTool-Proxy-Cert.cer";

/// Adds a certificate file to a trust store.
#[async_trait]
pub trait TrustStore: Send + Sync {
    /// Trusts the certificate at `path` as a root for the current user.
    async fn install(&self, path: &Path) -> Result<(), CertificateError>;
}

/// The operating system's user trust store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTrustStore;

#[async_trait]
impl TrustStore for SystemTrustStore {
    async fn install(&self, path: &Path) -> Result<(), CertificateError> {
        install_system(path).await
    }
}

/// Downloads and trusts the proxy CA certificate.
pub struct CertificateInstaller {
    cert_url: Url,
    client: reqwest::Client,
    trust_store: Arc<dyn TrustStore>,
    temp_root: PathBuf,
}

impl std::fmt::Debug for CertificateInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateInstaller")
            .field("cert_url", &self.cert_url.as_str())
            .field("temp_root", &self.temp_root)
            .finish()
    }
}

impl CertificateInstaller {
    /// Creates an installer for the control plane at `host:port`.
    pub fn new(host: &str, port: u16) -> Result<Self, CertificateError> {
        let cert_url = base_url(host, port)
            .and_then(|base| base.join("/proxy/cert").map_err(|e| e.to_string()))
            .map_err(CertificateError::InvalidUrl)?;

        let client = reqwest::Client::builder()
            .user_agent(format!("DevTool/{}", env!("CARGO_PKG_VERSION")))
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| CertificateError::InvalidResponse(e.to_string()))?;

        Ok(Self {
            cert_url,
            client,
            trust_store: Arc::new(SystemTrustStore),
            temp_root: std::env::temp_dir(),
        })
    }

    /// Uses a different trust store.
    pub fn with_trust_store(mut self, store: Arc<dyn TrustStore>) -> Self {
        self.trust_store = store;
        self
    }

    /// Places the temporary certificate directory under `root`.
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    /// Per-request timeout for the download.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, CertificateError> {
        self.client = reqwest::Client::builder()
            .user_agent(format!("DevTool/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| CertificateError::InvalidResponse(e.to_string()))?;
        Ok(self)
    }

    /// Certificate download URL.
    pub fn cert_url(&self) -> &Url {
        &self.cert_url
    }

    /// Path the certificate is written to.
    pub fn cert_path(&self) -> PathBuf {
        self.temp_root.join(CERT_DIR_NAME).join(CERT_FILE_NAME)
    }

    /// Downloads the certificate and adds it to the trust store.
    ///
    /// Returns the path of the installed file.
    pub async fn install(&self) -> Result<PathBuf, CertificateError> {
        let bytes = self.download().await?;
        let path = self.write_temp(&bytes).await?;

        tracing::info!("Installing proxy CA certificate from {:?}", path);
        self.trust_store.install(&path).await?;
        tracing::info!("Proxy CA certificate installed");

        Ok(path)
    }

    async fn download(&self) -> Result<Vec<u8>, CertificateError> {
        let response = self
            .client
            .get(self.cert_url.clone())
            .send()
            .await
            .map_err(|e| CertificateError::InvalidResponse(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            tracing::warn!(status = status.as_u16(), "Certificate download failed");
            return Err(CertificateError::DownloadFailed(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CertificateError::InvalidResponse(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn write_temp(&self, bytes: &[u8]) -> Result<PathBuf, CertificateError> {
        let dir = self.temp_root.join(CERT_DIR_NAME);
        if tokio::fs::try_exists(&dir).await? {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(CERT_FILE_NAME);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

/// Runs a command, mapping a non-zero exit to [`CertificateError::CommandFailed`].
async fn run_command(program: &str, args: &[&str]) -> Result<Output, CertificateError> {
    tracing::debug!(program, ?args, "Running trust store command");

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| {
            CertificateError::CommandFailed(format!("failed to run {}: {}", program, e))
        })?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(CertificateError::CommandFailed(combined_output(&output)))
    }
}

/// Trimmed stdout followed by trimmed stderr.
fn combined_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let message = [stdout.trim(), stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if message.is_empty() {
        format!("command exited with {}", output.status)
    } else {
        message
    }
}

// ============================================================================
// macOS Implementation
// ============================================================================

#[cfg(target_os = "macos")]
async fn install_system(path: &Path) -> Result<(), CertificateError> {
    let home = std::env::var("HOME")
        .map_err(|_| CertificateError::CommandFailed("HOME is not set".to_string()))?;
    let keychain = format!("{}/Library/Keychains/login.keychain-db", home);
    let cert = path.to_string_lossy();

    run_command(
        "security",
        &[
            "add-trusted-cert",
            "-d",
            "-r",
            "trustRoot",
            "-k",
            keychain.as_str(),
            &*cert,
        ],
    )
    .await?;
    Ok(())
}

// ============================================================================
// Linux Implementation
// ============================================================================

#[cfg(target_os = "linux")]
struct AnchorStore {
    dir: &'static str,
    refresh: &'static [&'static str],
}

#[cfg(target_os = "linux")]
const ANCHOR_STORES: &[AnchorStore] = &[
    // Debian/Ubuntu
    AnchorStore {
        dir: "/usr/local/share/ca-certificates",
        refresh: &["update-ca-certificates"],
    },
    // Fedora/RHEL
    AnchorStore {
        dir: "/etc/pki/ca-trust/source/anchors",
        refresh: &["update-ca-trust", "extract"],
    },
    // Arch
    AnchorStore {
        dir: "/etc/ca-certificates/trust-source/anchors",
        refresh: &["trust", "extract-compat"],
    },
];

/// Anchor directories only accept PEM, while the proxy may serve DER.
#[cfg(target_os = "linux")]
async fn install_system(path: &Path) -> Result<(), CertificateError> {
    // pkexec gives a graphical prompt, sudo a terminal one.
    let elevation =
        if std::env::var("DISPLAY").is_ok() || std::env::var("WAYLAND_DISPLAY").is_ok() {
            "pkexec"
        } else {
            "sudo"
        };

    let store = ANCHOR_STORES
        .iter()
        .find(|s| Path::new(s.dir).is_dir())
        .ok_or_else(|| {
            CertificateError::CommandFailed(
                "unknown Linux trust store; install the certificate manually".to_string(),
            )
        })?;

    let pem_path = path.with_extension("crt");
    let bytes = tokio::fs::read(path).await?;
    tokio::fs::write(&pem_path, to_pem(&bytes)?).await?;

    let cert = pem_path.to_string_lossy();
    let dest = format!("{}/devtool-proxy-ca.crt", store.dir);
    run_command(elevation, &["cp", &*cert, dest.as_str()]).await?;
    run_command(elevation, store.refresh).await?;
    Ok(())
}

/// PEM text for a certificate served either as PEM or as raw DER.
#[cfg(any(target_os = "linux", test))]
fn to_pem(bytes: &[u8]) -> Result<String, CertificateError> {
    if bytes.is_empty() {
        return Err(CertificateError::InvalidCertificate("empty body".to_string()));
    }

    let parsed = match pem::parse(bytes) {
        Ok(parsed) => parsed,
        Err(_) => pem::Pem::new("CERTIFICATE", bytes.to_vec()),
    };
    if parsed.tag() != "CERTIFICATE" {
        return Err(CertificateError::InvalidCertificate(format!(
            "unexpected PEM block {}",
            parsed.tag()
        )));
    }

    Ok(pem::encode(&parsed))
}

// ============================================================================
// Windows Implementation
// ============================================================================

#[cfg(windows)]
async fn install_system(path: &Path) -> Result<(), CertificateError> {
    let cert = path.to_string_lossy();
    run_command("certutil", &["-addstore", "-user", "Root", &*cert]).await?;
    Ok(())
}

#[cfg(not(any(target_os = "macos", target_os = "linux", windows)))]
async fn install_system(_path: &Path) -> Result<(), CertificateError> {
    Err(CertificateError::CommandFailed(
        "certificate installation is not supported on this platform".to_string(),
    ))
}
