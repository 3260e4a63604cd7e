//! Trust anchor provisioning
//!
//! The broker's CA certificate is compiled in and written to a fresh file
//! per connection attempt so the TLS layer can load it from a path.
//!
//! Files are never removed by this module. On the default `/dev/shm`
//! location they live until reboot or until the operator cleans them up.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::debug;

/// CA certificate of the OneNET MQTTS endpoint
pub const ONENET_CA_CERT: &str = "-----BEGIN CERTIFICATE-----
MIIDOzCCAiOgAwIBAgIJAPCCNfxANtVEMA0GCSqGSIb3DQEBCwUAMDQxCzAJBgNV
BAYTAkNOMQ4wDAYDVQQKDAVDTUlPVDEVMBMGA1UEAwwMT25lTkVUIE1RVFRTMB4X
DTE5MDUyOTAxMDkyOFoXDTQ5MDUyMTAxMDkyOFowNDELMAkGA1UEBhMCQ04xDjAM
BgNVBAoMBUNNSU9UMRUwEwYDVQQDDAxPbmVORVQgTVFUVFMwggEiMA0GCSqGSIb3
DQEBAQUAA4IBDwAwggEKAoIBAQC/VvJ6lGWfy9PKdXKBdzY83OERB35AJhu+9jkx
5d4SOtZScTe93Xw9TSVRKrFwu5muGgPusyAlbQnFlZoTJBZY/745MG6aeli6plpR
r93G6qVN5VLoXAkvqKslLZlj6wXy70/e0GC0oMFzqSP0AY74icANk8dUFB2Q8usS
UseRafNBcYfqACzF/Wa+Fu/upBGwtl7wDLYZdCm3KNjZZZstvVB5DWGnqNX9HkTl
U9NBMS/7yph3XYU3mJqUZxryb8pHLVHazarNRppx1aoNroi+5/t3Fx/gEa6a5PoP
ouH35DbykmzvVE67GUGpAfZZtEFE1e0E/6IB84PE00llvy3pAgMBAAGjUDBOMB0G
A1UdDgQWBBTTi/q1F2iabqlS7yEoX1rbOsz5GDAfBgNVHSMEGDAWgBTTi/q1F2ia
bqlS7yEoX1rbOsz5GDAMBgNVHRMEBTADAQH/MA0GCSqGSIb3DQEBCwUAA4IBAQAL
aqJ2FgcKLBBHJ8VeNSuGV2cxVYH1JIaHnzL6SlE5q7MYVg+Ofbs2PRlTiWGMazC7
q5RKVj9zj0z/8i3ScWrWXFmyp85ZHfuo/DeK6HcbEXJEOfPDvyMPuhVBTzuBIRJb
41M27NdIVCdxP6562n6Vp0gbE8kN10q+ksw8YBoLFP0D1da7D5WnSV+nwEIP+F4a
3ZX80bNt6tRj9XY0gM68mI60WXrF/qYL+NUz+D3Lw9bgDSXxpSN8JGYBR85BxBvR
NNAhsJJ3yoAvbPUQ4m8J/CoVKKgcWymS1pvEHmF47pgzbbjm5bdthlIx+swdiGFa
WzdhzTYwVkxBaU+xf/2w
-----END CERTIFICATE-----
";

/// Default directory for materialized CA files (process-local tmpfs)
pub const DEFAULT_CA_DIR: &str = "/dev/shm";

const CA_FILE_PREFIX: &str = "onenet_ca_";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Trust anchor materialization failure
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to create CA file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Writes PEM blobs to uniquely named files
#[derive(Debug, Clone)]
pub struct CaProvisioner {
    dir: PathBuf,
}

impl Default for CaProvisioner {
    fn default() -> Self {
        Self::new(DEFAULT_CA_DIR)
    }
}

impl CaProvisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `pem` to a new file and return its path
    pub fn materialize(&self, pem: &str) -> Result<PathBuf, ProvisionError> {
        let path = self.dir.join(unique_file_name());

        let write = || -> io::Result<()> {
            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
            file.write_all(pem.as_bytes())?;
            file.sync_all()
        };
        write().map_err(|source| ProvisionError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(path = %path.display(), "materialized CA file");
        Ok(path)
    }
}

/// `onenet_ca_{millis}_{pid}_{seq}`
fn unique_file_name() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{CA_FILE_PREFIX}{millis}_{}_{seq}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_materialize_writes_content() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = CaProvisioner::new(dir.path());

        let path = provisioner.materialize(ONENET_CA_CERT).unwrap();

        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), ONENET_CA_CERT);
    }

    #[test]
    fn test_materialize_names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = CaProvisioner::new(dir.path());

        let first = provisioner.materialize("a").unwrap();
        let second = provisioner.materialize("b").unwrap();

        assert_ne!(first, second);
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("onenet_ca_"));
    }

    #[test]
    fn test_materialize_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = CaProvisioner::new(dir.path().join("does-not-exist"));

        let result = provisioner.materialize(ONENET_CA_CERT);
        assert!(matches!(result, Err(ProvisionError::Io { .. })));
    }

    #[test]
    fn test_compiled_in_anchor_is_pem() {
        assert!(ONENET_CA_CERT.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(ONENET_CA_CERT.trim_end().ends_with("-----END CERTIFICATE-----"));
    }
}
