//! Asset provisioning: ensure required binary assets exist locally
//!
//! Downloads are reported tick by tick so the host UI can render a
//! determinate or indeterminate indicator; an asset already on disk
//! resolves immediately with no progress events at all.

use crate::engines::AssetStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A binary asset required before an engine can initialize.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetSpec {
    pub id: String,
    pub remote_url: String,
    pub local_path: PathBuf,
    /// Fallback for progress display when the server does not report a
    /// content length.
    pub expected_size_hint: Option<u64>,
}

impl AssetSpec {
    pub fn new(
        id: impl Into<String>,
        remote_url: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            remote_url: remote_url.into(),
            local_path: local_path.into(),
            expected_size_hint: None,
        }
    }

    pub fn with_size_hint(mut self, bytes: u64) -> Self {
        self.expected_size_hint = Some(bytes);
        self
    }
}

/// One progress tick of a running download.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisioningProgress {
    pub asset_id: String,
    pub bytes_written: u64,
    /// `None` means the server did not report a total; the indicator falls
    /// back to indeterminate.
    pub total_bytes: Option<u64>,
}

impl ProvisioningProgress {
    pub fn starting(spec: &AssetSpec) -> Self {
        Self {
            asset_id: spec.id.clone(),
            bytes_written: 0,
            total_bytes: spec.expected_size_hint,
        }
    }

    pub fn fraction(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => Some(self.bytes_written as f64 / total as f64),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct AssetProvisioner {
    store: Arc<dyn AssetStore>,
}

impl AssetProvisioner {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    pub fn is_present(&self, spec: &AssetSpec) -> bool {
        self.store.exists(&spec.local_path)
    }

    /// Idempotent: resolves immediately if the asset is already on disk.
    ///
    /// On failure nothing written by this attempt is ever visible at
    /// `local_path`; resumption of an interrupted transfer is the store's
    /// concern, behind its staging files.
    pub async fn ensure<F>(&self, spec: &AssetSpec, mut on_progress: F) -> Result<()>
    where
        F: FnMut(ProvisioningProgress) + Send,
    {
        if self.store.exists(&spec.local_path) {
            debug!(asset = %spec.id, "asset already present");
            return Ok(());
        }

        info!(asset = %spec.id, url = %spec.remote_url, "downloading asset");

        let mut report = |written: u64, total: Option<u64>| {
            on_progress(ProvisioningProgress {
                asset_id: spec.id.clone(),
                bytes_written: written,
                total_bytes: total.or(spec.expected_size_hint),
            });
        };

        match self
            .store
            .download(&spec.remote_url, &spec.local_path, &mut report)
            .await
        {
            Ok(()) => {
                info!(asset = %spec.id, "asset provisioned");
                Ok(())
            }
            Err(e) => {
                warn!(asset = %spec.id, error = %e, "provisioning failed");
                Err(e)
            }
        }
    }
}
