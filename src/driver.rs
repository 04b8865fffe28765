use serde::Serialize;
use tracing::{info, warn};

use crate::app::{ProgressEvent, ProgressSink};
use crate::config::ConfigResolver;
use crate::error::AssetError;
use crate::fetch::{ExtractOutcome, Fetcher};
use crate::fs_util;
use crate::http::Transport;
use crate::store::DataDir;

const DRIVER_ARCHIVE: &str = "geckodriver_tarfile.tar.gz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    AlreadyInstalled,
    Installed,
    /// The archive was unpacked but did not contain the driver binary.
    UnpackFailed,
}

pub struct DriverInstaller<'a, T: Transport> {
    dir: &'a DataDir,
    transport: &'a T,
}

impl<'a, T: Transport> DriverInstaller<'a, T> {
    pub fn new(dir: &'a DataDir, transport: &'a T) -> Self {
        Self { dir, transport }
    }

    pub fn install(
        &self,
        resolver: &ConfigResolver,
        sink: &dyn ProgressSink,
    ) -> Result<DriverStatus, AssetError> {
        let binary = self.dir.driver_path();
        if self.dir.exists(&binary) {
            return Ok(DriverStatus::AlreadyInstalled);
        }

        let url = resolver.geckodriver_url()?;
        let driver_dir = self.dir.driver_dir();
        let archive = driver_dir.join(DRIVER_ARCHIVE);
        let outcome = Fetcher::new(self.transport).fetch_and_extract(
            &url,
            &archive,
            &driver_dir,
            &binary,
            sink,
        )?;

        match outcome {
            ExtractOutcome::AlreadyPresent => Ok(DriverStatus::AlreadyInstalled),
            ExtractOutcome::Extracted(_) => {
                fs_util::make_executable(binary.as_std_path())?;
                info!(path = %binary, "driver installed");
                sink.event(ProgressEvent::message("phase=Driver; download successful"));
                Ok(DriverStatus::Installed)
            }
            ExtractOutcome::MarkerMissing(kind) => {
                warn!(%url, %kind, "driver archive did not contain {}", binary);
                sink.event(ProgressEvent::message(
                    "phase=Driver; download and unpack failed",
                ));
                Ok(DriverStatus::UnpackFailed)
            }
        }
    }
}
