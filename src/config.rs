// Device-side configuration.
//
// One plain struct with defaults matching the original handheld receiver:
// port 17491, images under the storage mount's `nds` directory, 16 KiB
// working buffers.

use std::path::PathBuf;

/// The UDP discovery and TCP transfer port.
pub const DEFAULT_PORT: u16 = 17491;

/// Working buffer capacity for one protocol frame (and one inflate burst).
pub const DEFAULT_CHUNK_CAPACITY: usize = 16 * 1024;

/// Source block size for delta-mode random access.
pub const DEFAULT_BLOCK_SIZE: usize = 16 * 1024;

/// Fixed temporary name for delta-mode reconstruction output.
pub const DEFAULT_TEMP_NAME: &str = "patch.tmp";

/// Remote path prefix rewritten to the local mount convention in the
/// trailing argument.
pub const REMOTE_ARG_PREFIX: &str = "sdmc:/3ds/";

/// Local prefix substituted for [`REMOTE_ARG_PREFIX`].
pub const LOCAL_ARG_PREFIX: &str = "sd:/";

/// Configuration for one receive operation.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Port for both the UDP discovery responder and the TCP listener.
    pub port: u16,
    /// Directory the received name is joined under (`sd:/nds` on device).
    pub mount_prefix: PathBuf,
    /// File name of the delta-mode temporary output, created under
    /// `mount_prefix`.
    pub temp_name: String,
    /// Maximum accepted frame payload length. A declared chunk length above
    /// this is a fatal framing violation.
    pub chunk_capacity: usize,
    /// Block size used by the source block cache in delta mode.
    pub block_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            mount_prefix: PathBuf::from("sd:/nds"),
            temp_name: DEFAULT_TEMP_NAME.to_string(),
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl DeviceConfig {
    /// Full path of the delta-mode temporary output file.
    pub fn temp_path(&self) -> PathBuf {
        self.mount_prefix.join(&self.temp_name)
    }
}
