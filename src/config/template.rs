//! `validator.env` template generation

use std::fs;
use std::path::Path;

use crate::utils::error::{Error, Result};

/// Commented env file listing every setting the collector reads
pub fn env_template() -> &'static str {
    r#"# Collector node environment
# Copy to `validator.env` next to the binary or export the variables directly.
# Variables already present in the environment win over this file.

# Validator websocket endpoint. A JSON list picks one endpoint at random per run:
#   ORCFAX_VALIDATOR=["wss://a.example/ws/node", "wss://b.example/ws/node"]
ORCFAX_VALIDATOR=wss://<node-ws-endpoint>

# Optional PEM bundle of trusted roots (bundled Mozilla roots when unset)
# VALIDATOR_CA_BUNDLE=/etc/ssl/certs/ca-certificates.crt

# Node identity written by node-init, and the node signing key
NODE_IDENTITY_LOC=/tmp/.node-identity.json
NODE_SIGNING_KEY=/path/to/signing-key

# Price-fetch executable for centralized exchanges
GOFER=/path/to/gofer
# GOFER_TIMEOUT_SECS=60

# Decentralized exchanges via the CNT indexer. Leave these unset (or set
# CNT_ENABLED=false) to collect centralized exchanges only.
# CNT_ENABLED=true
CNT_DB_NAME=/path/to/cnt/database.db
OGMIOS_URL=ws://<ip-address>

# Startup stagger, inclusive bounds in seconds
# RANDOM_WAIT_MIN=1
# RANDOM_WAIT_MAX=15

# Per-message acknowledgment wait and connection open bound, in seconds
# ACK_TIMEOUT_SECS=10
# OPEN_TIMEOUT_SECS=120
"#
}

/// Write the template to `path`, refusing to clobber an existing file
pub fn write_env_template<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    if path.exists() {
        return Err(Error::ConfigError(format!("{} already exists", path.display())));
    }
    fs::write(path, env_template())
        .map_err(|e| Error::ConfigError(format!("Failed to write {}: {}", path.display(), e)))
}
