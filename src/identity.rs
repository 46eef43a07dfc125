//! Node identity, read once per run before any fetching starts.

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::utils::error::{Error, Result};
use crate::utils::{read_json_file, JsonFileError};

/// Identity of this collector node as written by node initialisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub node_id: String,
    /// Any further node metadata, forwarded untouched inside each envelope
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl Identity {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self { node_id: node_id.into(), metadata: Map::new() }
    }
}

/// Read the node identity file. Absence and malformed content are both fatal.
pub fn read_identity<P: AsRef<Path>>(path: P) -> Result<Identity> {
    let path = path.as_ref();
    debug!("reading identity: {}", path.display());
    let identity: Identity = read_json_file(path).map_err(|e| match e {
        | JsonFileError::NotFound(p) => {
            Error::Identity(format!("node identity not found: {}", p.display()))
        }
        | JsonFileError::Malformed(_, err) => Error::Identity(format!(
            "problem parsing JSON consider re-running node-init: {}",
            err
        )),
        | other => Error::Identity(other.to_string()),
    })?;
    if identity.node_id.trim().is_empty() {
        return Err(Error::Identity("node_id is empty".to_string()));
    }
    debug!("node identity successfully parsed");
    Ok(identity)
}
