//! TOML-backed provider catalog.
//!
//! The catalog file lists registered provider modules as `[[provider]]`
//! tables:
//!
//! ```toml
//! [[provider]]
//! id = "52cb6aac-0112-4428-93b6-eb25e6b7a0e2"
//! version = 2
//! path = "${ND_LIBDIR}/libndv2_prov.so"
//! families = ["ipv4", "ipv6"]
//! ```
//!
//! `families` defaults to both families when omitted. A missing catalog file
//! means no providers are registered and is not an error; a file that fails
//! to parse is.

use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use nd_types::{AddressFamily, NdError, NdResult, ProviderId};

use crate::api::ProviderGeneration;
use crate::catalog::{CatalogEntry, ProviderCatalog};

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "provider")]
    providers: Vec<ProviderRow>,
}

#[derive(Debug, Deserialize)]
struct ProviderRow {
    id: String,
    version: u32,
    path: String,
    #[serde(default = "default_families")]
    families: Vec<String>,
}

fn default_families() -> Vec<String> {
    vec!["ipv4".to_string(), "ipv6".to_string()]
}

impl ProviderRow {
    fn generation(&self) -> Option<ProviderGeneration> {
        match self.version {
            1 => Some(ProviderGeneration::V1),
            2 => Some(ProviderGeneration::V2),
            _ => None,
        }
    }
}

/// Catalog read from a TOML file on every query, so edits are picked up
/// without restarting the process.
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> FileCatalog {
        FileCatalog { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_rows(&self) -> NdResult<Vec<ProviderRow>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("Provider catalog {} not present", self.path.display());
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };
        let file: CatalogFile = toml::from_str(&text).map_err(|err| {
            NdError::unsuccessful(format!(
                "malformed provider catalog {}: {}",
                self.path.display(),
                err
            ))
        })?;
        Ok(file.providers)
    }
}

impl ProviderCatalog for FileCatalog {
    fn entries(&self) -> NdResult<Vec<CatalogEntry>> {
        let mut entries = Vec::new();
        for row in self.read_rows()? {
            let id: ProviderId = match row.id.parse() {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!("Skipping catalog row with bad id {:?}: {}", row.id, err);
                    continue;
                }
            };
            let generation = match row.generation() {
                Some(generation) => generation,
                None => {
                    tracing::warn!("Skipping provider {} with unknown version {}", id, row.version);
                    continue;
                }
            };
            for family in &row.families {
                match family.parse::<AddressFamily>() {
                    Ok(family) => entries.push(CatalogEntry::networkdirect(id, generation, family)),
                    Err(err) => {
                        tracing::warn!("Skipping family {:?} of provider {}: {}", family, id, err);
                    }
                }
            }
        }
        Ok(entries)
    }

    fn provider_path(&self, id: &ProviderId) -> NdResult<String> {
        for row in self.read_rows()? {
            if row.id.parse::<ProviderId>().map(|row_id| row_id == *id).unwrap_or(false) {
                return Ok(row.path);
            }
        }
        Err(NdError::unsuccessful(format!("provider {} is not in the catalog", id)))
    }
}
