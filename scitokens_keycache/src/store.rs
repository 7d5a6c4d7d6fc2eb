use std::{
    fmt,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use aliri::jwt::IssuerRef;
use aliri_base64::Base64Url;
use ring::digest;
use tempfile::NamedTempFile;

use crate::{KeyCacheEntry, KeyCacheError};

/// Durable storage for key cache entries
///
/// Implementations must be safe to share between threads. Readers must never
/// observe a partially written entry.
pub trait KeyStore: fmt::Debug + Send + Sync {
    /// Loads the entry for `issuer`, if one has been stored
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be read or the stored entry
    /// is corrupt.
    fn load(&self, issuer: &IssuerRef) -> Result<Option<KeyCacheEntry>, KeyCacheError>;

    /// Stores `entry`, replacing any previous entry for the same issuer
    ///
    /// # Errors
    ///
    /// Returns an error if the store could not be written.
    fn store(&self, entry: &KeyCacheEntry) -> Result<(), KeyCacheError>;
}

/// A key store that keeps one JSON file per issuer in a directory
///
/// File names are derived from a SHA-256 digest of the issuer, so arbitrary
/// issuer URLs map onto safe file names. Writes go to a temporary file in
/// the same directory which is then renamed into place.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Constructs a store rooted at `dir`
    ///
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Constructs a store in the user's cache directory
    ///
    /// This is `$XDG_CACHE_HOME/scitokens/jwks` on Linux, falling back to
    /// `~/.cache/scitokens/jwks` when no cache directory is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if neither a cache directory nor a home directory
    /// can be determined.
    pub fn user_default() -> Result<Self, KeyCacheError> {
        let base = dirs::cache_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
            .ok_or_else(|| {
                KeyCacheError::io(
                    "~/.cache",
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        "could not determine a cache directory",
                    ),
                )
            })?;

        Ok(Self::new(base.join("scitokens").join("jwks")))
    }

    /// The directory holding the cache files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, issuer: &IssuerRef) -> PathBuf {
        let hash = digest::digest(&digest::SHA256, issuer.as_str().as_bytes());
        let name = Base64Url::from_raw(hash.as_ref().to_vec());
        self.dir.join(format!("{}.json", name))
    }
}

impl KeyStore for FileStore {
    fn load(&self, issuer: &IssuerRef) -> Result<Option<KeyCacheEntry>, KeyCacheError> {
        let path = self.path_for(issuer);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(KeyCacheError::io(path, err)),
        };

        let entry: KeyCacheEntry = serde_json::from_str(&contents)
            .map_err(|source| KeyCacheError::CorruptEntry {
                path: path.clone(),
                source,
            })?;

        if entry.issuer() != issuer {
            tracing::warn!(
                path = %path.display(),
                stored.issuer = %entry.issuer(),
                "ignoring key cache file belonging to another issuer"
            );
            return Ok(None);
        }

        tracing::trace!(path = %path.display(), "loaded key cache entry");
        Ok(Some(entry))
    }

    fn store(&self, entry: &KeyCacheEntry) -> Result<(), KeyCacheError> {
        fs::create_dir_all(&self.dir).map_err(|err| KeyCacheError::io(&self.dir, err))?;

        let path = self.path_for(entry.issuer());
        let data = serde_json::to_vec_pretty(entry).map_err(|source| {
            KeyCacheError::CorruptEntry {
                path: path.clone(),
                source,
            }
        })?;

        let mut file =
            NamedTempFile::new_in(&self.dir).map_err(|err| KeyCacheError::io(&self.dir, err))?;
        file.write_all(&data)
            .and_then(|()| file.as_file().sync_all())
            .map_err(|err| KeyCacheError::io(file.path(), err))?;
        file.persist(&path)
            .map_err(|err| KeyCacheError::io(&path, err.error))?;

        tracing::trace!(path = %path.display(), "stored key cache entry");
        Ok(())
    }
}
