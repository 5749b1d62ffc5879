//! Locator parsing for sync and merge endpoints

use crate::error::{Error, Result};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Key bytes left unescaped in `x-amz-copy-source`
const COPY_SOURCE_KEY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A bucket + key pair in the object store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// `bucket/key` with the key percent-encoded, as server-side copy expects
    pub fn copy_source(&self) -> String {
        format!(
            "{}/{}",
            self.bucket,
            utf8_percent_encode(&self.key, COPY_SOURCE_KEY)
        )
    }

    /// Append a relative key below this key, treating it as a prefix
    pub fn join(&self, relative: &str) -> Self {
        let key = if relative.is_empty() {
            self.key.clone()
        } else if self.key.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.key.trim_end_matches('/'), relative)
        };
        Self {
            bucket: self.bucket.clone(),
            key,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key.is_empty() {
            write!(f, "s3://{}", self.bucket)
        } else {
            write!(f, "s3://{}/{}", self.bucket, self.key)
        }
    }
}

/// Either a local filesystem path or an object-store location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// Local filesystem path
    Local(PathBuf),

    /// Bucket and key (or key prefix)
    Remote(ObjectRef),
}

impl Locator {
    /// Parse a location string
    ///
    /// `s3://bucket/key` is remote, `file://path` and bare paths are local.
    /// Any other scheme is rejected. Remote keys are percent-decoded, so a
    /// literal `%`, `?` or `#` in a key must be written encoded.
    pub fn parse(s: &str) -> Result<Self> {
        let Some((scheme, rest)) = s.split_once("://") else {
            if s.is_empty() {
                return Err(Error::invalid_locator(s, "empty location"));
            }
            return Ok(Locator::Local(PathBuf::from(s)));
        };

        match scheme.to_lowercase().as_str() {
            "s3" => Self::parse_s3(s).map(Locator::Remote),
            "file" => {
                if rest.is_empty() {
                    return Err(Error::invalid_locator(s, "empty path"));
                }
                Ok(Locator::Local(PathBuf::from(rest)))
            }
            other => Err(Error::invalid_locator(
                s,
                format!("unsupported scheme '{}'", other),
            )),
        }
    }

    fn parse_s3(s: &str) -> Result<ObjectRef> {
        let url = Url::parse(s).map_err(|e| Error::invalid_locator(s, e.to_string()))?;

        if url.query().is_some() || url.fragment().is_some() {
            return Err(Error::invalid_locator(
                s,
                "'?' and '#' in keys must be percent-encoded",
            ));
        }

        let bucket = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::invalid_locator(s, "missing bucket name"))?
            .to_string();

        let path = url.path();
        let key = percent_decode_str(path.strip_prefix('/').unwrap_or(path))
            .decode_utf8()
            .map_err(|e| Error::invalid_locator(s, format!("key is not UTF-8: {}", e)))?;

        Ok(ObjectRef::new(bucket, key.into_owned()))
    }

    /// Check if this location is local
    pub fn is_local(&self) -> bool {
        matches!(self, Locator::Local(_))
    }

    /// Check if this location is in the object store
    pub fn is_remote(&self) -> bool {
        !self.is_local()
    }

    pub fn as_remote(&self) -> Option<&ObjectRef> {
        match self {
            Locator::Remote(obj) => Some(obj),
            Locator::Local(_) => None,
        }
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Locator::Local(path) => Some(path),
            Locator::Remote(_) => None,
        }
    }

    /// Resolve a catalog key (forward-slash separated) below this locator
    pub fn join(&self, key: &str) -> Self {
        match self {
            Locator::Local(root) => {
                let mut path = root.clone();
                for component in key.split('/').filter(|c| !c.is_empty()) {
                    path.push(component);
                }
                Locator::Local(path)
            }
            Locator::Remote(obj) => Locator::Remote(obj.join(key)),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Local(path) => write!(f, "{}", path.display()),
            Locator::Remote(obj) => write!(f, "{}", obj),
        }
    }
}
