//! JSON snapshots of a [`DigestIndex`].
//!
//! A snapshot holds only the forward mapping, as an object of objects:
//!
//! ```json
//! { "repository": { "tag": "sha256:<hex>" } }
//! ```
//!
//! The reverse mapping is rebuilt on load.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use log::debug;
use serde_json::{Map, Value};

use crate::{
    digest::ContentDigest,
    error::{FormatError, Result},
    index::DigestIndex,
};

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn as_object<'a>(
    value: &'a Value,
    location: impl FnOnce() -> String,
) -> std::result::Result<&'a Map<String, Value>, FormatError> {
    value.as_object().ok_or_else(|| FormatError::Snapshot {
        location: location(),
        expected: "an object",
        found: kind(value),
    })
}

pub fn to_json_value(index: &DigestIndex) -> Value {
    let repos = index
        .raw_tag_digests()
        .iter()
        .map(|(repo, tags)| {
            let tags = tags
                .iter()
                .map(|(tag, digest)| (tag.clone(), Value::String(digest.as_sha256())))
                .collect();
            (repo.clone(), Value::Object(tags))
        })
        .collect();
    Value::Object(repos)
}

pub fn from_json_value(value: &Value) -> std::result::Result<DigestIndex, FormatError> {
    let mut index = DigestIndex::new();
    for (repo, tags) in as_object(value, || "top level".to_string())? {
        for (tag, digest) in as_object(tags, || format!("repository {repo:?}"))? {
            let Value::String(digest) = digest else {
                return Err(FormatError::Snapshot {
                    location: format!("{repo}:{tag}"),
                    expected: "a digest string",
                    found: kind(digest),
                });
            };
            index.add_image(repo, tag, ContentDigest::from_sha256(digest)?);
        }
    }
    Ok(index)
}

pub fn loads(data: &str) -> std::result::Result<DigestIndex, FormatError> {
    let value: Value = serde_json::from_str(data)?;
    from_json_value(&value)
}

pub fn dumps(index: &DigestIndex) -> String {
    to_json_value(index).to_string()
}

pub fn from_reader(reader: impl Read) -> Result<DigestIndex> {
    let value: Value = serde_json::from_reader(reader).map_err(FormatError::from)?;
    Ok(from_json_value(&value)?)
}

pub fn to_writer(index: &DigestIndex, mut writer: impl Write) -> Result<()> {
    serde_json::to_writer(&mut writer, &to_json_value(index)).map_err(FormatError::from)?;
    writer.flush()?;
    Ok(())
}

/// Reads a snapshot file.
pub fn load(path: impl AsRef<Path>) -> Result<DigestIndex> {
    let path = path.as_ref();
    debug!("Loading snapshot from {}", path.display());
    from_reader(BufReader::new(File::open(path)?))
}

/// Writes a snapshot file, replacing an existing one only once the new contents are complete.
pub fn save(index: &DigestIndex, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    debug!("Writing snapshot to {}", path.display());
    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    to_writer(index, BufWriter::new(&mut file))?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}
