//! Utility functions.

use std::fmt::Write as _;
use std::{fs::File, io, path::Path};

use sha2::{Digest, Sha256};

/// Streaming SHA-256 digest of a file's bytes, as lowercase hex.
///
/// This is the deduplication key for the library: identical bytes hash
/// identically no matter where the file lives.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
#[allow(clippy::missing_panics_doc)]
#[inline]
pub fn file_hash(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut file = File::open(path)?;
    io::copy(&mut file, &mut hasher)?;

    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        write!(hex, "{byte:02x}").expect("writing to a String cannot fail");
    }
    Ok(hex)
}
