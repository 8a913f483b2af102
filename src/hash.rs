use std::{
    fs::File,
    hash::Hasher,
    io::{BufReader, Read},
    path::Path,
};

use hex::encode;
use indicatif::ProgressBar;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::error::OrphanSweepError;

/// Files are read in fixed-size chunks so memory stays bounded
/// regardless of file size.
const CHUNK_SIZE: usize = 1024 * 1024;

/// Content hash algorithm. Xxh64 is used for all new hashes; Md5 digests
/// remain from before the upgrade and are recognized by length alone.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Xxh64,
    Md5,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Xxh64 => "xxh64",
            HashAlgorithm::Md5 => "md5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "xxh64" => Some(HashAlgorithm::Xxh64),
            "md5" => Some(HashAlgorithm::Md5),
            _ => None,
        }
    }

    /// Expected hex digest length for this algorithm.
    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Xxh64 => 16,
            HashAlgorithm::Md5 => 32,
        }
    }

    /// Infer the algorithm from a digest's length. Digest lengths are
    /// disjoint between the two algorithms, so this is deterministic.
    pub fn infer(digest: &str) -> Result<Self, OrphanSweepError> {
        match digest.len() {
            16 => Ok(HashAlgorithm::Xxh64),
            32 => Ok(HashAlgorithm::Md5),
            len => Err(OrphanSweepError::UnknownHashLength(len)),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct Hash;

impl Hash {
    /// Compute the content digest of a file with the given algorithm.
    ///
    /// I/O failures (permission denied, file vanished mid-read) propagate
    /// as `IoError`; callers skip the file rather than aborting the scan.
    pub fn compute(
        path: &Path,
        algorithm: HashAlgorithm,
        hash_prog: Option<&ProgressBar>,
    ) -> Result<String, OrphanSweepError> {
        let f = File::open(path)?;
        let len = f.metadata()?.len();

        if let Some(prog) = hash_prog {
            prog.set_length(len);
        }

        let mut reader = BufReader::new(f);
        let mut buffer = vec![0u8; CHUNK_SIZE];

        let digest = match algorithm {
            HashAlgorithm::Xxh64 => {
                let mut hasher = XxHash64::with_seed(0);
                loop {
                    let bytes_read = reader.read(&mut buffer)?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.write(&buffer[..bytes_read]);
                    if let Some(prog) = hash_prog {
                        prog.inc(bytes_read as u64);
                    }
                }
                format!("{:016x}", hasher.finish())
            }
            HashAlgorithm::Md5 => {
                let mut hasher = Md5::new();
                loop {
                    let bytes_read = reader.read(&mut buffer)?;
                    if bytes_read == 0 {
                        break;
                    }
                    hasher.update(&buffer[..bytes_read]);
                    if let Some(prog) = hash_prog {
                        prog.inc(bytes_read as u64);
                    }
                }
                encode(hasher.finalize())
            }
        };

        Self::validate(&digest, algorithm)?;
        Ok(digest)
    }

    /// Reject digests whose length does not match their claimed algorithm.
    /// Cache rows failing this check are never trusted.
    pub fn validate(digest: &str, algorithm: HashAlgorithm) -> Result<(), OrphanSweepError> {
        let expected = algorithm.digest_len();
        if digest.len() != expected {
            return Err(OrphanSweepError::DigestMismatch {
                algorithm: algorithm.as_str(),
                got: digest.len(),
                expected,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as IoWrite;
    use tempfile::NamedTempFile;

    #[test]
    fn test_infer_algorithm_from_length() {
        assert_eq!(
            HashAlgorithm::infer("0123456789abcdef").unwrap(),
            HashAlgorithm::Xxh64
        );
        assert_eq!(
            HashAlgorithm::infer("900150983cd24fb0d6963f7d28e17f72").unwrap(),
            HashAlgorithm::Md5
        );
        assert!(matches!(
            HashAlgorithm::infer("abcd"),
            Err(OrphanSweepError::UnknownHashLength(4))
        ));
        assert!(HashAlgorithm::infer("").is_err());
    }

    #[test]
    fn test_validate_digest_lengths() {
        assert!(Hash::validate("0123456789abcdef", HashAlgorithm::Xxh64).is_ok());
        assert!(Hash::validate("0123456789abcdef", HashAlgorithm::Md5).is_err());
        assert!(Hash::validate("900150983cd24fb0d6963f7d28e17f72", HashAlgorithm::Md5).is_ok());
    }

    #[test]
    fn test_md5_known_digest() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"abc").unwrap();
        let digest = Hash::compute(f.path(), HashAlgorithm::Md5, None).unwrap();
        assert_eq!(digest, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_xxh64_digest_shape_and_stability() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"some torrent payload").unwrap();
        let first = Hash::compute(f.path(), HashAlgorithm::Xxh64, None).unwrap();
        let second = Hash::compute(f.path(), HashAlgorithm::Xxh64, None).unwrap();
        assert_eq!(first.len(), 16);
        assert_eq!(first, second);

        let mut g = NamedTempFile::new().unwrap();
        g.write_all(b"different payload").unwrap();
        let other = Hash::compute(g.path(), HashAlgorithm::Xxh64, None).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_compute_missing_file_is_io_error() {
        let result = Hash::compute(
            Path::new("/nonexistent/orphansweep-test"),
            HashAlgorithm::Xxh64,
            None,
        );
        assert!(matches!(result, Err(OrphanSweepError::IoError(_))));
    }
}
