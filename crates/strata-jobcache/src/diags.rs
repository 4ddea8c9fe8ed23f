//! Serialized-diagnostics container.
//!
//! Cached results always carry a serialized-diagnostics entry, whether or
//! not the user asked for one, so the action key stays independent of that
//! flag. The container is a small magic-tagged wrapper around the captured
//! diagnostic byte stream, which lets replay distinguish an empty capture
//! from an absent or foreign file.

use crate::error::{JobCacheError, Result};

const DIAGS_MAGIC: [u8; 8] = *b"STRADIAG";
const DIAGS_FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = DIAGS_MAGIC.len() + 4 + 8;

/// Wrap a captured diagnostics stream into its on-disk container form.
pub fn encode(diagnostics: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + diagnostics.len());
    bytes.extend_from_slice(&DIAGS_MAGIC);
    bytes.extend_from_slice(&DIAGS_FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&(diagnostics.len() as u64).to_le_bytes());
    bytes.extend_from_slice(diagnostics);
    bytes
}

/// Unwrap a container produced by [`encode`].
pub fn decode(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < HEADER_LEN {
        return Err(JobCacheError::MalformedDiagnostics {
            reason: "shorter than the container header",
        });
    }
    if bytes[..DIAGS_MAGIC.len()] != DIAGS_MAGIC {
        return Err(JobCacheError::MalformedDiagnostics { reason: "bad magic" });
    }
    let version = u32::from_le_bytes(
        bytes[DIAGS_MAGIC.len()..DIAGS_MAGIC.len() + 4]
            .try_into()
            .map_err(|_| JobCacheError::MalformedDiagnostics {
                reason: "truncated version",
            })?,
    );
    if version != DIAGS_FORMAT_VERSION {
        return Err(JobCacheError::MalformedDiagnostics {
            reason: "unsupported container version",
        });
    }
    let len = u64::from_le_bytes(
        bytes[DIAGS_MAGIC.len() + 4..HEADER_LEN]
            .try_into()
            .map_err(|_| JobCacheError::MalformedDiagnostics {
                reason: "truncated length",
            })?,
    );
    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != len {
        return Err(JobCacheError::MalformedDiagnostics {
            reason: "length does not match payload",
        });
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() -> Result<()> {
        let payload = b"warning: unused variable 'x'\n";
        assert_eq!(decode(&encode(payload))?, payload);
        Ok(())
    }

    #[test]
    fn empty_capture_is_distinguishable() -> Result<()> {
        let encoded = encode(b"");
        assert!(!encoded.is_empty());
        assert_eq!(decode(&encoded)?, b"");
        Ok(())
    }

    #[test]
    fn rejects_foreign_bytes() {
        assert!(decode(b"").is_err());
        assert!(decode(b"not a diagnostics container at all").is_err());

        let mut truncated = encode(b"payload");
        truncated.pop();
        assert!(decode(&truncated).is_err());
    }
}
