use crc::{Crc, CRC_32_ISO_HDLC};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 of `hostname` followed by `base_name`.
///
/// Stable for a given host and relay name, so a restarted Primary announces
/// the same id.
pub fn derive_unique_id(hostname: &str, base_name: &str) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(hostname.as_bytes());
    digest.update(base_name.as_bytes());
    digest.finalize()
}

/// The local host name, or an empty string if it cannot be read.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        tracing::warn!(error = %std::io::Error::last_os_error(), "gethostname failed");
        return String::new();
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

/// The id this host announces for `base_name`.
pub fn local_unique_id(base_name: &str) -> u32 {
    derive_unique_id(&hostname(), base_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_crc32_of_concatenation() {
        // CRC-32/ISO-HDLC check value for "123456789".
        assert_eq!(derive_unique_id("12345", "6789"), 0xCBF4_3926);
    }

    #[test]
    fn differs_by_name() {
        assert_ne!(derive_unique_id("host", "a"), derive_unique_id("host", "b"));
        assert_eq!(local_unique_id("relay"), local_unique_id("relay"));
    }
}
