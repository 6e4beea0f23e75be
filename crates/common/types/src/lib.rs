pub mod block;
pub mod chain_level;
pub mod genesis;
pub mod listeners;
pub mod primitives;
pub mod receipt;
pub mod state;

/// Display helper for truncated root hashes (8 hex chars)
pub struct ShortRoot<'a>(pub &'a [u8; 32]);

impl std::fmt::Display for ShortRoot<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0[..4] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_root_prints_first_four_bytes() {
        let mut bytes = [0u8; 32];
        bytes[..4].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        bytes[4] = 0x11;
        assert_eq!(ShortRoot(&bytes).to_string(), "deadbeef");
    }
}
