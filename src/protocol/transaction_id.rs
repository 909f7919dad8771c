use std::fmt;

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;

/// Opaque transaction identifier used to match queries with their replies.
///
/// Transaction ids are carried *in-band* in the `t` key of every message.
/// Equality is byte-exact; the value is never interpreted as text. `Display`
/// renders lowercase hex for logging.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(Bytes);

impl TransactionId {
    // ---

    /// Borrow the raw id bytes.
    pub fn as_bytes(&self) -> &[u8] {
        // ---
        &self.0
    }

    /// Number of bytes in the id.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for a zero-length id.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hexadecimal rendering of the id.
    pub fn to_hex(&self) -> String {
        // ---
        self.to_string()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionId({self})")
    }
}

impl From<Bytes> for TransactionId {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for TransactionId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<&[u8]> for TransactionId {
    fn from(bytes: &[u8]) -> Self {
        Self(Bytes::copy_from_slice(bytes))
    }
}

impl<const N: usize> From<[u8; N]> for TransactionId {
    fn from(bytes: [u8; N]) -> Self {
        Self(Bytes::copy_from_slice(&bytes))
    }
}

impl AsRef<[u8]> for TransactionId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Issues fixed-width transaction ids from a wrapping counter.
///
/// The counter starts at a random value drawn from the OS CSPRNG and is
/// incremented as an unsigned big-endian integer after every issue. Once every
/// byte is `0xff` the next value is all zeroes. Ids therefore repeat only after
/// `2^(8 * width)` issues; nothing here checks for collisions with ids still in
/// flight, so the width has to be chosen for the expected number of
/// outstanding queries.
#[derive(Debug, Clone)]
pub struct TransactionIdGenerator {
    // ---
    next: Vec<u8>,
}

impl TransactionIdGenerator {
    // ---

    /// Create a generator of `width` bytes with a random starting point.
    ///
    /// `width` must be non-zero; [`KrpcConfig::validate`](crate::KrpcConfig::validate)
    /// enforces this for instances built through [`Krpc`](crate::Krpc).
    pub fn new(width: usize) -> Self {
        // ---
        let mut next = vec![0u8; width];
        OsRng.fill_bytes(&mut next);
        Self { next }
    }

    /// Create a generator that starts at `seed`.
    ///
    /// The width is the length of `seed`.
    pub fn with_seed(seed: impl Into<Vec<u8>>) -> Self {
        Self { next: seed.into() }
    }

    /// Width of the issued ids in bytes.
    pub fn width(&self) -> usize {
        self.next.len()
    }

    /// Return the current counter value and advance the counter.
    pub fn issue(&mut self) -> TransactionId {
        // ---
        let id = TransactionId::from(self.next.as_slice());

        // Big-endian increment; a carry out of the most significant byte
        // leaves every byte at zero.
        for byte in self.next.iter_mut().rev() {
            if *byte != 0xff {
                *byte += 1;
                break;
            }
            *byte = 0x00;
        }

        id
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_issue_returns_snapshot_then_increments() {
        // ---
        let mut ids = TransactionIdGenerator::with_seed(vec![0x12, 0x34]);

        assert_eq!(ids.issue().as_bytes(), &[0x12, 0x34]);
        assert_eq!(ids.issue().as_bytes(), &[0x12, 0x35]);
    }

    #[test]
    fn test_carry_propagates() {
        // ---
        let mut ids = TransactionIdGenerator::with_seed(vec![0x00, 0xff]);

        ids.issue();
        assert_eq!(ids.issue().as_bytes(), &[0x01, 0x00]);
    }

    #[test]
    fn test_wraparound_single_byte() {
        // ---
        let mut ids = TransactionIdGenerator::with_seed(vec![0xff]);

        assert_eq!(ids.issue().as_bytes(), &[0xff]);
        assert_eq!(ids.issue().as_bytes(), &[0x00]);
    }

    #[test]
    fn test_wraparound_multi_byte() {
        // ---
        let mut ids = TransactionIdGenerator::with_seed(vec![0xff, 0xff, 0xff]);

        ids.issue();
        assert_eq!(ids.issue().as_bytes(), &[0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_unique_within_period() {
        // ---
        let mut ids = TransactionIdGenerator::new(1);
        let seen: HashSet<TransactionId> = (0..256).map(|_| ids.issue()).collect();

        assert_eq!(seen.len(), 256);

        // The 257th id starts the next period.
        let again = ids.issue();
        assert!(seen.contains(&again));
    }

    #[test]
    fn test_random_seed_has_requested_width() {
        // ---
        let mut ids = TransactionIdGenerator::new(4);
        assert_eq!(ids.width(), 4);
        assert_eq!(ids.issue().len(), 4);
    }

    #[test]
    fn test_display_is_hex() {
        // ---
        let id = TransactionId::from([0x1a, 0x2b, 0x00]);
        assert_eq!(id.to_string(), "1a2b00");
        assert_eq!(format!("{id:?}"), "TransactionId(1a2b00)");
    }
}
