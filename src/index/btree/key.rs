/// Fixed-width index key of N bytes (N is 4, 8, 16, 32 or 64).
///
/// Keys compare lexicographically on their bytes; the integer
/// constructors encode big-endian so numeric order and byte order agree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut data = [0u8; N];
        let len = bytes.len().min(N);
        data[..len].copy_from_slice(&bytes[..len]);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }

    /// Encode an integer key, right-aligned big-endian
    pub fn from_u64(value: u64) -> Self {
        let mut data = [0u8; N];
        let be = value.to_be_bytes();
        if N >= 8 {
            data[N - 8..].copy_from_slice(&be);
        } else {
            data.copy_from_slice(&be[8 - N..]);
        }
        Self { data }
    }

    /// Decode a key written by `from_u64`
    pub fn to_u64(&self) -> u64 {
        let mut be = [0u8; 8];
        if N >= 8 {
            be.copy_from_slice(&self.data[N - 8..]);
        } else {
            be[8 - N..].copy_from_slice(&self.data);
        }
        u64::from_be_bytes(be)
    }
}

impl<const N: usize> std::fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GenericKey<{}>({})", N, self.to_u64())
    }
}
