use crc32fast::Hasher;

#[inline]
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0);
    }

    #[test]
    fn test_crc32_stable() {
        let data = b"extent block";
        assert_ne!(crc32(data), 0);
        assert_eq!(crc32(data), crc32(data));
        assert_ne!(crc32(data), crc32(b"extent blocK"));
    }
}
