//! Finding the address of a function to intercept.
//!
//! Callers only learn "found at this address" or "not found". How the
//! address is obtained (an export lookup, a byte-pattern scan over a
//! module image) stays behind [`Locate`].

/// Locates one function in the current process.
pub trait Locate {
    fn locate(&self) -> Option<usize>;
}

impl<F: Fn() -> Option<usize>> Locate for F {
    fn locate(&self) -> Option<usize> {
        self()
    }
}

/// Returns the offset of the first match of `pattern` in `haystack`.
///
/// `mask` has one character per pattern byte: `x` must match exactly,
/// `?` matches anything. A mask shorter than the pattern only covers
/// its own length.
pub fn find_pattern(haystack: &[u8], pattern: &[u8], mask: &str) -> Option<usize> {
    let mask = mask.as_bytes();
    let len = pattern.len().min(mask.len());
    if len == 0 || haystack.len() < len {
        return None;
    }
    haystack.windows(len).position(|window| {
        window
            .iter()
            .zip(&pattern[..len])
            .zip(&mask[..len])
            .all(|((byte, expected), m)| *m == b'?' || byte == expected)
    })
}

/// Scans a memory region for a byte pattern.
pub struct PatternLocator<R> {
    region: R,
    pattern: Vec<u8>,
    mask: String,
}

/// Readable memory to scan, usually a loaded module's image.
pub trait ScanRegion {
    /// Base address of the region.
    fn base(&self) -> usize;
    fn bytes(&self) -> Option<&[u8]>;
}

impl<R: ScanRegion> PatternLocator<R> {
    pub fn new(region: R, pattern: &[u8], mask: &str) -> Self {
        Self {
            region,
            pattern: pattern.to_vec(),
            mask: mask.to_string(),
        }
    }
}

impl<R: ScanRegion> Locate for PatternLocator<R> {
    fn locate(&self) -> Option<usize> {
        let bytes = self.region.bytes()?;
        let offset = find_pattern(bytes, &self.pattern, &self.mask);
        if offset.is_none() {
            tracing::warn!("Byte pattern not found ({} bytes scanned)", bytes.len());
        }
        offset.map(|o| self.region.base() + o)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Buffer(Vec<u8>);

    impl ScanRegion for Buffer {
        fn base(&self) -> usize {
            0x1000
        }

        fn bytes(&self) -> Option<&[u8]> {
            Some(&self.0)
        }
    }

    #[test]
    fn exact_pattern_is_found() {
        // Act
        let offset = find_pattern(&[0x90, 0x48, 0x8B, 0x05, 0xC3], &[0x48, 0x8B], "xx");

        // Assert
        assert_eq!(offset, Some(1));
    }

    #[test]
    fn wildcards_match_any_byte() {
        // Arrange
        let haystack = [0x00, 0xE8, 0x11, 0x22, 0x33, 0x44, 0xC3];

        // Act
        let offset = find_pattern(&haystack, &[0xE8, 0, 0, 0, 0, 0xC3], "x????x");

        // Assert
        assert_eq!(offset, Some(1));
    }

    #[test]
    fn missing_pattern_is_none() {
        // Act / Assert
        assert_eq!(find_pattern(&[1, 2, 3], &[4], "x"), None);
        assert_eq!(find_pattern(&[1, 2], &[1, 2, 3], "xxx"), None);
        assert_eq!(find_pattern(&[1, 2], &[], ""), None);
    }

    #[test]
    fn pattern_locator_adds_region_base() {
        // Arrange
        let locator = PatternLocator::new(Buffer(vec![0, 0, 0xAB, 0xCD]), &[0xAB, 0xCD], "xx");

        // Act / Assert
        assert_eq!(locator.locate(), Some(0x1002));
    }

    #[test]
    fn closures_are_locators() {
        // Arrange
        let missing = || None;

        // Act / Assert
        assert_eq!(missing.locate(), None);
    }
}
