//! `REG_MULTI_SZ`-style string lists used by the filter driver protocol:
//! UTF-16 strings, each NUL-terminated, with one extra NUL at the end.

/// Splits a NUL-separated UTF-16 buffer into strings.
///
/// Decoding stops at the first empty string (the list terminator), so
/// trailing garbage after the double NUL is ignored.
pub fn decode(buffer: &[u16]) -> Vec<String> {
    buffer
        .split(|&ch| ch == 0)
        .take_while(|s| !s.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

/// Joins strings into a NUL-separated, double-NUL-terminated buffer.
///
/// Empty entries are dropped since they would terminate the list early.
pub fn encode<S: AsRef<str>>(list: &[S]) -> Vec<u16> {
    let mut buffer: Vec<u16> = list
        .iter()
        .map(AsRef::as_ref)
        .filter(|s| !s.is_empty())
        .flat_map(|s| s.encode_utf16().chain(std::iter::once(0)))
        .collect();
    buffer.push(0);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn decode_reads_until_double_nul() {
        // Arrange
        let buffer = wide("a.exe\0b.exe\0\0junk\0");

        // Act
        let list = decode(&buffer);

        // Assert
        assert_eq!(list, vec!["a.exe", "b.exe"]);
    }

    #[test]
    fn decode_empty_buffer_is_empty_list() {
        // Act / Assert
        assert!(decode(&[]).is_empty());
        assert!(decode(&[0, 0]).is_empty());
    }

    #[test]
    fn encode_terminates_with_double_nul() {
        // Act
        let buffer = encode(&["HID\\VID_1", ""]);

        // Assert
        assert_eq!(buffer, wide("HID\\VID_1\0\0"));
    }

    #[test]
    fn encode_empty_list_is_single_nul() {
        // Act / Assert
        assert_eq!(encode::<&str>(&[]), vec![0]);
    }
}
