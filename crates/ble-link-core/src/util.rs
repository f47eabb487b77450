//! Small UTF-8 and byte-splitting helpers shared by `message` and `channel`.

/// Number of bytes in the UTF-8 encoding of the scalar value that starts with
/// `first_byte`, per the standard leading-byte pattern. Returns `None` for a
/// byte that can never start a UTF-8 sequence (a continuation byte).
pub fn utf8_char_len(first_byte: u8) -> Option<usize> {
    match first_byte {
        0x00..=0x7F => Some(1),
        0xC2..=0xDF => Some(2),
        0xE0..=0xEF => Some(3),
        0xF0..=0xF4 => Some(4),
        _ => None,
    }
}

/// Split the leading single `char` off `bytes`, returning it and the
/// remainder. Used to recover a 1-char message header from the front of a
/// reassembled byte stream.
pub fn split_first_char(bytes: &[u8]) -> Option<(char, &[u8])> {
    let first = *bytes.first()?;
    let len = utf8_char_len(first)?;
    if bytes.len() < len {
        return None;
    }
    let (head, tail) = bytes.split_at(len);
    let ch = std::str::from_utf8(head).ok()?.chars().next()?;
    Some((ch, tail))
}

/// Validate and normalize a user-supplied header to exactly one UTF-8 char,
/// truncating extra chars and rejecting an empty string.
pub fn normalize_header(header: &str) -> Option<char> {
    header.chars().next()
}

/// Split `data` into chunks of at most `chunk_size` bytes, preserving order.
/// Always yields at least one chunk, even for empty input (an empty chunk),
/// matching the "if it fits in one chunk, emit one frame" rule in `message`.
pub fn chunk_bytes(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if data.is_empty() {
        return vec![&data[0..0]];
    }
    data.chunks(chunk_size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_char_is_one_byte() {
        assert_eq!(utf8_char_len(b'a'), Some(1));
    }

    #[test]
    fn splits_multibyte_leading_char() {
        let s = "é rest"; // 'é' is 2 bytes in UTF-8
        let (ch, rest) = split_first_char(s.as_bytes()).unwrap();
        assert_eq!(ch, 'é');
        assert_eq!(rest, " rest".as_bytes());
    }

    #[test]
    fn chunk_bytes_splits_evenly_with_remainder() {
        let data = vec![0u8; 501];
        let chunks = chunk_bytes(&data, 184);
        let lens: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![184, 184, 133]);
    }

    #[test]
    fn chunk_bytes_handles_empty_input() {
        let chunks = chunk_bytes(&[], 184);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }
}
