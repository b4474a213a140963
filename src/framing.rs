//! HTTP/1.1 response framing.
//!
//! Pure functions over the read buffer: locate the end of the header
//! block, extract framing metadata, detect body completion, and decode a
//! chunked body in place so the callback sees one contiguous byte range.

/// Find the end of the header block starting at `from`.
/// Returns the index one past the `\r\n\r\n` terminator.
pub(crate) fn find_headers_end(buf: &[u8], from: usize) -> Option<usize> {
    let hay = &buf[from..];
    (0..hay.len().saturating_sub(3))
        .find(|&i| &hay[i..i + 4] == b"\r\n\r\n")
        .map(|i| from + i + 4)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Whether the header block declares chunked transfer encoding.
/// The match is exact; this client talks to servers that emit canonical
/// header casing.
pub(crate) fn is_chunked(headers: &[u8]) -> bool {
    find(headers, b"\r\nTransfer-Encoding: chunked\r\n").is_some()
}

/// Declared Content-Length, if the header block carries one.
pub(crate) fn parse_content_length(headers: &[u8]) -> Option<usize> {
    const NEEDLE: &[u8] = b"\r\nContent-Length: ";
    let start = find(headers, NEEDLE)? + NEEDLE.len();
    let digits: &[u8] = &headers[start..];
    let mut value: usize = 0;
    let mut seen = false;
    for &b in digits {
        if !b.is_ascii_digit() {
            break;
        }
        value = value.checked_mul(10)?.checked_add((b - b'0') as usize)?;
        seen = true;
    }
    seen.then_some(value)
}

/// Whether a chunked body is complete: the buffer ends with the
/// zero-length final chunk. Trailers are not supported.
pub(crate) fn chunked_body_complete(filled: &[u8]) -> bool {
    filled.len() >= 5 && &filled[filled.len() - 5..] == b"0\r\n\r\n"
}

/// Decode a complete chunked body in place.
///
/// Chunk payloads are compacted to a contiguous run starting at
/// `body_start`; a NUL byte is written one past the decoded body.
/// Returns the decoded length.
pub(crate) fn decode_chunked_in_place(
    buf: &mut [u8],
    body_start: usize,
    end: usize,
) -> Result<usize, &'static str> {
    let mut read = body_start;
    let mut write = body_start;

    loop {
        let line_end = find(&buf[read..end], b"\r\n")
            .map(|i| read + i)
            .ok_or("chunk size line not terminated")?;

        let mut len: usize = 0;
        let mut seen = false;
        for &b in &buf[read..line_end] {
            let digit = match b {
                b'0'..=b'9' => b - b'0',
                b'a'..=b'f' => b - b'a' + 10,
                b'A'..=b'F' => b - b'A' + 10,
                // Chunk extensions terminate the size, as strtol would.
                _ => break,
            };
            len = len
                .checked_mul(16)
                .and_then(|v| v.checked_add(digit as usize))
                .ok_or("chunk size overflow")?;
            seen = true;
        }
        if !seen {
            return Err("chunk size missing");
        }

        read = line_end + 2;
        if len == 0 {
            break;
        }
        if read + len + 2 > end {
            return Err("chunk payload truncated");
        }

        buf.copy_within(read..read + len, write);
        write += len;
        read += len;

        if &buf[read..read + 2] != b"\r\n" {
            return Err("chunk payload not terminated");
        }
        read += 2;
    }

    let content_len = write - body_start;
    // Decoding strips at least the final-chunk marker, so the terminator
    // position is always inside the previously filled region.
    buf[body_start + content_len] = 0;
    Ok(content_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_end_found() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\nbody";
        assert_eq!(find_headers_end(data, 0), Some(38));
    }

    #[test]
    fn headers_end_not_found() {
        let data = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n";
        assert_eq!(find_headers_end(data, 0), None);
    }

    #[test]
    fn headers_end_respects_scan_start() {
        let data = b"xxxx\r\n\r\nHTTP/1.1 200 OK\r\n\r\n";
        assert_eq!(find_headers_end(data, 8), Some(data.len()));
    }

    #[test]
    fn content_length_parsed() {
        let headers = b"HTTP/1.1 200 OK\r\nContent-Length: 512\r\n\r\n";
        assert_eq!(parse_content_length(headers), Some(512));
        assert!(!is_chunked(headers));
    }

    #[test]
    fn content_length_zero() {
        let headers = b"HTTP/1.1 204 No Content\r\nContent-Length: 0\r\n\r\n";
        assert_eq!(parse_content_length(headers), Some(0));
    }

    #[test]
    fn chunked_detected() {
        let headers = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(is_chunked(headers));
        assert_eq!(parse_content_length(headers), None);
    }

    #[test]
    fn no_framing_headers() {
        let headers = b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n";
        assert!(!is_chunked(headers));
        assert_eq!(parse_content_length(headers), None);
    }

    #[test]
    fn chunked_completion_probe() {
        assert!(chunked_body_complete(b"5\r\nhello\r\n0\r\n\r\n"));
        assert!(!chunked_body_complete(b"5\r\nhello\r\n"));
        assert!(!chunked_body_complete(b"0\r\n"));
    }

    #[test]
    fn decode_two_chunks() {
        let mut buf = b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec();
        let end = buf.len();
        let len = decode_chunked_in_place(&mut buf, 0, end).unwrap();
        assert_eq!(len, 11);
        assert_eq!(&buf[..11], b"hello world");
        assert_eq!(buf[11], 0);
    }

    #[test]
    fn decode_sums_chunk_sizes() {
        // Decoded length equals the sum of the chunk sizes and the payload
        // is the concatenation of the chunk payloads.
        let mut buf = b"3\r\nabc\r\n1\r\nd\r\n4\r\nefgh\r\n0\r\n\r\n".to_vec();
        let end = buf.len();
        let len = decode_chunked_in_place(&mut buf, 0, end).unwrap();
        assert_eq!(len, 3 + 1 + 4);
        assert_eq!(&buf[..len], b"abcdefgh");
    }

    #[test]
    fn decode_with_body_offset() {
        let mut buf = b"HEADERS5\r\nhello\r\n0\r\n\r\n".to_vec();
        let end = buf.len();
        let len = decode_chunked_in_place(&mut buf, 8, end).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&buf[8..13], b"hello");
        assert_eq!(buf[13], 0);
    }

    #[test]
    fn decode_empty_body() {
        let mut buf = b"0\r\n\r\n".to_vec();
        let end = buf.len();
        let len = decode_chunked_in_place(&mut buf, 0, end).unwrap();
        assert_eq!(len, 0);
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn decode_hex_sizes() {
        let payload = [b'x'; 0x1a];
        let mut buf = Vec::new();
        buf.extend_from_slice(b"1a\r\n");
        buf.extend_from_slice(&payload);
        buf.extend_from_slice(b"\r\n0\r\n\r\n");
        let end = buf.len();
        let len = decode_chunked_in_place(&mut buf, 0, end).unwrap();
        assert_eq!(len, 0x1a);
    }

    #[test]
    fn decode_strips_chunk_extension() {
        let mut buf = b"5;ext=1\r\nhello\r\n0\r\n\r\n".to_vec();
        let end = buf.len();
        let len = decode_chunked_in_place(&mut buf, 0, end).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn decode_rejects_bad_terminator() {
        let mut buf = b"5\r\nhelloXX0\r\n\r\n".to_vec();
        let end = buf.len();
        assert!(decode_chunked_in_place(&mut buf, 0, end).is_err());
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let mut buf = b"ff\r\nshort\r\n0\r\n\r\n".to_vec();
        let end = buf.len();
        assert!(decode_chunked_in_place(&mut buf, 0, end).is_err());
    }
}
