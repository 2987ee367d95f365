//! Raw argument buffer layout.
//!
//! The buffer starts with the argument count as a native endian `i32`,
//! followed by the image path of the process terminated by a null byte, an
//! optional run of padding null bytes and finally every argument, each one
//! terminated by a null byte. The count and the arguments leave out the
//! image name (`argv[0]`).

use std::str::{Utf8Error, from_utf8};

use thiserror::Error;

/// Size of the leading argument count field.
pub const COUNT_SIZE: usize = std::mem::size_of::<i32>();

/// Padding after the image path is aligned to a pointer size.
const PADDING_ALIGN: usize = std::mem::size_of::<usize>();

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProcargsError {
    #[error("argument buffer too short ({len} bytes)")]
    Truncated { len: usize },
    #[error("image path is not null terminated")]
    MissingTerminator,
    #[error("argument is not a valid string")]
    NotAString(#[from] Utf8Error),
}

/// Decode the argument vector stored in `buffer`.
///
/// The image path is decoded and discarded, then at most `count` non-empty
/// strings are decoded in order. Empty strings are padding: they are skipped
/// and don't count as arguments. Decoding stops at the end of the buffer, a
/// trailing fragment without terminator is ignored.
pub fn parse_procargs(buffer: &[u8]) -> Result<Vec<String>, ProcargsError> {
    let count: [u8; COUNT_SIZE] = buffer
        .get(..COUNT_SIZE)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(ProcargsError::Truncated { len: buffer.len() })?;
    let mut remaining = usize::try_from(i32::from_ne_bytes(count)).unwrap_or(0);

    let body = &buffer[COUNT_SIZE..];
    let image_end = body
        .iter()
        .position(|b| *b == 0)
        .ok_or(ProcargsError::MissingTerminator)?;
    // The image path is the first decoded string. It duplicates the path
    // resolved elsewhere and is dropped.
    let _image = from_utf8(&body[..image_end])?;

    let mut argv = Vec::with_capacity(remaining.min(64));
    let mut rest = &body[image_end + 1..];
    while remaining > 0 {
        let Some(end) = rest.iter().position(|b| *b == 0) else {
            break;
        };
        let chunk = &rest[..end];
        rest = &rest[end + 1..];
        if chunk.is_empty() {
            continue;
        }
        argv.push(from_utf8(chunk)?.to_string());
        remaining -= 1;
    }

    Ok(argv)
}

/// Lay out `image` and `args` the way [`parse_procargs`] expects, truncating
/// the result to `ceiling` bytes.
pub fn encode_procargs<A: AsRef<[u8]>>(image: &[u8], args: &[A], ceiling: usize) -> Vec<u8> {
    let argc = i32::try_from(args.len()).unwrap_or(i32::MAX);

    let args_len: usize = args.iter().map(|arg| arg.as_ref().len() + 1).sum();
    let mut buffer = Vec::with_capacity(COUNT_SIZE + image.len() + PADDING_ALIGN + args_len);
    buffer.extend_from_slice(&argc.to_ne_bytes());
    buffer.extend_from_slice(image);
    buffer.push(0);
    while buffer.len() % PADDING_ALIGN != 0 {
        buffer.push(0);
    }
    for arg in args {
        buffer.extend_from_slice(arg.as_ref());
        buffer.push(0);
    }

    buffer.truncate(ceiling);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(count: i32, parts: &[&[u8]]) -> Vec<u8> {
        let mut buffer = count.to_ne_bytes().to_vec();
        for part in parts {
            buffer.extend_from_slice(part);
        }
        buffer
    }

    #[test]
    fn image_path_is_dropped() {
        let buffer = raw(3, &[b"/bin/ls\0", b"-l\0", b"-a\0", b"x\0"]);
        assert_eq!(parse_procargs(&buffer).unwrap(), vec!["-l", "-a", "x"]);
    }

    #[test]
    fn missing_null_is_malformed() {
        let buffer = raw(3, &[b"/bin/ls-l-ax"]);
        assert_eq!(
            parse_procargs(&buffer),
            Err(ProcargsError::MissingTerminator)
        );
        assert_eq!(
            parse_procargs(&[1, 0]),
            Err(ProcargsError::Truncated { len: 2 })
        );
    }

    #[test]
    fn padding_is_skipped_and_count_respected() {
        let buffer = raw(2, &[b"/bin/ls\0\0\0\0", b"ls\0", b"-l\0", b"ignored\0"]);
        assert_eq!(parse_procargs(&buffer).unwrap(), vec!["ls", "-l"]);
    }

    #[test]
    fn stops_at_end_of_buffer() {
        let buffer = raw(5, &[b"/bin/ls\0", b"ls\0", b"-l"]);
        assert_eq!(parse_procargs(&buffer).unwrap(), vec!["ls"]);
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let buffer = raw(1, &[b"/bin/ls\0", &[0xff, 0xfe, 0]]);
        assert!(matches!(
            parse_procargs(&buffer),
            Err(ProcargsError::NotAString(_))
        ));
    }

    #[test]
    fn encoded_buffer_parses_back() {
        let buffer = encode_procargs(b"/usr/bin/env", &["env", "FOO=1", "sh"], usize::MAX);
        // image terminator and padding up to the next aligned offset
        let padded = (COUNT_SIZE + 13).next_multiple_of(PADDING_ALIGN);
        assert!(buffer[COUNT_SIZE + 12..padded].iter().all(|b| *b == 0));
        assert_eq!(parse_procargs(&buffer).unwrap(), vec!["env", "FOO=1", "sh"]);

        let truncated = encode_procargs(b"/usr/bin/env", &["env", "FOO=1", "sh"], 4);
        assert_eq!(
            parse_procargs(&truncated),
            Err(ProcargsError::MissingTerminator)
        );
    }
}
