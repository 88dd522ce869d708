//! Follower descriptor blob.
//!
//! Each follower is written as `index:host:port` followed by the address
//! separator, so N followers produce N+1 tokens on split and the last one is
//! always discarded.

use dn_core::{ADDR_SPLIT, DnError, Result};
use std::fmt::Write as _;

/// Resolve the follower addresses named by the first `arg_len` bytes of `arg`.
pub fn parse_followers(arg: &[u8], arg_len: u32) -> Result<Vec<String>> {
    let declared = arg_len as usize;
    if declared > arg.len() {
        return Err(DnError::ArgLenMismatch {
            declared: arg_len,
            available: arg.len(),
        });
    }

    let text = std::str::from_utf8(&arg[..declared])
        .map_err(|e| DnError::Protocol(format!("follower descriptors are not utf-8: {e}")))?;

    let tokens: Vec<&str> = text.split(ADDR_SPLIT).collect();
    let followers = tokens.len() - 1;
    Ok(tokens[..followers]
        .iter()
        .map(|token| strip_index(token).to_owned())
        .collect())
}

fn strip_index(token: &str) -> &str {
    match token.split_once(':') {
        Some((index, addr)) if addr.contains(':') && index.parse::<u32>().is_ok() => addr,
        _ => token,
    }
}

/// Build the descriptor blob for `followers`, in order.
#[must_use]
pub fn encode_followers<S: AsRef<str>>(followers: &[S]) -> String {
    let mut out = String::new();
    for (i, addr) in followers.iter().enumerate() {
        let _ = write!(out, "{i}:{}{ADDR_SPLIT}", addr.as_ref());
    }
    out
}

/// Negative hop counts are malformed chains.
#[inline]
pub fn check_hop_count(remaining_followers: i8) -> Result<()> {
    if remaining_followers < 0 {
        return Err(DnError::BadNodes(remaining_followers));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_two_followers() {
        let arg = b"0:10.0.0.1:17310,1:10.0.0.2:17310,";
        let addrs = parse_followers(arg, 34).unwrap();
        assert_eq!(addrs, vec!["10.0.0.1:17310", "10.0.0.2:17310"]);
    }

    #[test]
    fn test_empty_blob_is_tail() {
        assert!(parse_followers(b"", 0).unwrap().is_empty());
        // Bytes past the declared length are ignored
        assert!(parse_followers(b"0:h:1,", 0).unwrap().is_empty());
    }

    #[test]
    fn test_declared_length_beyond_blob() {
        let err = parse_followers(b"0:h:1,", 40).unwrap_err();
        assert!(matches!(
            err,
            DnError::ArgLenMismatch {
                declared: 40,
                available: 6
            }
        ));
        assert!(err.to_string().starts_with("ArgLenMismatchErr"));
    }

    #[test]
    fn test_missing_trailing_separator_drops_last() {
        let addrs = parse_followers(b"0:a:1,1:b:2", 11).unwrap();
        assert_eq!(addrs, vec!["a:1"]);
    }

    #[test]
    fn test_unindexed_descriptor_kept_verbatim() {
        let addrs = parse_followers(b"10.0.0.9:17310,", 15).unwrap();
        assert_eq!(addrs, vec!["10.0.0.9:17310"]);
    }

    #[test]
    fn test_encode_matches_parse() {
        let blob = encode_followers(&["10.0.0.1:17310", "10.0.0.2:17310"]);
        assert_eq!(blob, "0:10.0.0.1:17310,1:10.0.0.2:17310,");
        let len = u32::try_from(blob.len()).unwrap();
        assert_eq!(
            parse_followers(blob.as_bytes(), len).unwrap(),
            vec!["10.0.0.1:17310", "10.0.0.2:17310"]
        );
        assert_eq!(encode_followers::<&str>(&[]), "");
    }

    #[test]
    fn test_hop_count() {
        assert!(check_hop_count(0).is_ok());
        assert!(check_hop_count(2).is_ok());
        assert!(matches!(check_hop_count(-1), Err(DnError::BadNodes(-1))));
    }
}
