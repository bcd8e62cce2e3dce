//! Same-length literal replacement inside raw binary buffers.

use tracing::warn;

/// Hostname compiled into the stock game binaries.
pub const ORIGINAL_DOMAIN: &str = "hytale.com";

/// Same-length replacement used when the configured domain cannot fit.
pub const FALLBACK_DOMAIN: &str = "sanasol.ws";

pub const COMMUNITY_LINK: &str = "discord.gg/hytale";
pub const COMMUNITY_LINK_REPLACEMENT: &str = "discord.gg/luyumi";

/// Pick the domain actually written into binaries.
///
/// A configured domain whose length differs from [`ORIGINAL_DOMAIN`] would
/// shift offsets inside the binary, so [`FALLBACK_DOMAIN`] is used instead and
/// the returned warning explains the substitution.
pub fn effective_domain(configured: &str) -> (String, Option<String>) {
    if configured.len() == ORIGINAL_DOMAIN.len() && configured.is_ascii() {
        return (configured.to_string(), None);
    }
    let message = format!(
        "Domain \"{}\" length ({}) doesn't match \"{}\" ({}); using {}",
        configured,
        configured.len(),
        ORIGINAL_DOMAIN,
        ORIGINAL_DOMAIN.len(),
        FALLBACK_DOMAIN
    );
    warn!("{}", message);
    (FALLBACK_DOMAIN.to_string(), Some(message))
}

pub fn encode_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

/// Every offset where `needle` starts, overlapping matches included.
pub fn find_all(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return Vec::new();
    }
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(pos, _)| pos)
        .collect()
}

/// Overwrite each 8-bit occurrence of `old` with `new`. Both must be the same
/// length; returns the number of replacements.
pub fn replace_utf8(data: &mut [u8], old: &str, new: &str) -> usize {
    debug_assert_eq!(old.len(), new.len());
    let (old, new) = (old.as_bytes(), new.as_bytes());
    let positions = find_all(data, old);
    for &pos in &positions {
        data[pos..pos + new.len()].copy_from_slice(new);
    }
    positions.len()
}

/// UTF-16LE replacement tolerant of a non-zero byte after the last character.
///
/// Some string tables store the final code unit's high byte as metadata, so
/// only the prefix (all characters but the last) is matched literally. The
/// last character is confirmed and rewritten through its low byte alone and
/// whatever follows it is left untouched.
pub fn replace_utf16_smart(data: &mut [u8], old: &str, new: &str) -> usize {
    debug_assert_eq!(old.chars().count(), new.chars().count());
    let (Some(old_last), Some(new_last)) = (old.chars().last(), new.chars().last()) else {
        return 0;
    };
    let old_prefix = encode_utf16le(&old[..old.len() - old_last.len_utf8()]);
    let new_prefix = encode_utf16le(&new[..new.len() - new_last.len_utf8()]);
    let (old_low, new_low) = (old_last as u32 as u8, new_last as u32 as u8);

    let mut count = 0;
    for pos in find_all(data, &old_prefix) {
        let last = pos + old_prefix.len();
        if last >= data.len() || data[last] != old_low {
            continue;
        }
        data[pos..pos + new_prefix.len()].copy_from_slice(&new_prefix);
        data[last] = new_low;
        count += 1;
    }
    count
}

/// All replacements applied to a native executable: the domain in both
/// encodings plus the community link in UTF-16.
pub fn patch_native(data: &mut [u8], domain: &str) -> usize {
    replace_utf8(data, ORIGINAL_DOMAIN, domain)
        + replace_utf16_smart(data, ORIGINAL_DOMAIN, domain)
        + replace_utf16_smart(data, COMMUNITY_LINK, COMMUNITY_LINK_REPLACEMENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatched_domain_falls_back_with_warning() {
        let (domain, warning) = effective_domain("auth.example.org");
        assert_eq!(domain, FALLBACK_DOMAIN);
        assert!(warning.unwrap().contains("auth.example.org"));

        let (domain, warning) = effective_domain("abcdef.xyz");
        assert_eq!(domain, "abcdef.xyz");
        assert!(warning.is_none());
    }

    #[test]
    fn utf16_with_metadata_byte_is_patched_in_place() {
        let mut data = vec![0xAAu8; 7];
        let mut encoded = encode_utf16le(ORIGINAL_DOMAIN);
        // The last code unit's high byte carries metadata instead of zero.
        let last = encoded.len() - 1;
        encoded[last] = 0x89;
        data.extend_from_slice(&encoded);
        data.extend_from_slice(&[0x01, 0x02]);
        let original_len = data.len();

        let count = replace_utf16_smart(&mut data, ORIGINAL_DOMAIN, "sanasol.ws");

        assert_eq!(count, 1);
        assert_eq!(data.len(), original_len);
        let mut expected = encode_utf16le("sanasol.ws");
        expected[last] = 0x89;
        assert_eq!(&data[7..7 + expected.len()], &expected[..]);
        assert_eq!(&data[..7], &[0xAA; 7]);
        assert_eq!(&data[original_len - 2..], &[0x01, 0x02]);
    }

    #[test]
    fn utf16_requires_matching_last_character() {
        let mut data = encode_utf16le("hytale.cox");
        let before = data.clone();
        assert_eq!(replace_utf16_smart(&mut data, ORIGINAL_DOMAIN, "sanasol.ws"), 0);
        assert_eq!(data, before);

        // Prefix at the very end of the buffer with no room for the last char.
        let mut data = encode_utf16le("hytale.co");
        assert_eq!(replace_utf16_smart(&mut data, ORIGINAL_DOMAIN, "sanasol.ws"), 0);
    }

    #[test]
    fn utf8_replaces_every_occurrence() {
        let mut data = b"https://hytale.com/a and account.hytale.com".to_vec();
        assert_eq!(replace_utf8(&mut data, ORIGINAL_DOMAIN, "sanasol.ws"), 2);
        assert_eq!(&data[..], b"https://sanasol.ws/a and account.sanasol.ws");
    }

    #[test]
    fn native_patch_covers_both_encodings_and_link() {
        let mut data = Vec::new();
        data.extend_from_slice(b"\x00hytale.com\x00");
        data.extend_from_slice(&encode_utf16le("hytale.com"));
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&encode_utf16le(COMMUNITY_LINK));
        data.extend_from_slice(&[0, 0]);
        let len = data.len();

        assert_eq!(patch_native(&mut data, "sanasol.ws"), 3);
        assert_eq!(data.len(), len);
        assert!(find_all(&data, b"hytale.com").is_empty());
        assert_eq!(find_all(&data, &encode_utf16le(COMMUNITY_LINK_REPLACEMENT)).len(), 1);
    }

    #[test]
    fn find_all_reports_overlaps() {
        assert_eq!(find_all(b"aaaa", b"aa"), vec![0, 1, 2]);
        assert!(find_all(b"a", b"aa").is_empty());
    }
}
