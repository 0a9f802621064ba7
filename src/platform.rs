use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Origin reported by contexts whose origin is not a scheme/host/port tuple.
pub const OPAQUE_ORIGIN: &str = "null";

const OPAQUE_TAG: &str = "opaque:";

/// Default data directory (~/.local/share/kvsnap or platform equivalent).
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "kvsnap").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default config file (~/.config/kvsnap/config.toml or platform equivalent).
pub fn config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "kvsnap")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Opaque contexts all report the same marker, so they are told apart by
/// their full location instead.
pub fn resolve_origin(reported: &str, location: &str) -> String {
    if reported == OPAQUE_ORIGIN {
        format!("{OPAQUE_TAG}{location}")
    } else {
        reported.to_string()
    }
}

/// Longest component kept as plain hex. Twice this plus an extension stays
/// well under the usual 255-byte file name limit.
const MAX_HEX_COMPONENT: usize = 128;

/// Bytes of the name kept readable in front of the digest of a long name.
const LONG_NAME_PREFIX: usize = 32;

/// One safe path component for any name.
///
/// Short names become the lowercase hex of their utf-8 bytes. Longer ones
/// become the hex of a fixed prefix followed by the sha-256 of the whole
/// name, so the component length is bounded.
pub fn path_component(name: &str) -> String {
    let bytes = name.as_bytes();
    if bytes.len() * 2 <= MAX_HEX_COMPONENT {
        return hex(bytes);
    }

    let digest = Sha256::digest(bytes);
    format!("{}-{}", hex(&bytes[..LONG_NAME_PREFIX]), hex(&digest))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_origin_embeds_location() {
        let origin = resolve_origin("null", "file:///home/dev/app/index.html");
        assert_eq!(origin, "opaque:file:///home/dev/app/index.html");
        assert_ne!(origin, OPAQUE_ORIGIN);
    }

    #[test]
    fn regular_origin_is_verbatim() {
        assert_eq!(
            resolve_origin("https://shop.example", "https://shop.example/cart"),
            "https://shop.example"
        );
    }

    #[test]
    fn short_names_are_plain_hex() {
        assert_eq!(path_component("a/b"), "612f62");
        assert_eq!(path_component(""), "");
        assert_eq!(path_component(&"x".repeat(64)).len(), 128);
    }

    #[test]
    fn long_names_are_bounded_and_distinct() {
        let location = format!("file:///home/dev/{}/index.html", "deep/".repeat(56));
        let origin = resolve_origin(OPAQUE_ORIGIN, &location);
        assert!(origin.len() > 300);

        let component = path_component(&origin);
        assert_eq!(component.len(), 2 * LONG_NAME_PREFIX + 1 + 64);
        assert!(component.starts_with(&path_component("opaque:file:///home/dev/")));
        assert!(!component.contains('/'));

        let sibling = path_component(&format!("{origin}#"));
        assert_ne!(component, sibling);
        assert_eq!(component, path_component(&origin));
    }
}
