use std::path::{Component, Path, PathBuf};

/// Replace every character outside `[A-Za-z0-9]` with `_` so an image reference
/// can be used as a directory or container name.
pub fn sanitize_name(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Host location mirroring `container_path` under `base`.
///
/// `/usr/share/ansible` under `/cache/x/id` becomes `/cache/x/id/usr/share/ansible`;
/// `..` components are dropped so a reported path can never escape `base`.
pub fn mirror_path(base: &Path, container_path: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for comp in Path::new(container_path).components() {
        if let Component::Normal(part) = comp {
            out.push(part);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(
            sanitize_name("quay.io/ansible/creator-ee:latest"),
            "quay_io_ansible_creator_ee_latest"
        );
    }

    #[test]
    fn test_mirror_path_absolute_and_traversal() {
        let base = Path::new("/cache/img/abc");
        assert_eq!(
            mirror_path(base, "/usr/share/ansible/collections"),
            PathBuf::from("/cache/img/abc/usr/share/ansible/collections")
        );
        assert_eq!(
            mirror_path(base, "/a/../../etc"),
            PathBuf::from("/cache/img/abc/a/etc")
        );
    }
}
