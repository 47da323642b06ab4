use std::path::Path;

/// Per-process virtual/real path bridging (§4.4).
///
/// Substitutions are first-match scanning over the raw byte buffer — any
/// occurrence of the needle is replaced, not only ones at path boundaries.
/// This mirrors the source's `bytes.ReplaceAll` behavior; it is safe here
/// because `vm_prefix`/`real_prefix` are namespace-scoped strings unlikely to
/// appear as a substring of anything else in a JSON line.
#[derive(Debug, Clone)]
pub struct PathRemap {
    vm_prefix: String,
    real_prefix: String,
    reverse_enabled: bool,
    additional_mounts: Vec<(String, String)>,
}

impl PathRemap {
    /// `reverse_enabled` should be `vm_prefix.exists()` on the host filesystem
    /// at construction time — reverse remap is only safe when the virtual
    /// root is actually mounted, otherwise output would reference paths the
    /// client cannot open (§4.4).
    pub fn new(vm_prefix: impl Into<String>, real_prefix: impl Into<String>) -> Self {
        let vm_prefix = vm_prefix.into();
        let reverse_enabled = !vm_prefix.is_empty() && Path::new(&vm_prefix).exists();
        Self {
            vm_prefix,
            real_prefix: real_prefix.into(),
            reverse_enabled,
            additional_mounts: Vec::new(),
        }
    }

    pub fn with_mount(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.additional_mounts.push((from.into(), to.into()));
        self
    }

    pub fn add_mount(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.additional_mounts.push((from.into(), to.into()));
    }

    /// Virtual → real. Applied to stdin bytes before delivery to the child:
    /// every `vm_prefix` occurrence becomes `real_prefix`, then every
    /// additional-mount `from` becomes its `to`.
    pub fn forward(&self, bytes: &[u8]) -> Vec<u8> {
        let mut out = replace_all(bytes, self.vm_prefix.as_bytes(), self.real_prefix.as_bytes());
        for (from, to) in &self.additional_mounts {
            out = replace_all(&out, from.as_bytes(), to.as_bytes());
        }
        out
    }

    /// Real → virtual. Applied to each output line before it is wrapped in a
    /// `stdout` event. No-op (returns the input unchanged) when reverse
    /// remapping was disabled at construction.
    pub fn reverse(&self, bytes: &[u8]) -> Vec<u8> {
        if !self.reverse_enabled {
            return bytes.to_vec();
        }
        replace_all(bytes, self.real_prefix.as_bytes(), self.vm_prefix.as_bytes())
    }

    pub fn reverse_enabled(&self) -> bool {
        self.reverse_enabled
    }
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    if needle.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_replaces_vm_prefix_and_mounts() {
        let remap = PathRemap::new("/sessions/foo", "/real/foo").with_mount("/mnt/a", "/real/a");
        let input = b"read /sessions/foo/x and /mnt/a/y";
        let out = remap.forward(input);
        assert_eq!(out, b"read /real/foo/x and /real/a/y".to_vec());
    }

    #[test]
    fn reverse_replaces_real_prefix_when_vm_prefix_exists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let vm_prefix = dir.path().join("sessions-foo");
        std::fs::create_dir_all(&vm_prefix).unwrap();
        let vm_prefix = vm_prefix.to_string_lossy().into_owned();

        let remap = PathRemap::new(vm_prefix.clone(), "/real/foo");
        assert!(remap.reverse_enabled());

        let line = b"wrote to /real/foo/output.txt\n";
        let out = remap.reverse(line);
        let expected = format!("wrote to {vm_prefix}/output.txt\n");
        assert_eq!(out, expected.into_bytes());
    }

    #[test]
    fn reverse_is_disabled_when_vm_prefix_does_not_exist() {
        let remap = PathRemap::new("/does/not/exist/on/this/host", "/real/foo");
        assert!(!remap.reverse_enabled());
        let line = b"/real/foo/output.txt\n";
        assert_eq!(remap.reverse(line), line.to_vec());
    }

    #[test]
    fn substitution_matches_any_occurrence_not_only_path_boundaries() {
        let remap = PathRemap::new("/v", "/r");
        // `/v` appears mid-token too; ReplaceAll semantics replace it anyway.
        let out = remap.forward(b"/v/one /v-two");
        assert_eq!(out, b"/r/one /r-two".to_vec());
    }
}
