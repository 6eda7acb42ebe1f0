//! Output file naming.
//!
//! Per-run file names are derived from a base path and the scan serial number:
//! `/data/scan.fio` becomes `/data/scan_00042.fio`. A base path carrying exactly one
//! printf-style integer template (`/data/scan_%d.fio`, `/data/scan_%05d.fio`) is
//! substituted instead.

use std::path::{Path, PathBuf};

/// Path for run `serial`: template substitution when the base carries one template,
/// otherwise `<stem>_<serial:05>.<ext>` when `number` is set, otherwise the base.
pub fn output_path(base: &Path, serial: u64, number: bool) -> PathBuf {
    let text = base.to_string_lossy();
    if let Some(substituted) = substitute_template(&text, serial) {
        return PathBuf::from(substituted);
    }
    if number {
        numbered(base, serial)
    } else {
        base.to_path_buf()
    }
}

/// `<stem>_<serial:05>.<ext>` next to `base`.
pub fn numbered(base: &Path, serial: u64) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match base.extension() {
        Some(ext) => format!("{stem}_{serial:05}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{serial:05}"),
    };
    base.with_file_name(name)
}

/// Whether `text` contains exactly one `%`.
pub fn has_template(text: &str) -> bool {
    text.matches('%').count() == 1
}

/// Substitutes a single `%d`, `%Nd` or `%0Nd` template.
fn substitute_template(text: &str, serial: u64) -> Option<String> {
    if !has_template(text) {
        return None;
    }
    let (head, tail) = text.split_once('%')?;
    let spec_len = tail.find('d')?;
    let spec = &tail[..spec_len];
    if !spec.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let width: usize = if spec.is_empty() { 0 } else { spec.parse().ok()? };
    let number = if spec.starts_with('0') {
        format!("{serial:0width$}")
    } else {
        format!("{serial:>width$}")
    };
    Some(format!("{head}{number}{}", &tail[spec_len + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_with_five_digits() {
        assert_eq!(
            output_path(Path::new("/data/scan.fio"), 42, true),
            PathBuf::from("/data/scan_00042.fio")
        );
        assert_eq!(
            output_path(Path::new("/data/scan.nxs"), 42, false),
            PathBuf::from("/data/scan.nxs")
        );
    }

    #[test]
    fn substitutes_single_template() {
        assert_eq!(
            output_path(Path::new("/data/run_%05d.fio"), 7, true),
            PathBuf::from("/data/run_00007.fio")
        );
        assert_eq!(
            output_path(Path::new("/data/run_%d.nxs"), 7, false),
            PathBuf::from("/data/run_7.nxs")
        );
    }

    #[test]
    fn malformed_template_falls_back_to_numbering() {
        assert_eq!(
            output_path(Path::new("/data/run_%s.fio"), 3, true),
            PathBuf::from("/data/run_%s_00003.fio")
        );
        assert!(!has_template("/data/a%%b"));
    }
}
