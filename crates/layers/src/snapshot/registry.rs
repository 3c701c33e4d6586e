//! Registry export handling: section lookup, host specific filtering and
//! `.reg` patch assembly.

use std::cell::OnceCell;
use std::collections::BTreeMap;

pub const REGEDIT_HEADER: &str = "Windows Registry Editor Version 5.00";
pub const DLL_OVERRIDES_KEY: &str = "HKEY_CURRENT_USER\\Software\\Wine\\DllOverrides";
const NEWLINE: &str = "\r\n";

/// Keys describing the host's hardware. They are rewritten by the runtime on
/// every boot and make no sense on another machine.
const SKIPPED_SECTIONS: &[&str] = &[
    // CPU descriptors, BIOS and device maps.
    "HKEY_LOCAL_MACHINE\\HARDWARE",
    // Device classes and enumerated devices.
    "HKEY_LOCAL_MACHINE\\System\\CurrentControlSet\\Control\\Class",
    "HKEY_LOCAL_MACHINE\\System\\CurrentControlSet\\Control\\DeviceClasses",
    "HKEY_LOCAL_MACHINE\\System\\CurrentControlSet\\Enum",
    // Audio endpoints.
    "HKEY_LOCAL_MACHINE\\Software\\Microsoft\\Windows\\CurrentVersion\\MMDevices",
];

/// Whether `section` (without brackets) is, or is below, a skipped key.
pub fn is_skipped(section: &str) -> bool {
    SKIPPED_SECTIONS.iter().any(|skipped| {
        section.len() >= skipped.len()
            && section.is_char_boundary(skipped.len())
            && section[..skipped.len()].eq_ignore_ascii_case(skipped)
            && matches!(section[skipped.len()..].chars().next(), None | Some('\\'))
    })
}

fn section_name(line: &str) -> Option<&str> {
    line.trim_end().strip_prefix('[')?.strip_suffix(']')
}

/// The lines of a full registry export, with section headers indexed on
/// first use.
pub struct RegistryExport {
    lines: Vec<String>,
    sections: OnceCell<Vec<usize>>,
}

impl RegistryExport {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines, sections: OnceCell::new() }
    }

    /// Indices of every `[Section]` header line, ascending.
    pub fn sections(&self) -> &[usize] {
        self.sections.get_or_init(|| {
            self.lines.iter().enumerate().filter(|(_, line)| section_name(line).is_some()).map(|(i, _)| i).collect()
        })
    }

    /// Index of the nearest header at or before `index`.
    pub fn section_for(&self, index: usize) -> Option<usize> {
        let sections = self.sections();
        let position = sections.partition_point(|&header| header <= index);
        position.checked_sub(1).map(|p| sections[p])
    }

    /// Group inserted lines under the section they were inserted into.
    ///
    /// The enclosing section is looked up again only when a run of
    /// consecutive insertions breaks, or a new header starts inside the run.
    /// Blank lines, lines before the first header and lines of skipped
    /// sections are dropped. Returns an empty string when nothing is left.
    pub fn extract(&self, inserted: &BTreeMap<usize, String>) -> String {
        let mut groups: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        let mut previous: Option<usize> = None;
        let mut header: Option<usize> = None;

        for (&index, line) in inserted {
            let is_header = self.sections().binary_search(&index).is_ok();
            if is_header || previous.map(|p| p + 1) != Some(index) {
                header = self.section_for(index);
            }
            previous = Some(index);

            let Some(header) = header else {
                continue;
            };
            let Some(section) = self.lines.get(header).and_then(|l| section_name(l)) else {
                continue;
            };
            if is_skipped(section) {
                tracing::trace!(section, "Skipping host specific registry line");
                continue;
            }
            let values = groups.entry(header).or_default();
            if !is_header && !line.trim().is_empty() {
                values.push(line);
            }
        }

        if groups.is_empty() {
            return String::new();
        }
        render_patch(groups.into_iter().map(|(header, values)| (self.lines[header].trim_end(), values)))
    }
}

/// Assemble a `.reg` patch from `[Section]` header lines and their values.
pub fn render_patch<'a, V>(groups: impl IntoIterator<Item = (&'a str, V)>) -> String
where
    V: IntoIterator,
    V::Item: AsRef<str>,
{
    let mut out = format!("{REGEDIT_HEADER}{NEWLINE}{NEWLINE}");
    for (header, values) in groups {
        out.push_str(header);
        out.push_str(NEWLINE);
        for value in values {
            out.push_str(value.as_ref());
            out.push_str(NEWLINE);
        }
        out.push_str(NEWLINE);
    }
    out
}

/// Concatenate several patches under a single version header, in order, so
/// later values override earlier ones when imported.
pub fn merge_patches<'a>(patches: impl IntoIterator<Item = &'a str>) -> String {
    let mut body = String::new();
    for patch in patches {
        let mut lines = patch.lines().skip_while(|l| l.trim().is_empty()).peekable();
        if lines.peek().is_some_and(|l| l.trim() == REGEDIT_HEADER) {
            lines.next();
        }
        for line in lines.skip_while(|l| l.trim().is_empty()) {
            body.push_str(line);
            body.push_str(NEWLINE);
        }
        if !body.is_empty() && !body.ends_with("\r\n\r\n") {
            body.push_str(NEWLINE);
        }
    }
    if body.is_empty() {
        return body;
    }
    format!("{REGEDIT_HEADER}{NEWLINE}{NEWLINE}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn export(text: &str) -> RegistryExport {
        RegistryExport::new(text.lines().map(str::to_string).collect())
    }

    fn inserted(export: &RegistryExport, indices: &[usize]) -> BTreeMap<usize, String> {
        indices.iter().map(|&i| (i, export.lines[i].clone())).collect()
    }

    const AFTER: &str = "\
Windows Registry Editor Version 5.00

[HKEY_CURRENT_USER\\Software\\Foo]
\"Bar\"=\"baz\"

[HKEY_LOCAL_MACHINE\\HARDWARE\\DESCRIPTION\\System\\CentralProcessor\\0]
\"~MHz\"=dword:00000bb8

[HKEY_CURRENT_USER\\Software\\Wine]
\"Version\"=\"win10\"
\"Other\"=\"x\"
";

    #[test]
    fn test_sections() {
        let export = export(AFTER);
        assert_eq!(export.sections(), &[2, 5, 8]);
        assert_eq!(export.section_for(0), None);
        assert_eq!(export.section_for(3), Some(2));
        assert_eq!(export.section_for(5), Some(5));
        assert_eq!(export.section_for(10), Some(8));
    }

    #[test]
    fn test_extract_new_key() {
        let export = export(AFTER);
        let patch = export.extract(&inserted(&export, &[1, 2, 3]));
        assert_eq!(
            patch,
            "Windows Registry Editor Version 5.00\r\n\r\n[HKEY_CURRENT_USER\\Software\\Foo]\r\n\"Bar\"=\"baz\"\r\n\r\n"
        );
    }

    #[test]
    fn test_extract_skips_hardware() {
        let export = export(AFTER);
        let patch = export.extract(&inserted(&export, &[5, 6, 7, 10]));
        assert!(!patch.contains("CentralProcessor"));
        assert!(!patch.contains("MHz"));
        assert!(patch.contains("[HKEY_CURRENT_USER\\Software\\Wine]\r\n\"Other\"=\"x\"\r\n"));
    }

    #[test]
    fn test_extract_run_across_sections() {
        let export = export(AFTER);
        let patch = export.extract(&inserted(&export, &[3, 4, 5, 6, 7, 8, 9]));
        assert!(patch.contains("[HKEY_CURRENT_USER\\Software\\Foo]\r\n\"Bar\"=\"baz\"\r\n"));
        assert!(patch.contains("[HKEY_CURRENT_USER\\Software\\Wine]\r\n\"Version\"=\"win10\"\r\n"));
        assert!(!patch.contains("MHz"));
    }

    #[test]
    fn test_extract_nothing() {
        let export = export(AFTER);
        assert_eq!(export.extract(&inserted(&export, &[0, 1])), "");
        assert_eq!(export.extract(&BTreeMap::new()), "");
    }

    #[rstest]
    #[case("HKEY_LOCAL_MACHINE\\HARDWARE", true)]
    #[case("HKEY_LOCAL_MACHINE\\Hardware\\DEVICEMAP\\VIDEO", true)]
    #[case("HKEY_LOCAL_MACHINE\\System\\CurrentControlSet\\Enum\\PCI", true)]
    #[case("HKEY_LOCAL_MACHINE\\Software\\Microsoft\\Windows\\CurrentVersion\\MMDevices\\Audio\\Render", true)]
    #[case("HKEY_LOCAL_MACHINE\\HARDWAREX", false)]
    #[case("HKEY_CURRENT_USER\\Software\\Wine", false)]
    fn test_is_skipped(#[case] section: &str, #[case] expected: bool) {
        assert_eq!(is_skipped(section), expected);
    }

    #[test]
    fn test_render_patch() {
        let patch = render_patch([(format!("[{DLL_OVERRIDES_KEY}]").as_str(), vec!["\"d3dx9_43\"=\"native\""])]);
        assert_eq!(
            patch,
            "Windows Registry Editor Version 5.00\r\n\r\n[HKEY_CURRENT_USER\\Software\\Wine\\DllOverrides]\r\n\"d3dx9_43\"=\"native\"\r\n\r\n"
        );
    }

    #[test]
    fn test_merge_patches() {
        let a = "Windows Registry Editor Version 5.00\r\n\r\n[HKEY_CURRENT_USER\\A]\r\n\"x\"=\"1\"\r\n\r\n";
        let b = "Windows Registry Editor Version 5.00\r\n\r\n[HKEY_CURRENT_USER\\A]\r\n\"x\"=\"2\"\r\n";
        let merged = merge_patches([a, b]);
        assert_eq!(
            merged,
            "Windows Registry Editor Version 5.00\r\n\r\n[HKEY_CURRENT_USER\\A]\r\n\"x\"=\"1\"\r\n\r\n[HKEY_CURRENT_USER\\A]\r\n\"x\"=\"2\"\r\n\r\n"
        );
        assert_eq!(merge_patches(["", "Windows Registry Editor Version 5.00\r\n"]), "");
    }
}
