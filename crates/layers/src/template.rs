//! Machine identity placeholders for portable registry patches.
//!
//! A registry export is full of the current user's name, the host name and
//! the absolute location of the prefix. Captured patches swap those for
//! placeholders so a layer can be replayed on another machine or account:
//!
//! ```
//! use cellar_layers::Identity;
//!
//! let identity = Identity::new("alice", "workstation", "/home/alice/.wine");
//! let text = r#""Profile"="C:\\users\\alice\\Documents""#;
//! let portable = identity.templatize(text);
//! assert_eq!(portable, r#""Profile"="C:\\users\\{USER}\\Documents""#);
//! assert_eq!(identity.render(&portable), text);
//!
//! // Host names are only replaced in value data, never in keys or names.
//! let text = r#""workstation"="workstation""#;
//! assert_eq!(identity.templatize(text), r#""workstation"="{HOSTNAME}""#);
//! ```
//!
//! Matching is case-sensitive and tied to context, since short account and
//! host names (`user`, `desktop`) are also ordinary registry words.

use regex::{NoExpand, Regex};

pub const USER: &str = "{USER}";
pub const HOSTNAME: &str = "{HOSTNAME}";
pub const ROOT_DIR: &str = "{ROOT_DIR}";

const USER_REPLACEMENT: &str = "${lead}{USER}${trail}";

/// Concrete values for each placeholder on this machine.
#[derive(Clone, Debug)]
pub struct Identity {
    user: String,
    hostname: String,
    root_dir: String,
    /// The user name as a profile directory: `users\\<user>` or `/home/<user>`.
    user_pattern: Option<Regex>,
    /// The host name as a whole word, verbatim or upper-cased.
    host_pattern: Option<Regex>,
}

impl Identity {
    pub fn new(user: impl Into<String>, hostname: impl Into<String>, root_dir: impl Into<String>) -> Self {
        let user = user.into();
        let hostname = hostname.into();
        let root_dir = root_dir.into();
        let user_pattern = (!user.trim().is_empty()).then(|| profile_pattern(&user)).flatten();
        let host_pattern = (!hostname.trim().is_empty()).then(|| word_pattern(&hostname)).flatten();
        Self { user, hostname, root_dir, user_pattern, host_pattern }
    }

    /// Identity of this host, with the host name taken from the kernel.
    pub fn detect(user: impl Into<String>, root_dir: impl Into<String>) -> Self {
        let hostname = match nix::unistd::gethostname() {
            Ok(name) => name.to_string_lossy().into_owned(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not determine host name; it won't be templated");
                String::new()
            },
        };
        Self::new(user, hostname, root_dir)
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn root_dir(&self) -> &str {
        &self.root_dir
    }

    /// Replace concrete values with placeholders, line by line.
    ///
    /// - the root dir is replaced wherever it appears, as written;
    /// - the user only as a profile directory below `users` or `home`;
    /// - the host only as a whole word in value data, as written or in
    ///   upper case (`ComputerName` is stored upper-cased).
    pub fn templatize(&self, text: &str) -> String {
        text.split_inclusive('\n').map(|line| self.templatize_line(line)).collect()
    }

    fn templatize_line(&self, line: &str) -> String {
        let mut line = if self.root_dir.trim().is_empty() {
            line.to_string()
        } else {
            line.replace(&self.root_dir, ROOT_DIR)
        };
        if let Some(regex) = &self.user_pattern {
            line = regex.replace_all(&line, USER_REPLACEMENT).into_owned();
        }
        if let (Some(regex), Some(start)) = (&self.host_pattern, value_data(&line)) {
            let data = regex.replace_all(&line[start..], NoExpand(HOSTNAME));
            line = format!("{}{data}", &line[..start]);
        }
        line
    }

    /// Substitute placeholders back with this machine's values.
    pub fn render(&self, text: &str) -> String {
        text.replace(ROOT_DIR, &self.root_dir).replace(HOSTNAME, &self.hostname).replace(USER, &self.user)
    }
}

fn profile_pattern(user: &str) -> Option<Regex> {
    let source = format!(r#"\b(?P<lead>(?i:users|home)(?:\\\\|\\|/)){}(?P<trail>[\\/"\r\n]|$)"#, regex::escape(user));
    compile(&source, user)
}

fn word_pattern(value: &str) -> Option<Regex> {
    let word = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
    let start = if word(value.chars().next()) { r"\b" } else { "" };
    let end = if word(value.chars().last()) { r"\b" } else { "" };
    let mut variants = vec![regex::escape(value)];
    let upper = value.to_uppercase();
    if upper != value {
        variants.push(regex::escape(&upper));
    }
    compile(&format!("{start}(?:{}){end}", variants.join("|")), value)
}

fn compile(source: &str, value: &str) -> Option<Regex> {
    match Regex::new(source) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(error = %e, %value, "Identity value can't be matched; it won't be templated");
            None
        },
    }
}

/// Byte offset where the data of a `"name"=data` or `@=data` line starts.
/// `None` for key headers, comments and continuation lines.
fn value_data(line: &str) -> Option<usize> {
    if line.starts_with("@=") {
        return Some(2);
    }
    let name = line.strip_prefix('"')?;
    let mut escaped = false;
    for (i, c) in name.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => return name[i + 1..].starts_with('=').then_some(i + 3),
            _ => {},
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn identity() -> Identity {
        Identity::new("alice", "workstation", "/home/alice/.wine")
    }

    #[rstest]
    #[case(r#""Path"="C:\\users\\alice\\AppData""#, r#""Path"="C:\\users\\{USER}\\AppData""#)]
    #[case(r#""Music"="/home/alice/Music""#, r#""Music"="/home/{USER}/Music""#)]
    #[case(r#""Data"="/home/alice/.wine/drive_c""#, r#""Data"="{ROOT_DIR}/drive_c""#)]
    #[case("prefix at /home/alice/.wine/drive_c", "prefix at {ROOT_DIR}/drive_c")]
    #[case(r#""ComputerName"="WORKSTATION""#, r#""ComputerName"="{HOSTNAME}""#)]
    #[case(r#""Owner"="alice@workstation""#, r#""Owner"="alice@{HOSTNAME}""#)]
    #[case(r#"@="workstation""#, r#"@="{HOSTNAME}""#)]
    #[case(r#"[HKEY_CURRENT_USER\\Software\\workstation]"#, r#"[HKEY_CURRENT_USER\\Software\\workstation]"#)]
    #[case(r#""a \"quoted\" workstation"="1""#, r#""a \"quoted\" workstation"="1""#)]
    #[case(r#""Path"="C:\\users\\Alice\\AppData""#, r#""Path"="C:\\users\\Alice\\AppData""#)]
    #[case(r#""Path"="C:\\users\\alicent""#, r#""Path"="C:\\users\\alicent""#)]
    #[case("malice and alicent", "malice and alicent")]
    #[case("nothing to see", "nothing to see")]
    fn test_templatize(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(identity().templatize(input), expected);
    }

    #[test]
    fn test_common_words_survive_another_account() {
        let captured = Identity::new("user", "desktop", "/home/user/.wine");
        let text = concat!(
            r#"[HKEY_CURRENT_USER\\Software\\Microsoft\\Windows\\CurrentVersion\\Explorer\\User Shell Folders]"#,
            "\r\n",
            r#""Desktop"="C:\\users\\user\\Desktop""#,
            "\r\n",
            r#""Host"="desktop""#,
            "\r\n",
        );
        let portable = captured.templatize(text);
        assert_eq!(
            portable,
            concat!(
                r#"[HKEY_CURRENT_USER\\Software\\Microsoft\\Windows\\CurrentVersion\\Explorer\\User Shell Folders]"#,
                "\r\n",
                r#""Desktop"="C:\\users\\{USER}\\Desktop""#,
                "\r\n",
                r#""Host"="{HOSTNAME}""#,
                "\r\n",
            )
        );

        let rendered = Identity::new("bob", "pc", "/home/bob/.wine").render(&portable);
        assert!(rendered.contains(r"\\Explorer\\User Shell Folders]"));
        assert!(rendered.contains(r#""Desktop"="C:\\users\\bob\\Desktop""#));
        assert!(rendered.contains(r#""Host"="pc""#));
    }

    #[rstest]
    #[case(r#""Name"="data""#, Some(7))]
    #[case(r#""a\"b"=dword:1"#, Some(7))]
    #[case(r#"@="default""#, Some(2))]
    #[case(r#"[HKEY_CURRENT_USER\\Software]"#, None)]
    #[case("  00,01,02", None)]
    #[case(r#""unterminated"#, None)]
    fn test_value_data(#[case] line: &str, #[case] expected: Option<usize>) {
        assert_eq!(value_data(line), expected);
    }

    #[test]
    fn test_render() {
        assert_eq!(
            identity().render("{ROOT_DIR}/drive_c/users/{USER} on {HOSTNAME}"),
            "/home/alice/.wine/drive_c/users/alice on workstation"
        );
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let identity = Identity::new("bob", "", "");
        assert_eq!(identity.templatize("/home/bob/"), "/home/{USER}/");
        assert_eq!(identity.templatize(r#""Host"="""#), r#""Host"="""#);
        assert_eq!(identity.render("{HOSTNAME}"), "");
    }

    #[test]
    fn test_detect_keeps_user_and_root() {
        let identity = Identity::detect("alice", "/tmp/prefix");
        assert_eq!(identity.user(), "alice");
        assert_eq!(identity.root_dir(), "/tmp/prefix");
    }
}
