use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

/// Characters that make a free-form argument token dangerous to ever place
/// in a scheduler submission script or argv, per §4.2.
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '`', '$', '(', ')', '<', '>', '{', '}', '!', '\\', '\n', '\r'];

fn flag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^--?[A-Za-z][\w-]*$").expect("valid flag regex"))
}

/// Splits a free-form argument string into tokens respecting single and
/// double quoting, the way a POSIX shell would before any substitution.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    for c in input.chars() {
        match quote {
            Some(q) if c == q => {
                quote = None;
            }
            Some(_) => current.push(c),
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

fn contains_metacharacter(token: &str) -> bool {
    token.chars().any(|c| SHELL_METACHARACTERS.contains(&c))
}

/// Parses and validates a free-form `additionalArguments` string (§4.2, B6).
/// Any token containing a shell metacharacter, or any flag-shaped token that
/// does not match the flag grammar, causes the *entire* string to be dropped
/// rather than partially applied — the caller gets back no tokens plus the
/// original string so it can record a warning, but the rest of the stage's
/// argv is built and submitted unchanged (scenario 6).
pub fn parse_additional_arguments(input: &str) -> (Vec<String>, Option<String>) {
    let tokens = tokenize(input);
    for token in &tokens {
        if contains_metacharacter(token) || (token.starts_with('-') && !flag_regex().is_match(token)) {
            return (Vec::new(), Some(input.to_string()));
        }
    }
    (tokens, None)
}

/// Derives `<projectRoot>/<StageKey>/Job###/`, the next free three-digit
/// index for the stage, creating the directory with mode 0755 if absent.
pub fn derive_output_dir(
    project_root: &Path,
    stage_dir_name: &str,
    job_index: u32,
) -> std::io::Result<PathBuf> {
    let dir = project_root
        .join(stage_dir_name)
        .join(format!("Job{:03}", job_index));
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_respects_quotes() {
        let tokens = tokenize(r#"--angpix 1.1 --note "hello world""#);
        assert_eq!(tokens, vec!["--angpix", "1.1", "--note", "hello world"]);
    }

    #[test]
    fn rejects_shell_metacharacters() {
        let (tokens, dropped) = parse_additional_arguments("--foo; rm -rf /");
        assert!(tokens.is_empty());
        assert_eq!(dropped.as_deref(), Some("--foo; rm -rf /"));
    }

    #[test]
    fn rejects_malformed_flag() {
        let (tokens, dropped) = parse_additional_arguments("--9bad");
        assert!(tokens.is_empty());
        assert_eq!(dropped.as_deref(), Some("--9bad"));
    }

    #[test]
    fn accepts_well_formed_arguments() {
        let (tokens, dropped) = parse_additional_arguments("--bin-size 2 -j 4");
        assert_eq!(tokens, vec!["--bin-size", "2", "-j", "4"]);
        assert!(dropped.is_none());
    }
}
