//! Parsing of `rm` commands for self-cleanup approval.
//!
//! The parser is deliberately narrow: anything it cannot resolve to a
//! literal list of paths yields no paths, which sends the request to the
//! operator instead of approving it.

use std::path::{Path, PathBuf};

use crate::util::normalize_path;

const GLOB_CHARS: &[char] = &['*', '?', '['];
const OPERATOR_CHARS: &[char] = &[';', '|', '&', '<', '>', '(', ')', '\n'];

#[derive(Debug, Default)]
struct Word {
    text: String,
    /// Unquoted leading `~`, which the shell would expand.
    tilde: bool,
    started: bool,
}

/// Split a command line into words, honouring quotes and backslashes.
///
/// Returns `None` when the line uses shell features whose effect cannot be
/// known statically: unquoted operators, `$` expansions or backticks.
fn tokenize(command: &str) -> Option<Vec<Word>> {
    #[derive(PartialEq)]
    enum State {
        Normal,
        Single,
        Double,
    }

    let mut words = Vec::new();
    let mut current = Word::default();
    let mut state = State::Normal;
    let mut chars = command.chars();

    while let Some(ch) = chars.next() {
        match state {
            State::Normal => match ch {
                c if c.is_whitespace() && c != '\n' => {
                    if current.started {
                        words.push(std::mem::take(&mut current));
                    }
                }
                '\'' => {
                    current.started = true;
                    state = State::Single;
                }
                '"' => {
                    current.started = true;
                    state = State::Double;
                }
                '\\' => {
                    current.started = true;
                    current.text.push(chars.next()?);
                }
                '$' | '`' => return None,
                c if OPERATOR_CHARS.contains(&c) => return None,
                '~' if !current.started => {
                    current.started = true;
                    current.tilde = true;
                    current.text.push('~');
                }
                c => {
                    current.started = true;
                    current.text.push(c);
                }
            },
            State::Single => match ch {
                '\'' => state = State::Normal,
                c => current.text.push(c),
            },
            State::Double => match ch {
                '"' => state = State::Normal,
                '$' | '`' => return None,
                '\\' => {
                    let next = chars.next()?;
                    if !matches!(next, '"' | '\\' | '$' | '`') {
                        current.text.push('\\');
                    }
                    current.text.push(next);
                }
                c => current.text.push(c),
            },
        }
    }

    if state != State::Normal {
        return None;
    }
    if current.started {
        words.push(current);
    }
    Some(words)
}

fn is_rm(program: &str) -> bool {
    program == "rm" || program.ends_with("/rm")
}

/// Absolute target paths of an `rm` command, or nothing.
///
/// `"rm -rf a b"` run in `/repo` yields `/repo/a` and `/repo/b`. Any
/// wildcard, expansion or operator yields an empty list.
pub fn parse_rm_command(command: &str, cwd: &Path) -> Vec<PathBuf> {
    let Some(words) = tokenize(command) else {
        return Vec::new();
    };
    let mut iter = words.into_iter();
    match iter.next() {
        Some(program) if is_rm(&program.text) => {}
        _ => return Vec::new(),
    }

    let mut targets = Vec::new();
    let mut options_done = false;
    for word in iter {
        if !options_done && word.text == "--" {
            options_done = true;
            continue;
        }
        if !options_done && word.text.starts_with('-') && word.text.len() > 1 {
            continue;
        }
        if word.tilde || word.text.contains(GLOB_CHARS) || word.text.is_empty() {
            return Vec::new();
        }
        let path = Path::new(&word.text);
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        };
        targets.push(normalize_path(&absolute));
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(cmd: &str) -> Vec<PathBuf> {
        parse_rm_command(cmd, Path::new("/repo"))
    }

    #[test]
    fn test_rm_rf_two_paths() {
        assert_eq!(
            parse("rm -rf a b"),
            vec![PathBuf::from("/repo/a"), PathBuf::from("/repo/b")]
        );
    }

    #[test]
    fn test_wildcards_reject_everything() {
        assert!(parse("rm *.txt").is_empty());
        assert!(parse("rm a.txt b?.txt").is_empty());
        assert!(parse("rm 'file[1].txt'").is_empty());
    }

    #[test]
    fn test_quotes_and_escapes() {
        assert_eq!(
            parse(r#"rm "my file.txt" 'other file' third\ file"#),
            vec![
                PathBuf::from("/repo/my file.txt"),
                PathBuf::from("/repo/other file"),
                PathBuf::from("/repo/third file"),
            ]
        );
    }

    #[test]
    fn test_absolute_and_dot_segments() {
        assert_eq!(
            parse("rm /tmp/x ./src/../build/out.o"),
            vec![PathBuf::from("/tmp/x"), PathBuf::from("/repo/build/out.o")]
        );
    }

    #[test]
    fn test_double_dash_ends_options() {
        assert_eq!(
            parse("rm -f -- -weird"),
            vec![PathBuf::from("/repo/-weird")]
        );
    }

    #[test]
    fn test_non_rm_commands_yield_nothing() {
        assert!(parse("rmdir build").is_empty());
        assert!(parse("git rm a").is_empty());
        assert!(parse("").is_empty());
        assert_eq!(parse("/bin/rm a"), vec![PathBuf::from("/repo/a")]);
    }

    #[test]
    fn test_shell_features_reject() {
        assert!(parse("rm a; rm -rf /").is_empty());
        assert!(parse("rm a && echo done").is_empty());
        assert!(parse("rm $HOME/a").is_empty());
        assert!(parse("rm \"$(pwd)/a\"").is_empty());
        assert!(parse("rm `ls`").is_empty());
        assert!(parse("rm ~/a").is_empty());
        assert!(parse("rm 'unterminated").is_empty());
    }

    #[test]
    fn test_rm_without_targets() {
        assert!(parse("rm -rf").is_empty());
    }

    #[test]
    fn test_quoted_tilde_is_literal() {
        assert_eq!(parse("rm '~draft'"), vec![PathBuf::from("/repo/~draft")]);
    }
}
