//! Reader for CMake `FetchContent_Declare` blocks.
//!
//! The tokenizer covers the parts of the CMake language a fetch file can
//! reasonably contain: command invocations, unquoted/quoted/bracket
//! arguments, escapes, line and bracket comments, and nested parentheses.
//! It does not evaluate anything: `${VAR}` stays literal.

use std::path::Path;

use crate::domain::CommitId;
use crate::error::ForgeError;

/// One CMake argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub value: String,
    pub kind: ArgumentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    Unquoted,
    Quoted,
    Bracket,
}

/// `name(args...)` with the line it starts on (1-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub name: String,
    pub args: Vec<Argument>,
    pub line: usize,
}

/// A `FetchContent_Declare(<name> ...)` block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchDeclaration {
    pub name: String,
    pub args: Vec<Argument>,
    pub line: usize,
}

impl FetchDeclaration {
    /// Argument following the first unquoted `key`
    pub fn value(&self, key: &str) -> Option<&Argument> {
        self.args
            .iter()
            .position(|a| a.kind == ArgumentKind::Unquoted && a.value == key)
            .and_then(|idx| self.args.get(idx + 1))
    }
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn error(&self, msg: impl std::fmt::Display) -> String {
        format!("line {}: {}", self.line, msg)
    }

    /// Length of `[==[` at the cursor, returning the `=` count
    fn bracket_open(&self) -> Option<usize> {
        if self.peek() != Some('[') {
            return None;
        }
        let mut eq = 0;
        while self.peek_at(1 + eq) == Some('=') {
            eq += 1;
        }
        (self.peek_at(1 + eq) == Some('[')).then_some(eq)
    }

    /// Consume a bracket block whose opener starts at the cursor
    fn bracket_body(&mut self, eq: usize) -> Result<String, String> {
        let start_line = self.line;
        for _ in 0..eq + 2 {
            self.bump();
        }
        // A newline right after the opener is not part of the content
        if self.peek() == Some('\n') {
            self.bump();
        }

        let mut body = String::new();
        loop {
            match self.bump() {
                None => {
                    return Err(format!("line {}: unterminated bracket", start_line));
                }
                Some(']') => {
                    let mut n = 0;
                    while self.peek_at(n) == Some('=') {
                        n += 1;
                    }
                    if n == eq && self.peek_at(n) == Some(']') {
                        for _ in 0..=n {
                            self.bump();
                        }
                        return Ok(body);
                    }
                    body.push(']');
                }
                Some(c) => body.push(c),
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), String> {
        // Cursor is on '#'
        self.bump();
        if let Some(eq) = self.bracket_open() {
            self.bracket_body(eq)?;
            return Ok(());
        }
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
        Ok(())
    }

    /// Skip whitespace and comments
    fn skip_trivia(&mut self) -> Result<(), String> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                self.skip_comment()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn escape(&mut self, out: &mut String) -> Result<(), String> {
        // Cursor is past '\'
        match self.bump() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            // Line continuation inside quoted arguments
            Some('\n') => {}
            Some(';') => out.push_str("\\;"),
            Some(c) => out.push(c),
            None => return Err(self.error("dangling escape")),
        }
        Ok(())
    }

    fn quoted(&mut self) -> Result<String, String> {
        let start_line = self.line;
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(format!("line {}: unterminated quoted argument", start_line)),
                Some('"') => return Ok(value),
                Some('\\') => self.escape(&mut value)?,
                Some(c) => value.push(c),
            }
        }
    }

    fn unquoted(&mut self) -> Result<String, String> {
        let mut value = String::new();
        while let Some(c) = self.peek() {
            match c {
                c if c.is_whitespace() => break,
                '(' | ')' | '#' => break,
                '"' => {
                    // Legacy `a"b c"d` form: quotes are literal inside unquoted text
                    self.bump();
                    value.push('"');
                }
                '\\' => {
                    self.bump();
                    self.escape(&mut value)?;
                }
                _ => {
                    self.bump();
                    value.push(c);
                }
            }
        }
        Ok(value)
    }

    fn identifier(&mut self) -> Option<String> {
        let c = self.peek()?;
        if !(c.is_ascii_alphabetic() || c == '_') {
            return None;
        }
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                ident.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Some(ident)
    }

    /// Arguments up to the matching ')', cursor past '('
    fn arguments(&mut self) -> Result<Vec<Argument>, String> {
        let mut args = Vec::new();
        let mut depth = 0usize;

        loop {
            self.skip_trivia()?;
            match self.peek() {
                None => return Err(self.error("unterminated command invocation")),
                Some(')') => {
                    self.bump();
                    if depth == 0 {
                        return Ok(args);
                    }
                    depth -= 1;
                    args.push(Argument {
                        value: ")".to_string(),
                        kind: ArgumentKind::Unquoted,
                    });
                }
                Some('(') => {
                    self.bump();
                    depth += 1;
                    args.push(Argument {
                        value: "(".to_string(),
                        kind: ArgumentKind::Unquoted,
                    });
                }
                Some('"') => args.push(Argument {
                    value: self.quoted()?,
                    kind: ArgumentKind::Quoted,
                }),
                Some(_) if self.bracket_open().is_some() => {
                    let eq = self.bracket_open().unwrap_or_default();
                    args.push(Argument {
                        value: self.bracket_body(eq)?,
                        kind: ArgumentKind::Bracket,
                    });
                }
                Some(_) => args.push(Argument {
                    value: self.unquoted()?,
                    kind: ArgumentKind::Unquoted,
                }),
            }
        }
    }
}

/// Tokenize a CMake file into command invocations
pub fn parse_commands(src: &str) -> Result<Vec<CommandInvocation>, String> {
    let mut lexer = Lexer::new(src);
    let mut commands = Vec::new();

    loop {
        lexer.skip_trivia()?;
        if lexer.peek().is_none() {
            return Ok(commands);
        }

        let line = lexer.line;
        let name = lexer
            .identifier()
            .ok_or_else(|| lexer.error(format!("expected a command name, found {:?}", lexer.peek())))?;

        // Spaces and tabs may separate the name from '('
        while matches!(lexer.peek(), Some(' ') | Some('\t')) {
            lexer.bump();
        }
        if lexer.peek() != Some('(') {
            return Err(lexer.error(format!("expected '(' after '{}'", name)));
        }
        lexer.bump();

        let args = lexer.arguments()?;
        commands.push(CommandInvocation { name, args, line });
    }
}

/// All `FetchContent_Declare` blocks in `src`
pub fn fetch_declarations(src: &str) -> Result<Vec<FetchDeclaration>, String> {
    Ok(parse_commands(src)?
        .into_iter()
        .filter(|c| c.name.eq_ignore_ascii_case("FetchContent_Declare"))
        .filter_map(|c| {
            let mut args = c.args.into_iter();
            let name = args.next()?.value;
            Some(FetchDeclaration {
                name,
                args: args.collect(),
                line: c.line,
            })
        })
        .collect())
}

/// The commit `GIT_TAG` of the declaration named `fetch_name` pins to
///
/// Content names compare case-insensitively, as FetchContent does.
pub fn pinned_commit(src: &str, fetch_name: &str) -> Result<CommitId, String> {
    let decl = fetch_declarations(src)?
        .into_iter()
        .find(|d| d.name.eq_ignore_ascii_case(fetch_name))
        .ok_or_else(|| format!("no FetchContent_Declare({} ...) found", fetch_name))?;

    let tag = decl.value("GIT_TAG").ok_or_else(|| {
        format!(
            "FetchContent_Declare({}) on line {} has no GIT_TAG",
            decl.name, decl.line
        )
    })?;

    if tag.value.contains("${") {
        return Err(format!(
            "GIT_TAG '{}' on line {} is a variable reference; only literal commit hashes can be pinned",
            tag.value, decl.line
        ));
    }

    tag.value.parse::<CommitId>().map_err(|e| {
        format!(
            "GIT_TAG on line {} is not a full commit hash: {}",
            decl.line, e
        )
    })
}

/// Read `path` and extract the pinned commit for `fetch_name`
pub fn read_pin(path: &Path, fetch_name: &str) -> Result<CommitId, ForgeError> {
    let src = std::fs::read_to_string(path).map_err(|e| ForgeError::ConfigParse {
        path: path.to_path_buf(),
        reason: format!("cannot read file: {}", e),
    })?;

    pinned_commit(&src, fetch_name).map_err(|reason| ForgeError::ConfigParse {
        path: path.to_path_buf(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FETCH_DEPS: &str = r#"
include(FetchContent)

# Pinned COLMAP revision (see README)
FetchContent_Declare(PoseLib
    GIT_REPOSITORY    https://github.com/PoseLib/PoseLib.git
    GIT_TAG           0439b2d361125915b8821043fca9376e6cc575b9
    EXCLUDE_FROM_ALL
)
message(STATUS "Configuring PoseLib... done")

#[[ FetchContent_Declare(COLMAP GIT_TAG 1111111111111111111111111111111111111111) ]]
FetchContent_Declare(COLMAP
    GIT_REPOSITORY    https://github.com/colmap/colmap.git
    GIT_TAG           B9b2e7A9c47c4e8a4d2f6e0d1a3b5c7d9e1f2a3b # main @ 2024-06
    EXCLUDE_FROM_ALL
)
if (FETCH_COLMAP)
    FetchContent_MakeAvailable(COLMAP)
endif()
"#;

    #[test]
    fn test_pinned_commit_skips_comments() {
        let commit = pinned_commit(FETCH_DEPS, "COLMAP").unwrap();
        assert_eq!(commit.as_str(), "b9b2e7a9c47c4e8a4d2f6e0d1a3b5c7d9e1f2a3b");
    }

    #[test]
    fn test_fetch_names_are_case_insensitive() {
        let commit = pinned_commit(FETCH_DEPS, "poselib").unwrap();
        assert_eq!(commit.short(), "0439b2d36112");
    }

    #[test]
    fn test_parse_commands_structure() {
        let commands = parse_commands(FETCH_DEPS).unwrap();
        let names: Vec<_> = commands.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "include",
                "FetchContent_Declare",
                "message",
                "FetchContent_Declare",
                "if",
                "FetchContent_MakeAvailable",
                "endif"
            ]
        );
        assert_eq!(commands[2].args[0].kind, ArgumentKind::Quoted);
        assert_eq!(commands[2].args[0].value, "Configuring PoseLib... done");
        assert_eq!(commands[3].line, 13);
    }

    #[test]
    fn test_quoted_and_bracket_arguments() {
        let src = "FetchContent_Declare(\"Ceres\"\n GIT_TAG \"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\"\n URL [=[https://x/y]]z]=])";
        let decls = fetch_declarations(src).unwrap();
        assert_eq!(decls[0].name, "Ceres");
        assert_eq!(decls[0].value("URL").unwrap().value, "https://x/y]]z");
        assert_eq!(pinned_commit(src, "ceres").unwrap().as_str(), "a".repeat(40));
    }

    #[test]
    fn test_nested_parentheses() {
        let commands = parse_commands("if((A OR B) AND C)\nendif()").unwrap();
        let values: Vec<_> = commands[0].args.iter().map(|a| a.value.as_str()).collect();
        assert_eq!(values, vec!["(", "A", "OR", "B", ")", "AND", "C"]);
    }

    #[test]
    fn test_escapes() {
        let commands = parse_commands(r#"set(X "a\"b\\c\nd" e\ f)"#).unwrap();
        assert_eq!(commands[0].args[1].value, "a\"b\\c\nd");
        assert_eq!(commands[0].args[2].value, "e f");
    }

    #[test]
    fn test_missing_or_unusable_tag() {
        let err = pinned_commit(FETCH_DEPS, "glog").unwrap_err();
        assert!(err.contains("no FetchContent_Declare"));

        let no_tag = "FetchContent_Declare(COLMAP GIT_REPOSITORY https://x)";
        assert!(pinned_commit(no_tag, "COLMAP").unwrap_err().contains("no GIT_TAG"));

        let var = "FetchContent_Declare(COLMAP GIT_TAG ${COLMAP_REF})";
        assert!(pinned_commit(var, "COLMAP")
            .unwrap_err()
            .contains("variable reference"));

        let branch = "FetchContent_Declare(COLMAP GIT_TAG main)";
        assert!(pinned_commit(branch, "COLMAP")
            .unwrap_err()
            .contains("not a full commit hash"));
    }

    #[test]
    fn test_malformed_input() {
        assert!(parse_commands("FetchContent_Declare(COLMAP").is_err());
        assert!(parse_commands("set(X \"open)").is_err());
        assert!(parse_commands("#[[ never closed").is_err());
        assert!(parse_commands("(orphan)").is_err());
    }

    #[test]
    fn test_read_pin_missing_file() {
        let err = read_pin(Path::new("/definitely/not/here.cmake"), "COLMAP").unwrap_err();
        assert!(matches!(err, ForgeError::ConfigParse { .. }));
    }
}
