//! Directory sandbox guard
//!
//! Checks change-directory commands against a session's working root before
//! they reach the shell. A `cd` whose target resolves outside the root is
//! dropped and never executed.
//!
//! # Limits
//!
//! This guard is advisory. It only inspects commands that are lexically a
//! directory change (`cd`, `pushd`, optionally behind `builtin`/`command`).
//! Everything else passes through untouched, so `ls ..`, `cat ../../etc/passwd`,
//! scripts, functions, `eval` and `source` can still reach outside the root.
//! It is not a security boundary.
//!
//! # Tracking
//!
//! The guard follows the shell's current directory from the lines it lets
//! through. Only a `cd` the shell is sure to run in its own process moves
//! the tracked directory: one outside any subshell, pipeline, background
//! list or `if`/`case`/`{}` group, first in its `&&`/`||` list, and preceded
//! on the line by nothing but other directory changes. Any other `cd`, and
//! every `popd`, widens the tracked directory to a common ancestor instead,
//! so it is always the real directory or above it. While it is only an
//! ancestor, relative targets that step above the root on the way are
//! denied; an absolute `cd` to an existing directory makes it exact again.
//! A `cd` inside a loop is always denied.
//!
//! A line that leaves a construct open (a subshell, quote, here-document or
//! trailing `&&`) is held and checked together with the lines after it, the
//! same way the shell reads them.

use std::iter::Peekable;
use std::path::{Component, Path, PathBuf};
use std::str::Chars;

/// Longest unfinished input held for the lines that complete it
const MAX_PENDING: usize = 1024 * 1024;

/// Outcome of checking a single directory change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChdirVerdict {
    /// The target is the root or inside it
    Allowed(PathBuf),
    /// The target is outside the root or cannot be determined
    Denied,
}

impl ChdirVerdict {
    /// Check if the change was allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, ChdirVerdict::Allowed(_))
    }
}

/// Outcome of checking a full command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandVerdict {
    /// Forward the command to the shell
    Pass,
    /// Drop the command; `requested` is the offending argument
    Denied { requested: String },
}

/// Check a directory change requested relative to `root`
///
/// Denies unless `requested`, resolved against `root` with `.`/`..`
/// collapsed and symlinks followed along the part that exists, is `root`
/// itself or a descendant of it. The comparison is per path component, so a
/// sibling sharing a string prefix (`/srv/session_alice_2` next to
/// `/srv/session_alice`) is denied.
pub fn check_chdir(root: &Path, requested: &str) -> ChdirVerdict {
    let root = resolve_path(root);
    match Target::parse_literal(requested) {
        Some(target) => resolve_target(&root, &root, None, &target),
        None => ChdirVerdict::Denied,
    }
}

/// Stateful guard for one session
#[derive(Debug, Clone)]
pub struct SandboxGuard {
    root: PathBuf,
    location: Location,
    /// Earlier lines of a construct the shell is still reading
    pending: String,
}

impl SandboxGuard {
    /// Create a guard for a working root; the shell starts in the root
    pub fn new(root: &Path) -> Self {
        let root = resolve_path(root);
        Self {
            location: Location::exact(root.clone()),
            root,
            pending: String::new(),
        }
    }

    /// The resolved working root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory the shell is believed to be in, or an ancestor of it
    pub fn cwd(&self) -> &Path {
        &self.location.cwd
    }

    /// Check a command line
    ///
    /// Every directory change in the line is checked in order, each relative
    /// to where the earlier ones would have left the shell. If any is
    /// denied the whole line is denied and nothing about it is remembered.
    pub fn check_command(&mut self, line: &str) -> CommandVerdict {
        let mut text = String::with_capacity(self.pending.len() + line.len() + 1);
        text.push_str(&self.pending);
        text.push_str(line);
        text.push('\n');
        if text.len() > MAX_PENDING {
            return CommandVerdict::Denied {
                requested: "unfinished input too long to check".to_string(),
            };
        }

        let lexed = tokenize(&text);
        let mut walk = Walk::new(&self.root, self.location.clone());
        let mut words = Vec::new();
        for token in lexed.tokens {
            match token {
                Token::Word(word) => words.push(word),
                Token::Op(op) => {
                    if let Err(requested) = walk.command(&std::mem::take(&mut words)) {
                        return CommandVerdict::Denied { requested };
                    }
                    walk.operator(op);
                }
            }
        }
        if let Err(requested) = walk.command(&words) {
            return CommandVerdict::Denied { requested };
        }

        match walk.finish(lexed.incomplete) {
            Some(location) => {
                self.location = location;
                self.pending.clear();
            }
            None => self.pending = text,
        }
        CommandVerdict::Pass
    }
}

/// Where the shell is believed to be
#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    cwd: PathBuf,
    /// Target of `cd -`
    previous: Option<PathBuf>,
    /// False once `cwd` and `previous` may only be ancestors of the real ones
    exact: bool,
}

impl Location {
    fn exact(cwd: PathBuf) -> Self {
        Self {
            cwd,
            previous: None,
            exact: true,
        }
    }

    /// The narrowest location covering both `self` and `other`
    fn widen(&self, other: &Location) -> Location {
        if self == other {
            return self.clone();
        }
        Location {
            cwd: common_ancestor(&self.cwd, &other.cwd),
            previous: match (&self.previous, &other.previous) {
                (Some(a), Some(b)) => Some(common_ancestor(a, b)),
                _ => None,
            },
            exact: false,
        }
    }

    /// Location after an allowed change to `target`
    ///
    /// `certain` means the change runs in the shell itself.
    fn change_to(&self, target: PathBuf, absolute: bool, certain: bool) -> Location {
        if certain && (self.exact || absolute) {
            if !target.is_dir() {
                // The shell's cd fails and it stays put
                return self.clone();
            }
            return Location {
                previous: self.exact.then(|| self.cwd.clone()),
                cwd: target,
                exact: true,
            };
        }
        self.widen(&Location {
            previous: Some(self.cwd.clone()),
            cwd: target,
            exact: self.exact,
        })
    }
}

fn common_ancestor(a: &Path, b: &Path) -> PathBuf {
    a.components()
        .zip(b.components())
        .take_while(|(x, y)| x == y)
        .map(|(x, _)| x)
        .collect()
}

/// Walk state outside a subshell
#[derive(Debug)]
struct Enclosing {
    here: Location,
    list_start: Location,
    element_start: Location,
    pipeline_start: Option<Location>,
    conditional: bool,
}

/// Follows one complete input from a starting location
#[derive(Debug)]
struct Walk<'a> {
    root: &'a Path,
    here: Location,
    /// Start of the current `&&`/`||` list, restored if it is backgrounded
    list_start: Location,
    /// Start of the current pipeline element
    element_start: Location,
    /// Start of the pipeline being walked, if any
    pipeline_start: Option<Location>,
    /// The next command depends on the status of the previous one
    conditional: bool,
    /// The input cannot end here (after `&&`, `||` or `|`)
    dangling: bool,
    /// Something other than a directory change has been seen
    other_commands: bool,
    compounds: usize,
    loops: usize,
    cases: usize,
    subshells: Vec<Enclosing>,
}

impl<'a> Walk<'a> {
    fn new(root: &'a Path, start: Location) -> Self {
        Self {
            root,
            list_start: start.clone(),
            element_start: start.clone(),
            here: start,
            pipeline_start: None,
            conditional: false,
            dangling: false,
            other_commands: false,
            compounds: 0,
            loops: 0,
            cases: 0,
            subshells: Vec::new(),
        }
    }

    /// Check one simple command; `Err` carries the denied argument
    fn command(&mut self, words: &[Word]) -> Result<(), String> {
        if words.is_empty() {
            return Ok(());
        }
        self.dangling = false;

        let mut rest = words;
        while let Some((first, tail)) = rest.split_first() {
            match first.text.as_str() {
                "if" | "{" => self.compounds += 1,
                "while" | "until" => {
                    self.compounds += 1;
                    self.loops += 1;
                }
                // Followed by a name and words, not a command
                "for" | "select" => {
                    self.compounds += 1;
                    self.loops += 1;
                    return Ok(());
                }
                "case" => {
                    self.compounds += 1;
                    self.cases += 1;
                    return Ok(());
                }
                "fi" | "}" => self.compounds = self.compounds.saturating_sub(1),
                "done" => {
                    self.compounds = self.compounds.saturating_sub(1);
                    self.loops = self.loops.saturating_sub(1);
                }
                "esac" => {
                    self.compounds = self.compounds.saturating_sub(1);
                    self.cases = self.cases.saturating_sub(1);
                }
                "function" => {
                    rest = tail.get(1..).unwrap_or(&[]);
                    continue;
                }
                "then" | "elif" | "else" | "do" | "!" | "time" => {}
                _ => break,
            }
            rest = tail;
        }

        let Some((name, _)) = command_name(rest) else {
            return Ok(());
        };
        if !name.dynamic && name.text == "popd" {
            // Back to some directory on the stack; only the root is known to be above it
            self.here = Location {
                cwd: self.root.to_path_buf(),
                previous: None,
                exact: false,
            };
            return Ok(());
        }
        let Some(request) = chdir_request(rest) else {
            self.other_commands = true;
            return Ok(());
        };
        if self.loops > 0 {
            return Err(request.display());
        }

        let target = match &request {
            ChdirRequest::To(word) => Target::from_word(word),
            ChdirRequest::Home => Some(Target::Home(None)),
            ChdirRequest::Unverifiable(_) => None,
        };
        let Some(target) = target else {
            return Err(request.display());
        };
        let ChdirVerdict::Allowed(destination) = self.resolve(&target) else {
            return Err(request.display());
        };

        let certain = self.compounds == 0
            && !self.conditional
            && self.pipeline_start.is_none()
            && !self.other_commands;
        self.here = self
            .here
            .change_to(destination, target.is_absolute(), certain);
        Ok(())
    }

    fn resolve(&self, target: &Target) -> ChdirVerdict {
        if let Target::Path(path) = target {
            if !self.here.exact
                && Path::new(path).is_relative()
                && climbs_above(self.root, &self.here.cwd, path)
            {
                return ChdirVerdict::Denied;
            }
        }
        resolve_target(
            self.root,
            &self.here.cwd,
            self.here.previous.as_deref(),
            target,
        )
    }

    fn operator(&mut self, op: Op) {
        match op {
            // Case patterns use bare parentheses
            Op::Open | Op::Close if self.cases > 0 => {}
            Op::Open => {
                let outer = Enclosing {
                    here: self.here.clone(),
                    list_start: std::mem::replace(&mut self.list_start, self.here.clone()),
                    element_start: std::mem::replace(&mut self.element_start, self.here.clone()),
                    pipeline_start: self.pipeline_start.take(),
                    conditional: std::mem::take(&mut self.conditional),
                };
                self.subshells.push(outer);
            }
            Op::Close => {
                if let Some(outer) = self.subshells.pop() {
                    self.here = outer.here;
                    self.list_start = outer.list_start;
                    self.element_start = outer.element_start;
                    self.pipeline_start = outer.pipeline_start;
                    self.conditional = outer.conditional;
                    self.dangling = false;
                }
            }
            // A newline after `&&`, `||` or `|` continues the list
            Op::Sequence if self.dangling => {}
            Op::Sequence => {
                self.end_pipeline();
                self.conditional = false;
                self.list_start = self.here.clone();
                self.element_start = self.here.clone();
            }
            Op::And | Op::Or => {
                self.end_pipeline();
                self.conditional = true;
                self.dangling = true;
                self.element_start = self.here.clone();
            }
            Op::Background => {
                self.end_pipeline();
                // The whole list ran in a subshell of its own
                self.here = self.list_start.clone();
                self.conditional = false;
                self.element_start = self.here.clone();
            }
            Op::Pipe => {
                if self.pipeline_start.is_none() {
                    self.pipeline_start = Some(self.element_start.clone());
                }
                // Every element but possibly the last runs in a subshell
                if let Some(start) = &self.pipeline_start {
                    self.here = start.clone();
                }
                self.dangling = true;
                self.element_start = self.here.clone();
            }
        }
    }

    /// The last element of a pipeline may run in the shell itself
    fn end_pipeline(&mut self) {
        if let Some(start) = self.pipeline_start.take() {
            self.here = start.widen(&self.here);
        }
    }

    /// Final location, or `None` while the shell still waits for more input
    fn finish(mut self, incomplete: bool) -> Option<Location> {
        self.end_pipeline();
        let open = incomplete || self.dangling || self.compounds > 0 || !self.subshells.is_empty();
        (!open).then_some(self.here)
    }
}

/// Whether walking `relative` from `cwd` steps above `root` at any point
fn climbs_above(root: &Path, cwd: &Path, relative: &str) -> bool {
    let mut at = cwd.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::ParentDir => {
                at.pop();
                if !at.starts_with(root) {
                    return true;
                }
            }
            Component::Normal(name) => at.push(name),
            _ => {}
        }
    }
    false
}

/// A word as the shell would see it after quote removal
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Word {
    text: String,
    /// Contains expansions whose result cannot be known here
    dynamic: bool,
    /// Starts with an unquoted `~`
    tilde: bool,
}

/// Resolvable form of a directory argument
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Path(String),
    /// `~` or `~/rest`
    Home(Option<String>),
    /// `-`
    Previous,
}

impl Target {
    fn from_word(word: &Word) -> Option<Self> {
        if word.dynamic {
            return None;
        }
        if word.tilde {
            return Self::parse_tilde(&word.text);
        }
        if word.text == "-" {
            return Some(Target::Previous);
        }
        Some(Target::Path(word.text.clone()))
    }

    /// Interpret a bare argument string with shell tilde and dash rules
    fn parse_literal(arg: &str) -> Option<Self> {
        let arg = arg.trim();
        if arg == "-" {
            return Some(Target::Previous);
        }
        if arg.starts_with('~') {
            return Self::parse_tilde(arg);
        }
        Some(Target::Path(arg.to_string()))
    }

    fn parse_tilde(text: &str) -> Option<Self> {
        match text.strip_prefix('~') {
            Some("") => Some(Target::Home(None)),
            Some(rest) if rest.starts_with('/') => Some(Target::Home(Some(rest[1..].to_string()))),
            // ~user and friends
            _ => None,
        }
    }

    /// Resolves the same wherever the shell is
    fn is_absolute(&self) -> bool {
        match self {
            Target::Path(p) => Path::new(p).is_absolute(),
            Target::Home(_) => true,
            Target::Previous => false,
        }
    }
}

fn resolve_target(
    root: &Path,
    cwd: &Path,
    previous: Option<&Path>,
    target: &Target,
) -> ChdirVerdict {
    let candidate = match target {
        Target::Path(p) if p.is_empty() => return ChdirVerdict::Denied,
        Target::Path(p) => cwd.join(p),
        Target::Home(rest) => {
            let Some(home) = std::env::var_os("HOME") else {
                return ChdirVerdict::Denied;
            };
            let home = PathBuf::from(home);
            match rest {
                Some(rest) => home.join(rest),
                None => home,
            }
        }
        Target::Previous => match previous {
            Some(p) => p.to_path_buf(),
            None => return ChdirVerdict::Denied,
        },
    };

    let resolved = resolve_path(&candidate);
    if resolved.starts_with(root) {
        ChdirVerdict::Allowed(resolved)
    } else {
        ChdirVerdict::Denied
    }
}

/// Normalize a path
///
/// Collapses `.` and `..` first, then follows symlinks through the longest
/// prefix that exists and keeps the rest as written.
fn resolve_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                // `..` at the filesystem root stays at the root
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }

    for ancestor in normalized.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            let rest = normalized.strip_prefix(ancestor).unwrap_or(Path::new(""));
            if rest.as_os_str().is_empty() {
                return canonical;
            }
            return canonical.join(rest);
        }
    }
    normalized
}

#[derive(Debug)]
enum ChdirRequest {
    To(Word),
    /// `cd` with no directory argument
    Home,
    /// A form whose destination cannot be computed (`pushd` rotations etc.)
    Unverifiable(String),
}

impl ChdirRequest {
    fn display(&self) -> String {
        match self {
            ChdirRequest::To(word) => word.text.clone(),
            ChdirRequest::Home => "~".to_string(),
            ChdirRequest::Unverifiable(text) => text.clone(),
        }
    }
}

/// The command word of a simple command and its arguments
///
/// Skips variable assignments and `builtin`/`command` prefixes.
fn command_name(words: &[Word]) -> Option<(&Word, &[Word])> {
    let start = words.iter().position(|w| {
        !is_assignment(w) && (w.dynamic || !matches!(w.text.as_str(), "builtin" | "command"))
    })?;
    Some((&words[start], &words[start + 1..]))
}

fn is_assignment(word: &Word) -> bool {
    match word.text.split_once('=') {
        Some((name, _)) => {
            !name.is_empty()
                && !name.starts_with(|c: char| c.is_ascii_digit())
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// Recognize a directory change in one simple command
fn chdir_request(words: &[Word]) -> Option<ChdirRequest> {
    let (name, args) = command_name(words)?;
    if name.dynamic {
        return None;
    }
    let is_pushd = match name.text.as_str() {
        "cd" => false,
        "pushd" => true,
        _ => return None,
    };

    let mut options_done = false;
    for word in args {
        if !options_done && !word.dynamic {
            match word.text.as_str() {
                "--" => {
                    options_done = true;
                    continue;
                }
                "-L" | "-P" | "-e" | "-@" | "-Pe" | "-eP" if !is_pushd => continue,
                "-n" if is_pushd => continue,
                text if is_pushd && (text.starts_with('+') || text.starts_with('-')) => {
                    return Some(ChdirRequest::Unverifiable(text.to_string()));
                }
                _ => {}
            }
        }
        return Some(ChdirRequest::To(word.clone()));
    }

    if is_pushd {
        Some(ChdirRequest::Unverifiable("pushd".to_string()))
    } else {
        Some(ChdirRequest::Home)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(Word),
    Op(Op),
}

/// Control operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    /// `;`, `;;` or a newline
    Sequence,
    And,
    Or,
    /// A lone `&`
    Background,
    /// `|` or `|&`
    Pipe,
    Open,
    Close,
}

#[derive(Debug, Default)]
struct Lexed {
    tokens: Vec<Token>,
    /// Ended inside a quote, a line continuation or a here-document
    incomplete: bool,
}

/// Split shell input into words and control operators
///
/// Handles quotes, backslash escapes, comments, redirections containing `&`
/// and here-document bodies. Anything the shell would expand (`$`,
/// backticks, unquoted globs) marks the word as dynamic.
fn tokenize(text: &str) -> Lexed {
    let mut lexed = Lexed::default();
    let mut word = Word::default();
    let mut in_word = false;
    let mut heredocs: Vec<(String, bool)> = Vec::new();
    let mut chars = text.chars().peekable();

    fn finish_word(tokens: &mut Vec<Token>, word: &mut Word, in_word: &mut bool) {
        if *in_word {
            tokens.push(Token::Word(std::mem::take(word)));
            *in_word = false;
        }
    }

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                let mut closed = false;
                for q in chars.by_ref() {
                    if q == '\'' {
                        closed = true;
                        break;
                    }
                    word.text.push(q);
                }
                lexed.incomplete |= !closed;
            }
            '"' => {
                in_word = true;
                let mut closed = false;
                while let Some(q) = chars.next() {
                    match q {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('\n') | None => {}
                            Some(escaped) => word.text.push(escaped),
                        },
                        '$' | '`' => {
                            word.dynamic = true;
                            word.text.push(q);
                        }
                        _ => word.text.push(q),
                    }
                }
                lexed.incomplete |= !closed;
            }
            '\\' => match chars.next() {
                // Line continuation
                Some('\n') => lexed.incomplete |= chars.peek().is_none(),
                Some(escaped) => {
                    in_word = true;
                    word.text.push(escaped);
                }
                None => {}
            },
            '#' if !in_word => {
                while chars.next_if(|&n| n != '\n').is_some() {}
            }
            '~' if !in_word => {
                in_word = true;
                word.tilde = true;
                word.text.push(c);
            }
            '$' | '`' | '*' | '?' | '[' | '{' => {
                in_word = true;
                word.dynamic = true;
                word.text.push(c);
            }
            '<' if chars.next_if_eq(&'<').is_some() => {
                if chars.next_if_eq(&'<').is_some() {
                    // Here-string
                    in_word = true;
                    word.text.push_str("<<<");
                } else {
                    let strip_tabs = chars.next_if_eq(&'-').is_some();
                    finish_word(&mut lexed.tokens, &mut word, &mut in_word);
                    while chars.next_if(|&n| n == ' ' || n == '\t').is_some() {}
                    let delimiter = read_delimiter(&mut chars);
                    if !delimiter.is_empty() {
                        heredocs.push((delimiter, strip_tabs));
                    }
                }
            }
            ';' => {
                finish_word(&mut lexed.tokens, &mut word, &mut in_word);
                // `;;`, `;&` and `;;&` end case arms
                chars.next_if_eq(&';');
                chars.next_if_eq(&'&');
                lexed.tokens.push(Token::Op(Op::Sequence));
            }
            // `2>&1`, `<&3`
            '&' if in_word && (word.text.ends_with('>') || word.text.ends_with('<')) => {
                word.text.push(c)
            }
            // `&>file`
            '&' if chars.peek() == Some(&'>') => {
                in_word = true;
                word.text.push(c);
            }
            '&' => {
                finish_word(&mut lexed.tokens, &mut word, &mut in_word);
                let op = if chars.next_if_eq(&'&').is_some() {
                    Op::And
                } else {
                    Op::Background
                };
                lexed.tokens.push(Token::Op(op));
            }
            '|' => {
                finish_word(&mut lexed.tokens, &mut word, &mut in_word);
                let op = if chars.next_if_eq(&'|').is_some() {
                    Op::Or
                } else {
                    chars.next_if_eq(&'&');
                    Op::Pipe
                };
                lexed.tokens.push(Token::Op(op));
            }
            '(' | ')' => {
                finish_word(&mut lexed.tokens, &mut word, &mut in_word);
                let op = if c == '(' { Op::Open } else { Op::Close };
                lexed.tokens.push(Token::Op(op));
            }
            '\n' => {
                finish_word(&mut lexed.tokens, &mut word, &mut in_word);
                lexed.tokens.push(Token::Op(Op::Sequence));
                for (delimiter, strip_tabs) in heredocs.drain(..) {
                    lexed.incomplete |= !skip_heredoc(&mut chars, &delimiter, strip_tabs);
                }
            }
            c if c.is_whitespace() => finish_word(&mut lexed.tokens, &mut word, &mut in_word),
            _ => {
                in_word = true;
                word.text.push(c);
            }
        }
    }

    finish_word(&mut lexed.tokens, &mut word, &mut in_word);
    lexed.incomplete |= !heredocs.is_empty();
    lexed
}

/// Read a here-document delimiter with its quotes removed
fn read_delimiter(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut delimiter = String::new();
    while let Some(&c) = chars.peek() {
        match c {
            '\'' | '"' => {
                chars.next();
                while let Some(q) = chars.next_if(|&q| q != c) {
                    delimiter.push(q);
                }
                chars.next();
            }
            '\\' => {
                chars.next();
                if let Some(escaped) = chars.next() {
                    delimiter.push(escaped);
                }
            }
            other if other.is_whitespace() || ";&|()<>".contains(other) => break,
            other => {
                delimiter.push(other);
                chars.next();
            }
        }
    }
    delimiter
}

/// Skip a here-document body; false if the input ends before its delimiter
fn skip_heredoc(chars: &mut Peekable<Chars<'_>>, delimiter: &str, strip_tabs: bool) -> bool {
    while chars.peek().is_some() {
        let line: String = chars.by_ref().take_while(|&c| c != '\n').collect();
        let line = if strip_tabs {
            line.trim_start_matches('\t')
        } else {
            line.as_str()
        };
        if line == delimiter {
            return true;
        }
    }
    false
}
