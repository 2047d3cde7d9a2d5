//! `CommandLexer` (spec §4.5): a pure function family over a bash command
//! line. Intentionally not a full POSIX shell parser — see spec §9's design
//! note — but handles the quoting, combinator-splitting, redirection-elision
//! and refspec/flag classification the policy rules need.

/// Whether quote characters are retained in yielded tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteMode {
    /// Retain surrounding quote characters, so `'--no-verify'` stays a
    /// distinct token from the bare flag `--no-verify` (used for exact-match
    /// flag detection, spec's R1 example).
    Keep,
    /// Strip quote characters, so `'main'` and `main` compare equal (used for
    /// branch-name comparisons).
    Strip,
}

/// Tokenize a single command string: whitespace separates tokens outside
/// quotes; single quotes are literal; double quotes consume to the matching
/// quote without expansion.
pub fn tokenize(input: &str, mode: QuoteMode) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut has_current = false;
    let mut chars = input.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                quote = None;
                if mode == QuoteMode::Keep {
                    current.push(c);
                }
                has_current = true;
            }
            Some(_) => {
                current.push(c);
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    if mode == QuoteMode::Keep {
                        current.push(c);
                    }
                    has_current = true;
                }
                c if c.is_whitespace() => {
                    if has_current {
                        tokens.push(std::mem::take(&mut current));
                        has_current = false;
                    }
                }
                c => {
                    current.push(c);
                    has_current = true;
                }
            },
        }
    }
    if has_current {
        tokens.push(current);
    }
    tokens
}

/// One top-level shell combinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    And,
    Or,
    Semicolon,
    Pipe,
    Background,
}

/// Split a command line into independently-evaluable sub-commands at `&&`,
/// `||`, `;`, `|`, and a trailing `&`, ignoring combinator characters inside
/// quotes or inside balanced parens. Subshell parens wrapping a whole
/// sub-command are stripped; redirection idioms are elided from each
/// sub-command's tokens.
pub fn split_shell_commands(input: &str) -> Vec<String> {
    let raw_segments = split_top_level(input);
    raw_segments
        .into_iter()
        .map(|seg| strip_subshell_parens(seg.trim()))
        .map(|seg| {
            let tokens = tokenize(&seg, QuoteMode::Keep);
            strip_redirections(tokens).join(" ")
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn split_top_level(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut paren_depth: i32 = 0;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                current.push(c);
                i += 1;
            }
            '(' => {
                paren_depth += 1;
                current.push(c);
                i += 1;
            }
            ')' => {
                paren_depth = (paren_depth - 1).max(0);
                current.push(c);
                i += 1;
            }
            _ if paren_depth == 0 => {
                if let Some((combinator, len)) = match_combinator(&chars, i) {
                    if !current.trim().is_empty() {
                        segments.push(std::mem::take(&mut current));
                    } else {
                        current.clear();
                    }
                    i += len;
                    let _ = combinator;
                } else {
                    current.push(c);
                    i += 1;
                }
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }
    if !current.trim().is_empty() {
        segments.push(current);
    }
    segments
}

fn match_combinator(chars: &[char], i: usize) -> Option<(Combinator, usize)> {
    let c = chars[i];
    let next = chars.get(i + 1).copied();
    match (c, next) {
        ('&', Some('&')) => Some((Combinator::And, 2)),
        ('|', Some('|')) => Some((Combinator::Or, 2)),
        (';', _) => Some((Combinator::Semicolon, 1)),
        ('|', _) => Some((Combinator::Pipe, 1)),
        ('&', _) => Some((Combinator::Background, 1)),
        _ => None,
    }
}

/// Strip one layer of wrapping parens, but only when the first `(` matches
/// the last `)` (i.e. the whole segment is one subshell, not `(a) (b)`).
fn strip_subshell_parens(segment: &str) -> String {
    let trimmed = segment.trim();
    if !trimmed.starts_with('(') || !trimmed.ends_with(')') {
        return trimmed.to_string();
    }
    let mut depth = 0i32;
    let chars: Vec<char> = trimmed.chars().collect();
    for (idx, &c) in chars.iter().enumerate() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && idx != chars.len() - 1 {
                    // Closes before the end: not a single wrapping subshell.
                    return trimmed.to_string();
                }
            }
            _ => {}
        }
    }
    strip_subshell_parens(&trimmed[1..trimmed.len() - 1])
}

/// Remove redirection tokens (`>&1`, `2>&1`, `>file`, bare `>` + target, ...)
/// from an already-tokenized sub-command.
fn strip_redirections(tokens: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let t = unquote(&tokens[i]);
        if is_glued_redirection(&t) {
            i += 1;
            continue;
        }
        if is_bare_redirection_operator(&t) {
            i += 2;
            continue;
        }
        out.push(tokens[i].clone());
        i += 1;
    }
    out
}

fn unquote(token: &str) -> String {
    tokenize(token, QuoteMode::Strip).join("")
}

/// A redirection token that already carries its target glued on, e.g.
/// `>&1`, `2>&1`, `1>&2`, `>file`, `2>/dev/null`, `&>all.log`.
fn is_glued_redirection(t: &str) -> bool {
    if matches!(t, ">&1" | ">&2" | "2>&1" | "1>&2") {
        return true;
    }
    const PREFIXES: &[&str] = &["2>&", "1>&", ">&", "2>", "1>", "&>", ">"];
    for prefix in PREFIXES {
        if t.starts_with(prefix) && t.len() > prefix.len() {
            return true;
        }
    }
    false
}

/// A bare redirection operator whose target is the *next* token, e.g.
/// `git push > out.log` tokenizes to `[">"; "out.log"]`.
fn is_bare_redirection_operator(t: &str) -> bool {
    matches!(t, ">" | "2>" | "1>" | "&>")
}

/// HTTP method from `-X|--method METHOD`, defaulting to `GET`, uppercased.
pub fn extract_http_method(tokens: &[String]) -> String {
    for (i, tok) in tokens.iter().enumerate() {
        let t = unquote(tok);
        if (t == "-X" || t == "--method") && i + 1 < tokens.len() {
            return unquote(&tokens[i + 1]).to_ascii_uppercase();
        }
        if let Some(rest) = t.strip_prefix("--method=") {
            return rest.to_ascii_uppercase();
        }
    }
    "GET".to_string()
}

/// Exact-match flag presence check (token equality after quote handling per
/// the lexer's `Keep` mode rules — callers pass `Keep`-mode tokens here).
pub fn has_exact_flag(tokens: &[String], flag: &str) -> bool {
    tokens.iter().any(|t| t == flag)
}

/// True if any token (quote-stripped) equals `flag`.
pub fn has_flag_unquoted(tokens: &[String], flag: &str) -> bool {
    tokens.iter().any(|t| unquote(t) == flag)
}

/// A parsed `git push` refspec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    pub force: bool,
    /// `None` for a pure-delete refspec (`:dst`).
    pub src: Option<String>,
    pub dst: String,
    pub is_delete: bool,
}

/// Parse a refspec token: `+src:dst`, `src:dst`, `:dst` (delete), or a bare
/// `dst` (push of the named ref with no explicit source).
pub fn parse_refspec(token: &str) -> Refspec {
    let mut s = unquote(token);
    let force = s.starts_with('+');
    if force {
        s = s[1..].to_string();
    }
    if let Some(rest) = s.strip_prefix(':') {
        return Refspec { force, src: None, dst: rest.to_string(), is_delete: true };
    }
    if let Some((src, dst)) = s.split_once(':') {
        return Refspec { force, src: Some(src.to_string()), dst: dst.to_string(), is_delete: false };
    }
    Refspec { force, src: Some(s.clone()), dst: s, is_delete: false }
}

/// True iff, after trimming, `branch` equals `main`/`master` or ends with
/// `/main`/`/master` (catches `refs/heads/main`, `origin/main`).
pub fn is_protected_branch(branch: &str) -> bool {
    let b = branch.trim();
    b == "main" || b == "master" || b.ends_with("/main") || b.ends_with("/master")
}
