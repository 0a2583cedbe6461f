//! Source-text front end: tokeniser, bracket parser, and the
//! method-definition builder.
//!
//! Tokenisation rules: whitespace separates tokens; a newline is itself a
//! token; punctuation characters other than `?` are single-character tokens;
//! `?` may lead a token (a local-variable token); `[` and `]` delimit nested
//! tuples. One extension over the base rules: a token that starts with a
//! digit may contain a single `.` followed by more digits, so float literals
//! survive tokenisation.
//!
//! A definition occupies one logical line (newlines inside brackets do not
//! terminate it). `Head args: body` is a method; `Head args.` with no colon
//! is a fact - a method with an empty chain, implicitly marked as a
//! backtrackable, fallible predicate. A line ending in a bare `:` opens a
//! multi-line body closed by a blank line or `[end]`.

use std::rc::Rc;

use smallvec::SmallVec;

use crate::{
    exception_private::{RunError, RunResult},
    exception_public::ExcKind,
    intern::{Interner, KnownName},
    step::{BranchStep, CallStep, Chain, EmitStep, SetStep, Step, UnifyStep},
    task::TaskFlags,
    term::Term,
};

/// One parsed method definition, ready for the module to install.
#[derive(Debug)]
pub(crate) struct Definition {
    pub task: String,
    pub flags: TaskFlags,
    pub weight: f64,
    pub pattern: Vec<Term>,
    pub locals: Vec<Rc<str>>,
    pub chain: Chain,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct Tok {
    text: String,
    line: u32,
}

impl Tok {
    fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

#[derive(Debug)]
enum TokenTree {
    Word(Tok),
    Group { items: Vec<TokenTree>, line: u32 },
}

fn syntax_error(path: Option<&str>, line: u32, message: &str) -> RunError {
    let location = match path {
        Some(path) => format!("{path}:{line}"),
        None => format!("line {line}"),
    };
    RunError::new(ExcKind::SyntaxError, format!("{location}: {message}"))
}

/// Splits source text into tokens, tracking line numbers.
fn tokenize(source: &str) -> Vec<Tok> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut line = 1u32;
    let mut chars = source.chars().peekable();

    fn flush(word: &mut String, tokens: &mut Vec<Tok>, line: u32) {
        if !word.is_empty() {
            tokens.push(Tok {
                text: std::mem::take(word),
                line,
            });
        }
    }

    while let Some(ch) = chars.next() {
        match ch {
            '\n' => {
                flush(&mut word, &mut tokens, line);
                tokens.push(Tok {
                    text: "\n".to_owned(),
                    line,
                });
                line += 1;
            }
            c if c.is_whitespace() => flush(&mut word, &mut tokens, line),
            '[' | ']' => {
                flush(&mut word, &mut tokens, line);
                tokens.push(Tok {
                    text: ch.to_string(),
                    line,
                });
            }
            '?' => {
                if word.is_empty() {
                    word.push('?');
                } else {
                    flush(&mut word, &mut tokens, line);
                    tokens.push(Tok {
                        text: "?".to_owned(),
                        line,
                    });
                }
            }
            '.' if !word.is_empty()
                && word.chars().all(|c| c.is_ascii_digit())
                && chars.peek().is_some_and(char::is_ascii_digit) =>
            {
                // Inside a float literal.
                word.push('.');
            }
            c if c.is_ascii_punctuation() => {
                flush(&mut word, &mut tokens, line);
                tokens.push(Tok {
                    text: c.to_string(),
                    line,
                });
            }
            c => word.push(c),
        }
    }
    flush(&mut word, &mut tokens, line);
    tokens
}

/// Groups tokens into logical lines: a newline at bracket depth zero ends a
/// line, a newline inside brackets is plain whitespace. Blank lines stay in
/// the result as empty vectors - they terminate multi-line bodies.
fn logical_lines(tokens: Vec<Tok>) -> Vec<Vec<Tok>> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;
    for token in tokens {
        match token.text.as_str() {
            "\n" if depth == 0 => lines.push(std::mem::take(&mut current)),
            "\n" => {}
            "[" => {
                depth += 1;
                current.push(token);
            }
            "]" => {
                depth = depth.saturating_sub(1);
                current.push(token);
            }
            _ => current.push(token),
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Parses bracket structure over one definition's tokens.
fn build_trees(tokens: &[Tok], path: Option<&str>) -> RunResult<Vec<TokenTree>> {
    let mut index = 0;
    let trees = parse_trees(tokens, &mut index, path, None)?;
    Ok(trees)
}

fn parse_trees(
    tokens: &[Tok],
    index: &mut usize,
    path: Option<&str>,
    open_line: Option<u32>,
) -> RunResult<Vec<TokenTree>> {
    let mut trees = Vec::new();
    while *index < tokens.len() {
        let token = &tokens[*index];
        *index += 1;
        match token.text.as_str() {
            "[" => {
                let line = token.line;
                let items = parse_trees(tokens, index, path, Some(line))?;
                trees.push(TokenTree::Group { items, line });
            }
            "]" => {
                if open_line.is_none() {
                    return Err(syntax_error(path, token.line, "unmatched ']'"));
                }
                return Ok(trees);
            }
            _ => trees.push(TokenTree::Word(token.clone())),
        }
    }
    if let Some(line) = open_line {
        return Err(syntax_error(path, line, "unclosed '['"));
    }
    Ok(trees)
}

/// Per-method context: local-variable slot allocation.
#[derive(Debug, Default)]
struct MethodScope {
    locals: Vec<Rc<str>>,
}

impl MethodScope {
    /// Slot for `?name`-form token text; a bare `?` is anonymous and fresh
    /// at every occurrence.
    fn local(&mut self, var_token: &str) -> Term {
        let name = &var_token[1..];
        if !name.is_empty() {
            if let Some(slot) = self.locals.iter().position(|n| &**n == name) {
                return Term::Local(u16::try_from(slot).expect("too many locals"));
            }
        }
        let slot = u16::try_from(self.locals.len()).expect("too many locals");
        self.locals.push(Rc::from(if name.is_empty() { "_" } else { name }));
        Term::Local(slot)
    }
}

/// Parses the definitions in `source`. `path` is used in error messages only.
pub(crate) fn parse_definitions(
    source: &str,
    path: Option<&str>,
    interner: &Interner,
) -> RunResult<Vec<Definition>> {
    let lines = logical_lines(tokenize(source));
    let mut definitions = Vec::new();
    let mut index = 0;
    while index < lines.len() {
        let line = &lines[index];
        index += 1;
        if line.is_empty() {
            continue;
        }
        let mut tokens = line.clone();
        // A line ending in a bare ':' opens a multi-line body.
        if tokens.last().is_some_and(|t| t.is(":")) {
            let mut first_continuation = true;
            while index < lines.len() {
                let continuation = &lines[index];
                if continuation.is_empty() {
                    index += 1;
                    break;
                }
                if is_end_marker(continuation) {
                    index += 1;
                    break;
                }
                if !first_continuation {
                    tokens.push(Tok {
                        text: "\n".to_owned(),
                        line: continuation[0].line,
                    });
                }
                first_continuation = false;
                tokens.extend(continuation.iter().cloned());
                index += 1;
            }
        }
        definitions.push(parse_definition(&tokens, path, interner)?);
    }
    Ok(definitions)
}

fn is_end_marker(line: &[Tok]) -> bool {
    line.len() == 3 && line[0].is("[") && line[1].is("end") && line[2].is("]")
}

fn parse_definition(
    tokens: &[Tok],
    path: Option<&str>,
    interner: &Interner,
) -> RunResult<Definition> {
    let first_line = tokens[0].line;
    let mut cursor = 0;

    // Leading bracketed annotations set task flags.
    let mut flags = TaskFlags::empty();
    while tokens.get(cursor).is_some_and(|t| t.is("[")) {
        let word = tokens
            .get(cursor + 1)
            .ok_or_else(|| syntax_error(path, first_line, "unterminated annotation"))?;
        if !tokens.get(cursor + 2).is_some_and(|t| t.is("]")) {
            return Err(syntax_error(path, word.line, "annotations are single words"));
        }
        flags |= annotation_flags(&word.text)
            .ok_or_else(|| syntax_error(path, word.line, &format!("unknown annotation [{}]", word.text)))?;
        cursor += 3;
    }

    let name = tokens
        .get(cursor)
        .ok_or_else(|| syntax_error(path, first_line, "missing task name"))?;
    if name.text.len() == 1 && !name.text.chars().next().is_some_and(|c| c.is_alphanumeric()) {
        return Err(syntax_error(path, name.line, "task name must be an identifier"));
    }
    let task = name.text.clone();
    cursor += 1;

    // Split head from body at the first depth-zero ':'.
    let mut depth = 0usize;
    let mut colon = None;
    for (offset, token) in tokens[cursor..].iter().enumerate() {
        match token.text.as_str() {
            "[" => depth += 1,
            "]" => depth = depth.saturating_sub(1),
            ":" if depth == 0 => {
                colon = Some(cursor + offset);
                break;
            }
            _ => {}
        }
    }

    let mut scope = MethodScope::default();
    let (pattern_tokens, body_tokens) = match colon {
        Some(at) => (&tokens[cursor..at], &tokens[at + 1..]),
        None => {
            // Fact form: `Head args.` - backtrackable, fallible, no body.
            if !tokens.last().is_some_and(|t| t.is(".")) {
                return Err(syntax_error(
                    path,
                    first_line,
                    "a definition needs ':' before its body or a trailing '.'",
                ));
            }
            flags |= TaskFlags::MULTIPLE_SOLUTIONS | TaskFlags::FALLIBLE;
            (&tokens[cursor..tokens.len() - 1], &tokens[..0])
        }
    };

    let pattern_trees = build_trees(pattern_tokens, path)?;
    let pattern: Vec<Term> = pattern_trees
        .iter()
        .map(|tree| term_of(tree, &mut scope, interner))
        .collect();

    let body_trees = build_trees(body_tokens, path)?;
    let chain = compile_body(&body_trees, &mut scope, interner, path)?;

    Ok(Definition {
        task,
        flags,
        weight: 1.0,
        pattern,
        locals: scope.locals,
        chain,
        line: first_line,
    })
}

fn annotation_flags(word: &str) -> Option<TaskFlags> {
    match word {
        "randomly" => Some(TaskFlags::SHUFFLE),
        "generator" => Some(TaskFlags::MULTIPLE_SOLUTIONS),
        "predicate" => Some(TaskFlags::MULTIPLE_SOLUTIONS | TaskFlags::FALLIBLE),
        "fallible" => Some(TaskFlags::FALLIBLE),
        "main" => Some(TaskFlags::MAIN),
        _ => None,
    }
}

/// Turns one token tree into a term. Pattern and argument positions use the
/// capitalisation rule: `?`-led tokens are locals, numbers and booleans are
/// ground constants, capitalised identifiers are state variables, everything
/// else is a text atom.
fn term_of(tree: &TokenTree, scope: &mut MethodScope, interner: &Interner) -> Term {
    match tree {
        TokenTree::Group { items, .. } => Term::Tuple(
            items
                .iter()
                .map(|item| term_of(item, scope, interner))
                .collect(),
        ),
        TokenTree::Word(tok) => word_term(&tok.text, scope, interner),
    }
}

fn word_term(text: &str, scope: &mut MethodScope, interner: &Interner) -> Term {
    if text.starts_with('?') {
        return scope.local(text);
    }
    if let Ok(value) = text.parse::<i64>() {
        return Term::Int(value);
    }
    if text.contains('.') {
        if let Ok(value) = text.parse::<f64>() {
            return Term::Float(value);
        }
    }
    match text {
        "true" => Term::Bool(true),
        "false" => Term::Bool(false),
        _ => {
            if text.chars().next().is_some_and(|c| c.is_uppercase()) {
                Term::State(interner.intern(text))
            } else {
                Term::text(text)
            }
        }
    }
}

/// Compiles a body - a run of emit words, mentions, and bracketed steps -
/// into a step chain, right to left so each step holds its successor.
fn compile_body(
    trees: &[TokenTree],
    scope: &mut MethodScope,
    interner: &Interner,
    path: Option<&str>,
) -> RunResult<Chain> {
    let mut chain: Chain = None;
    // Tokens of the emit run currently being collected, in reverse order.
    let mut run: Vec<Rc<str>> = Vec::new();
    for tree in trees.iter().rev() {
        match tree {
            TokenTree::Word(tok) if !tok.text.starts_with('?') => {
                run.push(Rc::from(tok.text.as_str()));
            }
            other => {
                chain = flush_emit(&mut run, chain);
                chain = match other {
                    TokenTree::Word(tok) => Some(Rc::new(Step::Call(CallStep {
                        task: Term::State(KnownName::Mention.into()),
                        args: vec![scope.local(&tok.text)],
                        next: chain,
                    }))),
                    TokenTree::Group { items, line } => {
                        compile_group(items, *line, chain, scope, interner, path)?
                    }
                };
            }
        }
    }
    Ok(flush_emit(&mut run, chain))
}

fn flush_emit(run: &mut Vec<Rc<str>>, chain: Chain) -> Chain {
    if run.is_empty() {
        return chain;
    }
    let tokens: SmallVec<[Rc<str>; 4]> = run.drain(..).rev().collect();
    Some(Rc::new(Step::Emit(EmitStep { tokens, next: chain })))
}

/// Compiles one bracketed step. The first word selects the step kind:
/// `=` unifies, `set` binds a state variable, `firstOf`/`randomly` branch;
/// anything else is a task call.
fn compile_group(
    items: &[TokenTree],
    line: u32,
    next: Chain,
    scope: &mut MethodScope,
    interner: &Interner,
    path: Option<&str>,
) -> RunResult<Chain> {
    let Some(first) = items.first() else {
        // `[]` does nothing; it exists so generated code can splice.
        return Ok(next);
    };
    if let TokenTree::Word(tok) = first {
        match tok.text.as_str() {
            "=" => {
                let [_, left, right] = items else {
                    return Err(syntax_error(path, line, "[= a b] takes exactly two terms"));
                };
                return Ok(Some(Rc::new(Step::Unify(UnifyStep {
                    left: term_of(left, scope, interner),
                    right: term_of(right, scope, interner),
                    next,
                }))));
            }
            "set" => {
                let [_, target, value] = items else {
                    return Err(syntax_error(path, line, "[set Name value] takes a name and a value"));
                };
                let TokenTree::Word(target) = target else {
                    return Err(syntax_error(path, line, "[set] target must be a state variable name"));
                };
                return Ok(Some(Rc::new(Step::Set(SetStep {
                    target: interner.intern(&target.text),
                    value: term_of(value, scope, interner),
                    next,
                }))));
            }
            "firstOf" | "randomly" => {
                let shuffle = tok.text == "randomly";
                let mut alternatives = Vec::new();
                for alternative in &items[1..] {
                    let TokenTree::Group { items, .. } = alternative else {
                        return Err(syntax_error(
                            path,
                            line,
                            "branch alternatives must be bracketed",
                        ));
                    };
                    if matches!(items.as_slice(), [TokenTree::Word(w)] if w.is("else")) {
                        // The empty [else] clause: do nothing and continue.
                        alternatives.push(None);
                    } else {
                        alternatives.push(compile_body(items, scope, interner, path)?);
                    }
                }
                return Ok(Some(Rc::new(Step::Branch(BranchStep {
                    alternatives,
                    shuffle,
                    next,
                }))));
            }
            "end" => {
                return Err(syntax_error(path, line, "[end] terminates a multi-line body"));
            }
            _ => {}
        }
    }
    let task = term_of(first, scope, interner);
    let args = items[1..]
        .iter()
        .map(|item| term_of(item, scope, interner))
        .collect();
    Ok(Some(Rc::new(Step::Call(CallStep { task, args, next }))))
}
