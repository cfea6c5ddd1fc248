//! Static extraction of the store paths an expression reads.
//!
//! Expressions are the small read-only snippets a binding layer evaluates:
//! property chains, optional chaining, comparisons, and single-argument
//! callbacks over collections (`users.filter(u => u.active).length`). The
//! extractor never evaluates anything; it scans tokens and reports dotted
//! paths, rewriting callback parameters to a wildcard over the collection.

const KEYWORDS: &[&str] = &[
    "map", "function", "return", "var", "let", "const", "if", "else", "for", "while", "true",
    "false", "null", "undefined", "typeof", "instanceof", "new", "this", "in", "of",
];

/// Methods whose callback parameter is bound to one element of the receiver.
const CALLBACK_METHODS: &[&str] = &[
    "filter", "find", "findLast", "findIndex", "some", "every", "map", "forEach", "flatMap",
];

/// Callback methods that return one element instead of the collection.
const ELEMENT_METHODS: &[&str] = &["find", "findLast"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// An identifier chain such as `user.address.city` or `items.*.name`.
    Chain { text: String, after_dot: bool },
    Open,
    Close,
    Arrow,
    Comma,
    Other,
}

#[derive(Debug, Default)]
struct Frame {
    /// Set when the frame is the argument list of a callback method.
    collection: Option<String>,
    /// What member access after the closing paren reads from.
    result: Option<String>,
    /// Parameter name to the path it stands for; `None` for locals.
    bindings: Vec<(String, Option<String>)>,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Optional chaining becomes plain access and `[3]` becomes `.3`.
fn normalize(expr: &str) -> Vec<char> {
    let chars: Vec<char> = expr.replace("?.", ".").chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' {
            let digits = chars[i + 1..].iter().take_while(|c| c.is_ascii_digit()).count();
            if digits > 0 && chars.get(i + 1 + digits) == Some(&']') {
                out.push('.');
                out.extend_from_slice(&chars[i + 1..i + 1 + digits]);
                i += digits + 2;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn tokenize(chars: &[char]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() || c == '.' => i += 1,
            '"' | '\'' | '`' => {
                i += 1;
                while i < chars.len() && chars[i] != c {
                    if chars[i] == '\\' {
                        i += 1;
                    }
                    i += 1;
                }
                i += 1;
                tokens.push(Token::Other);
            }
            '=' if chars.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(Token::Other);
            }
            c if is_ident_start(c) => {
                let after_dot = chars[..i]
                    .iter()
                    .rev()
                    .find(|c| !c.is_whitespace())
                    .is_some_and(|c| *c == '.');
                let start = i;
                while i < chars.len() && is_ident_continue(chars[i]) {
                    i += 1;
                }
                while i + 1 < chars.len() && chars[i] == '.' {
                    let next = chars[i + 1];
                    if next == '*' {
                        i += 2;
                    } else if is_ident_continue(next) {
                        i += 1;
                        while i < chars.len() && is_ident_continue(chars[i]) {
                            i += 1;
                        }
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Chain {
                    text: chars[start..i].iter().collect(),
                    after_dot,
                });
            }
            _ => {
                tokens.push(Token::Other);
                i += 1;
            }
        }
    }
    tokens
}

/// Parameter list of an arrow function starting at `tokens[open]`.
/// Returns the parameter names and the index just past the `=>`.
fn arrow_params(tokens: &[Token], open: usize) -> Option<(Vec<String>, usize)> {
    let mut params = Vec::new();
    let mut j = open + 1;
    loop {
        match tokens.get(j)? {
            Token::Close => break,
            Token::Chain { text, .. } if !text.contains('.') => {
                params.push(text.clone());
                j += 1;
                match tokens.get(j)? {
                    Token::Comma => j += 1,
                    Token::Close => break,
                    _ => return None,
                }
            }
            _ => return None,
        }
    }
    (tokens.get(j + 1) == Some(&Token::Arrow)).then_some((params, j + 2))
}

/// Bind arrow parameters in the innermost frame. The first parameter of a
/// callback stands for one element of its collection.
fn bind(stack: &mut [Frame], params: Vec<String>) {
    let Some(frame) = stack.last_mut() else {
        return;
    };
    for (i, name) in params.into_iter().enumerate() {
        let path = match (&frame.collection, i) {
            (Some(collection), 0) => Some(format!("{collection}.*")),
            _ => None,
        };
        frame.bindings.push((name, path));
    }
}

/// Rewrite the head of `chain` through the innermost binding of that name.
/// `None` means the chain starts at a local that is not a store path.
fn resolve(stack: &[Frame], chain: &str) -> Option<String> {
    let (head, rest) = match chain.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (chain, None),
    };
    let bound = stack
        .iter()
        .rev()
        .flat_map(|f| f.bindings.iter().rev())
        .find(|(name, _)| name == head);
    match bound {
        None => Some(chain.to_string()),
        Some((_, None)) => None,
        Some((_, Some(path))) => Some(match rest {
            Some(rest) => format!("{path}.{rest}"),
            None => path.clone(),
        }),
    }
}

/// Frame for the argument list of `method` called on `target`.
fn call_frame(target: &str, method: &str) -> Frame {
    if !CALLBACK_METHODS.contains(&method) {
        return Frame::default();
    }
    let result = if ELEMENT_METHODS.contains(&method) {
        format!("{target}.*")
    } else {
        target.to_string()
    };
    Frame {
        collection: Some(target.to_string()),
        result: Some(result),
        bindings: Vec::new(),
    }
}

fn push_unique(out: &mut Vec<String>, path: String) {
    if !path.is_empty() && !out.contains(&path) {
        out.push(path);
    }
}

/// Store paths the value of `expr` depends on, in first-seen order.
///
/// Callback parameters of `filter`, `find`, `some`, `every`, `map` and similar
/// methods are rewritten to `collection.*`, so a predicate depends on every
/// element's field. Member access after such a call (`.length`) is reported
/// against the collection, or against `collection.*` after `find`. Trailing
/// method names (`name.trim()`) are dropped.
///
/// # Examples
///
/// ```
/// use pathwatch::expr::extract_dependency_paths;
///
/// assert_eq!(
///     extract_dependency_paths("users.filter(u => u.active).length"),
///     vec!["users", "users.*.active", "users.length"],
/// );
/// assert_eq!(extract_dependency_paths("user?.address?.city"), vec!["user.address.city"]);
/// assert_eq!(extract_dependency_paths("items[0].name"), vec!["items.0.name"]);
/// ```
pub fn extract_dependency_paths(expr: &str) -> Vec<String> {
    let tokens = tokenize(&normalize(expr));
    let mut stack = vec![Frame::default()];
    let mut last_closed: Option<String> = None;
    let mut out = Vec::new();
    let mut k = 0;
    while k < tokens.len() {
        let closed = last_closed.take();
        match &tokens[k] {
            Token::Chain { text, after_dot } => {
                let calls = tokens.get(k + 1) == Some(&Token::Open);
                if *after_dot {
                    let Some(collection) = closed else {
                        k += 1;
                        continue;
                    };
                    let mut segs: Vec<&str> = text.split('.').collect();
                    if calls {
                        let method = segs.pop().unwrap_or_default();
                        let target = if segs.is_empty() {
                            collection
                        } else {
                            let target = format!("{collection}.{}", segs.join("."));
                            push_unique(&mut out, target.clone());
                            target
                        };
                        stack.push(call_frame(&target, method));
                        k += 2;
                    } else {
                        push_unique(&mut out, format!("{collection}.{text}"));
                        k += 1;
                    }
                    continue;
                }
                if tokens.get(k + 1) == Some(&Token::Arrow) && !text.contains('.') {
                    bind(&mut stack, vec![text.clone()]);
                    k += 2;
                    continue;
                }
                let head = text.split('.').next().unwrap_or_default();
                if KEYWORDS.contains(&head) {
                    k += 1;
                    continue;
                }
                let resolved = resolve(&stack, text);
                if calls {
                    let frame = match resolved.as_deref().and_then(|r| r.rsplit_once('.')) {
                        Some((target, method)) => {
                            push_unique(&mut out, target.to_string());
                            call_frame(target, method)
                        }
                        None => Frame::default(),
                    };
                    stack.push(frame);
                    k += 2;
                    continue;
                }
                if let Some(path) = resolved {
                    push_unique(&mut out, path);
                }
                k += 1;
            }
            Token::Open => match arrow_params(&tokens, k) {
                Some((params, next)) => {
                    bind(&mut stack, params);
                    k = next;
                }
                None => {
                    stack.push(Frame::default());
                    k += 1;
                }
            },
            Token::Close => {
                if stack.len() > 1 {
                    last_closed = stack.pop().and_then(|f| f.result);
                }
                k += 1;
            }
            Token::Arrow | Token::Comma | Token::Other => k += 1,
        }
    }
    out
}

/// Every `${ ... }` body in `template`, trimmed, in order.
///
/// Braces inside a body nest. An opener that is never closed ends the scan;
/// the bodies found before it are still returned.
///
/// ```
/// use pathwatch::expr::extract_expressions;
///
/// assert_eq!(extract_expressions("Hi ${user.name}, ${ {a: 1}.a }"), vec!["user.name", "{a: 1}.a"]);
/// assert_eq!(extract_expressions("${a} ${b"), vec!["a"]);
/// ```
pub fn extract_expressions(template: &str) -> Vec<String> {
    let mut results = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let body = &rest[start + 2..];
        let mut depth = 1usize;
        let mut end = None;
        for (i, c) in body.char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i);
                        break;
                    }
                }
                _ => {}
            }
        }
        let Some(end) = end else {
            break;
        };
        results.push(body[..end].trim().to_string());
        rest = &body[end + 1..];
    }
    results
}

/// Dependency paths of every interpolation in `template`, deduplicated.
pub fn template_dependency_paths(template: &str) -> Vec<String> {
    let mut out = Vec::new();
    for expr in extract_expressions(template) {
        for path in extract_dependency_paths(&expr) {
            push_unique(&mut out, path);
        }
    }
    out
}
