//! Username template language
//!
//! A small Go-template-compatible language, enough to express IAM/STS naming
//! schemes such as
//!
//! ```text
//! {{ if (eq .Type "STS") }}{{ printf "app-%s" (random 20) | truncate 32 }}{{ else }}{{ .DisplayName }}{{ end }}
//! ```
//!
//! Supported syntax:
//! - `{{ .Field }}` field references, string (`"..."`, `` `...` ``) and integer literals
//! - function calls `f a b`, parenthesised sub-expressions `(f a)`
//! - pipelines `a | f b` (the piped value becomes the last argument)
//! - `{{ if x }} ... {{ else }} ... {{ end }}`
//! - whitespace control with `{{-` and `-}}`
//!
//! Functions: `eq`, `ne`, `printf`, `truncate`, `truncate_sha256`,
//! `uppercase`, `lowercase`, `replace`, `random`, `unix_time`,
//! `unix_time_millis`, `uuid`, `base64`.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use chrono::{DateTime, Utc};
use rand::Rng as _;
use rand::distr::Alphanumeric;
use sha2::{Digest as _, Sha256};

use crate::core::TemplateError;

/// Maximum number of actions allowed in a single template
const MAX_TEMPLATE_ACTIONS: usize = 256;

/// Maximum depth of parenthesized sub-pipelines within one action
const MAX_NESTING_DEPTH: usize = 32;

/// Upper bound for `random N`
const MAX_RANDOM_LENGTH: usize = 1024;

type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Field(String),
    Str(String),
    Int(i64),
    Ident(String),
    LParen,
    RParen,
    Pipe,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Field(String),
    Str(String),
    Int(i64),
    Call(String),
    Sub(Pipeline),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Command {
    args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Text(String),
    Output(Pipeline),
    If {
        condition: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug)]
enum Segment<'a> {
    Text(&'a str),
    Action { body: &'a str, offset: usize },
}

/// Values flowing through a pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl Value {
    fn is_truthy(&self) -> bool {
        match self {
            Self::Str(s) => !s.is_empty(),
            Self::Int(i) => *i != 0,
            Self::Bool(b) => *b,
        }
    }

    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Data a template is rendered against
#[derive(Debug, Clone)]
pub struct TemplateContext {
    fields: BTreeMap<String, String>,
    now: DateTime<Utc>,
}

impl TemplateContext {
    /// Context with no fields, evaluated at `now`
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            fields: BTreeMap::new(),
            now,
        }
    }

    /// Set a field readable as `.name`
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// A parsed template
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Parse a template
    pub fn new(source: impl Into<String>) -> TemplateResult<Self> {
        let source = source.into();
        let segments = split(&source)?;
        let nodes = build(segments)?;
        Ok(Self { source, nodes })
    }

    /// Original template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render against `context`
    pub fn render(&self, context: &TemplateContext) -> TemplateResult<String> {
        let mut out = String::with_capacity(self.source.len());
        render_nodes(&self.nodes, context, &mut out)?;
        Ok(out)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Find the closing `}}` of an action, skipping over string literals
fn find_close(body: &str) -> Option<usize> {
    let bytes = body.as_bytes();
    let mut i = 0;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(b'"') if b == b'\\' => i += 1,
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'`' => quote = Some(b),
            None if b == b'}' && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

fn split(source: &str) -> TemplateResult<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut consumed = 0;
    let mut trim_next = false;
    let mut actions = 0;

    while let Some(open) = rest.find("{{") {
        let mut text = &rest[..open];
        if trim_next {
            text = text.trim_start();
        }

        let after_open = &rest[open + 2..];
        let trim_left = after_open.starts_with('-')
            && after_open[1..].starts_with(char::is_whitespace);
        if trim_left {
            text = text.trim_end();
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        let offset = consumed + open;
        let close = find_close(after_open)
            .ok_or_else(|| TemplateError::parse(offset, "unclosed action, expected '}}'"))?;

        let mut body = &after_open[..close];
        if trim_left {
            body = &body[1..];
        }
        trim_next = body.ends_with('-')
            && body[..body.len() - 1].ends_with(char::is_whitespace);
        if trim_next {
            body = &body[..body.len() - 1];
        }

        actions += 1;
        if actions > MAX_TEMPLATE_ACTIONS {
            return Err(TemplateError::parse(
                offset,
                format!("template contains too many actions (max {MAX_TEMPLATE_ACTIONS})"),
            ));
        }
        segments.push(Segment::Action { body, offset });

        let advance = open + 2 + close + 2;
        consumed += advance;
        rest = &rest[advance..];
    }

    let tail = if trim_next { rest.trim_start() } else { rest };
    if !tail.is_empty() {
        segments.push(Segment::Text(tail));
    }
    Ok(segments)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(body: &str, offset: usize) -> TemplateResult<Vec<Token>> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let take_while = |start: usize, pred: fn(char) -> bool| -> usize {
        let mut end = start;
        while end < chars.len() && pred(chars[end]) {
            end += 1;
        }
        end
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '.' => {
                let end = take_while(i + 1, is_ident_char);
                if end == i + 1 {
                    return Err(TemplateError::parse(offset, "expected field name after '.'"));
                }
                tokens.push(Token::Field(chars[i + 1..end].iter().collect()));
                i = end;
            }
            '"' => {
                let mut value = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => {
                            return Err(TemplateError::parse(offset, "unterminated string"));
                        }
                        Some('"') => break,
                        Some('\\') => {
                            let escaped = match chars.get(j + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('\\') => '\\',
                                Some('"') => '"',
                                _ => {
                                    return Err(TemplateError::parse(
                                        offset,
                                        "invalid escape in string",
                                    ));
                                }
                            };
                            value.push(escaped);
                            j += 2;
                        }
                        Some(&other) => {
                            value.push(other);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
                i = j + 1;
            }
            '`' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == '`')
                    .ok_or_else(|| TemplateError::parse(offset, "unterminated raw string"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + end].iter().collect()));
                i += end + 2;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let end = take_while(i + 1, |ch| ch.is_ascii_digit());
                let literal: String = chars[i..end].iter().collect();
                let value = literal.parse::<i64>().map_err(|e| {
                    TemplateError::parse(offset, format!("invalid number '{literal}': {e}"))
                })?;
                tokens.push(Token::Int(value));
                i = end;
            }
            c if c.is_alphabetic() || c == '_' => {
                let end = take_while(i, is_ident_char);
                tokens.push(Token::Ident(chars[i..end].iter().collect()));
                i = end;
            }
            other => {
                return Err(TemplateError::parse(
                    offset,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    offset: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token], offset: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            offset,
            depth: 0,
        }
    }

    fn parse_all(mut self) -> TemplateResult<Pipeline> {
        let pipeline = self.parse_pipeline()?;
        if self.pos != self.tokens.len() {
            return Err(TemplateError::parse(self.offset, "unexpected ')'"));
        }
        Ok(pipeline)
    }

    fn parse_pipeline(&mut self) -> TemplateResult<Pipeline> {
        let mut commands = vec![self.parse_command()?];
        while self.tokens.get(self.pos) == Some(&Token::Pipe) {
            self.pos += 1;
            commands.push(self.parse_command()?);
        }
        Ok(Pipeline { commands })
    }

    fn parse_command(&mut self) -> TemplateResult<Command> {
        let mut args = Vec::new();
        while let Some(token) = self.tokens.get(self.pos) {
            let arg = match token {
                Token::Pipe | Token::RParen => break,
                Token::LParen => {
                    if self.depth == MAX_NESTING_DEPTH {
                        return Err(TemplateError::parse(
                            self.offset,
                            format!("parentheses nested too deeply (max {MAX_NESTING_DEPTH})"),
                        ));
                    }
                    self.pos += 1;
                    self.depth += 1;
                    let inner = self.parse_pipeline()?;
                    self.depth -= 1;
                    if self.tokens.get(self.pos) != Some(&Token::RParen) {
                        return Err(TemplateError::parse(self.offset, "unclosed '('"));
                    }
                    Arg::Sub(inner)
                }
                Token::Field(name) => Arg::Field(name.clone()),
                Token::Str(value) => Arg::Str(value.clone()),
                Token::Int(value) => Arg::Int(*value),
                Token::Ident(name) => Arg::Call(name.clone()),
            };
            self.pos += 1;
            args.push(arg);
        }
        if args.is_empty() {
            return Err(TemplateError::parse(self.offset, "empty command"));
        }
        Ok(Command { args })
    }
}

struct Frame {
    condition: Option<Pipeline>,
    then: Vec<Node>,
    otherwise: Option<Vec<Node>>,
    offset: usize,
}

impl Frame {
    fn push(&mut self, node: Node) {
        match &mut self.otherwise {
            Some(otherwise) => otherwise.push(node),
            None => self.then.push(node),
        }
    }
}

fn build(segments: Vec<Segment<'_>>) -> TemplateResult<Vec<Node>> {
    let mut stack = vec![Frame {
        condition: None,
        then: Vec::new(),
        otherwise: None,
        offset: 0,
    }];

    for segment in segments {
        match segment {
            Segment::Text(text) => {
                if let Some(frame) = stack.last_mut() {
                    frame.push(Node::Text(text.to_owned()));
                }
            }
            Segment::Action { body, offset } => {
                let tokens = tokenize(body, offset)?;
                match tokens.first() {
                    Some(Token::Ident(keyword)) if keyword == "if" => {
                        let condition = Parser::new(&tokens[1..], offset).parse_all()?;
                        stack.push(Frame {
                            condition: Some(condition),
                            then: Vec::new(),
                            otherwise: None,
                            offset,
                        });
                    }
                    Some(Token::Ident(keyword)) if keyword == "else" => {
                        let frame = stack
                            .last_mut()
                            .filter(|frame| frame.condition.is_some() && frame.otherwise.is_none())
                            .ok_or_else(|| TemplateError::parse(offset, "unexpected {{else}}"))?;
                        if tokens.len() != 1 {
                            return Err(TemplateError::parse(offset, "else takes no arguments"));
                        }
                        frame.otherwise = Some(Vec::new());
                    }
                    Some(Token::Ident(keyword)) if keyword == "end" => {
                        if tokens.len() != 1 || stack.len() < 2 {
                            return Err(TemplateError::parse(offset, "unexpected {{end}}"));
                        }
                        let Some(Frame {
                            condition: Some(condition),
                            then,
                            otherwise,
                            ..
                        }) = stack.pop()
                        else {
                            return Err(TemplateError::parse(offset, "unexpected {{end}}"));
                        };
                        let node = Node::If {
                            condition,
                            then,
                            otherwise: otherwise.unwrap_or_default(),
                        };
                        if let Some(parent) = stack.last_mut() {
                            parent.push(node);
                        }
                    }
                    _ => {
                        let pipeline = Parser::new(&tokens, offset).parse_all()?;
                        if let Some(frame) = stack.last_mut() {
                            frame.push(Node::Output(pipeline));
                        }
                    }
                }
            }
        }
    }

    if stack.len() != 1 {
        let offset = stack.last().map_or(0, |frame| frame.offset);
        return Err(TemplateError::parse(offset, "unclosed {{if}}, expected {{end}}"));
    }
    Ok(stack.pop().map(|root| root.then).unwrap_or_default())
}

// ── Evaluation ──────────────────────────────────────────────────────────────

fn render_nodes(nodes: &[Node], context: &TemplateContext, out: &mut String) -> TemplateResult<()> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(pipeline) => out.push_str(&eval_pipeline(pipeline, context)?.into_string()),
            Node::If {
                condition,
                then,
                otherwise,
            } => {
                let branch = if eval_pipeline(condition, context)?.is_truthy() {
                    then
                } else {
                    otherwise
                };
                render_nodes(branch, context, out)?;
            }
        }
    }
    Ok(())
}

fn eval_pipeline(pipeline: &Pipeline, context: &TemplateContext) -> TemplateResult<Value> {
    let mut piped = None;
    for command in &pipeline.commands {
        piped = Some(eval_command(command, context, piped)?);
    }
    piped.ok_or_else(|| TemplateError::render("empty pipeline"))
}

fn eval_command(
    command: &Command,
    context: &TemplateContext,
    piped: Option<Value>,
) -> TemplateResult<Value> {
    match command.args.as_slice() {
        [Arg::Call(name), rest @ ..] => {
            let mut args = rest
                .iter()
                .map(|arg| eval_arg(arg, context))
                .collect::<TemplateResult<Vec<_>>>()?;
            args.extend(piped);
            call(name, args, context)
        }
        [single] if piped.is_none() => eval_arg(single, context),
        [_] => Err(TemplateError::render("cannot pipe a value into a non-function")),
        _ => Err(TemplateError::render("multiple values without a function")),
    }
}

fn eval_arg(arg: &Arg, context: &TemplateContext) -> TemplateResult<Value> {
    match arg {
        Arg::Field(name) => context
            .fields
            .get(name)
            .map(|value| Value::Str(value.clone()))
            .ok_or_else(|| TemplateError::render(format!("unknown field .{name}"))),
        Arg::Str(value) => Ok(Value::Str(value.clone())),
        Arg::Int(value) => Ok(Value::Int(*value)),
        Arg::Call(name) => call(name, Vec::new(), context),
        Arg::Sub(pipeline) => eval_pipeline(pipeline, context),
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> TemplateResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(TemplateError::render(format!(
            "{name} expects {expected} argument(s), got {}",
            args.len()
        )))
    }
}

fn int_arg(name: &str, value: &Value) -> TemplateResult<i64> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Str(s) => s
            .parse()
            .map_err(|_| TemplateError::render(format!("{name}: '{s}' is not an integer"))),
        Value::Bool(_) => Err(TemplateError::render(format!(
            "{name}: expected an integer, got a boolean"
        ))),
    }
}

fn length_arg(name: &str, value: &Value) -> TemplateResult<usize> {
    let n = int_arg(name, value)?;
    usize::try_from(n).map_err(|_| TemplateError::render(format!("{name}: length must not be negative")))
}

/// Longest prefix of `s` no longer than `max` bytes that ends on a char boundary
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn call(name: &str, args: Vec<Value>, context: &TemplateContext) -> TemplateResult<Value> {
    match name {
        "eq" | "ne" => {
            arity(name, &args, 2)?;
            let equal = args[0].to_string() == args[1].to_string();
            Ok(Value::Bool(if name == "eq" { equal } else { !equal }))
        }
        "printf" => {
            let (format, rest) = args
                .split_first()
                .ok_or_else(|| TemplateError::render("printf requires a format string"))?;
            printf(&format.to_string(), rest).map(Value::Str)
        }
        "truncate" => {
            arity(name, &args, 2)?;
            let max = length_arg(name, &args[0])?;
            let value = args[1].to_string();
            Ok(Value::Str(truncate_bytes(&value, max).to_owned()))
        }
        "truncate_sha256" => {
            arity(name, &args, 2)?;
            let max = length_arg(name, &args[0])?;
            let value = args[1].to_string();
            if value.len() <= max {
                return Ok(Value::Str(value));
            }
            if max <= 8 {
                return Err(TemplateError::render(
                    "truncate_sha256: length must be greater than 8",
                ));
            }
            let head = truncate_bytes(&value, max - 8);
            let digest = Sha256::digest(value[head.len()..].as_bytes());
            let hash = hex::encode(digest.as_slice());
            Ok(Value::Str(format!("{head}{}", &hash[..8])))
        }
        "uppercase" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_uppercase()))
        }
        "lowercase" => {
            arity(name, &args, 1)?;
            Ok(Value::Str(args[0].to_string().to_lowercase()))
        }
        "replace" => {
            arity(name, &args, 3)?;
            let (from, to) = (args[0].to_string(), args[1].to_string());
            Ok(Value::Str(args[2].to_string().replace(&from, &to)))
        }
        "random" => {
            arity(name, &args, 1)?;
            let length = length_arg(name, &args[0])?;
            if !(1..=MAX_RANDOM_LENGTH).contains(&length) {
                return Err(TemplateError::render(format!(
                    "random: length must be between 1 and {MAX_RANDOM_LENGTH}"
                )));
            }
            let value: String = rand::rng()
                .sample_iter(&Alphanumeric)
                .take(length)
                .map(char::from)
                .collect();
            Ok(Value::Str(value))
        }
        "unix_time" => {
            arity(name, &args, 0)?;
            Ok(Value::Int(context.now.timestamp()))
        }
        "unix_time_millis" => {
            arity(name, &args, 0)?;
            Ok(Value::Int(context.now.timestamp_millis()))
        }
        "uuid" => {
            arity(name, &args, 0)?;
            Ok(Value::Str(uuid::Uuid::new_v4().to_string()))
        }
        "base64" => {
            arity(name, &args, 1)?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(args[0].to_string());
            Ok(Value::Str(encoded))
        }
        other => Err(TemplateError::render(format!("unknown function '{other}'"))),
    }
}

fn printf(format: &str, args: &[Value]) -> TemplateResult<String> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb @ ('s' | 'v' | 'd')) => {
                let arg = args.next().ok_or_else(|| {
                    TemplateError::render(format!("printf: missing argument for %{verb}"))
                })?;
                if verb == 'd' && !matches!(arg, Value::Int(_)) {
                    return Err(TemplateError::render(format!(
                        "printf: %d expects an integer, got '{arg}'"
                    )));
                }
                out.push_str(&arg.to_string());
            }
            Some(other) => {
                return Err(TemplateError::render(format!(
                    "printf: unsupported verb %{other}"
                )));
            }
            None => return Err(TemplateError::render("printf: dangling '%'")),
        }
    }
    if args.next().is_some() {
        return Err(TemplateError::render("printf: too many arguments"));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn context() -> TemplateContext {
        let now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        TemplateContext::new(now)
            .with_field("Type", "IAM")
            .with_field("DisplayName", "alice")
            .with_field("PolicyName", "readonly")
    }

    fn render(source: &str) -> String {
        Template::new(source).unwrap().render(&context()).unwrap()
    }

    #[test]
    fn test_static_only() {
        assert_eq!(render("plain-name"), "plain-name");
    }

    #[test]
    fn test_field_references() {
        assert_eq!(render("{{.Type}}-{{.DisplayName}}"), "IAM-alice");
        assert_eq!(render("{{ .DisplayName }}/{{ .PolicyName }}"), "alice/readonly");
    }

    #[rstest]
    #[case(r#"{{ printf "%s-%s" .DisplayName .PolicyName }}"#, "alice-readonly")]
    #[case(r#"{{ .DisplayName | uppercase }}"#, "ALICE")]
    #[case(r#"{{ "ABC" | lowercase }}"#, "abc")]
    #[case(r#"{{ .PolicyName | truncate 4 }}"#, "read")]
    #[case(r#"{{ replace "a" "4" .DisplayName }}"#, "4lice")]
    #[case(r#"{{ unix_time }}"#, "1700000000")]
    #[case(r#"{{ unix_time_millis }}"#, "1700000000000")]
    #[case(r#"{{ printf "%d%%" 50 }}"#, "50%")]
    #[case(r#"{{ base64 "hi" }}"#, "aGk=")]
    #[case("{{ `raw \"text\"` }}", "raw \"text\"")]
    fn test_functions(#[case] source: &str, #[case] expected: &str) {
        assert_eq!(render(source), expected);
    }

    #[test]
    fn test_nested_pipelines() {
        let source = r#"{{ printf "x-%s-%s" (printf "%s-%s" (.DisplayName) (.PolicyName) | truncate 8) (unix_time) }}"#;
        assert_eq!(render(source), "x-alice-re-1700000000");
    }

    #[test]
    fn test_if_else() {
        let source = r#"{{ if (eq .Type "STS") }}sts{{ else }}iam{{ end }}"#;
        assert_eq!(render(source), "iam");
        let source = r#"{{ if ne .Type "STS" }}not-sts{{ end }}"#;
        assert_eq!(render(source), "not-sts");
        let source = r#"{{ if .Missing }}x{{ end }}"#;
        assert!(Template::new(source).unwrap().render(&context()).is_err());
    }

    #[test]
    fn test_whitespace_control() {
        assert_eq!(render("a   {{- .Type -}}   b"), "aIAMb");
        assert_eq!(render("a {{ .Type }} b"), "a IAM b");
    }

    #[test]
    fn test_random_length_and_charset() {
        let value = render("{{ random 20 }}");
        assert_eq!(value.len(), 20);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_truncate_sha256() {
        let value = render(r#"{{ "abcdefghijklmnopqrstuvwxyz" | truncate_sha256 12 }}"#);
        assert_eq!(value.len(), 12);
        assert!(value.starts_with("abcd"));
        assert_eq!(render(r#"{{ "short" | truncate_sha256 12 }}"#), "short");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_bytes("héllo", 2), "h");
        assert_eq!(truncate_bytes("héllo", 3), "hé");
    }

    #[test]
    fn test_string_containing_braces() {
        assert_eq!(render(r#"{{ "}}" }}"#), "}}");
    }

    #[rstest]
    #[case("{{ .Type ")]
    #[case("{{ if .Type }}x")]
    #[case("{{ end }}")]
    #[case("{{ else }}")]
    #[case("{{ }}")]
    #[case("{{ (.Type }}")]
    #[case("{{ .Type) }}")]
    #[case("{{ \"open }}")]
    #[case("{{ . }}")]
    #[case("{{ # }}")]
    fn test_parse_errors(#[case] source: &str) {
        assert!(
            matches!(Template::new(source), Err(TemplateError::Parse { .. })),
            "expected parse error for {source:?}"
        );
    }

    #[rstest]
    #[case("{{ .Nope }}")]
    #[case("{{ nope }}")]
    #[case("{{ truncate 3 }}")]
    #[case(r#"{{ printf "%s" }}"#)]
    #[case(r#"{{ printf "%d" "x" }}"#)]
    #[case("{{ random 0 }}")]
    #[case(r#"{{ .Type | "literal" }}"#)]
    fn test_render_errors(#[case] source: &str) {
        let template = Template::new(source).unwrap();
        assert!(matches!(
            template.render(&context()),
            Err(TemplateError::Render { .. })
        ));
    }

    #[test]
    fn test_too_many_actions() {
        let source = "{{ .Type }}".repeat(MAX_TEMPLATE_ACTIONS + 1);
        assert!(Template::new(source).is_err());
    }

    #[test]
    fn test_nesting_depth_is_capped() {
        let nested = |depth: usize| {
            format!(
                "{{{{ {}.Type{} }}}}",
                "(".repeat(depth),
                ")".repeat(depth)
            )
        };
        let deepest = Template::new(nested(MAX_NESTING_DEPTH)).unwrap();
        assert_eq!(deepest.render(&context()).unwrap(), "IAM");

        let err = Template::new(nested(MAX_NESTING_DEPTH + 1)).unwrap_err();
        assert!(matches!(err, TemplateError::Parse { ref reason, .. } if reason.contains("nested")));
        assert!(Template::new(nested(10_000)).is_err());
    }
}
