//! Minimal Liquid-style template rendering
//!
//! Supports exactly the subset stored channel templates use:
//! `{{ variable.path }}`, `{% if cond %} ... {% else %} ... {% endif %}`,
//! and `{% for item in path %} ... {% endfor %}`. Conditions are a single
//! variable (truthiness) or an `==` / `!=` comparison between variables and
//! quoted literals. Unknown variables render as the empty string, in
//! keeping with Liquid's lenient behaviour.

use serde_json::Value;

#[derive(Debug)]
pub enum TemplateError {
    Syntax(String),
}

impl std::fmt::Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::Syntax(msg) => write!(f, "template syntax error: {}", msg),
        }
    }
}

impl std::error::Error for TemplateError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Output(String),
    Tag(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(String),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Truthy(Operand),
    Eq(Operand, Operand),
    Ne(Operand, Operand),
}

#[derive(Debug)]
enum Node {
    Text(String),
    Output(Operand),
    If {
        condition: Condition,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    For {
        binding: String,
        sequence: Operand,
        body: Vec<Node>,
    },
}

fn tokenize(template: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = template;

    while !rest.is_empty() {
        let next_output = rest.find("{{");
        let next_tag = rest.find("{%");

        let (index, is_tag) = match (next_output, next_tag) {
            (Some(o), Some(t)) if t < o => (t, true),
            (Some(o), _) => (o, false),
            (None, Some(t)) => (t, true),
            (None, None) => {
                tokens.push(Token::Text(rest.to_string()));
                break;
            }
        };

        if index > 0 {
            tokens.push(Token::Text(rest[..index].to_string()));
        }
        rest = &rest[index..];

        let (open, close) = if is_tag { ("{%", "%}") } else { ("{{", "}}") };
        // Search for the closing delimiter strictly after the opener, so
        // overlapping sequences like "{%}" fail cleanly.
        let Some(end) = rest[open.len()..].find(close).map(|i| i + open.len()) else {
            return Err(TemplateError::Syntax(format!("unterminated {open}")));
        };
        let inner = rest[open.len()..end].trim().to_string();
        tokens.push(if is_tag {
            Token::Tag(inner)
        } else {
            Token::Output(inner)
        });
        rest = &rest[end + close.len()..];
    }

    Ok(tokens)
}

fn parse_operand(s: &str) -> Operand {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        Operand::Literal(s[1..s.len() - 1].to_string())
    } else {
        Operand::Path(s.to_string())
    }
}

fn parse_condition(s: &str) -> Condition {
    if let Some((left, right)) = s.split_once("==") {
        Condition::Eq(parse_operand(left), parse_operand(right))
    } else if let Some((left, right)) = s.split_once("!=") {
        Condition::Ne(parse_operand(left), parse_operand(right))
    } else {
        Condition::Truthy(parse_operand(s))
    }
}

/// Parse tokens into nodes until one of `until` tags shows up; returns the
/// nodes and the terminating tag (None at end of input).
fn parse_nodes(
    tokens: &mut std::vec::IntoIter<Token>,
    until: &[&str],
) -> Result<(Vec<Node>, Option<String>), TemplateError> {
    let mut nodes = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            Token::Text(text) => nodes.push(Node::Text(text)),
            Token::Output(expr) => nodes.push(Node::Output(parse_operand(&expr))),
            Token::Tag(tag) => {
                let keyword = tag.split_whitespace().next().unwrap_or("");
                if until.contains(&keyword) {
                    return Ok((nodes, Some(tag)));
                }
                match keyword {
                    "if" => {
                        let condition = parse_condition(tag.trim_start_matches("if").trim());
                        let (then_body, terminator) =
                            parse_nodes(tokens, &["else", "endif"])?;
                        let (else_body, terminator) = match terminator.as_deref() {
                            Some("else") => {
                                let (body, terminator) = parse_nodes(tokens, &["endif"])?;
                                (body, terminator)
                            }
                            other => (Vec::new(), other.map(str::to_string)),
                        };
                        if terminator.as_deref() != Some("endif") {
                            return Err(TemplateError::Syntax("missing {% endif %}".to_string()));
                        }
                        nodes.push(Node::If {
                            condition,
                            then_body,
                            else_body,
                        });
                    }
                    "for" => {
                        let spec = tag.trim_start_matches("for").trim();
                        let Some((binding, sequence)) = spec.split_once(" in ") else {
                            return Err(TemplateError::Syntax(format!(
                                "malformed for tag {tag:?}"
                            )));
                        };
                        let (body, terminator) = parse_nodes(tokens, &["endfor"])?;
                        if terminator.as_deref() != Some("endfor") {
                            return Err(TemplateError::Syntax(
                                "missing {% endfor %}".to_string(),
                            ));
                        }
                        nodes.push(Node::For {
                            binding: binding.trim().to_string(),
                            sequence: parse_operand(sequence),
                            body,
                        });
                    }
                    other => {
                        return Err(TemplateError::Syntax(format!("unknown tag {other:?}")));
                    }
                }
            }
        }
    }

    Ok((nodes, None))
}

struct Scope<'a> {
    root: &'a Value,
    bindings: Vec<(String, Value)>,
}

impl Scope<'_> {
    fn lookup(&self, path: &str) -> Value {
        let mut segments = path.split('.').filter(|s| !s.is_empty());
        let Some(first) = segments.next() else {
            return Value::Null;
        };

        // Innermost loop bindings shadow the root context.
        let mut current = self
            .bindings
            .iter()
            .rev()
            .find(|(name, _)| name == first)
            .map(|(_, value)| value.clone())
            .unwrap_or_else(|| self.root.get(first).cloned().unwrap_or(Value::Null));

        for segment in segments {
            current = match &current {
                Value::Object(map) => map.get(segment).cloned().unwrap_or(Value::Null),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i).cloned())
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            };
        }
        current
    }

    fn resolve(&self, operand: &Operand) -> Value {
        match operand {
            Operand::Literal(s) => Value::String(s.clone()),
            Operand::Path(path) => self.lookup(path),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    // Comparisons against quoted literals work for every scalar.
    left == right || to_text(left) == to_text(right)
}

fn render_nodes(nodes: &[Node], scope: &mut Scope<'_>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(operand) => out.push_str(&to_text(&scope.resolve(operand))),
            Node::If {
                condition,
                then_body,
                else_body,
            } => {
                let pass = match condition {
                    Condition::Truthy(operand) => truthy(&scope.resolve(operand)),
                    Condition::Eq(left, right) => {
                        values_equal(&scope.resolve(left), &scope.resolve(right))
                    }
                    Condition::Ne(left, right) => {
                        !values_equal(&scope.resolve(left), &scope.resolve(right))
                    }
                };
                let body = if pass { then_body } else { else_body };
                render_nodes(body, scope, out);
            }
            Node::For {
                binding,
                sequence,
                body,
            } => {
                let Value::Array(items) = scope.resolve(sequence) else {
                    continue;
                };
                for item in items {
                    scope.bindings.push((binding.clone(), item));
                    render_nodes(body, scope, out);
                    scope.bindings.pop();
                }
            }
        }
    }
}

/// Render `template` against a JSON context.
pub fn render(template: &str, context: &Value) -> Result<String, TemplateError> {
    let tokens = tokenize(template)?;
    let (nodes, terminator) = parse_nodes(&mut tokens.into_iter(), &[])?;
    if let Some(tag) = terminator {
        return Err(TemplateError::Syntax(format!("unexpected tag {tag:?}")));
    }

    let mut scope = Scope {
        root: context,
        bindings: Vec::new(),
    };
    let mut out = String::new();
    render_nodes(&nodes, &mut scope, &mut out);
    Ok(out)
}
