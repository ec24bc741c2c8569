//! Parses template source into a tree.
//!
//! Names are resolved here: unknown context keys, unknown functions, wrong
//! argument counts, undeclared variables and unbalanced blocks are all syntax
//! errors, so a parsed template always evaluates.

use std::collections::BTreeSet;

use crate::error::RenderError;

use super::context::ContextKey;
use super::functions::Function;
use super::lexer::{LexError, Segment, Token, split_segments, tokenize};
use super::value::Value;

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    pub(super) id: String,
    pub(super) nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
pub(super) enum Node {
    Text(String),
    Output(Pipeline),
    Declare {
        name: String,
        pipeline: Pipeline,
    },
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        var: Option<String>,
        pipeline: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone)]
pub(super) struct Pipeline {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
pub(super) enum Command {
    Call { function: Function, args: Vec<Term> },
    Term(Term),
}

#[derive(Debug, Clone)]
pub(super) enum Term {
    Key(ContextKey),
    Dot,
    Var(String),
    Literal(Value),
    Group(Pipeline),
}

enum Stop {
    End,
    Else,
    ElseIf(Vec<Token>),
    Eof,
}

struct Parser {
    template: String,
    segments: std::vec::IntoIter<Segment>,
    line: usize,
    scopes: Vec<Vec<String>>,
    range_depth: usize,
}

impl Template {
    /// Parses template source.
    ///
    /// # Errors
    ///
    /// Returns `RenderError::Syntax` with the offending line.
    pub fn parse(id: &str, source: &str) -> Result<Self, RenderError> {
        let segments = split_segments(source).map_err(|LexError { line, message }| {
            RenderError::Syntax {
                template: id.to_string(),
                line,
                message,
            }
        })?;

        let mut parser = Parser {
            template: id.to_string(),
            segments: segments.into_iter(),
            line: 1,
            scopes: vec![Vec::new()],
            range_depth: 0,
        };

        let (nodes, stop) = parser.parse_block()?;
        match stop {
            Stop::Eof => Ok(Self {
                id: id.to_string(),
                nodes,
            }),
            Stop::End => Err(parser.error("unexpected {{end}}")),
            Stop::Else | Stop::ElseIf(_) => Err(parser.error("unexpected {{else}}")),
        }
    }

    /// Template identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Context keys the template references.
    #[must_use]
    pub fn referenced_keys(&self) -> BTreeSet<ContextKey> {
        let mut keys = BTreeSet::new();
        collect_nodes(&self.nodes, &mut keys);
        keys
    }
}

impl Parser {
    fn error(&self, message: impl Into<String>) -> RenderError {
        RenderError::Syntax {
            template: self.template.clone(),
            line: self.line,
            message: message.into(),
        }
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    fn is_declared(&self, name: &str) -> bool {
        self.scopes.iter().flatten().any(|declared| declared == name)
    }

    fn parse_block(&mut self) -> Result<(Vec<Node>, Stop), RenderError> {
        let mut nodes = Vec::new();

        while let Some(segment) = self.segments.next() {
            let (body, line) = match segment {
                Segment::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Segment::Action { body, line } => (body, line),
            };
            self.line = line;
            let tokens = tokenize(&body).map_err(|message| self.error(message))?;

            match tokens.as_slice() {
                [Token::Ident(word)] if word == "end" => return Ok((nodes, Stop::End)),
                [Token::Ident(word)] if word == "else" => return Ok((nodes, Stop::Else)),
                [Token::Ident(word), Token::Ident(next), rest @ ..]
                    if word == "else" && next == "if" =>
                {
                    return Ok((nodes, Stop::ElseIf(rest.to_vec())));
                }
                [Token::Ident(word), rest @ ..] if word == "if" => {
                    nodes.push(self.parse_if(rest)?);
                }
                [Token::Ident(word), rest @ ..] if word == "range" => {
                    nodes.push(self.parse_range(rest)?);
                }
                [Token::Ident(word), ..] if word == "end" || word == "else" => {
                    return Err(self.error(format!("unexpected arguments to {word}")));
                }
                [Token::Var(name), Token::Declare, rest @ ..] => {
                    let pipeline = self.parse_pipeline(rest)?;
                    self.declare(name);
                    nodes.push(Node::Declare {
                        name: name.clone(),
                        pipeline,
                    });
                }
                _ => nodes.push(Node::Output(self.parse_pipeline(&tokens)?)),
            }
        }

        Ok((nodes, Stop::Eof))
    }

    fn parse_scoped_block(&mut self) -> Result<(Vec<Node>, Stop), RenderError> {
        self.scopes.push(Vec::new());
        let result = self.parse_block();
        self.scopes.pop();
        result
    }

    fn parse_if(&mut self, tokens: &[Token]) -> Result<Node, RenderError> {
        let mut condition = self.parse_pipeline(tokens)?;
        let mut branches = Vec::new();

        loop {
            let (body, stop) = self.parse_scoped_block()?;
            branches.push((condition, body));
            match stop {
                Stop::End => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    });
                }
                Stop::ElseIf(tokens) => condition = self.parse_pipeline(&tokens)?,
                Stop::Else => {
                    let (otherwise, stop) = self.parse_scoped_block()?;
                    return match stop {
                        Stop::End => Ok(Node::If {
                            branches,
                            otherwise,
                        }),
                        _ => Err(self.error("expected {{end}} after {{else}}")),
                    };
                }
                Stop::Eof => return Err(self.error("unclosed {{if}}")),
            }
        }
    }

    fn parse_range(&mut self, tokens: &[Token]) -> Result<Node, RenderError> {
        let (var, pipeline) = match tokens {
            [Token::Var(name), Token::Declare, rest @ ..] => {
                (Some(name.clone()), self.parse_pipeline(rest)?)
            }
            _ => (None, self.parse_pipeline(tokens)?),
        };

        self.scopes.push(var.iter().cloned().collect());
        self.range_depth += 1;
        let result = self.parse_block();
        self.range_depth -= 1;
        self.scopes.pop();
        let (body, stop) = result?;

        let otherwise = match stop {
            Stop::End => Vec::new(),
            Stop::Else => match self.parse_scoped_block()? {
                (otherwise, Stop::End) => otherwise,
                _ => return Err(self.error("expected {{end}} after {{else}}")),
            },
            Stop::ElseIf(_) => return Err(self.error("{{else if}} is not allowed in {{range}}")),
            Stop::Eof => return Err(self.error("unclosed {{range}}")),
        };

        Ok(Node::Range {
            var,
            pipeline,
            body,
            otherwise,
        })
    }

    fn parse_pipeline(&self, tokens: &[Token]) -> Result<Pipeline, RenderError> {
        if tokens.is_empty() {
            return Err(self.error("missing value"));
        }

        let mut stages = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => {
                    depth = depth
                        .checked_sub(1)
                        .ok_or_else(|| self.error("unexpected ')'"))?;
                }
                Token::Pipe if depth == 0 => {
                    stages.push(&tokens[start..i]);
                    start = i + 1;
                }
                _ => {}
            }
        }
        if depth != 0 {
            return Err(self.error("unclosed '('"));
        }
        stages.push(&tokens[start..]);

        let commands = stages
            .into_iter()
            .enumerate()
            .map(|(i, stage)| self.parse_command(stage, i > 0))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pipeline { commands })
    }

    fn parse_command(&self, tokens: &[Token], piped: bool) -> Result<Command, RenderError> {
        match tokens {
            [] => Err(self.error("empty command in pipeline")),
            [Token::Ident(name), rest @ ..] if name != "true" && name != "false" => {
                let function = Function::from_name(name)
                    .ok_or_else(|| self.error(format!("function \"{name}\" not defined")))?;
                let args = self.parse_terms(rest)?;
                let count = args.len() + usize::from(piped);
                let (min, max) = function.arity();
                if count < min || count > max {
                    return Err(self.error(format!(
                        "wrong number of arguments for {name}: got {count}"
                    )));
                }
                Ok(Command::Call { function, args })
            }
            _ => {
                if piped {
                    return Err(self.error("cannot pipe into a value"));
                }
                let mut terms = self.parse_terms(tokens)?;
                match (terms.pop(), terms.is_empty()) {
                    (Some(term), true) => Ok(Command::Term(term)),
                    _ => Err(self.error("expected a single value or a function call")),
                }
            }
        }
    }

    fn parse_terms(&self, tokens: &[Token]) -> Result<Vec<Term>, RenderError> {
        let mut terms = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            let term = match &tokens[i] {
                Token::Field(name) => ContextKey::from_name(name)
                    .map(Term::Key)
                    .ok_or_else(|| self.error(format!("unknown key .{name}")))?,
                Token::Dot if self.range_depth > 0 => Term::Dot,
                Token::Dot => return Err(self.error("'.' is only defined inside {{range}}")),
                Token::Var(name) if self.is_declared(name) => Term::Var(name.clone()),
                Token::Var(name) => return Err(self.error(format!("undefined variable ${name}"))),
                Token::Str(text) => Term::Literal(Value::Str(text.clone())),
                Token::Int(value) => Term::Literal(Value::Int(*value)),
                Token::Ident(word) if word == "true" => Term::Literal(Value::Bool(true)),
                Token::Ident(word) if word == "false" => Term::Literal(Value::Bool(false)),
                Token::Ident(word) => {
                    return Err(self.error(format!(
                        "function \"{word}\" used as an argument; wrap the call in parentheses"
                    )));
                }
                Token::LParen => {
                    let close = matching_paren(tokens, i)
                        .ok_or_else(|| self.error("unclosed '('"))?;
                    let inner = self.parse_pipeline(&tokens[i + 1..close])?;
                    i = close;
                    Term::Group(inner)
                }
                Token::RParen => return Err(self.error("unexpected ')'")),
                Token::Pipe | Token::Declare => return Err(self.error("unexpected operator")),
            };
            terms.push(term);
            i += 1;
        }

        Ok(terms)
    }
}

fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn collect_nodes(nodes: &[Node], keys: &mut BTreeSet<ContextKey>) {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Output(pipeline) | Node::Declare { pipeline, .. } => {
                collect_pipeline(pipeline, keys);
            }
            Node::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    collect_pipeline(condition, keys);
                    collect_nodes(body, keys);
                }
                collect_nodes(otherwise, keys);
            }
            Node::Range {
                pipeline,
                body,
                otherwise,
                ..
            } => {
                collect_pipeline(pipeline, keys);
                collect_nodes(body, keys);
                collect_nodes(otherwise, keys);
            }
        }
    }
}

fn collect_pipeline(pipeline: &Pipeline, keys: &mut BTreeSet<ContextKey>) {
    for command in &pipeline.commands {
        let terms = match command {
            Command::Call { args, .. } => args.as_slice(),
            Command::Term(term) => std::slice::from_ref(term),
        };
        for term in terms {
            match term {
                Term::Key(key) => {
                    keys.insert(*key);
                }
                Term::Group(inner) => collect_pipeline(inner, keys),
                Term::Dot | Term::Var(_) | Term::Literal(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syntax_line(source: &str) -> Option<usize> {
        match Template::parse("test", source) {
            Err(RenderError::Syntax { line, .. }) => Some(line),
            _ => None,
        }
    }

    #[test]
    fn test_referenced_keys() {
        let template = Template::parse(
            "test",
            "{{ .Domain }}{{ if .EnableWebmail }}{{ range .Hostnames }}{{ . }}{{ end }}{{ end }}",
        )
        .unwrap();
        let keys: Vec<_> = template.referenced_keys().into_iter().collect();
        assert_eq!(
            keys,
            vec![ContextKey::Domain, ContextKey::Hostnames, ContextKey::EnableWebmail]
        );
    }

    #[test]
    fn test_unknown_key_and_function_are_syntax_errors() {
        assert_eq!(syntax_line("ok\n{{ .NoSuchKey }}"), Some(2));
        assert_eq!(syntax_line("{{ printf \"%s\" .Domain }}"), Some(1));
        assert_eq!(syntax_line("{{ upper .Domain .Hostname }}"), Some(1));
    }

    #[test]
    fn test_unbalanced_blocks() {
        assert!(syntax_line("{{ if .Domain }}x").is_some());
        assert!(syntax_line("x{{ end }}").is_some());
        assert!(syntax_line("{{ range .Hostnames }}{{ else if .Domain }}{{ end }}").is_some());
    }

    #[test]
    fn test_variable_scoping() {
        assert!(Template::parse("t", "{{ $a := .Domain }}{{ $a }}").is_ok());
        assert!(syntax_line("{{ if .Domain }}{{ $a := 1 }}{{ end }}{{ $a }}").is_some());
        assert!(syntax_line("{{ $undefined }}").is_some());
        assert!(syntax_line("{{ . }}").is_some());
    }

    #[test]
    fn test_pipe_into_value_rejected() {
        assert!(syntax_line("{{ .Domain | .Hostname }}").is_some());
        assert!(Template::parse("t", "{{ .Domain | upper }}").is_ok());
    }
}
