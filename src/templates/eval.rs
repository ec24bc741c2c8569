//! Evaluates a parsed template against a rendering context.

use super::context::RenderContext;
use super::parser::{Command, Node, Pipeline, Template, Term};
use super::value::Value;

struct Scope<'a> {
    context: &'a RenderContext,
    vars: Vec<(String, Value)>,
    dot: Option<Value>,
}

impl Template {
    /// Evaluates the template. Evaluation cannot fail once parsing succeeded.
    #[must_use]
    pub fn execute(&self, context: &RenderContext) -> String {
        let mut scope = Scope {
            context,
            vars: Vec::new(),
            dot: None,
        };
        let mut out = String::new();
        scope.nodes(&self.nodes, &mut out);
        out
    }
}

impl Scope<'_> {
    fn nodes(&mut self, nodes: &[Node], out: &mut String) {
        for node in nodes {
            self.node(node, out);
        }
    }

    fn block(&mut self, nodes: &[Node], out: &mut String) {
        let mark = self.vars.len();
        self.nodes(nodes, out);
        self.vars.truncate(mark);
    }

    fn node(&mut self, node: &Node, out: &mut String) {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Output(pipeline) => out.push_str(&self.pipeline(pipeline).text()),
            Node::Declare { name, pipeline } => {
                let value = self.pipeline(pipeline);
                self.vars.push((name.clone(), value));
            }
            Node::If {
                branches,
                otherwise,
            } => {
                let taken = branches
                    .iter()
                    .find(|(condition, _)| self.pipeline(condition).is_truthy());
                match taken {
                    Some((_, body)) => self.block(body, out),
                    None => self.block(otherwise, out),
                }
            }
            Node::Range {
                var,
                pipeline,
                body,
                otherwise,
            } => {
                let items = match self.pipeline(pipeline) {
                    Value::List(items) => items,
                    other if other.is_truthy() => vec![other.text()],
                    _ => Vec::new(),
                };
                if items.is_empty() {
                    self.block(otherwise, out);
                    return;
                }

                let saved_dot = self.dot.take();
                for item in items {
                    let mark = self.vars.len();
                    if let Some(name) = var {
                        self.vars.push((name.clone(), Value::Str(item.clone())));
                    }
                    self.dot = Some(Value::Str(item));
                    self.nodes(body, out);
                    self.vars.truncate(mark);
                }
                self.dot = saved_dot;
            }
        }
    }

    fn pipeline(&self, pipeline: &Pipeline) -> Value {
        let mut piped: Option<Value> = None;
        for command in &pipeline.commands {
            piped = Some(match command {
                Command::Term(term) => self.term(term),
                Command::Call { function, args } => {
                    let mut values: Vec<Value> = args.iter().map(|arg| self.term(arg)).collect();
                    values.extend(piped.take());
                    function.call(&values)
                }
            });
        }
        piped.unwrap_or_else(Value::empty)
    }

    fn term(&self, term: &Term) -> Value {
        match term {
            Term::Key(key) => self.context.get(*key),
            Term::Dot => self.dot.clone().unwrap_or_else(Value::empty),
            Term::Var(name) => self
                .vars
                .iter()
                .rev()
                .find(|(declared, _)| declared == name)
                .map_or_else(Value::empty, |(_, value)| value.clone()),
            Term::Literal(value) => value.clone(),
            Term::Group(inner) => self.pipeline(inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StackConfig, apply_defaults};

    fn render(source: &str) -> String {
        let mut config = StackConfig::default();
        config.domain = String::from("example.com");
        config.hostname = String::from("mail.example.com");
        config.hostnames = vec![
            String::from("mail.example.com"),
            String::from("mx.example.com"),
        ];
        apply_defaults(&mut config);
        let context = RenderContext::from_config(&config);
        Template::parse("test", source).unwrap().execute(&context)
    }

    #[test]
    fn test_interpolation_and_pipes() {
        assert_eq!(render("{{ .Domain | upper }}"), "EXAMPLE.COM");
        assert_eq!(render("{{ .RelayHost | default \"none\" }}"), "none");
        assert_eq!(render("{{ div .MessageSizeLimit 0 }}"), "0");
        assert_eq!(render("{{ index .Hostnames 7 }}"), "");
        assert_eq!(render("{{ .Hostnames | join \",\" }}"), "mail.example.com,mx.example.com");
        assert_eq!(render("{{ len (split .Domain \".\") }}"), "2");
    }

    #[test]
    fn test_conditionals() {
        let source = "{{ if eq .TLSFlavor \"letsencrypt\" }}acme{{ else if .TLSEnabled }}custom{{ else }}plain{{ end }}";
        assert_eq!(render(source), "plain");
        assert_eq!(render("{{ if not .EnableWebmail }}no webmail{{ end }}"), "no webmail");
    }

    #[test]
    fn test_range_with_variable_and_dot() {
        let source = "{{ range $i := .Hostnames }}[{{ $i }}={{ . }}]{{ end }}";
        assert_eq!(
            render(source),
            "[mail.example.com=mail.example.com][mx.example.com=mx.example.com]"
        );
        assert_eq!(render("{{ range .RelayHost }}x{{ else }}empty{{ end }}"), "empty");
    }

    #[test]
    fn test_trimmed_lines() {
        let source = "a\n{{- if .Domain }}\nb\n{{- end }}\n";
        assert_eq!(render(source), "a\nb\n");
    }

    #[test]
    fn test_variables_do_not_leak_between_iterations() {
        let source = "{{ $d := .Domain }}{{ range .Hostnames }}{{ $d }};{{ end }}";
        assert_eq!(render(source), "example.com;example.com;");
    }
}
