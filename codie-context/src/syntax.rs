//! Syntax-aware span extraction backed by tree-sitter grammars.
//!
//! Each supported [`Grammar`] maps a handful of node kinds to a [`SpanKind`].
//! Function, method and type definitions become chunks; imports are extracted
//! too (so callers can inspect them) but are never emitted as chunks.
//!
//! Spans nest. A Python class produces one span for the whole class and one per
//! method, and each method span records the class it sits in.
use crate::text::Chunk;
use serde::Serialize;
use std::collections::HashSet;
use tree_sitter::{Node, Parser, Tree};

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("failed to load {grammar} grammar: {message}")]
    Grammar {
        grammar: &'static str,
        message: String,
    },

    #[error("{grammar} parser produced no syntax tree")]
    Parse { grammar: &'static str },
}

/// Languages with a syntax-aware splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    Go,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Rust,
}

impl Grammar {
    pub const ALL: [Grammar; 6] = [
        Grammar::Go,
        Grammar::Python,
        Grammar::JavaScript,
        Grammar::TypeScript,
        Grammar::Tsx,
        Grammar::Rust,
    ];

    /// Resolve a grammar from a file extension, without the leading dot.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|grammar| grammar.extensions().contains(&extension.as_str()))
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Grammar::Go => &["go"],
            Grammar::Python => &["py"],
            Grammar::JavaScript => &["js", "jsx"],
            Grammar::TypeScript => &["ts"],
            Grammar::Tsx => &["tsx"],
            Grammar::Rust => &["rs"],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Grammar::Go => "go",
            Grammar::Python => "python",
            Grammar::JavaScript => "javascript",
            Grammar::TypeScript => "typescript",
            Grammar::Tsx => "tsx",
            Grammar::Rust => "rust",
        }
    }

    fn language(&self) -> tree_sitter::Language {
        match self {
            Grammar::Go => tree_sitter_go::LANGUAGE.into(),
            Grammar::Python => tree_sitter_python::LANGUAGE.into(),
            Grammar::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Grammar::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Grammar::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Grammar::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Function,
    Method,
    Class,
    Struct,
    Import,
}

impl SpanKind {
    /// Whether spans of this kind are emitted as chunks.
    pub fn is_definition(&self) -> bool {
        !matches!(self, SpanKind::Import)
    }
}

/// One syntax node of interest, with 1-indexed inclusive line bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxSpan {
    pub kind: SpanKind,
    pub name: Option<String>,
    pub enclosing_class: Option<String>,
    pub start_byte: usize,
    pub end_byte: usize,
    pub start_line: usize,
    pub end_line: usize,
}

impl SyntaxSpan {
    /// Convert to a chunk covering every line of the span.
    ///
    /// Returns `None` when the covered lines are blank.
    pub fn to_chunk(&self, source: &str) -> Option<Chunk> {
        let text = source
            .lines()
            .skip(self.start_line - 1)
            .take(self.end_line + 1 - self.start_line)
            .collect::<Vec<_>>()
            .join("\n");
        if text.trim().is_empty() {
            return None;
        }

        let mut chunk = Chunk::new(text, self.start_line, self.end_line);
        match self.kind {
            SpanKind::Function | SpanKind::Method => {
                chunk.function = self.name.clone();
                chunk.class = self.enclosing_class.clone();
            }
            SpanKind::Class | SpanKind::Struct => {
                chunk.class = self.name.clone().or_else(|| self.enclosing_class.clone());
            }
            SpanKind::Import => {}
        }
        Some(chunk)
    }
}

/// Parse `source` with the given grammar.
pub fn parse(grammar: Grammar, source: &str) -> Result<Tree, ChunkError> {
    let mut parser = Parser::new();
    parser
        .set_language(&grammar.language())
        .map_err(|e| ChunkError::Grammar {
            grammar: grammar.name(),
            message: e.to_string(),
        })?;
    parser.parse(source, None).ok_or(ChunkError::Parse {
        grammar: grammar.name(),
    })
}

/// Extract every span of interest in document order, imports included.
///
/// Nodes that resolve to the same byte range are reported once.
pub fn extract_spans(grammar: Grammar, source: &str) -> Result<Vec<SyntaxSpan>, ChunkError> {
    let tree = parse(grammar, source)?;
    let mut spans = Vec::new();
    visit(grammar, tree.root_node(), source.as_bytes(), None, &mut spans);

    let mut seen = HashSet::new();
    spans.retain(|span| seen.insert((span.start_byte, span.end_byte)));
    Ok(spans)
}

/// Chunker that emits one chunk per function, method or type definition.
#[derive(Debug, Clone, Copy)]
pub struct SyntaxChunker {
    grammar: Grammar,
}

impl SyntaxChunker {
    pub fn new(grammar: Grammar) -> Self {
        Self { grammar }
    }

    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    /// Definitions are atomic, so no size bound applies here.
    pub fn split(&self, source: &str) -> Result<Vec<Chunk>, ChunkError> {
        let chunks = extract_spans(self.grammar, source)?
            .iter()
            .filter(|span| span.kind.is_definition())
            .filter_map(|span| span.to_chunk(source))
            .enumerate()
            .map(|(sequence, mut chunk)| {
                chunk.sequence = sequence;
                chunk
            })
            .collect();
        Ok(chunks)
    }
}

struct Classified<'tree> {
    kind: SpanKind,
    name: Option<String>,
    node: Node<'tree>,
    /// Class name handed down to descendants.
    scope: Option<String>,
}

fn visit(
    grammar: Grammar,
    node: Node<'_>,
    source: &[u8],
    enclosing_class: Option<&str>,
    spans: &mut Vec<SyntaxSpan>,
) {
    let mut scope = enclosing_class.map(str::to_string);

    if let Some(found) = classify(grammar, node, source, enclosing_class) {
        let enclosing = match found.kind {
            SpanKind::Function | SpanKind::Method => found.scope.clone(),
            _ => enclosing_class.map(str::to_string),
        };
        spans.push(SyntaxSpan {
            kind: found.kind,
            name: found.name,
            enclosing_class: enclosing,
            start_byte: found.node.start_byte(),
            end_byte: found.node.end_byte(),
            start_line: found.node.start_position().row + 1,
            end_line: found.node.end_position().row + 1,
        });
        if found.kind == SpanKind::Import {
            return;
        }
        if found.scope.is_some() {
            scope = found.scope;
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        visit(grammar, child, source, scope.as_deref(), spans);
    }
}

fn field_text(node: Node<'_>, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| n.utf8_text(source).ok())
        .map(str::to_string)
}

fn classify<'tree>(
    grammar: Grammar,
    node: Node<'tree>,
    source: &[u8],
    enclosing_class: Option<&str>,
) -> Option<Classified<'tree>> {
    if !node.is_named() {
        return None;
    }
    let inherited = enclosing_class.map(str::to_string);
    let simple = |kind: SpanKind, scope: Option<String>| Classified {
        kind,
        name: field_text(node, "name", source),
        node,
        scope,
    };
    let function_or_method = || {
        if enclosing_class.is_some() {
            SpanKind::Method
        } else {
            SpanKind::Function
        }
    };

    match grammar {
        Grammar::Go => match node.kind() {
            "function_declaration" => Some(simple(SpanKind::Function, None)),
            "method_declaration" => Some(simple(SpanKind::Method, go_receiver_type(node, source))),
            "type_spec"
                if node
                    .child_by_field_name("type")
                    .is_some_and(|t| t.kind() == "struct_type") =>
            {
                let name = field_text(node, "name", source);
                Some(Classified {
                    kind: SpanKind::Struct,
                    scope: name.clone(),
                    name,
                    node,
                })
            }
            "import_declaration" => Some(simple(SpanKind::Import, None)),
            _ => None,
        },
        Grammar::Python => match node.kind() {
            "function_definition" => Some(simple(function_or_method(), inherited)),
            "class_definition" => {
                let name = field_text(node, "name", source);
                Some(Classified {
                    kind: SpanKind::Class,
                    scope: name.clone(),
                    name,
                    node,
                })
            }
            "import_statement" | "import_from_statement" => Some(simple(SpanKind::Import, None)),
            _ => None,
        },
        Grammar::JavaScript | Grammar::TypeScript | Grammar::Tsx => match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                Some(simple(SpanKind::Function, inherited))
            }
            "method_definition" => Some(simple(SpanKind::Method, inherited)),
            "class_declaration" | "abstract_class_declaration" => {
                let name = field_text(node, "name", source);
                Some(Classified {
                    kind: SpanKind::Class,
                    scope: name.clone(),
                    name,
                    node,
                })
            }
            "interface_declaration" => Some(simple(SpanKind::Struct, None)),
            "arrow_function" | "function_expression" | "function" => {
                let declarator = node
                    .parent()
                    .filter(|parent| parent.kind() == "variable_declarator")?;
                Some(Classified {
                    kind: function_or_method(),
                    name: field_text(declarator, "name", source),
                    node: declarator,
                    scope: inherited,
                })
            }
            "import_statement" => Some(simple(SpanKind::Import, None)),
            _ => None,
        },
        Grammar::Rust => match node.kind() {
            "function_item" => Some(simple(function_or_method(), inherited)),
            "struct_item" | "enum_item" | "union_item" => Some(simple(SpanKind::Struct, None)),
            "trait_item" => {
                let name = field_text(node, "name", source);
                Some(Classified {
                    kind: SpanKind::Class,
                    scope: name.clone(),
                    name,
                    node,
                })
            }
            "impl_item" => {
                let name = field_text(node, "type", source);
                Some(Classified {
                    kind: SpanKind::Class,
                    scope: name.clone(),
                    name,
                    node,
                })
            }
            "use_declaration" => Some(simple(SpanKind::Import, None)),
            _ => None,
        },
    }
}

/// `func (s *Server[T]) Start()` yields `Server`.
fn go_receiver_type(node: Node<'_>, source: &[u8]) -> Option<String> {
    let receiver = field_text(node, "receiver", source)?;
    let last = receiver
        .trim_matches(|c| c == '(' || c == ')')
        .split_whitespace()
        .last()?;
    let name = last.trim_start_matches('*');
    let name = name.split('[').next().unwrap_or(name);
    (!name.is_empty()).then(|| name.to_string())
}
