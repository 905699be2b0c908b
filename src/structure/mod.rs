//! Syntactic structure extraction via tree-sitter.
//!
//! Parses full source text into named scopes (functions, methods, classes)
//! and import declarations. Extraction is an optional enrichment layer for
//! the review pipeline: every failure here is classified and recoverable,
//! never a reason to abort a review.

use std::collections::HashMap;

use thiserror::Error;
use tree_sitter::{Node, Parser};

use crate::diff::Language;

/// Name used when no name node can be resolved for a scope.
pub const ANONYMOUS_SCOPE: &str = "<anonymous>";

/// Kind of a named syntactic region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Function,
    Method,
    Class,
}

impl ScopeKind {
    pub fn name(&self) -> &'static str {
        match self {
            ScopeKind::Function => "function",
            ScopeKind::Method => "method",
            ScopeKind::Class => "class",
        }
    }
}

/// A named syntactic region with 1-based inclusive line bounds in the
/// current file version.
#[derive(Debug, Clone)]
pub struct AstScope {
    pub kind: ScopeKind,
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
}

/// One import/use declaration.
#[derive(Debug, Clone)]
pub struct AstImport {
    /// Source module string ("react", "collections.abc", "std::fmt", ...).
    pub source: String,
    /// Imported specifier names; empty when not resolved.
    pub specifiers: Vec<String>,
    pub is_default: bool,
}

/// Structure extracted from one file.
#[derive(Debug, Clone)]
pub struct AstFileContext {
    pub path: String,
    pub language: Language,
    pub scopes: Vec<AstScope>,
    pub imports: Vec<AstImport>,
}

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("syntax backend is not initialized")]
    InitFailed,
    #[error("language not supported by the syntax backend: {0}")]
    LanguageNotSupported(&'static str),
    #[error("failed to parse {0}")]
    ParseFailed(String),
}

/// Explicit extractor state: an initialization flag plus a cache of loaded
/// grammars keyed by language. Construct one per process (or per test);
/// `ensure_initialized` is idempotent and safe to call redundantly.
pub struct StructureExtractor {
    initialized: bool,
    grammars: HashMap<Language, tree_sitter::Language>,
}

impl Default for StructureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl StructureExtractor {
    pub fn new() -> Self {
        Self {
            initialized: false,
            grammars: HashMap::new(),
        }
    }

    /// One-time backend initialization. Idempotent.
    pub fn ensure_initialized(&mut self) -> Result<(), StructureError> {
        self.initialized = true;
        Ok(())
    }

    /// Extract scopes and imports from full source text.
    ///
    /// Fails closed: a backend error or a null parse tree yields
    /// [`StructureError::ParseFailed`], never a panic across this boundary.
    pub fn extract(
        &mut self,
        source: &str,
        language: Language,
        path: &str,
    ) -> Result<AstFileContext, StructureError> {
        if !self.initialized {
            return Err(StructureError::InitFailed);
        }

        let grammar = self.grammar_for(language).clone();
        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|_| StructureError::LanguageNotSupported(language.name()))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| StructureError::ParseFailed(path.to_string()))?;

        let mut scopes = Vec::new();
        let mut imports = Vec::new();
        collect(tree.root_node(), source, language, &mut scopes, &mut imports);

        Ok(AstFileContext {
            path: path.to_string(),
            language,
            scopes,
            imports,
        })
    }

    /// Lazy, cached grammar loading keyed by language.
    fn grammar_for(&mut self, language: Language) -> &tree_sitter::Language {
        self.grammars.entry(language).or_insert_with(|| match language {
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Language::Php => tree_sitter_php::LANGUAGE_PHP.into(),
        })
    }
}

fn is_js_family(language: Language) -> bool {
    matches!(
        language,
        Language::JavaScript | Language::TypeScript | Language::Tsx
    )
}

/// Closed mapping of syntax-node kinds to scope kinds, per language.
fn scope_kind_for(language: Language, node_kind: &str) -> Option<ScopeKind> {
    match language {
        Language::JavaScript | Language::TypeScript | Language::Tsx => match node_kind {
            "function_declaration"
            | "generator_function_declaration"
            | "function_expression"
            | "arrow_function" => Some(ScopeKind::Function),
            "method_definition" => Some(ScopeKind::Method),
            "class_declaration" | "class" => Some(ScopeKind::Class),
            _ => None,
        },
        Language::Python => match node_kind {
            // Nesting inside a class turns a function into a method below.
            "function_definition" => Some(ScopeKind::Function),
            "class_definition" => Some(ScopeKind::Class),
            _ => None,
        },
        Language::Rust => match node_kind {
            "function_item" => Some(ScopeKind::Function),
            "impl_item" | "trait_item" => Some(ScopeKind::Class),
            _ => None,
        },
        Language::Go => match node_kind {
            "function_declaration" => Some(ScopeKind::Function),
            "method_declaration" => Some(ScopeKind::Method),
            _ => None,
        },
        Language::Ruby => match node_kind {
            "method" => Some(ScopeKind::Method),
            "singleton_method" => Some(ScopeKind::Method),
            "class" | "module" => Some(ScopeKind::Class),
            _ => None,
        },
        Language::Java => match node_kind {
            "method_declaration" | "constructor_declaration" => Some(ScopeKind::Method),
            "class_declaration" | "interface_declaration" => Some(ScopeKind::Class),
            _ => None,
        },
        Language::C => match node_kind {
            "function_definition" => Some(ScopeKind::Function),
            _ => None,
        },
        Language::Cpp => match node_kind {
            "function_definition" => Some(ScopeKind::Function),
            "class_specifier" | "struct_specifier" => Some(ScopeKind::Class),
            _ => None,
        },
        Language::CSharp => match node_kind {
            "method_declaration" | "constructor_declaration" => Some(ScopeKind::Method),
            "class_declaration" | "interface_declaration" | "struct_declaration" => {
                Some(ScopeKind::Class)
            }
            _ => None,
        },
        Language::Php => match node_kind {
            "function_definition" => Some(ScopeKind::Function),
            "method_declaration" => Some(ScopeKind::Method),
            "class_declaration" | "interface_declaration" | "trait_declaration" => {
                Some(ScopeKind::Class)
            }
            _ => None,
        },
    }
}

/// Closed mapping of syntax-node kinds that are import/use declarations.
fn is_import_node(language: Language, node_kind: &str) -> bool {
    match language {
        Language::JavaScript | Language::TypeScript | Language::Tsx => {
            node_kind == "import_statement"
        }
        Language::Python => {
            node_kind == "import_statement" || node_kind == "import_from_statement"
        }
        Language::Rust => node_kind == "use_declaration",
        Language::Go => node_kind == "import_declaration",
        Language::Ruby => false,
        Language::Java => node_kind == "import_declaration",
        Language::C | Language::Cpp => node_kind == "preproc_include",
        Language::CSharp => node_kind == "using_directive",
        Language::Php => node_kind == "namespace_use_declaration",
    }
}

/// Recursive tree walk collecting scopes and imports. Nested scopes are all
/// recorded; enclosing-scope resolution happens later against hunk ranges.
fn collect(
    node: Node,
    source: &str,
    language: Language,
    scopes: &mut Vec<AstScope>,
    imports: &mut Vec<AstImport>,
) {
    let kind = node.kind();

    if let Some(mut scope_kind) = scope_kind_for(language, kind) {
        if language == Language::Python
            && scope_kind == ScopeKind::Function
            && has_class_ancestor(node)
        {
            scope_kind = ScopeKind::Method;
        }
        scopes.push(AstScope {
            kind: scope_kind,
            name: resolve_scope_name(node, source, language),
            start_line: node.start_position().row as u32 + 1,
            end_line: node.end_position().row as u32 + 1,
        });
    } else if is_import_node(language, kind) {
        if let Some(import) = parse_import(node, source, language) {
            imports.push(import);
        }
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect(child, source, language, scopes, imports);
    }
}

fn has_class_ancestor(node: Node) -> bool {
    let mut current = node.parent();
    while let Some(n) = current {
        if n.kind() == "class_definition" {
            return true;
        }
        current = n.parent();
    }
    false
}

fn node_text<'a>(node: Node, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Resolve a scope's display name.
///
/// Prefers the declared name field. When absent, applies language-specific
/// fallbacks: an anonymous function/arrow assigned to a variable or object
/// property recovers that name; a Rust `impl` block uses its target type;
/// C-family definitions dig through the declarator. Otherwise the anonymous
/// sentinel is used.
fn resolve_scope_name(node: Node, source: &str, language: Language) -> String {
    if let Some(name) = node.child_by_field_name("name") {
        return node_text(name, source).to_string();
    }

    if language == Language::Rust && node.kind() == "impl_item" {
        if let Some(ty) = node.child_by_field_name("type") {
            return node_text(ty, source).to_string();
        }
    }

    if is_js_family(language)
        && matches!(node.kind(), "function_expression" | "arrow_function")
    {
        if let Some(name) = assigned_name(node, source) {
            return name;
        }
    }

    if matches!(language, Language::C | Language::Cpp) {
        if let Some(declarator) = node.child_by_field_name("declarator") {
            if let Some(ident) = find_identifier(declarator) {
                return node_text(ident, source).to_string();
            }
        }
    }

    ANONYMOUS_SCOPE.to_string()
}

/// Recover the name of an anonymous function from the variable or object
/// property it is assigned to: `const f = () => {}` or `{ f: function() {} }`.
fn assigned_name(node: Node, source: &str) -> Option<String> {
    let parent = node.parent()?;
    match parent.kind() {
        "variable_declarator" => parent
            .child_by_field_name("name")
            .map(|n| node_text(n, source).to_string()),
        "pair" => parent
            .child_by_field_name("key")
            .map(|n| node_text(n, source).trim_matches(['"', '\'']).to_string()),
        "assignment_expression" => parent
            .child_by_field_name("left")
            .map(|n| node_text(n, source).to_string()),
        _ => None,
    }
}

/// Depth-first search for the first identifier-like node.
fn find_identifier(node: Node) -> Option<Node> {
    if matches!(node.kind(), "identifier" | "field_identifier") {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    for child in children {
        if let Some(found) = find_identifier(child) {
            return Some(found);
        }
    }
    None
}

/// Parse one import node into an [`AstImport`].
fn parse_import(node: Node, source: &str, language: Language) -> Option<AstImport> {
    match language {
        Language::JavaScript | Language::TypeScript | Language::Tsx => {
            parse_js_import(node, source)
        }
        Language::Python => parse_python_import(node, source),
        _ => parse_generic_import(node, source),
    }
}

/// Structured JS/TS import extraction: source module plus named, default
/// and namespace specifiers.
fn parse_js_import(node: Node, source: &str) -> Option<AstImport> {
    let src = node.child_by_field_name("source")?;
    let module = node_text(src, source).trim_matches(['"', '\'']).to_string();

    let mut specifiers = Vec::new();
    let mut is_default = false;

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "import_clause" {
            continue;
        }
        let mut clause_cursor = child.walk();
        for part in child.children(&mut clause_cursor) {
            match part.kind() {
                "identifier" => {
                    is_default = true;
                    specifiers.push(node_text(part, source).to_string());
                }
                "named_imports" => {
                    let mut spec_cursor = part.walk();
                    for spec in part.children(&mut spec_cursor) {
                        if spec.kind() == "import_specifier" {
                            if let Some(name) = spec.child_by_field_name("name") {
                                specifiers.push(node_text(name, source).to_string());
                            }
                        }
                    }
                }
                "namespace_import" => {
                    if let Some(ident) = find_identifier(part) {
                        specifiers.push(node_text(ident, source).to_string());
                    }
                }
                _ => {}
            }
        }
    }

    Some(AstImport {
        source: module,
        specifiers,
        is_default,
    })
}

/// Python imports: `import X [as Y]` and `from X import Y [as Z], ...`,
/// recording alias targets as the effective specifier names.
fn parse_python_import(node: Node, source: &str) -> Option<AstImport> {
    if node.kind() == "import_from_statement" {
        let module = node.child_by_field_name("module_name")?;
        let module_text = node_text(module, source).to_string();

        let mut specifiers = Vec::new();
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.id() == module.id() {
                continue;
            }
            match child.kind() {
                "dotted_name" | "identifier" => {
                    specifiers.push(node_text(child, source).to_string());
                }
                "aliased_import" => {
                    if let Some(alias) = child.child_by_field_name("alias") {
                        specifiers.push(node_text(alias, source).to_string());
                    } else if let Some(name) = child.child_by_field_name("name") {
                        specifiers.push(node_text(name, source).to_string());
                    }
                }
                "wildcard_import" => specifiers.push("*".to_string()),
                _ => {}
            }
        }

        return Some(AstImport {
            source: module_text,
            specifiers,
            is_default: false,
        });
    }

    // Plain `import X` / `import X as Y`: the module is the source, no
    // specifier extraction.
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "dotted_name" => {
                return Some(AstImport {
                    source: node_text(child, source).to_string(),
                    specifiers: Vec::new(),
                    is_default: false,
                });
            }
            "aliased_import" => {
                let name = child.child_by_field_name("name")?;
                return Some(AstImport {
                    source: node_text(name, source).to_string(),
                    specifiers: Vec::new(),
                    is_default: false,
                });
            }
            _ => {}
        }
    }
    None
}

/// Keywords stripped by the generic import fallback.
const IMPORT_KEYWORDS: &[&str] = &["use", "import", "using", "#include", "require"];

/// Best-effort import for languages without structured extraction: strip
/// the leading keyword and trailing terminator, keep the rest as the source.
fn parse_generic_import(node: Node, source: &str) -> Option<AstImport> {
    let mut text = node_text(node, source).trim().to_string();
    for keyword in IMPORT_KEYWORDS {
        if let Some(rest) = text.strip_prefix(keyword) {
            text = rest.trim_start().to_string();
            break;
        }
    }
    let text = text.trim_end_matches(';').trim().to_string();
    if text.is_empty() {
        return None;
    }
    Some(AstImport {
        source: text,
        specifiers: Vec::new(),
        is_default: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> StructureExtractor {
        let mut ex = StructureExtractor::new();
        ex.ensure_initialized().unwrap();
        ex
    }

    #[test]
    fn uninitialized_extractor_fails_closed() {
        let mut ex = StructureExtractor::new();
        let err = ex.extract("fn main() {}", Language::Rust, "main.rs");
        assert!(matches!(err, Err(StructureError::InitFailed)));
    }

    #[test]
    fn ensure_initialized_is_idempotent() {
        let mut ex = StructureExtractor::new();
        ex.ensure_initialized().unwrap();
        ex.ensure_initialized().unwrap();
        assert!(ex.extract("fn main() {}", Language::Rust, "main.rs").is_ok());
    }

    #[test]
    fn extracts_typescript_functions_and_classes() {
        let src = "\
import { useState } from 'react';

function topLevel(): number {
    return 1;
}

class Widget {
    render() {
        return null;
    }
}
";
        let ctx = extractor()
            .extract(src, Language::TypeScript, "widget.ts")
            .unwrap();

        let names: Vec<(&str, ScopeKind)> = ctx
            .scopes
            .iter()
            .map(|s| (s.name.as_str(), s.kind))
            .collect();
        assert!(names.contains(&("topLevel", ScopeKind::Function)));
        assert!(names.contains(&("Widget", ScopeKind::Class)));
        assert!(names.contains(&("render", ScopeKind::Method)));

        assert_eq!(ctx.imports.len(), 1);
        assert_eq!(ctx.imports[0].source, "react");
        assert_eq!(ctx.imports[0].specifiers, vec!["useState"]);
        assert!(!ctx.imports[0].is_default);
    }

    #[test]
    fn recovers_arrow_function_name_from_assignment() {
        let src = "const handler = (req) => {\n  return req;\n};\n";
        let ctx = extractor()
            .extract(src, Language::JavaScript, "handler.js")
            .unwrap();
        assert_eq!(ctx.scopes.len(), 1);
        assert_eq!(ctx.scopes[0].name, "handler");
        assert_eq!(ctx.scopes[0].kind, ScopeKind::Function);
    }

    #[test]
    fn unassigned_callback_gets_anonymous_sentinel() {
        let src = "items.forEach(function (x) {\n  touch(x);\n});\n";
        let ctx = extractor()
            .extract(src, Language::JavaScript, "cb.js")
            .unwrap();
        assert_eq!(ctx.scopes.len(), 1);
        assert_eq!(ctx.scopes[0].name, ANONYMOUS_SCOPE);
    }

    #[test]
    fn default_import_sets_flag() {
        let src = "import React, { useEffect } from 'react';\n";
        let ctx = extractor()
            .extract(src, Language::JavaScript, "app.jsx")
            .unwrap();
        assert_eq!(ctx.imports.len(), 1);
        let import = &ctx.imports[0];
        assert!(import.is_default);
        assert!(import.specifiers.contains(&"React".to_string()));
        assert!(import.specifiers.contains(&"useEffect".to_string()));
    }

    #[test]
    fn python_scopes_and_from_import() {
        let src = "\
from collections import OrderedDict as OD, defaultdict
import os.path

class Store:
    def get(self, key):
        return self.data[key]

def helper():
    pass
";
        let ctx = extractor()
            .extract(src, Language::Python, "store.py")
            .unwrap();

        let get = ctx.scopes.iter().find(|s| s.name == "get").unwrap();
        assert_eq!(get.kind, ScopeKind::Method);
        let helper = ctx.scopes.iter().find(|s| s.name == "helper").unwrap();
        assert_eq!(helper.kind, ScopeKind::Function);
        let store = ctx.scopes.iter().find(|s| s.name == "Store").unwrap();
        assert_eq!(store.kind, ScopeKind::Class);

        let from_import = ctx
            .imports
            .iter()
            .find(|i| i.source == "collections")
            .unwrap();
        assert!(from_import.specifiers.contains(&"OD".to_string()));
        assert!(from_import.specifiers.contains(&"defaultdict".to_string()));

        assert!(ctx.imports.iter().any(|i| i.source == "os.path"));
    }

    #[test]
    fn rust_impl_block_uses_target_type_name() {
        let src = "\
use std::fmt;

struct Point;

impl Point {
    fn origin() -> Self {
        Point
    }
}
";
        let ctx = extractor().extract(src, Language::Rust, "point.rs").unwrap();

        let imp = ctx
            .scopes
            .iter()
            .find(|s| s.kind == ScopeKind::Class)
            .unwrap();
        assert_eq!(imp.name, "Point");
        assert!(ctx.scopes.iter().any(|s| s.name == "origin"));

        assert_eq!(ctx.imports.len(), 1);
        assert_eq!(ctx.imports[0].source, "std::fmt");
        assert!(ctx.imports[0].specifiers.is_empty());
    }

    #[test]
    fn scope_lines_are_one_based_inclusive() {
        let src = "fn one() {\n    body();\n}\n";
        let ctx = extractor().extract(src, Language::Rust, "one.rs").unwrap();
        assert_eq!(ctx.scopes.len(), 1);
        assert_eq!(ctx.scopes[0].start_line, 1);
        assert_eq!(ctx.scopes[0].end_line, 3);
    }

    #[test]
    fn go_functions_and_methods() {
        let src = "\
package main

import \"fmt\"

func free() {}

func (s *Server) Handle() {
    fmt.Println(\"x\")
}
";
        let ctx = extractor().extract(src, Language::Go, "main.go").unwrap();
        let free = ctx.scopes.iter().find(|s| s.name == "free").unwrap();
        assert_eq!(free.kind, ScopeKind::Function);
        let handle = ctx.scopes.iter().find(|s| s.name == "Handle").unwrap();
        assert_eq!(handle.kind, ScopeKind::Method);
        assert_eq!(ctx.imports.len(), 1);
    }

    #[test]
    fn grammar_cache_is_reused_across_files() {
        let mut ex = extractor();
        ex.extract("fn a() {}", Language::Rust, "a.rs").unwrap();
        ex.extract("fn b() {}", Language::Rust, "b.rs").unwrap();
        assert_eq!(ex.grammars.len(), 1);
    }
}
