//! Syntax-tree pass over Python source using tree-sitter.

use scriptward_config::PolicySet;
use tree_sitter::{Node, Parser, Tree, TreeCursor};

use crate::error::ScanViolation;

/// Parents under which an identifier is a binding or a path segment rather
/// than a reference to an existing name.
const NON_REFERENCE_PARENTS: &[&str] = &[
    "dotted_name",
    "aliased_import",
    "parameters",
    "lambda_parameters",
    "typed_parameter",
    "list_splat_pattern",
    "dictionary_splat_pattern",
    "global_statement",
    "nonlocal_statement",
];

/// Parent kinds whose `name` field holds a declared name.
const NAME_FIELD_PARENTS: &[&str] = &[
    "keyword_argument",
    "default_parameter",
    "typed_default_parameter",
    "function_definition",
    "class_definition",
];

/// Parse `source` and walk every node, returning the first violation.
///
/// Unparseable source is itself a violation. Nodes are visited in
/// pre-order, so a statement is judged before the names inside it.
pub fn structural_pass(source: &str, policy: &PolicySet) -> Option<ScanViolation> {
    let tree = match parse(source) {
        Ok(tree) => tree,
        Err(violation) => return Some(violation),
    };

    let root = tree.root_node();
    if root.has_error() {
        return Some(syntax_violation(root));
    }

    let inspector = NodeInspector { source, policy };
    preorder_find(root.walk(), |node| inspector.inspect(node))
}

fn parse(source: &str) -> Result<Tree, ScanViolation> {
    let mut parser = Parser::new();
    let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
    parser
        .set_language(&language)
        .map_err(|error| ScanViolation::SyntaxError {
            line: 0,
            message: format!("python grammar unavailable: {error}"),
        })?;
    parser
        .parse(source, None)
        .ok_or_else(|| ScanViolation::SyntaxError {
            line: 0,
            message: "parser returned no tree".to_owned(),
        })
}

fn syntax_violation(root: Node<'_>) -> ScanViolation {
    let culprit = preorder_find(root.walk(), |node| {
        (node.is_error() || node.is_missing()).then_some(node)
    });

    match culprit {
        Some(node) if node.is_missing() => ScanViolation::SyntaxError {
            line: node.start_position().row + 1,
            message: format!("missing `{}`", node.kind()),
        },
        Some(node) => ScanViolation::SyntaxError {
            line: node.start_position().row + 1,
            message: "invalid syntax".to_owned(),
        },
        None => ScanViolation::SyntaxError {
            line: root.start_position().row + 1,
            message: "invalid syntax".to_owned(),
        },
    }
}

/// The grammar still accepts Python 2 statements that the interpreter refuses.
fn python2_violation(node: Node<'_>) -> ScanViolation {
    ScanViolation::SyntaxError {
        line: node.start_position().row + 1,
        message: format!("python 2 `{}` is not supported", node.kind()),
    }
}

/// Depth-first pre-order search returning the first `Some` from `visit`.
fn preorder_find<'tree, T>(
    mut cursor: TreeCursor<'tree>,
    mut visit: impl FnMut(Node<'tree>) -> Option<T>,
) -> Option<T> {
    loop {
        if let Some(found) = visit(cursor.node()) {
            return Some(found);
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return None;
            }
        }
    }
}

struct NodeInspector<'a> {
    source: &'a str,
    policy: &'a PolicySet,
}

impl NodeInspector<'_> {
    fn inspect(&self, node: Node<'_>) -> Option<ScanViolation> {
        match node.kind() {
            "import_statement" => self.check_import(node),
            "import_from_statement" => self.check_import_from(node),
            "call" => self.check_call(node),
            "print_statement" | "exec_statement" => Some(python2_violation(node)),
            "attribute" => self.check_attribute(node),
            "identifier" => self.check_identifier(node),
            _ => None,
        }
    }

    fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or_default()
    }

    fn check_import(&self, node: Node<'_>) -> Option<ScanViolation> {
        let mut cursor = node.walk();
        node.children_by_field_name("name", &mut cursor)
            .find_map(|imported| {
                let dotted = match imported.kind() {
                    "aliased_import" => imported.child_by_field_name("name")?,
                    _ => imported,
                };
                self.blocked_root(dotted)
            })
            .map(ScanViolation::ImportForbidden)
    }

    fn check_import_from(&self, node: Node<'_>) -> Option<ScanViolation> {
        let module = node.child_by_field_name("module_name")?;
        let dotted = if module.kind() == "relative_import" {
            let mut cursor = module.walk();
            let found = module
                .named_children(&mut cursor)
                .find(|child| child.kind() == "dotted_name");
            found?
        } else {
            module
        };
        self.blocked_root(dotted).map(ScanViolation::ImportForbidden)
    }

    /// The first segment of a dotted module path when it is blocked.
    fn blocked_root(&self, dotted: Node<'_>) -> Option<String> {
        let root = match dotted.kind() {
            "dotted_name" => dotted.named_child(0)?,
            _ => dotted,
        };
        let name = self.text(root);
        self.policy
            .is_blocked_import(name)
            .then(|| name.to_owned())
    }

    fn check_call(&self, node: Node<'_>) -> Option<ScanViolation> {
        let function = node.child_by_field_name("function")?;
        match function.kind() {
            "identifier" => {
                let name = self.text(function);
                self.policy
                    .is_blocked_call(name)
                    .then(|| ScanViolation::CallForbidden(name.to_owned()))
            }
            "attribute" => {
                let attribute = function.child_by_field_name("attribute")?;
                let name = self.text(attribute);
                self.policy
                    .is_blocked_call(name)
                    .then(|| ScanViolation::CallForbidden(format!(".{name}")))
            }
            _ => None,
        }
    }

    fn check_attribute(&self, node: Node<'_>) -> Option<ScanViolation> {
        let attribute = node.child_by_field_name("attribute")?;
        let name = self.text(attribute);
        self.policy
            .is_blocked_attribute(name)
            .then(|| ScanViolation::AttributeForbidden(name.to_owned()))
    }

    fn check_identifier(&self, node: Node<'_>) -> Option<ScanViolation> {
        if !is_reference(node) {
            return None;
        }
        let name = self.text(node);
        self.policy
            .is_blocked_name(name)
            .then(|| ScanViolation::NameForbidden(name.to_owned()))
    }
}

fn is_reference(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return true;
    };
    let kind = parent.kind();
    if NON_REFERENCE_PARENTS.contains(&kind) {
        return false;
    }
    if kind == "attribute" && parent.child_by_field_name("attribute") == Some(node) {
        return false;
    }
    !(NAME_FIELD_PARENTS.contains(&kind) && parent.child_by_field_name("name") == Some(node))
}
