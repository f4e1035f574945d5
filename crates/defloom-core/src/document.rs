//! Owned, mutable document tree.
//!
//! Raw XML is parsed by `roxmltree` and copied into [`Node`]s so the merger
//! can rewrite the tree in place. Whitespace-only text between elements is
//! dropped; comments and processing instructions never reach the tree.

use std::fmt;

/// Reserved attribute names understood by the merger and the builder.
pub mod attr {
    /// Name of the top-level node this node inherits from.
    pub const PARENT: &str = "Parent";
    /// Marks a template-only node. Never built, still usable as a parent.
    pub const ABSTRACT: &str = "Abstract";
    /// `Inherit="false"` replaces the inherited node instead of merging.
    pub const INHERIT: &str = "Inherit";
    /// Suppresses reference interpretation and registration for a subtree.
    pub const NO_REF: &str = "NoRef";
    /// Forces list interpretation regardless of child names.
    pub const IS_LIST: &str = "IsList";
    /// Explicit type override for polymorphic construction.
    pub const CLASS: &str = "Class";
    /// Diagnostic marker written by the merger once a chain is flattened.
    pub const PARENT_NAME: &str = "ParentName";

    /// Attributes that are never carried across an inheritance merge.
    pub const INHERITANCE: [&str; 3] = [INHERIT, PARENT, ABSTRACT];
}

/// Element name that marks a list item.
pub const LIST_ITEM: &str = "li";

// ===========================================================================
// Errors
// ===========================================================================

/// Errors raised while turning text into a [`Document`].
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// The text is not well-formed XML.
    #[error("malformed document: {0}")]
    Malformed(#[from] roxmltree::Error),
}

// ===========================================================================
// Node
// ===========================================================================

/// One piece of element content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Element(Node),
    Text(String),
}

/// Structural classification of a node. Derived from shape and the `IsList`
/// attribute only, never from the type a caller expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeShape {
    /// No content at all.
    Empty,
    /// Exactly one child, and it is text.
    Leaf,
    /// `IsList="true"`, or every child is an element named `li`.
    List,
    /// Anything else with element children.
    Composite,
}

/// A named element with ordered attributes and ordered content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Content>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder-style child element.
    #[must_use]
    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(Content::Element(child));
        self
    }

    /// Builder-style text content.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text.into());
        self
    }

    /// A leaf node `<name>text</name>`.
    pub fn leaf(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(name).with_text(text)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    /// Set an attribute, keeping its position when it already exists.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(n, _)| n == name)?;
        Some(self.attributes.remove(index).1)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Read a boolean attribute. Missing or unparsable values yield `default`.
    pub fn bool_attr(&self, name: &str, default: bool) -> bool {
        match self.attr(name).map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }

    /// Copy every attribute of `self` onto `target` (overwriting), then strip
    /// the `excluded` names from `target`.
    pub fn merge_attributes_into(&self, target: &mut Node, excluded: &[&str]) {
        for (name, value) in &self.attributes {
            target.set_attr(name, value.clone());
        }
        target
            .attributes
            .retain(|(name, _)| !excluded.contains(&name.as_str()));
    }

    /// Copy attributes of `other` that `self` lacks, skipping `excluded`.
    pub fn add_missing_attributes(&mut self, other: &Node, excluded: &[&str]) {
        for (name, value) in &other.attributes {
            if excluded.contains(&name.as_str()) || self.has_attr(name) {
                continue;
            }
            self.attributes.push((name.clone(), value.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // Content
    // -----------------------------------------------------------------------

    pub fn children(&self) -> &[Content] {
        &self.children
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn push_child(&mut self, child: Node) {
        self.children.push(Content::Element(child));
    }

    /// Append text, coalescing with a trailing text run.
    pub fn push_text(&mut self, text: String) {
        if let Some(Content::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(Content::Text(text));
        }
    }

    pub fn extend_children(&mut self, content: impl IntoIterator<Item = Content>) {
        self.children.extend(content);
    }

    pub fn children_mut(&mut self) -> &mut Vec<Content> {
        &mut self.children
    }

    pub fn into_children(self) -> Vec<Content> {
        self.children
    }

    /// Element children in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter_map(|c| match c {
            Content::Element(node) => Some(node),
            Content::Text(_) => None,
        })
    }

    pub fn element_count(&self) -> usize {
        self.elements().count()
    }

    /// First element child called `name`.
    pub fn element(&self, name: &str) -> Option<&Node> {
        self.elements().find(|n| n.name == name)
    }

    pub fn element_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.children.iter_mut().find_map(|c| match c {
            Content::Element(node) if node.name == name => Some(node),
            _ => None,
        })
    }

    /// Retain only the element children for which `keep` returns true.
    pub fn retain_elements(&mut self, mut keep: impl FnMut(&Node) -> bool) {
        self.children.retain(|c| match c {
            Content::Element(node) => keep(node),
            Content::Text(_) => true,
        });
    }

    /// Text of a leaf node.
    pub fn text(&self) -> Option<&str> {
        match self.children.as_slice() {
            [Content::Text(text)] => Some(text.as_str()),
            _ => None,
        }
    }

    /// Concatenated text of every descendant.
    pub fn inner_text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                Content::Text(text) => out.push_str(text),
                Content::Element(node) => node.collect_text(out),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    pub fn shape(&self) -> NodeShape {
        if self.children.is_empty() {
            NodeShape::Empty
        } else if self.text().is_some() {
            NodeShape::Leaf
        } else if self.is_list() {
            NodeShape::List
        } else {
            NodeShape::Composite
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.text().is_some()
    }

    /// List heuristic: explicit `IsList="true"`, or every child is `<li>`.
    pub fn is_list(&self) -> bool {
        if self.children.is_empty() {
            return false;
        }
        if self.bool_attr(attr::IS_LIST, false) {
            return true;
        }
        self.children
            .iter()
            .all(|c| matches!(c, Content::Element(node) if node.name == LIST_ITEM))
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// Indented XML rendering, used for debug output of merged documents.
    pub fn to_pretty_xml(&self) -> String {
        let mut out = String::new();
        self.write_xml(&mut out, 0);
        out
    }

    fn write_xml(&self, out: &mut String, depth: usize) {
        let indent = "  ".repeat(depth);
        out.push_str(&indent);
        out.push('<');
        out.push_str(&self.name);
        for (name, value) in &self.attributes {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            escape_into(out, value, true);
            out.push('"');
        }
        if self.children.is_empty() {
            out.push_str(" />\n");
            return;
        }
        if let Some(text) = self.text() {
            out.push('>');
            escape_into(out, text, false);
        } else {
            out.push_str(">\n");
            for child in &self.children {
                match child {
                    Content::Element(node) => node.write_xml(out, depth + 1),
                    Content::Text(text) => {
                        out.push_str(&indent);
                        out.push_str("  ");
                        escape_into(out, text.trim(), false);
                        out.push('\n');
                    }
                }
            }
            out.push_str(&indent);
        }
        out.push_str("</");
        out.push_str(&self.name);
        out.push_str(">\n");
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_pretty_xml())
    }
}

fn escape_into(out: &mut String, text: &str, attribute: bool) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
}

// ===========================================================================
// Document
// ===========================================================================

/// A parsed document: a single root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    root: Node,
}

impl Document {
    /// Parse XML text.
    pub fn parse(text: &str) -> Result<Self, DocumentError> {
        let raw = roxmltree::Document::parse(text)?;
        Ok(Self {
            root: convert(raw.root_element()),
        })
    }

    pub fn from_root(root: Node) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Node {
        &mut self.root
    }

    pub fn into_root(self) -> Node {
        self.root
    }
}

fn convert(raw: roxmltree::Node<'_, '_>) -> Node {
    let mut node = Node::new(raw.tag_name().name());
    for attribute in raw.attributes() {
        node.attributes
            .push((attribute.name().to_string(), attribute.value().to_string()));
    }
    for child in raw.children() {
        if child.is_element() {
            node.push_child(convert(child));
        } else if child.is_text() {
            match child.text() {
                Some(text) if !text.trim().is_empty() => node.push_text(text.to_string()),
                _ => {}
            }
        }
    }
    node
}

// ===========================================================================
// Tests
// ===========================================================================
