//! Document merging and inheritance resolution.
//!
//! Documents sharing a root name are appended into one unified document.
//! Once every document is in, each concrete node that names a `Parent` is
//! replaced by the fold of its ancestor chain, oldest first.

use tracing::debug;

use crate::document::{Content, Document, Node, attr};

// ===========================================================================
// Errors
// ===========================================================================

/// Structural problems in the unified document.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// A top-level name already exists in the unified document.
    #[error("duplicate top-level node '{name}'")]
    DuplicateNode { name: String },

    /// A `Parent` attribute names a node that does not exist.
    #[error("node '{node}' inherits from missing parent '{parent}'")]
    MissingParent { node: String, parent: String },

    /// Following `Parent` attributes from `node` revisits a node.
    #[error("inheritance cycle starting at '{node}'")]
    InheritanceCycle { node: String },

    /// Documents disagree on the root element name.
    #[error("root element '{found}' does not match '{expected}'")]
    RootMismatch { expected: String, found: String },
}

// ===========================================================================
// DocumentMerger
// ===========================================================================

/// Accumulates documents into one unified tree.
#[derive(Debug, Default)]
pub struct DocumentMerger {
    unified: Option<Document>,
    expected_root: Option<String>,
}

impl DocumentMerger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects any document whose root is not called `name`.
    pub fn with_root_name(name: impl Into<String>) -> Self {
        Self {
            unified: None,
            expected_root: Some(name.into()),
        }
    }

    /// Appends the top-level nodes of `incoming`. The first document seeds
    /// the unified tree. A document with a clashing name is rejected as a
    /// whole.
    pub fn merge(&mut self, incoming: Document) -> Result<(), MergeError> {
        let expected = self
            .unified
            .as_ref()
            .map(|doc| doc.root().name().to_string())
            .or_else(|| self.expected_root.clone());
        if let Some(expected) = expected {
            if incoming.root().name() != expected {
                return Err(MergeError::RootMismatch {
                    expected,
                    found: incoming.root().name().to_string(),
                });
            }
        }

        let Some(unified) = self.unified.as_mut() else {
            debug!(
                root = incoming.root().name(),
                nodes = incoming.root().element_count(),
                "seeded unified document"
            );
            self.unified = Some(incoming);
            return Ok(());
        };

        if let Some(clash) = incoming
            .root()
            .elements()
            .find(|node| unified.root().element(node.name()).is_some())
        {
            return Err(MergeError::DuplicateNode {
                name: clash.name().to_string(),
            });
        }

        let root = unified.root_mut();
        let mut added = 0;
        for content in incoming.into_root().into_children() {
            if let Content::Element(node) = content {
                root.push_child(node);
                added += 1;
            }
        }
        debug!(added, "merged document");
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.unified.is_none()
    }

    /// The unified document as merged so far, before inheritance.
    pub fn document(&self) -> Option<&Document> {
        self.unified.as_ref()
    }

    /// Resolves inheritance and hands back the unified document. `None`
    /// when nothing was merged.
    pub fn resolve(self) -> Result<Option<Document>, MergeError> {
        let Some(mut doc) = self.unified else {
            return Ok(None);
        };
        let resolved = resolve_inheritance(&mut doc)?;
        debug!(resolved, "resolved inheritance");
        Ok(Some(doc))
    }
}

// ===========================================================================
// Inheritance
// ===========================================================================

/// Replaces every non-abstract top-level node that has a `Parent` with its
/// flattened form. Chains are read from the tree as it was before any
/// replacement. Returns the number of nodes replaced.
pub fn resolve_inheritance(doc: &mut Document) -> Result<usize, MergeError> {
    let root = doc.root();
    let mut flattened = Vec::new();
    for (index, content) in root.children().iter().enumerate() {
        let Content::Element(node) = content else {
            continue;
        };
        if node.bool_attr(attr::ABSTRACT, false) || !node.has_attr(attr::PARENT) {
            continue;
        }
        let chain = inheritance_chain(root, node)?;
        flattened.push((index, flatten(node, &chain)));
    }

    let count = flattened.len();
    let children = doc.root_mut().children_mut();
    for (index, node) in flattened {
        children[index] = Content::Element(node);
    }
    Ok(count)
}

/// `node` and its ancestors, oldest first.
fn inheritance_chain<'a>(root: &'a Node, node: &'a Node) -> Result<Vec<&'a Node>, MergeError> {
    let mut chain = vec![node];
    let mut current = node;
    while let Some(parent_name) = current.attr(attr::PARENT) {
        let parent = root
            .element(parent_name)
            .ok_or_else(|| MergeError::MissingParent {
                node: current.name().to_string(),
                parent: parent_name.to_string(),
            })?;
        if chain.iter().any(|seen| std::ptr::eq(*seen, parent)) {
            return Err(MergeError::InheritanceCycle {
                node: node.name().to_string(),
            });
        }
        chain.push(parent);
        current = parent;
    }
    chain.reverse();
    Ok(chain)
}

fn flatten(node: &Node, chain: &[&Node]) -> Node {
    let mut created = Node::new(node.name());
    for ancestor in chain {
        merge_node(&mut created, ancestor);
    }
    created.set_name(node.name());
    for name in attr::INHERITANCE {
        created.remove_attr(name);
    }
    if let Some(parent) = node.attr(attr::PARENT) {
        created.set_attr(attr::PARENT_NAME, parent);
    }
    created
}

/// Merges `incoming` over `target`, which it inherits from.
///
/// * `Inherit="false"` or a leaf replaces `target` outright. Unless
///   inheritance was switched off, attributes only the old node carried
///   are kept.
/// * A list appends its items after the inherited ones.
/// * A composite merges attributes, then recurses child by child.
pub fn merge_node(target: &mut Node, incoming: &Node) {
    let inherit = incoming.bool_attr(attr::INHERIT, true);
    if !inherit || incoming.is_leaf() {
        let mut replacement = incoming.clone();
        if inherit {
            replacement.add_missing_attributes(target, &attr::INHERITANCE);
        }
        replacement.remove_attr(attr::INHERIT);
        *target = replacement;
        return;
    }

    if incoming.is_list() {
        target.extend_children(incoming.children().iter().cloned());
        return;
    }

    incoming.merge_attributes_into(target, &attr::INHERITANCE);
    for child in incoming.elements() {
        match target.element_mut(child.name()) {
            Some(existing) => merge_node(existing, child),
            None => target.push_child(child.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::NodeShape;

    fn doc(xml: &str) -> Document {
        Document::parse(xml).unwrap()
    }

    fn resolved(xml: &str) -> Document {
        let mut merger = DocumentMerger::new();
        merger.merge(doc(xml)).unwrap();
        merger.resolve().unwrap().unwrap()
    }

    fn items(node: &Node) -> Vec<String> {
        node.elements().map(|li| li.inner_text()).collect()
    }

    #[test]
    fn merging_appends_top_level_nodes() {
        let mut merger = DocumentMerger::new();
        merger.merge(doc("<Defs><A/></Defs>")).unwrap();
        merger.merge(doc("<Defs><B/><C/></Defs>")).unwrap();
        let names: Vec<_> = merger
            .document()
            .unwrap()
            .root()
            .elements()
            .map(|n| n.name().to_string())
            .collect();
        assert_eq!(names, ["A", "B", "C"]);
    }

    #[test]
    fn duplicate_top_level_name_rejects_whole_document() {
        let mut merger = DocumentMerger::new();
        merger.merge(doc("<Defs><A/></Defs>")).unwrap();
        let err = merger.merge(doc("<Defs><B/><A/></Defs>")).unwrap_err();
        assert!(matches!(err, MergeError::DuplicateNode { ref name } if name == "A"));
        assert_eq!(merger.document().unwrap().root().element_count(), 1);
    }

    #[test]
    fn root_names_must_agree() {
        let mut merger = DocumentMerger::with_root_name("Defs");
        let err = merger.merge(doc("<Things/>")).unwrap_err();
        assert!(matches!(err, MergeError::RootMismatch { .. }));
        merger.merge(doc("<Defs/>")).unwrap();
        assert!(matches!(
            merger.merge(doc("<Other/>")),
            Err(MergeError::RootMismatch { .. })
        ));
    }

    #[test]
    fn empty_merger_resolves_to_none() {
        assert!(DocumentMerger::new().resolve().unwrap().is_none());
    }

    #[test]
    fn child_inherits_and_overrides_fields() {
        let doc = resolved(
            r#"<Defs>
                <Base Abstract="true"><Speed>1</Speed><Power>10</Power></Base>
                <Fast Parent="Base"><Speed>5</Speed></Fast>
            </Defs>"#,
        );
        let fast = doc.root().element("Fast").unwrap();
        assert_eq!(fast.element("Speed").unwrap().text(), Some("5"));
        assert_eq!(fast.element("Power").unwrap().text(), Some("10"));
        assert_eq!(fast.attr(attr::PARENT_NAME), Some("Base"));
        assert!(!fast.has_attr(attr::PARENT));
        assert!(!fast.has_attr(attr::ABSTRACT));
        // The abstract template itself is left untouched.
        let base = doc.root().element("Base").unwrap();
        assert_eq!(base.attr(attr::ABSTRACT), Some("true"));
    }

    #[test]
    fn three_level_inherit_false_takes_literal_value() {
        let doc = resolved(
            r#"<Defs>
                <A><Tags><li>a</li></Tags><Size>1</Size></A>
                <B Parent="A"><Tags><li>b</li></Tags><Size>2</Size></B>
                <C Parent="B"><Tags Inherit="false"><li>c</li></Tags><Size Inherit="false">3</Size></C>
            </Defs>"#,
        );
        let c = doc.root().element("C").unwrap();
        assert_eq!(items(c.element("Tags").unwrap()), ["c"]);
        assert!(!c.element("Tags").unwrap().has_attr(attr::INHERIT));
        assert_eq!(c.element("Size").unwrap().text(), Some("3"));
        assert_eq!(c.attr(attr::PARENT_NAME), Some("B"));
    }

    #[test]
    fn lists_accumulate_oldest_first() {
        let doc = resolved(
            r#"<Defs>
                <A><Tags><li>a</li></Tags></A>
                <B Parent="A"><Tags><li>b</li></Tags></B>
                <C Parent="B"><Tags><li>c</li><li>a</li></Tags></C>
            </Defs>"#,
        );
        let c = doc.root().element("C").unwrap();
        assert_eq!(items(c.element("Tags").unwrap()), ["a", "b", "c", "a"]);
        // B was resolved from the raw tree, not from C's result.
        let b = doc.root().element("B").unwrap();
        assert_eq!(items(b.element("Tags").unwrap()), ["a", "b"]);
    }

    #[test]
    fn leaf_replacement_keeps_ancestor_attributes() {
        let doc = resolved(
            r#"<Defs>
                <A><Icon Class="Sprite" Tint="red">a.png</Icon></A>
                <B Parent="A"><Icon Tint="blue">b.png</Icon></B>
            </Defs>"#,
        );
        let icon = doc.root().element("B").unwrap().element("Icon").unwrap();
        assert_eq!(icon.text(), Some("b.png"));
        assert_eq!(icon.attr("Tint"), Some("blue"));
        assert_eq!(icon.attr(attr::CLASS), Some("Sprite"));
    }

    #[test]
    fn inherit_false_drops_ancestor_attributes() {
        let doc = resolved(
            r#"<Defs>
                <A><Icon Class="Sprite">a.png</Icon></A>
                <B Parent="A"><Icon Inherit="false">b.png</Icon></B>
            </Defs>"#,
        );
        let icon = doc.root().element("B").unwrap().element("Icon").unwrap();
        assert!(!icon.has_attr(attr::CLASS));
    }

    #[test]
    fn nested_composites_merge_recursively() {
        let doc = resolved(
            r#"<Defs>
                <A><Stats><Hp>10</Hp><Mp>5</Mp></Stats></A>
                <B Parent="A"><Stats><Mp>7</Mp><Def>2</Def></Stats></B>
            </Defs>"#,
        );
        let stats = doc.root().element("B").unwrap().element("Stats").unwrap();
        assert_eq!(stats.shape(), NodeShape::Composite);
        let values: Vec<_> = stats
            .elements()
            .map(|n| (n.name().to_string(), n.inner_text()))
            .collect();
        assert_eq!(
            values,
            [
                ("Hp".to_string(), "10".to_string()),
                ("Mp".to_string(), "7".to_string()),
                ("Def".to_string(), "2".to_string())
            ]
        );
    }

    #[test]
    fn resolution_keeps_document_order() {
        let doc = resolved(r#"<Defs><X Parent="Y"/><Y><V>1</V></Y><Z/></Defs>"#);
        let names: Vec<_> = doc.root().elements().map(|n| n.name().to_string()).collect();
        assert_eq!(names, ["X", "Y", "Z"]);
        assert_eq!(doc.root().element("X").unwrap().element("V").unwrap().text(), Some("1"));
    }

    #[test]
    fn missing_parent_fails() {
        let mut merger = DocumentMerger::new();
        merger.merge(doc(r#"<Defs><A Parent="Nope"/></Defs>"#)).unwrap();
        let err = merger.resolve().unwrap_err();
        assert!(
            matches!(err, MergeError::MissingParent { ref node, ref parent } if node == "A" && parent == "Nope")
        );
    }

    #[test]
    fn cycles_fail() {
        let mut merger = DocumentMerger::new();
        merger
            .merge(doc(r#"<Defs><A Parent="B"/><B Parent="A"/></Defs>"#))
            .unwrap();
        assert!(matches!(merger.resolve(), Err(MergeError::InheritanceCycle { .. })));

        let mut merger = DocumentMerger::new();
        merger.merge(doc(r#"<Defs><A Parent="A"/></Defs>"#)).unwrap();
        assert!(matches!(merger.resolve(), Err(MergeError::InheritanceCycle { .. })));
    }
}
