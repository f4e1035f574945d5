//! Shared fixtures for unit tests, integration tests and benchmarks.
//!
//! Gated behind `#[cfg(any(test, feature = "test-utils"))]`.

use crate::convert::Fixed64;
use crate::document::{Document, Node};
use crate::handle::Handle;
use crate::types::{AbstractType, Composite, Enum, OnConstructed, Referenceable, TypeRegistry};

// ===========================================================================
// Workshop types
// ===========================================================================

pub trait Component {
    fn label(&self) -> &str;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    #[default]
    Standard,
    Fine,
    Masterwork,
}

/// Written either as `<Pos>3,4</Pos>` or with `X`/`Y` children.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Coord {
    pub x: i32,
    pub y: i32,
}

impl Coord {
    fn parse_pair(node: &Node) -> Option<Coord> {
        let text = node.text()?;
        let (x, y) = text.split_once(',')?;
        Some(Coord {
            x: x.trim().parse().ok()?,
            y: y.trim().parse().ok()?,
        })
    }
}

#[derive(Debug, Default)]
pub struct Part {
    pub name: String,
    pub mass: u8,
    pub grade: Grade,
    pub rate: Fixed64,
    pub pos: Coord,
    pub note: Option<String>,
    pub tags: Vec<String>,
    pub attached: Option<Handle<Part>>,
    /// Set by the construction hook.
    pub node_name: String,
}

impl Referenceable for Part {
    fn reference_id(&self) -> Option<&str> {
        (!self.name.is_empty()).then_some(self.name.as_str())
    }
}

impl OnConstructed for Part {
    fn on_constructed(&mut self, node: &Node) {
        self.node_name = node.name().to_string();
    }
}

impl Component for Part {
    fn label(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Default)]
pub struct Assembly {
    pub name: String,
    pub parts: Vec<Handle<Part>>,
    pub counts: Vec<u32>,
    pub slots: Vec<Option<Handle<Part>>>,
    pub featured: Option<Handle<dyn Component>>,
}

impl Referenceable for Assembly {
    fn reference_id(&self) -> Option<&str> {
        (!self.name.is_empty()).then_some(self.name.as_str())
    }
}

impl Component for Assembly {
    fn label(&self) -> &str {
        &self.name
    }
}

pub fn part_component(part: Handle<Part>) -> Handle<dyn Component> {
    let rc: std::rc::Rc<std::cell::RefCell<dyn Component>> = part.into_rc();
    Handle::from_rc(rc)
}

pub fn assembly_component(assembly: Handle<Assembly>) -> Handle<dyn Component> {
    let rc: std::rc::Rc<std::cell::RefCell<dyn Component>> = assembly.into_rc();
    Handle::from_rc(rc)
}

/// Registry with `Part`, `Assembly`, `Coord`, `Grade` and the abstract
/// `Component` slot.
pub fn workshop_types() -> TypeRegistry {
    let mut types = TypeRegistry::new();
    types
        .register(
            Enum::new("Grade")
                .variant("Standard", Grade::Standard)
                .variant("Fine", Grade::Fine)
                .variant("Masterwork", Grade::Masterwork),
        )
        .register(
            Composite::<Coord>::new("Coord")
                .field("X", |c| &mut c.x)
                .field("Y", |c| &mut c.y)
                .custom_parse(Coord::parse_pair),
        )
        .register(
            Composite::<Part>::new("Part")
                .field("Name", |p| &mut p.name)
                .field("Mass", |p| &mut p.mass)
                .field("Grade", |p| &mut p.grade)
                .field("Rate", |p| &mut p.rate)
                .field("Pos", |p| &mut p.pos)
                .optional("Note", |p| &mut p.note)
                .list("Tags", |p| &mut p.tags)
                .optional("Attached", |p| &mut p.attached)
                .referenceable()
                .with_on_constructed(),
        )
        .register(
            Composite::<Assembly>::new("Assembly")
                .field("Name", |a| &mut a.name)
                .list("Parts", |a| &mut a.parts)
                .list("Counts", |a| &mut a.counts)
                .slot_list("Slots", |a| &mut a.slots)
                .optional("Featured", |a| &mut a.featured)
                .referenceable(),
        )
        .register(AbstractType::of::<Handle<dyn Component>>("Component").referenceable())
        .register_upcast::<Handle<Part>, Handle<dyn Component>>(part_component)
        .register_upcast::<Handle<Assembly>, Handle<dyn Component>>(assembly_component);
    types
}

// ===========================================================================
// Documents
// ===========================================================================

pub fn doc(xml: &str) -> Document {
    Document::parse(xml).unwrap()
}

/// `count` parts, each attached to the previous one by reference.
pub fn part_chain_xml(count: usize) -> String {
    let mut xml = String::from("<Defs>");
    for i in 0..count {
        xml.push_str(&format!("<P{i}><Name>part{i}</Name><Mass>{}</Mass>", i % 200));
        if i > 0 {
            xml.push_str(&format!("<Attached>part{}</Attached>", i - 1));
        }
        xml.push_str(&format!("<Tags><li>t{i}</li><li>shared</li></Tags></P{i}>"));
    }
    xml.push_str("</Defs>");
    xml
}
