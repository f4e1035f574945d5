//! Full def loads: inheritance, cross references, assets, hooks and the
//! config-error report.

use std::cell::RefCell;

use defloom_core::{DiagnosticKind, Handle, Node};
use defloom_defs::{
    ConfigErrors, Def, DefBase, DefLoader, LoadedDefs, MemoryCatalog, PreResolve, def_type,
};

// ===========================================================================
// Def types
// ===========================================================================

#[derive(Debug, Clone, PartialEq)]
struct Sprite {
    path: String,
}

#[derive(Debug, Default)]
struct ItemDef {
    base: DefBase,
    max_stack: u32,
    icon: Option<Sprite>,
    post_loaded: bool,
}

impl Def for ItemDef {
    fn base(&self) -> &DefBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DefBase {
        &mut self.base
    }

    fn config_errors(&self, report: &mut ConfigErrors) {
        if self.label().is_none_or(|label| label.trim().is_empty()) {
            report.field_error("Label", "Item has no label!");
        }
        if self.icon.is_none() {
            report.field_warn("Icon", "Item is missing an icon. The placeholder icon will be used.");
        }
    }

    fn post_load(&mut self) {
        self.post_loaded = true;
    }
}

#[derive(Debug, Default)]
struct RecipeDef {
    base: DefBase,
    output: Option<Handle<ItemDef>>,
    inputs: Vec<Handle<ItemDef>>,
    ticks: u32,
    byproduct_id: Option<String>,
    byproduct: Option<Handle<ItemDef>>,
    related: Option<Handle<dyn Def>>,
}

impl Def for RecipeDef {
    fn base(&self) -> &DefBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DefBase {
        &mut self.base
    }

    fn pre_resolve_references(&mut self, refs: &mut PreResolve<'_>) {
        let Some(id) = self.byproduct_id.clone() else {
            return;
        };
        let this = refs.this().downcast::<RecipeDef>().unwrap();
        refs.request(id, move |item: Handle<ItemDef>| {
            this.borrow_mut().byproduct = Some(item);
        });
    }
}

fn def_loader() -> DefLoader {
    let mut loader = DefLoader::new();
    loader
        .register_def(
            def_type::<ItemDef>("ItemDef")
                .field("MaxStack", |d| &mut d.max_stack)
                .optional("Icon", |d| &mut d.icon),
        )
        .register_def(
            def_type::<RecipeDef>("RecipeDef")
                .optional("Output", |d| &mut d.output)
                .list("Inputs", |d| &mut d.inputs)
                .field("Ticks", |d| &mut d.ticks)
                .optional("Byproduct", |d| &mut d.byproduct_id)
                .optional("Related", |d| &mut d.related),
        )
        .register_asset::<Sprite>("Sprite");
    let mut catalog = MemoryCatalog::new();
    catalog.insert(
        "icons/iron",
        Sprite {
            path: "iron.png".into(),
        },
    );
    loader.set_catalog(catalog);
    loader
}

const ITEMS: &str = r#"
<Defs>
    <ItemBase Abstract="true" Class="ItemDef"><MaxStack>50</MaxStack></ItemBase>
    <IronPlate Parent="ItemBase">
        <Label>Iron plate</Label>
        <Icon>icons/iron</Icon>
    </IronPlate>
    <CopperPlate Parent="ItemBase">
        <Label>Copper plate</Label>
        <Icon>icons/copper</Icon>
    </CopperPlate>
    <Gear Class="ItemDef"><MaxStack>100</MaxStack></Gear>
</Defs>"#;

const RECIPES: &str = r#"
<Defs>
    <GearRecipe Class="RecipeDef">
        <Output>Gear</Output>
        <Inputs><li>IronPlate</li><li>IronPlate</li></Inputs>
        <Ticks>5</Ticks>
        <Byproduct>CopperPlate</Byproduct>
        <Related>IronPlate</Related>
    </GearRecipe>
</Defs>"#;

fn load(documents: &[&str]) -> LoadedDefs {
    let loader = def_loader();
    let mut load = loader.start();
    for (i, text) in documents.iter().enumerate() {
        assert!(load.digest_str(&format!("doc{i}"), text));
    }
    load.finish().unwrap()
}

// ===========================================================================
// Tests
// ===========================================================================

#[test]
fn defs_land_in_the_database_by_id_and_type() {
    let loaded = load(&[RECIPES, ITEMS]);
    assert_eq!(loaded.database.len(), 4);
    assert_eq!(loaded.database.count_of::<ItemDef>(), 3);
    assert!(loaded.database.get("ItemBase").is_none());

    let iron = loaded.database.get_as::<ItemDef>("IronPlate").unwrap();
    let iron = iron.borrow();
    assert_eq!(iron.id(), "IronPlate");
    assert_eq!(iron.base.parent_name.as_deref(), Some("ItemBase"));
    assert_eq!(iron.label(), Some("Iron plate"));
    assert_eq!(iron.max_stack, 50);
    assert!(iron.post_loaded);

    let gear = loaded.database.get("Gear").unwrap();
    assert_eq!(gear.to_string(), "[ItemDef] Gear");
}

#[test]
fn references_between_defs_resolve_regardless_of_order() {
    let loaded = load(&[RECIPES, ITEMS]);
    let db = &loaded.database;
    let recipe = db.get_as::<RecipeDef>("GearRecipe").unwrap();
    let recipe = recipe.borrow();
    let iron = db.get_as::<ItemDef>("IronPlate").unwrap();

    assert!(recipe.output.as_ref().unwrap().ptr_eq(&db.get_as::<ItemDef>("Gear").unwrap()));
    assert_eq!(recipe.inputs.len(), 2);
    assert!(recipe.inputs.iter().all(|input| input.ptr_eq(&iron)));
    assert_eq!(recipe.ticks, 5);
    assert!(
        recipe
            .byproduct
            .as_ref()
            .unwrap()
            .ptr_eq(&db.get_as::<ItemDef>("CopperPlate").unwrap())
    );
    assert_eq!(recipe.related.as_ref().unwrap().borrow().id(), "IronPlate");
}

#[test]
fn assets_come_from_the_catalog() {
    let loaded = load(&[ITEMS]);
    let iron = loaded.database.get_as::<ItemDef>("IronPlate").unwrap();
    assert_eq!(iron.borrow().icon.as_ref().unwrap().path, "iron.png");

    let copper = loaded.database.get_as::<ItemDef>("CopperPlate").unwrap();
    assert!(copper.borrow().icon.is_none());
    assert_eq!(loaded.report.missing, ["icons/copper"]);
    assert_eq!(loaded.diagnostics.count(DiagnosticKind::MissingReference), 1);
}

#[test]
fn config_errors_are_attributed_to_their_def() {
    let loaded = load(&[ITEMS]);
    let errors: Vec<String> = loaded.config_errors.errors().iter().map(ToString::to_string).collect();
    assert_eq!(errors, ["[Gear] Field:<Label> Item has no label!"]);

    let warned: Vec<&str> = loaded
        .config_errors
        .warnings()
        .iter()
        .map(|w| w.def_id.as_str())
        .collect();
    assert_eq!(warned, ["CopperPlate", "Gear"]);
}

#[test]
fn broken_documents_are_skipped() {
    let loader = def_loader();
    let mut load = loader.start();
    assert!(load.digest_str("items", ITEMS));
    assert!(!load.digest_str("broken", "<Defs><Oops></Defs>"));
    assert!(!load.digest_str("clash", "<Defs><Gear Class=\"ItemDef\"/></Defs>"));
    assert_eq!(load.failed(), 2);

    let loaded = load.finish().unwrap();
    assert_eq!(loaded.database.len(), 3);
}

#[test]
fn defs_without_class_fail_alone() {
    let loaded = load(&["<Defs><Loose><MaxStack>3</MaxStack></Loose><Gear Class=\"ItemDef\"><Label>g</Label></Gear></Defs>"]);
    assert_eq!(loaded.database.len(), 1);
    assert_eq!(loaded.diagnostics.count(DiagnosticKind::NodeFailed), 1);
}

#[test]
fn no_ref_defs_keep_their_id_but_are_not_referenceable() {
    let loaded = load(&[r#"<Defs>
        <IronPlate Class="ItemDef" NoRef="true"><Label>Iron plate</Label></IronPlate>
        <GearRecipe Class="RecipeDef"><Output>IronPlate</Output></GearRecipe>
    </Defs>"#]);
    assert_eq!(loaded.database.len(), 2);
    let iron = loaded.database.get_as::<ItemDef>("IronPlate").unwrap();
    assert_eq!(iron.borrow().id(), "IronPlate");
    assert!(!loaded.references.contains("IronPlate"));
    assert_eq!(loaded.report.missing, ["IronPlate"]);
}

#[test]
fn assets_and_defs_may_share_a_name() {
    let mut loader = def_loader();
    let mut catalog = MemoryCatalog::new();
    catalog.insert(
        "IronPlate",
        Sprite {
            path: "iron_plate.png".into(),
        },
    );
    loader.set_catalog(catalog);
    let mut load = loader.start();
    assert!(load.digest_str(
        "items",
        r#"<Defs>
            <IronPlate Class="ItemDef"><Label>Iron plate</Label><Icon>IronPlate</Icon></IronPlate>
            <GearRecipe Class="RecipeDef"><Output>IronPlate</Output></GearRecipe>
        </Defs>"#,
    ));
    let loaded = load.finish().unwrap();

    assert!(loaded.report.is_clean(), "{:?}", loaded.report);
    let iron = loaded.database.get_as::<ItemDef>("IronPlate").unwrap();
    assert_eq!(iron.borrow().icon.as_ref().unwrap().path, "iron_plate.png");
    let recipe = loaded.database.get_as::<RecipeDef>("GearRecipe").unwrap();
    assert!(recipe.borrow().output.as_ref().unwrap().ptr_eq(&iron));
    assert_eq!(loaded.diagnostics.count(DiagnosticKind::ReferenceTypeMismatch), 0);
}

#[test]
fn digest_file_reads_from_disk() {
    let dir = std::env::temp_dir().join(format!("defloom_defs_test_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("items.xml");
    std::fs::write(&path, ITEMS).unwrap();

    let loader = def_loader();
    let mut load = loader.start();
    assert!(load.digest_file(&path));
    assert!(!load.digest_file(&dir.join("missing.xml")));
    let loaded = load.finish().unwrap();
    assert_eq!(loaded.database.len(), 3);

    let _ = std::fs::remove_dir_all(&dir);
}

// ===========================================================================
// Hook order
// ===========================================================================

thread_local! {
    static HOOKS: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

fn record(event: String) {
    HOOKS.with(|hooks| hooks.borrow_mut().push(event));
}

#[derive(Debug, Default)]
struct Tracer {
    base: DefBase,
}

impl Def for Tracer {
    fn base(&self) -> &DefBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut DefBase {
        &mut self.base
    }

    fn on_constructed(&mut self, node: &Node) {
        self.base_mut().on_constructed(node);
        record(format!("constructed {}", self.id()));
    }

    fn pre_resolve_references(&mut self, refs: &mut PreResolve<'_>) {
        record(format!("pre_resolve {}", refs.this().id()));
    }

    fn config_errors(&self, _report: &mut ConfigErrors) {
        record(format!("config {}", self.id()));
    }

    fn post_load(&mut self) {
        record(format!("post_load {}", self.id()));
    }
}

#[test]
fn hooks_run_in_phase_order() {
    HOOKS.with(|hooks| hooks.borrow_mut().clear());
    let mut loader = DefLoader::new();
    loader.register_def(def_type::<Tracer>("Tracer"));
    let mut load = loader.start();
    assert!(load.digest_str("tracers", r#"<Defs><A Class="Tracer"><Label>a</Label></A><B Class="Tracer"><Label>b</Label></B></Defs>"#));
    load.finish().unwrap();

    let hooks = HOOKS.with(|hooks| hooks.borrow().clone());
    assert_eq!(
        hooks,
        [
            "constructed A",
            "constructed B",
            "pre_resolve A",
            "pre_resolve B",
            "config A",
            "config B",
            "post_load A",
            "post_load B",
        ]
    );
}
