//! Per-type schemas.
//!
//! A node type is data, not a trait object: a table of slot descriptors and
//! action descriptors holding closures, looked up by type tag. The engine
//! treats every closure as an opaque pure function over already-resolved
//! dependency values.

use crate::expansion::GENERATION_SLOT;
use crate::query::{DependencyQuery, NodeRef};
use crate::tree::{NodeId, NodeSpec};
use crate::value::{Value, EMPTY};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

pub type DefinitionFn = Arc<dyn Fn(&DependencyValues) -> Value>;
pub type InverseFn = Arc<dyn Fn(&Value, &DependencyValues) -> InverseResult>;
pub type ValidatorFn = Arc<dyn Fn(&Value) -> Validation>;
pub type HandlerFn = Arc<dyn Fn(&ActionInput<'_>) -> Vec<SlotUpdate>>;
pub type GeneratorFn = Arc<dyn Fn(&DependencyValues) -> Vec<u64>>;
pub type TemplateFn = Arc<dyn Fn(&GeneratedItem) -> NodeSpec>;

/// Values of one resolved dependency query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyValue {
    pub values: Vec<Value>,
    pub resolved: bool,
}

/// Inputs handed to definitions, inverse definitions, generators and
/// action handlers, in the order the queries were declared.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyValues {
    entries: Vec<DependencyValue>,
}

impl DependencyValues {
    pub fn new(entries: Vec<DependencyValue>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First value of query `index`; `Value::Empty` if the query did not
    /// resolve or matched nothing.
    pub fn get(&self, index: usize) -> &Value {
        self.entries
            .get(index)
            .and_then(|d| d.values.first())
            .unwrap_or(&EMPTY)
    }

    /// Every value matched by query `index`.
    pub fn all(&self, index: usize) -> &[Value] {
        self.entries
            .get(index)
            .map(|d| d.values.as_slice())
            .unwrap_or(&[])
    }

    /// Every value matched by query `index`, as a list value.
    pub fn list(&self, index: usize) -> Value {
        Value::list(self.all(index).iter().cloned())
    }

    pub fn is_resolved(&self, index: usize) -> bool {
        self.entries.get(index).is_some_and(|d| d.resolved)
    }

    pub fn all_resolved(&self) -> bool {
        self.entries.iter().all(|d| d.resolved)
    }
}

/// A proposed new value for one resolved dependency.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedChange {
    /// Position of the query in the slot's dependency list.
    pub dependency: usize,
    /// Position within the query's matches (0 for single-slot queries).
    pub element: usize,
    pub value: Value,
}

impl ProposedChange {
    pub fn new(dependency: usize, value: Value) -> Self {
        Self {
            dependency,
            element: 0,
            value,
        }
    }

    pub fn element(dependency: usize, element: usize, value: Value) -> Self {
        Self {
            dependency,
            element,
            value,
        }
    }
}

/// Answer of an inverse definition.
#[derive(Debug, Clone, PartialEq)]
pub enum InverseResult {
    /// The requested value is reached by applying all changes.
    Propose(Vec<ProposedChange>),
    /// Only part of the request can be honoured by these changes.
    Partial(Vec<ProposedChange>),
    Reject(String),
}

/// Answer of an essential slot's validator.
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Accept,
    /// Store this value instead; the request becomes partially applied.
    Adjust(Value),
    Reject(String),
}

/// How a slot obtains its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMode {
    /// Forward definition only.
    Derived,
    /// Stored value only.
    Essential,
    /// Forward definition until a value is requested, stored value after.
    Overridable,
    /// Declared essential and given a definition without override
    /// semantics. The stored value stays authoritative.
    Shadowed,
}

impl SlotMode {
    pub fn is_essential(self) -> bool {
        !matches!(self, SlotMode::Derived)
    }
}

/// Declaration of one slot of a node type.
#[derive(Clone)]
pub struct SlotSchema {
    pub name: Arc<str>,
    pub dependencies: Vec<DependencyQuery>,
    pub definition: Option<DefinitionFn>,
    pub inverse: Option<InverseFn>,
    /// Default stored value; `Some` marks the slot essential.
    pub essential: Option<Value>,
    /// Node attribute that overrides `essential` as the default.
    pub default_attribute: Option<Arc<str>>,
    pub overridable: bool,
    pub validator: Option<ValidatorFn>,
}

impl SlotSchema {
    fn bare(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            definition: None,
            inverse: None,
            essential: None,
            default_attribute: None,
            overridable: false,
            validator: None,
        }
    }

    /// Slot whose value is a directly stored value.
    pub fn essential(name: impl Into<Arc<str>>, default: impl Into<Value>) -> Self {
        Self {
            essential: Some(default.into()),
            ..Self::bare(name)
        }
    }

    /// Slot computed from its dependencies.
    pub fn derived(
        name: impl Into<Arc<str>>,
        dependencies: Vec<DependencyQuery>,
        definition: impl Fn(&DependencyValues) -> Value + 'static,
    ) -> Self {
        Self {
            dependencies,
            definition: Some(Arc::new(definition)),
            ..Self::bare(name)
        }
    }

    pub fn with_inverse(mut self, inverse: impl Fn(&Value, &DependencyValues) -> InverseResult + 'static) -> Self {
        self.inverse = Some(Arc::new(inverse));
        self
    }

    /// Attach a forward definition. On an essential slot without
    /// `overridable` this yields a `Shadowed` slot.
    pub fn with_definition(
        mut self,
        dependencies: Vec<DependencyQuery>,
        definition: impl Fn(&DependencyValues) -> Value + 'static,
    ) -> Self {
        self.dependencies = dependencies;
        self.definition = Some(Arc::new(definition));
        self
    }

    /// Make a derived slot essential with the given default: its
    /// definition is used until a value is requested for it.
    pub fn overridable(mut self, default: impl Into<Value>) -> Self {
        self.essential = Some(default.into());
        self.overridable = true;
        self
    }

    pub fn default_from(mut self, attribute: impl Into<Arc<str>>) -> Self {
        self.default_attribute = Some(attribute.into());
        self
    }

    pub fn validated(mut self, validator: impl Fn(&Value) -> Validation + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn mode(&self) -> SlotMode {
        match (self.essential.is_some(), self.definition.is_some(), self.overridable) {
            (false, _, _) => SlotMode::Derived,
            (true, false, _) => SlotMode::Essential,
            (true, true, true) => SlotMode::Overridable,
            (true, true, false) => SlotMode::Shadowed,
        }
    }
}

impl fmt::Debug for SlotSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotSchema")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("dependencies", &self.dependencies)
            .field("inverse", &self.inverse.is_some())
            .field("essential", &self.essential)
            .finish()
    }
}

/// Reference to an action on a node, relative to some context node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionPath {
    pub node: NodeRef,
    pub action: Arc<str>,
}

impl ActionPath {
    pub fn new(node: NodeRef, action: impl Into<Arc<str>>) -> Self {
        Self {
            node,
            action: action.into(),
        }
    }

    /// Action at a node path, e.g. `ActionPath::at("/button", "press")`.
    pub fn at(path: impl Into<Arc<str>>, action: impl Into<Arc<str>>) -> Self {
        Self::new(NodeRef::Path(path.into()), action)
    }
}

/// Target of one update produced by an action handler.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotTarget {
    pub node: NodeRef,
    pub slot: Arc<str>,
}

/// One `(target, new value)` entry of an action batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotUpdate {
    pub target: SlotTarget,
    pub value: Value,
}

impl SlotUpdate {
    /// Update a slot of the action's own node.
    pub fn own(slot: impl Into<Arc<str>>, value: Value) -> Self {
        Self::new(NodeRef::This, slot, value)
    }

    /// Update a slot of the node at `path`, relative to the action's node.
    pub fn at(path: impl Into<Arc<str>>, slot: impl Into<Arc<str>>, value: Value) -> Self {
        Self::new(NodeRef::Path(path.into()), slot, value)
    }

    pub fn new(node: NodeRef, slot: impl Into<Arc<str>>, value: Value) -> Self {
        Self {
            target: SlotTarget {
                node,
                slot: slot.into(),
            },
            value,
        }
    }
}

/// What a handler sees when an action runs.
pub struct ActionInput<'a> {
    pub node: NodeId,
    pub args: &'a Value,
    pub deps: &'a DependencyValues,
}

impl ActionInput<'_> {
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }
}

#[derive(Clone)]
pub enum ActionBody {
    Handler(HandlerFn),
    /// Fixed ordered group of sub-actions fired as one batch.
    Composite(Vec<ActionPath>),
}

/// Declaration of one action of a node type.
#[derive(Clone)]
pub struct ActionSchema {
    pub name: Arc<str>,
    pub dependencies: Vec<DependencyQuery>,
    /// Keys a dispatch's argument object must carry.
    pub required_args: Vec<Arc<str>>,
    pub body: ActionBody,
}

impl ActionSchema {
    pub fn new(
        name: impl Into<Arc<str>>,
        dependencies: Vec<DependencyQuery>,
        handler: impl Fn(&ActionInput<'_>) -> Vec<SlotUpdate> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            dependencies,
            required_args: Vec::new(),
            body: ActionBody::Handler(Arc::new(handler)),
        }
    }

    pub fn composite(name: impl Into<Arc<str>>, members: Vec<ActionPath>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            required_args: Vec::new(),
            body: ActionBody::Composite(members),
        }
    }

    pub fn requires(mut self, arg: impl Into<Arc<str>>) -> Self {
        self.required_args.push(arg.into());
        self
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.body, ActionBody::Composite(_))
    }
}

impl fmt::Debug for ActionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSchema")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("required_args", &self.required_args)
            .field("composite", &self.is_composite())
            .finish()
    }
}

/// Item handed to an expansion template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedItem {
    /// Generation (source) index; stable across regenerations.
    pub index: u64,
    /// Position within the current generation.
    pub position: usize,
}

/// Generator and template of a dynamic-expansion node type.
#[derive(Clone)]
pub struct ExpansionSchema {
    pub dependencies: Vec<DependencyQuery>,
    pub generator: GeneratorFn,
    pub template: TemplateFn,
}

impl ExpansionSchema {
    pub fn new(
        dependencies: Vec<DependencyQuery>,
        generator: impl Fn(&DependencyValues) -> Vec<u64> + 'static,
        template: impl Fn(&GeneratedItem) -> NodeSpec + 'static,
    ) -> Self {
        Self {
            dependencies,
            generator: Arc::new(generator),
            template: Arc::new(template),
        }
    }

    /// Generate indices `0..n` where `n` is the integer value of `count`.
    pub fn counted(count: DependencyQuery, template: impl Fn(&GeneratedItem) -> NodeSpec + 'static) -> Self {
        Self::new(
            vec![count],
            |deps| {
                let n = deps.get(0).as_int().unwrap_or(0).max(0) as u64;
                (0..n).collect()
            },
            template,
        )
    }

    /// Hidden slot computing the generation's index list.
    pub(crate) fn generation_slot(&self) -> SlotSchema {
        let generator = self.generator.clone();
        SlotSchema::derived(GENERATION_SLOT, self.dependencies.clone(), move |deps| {
            Value::list(generator(deps).into_iter().map(|i| Value::Int(i as i64)))
        })
    }
}

/// Schema of one node type.
#[derive(Clone, Debug)]
pub struct NodeSchema {
    pub type_tag: Arc<str>,
    pub slots: IndexMap<Arc<str>, SlotSchema>,
    pub actions: IndexMap<Arc<str>, ActionSchema>,
    pub expansion: Option<ExpansionSchema>,
}

impl fmt::Debug for ExpansionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpansionSchema")
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

impl NodeSchema {
    pub fn new(type_tag: impl Into<Arc<str>>) -> Self {
        Self {
            type_tag: type_tag.into(),
            slots: IndexMap::new(),
            actions: IndexMap::new(),
            expansion: None,
        }
    }

    pub fn slot(mut self, slot: SlotSchema) -> Self {
        self.slots.insert(slot.name.clone(), slot);
        self
    }

    pub fn action(mut self, action: ActionSchema) -> Self {
        self.actions.insert(action.name.clone(), action);
        self
    }

    pub fn expansion(mut self, expansion: ExpansionSchema) -> Self {
        let generation = expansion.generation_slot();
        self.slots.insert(generation.name.clone(), generation);
        self.expansion = Some(expansion);
        self
    }

    /// Declared slot names, excluding engine-internal ones.
    pub fn public_slots(&self) -> impl Iterator<Item = &Arc<str>> {
        self.slots.keys().filter(|name| !name.starts_with('@'))
    }
}

/// Schemas by type tag.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    types: FxHashMap<Arc<str>, Arc<NodeSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: NodeSchema) {
        self.types.insert(schema.type_tag.clone(), Arc::new(schema));
    }

    pub fn with(mut self, schema: NodeSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, type_tag: &str) -> Option<&Arc<NodeSchema>> {
        self.types.get(type_tag)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_modes() {
        let essential = SlotSchema::essential("x", 1i64);
        assert_eq!(essential.mode(), SlotMode::Essential);

        let derived = SlotSchema::derived("y", vec![], |_| Value::int(2));
        assert_eq!(derived.mode(), SlotMode::Derived);

        let overridable = SlotSchema::derived("z", vec![], |_| Value::int(3)).overridable(0i64);
        assert_eq!(overridable.mode(), SlotMode::Overridable);

        let shadowed = SlotSchema::essential("w", 0i64).with_definition(vec![], |_| Value::int(4));
        assert_eq!(shadowed.mode(), SlotMode::Shadowed);
        assert!(shadowed.mode().is_essential());
    }

    #[test]
    fn dependency_values_default_to_empty() {
        let deps = DependencyValues::new(vec![
            DependencyValue {
                values: vec![Value::int(1), Value::int(2)],
                resolved: true,
            },
            DependencyValue::default(),
        ]);
        assert_eq!(deps.get(0), &Value::int(1));
        assert_eq!(deps.all(0).len(), 2);
        assert_eq!(deps.get(1), &Value::Empty);
        assert_eq!(deps.get(7), &Value::Empty);
        assert!(!deps.is_resolved(1));
        assert!(!deps.all_resolved());
    }

    #[test]
    fn expansion_adds_hidden_generation_slot() {
        let schema = NodeSchema::new("repeat")
            .slot(SlotSchema::essential("count", 2i64))
            .expansion(ExpansionSchema::counted(DependencyQuery::own("count"), |_| NodeSpec::new("item")));
        assert!(schema.slots.contains_key(GENERATION_SLOT));
        let public: Vec<&str> = schema.public_slots().map(|s| &**s).collect();
        assert_eq!(public, vec!["count"]);
    }
}
