//! Entity keys and the entity bodies the operation core reads and writes.
//!
//! Entities are addressed by an [`EntityKey`]: a kind plus a numeric id, the
//! same shape the game's datastore uses. Keys order by kind, then id, which
//! gives every map keyed by them a stable iteration order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Kind discriminator for stored entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A player character (the actor of an operation).
    Character,
    /// An inventory item.
    Item,
    /// An idea a character can turn into a prototype.
    Idea,
    /// The shared definition behind ideas and skills.
    IdeaDefinition,
    /// A learned construction skill.
    Skill,
    /// A generic entity requirement (one requirement slot template).
    Requirement,
}

impl EntityKind {
    /// Stable lowercase name, used in keys and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Character => "character",
            Self::Item => "item",
            Self::Idea => "idea",
            Self::IdeaDefinition => "idea_definition",
            Self::Skill => "skill",
            Self::Requirement => "requirement",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "character" => Ok(Self::Character),
            "item" => Ok(Self::Item),
            "idea" => Ok(Self::Idea),
            "idea_definition" => Ok(Self::IdeaDefinition),
            "skill" => Ok(Self::Skill),
            "requirement" => Ok(Self::Requirement),
            other => Err(ValidationError::malformed("kind", format!("unknown entity kind '{other}'"))),
        }
    }
}

/// Datastore key: kind plus numeric id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: u64,
}

impl EntityKey {
    #[must_use]
    pub const fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }

    #[must_use]
    pub const fn character(id: u64) -> Self {
        Self::new(EntityKind::Character, id)
    }

    #[must_use]
    pub const fn item(id: u64) -> Self {
        Self::new(EntityKind::Item, id)
    }

    #[must_use]
    pub const fn requirement(id: u64) -> Self {
        Self::new(EntityKind::Requirement, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for EntityKey {
    type Err = ValidationError;

    /// Parses the `kind:id` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ValidationError::malformed("key", format!("expected kind:id, got '{s}'")))?;
        let id = id
            .parse::<u64>()
            .map_err(|_| ValidationError::malformed("key", format!("non-numeric id in '{s}'")))?;
        Ok(Self::new(kind.parse()?, id))
    }
}

/// Hierarchical item type, `/`-separated (e.g. `tool/hammer/claw`).
///
/// The first segment is the item's category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypePath(String);

/// How well an item type satisfies an accepted type. `Exact` sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeMatch {
    Exact,
    Subtype,
}

impl TypePath {
    /// Creates a type path, normalizing case and stray separators.
    #[must_use]
    pub fn new(path: impl AsRef<str>) -> Self {
        let normalized = path
            .as_ref()
            .split('/')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>()
            .join("/");
        Self(normalized)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Matches this item type against an accepted type.
    ///
    /// `tool/hammer` accepts `tool/hammer` exactly and `tool/hammer/claw` as a
    /// subtype, but not `tool/hammers`.
    #[must_use]
    pub fn satisfies(&self, accepted: &TypePath) -> Option<TypeMatch> {
        if accepted.0.is_empty() {
            return None;
        }
        if self.0 == accepted.0 {
            return Some(TypeMatch::Exact);
        }
        let rest = self.0.strip_prefix(accepted.0.as_str())?;
        rest.starts_with('/').then_some(TypeMatch::Subtype)
    }

    /// Best match against any of `accepted`.
    #[must_use]
    pub fn best_match(&self, accepted: &[TypePath]) -> Option<TypeMatch> {
        accepted.iter().filter_map(|a| self.satisfies(a)).min()
    }
}

impl fmt::Display for TypePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypePath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A player character. Only the state the operation core consults is modeled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub hit_points: i32,
    #[serde(default)]
    pub dead: bool,
    #[serde(default)]
    pub trading: bool,
    #[serde(default)]
    pub in_combat: bool,
    #[serde(default)]
    pub vending: bool,
    /// Occupied by some other (non-deferred) action.
    #[serde(default)]
    pub busy: bool,
    /// Experience per knowledge subject, keyed by subject name.
    #[serde(default)]
    pub knowledge: BTreeMap<String, u64>,
}

impl Character {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hit_points: 100,
            dead: false,
            trading: false,
            in_combat: false,
            vending: false,
            busy: false,
            knowledge: BTreeMap::new(),
        }
    }

    /// Adds experience for a knowledge subject.
    pub fn increase_knowledge(&mut self, subject: &str, amount: u64) {
        *self.knowledge.entry(subject.to_string()).or_default() += amount;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub item_type: TypePath,
    #[serde(default = "default_quantity")]
    pub quantity: u64,
    /// Container holding the item; a character key for inventory items.
    #[serde(default)]
    pub owner: Option<EntityKey>,
}

const fn default_quantity() -> u64 {
    1
}

impl Item {
    #[must_use]
    pub fn new(name: impl Into<String>, item_type: impl Into<TypePath>) -> Self {
        Self {
            name: name.into(),
            item_type: item_type.into(),
            quantity: 1,
            owner: None,
        }
    }

    #[must_use]
    pub fn owned_by(mut self, owner: EntityKey) -> Self {
        self.owner = Some(owner);
        self
    }

    #[must_use]
    pub fn with_quantity(mut self, quantity: u64) -> Self {
        self.quantity = quantity;
        self
    }
}

/// An idea held by one character, pointing at its definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Idea {
    pub name: String,
    pub owner: EntityKey,
    pub definition: EntityKey,
}

/// Shared definition behind ideas and the skills they become.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdeaDefinition {
    pub name: String,
    /// Name of the item a prototype or craft produces.
    pub item_name: String,
    pub item_type: TypePath,
    #[serde(default)]
    pub prototype_construction_secs: Option<u64>,
    #[serde(default)]
    pub construction_secs: Option<u64>,
    /// Candidate-source fields (e.g. `skillMaterialsRequired`) listing requirement keys.
    #[serde(default)]
    pub requirements: BTreeMap<String, Vec<EntityKey>>,
}

impl IdeaDefinition {
    /// Requirement keys listed under a candidate-source field.
    #[must_use]
    pub fn field(&self, name: &str) -> &[EntityKey] {
        self.requirements.get(name).map_or(&[], Vec::as_slice)
    }
}

/// A learned skill, created when a prototype succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub owner: EntityKey,
    pub definition: EntityKey,
}

/// Template for one requirement slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericEntityRequirement {
    pub name: String,
    pub accepted_types: Vec<TypePath>,
    #[serde(default = "default_quantity")]
    pub quantity: u64,
}

/// Typed entity payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityBody {
    Character(Character),
    Item(Item),
    Idea(Idea),
    IdeaDefinition(IdeaDefinition),
    Skill(Skill),
    Requirement(GenericEntityRequirement),
}

impl EntityBody {
    #[must_use]
    pub const fn kind(&self) -> EntityKind {
        match self {
            Self::Character(_) => EntityKind::Character,
            Self::Item(_) => EntityKind::Item,
            Self::Idea(_) => EntityKind::Idea,
            Self::IdeaDefinition(_) => EntityKind::IdeaDefinition,
            Self::Skill(_) => EntityKind::Skill,
            Self::Requirement(_) => EntityKind::Requirement,
        }
    }
}

/// A stored entity with its optimistic-concurrency version.
///
/// Versions start at 1 on insert and increase by one on every committed
/// update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub key: EntityKey,
    #[serde(default = "default_version")]
    pub version: u64,
    pub body: EntityBody,
}

const fn default_version() -> u64 {
    1
}

impl Entity {
    /// Creates a version-1 entity; the key kind follows the body.
    #[must_use]
    pub fn new(id: u64, body: EntityBody) -> Self {
        Self {
            key: EntityKey::new(body.kind(), id),
            version: 1,
            body,
        }
    }

    #[must_use]
    pub fn character(id: u64, character: Character) -> Self {
        Self::new(id, EntityBody::Character(character))
    }

    #[must_use]
    pub fn item(id: u64, item: Item) -> Self {
        Self::new(id, EntityBody::Item(item))
    }

    #[must_use]
    pub fn idea(id: u64, idea: Idea) -> Self {
        Self::new(id, EntityBody::Idea(idea))
    }

    #[must_use]
    pub fn idea_definition(id: u64, definition: IdeaDefinition) -> Self {
        Self::new(id, EntityBody::IdeaDefinition(definition))
    }

    #[must_use]
    pub fn skill(id: u64, skill: Skill) -> Self {
        Self::new(id, EntityBody::Skill(skill))
    }

    #[must_use]
    pub fn requirement(id: u64, requirement: GenericEntityRequirement) -> Self {
        Self::new(id, EntityBody::Requirement(requirement))
    }

    /// Display name, whatever the kind.
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.body {
            EntityBody::Character(c) => &c.name,
            EntityBody::Item(i) => &i.name,
            EntityBody::Idea(i) => &i.name,
            EntityBody::IdeaDefinition(d) => &d.name,
            EntityBody::Skill(s) => &s.name,
            EntityBody::Requirement(r) => &r.name,
        }
    }

    #[must_use]
    pub const fn as_character(&self) -> Option<&Character> {
        match &self.body {
            EntityBody::Character(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_character_mut(&mut self) -> Option<&mut Character> {
        match &mut self.body {
            EntityBody::Character(c) => Some(c),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_item(&self) -> Option<&Item> {
        match &self.body {
            EntityBody::Item(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_item_mut(&mut self) -> Option<&mut Item> {
        match &mut self.body {
            EntityBody::Item(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_idea(&self) -> Option<&Idea> {
        match &self.body {
            EntityBody::Idea(i) => Some(i),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_idea_definition(&self) -> Option<&IdeaDefinition> {
        match &self.body {
            EntityBody::IdeaDefinition(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_skill(&self) -> Option<&Skill> {
        match &self.body {
            EntityBody::Skill(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_requirement(&self) -> Option<&GenericEntityRequirement> {
        match &self.body {
            EntityBody::Requirement(r) => Some(r),
            _ => None,
        }
    }
}
