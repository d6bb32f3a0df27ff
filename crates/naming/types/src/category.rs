use serde::{Deserialize, Serialize};

use crate::identifier::{ExternalKind, Identifier};

/// The kind of entity an identity represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Host,
    SyntacticType,
    SemanticType,
    NaturalPerson,
    ArtificialPerson,
    EmailPerson,
    MobilePerson,
}

impl Category {
    pub fn is_host(&self) -> bool {
        matches!(self, Category::Host)
    }

    pub fn is_type(&self) -> bool {
        matches!(self, Category::SyntacticType | Category::SemanticType)
    }

    pub fn is_internal_person(&self) -> bool {
        matches!(self, Category::NaturalPerson | Category::ArtificialPerson)
    }

    pub fn is_external_person(&self) -> bool {
        matches!(self, Category::EmailPerson | Category::MobilePerson)
    }

    /// Intrinsic category of an external identifier.
    pub fn for_external(kind: ExternalKind) -> Self {
        match kind {
            ExternalKind::Email => Category::EmailPerson,
            ExternalKind::Mobile => Category::MobilePerson,
        }
    }

    /// Whether `identifier` is a legal address for this category.
    pub fn accepts(&self, identifier: &Identifier) -> bool {
        match self {
            Category::Host => matches!(identifier, Identifier::Host(_)),
            Category::SyntacticType
            | Category::SemanticType
            | Category::NaturalPerson
            | Category::ArtificialPerson => matches!(identifier, Identifier::Internal(_)),
            Category::EmailPerson => matches!(
                identifier,
                Identifier::External(external) if external.kind() == ExternalKind::Email
            ),
            Category::MobilePerson => matches!(
                identifier,
                Identifier::External(external) if external.kind() == ExternalKind::Mobile
            ),
        }
    }

    /// Whether an identity of category `predecessor` may be succeeded by one
    /// of this category. External persons can be promoted to internal persons,
    /// never the reverse.
    pub fn succeeds(&self, predecessor: Category) -> bool {
        *self == predecessor || (predecessor.is_external_person() && self.is_internal_person())
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Host => "host",
            Category::SyntacticType => "syntactic type",
            Category::SemanticType => "semantic type",
            Category::NaturalPerson => "natural person",
            Category::ArtificialPerson => "artificial person",
            Category::EmailPerson => "email person",
            Category::MobilePerson => "mobile person",
        };
        f.write_str(name)
    }
}
