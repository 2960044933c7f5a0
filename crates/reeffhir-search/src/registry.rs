//! Search-parameter registry and element-type reflection.
//!
//! The registry answers two questions for the helper layer: which search
//! parameters exist on a resource type (with their FHIRPath expressions and
//! reference targets), and what concrete shape an element path has on the
//! wire (CodeableConcept vs Coding vs Identifier, choice-type variants, the
//! string sub-fields of a HumanName, and so on). Choice-type expansion for
//! date parameters is cached by `(resource type, path)`.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::parameters::{SearchParamDef, SearchParamType};

/// On-the-wire shape of one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    CodeableConcept,
    Coding,
    Identifier,
    HumanName,
    Address,
    ContactPoint,
    Period,
    Quantity,
    Reference,
    String,
    Code,
    Uri,
    Boolean,
    Date,
    DateTime,
    Instant,
    Decimal,
    Integer,
}

impl FieldKind {
    /// Sub-fields searched for string parameters targeting this kind.
    pub fn string_subfields(self) -> &'static [&'static str] {
        match self {
            Self::HumanName => &["family", "given", "prefix", "suffix"],
            Self::Address => &["line", "city", "district", "state", "postalCode", "country"],
            Self::ContactPoint => &["value"],
            _ => &[],
        }
    }

    pub fn is_date_like(self) -> bool {
        matches!(self, Self::Date | Self::DateTime | Self::Instant)
    }
}

/// Declared type of an element: a single concrete kind or a `[x]` choice.
#[derive(Debug, Clone)]
pub enum ElementType {
    Kind(FieldKind),
    /// Concrete variant type names, capitalized per FHIR wire suffixes
    /// (`dateTime`, `Period`, `Quantity`, ...). Kept in declaration order.
    Choice(&'static [&'static str]),
}

/// One leaf field produced by date-path expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateLeaf {
    /// Field path relative to the document body.
    pub field: String,
    /// True when the leaf is a Period (searched via `.start` / `.end`).
    pub is_period: bool,
}

impl DateLeaf {
    fn plain(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            is_period: false,
        }
    }

    fn period(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            is_period: true,
        }
    }
}

type ElementKey = (&'static str, &'static str);

/// Static schema and search-parameter tables plus expansion caches.
pub struct SearchSchema {
    params: BTreeMap<&'static str, Vec<SearchParamDef>>,
    elements: BTreeMap<ElementKey, ElementType>,
    date_leaf_cache: RwLock<BTreeMap<(String, String), Vec<DateLeaf>>>,
}

impl SearchSchema {
    pub fn new() -> Self {
        Self {
            params: builtin_params(),
            elements: builtin_elements(),
            date_leaf_cache: RwLock::new(BTreeMap::new()),
        }
    }

    /// Look up a search parameter definition.
    pub fn param(&self, resource_type: &str, name: &str) -> Option<&SearchParamDef> {
        self.params
            .get(resource_type)
            .and_then(|defs| defs.iter().find(|d| d.name == name))
    }

    /// All parameters declared for a resource type.
    pub fn params_for(&self, resource_type: &str) -> &[SearchParamDef] {
        self.params
            .get(resource_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Reference-typed parameters on `resource_type` that can point at
    /// `target_type`. Used by `_revinclude` and `$everything`.
    pub fn reference_params_targeting(
        &self,
        resource_type: &str,
        target_type: &str,
    ) -> Vec<&SearchParamDef> {
        self.params_for(resource_type)
            .iter()
            .filter(|d| {
                d.param_type == SearchParamType::Reference && d.targets.contains(&target_type)
            })
            .collect()
    }

    /// Declared element type of `path` on `resource_type`.
    pub fn element_type(&self, resource_type: &str, path: &str) -> Option<&ElementType> {
        self.elements
            .iter()
            .find(|((rt, p), _)| *rt == resource_type && *p == path)
            .map(|(_, t)| t)
    }

    /// Wire-level kind of a non-choice element, if declared.
    pub fn kind_of(&self, resource_type: &str, path: &str) -> Option<FieldKind> {
        match self.element_type(resource_type, path)? {
            ElementType::Kind(kind) => Some(*kind),
            ElementType::Choice(_) => None,
        }
    }

    /// Expand a date-parameter path into its concrete leaf fields.
    ///
    /// A dateTime/date/instant element yields one leaf; a Period yields a
    /// period leaf (`.start`/`.end`); a choice element yields one leaf per
    /// date-capable variant with the capitalized type suffix appended.
    pub fn date_leaves(&self, resource_type: &str, path: &str) -> Vec<DateLeaf> {
        let cache_key = (resource_type.to_string(), path.to_string());
        if let Some(cached) = self.date_leaf_cache.read().unwrap().get(&cache_key) {
            return cached.clone();
        }

        let leaves = match self.element_type(resource_type, path) {
            Some(ElementType::Kind(kind)) if kind.is_date_like() => {
                vec![DateLeaf::plain(path)]
            }
            Some(ElementType::Kind(FieldKind::Period)) => vec![DateLeaf::period(path)],
            Some(ElementType::Choice(variants)) => variants
                .iter()
                .filter_map(|variant| match *variant {
                    "date" | "dateTime" | "instant" => {
                        Some(DateLeaf::plain(format!("{path}{}", capitalize(variant))))
                    }
                    "Period" => Some(DateLeaf::period(format!("{path}Period"))),
                    _ => None,
                })
                .collect(),
            // Undeclared paths are treated as a plain dateTime field.
            _ => vec![DateLeaf::plain(path)],
        };

        self.date_leaf_cache
            .write()
            .unwrap()
            .insert(cache_key, leaves.clone());
        leaves
    }

    /// Expand a quantity-parameter path into Quantity leaf fields (without
    /// the trailing `.value`).
    pub fn quantity_leaves(&self, resource_type: &str, path: &str) -> Vec<String> {
        match self.element_type(resource_type, path) {
            Some(ElementType::Kind(FieldKind::Quantity)) => vec![path.to_string()],
            Some(ElementType::Choice(variants)) => variants
                .iter()
                .filter(|v| **v == "Quantity" || **v == "SimpleQuantity")
                .map(|_| format!("{path}Quantity"))
                .collect(),
            _ => vec![path.to_string()],
        }
    }
}

impl Default for SearchSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Capitalize the first character (`dateTime` → `DateTime`).
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn builtin_params() -> BTreeMap<&'static str, Vec<SearchParamDef>> {
    use SearchParamType::*;

    let mut map: BTreeMap<&'static str, Vec<SearchParamDef>> = BTreeMap::new();

    map.insert(
        "Patient",
        vec![
            SearchParamDef::new("identifier", Token, "Patient.identifier"),
            SearchParamDef::new("name", String, "Patient.name"),
            SearchParamDef::new("family", String, "Patient.name.family"),
            SearchParamDef::new("given", String, "Patient.name.given"),
            SearchParamDef::new("address", String, "Patient.address"),
            SearchParamDef::new("telecom", Token, "Patient.telecom"),
            SearchParamDef::new("gender", Token, "Patient.gender"),
            SearchParamDef::new("active", Token, "Patient.active"),
            SearchParamDef::new("birthdate", Date, "Patient.birthDate"),
            SearchParamDef::new("death-date", Date, "(Patient.deceased as dateTime)"),
            SearchParamDef::reference(
                "general-practitioner",
                "Patient.generalPractitioner",
                &["Practitioner", "Organization"],
            ),
            SearchParamDef::reference(
                "organization",
                "Patient.managingOrganization",
                &["Organization"],
            ),
        ],
    );

    map.insert(
        "Observation",
        vec![
            SearchParamDef::new("identifier", Token, "Observation.identifier"),
            SearchParamDef::new("code", Token, "Observation.code"),
            SearchParamDef::new("category", Token, "Observation.category"),
            SearchParamDef::new("status", Token, "Observation.status"),
            SearchParamDef::new("date", Date, "Observation.effective"),
            SearchParamDef::new("value-quantity", Quantity, "Observation.value"),
            SearchParamDef::reference("subject", "Observation.subject", &["Patient", "Device", "Location"]),
            SearchParamDef::reference(
                "patient",
                "Observation.subject.where(resolve() is Patient)",
                &["Patient"],
            ),
            SearchParamDef::reference("encounter", "Observation.encounter", &["Encounter"]),
            SearchParamDef::reference(
                "performer",
                "Observation.performer",
                &["Practitioner", "Organization"],
            ),
        ],
    );

    map.insert(
        "Encounter",
        vec![
            SearchParamDef::new("identifier", Token, "Encounter.identifier"),
            SearchParamDef::new("status", Token, "Encounter.status"),
            SearchParamDef::new("class", Token, "Encounter.class"),
            SearchParamDef::new("date", Date, "Encounter.period"),
            SearchParamDef::reference("subject", "Encounter.subject", &["Patient", "Group"]),
            SearchParamDef::reference(
                "patient",
                "Encounter.subject.where(resolve() is Patient)",
                &["Patient"],
            ),
            SearchParamDef::reference(
                "service-provider",
                "Encounter.serviceProvider",
                &["Organization"],
            ),
        ],
    );

    map.insert(
        "Condition",
        vec![
            SearchParamDef::new("identifier", Token, "Condition.identifier"),
            SearchParamDef::new("code", Token, "Condition.code"),
            SearchParamDef::new("clinical-status", Token, "Condition.clinicalStatus"),
            SearchParamDef::new("onset-date", Date, "Condition.onset"),
            SearchParamDef::new("recorded-date", Date, "Condition.recordedDate"),
            SearchParamDef::reference("subject", "Condition.subject", &["Patient", "Group"]),
            SearchParamDef::reference(
                "patient",
                "Condition.subject.where(resolve() is Patient)",
                &["Patient"],
            ),
        ],
    );

    map.insert(
        "MedicationRequest",
        vec![
            SearchParamDef::new("identifier", Token, "MedicationRequest.identifier"),
            SearchParamDef::new("status", Token, "MedicationRequest.status"),
            SearchParamDef::new("intent", Token, "MedicationRequest.intent"),
            SearchParamDef::new("authoredon", Date, "MedicationRequest.authoredOn"),
            SearchParamDef::new(
                "code",
                Token,
                "(MedicationRequest.medication as CodeableConcept)",
            ),
            SearchParamDef::reference(
                "subject",
                "MedicationRequest.subject",
                &["Patient", "Group"],
            ),
            SearchParamDef::reference(
                "patient",
                "MedicationRequest.subject.where(resolve() is Patient)",
                &["Patient"],
            ),
        ],
    );

    map.insert(
        "Practitioner",
        vec![
            SearchParamDef::new("identifier", Token, "Practitioner.identifier"),
            SearchParamDef::new("name", String, "Practitioner.name"),
            SearchParamDef::new("family", String, "Practitioner.name.family"),
            SearchParamDef::new("gender", Token, "Practitioner.gender"),
        ],
    );

    map.insert(
        "Organization",
        vec![
            SearchParamDef::new("identifier", Token, "Organization.identifier"),
            SearchParamDef::new("name", String, "Organization.name | Organization.alias"),
            SearchParamDef::new("address", String, "Organization.address"),
            SearchParamDef::new("active", Token, "Organization.active"),
        ],
    );

    map.insert(
        "DiagnosticReport",
        vec![
            SearchParamDef::new("identifier", Token, "DiagnosticReport.identifier"),
            SearchParamDef::new("code", Token, "DiagnosticReport.code"),
            SearchParamDef::new("status", Token, "DiagnosticReport.status"),
            SearchParamDef::new("date", Date, "DiagnosticReport.effective"),
            SearchParamDef::reference(
                "subject",
                "DiagnosticReport.subject",
                &["Patient", "Group"],
            ),
            SearchParamDef::reference(
                "patient",
                "DiagnosticReport.subject.where(resolve() is Patient)",
                &["Patient"],
            ),
        ],
    );

    map
}

fn builtin_elements() -> BTreeMap<ElementKey, ElementType> {
    use ElementType::{Choice, Kind};
    use FieldKind::*;

    let entries: &[(&str, &str, ElementType)] = &[
        ("Patient", "identifier", Kind(Identifier)),
        ("Patient", "name", Kind(HumanName)),
        ("Patient", "name.family", Kind(String)),
        ("Patient", "name.given", Kind(String)),
        ("Patient", "address", Kind(Address)),
        ("Patient", "telecom", Kind(ContactPoint)),
        ("Patient", "gender", Kind(Code)),
        ("Patient", "active", Kind(Boolean)),
        ("Patient", "birthDate", Kind(Date)),
        ("Patient", "deceased", Choice(&["boolean", "dateTime"])),
        ("Patient", "generalPractitioner", Kind(Reference)),
        ("Patient", "managingOrganization", Kind(Reference)),
        ("Observation", "identifier", Kind(Identifier)),
        ("Observation", "code", Kind(CodeableConcept)),
        ("Observation", "category", Kind(CodeableConcept)),
        ("Observation", "status", Kind(Code)),
        (
            "Observation",
            "effective",
            Choice(&["dateTime", "Period", "instant"]),
        ),
        ("Observation", "issued", Kind(Instant)),
        (
            "Observation",
            "value",
            Choice(&["Quantity", "CodeableConcept", "string", "boolean", "Period"]),
        ),
        ("Observation", "valueQuantity", Kind(Quantity)),
        ("Observation", "subject", Kind(Reference)),
        ("Observation", "encounter", Kind(Reference)),
        ("Observation", "performer", Kind(Reference)),
        ("Encounter", "identifier", Kind(Identifier)),
        ("Encounter", "status", Kind(Code)),
        ("Encounter", "class", Kind(Coding)),
        ("Encounter", "period", Kind(Period)),
        ("Encounter", "subject", Kind(Reference)),
        ("Encounter", "serviceProvider", Kind(Reference)),
        ("Condition", "identifier", Kind(Identifier)),
        ("Condition", "code", Kind(CodeableConcept)),
        ("Condition", "clinicalStatus", Kind(CodeableConcept)),
        ("Condition", "onset", Choice(&["dateTime", "Period"])),
        ("Condition", "recordedDate", Kind(DateTime)),
        ("Condition", "subject", Kind(Reference)),
        ("MedicationRequest", "identifier", Kind(Identifier)),
        ("MedicationRequest", "status", Kind(Code)),
        ("MedicationRequest", "intent", Kind(Code)),
        ("MedicationRequest", "authoredOn", Kind(DateTime)),
        (
            "MedicationRequest",
            "medication",
            Choice(&["CodeableConcept", "Reference"]),
        ),
        ("MedicationRequest", "medicationCodeableConcept", Kind(CodeableConcept)),
        ("MedicationRequest", "subject", Kind(Reference)),
        ("Practitioner", "identifier", Kind(Identifier)),
        ("Practitioner", "name", Kind(HumanName)),
        ("Practitioner", "name.family", Kind(String)),
        ("Practitioner", "gender", Kind(Code)),
        ("Organization", "identifier", Kind(Identifier)),
        ("Organization", "name", Kind(String)),
        ("Organization", "alias", Kind(String)),
        ("Organization", "address", Kind(Address)),
        ("Organization", "active", Kind(Boolean)),
        ("DiagnosticReport", "identifier", Kind(Identifier)),
        ("DiagnosticReport", "code", Kind(CodeableConcept)),
        ("DiagnosticReport", "status", Kind(Code)),
        (
            "DiagnosticReport",
            "effective",
            Choice(&["dateTime", "Period"]),
        ),
        ("DiagnosticReport", "subject", Kind(Reference)),
    ];

    entries
        .iter()
        .map(|(rt, path, ty)| ((*rt, *path), ty.clone()))
        .collect()
}
