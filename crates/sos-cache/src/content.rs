//! The content cache snapshot
//!
//! `ContentCache` is the read model behind capabilities responses: the
//! offerings, procedures, observable properties and features the service
//! knows about, plus the relations between them. It is a plain value. The
//! controller publishes it behind an `Arc` and never mutates a published
//! instance; updates work on a copy.
//!
//! Relations that have an inverse are always changed through a single
//! `link_*`/`unlink_*` call so both directions stay consistent.

use serde::{Deserialize, Serialize};
use sos_common::{DEFAULT_EPSG_CODE, Envelope, TimePeriod};
use std::collections::{BTreeMap, BTreeSet};

/// One-to-many relation keyed by identifier
pub type Relation = BTreeMap<String, BTreeSet<String>>;

static EMPTY: BTreeSet<String> = BTreeSet::new();

/// In-memory description of the service content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentCache {
    default_epsg_code: i32,
    epsg_codes: BTreeSet<i32>,

    offerings: BTreeSet<String>,
    offering_names: BTreeMap<String, String>,
    procedures: BTreeSet<String>,
    parent_procedures: Relation,
    observable_properties: BTreeSet<String>,
    features_of_interest: BTreeSet<String>,
    feature_types: BTreeSet<String>,
    observation_identifiers: BTreeSet<String>,
    observation_types: BTreeSet<String>,
    result_templates: BTreeSet<String>,

    procedures_for_offering: Relation,
    offerings_for_procedure: Relation,
    observable_properties_for_offering: Relation,
    offerings_for_observable_property: Relation,
    observable_properties_for_procedure: Relation,
    procedures_for_observable_property: Relation,
    features_for_offering: Relation,
    procedures_for_feature: Relation,
    parent_features: Relation,
    child_features: Relation,
    related_features_for_offering: Relation,
    roles_for_related_feature: Relation,
    observation_types_for_offering: Relation,
    allowed_observation_types_for_offering: Relation,
    result_templates_for_offering: Relation,
    observable_property_for_result_template: BTreeMap<String, String>,
    features_for_result_template: Relation,
    observation_identifiers_for_procedure: Relation,

    phenomenon_time_for_offering: BTreeMap<String, TimePeriod>,
    phenomenon_time: Option<TimePeriod>,
    envelope_for_offering: BTreeMap<String, Envelope>,
    global_envelope: Option<Envelope>,
}

impl Default for ContentCache {
    fn default() -> Self {
        Self::with_default_epsg_code(DEFAULT_EPSG_CODE)
    }
}

fn link(rel: &mut Relation, key: &str, value: &str) -> bool {
    rel.entry(key.to_string())
        .or_default()
        .insert(value.to_string())
}

fn unlink(rel: &mut Relation, key: &str, value: &str) -> bool {
    let Some(values) = rel.get_mut(key) else {
        return false;
    };
    let removed = values.remove(value);
    if values.is_empty() {
        rel.remove(key);
    }
    removed
}

fn related<'a>(rel: &'a Relation, key: &str) -> &'a BTreeSet<String> {
    rel.get(key).unwrap_or(&EMPTY)
}

/// Remove `key` and drop it from the inverse relation of each of its values
fn remove_key_and_inverse(rel: &mut Relation, inverse: &mut Relation, key: &str) {
    if let Some(values) = rel.remove(key) {
        for value in values {
            unlink(inverse, &value, key);
        }
    }
}

fn remove_value(rel: &mut Relation, value: &str) {
    rel.retain(|_, values| {
        values.remove(value);
        !values.is_empty()
    });
}

impl ContentCache {
    /// Empty cache using `epsg` as default coordinate system
    #[must_use]
    pub fn with_default_epsg_code(epsg: i32) -> Self {
        Self {
            default_epsg_code: epsg,
            epsg_codes: BTreeSet::new(),
            offerings: BTreeSet::new(),
            offering_names: BTreeMap::new(),
            procedures: BTreeSet::new(),
            parent_procedures: Relation::new(),
            observable_properties: BTreeSet::new(),
            features_of_interest: BTreeSet::new(),
            feature_types: BTreeSet::new(),
            observation_identifiers: BTreeSet::new(),
            observation_types: BTreeSet::new(),
            result_templates: BTreeSet::new(),
            procedures_for_offering: Relation::new(),
            offerings_for_procedure: Relation::new(),
            observable_properties_for_offering: Relation::new(),
            offerings_for_observable_property: Relation::new(),
            observable_properties_for_procedure: Relation::new(),
            procedures_for_observable_property: Relation::new(),
            features_for_offering: Relation::new(),
            procedures_for_feature: Relation::new(),
            parent_features: Relation::new(),
            child_features: Relation::new(),
            related_features_for_offering: Relation::new(),
            roles_for_related_feature: Relation::new(),
            observation_types_for_offering: Relation::new(),
            allowed_observation_types_for_offering: Relation::new(),
            result_templates_for_offering: Relation::new(),
            observable_property_for_result_template: BTreeMap::new(),
            features_for_result_template: Relation::new(),
            observation_identifiers_for_procedure: Relation::new(),
            phenomenon_time_for_offering: BTreeMap::new(),
            phenomenon_time: None,
            envelope_for_offering: BTreeMap::new(),
            global_envelope: None,
        }
    }

    /// Drop all content, keeping the default EPSG code
    pub fn clear(&mut self) {
        *self = Self::with_default_epsg_code(self.default_epsg_code);
    }

    /// True if the cache describes no content at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offerings.is_empty()
            && self.procedures.is_empty()
            && self.observable_properties.is_empty()
            && self.features_of_interest.is_empty()
            && self.result_templates.is_empty()
    }

    // ---- Reads ----

    #[must_use]
    pub const fn default_epsg_code(&self) -> i32 {
        self.default_epsg_code
    }

    #[must_use]
    pub const fn epsg_codes(&self) -> &BTreeSet<i32> {
        &self.epsg_codes
    }

    #[must_use]
    pub const fn offerings(&self) -> &BTreeSet<String> {
        &self.offerings
    }

    #[must_use]
    pub fn has_offering(&self, offering: &str) -> bool {
        self.offerings.contains(offering)
    }

    #[must_use]
    pub fn offering_name(&self, offering: &str) -> Option<&str> {
        self.offering_names.get(offering).map(String::as_str)
    }

    #[must_use]
    pub const fn procedures(&self) -> &BTreeSet<String> {
        &self.procedures
    }

    #[must_use]
    pub fn has_procedure(&self, procedure: &str) -> bool {
        self.procedures.contains(procedure)
    }

    #[must_use]
    pub fn parent_procedures(&self, procedure: &str) -> &BTreeSet<String> {
        related(&self.parent_procedures, procedure)
    }

    #[must_use]
    pub const fn observable_properties(&self) -> &BTreeSet<String> {
        &self.observable_properties
    }

    #[must_use]
    pub const fn features_of_interest(&self) -> &BTreeSet<String> {
        &self.features_of_interest
    }

    #[must_use]
    pub const fn feature_types(&self) -> &BTreeSet<String> {
        &self.feature_types
    }

    #[must_use]
    pub const fn observation_identifiers(&self) -> &BTreeSet<String> {
        &self.observation_identifiers
    }

    #[must_use]
    pub const fn observation_types(&self) -> &BTreeSet<String> {
        &self.observation_types
    }

    #[must_use]
    pub const fn result_templates(&self) -> &BTreeSet<String> {
        &self.result_templates
    }

    #[must_use]
    pub fn has_result_template(&self, template: &str) -> bool {
        self.result_templates.contains(template)
    }

    #[must_use]
    pub fn procedures_for_offering(&self, offering: &str) -> &BTreeSet<String> {
        related(&self.procedures_for_offering, offering)
    }

    #[must_use]
    pub fn offerings_for_procedure(&self, procedure: &str) -> &BTreeSet<String> {
        related(&self.offerings_for_procedure, procedure)
    }

    #[must_use]
    pub fn observable_properties_for_offering(&self, offering: &str) -> &BTreeSet<String> {
        related(&self.observable_properties_for_offering, offering)
    }

    #[must_use]
    pub fn offerings_for_observable_property(&self, property: &str) -> &BTreeSet<String> {
        related(&self.offerings_for_observable_property, property)
    }

    #[must_use]
    pub fn observable_properties_for_procedure(&self, procedure: &str) -> &BTreeSet<String> {
        related(&self.observable_properties_for_procedure, procedure)
    }

    #[must_use]
    pub fn procedures_for_observable_property(&self, property: &str) -> &BTreeSet<String> {
        related(&self.procedures_for_observable_property, property)
    }

    #[must_use]
    pub fn features_for_offering(&self, offering: &str) -> &BTreeSet<String> {
        related(&self.features_for_offering, offering)
    }

    #[must_use]
    pub fn procedures_for_feature(&self, feature: &str) -> &BTreeSet<String> {
        related(&self.procedures_for_feature, feature)
    }

    /// Features the given feature was sampled from
    #[must_use]
    pub fn parent_features(&self, feature: &str) -> &BTreeSet<String> {
        related(&self.parent_features, feature)
    }

    #[must_use]
    pub fn child_features(&self, feature: &str) -> &BTreeSet<String> {
        related(&self.child_features, feature)
    }

    #[must_use]
    pub fn related_features_for_offering(&self, offering: &str) -> &BTreeSet<String> {
        related(&self.related_features_for_offering, offering)
    }

    #[must_use]
    pub fn roles_for_related_feature(&self, feature: &str) -> &BTreeSet<String> {
        related(&self.roles_for_related_feature, feature)
    }

    #[must_use]
    pub fn observation_types_for_offering(&self, offering: &str) -> &BTreeSet<String> {
        related(&self.observation_types_for_offering, offering)
    }

    #[must_use]
    pub fn allowed_observation_types_for_offering(&self, offering: &str) -> &BTreeSet<String> {
        related(&self.allowed_observation_types_for_offering, offering)
    }

    #[must_use]
    pub fn result_templates_for_offering(&self, offering: &str) -> &BTreeSet<String> {
        related(&self.result_templates_for_offering, offering)
    }

    #[must_use]
    pub fn observable_property_for_result_template(&self, template: &str) -> Option<&str> {
        self.observable_property_for_result_template
            .get(template)
            .map(String::as_str)
    }

    #[must_use]
    pub fn features_for_result_template(&self, template: &str) -> &BTreeSet<String> {
        related(&self.features_for_result_template, template)
    }

    #[must_use]
    pub fn observation_identifiers_for_procedure(&self, procedure: &str) -> &BTreeSet<String> {
        related(&self.observation_identifiers_for_procedure, procedure)
    }

    #[must_use]
    pub fn phenomenon_time_for_offering(&self, offering: &str) -> Option<TimePeriod> {
        self.phenomenon_time_for_offering.get(offering).copied()
    }

    /// Phenomenon time covering every offering
    #[must_use]
    pub const fn phenomenon_time(&self) -> Option<TimePeriod> {
        self.phenomenon_time
    }

    #[must_use]
    pub fn envelope_for_offering(&self, offering: &str) -> Option<&Envelope> {
        self.envelope_for_offering.get(offering)
    }

    /// Envelope covering every offering
    #[must_use]
    pub const fn global_envelope(&self) -> Option<&Envelope> {
        self.global_envelope.as_ref()
    }

    // ---- Entity mutations ----

    pub fn set_default_epsg_code(&mut self, epsg: i32) {
        self.default_epsg_code = epsg;
    }

    pub fn add_epsg_code(&mut self, epsg: i32) {
        self.epsg_codes.insert(epsg);
    }

    pub fn add_offering(&mut self, offering: &str) -> bool {
        self.offerings.insert(offering.to_string())
    }

    pub fn set_offering_name(&mut self, offering: &str, name: &str) {
        self.offering_names
            .insert(offering.to_string(), name.to_string());
    }

    pub fn add_procedure(&mut self, procedure: &str) -> bool {
        self.procedures.insert(procedure.to_string())
    }

    pub fn add_parent_procedures<I, S>(&mut self, procedure: &str, parents: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for parent in parents {
            link(&mut self.parent_procedures, procedure, parent.as_ref());
        }
    }

    pub fn add_observable_property(&mut self, property: &str) -> bool {
        self.observable_properties.insert(property.to_string())
    }

    pub fn add_feature_of_interest(&mut self, feature: &str) -> bool {
        self.features_of_interest.insert(feature.to_string())
    }

    pub fn add_feature_type(&mut self, feature_type: &str) {
        self.feature_types.insert(feature_type.to_string());
    }

    pub fn add_observation_type(&mut self, observation_type: &str) {
        self.observation_types.insert(observation_type.to_string());
    }

    pub fn add_result_template(&mut self, template: &str) -> bool {
        self.result_templates.insert(template.to_string())
    }

    pub fn add_observation_identifier_for_procedure(&mut self, procedure: &str, id: &str) {
        self.observation_identifiers.insert(id.to_string());
        link(&mut self.observation_identifiers_for_procedure, procedure, id);
    }

    // ---- Relation mutations ----

    pub fn link_offering_procedure(&mut self, offering: &str, procedure: &str) {
        link(&mut self.procedures_for_offering, offering, procedure);
        link(&mut self.offerings_for_procedure, procedure, offering);
    }

    pub fn unlink_offering_procedure(&mut self, offering: &str, procedure: &str) {
        unlink(&mut self.procedures_for_offering, offering, procedure);
        unlink(&mut self.offerings_for_procedure, procedure, offering);
    }

    pub fn link_offering_observable_property(&mut self, offering: &str, property: &str) {
        link(&mut self.observable_properties_for_offering, offering, property);
        link(&mut self.offerings_for_observable_property, property, offering);
    }

    pub fn link_procedure_observable_property(&mut self, procedure: &str, property: &str) {
        link(&mut self.observable_properties_for_procedure, procedure, property);
        link(&mut self.procedures_for_observable_property, property, procedure);
    }

    pub fn link_feature_procedure(&mut self, feature: &str, procedure: &str) {
        link(&mut self.procedures_for_feature, feature, procedure);
    }

    /// Record `parents` as sampled features of `feature`, and `feature` as
    /// their child
    pub fn add_parent_features<I, S>(&mut self, feature: &str, parents: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for parent in parents {
            let parent = parent.as_ref();
            link(&mut self.parent_features, feature, parent);
            link(&mut self.child_features, parent, feature);
        }
    }

    pub fn add_feature_for_offering(&mut self, offering: &str, feature: &str) {
        link(&mut self.features_for_offering, offering, feature);
    }

    pub fn add_related_feature_for_offering(&mut self, offering: &str, feature: &str) {
        link(&mut self.related_features_for_offering, offering, feature);
    }

    pub fn add_role_for_related_feature(&mut self, feature: &str, role: &str) {
        link(&mut self.roles_for_related_feature, feature, role);
    }

    pub fn add_observation_type_for_offering(&mut self, offering: &str, observation_type: &str) {
        link(&mut self.observation_types_for_offering, offering, observation_type);
    }

    pub fn add_allowed_observation_types_for_offering<I, S>(&mut self, offering: &str, types: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for observation_type in types {
            link(
                &mut self.allowed_observation_types_for_offering,
                offering,
                observation_type.as_ref(),
            );
        }
    }

    pub fn add_result_template_for_offering(&mut self, offering: &str, template: &str) {
        link(&mut self.result_templates_for_offering, offering, template);
    }

    pub fn set_observable_property_for_result_template(&mut self, template: &str, property: &str) {
        self.observable_property_for_result_template
            .insert(template.to_string(), property.to_string());
    }

    pub fn add_feature_for_result_template(&mut self, template: &str, feature: &str) {
        link(&mut self.features_for_result_template, template, feature);
    }

    // ---- Bounds ----

    /// Extend the offering's phenomenon time and the global one
    pub fn extend_phenomenon_time_for_offering(&mut self, offering: &str, period: TimePeriod) {
        self.phenomenon_time_for_offering
            .entry(offering.to_string())
            .and_modify(|t| *t = t.union(&period))
            .or_insert(period);
        self.phenomenon_time = Some(match self.phenomenon_time {
            Some(t) => t.union(&period),
            None => period,
        });
    }

    /// Extend the offering's envelope and the global one
    ///
    /// Envelopes in a coordinate system other than the one already stored
    /// are ignored. The envelope's EPSG code is recorded only if it was
    /// merged somewhere.
    pub fn extend_envelope_for_offering(&mut self, offering: &str, envelope: Envelope) {
        let for_offering = match self.envelope_for_offering.get_mut(offering) {
            Some(existing) => existing.expand_to_include(&envelope),
            None => {
                self.envelope_for_offering
                    .insert(offering.to_string(), envelope);
                true
            }
        };
        let global = match &mut self.global_envelope {
            Some(global) => global.expand_to_include(&envelope),
            None => {
                self.global_envelope = Some(envelope);
                true
            }
        };
        if for_offering || global {
            self.epsg_codes.insert(envelope.srid);
        }
    }

    /// Rebuild the global time and envelope from the per-offering values
    pub fn recompute_global_bounds(&mut self) {
        self.phenomenon_time = self
            .phenomenon_time_for_offering
            .values()
            .copied()
            .reduce(|a, b| a.union(&b));

        let mut global: Option<Envelope> = None;
        for envelope in self.envelope_for_offering.values() {
            match &mut global {
                Some(g) => {
                    g.expand_to_include(envelope);
                }
                None => global = Some(*envelope),
            }
        }
        self.global_envelope = global;
    }

    // ---- Removal ----

    /// Remove an offering and everything keyed by it
    ///
    /// Result templates of the offering are removed completely. Global
    /// bounds are not recomputed; call [`Self::recompute_global_bounds`].
    pub fn remove_offering(&mut self, offering: &str) {
        self.offerings.remove(offering);
        self.offering_names.remove(offering);
        remove_key_and_inverse(
            &mut self.procedures_for_offering,
            &mut self.offerings_for_procedure,
            offering,
        );
        remove_key_and_inverse(
            &mut self.observable_properties_for_offering,
            &mut self.offerings_for_observable_property,
            offering,
        );
        self.features_for_offering.remove(offering);
        self.related_features_for_offering.remove(offering);
        self.observation_types_for_offering.remove(offering);
        self.allowed_observation_types_for_offering.remove(offering);
        if let Some(templates) = self.result_templates_for_offering.remove(offering) {
            for template in templates {
                self.remove_result_template(&template);
            }
        }
        self.phenomenon_time_for_offering.remove(offering);
        self.envelope_for_offering.remove(offering);
    }

    /// Remove a procedure, its relations and its observation identifiers
    pub fn remove_procedure(&mut self, procedure: &str) {
        self.procedures.remove(procedure);
        self.parent_procedures.remove(procedure);
        remove_value(&mut self.parent_procedures, procedure);
        remove_key_and_inverse(
            &mut self.offerings_for_procedure,
            &mut self.procedures_for_offering,
            procedure,
        );
        remove_key_and_inverse(
            &mut self.observable_properties_for_procedure,
            &mut self.procedures_for_observable_property,
            procedure,
        );
        remove_value(&mut self.procedures_for_feature, procedure);
        if let Some(ids) = self.observation_identifiers_for_procedure.remove(procedure) {
            for id in ids {
                self.observation_identifiers.remove(&id);
            }
        }
    }

    pub fn remove_result_template(&mut self, template: &str) {
        self.result_templates.remove(template);
        self.observable_property_for_result_template.remove(template);
        self.features_for_result_template.remove(template);
        remove_value(&mut self.result_templates_for_offering, template);
    }

    /// Drop features (with their parent and child links), related-feature
    /// roles and observable properties that nothing refers to anymore
    pub fn remove_unreferenced(&mut self) {
        let referenced_features: BTreeSet<&String> = self
            .features_for_offering
            .values()
            .chain(self.features_for_result_template.values())
            .flatten()
            .chain(self.procedures_for_feature.keys())
            .collect();
        let orphaned: Vec<String> = self
            .features_of_interest
            .iter()
            .filter(|f| !referenced_features.contains(f))
            .cloned()
            .collect();
        for feature in &orphaned {
            self.features_of_interest.remove(feature);
            remove_key_and_inverse(&mut self.parent_features, &mut self.child_features, feature);
            remove_key_and_inverse(&mut self.child_features, &mut self.parent_features, feature);
        }

        let related_features: BTreeSet<String> = self
            .related_features_for_offering
            .values()
            .flatten()
            .cloned()
            .collect();
        self.roles_for_related_feature
            .retain(|feature, _| related_features.contains(feature));

        let referenced_properties: BTreeSet<String> = self
            .offerings_for_observable_property
            .keys()
            .chain(self.procedures_for_observable_property.keys())
            .chain(self.observable_property_for_result_template.values())
            .cloned()
            .collect();
        self.observable_properties
            .retain(|p| referenced_properties.contains(p));
    }
}
