//! Fill-only-blanks update planning.
//!
//! Invariant: a CRM property that already holds a non-empty value is never
//! part of a plan, whatever the submission says and whatever the run mode.

use std::collections::BTreeMap;

use crate::domain::entities::{Contact, FormFieldMap, UpdatePlan};

#[derive(Debug, Clone)]
pub struct UpdatePlanner {
    forms: FormFieldMap,
}

impl UpdatePlanner {
    pub fn new(forms: FormFieldMap) -> Self {
        Self { forms }
    }

    pub fn forms(&self) -> &FormFieldMap {
        &self.forms
    }

    /// Stages `crm_property = value` for every mapped field present in the
    /// submission whose CRM property is currently blank on the contact.
    /// Unknown forms produce an empty plan.
    pub fn plan_updates(
        &self,
        form_id: &str,
        fields: &BTreeMap<String, String>,
        contact: &Contact,
    ) -> UpdatePlan {
        let Some(mapping) = self.forms.mapping(form_id) else {
            return UpdatePlan::new();
        };

        let mut plan = UpdatePlan::new();
        for (form_field, crm_property) in mapping {
            let Some(value) = fields.get(form_field) else {
                continue;
            };
            if value.trim().is_empty() {
                continue;
            }
            if !contact.is_blank(crm_property) {
                continue;
            }
            plan.stage(crm_property, value);
        }
        plan
    }
}
