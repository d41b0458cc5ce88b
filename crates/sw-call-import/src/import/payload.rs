//! Builds the `Requests` creation call from a source row.

use std::collections::BTreeMap;

use crate::cache::{CategoryGroup, EntityResolver};
use crate::config::{Config, RequestTypeConfig};
use crate::joblog::JobLog;
use crate::mapping::{epoch_to_datetime, extended_column_name, translate_status, FieldMapper, RequestStatus};
use crate::source::SourceRow;
use crate::xmlmc::{MethodCall, TargetApi, APP_SERVICE_MANAGER};

use super::CreatedRequest;

/// Core fields filled by their own rules rather than copied from the row.
const DERIVED_FIELDS: &[&str] = &[
    "h_status",
    "h_requesttype",
    "h_request_prefix",
    "h_category",
    "h_closure_category",
    "h_fk_servicename",
    "h_fk_team_name",
    "h_site_id",
    "h_fk_priorityname",
    "h_ownername",
    "h_fk_user_name",
    "h_datelogged",
    "h_dateresolved",
    "h_dateclosed",
];

/// Organisation fields taken from the customer when `CustomerOrganisation`
/// is on.
const CUSTOMER_ORG_FIELDS: &[&str] = &["h_org_id", "h_company_id", "h_company_name"];

/// A creation call plus what the post-creation steps need to know.
#[derive(Debug, Clone)]
pub struct RequestPlan {
    pub call: MethodCall,
    /// State sent at creation (on-hold calls are created open).
    pub status: Option<RequestStatus>,
    pub hold: bool,
    pub logged_date: Option<String>,
    pub closed_date: Option<String>,
    /// Workflow to spawn for this class and service.
    pub bpm: Option<String>,
}

impl RequestPlan {
    /// Facts for the post-creation pipeline once the target reference is known.
    pub fn created(&self, reference: impl Into<String>) -> CreatedRequest {
        CreatedRequest {
            reference: reference.into(),
            status: self.status,
            hold: self.hold,
            logged_date: self.logged_date.clone(),
            hold_until: self.closed_date.clone(),
            bpm: self.bpm.clone(),
        }
    }
}

/// Maps one source row of a call class onto a creation call.
pub struct RequestBuilder<'a> {
    config: &'a Config,
    request_type: &'a RequestTypeConfig,
    prefix: &'a str,
    resolver: &'a EntityResolver,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(
        config: &'a Config,
        request_type: &'a RequestTypeConfig,
        prefix: &'a str,
        resolver: &'a EntityResolver,
    ) -> Self {
        Self {
            config,
            request_type,
            prefix,
            resolver,
        }
    }

    fn value(&self, field: &str, row: &SourceRow) -> String {
        self.request_type
            .core_mapping(field)
            .map(|m| FieldMapper::resolve(m, row))
            .unwrap_or_default()
    }

    fn date(&self, field: &str, row: &SourceRow) -> Option<String> {
        epoch_to_datetime(&self.value(field, row))
    }

    /// Target state configured for the row's source status.
    pub fn source_status(&self, row: &SourceRow) -> Option<RequestStatus> {
        let code = self.value("h_status", row);
        self.config
            .status_mapping
            .get(&code)
            .and_then(|s| RequestStatus::parse(s))
    }

    pub async fn build(&self, row: &SourceRow, api: &dyn TargetApi, log: &mut JobLog) -> RequestPlan {
        let source_status = self.source_status(row);
        let translation = source_status.map(translate_status);
        let status = translation.map(|t| t.status);
        let hold = translation.map(|t| t.hold).unwrap_or(false);
        let logged_date = self.date("h_datelogged", row);
        let closed_date = self.date("h_dateclosed", row);
        let resolver = self.resolver;

        let mut fields: BTreeMap<String, String> = BTreeMap::new();
        let mut bpm = None;

        for (attribute, mapping) in &self.request_type.core_field_mapping {
            let attribute = attribute.as_str();
            if self.config.customer_organisation && CUSTOMER_ORG_FIELDS.contains(&attribute) {
                continue;
            }
            match attribute {
                "h_ownerid" => {
                    let owner = FieldMapper::resolve(mapping, row);
                    if let Some(user) = resolver.user(&owner, api, log).await {
                        fields.insert("h_ownerid".into(), user.id);
                        fields.insert("h_ownername".into(), user.name);
                    }
                }
                "h_fk_user_id" => {
                    let customer = FieldMapper::resolve(mapping, row);
                    self.customer(&customer, &mut fields, api, log).await;
                }
                "h_fk_priorityid" => {
                    let source = FieldMapper::resolve(mapping, row);
                    let (mut id, mut name) = match self.config.priority_mapping.get(&source) {
                        Some(mapped) => (resolver.priority(mapped, api, log).await, mapped.clone()),
                        None => (None, source),
                    };
                    let default = &self.request_type.default_priority;
                    if id.is_none() && !default.is_empty() {
                        id = resolver.priority(default, api, log).await;
                        name = default.clone();
                    }
                    fields.insert("h_fk_priorityid".into(), id.unwrap_or_default());
                    fields.insert("h_fk_priorityname".into(), name);
                }
                "h_category_id" | "h_closure_category_id" if !mapping.is_empty() => {
                    let (group, remap, name_field) = if attribute == "h_category_id" {
                        (CategoryGroup::Request, &self.config.category_mapping, "h_category")
                    } else {
                        (
                            CategoryGroup::Closure,
                            &self.config.resolution_category_mapping,
                            "h_closure_category",
                        )
                    };
                    let code = FieldMapper::resolve(mapping, row);
                    let code = match remap.get(&code) {
                        Some(mapped) => mapped.clone(),
                        None => code.replace('-', &self.config.sm_profile_code_separator),
                    };
                    if let Some(category) = resolver.category(group, &code, api, log).await {
                        fields.insert(attribute.into(), category.id);
                        fields.insert(name_field.into(), category.name);
                    }
                }
                "h_fk_serviceid" => {
                    let source = FieldMapper::resolve(mapping, row);
                    let mut service = match self.config.service_mapping.get(&source) {
                        Some(mapped) => resolver.service(mapped, api, log).await,
                        None => None,
                    };
                    let default = &self.request_type.default_service;
                    if service.is_none() && !default.is_empty() {
                        service = resolver.service(default, api, log).await;
                    }
                    if let Some(service) = service {
                        bpm = service.bpm_for(&self.request_type.call_class).map(str::to_string);
                        fields.insert("h_fk_serviceid".into(), service.id);
                        fields.insert("h_fk_servicename".into(), service.name);
                    }
                }
                "h_fk_team_id" => {
                    let source = FieldMapper::resolve(mapping, row);
                    let mut team = match self.config.team_mapping.get(&source) {
                        Some(mapped) => resolver
                            .team(mapped, api, log)
                            .await
                            .map(|id| (id, mapped.clone())),
                        None => None,
                    };
                    let default = &self.request_type.default_team;
                    if team.is_none() && !default.is_empty() {
                        team = resolver
                            .team(default, api, log)
                            .await
                            .map(|id| (id, default.clone()));
                    }
                    if let Some((id, name)) = team {
                        fields.insert("h_fk_team_id".into(), id);
                        fields.insert("h_fk_team_name".into(), name);
                    }
                }
                "h_site" => {
                    let name = self.value("h_site_id", row);
                    if let Some(id) = resolver.site(&name, api, log).await {
                        fields.insert("h_site_id".into(), id);
                        fields.insert("h_site".into(), name);
                    }
                }
                "h_dateresolved" => {
                    if status.map(|s| s.is_resolved()).unwrap_or(false) {
                        if let Some(resolved) = epoch_to_datetime(&FieldMapper::resolve(mapping, row)) {
                            fields.insert("h_dateresolved".into(), resolved);
                        }
                    }
                }
                "h_dateclosed" => {
                    if let Some(closed) = &closed_date {
                        if source_status != Some(RequestStatus::OnHold) {
                            fields.insert("h_dateclosed".into(), closed.clone());
                        }
                    }
                }
                "h_status" => {
                    if let Some(t) = translation {
                        fields.insert("h_status".into(), t.status.as_str().into());
                        if t.archived {
                            fields.insert("h_archived".into(), "1".into());
                        }
                    }
                }
                other if DERIVED_FIELDS.contains(&other) => {}
                other => {
                    let value = FieldMapper::resolve(mapping, row);
                    if !value.is_empty() {
                        fields.insert(other.into(), value);
                    }
                }
            }
        }

        RequestPlan {
            call: self.creation_call(&fields, row),
            status,
            hold,
            logged_date,
            closed_date,
            bpm,
        }
    }

    async fn customer(
        &self,
        customer: &str,
        fields: &mut BTreeMap<String, String>,
        api: &dyn TargetApi,
        log: &mut JobLog,
    ) {
        let resolver = self.resolver;
        let with_org = self.config.customer_organisation;
        if self.config.customer_type == "1" {
            let Some(contact) = resolver.contact(customer, api, log).await else {
                return;
            };
            fields.insert("h_fk_user_id".into(), contact.pk_id);
            fields.insert("h_fk_user_name".into(), contact.name);
            if with_org && !contact.org_id.is_empty() {
                if let Some(container) = resolver.organisation(&contact.org_id) {
                    fields.insert("h_container_id".into(), container);
                }
                fields.insert("h_org_id".into(), contact.org_id);
            }
        } else {
            let Some(user) = resolver.user(customer, api, log).await else {
                return;
            };
            if with_org && !user.home_org.is_empty() {
                if let Some(company) = resolver.company(&user.home_org, api, log).await {
                    fields.insert("h_company_id".into(), user.home_org.clone());
                    fields.insert("h_company_name".into(), company);
                }
            }
            fields.insert("h_fk_user_id".into(), user.id);
            fields.insert("h_fk_user_name".into(), user.name);
        }
    }

    fn creation_call(&self, fields: &BTreeMap<String, String>, row: &SourceRow) -> MethodCall {
        let call_class = self.request_type.call_class.as_str();
        let additional: Vec<(&str, String)> = self
            .request_type
            .additional_field_mapping
            .iter()
            .filter(|(_, mapping)| !mapping.is_empty())
            .map(|(column, mapping)| (column.as_str(), FieldMapper::resolve(mapping, row)))
            .filter(|(_, value)| !value.is_empty())
            .collect();
        let extended: Vec<(String, String)> = additional
            .iter()
            .filter(|(column, _)| column.contains("h_custom_"))
            .map(|(column, value)| (extended_column_name(column), value.clone()))
            .collect();

        MethodCall::new("data", "entityAddRecord")
            .param("application", APP_SERVICE_MANAGER)
            .param("entity", "Requests")
            .param("returnModifiedData", "true")
            .element("primaryEntityData", |p| {
                p.element("record", |r| {
                    fields
                        .iter()
                        .filter(|(_, v)| !v.is_empty())
                        .fold(r, |r, (k, v)| r.param(k.as_str(), v.as_str()))
                        .param("h_requesttype", call_class)
                        .param("h_request_prefix", self.prefix)
                })
            })
            .element("relatedEntityData", |p| {
                p.param("relationshipName", "Call Type")
                    .param("entityAction", "insert")
                    .element("record", |r| r.params(additional.iter().map(|(k, v)| (*k, v.as_str()))))
            })
            .element("relatedEntityData", |p| {
                p.param("relationshipName", "Extended Information")
                    .param("entityAction", "insert")
                    .element("record", |r| {
                        r.param("h_request_type", call_class)
                            .params(extended.iter().map(|(k, v)| (k.as_str(), v.as_str())))
                    })
            })
    }
}
