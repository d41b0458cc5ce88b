//! Entity resolution caches.
//!
//! Source names and codes are translated into target identifiers through a
//! read-through cache per entity kind. A miss performs one remote lookup and
//! appends the answer. Two workers missing on the same key may both look it
//! up and both append; readers take the first match, so duplicates only cost
//! the extra call.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::joblog::JobLog;
use crate::xmlmc::{MethodCall, MethodResponse, Params, TargetApi, APP_SERVICE_MANAGER};

/// Append-only list guarded by one lock; first match wins.
#[derive(Debug)]
pub struct EntityCache<V> {
    entries: Mutex<Vec<(String, V)>>,
    case_insensitive: bool,
}

impl<V: Clone> EntityCache<V> {
    pub fn new(case_insensitive: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            case_insensitive,
        }
    }

    fn matches(&self, a: &str, b: &str) -> bool {
        if self.case_insensitive {
            a.eq_ignore_ascii_case(b)
        } else {
            a == b
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .iter()
            .find(|(k, _)| self.matches(k, key))
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.into(), value));
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Kinds of entity the resolver knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Priority,
    Team,
    Site,
    Service,
    RequestCategory,
    ClosureCategory,
    User,
    Contact,
    Organisation,
    Company,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Priority => "Priority",
            Self::Team => "Team",
            Self::Site => "Site",
            Self::Service => "Service",
            Self::RequestCategory => "Request Category",
            Self::ClosureCategory => "Closure Category",
            Self::User => "User",
            Self::Contact => "Contact",
            Self::Organisation => "Organisation",
            Self::Company => "Company",
        };
        f.write_str(name)
    }
}

/// A matched service and the workflow to spawn per request class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceEntry {
    pub id: String,
    pub name: String,
    pub incident_bpm: String,
    pub service_request_bpm: String,
    pub change_bpm: String,
    pub problem_bpm: String,
    pub known_error_bpm: String,
    pub release_bpm: String,
}

impl ServiceEntry {
    /// Workflow name for a request class, if one is configured.
    pub fn bpm_for(&self, call_class: &str) -> Option<&str> {
        let bpm = match call_class {
            "Incident" => &self.incident_bpm,
            "Service Request" => &self.service_request_bpm,
            "Change Request" => &self.change_bpm,
            "Problem" => &self.problem_bpm,
            "Known Error" => &self.known_error_bpm,
            "Release" => &self.release_bpm,
            _ => return None,
        };
        Some(bpm.as_str()).filter(|b| !b.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryEntry {
    pub id: String,
    /// Full display path, e.g. "Hardware:Printer".
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserEntry {
    pub id: String,
    pub name: String,
    pub home_org: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContactEntry {
    /// Target primary key of the contact.
    pub pk_id: String,
    pub name: String,
    pub org_id: String,
}

/// Profile code group used by `data::profileCodeLookup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryGroup {
    Request,
    Closure,
}

impl CategoryGroup {
    fn code_group(self) -> &'static str {
        match self {
            Self::Request => "Request",
            Self::Closure => "Closure",
        }
    }
}

/// Shared set of caches with remote fall-through.
///
/// Constructed once per run and shared by every worker; each call takes
/// the worker's own API handle and job log.
#[derive(Debug)]
pub struct EntityResolver {
    priorities: EntityCache<String>,
    teams: EntityCache<String>,
    sites: EntityCache<String>,
    services: EntityCache<ServiceEntry>,
    request_categories: EntityCache<CategoryEntry>,
    closure_categories: EntityCache<CategoryEntry>,
    users: EntityCache<UserEntry>,
    contacts: EntityCache<ContactEntry>,
    organisations: EntityCache<String>,
    companies: EntityCache<String>,
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityResolver {
    pub fn new() -> Self {
        Self {
            priorities: EntityCache::new(true),
            teams: EntityCache::new(true),
            sites: EntityCache::new(true),
            services: EntityCache::new(true),
            request_categories: EntityCache::new(false),
            closure_categories: EntityCache::new(false),
            users: EntityCache::new(false),
            contacts: EntityCache::new(false),
            organisations: EntityCache::new(false),
            companies: EntityCache::new(false),
        }
    }

    /// Identifier for `key`, looking it up remotely on a miss.
    ///
    /// Users resolve to their own id, contacts to their primary key,
    /// organisations to their container id and companies to their name.
    pub async fn resolve(
        &self,
        kind: EntityKind,
        key: &str,
        api: &dyn TargetApi,
        log: &mut JobLog,
    ) -> Option<String> {
        match kind {
            EntityKind::Priority => self.priority(key, api, log).await,
            EntityKind::Team => self.team(key, api, log).await,
            EntityKind::Site => self.site(key, api, log).await,
            EntityKind::Service => self.service(key, api, log).await.map(|s| s.id),
            EntityKind::RequestCategory => self
                .category(CategoryGroup::Request, key, api, log)
                .await
                .map(|c| c.id),
            EntityKind::ClosureCategory => self
                .category(CategoryGroup::Closure, key, api, log)
                .await
                .map(|c| c.id),
            EntityKind::User => self.user(key, api, log).await.map(|u| u.id),
            EntityKind::Contact => self.contact(key, api, log).await.map(|c| c.pk_id),
            EntityKind::Organisation => self.organisation(key),
            EntityKind::Company => self.company(key, api, log).await,
        }
    }

    pub async fn priority(&self, name: &str, api: &dyn TargetApi, log: &mut JobLog) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        if let Some(id) = self.priorities.get(name) {
            return Some(id);
        }
        let call = browse("Priority", &[("h_priorityname", name)]);
        let response = lookup(api, &call, EntityKind::Priority, name, log).await?;
        let row = response.first_row()?;
        if !row.text_at("h_priorityname")?.eq_ignore_ascii_case(name) {
            return None;
        }
        let id = row.text_at("h_pk_priorityid")?.to_string();
        self.priorities.insert(name, id.clone());
        Some(id)
    }

    pub async fn team(&self, name: &str, api: &dyn TargetApi, log: &mut JobLog) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        if let Some(id) = self.teams.get(name) {
            return Some(id);
        }
        let call = browse("Team", &[("h_name", name), ("h_type", "1")]);
        let response = lookup(api, &call, EntityKind::Team, name, log).await?;
        let row = response.first_row()?;
        if !row.text_at("h_name")?.eq_ignore_ascii_case(name) {
            return None;
        }
        let id = row.text_at("h_id")?.to_string();
        self.teams.insert(name, id.clone());
        Some(id)
    }

    pub async fn site(&self, name: &str, api: &dyn TargetApi, log: &mut JobLog) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        if let Some(id) = self.sites.get(name) {
            return Some(id);
        }
        let call = browse("Site", &[("h_site_name", name)]);
        let response = lookup(api, &call, EntityKind::Site, name, log).await?;
        let row = response.first_row()?;
        if !row.text_at("h_site_name")?.eq_ignore_ascii_case(name) {
            return None;
        }
        let id = row.text_at("h_id")?.to_string();
        self.sites.insert(name, id.clone());
        Some(id)
    }

    /// Service by name, with its per-class workflow names.
    pub async fn service(
        &self,
        name: &str,
        api: &dyn TargetApi,
        log: &mut JobLog,
    ) -> Option<ServiceEntry> {
        if name.is_empty() {
            return None;
        }
        if let Some(entry) = self.services.get(name) {
            return Some(entry);
        }
        let call = browse("Services", &[("h_servicename", name)]);
        let response = lookup(api, &call, EntityKind::Service, name, log).await?;
        let row = response.first_row()?;
        if !row.text_at("h_servicename")?.eq_ignore_ascii_case(name) {
            return None;
        }
        let text = |col: &str| row.text_at(col).unwrap_or_default().to_string();
        let mut entry = ServiceEntry {
            id: row.text_at("h_pk_serviceid")?.to_string(),
            name: name.to_string(),
            incident_bpm: text("h_incident_bpm_name"),
            service_request_bpm: text("h_service_bpm_name"),
            change_bpm: text("h_change_bpm_name"),
            problem_bpm: text("h_problem_bpm_name"),
            known_error_bpm: text("h_knownerror_bpm_name"),
            release_bpm: String::new(),
        };
        // The Services entity does not carry the release workflow.
        entry.release_bpm = self.release_bpm(&entry.id, api, log).await.unwrap_or_default();
        self.services.insert(name, entry.clone());
        Some(entry)
    }

    async fn release_bpm(&self, service_id: &str, api: &dyn TargetApi, log: &mut JobLog) -> Option<String> {
        let call = MethodCall::new("data", "queryExec")
            .param("application", APP_SERVICE_MANAGER)
            .param("queryName", "basicServiceDetails")
            .element("queryParams", |p| p.param("serviceId", service_id))
            .element("queryOptions", |p| p.param("queryType", "logRequestBPM"));
        match api.invoke_ok(&call).await {
            Ok(response) => response
                .first_row()
                .and_then(|r| r.text_at("h_release_bpm_name"))
                .map(str::to_string),
            Err(e) => {
                log.warn(format!("Unable to read release workflow for service {}: {}", service_id, e));
                None
            }
        }
    }

    /// Profile code lookup. `code` is the already remapped target code.
    pub async fn category(
        &self,
        group: CategoryGroup,
        code: &str,
        api: &dyn TargetApi,
        log: &mut JobLog,
    ) -> Option<CategoryEntry> {
        if code.is_empty() {
            return None;
        }
        let (cache, kind) = match group {
            CategoryGroup::Request => (&self.request_categories, EntityKind::RequestCategory),
            CategoryGroup::Closure => (&self.closure_categories, EntityKind::ClosureCategory),
        };
        if let Some(entry) = cache.get(code) {
            return Some(entry);
        }
        let call = MethodCall::new("data", "profileCodeLookup")
            .param("codeGroup", group.code_group())
            .param("code", code);
        let response = lookup(api, &call, kind, code, log).await?;
        let entry = CategoryEntry {
            id: response.get("id")?.to_string(),
            name: response.get("fullname")?.to_string(),
        };
        log.debug(format!("{} [{}] resolved to [{}]", kind, code, entry.name));
        cache.insert(code, entry.clone());
        Some(entry)
    }

    /// User account (analyst or customer) via `admin::userGetInfo`.
    pub async fn user(&self, user_id: &str, api: &dyn TargetApi, log: &mut JobLog) -> Option<UserEntry> {
        if user_id.is_empty() {
            return None;
        }
        if let Some(entry) = self.users.get(user_id) {
            return Some(entry);
        }
        let call = MethodCall::new("admin", "userGetInfo").param("userId", user_id);
        let response = lookup(api, &call, EntityKind::User, user_id, log).await?;
        let name = response.get("name").map(str::to_string).or_else(|| {
            let first = response.get("firstName").unwrap_or_default();
            let last = response.get("lastName").unwrap_or_default();
            Some(format!("{} {}", first, last).trim().to_string()).filter(|n| !n.is_empty())
        })?;
        let entry = UserEntry {
            id: user_id.to_string(),
            name,
            home_org: response.get("homeOrganization").unwrap_or_default().to_string(),
        };
        self.users.insert(user_id, entry.clone());
        Some(entry)
    }

    /// Contact by logon id.
    pub async fn contact(
        &self,
        logon_id: &str,
        api: &dyn TargetApi,
        log: &mut JobLog,
    ) -> Option<ContactEntry> {
        if logon_id.is_empty() {
            return None;
        }
        if let Some(entry) = self.contacts.get(logon_id) {
            return Some(entry);
        }
        let call = MethodCall::new("data", "entityBrowseRecords2")
            .param("entity", "Contact")
            .param("matchScope", "all")
            .element("searchFilter", |f| exact(f, "h_logon_id", logon_id))
            .param("maxResults", "1");
        let response = lookup(api, &call, EntityKind::Contact, logon_id, log).await?;
        let row = response.first_row()?;
        let first = row.text_at("h_firstname")?;
        let last = row.text_at("h_lastname").unwrap_or_default();
        let entry = ContactEntry {
            pk_id: row.text_at("h_pk_id")?.to_string(),
            name: format!("{} {}", first, last).trim().to_string(),
            org_id: row.text_at("h_organization_id").unwrap_or_default().to_string(),
        };
        log.debug(format!("Added contact [{}]: {}", logon_id, entry.name));
        self.contacts.insert(logon_id, entry.clone());
        Some(entry)
    }

    /// Container id of an organisation. Filled by [`Self::preload_organisations`].
    pub fn organisation(&self, org_id: &str) -> Option<String> {
        if org_id.is_empty() {
            return None;
        }
        self.organisations.get(org_id)
    }

    /// Load every organisation → container pair in one query.
    pub async fn preload_organisations(&self, api: &dyn TargetApi) -> crate::error::Result<usize> {
        let call = MethodCall::new("data", "queryExec")
            .param("application", APP_SERVICE_MANAGER)
            .param("queryName", "getOrganizationContainers");
        let response = api.invoke_ok(&call).await?;
        let mut loaded = 0;
        for row in response.all("rowData/row") {
            if let (Some(org), Some(container)) =
                (row.text_at("h_organization_id"), row.text_at("h_id"))
            {
                self.organisations.insert(org, container.to_string());
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    /// Company (group) name by id.
    pub async fn company(&self, group_id: &str, api: &dyn TargetApi, log: &mut JobLog) -> Option<String> {
        if group_id.is_empty() {
            return None;
        }
        if let Some(name) = self.companies.get(group_id) {
            return Some(name);
        }
        let call = MethodCall::new("admin", "groupGetInfo").param("id", group_id);
        let response = lookup(api, &call, EntityKind::Company, group_id, log).await?;
        let name = response.get("name")?.to_string();
        self.companies.insert(group_id, name.clone());
        Some(name)
    }
}

/// Prefix stamped on requests of a class, falling back to the class name.
pub async fn request_prefix(call_class: &str, api: &dyn TargetApi) -> String {
    let setting = match call_class.to_lowercase().as_str() {
        "incident" => "guest.app.requests.types.IN",
        "service request" => "guest.app.requests.types.SR",
        "change request" => "app.requests.types.CH",
        "problem" => "app.requests.types.PM",
        "known error" => "app.requests.types.KE",
        "release" => "app.requests.types.RM",
        _ => return call_class.to_string(),
    };
    let call = MethodCall::new("admin", "appOptionGet")
        .param("appName", APP_SERVICE_MANAGER)
        .param("filter", setting);
    match api.invoke_ok(&call).await {
        Ok(response) => match response.get("option/value") {
            Some(prefix) => prefix.to_string(),
            None => call_class.to_string(),
        },
        Err(e) => {
            tracing::warn!(
                "Could not read request prefix for {}, using [{}]: {}",
                call_class,
                call_class,
                e
            );
            call_class.to_string()
        }
    }
}

fn exact(filter: Params, column: &str, value: &str) -> Params {
    filter
        .param("column", column)
        .param("value", value)
        .param("matchType", "exact")
}

/// `entityBrowseRecords2` with one exact filter per column, first row only.
fn browse(entity: &str, filters: &[(&str, &str)]) -> MethodCall {
    let mut call = MethodCall::new("data", "entityBrowseRecords2")
        .param("application", APP_SERVICE_MANAGER)
        .param("entity", entity)
        .param("matchScope", "all");
    for (column, value) in filters {
        call = call.element("searchFilter", |f| exact(f, column, value));
    }
    call.param("maxResults", "1")
}

/// Remote lookup; errors and rejections are logged and read as not found.
async fn lookup(
    api: &dyn TargetApi,
    call: &MethodCall,
    kind: EntityKind,
    key: &str,
    log: &mut JobLog,
) -> Option<MethodResponse> {
    match api.invoke_ok(call).await {
        Ok(response) => Some(response),
        Err(e) => {
            log.warn(format!("Unable to find {} [{}]: {}", kind, key, e));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fail, ok, MockApi};

    fn priority_api() -> MockApi {
        MockApi::new(|call| {
            if call.get("searchFilter/value") == Some("High") {
                ok("<rowData><row><h_pk_priorityid>3</h_pk_priorityid><h_priorityname>high</h_priorityname></row></rowData>")
            } else {
                ok("")
            }
        })
    }

    #[test]
    fn test_cache_first_match_wins() {
        let cache: EntityCache<String> = EntityCache::new(true);
        cache.insert("Desk", "1".to_string());
        cache.insert("desk", "2".to_string());
        assert_eq!(cache.get("DESK").as_deref(), Some("1"));
        assert_eq!(cache.len(), 2);

        let exact: EntityCache<String> = EntityCache::new(false);
        exact.insert("Desk", "1".to_string());
        assert_eq!(exact.get("desk"), None);
    }

    #[tokio::test]
    async fn test_priority_lookup_is_cached() {
        let api = priority_api();
        let resolver = EntityResolver::new();
        let mut log = JobLog::new("test");

        let first = resolver.priority("High", &api, &mut log).await;
        let second = resolver.priority("high", &api, &mut log).await;
        let third = resolver
            .resolve(EntityKind::Priority, "High", &api, &mut log)
            .await;
        assert_eq!(first.as_deref(), Some("3"));
        assert_eq!(second, first);
        assert_eq!(third, first);
        assert_eq!(api.calls_to("data::entityBrowseRecords2").len(), 1);
    }

    #[tokio::test]
    async fn test_miss_is_not_cached() {
        let api = priority_api();
        let resolver = EntityResolver::new();
        let mut log = JobLog::new("test");
        assert_eq!(resolver.priority("Low", &api, &mut log).await, None);
        assert_eq!(resolver.priority("Low", &api, &mut log).await, None);
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_remote_error_reads_as_not_found() {
        let api = MockApi::new(|_| fail("Table not found"));
        let resolver = EntityResolver::new();
        let mut log = JobLog::new("test");
        assert_eq!(resolver.team("Service Desk", &api, &mut log).await, None);
        assert!(log.contains("Table not found"));
    }

    #[tokio::test]
    async fn test_team_sends_type_filter() {
        let api = MockApi::new(|_| {
            ok("<rowData><row><h_id>team-1</h_id><h_name>Service Desk</h_name></row></rowData>")
        });
        let resolver = EntityResolver::new();
        let mut log = JobLog::new("test");
        let id = resolver.team("service desk", &api, &mut log).await;
        assert_eq!(id.as_deref(), Some("team-1"));
        let call = &api.calls()[0];
        assert_eq!(call.get("entity"), Some("Team"));
        let xml = call.to_xml().unwrap();
        assert!(xml.contains("<column>h_type</column><value>1</value>"));
    }

    #[tokio::test]
    async fn test_service_carries_workflows() {
        let api = MockApi::new(|call| match call.method() {
            "entityBrowseRecords2" => ok(
                "<rowData><row><h_pk_serviceid>12</h_pk_serviceid><h_servicename>Email</h_servicename>\
                 <h_incident_bpm_name>incident-flow</h_incident_bpm_name></row></rowData>",
            ),
            "queryExec" => ok("<rowData><row><h_release_bpm_name>release-flow</h_release_bpm_name></row></rowData>"),
            _ => ok(""),
        });
        let resolver = EntityResolver::new();
        let mut log = JobLog::new("test");
        let service = resolver.service("email", &api, &mut log).await.unwrap();
        assert_eq!(service.id, "12");
        assert_eq!(service.bpm_for("Incident"), Some("incident-flow"));
        assert_eq!(service.bpm_for("Release"), Some("release-flow"));
        assert_eq!(service.bpm_for("Problem"), None);

        let again = resolver
            .resolve(EntityKind::Service, "EMAIL", &api, &mut log)
            .await;
        assert_eq!(again.as_deref(), Some("12"));
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_category_groups_are_separate() {
        let api = MockApi::new(|call| {
            let group = call.get("codeGroup").unwrap_or_default().to_string();
            ok(&format!("<id>{}-1</id><fullname>{} path</fullname>", group, group))
        });
        let resolver = EntityResolver::new();
        let mut log = JobLog::new("test");
        let request = resolver
            .category(CategoryGroup::Request, "HW:PRN", &api, &mut log)
            .await
            .unwrap();
        let closure = resolver
            .category(CategoryGroup::Closure, "HW:PRN", &api, &mut log)
            .await
            .unwrap();
        assert_eq!(request.id, "Request-1");
        assert_eq!(closure.name, "Closure path");
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_user_and_contact() {
        let api = MockApi::new(|call| match call.method() {
            "userGetInfo" => ok("<name>Ann Analyst</name><homeOrganization>grp-7</homeOrganization>"),
            _ => ok(
                "<rowData><row><h_pk_id>55</h_pk_id><h_firstname>Carl</h_firstname>\
                 <h_lastname>Contact</h_lastname><h_organization_id>9</h_organization_id></row></rowData>",
            ),
        });
        let resolver = EntityResolver::new();
        let mut log = JobLog::new("test");

        let user = resolver.user("ann", &api, &mut log).await.unwrap();
        assert_eq!(user.name, "Ann Analyst");
        assert_eq!(user.home_org, "grp-7");

        let contact = resolver.contact("carl", &api, &mut log).await.unwrap();
        assert_eq!(contact.pk_id, "55");
        assert_eq!(contact.name, "Carl Contact");
        assert_eq!(contact.org_id, "9");

        assert_eq!(
            resolver.resolve(EntityKind::User, "ann", &api, &mut log).await.as_deref(),
            Some("ann")
        );
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_preload_organisations() {
        let api = MockApi::new(|_| {
            ok("<rowData><row><h_organization_id>9</h_organization_id><h_id>c-1</h_id></row>\
                <row><h_organization_id>10</h_organization_id><h_id>c-2</h_id></row></rowData>")
        });
        let resolver = EntityResolver::new();
        assert_eq!(resolver.preload_organisations(&api).await.unwrap(), 2);
        assert_eq!(resolver.organisation("10").as_deref(), Some("c-2"));
        assert_eq!(resolver.organisation("11"), None);
    }

    #[tokio::test]
    async fn test_request_prefix() {
        let api = MockApi::new(|call| {
            if call.get("filter") == Some("guest.app.requests.types.IN") {
                ok("<option><key>guest.app.requests.types.IN</key><value>IN</value></option>")
            } else {
                fail("no such option")
            }
        });
        assert_eq!(request_prefix("Incident", &api).await, "IN");
        assert_eq!(request_prefix("Problem", &api).await, "Problem");
        assert_eq!(request_prefix("Custom", &api).await, "Custom");
        assert_eq!(api.calls().len(), 2);
    }
}
