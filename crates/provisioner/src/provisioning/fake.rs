use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{
    ApiResult, MysqlDatabase, MysqlUser, NewMysqlUser, NewSite, ProvisioningApi,
    ProvisioningApiFactory, ProvisioningError, RepositoryInstall, Site,
};

/// Mutating calls, in the order the fake received them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ApiCall {
    CreateSite(String),
    DeleteSite(i64),
    InstallRepository { site_id: i64, branch: String },
    UpdateEnvironment(i64),
    UpdateDeploymentScript(i64),
    Deploy(i64),
    CreateDatabase(String),
    DeleteDatabase(i64),
    CreateUser { name: String, databases: Vec<i64> },
    DeleteUser(i64),
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: i64,
    sites: BTreeMap<i64, Site>,
    databases: BTreeMap<i64, MysqlDatabase>,
    users: BTreeMap<i64, MysqlUser>,
    environments: HashMap<i64, String>,
    scripts: HashMap<i64, String>,
    passwords: HashMap<i64, String>,
    calls: Vec<ApiCall>,
    failing_deploys: u32,
    hanging_deploys: bool,
}

/// In-memory provisioning server that records every mutating call.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeProvisioningApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeProvisioningApi {
    pub(crate) fn new() -> Self {
        let api = Self::default();
        api.lock().next_id = 100;
        api
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake api lock poisoned")
    }

    fn next_id(state: &mut FakeState) -> i64 {
        state.next_id += 1;
        state.next_id
    }

    pub(crate) fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub(crate) fn insert_site(&self, site_id: i64, name: &str) {
        let mut state = self.lock();
        state.sites.insert(
            site_id,
            Site {
                id: site_id,
                name: name.to_string(),
            },
        );
        state.environments.entry(site_id).or_default();
        state.scripts.entry(site_id).or_default();
    }

    pub(crate) fn insert_database(&self, database_id: i64, name: &str) {
        self.lock().databases.insert(
            database_id,
            MysqlDatabase {
                id: database_id,
                name: name.to_string(),
            },
        );
    }

    pub(crate) fn insert_user(&self, user_id: i64, name: &str) {
        self.lock().users.insert(
            user_id,
            MysqlUser {
                id: user_id,
                name: name.to_string(),
            },
        );
    }

    pub(crate) fn set_environment(&self, site_id: i64, content: &str) {
        self.lock()
            .environments
            .insert(site_id, content.to_string());
    }

    pub(crate) fn environment(&self, site_id: i64) -> Option<String> {
        self.lock().environments.get(&site_id).cloned()
    }

    pub(crate) fn set_script(&self, site_id: i64, content: &str) {
        self.lock().scripts.insert(site_id, content.to_string());
    }

    pub(crate) fn script(&self, site_id: i64) -> Option<String> {
        self.lock().scripts.get(&site_id).cloned()
    }

    pub(crate) fn user_password(&self, user_id: i64) -> Option<String> {
        self.lock().passwords.get(&user_id).cloned()
    }

    pub(crate) fn site_count(&self) -> usize {
        self.lock().sites.len()
    }

    /// Makes the next `count` deploy calls fail with a 500.
    pub(crate) fn fail_next_deploys(&self, count: u32) {
        self.lock().failing_deploys = count;
    }

    /// Makes every later deploy call wait forever.
    pub(crate) fn hang_deploys(&self) {
        self.lock().hanging_deploys = true;
    }
}

fn not_found(resource: String) -> ProvisioningError {
    ProvisioningError::NotFound { resource }
}

#[async_trait]
impl ProvisioningApi for FakeProvisioningApi {
    async fn list_sites(&self, _server_id: i64) -> ApiResult<Vec<Site>> {
        Ok(self.lock().sites.values().cloned().collect())
    }

    async fn get_site(&self, _server_id: i64, site_id: i64) -> ApiResult<Site> {
        self.lock()
            .sites
            .get(&site_id)
            .cloned()
            .ok_or_else(|| not_found(format!("site {site_id}")))
    }

    async fn create_site(&self, _server_id: i64, site: &NewSite) -> ApiResult<Site> {
        let mut state = self.lock();
        let id = Self::next_id(&mut state);
        let created = Site {
            id,
            name: site.domain.clone(),
        };
        state.sites.insert(id, created.clone());
        state.environments.insert(
            id,
            "APP_NAME=Laravel\nDB_DATABASE=forge\nDB_USERNAME=forge\nDB_PASSWORD=\n".to_string(),
        );
        state.scripts.insert(id, String::new());
        state.calls.push(ApiCall::CreateSite(site.domain.clone()));
        Ok(created)
    }

    async fn delete_site(&self, _server_id: i64, site_id: i64) -> ApiResult<()> {
        let mut state = self.lock();
        state.calls.push(ApiCall::DeleteSite(site_id));
        state
            .sites
            .remove(&site_id)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("site {site_id}")))
    }

    async fn install_repository(
        &self,
        _server_id: i64,
        site_id: i64,
        repository: &RepositoryInstall,
    ) -> ApiResult<()> {
        self.lock().calls.push(ApiCall::InstallRepository {
            site_id,
            branch: repository.branch.clone(),
        });
        Ok(())
    }

    async fn environment_file(&self, _server_id: i64, site_id: i64) -> ApiResult<String> {
        self.lock()
            .environments
            .get(&site_id)
            .cloned()
            .ok_or_else(|| not_found(format!("site {site_id}")))
    }

    async fn update_environment_file(
        &self,
        _server_id: i64,
        site_id: i64,
        content: &str,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        state.calls.push(ApiCall::UpdateEnvironment(site_id));
        state.environments.insert(site_id, content.to_string());
        Ok(())
    }

    async fn deployment_script(&self, _server_id: i64, site_id: i64) -> ApiResult<String> {
        self.lock()
            .scripts
            .get(&site_id)
            .cloned()
            .ok_or_else(|| not_found(format!("site {site_id}")))
    }

    async fn update_deployment_script(
        &self,
        _server_id: i64,
        site_id: i64,
        content: &str,
    ) -> ApiResult<()> {
        let mut state = self.lock();
        state.calls.push(ApiCall::UpdateDeploymentScript(site_id));
        state.scripts.insert(site_id, content.to_string());
        Ok(())
    }

    async fn deploy_site(&self, _server_id: i64, site_id: i64) -> ApiResult<()> {
        let hanging = self.lock().hanging_deploys;
        if hanging {
            std::future::pending::<()>().await;
        }

        let mut state = self.lock();
        if state.failing_deploys > 0 {
            state.failing_deploys -= 1;
            return Err(ProvisioningError::Status {
                status: 500,
                body: "deploy failed".to_string(),
            });
        }
        state.calls.push(ApiCall::Deploy(site_id));
        Ok(())
    }

    async fn list_mysql_databases(&self, _server_id: i64) -> ApiResult<Vec<MysqlDatabase>> {
        Ok(self.lock().databases.values().cloned().collect())
    }

    async fn create_mysql_database(&self, _server_id: i64, name: &str) -> ApiResult<MysqlDatabase> {
        let mut state = self.lock();
        let id = Self::next_id(&mut state);
        let database = MysqlDatabase {
            id,
            name: name.to_string(),
        };
        state.databases.insert(id, database.clone());
        state.calls.push(ApiCall::CreateDatabase(name.to_string()));
        Ok(database)
    }

    async fn delete_mysql_database(&self, _server_id: i64, database_id: i64) -> ApiResult<()> {
        let mut state = self.lock();
        state.calls.push(ApiCall::DeleteDatabase(database_id));
        state
            .databases
            .remove(&database_id)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("database {database_id}")))
    }

    async fn list_mysql_users(&self, _server_id: i64) -> ApiResult<Vec<MysqlUser>> {
        Ok(self.lock().users.values().cloned().collect())
    }

    async fn create_mysql_user(
        &self,
        _server_id: i64,
        user: &NewMysqlUser,
    ) -> ApiResult<MysqlUser> {
        let mut state = self.lock();
        let id = Self::next_id(&mut state);
        let created = MysqlUser {
            id,
            name: user.name.clone(),
        };
        state.users.insert(id, created.clone());
        state.passwords.insert(id, user.password.clone());
        state.calls.push(ApiCall::CreateUser {
            name: user.name.clone(),
            databases: user.databases.clone(),
        });
        Ok(created)
    }

    async fn delete_mysql_user(&self, _server_id: i64, user_id: i64) -> ApiResult<()> {
        let mut state = self.lock();
        state.calls.push(ApiCall::DeleteUser(user_id));
        state
            .users
            .remove(&user_id)
            .map(|_| ())
            .ok_or_else(|| not_found(format!("database user {user_id}")))
    }
}

/// Hands out the same fake regardless of token.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeApiFactory {
    pub(crate) api: FakeProvisioningApi,
    tokens: Arc<Mutex<Vec<String>>>,
}

impl FakeApiFactory {
    pub(crate) fn new(api: FakeProvisioningApi) -> Self {
        Self {
            api,
            tokens: Arc::default(),
        }
    }

    pub(crate) fn tokens(&self) -> Vec<String> {
        self.tokens.lock().expect("tokens lock poisoned").clone()
    }
}

impl ProvisioningApiFactory for FakeApiFactory {
    fn client(&self, api_token: &str) -> Arc<dyn ProvisioningApi> {
        self.tokens
            .lock()
            .expect("tokens lock poisoned")
            .push(api_token.to_string());
        Arc::new(self.api.clone())
    }
}
