use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    ApiResult, MysqlDatabase, MysqlUser, NewMysqlUser, NewSite, ProvisioningApi,
    ProvisioningApiFactory, ProvisioningError, RepositoryInstall, Site,
};

#[derive(Debug, Deserialize)]
struct SiteEnvelope {
    site: Site,
}

#[derive(Debug, Deserialize)]
struct SitesEnvelope {
    sites: Vec<Site>,
}

#[derive(Debug, Deserialize)]
struct DatabaseEnvelope {
    database: MysqlDatabase,
}

#[derive(Debug, Deserialize)]
struct DatabasesEnvelope {
    databases: Vec<MysqlDatabase>,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: MysqlUser,
}

#[derive(Debug, Deserialize)]
struct UsersEnvelope {
    users: Vec<MysqlUser>,
}

#[derive(Debug, Serialize)]
struct ContentBody<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct NewDatabaseBody<'a> {
    name: &'a str,
}

async fn read_json<T: DeserializeOwned>(response: Response) -> ApiResult<T> {
    let body = response.text().await?;
    Ok(serde_json::from_str(&body)?)
}

/// HTTP client for a Forge-style server-management API.
#[derive(Clone)]
pub struct ForgeClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl fmt::Debug for ForgeClient {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ForgeClient")
            .field("base_url", &self.base_url)
            .field("api_token", &"***")
            .finish_non_exhaustive()
    }
}

impl ForgeClient {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: &str, api_token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder, resource: &str) -> ApiResult<Response> {
        let response = request
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProvisioningError::NotFound {
                resource: resource.to_string(),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProvisioningError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn put_content(&self, path: &str, resource: &str, content: &str) -> ApiResult<()> {
        let request = self.http.put(self.url(path)).json(&ContentBody { content });
        self.send(request, resource).await?;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningApi for ForgeClient {
    async fn list_sites(&self, server_id: i64) -> ApiResult<Vec<Site>> {
        let request = self.http.get(self.url(&format!("servers/{server_id}/sites")));
        let response = self.send(request, &format!("server {server_id}")).await?;
        Ok(read_json::<SitesEnvelope>(response).await?.sites)
    }

    async fn get_site(&self, server_id: i64, site_id: i64) -> ApiResult<Site> {
        let request = self
            .http
            .get(self.url(&format!("servers/{server_id}/sites/{site_id}")));
        let response = self.send(request, &format!("site {site_id}")).await?;
        Ok(read_json::<SiteEnvelope>(response).await?.site)
    }

    async fn create_site(&self, server_id: i64, site: &NewSite) -> ApiResult<Site> {
        let request = self
            .http
            .post(self.url(&format!("servers/{server_id}/sites")))
            .json(site);
        let response = self.send(request, &format!("server {server_id}")).await?;
        Ok(read_json::<SiteEnvelope>(response).await?.site)
    }

    async fn delete_site(&self, server_id: i64, site_id: i64) -> ApiResult<()> {
        let request = self
            .http
            .delete(self.url(&format!("servers/{server_id}/sites/{site_id}")));
        self.send(request, &format!("site {site_id}")).await?;
        Ok(())
    }

    async fn install_repository(
        &self,
        server_id: i64,
        site_id: i64,
        repository: &RepositoryInstall,
    ) -> ApiResult<()> {
        let request = self
            .http
            .post(self.url(&format!("servers/{server_id}/sites/{site_id}/git")))
            .json(repository);
        self.send(request, &format!("site {site_id}")).await?;
        Ok(())
    }

    async fn environment_file(&self, server_id: i64, site_id: i64) -> ApiResult<String> {
        let request = self
            .http
            .get(self.url(&format!("servers/{server_id}/sites/{site_id}/env")));
        let response = self.send(request, &format!("site {site_id}")).await?;
        Ok(response.text().await?)
    }

    async fn update_environment_file(
        &self,
        server_id: i64,
        site_id: i64,
        content: &str,
    ) -> ApiResult<()> {
        self.put_content(
            &format!("servers/{server_id}/sites/{site_id}/env"),
            &format!("site {site_id}"),
            content,
        )
        .await
    }

    async fn deployment_script(&self, server_id: i64, site_id: i64) -> ApiResult<String> {
        let request = self.http.get(self.url(&format!(
            "servers/{server_id}/sites/{site_id}/deployment/script"
        )));
        let response = self.send(request, &format!("site {site_id}")).await?;
        Ok(response.text().await?)
    }

    async fn update_deployment_script(
        &self,
        server_id: i64,
        site_id: i64,
        content: &str,
    ) -> ApiResult<()> {
        self.put_content(
            &format!("servers/{server_id}/sites/{site_id}/deployment/script"),
            &format!("site {site_id}"),
            content,
        )
        .await
    }

    async fn deploy_site(&self, server_id: i64, site_id: i64) -> ApiResult<()> {
        let request = self.http.post(self.url(&format!(
            "servers/{server_id}/sites/{site_id}/deployment/deploy"
        )));
        self.send(request, &format!("site {site_id}")).await?;
        Ok(())
    }

    async fn list_mysql_databases(&self, server_id: i64) -> ApiResult<Vec<MysqlDatabase>> {
        let request = self
            .http
            .get(self.url(&format!("servers/{server_id}/databases")));
        let response = self.send(request, &format!("server {server_id}")).await?;
        Ok(read_json::<DatabasesEnvelope>(response).await?.databases)
    }

    async fn create_mysql_database(&self, server_id: i64, name: &str) -> ApiResult<MysqlDatabase> {
        let request = self
            .http
            .post(self.url(&format!("servers/{server_id}/databases")))
            .json(&NewDatabaseBody { name });
        let response = self.send(request, &format!("server {server_id}")).await?;
        Ok(read_json::<DatabaseEnvelope>(response).await?.database)
    }

    async fn delete_mysql_database(&self, server_id: i64, database_id: i64) -> ApiResult<()> {
        let request = self.http.delete(self.url(&format!(
            "servers/{server_id}/databases/{database_id}"
        )));
        self.send(request, &format!("database {database_id}")).await?;
        Ok(())
    }

    async fn list_mysql_users(&self, server_id: i64) -> ApiResult<Vec<MysqlUser>> {
        let request = self
            .http
            .get(self.url(&format!("servers/{server_id}/database-users")));
        let response = self.send(request, &format!("server {server_id}")).await?;
        Ok(read_json::<UsersEnvelope>(response).await?.users)
    }

    async fn create_mysql_user(
        &self,
        server_id: i64,
        user: &NewMysqlUser,
    ) -> ApiResult<MysqlUser> {
        let request = self
            .http
            .post(self.url(&format!("servers/{server_id}/database-users")))
            .json(user);
        let response = self.send(request, &format!("server {server_id}")).await?;
        Ok(read_json::<UserEnvelope>(response).await?.user)
    }

    async fn delete_mysql_user(&self, server_id: i64, user_id: i64) -> ApiResult<()> {
        let request = self.http.delete(self.url(&format!(
            "servers/{server_id}/database-users/{user_id}"
        )));
        self.send(request, &format!("database user {user_id}")).await?;
        Ok(())
    }
}

/// Shares one connection pool across the per-token clients handed to jobs.
#[derive(Debug, Clone)]
pub struct ForgeClientFactory {
    http: reqwest::Client,
    base_url: String,
}

impl ForgeClientFactory {
    /// Every request made through the factory's clients gives up after `request_timeout`.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, request_timeout: Duration) -> ApiResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }
}

impl ProvisioningApiFactory for ForgeClientFactory {
    fn client(&self, api_token: &str) -> Arc<dyn ProvisioningApi> {
        Arc::new(ForgeClient::new(
            self.http.clone(),
            &self.base_url,
            api_token,
        ))
    }
}
