//! Blocking JSON/HTTP transport.
//!
//! Wire format (all bodies JSON, camelCase):
//!
//! | Operation    | Request                                   | Response            |
//! |--------------|-------------------------------------------|---------------------|
//! | `login`      | `POST /login {username, apiKey}`          | `{sessionToken}`    |
//! | `get`        | `GET /entity/{id}`                        | entity              |
//! | `store`      | `POST /entity` or `PUT /entity/{id}`      | entity              |
//! | `query`      | `GET /query?query=...`                    | `{results: [...]}`  |
//! | `find_child` | `POST /entity/child {entityName, parentId}` | `{id}` or 404     |
//!
//! File bytes travel base64-encoded in a `fileContent` field on create.
//! Every call after login carries the `sessionToken` header. There is no
//! retry here; failures surface to the caller.

use std::time::Duration;

use base64::Engine as _;
use parking_lot::RwLock;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Credentials, Entity, EntityId, QueryResults, RemoteError, RemoteSession};

const TOKEN_HEADER: &str = "sessionToken";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    api_key: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    session_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EntityPayload<'a> {
    #[serde(flatten)]
    entity: &'a Entity,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_content: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChildRequest<'a> {
    entity_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a EntityId>,
}

#[derive(Deserialize)]
struct ChildResponse {
    id: EntityId,
}

/// [`RemoteSession`] over HTTP.
pub struct HttpSession {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpSession {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("dagpush/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> Result<RequestBuilder, RemoteError> {
        let token = self
            .token
            .read()
            .clone()
            .ok_or(RemoteError::NotAuthenticated)?;
        Ok(builder.header(TOKEN_HEADER, token))
    }

    fn send(builder: RequestBuilder) -> Result<Response, RemoteError> {
        builder
            .send()
            .map_err(|e| RemoteError::Transport(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(RemoteError::Protocol(format!("{status}: {}", body.trim())));
        }
        response
            .json::<T>()
            .map_err(|e| RemoteError::Protocol(format!("invalid JSON body: {e}")))
    }

    fn file_content(entity: &Entity) -> Result<Option<String>, RemoteError> {
        let Some(path) = &entity.data_path else {
            return Ok(None);
        };
        let bytes = std::fs::read(path).map_err(|source| RemoteError::Upload {
            path: path.clone(),
            source,
        })?;
        Ok(Some(base64::engine::general_purpose::STANDARD.encode(bytes)))
    }
}

impl RemoteSession for HttpSession {
    fn login(&self, credentials: &Credentials) -> Result<(), RemoteError> {
        let request = self.client.post(self.url("/login")).json(&LoginRequest {
            username: &credentials.username,
            api_key: &credentials.api_key,
        });
        let response = Self::send(request)?;
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(RemoteError::AuthFailed(credentials.username.clone()));
        }
        let login: LoginResponse = Self::decode(response)?;
        *self.token.write() = Some(login.session_token);
        tracing::debug!(user = %credentials.username, url = %self.base_url, "logged in");
        Ok(())
    }

    fn get(&self, id: &EntityId) -> Result<Entity, RemoteError> {
        let request = self.authed(self.client.get(self.url(&format!("/entity/{id}"))))?;
        let response = Self::send(request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RemoteError::EntityNotFound(id.clone()));
        }
        Self::decode(response)
    }

    fn store(&self, entity: &Entity) -> Result<Entity, RemoteError> {
        let builder = match &entity.id {
            Some(id) => self.client.put(self.url(&format!("/entity/{id}"))),
            None => self.client.post(self.url("/entity")),
        };
        let payload = EntityPayload {
            entity,
            file_content: Self::file_content(entity)?,
        };
        let response = Self::send(self.authed(builder)?.json(&payload))?;
        if let Some(id) = &entity.id
            && response.status() == StatusCode::NOT_FOUND
        {
            return Err(RemoteError::EntityNotFound(id.clone()));
        }
        Self::decode(response)
    }

    fn query(&self, query: &str) -> Result<QueryResults, RemoteError> {
        let url = reqwest::Url::parse_with_params(&self.url("/query"), &[("query", query)])
            .map_err(|e| RemoteError::InvalidQuery(format!("{query}: {e}")))?;
        let request = self.authed(self.client.get(url))?;
        Self::decode(Self::send(request)?)
    }

    fn find_child(
        &self,
        parent: Option<&EntityId>,
        name: &str,
    ) -> Result<Option<EntityId>, RemoteError> {
        let request = self.authed(self.client.post(self.url("/entity/child")).json(
            &ChildRequest {
                entity_name: name,
                parent_id: parent,
            },
        ))?;
        let response = Self::send(request)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let child: ChildResponse = Self::decode(response)?;
        Ok(Some(child.id))
    }
}
