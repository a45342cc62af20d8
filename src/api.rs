// Request/response client for the ChatBook backend
// Credential issuance, contact list and message history.

use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::config::ClientConfig;
use crate::error::{ChatError, Result};
use crate::models::{Contact, Message, TokenPair};

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: String,
    access_token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        Ok(ApiClient {
            http,
            base: config.api_base.clone(),
            access_token: None,
        })
    }

    /// Attach the bearer token sent with subsequent requests.
    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // Map non-2xx responses to Rejected, using FastAPI's {"detail": ...}
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                debug!("Could not read the {} response body: {}", status, e);
                String::new()
            }
        };
        Err(ChatError::Rejected {
            status: status.as_u16(),
            detail: rejection_detail(status, body),
        })
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        info!("Registering account {}", username);
        let response = self
            .http
            .post(self.url("/register"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        info!("Logging in as {}", username);
        let response = self
            .http
            .post(self.url("/login-json"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        debug!("Refreshing access token");
        let response = self
            .http
            .post(self.url("/refresh-token"))
            .query(&[("refresh_token", refresh_token)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    /// Tokens are stateless; the caller forgets its copy afterwards.
    pub async fn logout(&self) -> Result<()> {
        let response = self.authorized(self.http.post(self.url("/logout"))).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Everyone known to the backend except `identity`.
    pub async fn fetch_contacts(&self, identity: &str) -> Result<Vec<Contact>> {
        let response = self.authorized(self.http.get(self.url("/users"))).send().await?;
        let contacts: Vec<Contact> = Self::check(response).await?.json().await?;
        let contacts: Vec<Contact> = contacts
            .into_iter()
            .filter(|c| c.username != identity)
            .collect();
        debug!("Fetched {} contacts for {}", contacts.len(), identity);
        Ok(contacts)
    }

    /// History between `identity` and `contact` in either direction.
    pub async fn fetch_history(&self, identity: &str, contact: &str) -> Result<Vec<Message>> {
        let response = self
            .authorized(self.http.get(self.url("/messages")))
            .query(&[("user1", identity), ("user2", contact)])
            .send()
            .await?;
        let messages: Vec<Message> = Self::check(response).await?.json().await?;
        debug!(
            "Fetched {} history messages between {} and {}",
            messages.len(),
            identity,
            contact
        );
        Ok(messages)
    }
}

// FastAPI puts a string (or a validation list) under "detail"
fn rejection_detail(status: StatusCode, body: String) -> String {
    match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            detail: serde_json::Value::String(detail),
        }) => detail,
        Ok(ErrorBody { detail }) => detail.to_string(),
        Err(_) if body.is_empty() => status.to_string(),
        Err(_) => body,
    }
}
