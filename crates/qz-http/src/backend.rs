//! `reqwest` implementation of the engagement services

use crate::config::HttpConfig;
use crate::error::{transport_error, HttpError};
use async_trait::async_trait;
use qz_engagement::{
    AnswerSubmission, AnswerVerdict, AnswersService, CreatedView, CredentialSource, EntityId,
    QuestionStats, ReactionAck, ReactionDto, ReactionKind, ReactionsService, ServiceError,
    ViewDto, ViewsService,
};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
struct NewView {
    question: EntityId,
}

#[derive(Debug, Serialize)]
struct NewReaction {
    quiz: EntityId,
    reaction_type: ReactionKind,
}

struct Reply {
    status: StatusCode,
    body: String,
}

/// Views, reactions and answers over HTTP
///
/// The bearer token is read from the credential source on every request,
/// so sign-in and sign-out take effect immediately.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    config: HttpConfig,
    client: Client,
    credentials: Arc<dyn CredentialSource>,
}

impl HttpBackend {
    /// Create backend after validating `config`
    ///
    /// # Errors
    /// - `HttpError::InvalidBaseUrl` / `HttpError::ZeroTimeout` for bad config
    /// - `HttpError::Client` when the client cannot be built
    pub fn new(config: HttpConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self, HttpError> {
        config.validate()?;
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        tracing::info!(base_url = %config.base_url, "http backend ready");
        Ok(Self {
            config,
            client,
            credentials,
        })
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.config.url(path));
        match self.credentials.load() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Reply, ServiceError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            tracing::debug!(%status, "service answered with an error status");
            return Err(ServiceError::status(status.as_u16(), body));
        }
        Ok(Reply { status, body })
    }

    async fn fetch<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ServiceError> {
        let reply = self.send(builder).await?;
        decode(&reply.body)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, ServiceError> {
    serde_json::from_str(body).map_err(|err| ServiceError::Decode(err.to_string()))
}

/// An empty reply (204) means the toggle removed the reaction
fn reaction_ack(reply: &Reply) -> Result<ReactionAck, ServiceError> {
    if reply.status == StatusCode::NO_CONTENT || reply.body.trim().is_empty() {
        return Ok(ReactionAck {
            id: None,
            removed: true,
        });
    }
    decode(&reply.body)
}

#[async_trait]
impl ViewsService for HttpBackend {
    async fn list(&self, entity: Option<EntityId>) -> Result<Vec<ViewDto>, ServiceError> {
        let mut builder = self.request(Method::GET, "views/");
        if let Some(entity) = entity {
            builder = builder.query(&[("question", entity.0)]);
        }
        self.fetch(builder).await
    }

    async fn create(&self, entity: EntityId) -> Result<CreatedView, ServiceError> {
        let builder = self
            .request(Method::POST, "views/")
            .json(&NewView { question: entity });
        self.fetch(builder).await
    }
}

#[async_trait]
impl ReactionsService for HttpBackend {
    async fn list(&self, entity: EntityId) -> Result<Vec<ReactionDto>, ServiceError> {
        let builder = self
            .request(Method::GET, "reactions/")
            .query(&[("quiz", entity.0)]);
        self.fetch(builder).await
    }

    async fn upsert(&self, entity: EntityId, kind: ReactionKind) -> Result<ReactionAck, ServiceError> {
        let builder = self.request(Method::POST, "reactions/").json(&NewReaction {
            quiz: entity,
            reaction_type: kind,
        });
        let reply = self.send(builder).await?;
        reaction_ack(&reply)
    }
}

#[async_trait]
impl AnswersService for HttpBackend {
    async fn submit(&self, submission: &AnswerSubmission) -> Result<AnswerVerdict, ServiceError> {
        let builder = self.request(Method::POST, "answers/").json(submission);
        self.fetch(builder).await
    }

    async fn stats(&self, entity: EntityId) -> Result<QuestionStats, ServiceError> {
        let builder = self.request(Method::GET, &format!("questions/{entity}/stats/"));
        self.fetch(builder).await
    }
}
