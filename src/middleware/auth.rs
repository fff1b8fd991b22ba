use std::rc::Rc;

use actix_web::{
    dev::{forward_ready, Extensions, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpMessage,
};
use chrono::{Duration, Utc};
use futures::future::{ready, Ready};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use crate::{
    errors::ApiError,
    models::user::{User, UserRole},
};

pub const TOKEN_TTL_DAYS: i64 = 7;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    pub id: String,
    pub role: UserRole,
    pub email: String,
    pub name: String,
    pub iat: usize,
    pub exp: usize,
}

/// Signing material shared by token issuance and the authentication gate.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, ApiError> {
        let id = user
            .id
            .ok_or_else(|| ApiError::internal("cannot issue a token for an unsaved user"))?;
        let now = Utc::now();
        let claims = Claims {
            id: id.to_hex(),
            role: user.role,
            email: user.email.clone(),
            name: user.name.clone(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::days(TOKEN_TTL_DAYS)).timestamp() as usize,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| ApiError::auth("Invalid token"))?;
        Identity::try_from(data.claims)
    }
}

/// The authenticated caller, as asserted by a verified token.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: ObjectId,
    pub role: UserRole,
    pub email: String,
    pub name: String,
}

impl TryFrom<Claims> for Identity {
    type Error = ApiError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let id = ObjectId::parse_str(&claims.id).map_err(|_| ApiError::auth("Invalid token"))?;
        Ok(Self {
            id,
            role: claims.role,
            email: claims.email,
            name: claims.name,
        })
    }
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn has_role(&self, roles: &[UserRole]) -> bool {
        roles.contains(&self.role)
    }

    /// Owner-or-admin capability used by every resource-level check.
    pub fn can_manage(&self, owner: &ObjectId) -> bool {
        self.is_admin() || &self.id == owner
    }
}

/// Marker left in the request when a bearer token was present but rejected.
#[derive(Debug, Clone)]
struct RejectedToken;

fn bearer_token(req: &ServiceRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Verifies bearer tokens and stores the resulting [`Identity`] in the
/// request extensions. Routes decide for themselves whether one is required.
pub struct Authentication {
    keys: Rc<JwtKeys>,
}

impl Authentication {
    pub fn new(keys: JwtKeys) -> Self {
        Self { keys: Rc::new(keys) }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthenticationMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AuthenticationMiddleware {
            service,
            keys: self.keys.clone(),
        }))
    }
}

pub struct AuthenticationMiddleware<S> {
    service: S,
    keys: Rc<JwtKeys>,
}

impl<S, B> Service<ServiceRequest> for AuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = S::Future;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let verified = bearer_token(&req).map(|token| self.keys.verify(token));
        match verified {
            Some(Ok(identity)) => {
                req.extensions_mut().insert(identity);
            }
            Some(Err(e)) => {
                log::debug!("Rejected bearer token on {}: {}", req.path(), e);
                req.extensions_mut().insert(RejectedToken);
            }
            None => {}
        }
        self.service.call(req)
    }
}

pub fn get_current_user(extensions: &Extensions) -> Option<Identity> {
    extensions.get::<Identity>().cloned()
}

pub fn require_auth(extensions: &Extensions) -> Result<Identity, ApiError> {
    get_current_user(extensions).ok_or_else(|| {
        if extensions.get::<RejectedToken>().is_some() {
            ApiError::auth("Invalid token")
        } else {
            ApiError::auth("Authentication required")
        }
    })
}

pub fn require_role(extensions: &Extensions, roles: &[UserRole]) -> Result<Identity, ApiError> {
    let identity = require_auth(extensions)?;
    if identity.has_role(roles) {
        Ok(identity)
    } else {
        Err(ApiError::forbidden())
    }
}
