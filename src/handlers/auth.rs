use actix_web::{get, post, put, web, HttpMessage, HttpRequest, HttpResponse};
use bcrypt::{hash, verify};
use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, ReturnDocument},
    Database,
};
use serde::Serialize;
use validator::Validate;

use crate::{
    errors::{conflict_on_duplicate, ApiError},
    middleware::auth::{require_auth, JwtKeys},
    models::{
        now,
        user::{
            normalize_email, PublicUser, SigninDto, SignupDto, UpdateProfileDto, User,
            UserProfile, UserRole,
        },
    },
};

const BCRYPT_COST: u32 = 10;

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: PublicUser,
}

#[derive(Serialize)]
struct ProfileUpdatedResponse {
    message: &'static str,
    user: PublicUser,
    token: String,
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(signup)
        .service(signin)
        .service(get_profile)
        .service(update_profile);
}

async fn hash_password(password: String) -> Result<String, ApiError> {
    Ok(web::block(move || hash(password, BCRYPT_COST)).await??)
}

async fn verify_password(password: String, password_hash: String) -> Result<bool, ApiError> {
    // A malformed stored hash counts as a mismatch.
    Ok(web::block(move || verify(password, &password_hash))
        .await?
        .unwrap_or(false))
}

#[post("/auth/signup")]
pub async fn signup(
    db: web::Data<Database>,
    keys: web::Data<JwtKeys>,
    body: web::Json<SignupDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner().normalized();
    dto.validate()?;

    let users = db.collection::<User>(User::COLLECTION);

    if users
        .find_one(doc! { "email": &dto.email }, None)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict("Email already in use"));
    }

    let password_hash = hash_password(dto.password).await?;
    let created_at = now();

    let mut user = User {
        id: None,
        name: dto.name,
        email: dto.email,
        password_hash,
        role: UserRole::for_signup(dto.role.as_deref()),
        phone: String::new(),
        location: String::new(),
        about_me: String::new(),
        avatar_url: String::new(),
        created_at,
        updated_at: created_at,
    };

    // The unique index settles concurrent signups for the same address.
    let result = users
        .insert_one(&user, None)
        .await
        .map_err(conflict_on_duplicate("Email already in use"))?;
    user.id = result.inserted_id.as_object_id();

    let token = keys.issue(&user)?;
    log::info!("Registered {} account {}", user.role.as_str(), user.email);

    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

#[post("/auth/signin")]
pub async fn signin(
    db: web::Data<Database>,
    keys: web::Data<JwtKeys>,
    body: web::Json<SigninDto>,
) -> Result<HttpResponse, ApiError> {
    let dto = body.into_inner();
    let invalid = || ApiError::auth("Invalid credentials");

    let user = db
        .collection::<User>(User::COLLECTION)
        .find_one(doc! { "email": normalize_email(&dto.email) }, None)
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(dto.password, user.password_hash.clone()).await? {
        return Err(invalid());
    }

    let token = keys.issue(&user)?;

    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

#[get("/auth/profile")]
pub async fn get_profile(
    req: HttpRequest,
    db: web::Data<Database>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_auth(&req.extensions())?;

    let user = db
        .collection::<User>(User::COLLECTION)
        .find_one(doc! { "_id": identity.id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(HttpResponse::Ok().json(UserProfile::from(user)))
}

#[put("/auth/profile")]
pub async fn update_profile(
    req: HttpRequest,
    db: web::Data<Database>,
    keys: web::Data<JwtKeys>,
    body: web::Json<UpdateProfileDto>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_auth(&req.extensions())?;

    let mut dto = body.into_inner();
    dto.email = dto
        .email
        .filter(|email| !email.trim().is_empty())
        .map(|email| normalize_email(&email));
    dto.name = dto.name.map(|name| name.trim().to_string());
    dto.validate()?;

    let users = db.collection::<User>(User::COLLECTION);

    let current = users
        .find_one(doc! { "_id": identity.id }, None)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let mut set = doc! { "updatedAt": now() };
    if let Some(name) = dto.name {
        set.insert("name", name);
    }
    if let Some(phone) = dto.phone {
        set.insert("phone", phone);
    }
    if let Some(location) = dto.location {
        set.insert("location", location);
    }
    if let Some(about_me) = dto.about_me {
        set.insert("aboutMe", about_me);
    }

    if let Some(email) = dto.email {
        if email != current.email {
            let taken = users
                .find_one(doc! { "email": &email }, None)
                .await?
                .map_or(false, |other| other.id != current.id);
            if taken {
                return Err(ApiError::conflict("Email already in use by another account"));
            }
            set.insert("email", email);
        }
    }

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();

    let user = users
        .find_one_and_update(doc! { "_id": identity.id }, doc! { "$set": set }, options)
        .await
        .map_err(conflict_on_duplicate("Email already in use by another account"))?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    // Re-issue so the caller's cached claims carry the new name and email.
    let token = keys.issue(&user)?;

    Ok(HttpResponse::Ok().json(ProfileUpdatedResponse {
        message: "Profile updated",
        user: PublicUser::from(&user),
        token,
    }))
}
