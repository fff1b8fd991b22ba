use std::collections::{HashMap, HashSet};

use actix_web::{delete, get, post, put, web, HttpMessage, HttpRequest, HttpResponse};
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Database,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    errors::ApiError,
    middleware::auth::{require_auth, require_role},
    models::{
        course::{Course, CourseSearchQuery, CourseView, CreateCourseDto, UpdateCourseDto},
        enrollment::Enrollment,
        escape_regex, parse_object_id,
        user::{User, UserRole},
    },
};

pub const AUTHOR_ROLES: &[UserRole] = &[UserRole::Instructor, UserRole::Admin];

pub fn routes(cfg: &mut web::ServiceConfig) {
    // `/courses/mine` has to be registered ahead of `/courses/{id}`.
    cfg.service(list_published)
        .service(list_mine)
        .service(get_course)
        .service(create_course)
        .service(update_course)
        .service(delete_course);
}

#[derive(Deserialize)]
struct InstructorName {
    #[serde(rename = "_id")]
    id: ObjectId,
    name: String,
}

/// Display names for the instructors of `courses`, without touching credentials.
pub async fn instructor_names(
    db: &Database,
    courses: &[Course],
) -> Result<HashMap<ObjectId, String>, ApiError> {
    let ids: HashSet<ObjectId> = courses.iter().map(|c| c.instructor).collect();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let ids: Vec<ObjectId> = ids.into_iter().collect();

    let options = FindOptions::builder()
        .projection(doc! { "_id": 1, "name": 1 })
        .build();
    let names: Vec<InstructorName> = db
        .collection::<InstructorName>(User::COLLECTION)
        .find(doc! { "_id": { "$in": ids } }, options)
        .await?
        .try_collect()
        .await?;

    Ok(names.into_iter().map(|n| (n.id, n.name)).collect())
}

pub fn published_filter(query: Option<&str>) -> Document {
    let mut filter = doc! { "published": true };
    if let Some(q) = query.map(str::trim).filter(|q| !q.is_empty()) {
        filter.insert("title", doc! { "$regex": escape_regex(q), "$options": "i" });
    }
    filter
}

/// Published courses, optionally narrowed by a title search, with instructor names.
pub async fn published_courses(
    db: &Database,
    query: Option<&str>,
) -> Result<Vec<CourseView>, ApiError> {
    let courses: Vec<Course> = db
        .collection::<Course>(Course::COLLECTION)
        .find(published_filter(query), None)
        .await?
        .try_collect()
        .await?;

    let names = instructor_names(db, &courses).await?;

    Ok(courses
        .iter()
        .map(|course| CourseView::new(course, names.get(&course.instructor).cloned()))
        .collect())
}

pub async fn find_course(db: &Database, id: ObjectId) -> Result<Option<Course>, ApiError> {
    Ok(db
        .collection::<Course>(Course::COLLECTION)
        .find_one(doc! { "_id": id }, None)
        .await?)
}

#[get("/courses")]
pub async fn list_published(
    db: web::Data<Database>,
    query: web::Query<CourseSearchQuery>,
) -> Result<HttpResponse, ApiError> {
    let courses = published_courses(&db, query.q.as_deref()).await?;
    Ok(HttpResponse::Ok().json(courses))
}

#[get("/courses/mine")]
pub async fn list_mine(
    req: HttpRequest,
    db: web::Data<Database>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), AUTHOR_ROLES)?;

    let filter = if identity.is_admin() {
        doc! {}
    } else {
        doc! { "instructor": identity.id }
    };
    let options = FindOptions::builder().sort(doc! { "createdAt": -1 }).build();

    let courses: Vec<Course> = db
        .collection::<Course>(Course::COLLECTION)
        .find(filter, options)
        .await?
        .try_collect()
        .await?;

    let views: Vec<CourseView> = courses.iter().map(CourseView::from).collect();
    Ok(HttpResponse::Ok().json(views))
}

#[get("/courses/{id}")]
pub async fn get_course(
    req: HttpRequest,
    db: web::Data<Database>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_auth(&req.extensions())?;
    let id = parse_object_id(&path)?;

    let course = find_course(&db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Not found"))?;

    // Drafts read as absent to anyone who cannot manage them.
    if !course.visible_to(&identity) {
        return Err(ApiError::not_found("Not found"));
    }

    let names = instructor_names(&db, std::slice::from_ref(&course)).await?;
    let name = names.get(&course.instructor).cloned();
    Ok(HttpResponse::Ok().json(CourseView::new(&course, name)))
}

#[post("/courses")]
pub async fn create_course(
    req: HttpRequest,
    db: web::Data<Database>,
    body: web::Json<CreateCourseDto>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), AUTHOR_ROLES)?;

    let mut course = body.into_inner().into_course(identity.id)?;
    let result = db
        .collection::<Course>(Course::COLLECTION)
        .insert_one(&course, None)
        .await?;
    course.id = result.inserted_id.as_object_id();

    log::info!(
        "Course {:?} created by {} with {} lessons",
        course.id,
        identity.email,
        course.lessons.len()
    );

    Ok(HttpResponse::Created().json(CourseView::new(&course, Some(identity.name))))
}

#[put("/courses/{id}")]
pub async fn update_course(
    req: HttpRequest,
    db: web::Data<Database>,
    path: web::Path<String>,
    body: web::Json<UpdateCourseDto>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), AUTHOR_ROLES)?;
    let id = parse_object_id(&path)?;

    let course = find_course(&db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Not found"))?;
    if !identity.can_manage(&course.instructor) {
        return Err(ApiError::forbidden());
    }

    let set = body.into_inner().into_set_document()?;
    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();

    let updated = db
        .collection::<Course>(Course::COLLECTION)
        .find_one_and_update(doc! { "_id": id }, doc! { "$set": set }, options)
        .await?
        .ok_or_else(|| ApiError::not_found("Not found"))?;

    Ok(HttpResponse::Ok().json(CourseView::from(&updated)))
}

#[delete("/courses/{id}")]
pub async fn delete_course(
    req: HttpRequest,
    db: web::Data<Database>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), AUTHOR_ROLES)?;
    let id = parse_object_id(&path)?;

    let course = find_course(&db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Not found"))?;
    if !identity.can_manage(&course.instructor) {
        return Err(ApiError::forbidden());
    }

    // Enrollments go first so a failed request can simply be retried.
    let removed = db
        .collection::<Enrollment>(Enrollment::COLLECTION)
        .delete_many(doc! { "course": id }, None)
        .await?;

    db.collection::<Course>(Course::COLLECTION)
        .delete_one(doc! { "_id": id }, None)
        .await?;

    log::info!(
        "Course {} deleted by {}, removed {} enrollments",
        id,
        identity.email,
        removed.deleted_count
    );

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}
