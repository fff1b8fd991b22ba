use std::collections::{HashMap, HashSet};

use actix_web::{get, post, web, HttpMessage, HttpRequest, HttpResponse};
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, Document},
    options::{FindOneAndUpdateOptions, ReturnDocument},
    Database,
};
use serde::Deserialize;

use crate::{
    errors::{is_duplicate_key, ApiError},
    handlers::courses::{published_courses, AUTHOR_ROLES},
    middleware::auth::{require_role, Identity},
    models::{
        course::{Course, CourseSearchQuery},
        enrollment::{Enrollment, EnrollmentView, ProgressDto},
        now, parse_object_id, truthy,
        user::{User, UserRole},
    },
    reports,
};

const LEARNER_ROLES: &[UserRole] = &[UserRole::Student, UserRole::Admin];

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_courses)
        .service(enroll)
        .service(my_enrollments)
        .service(set_lesson_progress)
        .service(instructor_enrollments)
        .service(instructor_students);
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructorReportQuery {
    pub course_id: Option<String>,
    pub q: Option<String>,
    pub instructor_id: Option<String>,
}

#[get("/students/courses")]
pub async fn list_courses(
    req: HttpRequest,
    db: web::Data<Database>,
    query: web::Query<CourseSearchQuery>,
) -> Result<HttpResponse, ApiError> {
    require_role(&req.extensions(), LEARNER_ROLES)?;
    let courses = published_courses(&db, query.q.as_deref()).await?;
    Ok(HttpResponse::Ok().json(courses))
}

#[post("/students/enroll/{course_id}")]
pub async fn enroll(
    req: HttpRequest,
    db: web::Data<Database>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), LEARNER_ROLES)?;
    let course_id = parse_object_id(&path)?;

    let published = db
        .collection::<Course>(Course::COLLECTION)
        .find_one(doc! { "_id": course_id, "published": true }, None)
        .await?;
    if published.is_none() {
        return Err(ApiError::not_found("Course not found"));
    }

    let enrollments = db.collection::<Enrollment>(Enrollment::COLLECTION);
    let filter = doc! { "student": identity.id, "course": course_id };
    let created_at = now();
    let update = doc! {
        "$setOnInsert": {
            "progressByLessonId": {},
            "createdAt": created_at,
            "updatedAt": created_at,
        }
    };
    let options = FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build();

    let enrollment = match enrollments
        .find_one_and_update(filter.clone(), update, options)
        .await
    {
        Ok(enrollment) => enrollment,
        // A concurrent enroll won the unique index; hand back its document.
        Err(e) if is_duplicate_key(&e) => enrollments.find_one(filter, None).await?,
        Err(e) => return Err(e.into()),
    }
    .ok_or_else(|| ApiError::internal("enrollment upsert returned no document"))?;

    Ok(HttpResponse::Created().json(EnrollmentView::from(enrollment)))
}

#[get("/students/me/enrollments")]
pub async fn my_enrollments(
    req: HttpRequest,
    db: web::Data<Database>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), LEARNER_ROLES)?;

    let enrollments: Vec<Enrollment> = db
        .collection::<Enrollment>(Enrollment::COLLECTION)
        .find(doc! { "student": identity.id }, None)
        .await?
        .try_collect()
        .await?;

    let course_ids: HashSet<ObjectId> = enrollments.iter().map(|e| e.course).collect();
    let courses = courses_by_id(&db, doc! { "_id": { "$in": to_vec(course_ids) } }).await?;

    let views: Vec<EnrollmentView> = enrollments
        .into_iter()
        .map(|enrollment| {
            let course = courses.get(&enrollment.course);
            EnrollmentView::with_course(enrollment, course)
        })
        .collect();

    Ok(HttpResponse::Ok().json(views))
}

#[post("/students/progress/{course_id}/{lesson_id}")]
pub async fn set_lesson_progress(
    req: HttpRequest,
    db: web::Data<Database>,
    path: web::Path<(String, String)>,
    body: Option<web::Json<ProgressDto>>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), LEARNER_ROLES)?;
    let (course_id, lesson_id) = path.into_inner();
    let course_id = parse_object_id(&course_id)?;
    // A missing or unreadable body means "not completed".
    let completed = body.map_or(false, |body| truthy(&body.completed));

    let enrollments = db.collection::<Enrollment>(Enrollment::COLLECTION);
    let filter = doc! { "student": identity.id, "course": course_id };

    // Enrollment is checked before the lesson id so non-members always get 404.
    if enrollments.find_one(filter.clone(), None).await?.is_none() {
        return Err(ApiError::not_found("Not enrolled"));
    }

    // The lesson id becomes part of a field path, so only ObjectIds are accepted.
    let lesson_id = ObjectId::parse_str(lesson_id.trim())
        .map_err(|_| ApiError::validation("Invalid lesson id"))?;

    // Single-key $set so concurrent toggles of other lessons are never lost.
    let mut set = doc! { "updatedAt": now() };
    set.insert(Enrollment::progress_key(&lesson_id), completed);

    let options = FindOneAndUpdateOptions::builder()
        .return_document(ReturnDocument::After)
        .build();

    let enrollment = enrollments
        .find_one_and_update(filter, doc! { "$set": set }, options)
        .await?
        .ok_or_else(|| ApiError::not_found("Not enrolled"))?;

    Ok(HttpResponse::Ok().json(EnrollmentView::from(enrollment)))
}

/// Which courses an instructor report covers.
pub fn course_scope(identity: &Identity, instructor_id: Option<&str>) -> Result<Document, ApiError> {
    if !identity.is_admin() {
        return Ok(doc! { "instructor": identity.id });
    }
    match instructor_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(raw) => Ok(doc! { "instructor": parse_object_id(raw)? }),
        None => Ok(doc! {}),
    }
}

fn to_vec(ids: HashSet<ObjectId>) -> Vec<ObjectId> {
    ids.into_iter().collect()
}

async fn courses_by_id(
    db: &Database,
    filter: Document,
) -> Result<HashMap<ObjectId, Course>, ApiError> {
    let courses: Vec<Course> = db
        .collection::<Course>(Course::COLLECTION)
        .find(filter, None)
        .await?
        .try_collect()
        .await?;
    Ok(courses
        .into_iter()
        .filter_map(|course| course.id.map(|id| (id, course)))
        .collect())
}

struct ReportData {
    enrollments: Vec<Enrollment>,
    courses: HashMap<ObjectId, Course>,
    students: HashMap<ObjectId, User>,
}

async fn load_report_data(
    db: &Database,
    identity: &Identity,
    query: &InstructorReportQuery,
) -> Result<ReportData, ApiError> {
    let mut courses = courses_by_id(db, course_scope(identity, query.instructor_id.as_deref())?).await?;

    if let Some(raw) = query.course_id.as_deref().filter(|id| !id.trim().is_empty()) {
        let course_id = parse_object_id(raw)?;
        courses.retain(|id, _| *id == course_id);
    }

    if courses.is_empty() {
        return Ok(ReportData {
            enrollments: Vec::new(),
            courses,
            students: HashMap::new(),
        });
    }

    let course_ids: Vec<ObjectId> = courses.keys().copied().collect();
    let enrollments: Vec<Enrollment> = db
        .collection::<Enrollment>(Enrollment::COLLECTION)
        .find(doc! { "course": { "$in": course_ids } }, None)
        .await?
        .try_collect()
        .await?;

    let student_ids: HashSet<ObjectId> = enrollments.iter().map(|e| e.student).collect();
    let students: Vec<User> = if student_ids.is_empty() {
        Vec::new()
    } else {
        db.collection::<User>(User::COLLECTION)
            .find(doc! { "_id": { "$in": to_vec(student_ids) } }, None)
            .await?
            .try_collect()
            .await?
    };

    Ok(ReportData {
        enrollments,
        courses,
        students: students
            .into_iter()
            .filter_map(|user| user.id.map(|id| (id, user)))
            .collect(),
    })
}

#[get("/students/instructor/enrollments")]
pub async fn instructor_enrollments(
    req: HttpRequest,
    db: web::Data<Database>,
    query: web::Query<InstructorReportQuery>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), AUTHOR_ROLES)?;
    let data = load_report_data(&db, &identity, &query).await?;

    let rows = reports::enrollment_rows(
        &data.enrollments,
        &data.courses,
        &data.students,
        query.q.as_deref(),
    );
    Ok(HttpResponse::Ok().json(rows))
}

#[get("/students/instructor/students")]
pub async fn instructor_students(
    req: HttpRequest,
    db: web::Data<Database>,
    query: web::Query<InstructorReportQuery>,
) -> Result<HttpResponse, ApiError> {
    let identity = require_role(&req.extensions(), AUTHOR_ROLES)?;
    let data = load_report_data(&db, &identity, &query).await?;

    let rows = reports::student_rows(
        &data.enrollments,
        &data.courses,
        &data.students,
        query.q.as_deref(),
    );
    Ok(HttpResponse::Ok().json(rows))
}
