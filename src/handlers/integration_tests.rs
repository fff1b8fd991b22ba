//! End-to-end route tests against a real MongoDB.
//!
//! Each test works in its own throwaway database on the server named by
//! `MONGO_URI`. Run them with `cargo test -- --ignored`.

use actix_web::{
    body::MessageBody,
    dev::{Service, ServiceResponse},
    http::{header, StatusCode},
    test, web, App,
};
use mongodb::{
    bson::{doc, oid::ObjectId},
    Database,
};
use serde_json::{json, Value};

use crate::{
    config::{self, AppConfig},
    handlers::{auth, courses, students},
    middleware::{auth::JwtKeys, Authentication},
    models::enrollment::Enrollment,
};

const SECRET: &str = "integration-secret";

async fn fresh_database() -> Database {
    let mut config = AppConfig::from_env();
    config.database_name = Some(format!("eduport_test_{}", ObjectId::new().to_hex()));
    config::init_database(&config)
        .await
        .expect("MONGO_URI should point at a reachable MongoDB")
}

macro_rules! init_app {
    ($db:expr) => {
        test::init_service(
            App::new()
                .wrap(Authentication::new(JwtKeys::new(SECRET)))
                .app_data(web::Data::new($db.clone()))
                .app_data(web::Data::new(JwtKeys::new(SECRET)))
                .service(
                    web::scope("/api")
                        .configure(auth::routes)
                        .configure(courses::routes)
                        .configure(students::routes),
                ),
        )
        .await
    };
}

async fn send<S, R, B>(app: &S, req: R) -> (StatusCode, Value)
where
    S: Service<R, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let resp = test::call_service(app, req).await;
    let status = resp.status();
    let body = test::read_body(resp).await;
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn bearer(token: &str) -> (header::HeaderName, String) {
    (header::AUTHORIZATION, format!("Bearer {}", token))
}

fn signup(name: &str, email: &str, role: &str) -> test::TestRequest {
    test::TestRequest::post().uri("/api/auth/signup").set_json(json!({
        "name": name,
        "email": email,
        "password": "secret123",
        "role": role,
    }))
}

fn token_of(body: &Value) -> String {
    body["token"].as_str().unwrap().to_string()
}

fn draft_course() -> Value {
    json!({
        "title": "Rust for Beginners",
        "lessons": [
            { "title": "Ownership" },
            { "title": "Borrowing" },
        ],
    })
}

#[actix_web::test]
#[ignore]
async fn test_duplicate_signup_conflicts() {
    let db = fresh_database().await;
    let app = init_app!(db);

    let (status, body) = send(&app, signup("Ann", "ann@example.com", "student").to_request()).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["email"], "ann@example.com");

    let (status, body) =
        send(&app, signup("Ann Again", "  ANN@Example.com ", "student").to_request()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Email already in use");

    db.drop(None).await.unwrap();
}

#[actix_web::test]
#[ignore]
async fn test_profile_email_taken_by_other_account() {
    let db = fresh_database().await;
    let app = init_app!(db);

    send(&app, signup("Ann", "ann@example.com", "student").to_request()).await;
    let (_, bob) = send(&app, signup("Bob", "bob@example.com", "student").to_request()).await;

    let req = test::TestRequest::put()
        .uri("/api/auth/profile")
        .insert_header(bearer(&token_of(&bob)))
        .set_json(json!({ "email": "ann@example.com" }))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Email already in use by another account");

    // Keeping your own address is not a collision.
    let req = test::TestRequest::put()
        .uri("/api/auth/profile")
        .insert_header(bearer(&token_of(&bob)))
        .set_json(json!({ "email": "bob@example.com", "location": "Oslo" }))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Profile updated");

    db.drop(None).await.unwrap();
}

#[actix_web::test]
#[ignore]
async fn test_draft_hidden_until_published() {
    let db = fresh_database().await;
    let app = init_app!(db);

    let (_, teacher) = send(&app, signup("Tess", "tess@example.com", "instructor").to_request()).await;
    let (_, student) = send(&app, signup("Sam", "sam@example.com", "student").to_request()).await;
    let teacher = token_of(&teacher);
    let student = token_of(&student);

    let req = test::TestRequest::post()
        .uri("/api/courses")
        .insert_header(bearer(&teacher))
        .set_json(draft_course())
        .to_request();
    let (status, course) = send(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(course["published"], false);
    let course_uri = format!("/api/courses/{}", course["_id"].as_str().unwrap());

    let req = test::TestRequest::get()
        .uri(&course_uri)
        .insert_header(bearer(&student))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri(&format!("/api/students/enroll/{}", course["_id"].as_str().unwrap()))
        .insert_header(bearer(&student))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Course not found");

    // The owner still sees the draft.
    let req = test::TestRequest::get()
        .uri(&course_uri)
        .insert_header(bearer(&teacher))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let req = test::TestRequest::put()
        .uri(&course_uri)
        .insert_header(bearer(&teacher))
        .set_json(json!({ "published": true }))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);

    let req = test::TestRequest::get()
        .uri(&course_uri)
        .insert_header(bearer(&student))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lessons"].as_array().unwrap().len(), 2);
    assert_eq!(body["instructor"]["name"], "Tess");

    db.drop(None).await.unwrap();
}

#[actix_web::test]
#[ignore]
async fn test_progress_flow_and_reports() {
    let db = fresh_database().await;
    let app = init_app!(db);

    let (_, teacher) = send(&app, signup("Tess", "tess@example.com", "instructor").to_request()).await;
    let (_, student) = send(&app, signup("Sam", "sam@example.com", "student").to_request()).await;
    let teacher = token_of(&teacher);
    let student = token_of(&student);

    let mut body = draft_course();
    body["published"] = json!(true);
    let req = test::TestRequest::post()
        .uri("/api/courses")
        .insert_header(bearer(&teacher))
        .set_json(body)
        .to_request();
    let (_, course) = send(&app, req).await;
    let course_id = course["_id"].as_str().unwrap().to_string();
    let first_lesson = course["lessons"][0]["_id"].as_str().unwrap().to_string();
    let progress_uri = format!("/api/students/progress/{}/{}", course_id, first_lesson);

    // Not enrolled yet, whatever the lesson id looks like.
    for uri in [
        progress_uri.clone(),
        format!("/api/students/progress/{}/not-a-lesson", course_id),
    ] {
        let req = test::TestRequest::post()
            .uri(&uri)
            .insert_header(bearer(&student))
            .set_json(json!({ "completed": true }))
            .to_request();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Not enrolled");
    }

    let enroll_uri = format!("/api/students/enroll/{}", course_id);
    let mut enrollment_ids = Vec::new();
    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri(&enroll_uri)
            .insert_header(bearer(&student))
            .to_request();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::CREATED);
        enrollment_ids.push(body["_id"].as_str().unwrap().to_string());
    }
    assert_eq!(enrollment_ids[0], enrollment_ids[1]);
    let stored = db
        .collection::<Enrollment>(Enrollment::COLLECTION)
        .count_documents(doc! {}, None)
        .await
        .unwrap();
    assert_eq!(stored, 1);

    let req = test::TestRequest::post()
        .uri(&progress_uri)
        .insert_header(bearer(&student))
        .set_json(json!({ "completed": true }))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progressByLessonId"][first_lesson.as_str()], true);

    let req = test::TestRequest::get()
        .uri("/api/students/instructor/enrollments")
        .insert_header(bearer(&teacher))
        .to_request();
    let (status, rows) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["progressPercent"], 50);
    assert_eq!(rows[0]["student"]["name"], "Sam");

    let req = test::TestRequest::get()
        .uri("/api/students/instructor/students")
        .insert_header(bearer(&teacher))
        .to_request();
    let (status, rows) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rows[0]["courseCount"], 1);
    assert_eq!(rows[0]["avgProgressPercent"], 50);

    // No body at all clears the flag.
    let req = test::TestRequest::post()
        .uri(&progress_uri)
        .insert_header(bearer(&student))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["progressByLessonId"][first_lesson.as_str()], false);

    db.drop(None).await.unwrap();
}

#[actix_web::test]
#[ignore]
async fn test_delete_course_removes_enrollments() {
    let db = fresh_database().await;
    let app = init_app!(db);

    let (_, teacher) = send(&app, signup("Tess", "tess@example.com", "instructor").to_request()).await;
    let (_, student) = send(&app, signup("Sam", "sam@example.com", "student").to_request()).await;
    let teacher = token_of(&teacher);
    let student = token_of(&student);

    let mut body = draft_course();
    body["published"] = json!(true);
    let req = test::TestRequest::post()
        .uri("/api/courses")
        .insert_header(bearer(&teacher))
        .set_json(body)
        .to_request();
    let (_, course) = send(&app, req).await;
    let course_id = course["_id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/students/enroll/{}", course_id))
        .insert_header(bearer(&student))
        .to_request();
    send(&app, req).await;

    // Only the owner or an admin may delete.
    let req = test::TestRequest::delete()
        .uri(&format!("/api/courses/{}", course_id))
        .insert_header(bearer(&student))
        .to_request();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/courses/{}", course_id))
        .insert_header(bearer(&teacher))
        .to_request();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let remaining = db
        .collection::<Enrollment>(Enrollment::COLLECTION)
        .count_documents(doc! {}, None)
        .await
        .unwrap();
    assert_eq!(remaining, 0);

    let req = test::TestRequest::get()
        .uri("/api/students/me/enrollments")
        .insert_header(bearer(&student))
        .to_request();
    let (_, enrollments) = send(&app, req).await;
    assert!(enrollments.as_array().unwrap().is_empty());

    db.drop(None).await.unwrap();
}
