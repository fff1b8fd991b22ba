use std::collections::BTreeMap;

use mongodb::bson::{oid::ObjectId, DateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    course::{Course, CourseView},
    iso,
};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub student: ObjectId,
    pub course: ObjectId,
    #[serde(default)]
    pub progress_by_lesson_id: BTreeMap<String, bool>,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Enrollment {
    pub const COLLECTION: &'static str = "enrollments";

    /// Path of one progress entry, for targeted `$set` updates.
    pub fn progress_key(lesson_id: &ObjectId) -> String {
        format!("progressByLessonId.{}", lesson_id.to_hex())
    }

    pub fn is_completed(&self, lesson_id: &ObjectId) -> bool {
        self.progress_by_lesson_id
            .get(&lesson_id.to_hex())
            .copied()
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
pub struct ProgressDto {
    #[serde(default)]
    pub completed: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum CourseRef {
    Id(String),
    Course(CourseView),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentView {
    #[serde(rename = "_id")]
    pub id: String,
    pub student: String,
    pub course: CourseRef,
    pub progress_by_lesson_id: BTreeMap<String, bool>,
    pub created_at: String,
    pub updated_at: String,
}

impl EnrollmentView {
    /// Attaches the full course document when it is still present.
    pub fn with_course(enrollment: Enrollment, course: Option<&Course>) -> Self {
        let course_ref = match course {
            Some(course) => CourseRef::Course(CourseView::from(course)),
            None => CourseRef::Id(enrollment.course.to_hex()),
        };
        Self {
            id: enrollment.id.map(|id| id.to_hex()).unwrap_or_default(),
            student: enrollment.student.to_hex(),
            course: course_ref,
            progress_by_lesson_id: enrollment.progress_by_lesson_id,
            created_at: iso(enrollment.created_at),
            updated_at: iso(enrollment.updated_at),
        }
    }
}

impl From<Enrollment> for EnrollmentView {
    fn from(enrollment: Enrollment) -> Self {
        EnrollmentView::with_course(enrollment, None)
    }
}
