//! Instructor-side progress reporting.
//!
//! Everything here is a pure function over documents that the handlers have
//! already loaded for one instructor's course set.

use std::collections::{BTreeMap, HashMap, HashSet};

use mongodb::bson::{oid::ObjectId, DateTime};
use serde::Serialize;

use crate::models::{
    course::{Course, LessonView},
    enrollment::Enrollment,
    iso,
    user::User,
};

#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub location: String,
    pub avatar_url: String,
}

impl From<&User> for StudentSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            name: user.name.clone(),
            email: user.email.clone(),
            location: user.location.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseSummary {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub lessons: Vec<LessonView>,
    pub created_at: String,
}

impl From<&Course> for CourseSummary {
    fn from(course: &Course) -> Self {
        Self {
            id: course.id.map(|id| id.to_hex()).unwrap_or_default(),
            title: course.title.clone(),
            lessons: course.lessons.iter().map(LessonView::from).collect(),
            created_at: iso(course.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRow {
    #[serde(rename = "_id")]
    pub id: String,
    pub student: StudentSummary,
    pub course: CourseSummary,
    pub progress_by_lesson_id: BTreeMap<String, bool>,
    pub progress_percent: u32,
    pub enrolled_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub student: StudentSummary,
    pub course_count: usize,
    pub latest_enrolled_at: String,
    pub avg_progress_percent: u32,
}

/// Share of the course's current lessons marked complete, rounded to a whole
/// percent. Keys for lessons no longer in the course are not counted.
pub fn progress_percent(course: &Course, enrollment: &Enrollment) -> u32 {
    let total = course.lessons.len();
    if total == 0 {
        return 0;
    }
    let completed = course
        .lessons
        .iter()
        .filter(|lesson| enrollment.is_completed(&lesson.id))
        .count();
    (completed as f64 / total as f64 * 100.0).round() as u32
}

pub fn mean_percent(percents: &[u32]) -> u32 {
    if percents.is_empty() {
        return 0;
    }
    let mean = percents.iter().map(|p| *p as f64).sum::<f64>() / percents.len() as f64;
    if mean.is_finite() {
        mean.round() as u32
    } else {
        0
    }
}

/// Case-insensitive substring match on the student's name or email.
/// A blank query matches everyone.
pub fn matches_query(student: &StudentSummary, query: Option<&str>) -> bool {
    let needle = match query.map(str::trim) {
        Some(q) if !q.is_empty() => q.to_lowercase(),
        _ => return true,
    };
    student.name.to_lowercase().contains(&needle) || student.email.to_lowercase().contains(&needle)
}

struct Joined<'a> {
    enrollment: &'a Enrollment,
    course: &'a Course,
    student: &'a User,
}

fn join<'a>(
    enrollments: &'a [Enrollment],
    courses: &'a HashMap<ObjectId, Course>,
    students: &'a HashMap<ObjectId, User>,
) -> Vec<Joined<'a>> {
    enrollments
        .iter()
        .filter_map(|enrollment| {
            let course = courses.get(&enrollment.course)?;
            let student = match students.get(&enrollment.student) {
                Some(student) => student,
                None => {
                    log::warn!(
                        "Skipping enrollment {:?}: student {} no longer exists",
                        enrollment.id,
                        enrollment.student
                    );
                    return None;
                }
            };
            Some(Joined {
                enrollment,
                course,
                student,
            })
        })
        .collect()
}

/// One row per enrollment, newest first.
pub fn enrollment_rows(
    enrollments: &[Enrollment],
    courses: &HashMap<ObjectId, Course>,
    students: &HashMap<ObjectId, User>,
    query: Option<&str>,
) -> Vec<EnrollmentRow> {
    let mut joined = join(enrollments, courses, students);
    joined.sort_by(|a, b| b.enrollment.created_at.cmp(&a.enrollment.created_at));

    joined
        .into_iter()
        .map(|j| EnrollmentRow {
            id: j.enrollment.id.map(|id| id.to_hex()).unwrap_or_default(),
            student: StudentSummary::from(j.student),
            course: CourseSummary::from(j.course),
            progress_by_lesson_id: j.enrollment.progress_by_lesson_id.clone(),
            progress_percent: progress_percent(j.course, j.enrollment),
            enrolled_at: iso(j.enrollment.created_at),
        })
        .filter(|row| matches_query(&row.student, query))
        .collect()
}

struct StudentAccumulator<'a> {
    student: &'a User,
    courses: HashSet<ObjectId>,
    latest: DateTime,
    percents: Vec<u32>,
}

/// One row per distinct student across the instructor's courses, ordered by
/// most recent enrollment. The query filter runs after grouping.
pub fn student_rows(
    enrollments: &[Enrollment],
    courses: &HashMap<ObjectId, Course>,
    students: &HashMap<ObjectId, User>,
    query: Option<&str>,
) -> Vec<StudentRow> {
    let mut groups: HashMap<ObjectId, StudentAccumulator> = HashMap::new();

    for j in join(enrollments, courses, students) {
        let acc = groups
            .entry(j.enrollment.student)
            .or_insert_with(|| StudentAccumulator {
                student: j.student,
                courses: HashSet::new(),
                latest: j.enrollment.created_at,
                percents: Vec::new(),
            });
        acc.courses.insert(j.enrollment.course);
        acc.latest = acc.latest.max(j.enrollment.created_at);
        acc.percents.push(progress_percent(j.course, j.enrollment));
    }

    let mut groups: Vec<_> = groups.into_values().collect();
    groups.sort_by(|a, b| {
        b.latest
            .cmp(&a.latest)
            .then_with(|| a.student.name.cmp(&b.student.name))
    });

    groups
        .into_iter()
        .map(|acc| StudentRow {
            student: StudentSummary::from(acc.student),
            course_count: acc.courses.len(),
            latest_enrolled_at: iso(acc.latest),
            avg_progress_percent: mean_percent(&acc.percents),
        })
        .filter(|row| matches_query(&row.student, query))
        .collect()
}
